pub mod bands;
pub mod client;
pub mod clock;
pub mod constants;
pub mod error;
pub mod geo;
pub mod geofence;
pub mod ingest;
pub mod rng;
pub mod route;
pub mod scheduler;
pub mod spawn;
pub mod spiral;
pub mod sync;
pub mod teleport;

pub use bands::{BandUpdate, CellBands, ScanWindow};
pub use client::{ClaimBook, ClientHandle, ClientMode, ClientState, ClientStore};
pub use error::{GeofenceError, ModeParseError, RouteFileError, SourceError};
pub use geo::{BoundingBox, CellId, LatLon};
pub use geofence::{Geofence, GeofenceSet};
pub use ingest::{
    EventSink, IngestSummary, Ingestor, ObservationBatch, ObservationStore, ObservedSpawn,
    SpawnEvent, SpawnEventKind,
};
pub use route::{Candidate, RouteOptions, Waypoint};
pub use scheduler::{
    Assignment, CandidateQuery, ChaseLimit, CheckIn, ModeParams, Scheduler, Step, TargetKind,
    TargetSource,
};
pub use spawn::{Sighting, SpawnKind, SpawnLinks, SpawnPoint};
pub use spiral::SpiralState;
pub use sync::KeyedLocks;
pub use teleport::{FeedbackKind, FeedbackLog, TeleportGate};
