use scout_core::{
    BoundingBox, CellBands, ClientMode, ClientState, IngestSummary, LatLon, ScanWindow,
    SpawnPoint, Step,
};
use serde::{Deserialize, Serialize};

use crate::events::StoredEvent;
use crate::store::{StoreCounts, TargetRecord};

#[derive(Debug, Serialize)]
pub(crate) struct CheckInResponse {
    pub(crate) success: bool,
    pub(crate) next_lat: f64,
    pub(crate) next_lon: f64,
    #[serde(flatten)]
    pub(crate) step: Step,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct JumpRequest {
    #[serde(alias = "client_id")]
    pub(crate) uuid: String,
    pub(crate) latitude: f64,
    pub(crate) longitude: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JumpResponse {
    pub(crate) success: bool,
    pub(crate) client_id: String,
    pub(crate) lat: f64,
    pub(crate) lon: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) service: &'static str,
    pub(crate) clients: usize,
    pub(crate) active_clients: usize,
    #[serde(flatten)]
    pub(crate) store: StoreCounts,
    pub(crate) events_buffered: usize,
    pub(crate) claims: Vec<ClaimCount>,
    pub(crate) auth_required: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ClaimCount {
    pub(crate) scope: String,
    pub(crate) claimed: usize,
}

/// Status view of one client: what it is doing and what it has queued.
#[derive(Debug, Serialize)]
pub(crate) struct ClientView {
    pub(crate) id: String,
    pub(crate) mode: ClientMode,
    pub(crate) active: bool,
    pub(crate) position: LatLon,
    pub(crate) last_updated: i64,
    pub(crate) last_teleport: Option<i64>,
    pub(crate) route_len: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) route_head: Option<LatLon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) route_name: Option<String>,
    pub(crate) no_overlap: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) claim_scope: Option<String>,
    pub(crate) spiral_radius: u32,
}

impl ClientView {
    pub(crate) fn new(client: &ClientState, now: i64) -> Self {
        Self {
            id: client.id.clone(),
            mode: client.effective_mode(now),
            active: client.is_active(now),
            position: client.position,
            last_updated: client.last_updated,
            last_teleport: client.last_teleport,
            route_len: client.route.len(),
            route_head: client.route.front().map(|stop| stop.location),
            route_name: client.route_name.clone(),
            no_overlap: client.no_overlap,
            claim_scope: client.claim_scope.clone(),
            spiral_radius: client.spiral.radius,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ClientListResponse {
    pub(crate) success: bool,
    pub(crate) clients: Vec<ClientView>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ObservationResponse {
    pub(crate) success: bool,
    #[serde(flatten)]
    pub(crate) summary: IngestSummary,
    pub(crate) feedback_recorded: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TargetUpsertRequest {
    pub(crate) targets: Vec<TargetRecord>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TargetUpsertResponse {
    pub(crate) success: bool,
    pub(crate) upserted: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct CellResponse {
    pub(crate) success: bool,
    pub(crate) cell: CellBands,
    pub(crate) next_window: Option<ScanWindow>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct BboxQuery {
    pub(crate) min_lat: f64,
    pub(crate) max_lat: f64,
    pub(crate) min_lon: f64,
    pub(crate) max_lon: f64,
}

impl BboxQuery {
    pub(crate) fn to_bbox(self) -> Result<BoundingBox, String> {
        let values = [self.min_lat, self.max_lat, self.min_lon, self.max_lon];
        if values.iter().any(|v| !v.is_finite()) {
            return Err("bounding box values must be finite".to_string());
        }
        if self.min_lat > self.max_lat || self.min_lon > self.max_lon {
            return Err("bounding box minimum exceeds maximum".to_string());
        }
        Ok(BoundingBox {
            min_lat: self.min_lat,
            max_lat: self.max_lat,
            min_lon: self.min_lon,
            max_lon: self.max_lon,
        })
    }
}

/// A spawn point with its predicted appearance window for the current hour.
#[derive(Debug, Serialize)]
pub(crate) struct SpawnPointView {
    #[serde(flatten)]
    pub(crate) spawnpoint: SpawnPoint,
    pub(crate) tth_found: bool,
    pub(crate) active: bool,
    pub(crate) predicted_start: u32,
    pub(crate) predicted_end: u32,
    pub(crate) visible_now: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) search_window: Option<ScanWindow>,
}

impl SpawnPointView {
    pub(crate) fn new(spawnpoint: SpawnPoint, now: i64, spawn_delay_secs: i64) -> Self {
        let (predicted_start, predicted_end) = spawnpoint.start_end(spawn_delay_secs);
        Self {
            tth_found: spawnpoint.tth_found(),
            active: spawnpoint.is_active(),
            predicted_start,
            predicted_end,
            visible_now: spawnpoint.predicted_visible(now, spawn_delay_secs),
            search_window: spawnpoint.search_window(now),
            spawnpoint,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SpawnPointListResponse {
    pub(crate) success: bool,
    pub(crate) spawnpoints: Vec<SpawnPointView>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub(crate) struct EventsQuery {
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct EventsResponse {
    pub(crate) success: bool,
    pub(crate) events: Vec<StoredEvent>,
}
