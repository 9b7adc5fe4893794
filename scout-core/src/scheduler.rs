//! Per-client target scheduling.
//!
//! A check-in locks the client's record, decides whether its queued route is
//! still valid, advances or rebuilds it, and answers with the coordinate the
//! client should report from next. Route building for clients that share a
//! no-overlap scope is serialised through that scope's claim lock; a client
//! that finds the lock taken stays where it is for this round.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, TryLockError};

use serde::{Deserialize, Serialize};

use crate::client::{ClaimBook, ClientHandle, ClientMode, ClientState, ClientStore};
use crate::constants::{
    DEFAULT_ARRIVED_RANGE_M, DEFAULT_BBOX_HALF_SPAN_DEG, DEFAULT_MAX_RADIUS_KM,
    DEFAULT_SCHEDULE_TIMEOUT_SECS, DEFAULT_SPEED_KMH, DEFAULT_STEP_SIZE_DEG,
    DEFAULT_TELEPORT_FACTOR, DEFAULT_TELEPORT_IGNORE_M, RECENT_SCAN_GUARD_SECS,
};
use crate::error::SourceError;
use crate::geo::{distance_m, BoundingBox, LatLon, COORDINATE_QUANTUM_DEG};
use crate::geofence::GeofenceSet;
use crate::rng::{jitter_location, SeededRng};
use crate::route::{
    filter_candidates, nearest_neighbor_route, Candidate, CandidateFilter, RouteOptions, Waypoint,
};
use crate::spiral::SpiralParams;
use crate::sync::lock_unpoisoned;
use crate::teleport::TeleportGate;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Spawn,
    PointOfInterest,
    AreaControl,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spawn => "spawn",
            Self::PointOfInterest => "point_of_interest",
            Self::AreaControl => "area_control",
        }
    }

    fn for_mode(mode: ClientMode) -> Option<Self> {
        match mode {
            ClientMode::WalkToSpawn => Some(Self::Spawn),
            ClientMode::WalkToPoi => Some(Self::PointOfInterest),
            ClientMode::TeleportToPoi => Some(Self::AreaControl),
            _ => None,
        }
    }
}

/// What the persistence collaborator is asked for when a route is built.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateQuery {
    pub kind: TargetKind,
    pub bbox: BoundingBox,
    pub geofence: Option<String>,
    /// Kind-specific business filter: spawns without an exact boundary,
    /// points of interest without a live side objective, area control
    /// without an active contest.
    pub chase_only: bool,
    /// Only targets not scanned at or after this time.
    pub scanned_before: Option<i64>,
    pub now: i64,
}

pub trait TargetSource {
    fn candidates(&self, query: &CandidateQuery) -> Result<Vec<Candidate>, SourceError>;

    /// Named coordinate list, `None` when no such file exists.
    fn route_file(&self, name: &str) -> Result<Option<Vec<LatLon>>, SourceError>;

    /// Previously persisted state for a client the store has not seen since
    /// start-up.
    fn load_client(&self, _id: &str) -> Result<Option<ClientState>, SourceError> {
        Ok(None)
    }
}

impl<T: TargetSource + ?Sized> TargetSource for Arc<T> {
    fn candidates(&self, query: &CandidateQuery) -> Result<Vec<Candidate>, SourceError> {
        (**self).candidates(query)
    }

    fn route_file(&self, name: &str) -> Result<Option<Vec<LatLon>>, SourceError> {
        (**self).route_file(name)
    }

    fn load_client(&self, id: &str) -> Result<Option<ClientState>, SourceError> {
        (**self).load_client(id)
    }
}

/// Business filter switch. `UpTo` also caps how many targets are chased.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChaseLimit {
    #[default]
    Off,
    All,
    UpTo(usize),
}

impl ChaseLimit {
    pub fn enabled(&self) -> bool {
        !matches!(self, Self::Off | Self::UpTo(0))
    }

    pub fn cap(&self) -> Option<usize> {
        match self {
            Self::UpTo(limit) => Some(*limit),
            Self::Off | Self::All => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModeParams {
    pub schedule_timeout_secs: i64,
    /// `0` means unlimited.
    pub max_radius_km: f64,
    pub step_size_deg: f64,
    pub teleport_factor: f64,
    pub speed_kmh: f64,
    pub arrived_range_m: f64,
    pub chase: ChaseLimit,
    pub max_points: Option<usize>,
    pub geofence: Option<String>,
    pub no_overlap: bool,
    /// Claim pool shared with other no-overlap clients; defaults to the mode.
    pub scope: Option<String>,
    /// Minimum distance between consecutive teleport stops.
    pub teleport_ignore_m: f64,
    pub oldest_first: bool,
    /// Route-file name; defaults to the client id.
    pub route: Option<String>,
    pub jitter_m: f64,
    pub gate: TeleportGate,
}

impl Default for ModeParams {
    fn default() -> Self {
        Self {
            schedule_timeout_secs: DEFAULT_SCHEDULE_TIMEOUT_SECS,
            max_radius_km: DEFAULT_MAX_RADIUS_KM,
            step_size_deg: DEFAULT_STEP_SIZE_DEG,
            teleport_factor: DEFAULT_TELEPORT_FACTOR,
            speed_kmh: DEFAULT_SPEED_KMH,
            arrived_range_m: DEFAULT_ARRIVED_RANGE_M,
            chase: ChaseLimit::Off,
            max_points: None,
            geofence: None,
            no_overlap: false,
            scope: None,
            teleport_ignore_m: DEFAULT_TELEPORT_IGNORE_M,
            oldest_first: false,
            route: None,
            jitter_m: 0.0,
            gate: TeleportGate::default(),
        }
    }
}

impl ModeParams {
    fn spiral(&self) -> SpiralParams {
        SpiralParams {
            step_size_deg: self.step_size_deg,
            teleport_factor: self.teleport_factor,
            max_radius_km: self.max_radius_km,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckIn {
    pub client_id: String,
    /// `None` (or `0,0`) when the client does not know where it is.
    pub position: Option<LatLon>,
    pub mode: ClientMode,
    pub params: ModeParams,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Idle,
    /// First check-in after a jump; the route is untouched.
    ArrivalConfirmed,
    Jumped,
    RouteBuilt { stops: usize },
    Walking,
    Teleported,
    /// Teleport gate not yet open.
    Holding,
    Spiral,
    /// Another client of the same scope is building its route.
    Yielded,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub next: LatLon,
    #[serde(flatten)]
    pub step: Step,
}

impl Assignment {
    fn new(next: LatLon, step: Step) -> Self {
        Self { next, step }
    }
}

enum Built {
    Route(usize),
    Empty,
    Yielded,
}

pub struct Scheduler<S> {
    source: S,
    clients: ClientStore,
    claims: ClaimBook,
    geofences: GeofenceSet,
    start: LatLon,
    rng: Mutex<SeededRng>,
}

impl<S: TargetSource> Scheduler<S> {
    pub fn new(source: S, geofences: GeofenceSet, start: LatLon, seed: u32) -> Self {
        Self {
            source,
            clients: ClientStore::new(),
            claims: ClaimBook::new(),
            geofences,
            start: start.rounded(),
            rng: Mutex::new(SeededRng::new(seed)),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn clients(&self) -> &ClientStore {
        &self.clients
    }

    pub fn claims(&self) -> &ClaimBook {
        &self.claims
    }

    pub fn geofences(&self) -> &GeofenceSet {
        &self.geofences
    }

    pub fn start(&self) -> LatLon {
        self.start
    }

    fn client_handle(
        &self,
        id: &str,
        position: LatLon,
        now: i64,
    ) -> Result<ClientHandle, SourceError> {
        if let Some(handle) = self.clients.get(id) {
            return Ok(handle);
        }
        let restored = self.source.load_client(id)?;
        Ok(self.clients.get_or_insert_with(id, || {
            restored.unwrap_or_else(|| ClientState::new(id, position, now))
        }))
    }

    /// Explicit relocation: drops the route and any claims.
    pub fn jump(&self, client_id: &str, to: LatLon, now: i64) -> Result<LatLon, SourceError> {
        let to = to.rounded();
        let handle = self.client_handle(client_id, to, now)?;
        let mut client = lock_unpoisoned(&handle);
        self.apply_jump(&mut client, to, now);
        Ok(to)
    }

    fn apply_jump(&self, client: &mut ClientState, to: LatLon, now: i64) {
        client.clear_route();
        self.release_claims(client);
        client.position = to;
        client.spiral.recenter(to);
        client.mode = ClientMode::Jump;
        client.last_updated = now;
    }

    pub fn check_in(&self, request: &CheckIn, now: i64) -> Result<Assignment, SourceError> {
        let reported = request
            .position
            .filter(|position| !position.is_unset())
            .map(LatLon::rounded);
        let handle = self.client_handle(&request.client_id, reported.unwrap_or(self.start), now)?;
        let mut client = lock_unpoisoned(&handle);
        let params = &request.params;

        if request.mode == ClientMode::Jump {
            let to = reported.unwrap_or(client.position);
            self.apply_jump(&mut client, to, now);
            return Ok(Assignment::new(to, Step::Jumped));
        }
        if client.mode == ClientMode::Jump {
            client.mode = request.mode;
            client.last_updated = now;
            return Ok(Assignment::new(client.position, Step::ArrivalConfirmed));
        }

        let previous = client.mode;
        if !client.is_active(now) {
            client.mode = ClientMode::Idle;
        }
        let idle_for = now - client.last_updated;
        let stale = (client.mode == ClientMode::Idle && idle_for > params.schedule_timeout_secs)
            || (previous != ClientMode::Idle && previous != request.mode);
        if stale {
            client.clear_route();
            self.release_claims(&client);
        }

        let scope = params
            .no_overlap
            .then(|| params.scope.clone().unwrap_or_else(|| request.mode.as_str().to_string()));
        if client.claim_scope != scope {
            self.release_claims(&client);
            client.claim_scope = scope;
        }
        client.no_overlap = params.no_overlap;
        client.mode = request.mode;

        let assignment = match request.mode {
            ClientMode::Idle | ClientMode::Jump => Assignment::new(client.position, Step::Idle),
            ClientMode::SpiralScan => self.spiral_step(&mut client, reported, params),
            mode if mode.is_walk() => self.walk(&mut client, reported, params, now)?,
            _ => self.teleport(&mut client, reported, params, now)?,
        };
        client.last_updated = now;
        self.touch_claims(&client, now);
        Ok(assignment)
    }

    fn spiral_step(
        &self,
        client: &mut ClientState,
        reported: Option<LatLon>,
        params: &ModeParams,
    ) -> Assignment {
        client.position = client.spiral.advance(reported, &params.spiral());
        Assignment::new(client.position, Step::Spiral)
    }

    fn walk(
        &self,
        client: &mut ClientState,
        reported: Option<LatLon>,
        params: &ModeParams,
        now: i64,
    ) -> Result<Assignment, SourceError> {
        drop_renamed_route(client, params);
        let here = reported.unwrap_or(client.position);
        if client
            .route
            .front()
            .is_some_and(|head| distance_m(here, head.location) <= params.arrived_range_m)
        {
            client.route.pop_front();
            self.publish_claims(client, now);
        }

        let mut step = Step::Walking;
        let from = if client.route.is_empty() {
            match self.build_route(client, here, params, now)? {
                Built::Route(stops) => step = Step::RouteBuilt { stops },
                Built::Empty => return Ok(self.spiral_step(client, reported, params)),
                Built::Yielded => return Ok(Assignment::new(client.position, Step::Yielded)),
            }
            here
        } else {
            client.position
        };

        let Some(head) = client.route.front().map(|stop| stop.location) else {
            return Ok(self.spiral_step(client, reported, params));
        };
        client.position = walk_step(from, head, params.speed_kmh);
        Ok(Assignment::new(client.position, step))
    }

    fn teleport(
        &self,
        client: &mut ClientState,
        reported: Option<LatLon>,
        params: &ModeParams,
        now: i64,
    ) -> Result<Assignment, SourceError> {
        drop_renamed_route(client, params);
        if !client.route.is_empty() {
            let since = client.last_teleport.unwrap_or(client.last_updated);
            if !params.gate.should_advance(&client.feedback, since, now) {
                return Ok(Assignment::new(client.position, Step::Holding));
            }
            client.route.pop_front();
            client.last_teleport = Some(now);
            self.publish_claims(client, now);
        }

        let mut step = Step::Teleported;
        if client.route.is_empty() {
            let here = reported.unwrap_or(client.position);
            match self.build_route(client, here, params, now)? {
                Built::Route(stops) => step = Step::RouteBuilt { stops },
                Built::Empty => return Ok(self.spiral_step(client, reported, params)),
                Built::Yielded => return Ok(Assignment::new(client.position, Step::Yielded)),
            }
            client.last_teleport = Some(now);
        }

        let Some(head) = client.route.front().map(|stop| stop.location) else {
            return Ok(self.spiral_step(client, reported, params));
        };
        client.position = self.jitter(head, params.jitter_m);
        Ok(Assignment::new(client.position, step))
    }

    fn jitter(&self, at: LatLon, max_m: f64) -> LatLon {
        if max_m <= 0.0 {
            return at.rounded();
        }
        jitter_location(at, max_m, &mut lock_unpoisoned(&self.rng))
    }

    fn release_claims(&self, client: &ClientState) {
        if let Some(scope) = client.claim_scope.as_deref() {
            self.claims.release(scope, &client.id);
        }
    }

    /// Keeps a held route's claims fresh. Skipped while another client of
    /// the scope is building.
    fn touch_claims(&self, client: &ClientState, now: i64) {
        let Some(scope) = client.claim_scope.as_deref() else {
            return;
        };
        if client.route.is_empty() {
            return;
        }
        let scope = self.claims.scope(scope);
        let mut claims = match scope.try_lock() {
            Ok(claims) => claims,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        claims.touch(&client.id, now);
    }

    /// Re-publishes the client's remaining route as its claims.
    fn publish_claims(&self, client: &ClientState, now: i64) {
        if let Some(scope) = client.claim_scope.as_deref() {
            let slot = self.claims.scope(scope);
            lock_unpoisoned(&slot).set(&client.id, client.claimed_ids(), now);
            drop(slot);
            self.claims.prune(scope);
        }
    }

    fn build_route(
        &self,
        client: &mut ClientState,
        origin: LatLon,
        params: &ModeParams,
        now: i64,
    ) -> Result<Built, SourceError> {
        if client.mode.uses_route_file() {
            return self.load_route_file(client, params);
        }
        let Some(kind) = TargetKind::for_mode(client.mode) else {
            return Ok(Built::Empty);
        };

        let scope = client.claim_scope.as_deref().map(|name| self.claims.scope(name));
        let mut claims = match scope.as_deref().map(Mutex::try_lock) {
            None => None,
            Some(Ok(guard)) => Some(guard),
            Some(Err(TryLockError::Poisoned(poisoned))) => Some(poisoned.into_inner()),
            Some(Err(TryLockError::WouldBlock)) => return Ok(Built::Yielded),
        };
        let claimed = claims
            .as_ref()
            .map(|claims| claims.held_by_others(&client.id, now))
            .unwrap_or_default();

        let teleport = client.mode.is_teleport();
        let chase = params.chase.enabled();
        let mut route = self.pull_route(kind, origin, &claimed, params, chase, teleport, now)?;
        if route.is_empty() && chase {
            route = self.pull_route(kind, origin, &claimed, params, false, teleport, now)?;
        }

        let stops = route.len();
        client.route = route.into();
        if let Some(claims) = claims.as_mut() {
            claims.set(&client.id, client.claimed_ids(), now);
        }
        Ok(if stops == 0 { Built::Empty } else { Built::Route(stops) })
    }

    #[allow(clippy::too_many_arguments)]
    fn pull_route(
        &self,
        kind: TargetKind,
        origin: LatLon,
        claimed: &HashSet<String>,
        params: &ModeParams,
        chase: bool,
        teleport: bool,
        now: i64,
    ) -> Result<Vec<Waypoint>, SourceError> {
        let bbox = params
            .geofence
            .as_deref()
            .and_then(|name| self.geofences.boundary(Some(name)))
            .unwrap_or_else(|| BoundingBox::around(origin, DEFAULT_BBOX_HALF_SPAN_DEG));
        let query = CandidateQuery {
            kind,
            bbox,
            geofence: params.geofence.clone(),
            chase_only: chase,
            scanned_before: teleport.then_some(now - RECENT_SCAN_GUARD_SECS),
            now,
        };
        let candidates = self.source.candidates(&query)?;
        let filter = CandidateFilter {
            claimed,
            geofences: &self.geofences,
            geofence_name: params.geofence.as_deref(),
            origin,
            max_radius_km: params.max_radius_km,
        };
        let candidates = filter_candidates(candidates, &filter);

        let chase_cap = if chase { params.chase.cap() } else { None };
        let max_points = match (params.max_points, chase_cap) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let options = RouteOptions {
            max_points,
            min_separation_m: if teleport { params.teleport_ignore_m } else { 0.0 },
            oldest_first: teleport && params.oldest_first,
        };
        Ok(nearest_neighbor_route(origin, candidates, &options))
    }

    fn load_route_file(
        &self,
        client: &mut ClientState,
        params: &ModeParams,
    ) -> Result<Built, SourceError> {
        let name = route_name(client, params);
        let points = self.source.route_file(&name)?.unwrap_or_default();
        client.route = points.into_iter().map(Waypoint::at).collect();
        client.route_name = Some(name);
        Ok(if client.route.is_empty() {
            Built::Empty
        } else {
            Built::Route(client.route.len())
        })
    }
}

fn route_name(client: &ClientState, params: &ModeParams) -> String {
    params.route.clone().unwrap_or_else(|| client.id.clone())
}

/// Switching to a different route file discards the queued one.
fn drop_renamed_route(client: &mut ClientState, params: &ModeParams) {
    if !client.mode.uses_route_file() {
        return;
    }
    let name = route_name(client, params);
    if client.route_name.as_deref() != Some(name.as_str()) {
        client.route.clear();
    }
}

/// One second of travel at `speed_kmh` from `from` toward `to`, or `to`
/// itself when it is less than a second away. Each moving axis advances by
/// at least one coordinate quantum so slow walkers still make progress.
pub fn walk_step(from: LatLon, to: LatLon, speed_kmh: f64) -> LatLon {
    let secs = distance_m(from, to) / speed_kmh * 3.6;
    if !secs.is_finite() || secs <= 1.0 {
        return to.rounded();
    }
    let toward = |a: f64, b: f64| {
        let gap = (b - a).abs();
        let delta = (gap / secs).max(COORDINATE_QUANTUM_DEG).min(gap);
        if a < b {
            a + delta
        } else {
            a - delta
        }
    };
    LatLon::new(toward(from.lat, to.lat), toward(from.lon, to.lon)).rounded()
}
