//! Per-client state and the per-scope claim pools.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};

use serde::{Deserialize, Serialize};

use crate::constants::ACTIVE_CLIENT_WINDOW_SECS;
use crate::error::ModeParseError;
use crate::geo::LatLon;
use crate::route::Waypoint;
use crate::spiral::SpiralState;
use crate::sync::lock_unpoisoned;
use crate::teleport::{FeedbackKind, FeedbackLog};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ClientMode {
    #[default]
    Idle,
    Jump,
    SpiralScan,
    WalkToSpawn,
    WalkToPoi,
    WalkRouteFile,
    /// Area-control structures, one teleport at a time.
    TeleportToPoi,
    TeleportRouteFile,
}

impl ClientMode {
    pub const ALL: [Self; 8] = [
        Self::Idle,
        Self::Jump,
        Self::SpiralScan,
        Self::WalkToSpawn,
        Self::WalkToPoi,
        Self::WalkRouteFile,
        Self::TeleportToPoi,
        Self::TeleportRouteFile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Jump => "jump",
            Self::SpiralScan => "scan_loc",
            Self::WalkToSpawn => "walk_spawnpoint",
            Self::WalkToPoi => "walk_pokestop",
            Self::WalkRouteFile => "walk_gpx",
            Self::TeleportToPoi => "teleport_gym",
            Self::TeleportRouteFile => "teleport_gpx",
        }
    }

    pub fn is_walk(&self) -> bool {
        matches!(self, Self::WalkToSpawn | Self::WalkToPoi | Self::WalkRouteFile)
    }

    pub fn is_teleport(&self) -> bool {
        matches!(self, Self::TeleportToPoi | Self::TeleportRouteFile)
    }

    pub fn uses_route_file(&self) -> bool {
        matches!(self, Self::WalkRouteFile | Self::TeleportRouteFile)
    }
}

impl fmt::Display for ClientMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientMode {
    type Err = ModeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "jump" | "jump_now" => Ok(Self::Jump),
            "scan_loc" | "spiral" => Ok(Self::SpiralScan),
            "walk_spawnpoint" | "walk_spawn" => Ok(Self::WalkToSpawn),
            "walk_pokestop" | "walk_poi" => Ok(Self::WalkToPoi),
            "walk_gpx" | "walk_route" => Ok(Self::WalkRouteFile),
            "teleport_gym" | "teleport_poi" => Ok(Self::TeleportToPoi),
            "teleport_gpx" | "teleport_route" => Ok(Self::TeleportRouteFile),
            _ => Err(ModeParseError::UnknownMode {
                value: value.to_string(),
            }),
        }
    }
}

impl From<ClientMode> for String {
    fn from(mode: ClientMode) -> Self {
        mode.as_str().to_string()
    }
}

impl TryFrom<String> for ClientMode {
    type Error = ModeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    pub id: String,
    pub position: LatLon,
    pub spiral: SpiralState,
    pub mode: ClientMode,
    pub route: VecDeque<Waypoint>,
    pub route_name: Option<String>,
    pub last_updated: i64,
    pub last_teleport: Option<i64>,
    pub no_overlap: bool,
    pub claim_scope: Option<String>,
    #[serde(default)]
    pub feedback: FeedbackLog,
}

impl ClientState {
    pub fn new(id: impl Into<String>, position: LatLon, now: i64) -> Self {
        let position = position.rounded();
        Self {
            id: id.into(),
            position,
            spiral: SpiralState::new(position),
            mode: ClientMode::Idle,
            route: VecDeque::new(),
            route_name: None,
            last_updated: now,
            last_teleport: None,
            no_overlap: false,
            claim_scope: None,
            feedback: FeedbackLog::default(),
        }
    }

    pub fn is_active(&self, now: i64) -> bool {
        now - self.last_updated <= ACTIVE_CLIENT_WINDOW_SECS
    }

    /// Mode as other clients and status pages should see it.
    pub fn effective_mode(&self, now: i64) -> ClientMode {
        if self.is_active(now) {
            self.mode
        } else {
            ClientMode::Idle
        }
    }

    pub fn claimed_ids(&self) -> HashSet<String> {
        self.route.iter().filter_map(|stop| stop.id.clone()).collect()
    }

    pub fn clear_route(&mut self) {
        self.route.clear();
        self.route_name = None;
    }
}

/// Shared handle to one client's record. Lock it before any claim scope.
pub type ClientHandle = Arc<Mutex<ClientState>>;

#[derive(Debug, Default)]
pub struct ClientStore {
    clients: RwLock<HashMap<String, ClientHandle>>,
}

impl ClientStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<ClientHandle> {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        clients.get(id).cloned()
    }

    /// Returns the existing handle or registers the one built by `create`.
    pub fn get_or_insert_with(
        &self,
        id: &str,
        create: impl FnOnce() -> ClientState,
    ) -> ClientHandle {
        if let Some(handle) = self.get(id) {
            return handle;
        }
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            clients
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(create()))),
        )
    }

    pub fn snapshot(&self, id: &str) -> Option<ClientState> {
        self.get(id).map(|handle| lock_unpoisoned(&handle).clone())
    }

    /// Every client, ordered by id.
    pub fn snapshots(&self) -> Vec<ClientState> {
        let handles: Vec<ClientHandle> = {
            let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
            clients.values().cloned().collect()
        };
        let mut states: Vec<ClientState> = handles
            .iter()
            .map(|handle| lock_unpoisoned(handle).clone())
            .collect();
        states.sort_by(|a, b| a.id.cmp(&b.id));
        states
    }

    /// Feeds teleport wait-conditions. Unknown clients are ignored.
    pub fn record_feedback(&self, id: &str, kinds: &[FeedbackKind], at: i64) -> bool {
        let Some(handle) = self.get(id) else {
            return false;
        };
        let mut state = lock_unpoisoned(&handle);
        for kind in kinds {
            state.feedback.record(*kind, at);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Claimed target ids of every client sharing one exclusivity scope.
#[derive(Debug, Default)]
pub struct ScopeClaims {
    entries: HashMap<String, (i64, HashSet<String>)>,
}

impl ScopeClaims {
    /// Ids held by other clients that checked in within the active window.
    pub fn held_by_others(&self, client_id: &str, now: i64) -> HashSet<String> {
        self.entries
            .iter()
            .filter(|(owner, (updated, _))| {
                owner.as_str() != client_id && now - *updated <= ACTIVE_CLIENT_WINDOW_SECS
            })
            .flat_map(|(_, (_, ids))| ids.iter().cloned())
            .collect()
    }

    pub fn set(&mut self, client_id: &str, ids: HashSet<String>, now: i64) {
        if ids.is_empty() {
            self.entries.remove(client_id);
        } else {
            self.entries.insert(client_id.to_string(), (now, ids));
        }
    }

    /// Refreshes the timestamp of an existing claim.
    pub fn touch(&mut self, client_id: &str, now: i64) {
        if let Some((updated, _)) = self.entries.get_mut(client_id) {
            *updated = now;
        }
    }

    pub fn release(&mut self, client_id: &str) {
        self.entries.remove(client_id);
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|(_, ids)| ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ClaimBook {
    scopes: Mutex<HashMap<String, Arc<Mutex<ScopeClaims>>>>,
}

impl ClaimBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self, name: &str) -> Arc<Mutex<ScopeClaims>> {
        let mut scopes = lock_unpoisoned(&self.scopes);
        Arc::clone(scopes.entry(name.to_string()).or_default())
    }

    /// Drops `client_id`'s claims in `scope`, and the scope itself once
    /// nobody holds claims in it.
    pub fn release(&self, scope: &str, client_id: &str) {
        let slot = self.scope(scope);
        lock_unpoisoned(&slot).release(client_id);
        drop(slot);
        self.prune(scope);
    }

    /// Removes `scope` when it is empty and no caller holds a handle to it.
    /// Never blocks on the scope lock.
    pub fn prune(&self, scope: &str) {
        let mut scopes = lock_unpoisoned(&self.scopes);
        let Some(slot) = scopes.get(scope) else {
            return;
        };
        if Arc::strong_count(slot) > 1 {
            return;
        }
        let empty = match slot.try_lock() {
            Ok(claims) => claims.is_empty(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_empty(),
            Err(TryLockError::WouldBlock) => false,
        };
        if empty {
            scopes.remove(scope);
        }
    }

    /// Claimed id count per scope, for status output.
    pub fn counts(&self) -> Vec<(String, usize)> {
        let scopes: Vec<_> = lock_unpoisoned(&self.scopes)
            .iter()
            .map(|(name, scope)| (name.clone(), Arc::clone(scope)))
            .collect();
        let mut counts: Vec<_> = scopes
            .into_iter()
            .map(|(name, scope)| (name, lock_unpoisoned(&scope).len()))
            .collect();
        counts.sort();
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_parse_wire_names_and_aliases() {
        for mode in ClientMode::ALL {
            assert_eq!(mode.as_str().parse::<ClientMode>(), Ok(mode));
        }
        assert_eq!("spiral".parse(), Ok(ClientMode::SpiralScan));
        assert_eq!("Teleport_Route".parse(), Ok(ClientMode::TeleportRouteFile));
        assert!("fly".parse::<ClientMode>().is_err());
        assert_eq!(
            serde_json::to_string(&ClientMode::WalkToPoi).unwrap(),
            "\"walk_pokestop\""
        );
    }

    #[test]
    fn inactive_clients_read_as_idle() {
        let mut state = ClientState::new("c1", LatLon::new(1.0, 2.0), 1000);
        state.mode = ClientMode::WalkToSpawn;
        assert_eq!(state.effective_mode(1300), ClientMode::WalkToSpawn);
        assert_eq!(state.effective_mode(1301), ClientMode::Idle);
    }

    #[test]
    fn store_creates_once_and_snapshots_sorted() {
        let store = ClientStore::new();
        let a = store.get_or_insert_with("b", || ClientState::new("b", LatLon::new(0.0, 0.0), 0));
        let b = store.get_or_insert_with("b", || panic!("already registered"));
        assert!(Arc::ptr_eq(&a, &b));
        store.get_or_insert_with("a", || ClientState::new("a", LatLon::new(0.0, 0.0), 0));
        let ids: Vec<_> = store.snapshots().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn feedback_reaches_known_clients_only() {
        let store = ClientStore::new();
        store.get_or_insert_with("c1", || ClientState::new("c1", LatLon::new(0.0, 0.0), 0));
        assert!(store.record_feedback("c1", &[FeedbackKind::AreaControl], 50));
        assert!(!store.record_feedback("ghost", &[FeedbackKind::AreaControl], 50));
        let state = store.snapshot("c1").unwrap();
        assert_eq!(state.feedback.last_seen(FeedbackKind::Structures), Some(50));
    }

    #[test]
    fn stale_claims_stop_binding() {
        let mut claims = ScopeClaims::default();
        claims.set("a", ["sp1".to_string()].into(), 1000);
        claims.set("b", ["sp2".to_string()].into(), 1000);
        assert_eq!(claims.held_by_others("b", 1100), ["sp1".to_string()].into());
        assert!(claims.held_by_others("b", 1301).is_empty());
        claims.touch("a", 1300);
        assert_eq!(claims.held_by_others("b", 1400).len(), 1);
    }

    #[test]
    fn claim_counts_are_reported_per_scope() {
        let book = ClaimBook::new();
        lock_unpoisoned(&book.scope("walk_spawnpoint")).set("a", ["x".to_string()].into(), 0);
        lock_unpoisoned(&book.scope("team")).set("a", ["y".to_string(), "z".to_string()].into(), 0);
        book.release("walk_spawnpoint", "a");
        assert_eq!(book.counts(), vec![("team".to_string(), 2)]);
    }

    #[test]
    fn released_scopes_are_forgotten_once_unused() {
        let book = ClaimBook::new();
        for n in 0..50 {
            let scope = format!("scope-{n}");
            lock_unpoisoned(&book.scope(&scope)).set("a", ["x".to_string()].into(), 0);
            book.release(&scope, "a");
        }
        assert!(book.counts().is_empty());

        lock_unpoisoned(&book.scope("team")).set("a", ["x".to_string()].into(), 0);
        lock_unpoisoned(&book.scope("team")).set("b", ["y".to_string()].into(), 0);
        book.release("team", "a");
        assert_eq!(book.counts(), vec![("team".to_string(), 1)]);

        let held = book.scope("team");
        lock_unpoisoned(&held).release("b");
        book.prune("team");
        assert_eq!(book.counts(), vec![("team".to_string(), 0)]);
        drop(held);
        book.prune("team");
        assert!(book.counts().is_empty());
    }
}
