use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use scout_core::constants::{
    DEFAULT_ARRIVED_RANGE_M, DEFAULT_MAX_RADIUS_KM, DEFAULT_SCHEDULE_TIMEOUT_SECS,
    DEFAULT_SPEED_KMH, DEFAULT_STEP_SIZE_DEG, DEFAULT_TELEPORT_FACTOR, DEFAULT_TELEPORT_IGNORE_M,
    DEFAULT_TELEPORT_WAIT_TIMEOUT_SECS,
};
use scout_core::teleport::parse_feedback_list;
use scout_core::{GeofenceSet, Ingestor, LatLon, ModeParams, Scheduler, TeleportGate};

use crate::events::EventLog;
use crate::store::ScoutStore;

pub(crate) const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub(crate) const DEFAULT_DATA_DIR: &str = "./data";
pub(crate) const DEFAULT_SPAWN_DELAY_SECS: u64 = 0;
pub(crate) const DEFAULT_RETENTION_HOURS: u64 = 24 * 7;
pub(crate) const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 15 * 60;
pub(crate) const DEFAULT_EVENT_BUFFER: usize = 1_000;
pub(crate) const DEFAULT_JSON_LIMIT_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub(crate) struct ServerConfig {
    pub(crate) bind_addr: String,
    pub(crate) data_dir: PathBuf,
    pub(crate) routes_dir: Option<PathBuf>,
    pub(crate) api_key: Option<String>,
    pub(crate) start: LatLon,
    pub(crate) geofence_file: Option<PathBuf>,
    pub(crate) geofence_excluded_file: Option<PathBuf>,
    pub(crate) mode_defaults: ModeParams,
    pub(crate) spawn_delay_secs: i64,
    pub(crate) retention_hours: u64,
    pub(crate) sweep_interval_secs: u64,
    pub(crate) event_buffer: usize,
    pub(crate) json_limit: usize,
    pub(crate) persist_clients: bool,
}

impl ServerConfig {
    pub(crate) fn from_env() -> Self {
        let wait_for = read_env_string("SCOUT_TELEPORT_WAIT")
            .map(|text| {
                parse_feedback_list(&text).unwrap_or_else(|err| {
                    tracing::warn!("SCOUT_TELEPORT_WAIT ignored: {err}");
                    Default::default()
                })
            })
            .unwrap_or_default();

        let mode_defaults = ModeParams {
            schedule_timeout_secs: read_env_u64(
                "SCOUT_SCHEDULE_TIMEOUT_MINS",
                DEFAULT_SCHEDULE_TIMEOUT_SECS as u64 / 60,
            ) as i64
                * 60,
            max_radius_km: read_env_f64("SCOUT_MAX_RADIUS_KM", DEFAULT_MAX_RADIUS_KM),
            step_size_deg: read_env_f64("SCOUT_STEP_SIZE_DEG", DEFAULT_STEP_SIZE_DEG),
            teleport_factor: read_env_f64("SCOUT_TELEPORT_FACTOR", DEFAULT_TELEPORT_FACTOR),
            speed_kmh: read_env_f64("SCOUT_SPEED_KMH", DEFAULT_SPEED_KMH),
            arrived_range_m: read_env_f64("SCOUT_ARRIVED_RANGE_M", DEFAULT_ARRIVED_RANGE_M),
            teleport_ignore_m: read_env_f64("SCOUT_TELEPORT_IGNORE_M", DEFAULT_TELEPORT_IGNORE_M),
            jitter_m: read_env_f64("SCOUT_JITTER_M", 0.0),
            gate: TeleportGate {
                wait_for,
                min_interval_secs: read_env_optional_u64("SCOUT_TELEPORT_INTERVAL_SECS")
                    .map(|secs| secs as i64),
                timeout_secs: read_env_u64(
                    "SCOUT_TELEPORT_WAIT_TIMEOUT_SECS",
                    DEFAULT_TELEPORT_WAIT_TIMEOUT_SECS as u64,
                ) as i64,
            },
            ..ModeParams::default()
        };

        let start = match (
            read_env_string("SCOUT_START_LAT"),
            read_env_string("SCOUT_START_LON"),
        ) {
            (Some(lat), Some(lon)) => match (lat.parse::<f64>(), lon.parse::<f64>()) {
                (Ok(lat), Ok(lon)) => LatLon::new(lat, lon),
                _ => {
                    tracing::warn!(lat = %lat, lon = %lon, "unparseable start location, using 0,0");
                    LatLon::new(0.0, 0.0)
                }
            },
            _ => LatLon::new(0.0, 0.0),
        };

        Self {
            bind_addr: read_env_string("API_BIND_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            data_dir: read_env_string("API_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            routes_dir: read_env_string("SCOUT_ROUTES_DIR").map(PathBuf::from),
            api_key: read_env_string("API_KEY"),
            start,
            geofence_file: read_env_string("SCOUT_GEOFENCE_FILE").map(PathBuf::from),
            geofence_excluded_file: read_env_string("SCOUT_GEOFENCE_EXCLUDED_FILE")
                .map(PathBuf::from),
            mode_defaults,
            spawn_delay_secs: read_env_u64_allow_zero(
                "SCOUT_SPAWN_DELAY_SECS",
                DEFAULT_SPAWN_DELAY_SECS,
            ) as i64,
            retention_hours: read_env_u64("SCOUT_RETENTION_HOURS", DEFAULT_RETENTION_HOURS),
            sweep_interval_secs: read_env_u64(
                "SCOUT_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            ),
            event_buffer: read_env_usize("SCOUT_EVENT_BUFFER", DEFAULT_EVENT_BUFFER),
            json_limit: read_env_usize("JSON_LIMIT_BYTES", DEFAULT_JSON_LIMIT_BYTES),
            persist_clients: read_env_bool("SCOUT_PERSIST_CLIENTS", true),
        }
    }

    /// Reads both geofence files. An unset variable means an empty set.
    pub(crate) fn load_geofences(&self) -> Result<GeofenceSet, String> {
        let included = self.geofence_file.as_deref().map(read_text).transpose()?;
        let excluded = self
            .geofence_excluded_file
            .as_deref()
            .map(read_text)
            .transpose()?;
        GeofenceSet::from_texts(included.as_deref(), excluded.as_deref())
            .map_err(|e| format!("invalid geofence file: {e}"))
    }
}

fn read_text(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("failed to read {}: {e}", path.display()))
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) scheduler: Arc<Scheduler<Arc<ScoutStore>>>,
    pub(crate) store: Arc<ScoutStore>,
    pub(crate) ingestor: Arc<Ingestor>,
    pub(crate) events: Arc<EventLog>,
    pub(crate) mode_defaults: Arc<ModeParams>,
    pub(crate) api_key: Option<String>,
    pub(crate) spawn_delay_secs: i64,
    pub(crate) retention_secs: i64,
    pub(crate) persist_clients: bool,
}

impl AppState {
    pub(crate) fn new(
        config: &ServerConfig,
        store: Arc<ScoutStore>,
        geofences: GeofenceSet,
        seed: u32,
    ) -> Self {
        Self {
            scheduler: Arc::new(Scheduler::new(
                Arc::clone(&store),
                geofences,
                config.start,
                seed,
            )),
            store,
            ingestor: Arc::new(Ingestor::new(config.spawn_delay_secs)),
            events: Arc::new(EventLog::new(config.event_buffer)),
            mode_defaults: Arc::new(config.mode_defaults.clone()),
            api_key: config.api_key.clone(),
            spawn_delay_secs: config.spawn_delay_secs,
            retention_secs: config.retention_hours as i64 * 3600,
            persist_clients: config.persist_clients,
        }
    }
}

pub(crate) fn read_env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn read_env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

pub(crate) fn read_env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

pub(crate) fn read_env_optional_u64(name: &str) -> Option<u64> {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}

pub(crate) fn read_env_u64_allow_zero(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Zero is a meaningful value here (e.g. an unlimited radius).
pub(crate) fn read_env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
        .unwrap_or(default)
}

pub(crate) fn read_env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
