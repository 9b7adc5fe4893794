//! Tuning constants shared by the inference engine and the scheduler.

// Clock
pub const HOUR_SECS: i64 = 3600;
pub const QUARTER_SECS: i64 = 900;

// Cell bands
pub const BAND_COUNT: usize = 5;
pub const BAND_SPACING_SECS: i64 = 720; // 3600 / 5
pub const BAND_BASE_RADIUS_SECS: i64 = 120;
pub const BAND_FRAME_SHIFT_SECS: i64 = 1080; // 1.5 * spacing, folds offsets into ±360
pub const BAND_HALF_SPACING_SECS: i64 = 360;
pub const BAND_WINDOW_LEAD_SECS: i64 = 10;

// Occupancy inference
/// Distance from the visible boundary to the guessed hidden boundary while no
/// exact time-to-hidden report exists. Spawn cycles in this domain are built
/// from 15 minute quarters, so one quarter is the tightest safe guess.
pub const DEFAULT_HIDDEN_GUESS_SECS: i64 = 900;
pub const MISSED_COUNT_LIMIT: u32 = 5;
pub const DOUBLE_WINDOW_MIN_GAPS: usize = 5;
pub const EXACT_TTH_MAX_MS: i64 = 3_600_000;
pub const SEARCH_WINDOW_MIN_SECS: i64 = 89;
pub const SEARCH_WINDOW_LEAD_SECS: i64 = 45;
pub const UNCONFIRMED_SLACK_SECS: i64 = 60;
pub const RESTART_WINDOW_SECS: i64 = 60;
pub const RESTART_WIDEN_BACK_SECS: i64 = 60;
pub const RESTART_WIDEN_FORWARD_SECS: i64 = 840; // 14 min

// Geography
pub const EARTH_RADIUS_KM: f64 = 6371.0088;
pub const CELL_SIZE_DEG: f64 = 0.0007; // ~70 m tiles at mid latitudes
pub const DEFAULT_BBOX_HALF_SPAN_DEG: f64 = 0.1;

// Scheduling
pub const ACTIVE_CLIENT_WINDOW_SECS: i64 = 300;
pub const RECENT_SCAN_GUARD_SECS: i64 = 60;
pub const DEFAULT_SCHEDULE_TIMEOUT_SECS: i64 = 20 * 60;
pub const DEFAULT_MAX_RADIUS_KM: f64 = 0.0; // unlimited
pub const DEFAULT_STEP_SIZE_DEG: f64 = 0.0009;
pub const DEFAULT_TELEPORT_FACTOR: f64 = 10.0;
pub const DEFAULT_SPEED_KMH: f64 = 30.0;
pub const DEFAULT_ARRIVED_RANGE_M: f64 = 20.0;
pub const DEFAULT_TELEPORT_IGNORE_M: f64 = 0.0;
pub const DEFAULT_TELEPORT_WAIT_TIMEOUT_SECS: i64 = 60;
