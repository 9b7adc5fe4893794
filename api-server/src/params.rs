//! Check-in parameters arrive as JSON values or query-string text. They are
//! coerced here, once, into typed core requests; a value that cannot be read
//! falls back to the configured default.

use std::collections::HashMap;

use scout_core::teleport::parse_feedback_list;
use scout_core::{ChaseLimit, CheckIn, ClientMode, LatLon, ModeParams};
use serde_json::{Map, Value};

pub(crate) type RawParams = Map<String, Value>;

/// Query-string pairs become string values so both transports share one
/// coercion path.
pub(crate) fn from_query(query: HashMap<String, String>) -> RawParams {
    query
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ParamError {
    MissingClientId,
    InvalidMode(String),
}

impl ParamError {
    pub(crate) fn code(&self) -> &'static str {
        match self {
            Self::MissingClientId => "missing_client_id",
            Self::InvalidMode(_) => "invalid_mode",
        }
    }
}

impl std::fmt::Display for ParamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingClientId => f.write_str("uuid (client id) is required"),
            Self::InvalidMode(detail) => f.write_str(detail),
        }
    }
}

pub(crate) fn client_id(raw: &RawParams) -> Result<String, ParamError> {
    ["uuid", "client_id"]
        .iter()
        .find_map(|key| lenient_string(raw.get(*key)))
        .ok_or(ParamError::MissingClientId)
}

/// `None` when either coordinate is missing or unreadable.
pub(crate) fn position(raw: &RawParams) -> Option<LatLon> {
    let lat = lenient_f64(raw.get("latitude").or_else(|| raw.get("lat")))?;
    let lon = lenient_f64(raw.get("longitude").or_else(|| raw.get("lon")))?;
    Some(LatLon::new(lat, lon))
}

pub(crate) fn mode(raw: &RawParams, path_mode: Option<&str>) -> Result<ClientMode, ParamError> {
    let text = path_mode
        .map(str::to_string)
        .or_else(|| lenient_string(raw.get("mode")))
        .ok_or_else(|| ParamError::InvalidMode("mode is required".to_string()))?;
    text.parse()
        .map_err(|e: scout_core::ModeParseError| ParamError::InvalidMode(e.to_string()))
}

pub(crate) fn check_in(
    raw: &RawParams,
    path_mode: Option<&str>,
    defaults: &ModeParams,
) -> Result<CheckIn, ParamError> {
    let client_id = client_id(raw)?;
    let mode = mode(raw, path_mode)?;
    Ok(CheckIn {
        client_id,
        position: position(raw),
        mode,
        params: mode_params(raw, mode, defaults),
    })
}

pub(crate) fn mode_params(raw: &RawParams, mode: ClientMode, defaults: &ModeParams) -> ModeParams {
    let mut params = defaults.clone();

    if let Some(minutes) = lenient_f64(raw.get("scheduletimeout")).filter(|m| *m >= 0.0) {
        params.schedule_timeout_secs = (minutes * 60.0).round() as i64;
    }
    set_non_negative(&mut params.max_radius_km, raw.get("maxradius"));
    set_positive(&mut params.step_size_deg, raw.get("stepsize"));
    set_positive(&mut params.speed_kmh, raw.get("speed"));
    set_non_negative(&mut params.arrived_range_m, raw.get("arrived_range"));
    set_non_negative(&mut params.teleport_factor, raw.get("teleport_factor"));
    set_non_negative(&mut params.teleport_ignore_m, raw.get("teleport_ignore"));
    set_non_negative(&mut params.jitter_m, raw.get("jitter"));

    if let Some(max) = lenient_i64(raw.get("maxpoints")) {
        params.max_points = usize::try_from(max).ok().filter(|max| *max > 0);
    }
    if let Some(flag) = lenient_bool(raw.get("no_overlap")) {
        params.no_overlap = flag;
    }
    if let Some(flag) = lenient_bool(raw.get("oldest_first")) {
        params.oldest_first = flag;
    }
    if let Some(name) = lenient_string(raw.get("geofence")) {
        params.geofence = Some(name);
    }
    if let Some(scope) = lenient_string(raw.get("scope")) {
        params.scope = Some(scope);
    }
    if let Some(route) = lenient_string(raw.get("route")) {
        params.route = Some(route);
    }

    let chase_keys: &[&str] = match mode {
        ClientMode::WalkToSpawn => &["unknown_tth", "chase"],
        ClientMode::WalkToPoi => &["questless", "chase"],
        ClientMode::TeleportToPoi => &["raidless", "contestless", "chase"],
        _ => &["chase"],
    };
    if let Some(chase) = chase_keys.iter().find_map(|key| chase_limit(raw.get(*key))) {
        params.chase = chase;
    }

    if let Some(secs) = lenient_i64(raw.get("teleport_interval")) {
        params.gate.min_interval_secs = (secs > 0).then_some(secs);
    }
    if let Some(secs) = lenient_i64(raw.get("teleport_timeout")).filter(|secs| *secs > 0) {
        params.gate.timeout_secs = secs;
    }
    if let Some(text) = lenient_string(raw.get("wait_for")) {
        match parse_feedback_list(&text) {
            Ok(wait_for) => params.gate.wait_for = wait_for,
            Err(e) => tracing::debug!("ignoring wait_for: {e}"),
        }
    }

    params
}

fn set_non_negative(slot: &mut f64, value: Option<&Value>) {
    if let Some(parsed) = lenient_f64(value).filter(|v| *v >= 0.0) {
        *slot = parsed;
    }
}

fn set_positive(slot: &mut f64, value: Option<&Value>) {
    if let Some(parsed) = lenient_f64(value).filter(|v| *v > 0.0) {
        *slot = parsed;
    }
}

pub(crate) fn lenient_string(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

pub(crate) fn lenient_f64(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

pub(crate) fn lenient_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|v| v.is_finite()).map(|v| v as i64)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(|v| v as i64)
            })
        }
        _ => None,
    }
}

pub(crate) fn lenient_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_f64().map(|v| v != 0.0),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// `true` chases every match, a positive integer chases up to that many,
/// `false` or `0` disables the filter.
pub(crate) fn chase_limit(value: Option<&Value>) -> Option<ChaseLimit> {
    let value = value?;
    if let Some(count) = lenient_i64(Some(value)).filter(|_| !matches!(value, Value::Bool(_))) {
        return Some(match usize::try_from(count) {
            Ok(0) | Err(_) => ChaseLimit::Off,
            Ok(count) => ChaseLimit::UpTo(count),
        });
    }
    lenient_bool(Some(value)).map(|flag| if flag { ChaseLimit::All } else { ChaseLimit::Off })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use scout_core::FeedbackKind;
    use serde_json::json;

    fn raw(value: Value) -> RawParams {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[test]
    fn numbers_strings_and_booleans_are_all_accepted() {
        let defaults = ModeParams::default();
        let params = mode_params(
            &raw(json!({
                "scheduletimeout": "5",
                "maxradius": 2.5,
                "stepsize": "0.0007",
                "maxpoints": "12",
                "no_overlap": "true",
                "oldest_first": 1,
                "speed": 40,
                "geofence": "north, south",
                "wait_for": "gyms,wild_pokemon",
                "teleport_interval": "30",
            })),
            ClientMode::TeleportToPoi,
            &defaults,
        );

        assert_eq!(params.schedule_timeout_secs, 300);
        assert_eq!(params.max_radius_km, 2.5);
        assert_eq!(params.step_size_deg, 0.0007);
        assert_eq!(params.max_points, Some(12));
        assert!(params.no_overlap);
        assert!(params.oldest_first);
        assert_eq!(params.speed_kmh, 40.0);
        assert_eq!(params.geofence.as_deref(), Some("north, south"));
        assert_eq!(
            params.gate.wait_for,
            BTreeSet::from([FeedbackKind::AreaControl, FeedbackKind::WildSpawns])
        );
        assert_eq!(params.gate.min_interval_secs, Some(30));
    }

    #[test]
    fn unreadable_values_keep_the_defaults() {
        let defaults = ModeParams {
            speed_kmh: 12.0,
            ..ModeParams::default()
        };
        let params = mode_params(
            &raw(json!({
                "speed": "fast",
                "stepsize": -1,
                "maxradius": [1],
                "no_overlap": "maybe",
                "wait_for": "telepathy",
                "scheduletimeout": null,
            })),
            ClientMode::WalkToSpawn,
            &defaults,
        );
        assert_eq!(params, defaults);
    }

    #[test]
    fn chase_filter_accepts_booleans_and_counts() {
        assert_eq!(chase_limit(Some(&json!(true))), Some(ChaseLimit::All));
        assert_eq!(chase_limit(Some(&json!("false"))), Some(ChaseLimit::Off));
        assert_eq!(chase_limit(Some(&json!(3))), Some(ChaseLimit::UpTo(3)));
        assert_eq!(chase_limit(Some(&json!("2"))), Some(ChaseLimit::UpTo(2)));
        assert_eq!(chase_limit(Some(&json!(0))), Some(ChaseLimit::Off));
        assert_eq!(chase_limit(Some(&json!("lots"))), None);
    }

    #[test]
    fn chase_key_depends_on_the_mode() {
        let body = raw(json!({ "questless": 4, "unknown_tth": true }));
        let defaults = ModeParams::default();
        assert_eq!(
            mode_params(&body, ClientMode::WalkToPoi, &defaults).chase,
            ChaseLimit::UpTo(4)
        );
        assert_eq!(
            mode_params(&body, ClientMode::WalkToSpawn, &defaults).chase,
            ChaseLimit::All
        );
        assert_eq!(
            mode_params(&body, ClientMode::SpiralScan, &defaults).chase,
            ChaseLimit::Off
        );
    }

    #[test]
    fn check_in_reads_identity_position_and_mode() {
        let query = from_query(HashMap::from([
            ("uuid".to_string(), "dev-1".to_string()),
            ("latitude".to_string(), "51.5".to_string()),
            ("longitude".to_string(), "-0.12".to_string()),
        ]));
        let request = check_in(&query, Some("walk_spawn"), &ModeParams::default()).unwrap();
        assert_eq!(request.client_id, "dev-1");
        assert_eq!(request.position, Some(LatLon::new(51.5, -0.12)));
        assert_eq!(request.mode, ClientMode::WalkToSpawn);

        assert_eq!(
            check_in(&RawParams::new(), Some("scan_loc"), &ModeParams::default()),
            Err(ParamError::MissingClientId)
        );
        let err = check_in(&query, Some("fly"), &ModeParams::default()).unwrap_err();
        assert_eq!(err.code(), "invalid_mode");
    }

    #[test]
    fn numeric_client_ids_are_accepted() {
        assert_eq!(client_id(&raw(json!({ "uuid": 42 }))).unwrap(), "42");
        assert_eq!(
            client_id(&raw(json!({ "uuid": "  " }))),
            Err(ParamError::MissingClientId)
        );
    }
}
