use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;
use scout_core::clock::secs_of_hour;
use scout_core::geo::{distance_m, parse_lat_lon};
use scout_core::route::nearest_neighbor_route;
use scout_core::spiral::SpiralParams;
use scout_core::{
    Candidate, GeofenceSet, LatLon, RouteOptions, ScanWindow, Sighting, SpawnKind, SpawnLinks,
    SpawnPoint, SpiralState,
};
use serde::{Deserialize, Serialize};

/// One entity's recorded sightings, as kept by an operator export.
#[derive(Clone, Debug, Deserialize)]
pub struct EntityHistory {
    pub id: String,
    #[serde(default)]
    pub location: Option<LatLon>,
    pub sightings: Vec<HistorySighting>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HistorySighting {
    #[serde(default)]
    pub encounter_id: u64,
    pub scan_time: i64,
    /// Exact hidden time, seconds past the hour.
    #[serde(default)]
    pub exact_hidden_time: Option<u32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClassifiedEntity {
    pub id: String,
    pub kind: SpawnKind,
    pub links: SpawnLinks,
    pub latest_seen: u32,
    pub earliest_unseen: u32,
    pub tth_found: bool,
    pub double_window: bool,
    pub predicted_start: u32,
    pub predicted_end: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_window: Option<ScanWindow>,
}

pub fn read_histories(path: &Path) -> Result<Vec<EntityHistory>> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse history file {}", path.display()))
}

/// Replays each history through classification. Entities are independent,
/// so they run in parallel; output keeps input order.
pub fn classify_histories(
    histories: &[EntityHistory],
    cell_done: bool,
    now: Option<i64>,
    spawn_delay_secs: i64,
) -> Vec<ClassifiedEntity> {
    histories
        .par_iter()
        .map(|history| classify_one(history, cell_done, now, spawn_delay_secs))
        .collect()
}

fn classify_one(
    history: &EntityHistory,
    cell_done: bool,
    now: Option<i64>,
    spawn_delay_secs: i64,
) -> ClassifiedEntity {
    let mut sightings: Vec<Sighting> = history
        .sightings
        .iter()
        .map(|s| Sighting {
            spawnpoint_id: history.id.clone(),
            encounter_id: s.encounter_id,
            scan_time: s.scan_time,
            exact_hidden_time: s.exact_hidden_time,
        })
        .collect();
    sightings.sort_by_key(|s| s.scan_time);

    let location = history.location.unwrap_or(LatLon::new(0.0, 0.0));
    let mut sp = SpawnPoint::new(history.id.clone(), location);
    if let Some(exact) = sightings.iter().find_map(|s| s.exact_hidden_time) {
        sp.apply_exact(exact);
    }
    let now = now
        .or_else(|| sightings.last().map(|s| s.scan_time))
        .unwrap_or(0);
    let outcome = sp.classify(&sightings, cell_done, now);
    sp.last_scanned = sightings.last().map(|s| s.scan_time);

    let (predicted_start, predicted_end) = sp.start_end(spawn_delay_secs);
    ClassifiedEntity {
        id: sp.id.clone(),
        kind: sp.kind,
        links: sp.links,
        latest_seen: sp.latest_seen,
        earliest_unseen: sp.earliest_unseen,
        tth_found: sp.tth_found(),
        double_window: outcome.double_window,
        predicted_start,
        predicted_end,
        search_window: sp.search_window(now),
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct GeofenceVerdict {
    pub point: LatLon,
    pub allowed: bool,
    pub inside_included: Vec<String>,
    pub inside_excluded: Vec<String>,
}

pub fn load_geofences(include: &Path, exclude: Option<&Path>) -> Result<GeofenceSet> {
    let included = fs::read_to_string(include)
        .with_context(|| format!("failed to read {}", include.display()))?;
    let excluded = exclude
        .map(|path| {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
        })
        .transpose()?;
    GeofenceSet::from_texts(Some(&included), excluded.as_deref())
        .map_err(|e| anyhow!("invalid geofence file: {e}"))
}

pub fn parse_point(text: &str) -> Result<LatLon> {
    parse_lat_lon(text).ok_or_else(|| anyhow!("expected <lat,lon>, got '{text}'"))
}

pub fn evaluate_point(set: &GeofenceSet, point: LatLon, name: Option<&str>) -> GeofenceVerdict {
    GeofenceVerdict {
        point,
        allowed: set.allows(point, name),
        inside_included: set
            .included()
            .iter()
            .filter(|fence| fence.contains(point))
            .map(|fence| fence.name.clone())
            .collect(),
        inside_excluded: set
            .excluded()
            .iter()
            .filter(|fence| fence.contains(point))
            .map(|fence| fence.name.clone())
            .collect(),
    }
}

pub fn spiral_path(center: LatLon, steps: usize, params: &SpiralParams) -> Vec<LatLon> {
    let mut spiral = SpiralState::new(center);
    (0..steps).map(|_| spiral.advance(None, params)).collect()
}

#[derive(Clone, Debug, Serialize)]
pub struct RouteStop {
    pub id: Option<String>,
    pub location: LatLon,
    pub leg_m: f64,
}

pub fn read_candidates(path: &Path) -> Result<Vec<Candidate>> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse candidate file {}", path.display()))
}

pub fn plan_route(origin: LatLon, candidates: Vec<Candidate>, options: &RouteOptions) -> Vec<RouteStop> {
    let mut from = origin;
    nearest_neighbor_route(origin, candidates, options)
        .into_iter()
        .map(|stop| {
            let leg_m = distance_m(from, stop.location);
            from = stop.location;
            RouteStop {
                id: stop.id,
                location: stop.location,
                leg_m,
            }
        })
        .collect()
}

/// `mm:ss` past the hour.
pub fn format_clock(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

pub fn clock_now(now: i64) -> String {
    format_clock(secs_of_hour(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const HOUR: i64 = 1_700_002_800;

    fn history(id: &str, minutes: &[i64]) -> EntityHistory {
        EntityHistory {
            id: id.to_string(),
            location: None,
            sightings: minutes
                .iter()
                .map(|m| HistorySighting {
                    encounter_id: 1,
                    scan_time: HOUR + m * 60,
                    exact_hidden_time: None,
                })
                .collect(),
        }
    }

    #[test]
    fn classification_keeps_input_order() {
        let histories = vec![
            history("a", &[0, 5, 10]),
            history("b", &[20]),
            history("c", &[40, 45]),
        ];
        let out = classify_histories(&histories, false, None, 0);
        let ids: Vec<_> = out.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn exact_hidden_time_marks_the_entity_found() {
        let mut entity = history("exact", &[10]);
        entity.sightings[0].exact_hidden_time = Some(25 * 60);
        let out = classify_histories(&[entity], true, None, 0);
        assert!(out[0].tth_found);
        assert_eq!(out[0].earliest_unseen, 25 * 60);
    }

    #[test]
    fn histories_load_from_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":"sp","sightings":[{{"scan_time":{HOUR}}},{{"scan_time":{}}}]}}]"#,
            HOUR + 120
        )
        .unwrap();
        let histories = read_histories(file.path()).unwrap();
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].sightings.len(), 2);
        assert!(histories[0].location.is_none());
    }

    #[test]
    fn malformed_history_reports_the_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = read_histories(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse history file"));
    }

    #[test]
    fn exclusion_wins_for_a_point_in_both_fences() {
        let dir = TempDir::new().unwrap();
        let include = dir.path().join("include.txt");
        let exclude = dir.path().join("exclude.txt");
        fs::write(&include, "[town]\n0,0\n0,2\n2,2\n2,0\n").unwrap();
        fs::write(&exclude, "[park]\n0.5,0.5\n0.5,1\n1,1\n1,0.5\n").unwrap();

        let set = load_geofences(&include, Some(&exclude)).unwrap();
        let verdict = evaluate_point(&set, LatLon::new(0.75, 0.75), None);
        assert!(!verdict.allowed);
        assert_eq!(verdict.inside_included, ["town"]);
        assert_eq!(verdict.inside_excluded, ["park"]);

        let verdict = evaluate_point(&set, LatLon::new(1.5, 1.5), Some("TOWN"));
        assert!(verdict.allowed);
        let verdict = evaluate_point(&set, LatLon::new(1.5, 1.5), Some("village"));
        assert!(!verdict.allowed);
    }

    #[test]
    fn points_parse_with_whitespace() {
        assert_eq!(parse_point(" 51.5 , -0.1 ").unwrap(), LatLon::new(51.5, -0.1));
        assert!(parse_point("51.5").is_err());
    }

    #[test]
    fn spiral_first_ring_stays_one_step_out() {
        let params = SpiralParams {
            step_size_deg: 0.001,
            teleport_factor: 1.0,
            max_radius_km: 0.0,
        };
        let center = LatLon::new(10.0, 10.0);
        let path = spiral_path(center, 8, &params);
        assert_eq!(path.len(), 8);
        for point in &path {
            assert!((point.lat - center.lat).abs() <= 0.001 + 1e-9);
            assert!((point.lon - center.lon).abs() <= 0.001 + 1e-9);
        }
    }

    #[test]
    fn route_legs_follow_the_tour() {
        let candidates = vec![
            Candidate {
                id: "far".to_string(),
                location: LatLon::new(0.0, 0.02),
                last_scanned: None,
            },
            Candidate {
                id: "near".to_string(),
                location: LatLon::new(0.0, 0.01),
                last_scanned: None,
            },
        ];
        let stops = plan_route(LatLon::new(0.0, 0.0), candidates, &RouteOptions::default());
        let ids: Vec<_> = stops.iter().filter_map(|s| s.id.as_deref()).collect();
        assert_eq!(ids, ["near", "far"]);
        assert!((stops[0].leg_m - stops[1].leg_m).abs() < 1.0);
    }

    #[test]
    fn clock_formats_minutes_and_seconds() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(25 * 60 + 7), "25:07");
        assert_eq!(clock_now(HOUR + 61), "01:01");
    }
}
