//! Candidate filtering and greedy nearest-neighbour tours.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::RouteFileError;
use crate::geo::{distance_km, distance_m, parse_lat_lon, LatLon};
use crate::geofence::GeofenceSet;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub location: LatLon,
    #[serde(default)]
    pub last_scanned: Option<i64>,
}

/// One queued stop. Route-file points carry no id and are never claimed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: Option<String>,
    pub location: LatLon,
}

impl Waypoint {
    pub fn at(location: LatLon) -> Self {
        Self { id: None, location }
    }
}

impl From<Candidate> for Waypoint {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: Some(candidate.id),
            location: candidate.location,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteOptions {
    pub max_points: Option<usize>,
    /// Teleport modes drop a stop this close to the previously accepted one.
    pub min_separation_m: f64,
    /// Order by `last_scanned` (never scanned first) instead of distance.
    pub oldest_first: bool,
}

/// Everything a candidate must pass before it may enter a route.
#[derive(Clone, Copy, Debug)]
pub struct CandidateFilter<'a> {
    pub claimed: &'a HashSet<String>,
    pub geofences: &'a GeofenceSet,
    pub geofence_name: Option<&'a str>,
    pub origin: LatLon,
    /// `0` means unlimited.
    pub max_radius_km: f64,
}

impl CandidateFilter<'_> {
    pub fn admits(&self, candidate: &Candidate) -> bool {
        if self.claimed.contains(&candidate.id) {
            return false;
        }
        if self.max_radius_km > 0.0 && distance_km(self.origin, candidate.location) > self.max_radius_km
        {
            return false;
        }
        self.geofences.allows(candidate.location, self.geofence_name)
    }
}

pub fn filter_candidates(candidates: Vec<Candidate>, filter: &CandidateFilter<'_>) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|candidate| filter.admits(candidate))
        .collect()
}

fn sort_by_distance(items: &mut [Candidate], from: LatLon) {
    items.sort_by(|a, b| {
        distance_m(from, a.location).total_cmp(&distance_m(from, b.location))
    });
}

/// Builds the visit order. The pool is capped to the `max_points` best
/// candidates first, then toured: each accepted stop re-sorts the rest by
/// distance to that stop, so "nearest" always means nearest to the tail.
pub fn nearest_neighbor_route(
    origin: LatLon,
    candidates: Vec<Candidate>,
    options: &RouteOptions,
) -> Vec<Waypoint> {
    let mut seen = HashSet::new();
    let mut pool: Vec<Candidate> = candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.id.clone()))
        .collect();

    if options.oldest_first {
        pool.sort_by_key(|candidate| candidate.last_scanned.unwrap_or(i64::MIN));
    } else {
        sort_by_distance(&mut pool, origin);
    }
    if let Some(max) = options.max_points {
        pool.truncate(max);
    }

    let mut remaining = VecDeque::from(pool);
    let mut route: Vec<Waypoint> = Vec::with_capacity(remaining.len());
    while let Some(next) = remaining.pop_front() {
        if options.min_separation_m > 0.0 {
            if let Some(last) = route.last() {
                if distance_m(last.location, next.location) < options.min_separation_m {
                    continue;
                }
            }
        }
        let tail = next.location;
        route.push(next.into());
        if !options.oldest_first {
            sort_by_distance(remaining.make_contiguous(), tail);
        }
    }
    route
}

/// One `lat,lon` per line; blank lines and `#` comments are skipped.
pub fn parse_route_points(text: &str) -> Result<Vec<LatLon>, RouteFileError> {
    text.lines()
        .enumerate()
        .map(|(index, raw)| (index, raw.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(index, line)| {
            parse_lat_lon(line).ok_or_else(|| RouteFileError::InvalidPoint {
                line: index + 1,
                text: line.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geofence::Geofence;

    fn candidate(id: &str, lat: f64, lon: f64) -> Candidate {
        Candidate {
            id: id.to_string(),
            location: LatLon::new(lat, lon),
            last_scanned: None,
        }
    }

    fn ids(route: &[Waypoint]) -> Vec<&str> {
        route.iter().filter_map(|stop| stop.id.as_deref()).collect()
    }

    #[test]
    fn tour_follows_the_tail_not_the_origin() {
        // From the origin, b is second nearest. From a, c is nearer than b.
        let origin = LatLon::new(0.0, 0.0);
        let candidates = vec![
            candidate("a", 0.0, 0.001),
            candidate("b", 0.0, -0.0015),
            candidate("c", 0.0, 0.002),
        ];
        let route = nearest_neighbor_route(origin, candidates, &RouteOptions::default());
        assert_eq!(ids(&route), ["a", "c", "b"]);
    }

    #[test]
    fn max_points_keeps_the_nearest() {
        let origin = LatLon::new(0.0, 0.0);
        let candidates = vec![
            candidate("far", 0.0, 0.01),
            candidate("near", 0.0, 0.001),
            candidate("mid", 0.0, 0.005),
        ];
        let options = RouteOptions {
            max_points: Some(2),
            ..RouteOptions::default()
        };
        let route = nearest_neighbor_route(origin, candidates, &options);
        assert_eq!(ids(&route), ["near", "mid"]);
    }

    #[test]
    fn duplicate_ids_are_visited_once() {
        let origin = LatLon::new(0.0, 0.0);
        let candidates = vec![candidate("a", 0.0, 0.001), candidate("a", 0.0, 0.001)];
        let route = nearest_neighbor_route(origin, candidates, &RouteOptions::default());
        assert_eq!(route.len(), 1);
    }

    #[test]
    fn min_separation_drops_crowded_stops() {
        let origin = LatLon::new(0.0, 0.0);
        let candidates = vec![
            candidate("a", 0.0, 0.001),
            candidate("a2", 0.0, 0.00101),
            candidate("b", 0.0, 0.01),
        ];
        let options = RouteOptions {
            min_separation_m: 50.0,
            ..RouteOptions::default()
        };
        let route = nearest_neighbor_route(origin, candidates, &options);
        assert_eq!(ids(&route), ["a", "b"]);
    }

    #[test]
    fn oldest_first_orders_by_last_scan() {
        let origin = LatLon::new(0.0, 0.0);
        let mut recent = candidate("recent", 0.0, 0.001);
        recent.last_scanned = Some(500);
        let mut old = candidate("old", 0.0, 0.01);
        old.last_scanned = Some(100);
        let never = candidate("never", 0.0, 0.02);
        let options = RouteOptions {
            oldest_first: true,
            ..RouteOptions::default()
        };
        let route = nearest_neighbor_route(origin, vec![recent, old, never], &options);
        assert_eq!(ids(&route), ["never", "old", "recent"]);
    }

    #[test]
    fn filter_removes_claimed_fenced_and_distant() {
        let claimed: HashSet<String> = ["taken".to_string()].into();
        let fences = GeofenceSet::new(
            Vec::new(),
            vec![Geofence::new(
                "pond",
                vec![
                    LatLon::new(0.0, 0.002),
                    LatLon::new(0.0, 0.004),
                    LatLon::new(0.002, 0.004),
                    LatLon::new(0.002, 0.002),
                ],
            )],
        );
        let filter = CandidateFilter {
            claimed: &claimed,
            geofences: &fences,
            geofence_name: None,
            origin: LatLon::new(0.0, 0.0),
            max_radius_km: 1.0,
        };
        let kept = filter_candidates(
            vec![
                candidate("taken", 0.0, 0.001),
                candidate("wet", 0.001, 0.003),
                candidate("remote", 0.0, 0.5),
                candidate("ok", 0.0, 0.001),
            ],
            &filter,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "ok");
    }

    #[test]
    fn route_file_points_parse() {
        let points = parse_route_points("# loop\n1.0,2.0\n\n 1.5 , 2.5 \n").unwrap();
        assert_eq!(points, vec![LatLon::new(1.0, 2.0), LatLon::new(1.5, 2.5)]);
        let err = parse_route_points("1,2\nnope\n").unwrap_err();
        assert_eq!(
            err,
            RouteFileError::InvalidPoint {
                line: 2,
                text: "nope".to_string()
            }
        );
    }
}
