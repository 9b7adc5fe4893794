//! Square-spiral exploration used when no informative target exists.
//!
//! The walk lives on an integer grid of `step_size_deg` cells around the
//! centre, so ring closure never depends on float comparisons.

use serde::{Deserialize, Serialize};

use crate::geo::{distance_km, LatLon};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Heading {
    #[default]
    North,
    East,
    South,
    West,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpiralParams {
    pub step_size_deg: f64,
    /// Drift, in steps beyond the current radius, that counts as a teleport.
    pub teleport_factor: f64,
    /// `0` means unlimited.
    pub max_radius_km: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpiralState {
    pub center: LatLon,
    pub position: LatLon,
    pub radius: u32,
    pub heading: Heading,
    /// Grid offset from the centre in steps: `(north, east)`.
    pub offset: (i64, i64),
}

impl SpiralState {
    pub fn new(center: LatLon) -> Self {
        let center = center.rounded();
        Self {
            center,
            position: center,
            radius: 0,
            heading: Heading::North,
            offset: (0, 0),
        }
    }

    pub fn recenter(&mut self, center: LatLon) {
        *self = Self::new(center);
    }

    fn tolerance(&self, params: &SpiralParams) -> f64 {
        (f64::from(self.radius) + params.teleport_factor) * params.step_size_deg
    }

    fn far_apart(a: LatLon, b: LatLon, tolerance: f64) -> bool {
        (a.lat - b.lat).abs() > tolerance || (a.lon - b.lon).abs() > tolerance
    }

    /// The client was moved elsewhere, or the recorded position drifted off
    /// the spiral.
    pub fn needs_recenter(&self, reported: Option<LatLon>, params: &SpiralParams) -> bool {
        let tolerance = self.tolerance(params);
        reported.is_some_and(|at| Self::far_apart(at, self.position, tolerance))
            || Self::far_apart(self.center, self.position, tolerance)
    }

    /// One step along the spiral. Returns the new position. The first step
    /// from a fresh centre already lands on ring 1; the centre itself is
    /// never handed out as a step.
    pub fn advance(&mut self, reported: Option<LatLon>, params: &SpiralParams) -> LatLon {
        if self.needs_recenter(reported, params) {
            self.recenter(reported.unwrap_or(self.position));
        }

        let radius = i64::from(self.radius);
        let (north, east) = &mut self.offset;
        if self.radius == 0 {
            self.radius = 1;
            *north += 1;
        } else {
            match self.heading {
                Heading::North => {
                    *north += 1;
                    if *north > radius {
                        *north -= 1;
                        *east += 1;
                        self.heading = Heading::East;
                        if *east == 0 {
                            // Back on the axis: the ring is closed.
                            *north += 1;
                            self.radius += 1;
                            self.heading = Heading::North;
                        }
                    }
                }
                Heading::East => {
                    *east += 1;
                    if *east > radius {
                        *east -= 1;
                        *north -= 1;
                        self.heading = Heading::South;
                    } else if *east == 0 {
                        *north += 1;
                        self.radius += 1;
                        self.heading = Heading::North;
                    }
                }
                Heading::South => {
                    *north -= 1;
                    if *north < -radius {
                        *north += 1;
                        *east -= 1;
                        self.heading = Heading::West;
                    }
                }
                Heading::West => {
                    *east -= 1;
                    if *east < -radius {
                        *east += 1;
                        *north += 1;
                        self.heading = Heading::North;
                    }
                }
            }
        }

        self.position = self.grid_point(params.step_size_deg);
        if params.max_radius_km > 0.0 && distance_km(self.position, self.center) > params.max_radius_km
        {
            self.recenter(self.center);
        }
        self.position
    }

    fn grid_point(&self, step: f64) -> LatLon {
        let (north, east) = self.offset;
        LatLon::new(
            self.center.lat + north as f64 * step,
            self.center.lon + east as f64 * step,
        )
        .rounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: SpiralParams = SpiralParams {
        step_size_deg: 0.0009,
        teleport_factor: 10.0,
        max_radius_km: 0.0,
    };

    fn offsets(state: &mut SpiralState, steps: usize) -> Vec<(i64, i64)> {
        (0..steps)
            .map(|_| {
                state.advance(None, &PARAMS);
                state.offset
            })
            .collect()
    }

    #[test]
    fn first_ring_is_walked_clockwise_from_north() {
        let mut state = SpiralState::new(LatLon::new(0.0, 0.0));
        let path = offsets(&mut state, 8);
        assert_eq!(
            path,
            vec![(1, 0), (1, 1), (0, 1), (-1, 1), (-1, 0), (-1, -1), (0, -1), (1, -1)]
        );
        assert_eq!(state.radius, 1);
    }

    #[test]
    fn closing_a_ring_steps_outward() {
        let mut state = SpiralState::new(LatLon::new(0.0, 0.0));
        offsets(&mut state, 8);
        state.advance(None, &PARAMS);
        assert_eq!(state.offset, (2, 0));
        assert_eq!(state.radius, 2);
        assert_eq!(state.position, LatLon::new(0.0018, 0.0));
    }

    #[test]
    fn second_ring_visits_sixteen_cells() {
        let mut state = SpiralState::new(LatLon::new(0.0, 0.0));
        offsets(&mut state, 9);
        let ring: Vec<_> = offsets(&mut state, 15);
        assert!(ring.iter().all(|(n, e)| n.abs() == 2 || e.abs() == 2));
        assert_eq!(state.radius, 2);
        state.advance(None, &PARAMS);
        assert_eq!((state.offset, state.radius), ((3, 0), 3));
    }

    #[test]
    fn far_report_recenters_on_the_client() {
        let mut state = SpiralState::new(LatLon::new(0.0, 0.0));
        offsets(&mut state, 3);
        let moved = LatLon::new(1.0, 1.0);
        assert!(state.needs_recenter(Some(moved), &PARAMS));
        let next = state.advance(Some(moved), &PARAMS);
        assert_eq!(state.center, moved);
        assert_eq!(next, LatLon::new(1.0009, 1.0));
    }

    #[test]
    fn nearby_report_does_not_recenter() {
        let mut state = SpiralState::new(LatLon::new(0.0, 0.0));
        offsets(&mut state, 2);
        assert!(!state.needs_recenter(Some(LatLon::new(0.001, 0.001)), &PARAMS));
    }

    #[test]
    fn max_radius_resets_to_the_center() {
        let params = SpiralParams {
            max_radius_km: 0.15,
            ..PARAMS
        };
        let mut state = SpiralState::new(LatLon::new(0.0, 0.0));
        // (1, 1) is ~141 m out, (2, 0) ~200 m.
        for _ in 0..8 {
            state.advance(None, &params);
        }
        assert_eq!(state.radius, 1);
        let next = state.advance(None, &params);
        assert_eq!(next, LatLon::new(0.0, 0.0));
        assert_eq!(state.radius, 0);
    }
}
