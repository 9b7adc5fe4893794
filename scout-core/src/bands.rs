//! Per-cell tracking of the five sub-hour scan bands.

use serde::{Deserialize, Serialize};

use crate::clock::{clock_mod, hour_start, secs_of_hour};
use crate::constants::{
    BAND_BASE_RADIUS_SECS, BAND_COUNT, BAND_FRAME_SHIFT_SECS, BAND_HALF_SPACING_SECS,
    BAND_SPACING_SECS, BAND_WINDOW_LEAD_SECS, HOUR_SECS,
};
use crate::geo::{cell_center, cell_id, CellId, LatLon};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellBands {
    pub id: CellId,
    pub center: LatLon,
    /// Seconds-after-hour of each accepted scan; `bands[0]` anchors the cycle.
    pub bands: [Option<u32>; BAND_COUNT],
    pub midpoint: i64,
    pub width: i64,
    pub done: bool,
    pub last_modified: Option<i64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BandUpdate {
    /// Zero-based slot filled by this scan.
    pub filled: Option<usize>,
    pub just_completed: bool,
}

/// Unix-second window `[start, end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWindow {
    pub start: i64,
    pub end: i64,
}

impl ScanWindow {
    pub fn contains(&self, unix_secs: i64) -> bool {
        self.start <= unix_secs && unix_secs <= self.end
    }
}

impl CellBands {
    pub fn new(id: CellId, center: LatLon) -> Self {
        Self {
            id,
            center,
            bands: [None; BAND_COUNT],
            midpoint: 0,
            width: 0,
            done: false,
            last_modified: None,
        }
    }

    pub fn for_point(point: LatLon) -> Self {
        let id = cell_id(point);
        Self::new(id, cell_center(id))
    }

    pub fn filled_count(&self) -> usize {
        self.bands.iter().filter(|band| band.is_some()).count()
    }

    /// Acceptance half-width around a band's ideal centre. Narrows as the
    /// spread of accepted offsets grows.
    pub fn acceptance_radius(&self) -> i64 {
        BAND_BASE_RADIUS_SECS - self.width / 2
    }

    pub fn update(&mut self, now_unix: i64) -> BandUpdate {
        if self.done {
            return BandUpdate::default();
        }
        self.last_modified = Some(now_unix);

        let now = secs_of_hour(now_unix);
        let Some(anchor) = self.bands[0] else {
            self.bands[0] = Some(now);
            return BandUpdate {
                filled: Some(0),
                just_completed: false,
            };
        };

        let delta = i64::from(clock_mod(i64::from(now) - i64::from(anchor) - self.midpoint));
        let slot = (delta as f64 / BAND_SPACING_SECS as f64).round() as usize % BAND_COUNT;
        if self.bands[slot].is_some() {
            return BandUpdate::default();
        }
        if frame_offset(delta).abs() > self.acceptance_radius() {
            return BandUpdate::default();
        }

        self.bands[slot] = Some(now);
        self.recompute(anchor);
        BandUpdate {
            filled: Some(slot),
            just_completed: self.done,
        }
    }

    fn recompute(&mut self, anchor: u32) {
        let offsets = self
            .bands
            .iter()
            .flatten()
            .map(|band| frame_offset(i64::from(clock_mod(i64::from(*band) - i64::from(anchor)))));
        let (min, max) = offsets.fold((i64::MAX, i64::MIN), |(min, max), offset| {
            (min.min(offset), max.max(offset))
        });
        self.width = max - min;
        self.midpoint = (max + min).div_euclid(2);
        self.done = self.bands.iter().all(Option::is_some);
    }

    /// Earliest upcoming window in which a scan would fill an empty band.
    pub fn next_window(&self, now_unix: i64) -> Option<ScanWindow> {
        if self.done {
            return None;
        }
        let Some(anchor) = self.bands[0] else {
            return Some(ScanWindow {
                start: now_unix,
                end: now_unix + HOUR_SECS - 1,
            });
        };

        let now = i64::from(secs_of_hour(now_unix));
        let radius = self.acceptance_radius();
        let end = self
            .bands
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, band)| band.is_none())
            .map(|(slot, _)| {
                let ideal_end = i64::from(clock_mod(
                    i64::from(anchor) + self.midpoint + radius + slot as i64 * BAND_SPACING_SECS
                        - BAND_WINDOW_LEAD_SECS,
                ));
                if ideal_end < now {
                    ideal_end + HOUR_SECS
                } else {
                    ideal_end
                }
            })
            .min()?;

        let base = hour_start(now_unix);
        Some(ScanWindow {
            start: base + end - radius * 2 + BAND_WINDOW_LEAD_SECS,
            end: base + end,
        })
    }

    /// Forget every band. Used when a scan contradicts a completed cell.
    pub fn reset(&mut self) {
        self.bands = [None; BAND_COUNT];
        self.midpoint = 0;
        self.width = 0;
        self.done = false;
    }
}

/// Folds a delta into the `-360..360` frame around its nearest band.
fn frame_offset(delta: i64) -> i64 {
    (delta + BAND_FRAME_SHIFT_SECS).rem_euclid(BAND_SPACING_SECS) - BAND_HALF_SPACING_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 1_700_000_400 - 1_700_000_400 % 3600;

    fn anchored(band1: u32) -> CellBands {
        let mut cell = CellBands::for_point(LatLon::new(1.0, 1.0));
        cell.update(HOUR + i64::from(band1));
        cell
    }

    #[test]
    fn first_scan_anchors_band_one() {
        let mut cell = CellBands::for_point(LatLon::new(1.0, 1.0));
        let update = cell.update(HOUR + 120);
        assert_eq!(update.filled, Some(0));
        assert_eq!(cell.bands[0], Some(120));
        assert_eq!((cell.midpoint, cell.width), (0, 0));
    }

    #[test]
    fn scan_outside_acceptance_radius_is_rejected() {
        let mut cell = anchored(120);
        // Ideal centre of band 2 is 840; 840 + 200 lands outside ±120.
        let update = cell.update(HOUR + 1040);
        assert_eq!(update.filled, None);
        assert_eq!(cell.filled_count(), 1);
    }

    #[test]
    fn already_filled_band_is_not_overwritten() {
        let mut cell = anchored(120);
        cell.update(HOUR + 860);
        let update = cell.update(HOUR + 850);
        assert_eq!(update.filled, None);
        assert_eq!(cell.bands[1], Some(860));
    }

    #[test]
    fn accepted_offsets_update_midpoint_and_width() {
        let mut cell = anchored(120);
        cell.update(HOUR + 860);
        assert_eq!(cell.width, 20);
        assert_eq!(cell.midpoint, 10);
        assert_eq!(cell.acceptance_radius(), 110);
    }

    #[test]
    fn five_bands_complete_the_cell_once() {
        let mut cell = anchored(0);
        let mut completions = 0;
        for offset in [720, 1440, 2160, 2880] {
            if cell.update(HOUR + offset).just_completed {
                completions += 1;
            }
        }
        assert!(cell.done);
        assert_eq!(completions, 1);
        assert_eq!(cell.update(HOUR + 3000), BandUpdate::default());
        assert!(cell.next_window(HOUR + 3000).is_none());
    }

    #[test]
    fn negative_offsets_wrap_into_the_previous_hour() {
        let mut cell = anchored(60);
        // 60 - 720 + 3600 = 2940 is band 5 with zero offset.
        let update = cell.update(HOUR + 2940);
        assert_eq!(update.filled, Some(4));
        assert_eq!(cell.width, 0);
    }

    #[test]
    fn fresh_cell_window_is_the_next_hour() {
        let cell = CellBands::for_point(LatLon::new(1.0, 1.0));
        let window = cell.next_window(HOUR + 42).unwrap();
        assert_eq!(window, ScanWindow { start: HOUR + 42, end: HOUR + 42 + 3599 });
    }

    #[test]
    fn next_window_targets_the_earliest_empty_band() {
        let cell = anchored(120);
        let window = cell.next_window(HOUR + 200).unwrap();
        // Band 2 centre 840, radius 120, ending 10s early.
        assert_eq!(window.end, HOUR + 120 + 120 + 720 - 10);
        assert_eq!(window.start, window.end - 240 + 10);
        assert!(window.contains(HOUR + 840));
    }

    #[test]
    fn next_window_rolls_into_next_hour_when_bands_have_passed() {
        let mut cell = anchored(0);
        cell.update(HOUR + 720);
        cell.update(HOUR + 1440);
        cell.update(HOUR + 2160);
        let window = cell.next_window(HOUR + 3500).unwrap();
        assert_eq!(window.end, HOUR + 2880 + 120 - 10 + 3600);
    }

    #[test]
    fn reset_clears_bands_and_done() {
        let mut cell = anchored(0);
        for offset in [720, 1440, 2160, 2880] {
            cell.update(HOUR + offset);
        }
        cell.reset();
        assert!(!cell.done);
        assert_eq!(cell.filled_count(), 0);
        assert_eq!(cell.update(HOUR + 100).filled, Some(0));
    }
}
