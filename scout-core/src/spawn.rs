//! Occupancy inference for recurring spawns.
//!
//! A spawn point is visible for one to four 15 minute quarters of every hour.
//! `latest_seen` and `earliest_unseen` bound the moment it disappears; once
//! they agree the time-to-hidden (TTH) is known exactly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bands::ScanWindow;
use crate::clock::{
    clock_between, clock_mod, clock_span, hour_start, merge_intervals, secs_of_hour,
    ClockInterval,
};
use crate::constants::{
    DEFAULT_HIDDEN_GUESS_SECS, DOUBLE_WINDOW_MIN_GAPS, HOUR_SECS, MISSED_COUNT_LIMIT,
    QUARTER_SECS, RESTART_WIDEN_BACK_SECS, RESTART_WIDEN_FORWARD_SECS, RESTART_WINDOW_SECS,
    SEARCH_WINDOW_LEAD_SECS, SEARCH_WINDOW_MIN_SECS, UNCONFIRMED_SLACK_SECS,
};
use crate::error::ModeParseError;
use crate::geo::LatLon;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Visibility {
    Hidden,
    Seen,
}

/// Visibility across the hour's four quarters, written `h`/`s` (e.g. `hhhs`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SpawnKind(pub [Visibility; 4]);

impl SpawnKind {
    pub const SHORTEST: Self = Self([
        Visibility::Hidden,
        Visibility::Hidden,
        Visibility::Hidden,
        Visibility::Seen,
    ]);
    pub const FULL_HOUR: Self = Self([Visibility::Seen; 4]);
    pub const DOUBLE: Self = Self([
        Visibility::Hidden,
        Visibility::Seen,
        Visibility::Hidden,
        Visibility::Seen,
    ]);

    /// Pattern seen for the last `quarters` quarters (clamped to 1..=4).
    pub fn trailing(quarters: usize) -> Self {
        let quarters = quarters.clamp(1, 4);
        let mut marks = [Visibility::Hidden; 4];
        for mark in marks.iter_mut().skip(4 - quarters) {
            *mark = Visibility::Seen;
        }
        Self(marks)
    }

    pub fn seen_quarters(&self) -> usize {
        self.0.iter().filter(|mark| **mark == Visibility::Seen).count()
    }
}

impl fmt::Display for SpawnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for mark in self.0 {
            f.write_str(match mark {
                Visibility::Hidden => "h",
                Visibility::Seen => "s",
            })?;
        }
        Ok(())
    }
}

impl FromStr for SpawnKind {
    type Err = ModeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ModeParseError::InvalidPattern {
            value: value.to_string(),
        };
        let chars: Vec<char> = value.chars().collect();
        if chars.len() != 4 {
            return Err(invalid());
        }
        let mut marks = [Visibility::Hidden; 4];
        for (mark, ch) in marks.iter_mut().zip(chars) {
            *mark = match ch {
                'h' => Visibility::Hidden,
                's' => Visibility::Seen,
                _ => return Err(invalid()),
            };
        }
        Ok(Self(marks))
    }
}

impl From<SpawnKind> for String {
    fn from(kind: SpawnKind) -> Self {
        kind.to_string()
    }
}

impl TryFrom<String> for SpawnKind {
    type Error = ModeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Link {
    Hidden,
    Same,
    Different,
    Unknown,
}

/// Identity relation between consecutive quarters: `+` same individual,
/// `-` a different one, `?` unknown, `h` hidden.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SpawnLinks(pub [Link; 4]);

impl SpawnLinks {
    pub const UNKNOWN: Self = Self([Link::Unknown; 4]);
    pub const FULL_HOUR: Self = Self([Link::Same, Link::Same, Link::Same, Link::Different]);
    pub const DOUBLE: Self = Self([Link::Hidden, Link::Unknown, Link::Hidden, Link::Unknown]);

    pub fn from_kind(kind: SpawnKind) -> Self {
        let mut links = [Link::Hidden; 4];
        for (link, mark) in links.iter_mut().zip(kind.0) {
            if mark == Visibility::Seen {
                *link = Link::Unknown;
            }
        }
        Self(links)
    }
}

impl fmt::Display for SpawnLinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for link in self.0 {
            f.write_str(match link {
                Link::Hidden => "h",
                Link::Same => "+",
                Link::Different => "-",
                Link::Unknown => "?",
            })?;
        }
        Ok(())
    }
}

impl FromStr for SpawnLinks {
    type Err = ModeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ModeParseError::InvalidPattern {
            value: value.to_string(),
        };
        let chars: Vec<char> = value.chars().collect();
        if chars.len() != 4 {
            return Err(invalid());
        }
        let mut links = [Link::Unknown; 4];
        for (link, ch) in links.iter_mut().zip(chars) {
            *link = match ch {
                'h' => Link::Hidden,
                '+' => Link::Same,
                '-' => Link::Different,
                '?' => Link::Unknown,
                _ => return Err(invalid()),
            };
        }
        Ok(Self(links))
    }
}

impl From<SpawnLinks> for String {
    fn from(links: SpawnLinks) -> Self {
        links.to_string()
    }
}

impl TryFrom<String> for SpawnLinks {
    type Error = ModeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One observation of a spawn. `exact_hidden_time` is the seconds-after-hour
/// at which the upstream source said this individual disappears.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sighting {
    pub spawnpoint_id: String,
    pub encounter_id: u64,
    pub scan_time: i64,
    #[serde(default)]
    pub exact_hidden_time: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub id: String,
    pub location: LatLon,
    pub kind: SpawnKind,
    pub links: SpawnLinks,
    pub latest_seen: u32,
    pub earliest_unseen: u32,
    pub missed_count: u32,
    pub last_scanned: Option<i64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    /// Kind, links or bounds moved.
    pub changed: bool,
    /// The two-window heuristic fired; its boundaries are provisional.
    pub double_window: bool,
}

impl SpawnPoint {
    pub fn new(id: impl Into<String>, location: LatLon) -> Self {
        Self {
            id: id.into(),
            location,
            kind: SpawnKind::SHORTEST,
            links: SpawnLinks::UNKNOWN,
            latest_seen: 0,
            earliest_unseen: 0,
            missed_count: 0,
            last_scanned: None,
        }
    }

    /// Both bounds agree; `0/0` is the never-classified sentinel.
    pub fn tth_found(&self) -> bool {
        !(self.latest_seen == 0 && self.earliest_unseen == 0)
            && self.latest_seen == self.earliest_unseen
    }

    pub fn is_active(&self) -> bool {
        self.missed_count <= MISSED_COUNT_LIMIT
    }

    /// Pins both bounds to a reported exact hidden time. Returns whether
    /// anything changed.
    pub fn apply_exact(&mut self, exact: u32) -> bool {
        let exact = clock_mod(i64::from(exact));
        if self.tth_found() && self.latest_seen == exact {
            return false;
        }
        self.latest_seen = exact;
        self.earliest_unseen = exact;
        true
    }

    fn bounds(&self) -> (SpawnKind, SpawnLinks, u32, u32) {
        (self.kind, self.links, self.latest_seen, self.earliest_unseen)
    }

    /// Re-derives kind, links and bounds from the full sighting history.
    /// `history` must already include the sighting that triggered the pass.
    pub fn classify(&mut self, history: &[Sighting], cell_done: bool, now_unix: i64) -> Classification {
        let before = self.bounds();
        let exact = history
            .iter()
            .rev()
            .find_map(|sighting| sighting.exact_hidden_time)
            .map(|secs| clock_mod(i64::from(secs) - 1));

        if !cell_done {
            if exact.is_none() {
                self.provisional(secs_of_hour(now_unix));
            }
            return self.outcome(before, false);
        }

        let mut seen: Vec<i64> = history
            .iter()
            .map(|sighting| i64::from(secs_of_hour(sighting.scan_time)))
            .collect();
        seen.extend(exact.map(i64::from));
        if seen.is_empty() {
            return Classification::default();
        }
        seen.sort_unstable();
        seen.push(seen[0] + HOUR_SECS);

        let gaps: Vec<i64> = seen.windows(2).map(|pair| pair[1] - pair[0]).collect();
        let (gap_index, max_gap) = gaps
            .iter()
            .copied()
            .enumerate()
            .fold((0, i64::MIN), |best, (index, gap)| if gap > best.1 { (index, gap) } else { best });

        let mut ordered = gaps.clone();
        ordered.sort_unstable_by(|a, b| b.cmp(a));
        let double_window = gaps.len() >= DOUBLE_WINDOW_MIN_GAPS && ordered[1] > QUARTER_SECS;

        let old_kind = self.kind;
        if double_window {
            self.kind = SpawnKind::DOUBLE;
            self.links = SpawnLinks::DOUBLE;
        } else {
            self.kind = SpawnKind::trailing(visible_quarters(max_gap));
            self.links = SpawnLinks::from_kind(self.kind);
        }

        if self.kind != SpawnKind::FULL_HOUR {
            if self.earliest_unseen == 0 || self.latest_seen != self.earliest_unseen || exact.is_none() {
                self.latest_seen = clock_mod(seen[gap_index]);
                if self.earliest_unseen == 0 || self.kind != old_kind {
                    self.earliest_unseen =
                        clock_mod(i64::from(self.latest_seen) + DEFAULT_HIDDEN_GUESS_SECS);
                }
            }
            return self.outcome(before, double_window);
        }

        self.links = SpawnLinks::FULL_HOUR;
        if !self.tth_found() {
            if let Some(window) = longest_visible_window(history) {
                self.latest_seen = window.end;
                self.earliest_unseen = window.start;
            }
        }
        self.outcome(before, false)
    }

    fn provisional(&mut self, now: u32) {
        self.kind = SpawnKind::SHORTEST;
        if self.earliest_unseen == 0 {
            self.latest_seen = now;
            self.earliest_unseen = clock_mod(i64::from(now) + DEFAULT_HIDDEN_GUESS_SECS);
        } else if clock_between(self.latest_seen, now, self.earliest_unseen) {
            self.latest_seen = now;
        }
    }

    fn outcome(&self, before: (SpawnKind, SpawnLinks, u32, u32), double_window: bool) -> Classification {
        Classification {
            changed: before != self.bounds(),
            double_window,
        }
    }

    /// A scan at `now` did not see the spawn. If `now` lies strictly inside
    /// the open search interval, the spawn must already be gone, so the
    /// hidden boundary moves to `now`. The interval only ever shrinks.
    pub fn unseen(&mut self, now_unix: i64) -> bool {
        if self.tth_found() {
            return false;
        }
        let now = secs_of_hour(now_unix);
        if now == self.latest_seen || now == self.earliest_unseen {
            return false;
        }
        if !clock_between(self.latest_seen, now, self.earliest_unseen) {
            return false;
        }
        self.earliest_unseen = now;
        true
    }

    /// Predicted `(appear, disappear)` seconds-after-hour.
    pub fn start_end(&self, spawn_delay_secs: i64) -> (u32, u32) {
        let links = if self.links == SpawnLinks::UNKNOWN {
            SpawnLinks::from_kind(self.kind)
        } else {
            self.links
        };

        let mut marks = links.0;
        for mark in marks.iter_mut() {
            if *mark == Link::Unknown {
                *mark = Link::Same;
            }
        }
        marks[3] = Link::Different;

        let hidden_at = marks
            .iter()
            .position(|mark| *mark == Link::Different)
            .unwrap_or(3) as i64;
        let visible_from = marks
            .iter()
            .position(|mark| *mark == Link::Same)
            .map_or(hidden_at, |index| index as i64);

        let start = i64::from(self.earliest_unseen) - (4 - visible_from) * QUARTER_SECS
            + spawn_delay_secs;
        let mut end = i64::from(self.latest_seen) - (3 - hidden_at) * QUARTER_SECS;
        if !self.tth_found() {
            end += UNCONFIRMED_SLACK_SECS;
        }
        (clock_mod(start), clock_mod(end))
    }

    /// A zero-length prediction means the spawn never leaves.
    pub fn predicted_visible(&self, now_unix: i64, spawn_delay_secs: i64) -> bool {
        let (start, end) = self.start_end(spawn_delay_secs);
        start == end || clock_between(start, secs_of_hour(now_unix), end)
    }

    /// Counts a miss when the spawn should have been visible. Returns whether
    /// the count moved.
    pub fn record_miss(&mut self, now_unix: i64, spawn_delay_secs: i64) -> bool {
        if !self.predicted_visible(now_unix, spawn_delay_secs) {
            return false;
        }
        self.missed_count += 1;
        true
    }

    /// Next unix window worth scanning to pin the hidden boundary.
    pub fn search_window(&self, now_unix: i64) -> Option<ScanWindow> {
        if self.tth_found() {
            return None;
        }
        let mut span = i64::from(clock_span(self.latest_seen, self.earliest_unseen));
        if span < SEARCH_WINDOW_MIN_SECS {
            span = SEARCH_WINDOW_MIN_SECS;
        }
        let start = hour_start(now_unix) + i64::from(self.latest_seen) + SEARCH_WINDOW_LEAD_SECS;
        let end = hour_start(now_unix) + i64::from(self.latest_seen) + span;
        let shift = if end < now_unix { HOUR_SECS } else { 0 };
        Some(ScanWindow {
            start: start + shift,
            end: end + shift,
        })
    }

    /// The spawn vanished just after its supposed boundary: the boundary is
    /// wrong, so widen the search interval again.
    pub fn restart_search(&mut self, now_unix: i64, spawn_delay_secs: i64) -> bool {
        if !self.search_overdue(now_unix, spawn_delay_secs) {
            return false;
        }
        self.widen_search();
        true
    }

    /// No exact boundary yet, and `now` is just past the supposed one.
    pub fn search_overdue(&self, now_unix: i64, spawn_delay_secs: i64) -> bool {
        if self.tth_found() {
            return false;
        }
        let since = clock_mod(now_unix - i64::from(self.latest_seen) - spawn_delay_secs);
        i64::from(since) < RESTART_WINDOW_SECS
    }

    pub fn widen_search(&mut self) {
        self.latest_seen = clock_mod(i64::from(self.latest_seen) - RESTART_WIDEN_BACK_SECS);
        self.earliest_unseen =
            clock_mod(i64::from(self.earliest_unseen) + RESTART_WIDEN_FORWARD_SECS);
    }
}

/// `round((60 - gap_minutes) / 15)` quarters, at least one.
fn visible_quarters(max_gap_secs: i64) -> usize {
    let gap_minutes = max_gap_secs as f64 / 60.0;
    ((60.0 - gap_minutes) / 15.0).round().clamp(1.0, 4.0) as usize
}

/// For always-visible spawns: spans between consecutive sightings of the
/// same individual are visible time, spans between different individuals
/// mark the hand-over. The longest merged span is one individual's life.
fn longest_visible_window(history: &[Sighting]) -> Option<ClockInterval> {
    let mut ordered: Vec<&Sighting> = history.iter().collect();
    ordered.sort_by_key(|sighting| sighting.scan_time);

    let spans = ordered.windows(2).filter_map(|pair| {
        let (a, b) = (pair[0], pair[1]);
        let delta = b.scan_time - a.scan_time;
        if delta <= 0 || delta >= HOUR_SECS {
            return None;
        }
        Some(if a.encounter_id == b.encounter_id {
            let start = secs_of_hour(a.scan_time);
            ClockInterval::new(start, clock_mod(i64::from(start) + delta))
        } else {
            ClockInterval::new(secs_of_hour(b.scan_time), secs_of_hour(a.scan_time))
        })
    });

    merge_intervals(spans)
        .into_iter()
        .fold(None, |best: Option<ClockInterval>, candidate| match best {
            Some(best) if best.span() >= candidate.span() => Some(best),
            _ => Some(candidate),
        })
}
