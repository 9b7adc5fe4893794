//! Throttling for teleport modes: a client only moves on once the server
//! has reported the kinds of feedback it is waiting for.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_TELEPORT_WAIT_TIMEOUT_SECS;
use crate::error::ModeParseError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// Any fixed structure, area-control or point of interest.
    Structures,
    AreaControl,
    PointsOfInterest,
    /// Any spawn, nearby or wild.
    Spawns,
    NearbySpawns,
    WildSpawns,
}

impl FeedbackKind {
    pub const ALL: [Self; 6] = [
        Self::Structures,
        Self::AreaControl,
        Self::PointsOfInterest,
        Self::Spawns,
        Self::NearbySpawns,
        Self::WildSpawns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structures => "structures",
            Self::AreaControl => "area_control",
            Self::PointsOfInterest => "points_of_interest",
            Self::Spawns => "spawns",
            Self::NearbySpawns => "nearby_spawns",
            Self::WildSpawns => "wild_spawns",
        }
    }

    fn parent(&self) -> Option<Self> {
        match self {
            Self::AreaControl | Self::PointsOfInterest => Some(Self::Structures),
            Self::NearbySpawns | Self::WildSpawns => Some(Self::Spawns),
            Self::Structures | Self::Spawns => None,
        }
    }
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackKind {
    type Err = ModeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "structures" | "forts" => Ok(Self::Structures),
            "area_control" | "gyms" => Ok(Self::AreaControl),
            "points_of_interest" | "pokestops" => Ok(Self::PointsOfInterest),
            "spawns" | "pokemon" => Ok(Self::Spawns),
            "nearby_spawns" | "nearby_pokemon" => Ok(Self::NearbySpawns),
            "wild_spawns" | "wild_pokemon" => Ok(Self::WildSpawns),
            _ => Err(ModeParseError::UnknownFeedback {
                value: value.to_string(),
            }),
        }
    }
}

/// Parses a comma-separated category list, skipping blanks.
pub fn parse_feedback_list(text: &str) -> Result<BTreeSet<FeedbackKind>, ModeParseError> {
    text.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse)
        .collect()
}

/// Last time each category of feedback was observed for one client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackLog {
    last_seen: BTreeMap<FeedbackKind, i64>,
}

impl FeedbackLog {
    /// Records `kind` and the umbrella category it belongs to.
    pub fn record(&mut self, kind: FeedbackKind, at: i64) {
        for kind in std::iter::once(kind).chain(kind.parent()) {
            let slot = self.last_seen.entry(kind).or_insert(at);
            *slot = (*slot).max(at);
        }
    }

    pub fn last_seen(&self, kind: FeedbackKind) -> Option<i64> {
        self.last_seen.get(&kind).copied()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeleportGate {
    pub wait_for: BTreeSet<FeedbackKind>,
    pub min_interval_secs: Option<i64>,
    pub timeout_secs: i64,
}

impl Default for TeleportGate {
    fn default() -> Self {
        Self {
            wait_for: BTreeSet::new(),
            min_interval_secs: None,
            timeout_secs: DEFAULT_TELEPORT_WAIT_TIMEOUT_SECS,
        }
    }
}

impl TeleportGate {
    /// `since` is the last teleport, or the last check-in for a client that
    /// never teleported.
    pub fn should_advance(&self, log: &FeedbackLog, since: i64, now: i64) -> bool {
        let elapsed = now - since;
        if elapsed >= self.timeout_secs {
            return true;
        }
        if self.min_interval_secs.is_some_and(|min| elapsed < min) {
            return false;
        }
        self.wait_for
            .iter()
            .all(|kind| log.last_seen(*kind).is_some_and(|at| at >= since))
    }
}
