//! Observation ingestion: one scan of one cell at a time.
//!
//! Locks are taken cell first, then every affected spawn point in id order,
//! so batches for different cells only contend on spawn points they share.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::bands::CellBands;
use crate::clock::secs_of_hour;
use crate::constants::EXACT_TTH_MAX_MS;
use crate::error::SourceError;
use crate::geo::{cell_id, CellId, LatLon};
use crate::spawn::{Sighting, SpawnPoint};
use crate::sync::{lock_unpoisoned, KeyedLocks};
use crate::teleport::FeedbackKind;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservedSpawn {
    pub spawnpoint_id: String,
    pub encounter_id: u64,
    pub location: LatLon,
    #[serde(default)]
    pub time_till_hidden_ms: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservationBatch {
    #[serde(default)]
    pub client_id: Option<String>,
    pub scan_time: i64,
    /// Where the scan was taken; selects the cell.
    pub cell: LatLon,
    #[serde(default)]
    pub sightings: Vec<ObservedSpawn>,
    #[serde(default)]
    pub feedback: Vec<FeedbackKind>,
}

pub trait ObservationStore {
    fn cell(&self, id: CellId) -> Result<Option<CellBands>, SourceError>;
    fn save_cell(&self, cell: &CellBands) -> Result<(), SourceError>;
    fn spawnpoint(&self, id: &str) -> Result<Option<SpawnPoint>, SourceError>;
    fn save_spawnpoint(&self, spawnpoint: &SpawnPoint) -> Result<(), SourceError>;
    fn linked_spawnpoint_ids(&self, cell: CellId) -> Result<Vec<String>, SourceError>;
    /// Records that `spawnpoint_id` is visible from `cell`. Returns `true`
    /// when the link did not exist before.
    fn link(&self, cell: CellId, spawnpoint_id: &str) -> Result<bool, SourceError>;
    fn history(&self, spawnpoint_id: &str) -> Result<Vec<Sighting>, SourceError>;
    fn append_sighting(&self, sighting: &Sighting) -> Result<(), SourceError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnEventKind {
    #[serde(rename = "spawn_classified")]
    Classified,
    TthFound,
    #[serde(rename = "spawn_missed")]
    Missed,
    #[serde(rename = "spawn_inactive")]
    Inactive,
    SearchRestarted,
    CellCompleted,
    CellReset,
    DoubleWindow,
}

impl SpawnEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classified => "spawn_classified",
            Self::TthFound => "tth_found",
            Self::Missed => "spawn_missed",
            Self::Inactive => "spawn_inactive",
            Self::SearchRestarted => "search_restarted",
            Self::CellCompleted => "cell_completed",
            Self::CellReset => "cell_reset",
            Self::DoubleWindow => "double_window",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpawnEvent {
    pub kind: SpawnEventKind,
    pub at: i64,
    pub cell_id: CellId,
    /// State after the change, for spawn point events.
    pub spawnpoint: Option<SpawnPoint>,
}

pub trait EventSink {
    fn emit(&self, event: SpawnEvent);
}

impl<F: Fn(SpawnEvent)> EventSink for F {
    fn emit(&self, event: SpawnEvent) {
        self(event)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub cell_id: CellId,
    pub band_filled: Option<usize>,
    pub cell_completed: bool,
    pub cell_reset: bool,
    pub sightings: usize,
    pub classified: usize,
    pub missed: usize,
    pub events: usize,
}

struct Emitter<'a, E: ?Sized> {
    sink: &'a E,
    at: i64,
    cell_id: CellId,
    count: usize,
}

impl<E: EventSink + ?Sized> Emitter<'_, E> {
    fn cell(&mut self, kind: SpawnEventKind) {
        self.send(kind, None);
    }

    fn spawn(&mut self, kind: SpawnEventKind, spawnpoint: &SpawnPoint) {
        self.send(kind, Some(spawnpoint.clone()));
    }

    fn send(&mut self, kind: SpawnEventKind, spawnpoint: Option<SpawnPoint>) {
        self.count += 1;
        self.sink.emit(SpawnEvent {
            kind,
            at: self.at,
            cell_id: self.cell_id,
            spawnpoint,
        });
    }
}

#[derive(Debug, Default)]
pub struct Ingestor {
    cell_locks: KeyedLocks<CellId>,
    spawn_locks: KeyedLocks<String>,
    spawn_delay_secs: i64,
}

impl Ingestor {
    pub fn new(spawn_delay_secs: i64) -> Self {
        Self {
            cell_locks: KeyedLocks::new(),
            spawn_locks: KeyedLocks::new(),
            spawn_delay_secs,
        }
    }

    /// Forgets lock slots no batch is holding.
    pub fn prune_locks(&self) {
        self.cell_locks.prune();
        self.spawn_locks.prune();
    }

    pub fn ingest<S, E>(
        &self,
        store: &S,
        sink: &E,
        batch: &ObservationBatch,
    ) -> Result<IngestSummary, SourceError>
    where
        S: ObservationStore + ?Sized,
        E: EventSink + ?Sized,
    {
        let now = batch.scan_time;
        let cell_id = cell_id(batch.cell);
        let cell_slot = self.cell_locks.slot(&cell_id);
        let _cell_guard = lock_unpoisoned(&cell_slot);

        let mut events = Emitter {
            sink,
            at: now,
            cell_id,
            count: 0,
        };
        let mut summary = IngestSummary {
            cell_id,
            ..IngestSummary::default()
        };

        let mut cell = match store.cell(cell_id)? {
            Some(cell) => cell,
            None => CellBands::for_point(batch.cell),
        };
        let update = cell.update(now);
        summary.band_filled = update.filled;
        summary.cell_completed = update.just_completed;
        if update.just_completed {
            events.cell(SpawnEventKind::CellCompleted);
        }

        let linked = store.linked_spawnpoint_ids(cell_id)?;
        let affected: Vec<String> = batch
            .sightings
            .iter()
            .map(|observed| observed.spawnpoint_id.clone())
            .chain(linked.iter().cloned())
            .collect();
        let spawn_slots = self.spawn_locks.slots_sorted(&affected);
        let _spawn_guards: Vec<_> = spawn_slots.iter().map(|slot| lock_unpoisoned(slot)).collect();

        let mut seen = HashSet::new();
        for observed in &batch.sightings {
            if !seen.insert(observed.spawnpoint_id.clone()) {
                continue;
            }
            summary.sightings += 1;

            let mut sp = store
                .spawnpoint(&observed.spawnpoint_id)?
                .unwrap_or_else(|| SpawnPoint::new(observed.spawnpoint_id.clone(), observed.location));
            let was_found = sp.tth_found();

            // A reported hidden time is only trusted the first time: later
            // reports can be skewed by upstream schedule changes.
            let exact = observed
                .time_till_hidden_ms
                .filter(|ms| *ms > 0 && *ms < EXACT_TTH_MAX_MS)
                .filter(|_| !was_found || sp.last_scanned.is_none())
                .map(|ms| secs_of_hour(now + ms / 1000));
            if let Some(exact) = exact {
                sp.apply_exact(exact);
            }
            sp.missed_count = 0;
            sp.last_scanned = Some(now);

            if store.link(cell_id, &sp.id)? && cell.done && !update.just_completed {
                cell.reset();
                summary.cell_reset = true;
                events.cell(SpawnEventKind::CellReset);
            }

            store.append_sighting(&Sighting {
                spawnpoint_id: sp.id.clone(),
                encounter_id: observed.encounter_id,
                scan_time: now,
                exact_hidden_time: exact,
            })?;

            if !sp.tth_found() || exact.is_some() || !cell.done || update.just_completed {
                self.classify(store, &mut sp, cell.done, now, &mut events, &mut summary)?;
            }
            self.restart_if_overdue(store, &mut sp, true, cell.done, now, &mut events, &mut summary)?;
            if !was_found && sp.tth_found() {
                events.spawn(SpawnEventKind::TthFound, &sp);
            }
            store.save_spawnpoint(&sp)?;
        }

        for id in linked.iter().filter(|id| !seen.contains(*id)) {
            let Some(mut sp) = store.spawnpoint(id)? else {
                continue;
            };
            if !sp.is_active() {
                continue;
            }
            let before = sp.clone();
            if update.just_completed {
                self.classify(store, &mut sp, cell.done, now, &mut events, &mut summary)?;
            }
            sp.unseen(now);
            if sp.record_miss(now, self.spawn_delay_secs) {
                summary.missed += 1;
                events.spawn(SpawnEventKind::Missed, &sp);
                if !sp.is_active() {
                    events.spawn(SpawnEventKind::Inactive, &sp);
                }
            }
            self.restart_if_overdue(store, &mut sp, false, cell.done, now, &mut events, &mut summary)?;
            if sp != before {
                store.save_spawnpoint(&sp)?;
            }
        }

        store.save_cell(&cell)?;
        summary.events = events.count;
        Ok(summary)
    }

    fn classify<S, E>(
        &self,
        store: &S,
        sp: &mut SpawnPoint,
        cell_done: bool,
        now: i64,
        events: &mut Emitter<'_, E>,
        summary: &mut IngestSummary,
    ) -> Result<(), SourceError>
    where
        S: ObservationStore + ?Sized,
        E: EventSink + ?Sized,
    {
        let history = store.history(&sp.id)?;
        let outcome = sp.classify(&history, cell_done, now);
        if outcome.changed {
            summary.classified += 1;
            events.spawn(SpawnEventKind::Classified, sp);
        }
        if outcome.double_window {
            events.spawn(SpawnEventKind::DoubleWindow, sp);
        }
        Ok(())
    }

    /// Spawns missing from the scan are re-derived from their history
    /// before the interval is widened; sighted ones were classified already.
    #[allow(clippy::too_many_arguments)]
    fn restart_if_overdue<S, E>(
        &self,
        store: &S,
        sp: &mut SpawnPoint,
        sighted: bool,
        cell_done: bool,
        now: i64,
        events: &mut Emitter<'_, E>,
        summary: &mut IngestSummary,
    ) -> Result<(), SourceError>
    where
        S: ObservationStore + ?Sized,
        E: EventSink + ?Sized,
    {
        if !cell_done || !sp.search_overdue(now, self.spawn_delay_secs) {
            return Ok(());
        }
        if !sighted {
            self.classify(store, sp, cell_done, now, events, summary)?;
        }
        sp.widen_search();
        events.spawn(SpawnEventKind::SearchRestarted, sp);
        Ok(())
    }
}
