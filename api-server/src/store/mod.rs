mod db;
mod files;

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use rusqlite::{params, Connection, OptionalExtension};
use scout_core::constants::MISSED_COUNT_LIMIT;
use scout_core::sync::lock_unpoisoned;
use scout_core::{
    Candidate, CandidateQuery, CellBands, CellId, ClientState, LatLon, ObservationStore, Sighting,
    SourceError, SpawnPoint, TargetKind, TargetSource,
};
use serde::{Deserialize, Serialize};

pub(crate) use db::TargetRecord;

/// Minimum spacing between two persisted snapshots of the same client.
pub(crate) const CLIENT_PERSIST_INTERVAL_SECS: i64 = 30;

/// SQLite-backed persistence for cells, spawn points, sightings, external
/// targets and client snapshots. Route files live as plain text under
/// `routes_dir`.
pub(crate) struct ScoutStore {
    conn: Mutex<Connection>,
    routes_dir: Option<PathBuf>,
    persisted_at: Mutex<HashMap<String, i64>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct StoreCounts {
    pub(crate) spawnpoints: usize,
    pub(crate) cells: usize,
    pub(crate) sightings: usize,
    pub(crate) targets: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SweepReport {
    pub(crate) spawnpoints: usize,
    pub(crate) sightings: usize,
}

impl SweepReport {
    pub(crate) fn total(&self) -> usize {
        self.spawnpoints + self.sightings
    }
}

const TARGETS_SCHEMA_MIGRATIONS: [(&str, &str); 2] = [
    (
        "last_scanned",
        "ALTER TABLE targets ADD COLUMN last_scanned INTEGER;",
    ),
    (
        "engaged",
        "ALTER TABLE targets ADD COLUMN engaged INTEGER NOT NULL DEFAULT 0;",
    ),
];

impl ScoutStore {
    /// Open (or create) `scout.db` under `data_dir`.
    pub(crate) fn open(data_dir: &Path, routes_dir: Option<PathBuf>) -> Result<Self, String> {
        fs::create_dir_all(data_dir)
            .map_err(|e| format!("failed to create data dir {}: {e}", data_dir.display()))?;

        let db_path = data_dir.join("scout.db");
        let conn = Connection::open(&db_path)
            .map_err(|e| format!("failed to open SQLite at {}: {e}", db_path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;
             PRAGMA synchronous=NORMAL;",
        )
        .map_err(|e| format!("failed to set pragmas: {e}"))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cells (
                id              INTEGER PRIMARY KEY,
                center_lat      REAL NOT NULL,
                center_lon      REAL NOT NULL,
                bands           TEXT NOT NULL,
                midpoint        INTEGER NOT NULL,
                width           INTEGER NOT NULL,
                done            INTEGER NOT NULL,
                last_modified   INTEGER
             );
             CREATE TABLE IF NOT EXISTS spawnpoints (
                id              TEXT PRIMARY KEY,
                lat             REAL NOT NULL,
                lon             REAL NOT NULL,
                kind            TEXT NOT NULL,
                links           TEXT NOT NULL,
                latest_seen     INTEGER NOT NULL,
                earliest_unseen INTEGER NOT NULL,
                missed_count    INTEGER NOT NULL,
                last_scanned    INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_spawnpoints_lat_lon ON spawnpoints(lat, lon);
             CREATE TABLE IF NOT EXISTS cell_spawnpoints (
                cell_id         INTEGER NOT NULL,
                spawnpoint_id   TEXT NOT NULL,
                PRIMARY KEY (cell_id, spawnpoint_id)
             );
             CREATE INDEX IF NOT EXISTS idx_cell_spawnpoints_sp ON cell_spawnpoints(spawnpoint_id);
             CREATE TABLE IF NOT EXISTS sightings (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                spawnpoint_id       TEXT NOT NULL,
                encounter_id        INTEGER NOT NULL,
                scan_time           INTEGER NOT NULL,
                exact_hidden_time   INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_sightings_spawnpoint ON sightings(spawnpoint_id);
             CREATE INDEX IF NOT EXISTS idx_sightings_scan_time ON sightings(scan_time);
             CREATE TABLE IF NOT EXISTS targets (
                id              TEXT PRIMARY KEY,
                kind            TEXT NOT NULL,
                lat             REAL NOT NULL,
                lon             REAL NOT NULL,
                last_scanned    INTEGER,
                engaged         INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX IF NOT EXISTS idx_targets_kind ON targets(kind);
             CREATE TABLE IF NOT EXISTS clients (
                id              TEXT PRIMARY KEY,
                state           TEXT NOT NULL,
                updated_at      INTEGER NOT NULL
             );",
        )
        .map_err(|e| format!("failed to create schema: {e}"))?;

        Self::ensure_targets_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            routes_dir,
            persisted_at: Mutex::new(HashMap::new()),
        })
    }

    fn ensure_targets_schema(conn: &Connection) -> Result<(), String> {
        let mut columns = Self::table_columns(conn, "targets")?;
        for (column, migration_sql) in TARGETS_SCHEMA_MIGRATIONS {
            if columns.contains(column) {
                continue;
            }

            tracing::warn!(column, "applying targets table migration");
            conn.execute_batch(migration_sql)
                .map_err(|e| format!("failed to add targets.{column}: {e}"))?;
            columns.insert(column.to_string());
        }
        Ok(())
    }

    fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>, String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .map_err(|e| format!("failed to read {table} table info: {e}"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(|e| format!("failed to iterate {table} columns: {e}"))?;

        let mut columns = HashSet::new();
        for row in rows {
            columns.insert(row.map_err(|e| format!("failed to parse {table} column info: {e}"))?);
        }
        Ok(columns)
    }

    /// Writes a client snapshot unless one was written less than
    /// [`CLIENT_PERSIST_INTERVAL_SECS`] ago. Returns whether a row was written.
    pub(crate) fn save_client(
        &self,
        client: &ClientState,
        now: i64,
        force: bool,
    ) -> Result<bool, String> {
        {
            let mut persisted = lock_unpoisoned(&self.persisted_at);
            if let Some(last) = persisted.get(&client.id) {
                if !force && now - last < CLIENT_PERSIST_INTERVAL_SECS {
                    return Ok(false);
                }
            }
            persisted.insert(client.id.clone(), now);
        }

        let json =
            serde_json::to_string(client).map_err(|e| format!("failed to serialize client: {e}"))?;
        let conn = lock_unpoisoned(&self.conn);
        conn.execute(
            "INSERT INTO clients (id, state, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
            params![client.id, json, now],
        )
        .map_err(|e| format!("save_client failed: {e}"))?;
        Ok(true)
    }

    pub(crate) fn load_client_state(&self, id: &str) -> Result<Option<ClientState>, String> {
        let json: Option<String> = {
            let conn = lock_unpoisoned(&self.conn);
            conn.query_row(
                "SELECT state FROM clients WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| format!("load_client failed: {e}"))?
        };

        let Some(json) = json else {
            return Ok(None);
        };
        match serde_json::from_str::<ClientState>(&json) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                tracing::warn!(client_id = %id, "discarding unreadable client snapshot: {e}");
                Ok(None)
            }
        }
    }

    pub(crate) fn counts(&self) -> Result<StoreCounts, String> {
        let conn = lock_unpoisoned(&self.conn);
        conn.query_row(
            "SELECT
                 (SELECT COUNT(*) FROM spawnpoints),
                 (SELECT COUNT(*) FROM cells),
                 (SELECT COUNT(*) FROM sightings),
                 (SELECT COUNT(*) FROM targets)",
            [],
            |row| {
                Ok(StoreCounts {
                    spawnpoints: row.get::<_, i64>(0)? as usize,
                    cells: row.get::<_, i64>(1)? as usize,
                    sightings: row.get::<_, i64>(2)? as usize,
                    targets: row.get::<_, i64>(3)? as usize,
                })
            },
        )
        .map_err(|e| format!("counts failed: {e}"))
    }

    /// Deletes inactive spawn points not scanned since `horizon` (with their
    /// links and sightings), then every sighting older than `horizon`.
    pub(crate) fn sweep(&self, horizon: i64) -> Result<SweepReport, String> {
        let mut conn = lock_unpoisoned(&self.conn);
        let tx = conn
            .transaction()
            .map_err(|e| format!("sweep begin failed: {e}"))?;

        let stale_where = "missed_count > ?1 AND (last_scanned IS NULL OR last_scanned < ?2)";
        tx.execute(
            &format!(
                "DELETE FROM sightings WHERE spawnpoint_id IN
                    (SELECT id FROM spawnpoints WHERE {stale_where})"
            ),
            params![MISSED_COUNT_LIMIT, horizon],
        )
        .map_err(|e| format!("sweep sightings of stale spawnpoints failed: {e}"))?;
        tx.execute(
            &format!(
                "DELETE FROM cell_spawnpoints WHERE spawnpoint_id IN
                    (SELECT id FROM spawnpoints WHERE {stale_where})"
            ),
            params![MISSED_COUNT_LIMIT, horizon],
        )
        .map_err(|e| format!("sweep links failed: {e}"))?;
        let spawnpoints = tx
            .execute(
                &format!("DELETE FROM spawnpoints WHERE {stale_where}"),
                params![MISSED_COUNT_LIMIT, horizon],
            )
            .map_err(|e| format!("sweep spawnpoints failed: {e}"))?;
        let sightings = tx
            .execute(
                "DELETE FROM sightings WHERE scan_time < ?1",
                params![horizon],
            )
            .map_err(|e| format!("sweep sightings failed: {e}"))?;

        tx.commit()
            .map_err(|e| format!("sweep commit failed: {e}"))?;
        Ok(SweepReport {
            spawnpoints,
            sightings,
        })
    }
}

impl ObservationStore for ScoutStore {
    fn cell(&self, id: CellId) -> Result<Option<CellBands>, SourceError> {
        self.get_cell(id)
            .map_err(|e| SourceError::unavailable("cell", e))
    }

    fn save_cell(&self, cell: &CellBands) -> Result<(), SourceError> {
        self.upsert_cell(cell)
            .map_err(|e| SourceError::unavailable("save_cell", e))
    }

    fn spawnpoint(&self, id: &str) -> Result<Option<SpawnPoint>, SourceError> {
        self.get_spawnpoint(id)
            .map_err(|e| SourceError::unavailable("spawnpoint", e))
    }

    fn save_spawnpoint(&self, spawnpoint: &SpawnPoint) -> Result<(), SourceError> {
        self.upsert_spawnpoint(spawnpoint)
            .map_err(|e| SourceError::unavailable("save_spawnpoint", e))
    }

    fn linked_spawnpoint_ids(&self, cell: CellId) -> Result<Vec<String>, SourceError> {
        self.linked_ids(cell)
            .map_err(|e| SourceError::unavailable("linked_spawnpoint_ids", e))
    }

    fn link(&self, cell: CellId, spawnpoint_id: &str) -> Result<bool, SourceError> {
        self.insert_link(cell, spawnpoint_id)
            .map_err(|e| SourceError::unavailable("link", e))
    }

    fn history(&self, spawnpoint_id: &str) -> Result<Vec<Sighting>, SourceError> {
        self.sightings_for(spawnpoint_id)
            .map_err(|e| SourceError::unavailable("history", e))
    }

    fn append_sighting(&self, sighting: &Sighting) -> Result<(), SourceError> {
        self.insert_sighting(sighting)
            .map_err(|e| SourceError::unavailable("append_sighting", e))
    }
}

impl TargetSource for ScoutStore {
    fn candidates(&self, query: &CandidateQuery) -> Result<Vec<Candidate>, SourceError> {
        let result = match query.kind {
            TargetKind::Spawn => self.spawn_candidates(query),
            TargetKind::PointOfInterest | TargetKind::AreaControl => self.target_candidates(query),
        };
        result.map_err(|e| SourceError::unavailable("candidates", e))
    }

    fn route_file(&self, name: &str) -> Result<Option<Vec<LatLon>>, SourceError> {
        self.load_route(name)
            .map_err(|e| SourceError::unavailable("route_file", e))
    }

    fn load_client(&self, id: &str) -> Result<Option<ClientState>, SourceError> {
        self.load_client_state(id)
            .map_err(|e| SourceError::unavailable("load_client", e))
    }
}
