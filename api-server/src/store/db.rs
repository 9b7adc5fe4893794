use rusqlite::{params, OptionalExtension, Row};
use scout_core::BoundingBox;

use super::*;

/// A point of interest or area-control structure fed in by an external
/// decoder. `engaged` marks a live side objective or an active contest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TargetRecord {
    pub(crate) id: String,
    pub(crate) kind: TargetKind,
    pub(crate) lat: f64,
    pub(crate) lon: f64,
    #[serde(default)]
    pub(crate) last_scanned: Option<i64>,
    #[serde(default)]
    pub(crate) engaged: bool,
}

impl ScoutStore {
    pub(super) fn get_cell(&self, id: CellId) -> Result<Option<CellBands>, String> {
        let row = {
            let conn = lock_unpoisoned(&self.conn);
            conn.query_row(
                "SELECT id, center_lat, center_lon, bands, midpoint, width, done, last_modified
                 FROM cells WHERE id = ?1",
                params![id as i64],
                |row| {
                    Ok(RawCellRow {
                        id: row.get(0)?,
                        center_lat: row.get(1)?,
                        center_lon: row.get(2)?,
                        bands: row.get(3)?,
                        midpoint: row.get(4)?,
                        width: row.get(5)?,
                        done: row.get(6)?,
                        last_modified: row.get(7)?,
                    })
                },
            )
            .optional()
            .map_err(|e| format!("get cell failed: {e}"))?
        };

        row.map(row_to_cell).transpose()
    }

    /// Band state for status output; same as the ingestion lookup.
    pub(crate) fn cell_state(&self, id: CellId) -> Result<Option<CellBands>, String> {
        self.get_cell(id)
    }

    pub(super) fn upsert_cell(&self, cell: &CellBands) -> Result<(), String> {
        let bands =
            serde_json::to_string(&cell.bands).map_err(|e| format!("failed to encode bands: {e}"))?;
        let conn = lock_unpoisoned(&self.conn);
        conn.execute(
            "INSERT INTO cells (id, center_lat, center_lon, bands, midpoint, width, done, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                bands = excluded.bands,
                midpoint = excluded.midpoint,
                width = excluded.width,
                done = excluded.done,
                last_modified = excluded.last_modified",
            params![
                cell.id as i64,
                cell.center.lat,
                cell.center.lon,
                bands,
                cell.midpoint,
                cell.width,
                cell.done,
                cell.last_modified,
            ],
        )
        .map_err(|e| format!("upsert cell failed: {e}"))?;
        Ok(())
    }

    pub(super) fn get_spawnpoint(&self, id: &str) -> Result<Option<SpawnPoint>, String> {
        let row = {
            let conn = lock_unpoisoned(&self.conn);
            conn.query_row(
                &format!("SELECT {SPAWNPOINT_COLUMNS} FROM spawnpoints WHERE id = ?1"),
                params![id],
                read_spawnpoint_row,
            )
            .optional()
            .map_err(|e| format!("get spawnpoint failed: {e}"))?
        };

        row.map(row_to_spawnpoint).transpose()
    }

    pub(super) fn upsert_spawnpoint(&self, sp: &SpawnPoint) -> Result<(), String> {
        let conn = lock_unpoisoned(&self.conn);
        conn.execute(
            "INSERT INTO spawnpoints (
                id, lat, lon, kind, links, latest_seen, earliest_unseen, missed_count, last_scanned
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                lat = excluded.lat,
                lon = excluded.lon,
                kind = excluded.kind,
                links = excluded.links,
                latest_seen = excluded.latest_seen,
                earliest_unseen = excluded.earliest_unseen,
                missed_count = excluded.missed_count,
                last_scanned = excluded.last_scanned",
            params![
                sp.id,
                sp.location.lat,
                sp.location.lon,
                sp.kind.to_string(),
                sp.links.to_string(),
                sp.latest_seen,
                sp.earliest_unseen,
                sp.missed_count,
                sp.last_scanned,
            ],
        )
        .map_err(|e| format!("upsert spawnpoint failed: {e}"))?;
        Ok(())
    }

    /// Every spawn point inside `bbox`, ordered by id.
    pub(crate) fn spawnpoints_in(&self, bbox: &BoundingBox) -> Result<Vec<SpawnPoint>, String> {
        let rows: Vec<RawSpawnRow> = {
            let conn = lock_unpoisoned(&self.conn);
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SPAWNPOINT_COLUMNS} FROM spawnpoints
                     WHERE lat BETWEEN ?1 AND ?2 AND lon BETWEEN ?3 AND ?4
                     ORDER BY id"
                ))
                .map_err(|e| format!("spawnpoints_in prepare failed: {e}"))?;
            let rows = stmt
                .query_map(
                    params![bbox.min_lat, bbox.max_lat, bbox.min_lon, bbox.max_lon],
                    read_spawnpoint_row,
                )
                .map_err(|e| format!("spawnpoints_in query failed: {e}"))?;
            rows.collect::<Result<_, _>>()
                .map_err(|e| format!("spawnpoints_in row failed: {e}"))?
        };

        rows.into_iter().map(row_to_spawnpoint).collect()
    }

    pub(super) fn linked_ids(&self, cell: CellId) -> Result<Vec<String>, String> {
        let conn = lock_unpoisoned(&self.conn);
        let mut stmt = conn
            .prepare("SELECT spawnpoint_id FROM cell_spawnpoints WHERE cell_id = ?1 ORDER BY spawnpoint_id")
            .map_err(|e| format!("linked_ids prepare failed: {e}"))?;
        let rows = stmt
            .query_map(params![cell as i64], |row| row.get::<_, String>(0))
            .map_err(|e| format!("linked_ids query failed: {e}"))?;
        rows.collect::<Result<_, _>>()
            .map_err(|e| format!("linked_ids row failed: {e}"))
    }

    pub(super) fn insert_link(&self, cell: CellId, spawnpoint_id: &str) -> Result<bool, String> {
        let conn = lock_unpoisoned(&self.conn);
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO cell_spawnpoints (cell_id, spawnpoint_id) VALUES (?1, ?2)",
                params![cell as i64, spawnpoint_id],
            )
            .map_err(|e| format!("insert link failed: {e}"))?;
        Ok(inserted > 0)
    }

    pub(super) fn sightings_for(&self, spawnpoint_id: &str) -> Result<Vec<Sighting>, String> {
        let conn = lock_unpoisoned(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT spawnpoint_id, encounter_id, scan_time, exact_hidden_time
                 FROM sightings WHERE spawnpoint_id = ?1 ORDER BY scan_time, id",
            )
            .map_err(|e| format!("history prepare failed: {e}"))?;
        let rows = stmt
            .query_map(params![spawnpoint_id], |row| {
                Ok(Sighting {
                    spawnpoint_id: row.get(0)?,
                    encounter_id: row.get::<_, i64>(1)? as u64,
                    scan_time: row.get(2)?,
                    exact_hidden_time: row.get::<_, Option<i64>>(3)?.map(|secs| secs as u32),
                })
            })
            .map_err(|e| format!("history query failed: {e}"))?;
        rows.collect::<Result<_, _>>()
            .map_err(|e| format!("history row failed: {e}"))
    }

    pub(super) fn insert_sighting(&self, sighting: &Sighting) -> Result<(), String> {
        let conn = lock_unpoisoned(&self.conn);
        conn.execute(
            "INSERT INTO sightings (spawnpoint_id, encounter_id, scan_time, exact_hidden_time)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                sighting.spawnpoint_id,
                sighting.encounter_id as i64,
                sighting.scan_time,
                sighting.exact_hidden_time,
            ],
        )
        .map_err(|e| format!("insert sighting failed: {e}"))?;
        Ok(())
    }

    /// Inserts or replaces each target. Returns how many rows were written.
    pub(crate) fn upsert_targets(&self, targets: &[TargetRecord]) -> Result<usize, String> {
        let mut conn = lock_unpoisoned(&self.conn);
        let tx = conn
            .transaction()
            .map_err(|e| format!("upsert_targets begin failed: {e}"))?;
        let mut written = 0;
        for target in targets {
            written += tx
                .execute(
                    "INSERT INTO targets (id, kind, lat, lon, last_scanned, engaged)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                        kind = excluded.kind,
                        lat = excluded.lat,
                        lon = excluded.lon,
                        last_scanned = COALESCE(excluded.last_scanned, targets.last_scanned),
                        engaged = excluded.engaged",
                    params![
                        target.id,
                        target.kind.as_str(),
                        target.lat,
                        target.lon,
                        target.last_scanned,
                        target.engaged,
                    ],
                )
                .map_err(|e| format!("upsert target {} failed: {e}", target.id))?;
        }
        tx.commit()
            .map_err(|e| format!("upsert_targets commit failed: {e}"))?;
        Ok(written)
    }

    pub(super) fn spawn_candidates(&self, query: &CandidateQuery) -> Result<Vec<Candidate>, String> {
        let conn = lock_unpoisoned(&self.conn);
        // Without an exact boundary: bounds differ, or both still hold the 0/0 sentinel.
        let mut stmt = conn
            .prepare(
                "SELECT id, lat, lon, last_scanned FROM spawnpoints
                 WHERE missed_count <= ?1
                   AND lat BETWEEN ?2 AND ?3 AND lon BETWEEN ?4 AND ?5
                   AND (?6 IS NULL OR last_scanned IS NULL OR last_scanned < ?6)
                   AND (?7 = 0 OR latest_seen != earliest_unseen
                        OR (latest_seen = 0 AND earliest_unseen = 0))",
            )
            .map_err(|e| format!("spawn candidates prepare failed: {e}"))?;
        let bbox = &query.bbox;
        let rows = stmt
            .query_map(
                params![
                    MISSED_COUNT_LIMIT,
                    bbox.min_lat,
                    bbox.max_lat,
                    bbox.min_lon,
                    bbox.max_lon,
                    query.scanned_before,
                    query.chase_only,
                ],
                read_candidate_row,
            )
            .map_err(|e| format!("spawn candidates query failed: {e}"))?;
        rows.collect::<Result<_, _>>()
            .map_err(|e| format!("spawn candidates row failed: {e}"))
    }

    pub(super) fn target_candidates(&self, query: &CandidateQuery) -> Result<Vec<Candidate>, String> {
        let conn = lock_unpoisoned(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT id, lat, lon, last_scanned FROM targets
                 WHERE kind = ?1
                   AND lat BETWEEN ?2 AND ?3 AND lon BETWEEN ?4 AND ?5
                   AND (?6 IS NULL OR last_scanned IS NULL OR last_scanned < ?6)
                   AND (?7 = 0 OR engaged = 0)",
            )
            .map_err(|e| format!("target candidates prepare failed: {e}"))?;
        let bbox = &query.bbox;
        let rows = stmt
            .query_map(
                params![
                    query.kind.as_str(),
                    bbox.min_lat,
                    bbox.max_lat,
                    bbox.min_lon,
                    bbox.max_lon,
                    query.scanned_before,
                    query.chase_only,
                ],
                read_candidate_row,
            )
            .map_err(|e| format!("target candidates query failed: {e}"))?;
        rows.collect::<Result<_, _>>()
            .map_err(|e| format!("target candidates row failed: {e}"))
    }

    #[cfg(test)]
    pub(crate) fn link_count(&self) -> Result<usize, String> {
        let conn = lock_unpoisoned(&self.conn);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM cell_spawnpoints", [], |row| row.get(0))
            .map_err(|e| format!("link_count failed: {e}"))?;
        Ok(count as usize)
    }
}

const SPAWNPOINT_COLUMNS: &str =
    "id, lat, lon, kind, links, latest_seen, earliest_unseen, missed_count, last_scanned";

struct RawCellRow {
    id: i64,
    center_lat: f64,
    center_lon: f64,
    bands: String,
    midpoint: i64,
    width: i64,
    done: bool,
    last_modified: Option<i64>,
}

struct RawSpawnRow {
    id: String,
    lat: f64,
    lon: f64,
    kind: String,
    links: String,
    latest_seen: i64,
    earliest_unseen: i64,
    missed_count: i64,
    last_scanned: Option<i64>,
}

fn read_spawnpoint_row(row: &Row<'_>) -> rusqlite::Result<RawSpawnRow> {
    Ok(RawSpawnRow {
        id: row.get(0)?,
        lat: row.get(1)?,
        lon: row.get(2)?,
        kind: row.get(3)?,
        links: row.get(4)?,
        latest_seen: row.get(5)?,
        earliest_unseen: row.get(6)?,
        missed_count: row.get(7)?,
        last_scanned: row.get(8)?,
    })
}

fn read_candidate_row(row: &Row<'_>) -> rusqlite::Result<Candidate> {
    Ok(Candidate {
        id: row.get(0)?,
        location: LatLon::new(row.get(1)?, row.get(2)?),
        last_scanned: row.get(3)?,
    })
}

fn row_to_cell(r: RawCellRow) -> Result<CellBands, String> {
    let bands = serde_json::from_str(&r.bands)
        .map_err(|e| format!("bad bands in db for cell {}: {e}", r.id))?;
    Ok(CellBands {
        id: r.id as CellId,
        center: LatLon::new(r.center_lat, r.center_lon),
        bands,
        midpoint: r.midpoint,
        width: r.width,
        done: r.done,
        last_modified: r.last_modified,
    })
}

fn row_to_spawnpoint(r: RawSpawnRow) -> Result<SpawnPoint, String> {
    let kind = r
        .kind
        .parse()
        .map_err(|e| format!("bad kind in db for spawnpoint {}: {e}", r.id))?;
    let links = r
        .links
        .parse()
        .map_err(|e| format!("bad links in db for spawnpoint {}: {e}", r.id))?;
    Ok(SpawnPoint {
        location: LatLon::new(r.lat, r.lon),
        kind,
        links,
        latest_seen: r.latest_seen as u32,
        earliest_unseen: r.earliest_unseen as u32,
        missed_count: r.missed_count as u32,
        last_scanned: r.last_scanned,
        id: r.id,
    })
}
