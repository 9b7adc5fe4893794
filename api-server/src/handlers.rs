use std::collections::HashMap;

use actix_web::{
    web::{Data, Json, Path, Query},
    HttpRequest, HttpResponse, Responder,
};
use scout_core::{CellId, LatLon, ObservationBatch, TargetKind};

use crate::auth::require_api_key;
use crate::config::AppState;
use crate::now_unix_s;
use crate::params::{self, RawParams};
use crate::response::{bad_request, not_found, persistence_unavailable, source_unavailable};
use crate::types::{
    BboxQuery, CellResponse, CheckInResponse, ClaimCount, ClientListResponse, ClientView,
    EventsQuery, EventsResponse, HealthResponse, JumpRequest, JumpResponse, ObservationResponse,
    SpawnPointListResponse, SpawnPointView, TargetUpsertRequest, TargetUpsertResponse,
};

const DEFAULT_EVENTS_LIMIT: usize = 100;

pub(crate) async fn health(state: Data<AppState>) -> impl Responder {
    let store = match state.store.counts() {
        Ok(counts) => counts,
        Err(e) => return persistence_unavailable("health", e),
    };

    let now = now_unix_s();
    let clients = state.scheduler.clients().snapshots();
    let active_clients = clients.iter().filter(|c| c.is_active(now)).count();
    let claims = state
        .scheduler
        .claims()
        .counts()
        .into_iter()
        .map(|(scope, claimed)| ClaimCount { scope, claimed })
        .collect();

    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        service: "scout-api",
        clients: clients.len(),
        active_clients,
        store,
        events_buffered: state.events.len(),
        claims,
        auth_required: state.api_key.is_some(),
    })
}

pub(crate) async fn checkin_json(state: Data<AppState>, body: Json<RawParams>) -> impl Responder {
    check_in(&state, &body, None)
}

pub(crate) async fn checkin_query(
    state: Data<AppState>,
    path: Path<String>,
    query: Query<HashMap<String, String>>,
) -> impl Responder {
    let raw = params::from_query(query.into_inner());
    check_in(&state, &raw, Some(path.as_str()))
}

fn check_in(state: &AppState, raw: &RawParams, path_mode: Option<&str>) -> HttpResponse {
    let request = match params::check_in(raw, path_mode, &state.mode_defaults) {
        Ok(request) => request,
        Err(e) => return bad_request(e.to_string(), e.code()),
    };

    let now = now_unix_s();
    let assignment = match state.scheduler.check_in(&request, now) {
        Ok(assignment) => assignment,
        Err(e) => return source_unavailable(&e),
    };
    persist_client(state, &request.client_id, now, false);

    HttpResponse::Ok().json(CheckInResponse {
        success: true,
        next_lat: assignment.next.lat,
        next_lon: assignment.next.lon,
        step: assignment.step,
    })
}

pub(crate) async fn jump(state: Data<AppState>, body: Json<JumpRequest>) -> impl Responder {
    let JumpRequest {
        uuid,
        latitude,
        longitude,
    } = body.into_inner();
    if uuid.trim().is_empty() {
        return bad_request("uuid (client id) is required", "missing_client_id");
    }
    if !latitude.is_finite() || !longitude.is_finite() {
        return bad_request("latitude and longitude must be finite", "invalid_position");
    }

    let now = now_unix_s();
    let to = match state.scheduler.jump(&uuid, LatLon::new(latitude, longitude), now) {
        Ok(to) => to,
        Err(e) => return source_unavailable(&e),
    };
    tracing::info!(client_id = %uuid, lat = to.lat, lon = to.lon, "client jumped");
    persist_client(&state, &uuid, now, true);

    HttpResponse::Ok().json(JumpResponse {
        success: true,
        client_id: uuid,
        lat: to.lat,
        lon: to.lon,
    })
}

/// Snapshot failures never fail the request; the in-memory state is current.
fn persist_client(state: &AppState, client_id: &str, now: i64, force: bool) {
    if !state.persist_clients {
        return;
    }
    let Some(snapshot) = state.scheduler.clients().snapshot(client_id) else {
        return;
    };
    if let Err(e) = state.store.save_client(&snapshot, now, force) {
        tracing::warn!(client_id = %client_id, "failed to persist client snapshot: {e}");
    }
}

pub(crate) async fn list_clients(state: Data<AppState>) -> impl Responder {
    let now = now_unix_s();
    let clients = state
        .scheduler
        .clients()
        .snapshots()
        .iter()
        .map(|client| ClientView::new(client, now))
        .collect();
    HttpResponse::Ok().json(ClientListResponse {
        success: true,
        clients,
    })
}

pub(crate) async fn get_client(state: Data<AppState>, path: Path<String>) -> impl Responder {
    let id = path.into_inner();
    match state.scheduler.clients().snapshot(&id) {
        Some(client) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "client": ClientView::new(&client, now_unix_s()),
            "route": client.route,
        })),
        None => not_found(format!("client not found: {id}"), "client_not_found"),
    }
}

pub(crate) async fn post_observations(
    req: HttpRequest,
    state: Data<AppState>,
    body: Json<ObservationBatch>,
) -> impl Responder {
    if let Err(resp) = require_api_key(&req, state.api_key.as_deref()) {
        return resp;
    }

    let batch = body.into_inner();
    if !batch.cell.lat.is_finite() || !batch.cell.lon.is_finite() {
        return bad_request("cell coordinates must be finite", "invalid_position");
    }

    let summary = match state
        .ingestor
        .ingest(state.store.as_ref(), state.events.as_ref(), &batch)
    {
        Ok(summary) => summary,
        Err(e) => return source_unavailable(&e),
    };

    let feedback_recorded = match batch.client_id.as_deref() {
        Some(client_id) if !batch.feedback.is_empty() => state
            .scheduler
            .clients()
            .record_feedback(client_id, &batch.feedback, batch.scan_time),
        _ => false,
    };

    if summary.events > 0 {
        tracing::info!(
            cell_id = summary.cell_id,
            sightings = summary.sightings,
            classified = summary.classified,
            missed = summary.missed,
            "observations ingested"
        );
    }

    HttpResponse::Ok().json(ObservationResponse {
        success: true,
        summary,
        feedback_recorded,
    })
}

pub(crate) async fn post_targets(
    req: HttpRequest,
    state: Data<AppState>,
    body: Json<TargetUpsertRequest>,
) -> impl Responder {
    if let Err(resp) = require_api_key(&req, state.api_key.as_deref()) {
        return resp;
    }

    let TargetUpsertRequest { targets } = body.into_inner();
    for target in &targets {
        if target.id.trim().is_empty() {
            return bad_request("target id must not be empty", "invalid_target");
        }
        if target.kind == TargetKind::Spawn {
            return bad_request(
                format!("spawn points are fed through observations, not targets: {}", target.id),
                "invalid_target",
            );
        }
        if !target.lat.is_finite() || !target.lon.is_finite() {
            return bad_request(
                format!("target coordinates must be finite: {}", target.id),
                "invalid_target",
            );
        }
    }

    match state.store.upsert_targets(&targets) {
        Ok(upserted) => HttpResponse::Ok().json(TargetUpsertResponse {
            success: true,
            upserted,
        }),
        Err(e) => persistence_unavailable("upsert_targets", e),
    }
}

pub(crate) async fn get_cell(state: Data<AppState>, path: Path<CellId>) -> impl Responder {
    let id = path.into_inner();
    match state.store.cell_state(id) {
        Ok(Some(cell)) => {
            let next_window = cell.next_window(now_unix_s());
            HttpResponse::Ok().json(CellResponse {
                success: true,
                cell,
                next_window,
            })
        }
        Ok(None) => not_found(format!("cell not found: {id}"), "cell_not_found"),
        Err(e) => persistence_unavailable("cell", e),
    }
}

pub(crate) async fn list_spawnpoints(
    state: Data<AppState>,
    query: Query<BboxQuery>,
) -> impl Responder {
    let bbox = match query.into_inner().to_bbox() {
        Ok(bbox) => bbox,
        Err(e) => return bad_request(e, "invalid_bbox"),
    };

    let now = now_unix_s();
    match state.store.spawnpoints_in(&bbox) {
        Ok(spawnpoints) => HttpResponse::Ok().json(SpawnPointListResponse {
            success: true,
            spawnpoints: spawnpoints
                .into_iter()
                .map(|sp| SpawnPointView::new(sp, now, state.spawn_delay_secs))
                .collect(),
        }),
        Err(e) => persistence_unavailable("spawnpoints", e),
    }
}

pub(crate) async fn events(state: Data<AppState>, query: Query<EventsQuery>) -> impl Responder {
    let limit = query.limit.unwrap_or(DEFAULT_EVENTS_LIMIT);
    HttpResponse::Ok().json(EventsResponse {
        success: true,
        events: state.events.recent(limit),
    })
}
