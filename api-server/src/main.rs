mod auth;
mod config;
mod events;
mod handlers;
mod params;
mod response;
mod retention;
mod store;
mod types;

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};

use crate::config::{AppState, ServerConfig};
use crate::handlers::{
    checkin_json, checkin_query, events, get_cell, get_client, health, jump, list_clients,
    list_spawnpoints, post_observations, post_targets,
};
use crate::retention::spawn_retention_task;
use crate::store::ScoutStore;

pub(crate) fn now_unix_s() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/api/checkin", web::post().to(checkin_json))
        .route("/api/checkin/{mode}", web::get().to(checkin_query))
        .route("/api/jump", web::post().to(jump))
        .route("/api/clients", web::get().to(list_clients))
        .route("/api/clients/{id}", web::get().to(get_client))
        .route("/api/observations", web::post().to(post_observations))
        .route("/api/targets", web::post().to(post_targets))
        .route("/api/cells/{id}", web::get().to(get_cell))
        .route("/api/spawnpoints", web::get().to(list_spawnpoints))
        .route("/api/events", web::get().to(events));
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let store = ScoutStore::open(&config.data_dir, config.routes_dir.clone())
        .map_err(std::io::Error::other)?;
    let geofences = config.load_geofences().map_err(std::io::Error::other)?;

    tracing::info!(
        bind_addr = %config.bind_addr,
        data_dir = %config.data_dir.display(),
        included_geofences = geofences.included().len(),
        excluded_geofences = geofences.excluded().len(),
        start_lat = config.start.lat,
        start_lon = config.start.lon,
        spawn_delay_secs = config.spawn_delay_secs,
        retention_hours = config.retention_hours,
        auth_required = config.api_key.is_some(),
        "starting scout coordination api"
    );

    let seed = (now_unix_s() as u32) ^ std::process::id();
    let state = AppState::new(&config, Arc::new(store), geofences, seed);
    spawn_retention_task(state.clone(), config.sweep_interval_secs);

    let json_limit = config.json_limit;
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::JsonConfig::default().limit(json_limit))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .configure(routes)
    })
    .bind(config.bind_addr.as_str())?
    .run()
    .await
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use scout_core::{GeofenceSet, LatLon, ModeParams};
    use tempfile::TempDir;

    use crate::config::{
        AppState, ServerConfig, DEFAULT_EVENT_BUFFER, DEFAULT_JSON_LIMIT_BYTES,
        DEFAULT_RETENTION_HOURS, DEFAULT_SWEEP_INTERVAL_SECS,
    };
    use crate::store::ScoutStore;

    pub(crate) fn test_config(dir: &TempDir) -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            data_dir: dir.path().to_path_buf(),
            routes_dir: Some(dir.path().join("routes")),
            api_key: None,
            start: LatLon::new(0.0, 0.0),
            geofence_file: None,
            geofence_excluded_file: None,
            mode_defaults: ModeParams::default(),
            spawn_delay_secs: 0,
            retention_hours: DEFAULT_RETENTION_HOURS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            json_limit: DEFAULT_JSON_LIMIT_BYTES,
            persist_clients: true,
        }
    }

    pub(crate) fn state_for(config: &ServerConfig) -> AppState {
        let store = ScoutStore::open(&config.data_dir, config.routes_dir.clone()).unwrap();
        AppState::new(config, Arc::new(store), GeofenceSet::default(), 7)
    }

    pub(crate) fn test_state() -> (AppState, TempDir) {
        let dir = TempDir::new().unwrap();
        let state = state_for(&test_config(&dir));
        (state, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{state_for, test_config, test_state};
    use actix_web::{http::StatusCode, test as awtest};
    use scout_core::geo::cell_id;
    use scout_core::LatLon;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn now() -> i64 {
        now_unix_s()
    }

    #[actix_web::test]
    async fn health_reports_counts() {
        let (state, _dir) = test_state();
        let app = awtest::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes),
        )
        .await;

        let req = awtest::TestRequest::get().uri("/health").to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = awtest::read_body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "scout-api");
        assert_eq!(body["spawnpoints"], 0);
        assert_eq!(body["auth_required"], false);
    }

    #[actix_web::test]
    async fn query_check_in_without_position_spirals_from_the_start() {
        let (state, _dir) = test_state();
        let app = awtest::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes),
        )
        .await;

        let req = awtest::TestRequest::get()
            .uri("/api/checkin/scan_loc?uuid=dev-1&latitude=0&longitude=0&stepsize=0.0009")
            .to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = awtest::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["step"], "spiral");
        assert!(body["next_lat"].is_number());
        assert!(body["next_lon"].is_number());
    }

    #[actix_web::test]
    async fn check_in_rejects_unknown_mode_and_missing_id() {
        let (state, _dir) = test_state();
        let app = awtest::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes),
        )
        .await;

        let req = awtest::TestRequest::post()
            .uri("/api/checkin")
            .set_json(json!({ "uuid": "dev-1", "mode": "fly" }))
            .to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = awtest::read_body_json(resp).await;
        assert_eq!(body["error_code"], "invalid_mode");

        let req = awtest::TestRequest::post()
            .uri("/api/checkin")
            .set_json(json!({ "mode": "scan_loc", "latitude": 1.0, "longitude": 2.0 }))
            .to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = awtest::read_body_json(resp).await;
        assert_eq!(body["error_code"], "missing_client_id");
    }

    #[actix_web::test]
    async fn jump_then_check_in_confirms_arrival() {
        let (state, _dir) = test_state();
        let app = awtest::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(routes),
        )
        .await;

        let req = awtest::TestRequest::post()
            .uri("/api/jump")
            .set_json(json!({ "uuid": "dev-2", "latitude": 40.0, "longitude": -3.0 }))
            .to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = awtest::TestRequest::post()
            .uri("/api/checkin")
            .set_json(json!({
                "uuid": "dev-2",
                "mode": "walk_spawnpoint",
                "latitude": "40.0",
                "longitude": "-3.0",
            }))
            .to_request();
        let resp = awtest::call_service(&app, req).await;
        let body: Value = awtest::read_body_json(resp).await;
        assert_eq!(body["step"], "arrival_confirmed");
        assert_eq!(body["next_lat"], 40.0);
        assert_eq!(body["next_lon"], -3.0);

        // The forced snapshot taken on jump is readable straight away.
        let saved = state.store.load_client_state("dev-2").unwrap().unwrap();
        assert_eq!(saved.position, LatLon::new(40.0, -3.0));

        let req = awtest::TestRequest::get().uri("/api/clients/dev-2").to_request();
        let body: Value = awtest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["client"]["mode"], "walk_spawnpoint");
        assert_eq!(body["client"]["active"], true);

        let req = awtest::TestRequest::get().uri("/api/clients/ghost").to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn jumped_clients_survive_a_restart() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let first = awtest::init_service(
            App::new()
                .app_data(web::Data::new(state_for(&config)))
                .configure(routes),
        )
        .await;
        let req = awtest::TestRequest::post()
            .uri("/api/jump")
            .set_json(json!({ "client_id": "dev-4", "latitude": 12.5, "longitude": 8.25 }))
            .to_request();
        let resp = awtest::call_service(&first, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let second = awtest::init_service(
            App::new()
                .app_data(web::Data::new(state_for(&config)))
                .configure(routes),
        )
        .await;
        let req = awtest::TestRequest::get()
            .uri("/api/checkin/scan_loc?uuid=dev-4")
            .to_request();
        let body: Value = awtest::call_and_read_body_json(&second, req).await;
        assert_eq!(body["step"], "arrival_confirmed");
        assert_eq!(body["next_lat"], 12.5);
        assert_eq!(body["next_lon"], 8.25);
    }

    #[actix_web::test]
    async fn observation_feed_requires_the_api_key() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.api_key = Some("secret".to_string());
        let app = awtest::init_service(
            App::new()
                .app_data(web::Data::new(state_for(&config)))
                .configure(routes),
        )
        .await;

        let batch = json!({
            "scan_time": now(),
            "cell": { "lat": 51.0, "lon": 0.0 },
            "sightings": [{
                "spawnpoint_id": "sp-1",
                "encounter_id": 11,
                "location": { "lat": 51.0, "lon": 0.0 },
            }],
        });

        let req = awtest::TestRequest::post()
            .uri("/api/observations")
            .set_json(&batch)
            .to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = awtest::TestRequest::post()
            .uri("/api/observations")
            .insert_header(("x-api-key", "secret"))
            .set_json(&batch)
            .to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = awtest::read_body_json(resp).await;
        assert_eq!(body["sightings"], 1);
        assert_eq!(body["classified"], 1);

        let req = awtest::TestRequest::get().uri("/api/events?limit=5").to_request();
        let body: Value = awtest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["events"][0]["kind"], "spawn_classified");
        assert_eq!(body["events"][0]["spawnpoint_id"], "sp-1");

        let req = awtest::TestRequest::get()
            .uri("/api/spawnpoints?min_lat=50.9&max_lat=51.1&min_lon=-0.1&max_lon=0.1")
            .to_request();
        let body: Value = awtest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["spawnpoints"][0]["id"], "sp-1");
        assert_eq!(body["spawnpoints"][0]["tth_found"], false);

        let id = cell_id(LatLon::new(51.0, 0.0));
        let req = awtest::TestRequest::get()
            .uri(&format!("/api/cells/{id}"))
            .to_request();
        let body: Value = awtest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["cell"]["id"], id);
        assert!(body["next_window"]["start"].is_number());
    }

    #[actix_web::test]
    async fn spawnpoint_listing_rejects_inverted_boxes() {
        let (state, _dir) = test_state();
        let app = awtest::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes),
        )
        .await;

        let req = awtest::TestRequest::get()
            .uri("/api/spawnpoints?min_lat=2&max_lat=1&min_lon=0&max_lon=1")
            .to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn fed_targets_drive_teleport_routes() {
        let (state, _dir) = test_state();
        let app = awtest::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes),
        )
        .await;

        let req = awtest::TestRequest::post()
            .uri("/api/targets")
            .set_json(json!({ "targets": [
                { "id": "gym-1", "kind": "area_control", "lat": 51.0, "lon": 0.01 },
                { "id": "stop-1", "kind": "point_of_interest", "lat": 51.0, "lon": 0.02 },
            ]}))
            .to_request();
        let body: Value = awtest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["upserted"], 2);

        let req = awtest::TestRequest::post()
            .uri("/api/checkin")
            .set_json(json!({
                "uuid": "tele-1",
                "mode": "teleport_gym",
                "latitude": 51.0,
                "longitude": 0.0,
            }))
            .to_request();
        let body: Value = awtest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["step"], "route_built");
        assert_eq!(body["stops"], 1);
        assert_eq!(body["next_lat"], 51.0);
        assert_eq!(body["next_lon"], 0.01);

        let req = awtest::TestRequest::post()
            .uri("/api/targets")
            .set_json(json!({ "targets": [
                { "id": "sp-9", "kind": "spawn", "lat": 51.0, "lon": 0.0 },
            ]}))
            .to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn feedback_in_observations_opens_the_teleport_gate() {
        let (state, _dir) = test_state();
        let app = awtest::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(routes),
        )
        .await;

        let req = awtest::TestRequest::get()
            .uri("/api/checkin/scan_loc?uuid=dev-3&latitude=51&longitude=0")
            .to_request();
        awtest::call_service(&app, req).await;

        let req = awtest::TestRequest::post()
            .uri("/api/observations")
            .set_json(json!({
                "client_id": "dev-3",
                "scan_time": now(),
                "cell": { "lat": 51.0, "lon": 0.0 },
                "feedback": ["area_control"],
            }))
            .to_request();
        let body: Value = awtest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["feedback_recorded"], true);

        let client = state.scheduler.clients().snapshot("dev-3").unwrap();
        assert!(client
            .feedback
            .last_seen(scout_core::FeedbackKind::Structures)
            .is_some());
        assert!(client
            .feedback
            .last_seen(scout_core::FeedbackKind::PointsOfInterest)
            .is_none());
    }
}
