use axum::body::{to_bytes, Body};
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::Value;
use uuid::Uuid;

use microgrid_sentinel::alerts::ManualAlertRequest;
use microgrid_sentinel::api::routes::{self, ExportQuery, LifecycleRequest, ListQuery, TestDetectionRequest, ViewQuery};
use microgrid_sentinel::api::{router, ApiError, AppState, JsonBody};
use microgrid_sentinel::config::Config;
use microgrid_sentinel::generator::{InjectedAnomaly, SimulationMode};
use microgrid_sentinel::service::{MonitorService, Preferences, SimulateRequest};
use microgrid_sentinel::types::{AlertSeverity, AlertStatus, DeviceStatus, SensorReading};

/// Base load high enough that a spike crosses the critical limit at any hour
fn state() -> AppState {
    let mut config = Config::default();
    config.generator.noise = 0.0;
    config.generator.base_consumption_kw = 400.0;
    AppState::new(MonitorService::with_ai_client(config, None).unwrap())
}

async fn error_body(err: ApiError) -> (StatusCode, Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn by(user: &str) -> JsonBody<LifecycleRequest> {
    JsonBody(LifecycleRequest { user_id: Some(user.into()), notes: None })
}

fn post(body: &'static str) -> Request {
    Request::builder()
        .method(Method::POST)
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn spike(state: &AppState) -> Uuid {
    let Json(outcome) = routes::simulate(
        State(state.clone()),
        JsonBody(SimulateRequest {
            mode: SimulationMode::Anomaly,
            anomaly_type: Some(InjectedAnomaly::ConsumptionSpike),
        }),
    )
    .await;
    assert!(outcome.anomaly_detected);
    outcome.alert.map(|a| a.id).unwrap()
}

#[test]
fn router_builds() {
    let _ = router(state());
}

#[tokio::test]
async fn simulate_then_list_and_view() {
    let state = state();
    let id = spike(&state).await;

    let Json(alerts) = routes::list_alerts(State(state.clone()), Query(ListQuery::default()))
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);

    let Json(alert) = routes::get_alert(
        State(state.clone()),
        Path(id),
        Query(ViewQuery { user_id: Some("alice".into()) }),
    )
    .await
    .unwrap();
    assert_eq!(alert.id, id);
    assert_eq!(state.service.alerts().interactions(id).len(), 1);

    let Json(summary) = routes::dashboard_summary(State(state.clone())).await;
    assert_eq!(summary.alerts.len(), 1);
    assert_eq!(summary.anomalies.len(), 1);
}

#[tokio::test]
async fn lifecycle_conflicts_map_to_409() {
    let state = state();
    let id = spike(&state).await;

    let Json(acked) = routes::acknowledge(State(state.clone()), Path(id), by("alice")).await.unwrap();
    assert_eq!(acked.status, AlertStatus::Acknowledged);

    let Json(resolved) = routes::resolve(State(state.clone()), Path(id), by("alice")).await.unwrap();
    assert_eq!(resolved.resolved_by.as_deref(), Some("alice"));

    let err = routes::resolve(State(state.clone()), Path(id), by("alice")).await.unwrap_err();
    let (status, body) = error_body(err).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");

    let err = routes::dismiss(State(state.clone()), Path(id), by("bob")).await.unwrap_err();
    assert_eq!(error_body(err).await.0, StatusCode::CONFLICT);

    let Json(trail) = routes::interactions(State(state.clone()), Path(id)).await.unwrap();
    assert_eq!(trail.len(), 2);
}

#[tokio::test]
async fn unknown_alert_is_404() {
    let state = state();
    let err = routes::acknowledge(State(state.clone()), Path(Uuid::new_v4()), by("alice"))
        .await
        .unwrap_err();
    let (status, body) = error_body(err).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn lifecycle_requires_user() {
    let state = state();
    let id = spike(&state).await;
    let err = routes::acknowledge(State(state.clone()), Path(id), JsonBody(LifecycleRequest::default()))
        .await
        .unwrap_err();
    assert_eq!(error_body(err).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(state.service.alerts().get(id).map(|a| a.status), Some(AlertStatus::Active));
}

#[tokio::test]
async fn invalid_manual_alert_is_rejected_wholesale() {
    let state = state();
    let err = routes::create_alert(
        State(state.clone()),
        JsonBody(ManualAlertRequest {
            title: Some("Smoke in battery room".into()),
            severity: Some("severe".into()),
            ..ManualAlertRequest::default()
        }),
    )
    .await
    .unwrap_err();

    let (status, body) = error_body(err).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
    assert!(body["details"].as_array().map_or(0, Vec::len) >= 3);
    assert!(state.service.alerts().all().is_empty());
}

#[tokio::test]
async fn manual_alert_is_created_and_notified() {
    let state = state();
    let (status, Json(alert)) = routes::create_alert(
        State(state.clone()),
        JsonBody(ManualAlertRequest {
            title: Some("Smoke in battery room".into()),
            description: Some("Operator reports visible smoke".into()),
            alert_type: Some("device_fault".into()),
            severity: Some("critical".into()),
            device_id: Some("bat-2".into()),
            location: Some("battery room".into()),
            created_by: Some("carol".into()),
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);

    let Json(records) = routes::notifications(State(state.clone()), Path(alert.id)).await.unwrap();
    assert!(!records.is_empty());
}

#[tokio::test]
async fn export_formats() {
    let state = state();
    spike(&state).await;

    let response = routes::export_alerts(State(state.clone()), Query(ExportQuery { format: Some("csv".into()) }))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/csv"));
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(String::from_utf8_lossy(&body).lines().count(), 2);

    let response = routes::export_alerts(State(state.clone()), Query(ExportQuery { format: Some("pdf".into()) }))
        .await
        .unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.starts_with(b"%PDF-1.4"));

    let err = routes::export_alerts(State(state.clone()), Query(ExportQuery { format: Some("xlsx".into()) }))
        .await
        .unwrap_err();
    assert_eq!(error_body(err).await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bad_list_filter_is_400() {
    let state = state();
    let err = routes::list_alerts(
        State(state.clone()),
        Query(ListQuery { severity: Some("loud".into()), ..ListQuery::default() }),
    )
    .await
    .unwrap_err();
    assert_eq!(error_body(err).await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_detection_reports_sensor_faults() {
    let state = state();
    routes::initialize(State(state.clone()), JsonBody(Preferences::default())).await;

    let Json(report) = routes::test_detection(
        State(state.clone()),
        JsonBody(TestDetectionRequest {
            sensor_data: vec![SensorReading {
                device_id: "meter-9".into(),
                device_type: "smart_meter".into(),
                status: DeviceStatus::Offline,
                location: None,
            }],
        }),
    )
    .await;

    assert!(report
        .detections
        .iter()
        .any(|d| d.affected_component.as_deref() == Some("meter-9")));
    assert_eq!(report.alerts_created, report.alerts.len());
}

#[tokio::test]
async fn initialize_echoes_preferences_and_insights_fall_back() {
    let state = state();
    let prefs = Preferences {
        user_role: Some("community_manager".into()),
        microgrid_location: Some("Reykjavik".into()),
    };
    let Json(outcome) = routes::initialize(State(state.clone()), JsonBody(prefs.clone())).await;
    assert_eq!(outcome.preferences, prefs);
    assert_eq!(outcome.readings, 24);

    let Json(insights) = routes::ai_insights(State(state.clone())).await;
    let text = insights["insights"].as_str().unwrap_or_default();
    assert!(text.contains("MWh"), "{}", text);

    let Json(rules) = routes::list_rules(State(state)).await;
    assert_eq!(rules.len(), 2);
}

#[tokio::test]
async fn unknown_injection_is_rejected_not_simulated() {
    let state = state();
    let err = JsonBody::<SimulateRequest>::from_request(post(r#"{"type":"anomaly","anomalyType":"meltdown"}"#), &state)
        .await
        .unwrap_err();
    let (status, body) = error_body(err).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
    assert!(state.service.metrics().is_empty());
}

#[tokio::test]
async fn empty_simulate_body_means_a_normal_reading() {
    let state = state();
    let JsonBody(request) = JsonBody::<SimulateRequest>::from_request(post(""), &state).await.unwrap();
    assert_eq!(request.mode, SimulationMode::Normal);
    assert!(request.anomaly_type.is_none());
}

#[tokio::test]
async fn lifecycle_without_body_is_a_json_400() {
    let state = state();
    let id = spike(&state).await;

    let JsonBody(request) = JsonBody::<LifecycleRequest>::from_request(post(""), &state).await.unwrap();
    let err = routes::acknowledge(State(state.clone()), Path(id), JsonBody(request)).await.unwrap_err();
    let (status, body) = error_body(err).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let err = JsonBody::<LifecycleRequest>::from_request(post("userId=alice"), &state)
        .await
        .unwrap_err();
    let (status, body) = error_body(err).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap_or_default().contains("malformed JSON"));
}
