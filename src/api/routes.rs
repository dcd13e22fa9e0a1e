//! API route handlers

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::alerter::NotificationRecord;
use crate::alerts::{AlertFilter, AlertInteraction, AlertStats, ManualAlertRequest};
use crate::analyzer::rules::AlertRule;
use crate::dashboard::DashboardSummary;
use crate::error::AlertError;
use crate::export::{self, ExportFormat};
use crate::service::{DetectionReport, InitializeOutcome, Preferences, SimulateRequest, SimulationOutcome};
use crate::types::{Alert, SensorReading};
use super::{ApiError, AppState, JsonBody};

const DEFAULT_LIST_LIMIT: usize = 100;

pub async fn simulate(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<SimulateRequest>,
) -> Json<SimulationOutcome> {
    Json(state.service.simulate(request).await)
}

pub async fn dashboard_summary(State(state): State<AppState>) -> Json<DashboardSummary> {
    Json(state.service.summary())
}

pub async fn ai_insights(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "insights": state.service.insights().await }))
}

pub async fn initialize(
    State(state): State<AppState>,
    JsonBody(preferences): JsonBody<Preferences>,
) -> Json<InitializeOutcome> {
    Json(state.service.initialize(preferences).await)
}

/// Query parameters for `GET /api/alerts`
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub severity: Option<String>,
    #[serde(rename = "type")]
    pub alert_type: Option<String>,
    pub limit: Option<usize>,
}

fn parse_opt<T: std::str::FromStr<Err = String>>(value: Option<&str>) -> Result<Option<T>, ApiError> {
    value
        .filter(|v| !v.is_empty())
        .map(str::parse)
        .transpose()
        .map_err(ApiError::BadRequest)
}

impl ListQuery {
    fn filter(&self) -> Result<AlertFilter, ApiError> {
        Ok(AlertFilter {
            status: parse_opt(self.status.as_deref())?,
            severity: parse_opt(self.severity.as_deref())?,
            alert_type: parse_opt(self.alert_type.as_deref())?,
            limit: Some(self.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
        })
    }
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    Ok(Json(state.service.alerts().list(&query.filter()?)))
}

pub async fn create_alert(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<ManualAlertRequest>,
) -> Result<(StatusCode, Json<Alert>), ApiError> {
    let alert = state.service.create_manual_alert(request).await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

pub async fn alert_stats(State(state): State<AppState>) -> Json<AlertStats> {
    Json(state.service.alerts().stats())
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

pub async fn export_alerts(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format: ExportFormat = query.format.as_deref().unwrap_or("csv").parse()?;
    let doc = export::export(&state.service.alerts().all(), format)?;
    Ok((
        [
            (header::CONTENT_TYPE, doc.content_type.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", doc.filename)),
        ],
        doc.body,
    )
        .into_response())
}

pub async fn list_rules(State(state): State<AppState>) -> Json<Vec<AlertRule>> {
    Json(state.service.rules().to_vec())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDetectionRequest {
    #[serde(default)]
    pub sensor_data: Vec<SensorReading>,
}

pub async fn test_detection(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<TestDetectionRequest>,
) -> Json<DetectionReport> {
    Json(state.service.run_detection(&request.sensor_data).await)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewQuery {
    pub user_id: Option<String>,
}

pub async fn get_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ViewQuery>,
) -> Result<Json<Alert>, ApiError> {
    let alerts = state.service.alerts();
    let alert = match query.user_id.as_deref().filter(|u| !u.is_empty()) {
        Some(user) => alerts.view(id, user)?,
        None => alerts.get(id).ok_or(AlertError::NotFound(id))?,
    };
    Ok(Json(alert))
}

/// Body for acknowledge, resolve and dismiss
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRequest {
    pub user_id: Option<String>,
    pub notes: Option<String>,
}

impl LifecycleRequest {
    fn user(&self) -> Result<&str, AlertError> {
        self.user_id
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AlertError::validation("userId is required"))
    }
}

pub async fn acknowledge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(request): JsonBody<LifecycleRequest>,
) -> Result<Json<Alert>, ApiError> {
    let user = request.user()?;
    Ok(Json(state.service.alerts().acknowledge(id, user, request.notes.clone())?))
}

pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(request): JsonBody<LifecycleRequest>,
) -> Result<Json<Alert>, ApiError> {
    let user = request.user()?;
    Ok(Json(state.service.alerts().resolve(id, user, request.notes.clone())?))
}

pub async fn dismiss(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(request): JsonBody<LifecycleRequest>,
) -> Result<Json<Alert>, ApiError> {
    let user = request.user()?;
    Ok(Json(state.service.alerts().dismiss(id, user, request.notes.clone())?))
}

pub async fn add_notes(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(request): JsonBody<LifecycleRequest>,
) -> Result<(StatusCode, Json<AlertInteraction>), ApiError> {
    let user = request.user()?;
    let notes = request
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AlertError::validation("notes are required"))?;
    let interaction = state.service.alerts().add_notes(id, user, notes.to_string())?;
    Ok((StatusCode::CREATED, Json(interaction)))
}

pub async fn interactions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AlertInteraction>>, ApiError> {
    let alerts = state.service.alerts();
    alerts.get(id).ok_or(AlertError::NotFound(id))?;
    Ok(Json(alerts.interactions(id)))
}

pub async fn notifications(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<NotificationRecord>>, ApiError> {
    state.service.alerts().get(id).ok_or(AlertError::NotFound(id))?;
    Ok(Json(state.service.dispatcher().history(id)))
}
