use std::sync::Arc;

use ambulink_core::channel::{ClientMessage, HubMessage};
use ambulink_core::models::RecordSubmission;
use ambulink_core::{Alert, AlertId, RoomId, Vitals};
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::audit::{AuditAction, AuditEntry, AuditLog, AUDIT_CAPACITY};
use crate::auth::{extract_bearer_token, ApiTokenVerifier};
use crate::config::HubConfig;
use crate::dispatch::{AckOutcome, DispatchRouter, IntakeOutcome};
use crate::error::AppError;
use crate::intake::build_alert;
use crate::rate_limit::{
    unit_fingerprint, EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HubConfig>,
    token_verifier: Arc<ApiTokenVerifier>,
    dispatch: Arc<DispatchRouter>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
    audit: AuditLog,
}

impl AppState {
    pub fn from_config(config: Arc<HubConfig>) -> Self {
        Self {
            token_verifier: Arc::new(ApiTokenVerifier::new(config.api_token.clone())),
            dispatch: Arc::new(DispatchRouter::new(config.room_channel_capacity)),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            audit: AuditLog::default(),
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/records", post(submit_record))
        .route("/alerts/{alert_id}/vitals", put(update_vitals))
        .route("/alerts/{alert_id}/acknowledge", post(acknowledge_alert))
        .route("/rooms/{room_id}/alerts", get(room_alerts))
        .route("/audit", get(audit_entries))
        .route("/ws", get(channel_socket))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
    rooms: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
        rooms: state.dispatch.room_count().await,
    })
}

async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    state.token_verifier.verify(token)?;
    Ok(next.run(request).await)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IntakeResponse {
    status: &'static str,
    alert_id: AlertId,
}

async fn submit_record(
    State(state): State<AppState>,
    Json(submission): Json<RecordSubmission>,
) -> Result<(StatusCode, Json<IntakeResponse>), AppError> {
    let unit_id = submission
        .payload
        .ambulance_id
        .as_deref()
        .unwrap_or("unassigned");
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::RecordIntake, unit_id)
        .await?;

    let alert = build_alert(
        &submission,
        state.config.default_eta,
        Utc::now().timestamp_millis(),
    )?;
    let outcome = state.dispatch.intake(submission.record_id, alert).await;
    let actor = submission.payload.ambulance_id.clone();

    let response = match outcome {
        IntakeOutcome::Created(alert) => {
            tracing::info!(
                endpoint = "record_intake",
                unit = unit_fingerprint(unit_id),
                record_id = %submission.record_id,
                alert_id = %alert.alert_id,
                "Accepted field record"
            );
            state
                .audit
                .record(AuditEntry {
                    at: Utc::now().timestamp_millis(),
                    action: AuditAction::RecordIntake,
                    alert_id: alert.alert_id.clone(),
                    room_id: alert.room_id.clone(),
                    actor,
                    detail: format!(
                        "created {} for record {}",
                        alert.severity, submission.record_id
                    ),
                })
                .await;
            (
                StatusCode::CREATED,
                Json(IntakeResponse {
                    status: "created",
                    alert_id: alert.alert_id,
                }),
            )
        }
        IntakeOutcome::AlreadyExisted(alert_id) => {
            tracing::info!(
                endpoint = "record_intake",
                unit = unit_fingerprint(unit_id),
                record_id = %submission.record_id,
                %alert_id,
                "Duplicate field record"
            );
            state
                .audit
                .record(AuditEntry {
                    at: Utc::now().timestamp_millis(),
                    action: AuditAction::RecordIntake,
                    alert_id: alert_id.clone(),
                    room_id: submission.payload.room_id.clone(),
                    actor,
                    detail: format!("duplicate record {}", submission.record_id),
                })
                .await;
            (
                StatusCode::OK,
                Json(IntakeResponse {
                    status: "already_exists",
                    alert_id,
                }),
            )
        }
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VitalsUpdateRequest {
    #[serde(default)]
    ambulance_id: Option<String>,
    vitals: Vitals,
}

async fn update_vitals(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
    Json(request): Json<VitalsUpdateRequest>,
) -> Result<Json<Alert>, AppError> {
    let alert_id = AlertId::from(alert_id);
    let unit_id = request
        .ambulance_id
        .as_deref()
        .unwrap_or_else(|| alert_id.as_str());
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::VitalsUpdate, unit_id)
        .await?;

    let alert = state
        .dispatch
        .update_vitals(&alert_id, &request.vitals)
        .await
        .ok_or_else(|| AppError::not_found(format!("alert {alert_id}")))?;
    tracing::info!(
        endpoint = "vitals_update",
        %alert_id,
        severity = %alert.severity,
        "Refreshed alert vitals"
    );
    state
        .audit
        .record(AuditEntry {
            at: Utc::now().timestamp_millis(),
            action: AuditAction::VitalsUpdate,
            alert_id: alert.alert_id.clone(),
            room_id: alert.room_id.clone(),
            actor: request.ambulance_id,
            detail: format!("severity {}", alert.severity),
        })
        .await;
    Ok(Json(alert))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest {
    #[serde(default)]
    acknowledged_by: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeResponse {
    alert_id: AlertId,
    /// False when the alert was already acknowledged
    changed: bool,
    acknowledged_by: Option<String>,
    acknowledged_at: Option<i64>,
}

/// The body is optional; an empty one acknowledges anonymously.
async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
    body: Bytes,
) -> Result<Json<AcknowledgeResponse>, AppError> {
    let alert_id = AlertId::from(alert_id);
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        AcknowledgeRequest::default()
    } else {
        serde_json::from_slice::<AcknowledgeRequest>(&body)
            .map_err(|error| {
                AppError::bad_request(format!("invalid acknowledge body: {error}"))
            })?
    };
    let outcome = acknowledge_and_audit(
        &state.dispatch,
        &state.audit,
        &alert_id,
        request.acknowledged_by,
    )
    .await
    .ok_or_else(|| AppError::not_found(format!("alert {alert_id}")))?;
    Ok(Json(AcknowledgeResponse {
        alert_id,
        changed: outcome.changed,
        acknowledged_by: outcome.alert.acknowledged_by,
        acknowledged_at: outcome.alert.acknowledged_at,
    }))
}

/// Shared by the HTTP route and the channel's `acknowledge` event.
async fn acknowledge_and_audit(
    dispatch: &DispatchRouter,
    audit: &AuditLog,
    alert_id: &AlertId,
    acknowledged_by: Option<String>,
) -> Option<AckOutcome> {
    let outcome = dispatch.acknowledge(alert_id, acknowledged_by.clone()).await?;
    audit
        .record(AuditEntry {
            at: Utc::now().timestamp_millis(),
            action: AuditAction::Acknowledge,
            alert_id: alert_id.clone(),
            room_id: outcome.alert.room_id.clone(),
            actor: acknowledged_by,
            detail: if outcome.changed {
                "acknowledged".to_string()
            } else {
                "already acknowledged".to_string()
            },
        })
        .await;
    Some(outcome)
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn audit_entries(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<AuditEntry>> {
    let limit = query.limit.unwrap_or(100).min(AUDIT_CAPACITY);
    Json(state.audit.recent(limit).await)
}

async fn room_alerts(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<Alert>>, AppError> {
    let room_id = RoomId::new(room_id);
    if room_id.is_empty() {
        return Err(AppError::bad_request("room id must not be empty"));
    }
    Ok(Json(state.dispatch.room_alerts(&room_id).await))
}

async fn channel_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_channel_socket(socket, state.dispatch, state.audit))
}

/// One viewer connection. A viewer is in at most one room at a time; joining
/// another room replaces the subscription.
async fn handle_channel_socket(
    socket: WebSocket,
    dispatch: Arc<DispatchRouter>,
    audit: AuditLog,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut room: Option<(RoomId, broadcast::Receiver<HubMessage>)> = None;

    loop {
        let outgoing = tokio::select! {
            incoming = receiver.next() => {
                let Some(Ok(message)) = incoming else {
                    break;
                };
                match message {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(command) => {
                                handle_client_message(command, &dispatch, &audit, &mut room).await
                            }
                            Err(error) => {
                                tracing::warn!(%error, "Ignoring malformed channel frame");
                                None
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => None,
                }
            }
            event = recv_room_event(&mut room) => match event {
                Ok(event) => Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Channel viewer lagged behind; resending snapshot");
                    match &room {
                        Some((room_id, _)) => Some(HubMessage::Snapshot {
                            room_id: room_id.clone(),
                            alerts: dispatch.snapshot(room_id).await,
                        }),
                        None => None,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    room = None;
                    None
                }
            },
        };

        let Some(outgoing) = outgoing else {
            continue;
        };
        let payload = match serde_json::to_string(&outgoing) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "failed to serialize channel message");
                continue;
            }
        };
        if sender.send(Message::Text(payload.into())).await.is_err() {
            break;
        }
    }
}

async fn handle_client_message(
    command: ClientMessage,
    dispatch: &DispatchRouter,
    audit: &AuditLog,
    room: &mut Option<(RoomId, broadcast::Receiver<HubMessage>)>,
) -> Option<HubMessage> {
    match command {
        ClientMessage::JoinRoom { room_id } => {
            if room_id.is_empty() {
                return None;
            }
            let (alerts, receiver) = dispatch.subscribe(&room_id).await;
            tracing::debug!(%room_id, alerts = alerts.len(), "Viewer joined room");
            *room = Some((room_id.clone(), receiver));
            Some(HubMessage::Snapshot { room_id, alerts })
        }
        ClientMessage::LeaveRoom { room_id } => {
            if room.as_ref().is_some_and(|(current, _)| *current == room_id) {
                *room = None;
                tracing::debug!(%room_id, "Viewer left room");
            }
            None
        }
        ClientMessage::Acknowledge {
            alert_id,
            acknowledged_by,
        } => {
            // The acknowledgment comes back to every viewer as a room event
            if acknowledge_and_audit(dispatch, audit, &alert_id, acknowledged_by)
                .await
                .is_none()
            {
                tracing::debug!(%alert_id, "Acknowledge for unknown alert");
            }
            None
        }
    }
}

async fn recv_room_event(
    room: &mut Option<(RoomId, broadcast::Receiver<HubMessage>)>,
) -> Result<HubMessage, broadcast::error::RecvError> {
    match room {
        Some((_, receiver)) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ambulink_core::{FieldRecord, RecordPayload};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    const TOKEN: &str = "hub-test-token";

    fn test_router() -> Router {
        let config = HubConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            api_token: TOKEN.to_string(),
            default_eta: Duration::from_secs(15 * 60),
            room_channel_capacity: 16,
            rate_limit_window: Duration::from_secs(60),
            record_rate_limit_per_window: 100,
        };
        app_router(AppState::from_config(Arc::new(config)))
    }

    fn authed(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn submission_json(room: &str, complaint: &str) -> Value {
        let record = FieldRecord::new(RecordPayload::new(room, complaint));
        serde_json::to_value(record.submission()).unwrap()
    }

    #[tokio::test]
    async fn healthz_is_public() {
        let response = test_router()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn v1_routes_require_matching_token() {
        let router = test_router();

        let missing = router
            .clone()
            .oneshot(
                Request::get("/v1/rooms/7/alerts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = router
            .oneshot(
                Request::get("/v1/rooms/7/alerts")
                    .header(header::AUTHORIZATION, "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn duplicate_record_creates_one_alert() {
        let router = test_router();
        let body = submission_json("7", "fall from ladder");

        let first = router
            .clone()
            .oneshot(authed(Method::POST, "/v1/records", Some(body.clone())))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let first = json_body(first).await;
        assert_eq!(first["status"], "created");

        let second = router
            .clone()
            .oneshot(authed(Method::POST, "/v1/records", Some(body)))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        let second = json_body(second).await;
        assert_eq!(second["status"], "already_exists");
        assert_eq!(second["alertId"], first["alertId"]);

        let listing = router
            .oneshot(authed(Method::GET, "/v1/rooms/7/alerts", None))
            .await
            .unwrap();
        let alerts = json_body(listing).await;
        assert_eq!(alerts.as_array().map(Vec::len), Some(1));
        assert_eq!(
            alerts[0]["message"],
            "Incoming patient: Unknown - fall from ladder"
        );
    }

    #[tokio::test]
    async fn empty_room_is_rejected_as_unprocessable() {
        let response = test_router()
            .oneshot(authed(
                Method::POST,
                "/v1/records",
                Some(submission_json("", "fall")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn acknowledge_removes_alert_from_listing() {
        let router = test_router();
        let created = router
            .clone()
            .oneshot(authed(
                Method::POST,
                "/v1/records",
                Some(submission_json("7", "fall")),
            ))
            .await
            .unwrap();
        let alert_id = json_body(created).await["alertId"]
            .as_str()
            .unwrap()
            .to_string();

        let ack = router
            .clone()
            .oneshot(authed(
                Method::POST,
                &format!("/v1/alerts/{alert_id}/acknowledge"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(ack.status(), StatusCode::OK);
        assert_eq!(json_body(ack).await["changed"], true);

        let listing = router
            .clone()
            .oneshot(authed(Method::GET, "/v1/rooms/7/alerts", None))
            .await
            .unwrap();
        assert_eq!(json_body(listing).await, Value::Array(Vec::new()));

        let unknown = router
            .oneshot(authed(Method::POST, "/v1/alerts/ALR-missing/acknowledge", None))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn vitals_update_returns_reclassified_alert() {
        let router = test_router();
        let created = router
            .clone()
            .oneshot(authed(
                Method::POST,
                "/v1/records",
                Some(submission_json("7", "fall")),
            ))
            .await
            .unwrap();
        let alert_id = json_body(created).await["alertId"]
            .as_str()
            .unwrap()
            .to_string();

        let response = router
            .oneshot(authed(
                Method::PUT,
                &format!("/v1/alerts/{alert_id}/vitals"),
                Some(serde_json::json!({"vitals": {"oxygenSaturation": 80.0}})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let alert = json_body(response).await;
        assert_eq!(alert["severity"], "ESI-1");
        assert_eq!(alert["vitals"]["oxygenSaturation"], 80.0);
    }

    async fn create_alert(router: &Router, room: &str, complaint: &str) -> String {
        let created = router
            .clone()
            .oneshot(authed(
                Method::POST,
                "/v1/records",
                Some(submission_json(room, complaint)),
            ))
            .await
            .unwrap();
        json_body(created).await["alertId"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn acknowledge_records_first_author_and_time() {
        let router = test_router();
        let alert_id = create_alert(&router, "7", "fall").await;

        let first = router
            .clone()
            .oneshot(authed(
                Method::POST,
                &format!("/v1/alerts/{alert_id}/acknowledge"),
                Some(serde_json::json!({"acknowledgedBy": "charge-nurse"})),
            ))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first = json_body(first).await;
        assert_eq!(first["changed"], true);
        assert_eq!(first["acknowledgedBy"], "charge-nurse");
        assert!(first["acknowledgedAt"].is_i64());

        let repeat = router
            .oneshot(authed(
                Method::POST,
                &format!("/v1/alerts/{alert_id}/acknowledge"),
                Some(serde_json::json!({"acknowledgedBy": "someone-else"})),
            ))
            .await
            .unwrap();
        let repeat = json_body(repeat).await;
        assert_eq!(repeat["changed"], false);
        assert_eq!(repeat["acknowledgedBy"], "charge-nurse");
        assert_eq!(repeat["acknowledgedAt"], first["acknowledgedAt"]);
    }

    #[tokio::test]
    async fn audit_lists_mutations_newest_first() {
        let router = test_router();
        let alert_id = create_alert(&router, "7", "fall").await;

        router
            .clone()
            .oneshot(authed(
                Method::PUT,
                &format!("/v1/alerts/{alert_id}/vitals"),
                Some(serde_json::json!({"ambulanceId": "unit-12", "vitals": {"heartRate": 130.0}})),
            ))
            .await
            .unwrap();
        router
            .clone()
            .oneshot(authed(
                Method::POST,
                &format!("/v1/alerts/{alert_id}/acknowledge"),
                None,
            ))
            .await
            .unwrap();

        let response = router
            .oneshot(authed(Method::GET, "/v1/audit?limit=10", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let entries = json_body(response).await;
        let actions: Vec<&str> = entries
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["action"].as_str().unwrap())
            .collect();
        assert_eq!(actions, vec!["acknowledge", "vitals_update", "record_intake"]);
        assert_eq!(entries[1]["actor"], "unit-12");
        assert_eq!(entries[0]["alertId"], alert_id.as_str());
    }
}
