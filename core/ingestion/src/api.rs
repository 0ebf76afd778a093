use axum::{
    async_trait,
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequestParts, Json, Path, Query, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use rapport_schemas::{ContactId, OwnerId, RecordId, TagId, TagKind};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::database::{ContactUpdate, Database, NewContact, RecordEdit};
use crate::error::{CaptureError, DuplicateContact, EmptyName, ReconciliationError};
use crate::pipeline::{CaptureInput, CapturePipeline};
use crate::reconciliation::{audit_consistency, ReconciliationHandler};
use crate::store::Persistence;

const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub store: Arc<dyn Persistence>,
    pub pipeline: Arc<CapturePipeline>,
    pub reconciler: Arc<ReconciliationHandler>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        // Capture
        .route("/capture/text", post(capture_text))
        .route("/capture/audio", post(capture_audio))
        // Records
        .route("/records", get(list_records))
        .route(
            "/records/:id",
            get(get_record).patch(update_record).delete(delete_record),
        )
        .route("/records/:id/reconcile", post(reconcile_record))
        // Contacts
        .route("/contacts", get(list_contacts).post(create_contact))
        .route(
            "/contacts/:id",
            get(get_contact).patch(update_contact).delete(delete_contact),
        )
        .route("/contacts/:id/records", get(contact_records))
        // Tag vocabularies
        .route("/tags/:kind", get(list_tags).post(create_tag))
        .route("/tags/:kind/:id", axum::routing::delete(delete_tag))
        .route("/consistency", get(check_consistency))
        .layer(DefaultBodyLimit::max(MAX_AUDIO_BYTES))
        .with_state(state)
}

/// Capturing user, from the `x-owner-id` header. `x-owner-name` optionally
/// carries their display name so it is never extracted as a person.
pub struct Owner {
    pub id: OwnerId,
    pub name: Option<String>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_value = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let id = header_value("x-owner-id")
            .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "missing x-owner-id header"))?;
        Ok(Owner {
            id: OwnerId(id),
            name: header_value("x-owner-name"),
        })
    }
}

fn api_error(status: StatusCode, message: impl ToString) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

fn internal(e: anyhow::Error) -> ApiError {
    error!("Request failed: {:#}", e);
    if let Some(duplicate) = e.downcast_ref::<DuplicateContact>() {
        return api_error(StatusCode::CONFLICT, duplicate);
    }
    if let Some(empty) = e.downcast_ref::<EmptyName>() {
        return api_error(StatusCode::BAD_REQUEST, empty);
    }
    api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
}

fn not_found(what: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("{} not found", what))
}

impl From<CaptureError> for (StatusCode, Json<Value>) {
    fn from(err: CaptureError) -> Self {
        let message = err.to_string();
        let preserved = err.preserved().cloned();
        let (status, extra) = match &err {
            CaptureError::CaptureInput(_) => (StatusCode::BAD_REQUEST, json!({})),
            CaptureError::TranscriptionFailed(e) => (
                StatusCode::BAD_GATEWAY,
                json!({ "upstream_status": e.status() }),
            ),
            CaptureError::ExtractionFailed { source, .. } => (
                StatusCode::BAD_GATEWAY,
                json!({ "stage": source.stage }),
            ),
            CaptureError::PersistencePartialFailure {
                saved,
                attempted,
                failures,
                ..
            } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "saved": saved,
                    "saved_count": saved.len(),
                    "attempted": attempted,
                    "failures": failures,
                }),
            ),
            CaptureError::Storage { .. } => (StatusCode::INTERNAL_SERVER_ERROR, json!({})),
        };
        error!("Capture failed: {}", message);

        let mut body = json!({ "error": message, "preserved": preserved });
        if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
            body.extend(extra);
        }
        (status, Json(body))
    }
}

impl From<ReconciliationError> for (StatusCode, Json<Value>) {
    fn from(err: ReconciliationError) -> Self {
        let status = match &err {
            ReconciliationError::RecordNotFound(_) => StatusCode::NOT_FOUND,
            ReconciliationError::PersonNotMentioned { .. } => StatusCode::BAD_REQUEST,
            ReconciliationError::ReconciliationInconsistency { .. } => StatusCode::CONFLICT,
            ReconciliationError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut body = json!({ "error": err.to_string() });
        if let ReconciliationError::ReconciliationInconsistency { contact_id, .. } = &err {
            body["orphan_contact_id"] = json!(contact_id);
        }
        error!("Reconciliation failed: {}", err);
        (status, Json(body))
    }
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "service": "rapport-ingestion",
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn get_stats(State(state): State<AppState>, owner: Owner) -> ApiResult<impl IntoResponse> {
    let db = state.db.lock().await;
    let stats = db.owner_stats(&owner.id).map_err(internal)?;
    Ok(Json(stats))
}

// ----------------------------------------------------------------------------
// Capture
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CaptureTextRequest {
    text: String,
}

async fn capture_text(
    State(state): State<AppState>,
    owner: Owner,
    Json(request): Json<CaptureTextRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .pipeline
        .capture(&owner.id, owner.name, CaptureInput::Text(request.text))
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn capture_audio(
    State(state): State<AppState>,
    owner: Owner,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    info!("Audio capture: {} bytes of {}", body.len(), content_type);

    let outcome = state
        .pipeline
        .capture(
            &owner.id,
            owner.name,
            CaptureInput::Audio {
                bytes: body.to_vec(),
                content_type,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

// ----------------------------------------------------------------------------
// Records
// ----------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RecordQuery {
    limit: Option<usize>,
    person: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

async fn list_records(
    State(state): State<AppState>,
    owner: Owner,
    Query(query): Query<RecordQuery>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.lock().await;
    let records = match (&query.person, &query.start, &query.end) {
        (Some(person), _, _) => db.records_mentioning(&owner.id, person),
        (None, Some(start), Some(end)) => db.records_in_range(&owner.id, start, end),
        (None, Some(_), None) | (None, None, Some(_)) => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "start and end must be given together",
            ))
        }
        (None, None, None) => db.list_records(&owner.id, query.limit),
    }
    .map_err(internal)?;
    Ok(Json(records))
}

async fn get_record(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.lock().await;
    db.get_record(&owner.id, &RecordId(id))
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found("record"))
}

async fn update_record(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
    Json(edit): Json<RecordEdit>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.lock().await;
    db.update_record(&owner.id, &RecordId(id), &edit)
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found("record"))
}

async fn delete_record(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let db = state.db.lock().await;
    match db.delete_record(&owner.id, &RecordId(id)).map_err(internal)? {
        true => Ok(StatusCode::NO_CONTENT),
        false => Err(not_found("record")),
    }
}

#[derive(Debug, Deserialize)]
struct ReconcileRequest {
    person: String,
}

async fn reconcile_record(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
    Json(request): Json<ReconcileRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .reconciler
        .reconcile(&owner.id, &RecordId(id), &request.person)
        .await?;
    Ok(Json(outcome))
}

// ----------------------------------------------------------------------------
// Contacts
// ----------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ContactQuery {
    q: Option<String>,
}

async fn list_contacts(
    State(state): State<AppState>,
    owner: Owner,
    Query(query): Query<ContactQuery>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.lock().await;
    let contacts = match query.q.as_deref().map(str::trim) {
        Some(keyword) if !keyword.is_empty() => db.search_contacts(&owner.id, keyword),
        _ => db.list_contacts(&owner.id),
    }
    .map_err(internal)?;
    Ok(Json(contacts))
}

async fn create_contact(
    State(state): State<AppState>,
    owner: Owner,
    Json(new): Json<NewContact>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.lock().await;
    let contact = db.create_contact(&owner.id, &new).map_err(internal)?;
    Ok((StatusCode::CREATED, Json(contact)))
}

async fn get_contact(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.lock().await;
    db.get_contact(&owner.id, &ContactId(id))
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found("contact"))
}

async fn update_contact(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
    Json(update): Json<ContactUpdate>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.lock().await;
    db.update_contact(&owner.id, &ContactId(id), &update)
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found("contact"))
}

async fn delete_contact(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let db = state.db.lock().await;
    match db.delete_contact(&owner.id, &ContactId(id)).map_err(internal)? {
        true => Ok(StatusCode::NO_CONTENT),
        false => Err(not_found("contact")),
    }
}

async fn contact_records(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.lock().await;
    let contact_id = ContactId(id);
    if db.get_contact(&owner.id, &contact_id).map_err(internal)?.is_none() {
        return Err(not_found("contact"));
    }
    let records = db
        .records_for_contact(&owner.id, &contact_id)
        .map_err(internal)?;
    Ok(Json(records))
}

// ----------------------------------------------------------------------------
// Tags
// ----------------------------------------------------------------------------

fn parse_kind(raw: &str) -> ApiResult<TagKind> {
    TagKind::parse(raw).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("unknown tag kind: {} (expected person or event)", raw),
        )
    })
}

#[derive(Debug, Deserialize)]
struct CreateTagRequest {
    name: String,
}

async fn list_tags(
    State(state): State<AppState>,
    owner: Owner,
    Path(kind): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let kind = parse_kind(&kind)?;
    let db = state.db.lock().await;
    let tags = db.list_tags(&owner.id, kind).map_err(internal)?;
    Ok(Json(tags))
}

async fn create_tag(
    State(state): State<AppState>,
    owner: Owner,
    Path(kind): Path<String>,
    Json(request): Json<CreateTagRequest>,
) -> ApiResult<impl IntoResponse> {
    let kind = parse_kind(&kind)?;
    let db = state.db.lock().await;
    let tag = db
        .create_tag(&owner.id, kind, &request.name)
        .map_err(internal)?;
    Ok((StatusCode::CREATED, Json(tag)))
}

async fn delete_tag(
    State(state): State<AppState>,
    owner: Owner,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let kind = parse_kind(&kind)?;
    let db = state.db.lock().await;
    match db.delete_tag(&owner.id, kind, &TagId(id)).map_err(internal)? {
        true => Ok(StatusCode::NO_CONTENT),
        false => Err(not_found("tag")),
    }
}

async fn check_consistency(State(state): State<AppState>, owner: Owner) -> ApiResult<impl IntoResponse> {
    let report = audit_consistency(state.store.as_ref(), &owner.id)
        .await
        .map_err(internal)?;
    Ok(Json(report))
}
