//! JSON over HTTP. Each handler resolves the acting user, calls one
//! [`Exchange`] operation and maps its error to a status code.
//!
//! There is no authentication: the caller names itself in the `x-user`
//! header, and requests without one act as the configured demo user.

use crate::blob::BlobStore;
use crate::exchange::{Exchange, ExchangeError};
use crate::local_store::LocalStore;
use crate::models::{
    Actor, ApplicantStatus, ChatMessage, NewRating, NewResource, NewSwap, NewTask, NewTeaching,
    Rating, Resource, ResourceType, Swap, Task, Teaching, TeachingResource, Upload,
};
use crate::rewards::{LeaderboardEntry, Profile, RewardSummary};
use crate::tasks::ApplicationReceipt;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

pub const USER_HEADER: &str = "x-user";
const DEFAULT_LEADERBOARD_SIZE: usize = 5;

// ── Shared state ───────────────────────────────────────────────

pub type AppExchange = Exchange<LocalStore, Arc<dyn BlobStore>>;

pub struct AppState {
    pub exchange: AppExchange,
    pub demo_user: String,
}

pub type SharedState = Arc<AppState>;

type ApiResult<T> = Result<T, (StatusCode, String)>;

// ── Helpers ────────────────────────────────────────────────────

fn actor(state: &AppState, headers: &HeaderMap) -> Actor {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(Actor::new)
        .unwrap_or_else(|| Actor::new(state.demo_user.clone()))
}

fn reject(e: ExchangeError) -> (StatusCode, String) {
    let status = match &e {
        ExchangeError::Validation(_) => StatusCode::BAD_REQUEST,
        ExchangeError::NotFound { .. } => StatusCode::NOT_FOUND,
        ExchangeError::Conflict(_) | ExchangeError::InvalidTransition(_) => StatusCode::CONFLICT,
        ExchangeError::Store(inner) => {
            error!("store failure: {inner}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}

fn bad_request(message: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message.into())
}

fn decode_file(file_name: String, base64: &str) -> ApiResult<Upload> {
    let bytes = STANDARD
        .decode(base64.trim())
        .map_err(|e| bad_request(format!("file is not valid base64: {e}")))?;
    Ok(Upload { file_name, bytes })
}

// ── Request bodies ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub status: ApplicantStatus,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// A resource with an optional base64-encoded file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareResourceRequest {
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    pub resource_type: ResourceType,
    pub resource_url: Option<String>,
    pub file_name: Option<String>,
    pub file_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    #[serde(default)]
    pub title: String,
    pub file_name: String,
    pub file_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub revision: u64,
    pub documents: usize,
}

// ── Tasks ──────────────────────────────────────────────────────

// GET /api/tasks
pub async fn list_tasks(State(state): State<SharedState>) -> ApiResult<Json<Vec<Task>>> {
    state.exchange.tasks().map(Json).map_err(reject)
}

// POST /api/tasks
pub async fn post_task(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<NewTask>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = state
        .exchange
        .post_task(&actor(&state, &headers), payload)
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(task)))
}

// GET /api/tasks/:id
pub async fn get_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    state.exchange.task(&id).map(Json).map_err(reject)
}

// DELETE /api/tasks/:id
pub async fn delete_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.exchange.delete_task(&id).map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /api/tasks/:id/applicants
pub async fn apply(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<ApplyRequest>,
) -> ApiResult<(StatusCode, Json<ApplicationReceipt>)> {
    let receipt = state
        .exchange
        .apply(&id, &actor(&state, &headers), &payload.message)
        .map_err(reject)?;
    let status = if receipt.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(receipt)))
}

// POST /api/tasks/:id/applicants/:applicant_id/decision
pub async fn decide(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path((id, applicant_id)): Path<(String, String)>,
    Json(payload): Json<DecisionRequest>,
) -> ApiResult<Json<Task>> {
    state
        .exchange
        .decide(&actor(&state, &headers), &id, &applicant_id, payload.status)
        .map(Json)
        .map_err(reject)
}

// GET /api/tasks/:id/ratings
pub async fn list_ratings(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Rating>>> {
    state.exchange.ratings(&id).map(Json).map_err(reject)
}

// POST /api/tasks/:id/ratings
pub async fn submit_rating(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<NewRating>,
) -> ApiResult<(StatusCode, Json<Rating>)> {
    let rating = state
        .exchange
        .submit_rating(&actor(&state, &headers), &id, payload)
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(rating)))
}

// GET /api/tasks/:id/chat
pub async fn chat_history(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    state.exchange.chat_history(&id).map(Json).map_err(reject)
}

// POST /api/tasks/:id/chat
pub async fn send_chat_message(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<ChatRequest>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    let message = state
        .exchange
        .send_chat_message(&actor(&state, &headers), &id, &payload.text)
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(message)))
}

// ── Swaps ──────────────────────────────────────────────────────

// GET /api/swaps
pub async fn list_swaps(State(state): State<SharedState>) -> ApiResult<Json<Vec<Swap>>> {
    state.exchange.swaps().map(Json).map_err(reject)
}

// POST /api/swaps
pub async fn propose_swap(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<NewSwap>,
) -> ApiResult<(StatusCode, Json<Swap>)> {
    let swap = state
        .exchange
        .propose(&actor(&state, &headers), payload)
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(swap)))
}

// POST /api/swaps/:id/accept
pub async fn accept_swap(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Swap>> {
    state
        .exchange
        .accept_swap(&actor(&state, &headers), &id)
        .map(Json)
        .map_err(reject)
}

// DELETE /api/swaps/:id
pub async fn delete_swap(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.exchange.delete_swap(&id).map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Resources ──────────────────────────────────────────────────

// GET /api/resources
pub async fn list_resources(State(state): State<SharedState>) -> ApiResult<Json<Vec<Resource>>> {
    state.exchange.resources().map(Json).map_err(reject)
}

// POST /api/resources
pub async fn share_resource(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<ShareResourceRequest>,
) -> ApiResult<(StatusCode, Json<Resource>)> {
    let file = match (payload.file_name, payload.file_base64) {
        (Some(name), Some(data)) => Some(decode_file(name, &data)?),
        (None, None) => None,
        _ => return Err(bad_request("fileName and fileBase64 go together")),
    };
    let new = NewResource {
        title: payload.title,
        description: payload.description,
        resource_type: payload.resource_type,
        resource_url: payload.resource_url,
        file,
    };
    let resource = state
        .exchange
        .share_resource(&actor(&state, &headers), new)
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(resource)))
}

// POST /api/resources/:id/downloads
pub async fn record_download(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DownloadResponse>> {
    let url = state.exchange.record_download(&id).map_err(reject)?;
    Ok(Json(DownloadResponse { url }))
}

// DELETE /api/resources/:id
pub async fn delete_resource(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.exchange.delete_resource(&id).map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Teachings ──────────────────────────────────────────────────

// GET /api/teachings
pub async fn list_teachings(State(state): State<SharedState>) -> ApiResult<Json<Vec<Teaching>>> {
    state.exchange.teachings().map(Json).map_err(reject)
}

// POST /api/teachings
pub async fn create_teaching(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<NewTeaching>,
) -> ApiResult<(StatusCode, Json<Teaching>)> {
    let teaching = state
        .exchange
        .create_teaching(&actor(&state, &headers), payload)
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(teaching)))
}

// POST /api/teaching-resources
pub async fn upload_teaching_resource(
    State(state): State<SharedState>,
    Json(payload): Json<UploadRequest>,
) -> ApiResult<(StatusCode, Json<TeachingResource>)> {
    let upload = decode_file(payload.file_name, &payload.file_base64)?;
    let resource = state
        .exchange
        .upload_teaching_resource(&payload.title, upload)
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(resource)))
}

// POST /api/teachings/:id/slots/:index/booking
pub async fn book_slot(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path((id, index)): Path<(String, usize)>,
) -> ApiResult<Json<Teaching>> {
    state
        .exchange
        .book_slot(&actor(&state, &headers), &id, index)
        .map(Json)
        .map_err(reject)
}

// DELETE /api/teachings/:id
pub async fn delete_teaching(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.exchange.delete_teaching(&id).map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Rewards ────────────────────────────────────────────────────

// GET /api/rewards
pub async fn rewards(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> ApiResult<Json<RewardSummary>> {
    state
        .exchange
        .rewards(&actor(&state, &headers))
        .map(Json)
        .map_err(reject)
}

// GET /api/profile
pub async fn profile(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> ApiResult<Json<Profile>> {
    state
        .exchange
        .profile(&actor(&state, &headers))
        .map(Json)
        .map_err(reject)
}

// GET /api/leaderboard?limit=N
pub async fn leaderboard(
    State(state): State<SharedState>,
    Query(params): Query<LeaderboardParams>,
) -> ApiResult<Json<Vec<LeaderboardEntry>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LEADERBOARD_SIZE);
    state.exchange.leaderboard(limit).map(Json).map_err(reject)
}

// GET /api/health
pub async fn health(State(state): State<SharedState>) -> Json<Health> {
    let store = state.exchange.store();
    Json(Health {
        revision: store.revision(),
        documents: store.document_count(),
    })
}

// ── Router ─────────────────────────────────────────────────────

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/tasks", get(list_tasks).post(post_task))
        .route("/api/tasks/:id", get(get_task).delete(delete_task))
        .route("/api/tasks/:id/applicants", post(apply))
        .route("/api/tasks/:id/applicants/:applicant_id/decision", post(decide))
        .route("/api/tasks/:id/ratings", get(list_ratings).post(submit_rating))
        .route("/api/tasks/:id/chat", get(chat_history).post(send_chat_message))
        .route("/api/swaps", get(list_swaps).post(propose_swap))
        .route("/api/swaps/:id", delete(delete_swap))
        .route("/api/swaps/:id/accept", post(accept_swap))
        .route("/api/resources", get(list_resources).post(share_resource))
        .route("/api/resources/:id", delete(delete_resource))
        .route("/api/resources/:id/downloads", post(record_download))
        .route("/api/teachings", get(list_teachings).post(create_teaching))
        .route("/api/teachings/:id", delete(delete_teaching))
        .route("/api/teachings/:id/slots/:index/booking", post(book_slot))
        .route("/api/teaching-resources", post(upload_teaching_resource))
        .route("/api/rewards", get(rewards))
        .route("/api/profile", get(profile))
        .route("/api/leaderboard", get(leaderboard))
        .with_state(state)
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use axum::http::HeaderValue;

    fn state() -> SharedState {
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new("http://localhost:3000/files"));
        Arc::new(AppState {
            exchange: Exchange::new(LocalStore::in_memory(), blobs, "Chandigarh University"),
            demo_user: "Alex Johnson".into(),
        })
    }

    fn as_user(name: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_str(name).unwrap());
        headers
    }

    async fn posted(state: &SharedState, title: &str) -> Task {
        let new = NewTask { title: title.into(), price: Some(100.0), points: None };
        let (status, Json(task)) = post_task(State(state.clone()), HeaderMap::new(), Json(new))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        task
    }

    #[test]
    fn actor_falls_back_to_demo_user() {
        let state = state();
        assert_eq!(actor(&state, &HeaderMap::new()).name(), "Alex Johnson");
        assert_eq!(actor(&state, &as_user("  ")).name(), "Alex Johnson");
        assert_eq!(actor(&state, &as_user("Rahul")).name(), "Rahul");
    }

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (ExchangeError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ExchangeError::NotFound { kind: "task", id: "t".into() }, StatusCode::NOT_FOUND),
            (ExchangeError::Conflict("x".into()), StatusCode::CONFLICT),
            (ExchangeError::InvalidTransition("x".into()), StatusCode::CONFLICT),
            (
                ExchangeError::Store(crate::store::StoreError::Io("disk".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (e, expected) in cases {
            assert_eq!(reject(e).0, expected);
        }
    }

    #[tokio::test]
    async fn task_flow_over_handlers() {
        let state = state();
        let task = posted(&state, "Create PPT").await;
        assert_eq!(task.poster, "Alex Johnson");

        let (status, Json(receipt)) = apply(
            State(state.clone()),
            as_user("Rahul"),
            Path(task.id.clone()),
            Json(ApplyRequest { message: "decks are my thing".into() }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let Json(task) = decide(
            State(state.clone()),
            HeaderMap::new(),
            Path((task.id.clone(), receipt.applicant_id.clone())),
            Json(DecisionRequest { status: ApplicantStatus::Accepted }),
        )
        .await
        .unwrap();
        assert_eq!(task.status, crate::models::TaskStatus::Assigned);

        submit_rating(
            State(state.clone()),
            HeaderMap::new(),
            Path(task.id.clone()),
            Json(NewRating { candidate: "Rahul".into(), rating: 5, comment: None }),
        )
        .await
        .unwrap();

        let Json(summary) = rewards(State(state.clone()), as_user("Rahul")).await.unwrap();
        assert_eq!(summary.total_points, 70);

        let Json(health) = health(State(state.clone())).await;
        assert_eq!(health.documents, 2);
    }

    #[tokio::test]
    async fn missing_task_is_404() {
        let state = state();
        let (status, _) = get_task(State(state), Path("nope".into())).await.unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blank_chat_is_400() {
        let state = state();
        let task = posted(&state, "Essay").await;
        let (status, _) = send_chat_message(
            State(state),
            HeaderMap::new(),
            Path(task.id),
            Json(ChatRequest { text: "  ".into() }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn pdf_resource_from_base64() {
        let state = state();
        let request = ShareResourceRequest {
            title: "Unit 3".into(),
            description: None,
            resource_type: ResourceType::Pdf,
            resource_url: None,
            file_name: Some("unit3.pdf".into()),
            file_base64: Some(STANDARD.encode(b"%PDF-1.4")),
        };
        let (status, Json(resource)) = share_resource(State(state.clone()), HeaderMap::new(), Json(request))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(resource.resource_url.starts_with("http://localhost:3000/files/resources/"));

        let Json(download) = record_download(State(state.clone()), Path(resource.id.clone()))
            .await
            .unwrap();
        assert_eq!(download.url, resource.resource_url);
    }

    #[tokio::test]
    async fn bad_base64_is_400() {
        let state = state();
        let request = UploadRequest {
            title: "Slides".into(),
            file_name: "slides.pdf".into(),
            file_base64: "***".into(),
        };
        let (status, _) = upload_teaching_resource(State(state), Json(request)).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn double_accepting_a_swap_is_409() {
        let state = state();
        let (_, Json(swap)) = propose_swap(
            State(state.clone()),
            HeaderMap::new(),
            Json(NewSwap { offers: "Python".into(), wants: "UI/UX".into() }),
        )
        .await
        .unwrap();

        accept_swap(State(state.clone()), as_user("Priya"), Path(swap.id.clone()))
            .await
            .unwrap();
        let (status, _) = accept_swap(State(state), as_user("Rahul"), Path(swap.id))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn leaderboard_defaults_to_five() {
        let state = state();
        let Json(board) = leaderboard(State(state), Query(LeaderboardParams { limit: None }))
            .await
            .unwrap();
        assert!(board.is_empty());
    }
}
