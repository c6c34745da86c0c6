//! HTTP/JSON gateway.
//!
//! Routes follow the `/v1` mapping of the directory service. Wire
//! conventions: opaque byte fields are base64 (unpadded, URL-safe),
//! digests and indexes are hex, durations are humantime strings, and
//! proof objects travel as their canonical binary encoding wrapped in
//! base64 — clients decode them with the same types the server uses.
//! Streaming endpoints emit newline-delimited JSON.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use futures::StreamExt;
use lattica_keydir_core::keymaterial::{DirectoryKeyMaterial, KeyMaterial};
use lattica_keydir_core::prover::{
    BatchGetUsersResponse, GetUserResponse, HistoryPage, MutationsPage, RevisionProofBundle,
    UserIndexProof, UserLeaf,
};
use lattica_keydir_core::registry::DirectoryRegistry;
use lattica_keydir_types::config::DirectorySettings;
use lattica_keydir_types::types::{
    Committed, Directory, DirectoryId, EntryUpdate, SignedEntry, UserId,
};
use lattica_keydir_types::{codec, KeydirError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Shared state for all handlers.
pub type AppState = Arc<DirectoryRegistry>;

/// Builds the gateway router.
pub fn router(registry: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/directories", get(list_directories).post(create_directory))
        .route("/v1/directories/{id}", get(get_directory).delete(delete_directory))
        .route("/v1/directories/{id}/undelete", post(undelete_directory))
        .route("/v1/directories:garbageCollect", post(garbage_collect))
        .route("/v1/directories/{id}/revisions/{r}", get(get_revision))
        .route("/v1/directories/{id}/revisions:latest", get(get_latest_revision))
        .route("/v1/directories/{id}/revisions:stream", get(revision_stream))
        .route("/v1/directories/{id}/revisions/{r}/mutations", get(list_mutations))
        .route("/v1/directories/{id}/mutations:stream", get(mutation_stream))
        .route("/v1/directories/{id}/users/{uid}", get(get_user))
        .route("/v1/directories/{id}/users:batchGet", post(batch_get_users))
        .route("/v1/directories/{id}/users:batchGetIndex", post(batch_get_user_indexes))
        .route("/v1/directories/{id}/users/{uid}/history", get(list_entry_history))
        .route("/v1/directories/{id}/users/{uid}/revisions", get(list_user_revisions))
        .route("/v1/directories/{id}/users:batchListRevisions", post(batch_list_user_revisions))
        .route("/v1/directories/{id}/users/{uid}/queue", post(queue_entry_update))
        .route("/v1/directories/{id}/batchQueueUpdate", post(batch_queue_update))
        .with_state(registry)
}

// ============================================================================
// Error mapping
// ============================================================================

/// A gateway error: a `KeydirError` with its HTTP status.
pub struct ApiError(KeydirError);

impl From<KeydirError> for ApiError {
    fn from(err: KeydirError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            KeydirError::InvalidArgument { .. }
            | KeydirError::Unauthorized { .. }
            | KeydirError::PreviousMismatch { .. }
            | KeydirError::CommitmentMismatch
            | KeydirError::Vrf { .. }
            | KeydirError::Config { .. } => StatusCode::BAD_REQUEST,
            KeydirError::DirectoryNotFound { .. } | KeydirError::NotFound { .. } => {
                StatusCode::NOT_FOUND
            },
            KeydirError::OutOfRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            KeydirError::DeadlineExceeded | KeydirError::Cancelled => {
                StatusCode::REQUEST_TIMEOUT
            },
            KeydirError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            KeydirError::Internal { .. } | KeydirError::Serialization { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        };
        let body = Json(serde_json::json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "message": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Wire helpers
// ============================================================================

fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn b64_decode(field: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| KeydirError::invalid_argument(format!("{field} is not valid base64")).into())
}

/// Canonical binary encoding wrapped in base64: the proof-blob wire form.
fn proof_blob<T: Serialize>(value: &T) -> Result<String, ApiError> {
    let bytes = codec::encode(value).map_err(|err| KeydirError::Internal {
        message: format!("unencodable response value: {err}"),
        location: snafu::location!(),
    })?;
    Ok(b64(&bytes))
}

// ============================================================================
// DTOs
// ============================================================================

#[derive(Serialize)]
struct DirectoryDto {
    directory_id: String,
    vrf_public_key: String,
    map_public_key: String,
    log_public_key: String,
    min_interval: String,
    max_interval: String,
    publish_empty_revisions: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Directory> for DirectoryDto {
    fn from(info: Directory) -> Self {
        Self {
            directory_id: info.directory_id.to_string(),
            vrf_public_key: b64(&info.vrf_public_key),
            map_public_key: b64(&info.map_public_key),
            log_public_key: b64(&info.log_public_key),
            min_interval: humantime::format_duration(info.min_interval).to_string(),
            max_interval: humantime::format_duration(info.max_interval).to_string(),
            publish_empty_revisions: info.publish_empty_revisions,
            created_at: info.created_at,
            deleted_at: info.deleted_at,
        }
    }
}

#[derive(Serialize)]
struct RevisionDto {
    revision: u64,
    /// Canonical `SignedMapRoot`, base64.
    map_root: String,
    /// Canonical `SignedLogRoot`, base64.
    log_root: String,
    /// Canonical `LogInclusionProof`, base64.
    log_inclusion: String,
    /// Canonical `LogConsistencyProof`, base64.
    #[serde(skip_serializing_if = "Option::is_none")]
    log_consistency: Option<String>,
}

impl RevisionDto {
    fn build(bundle: &RevisionProofBundle) -> ApiResult<Self> {
        Ok(Self {
            revision: bundle.map_root.revision,
            map_root: proof_blob(&bundle.map_root)?,
            log_root: proof_blob(&bundle.log_root)?,
            log_inclusion: proof_blob(&bundle.log_inclusion)?,
            log_consistency: bundle
                .log_consistency
                .as_ref()
                .map(proof_blob)
                .transpose()?,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct CommittedDto {
    /// 16-byte nonce, base64.
    key: String,
    /// Committed profile bytes, base64.
    data: String,
}

impl CommittedDto {
    fn from_domain(committed: &Committed) -> Self {
        Self { key: b64(&committed.key), data: b64(&committed.data) }
    }

    fn into_domain(self) -> ApiResult<Committed> {
        let key_bytes = b64_decode("committed.key", &self.key)?;
        let key: [u8; 16] = key_bytes.as_slice().try_into().map_err(|_| {
            ApiError::from(KeydirError::invalid_argument("committed.key must be 16 bytes"))
        })?;
        Ok(Committed { key, data: b64_decode("committed.data", &self.data)? })
    }
}

#[derive(Serialize)]
struct LeafDto {
    user_id: String,
    /// VRF index, hex.
    index: String,
    /// 80-byte VRF proof, base64.
    vrf_proof: String,
    /// Canonical `MapLeafInclusion`, base64.
    leaf: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    committed: Option<CommittedDto>,
}

impl LeafDto {
    fn build(leaf: &UserLeaf) -> ApiResult<Self> {
        Ok(Self {
            user_id: b64(leaf.user_id.as_bytes()),
            index: hex::encode(leaf.index.as_bytes()),
            vrf_proof: b64(&leaf.vrf_proof),
            leaf: proof_blob(&leaf.leaf)?,
            committed: leaf.committed.as_ref().map(CommittedDto::from_domain),
        })
    }
}

#[derive(Serialize)]
struct GetUserDto {
    revision: RevisionDto,
    leaf: LeafDto,
}

impl GetUserDto {
    fn build(response: &GetUserResponse) -> ApiResult<Self> {
        Ok(Self {
            revision: RevisionDto::build(&response.revision)?,
            leaf: LeafDto::build(&response.leaf)?,
        })
    }
}

#[derive(Serialize)]
struct BatchGetUsersDto {
    revision: RevisionDto,
    leaves: Vec<LeafDto>,
}

impl BatchGetUsersDto {
    fn build(response: &BatchGetUsersResponse) -> ApiResult<Self> {
        Ok(Self {
            revision: RevisionDto::build(&response.revision)?,
            leaves: response
                .leaves
                .iter()
                .map(LeafDto::build)
                .collect::<ApiResult<Vec<_>>>()?,
        })
    }
}

#[derive(Serialize)]
struct UserIndexDto {
    user_id: String,
    index: String,
    vrf_proof: String,
}

impl From<&UserIndexProof> for UserIndexDto {
    fn from(proof: &UserIndexProof) -> Self {
        Self {
            user_id: b64(proof.user_id.as_bytes()),
            index: hex::encode(proof.index.as_bytes()),
            vrf_proof: b64(&proof.vrf_proof),
        }
    }
}

#[derive(Serialize)]
struct MutationsPageDto {
    revision: u64,
    /// Canonical `MutationProof` values, base64.
    mutations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<String>,
}

impl MutationsPageDto {
    fn build(page: &MutationsPage) -> ApiResult<Self> {
        Ok(Self {
            revision: page.revision,
            mutations: page
                .mutations
                .iter()
                .map(proof_blob)
                .collect::<ApiResult<Vec<_>>>()?,
            next_page_token: page.next_page_token.clone(),
        })
    }
}

#[derive(Serialize)]
struct HistoryPageDto {
    /// `(map_root, leaf)` pairs: canonical encodings, base64.
    entries: Vec<HistoryEntryDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<String>,
}

#[derive(Serialize)]
struct HistoryEntryDto {
    revision: u64,
    map_root: String,
    leaf: String,
}

impl HistoryPageDto {
    fn build(page: &HistoryPage) -> ApiResult<Self> {
        Ok(Self {
            entries: page
                .entries
                .iter()
                .map(|entry| {
                    Ok(HistoryEntryDto {
                        revision: entry.map_root.revision,
                        map_root: proof_blob(&entry.map_root)?,
                        leaf: proof_blob(&entry.leaf)?,
                    })
                })
                .collect::<ApiResult<Vec<_>>>()?,
            next_page_token: page.next_page_token.clone(),
        })
    }
}

// ============================================================================
// Request bodies and query parameters
// ============================================================================

#[derive(Deserialize)]
struct CreateDirectoryBody {
    directory_id: String,
    #[serde(default)]
    settings: Option<DirectorySettings>,
    #[serde(default)]
    keys: Option<KeyMaterialBody>,
}

#[derive(Deserialize)]
struct KeyMaterialBody {
    #[serde(default)]
    vrf: Option<KeyCarrierBody>,
    #[serde(default)]
    map_signer: Option<KeyCarrierBody>,
    #[serde(default)]
    log_signer: Option<KeyCarrierBody>,
}

#[derive(Deserialize)]
struct KeyCarrierBody {
    type_url: String,
    /// Key bytes, base64.
    value: String,
}

impl KeyMaterialBody {
    fn into_domain(self) -> ApiResult<DirectoryKeyMaterial> {
        let decode = |carrier: Option<KeyCarrierBody>| -> ApiResult<Option<KeyMaterial>> {
            carrier
                .map(|c| {
                    Ok(KeyMaterial {
                        type_url: c.type_url,
                        value: b64_decode("keys.value", &c.value)?,
                    })
                })
                .transpose()
        };
        Ok(DirectoryKeyMaterial {
            vrf: decode(self.vrf)?,
            map_signer: decode(self.map_signer)?,
            log_signer: decode(self.log_signer)?,
        })
    }
}

#[derive(Deserialize)]
struct ListDirectoriesQuery {
    #[serde(default)]
    show_deleted: bool,
}

#[derive(Deserialize)]
struct VerifiedQuery {
    last_verified_tree_size: Option<u64>,
}

#[derive(Deserialize)]
struct PageQuery {
    page_token: Option<String>,
    page_size: Option<usize>,
}

#[derive(Deserialize)]
struct RangeQuery {
    #[serde(default)]
    start: u64,
    end: Option<u64>,
    page_token: Option<String>,
    page_size: Option<usize>,
}

#[derive(Deserialize)]
struct StreamQuery {
    #[serde(default)]
    start: u64,
}

#[derive(Deserialize)]
struct QueueUpdateBody {
    /// Canonical `SignedEntry`, base64.
    entry: String,
    #[serde(default)]
    committed: Option<CommittedDto>,
}

impl QueueUpdateBody {
    fn into_domain(self, user_id: UserId) -> ApiResult<EntryUpdate> {
        let entry_bytes = b64_decode("entry", &self.entry)?;
        let mutation: SignedEntry = codec::decode(&entry_bytes).map_err(|err| {
            ApiError::from(KeydirError::invalid_argument(format!("undecodable entry: {err}")))
        })?;
        Ok(EntryUpdate {
            user_id,
            mutation,
            committed: self.committed.map(CommittedDto::into_domain).transpose()?,
        })
    }
}

#[derive(Deserialize)]
struct BatchGetBody {
    /// User ids, base64.
    user_ids: Vec<String>,
    last_verified_tree_size: Option<u64>,
}

#[derive(Deserialize)]
struct BatchListRevisionsBody {
    /// User ids, base64.
    user_ids: Vec<String>,
    #[serde(default)]
    start: u64,
    end: Option<u64>,
    page_size: Option<usize>,
}

#[derive(Deserialize)]
struct BatchQueueBody {
    updates: Vec<BatchQueueItem>,
}

#[derive(Deserialize)]
struct BatchQueueItem {
    /// User id, base64.
    user_id: String,
    entry: String,
    #[serde(default)]
    committed: Option<CommittedDto>,
}

fn parse_user_ids(encoded: &[String]) -> ApiResult<Vec<UserId>> {
    encoded
        .iter()
        .map(|value| Ok(UserId::new(b64_decode("user_ids", value)?)))
        .collect()
}

/// User ids arrive in paths as their raw UTF-8 bytes.
fn path_user_id(segment: &str) -> UserId {
    UserId::new(segment.as_bytes().to_vec())
}

// ============================================================================
// Admin handlers
// ============================================================================

async fn healthz(State(registry): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let mut directories = Vec::new();
    for info in registry.list_directories(false) {
        let latest = match registry.prover(&info.directory_id) {
            Ok(prover) => prover.latest_revision().await.ok(),
            Err(_) => None,
        };
        let sequencer_running = registry
            .handle(&info.directory_id)
            .map(|handle| handle.sequencer_running())
            .unwrap_or(false);
        let vrf_fingerprint =
            hex::encode(&lattica_keydir_types::sha256(&info.vrf_public_key)[..8]);
        directories.push(serde_json::json!({
            "directory_id": info.directory_id.to_string(),
            "latest_revision": latest,
            "sequencer_running": sequencer_running,
            "vrf_key_fingerprint": vrf_fingerprint,
        }));
    }
    Ok(Json(serde_json::json!({ "status": "ok", "directories": directories })))
}

async fn list_directories(
    State(registry): State<AppState>,
    Query(query): Query<ListDirectoriesQuery>,
) -> Json<Vec<DirectoryDto>> {
    Json(
        registry
            .list_directories(query.show_deleted)
            .into_iter()
            .map(DirectoryDto::from)
            .collect(),
    )
}

async fn create_directory(
    State(registry): State<AppState>,
    Json(body): Json<CreateDirectoryBody>,
) -> ApiResult<(StatusCode, Json<DirectoryDto>)> {
    let keys = body.keys.map(KeyMaterialBody::into_domain).transpose()?;
    let info = registry.create_directory(&body.directory_id, body.settings, keys).await?;
    Ok((StatusCode::CREATED, Json(info.into())))
}

async fn get_directory(
    State(registry): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DirectoryDto>> {
    let info = registry.get_directory(&DirectoryId::new(id))?;
    Ok(Json(info.into()))
}

async fn delete_directory(
    State(registry): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DirectoryDto>> {
    let info = registry.delete_directory(&DirectoryId::new(id)).await?;
    Ok(Json(info.into()))
}

async fn undelete_directory(
    State(registry): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DirectoryDto>> {
    let info = registry.undelete_directory(&DirectoryId::new(id))?;
    Ok(Json(info.into()))
}

async fn garbage_collect(State(registry): State<AppState>) -> Json<serde_json::Value> {
    let purged: Vec<String> =
        registry.garbage_collect().await.into_iter().map(|id| id.to_string()).collect();
    Json(serde_json::json!({ "purged": purged }))
}

// ============================================================================
// Read handlers
// ============================================================================

async fn get_revision(
    State(registry): State<AppState>,
    Path((id, revision)): Path<(String, u64)>,
    Query(query): Query<VerifiedQuery>,
) -> ApiResult<Json<RevisionDto>> {
    let prover = registry.prover(&DirectoryId::new(id))?;
    let bundle = prover.get_revision(revision, query.last_verified_tree_size).await?;
    Ok(Json(RevisionDto::build(&bundle)?))
}

async fn get_latest_revision(
    State(registry): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VerifiedQuery>,
) -> ApiResult<Json<RevisionDto>> {
    let prover = registry.prover(&DirectoryId::new(id))?;
    let bundle = prover.get_latest_revision(query.last_verified_tree_size).await?;
    Ok(Json(RevisionDto::build(&bundle)?))
}

async fn get_user(
    State(registry): State<AppState>,
    Path((id, uid)): Path<(String, String)>,
    Query(query): Query<VerifiedQuery>,
) -> ApiResult<Json<GetUserDto>> {
    let prover = registry.prover(&DirectoryId::new(id))?;
    let response =
        prover.get_user(&path_user_id(&uid), query.last_verified_tree_size).await?;
    Ok(Json(GetUserDto::build(&response)?))
}

async fn batch_get_users(
    State(registry): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<BatchGetBody>,
) -> ApiResult<Json<BatchGetUsersDto>> {
    let prover = registry.prover(&DirectoryId::new(id))?;
    let user_ids = parse_user_ids(&body.user_ids)?;
    let response = prover.batch_get_users(&user_ids, body.last_verified_tree_size).await?;
    Ok(Json(BatchGetUsersDto::build(&response)?))
}

async fn batch_get_user_indexes(
    State(registry): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<BatchGetBody>,
) -> ApiResult<Json<Vec<UserIndexDto>>> {
    let prover = registry.prover(&DirectoryId::new(id))?;
    let user_ids = parse_user_ids(&body.user_ids)?;
    Ok(Json(prover.batch_get_user_indexes(&user_ids).iter().map(UserIndexDto::from).collect()))
}

async fn list_mutations(
    State(registry): State<AppState>,
    Path((id, revision)): Path<(String, u64)>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<MutationsPageDto>> {
    let prover = registry.prover(&DirectoryId::new(id))?;
    let page =
        prover.list_mutations(revision, query.page_token.as_deref(), query.page_size).await?;
    Ok(Json(MutationsPageDto::build(&page)?))
}

async fn list_entry_history(
    State(registry): State<AppState>,
    Path((id, uid)): Path<(String, String)>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<HistoryPageDto>> {
    let prover = registry.prover(&DirectoryId::new(id))?;
    let end = match query.end {
        Some(end) => end,
        None => prover.latest_revision().await?,
    };
    let page = prover
        .list_entry_history(
            &path_user_id(&uid),
            query.start,
            end,
            query.page_token.as_deref(),
            query.page_size,
        )
        .await?;
    Ok(Json(HistoryPageDto::build(&page)?))
}

async fn list_user_revisions(
    State(registry): State<AppState>,
    Path((id, uid)): Path<(String, String)>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<HistoryPageDto>> {
    let prover = registry.prover(&DirectoryId::new(id))?;
    let end = match query.end {
        Some(end) => end,
        None => prover.latest_revision().await?,
    };
    let page = prover
        .list_user_revisions(
            &path_user_id(&uid),
            query.start,
            end,
            query.page_token.as_deref(),
            query.page_size,
        )
        .await?;
    Ok(Json(HistoryPageDto::build(&page)?))
}

async fn batch_list_user_revisions(
    State(registry): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<BatchListRevisionsBody>,
) -> ApiResult<Json<Vec<HistoryPageDto>>> {
    let prover = registry.prover(&DirectoryId::new(id))?;
    let user_ids = parse_user_ids(&body.user_ids)?;
    let end = match body.end {
        Some(end) => end,
        None => prover.latest_revision().await?,
    };

    let mut pages = Vec::with_capacity(user_ids.len());
    for user_id in &user_ids {
        let page = prover
            .list_user_revisions(user_id, body.start, end, None, body.page_size)
            .await?;
        pages.push(HistoryPageDto::build(&page)?);
    }
    Ok(Json(pages))
}

// ============================================================================
// Streaming handlers
// ============================================================================

async fn revision_stream(
    State(registry): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Response> {
    let prover = registry.prover(&DirectoryId::new(id))?;
    let stream = prover.revision_stream(query.start).await;

    let lines = stream.map(|published| {
        let dto = serde_json::json!({
            "revision": published.map_root.revision,
            "map_root": codec::encode(&published.map_root).map(|b| b64(&b)).unwrap_or_default(),
            "log_root": codec::encode(&published.log_root).map(|b| b64(&b)).unwrap_or_default(),
        });
        Ok::<_, std::convert::Infallible>(format!("{dto}\n"))
    });

    Ok(ndjson_response(Body::from_stream(lines)))
}

async fn mutation_stream(
    State(registry): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Response> {
    let prover = registry.prover(&DirectoryId::new(id))?;
    let stream = prover.mutation_stream(query.start).await;

    let lines = stream.map(|page| {
        let mutations: Vec<String> = page
            .mutations
            .iter()
            .filter_map(|m| codec::encode(m).ok().map(|b| b64(&b)))
            .collect();
        let dto = serde_json::json!({ "revision": page.revision, "mutations": mutations });
        Ok::<_, std::convert::Infallible>(format!("{dto}\n"))
    });

    Ok(ndjson_response(Body::from_stream(lines)))
}

fn ndjson_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ============================================================================
// Write handlers
// ============================================================================

async fn queue_entry_update(
    State(registry): State<AppState>,
    Path((id, uid)): Path<(String, String)>,
    Json(body): Json<QueueUpdateBody>,
) -> ApiResult<StatusCode> {
    let directory_id = DirectoryId::new(id);
    let update = body.into_domain(path_user_id(&uid))?;
    registry.queue_entry_update(&directory_id, update).await?;
    debug!(directory_id = %directory_id, "update accepted via gateway");
    // No body: clients observe acceptance by polling the read path
    Ok(StatusCode::OK)
}

async fn batch_queue_update(
    State(registry): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<BatchQueueBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let directory_id = DirectoryId::new(id);

    let mut updates = Vec::with_capacity(body.updates.len());
    for item in body.updates {
        let user_id = UserId::new(b64_decode("user_id", &item.user_id)?);
        let update = QueueUpdateBody { entry: item.entry, committed: item.committed }
            .into_domain(user_id)?;
        updates.push(update);
    }

    let results = registry.batch_queue_user_updates(&directory_id, updates).await?;
    let results: Vec<serde_json::Value> = results
        .into_iter()
        .map(|result| match result {
            Ok(()) => serde_json::json!({ "accepted": true }),
            Err(err) => serde_json::json!({ "accepted": false, "message": err.to_string() }),
        })
        .collect();
    Ok(Json(serde_json::json!({ "results": results })))
}
