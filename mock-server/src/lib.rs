//! In-memory stand-in for the ms-ai backend.
//!
//! Sessions are cookies holding a random token. `POST /manager/find` signs a
//! manager in, `POST /refresh` rotates the token, and every other route
//! answers `403 {"code":"401003"}` once the session has been expired through
//! the `/__control` routes that tests use to drive the scenarios.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session";

pub const CODE_SESSION_EXPIRED: &str = "401003";
pub const CODE_UNAUTHENTICATED: &str = "401001";
pub const CODE_NOT_FOUND: &str = "404001";
pub const CODE_REFRESH_UNAVAILABLE: &str = "500001";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    #[serde(rename = "managerId")]
    pub manager_id: i64,
    #[serde(rename = "emailSub")]
    pub email_sub: bool,
    pub addressees: Vec<Addressee>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Addressee {
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug)]
struct Session {
    manager_id: i64,
    expired: bool,
}

/// Counters and switches the tests read and flip.
#[derive(Debug, Default)]
pub struct Controls {
    pub refresh_calls: AtomicUsize,
    pub fail_refresh: AtomicBool,
}

#[derive(Debug, Default)]
struct Data {
    sessions: HashMap<String, Session>,
    repositories: HashMap<i64, Repository>,
    github_token: Option<String>,
}

#[derive(Clone, Default)]
pub struct AppState {
    data: Arc<RwLock<Data>>,
    pub controls: Arc<Controls>,
}

impl AppState {
    /// State seeded with two repositories owned by manager 7.
    pub fn seeded() -> Self {
        let mut data = Data::default();
        for (id, name) in [(1, "ms-ai-agent"), (2, "ms-ai-frontend")] {
            data.repositories.insert(
                id,
                Repository {
                    id,
                    name: name.to_string(),
                    manager_id: 7,
                    email_sub: false,
                    addressees: Vec::new(),
                },
            );
        }
        Self {
            data: Arc::new(RwLock::new(data)),
            controls: Arc::default(),
        }
    }

    pub fn refresh_calls(&self) -> usize {
        self.controls.refresh_calls.load(Ordering::SeqCst)
    }

    pub async fn expire_sessions(&self) {
        let mut data = self.data.write().await;
        for session in data.sessions.values_mut() {
            session.expired = true;
        }
    }

    pub fn set_fail_refresh(&self, enabled: bool) {
        self.controls.fail_refresh.store(enabled, Ordering::SeqCst);
    }

    pub async fn github_token(&self) -> Option<String> {
        self.data.read().await.github_token.clone()
    }
}

pub fn app() -> Router {
    app_with_state(AppState::seeded())
}

pub fn app_with_state(state: AppState) -> Router {
    Router::new()
        .route("/manager/find", post(find_manager))
        .route("/refresh", post(refresh))
        .route("/repositories", get(list_repositories))
        .route("/repositories/{id}", get(get_repository))
        .route("/repositories/{id}/addressee", post(add_addressee))
        .route("/repositories/{id}/addressees", delete(delete_addressee))
        .route(
            "/manager/{manager_id}/repositories/{id}/email-sub",
            patch(update_email_sub),
        )
        .route("/set-github-token", post(set_github_token))
        .route("/documents", post(submit_document))
        .route("/__control/expire", post(expire_sessions))
        .route("/__control/fail-refresh", post(fail_refresh))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, AppState::seeded()).await
}

pub async fn run_with_state(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

fn error(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "code": code, "message": message }))).into_response()
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

fn set_session(token: &str) -> [(header::HeaderName, String); 1] {
    [(
        header::SET_COOKIE,
        format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly"),
    )]
}

/// Resolve the manager behind the request's session cookie.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<i64, Response> {
    let Some(token) = session_token(headers) else {
        return Err(error(
            StatusCode::UNAUTHORIZED,
            CODE_UNAUTHENTICATED,
            "no session",
        ));
    };
    let data = state.data.read().await;
    match data.sessions.get(&token) {
        Some(session) if !session.expired => Ok(session.manager_id),
        Some(_) => Err(error(
            StatusCode::FORBIDDEN,
            CODE_SESSION_EXPIRED,
            "session expired",
        )),
        None => Err(error(
            StatusCode::UNAUTHORIZED,
            CODE_UNAUTHENTICATED,
            "unknown session",
        )),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindManager {
    pub manager_id: i64,
}

async fn find_manager(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<FindManager>,
) -> Response {
    // A caller that still holds a session is checked first so that an
    // expired one surfaces as 401003 here too.
    if session_token(&headers).is_some() {
        if let Err(resp) = authenticate(&state, &headers).await {
            return resp;
        }
    }
    let token = Uuid::new_v4().to_string();
    state.data.write().await.sessions.insert(
        token.clone(),
        Session {
            manager_id: input.manager_id,
            expired: false,
        },
    );
    info!(manager_id = input.manager_id, "manager signed in");
    (set_session(&token), Json(json!({ "id": input.manager_id }))).into_response()
}

async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.controls.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if state.controls.fail_refresh.load(Ordering::SeqCst) {
        return error(
            StatusCode::INTERNAL_SERVER_ERROR,
            CODE_REFRESH_UNAVAILABLE,
            "refresh unavailable",
        );
    }
    let Some(old) = session_token(&headers) else {
        return error(
            StatusCode::UNAUTHORIZED,
            CODE_UNAUTHENTICATED,
            "no session",
        );
    };
    let mut data = state.data.write().await;
    // The old token stays around as expired so that requests still in
    // flight with it see 401003 rather than an unknown session. Rotated
    // tokens are never evicted, so `sessions` grows with every refresh for
    // the lifetime of the process.
    let Some(session) = data.sessions.get_mut(&old) else {
        return error(
            StatusCode::UNAUTHORIZED,
            CODE_UNAUTHENTICATED,
            "unknown session",
        );
    };
    session.expired = true;
    let manager_id = session.manager_id;
    let token = Uuid::new_v4().to_string();
    data.sessions.insert(
        token.clone(),
        Session {
            manager_id,
            expired: false,
        },
    );
    debug!(manager_id, "session rotated");
    (set_session(&token), StatusCode::OK).into_response()
}

#[derive(Deserialize)]
pub struct ManagerQuery {
    pub manager_id: i64,
}

async fn list_repositories(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ManagerQuery>,
) -> Response {
    if let Err(resp) = authenticate(&state, &headers).await {
        return resp;
    }
    let data = state.data.read().await;
    let mut repos: Vec<Repository> = data
        .repositories
        .values()
        .filter(|r| r.manager_id == query.manager_id)
        .cloned()
        .collect();
    repos.sort_by_key(|r| r.id);
    Json(repos).into_response()
}

async fn get_repository(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<ManagerQuery>,
) -> Response {
    if let Err(resp) = authenticate(&state, &headers).await {
        return resp;
    }
    let data = state.data.read().await;
    match data.repositories.get(&id) {
        Some(repo) if repo.manager_id == query.manager_id => Json(repo.clone()).into_response(),
        _ => error(StatusCode::NOT_FOUND, CODE_NOT_FOUND, "repository not found"),
    }
}

async fn add_addressee(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(input): Json<Addressee>,
) -> Response {
    if let Err(resp) = authenticate(&state, &headers).await {
        return resp;
    }
    let mut data = state.data.write().await;
    let Some(repo) = data.repositories.get_mut(&id) else {
        return error(StatusCode::NOT_FOUND, CODE_NOT_FOUND, "repository not found");
    };
    repo.addressees.push(input);
    (StatusCode::CREATED, Json(repo.clone())).into_response()
}

#[derive(Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

async fn delete_addressee(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<EmailQuery>,
) -> Response {
    if let Err(resp) = authenticate(&state, &headers).await {
        return resp;
    }
    let mut data = state.data.write().await;
    let Some(repo) = data.repositories.get_mut(&id) else {
        return error(StatusCode::NOT_FOUND, CODE_NOT_FOUND, "repository not found");
    };
    let before = repo.addressees.len();
    repo.addressees.retain(|a| a.email != query.email);
    if repo.addressees.len() == before {
        return error(StatusCode::NOT_FOUND, CODE_NOT_FOUND, "addressee not found");
    }
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSub {
    pub email_sub: bool,
}

async fn update_email_sub(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((manager_id, id)): Path<(i64, i64)>,
    Json(input): Json<EmailSub>,
) -> Response {
    if let Err(resp) = authenticate(&state, &headers).await {
        return resp;
    }
    let mut data = state.data.write().await;
    match data.repositories.get_mut(&id) {
        Some(repo) if repo.manager_id == manager_id => {
            repo.email_sub = input.email_sub;
            Json(repo.clone()).into_response()
        }
        _ => error(StatusCode::NOT_FOUND, CODE_NOT_FOUND, "repository not found"),
    }
}

#[derive(Deserialize)]
pub struct Token {
    pub token: String,
}

async fn set_github_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<Token>,
) -> Response {
    if let Err(resp) = authenticate(&state, &headers).await {
        return resp;
    }
    state.data.write().await.github_token = Some(input.token);
    Json(json!({ "registered": true })).into_response()
}

/// Echoes the received parts: text values verbatim, files as byte counts.
async fn submit_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if let Err(resp) = authenticate(&state, &headers).await {
        return resp;
    }
    let mut fields = serde_json::Map::new();
    let mut files = serde_json::Map::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error(StatusCode::BAD_REQUEST, "400001", &e.body_text()),
        };
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return error(StatusCode::BAD_REQUEST, "400001", &e.body_text()),
        };
        match file_name {
            Some(file_name) => {
                files.insert(
                    name,
                    json!({ "fileName": file_name, "size": bytes.len() }),
                );
            }
            None => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                fields.insert(name, Value::String(text));
            }
        }
    }
    (
        StatusCode::CREATED,
        Json(json!({ "fields": fields, "files": files })),
    )
        .into_response()
}

/// Marks every live session expired.
async fn expire_sessions(State(state): State<AppState>) -> StatusCode {
    state.expire_sessions().await;
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
pub struct Toggle {
    pub enabled: bool,
}

async fn fail_refresh(State(state): State<AppState>, Json(input): Json<Toggle>) -> StatusCode {
    state.set_fail_refresh(input.enabled);
    StatusCode::NO_CONTENT
}
