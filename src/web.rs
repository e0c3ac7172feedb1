use askama::Template;
use axum::async_trait;
use axum::extract::{FromRequestParts, Multipart, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use percent_encoding::{AsciiSet, CONTROLS, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info};

use crate::auth::{self, SigningKey};
use crate::error::QuillpadError;
use crate::markdown::{anchor_id, extract_headings, render_page_html};
use crate::search::search;
use crate::store::{Page, Store};

type SharedState = Arc<AppState>;

const DEFAULT_PROFILE_IMAGE: &str = "/default-profile.png";
const THEMES: [&str; 2] = ["light", "dark"];
const FONTS: [&str; 3] = ["font1", "font2", "font3"];

/// Characters percent-encoded inside fragment URLs. Anchors derived from
/// heading text may contain nearly anything, so this mirrors the URL
/// standard's fragment set.
const FRAGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`');

pub struct AppState {
    pub store: Mutex<Store>,
    pub key: SigningKey,
    pub uploads_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub uploads_dir: PathBuf,
    pub secret: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            db_path: PathBuf::from("quillpad.db"),
            uploads_dir: PathBuf::from("uploads"),
            secret: String::new(),
        }
    }
}

pub async fn serve(config: WebConfig) -> Result<(), QuillpadError> {
    let store = Store::open(&config.db_path)?;
    info!(db = %config.db_path.display(), "Opened page store");
    let state = Arc::new(AppState {
        store: Mutex::new(store),
        key: SigningKey::from_secret(&config.secret),
        uploads_dir: config.uploads_dir.clone(),
    });
    let router = build_router(state);
    info!(
        %config.addr,
        uploads = %config.uploads_dir.display(),
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<QuillpadError> for ApiError {
    fn from(err: QuillpadError) -> Self {
        let status = match &err {
            QuillpadError::InvalidToken => StatusCode::UNAUTHORIZED,
            QuillpadError::Forbidden => StatusCode::FORBIDDEN,
            QuillpadError::UserNotFound => StatusCode::NOT_FOUND,
            QuillpadError::UsernameTaken(_)
            | QuillpadError::InvalidCredentials
            | QuillpadError::Validation(_) => StatusCode::BAD_REQUEST,
            QuillpadError::Database(_)
            | QuillpadError::Io(_)
            | QuillpadError::Json(_)
            | QuillpadError::PasswordHash(_) => {
                error!(error = %err, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.user_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

/// The authenticated user id, pulled from the session cookie.
///
/// JSON routes use this as an extractor; a missing or bad token rejects the
/// request with a 401 before the handler runs.
struct AuthUser(i64);

#[async_trait]
impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let token =
            auth::token_from_cookie_header(header_value).ok_or(QuillpadError::InvalidToken)?;
        let user_id = auth::verify_token(&state.key, &token)?;
        Ok(AuthUser(user_id))
    }
}

/// Same check as [`AuthUser`] but for HTML views, which redirect instead of
/// answering with JSON.
fn authed_user_id(state: &SharedState, headers: &HeaderMap) -> Option<i64> {
    let header_value = headers.get(header::COOKIE)?.to_str().ok()?;
    let token = auth::token_from_cookie_header(header_value)?;
    auth::verify_token(&state.key, &token).ok()
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(login_page))
        .route("/register", get(register_page))
        .route("/notes", get(notes_page))
        .route("/default-profile.png", get(default_profile_image))
        .route("/api/auth/register", post(api_register))
        .route("/api/auth/login", post(api_login))
        .route("/api/auth/logout", post(api_logout))
        .route(
            "/api/auth/profile-image",
            get(api_get_profile_image).post(api_upload_profile_image),
        )
        .route("/api/pages", get(api_list_pages).post(api_create_page))
        .route("/api/pages/:id", put(api_update_page).delete(api_delete_page))
        .route(
            "/api/user/settings",
            get(api_get_settings).post(api_update_settings),
        )
        .route("/healthz", get(health))
        .nest_service("/uploads", ServeDir::new(&state.uploads_dir))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "quillpad" }))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: Option<String>,
    password: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatePageRequest {
    title: Option<String>,
    #[serde(default)]
    content: String,
}

/// A missing `content` coerces to the empty string instead of erroring, and
/// the stored column always ends up non-NULL.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePageRequest {
    title: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    is_favorite: bool,
}

#[derive(Debug, Deserialize)]
struct SettingsRequest {
    theme: Option<String>,
    font: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

async fn api_register(
    State(state): State<SharedState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (username, password, name) = match (
        non_empty(body.username),
        non_empty(body.password),
        non_empty(body.name),
    ) {
        (Some(u), Some(p), Some(n)) => (u, p, n),
        _ => return Err(ApiError::bad_request("Missing required fields")),
    };
    let hash = auth::hash_password(&password)?;
    let store = state.store.lock();
    store.create_user(&username, &hash, &name)?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true }))))
}

async fn api_login(
    State(state): State<SharedState>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let (username, password) = match (non_empty(body.username), non_empty(body.password)) {
        (Some(u), Some(p)) => (u, p),
        _ => return Err(ApiError::bad_request("Missing required fields")),
    };
    let user = {
        let store = state.store.lock();
        store.user_by_username(&username)?
    };
    let user = user.ok_or(QuillpadError::InvalidCredentials)?;
    if !auth::verify_password(&password, &user.password_hash)? {
        return Err(QuillpadError::InvalidCredentials.into());
    }
    let token = auth::issue_token(&state.key, user.id)?;
    let cookie = auth::session_cookie(&token);
    Ok((
        [(header::SET_COOKIE, cookie.to_string())],
        Json(json!({ "success": true })),
    )
        .into_response())
}

async fn api_logout() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, auth::clear_session_cookie().to_string())],
        Json(json!({ "success": true })),
    )
}

async fn api_list_pages(
    State(state): State<SharedState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let store = state.store.lock();
    let user = store
        .user_by_id(user_id)?
        .ok_or(QuillpadError::UserNotFound)?;
    let pages = store.pages_for_user(user_id)?;
    Ok(Json(json!({ "pages": pages, "userName": user.name })))
}

async fn api_create_page(
    State(state): State<SharedState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<CreatePageRequest>,
) -> Result<(StatusCode, Json<Page>), ApiError> {
    let title = non_empty(body.title).ok_or_else(|| ApiError::bad_request("Title is required"))?;
    let store = state.store.lock();
    let page = store.create_page(user_id, &title, &body.content)?;
    Ok((StatusCode::CREATED, Json(page)))
}

async fn api_update_page(
    State(state): State<SharedState>,
    AuthUser(user_id): AuthUser,
    Path(page_id): Path<i64>,
    Json(body): Json<UpdatePageRequest>,
) -> Result<Json<Page>, ApiError> {
    let title = non_empty(body.title).ok_or_else(|| ApiError::bad_request("Title is required"))?;
    let store = state.store.lock();
    let page = store.update_page(user_id, page_id, &title, &body.content, body.is_favorite)?;
    Ok(Json(page))
}

async fn api_delete_page(
    State(state): State<SharedState>,
    AuthUser(user_id): AuthUser,
    Path(page_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let store = state.store.lock();
    store.delete_page(user_id, page_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn api_get_settings(
    State(state): State<SharedState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let store = state.store.lock();
    let user = store
        .user_by_id(user_id)?
        .ok_or(QuillpadError::UserNotFound)?;
    Ok(Json(json!({ "theme": user.theme, "font": user.font })))
}

async fn api_update_settings(
    State(state): State<SharedState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<SettingsRequest>,
) -> Result<Json<Value>, ApiError> {
    // Both values land in class attributes, so they are constrained to the
    // known sets rather than passed through.
    let theme = body
        .theme
        .filter(|t| THEMES.contains(&t.as_str()))
        .ok_or_else(|| ApiError::bad_request("Invalid settings"))?;
    let font = body
        .font
        .filter(|f| FONTS.contains(&f.as_str()))
        .ok_or_else(|| ApiError::bad_request("Invalid settings"))?;
    let store = state.store.lock();
    store.update_settings(user_id, &theme, &font)?;
    Ok(Json(json!({ "theme": theme, "font": font })))
}

async fn api_get_profile_image(
    State(state): State<SharedState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let store = state.store.lock();
    let user = store
        .user_by_id(user_id)?
        .ok_or(QuillpadError::UserNotFound)?;
    let image_url = user
        .profile_image_url
        .unwrap_or_else(|| DEFAULT_PROFILE_IMAGE.to_string());
    Ok(Json(json!({ "imageUrl": image_url })))
}

async fn api_upload_profile_image(
    State(state): State<SharedState>,
    AuthUser(user_id): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::bad_request("Malformed multipart body"))?
    {
        if field.name() != Some("profileImage") {
            continue;
        }
        let ext = match field.content_type() {
            Some("image/jpeg") => ".jpg",
            Some("image/png") => ".png",
            Some("image/gif") => ".gif",
            _ => return Err(ApiError::bad_request("Unsupported image type")),
        };
        let data = field
            .bytes()
            .await
            .map_err(|_| ApiError::bad_request("Malformed multipart body"))?;

        let filename = format!("{}-{}{}", user_id, millis_now(), ext);
        let path = state.uploads_dir.join(&filename);
        tokio::fs::create_dir_all(&state.uploads_dir)
            .await
            .map_err(QuillpadError::from)?;
        tokio::fs::write(&path, &data)
            .await
            .map_err(QuillpadError::from)?;

        let image_url = format!("/uploads/{filename}");
        {
            let store = state.store.lock();
            store.update_profile_image(user_id, &image_url)?;
        }
        info!(user_id, %image_url, "Stored profile image");
        return Ok(Json(json!({ "success": true, "imageUrl": image_url })));
    }
    Err(ApiError::bad_request("No image provided"))
}

fn millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

async fn default_profile_image() -> impl IntoResponse {
    // Served under the .png path the stored URLs reference; browsers go by
    // the Content-Type header, not the extension.
    (
        [(header::CONTENT_TYPE, "image/svg+xml")],
        DEFAULT_AVATAR_SVG,
    )
}

const DEFAULT_AVATAR_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 64 64"><circle cx="32" cy="32" r="32" fill="#9ca3af"/><circle cx="32" cy="25" r="11" fill="#e5e7eb"/><path d="M10 56a22 15 0 0 1 44 0v8H10z" fill="#e5e7eb"/></svg>"##;

async fn login_page(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if authed_user_id(&state, &headers).is_some() {
        return Redirect::to("/notes").into_response();
    }
    Html(
        LoginTemplate
            .render()
            .unwrap_or_else(|err| render_error_page(err.to_string())),
    )
    .into_response()
}

async fn register_page(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if authed_user_id(&state, &headers).is_some() {
        return Redirect::to("/notes").into_response();
    }
    Html(
        RegisterTemplate
            .render()
            .unwrap_or_else(|err| render_error_page(err.to_string())),
    )
    .into_response()
}

#[derive(Debug, Deserialize)]
struct NotesParams {
    page: Option<String>,
    q: Option<String>,
    edit: Option<String>,
}

async fn notes_page(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<NotesParams>,
) -> Response {
    let Some(user_id) = authed_user_id(&state, &headers) else {
        return Redirect::to("/").into_response();
    };
    let template = {
        let store = state.store.lock();
        match build_notes_view(&store, user_id, &params) {
            Ok(Some(template)) => template,
            Ok(None) => return Redirect::to("/").into_response(),
            Err(err) => {
                error!(error = %err, "Failed to build notes view");
                return Html(render_error_page(err.user_message())).into_response();
            }
        }
    };
    Html(
        template
            .render()
            .unwrap_or_else(|err| render_error_page(err.to_string())),
    )
    .into_response()
}

struct SidebarPage {
    id: i64,
    title: String,
    is_favorite: bool,
    active: bool,
    href: String,
}

struct ResultRow {
    title: String,
    match_count: usize,
    href: String,
}

struct TocEntry {
    text: String,
    href: String,
    indent_class: &'static str,
}

/// Builds the fully-resolved view model for the notes page.
///
/// Search scans pages in ascending-id order, exactly as the store returns
/// them, so the results panel lists hits in that order too. The sidebar
/// reorders favorites first for display only. A missing or unknown `page`
/// parameter falls back to the lowest-id page, which is also where the
/// client lands after deleting the selected page.
fn build_notes_view(
    store: &Store,
    user_id: i64,
    params: &NotesParams,
) -> Result<Option<NotesTemplate>, QuillpadError> {
    let Some(user) = store.user_by_id(user_id)? else {
        return Ok(None);
    };
    let pages = store.pages_for_user(user_id)?;

    let query = params.q.as_deref().unwrap_or("").trim().to_string();
    let searched = !query.is_empty();
    let results: Vec<ResultRow> = if searched {
        search(&pages, &query)
            .into_iter()
            .map(|hit| ResultRow {
                href: notes_href(Some(hit.page_id), &query, false),
                title: hit.title,
                match_count: hit.match_count,
            })
            .collect()
    } else {
        Vec::new()
    };

    let requested = params.page.as_deref().and_then(|v| v.parse::<i64>().ok());
    let selected = requested
        .and_then(|id| pages.iter().find(|p| p.id == id))
        .or_else(|| pages.first());
    let (has_selection, selected_id, selected_title, selected_content, selected_favorite) =
        match selected {
            Some(p) => (true, p.id, p.title.clone(), p.content.clone(), p.is_favorite),
            None => (false, 0, String::new(), String::new(), false),
        };

    let edit_mode = has_selection
        && params
            .edit
            .as_deref()
            .map(|v| v == "1" || v == "true")
            .unwrap_or(false);

    let toc = extract_headings(&selected_content)
        .into_iter()
        .map(|heading| TocEntry {
            indent_class: toc_indent_class(heading.level),
            href: format!("#{}", encode_fragment(&anchor_id(&heading.text))),
            text: heading.text,
        })
        .collect();
    let rendered_html = if has_selection {
        render_page_html(&selected_content, &query)
    } else {
        String::new()
    };

    let mut sidebar_pages: Vec<&Page> = pages.iter().collect();
    sidebar_pages.sort_by(|a, b| b.is_favorite.cmp(&a.is_favorite).then(a.id.cmp(&b.id)));
    let sidebar = sidebar_pages
        .into_iter()
        .map(|p| SidebarPage {
            id: p.id,
            title: p.title.clone(),
            is_favorite: p.is_favorite,
            active: has_selection && p.id == selected_id,
            href: notes_href(Some(p.id), &query, false),
        })
        .collect();

    Ok(Some(NotesTemplate {
        dark: user.theme == "dark",
        font_class: user.font,
        user_name: user.name,
        profile_image_url: user
            .profile_image_url
            .unwrap_or_else(|| DEFAULT_PROFILE_IMAGE.to_string()),
        query,
        searched,
        edit_mode,
        next_title: format!("Untitled {}", pages.len() + 1),
        edit_href: notes_href(Some(selected_id), params.q.as_deref().unwrap_or(""), true),
        view_href: notes_href(Some(selected_id), params.q.as_deref().unwrap_or(""), false),
        sidebar,
        results,
        toc,
        has_selection,
        selected_id,
        selected_title,
        selected_content,
        selected_favorite,
        rendered_html,
    }))
}

fn notes_href(page: Option<i64>, query: &str, edit: bool) -> String {
    let mut params = Vec::new();
    if let Some(id) = page {
        params.push(format!("page={id}"));
    }
    if !query.is_empty() {
        params.push(format!("q={}", encode_component(query)));
    }
    if edit {
        params.push("edit=1".to_string());
    }
    if params.is_empty() {
        "/notes".to_string()
    } else {
        format!("/notes?{}", params.join("&"))
    }
}

fn toc_indent_class(level: u8) -> &'static str {
    match level {
        1 => "",
        2 => "pl-3",
        3 => "pl-6",
        4 => "pl-9",
        _ => "pl-12",
    }
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

fn encode_fragment(value: &str) -> String {
    utf8_percent_encode(value, FRAGMENT).to_string()
}

fn render_error_page(message: impl Into<String>) -> String {
    let message = message.into();
    format!(
        r##"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Quillpad • Error</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  </head>
  <body class="bg-gray-100 min-h-screen flex items-center justify-center px-4">
    <main class="w-full max-w-sm bg-white shadow rounded-lg p-8 space-y-4 text-center">
      <h1 class="text-xl font-bold text-gray-900">Something went wrong</h1>
      <p class="text-sm text-gray-600">{message}</p>
      <a href="/notes" class="inline-block rounded bg-gray-900 px-4 py-2 text-sm font-semibold text-white hover:bg-gray-800">Back to your notes</a>
    </main>
  </body>
</html>"##
    )
}

#[derive(Template)]
#[template(
    source = r##"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Quillpad • Sign in</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  </head>
  <body class="bg-gray-100 min-h-screen flex items-center justify-center px-4">
    <main class="w-full max-w-sm bg-white shadow rounded-lg p-8 space-y-6">
      <div>
        <h1 class="text-2xl font-bold text-gray-900">Quillpad</h1>
        <p class="text-sm text-gray-500">Sign in to your notes</p>
      </div>
      <form onsubmit="login(event)" class="space-y-4">
        <div>
          <label for="username" class="block text-sm font-medium text-gray-700">Username</label>
          <input id="username" type="text" autocomplete="username" required class="mt-1 w-full rounded border border-gray-300 px-3 py-2" />
        </div>
        <div>
          <label for="password" class="block text-sm font-medium text-gray-700">Password</label>
          <input id="password" type="password" autocomplete="current-password" required class="mt-1 w-full rounded border border-gray-300 px-3 py-2" />
        </div>
        <p id="error" class="text-sm text-red-600"></p>
        <button type="submit" class="w-full rounded bg-gray-900 px-4 py-2 font-semibold text-white hover:bg-gray-800">Sign in</button>
      </form>
      <p class="text-sm text-gray-500">No account yet? <a href="/register" class="text-blue-700 hover:underline">Create one</a></p>
    </main>
    <script>
      async function login(event) {
        event.preventDefault();
        const username = document.getElementById('username').value;
        const password = document.getElementById('password').value;
        const res = await fetch('/api/auth/login', {
          method: 'POST',
          headers: { 'Content-Type': 'application/json' },
          body: JSON.stringify({ username: username, password: password })
        });
        if (res.ok) {
          window.location = '/notes';
        } else {
          const data = await res.json();
          document.getElementById('error').textContent = data.error;
        }
      }
    </script>
  </body>
</html>"##,
    ext = "html"
)]
struct LoginTemplate;

#[derive(Template)]
#[template(
    source = r##"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Quillpad • Register</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  </head>
  <body class="bg-gray-100 min-h-screen flex items-center justify-center px-4">
    <main class="w-full max-w-sm bg-white shadow rounded-lg p-8 space-y-6">
      <div>
        <h1 class="text-2xl font-bold text-gray-900">Create your account</h1>
        <p class="text-sm text-gray-500">A username, a display name, and a password</p>
      </div>
      <form onsubmit="register(event)" class="space-y-4">
        <div>
          <label for="username" class="block text-sm font-medium text-gray-700">Username</label>
          <input id="username" type="text" autocomplete="username" required class="mt-1 w-full rounded border border-gray-300 px-3 py-2" />
        </div>
        <div>
          <label for="name" class="block text-sm font-medium text-gray-700">Display name</label>
          <input id="name" type="text" autocomplete="name" required class="mt-1 w-full rounded border border-gray-300 px-3 py-2" />
        </div>
        <div>
          <label for="password" class="block text-sm font-medium text-gray-700">Password</label>
          <input id="password" type="password" autocomplete="new-password" required class="mt-1 w-full rounded border border-gray-300 px-3 py-2" />
        </div>
        <p id="error" class="text-sm text-red-600"></p>
        <button type="submit" class="w-full rounded bg-gray-900 px-4 py-2 font-semibold text-white hover:bg-gray-800">Register</button>
      </form>
      <p class="text-sm text-gray-500">Already registered? <a href="/" class="text-blue-700 hover:underline">Sign in</a></p>
    </main>
    <script>
      async function register(event) {
        event.preventDefault();
        const username = document.getElementById('username').value;
        const name = document.getElementById('name').value;
        const password = document.getElementById('password').value;
        const res = await fetch('/api/auth/register', {
          method: 'POST',
          headers: { 'Content-Type': 'application/json' },
          body: JSON.stringify({ username: username, name: name, password: password })
        });
        if (res.ok) {
          window.location = '/';
        } else {
          const data = await res.json();
          document.getElementById('error').textContent = data.error;
        }
      }
    </script>
  </body>
</html>"##,
    ext = "html"
)]
struct RegisterTemplate;

#[derive(Template)]
#[template(
    source = r##"<!DOCTYPE html>
<html lang="en" class="{% if dark %}dark{% endif %}">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Quillpad • Notes</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
    <style type="text/tailwindcss">
      @custom-variant dark (&:where(.dark, .dark *));
    </style>
    <link href="https://fonts.googleapis.com/css2?family=Roboto:wght@400;700&family=Open+Sans:wght@400;700&family=Lato:wght@400;700&display=swap" rel="stylesheet">
    <style>
      .font1 { font-family: 'Roboto', sans-serif; }
      .font2 { font-family: 'Open Sans', sans-serif; }
      .font3 { font-family: 'Lato', sans-serif; }
      .page-body h1 { font-size: 1.5rem; font-weight: 700; margin: 0.8rem 0 0.4rem; }
      .page-body h2 { font-size: 1.25rem; font-weight: 700; margin: 0.7rem 0 0.35rem; }
      .page-body h3 { font-size: 1.1rem; font-weight: 600; margin: 0.6rem 0 0.3rem; }
      .page-body h4, .page-body h5, .page-body h6 { font-weight: 600; margin: 0.5rem 0 0.25rem; }
      .page-body p { margin: 0.4rem 0; }
      .page-body ul { list-style: disc; padding-left: 1.5rem; }
      .page-body ol { list-style: decimal; padding-left: 1.5rem; }
      .page-body pre { background: #1f2937; color: #e5e7eb; padding: 0.75rem; border-radius: 0.375rem; overflow-x: auto; margin: 0.5rem 0; }
      .page-body code { font-family: ui-monospace, monospace; font-size: 0.9em; }
      .page-body table { border-collapse: collapse; margin: 0.5rem 0; }
      .page-body th, .page-body td { border: 1px solid #d1d5db; padding: 0.3rem 0.6rem; }
      .page-body blockquote { border-left: 4px solid #d1d5db; padding-left: 0.75rem; color: #6b7280; }
      .page-body a { color: #1d4ed8; text-decoration: underline; }
    </style>
  </head>
  <body class="{{ font_class }} bg-gray-100 dark:bg-gray-900 text-gray-900 dark:text-gray-100 min-h-screen">
    <header class="bg-white dark:bg-gray-800 shadow">
      <div class="mx-auto max-w-6xl px-4 py-3 flex items-center gap-4">
        <a href="/notes" class="text-xl font-bold">Quillpad</a>
        <form method="get" action="/notes" class="flex-1 max-w-md">
          {% if has_selection %}
          <input type="hidden" name="page" value="{{ selected_id }}" />
          {% endif %}
          <input type="search" name="q" value="{{ query }}" placeholder="Search pages…" class="w-full rounded border border-gray-300 dark:border-gray-600 bg-gray-50 dark:bg-gray-700 px-3 py-1.5 text-sm" />
        </form>
        <span class="text-sm text-gray-500 dark:text-gray-400">{{ user_name }}</span>
        <input id="avatar-input" type="file" accept="image/png,image/jpeg,image/gif" class="hidden" onchange="uploadProfileImage(this)" />
        <button onclick="document.getElementById('avatar-input').click()" title="Change profile image">
          <img src="{{ profile_image_url }}" alt="Profile" class="h-8 w-8 rounded-full object-cover" />
        </button>
        <details class="relative">
          <summary class="cursor-pointer text-sm text-gray-600 dark:text-gray-300 select-none">Settings</summary>
          <div class="absolute right-0 mt-2 w-56 bg-white dark:bg-gray-800 shadow-lg rounded p-4 space-y-3 z-10">
            <label class="block text-sm">Theme
              <select id="theme-select" class="mt-1 w-full rounded border border-gray-300 dark:border-gray-600 bg-gray-50 dark:bg-gray-700 px-2 py-1">
                <option value="light" {% if !dark %}selected{% endif %}>Light</option>
                <option value="dark" {% if dark %}selected{% endif %}>Dark</option>
              </select>
            </label>
            <label class="block text-sm">Font
              <select id="font-select" class="mt-1 w-full rounded border border-gray-300 dark:border-gray-600 bg-gray-50 dark:bg-gray-700 px-2 py-1">
                <option value="font1" {% if font_class == "font1" %}selected{% endif %}>Roboto</option>
                <option value="font2" {% if font_class == "font2" %}selected{% endif %}>Open Sans</option>
                <option value="font3" {% if font_class == "font3" %}selected{% endif %}>Lato</option>
              </select>
            </label>
            <button onclick="saveSettings()" class="w-full rounded bg-gray-900 px-3 py-1.5 text-sm font-semibold text-white hover:bg-gray-800">Save</button>
          </div>
        </details>
        <button onclick="logout()" class="text-sm text-gray-600 dark:text-gray-300 hover:underline">Log out</button>
      </div>
    </header>

    <div class="mx-auto max-w-6xl px-4 py-6 flex gap-6">
      <aside class="w-60 shrink-0 space-y-4">
        <button onclick="newPage()" class="w-full rounded bg-gray-900 px-3 py-2 text-sm font-semibold text-white hover:bg-gray-800">New page</button>
        {% if searched %}
        <div class="bg-white dark:bg-gray-800 shadow rounded-lg p-3">
          <h2 class="text-xs font-semibold uppercase tracking-wide text-gray-500 dark:text-gray-400 mb-2">Results for “{{ query }}”</h2>
          {% if results.len() == 0 %}
          <p class="text-sm text-gray-500 dark:text-gray-400">No matches.</p>
          {% else %}
          <ul class="space-y-1">
            {% for hit in results %}
            <li>
              <a href="{{ hit.href }}" class="block rounded px-2 py-1 text-sm hover:bg-gray-100 dark:hover:bg-gray-700">
                {{ hit.title }}
                <span class="block text-xs text-gray-500 dark:text-gray-400">{{ hit.match_count }} match{% if hit.match_count != 1 %}es{% endif %}</span>
              </a>
            </li>
            {% endfor %}
          </ul>
          {% endif %}
        </div>
        {% endif %}
        <nav class="bg-white dark:bg-gray-800 shadow rounded-lg p-3">
          <h2 class="text-xs font-semibold uppercase tracking-wide text-gray-500 dark:text-gray-400 mb-2">Pages</h2>
          <ul class="space-y-1">
            {% for page in sidebar %}
            <li class="flex items-center gap-1">
              <a href="{{ page.href }}" class="flex-1 truncate rounded px-2 py-1 text-sm {% if page.active %}bg-gray-200 dark:bg-gray-700 font-semibold{% else %}hover:bg-gray-100 dark:hover:bg-gray-700{% endif %}">{{ page.title }}</a>
              <button onclick="toggleFavorite({{ page.id }})" title="Toggle favorite" class="{% if page.is_favorite %}text-yellow-500{% else %}text-gray-300 dark:text-gray-600{% endif %} hover:text-yellow-500">★</button>
            </li>
            {% endfor %}
          </ul>
        </nav>
      </aside>

      {% if has_selection %}
      <section class="flex-1 bg-white dark:bg-gray-800 shadow rounded-lg p-6">
        {% if edit_mode %}
        <div class="space-y-3">
          <input id="title-input" value="{{ selected_title }}" class="w-full bg-transparent text-2xl font-bold border-b border-gray-300 dark:border-gray-600 pb-1" />
          <textarea id="content-input" rows="18" class="w-full rounded border border-gray-300 dark:border-gray-600 bg-transparent p-3 font-mono text-sm">{{ selected_content }}</textarea>
          <div class="flex gap-2">
            <button onclick="savePage({{ selected_id }}, {{ selected_favorite }})" class="rounded bg-gray-900 px-4 py-2 text-sm font-semibold text-white hover:bg-gray-800">Save</button>
            <a href="{{ view_href }}" class="rounded border border-gray-300 dark:border-gray-600 px-4 py-2 text-sm">Cancel</a>
          </div>
        </div>
        {% else %}
        <div class="mb-2 flex items-start justify-between gap-3">
          <h1 class="text-2xl font-bold">{{ selected_title }}</h1>
          <div class="flex items-center gap-2">
            <button onclick="toggleFavorite({{ selected_id }})" title="Toggle favorite" class="text-xl {% if selected_favorite %}text-yellow-500{% else %}text-gray-300 dark:text-gray-600{% endif %} hover:text-yellow-500">★</button>
            <a href="{{ edit_href }}" class="rounded border border-gray-300 dark:border-gray-600 px-3 py-1 text-sm">Edit</a>
            <button onclick="deletePage({{ selected_id }})" class="rounded border border-red-300 px-3 py-1 text-sm text-red-600">Delete</button>
          </div>
        </div>
        <article class="page-body text-gray-800 dark:text-gray-200">{{ rendered_html|safe }}</article>
        {% endif %}
      </section>
      {% else %}
      <section class="flex-1 bg-white dark:bg-gray-800 shadow rounded-lg p-6 flex items-center justify-center">
        <div class="text-center space-y-3">
          <p class="text-gray-500 dark:text-gray-400">No pages yet. Create your first one.</p>
          <button onclick="newPage()" class="rounded bg-gray-900 px-4 py-2 text-sm font-semibold text-white hover:bg-gray-800">New page</button>
        </div>
      </section>
      {% endif %}

      {% if has_selection %}
      <aside class="w-52 shrink-0">
        <div class="bg-white dark:bg-gray-800 shadow rounded-lg p-3 sticky top-4">
          <h2 class="text-xs font-semibold uppercase tracking-wide text-gray-500 dark:text-gray-400 mb-2">On this page</h2>
          {% if toc.len() == 0 %}
          <p class="text-sm text-gray-500 dark:text-gray-400">No headings.</p>
          {% else %}
          <nav class="space-y-1">
            {% for entry in toc %}
            <a href="{{ entry.href }}" class="block truncate text-sm text-gray-600 dark:text-gray-300 hover:underline {{ entry.indent_class }}">{{ entry.text }}</a>
            {% endfor %}
          </nav>
          {% endif %}
        </div>
      </aside>
      {% endif %}
    </div>

    <script>
      async function newPage() {
        const res = await fetch('/api/pages', {
          method: 'POST',
          headers: { 'Content-Type': 'application/json' },
          body: JSON.stringify({ title: '{{ next_title }}', content: '' })
        });
        if (res.ok) {
          const page = await res.json();
          window.location = '/notes?page=' + page.id + '&edit=1';
        }
      }

      async function savePage(id, favorite) {
        const title = document.getElementById('title-input').value;
        const content = document.getElementById('content-input').value;
        const res = await fetch('/api/pages/' + id, {
          method: 'PUT',
          headers: { 'Content-Type': 'application/json' },
          body: JSON.stringify({ title: title, content: content, isFavorite: favorite })
        });
        if (res.ok) {
          window.location = '/notes?page=' + id;
        } else {
          const data = await res.json();
          alert(data.error);
        }
      }

      async function toggleFavorite(id) {
        const listRes = await fetch('/api/pages');
        if (!listRes.ok) return;
        const data = await listRes.json();
        const page = data.pages.find(function (p) { return p.id === id; });
        if (!page) return;
        const res = await fetch('/api/pages/' + id, {
          method: 'PUT',
          headers: { 'Content-Type': 'application/json' },
          body: JSON.stringify({ title: page.title, content: page.content ?? '', isFavorite: !page.isFavorite })
        });
        if (res.ok) {
          window.location.reload();
        }
      }

      async function deletePage(id) {
        if (!confirm('Delete this page?')) return;
        const res = await fetch('/api/pages/' + id, { method: 'DELETE' });
        if (res.ok) {
          window.location = '/notes';
        }
      }

      async function saveSettings() {
        const theme = document.getElementById('theme-select').value;
        const font = document.getElementById('font-select').value;
        const res = await fetch('/api/user/settings', {
          method: 'POST',
          headers: { 'Content-Type': 'application/json' },
          body: JSON.stringify({ theme: theme, font: font })
        });
        if (res.ok) {
          window.location.reload();
        }
      }

      async function uploadProfileImage(input) {
        if (!input.files || input.files.length === 0) return;
        const form = new FormData();
        form.append('profileImage', input.files[0]);
        const res = await fetch('/api/auth/profile-image', { method: 'POST', body: form });
        if (res.ok) {
          window.location.reload();
        } else {
          const data = await res.json();
          alert(data.error);
        }
      }

      async function logout() {
        await fetch('/api/auth/logout', { method: 'POST' });
        window.location = '/';
      }
    </script>
  </body>
</html>"##,
    ext = "html"
)]
struct NotesTemplate {
    dark: bool,
    font_class: String,
    user_name: String,
    profile_image_url: String,
    query: String,
    searched: bool,
    edit_mode: bool,
    next_title: String,
    edit_href: String,
    view_href: String,
    sidebar: Vec<SidebarPage>,
    results: Vec<ResultRow>,
    toc: Vec<TocEntry>,
    has_selection: bool,
    selected_id: i64,
    selected_title: String,
    selected_content: String,
    selected_favorite: bool,
    rendered_html: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body, body::Body, http::Request};
    use tower::ServiceExt;

    fn test_state(uploads_dir: &std::path::Path) -> SharedState {
        Arc::new(AppState {
            store: Mutex::new(Store::open_in_memory().unwrap()),
            key: SigningKey::from_secret("test-secret"),
            uploads_dir: uploads_dir.to_path_buf(),
        })
    }

    fn test_router() -> Router {
        build_router(test_state(&std::env::temp_dir().join("quillpad-test-uploads")))
    }

    fn json_request(method: &str, uri: &str, cookie: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn read_json(response: Response) -> Value {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn read_html(response: Response) -> String {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Registers `username` with password "hunter2" and returns the session
    /// cookie pair from a follow-up login.
    async fn register_and_login(router: &Router, username: &str) -> String {
        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({ "username": username, "password": "hunter2", "name": "Mina" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/login",
                None,
                json!({ "username": username, "password": "hunter2" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(set_cookie.contains("HttpOnly"));
        set_cookie.split(';').next().unwrap().to_string()
    }

    async fn create_page(router: &Router, cookie: &str, title: &str, content: &str) -> i64 {
        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/pages",
                Some(cookie),
                json!({ "title": title, "content": content }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        read_json(response).await["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = test_router()
            .oneshot(get_request("/healthz", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_register_missing_fields_rejected() {
        let router = test_router();
        let response = router
            .oneshot(json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({ "username": "mina", "password": "" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["error"], "Missing required fields");
    }

    #[tokio::test]
    async fn test_register_duplicate_username_rejected() {
        let router = test_router();
        register_and_login(&router, "mina").await;
        let response = router
            .oneshot(json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({ "username": "mina", "password": "other", "name": "Other" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            read_json(response).await["error"],
            "This username is already taken"
        );
    }

    #[tokio::test]
    async fn test_login_wrong_password_rejected() {
        let router = test_router();
        register_and_login(&router, "mina").await;
        let response = router
            .oneshot(json_request(
                "POST",
                "/api/auth/login",
                None,
                json!({ "username": "mina", "password": "wrong" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            read_json(response).await["error"],
            "Invalid username or password"
        );
    }

    #[tokio::test]
    async fn test_logout_expires_cookie() {
        let router = test_router();
        let response = router
            .oneshot(json_request("POST", "/api/auth/logout", None, json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(set_cookie.starts_with("token=;"));
        assert!(set_cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_pages_require_auth() {
        let response = test_router()
            .oneshot(get_request("/api/pages", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = test_router()
            .oneshot(get_request("/api/pages", Some("token=not-a-real-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_page_crud_round_trip() {
        let router = test_router();
        let cookie = register_and_login(&router, "mina").await;

        let page_id = create_page(&router, &cookie, "Groceries", "- milk\n- eggs").await;

        let response = router
            .clone()
            .oneshot(get_request("/api/pages", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listing = read_json(response).await;
        assert_eq!(listing["userName"], "Mina");
        assert_eq!(listing["pages"].as_array().unwrap().len(), 1);
        assert_eq!(listing["pages"][0]["title"], "Groceries");
        assert_eq!(listing["pages"][0]["isFavorite"], false);

        let response = router
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/api/pages/{page_id}"),
                Some(&cookie),
                json!({ "title": "Groceries!", "content": "- milk", "isFavorite": true }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let updated = read_json(response).await;
        assert_eq!(updated["title"], "Groceries!");
        assert_eq!(updated["isFavorite"], true);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/pages/{page_id}"))
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = router
            .oneshot(get_request("/api/pages", Some(&cookie)))
            .await
            .unwrap();
        let listing = read_json(response).await;
        assert!(listing["pages"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_favorite_toggle_without_content_stores_empty_string() {
        let router = test_router();
        let cookie = register_and_login(&router, "mina").await;
        let page_id = create_page(&router, &cookie, "Note", "original body").await;

        let response = router
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/api/pages/{page_id}"),
                Some(&cookie),
                json!({ "title": "Note", "isFavorite": true }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let updated = read_json(response).await;
        assert_eq!(updated["content"], "");
        assert_eq!(updated["isFavorite"], true);

        let response = router
            .oneshot(get_request("/api/pages", Some(&cookie)))
            .await
            .unwrap();
        let listing = read_json(response).await;
        assert_eq!(listing["pages"][0]["content"], "");
    }

    #[tokio::test]
    async fn test_cross_user_page_access_forbidden() {
        let router = test_router();
        let mina = register_and_login(&router, "mina").await;
        let theo = register_and_login(&router, "theo").await;
        let page_id = create_page(&router, &mina, "Private", "secret").await;

        let response = router
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/api/pages/{page_id}"),
                Some(&theo),
                json!({ "title": "Hijacked", "content": "", "isFavorite": false }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/pages/{page_id}"))
                    .header(header::COOKIE, &theo)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // A page that never existed answers identically.
        let response = router
            .oneshot(json_request(
                "PUT",
                "/api/pages/99999",
                Some(&theo),
                json!({ "title": "Ghost", "content": "", "isFavorite": false }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_settings_round_trip_and_validation() {
        let router = test_router();
        let cookie = register_and_login(&router, "mina").await;

        let response = router
            .clone()
            .oneshot(get_request("/api/user/settings", Some(&cookie)))
            .await
            .unwrap();
        let settings = read_json(response).await;
        assert_eq!(settings["theme"], "light");
        assert_eq!(settings["font"], "font1");

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/user/settings",
                Some(&cookie),
                json!({ "theme": "dark", "font": "font2" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["theme"], "dark");

        let response = router
            .clone()
            .oneshot(get_request("/api/user/settings", Some(&cookie)))
            .await
            .unwrap();
        let settings = read_json(response).await;
        assert_eq!(settings["theme"], "dark");
        assert_eq!(settings["font"], "font2");

        let response = router
            .oneshot(json_request(
                "POST",
                "/api/user/settings",
                Some(&cookie),
                json!({ "theme": "blue", "font": "font1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_profile_image_defaults() {
        let router = test_router();
        let cookie = register_and_login(&router, "mina").await;
        let response = router
            .oneshot(get_request("/api/auth/profile-image", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["imageUrl"], "/default-profile.png");
    }

    fn multipart_request(
        uri: &str,
        cookie: &str,
        field: &str,
        content_type: &str,
        data: &str,
    ) -> Request<Body> {
        let boundary = "qp-test-boundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"me.png\"\r\nContent-Type: {content_type}\r\n\r\n{data}\r\n--{boundary}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header(header::COOKIE, cookie)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_profile_image_upload_round_trip() {
        let uploads = tempfile::tempdir().unwrap();
        let router = build_router(test_state(uploads.path()));
        let cookie = register_and_login(&router, "mina").await;

        let response = router
            .clone()
            .oneshot(multipart_request(
                "/api/auth/profile-image",
                &cookie,
                "profileImage",
                "image/png",
                "PNGDATA",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let uploaded = read_json(response).await;
        assert_eq!(uploaded["success"], true);
        let image_url = uploaded["imageUrl"].as_str().unwrap().to_string();
        assert!(image_url.starts_with("/uploads/1-"));
        assert!(image_url.ends_with(".png"));

        let response = router
            .clone()
            .oneshot(get_request("/api/auth/profile-image", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(read_json(response).await["imageUrl"], image_url.as_str());

        // The stored file is served back under /uploads.
        let response = router
            .oneshot(get_request(&image_url, Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_html(response).await, "PNGDATA");
    }

    #[tokio::test]
    async fn test_profile_image_rejects_non_image_and_missing_field() {
        let uploads = tempfile::tempdir().unwrap();
        let router = build_router(test_state(uploads.path()));
        let cookie = register_and_login(&router, "mina").await;

        let response = router
            .clone()
            .oneshot(multipart_request(
                "/api/auth/profile-image",
                &cookie,
                "profileImage",
                "text/plain",
                "not an image",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(multipart_request(
                "/api/auth/profile-image",
                &cookie,
                "somethingElse",
                "image/png",
                "PNGDATA",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["error"], "No image provided");
    }

    #[tokio::test]
    async fn test_login_page_redirects_when_authed() {
        let router = test_router();
        let response = router
            .clone()
            .oneshot(get_request("/", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(read_html(response).await.contains("Sign in"));

        let cookie = register_and_login(&router, "mina").await;
        let response = router
            .oneshot(get_request("/", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/notes");
    }

    #[tokio::test]
    async fn test_notes_requires_auth() {
        let response = test_router()
            .oneshot(get_request("/notes", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/");
    }

    #[tokio::test]
    async fn test_notes_renders_selected_page_with_anchors() {
        let router = test_router();
        let cookie = register_and_login(&router, "mina").await;
        let page_id = create_page(
            &router,
            &cookie,
            "Guide",
            "# My Heading\n\nsome text\n\n## Sub Part\n\nmore",
        )
        .await;

        let response = router
            .oneshot(get_request(&format!("/notes?page={page_id}"), Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = read_html(response).await;
        assert!(html.contains("id=\"my-heading\""));
        assert!(html.contains("id=\"sub-part\""));
        assert!(html.contains("href=\"#my-heading\""));
        assert!(html.contains("Guide"));
    }

    #[tokio::test]
    async fn test_notes_search_lists_matches_and_highlights() {
        let router = test_router();
        let cookie = register_and_login(&router, "mina").await;
        let page_id = create_page(&router, &cookie, "Pets", "cat cat dog").await;
        create_page(&router, &cookie, "Empty", "no animals here").await;

        let response = router
            .oneshot(get_request(
                &format!("/notes?page={page_id}&q=cat"),
                Some(&cookie),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = read_html(response).await;
        assert!(html.contains("Results for"));
        assert!(html.contains("2 matches"));
        assert!(html.contains("<span class=\"bg-yellow-300 font-bold text-yellow-800\">cat</span>"));
    }

    #[tokio::test]
    async fn test_search_results_keep_page_scan_order() {
        let router = test_router();
        let cookie = register_and_login(&router, "mina").await;
        let alpha = create_page(&router, &cookie, "Alpha", "a fox").await;
        let beta = create_page(&router, &cookie, "Beta", "another fox").await;

        let response = router
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/api/pages/{beta}"),
                Some(&cookie),
                json!({ "title": "Beta", "content": "another fox", "isFavorite": true }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(get_request(
                &format!("/notes?page={alpha}&q=fox"),
                Some(&cookie),
            ))
            .await
            .unwrap();
        let html = read_html(response).await;

        // Only the results panel, which sits above the sidebar heading.
        let start = html.find("Results for").unwrap();
        let end = html.find(">Pages</h2>").unwrap();
        let results = &html[start..end];
        let alpha_at = results.find("Alpha").unwrap();
        let beta_at = results.find("Beta").unwrap();
        assert!(
            alpha_at < beta_at,
            "results list pages in ascending-id scan order, not sidebar order"
        );
    }

    #[tokio::test]
    async fn test_notes_sidebar_orders_favorites_first() {
        let router = test_router();
        let cookie = register_and_login(&router, "mina").await;
        create_page(&router, &cookie, "Alpha", "").await;
        let beta = create_page(&router, &cookie, "Beta", "").await;

        let response = router
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/api/pages/{beta}"),
                Some(&cookie),
                json!({ "title": "Beta", "content": "", "isFavorite": true }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(get_request("/notes", Some(&cookie)))
            .await
            .unwrap();
        let html = read_html(response).await;
        let beta_at = html.find("Beta").unwrap();
        let alpha_at = html.find("Alpha").unwrap();
        assert!(beta_at < alpha_at, "favorite pages lead the sidebar");
    }

    #[tokio::test]
    async fn test_default_selection_is_lowest_id_page() {
        let router = test_router();
        let cookie = register_and_login(&router, "mina").await;
        create_page(&router, &cookie, "Alpha", "first body").await;
        let beta = create_page(&router, &cookie, "Beta", "second body").await;

        let response = router
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/api/pages/{beta}"),
                Some(&cookie),
                json!({ "title": "Beta", "content": "second body", "isFavorite": true }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Favoriting reorders the sidebar but never the default selection.
        let response = router
            .clone()
            .oneshot(get_request("/notes", Some(&cookie)))
            .await
            .unwrap();
        let html = read_html(response).await;
        assert!(html.contains("<h1 class=\"text-2xl font-bold\">Alpha</h1>"));

        // An unknown page id falls back the same way.
        let response = router
            .oneshot(get_request("/notes?page=999", Some(&cookie)))
            .await
            .unwrap();
        let html = read_html(response).await;
        assert!(html.contains("<h1 class=\"text-2xl font-bold\">Alpha</h1>"));
    }

    #[tokio::test]
    async fn test_deleting_selected_page_falls_back_to_first_remaining() {
        let router = test_router();
        let cookie = register_and_login(&router, "mina").await;
        let first = create_page(&router, &cookie, "First", "keep me").await;
        let second = create_page(&router, &cookie, "Second", "to be deleted").await;

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/pages/{second}"))
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // The stale selection falls back to the first remaining page.
        let response = router
            .clone()
            .oneshot(get_request(&format!("/notes?page={second}"), Some(&cookie)))
            .await
            .unwrap();
        let html = read_html(response).await;
        assert!(html.contains("<h1 class=\"text-2xl font-bold\">First</h1>"));

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/pages/{first}"))
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = router
            .oneshot(get_request("/notes", Some(&cookie)))
            .await
            .unwrap();
        let html = read_html(response).await;
        assert!(html.contains("No pages yet"));
    }

    #[tokio::test]
    async fn test_notes_edit_mode_shows_raw_markdown() {
        let router = test_router();
        let cookie = register_and_login(&router, "mina").await;
        let page_id = create_page(&router, &cookie, "Draft", "# Raw *markdown*").await;

        let response = router
            .oneshot(get_request(
                &format!("/notes?page={page_id}&edit=1"),
                Some(&cookie),
            ))
            .await
            .unwrap();
        let html = read_html(response).await;
        assert!(html.contains("<textarea"));
        assert!(html.contains("# Raw *markdown*"));
        assert!(!html.contains("id=\"raw-markdown\""));
    }
}
