use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{
        header::{ACCEPT, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::controller::CopyError;
use crate::gemini::{AnalysisError, Analyzer};
use crate::image::ImagePayload;
use crate::models::{AnalyzeRequest, Section};
use crate::notify::{MemoryClipboard, Notification};
use crate::render::render_page;
use crate::session::{
    expired_session_cookie, session_cookie, session_id_from_cookie, SessionStore,
};

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub analyzer: Arc<dyn Analyzer>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeForm {
    #[serde(default)]
    pub text: String,
}

/// Text riding along with the image actions so typing is never lost.
#[derive(Debug, Deserialize)]
pub struct DraftForm {
    pub text: Option<String>,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/analyze", post(analyze_form))
        .route("/image", post(select_image))
        .route("/image/clear", post(clear_image))
        .route("/copy/:section", post(copy_section))
        .route("/reset", post(reset))
        .route("/api/analyze", post(analyze_api))
        .route("/health", get(health))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
}

// ── Session plumbing ─────────────────────────────────────────────────────────

/// Current session id, plus the cookie to set when a new one was created.
fn page_session(state: &AppState, headers: &HeaderMap) -> (Uuid, Option<String>) {
    let existing = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(session_id_from_cookie);
    let (id, created) = state.sessions.resolve(existing);
    if created {
        debug!("new page session {} ({} live)", id, state.sessions.len());
    }
    (id, created.then(|| session_cookie(id)))
}

fn with_cookie(mut response: Response, cookie: Option<String>) -> Response {
    if let Some(cookie) = cookie {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => warn!("could not encode session cookie: {}", e),
        }
    }
    response
}

fn back_to_page(cookie: Option<String>) -> Response {
    with_cookie(Redirect::to("/").into_response(), cookie)
}

// ── Page routes ──────────────────────────────────────────────────────────────

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (id, cookie) = page_session(&state, &headers);
    let page = state
        .sessions
        .with(id, |controller| {
            let notice = controller.take_notification();
            render_page(controller, notice.as_ref())
        })
        .unwrap_or_default();
    with_cookie(Html(page).into_response(), cookie)
}

async fn analyze_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<AnalyzeForm>,
) -> Response {
    let (id, cookie) = page_session(&state, &headers);
    let submission = state
        .sessions
        .with(id, |controller| controller.submit_text(form.text))
        .flatten();

    let Some(submission) = submission else {
        return back_to_page(cookie);
    };

    info!("session {} submitted analysis", id);
    let sessions = state.sessions.clone();
    let analyzer = state.analyzer.clone();
    tokio::spawn(async move {
        let outcome = analyzer
            .analyze(&submission.text, submission.image.as_ref())
            .await;
        if sessions.with(id, |controller| controller.finish(outcome)).is_none() {
            debug!("session {} ended before its analysis finished", id);
        }
    });

    back_to_page(cookie)
}

async fn select_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let (id, cookie) = page_session(&state, &headers);
    let mut text = None;
    let mut upload = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("bad image upload: {}", e);
                return with_cookie(
                    (StatusCode::BAD_REQUEST, e.body_text()).into_response(),
                    cookie,
                );
            }
        };

        match field.name() {
            Some("text") => match field.text().await {
                Ok(value) => text = Some(value),
                Err(e) => {
                    warn!("failed to read draft text: {}", e);
                    return with_cookie(
                        (StatusCode::BAD_REQUEST, e.body_text()).into_response(),
                        cookie,
                    );
                }
            },
            Some("image") if upload.is_none() => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = match field.bytes().await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("failed to read image upload: {}", e);
                        return with_cookie(
                            (StatusCode::BAD_REQUEST, e.body_text()).into_response(),
                            cookie,
                        );
                    }
                };
                // A picker submitted with nothing chosen sends an empty, unnamed part.
                if bytes.is_empty() && file_name.as_deref().map_or(true, str::is_empty) {
                    continue;
                }
                upload = Some(ImagePayload::from_upload(
                    bytes.to_vec(),
                    content_type.as_deref(),
                    file_name,
                ));
            }
            _ => {}
        }
    }

    state.sessions.with(id, |controller| {
        if let Some(text) = text {
            controller.set_text(text);
        }
        match upload {
            Some(Ok(image)) => {
                debug!(
                    "session {} selected {:?} ({} bytes)",
                    id,
                    image.file_name,
                    image.bytes.len()
                );
                controller.select_image(image);
            }
            Some(Err(e)) => {
                warn!("session {} rejected upload: {}", id, e);
                controller.notify(Notification::info(e.to_string()));
            }
            None => {}
        }
    });

    back_to_page(cookie)
}

async fn clear_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<DraftForm>,
) -> Response {
    let (id, cookie) = page_session(&state, &headers);
    state.sessions.with(id, |controller| {
        if let Some(text) = form.text {
            controller.set_text(text);
        }
        controller.clear_image();
    });
    back_to_page(cookie)
}

/// Copies a card's text. Script callers asking for JSON get the text and the
/// notice back; a plain form post is sent back to the page, which shows the
/// notice.
async fn copy_section(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Response {
    let (id, cookie) = page_session(&state, &headers);
    let Some(section) = Section::from_key(&key) else {
        return with_cookie(
            (StatusCode::NOT_FOUND, format!("unknown section {}", key)).into_response(),
            cookie,
        );
    };
    let wants_json = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    let mut clipboard = MemoryClipboard::default();
    let copied = state
        .sessions
        .with(id, |controller| -> Result<Option<Notification>, CopyError> {
            controller.copy_section(section, &mut clipboard)?;
            // the script shows the notice itself
            Ok(if wants_json { controller.take_notification() } else { None })
        })
        .unwrap_or(Err(CopyError::NoResult));

    let response = match copied {
        Ok(notice) if wants_json => Json(json!({
            "section": section.key(),
            "text": clipboard.contents().unwrap_or_default(),
            "notice": notice.map(|n| n.message),
        }))
        .into_response(),
        Ok(_) => Redirect::to("/").into_response(),
        Err(e @ CopyError::NoResult) => (StatusCode::CONFLICT, e.to_string()).into_response(),
        Err(e @ CopyError::NotCopyable(_)) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    };
    with_cookie(response, cookie)
}

async fn reset(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(id) = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(session_id_from_cookie)
    {
        if state.sessions.remove(id) {
            debug!("session {} reset", id);
        }
    }
    back_to_page(Some(expired_session_cookie()))
}

// ── JSON API ─────────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn analyze_api(State(state): State<AppState>, Json(req): Json<AnalyzeRequest>) -> Response {
    let image = match req.image.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(encoded) => match ImagePayload::from_encoded(encoded) {
            Ok(image) => Some(image),
            Err(e) => {
                return (StatusCode::BAD_REQUEST, Json(json!({"detail": e.to_string()})))
                    .into_response()
            }
        },
        None => None,
    };

    if req.text.trim().is_empty() && image.is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Either text or image is required"})),
        )
            .into_response();
    }

    match state.analyzer.analyze(&req.text, image.as_ref()).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => {
            let (status, detail) = match &e {
                AnalysisError::NoResponse => (StatusCode::BAD_GATEWAY, e.to_string()),
                AnalysisError::MalformedJson(_) => (StatusCode::BAD_GATEWAY, e.to_string()),
                AnalysisError::Upstream { .. } => (
                    StatusCode::BAD_GATEWAY,
                    "Upstream returned an error".to_string(),
                ),
                AnalysisError::Request(msg) => (
                    StatusCode::BAD_GATEWAY,
                    format!("Upstream request failed: {}", msg),
                ),
                AnalysisError::InvalidApiKey => {
                    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                }
            };
            (status, Json(json!({"detail": detail}))).into_response()
        }
    }
}
