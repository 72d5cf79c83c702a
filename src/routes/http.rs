//! HTTP endpoint handlers. Thin wrappers that resolve the session token,
//! forward to the state machine, and map typed errors onto status codes.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::domain::ChoiceKey;
use crate::error::{AuthError, RoundError};
use crate::protocol::*;
use crate::round::Session;
use crate::state::{ActiveSession, AppState};

/// Session tokens travel in this header on every authenticated request.
const SESSION_HEADER: &str = "x-session-token";

/// HTTP-facing error: a status plus a user-readable message.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "sesión no válida")
    }

    fn forbidden(message: &str) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorOut { message: self.message })).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        let status = match &e {
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::DuplicateUser => StatusCode::CONFLICT,
            AuthError::Registration(_) => StatusCode::BAD_REQUEST,
            AuthError::Store(_) | AuthError::Hash(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<RoundError> for ApiError {
    fn from(e: RoundError) -> Self {
        let status = match &e {
            RoundError::IncompleteAnswers { .. } => StatusCode::BAD_REQUEST,
            RoundError::WrongPhase { .. } => StatusCode::CONFLICT,
            RoundError::Generation(_) => StatusCode::BAD_GATEWAY,
            RoundError::GenerationUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e.to_string())
    }
}

fn token_from(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(ApiError::unauthorized)
}

/// Resolve the token to the student's session handle. The map lock is
/// dropped before this returns; round work then runs under the per-session
/// lock only, so a slow generation stalls nobody else.
async fn student_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Arc<Mutex<Session>>, ApiError> {
    let token = token_from(headers)?;
    let sessions = state.sessions.read().await;
    match sessions.get(token) {
        Some(ActiveSession::Student { session, .. }) => Ok(session.clone()),
        Some(ActiveSession::Admin { .. }) => {
            Err(ApiError::forbidden("las cuentas de administrador no practican"))
        }
        None => Err(ApiError::unauthorized()),
    }
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse {
    Json(HealthOut { ok: true })
}

#[instrument(level = "info", skip(state, body), fields(username = %body.username))]
pub async fn http_register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterIn>,
) -> Result<Json<OkOut>, ApiError> {
    state.register(&body.username, &body.password, &body.confirm_password)?;
    Ok(Json(OkOut { ok: true }))
}

#[instrument(level = "info", skip(state, body), fields(username = %body.username))]
pub async fn http_login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginIn>,
) -> Result<Json<LoginOut>, ApiError> {
    let ok = state.login(&body.username, &body.password).await?;
    Ok(Json(LoginOut { token: ok.token, is_admin: ok.is_admin, level: ok.level }))
}

#[instrument(level = "info", skip_all)]
pub async fn http_logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<OkOut>, ApiError> {
    let token = token_from(&headers)?;
    if !state.logout(token).await {
        return Err(ApiError::unauthorized());
    }
    Ok(Json(OkOut { ok: true }))
}

#[instrument(level = "info", skip_all)]
pub async fn http_round_get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RoundOut>, ApiError> {
    let session = student_session(&state, &headers).await?;
    let session = session.lock().await;
    Ok(Json(to_round_out(&session)))
}

/// Kick off a round: generate passage + questions at the session's level.
/// Generation happens under the per-session lock, after the session map has
/// been released; only this user's own requests wait on it.
#[instrument(level = "info", skip_all)]
pub async fn http_round_start(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RoundOut>, ApiError> {
    let generator =
        state.generator.as_ref().ok_or_else(|| ApiError::from(RoundError::GenerationUnavailable))?;

    let session = student_session(&state, &headers).await?;
    let mut session = session.lock().await;
    session.start_round(generator).await?;
    info!(target: "round", username = %session.username, level = session.current_level,
          "HTTP round served");
    Ok(Json(to_round_out(&session)))
}

#[instrument(level = "info", skip_all)]
pub async fn http_round_answers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SubmitIn>,
) -> Result<Json<RoundOut>, ApiError> {
    let mut answers = HashMap::new();
    for (index, letter) in &body.answers {
        let key = ChoiceKey::parse(letter.trim()).ok_or_else(|| {
            ApiError::new(StatusCode::BAD_REQUEST, format!("respuesta no válida: {letter:?}"))
        })?;
        answers.insert(*index, key);
    }

    let session = student_session(&state, &headers).await?;
    let mut session = session.lock().await;
    session.submit_answers(&answers)?;
    Ok(Json(to_round_out(&session)))
}

#[instrument(level = "info", skip_all)]
pub async fn http_round_grade(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<GradeOut>, ApiError> {
    let session = student_session(&state, &headers).await?;
    let mut session = session.lock().await;
    let outcome = session.grade(state.store.as_ref())?;
    info!(target: "round", username = %session.username, score = outcome.score,
          "HTTP round graded");
    Ok(Json(to_grade_out(&session, &outcome)))
}

#[instrument(level = "info", skip_all)]
pub async fn http_round_next(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RoundOut>, ApiError> {
    let session = student_session(&state, &headers).await?;
    let mut session = session.lock().await;
    session.next_round()?;
    Ok(Json(to_round_out(&session)))
}

/// The student's own level + persisted round history.
#[instrument(level = "info", skip_all)]
pub async fn http_progress(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ProgressOut>, ApiError> {
    let session = student_session(&state, &headers).await?;
    let session = session.lock().await;
    let history = state
        .store
        .get_user(&session.username)
        .map_err(AuthError::Store)?
        .map(|r| r.history().to_vec())
        .unwrap_or_default();
    Ok(Json(ProgressOut { level: session.current_level, history }))
}

/// Admin roster: every student with their current level and round count.
#[instrument(level = "info", skip_all)]
pub async fn http_admin_students(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<StudentRow>>, ApiError> {
    let token = token_from(&headers)?;
    {
        let sessions = state.sessions.read().await;
        match sessions.get(token) {
            Some(ActiveSession::Admin { .. }) => {}
            Some(ActiveSession::Student { .. }) => {
                return Err(ApiError::forbidden("solo administradores"));
            }
            None => return Err(ApiError::unauthorized()),
        }
    }

    let mut rows: Vec<StudentRow> = state
        .store
        .list_students()
        .map_err(AuthError::Store)?
        .iter()
        .map(|u| StudentRow {
            username: u.username.clone(),
            level: u.current_level().unwrap_or_default(),
            rounds: u.history().len(),
        })
        .collect();
    rows.sort_by(|a, b| a.username.cmp(&b.username));
    Ok(Json(rows))
}
