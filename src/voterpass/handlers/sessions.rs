//! Verification session endpoints.
//!
//! Every transition answers with the session snapshot, including on failure,
//! so the client always sees the current step, attempt counters and (after a
//! wrong mobile code) the freshly generated challenge.

use axum::{
    extract::{Extension, Path},
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError};
use tracing::{debug, instrument};
use ulid::Ulid;
use utoipa::ToSchema;

use crate::verification::{
    storage::{ballot_access, BallotAccess},
    IdentityEvidence, SessionController, SessionSnapshot, UserRecord, VerificationError,
    VerificationMethod,
};
use crate::voterpass::registry::SessionRegistry;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MobileCodeRequest {
    pub selected: u8,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SwitchMethodRequest {
    pub method: VerificationMethod,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct CreatedSession {
    pub id: String,
    pub session: SessionSnapshot,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSnapshot>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct BallotResponse {
    pub access: BallotAccess,
}

/// HTTP status for a refused verification action.
#[must_use]
pub fn status_for(err: &VerificationError) -> StatusCode {
    match err {
        VerificationError::InputMismatch | VerificationError::CodeExpired => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        VerificationError::LockedOut { .. } => StatusCode::TOO_MANY_REQUESTS,
        VerificationError::SessionExpired => StatusCode::GONE,
        VerificationError::ExternalDeviceFailure(_) => StatusCode::FAILED_DEPENDENCY,
        VerificationError::InvalidTransition(_) => StatusCode::CONFLICT,
        VerificationError::MissingUserData | VerificationError::MalformedUserData(_) => {
            StatusCode::BAD_REQUEST
        }
    }
}

fn error_response(err: &VerificationError, session: Option<SessionSnapshot>) -> Response {
    let body = Json(ErrorBody {
        error: err.to_string(),
        session,
    });

    let mut response = (status_for(err), body).into_response();
    if let VerificationError::LockedOut { remaining_seconds } = err {
        if let Ok(value) = HeaderValue::from_str(&remaining_seconds.to_string()) {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
    }

    response
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "Session not found".to_string(),
            session: None,
        }),
    )
        .into_response()
}

fn missing_payload() -> Response {
    (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response()
}

fn parse_id(id: &str) -> Option<Ulid> {
    Ulid::from_string(id).ok()
}

/// Run one transition against a live session and answer with its snapshot.
fn transition<F>(registry: &SessionRegistry, id: &str, apply: F) -> Response
where
    F: FnOnce(&mut SessionController) -> Result<(), VerificationError>,
{
    let Some(controller) = parse_id(id).and_then(|id| registry.get(&id)) else {
        return not_found();
    };

    let (result, snapshot) = {
        let mut session = controller.lock().unwrap_or_else(PoisonError::into_inner);
        let result = apply(&mut session);
        (result, session.snapshot())
    };

    match result {
        Ok(()) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(err) => {
            debug!(error = %err, "transition refused");
            error_response(&err, Some(snapshot))
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/sessions",
    request_body = UserRecord,
    responses(
        (status = 201, description = "Session opened, mobile code sent", body = CreatedSession),
        (status = 400, description = "Missing or malformed user data", body = String)
    ),
    tag = "sessions"
)]
#[instrument(skip(registry, payload))]
pub async fn create_session(
    registry: Extension<Arc<SessionRegistry>>,
    payload: Option<Json<UserRecord>>,
) -> impl IntoResponse {
    let user: UserRecord = match payload {
        Some(Json(payload)) => payload,
        None => return missing_payload(),
    };

    match registry.create(&user) {
        Ok((id, session)) => (
            StatusCode::CREATED,
            Json(CreatedSession {
                id: id.to_string(),
                session,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err, None),
    }
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{id}",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Current session state", body = SessionSnapshot),
        (status = 404, description = "Unknown session", body = ErrorBody)
    ),
    tag = "sessions"
)]
pub async fn get_session(
    registry: Extension<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    transition(&registry, &id, |_| Ok(()))
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/mobile",
    params(("id" = String, Path, description = "Session id")),
    request_body = MobileCodeRequest,
    responses(
        (status = 200, description = "Mobile number verified", body = SessionSnapshot),
        (status = 422, description = "Wrong code, new challenge sent", body = ErrorBody),
        (status = 429, description = "Locked out", body = ErrorBody),
        (status = 410, description = "Session expired", body = ErrorBody)
    ),
    tag = "sessions"
)]
#[instrument(skip(registry, payload))]
pub async fn verify_mobile(
    registry: Extension<Arc<SessionRegistry>>,
    Path(id): Path<String>,
    payload: Option<Json<MobileCodeRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    transition(&registry, &id, |session| {
        session.verify_mobile_code(request.selected)
    })
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/method",
    params(("id" = String, Path, description = "Session id")),
    request_body = SwitchMethodRequest,
    responses(
        (status = 200, description = "Method switched", body = SessionSnapshot),
        (status = 409, description = "Switching not allowed now", body = ErrorBody)
    ),
    tag = "sessions"
)]
#[instrument(skip(registry, payload))]
pub async fn switch_method(
    registry: Extension<Arc<SessionRegistry>>,
    Path(id): Path<String>,
    payload: Option<Json<SwitchMethodRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    transition(&registry, &id, |session| session.switch_method(request.method))
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/otp",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "One-time code sent", body = SessionSnapshot),
        (status = 409, description = "Alternative method not chosen", body = ErrorBody)
    ),
    tag = "sessions"
)]
#[instrument(skip(registry))]
pub async fn request_otp(
    registry: Extension<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    transition(&registry, &id, SessionController::request_alternative_otp)
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/identity",
    params(("id" = String, Path, description = "Session id")),
    request_body = IdentityEvidence,
    responses(
        (status = 200, description = "Identity verified", body = SessionSnapshot),
        (status = 422, description = "Evidence rejected", body = ErrorBody),
        (status = 424, description = "Capture device unavailable", body = ErrorBody),
        (status = 429, description = "Locked out", body = ErrorBody)
    ),
    tag = "sessions"
)]
#[instrument(skip(registry, payload))]
pub async fn submit_identity(
    registry: Extension<Arc<SessionRegistry>>,
    Path(id): Path<String>,
    payload: Option<Json<IdentityEvidence>>,
) -> impl IntoResponse {
    let Some(Json(evidence)) = payload else {
        return missing_payload();
    };

    transition(&registry, &id, |session| session.submit_identity(&evidence))
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/reset",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session restarted", body = SessionSnapshot),
        (status = 404, description = "Unknown session", body = ErrorBody)
    ),
    tag = "sessions"
)]
#[instrument(skip(registry))]
pub async fn reset_session(
    registry: Extension<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match parse_id(&id).and_then(|id| registry.reset(&id)) {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => not_found(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{id}/ballot",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Voter may proceed to the ballot", body = BallotResponse),
        (status = 403, description = "Not verified or already voted", body = BallotResponse),
        (status = 404, description = "Unknown session", body = ErrorBody)
    ),
    tag = "sessions"
)]
pub async fn ballot(
    registry: Extension<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(controller) = parse_id(&id).and_then(|id| registry.get(&id)) else {
        return not_found();
    };

    let access = {
        let session = controller.lock().unwrap_or_else(PoisonError::into_inner);
        ballot_access(session.store().as_ref())
    };

    let status = if access == BallotAccess::Granted {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };

    (status, Json(BallotResponse { access })).into_response()
}

#[utoipa::path(
    delete,
    path = "/v1/sessions/{id}",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session closed"),
        (status = 404, description = "Unknown session", body = ErrorBody)
    ),
    tag = "sessions"
)]
#[instrument(skip(registry))]
pub async fn delete_session(
    registry: Extension<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if parse_id(&id).is_some_and(|id| registry.remove(&id)) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found()
    }
}
