//! HTTP surface of the verification service.

pub mod handlers;
pub mod registry;

use anyhow::Result;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;
use url::Url;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use self::handlers::{health, sessions};
use self::registry::SessionRegistry;
use crate::verification::{
    lockout::AttemptTracker,
    method::{DocumentKind, FacialCapture, Point, SecurityAnswers},
    session::VerificationSession,
    storage::BallotAccess,
    IdentityEvidence, SessionSnapshot, Stage, UserRecord, VerificationMethod,
};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        sessions::create_session,
        sessions::get_session,
        sessions::verify_mobile,
        sessions::switch_method,
        sessions::request_otp,
        sessions::submit_identity,
        sessions::reset_session,
        sessions::ballot,
        sessions::delete_session,
    ),
    components(schemas(
        health::Health,
        sessions::MobileCodeRequest,
        sessions::SwitchMethodRequest,
        sessions::CreatedSession,
        sessions::ErrorBody,
        sessions::BallotResponse,
        UserRecord,
        SessionSnapshot,
        VerificationSession,
        AttemptTracker,
        Stage,
        VerificationMethod,
        IdentityEvidence,
        FacialCapture,
        DocumentKind,
        SecurityAnswers,
        Point,
        BallotAccess,
    )),
    tags(
        (name = "health", description = "Service status"),
        (name = "sessions", description = "Voter verification sessions")
    )
)]
pub struct ApiDoc;

/// Build the application router around a session registry.
#[must_use]
pub fn router(registry: Arc<SessionRegistry>, cors_origin: Option<&Url>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    let cors = match cors_origin.and_then(|url| {
        HeaderValue::from_str(url.origin().ascii_serialization().as_str()).ok()
    }) {
        Some(origin) => cors.allow_origin(origin),
        None => cors.allow_origin(Any),
    };

    Router::new()
        .route("/health", get(health::health))
        .route("/v1/sessions", post(sessions::create_session))
        .route(
            "/v1/sessions/:id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/v1/sessions/:id/mobile", post(sessions::verify_mobile))
        .route("/v1/sessions/:id/method", post(sessions::switch_method))
        .route("/v1/sessions/:id/otp", post(sessions::request_otp))
        .route("/v1/sessions/:id/identity", post(sessions::submit_identity))
        .route("/v1/sessions/:id/reset", post(sessions::reset_session))
        .route("/v1/sessions/:id/ballot", get(sessions::ballot))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(registry)),
        )
}

/// Serve the API until ctrl-c.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn new(
    port: u16,
    registry: Arc<SessionRegistry>,
    cors_origin: Option<Url>,
) -> Result<()> {
    let app = router(registry, cors_origin.as_ref());

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::{CodeDelivery, DeliveredCode, SessionConfig};
    use axum::http::StatusCode;
    use tower::ServiceExt;

    struct Silent;

    impl CodeDelivery for Silent {
        fn deliver(&self, _phone: &str, _code: &DeliveredCode<'_>) {}
    }

    fn app() -> Router {
        let registry = Arc::new(SessionRegistry::new(
            SessionConfig::default(),
            Arc::new(Silent),
        ));
        router(registry, None)
    }

    #[tokio::test]
    async fn health_route_sets_request_id() -> anyhow::Result<()> {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        Ok(())
    }

    #[tokio::test]
    async fn create_session_route() -> anyhow::Result<()> {
        let body = serde_json::json!({
            "name": "Kavya Iyer",
            "voterID": "MAA1122334",
            "aadhaar": "1111 2222 3333",
            "phone": "9000012345",
            "constituency": "Mylapore"
        });
        let response = app()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/v1/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
        Ok(())
    }

    #[tokio::test]
    async fn openapi_lists_session_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/v1/sessions"));
        assert!(doc.paths.paths.contains_key("/v1/sessions/{id}/identity"));
    }

    #[test]
    fn cors_origin_is_accepted() -> anyhow::Result<()> {
        let registry = Arc::new(SessionRegistry::new(
            SessionConfig::default(),
            Arc::new(Silent),
        ));
        let origin = Url::parse("https://vote.example.in/app")?;
        let _router = router(registry, Some(&origin));
        Ok(())
    }
}
