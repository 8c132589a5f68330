//! HTTP surface of the backup subsystem.
//!
//! Every `/api/backup` route sits behind the bearer-token middleware, so an
//! unauthenticated or non-admin caller is refused before any extractor reads
//! the body or any handler touches the store.

pub(crate) mod error;
pub(crate) mod handlers;

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::server::error::AuthError;
use crate::service::BackupService;

const ADMIN_ROLE: &str = "admin";
/// Refresh tokens share the signing secret but never authorize a request.
const ACCESS_TOKEN_TYPE: &str = "access";

/// Claims issued by the main application's login endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub exp: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BackupService>,
    jwt_key: DecodingKey,
}

impl AppState {
    pub fn new(service: Arc<BackupService>, jwt_secret: &str) -> Self {
        AppState {
            service,
            jwt_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
        }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let authed = Router::new()
        .route("/api/backup/backup", post(handlers::create_backup))
        .route("/api/backup/backup/list", get(handlers::list_backups))
        .route(
            "/api/backup/backup/download/:backup_filename",
            get(handlers::download_backup),
        )
        .route("/api/backup/backup/delete", delete(handlers::delete_backup))
        .route("/api/backup/backup/upload", post(handlers::upload_backup))
        .route("/api/backup/backup/import", post(handlers::import_backup))
        .route("/api/backup/restore", post(handlers::restore_backup))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let public = Router::new().route("/health", get(handlers::health));

    public
        .merge(authed)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn auth_middleware(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    match authorize(&state, &req) {
        Ok(claims) => {
            tracing::debug!(user = %claims.sub, "admin request authorized");
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

fn authorize(state: &AppState, req: &Request<Body>) -> Result<Claims, AuthError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;

    let data = jsonwebtoken::decode::<Claims>(token, &state.jwt_key, &Validation::new(Algorithm::HS256))
        .map_err(|_| AuthError::InvalidToken)?;

    if data.claims.token_type != ACCESS_TOKEN_TYPE {
        return Err(AuthError::InvalidToken);
    }
    if data.claims.role != ADMIN_ROLE {
        return Err(AuthError::NotAdmin);
    }
    Ok(data.claims)
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use crate::service::tests::Harness;
    use axum::http::StatusCode;
    use jsonwebtoken::{EncodingKey, Header};
    use tower::ServiceExt;

    pub const TEST_SECRET: &str = "test-secret";

    pub fn token_for(role: &str, secret: &str) -> String {
        token_with_type(role, "access", secret)
    }

    pub fn token_with_type(role: &str, token_type: &str, secret: &str) -> String {
        let claims = Claims {
            sub: "42".to_string(),
            role: role.to_string(),
            token_type: token_type.to_string(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    pub fn admin_token() -> String {
        token_for("admin", TEST_SECRET)
    }

    pub fn app(h: &Harness) -> Router {
        router(AppState::new(h.service.clone(), TEST_SECRET), 1024 * 1024)
    }

    pub async fn send(
        router: Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(content_type) = content_type {
            builder = builder.header("Content-Type", content_type);
        }
        router.oneshot(builder.body(Body::from(body)).unwrap()).await.unwrap()
    }

    pub async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    pub async fn assert_error(response: Response, status: StatusCode) {
        assert_eq!(response.status(), status);
        let body = body_json(response).await;
        assert_eq!(body["code"], status.as_u16());
        assert!(body["error"].is_string());
    }
}
