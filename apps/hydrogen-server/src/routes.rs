//! The four auth routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use hydrogen_errors::{Error, ErrorBody};

use crate::context::Context;

/// Wraps [`Error`] so it can be returned directly from a handler; renders
/// using the same `{success:false, error, retry_after?}` envelope as the
/// rest of the wire protocol.
struct AppError(Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let mut body = ErrorBody::from(&self.0);
        // Login/renew auth failures never reveal which check failed.
        if matches!(self.0.kind(), hydrogen_errors::ErrorKind::Unauthorized) {
            body.error = "Invalid credentials".to_string();
        }
        (status, Json(body)).into_response()
    }
}

fn extract_bearer(headers: &HeaderMap) -> Result<String, AppError> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(Error::unauthorized)?;
    raw.strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::unauthorized().into())
}

/// Extracted straight from [`Parts`], before Axum runs any body-consuming
/// extractor declared after it in a handler's argument list — a rejection
/// here short-circuits the request before `Json<T>` ever buffers the body.
struct BearerToken(String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        extract_bearer(&parts.headers).map(BearerToken)
    }
}

/// Prefers `X-Forwarded-For` (edge/proxy deployments), falls back to the
/// socket peer address.
fn client_ip(headers: &HeaderMap, peer: &SocketAddr) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next().map(str::trim).filter(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    peer.ip().to_string()
}

fn auth_service(ctx: &Context, database: &str) -> Result<Arc<hydrogen_auth::AuthService>, AppError> {
    ctx.auth
        .get(database)
        .cloned()
        .ok_or_else(|| Error::not_found(format!("unknown database '{database}'")).into())
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    login_id: String,
    password: String,
    api_key: String,
    timezone: Option<String>,
    database: String,
}

#[derive(Debug, Serialize)]
struct LoginResponseBody {
    success: bool,
    token: String,
    expires_at: i64,
    user_id: i64,
    username: String,
    email: Option<String>,
    roles: Vec<String>,
}

async fn login(
    State(ctx): State<Arc<Context>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponseBody>, AppError> {
    let ip = client_ip(&headers, &peer);
    let svc = auth_service(&ctx, &req.database)?;
    let result = svc
        .login(&req.login_id, &req.password, &req.api_key, req.timezone.as_deref(), &req.database, &ip)
        .await?;
    Ok(Json(LoginResponseBody {
        success: true,
        token: result.token,
        expires_at: result.expires_at,
        user_id: result.user_id,
        username: result.username,
        email: result.email,
        roles: result.roles,
    }))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
    password: String,
    email: String,
    full_name: Option<String>,
    api_key: String,
    database: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponseBody {
    success: bool,
}

async fn register(
    State(ctx): State<Arc<Context>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponseBody>), AppError> {
    let svc = auth_service(&ctx, &req.database)?;
    svc.register(&req.username, &req.password, &req.email, req.full_name.as_deref(), &req.api_key, &req.database)
        .await?;
    Ok((StatusCode::CREATED, Json(RegisterResponseBody { success: true })))
}

#[derive(Debug, Deserialize)]
struct DatabaseOverride {
    database: Option<String>,
}

#[derive(Debug, Serialize)]
struct RenewResponseBody {
    success: bool,
    token: String,
    expires_at: i64,
}

async fn renew(
    State(ctx): State<Arc<Context>>,
    BearerToken(token): BearerToken,
    Json(req): Json<DatabaseOverride>,
) -> Result<Json<RenewResponseBody>, AppError> {
    let database = match &req.database {
        Some(db) => db.clone(),
        None => hydrogen_auth::peek_database(&token, &ctx.hmac_secret)?,
    };
    let svc = auth_service(&ctx, &database)?;
    let result = svc.renew(&token, req.database.as_deref()).await?;
    Ok(Json(RenewResponseBody { success: true, token: result.token, expires_at: result.expires_at }))
}

#[derive(Debug, Serialize)]
struct LogoutResponseBody {
    success: bool,
    message: &'static str,
}

async fn logout(
    State(ctx): State<Arc<Context>>,
    BearerToken(token): BearerToken,
    Json(req): Json<DatabaseOverride>,
) -> Result<Json<LogoutResponseBody>, AppError> {
    let database = match &req.database {
        Some(db) => db.clone(),
        None => hydrogen_auth::peek_database(&token, &ctx.hmac_secret)?,
    };
    let svc = auth_service(&ctx, &database)?;
    svc.logout(&token).await?;
    Ok(Json(LogoutResponseBody { success: true, message: "Logout successful" }))
}

pub fn router(ctx: Context) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/renew", post(renew))
        .route("/api/auth/logout", post(logout))
        .with_state(Arc::new(ctx))
}
