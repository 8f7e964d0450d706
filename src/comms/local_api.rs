use anyhow::Result;
use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::error::UpstreamError;
use crate::security::certificate::{CertificateIdentity, CertificateSource};
use crate::security::token_cache::TokenCache;
use crate::security::token_issuer::OAuthTokenIssuer;
use crate::statement::{DateRange, StatementClient};
use crate::transport::build_client;
use crate::utils::logging::preview;
use crate::utils::timing::TracingHook;

type SharedState = Arc<AppState>;

const TOKEN_PREVIEW_CHARS: usize = 100;

pub struct AppState {
    pub config: Arc<Config>,
    pub certificate: Arc<CertificateIdentity>,
    pub tokens: TokenCache,
    pub statements: StatementClient,
}

impl AppState {
    /// Wire the core from configuration: certificate first, then the shared
    /// transport, the issuer, the token cache and the statement client.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let certificate = if config.mtls.enabled {
            CertificateIdentity::load(
                CertificateSource::File(config.mtls.cert_path.clone()),
                &config.mtls.cert_password,
                config.mtls.verify_peer,
            )
        } else {
            CertificateIdentity::disabled()
        };

        let http_client = build_client(certificate.identity(), config.timeout())?;
        let hook = Arc::new(TracingHook);

        let issuer = OAuthTokenIssuer::new(
            config.bank.oauth_url.clone(),
            config.bank.client_id.clone(),
            config.bank.client_secret.clone(),
            config.bank.scope.clone(),
            http_client.clone(),
        )
        .with_hook(hook.clone());
        let tokens = TokenCache::new(Arc::new(issuer), config.renewal_buffer());

        let statements = StatementClient::new(
            config.bank.api_url.clone(),
            config.bank.dev_app_key.clone(),
            http_client,
            tokens.clone(),
        )
        .with_matchers(config.balance_matchers())
        .with_hook(hook);

        Ok(Self {
            config,
            certificate: Arc::new(certificate),
            tokens,
            statements,
        })
    }

    pub fn from_parts(
        config: Arc<Config>,
        certificate: Arc<CertificateIdentity>,
        tokens: TokenCache,
        statements: StatementClient,
    ) -> Self {
        Self {
            config,
            certificate,
            tokens,
            statements,
        }
    }
}

/// Error surface of the gateway.
pub enum ApiError {
    Upstream(UpstreamError),
    BadRequest(String),
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        ApiError::Upstream(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "error": {"message": message}})),
            )
                .into_response(),
            ApiError::Upstream(UpstreamError::Rejected { status, body }) => {
                let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                let details = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));
                (
                    code,
                    Json(json!({
                        "success": false,
                        "error": {
                            "message": "upstream bank API rejected the request",
                            "status": status,
                            "details": details,
                        }
                    })),
                )
                    .into_response()
            }
            ApiError::Upstream(err) => {
                error!(error = %err, "upstream unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({
                        "success": false,
                        "error": {
                            "message": "service unavailable",
                            "details": err.to_string(),
                        }
                    })),
                )
                    .into_response()
            }
        }
    }
}

fn require_account(branch: &str, account: &str) -> Result<(), ApiError> {
    if branch.trim().is_empty() || account.trim().is_empty() {
        return Err(ApiError::BadRequest("branch and account are required".to_string()));
    }
    Ok(())
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let status = state.tokens.inspect().await;
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "environment": state.config.server.environment,
        "mTLS": state.config.mtls.enabled,
        "tokenCached": status.cached,
        "config": {
            "oauthUrl": state.config.bank.oauth_url,
            "apiUrl": state.config.bank.api_url,
            "certPath": state.config.mtls.cert_path,
            "certLoaded": state.certificate.is_loaded(),
        }
    }))
}

async fn info_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let status = state.tokens.inspect().await;
    Json(json!({
        "server": {
            "name": env!("CARGO_PKG_NAME"),
            "version": crate::VERSION,
            "environment": state.config.server.environment,
            "port": state.config.server.port,
        },
        "authentication": {
            "tokenCached": status.cached,
            "expiresAt": status.expires_at,
            "expiresIn": status.expires_in.max(0),
        },
        "mtls": {
            "enabled": state.config.mtls.enabled,
            "certPath": state.config.mtls.cert_path,
            "certLoaded": state.certificate.is_loaded(),
            "failure": state.certificate.failure().map(|e| e.to_string()),
        },
        "endpoints": {
            "health": "/health",
            "info": "/info",
            "token": "/api/token",
            "extrato": "/api/extrato/{agencia}/{conta}",
            "saldo": "/api/saldo/{agencia}/{conta}",
        }
    }))
}

async fn get_token(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let token = state.tokens.get_token().await?;
    let status = state.tokens.inspect().await;
    Ok(Json(json!({
        "success": true,
        "token": preview(&token, TOKEN_PREVIEW_CHARS),
        "expiresAt": status.expires_at,
        "expiresIn": status.expires_in,
    })))
}

async fn refresh_token(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    info!("forcing access token renewal");
    state.tokens.invalidate().await;
    let token = state.tokens.force_refresh().await?;
    let status = state.tokens.inspect().await;
    Ok(Json(json!({
        "success": true,
        "message": "token renewed",
        "token": preview(&token, TOKEN_PREVIEW_CHARS),
        "expiresAt": status.expires_at,
        "expiresIn": status.expires_in,
    })))
}

async fn clear_token(State(state): State<SharedState>) -> impl IntoResponse {
    state.tokens.invalidate().await;
    Json(json!({"success": true, "message": "token cache cleared"}))
}

async fn statement_handler(
    State(state): State<SharedState>,
    Path((branch, account)): Path<(String, String)>,
    Query(range): Query<DateRange>,
) -> Result<impl IntoResponse, ApiError> {
    require_account(&branch, &account)?;
    let statement = state
        .statements
        .get_statement_page(&branch, &account, &range)
        .await?;
    Ok(Json(json!({
        "success": true,
        "data": statement,
    })))
}

async fn balance_handler(
    State(state): State<SharedState>,
    Path((branch, account)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    require_account(&branch, &account)?;
    let balance = state.statements.get_balance(&branch, &account).await?;
    Ok(Json(json!({"success": true, "data": balance})))
}

async fn not_found(OriginalUri(uri): OriginalUri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": {"message": "route not found", "path": uri.to_string()}
        })),
    )
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info_handler))
        .route("/api/token", get(get_token).delete(clear_token))
        .route("/api/token/refresh", post(refresh_token))
        .route("/api/extrato/{agencia}/{conta}", get(statement_handler))
        .route("/api/saldo/{agencia}/{conta}", get(balance_handler))
        .fallback(not_found)
        .with_state(state)
}

pub async fn serve(config: Config) -> Result<()> {
    let port = config.server.port;
    let state = Arc::new(AppState::new(Arc::new(config))?);

    info!(
        oauth_url = %state.config.bank.oauth_url,
        api_url = %state.config.bank.api_url,
        mtls = state.config.mtls.enabled,
        cert_loaded = state.certificate.is_loaded(),
        "gateway configured"
    );

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).into_future().await?;
    Ok(())
}
