use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, SecondsFormat, Utc};
use grant_store::{
    generate_token, is_well_formed_token, redact_token, Grant, GrantKind, GrantStore, Verdict,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

use crate::config::{ServerConfig, PAY_IMAGE_PATH, SESSIONS_PATH};
use crate::error::{Result, ServerError};
use crate::payment::{require_payment, PaymentRequired, PaymentRequirements, PaymentVerifier};

pub const WALLET_HEADER: &str = "x-wallet-address";

pub struct AppState {
    pub config: ServerConfig,
    /// Keyed by lowercase wallet address
    pub wallets: GrantStore,
    /// Keyed by random bearer token
    pub sessions: GrantStore,
    pub verifier: Arc<dyn PaymentVerifier>,
}

impl AppState {
    pub fn new(config: ServerConfig, verifier: Arc<dyn PaymentVerifier>) -> Self {
        info!(
            "Wallet grants: eviction={}, reissue={}",
            config.wallet_store.eviction, config.wallet_store.reissue
        );
        info!(
            "Session grants: eviction={}, reissue={}",
            config.session_store.eviction, config.session_store.reissue
        );

        Self {
            wallets: GrantStore::new(config.wallet_store),
            sessions: GrantStore::new(config.session_store),
            config,
            verifier,
        }
    }

    /// Drop dead grants from both stores
    pub fn purge_expired(&self, now: DateTime<Utc>) -> (usize, usize) {
        (
            self.wallets.purge_expired(now),
            self.sessions.purge_expired(now),
        )
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let development = state.config.development;

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/payment-info", get(payment_info))
        // Wallet-keyed access: pay once, view for a window
        .route(PAY_IMAGE_PATH, post(pay_image))
        .route("/api/image", get(get_image))
        // Token-keyed access
        .route(SESSIONS_PATH, get(list_sessions).post(create_session))
        .route("/api/sessions/:token", get(redeem_session))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if development {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(state.config.rate_limit_per_second)
        .burst_size(state.config.rate_limit_burst)
        .key_extractor(tower_governor::key_extractor::SmartIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow::anyhow!("Invalid rate limit configuration"))?;

    let app = router(state.clone()).layer(GovernorLayer {
        config: Arc::new(governor_conf),
    });

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        "Paywall listening on {} (rate limited: {} req/s per IP)",
        addr, state.config.rate_limit_per_second
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(), // for providing ConnectInfo for rate limiting
    )
    .await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentInfoResponse {
    price: String,
    description: String,
    endpoint: &'static str,
    sessions_endpoint: &'static str,
    network: String,
    resource: String,
    facilitator: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseResponse {
    success: bool,
    message: String,
    image_url: String,
    start_time: String,
    /// Seconds
    duration: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageAccessResponse {
    success: bool,
    paid: bool,
    image_url: String,
    start_time: String,
    remaining_seconds: i64,
    total_duration: i64,
}

#[derive(Deserialize, Default)]
struct CreateSessionRequest {
    /// `recurring` when absent; see `GrantKind::from_str` for accepted spellings
    #[serde(default)]
    kind: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionIssuedResponse {
    success: bool,
    token: String,
    kind: GrantKind,
    created_at: String,
    expires_at: String,
    ttl_seconds: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionAccessResponse {
    success: bool,
    valid: bool,
    kind: GrantKind,
    expires_at: String,
    remaining_seconds: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveSessionInfo {
    /// First characters of the token only
    token_prefix: String,
    kind: GrantKind,
    created_at: String,
    expires_at: String,
    remaining_seconds: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveSessionsResponse {
    count: usize,
    sessions: Vec<ActiveSessionInfo>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessDenied {
    error: &'static str,
    paid: bool,
    verdict: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    expired: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    consumed: bool,
    payment_endpoint: &'static str,
    price: String,
}

impl AccessDenied {
    fn new(verdict: &Verdict, payment_endpoint: &'static str, price: String) -> Self {
        let error = match verdict {
            Verdict::Expired => "Access expired, please pay again",
            Verdict::AlreadyUsed => "Access already consumed, please pay again",
            _ => "Payment required to access this resource",
        };
        Self {
            error,
            paid: false,
            verdict: verdict.as_str(),
            expired: matches!(verdict, Verdict::Expired),
            consumed: matches!(verdict, Verdict::AlreadyUsed),
            payment_endpoint,
            price,
        }
    }
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn wallet_address(headers: &HeaderMap) -> Option<String> {
    headers
        .get(WALLET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn payment_info(State(state): State<Arc<AppState>>) -> Json<PaymentInfoResponse> {
    let config = &state.config;
    Json(PaymentInfoResponse {
        price: config.display_price(),
        description: format!(
            "Pay to unlock the image for {} seconds",
            config.view_duration.num_seconds()
        ),
        endpoint: PAY_IMAGE_PATH,
        sessions_endpoint: SESSIONS_PATH,
        network: config.network.clone(),
        resource: config.resource_url(PAY_IMAGE_PATH),
        facilitator: config.facilitator_url.clone(),
    })
}

async fn pay_image(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response> {
    let requirements = PaymentRequirements::for_endpoint(&state.config, PAY_IMAGE_PATH);
    if let Err(challenge) = require_payment(&headers, state.verifier.as_ref(), requirements) {
        return Ok(challenge.into_response());
    }

    let wallet = wallet_address(&headers).ok_or(ServerError::MissingHeader("X-Wallet-Address"))?;

    let now = Utc::now();
    let grant = state.wallets.create(
        wallet,
        GrantKind::Recurring,
        state.config.view_duration,
        now,
    )?;
    let duration = grant.ttl().num_seconds();

    Ok(Json(PurchaseResponse {
        success: true,
        message: format!("Payment received, image unlocked for {} seconds", duration),
        image_url: state.config.image_url.clone(),
        start_time: timestamp(grant.created_at),
        duration,
    })
    .into_response())
}

async fn get_image(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(wallet) = wallet_address(&headers) else {
        // no credential at all: the store is not consulted
        let requirements = PaymentRequirements::for_endpoint(&state.config, PAY_IMAGE_PATH);
        return PaymentRequired {
            requirements,
            reason: "Payment Required",
        }
        .into_response();
    };

    let now = Utc::now();
    match state.wallets.redeem(&wallet, now) {
        Verdict::Valid(grant) => Json(ImageAccessResponse {
            success: true,
            paid: true,
            image_url: state.config.image_url.clone(),
            start_time: timestamp(grant.created_at),
            remaining_seconds: grant.remaining(now).num_seconds(),
            total_duration: grant.ttl().num_seconds(),
        })
        .into_response(),
        denied => {
            debug!("Image access denied: {}", denied);
            (
                StatusCode::FORBIDDEN,
                Json(AccessDenied::new(
                    &denied,
                    PAY_IMAGE_PATH,
                    state.config.display_price(),
                )),
            )
                .into_response()
        }
    }
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let requirements = PaymentRequirements::for_endpoint(&state.config, SESSIONS_PATH);
    if let Err(challenge) = require_payment(&headers, state.verifier.as_ref(), requirements) {
        return Ok(challenge.into_response());
    }

    let request: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServerError::InvalidRequest(format!("Invalid session request: {}", e)))?
    };

    let kind = match request.kind.as_deref() {
        Some(kind) => kind.parse::<GrantKind>()?,
        None => GrantKind::default(),
    };
    let ttl = match kind {
        GrantKind::Recurring => state.config.session_ttl,
        GrantKind::SingleUse => state.config.single_use_ttl,
    };

    let grant = state
        .sessions
        .create(generate_token(), kind, ttl, Utc::now())?;

    Ok(Json(SessionIssuedResponse {
        success: true,
        ttl_seconds: grant.ttl().num_seconds(),
        created_at: timestamp(grant.created_at),
        expires_at: timestamp(grant.expires_at),
        kind: grant.kind,
        token: grant.key,
    })
    .into_response())
}

async fn redeem_session(State(state): State<Arc<AppState>>, Path(token): Path<String>) -> Response {
    let now = Utc::now();
    let verdict = if is_well_formed_token(&token) {
        state.sessions.redeem(&token, now)
    } else {
        Verdict::NotFound
    };

    match verdict {
        Verdict::Valid(grant) => Json(SessionAccessResponse {
            success: true,
            valid: true,
            kind: grant.kind,
            expires_at: timestamp(grant.expires_at),
            remaining_seconds: grant.remaining(now).num_seconds(),
        })
        .into_response(),
        denied => {
            let status = if denied == Verdict::NotFound {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::FORBIDDEN
            };
            (
                status,
                Json(AccessDenied::new(
                    &denied,
                    SESSIONS_PATH,
                    state.config.display_price(),
                )),
            )
                .into_response()
        }
    }
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<ActiveSessionsResponse> {
    let now = Utc::now();
    let mut active = state.sessions.active_snapshot(now);
    active.sort_by_key(|g| g.created_at);

    let sessions: Vec<ActiveSessionInfo> = active
        .iter()
        .map(|grant: &Grant| ActiveSessionInfo {
            token_prefix: redact_token(&grant.key),
            kind: grant.kind,
            created_at: timestamp(grant.created_at),
            expires_at: timestamp(grant.expires_at),
            remaining_seconds: grant.remaining(now).num_seconds(),
        })
        .collect();

    Json(ActiveSessionsResponse {
        count: sessions.len(),
        sessions,
    })
}
