//! Application startup and lifecycle management.

use crate::access::AdminPolicy;
use crate::config::{PortalConfig, PortalSettings};
use crate::handlers;
use crate::ingestion::ChargeMaterializer;
use crate::services::{
    init_metrics, BillingStore, Database, HttpPaymentMirror, IdentityResolver,
    JwtIdentityResolver, PaymentMirror,
};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::security_headers::security_headers_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BillingStore>,
    pub payments: Arc<dyn PaymentMirror>,
    pub identity: Arc<dyn IdentityResolver>,
    pub policy: Arc<AdminPolicy>,
    pub materializer: ChargeMaterializer,
    pub portal: PortalSettings,
}

impl AppState {
    pub fn new(
        store: Arc<dyn BillingStore>,
        payments: Arc<dyn PaymentMirror>,
        identity: Arc<dyn IdentityResolver>,
        policy: AdminPolicy,
        portal: PortalSettings,
    ) -> Self {
        Self {
            materializer: ChargeMaterializer::new(store.clone()),
            store,
            payments,
            identity,
            policy: Arc::new(policy),
            portal,
        }
    }
}

/// All routes with the shared middleware stack.
pub fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/usage-imports", post(handlers::imports::import_usage_csv))
        .route("/pending-items", post(handlers::imports::create_pending_item))
        .route(
            "/invoices/:id/line-items",
            post(handlers::invoices::add_line_item),
        )
        .route("/invoices/:id", delete(handlers::invoices::delete_invoice));

    let portal = Router::new()
        .route("/clients", get(handlers::portal::list_clients))
        .route("/usage", get(handlers::portal::get_usage))
        .route("/invoices", get(handlers::portal::list_invoices))
        .route("/invoices/:id", get(handlers::portal::get_invoice))
        .route(
            "/invoices/:id/statement",
            get(handlers::portal::download_statement),
        )
        .route(
            "/invoices/:id/share",
            post(handlers::portal::create_share_link),
        );

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .nest("/admin", admin)
        .nest("/portal", portal)
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    path = %request.uri().path(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: PortalConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build without running migrations, for environments where they are
    /// applied separately.
    pub async fn build_without_migrations(config: PortalConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: PortalConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let payments = HttpPaymentMirror::new(config.payments.clone());
        if payments.is_configured() {
            tracing::info!("Payment processor mirror configured");
        } else {
            tracing::warn!("Payment processor credentials not configured - mirroring disabled");
        }

        let identity = JwtIdentityResolver::from_public_key_file(&config.auth.jwt_public_key_path)?;
        let policy = AdminPolicy::from_config(&config.admin);
        if policy.privileged_emails().is_empty() {
            tracing::warn!("No privileged emails configured - admin endpoints are closed");
        }

        let state = AppState::new(
            Arc::new(db),
            Arc::new(payments),
            Arc::new(identity),
            policy,
            config.portal.clone(),
        );

        let addr = config.common.socket_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router: build_router(state),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(
            service = "billing-portal-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, self.router).await
    }
}
