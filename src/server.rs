//! # Server Configuration
//!
//! Wires repositories, the OAuth client factory and the services into the
//! shared [`AppState`], and builds the axum router.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::{AppConfig, ConfigError, StateCacheBackend};
use crate::crypto::CryptoKey;
use crate::handlers;
use crate::oauth::{OAuthClientFactory, ProviderRegistry, PublicUrlBuilder};
use crate::repositories::{AppRepository, AuthorizationRepository, ProviderRepository};
use crate::request_engine::{ApiVersionPolicy, AuthenticatedRequestEngine};
use crate::services::{AppService, ProviderService};
use crate::state_cache::{DatabaseStateCache, MemoryStateCache, StateCache};
use crate::telemetry::trace_context_middleware;
use crate::token_refresh::{RefreshCoordinator, TokenRefreshService};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub registry: Arc<ProviderRegistry>,
    pub apps: AppService,
    pub providers: ProviderService,
}

impl AppState {
    /// Build the state and the background refresher sharing its collaborators
    pub fn build(
        config: Arc<AppConfig>,
        db: Arc<DatabaseConnection>,
        registry: Arc<ProviderRegistry>,
    ) -> anyhow::Result<(Self, TokenRefreshService)> {
        let crypto_key = CryptoKey::new(
            config
                .crypto_key
                .clone()
                .ok_or(ConfigError::MissingCryptoKey)?,
        )?;

        let provider_repo = ProviderRepository::new(Arc::clone(&db));
        let app_repo = AppRepository::new(Arc::clone(&db), crypto_key.clone());
        let authorization_repo = AuthorizationRepository::new(Arc::clone(&db), crypto_key.clone());

        let state_cache: Arc<dyn StateCache> = match config.oauth.state_cache_backend {
            StateCacheBackend::Database => {
                Arc::new(DatabaseStateCache::new(Arc::clone(&db), crypto_key))
            }
            StateCacheBackend::Memory => {
                Arc::new(MemoryStateCache::new(config.oauth.state_cache_capacity))
            }
        };
        let callbacks = Arc::new(PublicUrlBuilder::new(&config.public_base_url)?);
        let clients =
            OAuthClientFactory::new(&config.oauth, authorization_repo, state_cache, callbacks)
                .context("failed to build OAuth http client")?;

        let coordinator = Arc::new(RefreshCoordinator::new());
        let policy = ApiVersionPolicy::from_config(&config.api_versions)?;
        let engine = Arc::new(AuthenticatedRequestEngine::new(
            policy,
            Arc::clone(&coordinator),
        ));

        let apps = AppService::new(
            app_repo.clone(),
            provider_repo.clone(),
            clients.clone(),
            engine,
            Arc::clone(&coordinator),
        );
        let providers =
            ProviderService::new(provider_repo, app_repo.clone(), Arc::clone(&registry));
        let refresher = TokenRefreshService::new(
            config.token_refresh.clone(),
            app_repo,
            clients,
            coordinator,
        );

        Ok((
            Self {
                config,
                db,
                registry,
                apps,
                providers,
            },
            refresher,
        ))
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let operator_routes = Router::new()
        .route(
            "/providers",
            get(handlers::providers::list_providers).post(handlers::providers::create_provider),
        )
        .route(
            "/providers/{name}",
            get(handlers::providers::show_provider)
                .put(handlers::providers::update_provider)
                .delete(handlers::providers::remove_provider),
        )
        .route(
            "/apps",
            get(handlers::apps::list_apps).post(handlers::apps::create_app),
        )
        .route(
            "/apps/{id}",
            get(handlers::apps::show_app)
                .put(handlers::apps::update_app)
                .delete(handlers::apps::remove_app),
        )
        .route("/apps/{id}/authorize", post(handlers::apps::authorize_app))
        .route(
            "/apps/{id}/authorization",
            delete(handlers::apps::de_authorize_app),
        )
        .route(
            "/apps/{id}/authorization/refresh",
            post(handlers::apps::refresh_app_authorization),
        )
        .route(
            "/apps/{id}/requests",
            post(handlers::apps::send_app_request),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/oauth/{kind}/{app_name}/callback",
            get(handlers::oauth::oauth_callback),
        )
        .merge(operator_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_context_middleware))
}

/// Serve the API until `shutdown` fires
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state
        .config
        .bind_addr()
        .with_context(|| format!("Invalid server address: {}", state.config.api_bind_addr))?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::providers::list_providers,
        crate::handlers::providers::create_provider,
        crate::handlers::providers::show_provider,
        crate::handlers::providers::update_provider,
        crate::handlers::providers::remove_provider,
        crate::handlers::apps::list_apps,
        crate::handlers::apps::create_app,
        crate::handlers::apps::show_app,
        crate::handlers::apps::update_app,
        crate::handlers::apps::remove_app,
        crate::handlers::apps::authorize_app,
        crate::handlers::apps::de_authorize_app,
        crate::handlers::apps::refresh_app_authorization,
        crate::handlers::apps::send_app_request,
        crate::handlers::oauth::oauth_callback,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::error::ApiError,
            crate::error::ProviderError,
            crate::oauth::ClientKind,
            crate::services::NewProvider,
            crate::services::ProviderChanges,
            crate::services::NewApp,
            crate::services::AppChanges,
            crate::handlers::providers::ProviderResponse,
            crate::handlers::providers::ProvidersResponse,
            crate::handlers::apps::AppResponse,
            crate::handlers::apps::AppsResponse,
            crate::handlers::apps::AuthorizeResponse,
            crate::handlers::apps::RefreshResponse,
            crate::handlers::apps::SendRequestBody,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Cloud Apps API",
        description = "Operator API for cloud provider apps and their OAuth2 authorizations",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
