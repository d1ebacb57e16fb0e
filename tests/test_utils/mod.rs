//! Test utilities shared by the integration tests.
//!
//! Builds an in-memory SQLite database with all migrations applied, an
//! [`AppState`] wired the same way the binary wires it, and helpers for
//! driving an authorization against a `wiremock` provider.

use anyhow::{Context, Result};
use cloud_apps::{
    config::{AppConfig, StateCacheBackend},
    db,
    models::{app, provider},
    oauth::ProviderRegistry,
    server::AppState,
    services::{NewApp, NewProvider},
    token_refresh::TokenRefreshService,
};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path},
};

/// Operator token accepted by [`test_config`]
#[allow(dead_code)]
pub const OPERATOR_TOKEN: &str = "test-operator-token";

/// Configuration for an in-memory deployment
#[allow(dead_code)]
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        public_base_url: "http://localhost:8080".to_string(),
        database_url: "sqlite::memory:".to_string(),
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        crypto_key: Some(vec![7u8; 32]),
        ..Default::default()
    }
}

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<Arc<DatabaseConnection>> {
    let db = db::init_pool(&test_config()).await?;
    db::run_migrations(&db).await?;
    Ok(Arc::new(db))
}

/// Everything an integration test needs: state, refresher and a stub provider
#[allow(dead_code)]
pub struct TestContext {
    pub state: AppState,
    pub refresher: TokenRefreshService,
    pub db: Arc<DatabaseConnection>,
    pub provider_server: MockServer,
}

#[allow(dead_code)]
pub async fn setup_context() -> Result<TestContext> {
    setup_context_with(test_config()).await
}

#[allow(dead_code)]
pub async fn setup_context_with_memory_cache() -> Result<TestContext> {
    let mut config = test_config();
    config.oauth.state_cache_backend = StateCacheBackend::Memory;
    setup_context_with(config).await
}

#[allow(dead_code)]
pub async fn setup_context_with(config: AppConfig) -> Result<TestContext> {
    let db = setup_test_db().await?;
    let registry = Arc::new(ProviderRegistry::from_config(&config.provider_endpoints));
    let (state, refresher) = AppState::build(Arc::new(config), Arc::clone(&db), registry)?;
    let provider_server = MockServer::start().await;

    Ok(TestContext {
        state,
        refresher,
        db,
        provider_server,
    })
}

/// Register a provider whose endpoints live on the context's mock server
#[allow(dead_code)]
pub async fn create_provider(ctx: &TestContext, name: &str, kind: &str) -> Result<provider::Model> {
    let created = ctx
        .state
        .providers
        .create(NewProvider {
            name: name.to_string(),
            client_kind: Some(kind.to_string()),
            authentication_endpoint: Some(format!("{}/oauth2", ctx.provider_server.uri())),
        })
        .await?;
    Ok(created)
}

/// Register an app whose API lives on the context's mock server
#[allow(dead_code)]
pub async fn create_app(ctx: &TestContext, name: &str, provider_name: &str) -> Result<app::Model> {
    let created = ctx
        .state
        .apps
        .create(NewApp {
            name: name.to_string(),
            client_id: format!("{}-client", name),
            client_secret: format!("{}-secret", name),
            scope: "openid offline_access".to_string(),
            resource: Some("https://management.core.windows.net/".to_string()),
            api_uri: format!("{}/api/", ctx.provider_server.uri()),
            provider_name: provider_name.to_string(),
            notes: None,
        })
        .await?;
    Ok(created)
}

/// Read a query parameter from a URL
#[allow(dead_code)]
pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Mount a token endpoint answering `grant_type` requests
#[allow(dead_code)]
pub async fn mount_token_grant(
    server: &MockServer,
    grant_type: &str,
    access_token: &str,
    expires_in: i64,
    expected_calls: u64,
) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains(format!("grant_type={}", grant_type)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "refresh_token": format!("{}-refresh", access_token),
            "token_type": "Bearer",
            "expires_in": expires_in,
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Run the full consent round trip for `app` and return the updated app.
///
/// The token endpoint must already answer the authorization-code grant.
#[allow(dead_code)]
pub async fn authorize_app(ctx: &TestContext, app: &app::Model) -> Result<app::Model> {
    let outcome = ctx.state.apps.authorize(&app.id).await?;
    let state = query_param(&outcome.authorize_url, "state").context("authorize url has state")?;
    let kind = query_param(&outcome.authorize_url, "redirect_uri")
        .and_then(|uri| Url::parse(&uri).ok())
        .and_then(|uri| uri.path_segments().and_then(|mut s| s.nth(1).map(str::to_string)))
        .context("redirect uri carries the client kind")?;

    ctx.state
        .apps
        .finish_authorization(&kind, &app.name, &state, "auth-code", None)
        .await?;

    Ok(ctx.state.apps.find_by_identifier(&app.id).await?)
}
