//! Integration tests for the authorization-code flow
//!
//! Starting, finishing, de-authorizing and refreshing app authorizations
//! against a `wiremock` token endpoint.

use anyhow::Result;
use cloud_apps::models::Authorization as AuthorizationEntity;
use cloud_apps::oauth::{
    AUTHORIZATION_ID_QUERY_PARAMETER, ClientKind, OAuthError, authorization_id_for,
};
use cloud_apps::services::{NewApp, ServiceError};
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;
use wiremock::{
    Mock, ResponseTemplate,
    matchers::{method, path},
};

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{
    authorize_app, create_app, create_provider, mount_token_grant, query_param, setup_context,
    setup_context_with_memory_cache,
};

#[tokio::test]
async fn azure_authorize_url_carries_resource_and_https_callback() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;

    let outcome = ctx.state.apps.authorize(&app.id).await?;
    let url = outcome.authorize_url;

    assert!(!outcome.already_authorized);
    assert_eq!(url.path(), "/oauth2/authorize");
    assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
    assert_eq!(query_param(&url, "client_id").as_deref(), Some("billing-client"));
    assert_eq!(
        query_param(&url, "scope").as_deref(),
        Some("openid offline_access")
    );
    assert_eq!(
        query_param(&url, "resource").as_deref(),
        Some("https://management.core.windows.net/")
    );
    assert_eq!(
        query_param(&url, "redirect_uri").as_deref(),
        Some("https://localhost:8080/oauth/azure/billing/callback")
    );
    assert!(query_param(&url, "state").is_some());
    Ok(())
}

#[tokio::test]
async fn google_authorize_url_requests_offline_access_without_resource() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "google-test", "google").await?;
    let app = create_app(&ctx, "analytics", "google-test").await?;

    let url = ctx.state.apps.authorize(&app.id).await?.authorize_url;

    assert_eq!(query_param(&url, "access_type").as_deref(), Some("offline"));
    assert_eq!(query_param(&url, "prompt").as_deref(), Some("consent"));
    assert_eq!(query_param(&url, "resource"), None);
    assert_eq!(
        query_param(&url, "redirect_uri").as_deref(),
        Some("http://localhost:8080/oauth/google/analytics/callback")
    );
    Ok(())
}

#[tokio::test]
async fn starting_twice_reuses_one_authorization_record() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;

    let first = ctx.state.apps.authorize(&app.id).await?.authorize_url;
    let second = ctx.state.apps.authorize(&app.id).await?.authorize_url;

    assert_ne!(query_param(&first, "state"), query_param(&second, "state"));
    assert_eq!(AuthorizationEntity::find().count(&*ctx.db).await?, 1);
    Ok(())
}

#[tokio::test]
async fn finishing_stores_tokens_and_binds_the_app() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;
    mount_token_grant(&ctx.provider_server, "authorization_code", "access-1", 3600, 1).await;

    let outcome = ctx.state.apps.authorize(&app.id).await?;
    let state = query_param(&outcome.authorize_url, "state").unwrap();
    let return_to = ctx
        .state
        .apps
        .finish_authorization("azure", "billing", &state, "the-code", None)
        .await?;

    let expected_id = authorization_id_for(ClientKind::Azure, "billing", "billing-client");
    assert_eq!(return_to.path(), format!("/apps/{}", app.id));
    assert_eq!(
        query_param(&return_to, AUTHORIZATION_ID_QUERY_PARAMETER).as_deref(),
        Some(expected_id.as_str())
    );

    let stored = ctx.state.apps.find_by_identifier(&app.id).await?;
    assert_eq!(stored.authorization_id, expected_id);
    assert!(stored.is_authorized());
    Ok(())
}

#[tokio::test]
async fn memory_state_cache_supports_the_round_trip() -> Result<()> {
    let ctx = setup_context_with_memory_cache().await?;
    create_provider(&ctx, "amazon-test", "amazon").await?;
    let app = create_app(&ctx, "storefront", "amazon-test").await?;
    mount_token_grant(&ctx.provider_server, "authorization_code", "access-1", 3600, 1).await;

    let updated = authorize_app(&ctx, &app).await?;

    assert_eq!(
        updated.authorization_id,
        authorization_id_for(ClientKind::Amazon, "storefront", "storefront-client")
    );
    Ok(())
}

#[tokio::test]
async fn state_is_single_use() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;
    mount_token_grant(&ctx.provider_server, "authorization_code", "access-1", 3600, 1).await;

    let outcome = ctx.state.apps.authorize(&app.id).await?;
    let state = query_param(&outcome.authorize_url, "state").unwrap();
    ctx.state
        .apps
        .finish_authorization("azure", "billing", &state, "the-code", None)
        .await?;

    let replay = ctx
        .state
        .apps
        .finish_authorization("azure", "billing", &state, "the-code", None)
        .await;
    assert!(matches!(
        replay,
        Err(ServiceError::OAuth(OAuthError::StateNotFound { .. }))
    ));
    Ok(())
}

#[tokio::test]
async fn unknown_state_is_rejected_without_calling_the_provider() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    create_app(&ctx, "billing", "azure-test").await?;
    mount_token_grant(&ctx.provider_server, "authorization_code", "access-1", 3600, 0).await;

    let result = ctx
        .state
        .apps
        .finish_authorization("azure", "billing", "never-issued", "the-code", None)
        .await;

    assert!(matches!(
        result,
        Err(ServiceError::OAuth(OAuthError::StateNotFound { .. }))
    ));
    Ok(())
}

#[tokio::test]
async fn rejected_code_exchange_leaves_the_app_unauthorized() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "code already redeemed",
        })))
        .expect(1)
        .mount(&ctx.provider_server)
        .await;

    let outcome = ctx.state.apps.authorize(&app.id).await?;
    let state = query_param(&outcome.authorize_url, "state").unwrap();
    let result = ctx
        .state
        .apps
        .finish_authorization("azure", "billing", &state, "stale-code", None)
        .await;

    match result {
        Err(ServiceError::OAuth(OAuthError::TokenExchange { error, description })) => {
            assert_eq!(error, "invalid_grant");
            assert_eq!(description, "code already redeemed");
        }
        other => panic!("expected token exchange error, got {:?}", other),
    }
    assert!(!ctx.state.apps.find_by_identifier(&app.id).await?.is_authorized());
    Ok(())
}

#[tokio::test]
async fn token_endpoint_outage_is_transient() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&ctx.provider_server)
        .await;

    let outcome = ctx.state.apps.authorize(&app.id).await?;
    let state = query_param(&outcome.authorize_url, "state").unwrap();
    let result = ctx
        .state
        .apps
        .finish_authorization("azure", "billing", &state, "the-code", None)
        .await;

    assert!(matches!(
        result,
        Err(ServiceError::OAuth(OAuthError::Transient { .. }))
    ));
    Ok(())
}

#[tokio::test]
async fn callback_for_another_kind_is_rejected() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;

    let outcome = ctx.state.apps.authorize(&app.id).await?;
    let state = query_param(&outcome.authorize_url, "state").unwrap();
    let result = ctx
        .state
        .apps
        .finish_authorization("google", "billing", &state, "the-code", None)
        .await;

    assert!(matches!(result, Err(ServiceError::Validation(_))));
    Ok(())
}

#[tokio::test]
async fn state_issued_for_another_app_is_not_bound() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let billing = create_app(&ctx, "billing", "azure-test").await?;
    let reports = create_app(&ctx, "reports", "azure-test").await?;
    mount_token_grant(&ctx.provider_server, "authorization_code", "access-1", 3600, 1).await;

    let outcome = ctx.state.apps.authorize(&billing.id).await?;
    let state = query_param(&outcome.authorize_url, "state").unwrap();
    let result = ctx
        .state
        .apps
        .finish_authorization("azure", "reports", &state, "the-code", None)
        .await;

    assert!(matches!(result, Err(ServiceError::Validation(_))));
    assert!(!ctx.state.apps.find_by_identifier(&reports.id).await?.is_authorized());
    Ok(())
}

#[tokio::test]
async fn de_authorize_then_authorize_again_yields_the_same_id() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;
    mount_token_grant(&ctx.provider_server, "authorization_code", "access-1", 3600, 2).await;

    let first = authorize_app(&ctx, &app).await?;
    let cleared = ctx.state.apps.de_authorize(&app.id).await?;
    assert!(!cleared.is_authorized());
    assert_eq!(AuthorizationEntity::find().count(&*ctx.db).await?, 0);

    let second = authorize_app(&ctx, &app).await?;
    assert_eq!(first.authorization_id, second.authorization_id);
    Ok(())
}

#[tokio::test]
async fn refresh_replaces_tokens_and_returns_the_app_page() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;
    mount_token_grant(&ctx.provider_server, "authorization_code", "access-1", 3600, 1).await;
    mount_token_grant(&ctx.provider_server, "refresh_token", "access-2", 3600, 1).await;

    authorize_app(&ctx, &app).await?;
    let return_to = ctx.state.apps.refresh_authorization(&app.id).await?;

    assert_eq!(return_to.path(), format!("/apps/{}", app.id));
    Ok(())
}

#[tokio::test]
async fn refresh_requires_an_authorization() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;

    let result = ctx.state.apps.refresh_authorization(&app.id).await;

    assert!(matches!(
        result,
        Err(ServiceError::OAuth(OAuthError::NoAccessToken { .. }))
    ));
    Ok(())
}

#[tokio::test]
async fn removing_an_app_mid_flow_deletes_its_pending_authorization() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;

    ctx.state.apps.authorize(&app.id).await?;
    assert!(!ctx.state.apps.find_by_identifier(&app.id).await?.is_authorized());
    assert_eq!(AuthorizationEntity::find().count(&*ctx.db).await?, 1);

    ctx.state.apps.remove(&app.id).await?;

    let expected_id = authorization_id_for(ClientKind::Azure, "billing", "billing-client");
    assert!(
        AuthorizationEntity::find_by_id(expected_id)
            .one(&*ctx.db)
            .await?
            .is_none()
    );
    assert_eq!(AuthorizationEntity::find().count(&*ctx.db).await?, 0);
    Ok(())
}

#[tokio::test]
async fn de_authorize_clears_tokens_saved_before_a_refused_binding() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let billing = create_app(&ctx, "billing", "azure-test").await?;
    create_app(&ctx, "reports", "azure-test").await?;
    mount_token_grant(&ctx.provider_server, "authorization_code", "access-1", 3600, 1).await;

    let outcome = ctx.state.apps.authorize(&billing.id).await?;
    let state = query_param(&outcome.authorize_url, "state").unwrap();
    let refused = ctx
        .state
        .apps
        .finish_authorization("azure", "reports", &state, "the-code", None)
        .await;
    assert!(matches!(refused, Err(ServiceError::Validation(_))));
    assert_eq!(AuthorizationEntity::find().count(&*ctx.db).await?, 1);

    let cleared = ctx.state.apps.de_authorize(&billing.id).await?;

    assert!(!cleared.is_authorized());
    assert_eq!(AuthorizationEntity::find().count(&*ctx.db).await?, 0);
    Ok(())
}

#[tokio::test]
async fn client_id_equal_to_secret_still_completes_the_flow() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = ctx
        .state
        .apps
        .create(NewApp {
            name: "mirror".to_string(),
            client_id: "same-value".to_string(),
            client_secret: "same-value".to_string(),
            scope: "openid".to_string(),
            resource: None,
            api_uri: format!("{}/api/", ctx.provider_server.uri()),
            provider_name: "azure-test".to_string(),
            notes: None,
        })
        .await?;
    mount_token_grant(&ctx.provider_server, "authorization_code", "access-1", 3600, 1).await;

    let outcome = ctx.state.apps.authorize(&app.id).await?;
    let state = query_param(&outcome.authorize_url, "state").expect("state is issued");
    assert_eq!(
        query_param(&outcome.authorize_url, "client_id").as_deref(),
        Some("same-value")
    );

    let return_to = ctx
        .state
        .apps
        .finish_authorization("azure", "mirror", &state, "the-code", None)
        .await?;

    let expected_id = authorization_id_for(ClientKind::Azure, "mirror", "same-value");
    assert_eq!(
        query_param(&return_to, AUTHORIZATION_ID_QUERY_PARAMETER).as_deref(),
        Some(expected_id.as_str())
    );
    assert!(ctx.state.apps.find_by_identifier(&app.id).await?.is_authorized());
    Ok(())
}
