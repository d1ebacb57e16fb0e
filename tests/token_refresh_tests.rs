//! Integration tests for the background token refresher

use anyhow::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{authorize_app, create_app, create_provider, mount_token_grant, setup_context};

#[tokio::test]
async fn tick_refreshes_authorizations_inside_the_lead_time() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;
    // Default lead time is ten minutes, so a two minute token is due
    mount_token_grant(&ctx.provider_server, "authorization_code", "access-1", 120, 1).await;
    mount_token_grant(&ctx.provider_server, "refresh_token", "access-2", 3600, 1).await;
    authorize_app(&ctx, &app).await?;

    ctx.refresher.tick().await?;
    // The refreshed token is an hour away from expiry; nothing is due
    ctx.refresher.tick().await?;
    Ok(())
}

#[tokio::test]
async fn tick_leaves_tokens_outside_the_lead_time_alone() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;
    mount_token_grant(&ctx.provider_server, "authorization_code", "access-1", 7200, 1).await;
    mount_token_grant(&ctx.provider_server, "refresh_token", "access-2", 3600, 0).await;
    authorize_app(&ctx, &app).await?;

    ctx.refresher.tick().await?;
    Ok(())
}

#[tokio::test]
async fn tick_skips_authorizations_no_app_points_at() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;
    mount_token_grant(&ctx.provider_server, "authorization_code", "access-1", 120, 1).await;
    mount_token_grant(&ctx.provider_server, "refresh_token", "access-2", 3600, 0).await;

    // Finish a flow but leave the app unbound by starting it on the service
    // and exchanging the code through a mismatched callback.
    let other = create_app(&ctx, "reports", "azure-test").await?;
    let outcome = ctx.state.apps.authorize(&app.id).await?;
    let state = test_utils::query_param(&outcome.authorize_url, "state").unwrap();
    let bound = ctx
        .state
        .apps
        .finish_authorization("azure", &other.name, &state, "the-code", None)
        .await;
    assert!(bound.is_err());

    ctx.refresher.tick().await?;
    Ok(())
}

#[tokio::test]
async fn run_stops_when_cancelled() -> Result<()> {
    let ctx = setup_context().await?;
    let shutdown = CancellationToken::new();
    let refresher = ctx.refresher.clone();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { refresher.run(token).await });

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await??;
    Ok(())
}
