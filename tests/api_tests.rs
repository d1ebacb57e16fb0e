//! HTTP API tests exercising the router with `tower::ServiceExt::oneshot`

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use cloud_apps::server::create_app as create_router;
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{
    OPERATOR_TOKEN, TestContext, create_app, create_provider, mount_token_grant, query_param,
    setup_context,
};

fn router(ctx: &TestContext) -> Router {
    create_router(ctx.state.clone())
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", OPERATOR_TOKEN));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(ctx: &TestContext, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(ctx).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn root_and_health_are_public() -> Result<()> {
    let ctx = setup_context().await?;

    let (status, body) = send(
        &ctx,
        Request::builder().uri("/").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "cloud-apps");

    let (status, body) = send(
        &ctx,
        Request::builder().uri("/healthz").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn management_routes_require_an_operator_token() -> Result<()> {
    let ctx = setup_context().await?;

    let (status, body) = send(
        &ctx,
        Request::builder().uri("/apps").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = send(
        &ctx,
        Request::builder()
            .uri("/providers")
            .header(header::AUTHORIZATION, "Bearer not-the-token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn trace_id_is_echoed() -> Result<()> {
    let ctx = setup_context().await?;

    let response = router(&ctx)
        .oneshot(
            Request::builder()
                .uri("/")
                .header("x-request-id", "trace-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "trace-123");
    Ok(())
}

#[tokio::test]
async fn provider_lifecycle() -> Result<()> {
    let ctx = setup_context().await?;

    let (status, body) = send(
        &ctx,
        request("POST", "/providers", Some(json!({ "name": "azure" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["client_kind"], "azure");
    assert_eq!(
        body["authentication_endpoint"],
        "https://login.microsoftonline.com/common/oauth2"
    );

    let (status, body) = send(
        &ctx,
        request("POST", "/providers", Some(json!({ "name": "azure" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    let (status, body) = send(
        &ctx,
        request(
            "PUT",
            "/providers/azure",
            Some(json!({ "authentication_endpoint": "https://login.microsoftonline.us/common/oauth2" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["authentication_endpoint"],
        "https://login.microsoftonline.us/common/oauth2"
    );

    let (status, body) = send(&ctx, request("GET", "/providers", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["providers"].as_array().map(Vec::len), Some(1));

    let (status, _) = send(&ctx, request("DELETE", "/providers/azure", None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&ctx, request("GET", "/providers/azure", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn unknown_provider_without_kind_is_rejected() -> Result<()> {
    let ctx = setup_context().await?;

    let (status, body) = send(
        &ctx,
        request("POST", "/providers", Some(json!({ "name": "sovereign-cloud" }))),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    Ok(())
}

#[tokio::test]
async fn malformed_json_is_a_validation_error() -> Result<()> {
    let ctx = setup_context().await?;

    let response = router(&ctx)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/apps")
                .header(header::AUTHORIZATION, format!("Bearer {}", OPERATOR_TOKEN))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn provider_in_use_cannot_be_removed() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    create_app(&ctx, "billing", "azure-test").await?;

    let (status, body) = send(&ctx, request("DELETE", "/providers/azure-test", None)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    Ok(())
}

#[tokio::test]
async fn app_crud_never_echoes_the_secret() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;

    let (status, created) = send(
        &ctx,
        request(
            "POST",
            "/apps",
            Some(json!({
                "name": "billing",
                "client_id": "client-1",
                "client_secret": "super-secret",
                "scope": "openid",
                "api_uri": "https://management.azure.com/",
                "provider_name": "azure-test",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["authorized"], false);
    assert_eq!(
        created["redirect_uri"],
        "https://localhost:8080/oauth/azure/billing/callback"
    );
    assert!(!created.to_string().contains("super-secret"));

    let id = created["id"].as_str().unwrap().to_string();
    let (status, shown) = send(&ctx, request("GET", &format!("/apps/{}", id), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shown["name"], "billing");
    assert!(shown["redirect_uri"].is_string());

    let (status, updated) = send(
        &ctx,
        request(
            "PUT",
            &format!("/apps/{}", id),
            Some(json!({ "scope": "openid offline_access" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["scope"], "openid offline_access");

    let (status, _) = send(&ctx, request("DELETE", &format!("/apps/{}", id), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&ctx, request("GET", &format!("/apps/{}", id), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn app_names_must_be_path_safe() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;

    let (status, body) = send(
        &ctx,
        request(
            "POST",
            "/apps",
            Some(json!({
                "name": "billing/prod",
                "client_id": "client-1",
                "client_secret": "secret",
                "api_uri": "https://management.azure.com/",
                "provider_name": "azure-test",
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    Ok(())
}

#[tokio::test]
async fn authorize_and_callback_round_trip() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;
    mount_token_grant(&ctx.provider_server, "authorization_code", "access-1", 3600, 1).await;

    let (status, body) = send(
        &ctx,
        request("POST", &format!("/apps/{}/authorize", app.id), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["already_authorized"], false);
    let authorize_url = Url::parse(body["authorize_url"].as_str().unwrap())?;
    let state = query_param(&authorize_url, "state").unwrap();

    let response = router(&ctx)
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/oauth/azure/billing/callback?state={}&code=the-code",
                    state
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response.headers()[header::LOCATION].to_str()?;
    assert!(location.starts_with(&format!("http://localhost:8080/apps/{}?", app.id)));

    let (_, shown) = send(&ctx, request("GET", &format!("/apps/{}", app.id), None)).await;
    assert_eq!(shown["authorized"], true);

    let (status, cleared) = send(
        &ctx,
        request("DELETE", &format!("/apps/{}/authorization", app.id), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["authorized"], false);
    Ok(())
}

#[tokio::test]
async fn callback_with_unknown_state_is_rejected() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    create_app(&ctx, "billing", "azure-test").await?;

    let (status, body) = send(
        &ctx,
        Request::builder()
            .uri("/oauth/azure/billing/callback?state=forged&code=the-code")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_STATE");
    Ok(())
}

#[tokio::test]
async fn denied_consent_is_reported() -> Result<()> {
    let ctx = setup_context().await?;

    let (status, body) = send(
        &ctx,
        Request::builder()
            .uri("/oauth/azure/billing/callback?error=access_denied&error_description=user+declined")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "AUTHORIZATION_DENIED");
    assert_eq!(body["details"]["error"], "access_denied");
    Ok(())
}

#[tokio::test]
async fn requests_for_unauthorized_apps_conflict() -> Result<()> {
    let ctx = setup_context().await?;
    create_provider(&ctx, "azure-test", "azure").await?;
    let app = create_app(&ctx, "billing", "azure-test").await?;

    let (status, body) = send(
        &ctx,
        request(
            "POST",
            &format!("/apps/{}/requests", app.id),
            Some(json!({ "path": "subscriptions" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "NOT_AUTHORIZED");
    Ok(())
}

#[tokio::test]
async fn openapi_document_is_served() -> Result<()> {
    let ctx = setup_context().await?;

    let (status, body) = send(
        &ctx,
        Request::builder()
            .uri("/openapi.json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/apps/{id}/authorize"].is_object());
    Ok(())
}
