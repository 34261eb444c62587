mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::Value;

use common::{asset_form, create_model, TestServer};

async fn error_code(res: reqwest::Response) -> Result<String> {
    let body: Value = res.json().await?;
    assert_eq!(body["error"], true);
    Ok(body["code"].as_str().unwrap_or_default().to_string())
}

#[tokio::test]
async fn health_endpoint_responds() -> Result<()> {
    let server = TestServer::start().await?;

    let res = server.client.get(server.url("/health")).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn anonymous_reads_are_allowed_but_writes_need_identity() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, token) = server.user("alice").await?;
    create_model(&server, &token, "rover").await?;

    let res = server.client.get(server.url("/alice/models/rover")).send().await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server
        .client
        .patch(server.url("/alice/models/rover"))
        .form(&[("description", "faster")])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await?, "AUTH_NO_IDENTITY");
    Ok(())
}

#[tokio::test]
async fn unknown_identity_is_anonymous_on_reads_only() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, token) = server.user("alice").await?;
    create_model(&server, &token, "rover").await?;
    let stranger = server.jwt("test|nobody")?;

    let res = server
        .client
        .get(server.url("/models"))
        .bearer_auth(&stranger)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-total-count"], "1");

    let res = server
        .client
        .patch(server.url("/alice/models/rover"))
        .bearer_auth(&stranger)
        .form(&[("description", "faster")])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await?, "AUTH_NO_USER");
    Ok(())
}

#[tokio::test]
async fn same_token_resolves_the_same_user_twice() -> Result<()> {
    let server = TestServer::start().await?;
    let (alice, bearer) = server.user("alice").await?;
    let private = server.backend.issue_access_token(&alice, "ci").await;

    create_model(&server, &bearer, "rover").await?;
    for _ in 0..2 {
        let res = server
            .client
            .post(server.url("/alice/models/rover/likes"))
            .bearer_auth(&bearer)
            .send()
            .await?;
        // First like succeeds, second is a conflict for the same user
        assert!(res.status() == StatusCode::OK || res.status() == StatusCode::CONFLICT);
    }

    for description in ["first", "second"] {
        let res = server
            .client
            .patch(server.url("/alice/models/rover"))
            .header("Private-Token", &private)
            .form(&[("description", description)])
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await?;
        assert_eq!(body["description"], description);
        assert_eq!(body["owner"], "alice");
    }
    Ok(())
}

#[tokio::test]
async fn revoked_private_token_is_rejected_before_the_body_is_read() -> Result<()> {
    let server = TestServer::start().await?;
    let (alice, _) = server.user("alice").await?;
    let private = server.backend.issue_access_token(&alice, "laptop").await;
    server.backend.revoke_access_token(&private).await;

    let res = server
        .client
        .post(server.url("/models"))
        .header("Private-Token", &private)
        .header("Content-Type", "multipart/form-data; boundary=nothing")
        .body("this is not a multipart body")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await?, "UNAUTHORIZED");

    // Invalid private tokens are fatal even where anonymous access is allowed
    let res = server
        .client
        .get(server.url("/models"))
        .header("Private-Token", &private)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn private_token_takes_precedence_over_bearer() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, alice_bearer) = server.user("alice").await?;
    let (bob, _) = server.user("bob").await?;
    let bob_token = server.backend.issue_access_token(&bob, "bob").await;

    let res = server
        .client
        .post(server.url("/models"))
        .bearer_auth(&alice_bearer)
        .header("Private-Token", &bob_token)
        .multipart(asset_form("buggy", &[("model.sdf", &b"<sdf/>"[..])]))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body["owner"], "bob");
    Ok(())
}
