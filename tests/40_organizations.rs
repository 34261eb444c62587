mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::Value;

use common::TestServer;

#[tokio::test]
async fn organization_members_can_be_managed() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, alice) = server.user("alice").await?;
    let (_, bob) = server.user("bob").await?;

    let res = server
        .client
        .post(server.url("/organizations"))
        .bearer_auth(&alice)
        .form(&[("name", "robotics"), ("description", "field robots")])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let org: Value = res.json().await?;
    assert_eq!(org["name"], "robotics");

    let res = server
        .client
        .post(server.url("/organizations/robotics/users"))
        .bearer_auth(&alice)
        .form(&[("username", "bob"), ("role", "member")])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let member: Value = res.json().await?;
    assert_eq!(member["username"], "bob");
    assert_eq!(member["org_role"], "member");

    let res = server
        .client
        .get(server.url("/organizations/robotics/users"))
        .bearer_auth(&bob)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-total-count"], "2");

    // Members cannot promote themselves
    let res = server
        .client
        .post(server.url("/organizations/robotics/users"))
        .bearer_auth(&bob)
        .form(&[("username", "bob"), ("role", "owner")])
        .send()
        .await?;
    assert!(res.status().is_client_error());

    let res = server
        .client
        .delete(server.url("/organizations/robotics/users/bob"))
        .bearer_auth(&alice)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn organization_names_cannot_shadow_users() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, alice) = server.user("alice").await?;
    server.user("bob").await?;

    let res = server
        .client
        .post(server.url("/organizations"))
        .bearer_auth(&alice)
        .form(&[("name", "bob")])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn unknown_organization_is_not_found() -> Result<()> {
    let server = TestServer::start().await?;

    let res = server.client.get(server.url("/organizations/nowhere")).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn categories_are_managed_by_system_admins() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, alice) = server.user("alice").await?;
    let admin = server.backend.add_admin("root", "test|root").await;
    let admin_token = server.jwt(&admin.identity)?;

    let res = server
        .client
        .post(server.url("/categories"))
        .bearer_auth(&alice)
        .json(&serde_json::json!({ "name": "Aerial", "slug": "aerial" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = server
        .client
        .post(server.url("/categories"))
        .bearer_auth(&admin_token)
        .json(&serde_json::json!({ "name": "Aerial", "slug": "aerial" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server.client.get(server.url("/categories")).send().await?;
    let categories: Vec<Value> = res.json().await?;
    assert!(categories.iter().any(|c| c["slug"] == "aerial"));

    let res = server
        .client
        .delete(server.url("/categories/aerial"))
        .bearer_auth(&admin_token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let removed: Value = res.json().await?;
    assert_eq!(removed["name"], "Aerial");
    Ok(())
}
