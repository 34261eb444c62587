mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::Value;

use common::{create_model, TestServer};

async fn create_collection(server: &TestServer, token: &str, name: &str) -> Result<Value> {
    let res = server
        .client
        .post(server.url("/collections"))
        .bearer_auth(token)
        .form(&[("name", name), ("description", "field robots")])
        .send()
        .await?;
    anyhow::ensure!(res.status() == StatusCode::OK, "collection create failed: {}", res.text().await?);
    Ok(res.json().await?)
}

async fn create_org(server: &TestServer, token: &str, name: &str) -> Result<()> {
    let res = server
        .client
        .post(server.url("/organizations"))
        .bearer_auth(token)
        .form(&[("name", name)])
        .send()
        .await?;
    anyhow::ensure!(res.status() == StatusCode::OK, "organization create failed: {}", res.text().await?);
    Ok(())
}

#[tokio::test]
async fn collection_membership_round_trip() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, token) = server.user("alice").await?;
    create_model(&server, &token, "rover").await?;
    let collection = create_collection(&server, &token, "fleet").await?;
    assert_eq!(collection["name"], "fleet");
    assert_eq!(collection["owner"], "alice");

    let res = server
        .client
        .post(server.url("/alice/collections/fleet/models"))
        .bearer_auth(&token)
        .form(&[("name", "rover"), ("owner", "alice")])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let added: Value = res.json().await?;
    assert_eq!(added["asset_name"], "rover");
    assert_eq!(added["type"], "model");

    let res = server
        .client
        .get(server.url("/alice/collections/fleet/models"))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-total-count"], "1");

    let res = server
        .client
        .get(server.url("/alice/models/rover/collections"))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let containing: Vec<Value> = res.json().await?;
    assert_eq!(containing.len(), 1);
    assert_eq!(containing[0]["name"], "fleet");

    let res = server
        .client
        .delete(server.url("/alice/collections/fleet/models?o=alice&n=rover"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.bytes().await?.is_empty());

    let res = server
        .client
        .get(server.url("/alice/collections/fleet/models"))
        .send()
        .await?;
    assert_eq!(res.headers()["x-total-count"], "0");
    Ok(())
}

#[tokio::test]
async fn removing_an_asset_needs_owner_and_name() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, token) = server.user("alice").await?;
    create_collection(&server, &token, "fleet").await?;

    let res = server
        .client
        .delete(server.url("/alice/collections/fleet/models?o=alice"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "MISSING_FIELD");
    Ok(())
}

#[tokio::test]
async fn deleted_models_leave_their_collections() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, token) = server.user("alice").await?;
    create_model(&server, &token, "rover").await?;
    create_collection(&server, &token, "fleet").await?;
    server
        .client
        .post(server.url("/alice/collections/fleet/models"))
        .bearer_auth(&token)
        .form(&[("name", "rover"), ("owner", "alice")])
        .send()
        .await?;

    let res = server
        .client
        .delete(server.url("/alice/models/rover"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server
        .client
        .get(server.url("/alice/collections/fleet/models"))
        .send()
        .await?;
    assert_eq!(res.headers()["x-total-count"], "0");
    Ok(())
}

#[tokio::test]
async fn model_transfer_moves_ownership_to_an_organization() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, token) = server.user("alice").await?;
    create_org(&server, &token, "robotics").await?;
    create_model(&server, &token, "rover").await?;

    let res = server
        .client
        .post(server.url("/alice/models/rover/transfer"))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "destOwner": "robotics" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let moved: Value = res.json().await?;
    assert_eq!(moved["owner"], "robotics");

    let res = server.client.get(server.url("/robotics/models/rover")).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    let res = server.client.get(server.url("/alice/models/rover")).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn transfer_to_a_user_is_rejected() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, token) = server.user("alice").await?;
    server.user("bob").await?;
    create_model(&server, &token, "rover").await?;

    let res = server
        .client
        .post(server.url("/alice/models/rover/transfer"))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "destOwner": "bob" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn failed_permission_swap_reverts_the_transfer() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, token) = server.user("alice").await?;
    create_org(&server, &token, "robotics").await?;
    create_model(&server, &token, "rover").await?;
    server.backend.fail_permission_updates(true).await;

    let res = server
        .client
        .post(server.url("/alice/models/rover/transfer"))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "destOwner": "robotics" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let res = server.client.get(server.url("/alice/models/rover")).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    let asset: Value = res.json().await?;
    assert_eq!(asset["owner"], "alice");
    let res = server.client.get(server.url("/robotics/models/rover")).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn collection_transfer_follows_the_same_rules() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, token) = server.user("alice").await?;
    create_org(&server, &token, "robotics").await?;
    create_collection(&server, &token, "fleet").await?;

    let res = server
        .client
        .post(server.url("/alice/collections/fleet/transfer"))
        .bearer_auth(&token)
        .form(&[("destOwner", "robotics")])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let moved: Value = res.json().await?;
    assert_eq!(moved["owner"], "robotics");

    let res = server.client.get(server.url("/robotics/collections")).send().await?;
    assert_eq!(res.headers()["x-total-count"], "1");
    Ok(())
}

#[tokio::test]
async fn collection_commit_failure_is_a_save_error() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, token) = server.user("alice").await?;
    server.db.fail_commits(true);

    let res = server
        .client
        .post(server.url("/collections"))
        .bearer_auth(&token)
        .form(&[("name", "fleet")])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "DB_SAVE");

    let collections = server.config.storage.resource_root.join("alice").join("collections");
    let left = std::fs::read_dir(&collections).map(|d| d.count()).unwrap_or(0);
    assert_eq!(left, 0);
    Ok(())
}
