mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::Value;

use common::TestServer;

/// alice owns the `robotics` team; `root` administers the competition
async fn setup(server: &TestServer) -> Result<(String, String)> {
    let (_, alice) = server.user("alice").await?;
    let admin = server.backend.add_admin("root", "test|root").await;
    let admin_token = server.jwt(&admin.identity)?;

    let res = server
        .client
        .post(server.url("/organizations"))
        .bearer_auth(&alice)
        .form(&[("name", "robotics")])
        .send()
        .await?;
    anyhow::ensure!(res.status() == StatusCode::OK, "organization create failed: {}", res.text().await?);
    Ok((alice, admin_token))
}

async fn register(server: &TestServer, alice: &str, admin: &str) -> Result<()> {
    let res = server
        .client
        .post(server.url("/subt/registrations"))
        .bearer_auth(alice)
        .form(&[("participant", "robotics")])
        .send()
        .await?;
    anyhow::ensure!(res.status() == StatusCode::OK, "apply failed: {}", res.text().await?);

    let res = server
        .client
        .patch(server.url("/subt/registrations/subt/robotics"))
        .bearer_auth(admin)
        .form(&[("resolution", "1")])
        .send()
        .await?;
    anyhow::ensure!(res.status() == StatusCode::OK, "resolve failed: {}", res.text().await?);
    Ok(())
}

#[tokio::test]
async fn registration_is_reviewed_by_competition_admins() -> Result<()> {
    let server = TestServer::start().await?;
    let (alice, admin) = setup(&server).await?;

    let res = server
        .client
        .post(server.url("/subt/registrations"))
        .bearer_auth(&alice)
        .form(&[("participant", "robotics")])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let registration: Value = res.json().await?;
    assert_eq!(registration["participant"], "robotics");
    assert_eq!(registration["status"], 0);

    let res = server
        .client
        .post(server.url("/subt/registrations"))
        .bearer_auth(&alice)
        .form(&[("participant", "robotics")])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    // Participants cannot approve themselves
    let res = server
        .client
        .patch(server.url("/subt/registrations/subt/robotics"))
        .bearer_auth(&alice)
        .form(&[("resolution", "1")])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = server
        .client
        .get(server.url("/subt/registrations"))
        .bearer_auth(&admin)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-total-count"], "1");

    let res = server
        .client
        .patch(server.url("/subt/registrations/subt/robotics"))
        .bearer_auth(&admin)
        .form(&[("resolution", "1")])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server
        .client
        .get(server.url("/subt/participants"))
        .bearer_auth(&alice)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let participants: Vec<Value> = res.json().await?;
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0]["owner"], "robotics");
    Ok(())
}

#[tokio::test]
async fn listing_registrations_needs_identity_and_a_known_status() -> Result<()> {
    let server = TestServer::start().await?;
    let (_, admin) = setup(&server).await?;

    let res = server.client.get(server.url("/subt/registrations")).send().await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = server
        .client
        .get(server.url("/subt/registrations?status=closed"))
        .bearer_auth(&admin)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn participants_submit_and_download_log_files() -> Result<()> {
    let server = TestServer::start().await?;
    let (alice, admin) = setup(&server).await?;
    register(&server, &alice, &admin).await?;

    let form = reqwest::multipart::Form::new()
        .text("owner", "robotics")
        .text("description", "first run")
        .part(
            "file",
            reqwest::multipart::Part::bytes(b"log contents".to_vec()).file_name("run1.log"),
        );
    let res = server
        .client
        .post(server.url("/subt/logfiles"))
        .bearer_auth(&alice)
        .multipart(form)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let log: Value = res.json().await?;
    assert_eq!(log["owner"], "robotics");
    assert_eq!(log["file_name"], "run1.log");
    let id = log["id"].as_i64().unwrap_or_default();

    let res = server
        .client
        .get(server.url("/subt/participants/subt/robotics/logfiles"))
        .bearer_auth(&alice)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-total-count"], "1");

    let res = server
        .client
        .get(server.url(&format!("/subt/logfiles/{}/file?link=true", id)))
        .bearer_auth(&alice)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let expected = format!(
        "{}/subt/logfiles/{}/run1.log",
        server.config.storage.download_base_url, id
    );
    assert_eq!(res.text().await?, expected);

    let res = server
        .client
        .get(server.url(&format!("/subt/logfiles/{}/file", id)))
        .bearer_auth(&alice)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(res.headers()["location"], expected.as_str());
    Ok(())
}

#[tokio::test]
async fn log_submission_needs_a_file_and_participation() -> Result<()> {
    let server = TestServer::start().await?;
    let (alice, _) = setup(&server).await?;

    let form = reqwest::multipart::Form::new().text("owner", "robotics");
    let res = server
        .client
        .post(server.url("/subt/logfiles"))
        .bearer_auth(&alice)
        .multipart(form)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "FORM_MISSING_FILES");

    let form = reqwest::multipart::Form::new().text("owner", "robotics").part(
        "file",
        reqwest::multipart::Part::bytes(b"log".to_vec()).file_name("run.log"),
    );
    let res = server
        .client
        .post(server.url("/subt/logfiles"))
        .bearer_auth(&alice)
        .multipart(form)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn leaderboard_is_public_and_keeps_the_best_score_per_circuit() -> Result<()> {
    let server = TestServer::start().await?;
    let (alice, admin) = setup(&server).await?;
    register(&server, &alice, &admin).await?;
    server.backend.record_score("subt", Some("tunnel"), "robotics", 12.0).await;
    server.backend.record_score("subt", Some("tunnel"), "robotics", 7.0).await;
    server.backend.record_score("subt", Some("urban"), "robotics", 3.0).await;

    let res = server.client.get(server.url("/subt/leaderboard")).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    let entries: Vec<Value> = res.json().await?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["circuit"], "tunnel");
    assert_eq!(entries[0]["score"], 12.0);

    let res = server
        .client
        .get(server.url("/subt/leaderboard?circuit=urban"))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let entries: Vec<Value> = res.json().await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["owner"], "robotics");
    Ok(())
}
