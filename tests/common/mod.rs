#![allow(dead_code)]

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::StatusCode;
use tempfile::TempDir;

use fuel_api_rust::auth::{generate_jwt, Claims};
use fuel_api_rust::config::AppConfig;
use fuel_api_rust::database::MemoryDatabase;
use fuel_api_rust::services::users::User;
use fuel_api_rust::services::MemoryBackend;
use fuel_api_rust::AppState;

/// An in-memory server bound to a free port inside the test's runtime.
///
/// Each test gets its own server: tokio tests run on separate runtimes, so a
/// shared server would die with the first test that spawned it.
pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    pub backend: MemoryBackend,
    pub db: MemoryDatabase,
    pub config: AppConfig,
    pub client: reqwest::Client,
    _dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        let dir = tempfile::tempdir().context("failed to create storage dir")?;
        let mut config = AppConfig::development();
        config.storage.resource_root = dir.path().join("resources");
        config.storage.staging_dir = dir.path().join("staging");
        config.security.jwt_secret = "integration-secret".to_string();

        let backend = MemoryBackend::new(&config.storage, &config.competition);
        let db = MemoryDatabase::new();
        let state = AppState::in_memory(config.clone(), db.clone(), backend.clone())?;

        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .context("failed to bind test listener")?;
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, fuel_api_rust::app(state)).await {
                tracing::error!("test server stopped: {}", e);
            }
        });

        let server = Self {
            port,
            base_url: format!("http://127.0.0.1:{}/1.0", port),
            backend,
            db,
            config,
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()?,
            _dir: dir,
        };
        server.wait_ready(Duration::from_secs(5)).await?;
        Ok(server)
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(resp) = self.client.get(self.url("/health")).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Register a user and return it with a bearer token for its identity
    pub async fn user(&self, username: &str) -> Result<(User, String)> {
        let user = self.backend.add_user(username, &format!("test|{}", username)).await;
        let token = self.jwt(&user.identity)?;
        Ok((user, token))
    }

    pub fn jwt(&self, identity: &str) -> Result<String> {
        Ok(generate_jwt(&Claims::new(identity, 1), &self.config.security.jwt_secret)?)
    }
}

/// Multipart form with `name`, `license` and the given files. File names keep
/// their folders unencoded.
pub fn asset_form(name: &str, files: &[(&str, &[u8])]) -> reqwest::multipart::Form {
    let mut form = reqwest::multipart::Form::new()
        .percent_encode_noop()
        .text("name", name.to_string())
        .text("license", "1");
    for (path, contents) in files {
        form = form.part(
            "file",
            reqwest::multipart::Part::bytes(contents.to_vec()).file_name(path.to_string()),
        );
    }
    form
}

/// Upload a model owned by the token's user
pub async fn create_model(server: &TestServer, token: &str, name: &str) -> Result<serde_json::Value> {
    let res = server
        .client
        .post(server.url("/models"))
        .bearer_auth(token)
        .multipart(asset_form(name, &[("model.config", &b"<model/>"[..]), ("model.sdf", &b"<sdf/>"[..])]))
        .send()
        .await?;
    anyhow::ensure!(res.status() == StatusCode::OK, "model upload failed: {}", res.text().await?);
    Ok(res.json().await?)
}
