#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;

use warden_api::clock::ManualClock;
use warden_api::config::{AppConfig, Environment};
use warden_api::domain::MemoryDomainStore;
use warden_api::security::anomaly::{ChannelAlertSink, FanoutAlertSink, LogAlertSink};
use warden_api::security::SecurityEvent;
use warden_api::store::{CounterStore, MemoryCounterStore};
use warden_api::{router, AppState};

pub const START_MILLIS: i64 = 1_700_000_000_000;

/// In-process server with demo data, a manual clock and a captured alert stream
pub struct TestServer {
    pub base_url: String,
    pub clock: Arc<ManualClock>,
    pub state: AppState,
    pub client: Client,
    events: Mutex<Receiver<SecurityEvent>>,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn test_config() -> AppConfig {
    AppConfig::preset(Environment::Development)
}

pub async fn spawn() -> Result<TestServer> {
    spawn_with(test_config(), None).await
}

pub async fn spawn_with(config: AppConfig, counters: Option<Arc<dyn CounterStore>>) -> Result<TestServer> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warden_api=debug")
        .with_test_writer()
        .try_init();

    let clock = ManualClock::shared(START_MILLIS);
    let (channel, events) = ChannelAlertSink::new(256);
    let sink = FanoutAlertSink::default()
        .with(Arc::new(LogAlertSink))
        .with(Arc::new(channel));
    let counters: Arc<dyn CounterStore> = match counters {
        Some(store) => store,
        None => Arc::new(MemoryCounterStore::new(clock.clone())),
    };

    let domain = Arc::new(MemoryDomainStore::with_demo_data().await);
    let state = AppState::builder(config)
        .clock(clock.clone())
        .alert_sink(Arc::new(sink))
        .counter_store(counters)
        .build(domain)?;

    // Pick an unused port for isolation
    let port = portpicker::pick_unused_port().context("failed to pick free port")?;
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    let app = router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let server = TestServer {
        base_url: format!("http://127.0.0.1:{}", port),
        clock,
        state,
        client: Client::new(),
        events: Mutex::new(events),
        handle,
    };
    server.wait_ready(Duration::from_secs(5)).await?;
    Ok(server)
}

impl TestServer {
    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
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

    /// Request that appears to come from `ip` through the loopback proxy
    pub fn from_ip(&self, builder: RequestBuilder, ip: &str) -> RequestBuilder {
        builder.header("x-forwarded-for", ip)
    }

    pub async fn login(&self, login_id: &str, password: &str, ip: &str) -> Result<Response> {
        let request = self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({ "loginId": login_id, "password": password }));
        Ok(self.from_ip(request, ip).send().await?)
    }

    /// Log in with the demo password and return the bearer token
    pub async fn token(&self, login_id: &str) -> Result<String> {
        let resp = self
            .login(login_id, &format!("{}-password", login_id), "192.0.2.250")
            .await?;
        anyhow::ensure!(resp.status() == StatusCode::OK, "login failed: {}", resp.status());
        let body: Value = resp.json().await?;
        body["data"]["token"]
            .as_str()
            .map(str::to_string)
            .context("token missing from login response")
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<Response> {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }

    pub async fn post_json(&self, path: &str, token: &str, body: Value) -> Result<Response> {
        Ok(self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?)
    }

    /// Everything published to the alert sink since the last call
    pub fn drain_events(&self) -> Vec<SecurityEvent> {
        let mut events = Vec::new();
        if let Ok(mut rx) = self.events.lock() {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        events
    }
}
