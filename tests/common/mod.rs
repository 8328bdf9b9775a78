//! Shared utilities for integration testing.

use std::net::SocketAddr;

use metrics_usage::config::UsageConfig;
use metrics_usage::http::{AppState, HttpServer};
use metrics_usage::lifecycle::{self, Services, Shutdown};
use metrics_usage::registry::Registry;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A running service bound to an ephemeral local port.
pub struct TestService {
    pub addr: SocketAddr,
    pub services: Services,
    pub client: reqwest::Client,
    shutdown: Shutdown,
    server: JoinHandle<()>,
}

/// Start the registry and its HTTP server with `config`.
pub async fn spawn_service(config: UsageConfig) -> TestService {
    let services = lifecycle::start(&config).unwrap();
    let (addr, shutdown, server) = spawn_server(&config, &services.registry).await;

    let client = client();

    TestService {
        addr,
        services,
        client,
        shutdown,
        server,
    }
}

/// Serve the HTTP API over `registry` without touching its merge engine.
pub async fn spawn_server(config: &UsageConfig, registry: &Registry) -> (SocketAddr, Shutdown, JoinHandle<()>) {
    let shutdown = Shutdown::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config, AppState::new(registry));
    let server_shutdown = shutdown.subscribe();
    let handle = tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });
    (addr, shutdown, handle)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[allow(dead_code)]
impl TestService {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Wait until everything enqueued so far is merged.
    pub async fn flush(&self) {
        self.services.registry.queue.flush().await.unwrap();
    }

    pub async fn get_json(&self, path: &str) -> (u16, serde_json::Value) {
        let res = self.client.get(self.url(path)).send().await.unwrap();
        let status = res.status().as_u16();
        (status, res.json().await.unwrap())
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> u16 {
        let res = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        res.status().as_u16()
    }

    /// Stop the server first, then drain and stop the registry.
    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = self.server.await;
        self.services.stop().await;
    }
}
