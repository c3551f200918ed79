//! Common test utilities for wallet HTTP API tests
//!
//! This module provides shared test infrastructure including:
//! - A router over an in-memory wallet
//! - Request builders and JSON body decoding

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use dcrbridge::{BridgeConfig, MemoryBackend, Network, WalletManager};
use serde_json::Value;
use tower::ServiceExt;
use wallet::api::server;

pub const PASSPHRASE: &str = "api-test-passphrase";

/// Router plus direct access to the backend behind it
pub struct TestServer {
    pub backend: Arc<MemoryBackend>,
    pub manager: Arc<WalletManager>,
    pub app: Router,
}

impl TestServer {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let backend = Arc::new(MemoryBackend::new(Network::Testnet));
        backend.set_passphrase(PASSPHRASE);
        backend.set_best_height(1_000);

        let manager = Arc::new(WalletManager::new(backend.clone(), BridgeConfig::default()));
        let app = server::router(manager.clone());
        Self { backend, manager, app }
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

/// Testnet address outside the wallet
pub fn external_address(seed: char) -> String {
    format!("Ts{}", seed.to_string().repeat(33))
}
