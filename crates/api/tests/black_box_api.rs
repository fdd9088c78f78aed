use std::sync::Arc;
use std::time::Duration;

use iotforge_api::app::services::{AppServices, build_services};
use iotforge_core::{InstanceId, TenantId, naming};
use iotforge_infra::PlatformConfig;
use iotforge_infra::coordination::CoordinationStore;
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same wiring as prod (in-memory backends), bound to an ephemeral port.
        let config = PlatformConfig {
            instance_id: "blackbox".to_string(),
            provisioning_poll_interval_ms: 50,
            ..PlatformConfig::default()
        };
        let services = Arc::new(build_services(config).await.unwrap());
        let app = iotforge_api::app::build_app(services.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn engine_status_eventually(
    client: &reqwest::Client,
    server: &TestServer,
    tenant: &str,
    status: &str,
) -> serde_json::Value {
    // Provisioning is asynchronous (bus → bootstrap consumer → engine pipeline).
    for _ in 0..100 {
        let engines: Vec<serde_json::Value> = client
            .get(server.url("/engines"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        if let Some(engine) = engines
            .into_iter()
            .find(|e| e["tenantId"] == tenant && e["status"] == status)
        {
            return engine;
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    panic!("tenant {tenant} engine never reached {status}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_is_ok() {
    let server = TestServer::spawn().await;
    let res = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    server.services.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn created_tenant_is_bootstrapped_and_engine_started() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/tenants"))
        .json(&json!({ "id": "acme", "name": "Acme", "templateId": "default" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["id"], "acme");
    assert_eq!(body["templateId"], "default");

    let engine = engine_status_eventually(&client, &server, "acme", "STARTED").await;
    assert_eq!(engine["pending"], false);

    let instance = InstanceId::new("blackbox").unwrap();
    let acme = TenantId::new("acme").unwrap();
    assert!(
        server
            .services
            .store
            .exists(&naming::tenant_bootstrapped(&instance, &acme))
            .await
            .unwrap()
    );

    server.services.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tenant_crud_status_codes() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let create = |id: &str| {
        client
            .post(server.url("/tenants"))
            .json(&json!({ "id": id, "name": "Tenant" }))
            .send()
    };

    assert_eq!(create("acme").await.unwrap().status(), StatusCode::CREATED);
    assert_eq!(create("acme").await.unwrap().status(), StatusCode::CONFLICT);
    assert_eq!(create("bad..id/x").await.unwrap().status(), StatusCode::BAD_REQUEST);

    let list: Vec<serde_json::Value> = client
        .get(server.url("/tenants"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.len(), 1);

    let res = client
        .put(server.url("/tenants/acme"))
        .json(&json!({ "name": "Acme Corp" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["name"], "Acme Corp");

    let res = client
        .put(server.url("/tenants/ghost"))
        .json(&json!({ "name": "Ghost" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.delete(server.url("/tenants/acme")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client.get(server.url("/tenants/acme")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let res = client.delete(server.url("/tenants/acme")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    server.services.shutdown().await;
}
