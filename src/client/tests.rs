use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use serde_json::json;
use url::Url;

use super::*;
use crate::config::Settings;
use crate::routing::ClientRules;

const ORIGIN: &str = "https://app.test";

#[derive(Default)]
struct FakeNetwork {
    routes: Mutex<HashMap<String, ClientResponse>>,
    offline: AtomicBool,
    hang: AtomicBool,
    calls: AtomicUsize,
}

impl FakeNetwork {
    fn serve(&self, path: &str, response: ClientResponse) {
        self.routes
            .lock()
            .unwrap()
            .insert(format!("{ORIGIN}{path}"), response);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &ClientRequest) -> Result<ClientResponse, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::unreachable("offline"));
        }
        Ok(self
            .routes
            .lock()
            .unwrap()
            .get(&request.cache_key())
            .cloned()
            .unwrap_or_else(|| ClientResponse::new(StatusCode::NOT_FOUND, "not found")))
    }
}

#[derive(Default)]
struct FakeClients {
    windows: Mutex<Vec<WindowClient>>,
    focused: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
    claimed: AtomicBool,
}

#[async_trait]
impl Clients for FakeClients {
    async fn match_all(&self) -> Result<Vec<WindowClient>, PlatformError> {
        Ok(self.windows.lock().unwrap().clone())
    }

    async fn focus(&self, id: &str) -> Result<(), PlatformError> {
        self.focused.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<(), PlatformError> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn claim(&self) -> Result<(), PlatformError> {
        self.claimed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeSink {
    shown: Mutex<Vec<Notification>>,
    closed: AtomicUsize,
}

#[async_trait]
impl NotificationSink for FakeSink {
    async fn show(&self, notification: &Notification) -> Result<(), PlatformError> {
        self.shown.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn close(&self, _notification: &Notification) -> Result<(), PlatformError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    executor: ClientExecutor,
    storage: Arc<MemoryCacheStorage>,
    network: Arc<FakeNetwork>,
    clients: Arc<FakeClients>,
}

impl Harness {
    fn new(generation: &str) -> Self {
        let storage = Arc::new(MemoryCacheStorage::new());
        Self::with_storage(generation, storage)
    }

    fn with_storage(generation: &str, storage: Arc<MemoryCacheStorage>) -> Self {
        let network = Arc::new(FakeNetwork::default());
        let clients = Arc::new(FakeClients::default());
        let config = ClientConfig {
            origin: Url::parse(ORIGIN).unwrap(),
            generation: generation.to_string(),
            offline_path: "/offline".to_string(),
            manifest: vec![
                "/".to_string(),
                "/dashboard".to_string(),
                "/offline".to_string(),
                "/icons/icon-192x192.png".to_string(),
            ],
            rules: ClientRules::default(),
        };
        let executor = ClientExecutor::new(
            config,
            ClientCapabilities {
                storage: storage.clone(),
                network: network.clone(),
                clients: clients.clone(),
            },
        );
        Self {
            executor,
            storage,
            network,
            clients,
        }
    }

    fn serve_manifest(&self) {
        self.network.serve("/", ClientResponse::ok("<html>home</html>"));
        self.network
            .serve("/dashboard", ClientResponse::ok("<html>dashboard v1</html>"));
        self.network
            .serve("/offline", ClientResponse::ok("<html>offline</html>"));
        self.network
            .serve("/icons/icon-192x192.png", ClientResponse::ok("icon"));
    }

    async fn respond(&self, request: ClientRequest) -> ClientResponse {
        self.executor
            .intercept(request)
            .await
            .response()
            .expect("intercepted")
    }
}

fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

fn html(path: &str) -> ClientRequest {
    ClientRequest::get(url(path)).with_header("accept", "text/html")
}

#[tokio::test]
async fn install_populates_generation_and_skips_waiting() {
    let harness = Harness::new("cotai-edge-v1.0.0");
    harness.serve_manifest();

    let count = harness.executor.install().await.unwrap();
    assert_eq!(count, 4);
    assert_eq!(harness.storage.entry_count("cotai-edge-v1.0.0"), 4);
    assert_eq!(harness.executor.state(), WorkerState::Installed);
}

#[tokio::test]
async fn install_is_all_or_nothing() {
    let harness = Harness::new("v1");
    harness.serve_manifest();
    harness
        .network
        .serve("/dashboard", ClientResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "boom"));

    let err = harness.executor.install().await.unwrap_err();
    assert!(matches!(err, InstallError::Status { .. }));
    assert_eq!(harness.storage.entry_count("v1"), 0);
    assert_eq!(harness.executor.state(), WorkerState::Waiting);
}

#[tokio::test]
async fn activate_leaves_only_current_generation() {
    let storage = Arc::new(MemoryCacheStorage::new());
    storage
        .put("cotai-edge-v0.9.0", "https://app.test/", ClientResponse::ok("old"))
        .await
        .unwrap();
    storage.open("scratch").await.unwrap();

    let harness = Harness::with_storage("cotai-edge-v1.0.0", storage);
    harness.serve_manifest();
    harness.executor.install().await.unwrap();

    let deleted = harness.executor.activate().await.unwrap();
    assert_eq!(deleted, vec!["cotai-edge-v0.9.0", "scratch"]);
    assert_eq!(
        harness.storage.keys().await.unwrap(),
        vec!["cotai-edge-v1.0.0"]
    );
    assert!(harness.clients.claimed.load(Ordering::SeqCst));
    assert_eq!(harness.executor.state(), WorkerState::Activated);
}

#[tokio::test]
async fn non_get_and_cross_origin_pass_through() {
    let harness = Harness::new("v1");

    let post = ClientRequest::new(Method::POST, url("/api/quotes"));
    assert!(matches!(
        harness.executor.intercept(post).await,
        Interception::Passthrough
    ));

    let foreign = ClientRequest::get(Url::parse("https://cdn.example.com/app.js").unwrap());
    assert!(matches!(
        harness.executor.intercept(foreign).await,
        Interception::Passthrough
    ));
    assert_eq!(harness.network.calls(), 0);
}

#[tokio::test]
async fn cache_first_stores_then_serves_from_cache() {
    let harness = Harness::new("v1");
    harness.network.serve("/app.js", ClientResponse::ok("js"));

    let first = harness.respond(ClientRequest::get(url("/app.js"))).await;
    assert_eq!(first.body, "js");

    harness.network.offline.store(true, Ordering::SeqCst);
    let second = harness.respond(ClientRequest::get(url("/app.js"))).await;
    assert_eq!(second.body, "js");
    assert_eq!(harness.network.calls(), 1);
}

#[tokio::test]
async fn cache_first_total_failure_is_synthetic_503() {
    let harness = Harness::new("v1");
    harness.network.offline.store(true, Ordering::SeqCst);

    let response = harness.respond(ClientRequest::get(url("/images/logo.svg"))).await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body, "Resource not available offline");
}

#[tokio::test]
async fn network_first_falls_back_to_cache() {
    let harness = Harness::new("v1");
    harness
        .network
        .serve("/api/quotes", ClientResponse::ok(r#"[{"id":1}]"#));

    harness.respond(ClientRequest::get(url("/api/quotes"))).await;
    harness.network.offline.store(true, Ordering::SeqCst);

    let response = harness.respond(ClientRequest::get(url("/api/quotes"))).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, r#"[{"id":1}]"#);
}

#[tokio::test]
async fn network_first_offline_without_html_is_503() {
    let harness = Harness::new("v1");
    harness.network.offline.store(true, Ordering::SeqCst);

    let response = harness
        .respond(ClientRequest::get(url("/api/quotes")).with_header("accept", "application/json"))
        .await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body, "Content not available offline");
}

#[tokio::test]
async fn network_first_offline_html_gets_offline_page() {
    let harness = Harness::new("v1");
    harness.serve_manifest();
    harness.executor.install().await.unwrap();
    harness.network.offline.store(true, Ordering::SeqCst);

    let response = harness.respond(html("/settings")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, "<html>offline</html>");
}

#[tokio::test]
async fn dashboard_offline_with_no_entry_gets_offline_page() {
    let harness = Harness::new("v1");
    harness
        .storage
        .put("v1", "https://app.test/offline", ClientResponse::ok("<html>offline</html>"))
        .await
        .unwrap();
    harness.network.offline.store(true, Ordering::SeqCst);

    let response = harness.respond(html("/dashboard")).await;
    assert_eq!(response.body, "<html>offline</html>");
}

#[tokio::test]
async fn stale_while_revalidate_does_not_wait_for_network() {
    let harness = Harness::new("v1");
    harness
        .storage
        .put("v1", "https://app.test/dashboard", ClientResponse::ok("<html>stale</html>"))
        .await
        .unwrap();
    harness.network.hang.store(true, Ordering::SeqCst);

    let response = tokio::time::timeout(Duration::from_secs(1), harness.respond(html("/dashboard")))
        .await
        .expect("served without waiting on the network");
    assert_eq!(response.body, "<html>stale</html>");
}

#[tokio::test]
async fn stale_while_revalidate_refreshes_in_background() {
    let harness = Harness::new("v1");
    harness
        .storage
        .put("v1", "https://app.test/pncp", ClientResponse::ok("old"))
        .await
        .unwrap();
    harness.network.serve("/pncp", ClientResponse::ok("new"));

    let first = harness.respond(html("/pncp")).await;
    assert_eq!(first.body, "old");
    harness.executor.deferred().settle().await;

    let second = harness.respond(html("/pncp")).await;
    assert_eq!(second.body, "new");
}

#[tokio::test]
async fn stale_while_revalidate_cold_waits_for_network() {
    let harness = Harness::new("v1");
    harness.network.serve("/cotai", ClientResponse::ok("fresh"));

    let response = harness.respond(html("/cotai")).await;
    assert_eq!(response.body, "fresh");
}

#[tokio::test]
async fn storage_outage_does_not_break_interception() {
    let harness = Harness::new("v1");
    harness.network.serve("/app.css", ClientResponse::ok("css"));
    harness.storage.set_unavailable(true);

    let response = harness.respond(ClientRequest::get(url("/app.css"))).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, "css");
}

fn gateway() -> (PushGateway, Arc<FakeSink>, Arc<FakeClients>) {
    let sink = Arc::new(FakeSink::default());
    let clients = Arc::new(FakeClients::default());
    let gateway = PushGateway::new(PushDefaults::default(), sink.clone(), clients.clone());
    (gateway, sink, clients)
}

#[tokio::test]
async fn malformed_push_payload_uses_defaults() {
    let (gateway, sink, _) = gateway();

    for payload in [None, Some(&b""[..]), Some(&b"{not json"[..]), Some(&b"[1,2]"[..])] {
        let notification = gateway.on_push(payload).await.unwrap();
        assert_eq!(notification.title, "CotAi Edge");
        assert_eq!(notification.body, "New notification available");
        assert_eq!(notification.target_url, "/dashboard");
        let actions: Vec<_> = notification.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(actions, vec!["view", "dismiss"]);
    }
    assert_eq!(sink.shown.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn push_payload_fields_override_defaults() {
    let (gateway, _, _) = gateway();
    let payload = json!({
        "title": "Nova cotação",
        "body": 42,
        "url": "/cotai/quotes/7",
        "quotationId": 7,
    })
    .to_string();

    let notification = gateway.on_push(Some(payload.as_bytes())).await.unwrap();
    assert_eq!(notification.title, "Nova cotação");
    assert_eq!(notification.body, "42");
    assert_eq!(notification.target_url, "/cotai/quotes/7");
    assert_eq!(notification.correlation_id.as_deref(), Some("7"));
    assert_eq!(notification.tag, "cotai-notification");
    assert!(notification.renotify);
}

#[tokio::test]
async fn click_focuses_matching_window_or_opens_one() {
    let (gateway, sink, clients) = gateway();
    let notification = gateway.build(Some(&br#"{"url":"/dashboard"}"#[..]));

    let opened = gateway.on_click(&notification, None).await.unwrap();
    assert_eq!(
        opened,
        ClickOutcome::Opened {
            url: "/dashboard".to_string()
        }
    );

    clients.windows.lock().unwrap().push(WindowClient {
        id: "w1".to_string(),
        url: "https://app.test/dashboard".to_string(),
    });
    let focused = gateway.on_click(&notification, None).await.unwrap();
    assert_eq!(
        focused,
        ClickOutcome::Focused {
            client_id: "w1".to_string()
        }
    );

    let dismissed = gateway.on_click(&notification, Some("dismiss")).await.unwrap();
    assert_eq!(dismissed, ClickOutcome::Dismissed);
    assert_eq!(clients.opened.lock().unwrap().len(), 1);
    assert_eq!(sink.closed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn view_action_opens_new_window() {
    let (gateway, _, clients) = gateway();
    clients.windows.lock().unwrap().push(WindowClient {
        id: "w1".to_string(),
        url: "https://app.test/dashboard".to_string(),
    });
    let notification = gateway.build(None);

    let outcome = gateway.on_click(&notification, Some("view")).await.unwrap();
    assert!(matches!(outcome, ClickOutcome::Opened { .. }));
    assert!(clients.focused.lock().unwrap().is_empty());
}

struct CountingHandler {
    entered: AtomicUsize,
    runs: AtomicUsize,
    fail_on: Option<usize>,
    gate: tokio::sync::Semaphore,
    gated: bool,
}

impl CountingHandler {
    fn new() -> Self {
        Self {
            entered: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            fail_on: None,
            gate: tokio::sync::Semaphore::new(0),
            gated: false,
        }
    }
}

#[async_trait]
impl SyncHandler for CountingHandler {
    async fn run(&self, _task: &SyncTask) -> Result<(), SyncError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if self.gated {
            self.gate
                .acquire()
                .await
                .expect("gate stays open")
                .forget();
        }
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        if Some(run) == self.fail_on {
            return Err(SyncError::task("upstream rejected quotation"));
        }
        Ok(())
    }
}

const TAG: &str = "background-quotation-sync";

#[tokio::test]
async fn sync_runs_each_queued_task_once() {
    let coordinator = SyncCoordinator::new();
    let handler = Arc::new(CountingHandler::new());
    coordinator.register(TAG, handler.clone());
    coordinator.enqueue(TAG, json!({"quotation": 1})).unwrap();
    coordinator.enqueue(TAG, json!({"quotation": 2})).unwrap();

    let outcome = coordinator.on_sync(TAG).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Completed { ran: 2 });
    assert_eq!(coordinator.pending(TAG), 0);

    let again = coordinator.on_sync(TAG).await.unwrap();
    assert_eq!(again, SyncOutcome::Completed { ran: 0 });
    assert_eq!(handler.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn sync_failure_requeues_and_rethrows() {
    let coordinator = SyncCoordinator::new();
    let handler = Arc::new(CountingHandler {
        fail_on: Some(1),
        ..CountingHandler::new()
    });
    coordinator.register(TAG, handler);
    for n in 0..3 {
        coordinator.enqueue(TAG, json!({ "quotation": n })).unwrap();
    }

    let err = coordinator.on_sync(TAG).await.unwrap_err();
    assert!(matches!(err, SyncError::Task { .. }));
    assert_eq!(coordinator.pending(TAG), 2);
}

#[tokio::test]
async fn concurrent_sync_for_same_tag_is_refused() {
    let coordinator = Arc::new(SyncCoordinator::new());
    let handler = Arc::new(CountingHandler {
        gated: true,
        ..CountingHandler::new()
    });
    coordinator.register(TAG, handler.clone());
    coordinator.enqueue(TAG, json!({})).unwrap();

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.on_sync(TAG).await })
    };
    while handler.entered.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    assert_eq!(
        coordinator.on_sync(TAG).await.unwrap(),
        SyncOutcome::AlreadyRunning
    );

    handler.gate.add_permits(1);
    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome, SyncOutcome::Completed { ran: 1 });
}

#[tokio::test]
async fn cancelled_sync_keeps_unfinished_tasks() {
    let coordinator = SyncCoordinator::new();
    let handler = Arc::new(CountingHandler {
        gated: true,
        ..CountingHandler::new()
    });
    coordinator.register(TAG, handler.clone());
    for n in 0..3 {
        coordinator.enqueue(TAG, json!({ "quotation": n })).unwrap();
    }

    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), coordinator.on_sync(TAG)).await;
    assert!(cancelled.is_err());
    assert_eq!(handler.entered.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.pending(TAG), 3);

    // The next firing starts over from the first unfinished task.
    handler.gate.add_permits(3);
    let outcome = coordinator.on_sync(TAG).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Completed { ran: 3 });
    assert_eq!(coordinator.pending(TAG), 0);
}

#[tokio::test]
async fn unknown_sync_tag_is_ignored() {
    let coordinator = SyncCoordinator::new();
    assert_eq!(
        coordinator.on_sync("other").await.unwrap(),
        SyncOutcome::Ignored
    );
}

fn platform(storage: Arc<MemoryCacheStorage>, handler: Arc<CountingHandler>) -> ClientPlatform {
    ClientPlatform {
        storage,
        clients: Arc::new(FakeClients::default()),
        sink: Arc::new(FakeSink::default()),
        sync_handler: handler,
    }
}

#[tokio::test]
async fn runtime_is_wired_from_settings() {
    let mut settings = Settings::defaults();
    settings.client.origin = Url::parse(ORIGIN).unwrap();
    settings.client.manifest = vec!["/".to_string(), "/offline".to_string()];
    settings.push.title = "Quotation update".to_string();
    settings.sync.tag = "quotation-sync".to_string();

    let storage = Arc::new(MemoryCacheStorage::new());
    let network = Arc::new(FakeNetwork::default());
    network.serve("/", ClientResponse::ok("<html>home</html>"));
    network.serve("/offline", ClientResponse::ok("<html>offline</html>"));
    let handler = Arc::new(CountingHandler::new());

    let runtime = ClientRuntime::with_network(
        &settings,
        platform(storage.clone(), handler.clone()),
        network,
    );

    assert_eq!(runtime.executor.install().await.unwrap(), 2);
    assert_eq!(
        storage.keys().await.unwrap(),
        vec![settings.client.generation.clone()]
    );
    assert_eq!(runtime.push.build(None).title, "Quotation update");

    assert_eq!(runtime.sync_tag(), "quotation-sync");
    runtime.queue_sync(json!({"quotation": 1})).unwrap();
    assert_eq!(
        runtime.on_sync().await.unwrap(),
        SyncOutcome::Completed { ran: 1 }
    );
    assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        runtime.sync.on_sync(TAG).await.unwrap(),
        SyncOutcome::Ignored
    );
}

#[test]
fn runtime_builds_reqwest_network_from_settings() {
    let mut settings = Settings::defaults();
    settings.client.network_timeout = Duration::from_secs(3);

    let runtime = ClientRuntime::from_settings(
        &settings,
        platform(
            Arc::new(MemoryCacheStorage::new()),
            Arc::new(CountingHandler::new()),
        ),
    )
    .expect("client runtime");
    assert_eq!(runtime.sync_tag(), settings.sync.tag);
    assert_eq!(runtime.executor.state(), WorkerState::Parsed);
}
