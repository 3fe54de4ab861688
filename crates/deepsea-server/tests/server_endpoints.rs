use std::time::Duration;

use deepsea_server::{AppConfig, AppState, Runtime, build_app};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

pub struct TestServer {
    pub base: String,
    pub runtime: Runtime,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        self.runtime.shutdown().await.expect("runtime shutdown");
        let _ = self.handle.await;
    }
}

fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.controller.device_sync_interval_ms = 20;
    cfg.controller.module_sync_interval_ms = 100;
    cfg.simulation.enabled = false;
    cfg
}

async fn start_server() -> TestServer {
    let cfg = test_config();
    let runtime = Runtime::start(&cfg);
    let state = AppState {
        registry: runtime.registry(),
        backend: runtime.backend(),
        ping_interval: cfg.events.ping_interval(),
    };
    let app = build_app(state, &cfg);

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://{addr}"),
        runtime,
        shutdown_tx: tx,
        handle,
    }
}

fn module_body(name: &str) -> Value {
    json!({
        "name": name,
        "spec": {"devices": {"pump": "pump", "waterAlarm": "alarm", "pressureSensor": "sensor"}}
    })
}

#[tokio::test]
async fn server_endpoints_work() {
    let server = start_server().await;
    let base = &server.base;
    let client = reqwest::Client::new();

    // GET /healthz
    let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["modules"], 0);

    // PUT /api/modules/m1 creates, a second PUT updates
    let resp = client
        .put(format!("{base}/api/modules/m1"))
        .json(&module_body("m1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let resp = client
        .put(format!("{base}/api/modules/m1"))
        .json(&module_body("m1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // PUT devices
    for device in ["pump", "alarm", "sensor"] {
        let resp = client
            .put(format!("{base}/api/devices/{device}"))
            .json(&json!({"name": device, "spec": {"inputs": []}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201, "device {device}");
    }

    // GET /api lists both kinds
    let body: Value = client
        .get(format!("{base}/api"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["modules"].as_array().unwrap().len(), 1);
    assert_eq!(body["devices"].as_array().unwrap().len(), 3);

    // GET /api/modules/m1
    let body: Value = client
        .get(format!("{base}/api/modules/m1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["spec"]["devices"]["pressureSensor"], "sensor");

    // DELETE /api/modules/m1 keeps the devices
    let resp = client
        .delete(format!("{base}/api/modules/m1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let body: Value = client
        .get(format!("{base}/api/devices"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body.as_array().unwrap().len(), 3);

    server.stop().await;
}

#[tokio::test]
async fn error_responses() {
    let server = start_server().await;
    let base = &server.base;
    let client = reqwest::Client::new();

    // Unknown resource
    let resp = client
        .get(format!("{base}/api/devices/ghost"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "not-found");

    // Malformed JSON
    let resp = client
        .put(format!("{base}/api/modules/m1"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Body name must match path name
    let resp = client
        .put(format!("{base}/api/modules/m1"))
        .json(&module_body("m2"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Unknown value names are rejected
    client
        .put(format!("{base}/api/devices/pump"))
        .json(&json!({"name": "pump"}))
        .send()
        .await
        .unwrap();
    let resp = client
        .put(format!("{base}/api/devices/pump/inputs/temperature"))
        .json(&json!({"name": "temperature", "type": "Float", "value": "21.5"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // Malformed value: fractional integer
    let resp = client
        .put(format!("{base}/api/devices/pump/inputs/activeCount"))
        .json(&json!({"name": "activeCount", "type": "Integer", "value": "2.5"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Deleting twice
    let resp = client
        .delete(format!("{base}/api/devices/pump"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let resp = client
        .delete(format!("{base}/api/devices/pump"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn desired_input_reaches_status_within_a_sync_tick() {
    let server = start_server().await;
    let base = &server.base;
    let client = reqwest::Client::new();

    let resp = client
        .put(format!("{base}/api/devices/pump"))
        .json(&json!({"name": "pump", "spec": {"inputs": []}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .put(format!("{base}/api/devices/pump/inputs/activeCount"))
        .json(&json!({"name": "activeCount", "type": "Integer", "value": 3}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["value"], "3");

    let mut observed = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let device: Value = client
            .get(format!("{base}/api/devices/pump"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let found = device["status"]["observedInputs"]
            .as_array()
            .and_then(|values| values.iter().find(|v| v["name"] == "activeCount"))
            .map(|v| v["value"].clone());
        if found == Some(json!("3")) {
            observed = found;
            break;
        }
    }
    assert_eq!(observed, Some(json!("3")));

    // The single-value path reports the observed input.
    let body: Value = client
        .get(format!("{base}/api/devices/pump/inputs/activeCount"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["type"], "Integer");
    assert_eq!(body["value"], "3");

    server.stop().await;
}

#[tokio::test]
async fn sensor_output_write_survives_sync() {
    use deepsea_storage::DeviceBackend;

    let server = start_server().await;
    let base = &server.base;
    let client = reqwest::Client::new();

    client
        .put(format!("{base}/api/devices/sensor"))
        .json(&json!({"name": "sensor"}))
        .send()
        .await
        .unwrap();

    let resp = client
        .put(format!("{base}/api/devices/sensor/outputs/pressure"))
        .json(&json!({"name": "pressure", "type": "Float", "value": "12.25"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Several sync ticks later the reading is still there, on both sides.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let body: Value = client
        .get(format!("{base}/api/devices/sensor/outputs/pressure"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["value"], "12.25");

    let backend = server.runtime.backend();
    let sensor = backend.get_device("sensor").await.unwrap().expect("registered");
    assert_eq!(sensor.output("pressure").unwrap().value.to_string(), "12.25");

    server.stop().await;
}

#[tokio::test]
async fn out_of_range_quantities_are_rejected() {
    let server = start_server().await;
    let base = &server.base;
    let client = reqwest::Client::new();

    for device in ["pump", "sensor"] {
        client
            .put(format!("{base}/api/devices/{device}"))
            .json(&json!({"name": device}))
            .send()
            .await
            .unwrap();
    }

    let started = std::time::Instant::now();
    let pressure = |value: Value| json!({"name": "pressure", "type": "Float", "value": value});
    let cases = [
        ("sensor/outputs/pressure", pressure(json!("1e1000000"))),
        ("sensor/outputs/pressure", pressure(json!(1e300))),
        ("sensor/outputs/pressure", pressure(json!("0.0000000001"))),
        (
            "pump/inputs/activeCount",
            json!({"name": "activeCount", "type": "Integer", "value": "1e-1000000"}),
        ),
    ];
    for (path, body) in cases {
        let resp = client
            .put(format!("{base}/api/devices/{path}"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "{path}: {body}");
        let error: Value = resp.json().await.unwrap();
        assert_eq!(error["error"], "invalid");
    }
    assert!(started.elapsed() < Duration::from_secs(2));

    // The registry still answers promptly afterwards.
    let resp = client
        .put(format!("{base}/api/devices/sensor/outputs/pressure"))
        .json(&json!({"name": "pressure", "type": "Float", "value": "999999999999999"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    server.stop().await;
}

#[tokio::test]
async fn sensor_output_reaches_backend_before_registry() {
    use deepsea_storage::DeviceBackend;

    let server = start_server().await;
    let base = &server.base;
    let client = reqwest::Client::new();

    client
        .put(format!("{base}/api/devices/sensor"))
        .json(&json!({"name": "sensor"}))
        .send()
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let backend = server.runtime.backend();
    assert!(backend.get_device("sensor").await.unwrap().is_some());

    // A failed backend write leaves the registry untouched.
    backend.set_available(false);
    let resp = client
        .put(format!("{base}/api/devices/sensor/outputs/pressure"))
        .json(&json!({"name": "pressure", "type": "Float", "value": "12.25"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let registry = server.runtime.registry();
    let stored = registry
        .get_device("sensor")
        .unwrap()
        .output("pressure")
        .map(|v| v.value.to_string());
    assert_ne!(stored.as_deref(), Some("12.25"));
    backend.set_available(true);

    // Unknown names are refused before the backend sees them.
    let resp = client
        .put(format!("{base}/api/devices/sensor/outputs/temperature"))
        .json(&json!({"name": "temperature", "type": "Float", "value": "4"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let remote = backend.get_device("sensor").await.unwrap().expect("registered");
    assert!(remote.output("temperature").is_none());

    let resp = client
        .put(format!("{base}/api/devices/sensor/outputs/pressure"))
        .json(&json!({"name": "pressure", "type": "Float", "value": "12.25"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let remote = backend.get_device("sensor").await.unwrap().expect("registered");
    assert_eq!(remote.output("pressure").unwrap().value.to_string(), "12.25");

    server.stop().await;
}
