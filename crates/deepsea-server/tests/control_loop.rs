use std::sync::Arc;
use std::time::Duration;

use deepsea_core::value::{ACTIVE_COUNT, PRESSURE};
use deepsea_core::{DeviceSpec, Module, Quantity, Value};
use deepsea_server::{AppConfig, Runtime};
use deepsea_storage::{DeviceBackend, ResourceRegistry};

fn config(simulation: bool) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.controller.device_sync_interval_ms = 20;
    cfg.controller.module_sync_interval_ms = 100;
    cfg.simulation.enabled = simulation;
    cfg.simulation.tick_interval_ms = 20;
    cfg
}

fn seed(registry: &ResourceRegistry) {
    registry
        .put_module(Module::new("m1", "pump", "alarm", "sensor"))
        .unwrap();
    for device in ["pump", "alarm", "sensor"] {
        registry.put_device(device, DeviceSpec::default(), None).unwrap();
    }
}

async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..150 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

fn observed_pumps(registry: &Arc<ResourceRegistry>) -> Option<String> {
    registry
        .get_device("pump")?
        .observed_input(ACTIVE_COUNT)
        .map(|v| v.value.to_string())
}

fn sensor_pressure(registry: &Arc<ResourceRegistry>) -> Option<String> {
    registry
        .get_device("sensor")?
        .output(PRESSURE)
        .map(|v| v.value.to_string())
}

#[tokio::test]
async fn pump_count_follows_sensor_pressure() {
    let runtime = Runtime::start(&config(false));
    let registry = runtime.registry();
    let backend = runtime.backend();
    seed(&registry);

    assert!(eventually(|| sensor_pressure(&registry).is_some()).await);

    let high: Quantity = "11.5".parse().unwrap();
    backend
        .set_output("sensor", Value::float(PRESSURE, high))
        .await
        .unwrap();
    assert!(
        eventually(|| observed_pumps(&registry).as_deref() == Some("0")).await,
        "pump never stopped, saw {:?}",
        observed_pumps(&registry)
    );
    let desired = registry.get_device("pump").unwrap();
    assert_eq!(desired.input(ACTIVE_COUNT).unwrap().value.to_string(), "0");

    let low: Quantity = "7.0".parse().unwrap();
    backend
        .set_output("sensor", Value::float(PRESSURE, low))
        .await
        .unwrap();
    assert!(
        eventually(|| observed_pumps(&registry).as_deref() == Some("5")).await,
        "pumps never started, saw {:?}",
        observed_pumps(&registry)
    );

    let pump = backend.get_device("pump").await.unwrap().unwrap();
    assert_eq!(pump.observed_input(ACTIVE_COUNT).unwrap().value.to_string(), "5");

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn simulated_pressure_moves_over_time() {
    let runtime = Runtime::start(&config(true));
    let registry = runtime.registry();
    seed(&registry);

    assert!(eventually(|| sensor_pressure(&registry).is_some()).await);
    let first = sensor_pressure(&registry);
    assert!(
        eventually(|| sensor_pressure(&registry) != first).await,
        "pressure stayed at {first:?}"
    );
    // The controller keeps the pump count set for whatever pressure it sees.
    assert!(eventually(|| observed_pumps(&registry).is_some()).await);

    runtime.shutdown().await.unwrap();
}
