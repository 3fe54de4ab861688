//! Synthetic sensor drift.
//!
//! Each tick moves the pressure of every module's sensor by the environmental
//! wave plus the effect of the pumps currently running. The new reading is
//! written to the backend and through the registry, so it reaches
//! subscribers like any other value change.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use deepsea_core::value::{ACTIVE_COUNT, PRESSURE};
use deepsea_core::{Module, PressureModel, Quantity, Value};
use deepsea_storage::{DynBackend, ResourceRegistry, StorageResult};

pub struct PhysicalSimulator {
    registry: Arc<ResourceRegistry>,
    backend: DynBackend,
    model: PressureModel,
    interval: Duration,
    started: Instant,
}

impl PhysicalSimulator {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        backend: DynBackend,
        model: PressureModel,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            backend,
            model,
            interval,
            started: Instant::now(),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "Physical simulator started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(&shutdown).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Physical simulator stopped");
    }

    /// Advance every module by one step.
    pub async fn tick(&self, shutdown: &watch::Receiver<bool>) {
        let elapsed = self.started.elapsed();
        for module in self.registry.list_modules() {
            if *shutdown.borrow() {
                break;
            }
            match self.step(&module, elapsed).await {
                Ok(Some(pressure)) => {
                    trace!(module = %module.name, pressure = %pressure, "Pressure drifted");
                }
                Ok(None) => {}
                Err(err) => warn!(module = %module.name, error = %err, "Simulation step failed"),
            }
        }
    }

    /// Returns the new pressure, or `None` if the sensor is not on the backend yet.
    pub async fn step(
        &self,
        module: &Module,
        elapsed: Duration,
    ) -> StorageResult<Option<Quantity>> {
        let sensor = &module.devices().pressure_sensor;
        let Some(device) = self.backend.get_device(sensor).await? else {
            debug!(module = %module.name, sensor = %sensor, "Sensor not registered with backend");
            return Ok(None);
        };

        let pumps = self
            .registry
            .get_device(&module.devices().pump)
            .and_then(|pump| pump.observed_input(ACTIVE_COUNT).and_then(|v| v.value.to_i64()))
            .unwrap_or(0);

        let current = device
            .output(PRESSURE)
            .map(|v| v.value.clone())
            .unwrap_or_else(|| Quantity::from_i64(10));
        let next = current + self.model.delta(elapsed, pumps);
        let reading = Value::float(PRESSURE, next.clone());

        self.backend.set_output(sensor, reading.clone()).await?;
        match self.registry.set_output(sensor, reading) {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::testing::{Harness, seed_devices};
    use deepsea_storage::DeviceBackend;

    fn simulator(h: &Harness) -> PhysicalSimulator {
        let model = PressureModel {
            wave_amplitude: 0.0,
            ..PressureModel::default()
        };
        PhysicalSimulator::new(
            h.registry.clone(),
            h.backend.clone(),
            model,
            Duration::from_millis(10),
        )
    }

    async fn registered_module(h: &Harness) -> Module {
        seed_devices(h);
        let module = Module::new("m1", "pump", "alarm", "sensor");
        h.registry.put_module(module.clone()).unwrap();
        h.backend.register_module(&module).await.unwrap();
        module
    }

    #[tokio::test]
    async fn test_pumps_below_equilibrium_lower_pressure() {
        let h = Harness::new();
        let module = registered_module(&h).await;
        h.registry
            .set_observed_input("pump", Value::integer(ACTIVE_COUNT, 0))
            .unwrap();

        let next = simulator(&h).step(&module, Duration::ZERO).await.unwrap();
        // 10 + 0.1 * (0 - 2.5)
        assert_eq!(next.unwrap().to_string(), "9.75");
        let sensor = h.registry.get_device("sensor").unwrap();
        assert_eq!(sensor.output(PRESSURE).unwrap().value.to_string(), "9.75");
    }

    #[tokio::test]
    async fn test_deltas_accumulate_exactly() {
        let h = Harness::new();
        let module = registered_module(&h).await;
        h.registry
            .set_observed_input("pump", Value::integer(ACTIVE_COUNT, 5))
            .unwrap();

        let sim = simulator(&h);
        for _ in 0..10 {
            sim.step(&module, Duration::ZERO).await.unwrap();
        }
        // Ten steps of +0.25.
        let sensor = h.backend.get_device("sensor").await.unwrap().unwrap();
        assert_eq!(sensor.output(PRESSURE).unwrap().value.to_string(), "12.5");
    }

    #[tokio::test]
    async fn test_unregistered_sensor_is_skipped() {
        let h = Harness::new();
        let module = Module::new("m1", "pump", "alarm", "sensor");
        h.registry.put_module(module.clone()).unwrap();
        assert_eq!(simulator(&h).step(&module, Duration::ZERO).await.unwrap(), None);
    }
}
