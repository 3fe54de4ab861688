//! Pump activation controller.
//!
//! The controller maps a pressure reading to a pump count through a table of
//! `(threshold, pumps)` zones. Wide dead-bands around the desired pressure keep
//! the pump count from oscillating on a slow-moving process.

use crate::error::{CoreError, Result};

/// Maximum number of pumps a module can run.
pub const MAX_PUMPS: i64 = 5;
/// Pressure the schedule steers toward.
pub const DESIRED_PRESSURE: f64 = 10.0;
/// Pump count at which the simulated pressure holds steady.
pub const EQUILIBRIUM_PUMPS: f64 = 2.5;

/// A zone starts at `threshold` (inclusive) and runs `pumps` pumps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpZone {
    pub threshold: f64,
    pub pumps: i64,
}

const fn zone(threshold: f64, pumps: i64) -> PumpZone {
    PumpZone { threshold, pumps }
}

const DEFAULT_ZONES: [PumpZone; 6] = [
    zone(f64::NEG_INFINITY, 5),
    zone(8.8, 4),
    zone(9.6, 3),
    zone(10.0, 2),
    zone(10.4, 1),
    zone(11.2, 0),
];

/// Piecewise pressure to pump-count mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpSchedule {
    zones: Vec<PumpZone>,
    max_pumps: i64,
}

impl PumpSchedule {
    /// Build a schedule from zones sorted by rising threshold.
    ///
    /// Thresholds must strictly increase and pump counts must not increase.
    pub fn new(zones: Vec<PumpZone>, max_pumps: i64) -> Result<Self> {
        if zones.is_empty() {
            return Err(CoreError::invalid_schedule("schedule has no zones"));
        }
        if max_pumps < 0 {
            return Err(CoreError::invalid_schedule("max pumps must not be negative"));
        }
        for pair in zones.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if hi.threshold.is_nan() || hi.threshold <= lo.threshold {
                return Err(CoreError::invalid_schedule(format!(
                    "threshold {} does not increase after {}",
                    hi.threshold, lo.threshold
                )));
            }
            if hi.pumps > lo.pumps {
                return Err(CoreError::invalid_schedule(format!(
                    "pump count rises from {} to {} at pressure {}",
                    lo.pumps, hi.pumps, hi.threshold
                )));
            }
        }
        Ok(Self { zones, max_pumps })
    }

    pub fn zones(&self) -> &[PumpZone] {
        &self.zones
    }

    pub fn max_pumps(&self) -> i64 {
        self.max_pumps
    }

    /// Pump count for a pressure reading, clamped to `[0, max_pumps]`.
    pub fn setpoint(&self, pressure: f64) -> i64 {
        // NaN readings fall through to the lowest zone and run every pump.
        let pumps = self
            .zones
            .iter()
            .rev()
            .find(|z| pressure >= z.threshold)
            .unwrap_or(&self.zones[0])
            .pumps;
        pumps.clamp(0, self.max_pumps)
    }
}

impl Default for PumpSchedule {
    fn default() -> Self {
        Self {
            zones: DEFAULT_ZONES.to_vec(),
            max_pumps: MAX_PUMPS,
        }
    }
}

/// Pump count for `pressure` under the default schedule.
pub fn compute_pump_setpoint(pressure: f64) -> i64 {
    PumpSchedule::default().setpoint(pressure)
}
