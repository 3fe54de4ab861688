//! Synthetic pressure drift for the physical simulator.

use std::f64::consts::TAU;
use std::time::Duration;

use crate::pressure::EQUILIBRIUM_PUMPS;
use crate::quantity::Quantity;

/// Deterministic pressure model: a low-frequency environmental wave plus a
/// term linear in how far the pump count is from equilibrium.
#[derive(Debug, Clone, PartialEq)]
pub struct PressureModel {
    pub wave_period: Duration,
    pub wave_amplitude: f64,
    pub pump_effect: f64,
    pub equilibrium_pumps: f64,
}

impl Default for PressureModel {
    fn default() -> Self {
        Self {
            wave_period: Duration::from_secs(60),
            wave_amplitude: 0.2,
            pump_effect: 0.1,
            equilibrium_pumps: EQUILIBRIUM_PUMPS,
        }
    }
}

impl PressureModel {
    /// Environmental contribution at `elapsed` since the simulation started.
    pub fn environmental_wave(&self, elapsed: Duration) -> f64 {
        let period = self.wave_period.as_secs_f64();
        if period <= 0.0 {
            return 0.0;
        }
        self.wave_amplitude * (TAU * elapsed.as_secs_f64() / period).sin()
    }

    /// Pumps above equilibrium raise pressure, below it let pressure fall.
    pub fn pump_effect(&self, pumps: i64) -> f64 {
        self.pump_effect * (pumps as f64 - self.equilibrium_pumps)
    }

    /// Pressure change for one tick, rounded to thousandths.
    pub fn delta(&self, elapsed: Duration, pumps: i64) -> Quantity {
        let raw = self.environmental_wave(elapsed) + self.pump_effect(pumps);
        Quantity::from_f64_milli(raw).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wave_is_periodic() {
        let model = PressureModel::default();
        assert_eq!(model.environmental_wave(Duration::ZERO), 0.0);
        let quarter = model.environmental_wave(Duration::from_secs(15));
        assert!((quarter - 0.2).abs() < 1e-9);
        let full = model.environmental_wave(Duration::from_secs(60));
        assert!(full.abs() < 1e-9);
    }

    #[test]
    fn test_pump_effect_sign() {
        let model = PressureModel::default();
        assert!(model.pump_effect(5) > 0.0);
        assert!(model.pump_effect(0) < 0.0);
        assert_eq!(model.delta(Duration::ZERO, 5), Quantity::from_milli(250));
        assert_eq!(model.delta(Duration::ZERO, 0), Quantity::from_milli(-250));
    }

    #[test]
    fn test_zero_period_disables_wave() {
        let model = PressureModel {
            wave_period: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(model.environmental_wave(Duration::from_secs(7)), 0.0);
    }
}
