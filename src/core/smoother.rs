//! Signal smoother: one-dimensional Kalman filter without motion model
//!
//! - predict: estimate unchanged, uncertainty grows by process noise
//! - update: blend in the measurement weighted by the Kalman gain

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_MEASUREMENT_NOISE, DEFAULT_PROCESS_NOISE};

/// Internal belief of the smoother
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorState {
    pub estimate: f64,
    pub uncertainty: f64,
}

/// Recursive scalar estimator
#[derive(Debug, Clone)]
pub struct SignalSmoother {
    process_noise: f64,
    measurement_noise: f64,
    /// None until the first measurement seeds it
    state: Option<EstimatorState>,
}

impl Default for SignalSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESS_NOISE, DEFAULT_MEASUREMENT_NOISE)
    }
}

impl SignalSmoother {
    pub fn new(process_noise: f64, measurement_noise: f64) -> Self {
        Self {
            process_noise,
            measurement_noise,
            state: None,
        }
    }

    /// Feed one measurement, return the new estimate
    pub fn update(&mut self, measurement: f64) -> f64 {
        let Some(prior) = self.state else {
            self.state = Some(EstimatorState {
                estimate: measurement,
                uncertainty: self.measurement_noise,
            });
            return measurement;
        };

        let predicted_uncertainty = prior.uncertainty + self.process_noise;
        let innovation = measurement - prior.estimate;

        let mut innovation_covariance = predicted_uncertainty + self.measurement_noise;
        if innovation_covariance == 0.0 {
            innovation_covariance = 1.0;
        }

        let gain = predicted_uncertainty / innovation_covariance;
        let next = EstimatorState {
            estimate: prior.estimate + gain * innovation,
            uncertainty: (1.0 - gain) * predicted_uncertainty,
        };
        self.state = Some(next);
        next.estimate
    }

    /// Current belief, if seeded
    pub fn state(&self) -> Option<EstimatorState> {
        self.state
    }

    pub fn estimate(&self) -> Option<f64> {
        self.state.map(|s| s.estimate)
    }

    /// Forget the belief; the next measurement seeds again
    pub fn reseed(&mut self) {
        self.state = None;
    }
}
