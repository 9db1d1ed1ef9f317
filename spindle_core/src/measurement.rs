//! Torque/angle measurement seam.
//!
//! The control loop is generic over where its readings come from. Hardware
//! transducers, replayed captures, and the bench simulation below all plug in
//! through [`MeasurementSource`].

use crate::error::SpindleResult;

/// A source of torque and angle readings, advanced by the control loop once
/// per tick.
///
/// Readers are fallible so that real transducers can report faults; the loop
/// treats a failed read as a run-ending error.
pub trait MeasurementSource: Send {
    /// Return the source to its initial state. Called once per run, before
    /// the first tick.
    fn reset(&mut self);

    /// Advance the source by one tick period.
    fn step(&mut self, dt_sec: f64);

    /// Current torque [Nm].
    fn torque_nm(&self) -> SpindleResult<f64>;

    /// Current accumulated angle [deg].
    fn angle_deg(&self) -> SpindleResult<f64>;
}

/// Torque rise asymptote for the simulated joint [Nm].
const SIM_TORQUE_PLATEAU_NM: f64 = 6.0;
/// Exponential rise rate of the simulated torque curve [1/s].
const SIM_TORQUE_RISE_RATE: f64 = 1.5;
/// Constant spindle speed of the simulation [deg/s].
const SIM_ANGLE_RATE_DEG_S: f64 = 30.0;

/// Bench simulation of a fastening joint.
///
/// Torque rises exponentially toward a plateau while the angle integrates at
/// constant speed, which is enough to exercise both halves of the stop
/// condition.
#[derive(Debug, Default)]
pub struct SimMeasurement {
    time_sec: f64,
    torque_nm: f64,
    angle_deg: f64,
}

impl SimMeasurement {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MeasurementSource for SimMeasurement {
    fn reset(&mut self) {
        self.time_sec = 0.0;
        self.torque_nm = 0.0;
        self.angle_deg = 0.0;
    }

    fn step(&mut self, dt_sec: f64) {
        self.time_sec += dt_sec;
        self.torque_nm = SIM_TORQUE_PLATEAU_NM * (1.0 - (-self.time_sec * SIM_TORQUE_RISE_RATE).exp());
        self.angle_deg += SIM_ANGLE_RATE_DEG_S * dt_sec;
    }

    fn torque_nm(&self) -> SpindleResult<f64> {
        Ok(self.torque_nm)
    }

    fn angle_deg(&self) -> SpindleResult<f64> {
        Ok(self.angle_deg)
    }
}
