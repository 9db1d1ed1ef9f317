//! # SPINDLE Core
//!
//! Core runtime for the SPINDLE fastening control daemon.
//!
//! A fastening run samples torque and angle at a fixed rate and halts itself
//! as soon as either crosses its configured threshold. This crate provides the
//! building blocks:
//!
//! - **Control**: the fixed-rate control loop, its state machine, and the
//!   status event stream
//! - **Command**: the TCP command channel that drives the loop remotely
//! - **Measurement**: the seam for torque/angle sources, plus the bench
//!   simulation
//! - **Settings**: flat-file persistence of the run configuration
//!
//! ## Quick Start
//!
//! ```no_run
//! use spindle_core::{ControlLoop, ControlSettings, SimMeasurement};
//!
//! let settings = ControlSettings::default();
//! let control = ControlLoop::new(settings, Box::new(SimMeasurement::new()))?;
//!
//! control.set_status_callback(|event| println!("{event}"));
//! control.start();
//! // ... the loop stops on its own once a threshold is crossed ...
//! control.stop();
//! # Ok::<(), spindle_core::SpindleError>(())
//! ```

pub mod command;
pub mod control;
pub mod error;
pub mod measurement;
pub mod settings;

// Re-export commonly used types for easy access
pub use command::CommandServer;
pub use control::{ControlLoop, ControlState, StatusEvent};
pub use error::{SpindleError, SpindleResult};
pub use measurement::{MeasurementSource, SimMeasurement};
pub use settings::ControlSettings;
