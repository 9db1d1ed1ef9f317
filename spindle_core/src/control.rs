//! Fixed-rate control loop.
//!
//! The loop samples torque and angle once per tick, reports each sample to a
//! registered observer, and clears its own running flag when either threshold
//! is crossed. `start`/`stop`/`state` are safe to call from any thread; the
//! command channel drives them while the worker thread runs the ticks.
//!
//! # Timing
//!
//! Each tick measures its own duration and sleeps for the residual period, so
//! a slow tick is not compensated in later ticks. Stop is cooperative: the
//! worker notices the cleared flag at the next tick boundary, which bounds
//! cancellation latency at one period plus any in-flight sleep.
//!
//! # Example
//!
//! ```no_run
//! use spindle_core::{ControlLoop, ControlSettings, SimMeasurement};
//!
//! let control = ControlLoop::new(ControlSettings::default(), Box::new(SimMeasurement::new()))?;
//! control.set_status_callback(|event| println!("{event}"));
//! control.start();
//! control.stop();
//! # Ok::<(), spindle_core::SpindleError>(())
//! ```

use crate::error::SpindleResult;
use crate::measurement::MeasurementSource;
use crate::settings::ControlSettings;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Control loop states.
///
/// Idle is both the initial state and where every run ends. Error is entered
/// only when a measurement read fails mid-run; `stop()` settles it back to
/// Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlState {
    Idle = 0,
    Running = 1,
    Error = 2,
}

impl ControlState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ControlState::Running,
            2 => ControlState::Error,
            _ => ControlState::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlState::Idle => "Idle",
            ControlState::Running => "Running",
            ControlState::Error => "Error",
        }
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single status notification, delivered to the registered observer on the
/// worker thread. `Display` renders the wire/log line.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// The worker began executing.
    Running,
    /// The run ended and the loop settled back to Idle.
    Idle,
    /// A measurement read failed and the run was aborted.
    Error,
    /// One tick's sample.
    Measurement { torque_nm: f64, angle_deg: f64 },
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::Running => f.write_str("STATE:RUNNING"),
            StatusEvent::Idle => f.write_str("STATE:IDLE"),
            StatusEvent::Error => f.write_str("STATE:ERROR"),
            StatusEvent::Measurement {
                torque_nm,
                angle_deg,
            } => write!(f, "MEAS torque_nm={torque_nm:.6} angle_deg={angle_deg:.6}"),
        }
    }
}

/// Single-slot status observer. Invoked synchronously on the worker thread,
/// so it must not block materially or it will perturb the tick timing.
pub type StatusCallback = Box<dyn Fn(&StatusEvent) + Send + 'static>;

/// State shared between the API side and the worker thread. The running flag
/// and state word are the only fields mutated from both sides.
struct LoopShared {
    settings: ControlSettings,
    source: Mutex<Box<dyn MeasurementSource>>,
    running: AtomicBool,
    state: AtomicU8,
    observer: Mutex<Option<StatusCallback>>,
}

impl LoopShared {
    fn state(&self) -> ControlState {
        ControlState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ControlState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn emit(&self, event: &StatusEvent) {
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(callback) = observer.as_ref() {
            callback(event);
        }
    }
}

/// The fixed-rate control loop.
///
/// Owns the worker thread for the duration of one running episode. All public
/// operations take `&self` so the loop can be shared behind an `Arc` between
/// the command channel and the daemon.
pub struct ControlLoop {
    shared: Arc<LoopShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ControlLoop {
    /// Create a loop over the given measurement source.
    ///
    /// Fails if the settings violate the loop's invariants (non-positive or
    /// non-finite cycle rate, non-finite thresholds).
    pub fn new(
        settings: ControlSettings,
        source: Box<dyn MeasurementSource>,
    ) -> SpindleResult<Self> {
        settings.validate()?;
        Ok(Self {
            shared: Arc::new(LoopShared {
                settings,
                source: Mutex::new(source),
                running: AtomicBool::new(false),
                state: AtomicU8::new(ControlState::Idle as u8),
                observer: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Register the status observer, replacing any previous one. Replacement
    /// while running only affects subsequent events.
    pub fn set_status_callback<F>(&self, observer: F)
    where
        F: Fn(&StatusEvent) + Send + 'static,
    {
        *self
            .shared
            .observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Box::new(observer));
    }

    /// Current state. Non-blocking; may still read Running for a moment after
    /// the stop condition was met, until the worker finishes its last tick.
    pub fn state(&self) -> ControlState {
        self.shared.state()
    }

    /// Start a run. No-op if already running. Returns as soon as the worker
    /// is launched, possibly before its first tick executes.
    pub fn start(&self) {
        let mut worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.shared.state() == ControlState::Running {
            return;
        }
        // Reap a worker that ended on its own (threshold hit or fault).
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }

        self.shared
            .source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .reset();
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.set_state(ControlState::Running);

        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("spindle-control".into())
            .spawn(move || run_loop(shared))
        {
            Ok(handle) => *worker = Some(handle),
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.set_state(ControlState::Idle);
                error!("failed to spawn control worker: {e}");
            }
        }
    }

    /// Stop the current run and wait for the worker to exit. No-op when
    /// already idle; always leaves the state at Idle on return.
    pub fn stop(&self) {
        let mut worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }
        // A normal exit already settled to Idle; this catches Error.
        if self.shared.state() != ControlState::Idle {
            self.shared.set_state(ControlState::Idle);
            self.shared.emit(&StatusEvent::Idle);
        }
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker body: one iteration per tick until the running flag clears.
fn run_loop(shared: Arc<LoopShared>) {
    let period = Duration::from_secs_f64(1.0 / shared.settings.cycle_hz);
    let dt_sec = period.as_secs_f64();

    shared.emit(&StatusEvent::Running);
    debug!(cycle_hz = shared.settings.cycle_hz, "control loop entered");

    while shared.running.load(Ordering::SeqCst) {
        let tick_start = Instant::now();

        let sample = {
            let mut source = shared
                .source
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            source.step(dt_sec);
            source
                .torque_nm()
                .and_then(|torque| source.angle_deg().map(|angle| (torque, angle)))
        };
        let (torque_nm, angle_deg) = match sample {
            Ok(sample) => sample,
            Err(e) => {
                error!("measurement read failed, aborting run: {e}");
                shared.running.store(false, Ordering::SeqCst);
                shared.set_state(ControlState::Error);
                shared.emit(&StatusEvent::Error);
                return;
            }
        };

        shared.emit(&StatusEvent::Measurement {
            torque_nm,
            angle_deg,
        });

        if torque_nm >= shared.settings.target_torque_nm
            || angle_deg >= shared.settings.max_angle_deg
        {
            debug!(torque_nm, angle_deg, "stop condition met");
            shared.running.store(false, Ordering::SeqCst);
        }

        // Residual sleep, skipped on the final iteration. Overruns are not
        // carried into the next tick.
        if shared.running.load(Ordering::SeqCst) {
            thread::sleep(period.saturating_sub(tick_start.elapsed()));
        }
    }

    shared.set_state(ControlState::Idle);
    shared.emit(&StatusEvent::Idle);
    debug!("control loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpindleError;
    use crate::measurement::SimMeasurement;
    use crossbeam::channel::{unbounded, Receiver};

    /// Settings whose thresholds the simulation can never reach.
    fn endless_settings() -> ControlSettings {
        ControlSettings {
            target_torque_nm: 100.0,
            max_angle_deg: 1.0e9,
            cycle_hz: 200.0,
        }
    }

    fn sim_loop(settings: ControlSettings) -> ControlLoop {
        ControlLoop::new(settings, Box::new(SimMeasurement::new())).unwrap()
    }

    fn capture_events(control: &ControlLoop) -> Receiver<StatusEvent> {
        let (tx, rx) = unbounded();
        control.set_status_callback(move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    fn wait_for_state(control: &ControlLoop, want: ControlState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if control.state() == want {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    struct FailingSource;

    impl MeasurementSource for FailingSource {
        fn reset(&mut self) {}
        fn step(&mut self, _dt_sec: f64) {}
        fn torque_nm(&self) -> SpindleResult<f64> {
            Err(SpindleError::measurement("transducer offline"))
        }
        fn angle_deg(&self) -> SpindleResult<f64> {
            Ok(0.0)
        }
    }

    #[test]
    fn test_start_then_stop_settles_idle() {
        let control = sim_loop(endless_settings());

        control.start();
        assert_eq!(control.state(), ControlState::Running);

        control.stop();
        assert_eq!(control.state(), ControlState::Idle);
    }

    #[test]
    fn test_start_is_idempotent() {
        let control = sim_loop(endless_settings());
        let events = capture_events(&control);

        control.start();
        control.start();
        thread::sleep(Duration::from_millis(50));
        control.start();
        assert_eq!(control.state(), ControlState::Running);
        control.stop();

        let running_events = events
            .try_iter()
            .filter(|event| *event == StatusEvent::Running)
            .count();
        assert_eq!(running_events, 1);
    }

    #[test]
    fn test_stop_when_idle_emits_nothing() {
        let control = sim_loop(endless_settings());
        let events = capture_events(&control);

        control.stop();
        assert_eq!(control.state(), ControlState::Idle);
        assert!(events.try_iter().next().is_none());
    }

    #[test]
    fn test_auto_stop_on_threshold() {
        // Torque crosses 1.0 Nm after ~122 ms of simulation; the angle
        // threshold would take 1.5 s, so torque ends this run.
        let settings = ControlSettings {
            target_torque_nm: 1.0,
            max_angle_deg: 45.0,
            cycle_hz: 100.0,
        };
        let control = sim_loop(settings);
        let events = capture_events(&control);

        control.start();
        assert!(wait_for_state(
            &control,
            ControlState::Idle,
            Duration::from_secs(5)
        ));

        // The last sample before the Idle event must satisfy the stop
        // condition.
        let mut last_sample = None;
        for event in events.try_iter() {
            match event {
                StatusEvent::Measurement {
                    torque_nm,
                    angle_deg,
                } => last_sample = Some((torque_nm, angle_deg)),
                StatusEvent::Idle => break,
                _ => {}
            }
        }
        let (torque_nm, angle_deg) = last_sample.expect("no measurement events");
        assert!(torque_nm >= 1.0 || angle_deg >= 45.0);
    }

    #[test]
    fn test_restart_after_auto_stop() {
        let settings = ControlSettings {
            target_torque_nm: -1.0, // halts on the first tick
            max_angle_deg: 1.0e9,
            cycle_hz: 500.0,
        };
        let control = sim_loop(settings);

        control.start();
        assert!(wait_for_state(
            &control,
            ControlState::Idle,
            Duration::from_secs(5)
        ));

        control.start();
        assert!(wait_for_state(
            &control,
            ControlState::Idle,
            Duration::from_secs(5)
        ));
    }

    #[test]
    fn test_measurement_fault_enters_error_state() {
        let control =
            ControlLoop::new(endless_settings(), Box::new(FailingSource)).unwrap();
        let events = capture_events(&control);

        control.start();
        assert!(wait_for_state(
            &control,
            ControlState::Error,
            Duration::from_secs(5)
        ));
        assert!(events
            .try_iter()
            .any(|event| event == StatusEvent::Error));

        // stop() acknowledges the fault and settles back to Idle.
        control.stop();
        assert_eq!(control.state(), ControlState::Idle);
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        let settings = ControlSettings {
            cycle_hz: 0.0,
            ..ControlSettings::default()
        };
        assert!(ControlLoop::new(settings, Box::new(SimMeasurement::new())).is_err());
    }

    #[test]
    fn test_status_event_wire_format() {
        assert_eq!(StatusEvent::Running.to_string(), "STATE:RUNNING");
        assert_eq!(StatusEvent::Idle.to_string(), "STATE:IDLE");
        assert_eq!(StatusEvent::Error.to_string(), "STATE:ERROR");
        let measurement = StatusEvent::Measurement {
            torque_nm: 1.5,
            angle_deg: 12.0,
        };
        assert_eq!(
            measurement.to_string(),
            "MEAS torque_nm=1.500000 angle_deg=12.000000"
        );
    }
}
