//! Software-based PWM on the 40-pin header's GPIO lines.
//!
//! The ODYSSEY-X86J4105's header pins don't have a dedicated hardware PWM
//! peripheral. [`SoftPwm`] emulates a PWM signal by toggling a pin's output
//! state on a separate thread, sleeping for the computed active and inactive
//! part of each cycle.
//!
//! Software-based PWM is inherently inaccurate on a multi-threaded OS due to
//! scheduling/preemption. The PWM thread requests a real-time scheduling
//! policy to reduce jitter, which is silently skipped without the necessary
//! privileges. Frequencies that require sub-millisecond precision shouldn't
//! rely on sleep-based toggling.
//!
//! Frequency and duty cycle can be reconfigured while the signal is active.
//! Changes take effect at the next half-cycle boundary, not immediately and
//! not while a sleep is in progress.
//!
//! [`SoftPwm`]: struct.SoftPwm.html

use std::error;
use std::fmt;
use std::result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use libc::{self, sched_param, PR_SET_TIMERSLACK, SCHED_RR};
#[cfg(target_env = "musl")]
use libc::timespec;

use crate::gpio;
use crate::gpio::{Direction, Level, Line, LineAccess};

#[cfg(feature = "embedded-hal")]
mod hal;

/// Frequency in Hz used when a `SoftPwm` is constructed with an invalid
/// frequency.
pub const DEFAULT_FREQUENCY: u32 = 1000;

/// Errors that can occur when generating a PWM signal.
#[derive(Debug)]
pub enum Error {
    /// Invalid frequency.
    ///
    /// Frequencies must be 1 Hz or higher.
    InvalidFrequency(u32),
    /// Invalid duty cycle.
    ///
    /// Duty cycles are a percentage between 0 and 100 inclusive.
    InvalidDutyCycle(f64),
    /// GPIO error.
    Gpio(gpio::Error),
    /// PWM thread panicked.
    ThreadPanic,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::InvalidFrequency(frequency) => {
                write!(f, "Invalid frequency: {} Hz", frequency)
            }
            Error::InvalidDutyCycle(duty_cycle) => {
                write!(f, "Invalid duty cycle: {}%", duty_cycle)
            }
            Error::Gpio(ref err) => write!(f, "GPIO error: {}", err),
            Error::ThreadPanic => write!(f, "PWM thread panicked"),
        }
    }
}

impl error::Error for Error {}

impl From<gpio::Error> for Error {
    fn from(err: gpio::Error) -> Error {
        Error::Gpio(err)
    }
}

/// Result type returned from methods that can have `odyssey_gpio::pwm::Error`s.
pub type Result<T> = result::Result<T, Error>;

/// Converts a duty cycle percentage and a frequency into the active and
/// inactive part of a single cycle, both in seconds.
///
/// Returns `None` when `duty_cycle` falls outside 0-100 or `frequency` is 0.
pub fn cycle_durations(duty_cycle: f64, frequency: u32) -> Option<(f64, f64)> {
    if !(0.0..=100.0).contains(&duty_cycle) || frequency < 1 {
        return None;
    }

    let cycle = 1.0 / f64::from(frequency);
    let unit = cycle / 100.0;

    Some((duty_cycle * unit, (100.0 - duty_cycle) * unit))
}

// Durations shared with the PWM thread. Each slot is an independently
// replaced scalar, read fresh at every half-cycle boundary.
#[derive(Debug)]
struct SharedTimings {
    cycling: AtomicBool,
    on_time_ns: AtomicU64,
    off_time_ns: AtomicU64,
}

impl SharedTimings {
    fn new() -> SharedTimings {
        SharedTimings {
            cycling: AtomicBool::new(false),
            on_time_ns: AtomicU64::new(0),
            off_time_ns: AtomicU64::new(0),
        }
    }
}

/// Generates a PWM signal on a single GPIO line from a dedicated thread.
///
/// `SoftPwm` opens the line at construction and drives it low. [`start`]
/// spawns the PWM thread, which toggles the line until [`stop`] is called.
/// `stop` waits for the thread to finish its current half-cycle, then
/// reconfigures the line as an input and releases it; the `SoftPwm` can't be
/// restarted afterwards.
///
/// [`start`]: #method.start
/// [`stop`]: #method.stop
#[derive(Debug)]
pub struct SoftPwm {
    pin: u8,
    // Held while idle; handed to the PWM thread while running, and gone for
    // good after stop() has released it.
    line: Option<Box<dyn LineAccess>>,
    frequency: u32,
    duty_cycle: f64,
    on_time: f64,
    off_time: f64,
    shared: Arc<SharedTimings>,
    pwm_thread: Option<thread::JoinHandle<(Box<dyn LineAccess>, gpio::Result<()>)>>,
}

impl SoftPwm {
    /// Constructs a new `SoftPwm` on the GPIO line at the specified physical
    /// pin position.
    ///
    /// The line is opened as an output and driven low. The duty cycle starts
    /// out at 100%. If `frequency` is invalid, [`DEFAULT_FREQUENCY`] is used
    /// instead.
    ///
    /// Returns an error if the pin position doesn't expose a GPIO line, or if
    /// the line request fails.
    ///
    /// [`DEFAULT_FREQUENCY`]: constant.DEFAULT_FREQUENCY.html
    pub fn new(pin: u8, frequency: u32) -> Result<SoftPwm> {
        let line = Line::open(pin, Direction::Out)?;

        Ok(SoftPwm::with_line(pin, Box::new(line), frequency))
    }

    pub(crate) fn with_line(pin: u8, line: Box<dyn LineAccess>, frequency: u32) -> SoftPwm {
        let mut pwm = SoftPwm {
            pin,
            line: Some(line),
            frequency: DEFAULT_FREQUENCY,
            duty_cycle: 100.0,
            on_time: 0.0,
            off_time: 0.0,
            shared: Arc::new(SharedTimings::new()),
            pwm_thread: None,
        };

        if pwm.set_frequency(frequency).is_err() {
            let _ = pwm.set_frequency(DEFAULT_FREQUENCY);
        }

        pwm
    }

    /// Returns the physical pin position this `SoftPwm` was constructed with.
    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Returns the configured frequency in Hz.
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Returns the configured duty cycle as a percentage.
    pub fn duty_cycle(&self) -> f64 {
        self.duty_cycle
    }

    /// Returns the active part of a single cycle in seconds.
    pub fn on_time(&self) -> f64 {
        self.on_time
    }

    /// Returns the inactive part of a single cycle in seconds.
    pub fn off_time(&self) -> f64 {
        self.off_time
    }

    /// Returns `true` while the PWM thread is active.
    pub fn is_running(&self) -> bool {
        self.pwm_thread.is_some()
    }

    /// Starts the PWM signal with the specified duty cycle percentage.
    ///
    /// Calling `start` while the signal is already active is a no-op. After
    /// [`stop`] has released the line, `start` returns [`Error::Gpio`] with
    /// [`gpio::Error::Closed`].
    ///
    /// Returns [`Error::InvalidDutyCycle`] and leaves the signal inactive if
    /// `duty_cycle` falls outside 0-100.
    ///
    /// [`stop`]: #method.stop
    /// [`Error::Gpio`]: enum.Error.html#variant.Gpio
    /// [`gpio::Error::Closed`]: ../gpio/enum.Error.html#variant.Closed
    /// [`Error::InvalidDutyCycle`]: enum.Error.html#variant.InvalidDutyCycle
    pub fn start(&mut self, duty_cycle: f64) -> Result<()> {
        if self.pwm_thread.is_some() {
            return Ok(());
        }

        if self.line.is_none() {
            return Err(Error::Gpio(gpio::Error::Closed));
        }

        self.set_duty_cycle(duty_cycle)?;

        let mut line = match self.line.take() {
            Some(line) => line,
            None => return Err(Error::Gpio(gpio::Error::Closed)),
        };

        self.shared.cycling.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        self.pwm_thread = Some(thread::spawn(move || {
            configure_pwm_thread();

            let result = pulse(line.as_mut(), &shared);

            // The line travels back through the join handle, so stop() can
            // only release it after the thread has exited.
            (line, result)
        }));

        Ok(())
    }

    /// Stops the PWM signal and releases the GPIO line.
    ///
    /// Blocks until the PWM thread has observed the stop request and exited,
    /// which takes at most one full cycle. The line is then reconfigured as
    /// an input and released. The `SoftPwm` can't be restarted afterwards.
    ///
    /// Calling `stop` while the signal is inactive is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        let pwm_thread = match self.pwm_thread.take() {
            Some(pwm_thread) => pwm_thread,
            None => return Ok(()),
        };

        self.shared.cycling.store(false, Ordering::SeqCst);

        // If the thread panicked, the line was dropped during unwinding and
        // the kernel has already released the request.
        let (mut line, loop_result) = pwm_thread.join().map_err(|_| Error::ThreadPanic)?;

        line.set_direction(Direction::In)?;
        line.close()?;

        loop_result?;

        Ok(())
    }

    /// Reconfigures the frequency in Hz.
    ///
    /// Valid whether the signal is active or not. While active, the new
    /// timings take effect at the next half-cycle boundary.
    ///
    /// Returns [`Error::InvalidFrequency`] and leaves the configuration
    /// unchanged if `frequency` is 0.
    ///
    /// [`Error::InvalidFrequency`]: enum.Error.html#variant.InvalidFrequency
    pub fn set_frequency(&mut self, frequency: u32) -> Result<()> {
        match cycle_durations(self.duty_cycle, frequency) {
            Some((on_time, off_time)) => {
                self.frequency = frequency;
                self.commit_timings(on_time, off_time);

                Ok(())
            }
            None => Err(Error::InvalidFrequency(frequency)),
        }
    }

    /// Reconfigures the duty cycle percentage.
    ///
    /// Valid whether the signal is active or not. While active, the new
    /// timings take effect at the next half-cycle boundary.
    ///
    /// Returns [`Error::InvalidDutyCycle`] and leaves the configuration
    /// unchanged if `duty_cycle` falls outside 0-100.
    ///
    /// [`Error::InvalidDutyCycle`]: enum.Error.html#variant.InvalidDutyCycle
    pub fn set_duty_cycle(&mut self, duty_cycle: f64) -> Result<()> {
        match cycle_durations(duty_cycle, self.frequency) {
            Some((on_time, off_time)) => {
                self.duty_cycle = duty_cycle;
                self.commit_timings(on_time, off_time);

                Ok(())
            }
            None => Err(Error::InvalidDutyCycle(duty_cycle)),
        }
    }

    fn commit_timings(&mut self, on_time: f64, off_time: f64) {
        self.on_time = on_time;
        self.off_time = off_time;

        self.shared.on_time_ns.store(
            Duration::from_secs_f64(on_time).as_nanos() as u64,
            Ordering::SeqCst,
        );
        self.shared.off_time_ns.store(
            Duration::from_secs_f64(off_time).as_nanos() as u64,
            Ordering::SeqCst,
        );
    }
}

impl Drop for SoftPwm {
    fn drop(&mut self) {
        // Don't wait for the PWM thread to exit if the main thread is
        // panicking, because we could potentially block indefinitely while
        // unwinding if the PWM thread doesn't observe the stop request.
        if !thread::panicking() {
            let _ = self.stop();
        }
    }
}

fn pulse(line: &mut dyn LineAccess, shared: &SharedTimings) -> gpio::Result<()> {
    while shared.cycling.load(Ordering::SeqCst) {
        // Re-read both durations every half-cycle, so reconfiguration lands
        // at the next boundary. A zero-length half-cycle skips its write to
        // avoid glitch pulses at 0% and 100% duty cycles.
        let on_time_ns = shared.on_time_ns.load(Ordering::SeqCst);
        if on_time_ns > 0 {
            line.write(Level::High)?;
            thread::sleep(Duration::from_nanos(on_time_ns));
        }

        let off_time_ns = shared.off_time_ns.load(Ordering::SeqCst);
        if off_time_ns > 0 {
            line.write(Level::Low)?;
            thread::sleep(Duration::from_nanos(off_time_ns));
        }
    }

    Ok(())
}

fn configure_pwm_thread() {
    // Set the scheduling policy to real-time round robin at the highest
    // priority. This will silently fail if we're not running as root.
    #[cfg(target_env = "gnu")]
    let params = sched_param {
        sched_priority: unsafe { libc::sched_get_priority_max(SCHED_RR) },
    };

    #[cfg(target_env = "musl")]
    let params = sched_param {
        sched_priority: unsafe { libc::sched_get_priority_max(SCHED_RR) },
        sched_ss_low_priority: 0,
        sched_ss_repl_period: timespec {
            tv_sec: 0,
            tv_nsec: 0,
        },
        sched_ss_init_budget: timespec {
            tv_sec: 0,
            tv_nsec: 0,
        },
        sched_ss_max_repl: 0,
    };

    unsafe {
        libc::sched_setscheduler(0, SCHED_RR, &params);
    }

    // Set timer slack to 1 ns (default = 50 µs). This is only relevant if
    // we're unable to set a real-time scheduling policy.
    unsafe {
        libc::prctl(PR_SET_TIMERSLACK, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    // Recording stand-in for a GPIO line. The SoftPwm moves the line into the
    // PWM thread, so tests keep a LineLog to inspect it from the outside.
    #[derive(Debug, Clone, Default)]
    struct LineLog {
        writes: Arc<Mutex<Vec<Level>>>,
        directions: Arc<Mutex<Vec<Direction>>>,
        closed: Arc<AtomicBool>,
    }

    impl LineLog {
        fn writes(&self) -> Vec<Level> {
            self.writes.lock().unwrap().clone()
        }

        fn directions(&self) -> Vec<Direction> {
            self.directions.lock().unwrap().clone()
        }

        fn closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[derive(Debug)]
    struct MockLine {
        log: LineLog,
    }

    impl LineAccess for MockLine {
        fn write(&mut self, level: Level) -> gpio::Result<()> {
            self.log.writes.lock().unwrap().push(level);

            Ok(())
        }

        fn set_direction(&mut self, direction: Direction) -> gpio::Result<()> {
            self.log.directions.lock().unwrap().push(direction);

            Ok(())
        }

        fn close(&mut self) -> gpio::Result<()> {
            self.log.closed.store(true, Ordering::SeqCst);

            Ok(())
        }
    }

    // Line whose writes fail, to exercise the loop's error path. Direction
    // changes and close still succeed and are recorded.
    #[derive(Debug)]
    struct BrokenLine {
        log: LineLog,
    }

    impl LineAccess for BrokenLine {
        fn write(&mut self, _level: Level) -> gpio::Result<()> {
            Err(gpio::Error::Closed)
        }

        fn set_direction(&mut self, direction: Direction) -> gpio::Result<()> {
            self.log.directions.lock().unwrap().push(direction);

            Ok(())
        }

        fn close(&mut self) -> gpio::Result<()> {
            self.log.closed.store(true, Ordering::SeqCst);

            Ok(())
        }
    }

    fn mock_pwm(frequency: u32) -> (SoftPwm, LineLog) {
        let log = LineLog::default();
        let line = MockLine { log: log.clone() };

        (SoftPwm::with_line(7, Box::new(line), frequency), log)
    }

    #[test]
    fn durations_sum_and_ratio() {
        for frequency in [1u32, 2, 5, 50, 1000, 20_000] {
            let cycle = 1.0 / f64::from(frequency);
            for duty_cycle in 0..=100 {
                let duty_cycle = f64::from(duty_cycle);
                let (on_time, off_time) = cycle_durations(duty_cycle, frequency).unwrap();

                assert!((on_time + off_time - cycle).abs() < 1e-9);
                assert!((on_time / (on_time + off_time) - duty_cycle / 100.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn durations_at_bounds() {
        assert_eq!(cycle_durations(0.0, 1000), Some((0.0, 0.001)));
        assert_eq!(cycle_durations(100.0, 1000), Some((0.001, 0.0)));
    }

    #[test]
    fn durations_reject_invalid_input() {
        assert_eq!(cycle_durations(-1.0, 1000), None);
        assert_eq!(cycle_durations(101.0, 1000), None);
        assert_eq!(cycle_durations(50.0, 0), None);
        assert_eq!(cycle_durations(f64::NAN, 1000), None);
    }

    #[test]
    fn invalid_frequency_falls_back_to_default() {
        let (pwm, _log) = mock_pwm(0);

        assert_eq!(pwm.frequency(), DEFAULT_FREQUENCY);
        assert_eq!(pwm.duty_cycle(), 100.0);
        assert_eq!(pwm.on_time(), 0.001);
        assert_eq!(pwm.off_time(), 0.0);
    }

    #[test]
    fn start_commits_duty_cycle() {
        let (mut pwm, _log) = mock_pwm(1000);

        pwm.start(50.0).unwrap();

        assert!(pwm.is_running());
        assert_eq!(pwm.duty_cycle(), 50.0);
        assert_eq!(pwm.on_time(), 0.0005);
        assert_eq!(pwm.off_time(), 0.0005);

        pwm.stop().unwrap();
    }

    #[test]
    fn start_while_running_is_a_noop() {
        let (mut pwm, _log) = mock_pwm(1000);

        pwm.start(50.0).unwrap();
        pwm.start(25.0).unwrap();

        // The second start must not have touched the configuration or
        // spawned another thread.
        assert_eq!(pwm.duty_cycle(), 50.0);
        assert_eq!(pwm.on_time(), 0.0005);

        pwm.stop().unwrap();
        assert!(!pwm.is_running());
    }

    #[test]
    fn start_rejects_invalid_duty_cycle() {
        let (mut pwm, log) = mock_pwm(1000);

        let result = pwm.start(150.0);

        assert!(matches!(result, Err(Error::InvalidDutyCycle(_))));
        assert!(!pwm.is_running());
        assert_eq!(pwm.duty_cycle(), 100.0);

        // The line stays with the channel, so a valid start still works.
        pwm.start(50.0).unwrap();
        pwm.stop().unwrap();
        assert!(log.closed());
    }

    #[test]
    fn stop_while_idle_is_a_noop() {
        let (mut pwm, log) = mock_pwm(1000);

        pwm.stop().unwrap();

        assert!(log.directions().is_empty());
        assert!(!log.closed());
    }

    #[test]
    fn setters_reject_invalid_input() {
        let (mut pwm, _log) = mock_pwm(1000);
        pwm.set_duty_cycle(50.0).unwrap();

        assert!(matches!(
            pwm.set_duty_cycle(150.0),
            Err(Error::InvalidDutyCycle(_))
        ));
        assert!(matches!(
            pwm.set_frequency(0),
            Err(Error::InvalidFrequency(0))
        ));

        assert_eq!(pwm.duty_cycle(), 50.0);
        assert_eq!(pwm.frequency(), 1000);
        assert_eq!(pwm.on_time(), 0.0005);
        assert_eq!(pwm.off_time(), 0.0005);
    }

    #[test]
    fn reconfigure_while_running() {
        let (mut pwm, _log) = mock_pwm(1000);

        pwm.start(50.0).unwrap();
        pwm.set_frequency(2).unwrap();
        pwm.set_duty_cycle(25.0).unwrap();

        assert_eq!(pwm.on_time(), 0.125);
        assert_eq!(pwm.off_time(), 0.375);

        pwm.stop().unwrap();
    }

    #[test]
    fn stop_joins_within_one_cycle_and_releases_line() {
        let (mut pwm, log) = mock_pwm(1);

        pwm.start(50.0).unwrap();
        // Give the PWM thread time to start its first half-cycle.
        thread::sleep(Duration::from_millis(50));

        let stop_requested = Instant::now();
        pwm.stop().unwrap();

        // At 1 Hz the thread observes the stop request after at most one
        // full cycle. Allow some slack for scheduling.
        assert!(stop_requested.elapsed() < Duration::from_millis(1500));

        let writes = log.writes();
        assert_eq!(writes.first(), Some(&Level::High));
        assert_eq!(log.directions(), vec![Direction::In]);
        assert!(log.closed());
    }

    #[test]
    fn write_error_ends_loop_and_surfaces_at_stop() {
        let log = LineLog::default();
        let line = BrokenLine { log: log.clone() };
        let mut pwm = SoftPwm::with_line(7, Box::new(line), 1000);

        pwm.start(50.0).unwrap();
        // Give the PWM thread time to attempt its first write and exit.
        thread::sleep(Duration::from_millis(50));

        let result = pwm.stop();

        assert!(matches!(result, Err(Error::Gpio(gpio::Error::Closed))));
        assert!(!pwm.is_running());

        // The line is still reconfigured and released before the loop's
        // write error is reported.
        assert_eq!(log.directions(), vec![Direction::In]);
        assert!(log.closed());
    }

    #[test]
    fn zero_duty_cycle_never_drives_the_line_high() {
        let (mut pwm, log) = mock_pwm(1000);

        pwm.start(0.0).unwrap();
        thread::sleep(Duration::from_millis(50));
        pwm.stop().unwrap();

        let writes = log.writes();
        assert!(!writes.is_empty());
        assert!(writes.iter().all(|level| *level == Level::Low));
    }

    #[test]
    fn full_duty_cycle_never_drives_the_line_low() {
        let (mut pwm, log) = mock_pwm(1000);

        pwm.start(100.0).unwrap();
        thread::sleep(Duration::from_millis(50));
        pwm.stop().unwrap();

        let writes = log.writes();
        assert!(!writes.is_empty());
        assert!(writes.iter().all(|level| *level == Level::High));
    }

    #[test]
    fn start_after_stop_reports_closed_line() {
        let (mut pwm, _log) = mock_pwm(1000);

        pwm.start(50.0).unwrap();
        pwm.stop().unwrap();

        assert!(matches!(
            pwm.start(50.0),
            Err(Error::Gpio(gpio::Error::Closed))
        ));
    }

    #[test]
    fn drop_stops_thread_and_releases_line() {
        let log = {
            let (mut pwm, log) = mock_pwm(1000);
            pwm.start(50.0).unwrap();

            log
        };

        assert_eq!(log.directions(), vec![Direction::In]);
        assert!(log.closed());
    }
}
