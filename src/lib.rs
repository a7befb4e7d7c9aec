//! odyssey-gpio provides software-based PWM and digital output control for the
//! GPIO pins on the Seeed Studio ODYSSEY-X86J4105's 40-pin header. The header's
//! pins only support plain digital I/O, exposed through several Linux `gpiochip`
//! character devices. A PWM signal is emulated by toggling a pin's output state
//! on a separate thread.
//!
//! Pins are addressed by their physical position on the 40-pin header, not by
//! their BIOS pin number or chip line offset. The mapping between the three is
//! handled internally by the [`gpio`] module.
//!
//! ## Examples
//!
//! Fade an LED connected to physical pin 7 by sweeping the duty cycle:
//!
//! ```no_run
//! use std::thread;
//! use std::time::Duration;
//!
//! use odyssey_gpio::pwm::SoftPwm;
//!
//! # fn main() -> odyssey_gpio::pwm::Result<()> {
//! let mut pwm = SoftPwm::new(7, 100)?;
//!
//! pwm.start(0.0)?;
//! for duty_cycle in 0..=100 {
//!     pwm.set_duty_cycle(f64::from(duty_cycle))?;
//!     thread::sleep(Duration::from_millis(20));
//! }
//!
//! // Joins the PWM thread and releases the GPIO line.
//! pwm.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! Additional examples can be found in the `demos` directory.
//!
//! ## Optional features
//!
//! By default, all optional features are disabled. You can enable a feature by
//! specifying it in your `Cargo.toml`.
//!
//! * `embedded-hal`: Enables the `embedded-hal` v1.0 [`SetDutyCycle`] trait
//!   implementation for [`SoftPwm`].
//!
//! [`SetDutyCycle`]: https://docs.rs/embedded-hal/1/embedded_hal/pwm/trait.SetDutyCycle.html
//! [`SoftPwm`]: pwm/struct.SoftPwm.html
//! [`gpio`]: gpio/index.html

// Used by rustdoc to link other crates to odyssey-gpio's docs
#![doc(html_root_url = "https://docs.rs/odyssey-gpio/0.1.0")]

pub mod gpio;
pub mod pwm;
