// pwm_blinkled_signals.rs - Blinks an LED using software PWM, while handling
// any incoming SIGINT (Ctrl-C) and SIGTERM signals so the PWM thread can be
// stopped and the GPIO line released before the application exits.
//
// Remember to add a resistor of an appropriate value in series, to prevent
// exceeding the maximum current rating of the GPIO pin and the LED.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// The simple-signal crate is used to handle incoming signals.
use simple_signal::{self, Signal};

use odyssey_gpio::pwm::SoftPwm;

// Physical pin 7 on the 40-pin header (/dev/gpiochip2, line 5).
const PIN_LED: u8 = 7;

fn main() -> Result<(), Box<dyn Error>> {
    // Blink the LED by emulating a 2 Hz PWM signal with a 25% duty cycle.
    let mut pwm = SoftPwm::new(PIN_LED, 2)?;
    pwm.start(25.0)?;

    let running = Arc::new(AtomicBool::new(true));

    // When a SIGINT (Ctrl-C) or SIGTERM signal is caught, atomically set
    // running to false.
    simple_signal::set_handler(&[Signal::Int, Signal::Term], {
        let running = running.clone();
        move |_| {
            running.store(false, Ordering::SeqCst);
        }
    });

    // Keep blinking the LED until running is set to false.
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    // Stop the PWM thread and release the GPIO line before exiting.
    pwm.stop()?;

    Ok(())
}
