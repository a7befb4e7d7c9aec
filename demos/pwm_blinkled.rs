// pwm_blinkled.rs - Fades an LED in and out using software PWM.
//
// Remember to add a resistor of an appropriate value in series, to prevent
// exceeding the maximum current rating of the GPIO pin and the LED.
//
// Interrupting the process by pressing Ctrl-C causes the application to exit
// immediately without stopping the PWM thread or releasing the GPIO line.
// Check out the pwm_blinkled_signals.rs example to learn how to properly
// handle incoming signals to prevent an abnormal termination.

use std::error::Error;
use std::thread;
use std::time::Duration;

use odyssey_gpio::pwm::SoftPwm;

// Physical pin 7 on the 40-pin header (/dev/gpiochip2, line 5).
const PIN_LED: u8 = 7;

fn main() -> Result<(), Box<dyn Error>> {
    // Emulate a 100 Hz PWM signal on the LED's pin.
    let mut pwm = SoftPwm::new(PIN_LED, 100)?;

    // Fade the LED in and out by sweeping the duty cycle. Changes take
    // effect at the next half-cycle boundary.
    pwm.start(0.0)?;
    for duty_cycle in (0..=100).chain((0..100).rev()) {
        pwm.set_duty_cycle(f64::from(duty_cycle))?;
        thread::sleep(Duration::from_millis(20));
    }

    // stop() waits for the PWM thread to finish its current cycle, then
    // reconfigures the pin as an input and releases it.
    pwm.stop()?;

    Ok(())
}
