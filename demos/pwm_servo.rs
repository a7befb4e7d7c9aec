// pwm_servo.rs - Rotates a servo using software PWM.
//
// Servos are usually driven by a 50 Hz signal, with the pulse width
// determining the rotation angle: 1 ms (5% duty cycle) for the minimum
// position, 1.5 ms (7.5%) for the neutral position and 2 ms (10%) for the
// maximum position. Calibrate your servo and change the values below to
// prevent exceeding the minimum and maximum angle.
//
// Software PWM timing jitter may cause the servo to tremble slightly. If an
// accurate signal is required, use a hardware PWM controller instead.

use std::error::Error;
use std::thread;
use std::time::Duration;

use odyssey_gpio::pwm::SoftPwm;

// Physical pin 12 on the 40-pin header (/dev/gpiochip2, line 6).
const PIN_SERVO: u8 = 12;

// Duty cycle percentages at 50 Hz for the servo's minimum, neutral and
// maximum position.
const DUTY_CYCLE_MIN: f64 = 5.0;
const DUTY_CYCLE_NEUTRAL: f64 = 7.5;
const DUTY_CYCLE_MAX: f64 = 10.0;

fn main() -> Result<(), Box<dyn Error>> {
    let mut pwm = SoftPwm::new(PIN_SERVO, 50)?;

    // Rotate the servo to its neutral position and wait for it to get there.
    pwm.start(DUTY_CYCLE_NEUTRAL)?;
    thread::sleep(Duration::from_millis(500));

    // Sweep back and forth between the minimum and maximum position in
    // steps of 0.1%.
    let steps = ((DUTY_CYCLE_MAX - DUTY_CYCLE_MIN) * 10.0) as i32;
    for step in (0..=steps).chain((0..steps).rev()) {
        pwm.set_duty_cycle(DUTY_CYCLE_MIN + f64::from(step) / 10.0)?;
        thread::sleep(Duration::from_millis(20));
    }

    pwm.stop()?;

    Ok(())
}
