use embedded_hal::pwm::{self, ErrorKind, ErrorType, SetDutyCycle};

use super::{Error, SoftPwm};

impl pwm::Error for Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl ErrorType for SoftPwm {
    type Error = Error;
}

impl SetDutyCycle for SoftPwm {
    fn max_duty_cycle(&self) -> u16 {
        100
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        SoftPwm::set_duty_cycle(self, f64::from(duty))
    }
}
