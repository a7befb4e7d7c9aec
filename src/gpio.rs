//! Interface for the GPIO lines on the 40-pin header.
//!
//! The ODYSSEY-X86J4105 exposes its header pins through three `gpiochip`
//! character devices (`/dev/gpiochip0`-`/dev/gpiochip2`). [`Line`] requests a
//! single line from the appropriate chip based on the pin's physical position
//! on the header, using the mapping provided by [`pin_info`]. 28 of the 40
//! header positions are GPIO-capable; the rest carry power, ground or other
//! fixed functions, and looking them up returns `None`.
//!
//! ## Permissions
//!
//! In most distributions, `/dev/gpiochipN` is owned by `root:gpio`. If
//! [`Line::open`] returns a [`Cdev`] error caused by insufficient permissions,
//! make sure the current user is a member of the `gpio` group, or configure a
//! `udev` rule that grants access to the character devices. Alternatively,
//! although not recommended, you can run your application with superuser
//! privileges by using `sudo`.
//!
//! [`Cdev`]: enum.Error.html#variant.Cdev
//! [`Line`]: struct.Line.html
//! [`Line::open`]: struct.Line.html#method.open
//! [`pin_info`]: fn.pin_info.html

use std::error;
use std::fmt;
use std::ops::Not;
use std::result;

use gpiocdev::line::Value;
use gpiocdev::Request;

const CONSUMER: &str = "odyssey-gpio";

/// Errors that can occur when accessing a GPIO line.
#[derive(Debug)]
pub enum Error {
    /// Pin is not available.
    ///
    /// The 40-pin header doesn't expose a GPIO line at the specified physical
    /// pin position. Pins are addressed by their physical location on the
    /// header, rather than their BIOS pin number or chip line offset.
    PinNotAvailable(u8),
    /// Line has been closed.
    ///
    /// The line was released by an earlier [`close`] call and can't be used
    /// until it's reopened through [`Line::open`].
    ///
    /// [`close`]: struct.Line.html#method.close
    /// [`Line::open`]: struct.Line.html#method.open
    Closed,
    /// `gpiochip` character device error.
    Cdev(gpiocdev::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::PinNotAvailable(pin) => write!(f, "Pin {} is not available", pin),
            Error::Closed => write!(f, "Line is closed"),
            Error::Cdev(ref err) => write!(f, "Character device error: {}", err),
        }
    }
}

impl error::Error for Error {}

impl From<gpiocdev::Error> for Error {
    fn from(err: gpiocdev::Error) -> Error {
        Error::Cdev(err)
    }
}

/// Result type returned from methods that can have `odyssey_gpio::gpio::Error`s.
pub type Result<T> = result::Result<T, Error>;

/// Line logic levels.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum Level {
    Low = 0,
    High = 1,
}

impl From<bool> for Level {
    fn from(e: bool) -> Level {
        if e {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<Level> for bool {
    fn from(level: Level) -> bool {
        level == Level::High
    }
}

impl From<Level> for Value {
    fn from(level: Level) -> Value {
        match level {
            Level::Low => Value::Inactive,
            Level::High => Value::Active,
        }
    }
}

impl From<Value> for Level {
    fn from(value: Value) -> Level {
        match value {
            Value::Inactive => Level::Low,
            Value::Active => Level::High,
        }
    }
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Level::Low => write!(f, "Low"),
            Level::High => write!(f, "High"),
        }
    }
}

/// Line directions.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Direction {
    In,
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Direction::In => write!(f, "In"),
            Direction::Out => write!(f, "Out"),
        }
    }
}

/// Hardware identity of a GPIO-capable header pin.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct PinInfo {
    /// BIOS pin number.
    pub bios: u16,
    /// Path to the `gpiochip` character device that owns the line.
    pub chip: &'static str,
    /// Line offset on the chip.
    pub line: u32,
}

const fn pin(bios: u16, chip: &'static str, line: u32) -> PinInfo {
    PinInfo { bios, chip, line }
}

// Physical header position to (BIOS pin number, gpiochip, line offset).
const HEADER_PINS: [(u8, PinInfo); 28] = [
    (3, pin(110, "/dev/gpiochip1", 34)),
    (5, pin(111, "/dev/gpiochip1", 35)),
    (7, pin(161, "/dev/gpiochip2", 5)),
    (8, pin(61, "/dev/gpiochip0", 61)),
    (10, pin(60, "/dev/gpiochip0", 60)),
    (11, pin(88, "/dev/gpiochip1", 12)),
    (12, pin(162, "/dev/gpiochip2", 6)),
    (13, pin(136, "/dev/gpiochip1", 60)),
    (15, pin(137, "/dev/gpiochip1", 61)),
    (16, pin(145, "/dev/gpiochip1", 69)),
    (18, pin(146, "/dev/gpiochip1", 70)),
    (19, pin(83, "/dev/gpiochip1", 7)),
    (21, pin(82, "/dev/gpiochip1", 6)),
    (22, pin(114, "/dev/gpiochip1", 38)),
    (23, pin(79, "/dev/gpiochip1", 3)),
    (24, pin(80, "/dev/gpiochip1", 4)),
    (26, pin(81, "/dev/gpiochip1", 5)),
    (27, pin(112, "/dev/gpiochip1", 36)),
    (28, pin(113, "/dev/gpiochip1", 37)),
    (29, pin(139, "/dev/gpiochip1", 63)),
    (31, pin(140, "/dev/gpiochip1", 64)),
    (32, pin(115, "/dev/gpiochip1", 39)),
    (33, pin(141, "/dev/gpiochip1", 65)),
    (35, pin(163, "/dev/gpiochip2", 7)),
    (36, pin(134, "/dev/gpiochip1", 58)),
    (37, pin(143, "/dev/gpiochip1", 67)),
    (38, pin(164, "/dev/gpiochip2", 8)),
    (40, pin(165, "/dev/gpiochip2", 9)),
];

/// Returns the hardware identity of the GPIO line at the specified physical
/// pin position on the 40-pin header, or `None` if the position doesn't
/// expose a GPIO line.
pub fn pin_info(pin: u8) -> Option<PinInfo> {
    HEADER_PINS
        .iter()
        .find(|(position, _)| *position == pin)
        .map(|(_, info)| *info)
}

/// Narrow interface to a single GPIO line, so the PWM thread can drive either
/// a live line or an in-memory stand-in during testing.
pub(crate) trait LineAccess: fmt::Debug + Send {
    fn write(&mut self, level: Level) -> Result<()>;
    fn set_direction(&mut self, direction: Direction) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Provides exclusive access to a single GPIO line on the 40-pin header.
///
/// The underlying `gpiochip` line request is held for the lifetime of the
/// `Line`, or until [`close`] releases it. The kernel refuses concurrent
/// requests for the same line, so two `Line` instances can't drive the same
/// pin at the same time.
///
/// [`close`]: #method.close
#[derive(Debug)]
pub struct Line {
    pin: u8,
    offset: u32,
    req: Option<Request>,
}

impl Line {
    /// Opens the GPIO line at the specified physical pin position and
    /// configures it for `direction`.
    ///
    /// Lines opened for [`Out`] are driven [`Low`] as part of the request.
    ///
    /// Returns [`Error::PinNotAvailable`] if the pin position doesn't expose a
    /// GPIO line, or [`Error::Cdev`] if the line request fails.
    ///
    /// [`Out`]: enum.Direction.html#variant.Out
    /// [`Low`]: enum.Level.html#variant.Low
    /// [`Error::PinNotAvailable`]: enum.Error.html#variant.PinNotAvailable
    /// [`Error::Cdev`]: enum.Error.html#variant.Cdev
    pub fn open(pin: u8, direction: Direction) -> Result<Line> {
        let info = pin_info(pin).ok_or(Error::PinNotAvailable(pin))?;

        let mut builder = Request::builder();
        builder
            .on_chip(info.chip)
            .with_consumer(CONSUMER)
            .with_line(info.line);

        match direction {
            Direction::In => builder.as_input(),
            Direction::Out => builder.as_output(Value::Inactive),
        };

        Ok(Line {
            pin,
            offset: info.line,
            req: Some(builder.request()?),
        })
    }

    /// Returns the physical pin position this line was opened with.
    pub fn pin(&self) -> u8 {
        self.pin
    }

    fn request(&self) -> Result<&Request> {
        self.req.as_ref().ok_or(Error::Closed)
    }

    /// Sets the line's logic level.
    pub fn write(&mut self, level: Level) -> Result<()> {
        self.request()?.set_value(self.offset, level.into())?;

        Ok(())
    }

    /// Reads the line's logic level.
    pub fn read(&mut self) -> Result<Level> {
        Ok(self.request()?.value(self.offset)?.into())
    }

    /// Reconfigures the line's direction.
    ///
    /// Switching to [`Out`] drives the line [`Low`].
    ///
    /// [`Out`]: enum.Direction.html#variant.Out
    /// [`Low`]: enum.Level.html#variant.Low
    pub fn set_direction(&mut self, direction: Direction) -> Result<()> {
        let req = self.request()?;

        let mut config = req.config();
        match direction {
            Direction::In => config.with_line(self.offset).as_input(),
            Direction::Out => config.with_line(self.offset).as_output(Value::Inactive),
        };

        req.reconfigure(&config)?;

        Ok(())
    }

    /// Releases the line request.
    ///
    /// Any further calls on this `Line` return [`Error::Closed`]. Dropping a
    /// `Line` releases the request as well, so calling `close` is only needed
    /// when the release has to happen at a specific point.
    ///
    /// [`Error::Closed`]: enum.Error.html#variant.Closed
    pub fn close(&mut self) -> Result<()> {
        self.req.take().ok_or(Error::Closed)?;

        Ok(())
    }
}

impl LineAccess for Line {
    fn write(&mut self, level: Level) -> Result<()> {
        Line::write(self, level)
    }

    fn set_direction(&mut self, direction: Direction) -> Result<()> {
        Line::set_direction(self, direction)
    }

    fn close(&mut self) -> Result<()> {
        Line::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_pin_lookup() {
        assert_eq!(
            pin_info(3),
            Some(PinInfo {
                bios: 110,
                chip: "/dev/gpiochip1",
                line: 34
            })
        );
        assert_eq!(
            pin_info(40),
            Some(PinInfo {
                bios: 165,
                chip: "/dev/gpiochip2",
                line: 9
            })
        );
    }

    #[test]
    fn header_pin_unmapped() {
        // Power, ground and other fixed-function positions
        for pin in [1, 2, 4, 6, 9, 14, 17, 20, 25, 30, 34, 39] {
            assert_eq!(pin_info(pin), None, "pin {} should be unmapped", pin);
        }

        assert_eq!(pin_info(0), None);
        assert_eq!(pin_info(41), None);
    }

    #[test]
    fn header_pin_count() {
        let mapped = (1..=40).filter(|pin| pin_info(*pin).is_some()).count();

        assert_eq!(mapped, 28);
    }

    #[test]
    fn level_conversions() {
        assert_eq!(Level::from(true), Level::High);
        assert_eq!(Level::from(false), Level::Low);
        assert_eq!(!Level::High, Level::Low);
        assert_eq!(Level::from(Value::Active), Level::High);
        assert_eq!(Value::from(Level::Low), Value::Inactive);
        assert_eq!(format!("{}", Level::High), "High");
        assert_eq!(format!("{}", Direction::In), "In");
    }
}
