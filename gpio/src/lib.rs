//! GPIO capabilities and an HD44780 character LCD driver built on top of them.
//!
//! The driver in [lcd::hd44780] never touches hardware registers. It only talks to pins handed
//! out by a [GpioDriver] and waits using a [delay::Delay]. Two backends are included: [gpiod] for
//! Linux GPIO character devices, and [sim] which emulates the display controller itself.
pub mod delay;
pub mod gpiod;
pub mod lcd;
pub mod sim;

use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum GpioError {
    #[error("pin already in use")]
    AlreadyInUse,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("the feature is not supported on this backend")]
    NotSupported,
    #[error("pin is not configured for this direction")]
    NotConfigured,
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
    #[error("error: {0}")]
    Other(String),
}

impl From<std::io::Error> for GpioError {
    fn from(err: std::io::Error) -> Self {
        GpioError::Io(err.kind())
    }
}

pub type GpioResult<T> = Result<T, GpioError>;

pub trait GpioDriver: Debug {
    /// Gets the amount of GPIO pins available.
    fn count(&self) -> GpioResult<usize>;

    /// Claims the GPIO pin at the given index.
    ///
    /// The pin stays claimed until the returned handle is dropped. Claiming it again in the
    /// meantime fails with [GpioError::AlreadyInUse].
    fn get_pin(&self, index: usize) -> GpioResult<Box<dyn GpioPin + '_>>;
}

/// Specifies the bias of the GPIO pin.
///
/// You can use this to enable pull-up or pull-down resistors. The HD44780 data lines float while
/// neither side drives them, so a pull-up keeps them at a defined level.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioBias {
    #[default] None,
    PullUp,
    PullDown,
}

/// Direction a pin is currently configured for.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioDirection {
    /// Not requested yet, neither readable nor writable.
    #[default] Unconfigured,
    Input,
    Output,
}

/// A single claimed GPIO line whose direction can be changed at any time.
///
/// This is the whole capability the LCD driver needs from a platform: switch the direction,
/// drive a level, sample a level.
pub trait GpioPin: Debug {
    /// Sets the GPIO pin function to output, allowing writing its state.
    fn configure_as_output(&mut self) -> GpioResult<()>;
    /// Sets the GPIO pin function to input, allowing reading its state.
    fn configure_as_input(&mut self) -> GpioResult<()>;
    /// Gets the direction the pin was last configured for.
    fn direction(&self) -> GpioDirection;

    /// Drives the pin. Fails with [GpioError::NotConfigured] unless the pin is an output.
    fn write(&mut self, value: bool) -> GpioResult<()>;
    /// Samples the pin level. For outputs this is the level being driven.
    fn read(&self) -> GpioResult<bool>;

    fn set_high(&mut self) -> GpioResult<()> {
        self.write(true)
    }
    fn set_low(&mut self) -> GpioResult<()> {
        self.write(false)
    }

    /// Gets whether the GPIO pin supports bias (pull-up/pull-down resistors).
    fn supports_bias(&self) -> bool {
        false
    }
    /// Gets the bias of the GPIO pin.
    fn bias(&self) -> GpioBias {
        GpioBias::None
    }
    /// Sets the bias of the GPIO pin. Takes effect on the next direction change.
    ///
    /// # Errors
    /// - `GpioError::NotSupported` if the pin does not support bias.
    fn set_bias(&mut self, _bias: GpioBias) -> GpioResult<()> {
        Err(GpioError::NotSupported)
    }
}

/// Packs pin levels into a nibble, LSb first (`levels[0]` is bit 0).
pub fn levels_to_nibble(levels: [bool; 4]) -> u8 {
    levels
        .iter()
        .enumerate()
        .fold(0u8, |acc, (i, &level)| if level { acc | (1 << i) } else { acc })
}

/// Unpacks the low nibble of `value` into pin levels, LSb first.
pub fn nibble_to_levels(value: u8) -> [bool; 4] {
    let mut levels = [false; 4];
    for (i, level) in levels.iter_mut().enumerate() {
        *level = value & (1 << i) != 0;
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nibble_levels_are_lsb_first() {
        assert_eq!(nibble_to_levels(0b0001), [true, false, false, false]);
        assert_eq!(nibble_to_levels(0b1000), [false, false, false, true]);
        assert_eq!(nibble_to_levels(0xF3), [true, true, false, false]);
        assert_eq!(levels_to_nibble([false, true, false, true]), 0b1010);
    }

    #[test]
    fn io_errors_keep_their_kind() {
        let err: GpioError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert_eq!(err, GpioError::Io(std::io::ErrorKind::PermissionDenied));
    }
}
