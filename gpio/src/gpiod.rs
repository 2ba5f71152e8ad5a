//! GpiodDriver implementation for Linux GPIO character devices (`/dev/gpiochipN`).
//!
//! The kernel fixes a line's direction when it's requested, so every direction change releases
//! the current request and asks for a new one. That costs a couple of syscalls, which is fine for
//! a display bus that only turns around once per busy-flag poll.
use crate::{
    GpioBias, GpioDirection, GpioDriver, GpioError, GpioPin, GpioResult,
};
use bitvec::vec::BitVec;
use log::debug;
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::atomic::AtomicU8;

/// GpiodDriver hands out lines of a single GPIO chip, making sure each is claimed only once.
pub struct GpiodDriver {
    chip: gpiod::Chip,
    used_pins: BitVec<AtomicU8>,
}

impl GpiodDriver {
    pub fn new(chip: gpiod::Chip) -> Self {
        let n = chip.num_lines() as usize;
        Self {
            chip,
            used_pins: BitVec::repeat(false, n),
        }
    }

    /// Opens the chip at `path`, e.g. `/dev/gpiochip0`.
    pub fn open(path: impl AsRef<Path>) -> GpioResult<Self> {
        let chip = gpiod::Chip::new(path.as_ref())?;
        Ok(Self::new(chip))
    }
}

impl Debug for GpiodDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpiodDriver({})", self.chip.name())
    }
}

impl GpioDriver for GpiodDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(self.chip.num_lines() as usize)
    }

    fn get_pin(&self, index: usize) -> GpioResult<Box<dyn GpioPin + '_>> {
        if index >= self.count()? {
            return Err(GpioError::InvalidArgument);
        }

        if self.used_pins[index] {
            return Err(GpioError::AlreadyInUse);
        }

        self.used_pins.set_aliased(index, true);
        debug!("{:?} claimed line {}", self, index);

        Ok(Box::new(GpiodPin {
            driver: self,
            pin_index: index,
            bias: GpioBias::None,
            request: LineRequest::Released,
            output_level: false,
        }))
    }
}

impl From<GpioBias> for gpiod::Bias {
    fn from(bias: GpioBias) -> Self {
        match bias {
            GpioBias::None => gpiod::Bias::Disable,
            GpioBias::PullUp => gpiod::Bias::PullUp,
            GpioBias::PullDown => gpiod::Bias::PullDown,
        }
    }
}

enum LineRequest {
    Released,
    Input(gpiod::Lines<gpiod::Input>),
    Output(gpiod::Lines<gpiod::Output>),
}

struct GpiodPin<'a> {
    driver: &'a GpiodDriver,
    pin_index: usize,
    bias: GpioBias,
    request: LineRequest,
    // gpiod can't read back an output request, so the last written level is cached.
    output_level: bool,
}

impl Debug for GpiodPin<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}][{:?}]", self.driver, self.pin_index, self.direction())
    }
}

impl GpioPin for GpiodPin<'_> {
    fn configure_as_output(&mut self) -> GpioResult<()> {
        if matches!(self.request, LineRequest::Output(_)) {
            return Ok(());
        }
        // The old request has to be released before the line can be requested again.
        self.request = LineRequest::Released;
        let line = self.driver.chip.request_lines(
            gpiod::Options::output([self.pin_index as u32])
                .consumer(env!("CARGO_PKG_NAME"))
                .bias(self.bias.into()),
        )?;
        self.request = LineRequest::Output(line);
        self.output_level = false;
        Ok(())
    }

    fn configure_as_input(&mut self) -> GpioResult<()> {
        if matches!(self.request, LineRequest::Input(_)) {
            return Ok(());
        }
        self.request = LineRequest::Released;
        let line = self.driver.chip.request_lines(
            gpiod::Options::input([self.pin_index as u32])
                .consumer(env!("CARGO_PKG_NAME"))
                .bias(self.bias.into()),
        )?;
        self.request = LineRequest::Input(line);
        Ok(())
    }

    fn direction(&self) -> GpioDirection {
        match self.request {
            LineRequest::Released => GpioDirection::Unconfigured,
            LineRequest::Input(_) => GpioDirection::Input,
            LineRequest::Output(_) => GpioDirection::Output,
        }
    }

    fn write(&mut self, value: bool) -> GpioResult<()> {
        match &self.request {
            LineRequest::Output(line) => {
                line.set_values([value])?;
                self.output_level = value;
                Ok(())
            }
            _ => Err(GpioError::NotConfigured),
        }
    }

    fn read(&self) -> GpioResult<bool> {
        match &self.request {
            LineRequest::Input(line) => {
                let values = line.get_values([false])?;
                Ok(values[0])
            }
            LineRequest::Output(_) => Ok(self.output_level),
            LineRequest::Released => Err(GpioError::NotConfigured),
        }
    }

    fn supports_bias(&self) -> bool {
        true
    }

    fn bias(&self) -> GpioBias {
        self.bias
    }

    fn set_bias(&mut self, bias: GpioBias) -> GpioResult<()> {
        self.bias = bias;
        Ok(())
    }
}

impl Drop for GpiodPin<'_> {
    fn drop(&mut self) {
        self.driver.used_pins.set_aliased(self.pin_index, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_a_missing_chip_is_an_io_error() {
        let result = GpiodDriver::open(Path::new("/dev/charlcd-no-such-gpiochip"));
        assert!(matches!(result, Err(GpioError::Io(_))));
    }

    #[test]
    fn bias_maps_onto_gpiod() {
        assert!(matches!(gpiod::Bias::from(GpioBias::PullUp), gpiod::Bias::PullUp));
        assert!(matches!(gpiod::Bias::from(GpioBias::None), gpiod::Bias::Disable));
    }
}
