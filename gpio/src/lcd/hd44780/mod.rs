//! HD44780 character LCD module, 16x2 over a 4-bit GPIO bus.
//!
//! The [driver] module holds the bus protocol: the [HD44780Driver](driver::HD44780Driver) trait
//! with the instruction set, and [GpioHD44780Driver](driver::GpioHD44780Driver) which moves bytes
//! over the pins as nibble pairs and gates every write on the busy flag. [CharacterLcd] sits on
//! top and provides text and cursor handling.
//!
//! # Addressing
//!
//! In two-line mode the controller's DDRAM holds 40 cells per line. Line 1 starts at address
//! [LCD_START_LINE1] and line 2 at [LCD_START_LINE2]. Only the first [LCD_DISP_LENGTH] cells of
//! each line are visible. The address counter moves on by itself after each data write, so the
//! cursor position is always read back from the controller instead of being tracked here.
pub mod driver;
mod display;

use crate::GpioError;
pub use display::*;
use thiserror::Error;

/// Visible characters per line.
pub const LCD_DISP_LENGTH: u8 = 16;
/// Number of display lines.
pub const LCD_LINES: u8 = 2;
/// DDRAM cells per line in two-line mode, visible or not.
pub const LCD_LINE_CAPACITY: u8 = 40;
/// DDRAM address of the first character of line 1.
pub const LCD_START_LINE1: u8 = 0x00;
/// DDRAM address of the first character of line 2.
pub const LCD_START_LINE2: u8 = 0x40;
/// Whether printing past the last visible column continues on the other line by default.
pub const LCD_WRAP_LINES: bool = cfg!(feature = "wrap-lines");

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum LcdError {
    #[error("GPIO error: {0}")]
    Gpio(#[from] GpioError),
    /// The busy flag was still set after the configured number of polls.
    #[error("display still busy after {polls} busy flag polls")]
    NotReady { polls: u32 },
    /// Only reported when address validation is turned on, see [LcdOptions].
    #[error("cursor position out of range: column {column}, row {row}")]
    InvalidAddress { column: u8, row: u8 },
    /// A DDRAM address past the controller's seven address bits.
    #[error("DDRAM address {address:#04x} out of range")]
    AddressOutOfRange { address: u8 },
}

pub type LcdResult<T> = Result<T, LcdError>;
