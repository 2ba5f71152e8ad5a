//! HD44780 bus protocol.
//!
//! See [HD44780Driver] for the instruction set, and [GpioHD44780Driver] for the implementation
//! over GPIO pins.

mod gpio;

use crate::lcd::hd44780::{LcdError, LcdResult};
pub use gpio::*;
use std::fmt::Debug;

/// Bit 7 of the busy flag/address byte.
pub const BUSY_FLAG: u8 = 0b10000000;
/// The address counter part of the busy flag/address byte.
pub const ADDRESS_MASK: u8 = 0b01111111;

/// The low-level interface of an HD44780 controller.
///
/// # Busy flag
///
/// After taking an instruction or a data byte the controller ignores the bus until it's done
/// executing it. Implementations therefore provide [HD44780Driver::wait_ready], which polls the
/// busy flag and returns the address counter once the controller is idle.
/// [HD44780Driver::send_command] and [HD44780Driver::send_data] always wait first; the
/// `*_unchecked` variants are for callers that have just waited themselves.
///
/// # Commands
///
/// Each command is a byte. The high-level methods below build the byte and send it with
/// [HD44780Driver::send_command].
pub trait HD44780Driver: Debug {
    /// Configures the bus and brings the controller into 4-bit mode, whatever state it was in.
    /// The function set and everything after it is left to the caller.
    fn init(&mut self) -> LcdResult<()>;

    /// Clears the display and sets the cursor to the home position.
    ///
    /// Command: `00000001`.
    fn clear_display(&mut self) -> LcdResult<()> {
        self.send_command(0b00000001)
    }

    /// Sets the cursor to the home position, undoing any display shift.
    ///
    /// Command: `0000001?`.
    fn return_home(&mut self) -> LcdResult<()> {
        self.send_command(0b00000010)
    }

    /// Sets the entry mode, which controls how the cursor moves after each data write and whether
    /// the display is shifted along.
    ///
    /// Command: `000001IS`.
    /// `I` is `1` for right cursor direction (increment), `0` for left (decrement).
    /// `S` is `1` for display shift, `0` for no display shift.
    fn set_entry_mode(&mut self, cursor_direction: CursorDirection, shift: bool) -> LcdResult<()> {
        let mut command = 0b00000100;
        if cursor_direction == CursorDirection::Right {
            command |= 0b00000010;
        }
        if shift {
            command |= 0b00000001;
        }
        self.send_command(command)
    }

    /// Turns the display on or off, and controls the cursor and its blinking.
    ///
    /// Command: `00001DCB`.
    fn set_display_control(&mut self, attributes: DisplayAttributes) -> LcdResult<()> {
        self.send_command(attributes.bits())
    }

    /// Moves the cursor or shifts the display by one position.
    ///
    /// Command: `0001DR??`.
    /// `D` is `1` for display shift, `0` for cursor move.
    /// `R` is `1` for right, `0` for left.
    fn cursor_shift(&mut self, display_shift: bool, direction: CursorDirection) -> LcdResult<()> {
        let mut command = 0b00010000;
        if display_shift {
            command |= 0b00001000;
        }
        if direction == CursorDirection::Right {
            command |= 0b00000100;
        }
        self.send_command(command)
    }

    /// Sets the interface width, the number of lines and the font.
    ///
    /// Command: `001DNF??`.
    /// `D` is `1` for an 8-bit bus, `0` for 4-bit.
    /// `N` is `1` for two lines, `0` for one.
    /// `F` is `1` for the 5x10 font, `0` for 5x8.
    fn function_set(&mut self, data_length: bool, two_lines: bool, font: bool) -> LcdResult<()> {
        let mut command = 0b00100000;
        if data_length {
            command |= 0b00010000;
        }
        if two_lines {
            command |= 0b00001000;
        }
        if font {
            command |= 0b00000100;
        }
        self.send_command(command)
    }

    /// Sets the DDRAM address, i.e. moves the cursor.
    ///
    /// Command: `1AAAAAAA`.
    fn set_ddram_address(&mut self, address: u8) -> LcdResult<()> {
        if address > ADDRESS_MASK {
            return Err(LcdError::AddressOutOfRange { address });
        }
        self.send_command(ddram_address_command(address))
    }

    /// Reads the busy flag and address counter, without waiting for the controller.
    fn get_busy_flag_and_address(&mut self) -> LcdResult<(bool, u8)> {
        let status = self.read_command()?;
        Ok((status & BUSY_FLAG != 0, status & ADDRESS_MASK))
    }

    /// Waits until the controller is idle and sends a command.
    fn send_command(&mut self, command: u8) -> LcdResult<()> {
        self.wait_ready()?;
        self.write_command_unchecked(command)
    }

    /// Waits until the controller is idle and sends a data byte.
    fn send_data(&mut self, data: u8) -> LcdResult<()> {
        self.wait_ready()?;
        self.write_data_unchecked(data)
    }

    // Low-level commands
    // These are implemented by the driver implementation and used by the ones above.

    /// Polls the busy flag until it clears and returns the address counter read afterward.
    fn wait_ready(&mut self) -> LcdResult<u8>;

    /// Writes a command (RS = 0) without checking the busy flag.
    fn write_command_unchecked(&mut self, command: u8) -> LcdResult<()>;

    /// Writes a data byte (RS = 1) without checking the busy flag.
    fn write_data_unchecked(&mut self, data: u8) -> LcdResult<()>;

    /// Reads the busy flag and address counter in a single byte (RS = 0).
    fn read_command(&mut self) -> LcdResult<u8>;

    /// Reads the data byte under the address counter (RS = 1). The controller moves the address
    /// counter on afterward, like after a write.
    fn read_data(&mut self) -> LcdResult<u8>;
}

pub(crate) fn ddram_address_command(address: u8) -> u8 {
    0b10000000 | (address & ADDRESS_MASK)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CursorDirection {
    /// Moves the cursor to the left after writing/reading data.
    Left,
    /// Moves the cursor to the right after writing/reading data.
    Right,
}

/// Which controller register a bus cycle addresses, selected by the RS line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Register {
    /// Instructions when writing, busy flag and address when reading.
    Instruction,
    /// Character data.
    Data,
}

impl Register {
    /// The RS line level that selects this register.
    pub fn rs_level(self) -> bool {
        matches!(self, Register::Data)
    }
}

/// Display on/off control: display, cursor and cursor blink.
///
/// The value is the complete display control command byte `00001DCB`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DisplayAttributes(u8);

impl DisplayAttributes {
    /// Display off.
    pub const OFF: Self = Self(0x08);
    /// Display on, cursor off.
    pub const ON: Self = Self(0x0C);
    /// Display on, cursor off, blinking character.
    pub const ON_BLINK: Self = Self(0x0D);
    /// Display on, cursor on.
    pub const ON_CURSOR: Self = Self(0x0E);
    /// Display on, cursor on, blinking character.
    pub const ON_CURSOR_BLINK: Self = Self(0x0F);

    pub const fn new(display_on: bool, cursor_on: bool, blink_on: bool) -> Self {
        let mut bits = 0b00001000;
        if display_on {
            bits |= 0b00000100;
        }
        if cursor_on {
            bits |= 0b00000010;
        }
        if blink_on {
            bits |= 0b00000001;
        }
        Self(bits)
    }

    /// Takes the `DCB` bits from a raw byte, e.g. one of the classic `LCD_DISP_*` values.
    pub const fn from_bits(bits: u8) -> Self {
        Self(0b00001000 | (bits & 0b00000111))
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn display_on(self) -> bool {
        self.0 & 0b00000100 != 0
    }

    pub const fn cursor_on(self) -> bool {
        self.0 & 0b00000010 != 0
    }

    pub const fn blink_on(self) -> bool {
        self.0 & 0b00000001 != 0
    }
}

impl Default for DisplayAttributes {
    fn default() -> Self {
        Self::ON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_attributes_match_the_classic_constants() {
        assert_eq!(DisplayAttributes::new(false, false, false), DisplayAttributes::OFF);
        assert_eq!(DisplayAttributes::new(true, false, false), DisplayAttributes::ON);
        assert_eq!(DisplayAttributes::new(true, false, true), DisplayAttributes::ON_BLINK);
        assert_eq!(DisplayAttributes::new(true, true, false), DisplayAttributes::ON_CURSOR);
        assert_eq!(DisplayAttributes::new(true, true, true), DisplayAttributes::ON_CURSOR_BLINK);
        assert_eq!(DisplayAttributes::from_bits(0x0E), DisplayAttributes::ON_CURSOR);
        assert!(DisplayAttributes::ON_CURSOR.cursor_on());
        assert!(!DisplayAttributes::ON_CURSOR.blink_on());
    }

    #[test]
    fn ddram_command_keeps_seven_address_bits() {
        assert_eq!(ddram_address_command(0x40), 0xC0);
        assert_eq!(ddram_address_command(0x85), 0x85);
    }
}
