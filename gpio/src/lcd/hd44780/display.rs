use crate::lcd::hd44780::driver::{
    CursorDirection, DisplayAttributes, HD44780Driver, ddram_address_command,
};
use crate::lcd::hd44780::{
    LCD_DISP_LENGTH, LCD_LINE_CAPACITY, LCD_LINES, LCD_START_LINE1, LCD_START_LINE2,
    LCD_WRAP_LINES, LcdError, LcdResult,
};
use log::{debug, warn};

/// Per-display behavior switches.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LcdOptions {
    /// Continue on the other line when printing past the last visible column.
    pub wrap_lines: bool,
    /// Reject [CharacterLcd::goto_xy] positions outside the DDRAM instead of passing them on.
    pub validate_addresses: bool,
}

impl Default for LcdOptions {
    fn default() -> Self {
        LcdOptions {
            wrap_lines: LCD_WRAP_LINES,
            validate_addresses: false,
        }
    }
}

/// A 16x2 character display on top of any [HD44780Driver].
///
/// The cursor position is never cached: every [CharacterLcd::print_char] reads the address
/// counter from the controller first, as part of waiting for it to be ready.
#[derive(Debug)]
pub struct CharacterLcd<D: HD44780Driver> {
    driver: D,
    options: LcdOptions,
}

impl<D: HD44780Driver> CharacterLcd<D> {
    pub fn new(driver: D) -> Self {
        Self::with_options(driver, LcdOptions::default())
    }

    pub fn with_options(driver: D, options: LcdOptions) -> Self {
        CharacterLcd { driver, options }
    }

    pub fn options(&self) -> LcdOptions {
        self.options
    }

    pub fn driver(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Brings the display up: 4-bit bus, two lines, 5x8 font, cleared, cursor moving right
    /// without display shift, and finally `attributes` applied.
    pub fn initialize(&mut self, attributes: DisplayAttributes) -> LcdResult<()> {
        self.driver.init()?;
        self.driver.function_set(false, true, false)?;
        self.driver.set_display_control(DisplayAttributes::OFF)?;
        self.driver.clear_display()?;
        self.driver.set_entry_mode(CursorDirection::Right, false)?;
        self.driver.set_display_control(attributes)?;
        debug!("HD44780 initialized with {:?}", attributes);
        Ok(())
    }

    /// Clears the display. The cursor goes back to the start of line 1.
    pub fn clear(&mut self) -> LcdResult<()> {
        self.driver.clear_display()
    }

    /// Moves the cursor to the start of line 1 and undoes display shifts.
    pub fn home(&mut self) -> LcdResult<()> {
        self.driver.return_home()
    }

    /// Moves the cursor to `col` on `row`. Row 0 is line 1, anything else is line 2.
    ///
    /// Unless [LcdOptions::validate_addresses] is set the position isn't checked; the address is
    /// sent as is, cut to the controller's seven address bits.
    pub fn goto_xy(&mut self, col: u8, row: u8) -> LcdResult<()> {
        if self.options.validate_addresses && (col >= LCD_LINE_CAPACITY || row >= LCD_LINES) {
            return Err(LcdError::InvalidAddress { column: col, row });
        }
        let base = if row == 0 { LCD_START_LINE1 } else { LCD_START_LINE2 };
        self.driver.send_command(ddram_address_command(base.wrapping_add(col)))
    }

    /// The current DDRAM address, read from the controller.
    pub fn position(&mut self) -> LcdResult<u8> {
        self.driver.wait_ready()
    }

    /// Prints one character at the cursor.
    ///
    /// `'\n'` moves to the start of line 2 when the cursor is on line 1, and to the start of
    /// line 1 otherwise. Characters above U+00FF have no single-byte code and print as `?`.
    pub fn print_char(&mut self, character: char) -> LcdResult<()> {
        let byte = u8::try_from(character).unwrap_or_else(|_| {
            warn!("Character {:?} can't be displayed", character);
            b'?'
        });
        self.write_byte(byte)
    }

    /// Like [CharacterLcd::print_char], for a raw character code.
    pub fn write_byte(&mut self, byte: u8) -> LcdResult<()> {
        let position = self.driver.wait_ready()?;

        if byte == b'\n' {
            return self.newline(position);
        }

        if self.options.wrap_lines {
            let wrap_to = if position == LCD_START_LINE1 + LCD_DISP_LENGTH {
                Some(LCD_START_LINE2)
            } else if position == LCD_START_LINE2 + LCD_DISP_LENGTH {
                Some(LCD_START_LINE1)
            } else {
                None
            };
            if let Some(address) = wrap_to {
                self.driver.write_command_unchecked(ddram_address_command(address))?;
                self.driver.wait_ready()?;
            }
        }

        self.driver.write_data_unchecked(byte)
    }

    /// Prints the characters of `text` in order, up to the first `'\0'` if there is one.
    ///
    /// Code 0 is a custom glyph on the controller, so it's only reachable through
    /// [CharacterLcd::write_byte].
    pub fn print(&mut self, text: &str) -> LcdResult<()> {
        for character in text.chars().take_while(|&c| c != '\0') {
            self.print_char(character)?;
        }
        Ok(())
    }

    /// Reads the character code under the cursor. The cursor moves on, like after printing.
    pub fn read_char(&mut self) -> LcdResult<u8> {
        self.driver.wait_ready()?;
        self.driver.read_data()
    }

    /// Changes display, cursor and blink without touching the contents.
    pub fn set_display(&mut self, attributes: DisplayAttributes) -> LcdResult<()> {
        self.driver.set_display_control(attributes)
    }

    /// Moves the cursor one cell left or right.
    pub fn move_cursor(&mut self, direction: CursorDirection) -> LcdResult<()> {
        self.driver.cursor_shift(false, direction)
    }

    /// Shifts the whole display one cell left or right. The cursor follows the contents.
    pub fn shift_display(&mut self, direction: CursorDirection) -> LcdResult<()> {
        self.driver.cursor_shift(true, direction)
    }

    fn newline(&mut self, position: u8) -> LcdResult<()> {
        let address = if position < LCD_START_LINE2 {
            LCD_START_LINE2
        } else {
            LCD_START_LINE1
        };
        self.driver.send_command(ddram_address_command(address))
    }
}

impl<D: HD44780Driver> std::fmt::Write for CharacterLcd<D> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.print(s).map_err(|_| std::fmt::Error)
    }
}
