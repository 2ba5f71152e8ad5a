//! What the demo shows on the display.

use charlcd_gpio::lcd::hd44780::driver::{DisplayAttributes, HD44780Driver};
use charlcd_gpio::lcd::hd44780::{CharacterLcd, LcdResult, LCD_DISP_LENGTH};
use log::debug;

/// Host name on line 1, a clock on line 2.
pub struct StatusScreen<D: HD44780Driver> {
    lcd: CharacterLcd<D>,
}

impl<D: HD44780Driver> StatusScreen<D> {
    pub fn new(lcd: CharacterLcd<D>) -> Self {
        StatusScreen { lcd }
    }

    /// Initializes the display and shows the banner with the version below it.
    pub fn start(&mut self, attributes: DisplayAttributes, banner: &str) -> LcdResult<()> {
        const VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

        self.lcd.initialize(attributes)?;
        self.lcd.print(&fit_line(banner))?;
        self.lcd.print("\n")?;
        self.lcd.print(&fit_line(&format!("{:>width$}", VERSION, width = LCD_DISP_LENGTH as usize)))
    }

    pub fn show_host(&mut self, host: &str) -> LcdResult<()> {
        debug!("Showing host {:?}", host);
        self.lcd.goto_xy(0, 0)?;
        self.lcd.print(&fit_line(host))
    }

    pub fn show_time(&mut self, (h, m, s): (u8, u8, u8)) -> LcdResult<()> {
        self.lcd.goto_xy(0, 1)?;
        self.lcd.print(&fit_line(&format!("{:^width$}", format!("{:02}:{:02}:{:02}", h, m, s), width = LCD_DISP_LENGTH as usize)))
    }

    pub fn lcd(&mut self) -> &mut CharacterLcd<D> {
        &mut self.lcd
    }
}

/// Cuts or pads `text` to exactly one visible line, so nothing from a previous frame survives
/// and nothing spills into the hidden part of the line.
fn fit_line(text: &str) -> String {
    let width = LCD_DISP_LENGTH as usize;
    let mut line: String = text.chars().take(width).collect();
    let len = line.chars().count();
    line.extend(std::iter::repeat_n(' ', width - len));
    line
}
