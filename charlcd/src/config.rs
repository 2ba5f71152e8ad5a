use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use charlcd_gpio::lcd::hd44780::driver::DisplayAttributes;
use charlcd_gpio::lcd::hd44780::{LcdOptions, LCD_WRAP_LINES};
use dotenv::var;
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_FILE: &str = "charlcd.json";

/// Display preferences, stored as JSON in `CONFIG_FILE`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Overrides the `wrap-lines` build default when set.
    pub wrap_lines: Option<bool>,
    pub validate_addresses: bool,
    /// Busy flag reads before giving up on the display. Unlimited when unset.
    pub max_busy_polls: Option<NonZeroU32>,
    pub cursor: bool,
    pub blink: bool,
    /// Shown on line 1 while starting up.
    pub banner: String,
}

impl Config {
    /// Where the config lives: `CONFIG_FILE`, or `charlcd.json` in the working directory.
    pub fn path() -> PathBuf {
        PathBuf::from(var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string()))
    }

    /// Loads the config at `path`. A missing file is `Ok(None)`; a file that can't be read or
    /// parsed is an error, so it never gets replaced by defaults.
    pub fn try_load(path: &Path) -> eyre::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let config = serde_json::from_reader(reader)
            .map_err(|err| eyre::eyre!("Invalid config in {}: {}", path.display(), err))?;
        Ok(Some(config))
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn lcd_options(&self) -> LcdOptions {
        LcdOptions {
            wrap_lines: self.wrap_lines.unwrap_or(LCD_WRAP_LINES),
            validate_addresses: self.validate_addresses,
        }
    }

    pub fn display_attributes(&self) -> DisplayAttributes {
        DisplayAttributes::new(true, self.cursor, self.blink)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            wrap_lines: None,
            validate_addresses: false,
            max_busy_polls: NonZeroU32::new(10_000),
            cursor: false,
            blink: false,
            banner: "charlcd".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = serde_json::from_str(r#"{ "cursor": true, "banner": "hi" }"#).unwrap();
        assert!(config.cursor);
        assert_eq!(config.banner, "hi");
        assert_eq!(config.max_busy_polls, Config::default().max_busy_polls);
        assert_eq!(config.display_attributes(), DisplayAttributes::ON_CURSOR);
    }

    #[test]
    fn wrap_override_beats_the_build_default() {
        let config = Config {
            wrap_lines: Some(!LCD_WRAP_LINES),
            ..Config::default()
        };
        assert_eq!(config.lcd_options().wrap_lines, !LCD_WRAP_LINES);
        assert_eq!(Config::default().lcd_options().wrap_lines, LCD_WRAP_LINES);
    }

    fn scratch_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("charlcd-{}-{}.json", std::process::id(), name))
    }

    #[test]
    fn zero_poll_limit_is_rejected() {
        assert!(serde_json::from_str::<Config>(r#"{ "max_busy_polls": 0 }"#).is_err());
        let config: Config = serde_json::from_str(r#"{ "max_busy_polls": null }"#).unwrap();
        assert_eq!(config.max_busy_polls, None);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let path = scratch_file("missing");
        assert_eq!(Config::try_load(&path).unwrap(), None);
    }

    #[test]
    fn malformed_file_is_an_error_and_stays_untouched() {
        let path = scratch_file("malformed");
        std::fs::write(&path, "{ \"banner\": ").unwrap();

        assert!(Config::try_load(&path).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ \"banner\": ");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn saved_config_loads_back() {
        let path = scratch_file("saved");
        let config = Config { banner: "saved".to_string(), ..Config::default() };
        config.save(&path).unwrap();

        assert_eq!(Config::try_load(&path).unwrap(), Some(config));
        std::fs::remove_file(&path).unwrap();
    }
}
