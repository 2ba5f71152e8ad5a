mod app;
mod config;

use std::env::var;
use std::thread::sleep;
use std::time::Duration;
use charlcd_gpio::GpioDriver;
use charlcd_gpio::delay::{Delay, SleepDelay};
use charlcd_gpio::gpiod::GpiodDriver;
use charlcd_gpio::lcd::hd44780::CharacterLcd;
use charlcd_gpio::lcd::hd44780::driver::{GpioHD44780Driver, Hd44780Pins, PinWiring};
use charlcd_gpio::sim::SimulatedHd44780;
use dotenv::dotenv;
use log::{debug, info};
use sysinfo::System;
use time::OffsetDateTime;
use crate::app::StatusScreen;
use crate::config::Config;

const UNKNOWN_STR: &str = "???";

fn parse_pin_bus(pin_str: &str) -> eyre::Result<[usize; 4]> {
    pin_str
        .split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect::<Result<Vec<_>, _>>()?
        .try_into()
        .map_err(|_| eyre::eyre!("Invalid number of data pins"))
}

fn wiring_from_env() -> eyre::Result<PinWiring> {
    Ok(PinWiring {
        e: var("CHARLCD_PIN_E")?.parse()?,
        rw: var("CHARLCD_PIN_RW")?.parse()?,
        rs: var("CHARLCD_PIN_RS")?.parse()?,
        data: parse_pin_bus(&var("CHARLCD_PINS_DATA")?)?,
    })
}

fn main() -> eyre::Result<()> {
    // Initialize environment and logger
    dotenv().ok();
    pretty_env_logger::init();

    info!("charlcd starting...");

    debug!("Trying to load config...");
    let config_path = Config::path();
    let config = if let Some(config) = Config::try_load(&config_path)? {
        info!("Config loaded.");
        config
    } else {
        info!("Config not found. Using default");
        let config = Config::default();
        config.save(&config_path)?;
        info!("Default config saved.");
        config
    };

    let ticks: Option<u64> = var("CHARLCD_TICKS").ok().map(|s| s.parse()).transpose()?;

    match var("CHARLCD_BACKEND").as_deref().unwrap_or("gpiod") {
        "gpiod" => {
            let chip = var("CHARLCD_CHIP").unwrap_or_else(|_| "/dev/gpiochip0".to_string());
            let wiring = wiring_from_env()?;
            info!("LCD @ {} E: {}, RW: {}, RS: {}, Data: {:?}",
                chip, wiring.e, wiring.rw, wiring.rs, wiring.data);

            debug!("Initializing GPIO driver...");
            let gpio = GpiodDriver::open(&chip)?;
            debug!("{:?} initialized.", gpio);

            run(&gpio, &wiring, SleepDelay, &config, ticks, None)
        }
        "sim" => {
            info!("Using the simulated display");
            let sim = SimulatedHd44780::new();
            run(&sim, &SimulatedHd44780::WIRING, sim.delay(), &config, ticks, Some(&sim))
        }
        other => Err(eyre::eyre!("Unknown backend {:?}, expected gpiod or sim", other)),
    }
}

fn run<'a, G: GpioDriver + ?Sized>(
    gpio: &'a G,
    wiring: &PinWiring,
    delay: impl Delay + 'a,
    config: &Config,
    ticks: Option<u64>,
    sim: Option<&SimulatedHd44780>,
) -> eyre::Result<()> {
    debug!("Initializing LCD driver...");
    let pins = Hd44780Pins::claim(gpio, wiring)?;
    let mut driver = GpioHD44780Driver::new(pins, delay);
    driver.set_busy_poll_limit(config.max_busy_polls);
    let mut screen = StatusScreen::new(CharacterLcd::with_options(driver, config.lcd_options()));

    screen.start(config.display_attributes(), &config.banner)?;
    debug!("{:?} initialized.", screen.lcd());
    log_lines(sim);

    info!(
        "Hello, {}!",
        System::name().as_deref().unwrap_or(UNKNOWN_STR)
    );
    let host = System::host_name().unwrap_or_else(|| UNKNOWN_STR.to_string());
    info!("Hostname {}", host);

    sleep(Duration::from_secs(1));
    screen.show_host(&host)?;

    info!("Starting main loop...");
    let mut tick = 0;
    while ticks.is_none_or(|ticks| tick < ticks) {
        let now = OffsetDateTime::now_local()?;
        screen.show_time(now.to_hms())?;
        log_lines(sim);

        tick += 1;
        sleep(Duration::from_secs(1));
    }

    Ok(())
}

/// Prints what the simulated display shows, so the demo is visible without hardware.
fn log_lines(sim: Option<&SimulatedHd44780>) {
    if let Some(sim) = sim {
        info!("|{}|", sim.line_text(0));
        info!("|{}|", sim.line_text(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_bus_accepts_common_separators() {
        assert_eq!(parse_pin_bus("26, 16, 20, 21").unwrap(), [26, 16, 20, 21]);
        assert_eq!(parse_pin_bus("1;2 3,4").unwrap(), [1, 2, 3, 4]);
        assert!(parse_pin_bus("1,2,3").is_err());
        assert!(parse_pin_bus("1,2,x,4").is_err());
    }
}
