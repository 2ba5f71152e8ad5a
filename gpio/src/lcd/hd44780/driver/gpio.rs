use crate::delay::Delay;
use crate::lcd::hd44780::driver::{ADDRESS_MASK, HD44780Driver, Register};
use crate::lcd::hd44780::{LcdError, LcdResult};
use crate::{GpioBias, GpioDriver, GpioPin, GpioResult, levels_to_nibble, nibble_to_levels};
use log::{debug, trace, warn};
use std::fmt::{Debug, Formatter};
use std::num::NonZeroU32;

/// Minimum time E is held high, and low again, for every strobe.
pub const ENABLE_HOLD_US: u32 = 1;
/// The address counter is updated a bit after the busy flag clears. Reading it any sooner
/// returns the previous address.
pub const ADDRESS_SETTLE_US: u32 = 2;
/// Time the controller needs after power-on before it accepts anything.
pub const POWER_ON_DELAY_US: u32 = 40_000;
/// Waits between the synchronization nibbles, as required by the datasheet.
pub const SYNC_FIRST_DELAY_US: u32 = 4_100;
pub const SYNC_DELAY_US: u32 = 100;

/// GPIO line numbers of the seven bus wires.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PinWiring {
    pub rs: usize,
    pub rw: usize,
    pub e: usize,
    /// DB4, DB5, DB6, DB7.
    pub data: [usize; 4],
}

/// The claimed bus wires. They're owned by the driver for its whole lifetime.
pub struct Hd44780Pins<'a> {
    pub rs: Box<dyn GpioPin + 'a>,
    pub rw: Box<dyn GpioPin + 'a>,
    pub e: Box<dyn GpioPin + 'a>,
    /// DB4, DB5, DB6, DB7.
    pub data: [Box<dyn GpioPin + 'a>; 4],
}

impl<'a> Hd44780Pins<'a> {
    /// Claims all seven lines from `gpio`. Data lines get a pull-up where the backend supports
    /// it, so they don't float while the bus turns around.
    pub fn claim<G: GpioDriver + ?Sized>(gpio: &'a G, wiring: &PinWiring) -> GpioResult<Self> {
        debug!("Claiming HD44780 bus {:?} on {:?}", wiring, gpio);
        let rs = gpio.get_pin(wiring.rs)?;
        let rw = gpio.get_pin(wiring.rw)?;
        let e = gpio.get_pin(wiring.e)?;
        let [db4, db5, db6, db7] = wiring.data;
        let mut data = [
            gpio.get_pin(db4)?,
            gpio.get_pin(db5)?,
            gpio.get_pin(db6)?,
            gpio.get_pin(db7)?,
        ];
        for pin in data.iter_mut() {
            if pin.supports_bias() {
                pin.set_bias(GpioBias::PullUp)?;
            }
        }
        Ok(Hd44780Pins { rs, rw, e, data })
    }
}

impl Debug for Hd44780Pins<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hd44780Pins")
            .field("rs", &self.rs)
            .field("rw", &self.rw)
            .field("e", &self.e)
            .field("data", &self.data)
            .finish()
    }
}

/// HD44780 driver over a 4-bit GPIO bus.
///
/// Every byte crosses the bus as two nibbles, high nibble first, each latched by a pulse on E.
/// Data lines map positionally: DB4 carries bit 0 of a nibble, DB7 bit 3. Between transactions
/// the data lines are left driven high.
///
/// Busy flag polling is unbounded by default, which blocks forever if no display answers. Use
/// [GpioHD44780Driver::with_busy_poll_limit] to get [LcdError::NotReady] instead.
#[derive(Debug)]
pub struct GpioHD44780Driver<'a> {
    pins: Hd44780Pins<'a>,
    delay: Box<dyn Delay + 'a>,
    busy_poll_limit: Option<NonZeroU32>,
}

impl<'a> GpioHD44780Driver<'a> {
    pub fn new(pins: Hd44780Pins<'a>, delay: impl Delay + 'a) -> Self {
        GpioHD44780Driver {
            pins,
            delay: Box::new(delay),
            busy_poll_limit: None,
        }
    }

    /// Gives up waiting for the controller after `polls` busy flag reads that all report busy.
    /// A limit of zero can't be expressed; `None` in [GpioHD44780Driver::set_busy_poll_limit]
    /// means no limit.
    pub fn with_busy_poll_limit(mut self, polls: NonZeroU32) -> Self {
        self.busy_poll_limit = Some(polls);
        self
    }

    pub fn set_busy_poll_limit(&mut self, polls: Option<NonZeroU32>) {
        self.busy_poll_limit = polls;
    }

    pub fn busy_poll_limit(&self) -> Option<NonZeroU32> {
        self.busy_poll_limit
    }

    fn pulse_e(&mut self) -> GpioResult<()> {
        self.pins.e.set_high()?;
        self.delay.delay_us(ENABLE_HOLD_US);
        self.pins.e.set_low()?;
        self.delay.delay_us(ENABLE_HOLD_US);
        Ok(())
    }

    fn select(&mut self, register: Register, read: bool) -> GpioResult<()> {
        self.pins.rs.write(register.rs_level())?;
        self.pins.rw.write(read)
    }

    fn drive_nibble(&mut self, nibble: u8) -> GpioResult<()> {
        for (pin, level) in self.pins.data.iter_mut().zip(nibble_to_levels(nibble)) {
            pin.write(level)?;
        }
        Ok(())
    }

    fn write_nibble(&mut self, nibble: u8) -> GpioResult<()> {
        trace!("Writing nibble: {:04b}", nibble);
        self.drive_nibble(nibble)?;
        self.pulse_e()
    }

    fn read_nibble(&mut self) -> GpioResult<u8> {
        self.pins.e.set_high()?;
        self.delay.delay_us(ENABLE_HOLD_US);
        let mut levels = [false; 4];
        for (level, pin) in levels.iter_mut().zip(self.pins.data.iter()) {
            *level = pin.read()?;
        }
        self.pins.e.set_low()?;
        self.delay.delay_us(ENABLE_HOLD_US);
        Ok(levels_to_nibble(levels))
    }

    fn write(&mut self, data: u8, register: Register) -> GpioResult<()> {
        trace!("Sending data: {:08b}, {:?}", data, register);

        self.select(register, false)?;
        for pin in self.pins.data.iter_mut() {
            pin.configure_as_output()?;
        }

        self.write_nibble(data >> 4)?;
        self.write_nibble(data & 0x0F)?;

        // All data pins high (inactive)
        self.drive_nibble(0x0F)
    }

    fn read(&mut self, register: Register) -> GpioResult<u8> {
        self.select(register, true)?;
        for pin in self.pins.data.iter_mut() {
            pin.configure_as_input()?;
        }

        let high_nibble = self.read_nibble()?;
        let low_nibble = self.read_nibble()?;
        let data = (high_nibble << 4) | low_nibble;

        trace!("Read data: {:08b}, {:?}", data, register);
        Ok(data)
    }
}

impl HD44780Driver for GpioHD44780Driver<'_> {
    /// Configures every wire as an output and synchronizes the controller into 4-bit mode.
    ///
    /// The controller may be in 8-bit mode (after power-on) or in 4-bit mode, possibly halfway
    /// through a byte. Sending `0011` three times lands it in 8-bit mode in every case, and a
    /// final `0010` switches it to 4 bits. The busy flag can't be read until then, so this
    /// sequence uses the datasheet's fixed waits instead.
    fn init(&mut self) -> LcdResult<()> {
        debug!("Configuring HD44780 bus");
        self.pins.rs.configure_as_output()?;
        self.pins.rw.configure_as_output()?;
        self.pins.e.configure_as_output()?;
        self.pins.e.set_low()?;
        self.select(Register::Instruction, false)?;
        for pin in self.pins.data.iter_mut() {
            pin.configure_as_output()?;
        }

        self.delay.delay_us(POWER_ON_DELAY_US);

        debug!("Synchronizing HD44780 into 4-bit mode");
        self.write_nibble(0b0011)?;
        self.delay.delay_us(SYNC_FIRST_DELAY_US);
        self.write_nibble(0b0011)?;
        self.delay.delay_us(SYNC_DELAY_US);
        self.write_nibble(0b0011)?;
        self.delay.delay_us(SYNC_DELAY_US);
        self.write_nibble(0b0010)?;

        self.drive_nibble(0x0F)?;
        Ok(())
    }

    /// Reads the busy flag until it clears, waits [ADDRESS_SETTLE_US] and reads the address
    /// counter again. The status read that saw the flag clear is never used for the address.
    fn wait_ready(&mut self) -> LcdResult<u8> {
        let mut polls = 0u32;
        while self.get_busy_flag_and_address()?.0 {
            polls = polls.saturating_add(1);
            if self.busy_poll_limit.is_some_and(|limit| polls >= limit.get()) {
                warn!("HD44780 still busy after {} polls", polls);
                return Err(LcdError::NotReady { polls });
            }
        }

        self.delay.delay_us(ADDRESS_SETTLE_US);

        Ok(self.read(Register::Instruction)? & ADDRESS_MASK)
    }

    fn write_command_unchecked(&mut self, command: u8) -> LcdResult<()> {
        Ok(self.write(command, Register::Instruction)?)
    }

    fn write_data_unchecked(&mut self, data: u8) -> LcdResult<()> {
        Ok(self.write(data, Register::Data)?)
    }

    fn read_command(&mut self) -> LcdResult<u8> {
        Ok(self.read(Register::Instruction)?)
    }

    fn read_data(&mut self) -> LcdResult<u8> {
        Ok(self.read(Register::Data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{BusEvent, SimulatedHd44780};
    use proptest::prelude::*;

    fn driver(sim: &SimulatedHd44780) -> GpioHD44780Driver<'_> {
        let pins = Hd44780Pins::claim(sim, &SimulatedHd44780::WIRING).unwrap();
        GpioHD44780Driver::new(pins, sim.delay())
    }

    /// A driver past the sync and function set, with an empty event log.
    fn ready_driver(sim: &SimulatedHd44780) -> GpioHD44780Driver<'_> {
        let mut driver = driver(sim);
        driver.init().unwrap();
        driver.function_set(false, true, false).unwrap();
        driver.wait_ready().unwrap();
        sim.clear_events();
        driver
    }

    fn strobes(events: &[BusEvent]) -> Vec<(Register, bool, u8)> {
        events
            .iter()
            .filter_map(|event| match *event {
                BusEvent::Strobe { register, read, nibble } => Some((register, read, nibble)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn init_synchronizes_into_four_bit_mode() {
        let sim = SimulatedHd44780::new();
        let mut driver = driver(&sim);
        driver.init().unwrap();

        assert!(sim.is_four_bit());
        let nibbles: Vec<u8> = strobes(&sim.events()).iter().map(|s| s.2).collect();
        assert_eq!(nibbles, vec![0b0011, 0b0011, 0b0011, 0b0010]);
        assert!(sim.elapsed_us() >= (POWER_ON_DELAY_US + SYNC_FIRST_DELAY_US) as u64);
        assert_eq!(sim.busy_violations(), 0);
    }

    #[test]
    fn init_recovers_from_a_half_sent_byte() {
        let sim = SimulatedHd44780::new_mid_transfer();
        let mut driver = driver(&sim);
        driver.init().unwrap();
        driver.function_set(false, true, false).unwrap();

        assert!(sim.is_four_bit());
        assert!(sim.is_two_lines());
    }

    #[test]
    fn busy_flag_gates_every_write() {
        let sim = SimulatedHd44780::new();
        let mut driver = ready_driver(&sim);
        sim.set_busy_reads(3);
        driver.set_ddram_address(0x05).unwrap();
        driver.send_data(b'x').unwrap();
        sim.clear_events();

        driver.send_data(b'y').unwrap();

        let events = sim.events();
        let reads: Vec<u8> = events
            .iter()
            .filter_map(|event| match *event {
                BusEvent::Read { byte, .. } => Some(byte),
                _ => None,
            })
            .collect();
        // Three busy reads, then the stale address with the flag clear, then the real one.
        assert_eq!(reads, vec![0x85, 0x85, 0x85, 0x05, 0x06]);

        let settle = events
            .iter()
            .position(|event| *event == BusEvent::Delay { micros: ADDRESS_SETTLE_US })
            .unwrap();
        let last_read = events
            .iter()
            .rposition(|event| matches!(event, BusEvent::Read { .. }))
            .unwrap();
        let write = events
            .iter()
            .position(|event| matches!(event, BusEvent::Write { .. }))
            .unwrap();
        assert!(settle < last_read);
        assert!(last_read < write);
        assert_eq!(sim.busy_violations(), 0);
    }

    #[test]
    fn wait_ready_returns_the_settled_address() {
        let sim = SimulatedHd44780::new();
        let mut driver = ready_driver(&sim);
        driver.set_ddram_address(0x4A).unwrap();
        assert_eq!(driver.wait_ready().unwrap(), 0x4A);
    }

    #[test]
    fn stuck_controller_reports_not_ready() {
        let sim = SimulatedHd44780::new();
        let mut driver = ready_driver(&sim).with_busy_poll_limit(NonZeroU32::new(5).unwrap());
        sim.set_stuck(true);

        assert_eq!(driver.send_data(b'a'), Err(LcdError::NotReady { polls: 5 }));
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn smallest_poll_limit_gives_up_after_one_busy_read() {
        let sim = SimulatedHd44780::new();
        let mut driver = ready_driver(&sim).with_busy_poll_limit(NonZeroU32::MIN);
        sim.set_stuck(true);

        assert_eq!(driver.wait_ready(), Err(LcdError::NotReady { polls: 1 }));
    }

    #[test]
    fn unlimited_wait_outlasts_a_long_busy_phase() {
        let sim = SimulatedHd44780::new();
        let mut driver = ready_driver(&sim);
        sim.set_busy_reads(300);
        driver.clear_display().unwrap();
        sim.clear_events();

        assert_eq!(driver.wait_ready().unwrap(), 0x00);
        let busy_reads = sim
            .events()
            .iter()
            .filter(|event| matches!(event, BusEvent::Read { byte, .. } if byte & 0x80 != 0))
            .count();
        assert_eq!(busy_reads, 300);

        // The same phase with a limit gives up instead.
        driver.set_busy_poll_limit(NonZeroU32::new(100));
        driver.clear_display().unwrap();
        assert_eq!(driver.wait_ready(), Err(LcdError::NotReady { polls: 100 }));
    }

    #[test]
    fn data_lines_idle_high_after_writes() {
        let sim = SimulatedHd44780::new();
        let mut driver = ready_driver(&sim);

        driver.send_command(0b00001100).unwrap();
        assert!(sim.data_driven());
        assert_eq!(sim.data_levels(), [true; 4]);

        driver.send_data(0x00).unwrap();
        assert!(sim.data_driven());
        assert_eq!(sim.data_levels(), [true; 4]);
    }

    #[test]
    fn ddram_address_past_seven_bits_is_rejected() {
        let sim = SimulatedHd44780::new();
        let mut driver = ready_driver(&sim);
        assert_eq!(
            driver.set_ddram_address(0x80),
            Err(LcdError::AddressOutOfRange { address: 0x80 })
        );
    }

    proptest! {
        #[test]
        fn writes_split_into_high_then_low_nibble(byte in any::<u8>(), data in any::<bool>()) {
            let sim = SimulatedHd44780::new();
            let mut driver = ready_driver(&sim);
            let register = if data { Register::Data } else { Register::Instruction };

            driver.wait_ready().unwrap();
            sim.clear_events();
            match register {
                Register::Data => driver.write_data_unchecked(byte).unwrap(),
                Register::Instruction => driver.write_command_unchecked(byte).unwrap(),
            }

            prop_assert_eq!(
                strobes(&sim.events()),
                vec![(register, false, byte >> 4), (register, false, byte & 0x0F)]
            );
            prop_assert_eq!(sim.writes(), vec![(register, byte)]);
        }

        #[test]
        fn reads_reassemble_both_nibbles(byte in any::<u8>()) {
            let sim = SimulatedHd44780::new();
            let mut driver = ready_driver(&sim);

            driver.set_ddram_address(0x10).unwrap();
            driver.send_data(byte).unwrap();
            driver.set_ddram_address(0x10).unwrap();
            driver.wait_ready().unwrap();
            sim.clear_events();

            prop_assert_eq!(driver.read_data().unwrap(), byte);
            prop_assert_eq!(
                strobes(&sim.events()),
                vec![(Register::Data, true, byte >> 4), (Register::Data, true, byte & 0x0F)]
            );
        }
    }
}
