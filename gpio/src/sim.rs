//! A simulated HD44780 controller behind seven virtual GPIO lines.
//!
//! [SimulatedHd44780] is a [GpioDriver], so the real driver talks to it through ordinary
//! [GpioPin]s. Line indices are fixed, see [SimulatedHd44780::WIRING].
//!
//! The model follows the datasheet closely enough to catch protocol mistakes:
//! - it powers on in 8-bit mode with DB0..DB3 tied low, so only the power-on sync gets it into
//!   4-bit mode,
//! - write nibbles are latched on the falling edge of E, read nibbles are driven while E is high,
//! - after every instruction or data byte it stays busy for a number of status reads (and for at
//!   least the instruction's execution time on the virtual clock),
//! - the first status read after the busy flag clears still reports the previous address counter,
//! - bytes written while busy are ignored and counted in [SimulatedHd44780::busy_violations].
//!
//! Time only moves when the driver waits through [SimulatedHd44780::delay].
use crate::delay::Delay;
use crate::lcd::hd44780::LCD_LINE_CAPACITY;
use crate::lcd::hd44780::driver::{DisplayAttributes, PinWiring, Register};
use crate::{GpioDirection, GpioDriver, GpioError, GpioPin, GpioResult};
use log::trace;
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};

const LINE_NAMES: [&str; 7] = ["RS", "RW", "E", "DB4", "DB5", "DB6", "DB7"];
const RS: usize = 0;
const RW: usize = 1;
const E: usize = 2;
const DB4: usize = 3;

/// Execution time of clear display and return home.
const SLOW_EXECUTION_US: u64 = 1520;
/// Execution time of every other instruction and of data reads and writes.
const EXECUTION_US: u64 = 37;

/// Something the simulated controller saw on the bus.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BusEvent {
    /// A complete E pulse. For writes, the nibble latched on the falling edge; for reads, the
    /// nibble the controller drove.
    Strobe { register: Register, read: bool, nibble: u8 },
    /// A complete byte written to the controller.
    Write { register: Register, byte: u8 },
    /// A complete byte read from the controller.
    Read { register: Register, byte: u8 },
    /// The driver waited.
    Delay { micros: u32 },
}

#[derive(Debug, Default, Copy, Clone)]
struct Line {
    direction: GpioDirection,
    level: bool,
    claimed: bool,
}

struct Controller {
    lines: [Line; 7],

    four_bit: bool,
    two_lines: bool,
    pending_nibble: Option<u8>,
    read_latch: Option<(Register, u8)>,
    read_low_nibble: bool,
    driven_nibble: Option<u8>,

    ddram: [u8; 128],
    address: u8,
    increment: bool,
    shift_on_write: bool,
    display_control: DisplayAttributes,
    display_shift: i16,

    busy_reads: u32,
    busy_remaining: u32,
    busy_until_us: u64,
    stuck: bool,
    stale_address: Option<u8>,
    busy_violations: u32,

    clock_us: u64,
    events: Vec<BusEvent>,
}

impl Controller {
    fn power_on() -> Self {
        Controller {
            lines: [Line::default(); 7],
            four_bit: false,
            two_lines: false,
            pending_nibble: None,
            read_latch: None,
            read_low_nibble: false,
            driven_nibble: None,
            ddram: [b' '; 128],
            address: 0,
            increment: true,
            shift_on_write: false,
            display_control: DisplayAttributes::OFF,
            display_shift: 0,
            busy_reads: 1,
            busy_remaining: 0,
            busy_until_us: 0,
            stuck: false,
            stale_address: None,
            busy_violations: 0,
            clock_us: 0,
            events: Vec::new(),
        }
    }

    fn is_busy(&self) -> bool {
        self.stuck || (self.busy_remaining > 0 && self.clock_us < self.busy_until_us)
    }

    fn register(&self) -> Register {
        if self.lines[RS].level {
            Register::Data
        } else {
            Register::Instruction
        }
    }

    /// Data lines the host doesn't drive float high.
    fn bus_nibble(&self) -> u8 {
        self.lines[DB4..]
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, line)| {
                let level = line.direction != GpioDirection::Output || line.level;
                if level { acc | (1 << i) } else { acc }
            })
    }

    fn set_enable(&mut self, level: bool) {
        let previous = self.lines[E].level;
        self.lines[E].level = level;
        match (previous, level, self.lines[RW].level) {
            (false, true, true) => self.start_read_strobe(),
            (true, false, true) => self.finish_read_strobe(),
            (true, false, false) => self.latch_write_strobe(),
            _ => {}
        }
    }

    fn start_read_strobe(&mut self) {
        let (_, byte) = match self.read_latch {
            Some(latch) => latch,
            None => {
                let register = self.register();
                let byte = match register {
                    Register::Instruction => self.status(),
                    Register::Data => {
                        if self.is_busy() {
                            self.busy_violations += 1;
                        }
                        self.ddram[self.address as usize]
                    }
                };
                self.read_latch = Some((register, byte));
                self.read_low_nibble = false;
                (register, byte)
            }
        };
        self.driven_nibble = Some(if self.read_low_nibble { byte & 0x0F } else { byte >> 4 });
    }

    fn finish_read_strobe(&mut self) {
        let Some((register, byte)) = self.read_latch else {
            return;
        };
        let nibble = self.driven_nibble.take().unwrap_or(0x0F);
        self.events.push(BusEvent::Strobe { register, read: true, nibble });

        if self.four_bit && !self.read_low_nibble {
            self.read_low_nibble = true;
            return;
        }

        self.read_latch = None;
        self.read_low_nibble = false;
        self.events.push(BusEvent::Read { register, byte });
        if register == Register::Data {
            let old_address = self.address;
            self.step_address(self.increment);
            self.start_execution(old_address, EXECUTION_US);
        }
    }

    fn latch_write_strobe(&mut self) {
        // A write strobe ends any half-finished read.
        self.read_latch = None;
        self.read_low_nibble = false;

        let register = self.register();
        let nibble = self.bus_nibble();
        self.events.push(BusEvent::Strobe { register, read: false, nibble });

        if !self.four_bit {
            self.execute(register, nibble << 4);
            return;
        }
        match self.pending_nibble.take() {
            None => self.pending_nibble = Some(nibble),
            Some(high) => self.execute(register, (high << 4) | nibble),
        }
    }

    fn status(&mut self) -> u8 {
        if self.is_busy() {
            self.busy_remaining = self.busy_remaining.saturating_sub(1);
            0x80 | self.stale_address.unwrap_or(self.address)
        } else {
            self.stale_address.take().unwrap_or(self.address)
        }
    }

    fn execute(&mut self, register: Register, byte: u8) {
        trace!("Simulated HD44780 got {:08b}, {:?}", byte, register);
        self.events.push(BusEvent::Write { register, byte });

        if self.is_busy() {
            self.busy_violations += 1;
            return;
        }

        let old_address = self.address;
        let mut execution_us = EXECUTION_US;

        match register {
            Register::Data => {
                self.ddram[self.address as usize] = byte;
                self.step_address(self.increment);
                if self.shift_on_write {
                    self.display_shift += if self.increment { 1 } else { -1 };
                }
            }
            Register::Instruction => {
                if byte & 0b10000000 != 0 {
                    self.address = byte & 0b01111111;
                } else if byte & 0b01000000 != 0 {
                    // CGRAM isn't modeled.
                } else if byte & 0b00100000 != 0 {
                    self.four_bit = byte & 0b00010000 == 0;
                    self.two_lines = byte & 0b00001000 != 0;
                } else if byte & 0b00010000 != 0 {
                    let right = byte & 0b00000100 != 0;
                    if byte & 0b00001000 != 0 {
                        self.display_shift += if right { -1 } else { 1 };
                    } else {
                        self.step_address(right);
                    }
                } else if byte & 0b00001000 != 0 {
                    self.display_control = DisplayAttributes::from_bits(byte);
                } else if byte & 0b00000100 != 0 {
                    self.increment = byte & 0b00000010 != 0;
                    self.shift_on_write = byte & 0b00000001 != 0;
                } else if byte & 0b00000010 != 0 {
                    self.address = 0;
                    self.display_shift = 0;
                    execution_us = SLOW_EXECUTION_US;
                } else if byte & 0b00000001 != 0 {
                    self.ddram.fill(b' ');
                    self.address = 0;
                    self.increment = true;
                    self.display_shift = 0;
                    execution_us = SLOW_EXECUTION_US;
                }
            }
        }

        self.start_execution(old_address, execution_us);
    }

    fn start_execution(&mut self, old_address: u8, execution_us: u64) {
        self.stale_address = Some(old_address);
        self.busy_remaining = self.busy_reads;
        self.busy_until_us = self.clock_us + execution_us;
    }

    fn step_address(&mut self, forward: bool) {
        let last = if self.two_lines { 0x67 } else { 0x4F };
        self.address = match (forward, self.address) {
            (true, 0x27) if self.two_lines => 0x40,
            (false, 0x40) if self.two_lines => 0x27,
            (true, a) if a == last => 0x00,
            (false, 0x00) => last,
            (true, a) => (a + 1) & 0x7F,
            (false, a) => a - 1,
        };
    }
}

/// See the [module documentation](self).
pub struct SimulatedHd44780 {
    controller: RefCell<Controller>,
}

impl SimulatedHd44780 {
    /// Line indices of the simulated bus.
    pub const WIRING: PinWiring = PinWiring {
        rs: RS,
        rw: RW,
        e: E,
        data: [DB4, DB4 + 1, DB4 + 2, DB4 + 3],
    };

    /// A controller straight after power-on: 8-bit interface, one line, display off.
    pub fn new() -> Self {
        SimulatedHd44780 {
            controller: RefCell::new(Controller::power_on()),
        }
    }

    /// A controller left in 4-bit mode halfway through a byte, as after a host reset mid-transfer.
    pub fn new_mid_transfer() -> Self {
        let mut controller = Controller::power_on();
        controller.four_bit = true;
        controller.pending_nibble = Some(0b0101);
        SimulatedHd44780 {
            controller: RefCell::new(controller),
        }
    }

    /// A [Delay] that advances the virtual clock instead of sleeping.
    pub fn delay(&self) -> SimDelay<'_> {
        SimDelay { sim: self }
    }

    /// Sets for how many status reads the controller reports busy after each operation.
    pub fn set_busy_reads(&self, reads: u32) {
        self.controller.borrow_mut().busy_reads = reads;
    }

    /// A stuck controller reports busy forever.
    pub fn set_stuck(&self, stuck: bool) {
        self.controller.borrow_mut().stuck = stuck;
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.controller.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.controller.borrow_mut().events.clear();
    }

    /// Bytes written to the controller since the log was last cleared, instruction or data.
    pub fn writes(&self) -> Vec<(Register, u8)> {
        self.controller
            .borrow()
            .events
            .iter()
            .filter_map(|event| match *event {
                BusEvent::Write { register, byte } => Some((register, byte)),
                _ => None,
            })
            .collect()
    }

    pub fn busy_violations(&self) -> u32 {
        self.controller.borrow().busy_violations
    }

    /// The real address counter, regardless of what a status read would report.
    pub fn address(&self) -> u8 {
        self.controller.borrow().address
    }

    pub fn is_four_bit(&self) -> bool {
        self.controller.borrow().four_bit
    }

    pub fn is_two_lines(&self) -> bool {
        self.controller.borrow().two_lines
    }

    pub fn display_control(&self) -> DisplayAttributes {
        self.controller.borrow().display_control
    }

    /// Entry mode as `(increment, shift_on_write)`.
    pub fn entry_mode(&self) -> (bool, bool) {
        let controller = self.controller.borrow();
        (controller.increment, controller.shift_on_write)
    }

    pub fn ddram(&self, address: u8) -> u8 {
        self.controller.borrow().ddram[(address & 0x7F) as usize]
    }

    /// The visible characters of a line (0 or 1), taking display shift into account.
    pub fn line_text(&self, row: u8) -> String {
        let controller = self.controller.borrow();
        let base = if row == 0 { 0x00 } else { 0x40 };
        (0..crate::lcd::hd44780::LCD_DISP_LENGTH as i16)
            .map(|column| {
                let offset = (column + controller.display_shift).rem_euclid(LCD_LINE_CAPACITY as i16);
                controller.ddram[base + offset as usize] as char
            })
            .collect()
    }

    /// Current levels of DB4..DB7.
    pub fn data_levels(&self) -> [bool; 4] {
        let controller = self.controller.borrow();
        std::array::from_fn(|i| controller.lines[DB4 + i].level)
    }

    /// Whether the host drives all four data lines.
    pub fn data_driven(&self) -> bool {
        self.controller.borrow().lines[DB4..]
            .iter()
            .all(|line| line.direction == GpioDirection::Output)
    }

    /// Virtual time passed, in microseconds.
    pub fn elapsed_us(&self) -> u64 {
        self.controller.borrow().clock_us
    }
}

impl Default for SimulatedHd44780 {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for SimulatedHd44780 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimulatedHd44780")
    }
}

impl GpioDriver for SimulatedHd44780 {
    fn count(&self) -> GpioResult<usize> {
        Ok(LINE_NAMES.len())
    }

    fn get_pin(&self, index: usize) -> GpioResult<Box<dyn GpioPin + '_>> {
        let mut controller = self.controller.borrow_mut();
        let line = controller
            .lines
            .get_mut(index)
            .ok_or(GpioError::InvalidArgument)?;
        if line.claimed {
            return Err(GpioError::AlreadyInUse);
        }
        line.claimed = true;
        Ok(Box::new(SimPin { sim: self, index }))
    }
}

struct SimPin<'a> {
    sim: &'a SimulatedHd44780,
    index: usize,
}

impl Debug for SimPin<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}]", self.sim, LINE_NAMES[self.index])
    }
}

impl SimPin<'_> {
    fn set_direction(&mut self, direction: GpioDirection) {
        let mut controller = self.sim.controller.borrow_mut();
        controller.lines[self.index].direction = direction;
    }
}

impl GpioPin for SimPin<'_> {
    fn configure_as_output(&mut self) -> GpioResult<()> {
        self.set_direction(GpioDirection::Output);
        Ok(())
    }

    fn configure_as_input(&mut self) -> GpioResult<()> {
        self.set_direction(GpioDirection::Input);
        Ok(())
    }

    fn direction(&self) -> GpioDirection {
        self.sim.controller.borrow().lines[self.index].direction
    }

    fn write(&mut self, value: bool) -> GpioResult<()> {
        let mut controller = self.sim.controller.borrow_mut();
        if controller.lines[self.index].direction != GpioDirection::Output {
            return Err(GpioError::NotConfigured);
        }
        if self.index == E {
            controller.set_enable(value);
        } else {
            controller.lines[self.index].level = value;
        }
        Ok(())
    }

    fn read(&self) -> GpioResult<bool> {
        let controller = self.sim.controller.borrow();
        let line = controller.lines[self.index];
        match line.direction {
            GpioDirection::Unconfigured => Err(GpioError::NotConfigured),
            GpioDirection::Output => Ok(line.level),
            GpioDirection::Input if self.index >= DB4 => {
                let bit = self.index - DB4;
                Ok(controller.driven_nibble.is_none_or(|nibble| nibble & (1 << bit) != 0))
            }
            GpioDirection::Input => Ok(line.level),
        }
    }
}

impl Drop for SimPin<'_> {
    fn drop(&mut self) {
        if let Ok(mut controller) = self.sim.controller.try_borrow_mut() {
            controller.lines[self.index].claimed = false;
        }
    }
}

/// [Delay] for [SimulatedHd44780], see [SimulatedHd44780::delay].
pub struct SimDelay<'a> {
    sim: &'a SimulatedHd44780,
}

impl Debug for SimDelay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[delay]", self.sim)
    }
}

impl Delay for SimDelay<'_> {
    fn delay_us(&mut self, micros: u32) {
        let mut controller = self.sim.controller.borrow_mut();
        controller.clock_us += micros as u64;
        controller.events.push(BusEvent::Delay { micros });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strobe_nibble(pins: &mut [Box<dyn GpioPin + '_>], rs: bool, nibble: u8) {
        pins[RS].write(rs).unwrap();
        for (i, level) in crate::nibble_to_levels(nibble).into_iter().enumerate() {
            pins[DB4 + i].write(level).unwrap();
        }
        pins[E].write(true).unwrap();
        pins[E].write(false).unwrap();
    }

    fn claim_all(sim: &SimulatedHd44780) -> Vec<Box<dyn GpioPin + '_>> {
        let mut pins: Vec<_> = (0..7).map(|i| sim.get_pin(i).unwrap()).collect();
        for pin in pins.iter_mut() {
            pin.configure_as_output().unwrap();
        }
        pins
    }

    #[test]
    fn powers_on_in_eight_bit_mode() {
        let sim = SimulatedHd44780::new();
        let mut pins = claim_all(&sim);

        // 0x2 in 8-bit mode is a complete function set to 4 bits.
        strobe_nibble(&mut pins, false, 0b0010);
        assert!(sim.is_four_bit());
        assert_eq!(sim.writes(), vec![(Register::Instruction, 0x20)]);
    }

    #[test]
    fn four_bit_bytes_need_two_strobes() {
        let sim = SimulatedHd44780::new();
        sim.set_busy_reads(0);
        let mut pins = claim_all(&sim);
        strobe_nibble(&mut pins, false, 0b0010);
        sim.delay().delay_us(100);
        sim.clear_events();

        strobe_nibble(&mut pins, true, 0x4);
        assert!(sim.writes().is_empty());
        strobe_nibble(&mut pins, true, 0x1);
        assert_eq!(sim.writes(), vec![(Register::Data, 0x41)]);
        assert_eq!(sim.ddram(0), b'A');
        assert_eq!(sim.address(), 1);
    }

    #[test]
    fn writes_while_busy_are_ignored() {
        let sim = SimulatedHd44780::new();
        let mut pins = claim_all(&sim);
        strobe_nibble(&mut pins, false, 0b0010);
        // No delay, so the function set is still executing.
        strobe_nibble(&mut pins, false, 0b0011);
        strobe_nibble(&mut pins, false, 0b0000);
        assert_eq!(sim.busy_violations(), 1);
        assert!(sim.is_four_bit());
    }

    #[test]
    fn pins_are_claimed_once() {
        let sim = SimulatedHd44780::new();
        let pin = sim.get_pin(E).unwrap();
        assert_eq!(sim.get_pin(E).unwrap_err(), GpioError::AlreadyInUse);
        drop(pin);
        assert!(sim.get_pin(E).is_ok());
        assert_eq!(sim.get_pin(7).unwrap_err(), GpioError::InvalidArgument);
    }

    #[test]
    fn unconfigured_pins_refuse_io() {
        let sim = SimulatedHd44780::new();
        let mut pin = sim.get_pin(RS).unwrap();
        assert_eq!(pin.write(true), Err(GpioError::NotConfigured));
        assert_eq!(pin.read(), Err(GpioError::NotConfigured));
    }

    #[test]
    fn two_line_address_counter_skips_the_gap() {
        let mut controller = Controller::power_on();
        controller.two_lines = true;
        controller.address = 0x27;
        controller.step_address(true);
        assert_eq!(controller.address, 0x40);
        controller.address = 0x67;
        controller.step_address(true);
        assert_eq!(controller.address, 0x00);
        controller.step_address(false);
        assert_eq!(controller.address, 0x67);
    }
}
