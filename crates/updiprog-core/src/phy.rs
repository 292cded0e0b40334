//! Software UART over a single pin
//!
//! Frames are 12 bits: one start bit (low), 8 data bits LSB first, an even
//! parity bit and two stop bits (high). There is no hardware assist, so frame
//! boundaries come only from counting elapsed bit periods.
//!
//! ## Known limitation
//!
//! Received parity and stop bits are skipped without validation. A framing
//! error therefore shows up as a wrong byte (usually a missing ACK) one layer
//! up, never here.

use crate::error::{Error, Result};
use crate::link::UpdiTransport;
use crate::pin::{Direction, UpdiPin};
use crate::poll::{Delay, Poll};

/// Default bit period in microseconds (~1 kbaud, safe for unbuffered timing)
pub const DEFAULT_BIT_PERIOD_US: u32 = 1000;
/// Default start-bit timeout in polling ticks (one tick = 1/8 bit)
pub const DEFAULT_START_BIT_TIMEOUT: u32 = 5000;
/// Slowest supported bit period in microseconds (1 baud)
pub const MAX_BIT_PERIOD_US: u32 = 1_000_000;

/// Idle-high time before the first start bit, in bit periods
const IDLE_SETTLE_BITS: u32 = 10;
/// Stop bits emitted after parity
const STOP_BITS: u32 = 2;
/// Parity + stop window skipped after each received byte, in bit periods
const RX_TRAILER_BITS: u32 = 3;

/// Double-break pulse train: (level, duration in ms)
const DOUBLE_BREAK: [(bool, u32); 4] = [(false, 40), (true, 50), (false, 40), (true, 10)];

/// PHY timing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyConfig {
    /// Nominal bit period in microseconds
    pub bit_period_us: u32,
    /// Start-bit timeout in ticks of 1/8 bit period
    pub start_bit_timeout: u32,
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self {
            bit_period_us: DEFAULT_BIT_PERIOD_US,
            start_bit_timeout: DEFAULT_START_BIT_TIMEOUT,
        }
    }
}

/// Even parity bit of a data byte (1 when the number of set bits is odd)
pub fn parity_bit(byte: u8) -> bool {
    byte.count_ones() & 1 == 1
}

/// Bit-banged UPDI physical layer
pub struct Phy<P: UpdiPin> {
    pin: P,
    config: PhyConfig,
    open: bool,
}

impl<P: UpdiPin> Phy<P> {
    /// Take ownership of the pin and release the line (input, no pull)
    pub fn initialize(mut pin: P, config: PhyConfig) -> Result<Self> {
        if config.bit_period_us < 8 {
            return Err(Error::Config(format!(
                "bit period of {} us is too short",
                config.bit_period_us
            )));
        }
        if config.bit_period_us > MAX_BIT_PERIOD_US {
            return Err(Error::Config(format!(
                "bit period of {} us is too long (max {} us)",
                config.bit_period_us, MAX_BIT_PERIOD_US
            )));
        }
        pin.set_direction(Direction::Input);
        log::debug!(
            "phy: initialized, bit period {} us, start-bit timeout {} ticks",
            config.bit_period_us,
            config.start_bit_timeout
        );
        Ok(Self {
            pin,
            config,
            open: true,
        })
    }

    /// Timing parameters in use
    pub fn config(&self) -> &PhyConfig {
        &self.config
    }

    /// Access the underlying pin
    pub fn pin(&self) -> &P {
        &self.pin
    }

    fn bit(&mut self) {
        self.pin.delay_us(self.config.bit_period_us);
    }

    fn send_frame(&mut self, byte: u8) {
        self.pin.write_level(false);
        self.bit();

        let mut shift = byte;
        for _ in 0..8 {
            self.pin.write_level(shift & 1 != 0);
            self.bit();
            shift >>= 1;
        }

        self.pin.write_level(parity_bit(byte));
        self.bit();

        self.pin.write_level(true);
        self.pin.delay_us(self.config.bit_period_us.saturating_mul(STOP_BITS));
    }

    fn wait_start_bit(&mut self) -> bool {
        let tick = Poll::new(self.config.bit_period_us / 8, self.config.start_bit_timeout);
        tick.check_then_sleep(&mut self.pin, |pin| !pin.read_level())
    }

    fn receive_frame(&mut self) -> u8 {
        self.pin.delay_us(self.config.bit_period_us / 2);

        let mut byte = 0u8;
        for _ in 0..8 {
            self.bit();
            byte >>= 1;
            if self.pin.read_level() {
                byte |= 0x80;
            }
        }

        self.pin.delay_us(self.config.bit_period_us.saturating_mul(RX_TRAILER_BITS));
        byte
    }

    /// Return the pin to input; safe to call more than once
    pub fn close(&mut self) {
        if self.open {
            self.pin.set_direction(Direction::Input);
            self.open = false;
            log::debug!("phy: closed");
        }
    }
}

impl<P: UpdiPin> Delay for Phy<P> {
    fn delay_us(&mut self, us: u32) {
        self.pin.delay_us(us);
    }
}

impl<P: UpdiPin> UpdiTransport for Phy<P> {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(Error::Io("PHY is closed".into()));
        }
        log::trace!("phy: tx {:02X?}", data);

        self.pin.set_direction(Direction::Output);
        self.pin.write_level(true);
        self.pin.delay_us(self.config.bit_period_us.saturating_mul(IDLE_SETTLE_BITS));

        for &byte in data {
            self.send_frame(byte);
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> usize {
        if !self.open {
            return 0;
        }
        self.pin.set_direction(Direction::Input);

        for (n, slot) in buf.iter_mut().enumerate() {
            if !self.wait_start_bit() {
                log::trace!("phy: start-bit timeout after {} of {} bytes", n, buf.len());
                return n;
            }
            *slot = self.receive_frame();
        }
        log::trace!("phy: rx {:02X?}", buf);
        buf.len()
    }

    fn double_break(&mut self) {
        if !self.open {
            return;
        }
        log::debug!("phy: double break");
        self.pin.set_direction(Direction::Output);
        for (level, ms) in DOUBLE_BREAK {
            self.pin.write_level(level);
            self.pin.delay_ms(ms);
        }
    }
}

impl<P: UpdiPin> Drop for Phy<P> {
    fn drop(&mut self) {
        self.close();
    }
}
