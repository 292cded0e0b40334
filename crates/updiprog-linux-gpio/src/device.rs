//! Linux GPIO UPDI pin
//!
//! `LinuxGpioPin` implements [`UpdiPin`] on one line of a GPIO character
//! device. The line is requested once and switched between input and output
//! with `reconfigure`, so the request is never dropped in the middle of a
//! session.

use crate::error::{LinuxGpioError, Result};

use gpiocdev::line::{Offset, Value};
use gpiocdev::request::{Config, Request};

use updiprog_core::phy::{
    PhyConfig, DEFAULT_BIT_PERIOD_US, DEFAULT_START_BIT_TIMEOUT, MAX_BIT_PERIOD_US,
};
use updiprog_core::pin::{Direction, UpdiPin};
use updiprog_core::poll::{Delay, StdDelay};

/// Line offset used when no `pin=` option is given
pub const DEFAULT_PIN: Offset = 5;

/// Configuration for opening a Linux GPIO UPDI pin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinuxGpioConfig {
    /// Device path (e.g., "/dev/gpiochip0")
    pub device: String,
    /// UPDI GPIO line offset
    pub pin: Offset,
    /// Bit period in microseconds
    pub bit_period_us: u32,
    /// Start-bit timeout in ticks of 1/8 bit
    pub start_bit_timeout: u32,
}

impl Default for LinuxGpioConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            pin: DEFAULT_PIN,
            bit_period_us: DEFAULT_BIT_PERIOD_US,
            start_bit_timeout: DEFAULT_START_BIT_TIMEOUT,
        }
    }
}

impl LinuxGpioConfig {
    /// Create a new configuration with the given device path and line
    pub fn new(device: impl Into<String>, pin: Offset) -> Self {
        Self {
            device: device.into(),
            pin,
            ..Default::default()
        }
    }

    /// Set the bit period in microseconds
    pub fn with_bit_period_us(mut self, us: u32) -> Self {
        self.bit_period_us = us;
        self
    }

    /// PHY timing derived from this configuration
    pub fn phy_config(&self) -> PhyConfig {
        PhyConfig {
            bit_period_us: self.bit_period_us,
            start_bit_timeout: self.start_bit_timeout,
        }
    }
}

/// UPDI line on a Linux GPIO chip
pub struct LinuxGpioPin {
    request: Request,
    offset: Offset,
    direction: Direction,
}

impl LinuxGpioPin {
    /// Request the line as an input
    pub fn open(config: &LinuxGpioConfig) -> Result<Self> {
        if config.device.is_empty() {
            return Err(LinuxGpioError::NoDevice);
        }

        log::debug!("linux_gpio: Opening device {}", config.device);

        let mut req_config = Config::default();
        req_config.with_line(config.pin).as_input();

        let request = Request::from_config(req_config)
            .on_chip(&config.device)
            .with_consumer("updiprog")
            .request()
            .map_err(|source| LinuxGpioError::LineRequestFailed {
                device: config.device.clone(),
                offset: config.pin,
                source,
            })?;

        log::info!(
            "linux_gpio: Opened {} (pin={}, bit period {} us)",
            config.device,
            config.pin,
            config.bit_period_us
        );

        Ok(Self {
            request,
            offset: config.pin,
            direction: Direction::Input,
        })
    }

    /// Line offset in use
    pub fn offset(&self) -> Offset {
        self.offset
    }
}

impl Delay for LinuxGpioPin {
    fn delay_us(&mut self, us: u32) {
        StdDelay.delay_us(us);
    }
}

impl UpdiPin for LinuxGpioPin {
    fn set_direction(&mut self, dir: Direction) {
        if self.direction == dir {
            return;
        }

        let mut cfg = Config::default();
        match dir {
            // Idle level of the UART is high
            Direction::Output => cfg.with_line(self.offset).as_output(Value::Active),
            Direction::Input => cfg.with_line(self.offset).as_input(),
        };

        if let Err(e) = self.request.reconfigure(&cfg) {
            log::error!("Failed to configure UPDI line as {:?}: {}", dir, e);
        }
        self.direction = dir;
    }

    fn write_level(&mut self, high: bool) {
        let value = if high { Value::Active } else { Value::Inactive };
        if let Err(e) = self.request.set_value(self.offset, value) {
            log::error!("Failed to set UPDI line: {}", e);
        }
    }

    fn read_level(&mut self) -> bool {
        match self.request.value(self.offset) {
            Ok(Value::Active) => true,
            Ok(Value::Inactive) => false,
            Err(e) => {
                log::error!("Failed to get UPDI line: {}", e);
                // A floating line idles high
                true
            }
        }
    }
}

/// Parse programmer options from a list of key-value pairs
///
/// # Supported Options
///
/// - `dev=/dev/gpiochipN` - GPIO chip device path (required, or use gpiochip)
/// - `gpiochip=N` - GPIO chip number (alternative to dev)
/// - `pin=N` - UPDI GPIO line offset (optional, default 5)
/// - `bitlen=N` - bit period in microseconds (optional, default 1000)
/// - `timeout=N` - start-bit timeout in 1/8-bit ticks (optional, default 5000)
pub fn parse_options(options: &[(&str, &str)]) -> std::result::Result<LinuxGpioConfig, String> {
    let mut config = LinuxGpioConfig::default();
    let mut gpiochip: Option<u32> = None;

    for (key, value) in options {
        match *key {
            "dev" => {
                config.device = value.to_string();
            }
            "gpiochip" => {
                gpiochip = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid gpiochip value: {}", value))?,
                );
            }
            "pin" => {
                config.pin = value
                    .parse()
                    .map_err(|_| format!("Invalid pin value: {}", value))?;
            }
            "bitlen" => {
                let us: u32 = value
                    .parse()
                    .map_err(|_| format!("Invalid bitlen value: {}", value))?;
                config = config.with_bit_period_us(us);
            }
            "timeout" => {
                config.start_bit_timeout = value
                    .parse()
                    .map_err(|_| format!("Invalid timeout value: {}", value))?;
            }
            _ => {
                log::warn!("linux_gpio: Unknown option: {}={}", key, value);
            }
        }
    }

    // Handle dev vs gpiochip
    if config.device.is_empty() {
        if let Some(n) = gpiochip {
            if n > 9 {
                return Err("Maximum gpiochip number supported is 9".to_string());
            }
            config.device = format!("/dev/gpiochip{}", n);
        } else {
            return Err("Either 'dev' or 'gpiochip' must be specified.\n\
                 e.g. linux_gpio:dev=/dev/gpiochip0,pin=5"
                .to_string());
        }
    } else if gpiochip.is_some() {
        return Err("Only one of 'dev' or 'gpiochip' can be specified".to_string());
    }

    if config.bit_period_us == 0 {
        return Err("bitlen must be greater than zero".to_string());
    }
    if config.bit_period_us > MAX_BIT_PERIOD_US {
        return Err(format!("bitlen must be at most {} us", MAX_BIT_PERIOD_US));
    }

    Ok(config)
}
