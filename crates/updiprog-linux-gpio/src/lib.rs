//! updiprog-linux-gpio - Linux GPIO pin for bit-banged UPDI
//!
//! This crate drives the single UPDI wire from one GPIO line using the
//! Linux character device interface (gpiocdev). All UART timing is done in
//! software by `updiprog_core::phy`, so any GPIO line will do, at the cost
//! of a slow bit rate.
//!
//! # Example
//!
//! ```no_run
//! use updiprog_core::app::UpdiDevice;
//! use updiprog_core::config::DeviceConfig;
//! use updiprog_core::phy::Phy;
//! use updiprog_linux_gpio::{LinuxGpioConfig, LinuxGpioPin};
//!
//! let config = LinuxGpioConfig::new("/dev/gpiochip0", 5);
//! let pin = LinuxGpioPin::open(&config)?;
//! let phy = Phy::initialize(pin, config.phy_config())?;
//!
//! let mut dev = UpdiDevice::new(phy, DeviceConfig::default());
//! dev.link_init()?;
//! let sig = dev.read_signature()?;
//! println!("Signature: {:02X} {:02X} {:02X}", sig[0], sig[1], sig[2]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Usage with updiprog CLI
//!
//! ```bash
//! # Default pin 5, 1 ms bit period
//! updiprog info -p linux_gpio:dev=/dev/gpiochip0
//!
//! # Using gpiochip number, another line and a faster bit rate
//! updiprog flash -p linux_gpio:gpiochip=0,pin=17,bitlen=200 firmware.hex
//! ```
//!
//! # Wiring
//!
//! | Target Pin | Connection |
//! |------------|------------|
//! | UPDI       | GPIO line through a 4.7k series resistor |
//! | VCC        | 3.3V |
//! | GND        | GND |
//!
//! # System Requirements
//!
//! - Linux kernel 4.8+ with GPIO character device support (kernel 5.5+ for v2 API)
//! - Access to `/dev/gpiochipN` devices (may require root or udev rules)

pub mod device;
pub mod error;

// Re-exports
pub use device::{parse_options, LinuxGpioConfig, LinuxGpioPin};
pub use error::{LinuxGpioError, Result};

use updiprog_core::link::UpdiTransport;
use updiprog_core::phy::Phy;

/// Open a Linux GPIO UPDI pin and return a boxed transport
///
/// This is a convenience function for use in the CLI programmer dispatch.
///
/// # Example Options
///
/// - `dev=/dev/gpiochip0` - GPIO chip device path (or use gpiochip=N)
/// - `gpiochip=0` - GPIO chip number (alternative to dev)
/// - `pin=5` - UPDI GPIO line offset
/// - `bitlen=1000` - bit period in microseconds
pub fn open_linux_gpio(
    options: &[(&str, &str)],
) -> std::result::Result<Box<dyn UpdiTransport>, Box<dyn std::error::Error>> {
    let config = parse_options(options)?;
    let pin = LinuxGpioPin::open(&config)?;
    let phy = Phy::initialize(pin, config.phy_config()).map_err(LinuxGpioError::from)?;
    Ok(Box::new(phy))
}
