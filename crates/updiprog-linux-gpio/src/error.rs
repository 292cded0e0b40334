//! Error types for the Linux GPIO pin

use thiserror::Error;

/// Linux GPIO specific errors
#[derive(Debug, Error)]
pub enum LinuxGpioError {
    /// Failed to request the UPDI line
    #[error("Failed to request GPIO line {offset} on '{device}': {source}")]
    LineRequestFailed {
        device: String,
        offset: u32,
        #[source]
        source: gpiocdev::Error,
    },

    /// GPIO chip or device not specified
    #[error("No GPIO chip specified. Use dev=/dev/gpiochipN or gpiochip=N")]
    NoDevice,

    /// PHY rejected the timing parameters
    #[error("Invalid UPDI timing: {0}")]
    Phy(#[from] updiprog_core::Error),
}

/// Result type for Linux GPIO operations
pub type Result<T> = std::result::Result<T, LinuxGpioError>;
