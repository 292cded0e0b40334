//! CLI command implementations
//!
//! Each command works on an already-open
//! [`UpdiDevice`](updiprog_core::app::UpdiDevice) over any transport, so
//! the same code drives the GPIO programmer and the emulated target.
//! Failures are collected in [`CommandError`], which also decides the
//! process exit code.

mod flash;
mod info;
mod list;
mod progress;
mod read;

pub use flash::{run_blank_check, run_erase, run_flash, run_fuses, run_verify, FlashOptions};
pub use info::run_info;
pub use list::list_programmers;
pub use progress::IndicatifProgress;
pub use read::run_read;

use std::path::{Path, PathBuf};
use thiserror::Error;
use updiprog_core::config::DeviceConfig;
use updiprog_core::image::FirmwareImage;
use updiprog_core::ihex;
use updiprog_core::nvm::{Failure, Pass, PassError};

/// Error of a CLI command
#[derive(Debug, Error)]
pub enum CommandError {
    /// The programmer or the UPDI link could not be brought up
    #[error("failed to initialize programmer: {0}")]
    Init(String),

    /// Device description or Intel-HEX file could not be loaded
    #[error("failed to load {}: {source}", .path.display())]
    Parse {
        /// File being loaded
        path: PathBuf,
        /// What went wrong
        #[source]
        source: updiprog_core::Error,
    },

    /// An NVM pass gave up
    #[error("{0} (code {code})", code = .0.code())]
    Pass(#[from] PassError),

    /// Any other device error
    #[error(transparent)]
    Device(#[from] updiprog_core::Error),

    /// Output file could not be written
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CommandError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Init(_) => 2,
            Self::Parse { .. } => 3,
            // Target never came up, so no page was touched
            Self::Pass(e) if is_link_down(e) => 2,
            Self::Pass(e) => match e.pass {
                Pass::ChipErase | Pass::BlankCheck => 4,
                Pass::Program | Pass::Fuses => 5,
                Pass::Verify => 6,
                Pass::Read => 1,
            },
            Self::Device(_) | Self::Io(_) => 1,
        }
    }
}

fn is_link_down(e: &PassError) -> bool {
    e.failure == Failure::Link && matches!(e.source, Some(updiprog_core::Error::LinkDown))
}

/// Load the device description, or the built-in default
pub fn load_device_config(path: Option<&Path>) -> Result<DeviceConfig, CommandError> {
    match path {
        Some(path) => {
            let config = DeviceConfig::load(path).map_err(|source| CommandError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            log::info!("Loaded device description {:?} ({})", path, config.name);
            Ok(config)
        }
        None => Ok(DeviceConfig::default()),
    }
}

/// Load an Intel-HEX image for `config`
pub fn load_image(path: &Path, config: &DeviceConfig) -> Result<FirmwareImage, CommandError> {
    let image = ihex::load(path, config).map_err(|source| CommandError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    println!(
        "Loaded {:?}: {} bytes of flash{}",
        path,
        image.highest_used(),
        if image.fuses().is_some() {
            ", fuses"
        } else {
            ""
        }
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use updiprog_core::FormatKind;

    fn pass_error(pass: Pass, failure: Failure) -> CommandError {
        CommandError::Pass(PassError {
            pass,
            page: 3,
            failure,
            source: None,
        })
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(CommandError::Init("no line".into()).exit_code(), 2);
        let parse = CommandError::Parse {
            path: PathBuf::from("fw.hex"),
            source: updiprog_core::Error::Format {
                line: 1,
                kind: FormatKind::TooShort,
            },
        };
        assert_eq!(parse.exit_code(), 3);
        assert_eq!(pass_error(Pass::ChipErase, Failure::Command).exit_code(), 4);
        assert_eq!(pass_error(Pass::BlankCheck, Failure::NotBlank).exit_code(), 4);
        assert_eq!(pass_error(Pass::Program, Failure::Mismatch).exit_code(), 5);
        assert_eq!(pass_error(Pass::Verify, Failure::Mismatch).exit_code(), 6);
        let link_down = CommandError::Pass(PassError {
            pass: Pass::Program,
            page: 0,
            failure: Failure::Link,
            source: Some(updiprog_core::Error::LinkDown),
        });
        assert_eq!(link_down.exit_code(), 2);
        assert_eq!(pass_error(Pass::Verify, Failure::Link).exit_code(), 6);
        assert_eq!(
            CommandError::Device(updiprog_core::Error::LinkDown).exit_code(),
            1
        );
    }

    #[test]
    fn test_load_image_parse_error() {
        let path = std::env::temp_dir().join("updiprog-test-missing.hex");
        let err = load_image(&path, &DeviceConfig::default()).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
