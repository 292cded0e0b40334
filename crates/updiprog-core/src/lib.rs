//! updiprog-core - Core library for single-wire UPDI programming
//!
//! The stack is layered bottom-up:
//!
//! - [`phy`] bit-bangs UART frames (8E2) on one pin through [`pin::UpdiPin`]
//! - [`link`] builds UPDI instructions and checks acknowledgements
//! - [`app`] handles programming mode, NVM commands and page access
//! - [`nvm`] walks the flash with erase, blank-check, program and verify
//! - [`ihex`] loads Intel-HEX images into a [`image::FirmwareImage`]
//!
//! # Example
//!
//! ```ignore
//! use updiprog_core::{app::UpdiDevice, config::DeviceConfig, ihex, nvm};
//!
//! fn flash<T: updiprog_core::link::UpdiTransport>(transport: T, path: &std::path::Path) {
//!     let config = DeviceConfig::default();
//!     let image = ihex::load(path, &config).unwrap();
//!     let mut dev = UpdiDevice::new(transport, config);
//!     let mut progress = nvm::NoProgress;
//!     nvm::chip_erase(&mut dev, &mut progress).unwrap();
//!     nvm::blank_check(&mut dev, &mut progress).unwrap();
//!     nvm::program(&mut dev, &image, &mut progress).unwrap();
//!     nvm::verify(&mut dev, &image, &mut progress).unwrap();
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod app;
pub mod config;
pub mod constants;
pub mod error;
pub mod ihex;
pub mod image;
pub mod link;
pub mod nvm;
pub mod phy;
pub mod pin;
pub mod poll;

pub use error::{Error, FormatKind, Result};
