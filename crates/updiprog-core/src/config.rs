//! Device memory map
//!
//! Parses device files in TOML format:
//!
//! ```toml
//! name = "ATtiny817"
//! flash_start = "0x8000"
//! flash_size = "8 KiB"
//! page_size = 64
//! syscfg_address = "0x0F00"
//! nvmctrl_address = "0x1000"
//! sigrow_address = "0x1100"
//! fuses_address = "0x1280"
//! fuse_count = 9
//! userrow_address = "0x1300"
//! ```
//!
//! Every field is optional; missing ones fall back to the ATtiny817 values.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::constants::MAX_BURST;
use crate::error::{Error, Result};

/// Memory map of the target device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Human-readable part name
    pub name: String,
    /// Data-space address of the first flash byte
    #[serde(deserialize_with = "deserialize_number")]
    pub flash_start: u32,
    /// Flash size in bytes
    #[serde(deserialize_with = "deserialize_number")]
    pub flash_size: u32,
    /// Flash page size in bytes
    #[serde(deserialize_with = "deserialize_number")]
    pub page_size: u32,
    /// SYSCFG base address
    #[serde(deserialize_with = "deserialize_number")]
    pub syscfg_address: u32,
    /// NVMCTRL base address
    #[serde(deserialize_with = "deserialize_number")]
    pub nvmctrl_address: u32,
    /// Signature row address
    #[serde(deserialize_with = "deserialize_number")]
    pub sigrow_address: u32,
    /// First fuse address
    #[serde(deserialize_with = "deserialize_number")]
    pub fuses_address: u32,
    /// Number of fuse bytes
    #[serde(deserialize_with = "deserialize_number")]
    pub fuse_count: u32,
    /// User row address
    #[serde(deserialize_with = "deserialize_number")]
    pub userrow_address: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::attiny817()
    }
}

impl DeviceConfig {
    /// ATtiny817 memory map
    pub fn attiny817() -> Self {
        Self {
            name: "ATtiny817".into(),
            flash_start: 0x8000,
            flash_size: 8 * 1024,
            page_size: 64,
            syscfg_address: 0x0F00,
            nvmctrl_address: 0x1000,
            sigrow_address: 0x1100,
            fuses_address: 0x1280,
            fuse_count: 9,
            userrow_address: 0x1300,
        }
    }

    /// Parse and validate a TOML device description
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("device file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML device description from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check that the map fits the 16-bit UPDI address space
    pub fn validate(&self) -> Result<()> {
        let page = self.page_size as usize;
        if !(2..=MAX_BURST).contains(&page) {
            return Err(Error::Config(format!(
                "page size {} outside [2, {}]",
                self.page_size, MAX_BURST
            )));
        }
        let flash_end = self.flash_start.checked_add(self.flash_size);
        if self.flash_size == 0 || flash_end.map_or(true, |end| end > 0x1_0000) {
            return Err(Error::Config(format!(
                "flash 0x{:X}+0x{:X} does not fit in 16-bit data space",
                self.flash_start, self.flash_size
            )));
        }
        if self.flash_size % self.page_size != 0 {
            return Err(Error::Config(format!(
                "flash size {} is not a whole number of {}-byte pages",
                self.flash_size, self.page_size
            )));
        }
        for (name, addr) in [
            ("syscfg_address", self.syscfg_address),
            ("nvmctrl_address", self.nvmctrl_address),
            ("sigrow_address", self.sigrow_address),
            ("fuses_address", self.fuses_address),
            ("userrow_address", self.userrow_address),
        ] {
            if addr > 0xFFFF {
                return Err(Error::Config(format!("{} 0x{:X} out of range", name, addr)));
            }
        }
        let fuses_end = self.fuses_address.checked_add(self.fuse_count);
        if fuses_end.map_or(true, |end| end > 0x1_0000) {
            return Err(Error::Config("fuse table out of range".into()));
        }
        Ok(())
    }

    /// Flash size in bytes
    pub fn flash_len(&self) -> usize {
        self.flash_size as usize
    }

    /// Page size in bytes
    pub fn page_len(&self) -> usize {
        self.page_size as usize
    }

    /// Number of pages needed to cover `bytes`
    pub fn pages_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.page_len())
    }

    /// Data-space address of page `index`
    pub fn page_address(&self, index: usize) -> u16 {
        (self.flash_start as usize + index * self.page_len()) as u16
    }

    /// Data-space address of an NVMCTRL register
    pub fn nvmctrl(&self, offset: u16) -> u16 {
        self.nvmctrl_address as u16 + offset
    }
}

/// Deserialize a number that can be an integer, hex (0x...) or a size string
fn deserialize_number<'de, D>(deserializer: D) -> core::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u32),
        Str(String),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

/// Parse "0x1280", "4096" or "8 KiB"
pub fn parse_number(s: &str) -> core::result::Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u32::from_str_radix(hex.trim(), 16).map_err(|e| format!("invalid hex: {}", e));
    }
    if let Ok(n) = s.parse::<u32>() {
        return Ok(n);
    }

    let lower = s.to_lowercase();
    let (num, multiplier) = if let Some(n) = lower.strip_suffix("kib") {
        (n.trim(), 1024)
    } else if let Some(n) = lower.strip_suffix("kb") {
        (n.trim(), 1024)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n.trim(), 1)
    } else {
        return Err(format!("invalid number: {}", s));
    };

    let n = num
        .parse::<u32>()
        .map_err(|e| format!("invalid number '{}': {}", s, e))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| format!("number too large: {}", s))
}
