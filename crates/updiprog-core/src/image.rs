//! In-memory firmware image

use crate::config::DeviceConfig;
use crate::constants::ERASED;

/// Flash and fuse contents to be programmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    pub(crate) flash: Vec<u8>,
    pub(crate) fuses: Option<Vec<u8>>,
    pub(crate) fuse_present: Vec<bool>,
    pub(crate) highest_used: usize,
}

impl FirmwareImage {
    /// An all-erased image sized for `config`
    pub fn blank(config: &DeviceConfig) -> Self {
        Self {
            flash: vec![ERASED; config.flash_len()],
            fuses: None,
            fuse_present: Vec::new(),
            highest_used: 0,
        }
    }

    /// An image holding `data` at flash offset 0
    ///
    /// Panics if `data` is larger than the device flash.
    pub fn from_flash(config: &DeviceConfig, data: &[u8]) -> Self {
        let mut image = Self::blank(config);
        image.flash[..data.len()].copy_from_slice(data);
        image.highest_used = data
            .iter()
            .rposition(|&b| b != ERASED)
            .map_or(0, |i| i + 1);
        image
    }

    /// Whole flash buffer (erased bytes included)
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// One past the last flash offset holding a non-erased byte
    pub fn highest_used(&self) -> usize {
        self.highest_used
    }

    /// Fuse buffer, present only if the image selected the fuse segment
    pub fn fuses(&self) -> Option<&[u8]> {
        self.fuses.as_deref()
    }

    /// (index, value) of every fuse byte the image actually sets
    pub fn fuse_values(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.fuses.iter().flat_map(move |fuses| {
            fuses
                .iter()
                .enumerate()
                .filter(move |(i, _)| self.fuse_present.get(*i).copied().unwrap_or(false))
                .map(|(i, &v)| (i, v))
        })
    }

    /// Slice of page `index`, clipped to the end of flash
    pub fn page(&self, index: usize, page_size: usize) -> &[u8] {
        let start = (index * page_size).min(self.flash.len());
        let end = (start + page_size).min(self.flash.len());
        &self.flash[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flash_watermark() {
        let cfg = DeviceConfig::default();
        let image = FirmwareImage::from_flash(&cfg, &[1, 2, 0xFF, 3, 0xFF, 0xFF]);
        assert_eq!(image.highest_used(), 4);
        assert_eq!(image.flash().len(), 8192);
        assert_eq!(image.page(0, 64)[..4], [1, 2, 0xFF, 3]);
        assert_eq!(image.page(127, 64).len(), 64);
        assert!(image.page(128, 64).is_empty());

        let blank = FirmwareImage::from_flash(&cfg, &[0xFF; 32]);
        assert_eq!(blank.highest_used(), 0);
        assert_eq!(blank.fuse_values().count(), 0);
    }
}
