//! Intel-HEX loading and writing
//!
//! Records look like `:LLAAAATT[DD...]CC`. Only three record types are
//! understood:
//!
//! | Type | Meaning |
//! |------|---------|
//! | 00   | Data, routed to the segment currently selected |
//! | 01   | End of file |
//! | 04   | Extended linear address: 0x0000 selects flash, 0x0082 fuses |
//!
//! Flash data addresses may be given either as flash offsets (0x0000...)
//! or as memory-mapped data-space addresses (0x8000... on tinyAVR).
//!
//! The trailing checksum byte is counted in the record length but never
//! verified, so files with stale checksums that loaded before still load.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::config::DeviceConfig;
use crate::constants::ERASED;
use crate::error::{Error, FormatKind, Result};
use crate::image::FirmwareImage;

/// Shortest valid record, `:00000001FF`
const MIN_RECORD_LEN: usize = 11;

const OFFS_LEN: usize = 1;
const OFFS_ADDR: usize = 3;
const OFFS_TYPE: usize = 7;
const OFFS_DATA: usize = 9;

/// Extended linear address selecting flash
pub const CODE_SEGMENT: u16 = 0x0000;
/// Extended linear address selecting the fuse table
pub const FUSE_SEGMENT: u16 = 0x0082;

/// Bytes per data record when writing
const WRITE_RECORD_LEN: usize = 16;

/// Intel-HEX record type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordType {
    Data,
    EndOfFile,
    ExtendedLinearAddress,
}

impl RecordType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Data),
            0x01 => Some(Self::EndOfFile),
            0x04 => Some(Self::ExtendedLinearAddress),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Code,
    Fuse,
}

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Record being decoded, with its line number for error reporting
struct Record<'a> {
    line: usize,
    text: &'a [u8],
}

impl Record<'_> {
    fn error(&self, kind: FormatKind) -> Error {
        Error::Format {
            line: self.line,
            kind,
        }
    }

    fn byte(&self, offset: usize) -> Result<u8> {
        let hi = nibble(self.text[offset]);
        let lo = nibble(self.text[offset + 1]);
        match (hi, lo) {
            (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
            _ => Err(self.error(FormatKind::InvalidDigit(offset))),
        }
    }

    fn data(&self, index: usize) -> Result<u8> {
        self.byte(OFFS_DATA + index * 2)
    }
}

/// Parse Intel-HEX text into a firmware image for `config`
///
/// Nothing is returned on error; partially filled buffers are dropped.
pub fn parse<R: BufRead>(reader: R, config: &DeviceConfig) -> Result<FirmwareImage> {
    let mut image = FirmwareImage::blank(config);
    let mut segment = Segment::Code;
    let fuse_count = config.fuse_count as usize;
    let flash_start = config.flash_start as usize;
    let mut last_line = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let text = line.trim_end();
        let record = Record {
            line: index + 1,
            text: text.as_bytes(),
        };
        last_line = record.line;

        if text.len() < MIN_RECORD_LEN {
            return Err(record.error(FormatKind::TooShort));
        }
        if !text.starts_with(':') {
            return Err(record.error(FormatKind::MissingStartCode));
        }

        let len = record.byte(OFFS_LEN)? as usize;
        let addr = u16::from_be_bytes([record.byte(OFFS_ADDR)?, record.byte(OFFS_ADDR + 2)?]);
        let rtype = record.byte(OFFS_TYPE)?;

        if len * 2 + MIN_RECORD_LEN != text.len() {
            return Err(record.error(FormatKind::LengthMismatch));
        }

        match RecordType::from_u8(rtype) {
            Some(RecordType::Data) => match segment {
                Segment::Code => {
                    let mut offset = addr as usize;
                    if offset >= flash_start && flash_start > 0 {
                        offset -= flash_start;
                    }
                    for i in 0..len {
                        let at = offset + i;
                        if at >= image.flash.len() {
                            return Err(record.error(FormatKind::OutOfRange(at)));
                        }
                        let byte = record.data(i)?;
                        if byte != ERASED && at >= image.highest_used {
                            image.highest_used = at + 1;
                        }
                        image.flash[at] = byte;
                    }
                }
                Segment::Fuse => {
                    let Some(fuses) = image.fuses.as_mut() else {
                        return Err(record.error(FormatKind::NoFuseBuffer));
                    };
                    for i in 0..len {
                        let at = addr as usize + i;
                        if at >= fuse_count {
                            return Err(record.error(FormatKind::OutOfRange(at)));
                        }
                        fuses[at] = record.data(i)?;
                        image.fuse_present[at] = true;
                    }
                }
            },
            Some(RecordType::EndOfFile) => {
                log::debug!(
                    "ihex: end of file at line {}, {} flash bytes used",
                    record.line,
                    image.highest_used
                );
                return Ok(image);
            }
            Some(RecordType::ExtendedLinearAddress) => {
                if len != 2 {
                    return Err(record.error(FormatKind::LengthMismatch));
                }
                let value = u16::from_be_bytes([record.data(0)?, record.data(1)?]);
                segment = match value {
                    CODE_SEGMENT => Segment::Code,
                    FUSE_SEGMENT => {
                        if image.fuses.is_none() {
                            image.fuses = Some(vec![ERASED; fuse_count]);
                            image.fuse_present = vec![false; fuse_count];
                        }
                        Segment::Fuse
                    }
                    other => return Err(record.error(FormatKind::UnknownSegment(other))),
                };
                log::trace!("ihex: line {}: segment {:?}", record.line, segment);
            }
            None => return Err(record.error(FormatKind::UnsupportedRecord(rtype))),
        }
    }

    Err(Error::Format {
        line: last_line + 1,
        kind: FormatKind::MissingEndOfFile,
    })
}

/// Parse an Intel-HEX string
pub fn parse_str(text: &str, config: &DeviceConfig) -> Result<FirmwareImage> {
    parse(text.as_bytes(), config)
}

/// Load an Intel-HEX file from disk
pub fn load(path: &Path, config: &DeviceConfig) -> Result<FirmwareImage> {
    let file = File::open(path)?;
    parse(BufReader::new(file), config)
}

fn write_record<W: Write>(out: &mut W, addr: u16, rtype: u8, data: &[u8]) -> Result<()> {
    let [hi, lo] = addr.to_be_bytes();
    let mut sum = (data.len() as u8)
        .wrapping_add(hi)
        .wrapping_add(lo)
        .wrapping_add(rtype);
    write!(out, ":{:02X}{:04X}{:02X}", data.len(), addr, rtype)?;
    for &b in data {
        write!(out, "{:02X}", b)?;
        sum = sum.wrapping_add(b);
    }
    writeln!(out, "{:02X}", sum.wrapping_neg())?;
    Ok(())
}

/// Write `data` as Intel-HEX starting at flash offset `offset`
///
/// Records that are entirely erased are skipped. Checksums are computed.
pub fn write_image<W: Write>(out: &mut W, offset: u16, data: &[u8]) -> Result<()> {
    for (n, chunk) in data.chunks(WRITE_RECORD_LEN).enumerate() {
        if chunk.iter().all(|&b| b == ERASED) {
            continue;
        }
        let addr = offset.wrapping_add((n * WRITE_RECORD_LEN) as u16);
        write_record(out, addr, 0x00, chunk)?;
    }
    write_record(out, 0, 0x01, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DeviceConfig {
        DeviceConfig::default()
    }

    fn format_err(res: Result<FirmwareImage>) -> (usize, FormatKind) {
        match res {
            Err(Error::Format { line, kind }) => (line, kind),
            other => panic!("expected format error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_sixteen_byte_record_at_mapped_address() {
        let hex = ":10800000000102030405060708090A0B0C0D0E0F00\n:00000001FF\n";
        let image = parse_str(hex, &cfg()).unwrap();
        assert_eq!(image.highest_used(), 16);
        assert_eq!(&image.flash()[..16], &(0u8..16).collect::<Vec<_>>()[..]);
        assert!(image.flash()[16..].iter().all(|&b| b == 0xFF));
        assert!(image.fuses().is_none());
    }

    #[test]
    fn test_flash_offset_addresses() {
        let hex = ":0400100011223344FF\r\n:00000001FF\r\n";
        let image = parse_str(hex, &cfg()).unwrap();
        assert_eq!(&image.flash()[0x10..0x14], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(image.highest_used(), 0x14);
    }

    #[test]
    fn test_trailing_erased_bytes_not_counted() {
        let hex = ":0800000001020304FFFFFFFFFF\n:00000001FF\n";
        let image = parse_str(hex, &cfg()).unwrap();
        assert_eq!(image.highest_used(), 4);
    }

    #[test]
    fn test_all_erased_payload() {
        let hex = ":04000000FFFFFFFFFC\n:00000001FF\n";
        let image = parse_str(hex, &cfg()).unwrap();
        assert_eq!(image.highest_used(), 0);
    }

    #[test]
    fn test_checksum_not_validated() {
        let hex = ":0100000042AA\n:00000001FF\n";
        let image = parse_str(hex, &cfg()).unwrap();
        assert_eq!(image.flash()[0], 0x42);
    }

    #[test]
    fn test_fuse_segment() {
        let hex = "\
:020000040082F8
:0300010011223376
:020000040000FA
:0100000055AA
:00000001FF
";
        let image = parse_str(hex, &cfg()).unwrap();
        let fuses = image.fuses().unwrap();
        assert_eq!(fuses.len(), 9);
        assert_eq!(&fuses[1..4], &[0x11, 0x22, 0x33]);
        assert_eq!(
            image.fuse_values().collect::<Vec<_>>(),
            vec![(1, 0x11), (2, 0x22), (3, 0x33)]
        );
        assert_eq!(image.flash()[0], 0x55);
        assert_eq!(image.highest_used(), 1);
    }

    #[test]
    fn test_format_errors() {
        let c = cfg();
        assert_eq!(format_err(parse_str(":0000\n", &c)), (1, FormatKind::TooShort));
        assert_eq!(
            format_err(parse_str(":0200000011FF\n", &c)),
            (1, FormatKind::LengthMismatch)
        );
        assert_eq!(
            format_err(parse_str(":00000005FB\n", &c)),
            (1, FormatKind::UnsupportedRecord(5))
        );
        assert_eq!(
            format_err(parse_str(":020000040001F9\n", &c)),
            (1, FormatKind::UnknownSegment(1))
        );
        assert_eq!(
            format_err(parse_str(":01200000AA35\n:00000001FF\n", &c)),
            (1, FormatKind::OutOfRange(0x2000))
        );
        assert_eq!(
            format_err(parse_str(":01000000ZZ00\n", &c)).1,
            FormatKind::InvalidDigit(9)
        );
        assert_eq!(
            format_err(parse_str(":0100000042AA\n", &c)),
            (2, FormatKind::MissingEndOfFile)
        );
        assert_eq!(
            format_err(parse_str("\n:00000001FF\n", &c)),
            (1, FormatKind::TooShort)
        );
    }

    #[test]
    fn test_fuse_out_of_range() {
        let hex = ":020000040082F8\n:01000900AA4C\n:00000001FF\n";
        assert_eq!(
            format_err(parse_str(hex, &cfg())),
            (2, FormatKind::OutOfRange(9))
        );
    }

    #[test]
    fn test_write_image_reloads() {
        let mut data = vec![0xFFu8; 64];
        data[0..3].copy_from_slice(&[0x0C, 0x94, 0x34]);
        data[40] = 0x00;

        let mut out = Vec::new();
        write_image(&mut out, 0, &data).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(":100000000C9434FFFFFFFFFFFFFFFFFFFFFFFFFF"));
        assert!(text.ends_with(":00000001FF\n"));
        assert_eq!(text.lines().count(), 3);

        let image = parse_str(&text, &cfg()).unwrap();
        assert_eq!(&image.flash()[..64], &data[..]);
        assert_eq!(image.highest_used(), 41);
    }

    #[test]
    fn test_written_checksum() {
        let mut out = Vec::new();
        write_record(&mut out, 0x0010, 0x00, &[0x11, 0x22, 0x33, 0x44]).unwrap();
        // 04 + 00 + 10 + 00 + 11 + 22 + 33 + 44 = 0xB8 -> 0x48
        assert_eq!(String::from_utf8(out).unwrap(), ":040010001122334448\n");
    }
}
