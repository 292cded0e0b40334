//! UPDI protocol constants
//!
//! Opcodes, control/status register addresses and NVM controller layout for
//! tinyAVR 0/1-series and megaAVR 0-series parts.

use bitflags::bitflags;

/// Synchronization character opening every frame
pub const SYNC: u8 = 0x55;
/// Acknowledge byte returned after stores
pub const ACK: u8 = 0x40;

// Instruction opcodes (upper three bits)
/// Load from data space, direct addressing
pub const LDS: u8 = 0x00;
/// Store to data space, direct addressing
pub const STS: u8 = 0x40;
/// Load from data space, indirect addressing
pub const LD: u8 = 0x20;
/// Store to data space, indirect addressing
pub const ST: u8 = 0x60;
/// Load from control/status space
pub const LDCS: u8 = 0x80;
/// Store to control/status space
pub const STCS: u8 = 0xC0;
/// Set instruction repeat counter
pub const REPEAT: u8 = 0xA0;
/// Key or SIB transfer
pub const KEY: u8 = 0xE0;

// Pointer modes for LD/ST
/// Access through the pointer
pub const PTR: u8 = 0x00;
/// Access through the pointer with post-increment
pub const PTR_INC: u8 = 0x04;
/// Write the pointer register itself
pub const PTR_ADDRESS: u8 = 0x08;

// Address and data sizes
/// 8-bit address operand
pub const ADDRESS_8: u8 = 0x00;
/// 16-bit address operand
pub const ADDRESS_16: u8 = 0x04;
/// Byte data
pub const DATA_8: u8 = 0x00;
/// Word data
pub const DATA_16: u8 = 0x01;

// KEY instruction variants
/// Send a key (as opposed to reading the SIB)
pub const KEY_KEY: u8 = 0x00;
/// 64-bit key size
pub const KEY_64: u8 = 0x00;

/// Repeat counter given as a word
pub const REPEAT_WORD: u8 = 0x01;

/// Largest repeat counter value; bursts hold at most this plus one bytes
pub const MAX_REPEAT_SIZE: usize = 0xFF;
/// Longest pointer burst the protocol allows
pub const MAX_BURST: usize = MAX_REPEAT_SIZE + 1;

/// NVM programming key, as written in the datasheet
pub const KEY_NVM: &[u8; 8] = b"NVMProg ";

// Control/status space registers
/// UPDI STATUSA
pub const CS_STATUSA: u8 = 0x00;
/// UPDI STATUSB
pub const CS_STATUSB: u8 = 0x01;
/// UPDI CTRLA
pub const CS_CTRLA: u8 = 0x02;
/// UPDI CTRLB
pub const CS_CTRLB: u8 = 0x03;
/// ASI key status
pub const ASI_KEY_STATUS: u8 = 0x07;
/// ASI reset request
pub const ASI_RESET_REQ: u8 = 0x08;
/// ASI system status
pub const ASI_SYS_STATUS: u8 = 0x0B;

/// Value written to ASI_RESET_REQ to hold the core in reset
pub const RESET_REQ_VALUE: u8 = 0x59;

bitflags! {
    /// UPDI CTRLA bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CtrlA: u8 {
        /// Inter-byte delay enable
        const IBDLY = 1 << 7;
    }

    /// UPDI CTRLB bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CtrlB: u8 {
        /// Collision and contention detection disable
        const CCDETDIS = 1 << 3;
        /// Disable the UPDI interface
        const UPDIDIS = 1 << 2;
    }

    /// ASI_KEY_STATUS bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeyStatus: u8 {
        /// User row write key accepted
        const UROWWRITE = 1 << 5;
        /// NVM programming key accepted
        const NVMPROG = 1 << 4;
        /// Chip erase key accepted
        const CHIPERASE = 1 << 3;
    }

    /// ASI_SYS_STATUS bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SysStatus: u8 {
        /// System reset active
        const RSTSYS = 1 << 5;
        /// Core in sleep
        const INSLEEP = 1 << 4;
        /// NVM programming mode active
        const NVMPROG = 1 << 3;
        /// User row programming active
        const UROWPROG = 1 << 2;
        /// Device locked
        const LOCKSTATUS = 1 << 0;
    }

    /// NVMCTRL STATUS bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NvmStatus: u8 {
        /// Last operation failed
        const WRITE_ERROR = 1 << 2;
        /// EEPROM busy
        const EEPROM_BUSY = 1 << 1;
        /// Flash busy
        const FLASH_BUSY = 1 << 0;
    }
}

// NVMCTRL register offsets
/// Command register
pub const NVMCTRL_CTRLA: u16 = 0x00;
/// Status register
pub const NVMCTRL_STATUS: u16 = 0x02;
/// Data low byte
pub const NVMCTRL_DATAL: u16 = 0x06;
/// Address low byte
pub const NVMCTRL_ADDRL: u16 = 0x08;
/// Address high byte
pub const NVMCTRL_ADDRH: u16 = 0x09;

/// NVM controller commands written to NVMCTRL.CTRLA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NvmCommand {
    /// No operation
    Nop = 0x00,
    /// Write the page buffer to the addressed page
    WritePage = 0x01,
    /// Erase the addressed page
    ErasePage = 0x02,
    /// Erase, then write the page buffer
    EraseWritePage = 0x03,
    /// Clear the page buffer
    PageBufferClear = 0x04,
    /// Erase flash and EEPROM
    ChipErase = 0x05,
    /// Erase EEPROM
    EraseEeprom = 0x06,
    /// Write a fuse from NVMCTRL.DATA at NVMCTRL.ADDR
    WriteFuse = 0x07,
}

impl NvmCommand {
    /// Decode a command byte
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::Nop,
            0x01 => Self::WritePage,
            0x02 => Self::ErasePage,
            0x03 => Self::EraseWritePage,
            0x04 => Self::PageBufferClear,
            0x05 => Self::ChipErase,
            0x06 => Self::EraseEeprom,
            0x07 => Self::WriteFuse,
            _ => return None,
        })
    }
}

/// Byte value of erased flash
pub const ERASED: u8 = 0xFF;
