//! updiprog-dummy - Emulated UPDI target for testing
//!
//! This crate provides a dummy transport that emulates a tinyAVR target
//! behind the UPDI wire. It decodes the byte stream the link layer sends
//! (SYNC, instruction, operands) and answers like the device would, so the
//! whole stack above the PHY can run without hardware.
//!
//! Emulated:
//! - control/status space (STATUSA, CTRLA/B, key status, reset, system status)
//! - NVM key and the reset-toggle unlock sequence
//! - LDS/STS, pointer LD/ST with post-increment, REPEAT
//! - NVMCTRL with page buffer, page write/erase, chip erase, fuse write
//! - signature row and fuses
//!
//! Faults can be injected to exercise the retry paths of the NVM passes.

use std::collections::{BTreeMap, VecDeque};

use updiprog_core::config::DeviceConfig;
use updiprog_core::constants::*;
use updiprog_core::error::Result;
use updiprog_core::link::UpdiTransport;
use updiprog_core::poll::Delay;

/// Configuration for the dummy target
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Memory map of the emulated part
    pub device: DeviceConfig,
    /// Signature row contents
    pub signature: [u8; 3],
    /// UPDI STATUSA value (revision in the upper nibble)
    pub updi_revision: u8,
    /// STATUS reads that report busy after each NVM command
    pub busy_polls: u32,
    /// Device starts locked (LOCKSTATUS set until unlocked via the NVM key)
    pub locked: bool,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::attiny817(),
            signature: [0x1E, 0x93, 0x20], // ATtiny817
            updi_revision: 0x10,
            busy_polls: 2,
            locked: false,
        }
    }
}

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Double breaks seen
    pub double_breaks: usize,
    /// WRITE_PAGE / ERASE_WRITE_PAGE commands
    pub page_writes: usize,
    /// ERASE_PAGE commands
    pub page_erases: usize,
    /// CHIP_ERASE commands
    pub chip_erases: usize,
    /// Pointer burst reads
    pub burst_reads: usize,
    /// WRITE_FUSE commands
    pub fuse_writes: usize,
}

/// Receive state of the emulated UPDI state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    /// Waiting for SYNC
    Idle,
    /// SYNC seen, next byte is the instruction
    Opcode,
    /// Collecting instruction operands
    Operands { op: u8, bytes: [u8; 2], have: usize, need: usize },
    /// STS address acknowledged, waiting for the value
    StsValue { address: u16 },
    /// Pointer store, `remaining` data bytes to come
    StPtrData { remaining: usize, increment: bool },
    /// KEY instruction, collecting 8 key bytes
    Key { bytes: [u8; 8], have: usize },
    /// CTRLB.UPDIDIS set; only a double break brings the interface back
    Disabled,
}

/// Emulated UPDI target
pub struct DummyUpdi {
    config: DummyConfig,
    flash: Vec<u8>,
    fuses: Vec<u8>,
    sram: BTreeMap<u16, u8>,
    nvm_regs: [u8; 16],

    page_buffer: Vec<u8>,
    buffer_mask: Vec<bool>,
    buffer_page: Option<usize>,

    state: RxState,
    outbox: VecDeque<u8>,
    pointer: u16,
    repeat: usize,

    ctrla: u8,
    ctrlb: u8,
    key_status: KeyStatus,
    in_reset: bool,
    prog_mode: bool,
    locked: bool,
    busy: u32,
    write_error: bool,

    connected: bool,
    drop_replies: usize,
    lost_page_writes: usize,
    fail_page_erase: bool,

    stats: DummyStats,
    elapsed_us: u64,
}

impl DummyUpdi {
    /// Create a new dummy target with the given configuration
    pub fn new(config: DummyConfig) -> Self {
        let flash = vec![ERASED; config.device.flash_len()];
        let fuses = vec![0x00; config.device.fuse_count as usize];
        let page = config.device.page_len();
        let locked = config.locked;
        Self {
            config,
            flash,
            fuses,
            sram: BTreeMap::new(),
            nvm_regs: [0; 16],
            page_buffer: vec![ERASED; page],
            buffer_mask: vec![false; page],
            buffer_page: None,
            state: RxState::Idle,
            outbox: VecDeque::new(),
            pointer: 0,
            repeat: 0,
            ctrla: 0,
            ctrlb: 0,
            key_status: KeyStatus::empty(),
            in_reset: false,
            prog_mode: false,
            locked,
            busy: 0,
            write_error: false,
            connected: true,
            drop_replies: 0,
            lost_page_writes: 0,
            fail_page_erase: false,
            stats: DummyStats::default(),
            elapsed_us: 0,
        }
    }

    /// Create a new dummy target with default configuration (ATtiny817)
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Flash contents
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Mutable flash contents
    pub fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    /// Fuse contents
    pub fn fuses(&self) -> &[u8] {
        &self.fuses
    }

    /// Operation counters
    pub fn stats(&self) -> DummyStats {
        self.stats
    }

    /// Virtual time spent in delays and timeouts
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_us
    }

    /// Whether the target is in NVM programming mode
    pub fn is_prog_mode(&self) -> bool {
        self.prog_mode
    }

    /// Disconnect or reconnect the wire
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Swallow the next `n` bytes the target would send
    pub fn drop_replies(&mut self, n: usize) {
        self.drop_replies = n;
    }

    /// Ignore the next `n` page write commands
    pub fn lose_page_writes(&mut self, n: usize) {
        self.lost_page_writes = n;
    }

    /// Make ERASE_PAGE report a write error
    pub fn fail_page_erase(&mut self, fail: bool) {
        self.fail_page_erase = fail;
    }

    fn reply(&mut self, byte: u8) {
        if self.drop_replies > 0 {
            self.drop_replies -= 1;
            log::trace!("dummy: dropping reply 0x{:02X}", byte);
            return;
        }
        self.outbox.push_back(byte);
    }

    fn flash_offset(&self, address: u16) -> Option<usize> {
        let start = self.config.device.flash_start as usize;
        let address = address as usize;
        (address >= start && address < start + self.flash.len()).then(|| address - start)
    }

    fn fuse_index(&self, address: u16) -> Option<usize> {
        let start = self.config.device.fuses_address as usize;
        let address = address as usize;
        (address >= start && address < start + self.fuses.len()).then(|| address - start)
    }

    fn nvmctrl_offset(&self, address: u16) -> Option<usize> {
        let start = self.config.device.nvmctrl_address as usize;
        let address = address as usize;
        (address >= start && address < start + self.nvm_regs.len()).then(|| address - start)
    }

    fn sys_status(&self) -> SysStatus {
        let mut status = SysStatus::empty();
        if self.prog_mode {
            status |= SysStatus::NVMPROG;
        }
        if self.locked {
            status |= SysStatus::LOCKSTATUS;
        }
        if self.in_reset {
            status |= SysStatus::RSTSYS;
        }
        status
    }

    fn nvm_status(&mut self) -> u8 {
        let mut status = NvmStatus::empty();
        if self.busy > 0 {
            self.busy -= 1;
            status |= NvmStatus::FLASH_BUSY;
        }
        if self.write_error {
            status |= NvmStatus::WRITE_ERROR;
        }
        status.bits()
    }

    fn load_cs(&self, reg: u8) -> u8 {
        match reg {
            CS_STATUSA => self.config.updi_revision,
            CS_CTRLA => self.ctrla,
            CS_CTRLB => self.ctrlb,
            ASI_KEY_STATUS => self.key_status.bits(),
            ASI_RESET_REQ => {
                if self.in_reset {
                    RESET_REQ_VALUE
                } else {
                    0
                }
            }
            ASI_SYS_STATUS => self.sys_status().bits(),
            _ => 0,
        }
    }

    fn store_cs(&mut self, reg: u8, value: u8) {
        match reg {
            CS_CTRLA => self.ctrla = value,
            CS_CTRLB => {
                self.ctrlb = value;
                if CtrlB::from_bits_retain(value).contains(CtrlB::UPDIDIS) {
                    log::debug!("dummy: UPDI disabled");
                    self.state = RxState::Disabled;
                }
            }
            ASI_RESET_REQ => {
                if value == RESET_REQ_VALUE {
                    self.in_reset = true;
                } else if self.in_reset {
                    self.in_reset = false;
                    self.release_reset();
                }
            }
            _ => log::trace!("dummy: ignoring CS store 0x{:02X} -> {}", value, reg),
        }
    }

    fn release_reset(&mut self) {
        if self.key_status.contains(KeyStatus::NVMPROG) {
            self.key_status.remove(KeyStatus::NVMPROG);
            self.prog_mode = true;
            self.locked = false;
            log::debug!("dummy: entered NVM programming mode");
        } else {
            self.prog_mode = false;
        }
        self.clear_page_buffer();
    }

    fn read(&mut self, address: u16) -> u8 {
        if let Some(offset) = self.flash_offset(address) {
            return self.flash[offset];
        }
        if let Some(index) = self.fuse_index(address) {
            return self.fuses[index];
        }
        if let Some(offset) = self.nvmctrl_offset(address) {
            return if offset == NVMCTRL_STATUS as usize {
                self.nvm_status()
            } else {
                self.nvm_regs[offset]
            };
        }
        let sigrow = self.config.device.sigrow_address as usize;
        if (sigrow..sigrow + 3).contains(&(address as usize)) {
            return self.config.signature[address as usize - sigrow];
        }
        self.sram.get(&address).copied().unwrap_or(0)
    }

    fn write(&mut self, address: u16, value: u8) {
        if let Some(offset) = self.flash_offset(address) {
            if !self.prog_mode {
                log::debug!("dummy: flash write at 0x{:04X} outside prog mode", address);
                return;
            }
            let page_len = self.page_buffer.len();
            let index = offset % page_len;
            self.page_buffer[index] = value;
            self.buffer_mask[index] = true;
            self.buffer_page = Some(offset / page_len);
            return;
        }
        if let Some(offset) = self.nvmctrl_offset(address) {
            if offset == NVMCTRL_CTRLA as usize {
                self.nvm_command(value);
            } else {
                self.nvm_regs[offset] = value;
            }
            return;
        }
        self.sram.insert(address, value);
    }

    fn clear_page_buffer(&mut self) {
        self.page_buffer.fill(ERASED);
        self.buffer_mask.fill(false);
        self.buffer_page = None;
    }

    fn erase_page(&mut self, page: usize) {
        let len = self.page_buffer.len();
        self.flash[page * len..(page + 1) * len].fill(ERASED);
    }

    fn write_page_buffer(&mut self) {
        let Some(page) = self.buffer_page else {
            return;
        };
        let len = self.page_buffer.len();
        for i in 0..len {
            if self.buffer_mask[i] {
                // Programming only clears bits
                self.flash[page * len + i] &= self.page_buffer[i];
            }
        }
    }

    fn nvm_command(&mut self, value: u8) {
        self.nvm_regs[NVMCTRL_CTRLA as usize] = value;
        let Some(command) = NvmCommand::from_u8(value) else {
            log::debug!("dummy: unknown NVM command 0x{:02X}", value);
            self.write_error = true;
            return;
        };
        if !self.prog_mode && command != NvmCommand::Nop {
            log::debug!("dummy: {:?} outside prog mode", command);
            self.write_error = true;
            return;
        }

        log::trace!("dummy: NVM command {:?}", command);
        self.write_error = false;
        match command {
            NvmCommand::Nop | NvmCommand::EraseEeprom => {}
            NvmCommand::WritePage | NvmCommand::EraseWritePage => {
                self.stats.page_writes += 1;
                if self.lost_page_writes > 0 {
                    self.lost_page_writes -= 1;
                    log::debug!("dummy: losing page write");
                } else {
                    if command == NvmCommand::EraseWritePage {
                        if let Some(page) = self.buffer_page {
                            self.erase_page(page);
                        }
                    }
                    self.write_page_buffer();
                }
                self.clear_page_buffer();
            }
            NvmCommand::ErasePage => {
                self.stats.page_erases += 1;
                if self.fail_page_erase {
                    self.write_error = true;
                } else if let Some(page) = self.buffer_page {
                    self.erase_page(page);
                }
                self.clear_page_buffer();
            }
            NvmCommand::PageBufferClear => self.clear_page_buffer(),
            NvmCommand::ChipErase => {
                self.stats.chip_erases += 1;
                self.flash.fill(ERASED);
                self.clear_page_buffer();
            }
            NvmCommand::WriteFuse => {
                self.stats.fuse_writes += 1;
                let address = u16::from_le_bytes([
                    self.nvm_regs[NVMCTRL_ADDRL as usize],
                    self.nvm_regs[NVMCTRL_ADDRH as usize],
                ]);
                match self.fuse_index(address) {
                    Some(index) => self.fuses[index] = self.nvm_regs[NVMCTRL_DATAL as usize],
                    None => self.write_error = true,
                }
            }
        }
        self.busy = self.config.busy_polls;
    }

    fn on_opcode(&mut self, op: u8) -> RxState {
        let operands = |need| RxState::Operands {
            op,
            bytes: [0; 2],
            have: 0,
            need,
        };
        let word_address = (op >> 2) & 0x03 == 1;

        match op & 0xE0 {
            LDCS => {
                let value = self.load_cs(op & 0x0F);
                self.reply(value);
                RxState::Idle
            }
            STCS => operands(1),
            LDS | STS => operands(if word_address { 2 } else { 1 }),
            LD => {
                let count = self.repeat + 1;
                let increment = op & 0x0C == PTR_INC;
                self.repeat = 0;
                self.stats.burst_reads += 1;
                for _ in 0..count {
                    let value = self.read(self.pointer);
                    self.reply(value);
                    if increment {
                        self.pointer = self.pointer.wrapping_add(1);
                    }
                }
                RxState::Idle
            }
            ST => match op & 0x0C {
                PTR_ADDRESS => operands(if op & 0x03 == DATA_16 { 2 } else { 1 }),
                mode => {
                    let remaining = self.repeat + 1;
                    self.repeat = 0;
                    RxState::StPtrData {
                        remaining,
                        increment: mode == PTR_INC,
                    }
                }
            },
            REPEAT => operands(if op & 0x03 == REPEAT_WORD { 2 } else { 1 }),
            _ => {
                // KEY; the SIB variant is not emulated
                if op & 0x04 == 0 {
                    RxState::Key {
                        bytes: [0; 8],
                        have: 0,
                    }
                } else {
                    log::debug!("dummy: SIB read not supported");
                    RxState::Idle
                }
            }
        }
    }

    fn on_operands(&mut self, op: u8, bytes: &[u8]) -> RxState {
        let value = match *bytes {
            [lo, hi] => u16::from_le_bytes([lo, hi]),
            [b] => b as u16,
            _ => 0,
        };

        match op & 0xE0 {
            STCS => {
                self.store_cs(op & 0x0F, bytes[0]);
                // UPDIDIS switches to Disabled from inside store_cs
                if self.state == RxState::Disabled {
                    return RxState::Disabled;
                }
                RxState::Idle
            }
            LDS => {
                let data = self.read(value);
                self.reply(data);
                RxState::Idle
            }
            STS => {
                self.reply(ACK);
                RxState::StsValue { address: value }
            }
            ST => {
                self.pointer = value;
                self.reply(ACK);
                RxState::Idle
            }
            REPEAT => {
                self.repeat = value as usize;
                RxState::Idle
            }
            _ => RxState::Idle,
        }
    }

    fn feed(&mut self, byte: u8) {
        self.state = match self.state {
            RxState::Disabled => RxState::Disabled,
            RxState::Idle => {
                if byte == SYNC {
                    RxState::Opcode
                } else {
                    log::trace!("dummy: stray byte 0x{:02X}", byte);
                    RxState::Idle
                }
            }
            RxState::Opcode => self.on_opcode(byte),
            RxState::Operands {
                op,
                mut bytes,
                have,
                need,
            } => {
                bytes[have] = byte;
                if have + 1 == need {
                    self.on_operands(op, &bytes[..need])
                } else {
                    RxState::Operands {
                        op,
                        bytes,
                        have: have + 1,
                        need,
                    }
                }
            }
            RxState::StsValue { address } => {
                self.write(address, byte);
                self.reply(ACK);
                RxState::Idle
            }
            RxState::StPtrData {
                remaining,
                increment,
            } => {
                self.write(self.pointer, byte);
                if increment {
                    self.pointer = self.pointer.wrapping_add(1);
                }
                self.reply(ACK);
                if remaining > 1 {
                    RxState::StPtrData {
                        remaining: remaining - 1,
                        increment,
                    }
                } else {
                    RxState::Idle
                }
            }
            RxState::Key { mut bytes, have } => {
                bytes[have] = byte;
                if have + 1 < bytes.len() {
                    RxState::Key {
                        bytes,
                        have: have + 1,
                    }
                } else {
                    bytes.reverse();
                    if &bytes == KEY_NVM {
                        log::debug!("dummy: NVM key accepted");
                        self.key_status |= KeyStatus::NVMPROG;
                    } else {
                        log::debug!("dummy: unknown key {:02X?}", bytes);
                    }
                    RxState::Idle
                }
            }
        };
    }
}

impl Delay for DummyUpdi {
    fn delay_us(&mut self, us: u32) {
        self.elapsed_us += us as u64;
    }
}

impl UpdiTransport for DummyUpdi {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        for &byte in data {
            self.feed(byte);
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match self.outbox.pop_front() {
                Some(byte) => buf[n] = byte,
                None => {
                    // Start-bit wait runs out at the default 1 ms bit period
                    self.elapsed_us += 5000 * 1000 / 8;
                    break;
                }
            }
            n += 1;
        }
        n
    }

    fn double_break(&mut self) {
        self.stats.double_breaks += 1;
        self.elapsed_us += 140_000;
        if !self.connected {
            return;
        }
        self.state = RxState::Idle;
        self.outbox.clear();
        self.repeat = 0;
        self.ctrla = 0;
        self.ctrlb = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use updiprog_core::app::UpdiDevice;
    use updiprog_core::error::Error;
    use updiprog_core::ihex;
    use updiprog_core::image::FirmwareImage;
    use updiprog_core::link::Link;
    use updiprog_core::nvm::{self, Failure, NoProgress, Pass};

    fn connected() -> UpdiDevice<DummyUpdi> {
        let mut dev = UpdiDevice::new(DummyUpdi::new_default(), DeviceConfig::default());
        dev.link_init().unwrap();
        dev
    }

    fn dummy(dev: &mut UpdiDevice<DummyUpdi>) -> &mut DummyUpdi {
        dev.link().transport_mut()
    }

    #[test]
    fn test_link_init_and_signature() {
        let mut dev = connected();
        assert!(dev.is_prog_mode());
        assert!(dummy(&mut dev).is_prog_mode());
        assert_eq!(dev.read_signature().unwrap(), [0x1E, 0x93, 0x20]);
    }

    #[test]
    fn test_locked_device_unlocks() {
        let config = DummyConfig {
            locked: true,
            ..Default::default()
        };
        let mut dev = UpdiDevice::new(DummyUpdi::new(config), DeviceConfig::default());
        dev.link_init().unwrap();
        assert!(dev.is_prog_mode());
    }

    #[test]
    fn test_link_init_without_target() {
        let mut target = DummyUpdi::new_default();
        target.set_connected(false);
        let mut dev = UpdiDevice::new(target, DeviceConfig::default());
        assert!(matches!(dev.link_init(), Err(Error::LinkDown)));
        assert_eq!(dummy(&mut dev).stats().double_breaks, 3);
    }

    #[test]
    fn test_link_store_and_load() {
        let mut link = Link::new(DummyUpdi::new_default());
        link.store_byte(0x3F00, 0xA5).unwrap();
        assert_eq!(link.load_byte(0x3F00).unwrap(), 0xA5);
        assert_eq!(link.load_cs(CS_STATUSA).unwrap(), 0x10);
    }

    #[test]
    fn test_page_round_trip() {
        let mut dev = connected();
        let page: Vec<u8> = (0..64).map(|i| (i * 3) as u8).collect();
        dev.page_write(0x8040, &page).unwrap();

        let mut back = vec![0u8; 64];
        dev.page_read(0x8040, &mut back).unwrap();
        assert_eq!(back, page);
        assert_eq!(&dummy(&mut dev).flash()[64..128], &page[..]);
        assert_eq!(dummy(&mut dev).stats().page_writes, 1);
    }

    #[test]
    fn test_max_burst_read() {
        let mut dev = connected();
        dummy(&mut dev).flash_mut()[..256].fill(0x11);
        let mut buf = vec![0u8; MAX_BURST];
        dev.page_read(0x8000, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x11));

        let mut too_big = vec![0u8; MAX_BURST + 1];
        assert!(matches!(
            dev.page_read(0x8000, &mut too_big),
            Err(Error::SizeError { len: 257, .. })
        ));
    }

    #[test]
    fn test_page_erase() {
        let mut dev = connected();
        dummy(&mut dev).flash_mut()[..64].fill(0x00);
        dev.page_erase(0x8000).unwrap();
        assert!(dummy(&mut dev).flash()[..64].iter().all(|&b| b == 0xFF));
        assert_eq!(dummy(&mut dev).stats().page_erases, 1);
    }

    #[test]
    fn test_write_outside_prog_mode_reports_error() {
        let mut dev = UpdiDevice::new(DummyUpdi::new_default(), DeviceConfig::default());
        dev.link().connect().unwrap();
        assert!(matches!(dev.chip_erase(), Err(Error::WriteError)));
    }

    #[test]
    fn test_exit_program_mode_disables_updi() {
        let mut dev = connected();
        dev.exit_program_mode().unwrap();
        assert!(!dummy(&mut dev).is_prog_mode());
        assert!(matches!(dev.link().load_cs(CS_STATUSA), Err(Error::Timeout)));

        dev.link_init().unwrap();
        assert!(dummy(&mut dev).is_prog_mode());
    }

    #[test]
    fn test_fuse_read_write() {
        let mut dev = connected();
        dev.write_fuse(2, 0x7E).unwrap();
        assert_eq!(dev.read_fuse(2).unwrap(), 0x7E);
        assert_eq!(dummy(&mut dev).fuses()[2], 0x7E);
        assert!(matches!(dev.read_fuse(9), Err(Error::Config(_))));
    }

    #[test]
    fn test_blank_check_twice() {
        let mut dev = UpdiDevice::new(DummyUpdi::new_default(), DeviceConfig::default());
        nvm::chip_erase(&mut dev, &mut NoProgress).unwrap();
        let before = dummy(&mut dev).flash().to_vec();

        let first = nvm::blank_check(&mut dev, &mut NoProgress).unwrap();
        let second = nvm::blank_check(&mut dev, &mut NoProgress).unwrap();
        assert_eq!(first.retries, 0);
        assert_eq!(second.retries, 0);
        assert_eq!(dummy(&mut dev).flash(), &before[..]);
        assert_eq!(dummy(&mut dev).stats().page_writes, 0);
    }

    #[test]
    fn test_full_flash_sequence() {
        let config = DeviceConfig::default();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let mut hex = Vec::new();
        ihex::write_image(&mut hex, 0, &data).unwrap();
        let image = ihex::parse(&hex[..], &config).unwrap();
        assert_eq!(image.highest_used(), 1000);

        let mut target = DummyUpdi::new_default();
        target.flash_mut()[4000] = 0x00;
        let mut dev = UpdiDevice::new(target, config);

        nvm::chip_erase(&mut dev, &mut NoProgress).unwrap();
        nvm::blank_check(&mut dev, &mut NoProgress).unwrap();
        let report = nvm::program(&mut dev, &image, &mut NoProgress).unwrap();
        assert_eq!(report.pages, 16);
        assert_eq!(report.retries, 0);
        nvm::verify(&mut dev, &image, &mut NoProgress).unwrap();

        assert_eq!(&dummy(&mut dev).flash()[..1000], &data[..]);
        assert_eq!(dummy(&mut dev).stats().page_writes, 16);
        assert_eq!(dummy(&mut dev).stats().double_breaks, 1);
    }

    #[test]
    fn test_program_recovers_from_dropped_ack() {
        let image = FirmwareImage::from_flash(&DeviceConfig::default(), &[0x5A; 64]);
        let mut dev = connected();
        dummy(&mut dev).drop_replies(1);

        let report = nvm::program(&mut dev, &image, &mut NoProgress).unwrap();
        assert_eq!(report.retries, 1);
        assert!(dummy(&mut dev).flash()[..64].iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_program_escalates_to_page_erase() {
        let image = FirmwareImage::from_flash(&DeviceConfig::default(), &[0x00; 16]);
        let mut dev = connected();
        dummy(&mut dev).lose_page_writes(1);

        let report = nvm::program(&mut dev, &image, &mut NoProgress).unwrap();
        assert_eq!(report.retries, 4);
        let stats = dummy(&mut dev).stats();
        assert_eq!(stats.page_erases, 1);
        assert_eq!(stats.page_writes, 2);
        assert!(dummy(&mut dev).flash()[..16].iter().all(|&b| b == 0x00));
    }

    #[test]
    fn test_program_page_erase_failure() {
        let image = FirmwareImage::from_flash(&DeviceConfig::default(), &[0x00; 16]);
        let mut dev = connected();
        dummy(&mut dev).lose_page_writes(usize::MAX);
        dummy(&mut dev).fail_page_erase(true);

        let err = nvm::program(&mut dev, &image, &mut NoProgress).unwrap_err();
        assert_eq!((err.pass, err.failure, err.code()), (Pass::Program, Failure::EraseFailed, -4));
    }

    #[test]
    fn test_verify_detects_difference() {
        let image = FirmwareImage::from_flash(&DeviceConfig::default(), &[0x12; 64]);
        let mut dev = connected();
        dummy(&mut dev).flash_mut()[..64].fill(0x12);
        dummy(&mut dev).flash_mut()[7000] = 0x00;

        let err = nvm::verify(&mut dev, &image, &mut NoProgress).unwrap_err();
        assert_eq!(err.page, 7000 / 64);
        assert_eq!(err.failure, Failure::Mismatch);
    }

    #[test]
    fn test_program_fuses() {
        let image = ihex::parse_str(
            ":020000040082F8\n:0100050042B8\n:00000001FF\n",
            &DeviceConfig::default(),
        )
        .unwrap();
        let mut dev = connected();
        nvm::program_fuses(&mut dev, &image, &mut NoProgress).unwrap();
        assert_eq!(dummy(&mut dev).fuses()[5], 0x42);
        assert_eq!(dummy(&mut dev).stats().fuse_writes, 1);
    }

    #[test]
    fn test_read_flash() {
        let mut dev = connected();
        dummy(&mut dev).flash_mut()[..3].copy_from_slice(&[0xDE, 0xAD, 0xBE]);
        let data = nvm::read_flash(&mut dev, 130, &mut NoProgress).unwrap();
        assert_eq!(data.len(), 130);
        assert_eq!(&data[..4], &[0xDE, 0xAD, 0xBE, 0xFF]);
    }
}
