//! Device control: programming mode, NVM commands and page access
//!
//! [`UpdiDevice`] is the connection handle. It owns the link, the device
//! memory map and the programming-mode state, so nothing about the session
//! lives in globals.

use crate::config::DeviceConfig;
use crate::constants::*;
use crate::error::{Error, Result};
use crate::link::{Link, UpdiTransport};
use crate::poll::{Delay, Poll};

/// Rounds of double break + unlock before declaring the link down
pub const LINK_INIT_ATTEMPTS: usize = 3;

/// Unlock wait after the reset toggle: 1 ms x 100
const UNLOCK_POLL: Poll = Poll::new(1000, 100);
/// NVM ready wait: 1 ms x 10 000
const READY_POLL: Poll = Poll::new(1000, 10_000);

/// Connection to one UPDI target
pub struct UpdiDevice<T: UpdiTransport> {
    link: Link<T>,
    config: DeviceConfig,
    prog_mode: bool,
}

impl<T: UpdiTransport> UpdiDevice<T> {
    /// Wrap a transport; nothing is sent until [`Self::link_init`]
    pub fn new(transport: T, config: DeviceConfig) -> Self {
        Self {
            link: Link::new(transport),
            config,
            prog_mode: false,
        }
    }

    /// Device memory map
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Link layer access
    pub fn link(&mut self) -> &mut Link<T> {
        &mut self.link
    }

    /// Give the transport back
    pub fn into_transport(self) -> T {
        self.link.into_inner()
    }

    /// Whether NVM programming mode was confirmed on this connection
    pub fn is_prog_mode(&self) -> bool {
        self.prog_mode
    }

    /// (Re)establish the link and enter programming mode, up to 3 rounds
    pub fn link_init(&mut self) -> Result<()> {
        self.prog_mode = false;
        for attempt in 1..=LINK_INIT_ATTEMPTS {
            match self.link.connect() {
                Ok(()) => match self.enter_program_mode() {
                    Ok(()) => return Ok(()),
                    Err(e) => log::debug!("link_init: attempt {}: {}", attempt, e),
                },
                Err(e) => log::debug!("link_init: attempt {}: {}", attempt, e),
            }
        }
        log::warn!("link_init: giving up after {} attempts", LINK_INIT_ATTEMPTS);
        Err(Error::LinkDown)
    }

    fn sys_status(&mut self) -> Result<SysStatus> {
        Ok(SysStatus::from_bits_retain(
            self.link.load_cs(ASI_SYS_STATUS)?,
        ))
    }

    fn reset(&mut self, asserted: bool) -> Result<()> {
        let value = if asserted { RESET_REQ_VALUE } else { 0x00 };
        self.link.store_cs(ASI_RESET_REQ, value)
    }

    fn toggle_reset(&mut self) -> Result<()> {
        self.reset(true)?;
        self.reset(false)
    }

    /// Unlock NVM programming; a no-op if the device already reports it
    pub fn enter_program_mode(&mut self) -> Result<()> {
        if self.sys_status()?.contains(SysStatus::NVMPROG) {
            self.prog_mode = true;
            return Ok(());
        }

        self.link.send_key(KEY_NVM)?;

        let key_status = KeyStatus::from_bits_retain(self.link.load_cs(ASI_KEY_STATUS)?);
        if !key_status.contains(KeyStatus::NVMPROG) {
            log::debug!("app: NVM key rejected, KEY_STATUS=0x{:02X}", key_status.bits());
            return Err(Error::UnlockFailed);
        }

        self.toggle_reset()?;

        let unlocked = UNLOCK_POLL.sleep_then_check(&mut self.link, |link| {
            let status = SysStatus::from_bits_retain(link.load_cs(ASI_SYS_STATUS)?);
            Ok::<_, Error>((!status.contains(SysStatus::LOCKSTATUS)).then_some(()))
        })?;
        if unlocked.is_none() {
            log::debug!("app: device still locked after reset");
            return Err(Error::UnlockFailed);
        }

        if !self.sys_status()?.contains(SysStatus::NVMPROG) {
            return Err(Error::UnlockFailed);
        }

        log::debug!("app: NVM programming mode entered");
        self.prog_mode = true;
        Ok(())
    }

    /// Reset the core and disable UPDI; the link must be re-initialized after
    pub fn exit_program_mode(&mut self) -> Result<()> {
        self.toggle_reset()?;
        self.link
            .store_cs(CS_CTRLB, (CtrlB::UPDIDIS | CtrlB::CCDETDIS).bits())?;
        self.prog_mode = false;
        log::debug!("app: left programming mode");
        Ok(())
    }

    /// Poll NVMCTRL.STATUS until flash and EEPROM are idle
    pub fn wait_flash_ready(&mut self) -> Result<()> {
        let status_reg = self.config.nvmctrl(NVMCTRL_STATUS);
        let ready = READY_POLL.sleep_then_check(&mut self.link, |link| {
            let status = NvmStatus::from_bits_retain(link.load_byte(status_reg)?);
            if status.contains(NvmStatus::WRITE_ERROR) {
                return Err(Error::WriteError);
            }
            Ok((!status.intersects(NvmStatus::EEPROM_BUSY | NvmStatus::FLASH_BUSY)).then_some(()))
        })?;
        ready.ok_or(Error::Timeout)
    }

    fn wait_ready_or_not_ready(&mut self) -> Result<()> {
        match self.wait_flash_ready() {
            Err(Error::Timeout) => Err(Error::NotReady),
            other => other,
        }
    }

    /// Write a command to NVMCTRL.CTRLA
    pub fn exec_nvm_command(&mut self, command: NvmCommand) -> Result<()> {
        log::trace!("app: NVM command {:?}", command);
        self.link
            .store_byte(self.config.nvmctrl(NVMCTRL_CTRLA), command as u8)
    }

    /// Erase flash and EEPROM through the NVM controller
    pub fn chip_erase(&mut self) -> Result<()> {
        self.wait_ready_or_not_ready()?;
        self.exec_nvm_command(NvmCommand::ChipErase)?;
        self.wait_ready_or_not_ready()
    }

    fn write_burst(&mut self, address: u16, data: &[u8]) -> Result<()> {
        check_burst(data.len(), 1)?;
        self.link.set_pointer(address)?;
        self.link.set_repeat(data.len())?;
        self.link.burst_write(data)
    }

    fn read_burst(&mut self, address: u16, buf: &mut [u8]) -> Result<()> {
        check_burst(buf.len(), 2)?;
        self.link.set_pointer(address)?;
        self.link.set_repeat(buf.len())?;
        self.link.burst_read(buf)
    }

    /// Load the page buffer with `data` and commit it with WRITE_PAGE
    pub fn page_write(&mut self, address: u16, data: &[u8]) -> Result<()> {
        check_burst(data.len(), 1)?;

        self.wait_flash_ready()?;
        self.exec_nvm_command(NvmCommand::PageBufferClear)?;
        self.wait_flash_ready()?;

        self.write_burst(address, data)?;

        self.exec_nvm_command(NvmCommand::WritePage)?;
        self.wait_flash_ready()
    }

    /// Read `buf.len()` bytes starting at `address` in one burst
    pub fn page_read(&mut self, address: u16, buf: &mut [u8]) -> Result<()> {
        self.read_burst(address, buf)
    }

    /// Erase the page at `address`
    pub fn page_erase(&mut self, address: u16) -> Result<()> {
        let blank = vec![ERASED; self.config.page_len()];

        self.wait_flash_ready()?;
        self.write_burst(address, &blank)?;
        self.exec_nvm_command(NvmCommand::ErasePage)?;
        self.wait_flash_ready()
    }

    /// Read `len` bytes from any data-space address in page-sized bursts
    pub fn read_memory(&mut self, address: u16, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        let mut offset = 0;
        while offset < len {
            let chunk = (len - offset).min(MAX_BURST);
            let addr = address.wrapping_add(offset as u16);
            if chunk == 1 {
                out[offset] = self.link.load_byte(addr)?;
            } else {
                self.read_burst(addr, &mut out[offset..offset + chunk])?;
            }
            offset += chunk;
        }
        Ok(out)
    }

    /// Three-byte device signature from the signature row
    pub fn read_signature(&mut self) -> Result<[u8; 3]> {
        let sig = self.read_memory(self.config.sigrow_address as u16, 3)?;
        Ok([sig[0], sig[1], sig[2]])
    }

    fn fuse_address(&self, index: usize) -> Result<u16> {
        if index >= self.config.fuse_count as usize {
            return Err(Error::Config(format!(
                "fuse {} out of range (device has {})",
                index, self.config.fuse_count
            )));
        }
        Ok(self.config.fuses_address as u16 + index as u16)
    }

    /// Read one fuse byte
    pub fn read_fuse(&mut self, index: usize) -> Result<u8> {
        let address = self.fuse_address(index)?;
        self.link.load_byte(address)
    }

    /// Program one fuse byte via NVMCTRL ADDR/DATA and WRITE_FUSE
    pub fn write_fuse(&mut self, index: usize, value: u8) -> Result<()> {
        let [lo, hi] = self.fuse_address(index)?.to_le_bytes();

        self.wait_flash_ready()?;
        self.link.store_byte(self.config.nvmctrl(NVMCTRL_ADDRL), lo)?;
        self.link.store_byte(self.config.nvmctrl(NVMCTRL_ADDRH), hi)?;
        self.link.store_byte(self.config.nvmctrl(NVMCTRL_DATAL), value)?;
        self.exec_nvm_command(NvmCommand::WriteFuse)?;
        self.wait_flash_ready()
    }
}

impl<T: UpdiTransport> Delay for UpdiDevice<T> {
    fn delay_us(&mut self, us: u32) {
        self.link.delay_us(us);
    }
}

fn check_burst(len: usize, min: usize) -> Result<()> {
    if len < min || len > MAX_BURST {
        return Err(Error::SizeError {
            len,
            min,
            max: MAX_BURST,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::tests::ScriptedTransport;

    fn device(replies: &[u8]) -> UpdiDevice<ScriptedTransport> {
        UpdiDevice::new(
            ScriptedTransport::with_replies(replies),
            DeviceConfig::default(),
        )
    }

    #[test]
    fn test_enter_program_mode_already_unlocked() {
        let mut dev = device(&[SysStatus::NVMPROG.bits()]);
        dev.enter_program_mode().unwrap();
        assert!(dev.is_prog_mode());
        assert_eq!(dev.link().transport().sent.len(), 1);
    }

    #[test]
    fn test_enter_program_mode_full_sequence() {
        let mut dev = device(&[
            0x00,                                         // SYS_STATUS: not in prog mode
            KeyStatus::NVMPROG.bits(),                    // KEY_STATUS
            SysStatus::LOCKSTATUS.bits(),                 // still locked
            0x00,                                         // unlocked
            SysStatus::NVMPROG.bits(),                    // prog mode
        ]);
        dev.enter_program_mode().unwrap();
        assert!(dev.is_prog_mode());

        let sent = &dev.link().transport().sent;
        assert_eq!(sent[1], vec![SYNC, 0xE0]);
        assert_eq!(sent[2], b" gorPMVN".to_vec());
        assert_eq!(sent[4], vec![SYNC, 0xC8, RESET_REQ_VALUE]);
        assert_eq!(sent[5], vec![SYNC, 0xC8, 0x00]);
        assert_eq!(dev.link().transport().elapsed_us, 2000);
    }

    #[test]
    fn test_enter_program_mode_key_rejected() {
        let mut dev = device(&[0x00, 0x00]);
        assert!(matches!(dev.enter_program_mode(), Err(Error::UnlockFailed)));
        assert!(!dev.is_prog_mode());
    }

    #[test]
    fn test_enter_program_mode_stays_locked() {
        let mut replies = vec![0x00, KeyStatus::NVMPROG.bits()];
        replies.extend(std::iter::repeat(SysStatus::LOCKSTATUS.bits()).take(100));
        let mut dev = device(&replies);
        assert!(matches!(dev.enter_program_mode(), Err(Error::UnlockFailed)));
        assert_eq!(dev.link().transport().elapsed_us, 100_000);
    }

    #[test]
    fn test_wait_flash_ready() {
        let busy = NvmStatus::FLASH_BUSY.bits();
        let mut dev = device(&[busy, busy, 0x00]);
        dev.wait_flash_ready().unwrap();
        assert_eq!(dev.link().transport().sent[0], vec![SYNC, 0x04, 0x02, 0x10]);

        let mut dev = device(&[NvmStatus::WRITE_ERROR.bits()]);
        assert!(matches!(dev.wait_flash_ready(), Err(Error::WriteError)));
    }

    #[test]
    fn test_chip_erase_not_ready() {
        let busy = NvmStatus::EEPROM_BUSY.bits();
        let replies: Vec<u8> = std::iter::repeat(busy).take(10_000).collect();
        let mut dev = device(&replies);
        assert!(matches!(dev.chip_erase(), Err(Error::NotReady)));
        assert_eq!(dev.link().transport().elapsed_us, 10_000_000);
    }

    #[test]
    fn test_burst_bounds() {
        let mut dev = device(&[]);
        let mut one = [0u8; 1];
        assert!(matches!(
            dev.page_read(0x8000, &mut one),
            Err(Error::SizeError { len: 1, .. })
        ));
        let mut big = vec![0u8; MAX_BURST + 1];
        assert!(matches!(
            dev.page_read(0x8000, &mut big),
            Err(Error::SizeError { len: 257, .. })
        ));
        assert!(matches!(
            dev.page_write(0x8000, &big),
            Err(Error::SizeError { len: 257, .. })
        ));
        assert!(dev.link().transport().sent.is_empty());
    }

    #[test]
    fn test_page_read_max_burst() {
        let data: Vec<u8> = (0..MAX_BURST).map(|i| i as u8).collect();
        let mut replies = vec![ACK];
        replies.extend(&data);
        let mut dev = device(&replies);

        let mut buf = vec![0u8; MAX_BURST];
        dev.page_read(0x8100, &mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!(
            dev.link().transport().sent,
            vec![
                vec![SYNC, 0x69, 0x00, 0x81],
                vec![SYNC, 0xA1, 0xFF, 0x00],
                vec![SYNC, 0x24]
            ]
        );
    }

    #[test]
    fn test_page_write_max_burst() {
        let mut replies = vec![0x00, ACK, ACK, 0x00, ACK];
        replies.extend(std::iter::repeat(ACK).take(MAX_BURST));
        replies.extend([ACK, ACK, 0x00]);
        let mut dev = device(&replies);

        dev.page_write(0x8000, &[0xA5; MAX_BURST]).unwrap();

        let transport = dev.link().transport();
        assert!(transport.replies.is_empty());
        let sent = &transport.sent;
        let repeat = sent
            .iter()
            .position(|frame| frame == &vec![SYNC, 0xA1, 0xFF, 0x00])
            .unwrap();
        assert_eq!(sent[repeat - 1], vec![SYNC, 0x69, 0x00, 0x80]);
        assert_eq!(sent[repeat + 1], vec![SYNC, 0x64, 0xA5]);
        let data_frames = sent[repeat + 2..]
            .iter()
            .take_while(|frame| frame.as_slice() == [0xA5])
            .count();
        assert_eq!(data_frames, MAX_BURST - 1);
    }

    #[test]
    fn test_exit_program_mode() {
        let mut dev = device(&[SysStatus::NVMPROG.bits()]);
        dev.enter_program_mode().unwrap();
        dev.exit_program_mode().unwrap();
        assert!(!dev.is_prog_mode());
        assert_eq!(
            dev.link().transport().sent.last().unwrap(),
            &vec![SYNC, 0xC3, 0x0C]
        );
    }
}
