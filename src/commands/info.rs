//! Info command implementation

use super::flash::release;
use super::CommandError;
use updiprog_core::app::UpdiDevice;
use updiprog_core::link::UpdiTransport;

/// Connect, then print the device signature, memory map and fuse bytes
pub fn run_info<T: UpdiTransport>(dev: &mut UpdiDevice<T>) -> Result<(), CommandError> {
    dev.link_init()
        .map_err(|e| CommandError::Init(format!("no UPDI target responding: {}", e)))?;

    let signature = dev.read_signature()?;
    let config = dev.config().clone();

    println!("UPDI Device Information");
    println!("=======================");
    println!();
    println!("Device:          {}", config.name);
    println!(
        "Signature:       {:02X} {:02X} {:02X}",
        signature[0], signature[1], signature[2]
    );
    println!(
        "Flash:           {} bytes at 0x{:04X} ({} pages of {} bytes)",
        config.flash_size,
        config.flash_start,
        config.pages_for(config.flash_len()),
        config.page_size
    );
    println!();

    println!("Fuses:");
    for index in 0..config.fuse_count as usize {
        let value = dev.read_fuse(index)?;
        println!(
            "  FUSE{}  0x{:04X}: 0x{:02X}",
            index,
            config.fuses_address as usize + index,
            value
        );
    }

    release(dev);
    Ok(())
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use updiprog_core::config::DeviceConfig;
    use updiprog_dummy::{DummyConfig, DummyUpdi};

    #[test]
    fn test_info_on_locked_device() {
        let target = DummyUpdi::new(DummyConfig {
            locked: true,
            ..Default::default()
        });
        let mut dev = UpdiDevice::new(target, DeviceConfig::default());
        run_info(&mut dev).unwrap();
        assert!(!dev.is_prog_mode());
    }

    #[test]
    fn test_info_without_target() {
        let mut target = DummyUpdi::new_default();
        target.set_connected(false);
        let mut dev = UpdiDevice::new(target, DeviceConfig::default());
        assert_eq!(run_info(&mut dev).unwrap_err().exit_code(), 2);
    }
}
