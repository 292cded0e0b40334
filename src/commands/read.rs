//! Read command implementation

use super::flash::release;
use super::CommandError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use updiprog_core::app::UpdiDevice;
use updiprog_core::ihex;
use updiprog_core::link::UpdiTransport;
use updiprog_core::nvm::{self, ProgressReporter};

/// Dump `length` bytes of flash (default: all of it) to an Intel-HEX file
pub fn run_read<T, P>(
    dev: &mut UpdiDevice<T>,
    output: &Path,
    length: Option<usize>,
    progress: &mut P,
) -> Result<(), CommandError>
where
    T: UpdiTransport,
    P: ProgressReporter,
{
    let flash_len = dev.config().flash_len();
    let length = length.unwrap_or(flash_len);
    if length == 0 || length > flash_len {
        return Err(updiprog_core::Error::Config(format!(
            "read length {} outside 1..={}",
            length, flash_len
        ))
        .into());
    }

    let data = nvm::read_flash(dev, length, progress)?;
    release(dev);

    let mut out = BufWriter::new(File::create(output)?);
    ihex::write_image(&mut out, 0, &data)?;
    out.flush()?;

    println!("Read {} bytes to {:?}", data.len(), output);
    Ok(())
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use updiprog_core::config::DeviceConfig;
    use updiprog_core::nvm::NoProgress;
    use updiprog_dummy::DummyUpdi;

    #[test]
    fn test_read_to_hex_and_reload() {
        let mut target = DummyUpdi::new_default();
        target.flash_mut()[..3].copy_from_slice(&[0xDE, 0xAD, 0x42]);
        target.flash_mut()[200] = 0x07;
        let mut dev = UpdiDevice::new(target, DeviceConfig::default());

        let path = std::env::temp_dir().join(format!("updiprog-read-{}.hex", std::process::id()));
        run_read(&mut dev, &path, Some(256), &mut NoProgress).unwrap();

        let image = ihex::load(&path, &DeviceConfig::default()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(&image.flash()[..3], &[0xDE, 0xAD, 0x42]);
        assert_eq!(image.flash()[200], 0x07);
        assert_eq!(image.highest_used(), 201);
    }

    #[test]
    fn test_read_length_out_of_range() {
        let mut dev = UpdiDevice::new(DummyUpdi::new_default(), DeviceConfig::default());
        let path = std::env::temp_dir().join("updiprog-read-never-written.hex");
        let err = run_read(&mut dev, &path, Some(0x10000), &mut NoProgress).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(!path.exists());
    }
}
