//! Erase, blank-check, program, verify and fuse commands

use super::CommandError;
use updiprog_core::app::UpdiDevice;
use updiprog_core::image::FirmwareImage;
use updiprog_core::link::UpdiTransport;
use updiprog_core::nvm::{self, ProgressReporter};

/// Which optional passes `flash` runs
#[derive(Debug, Clone, Copy)]
pub struct FlashOptions {
    /// Compare the whole flash with the image after programming
    pub verify: bool,
    /// Write the fuse bytes found in the image
    pub fuses: bool,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            verify: true,
            fuses: true,
        }
    }
}

/// Reset the target and hand the UPDI pin back
///
/// Failure here is not fatal: the target keeps whatever was programmed.
pub(super) fn release<T: UpdiTransport>(dev: &mut UpdiDevice<T>) {
    if !dev.is_prog_mode() {
        return;
    }
    if let Err(e) = dev.exit_program_mode() {
        log::warn!("Failed to leave programming mode: {}", e);
    }
}

/// Full programming sequence: erase, blank-check, program, fuses, verify
pub fn run_flash<T, P>(
    dev: &mut UpdiDevice<T>,
    image: &FirmwareImage,
    options: FlashOptions,
    progress: &mut P,
) -> Result<(), CommandError>
where
    T: UpdiTransport,
    P: ProgressReporter,
{
    nvm::chip_erase(dev, progress)?;
    nvm::blank_check(dev, progress)?;

    let report = nvm::program(dev, image, progress)?;
    println!(
        "Programmed {} bytes in {} pages ({} retries)",
        image.highest_used(),
        report.pages,
        report.retries
    );

    if options.fuses && image.fuses().is_some() {
        let report = nvm::program_fuses(dev, image, progress)?;
        println!("Wrote {} fuse bytes", report.pages);
    }

    if options.verify {
        nvm::verify(dev, image, progress)?;
        println!("Verification passed");
    }

    release(dev);
    Ok(())
}

/// Erase the whole chip
pub fn run_erase<T, P>(dev: &mut UpdiDevice<T>, progress: &mut P) -> Result<(), CommandError>
where
    T: UpdiTransport,
    P: ProgressReporter,
{
    nvm::chip_erase(dev, progress)?;
    println!("Chip erased");
    release(dev);
    Ok(())
}

/// Check that every flash byte is erased
pub fn run_blank_check<T, P>(
    dev: &mut UpdiDevice<T>,
    progress: &mut P,
) -> Result<(), CommandError>
where
    T: UpdiTransport,
    P: ProgressReporter,
{
    let report = nvm::blank_check(dev, progress)?;
    println!("Flash is blank ({} pages checked)", report.pages);
    release(dev);
    Ok(())
}

/// Compare the whole flash with an image
pub fn run_verify<T, P>(
    dev: &mut UpdiDevice<T>,
    image: &FirmwareImage,
    progress: &mut P,
) -> Result<(), CommandError>
where
    T: UpdiTransport,
    P: ProgressReporter,
{
    nvm::verify(dev, image, progress)?;
    println!("Verification passed");
    release(dev);
    Ok(())
}

/// Write only the fuse bytes of an image
pub fn run_fuses<T, P>(
    dev: &mut UpdiDevice<T>,
    image: &FirmwareImage,
    progress: &mut P,
) -> Result<(), CommandError>
where
    T: UpdiTransport,
    P: ProgressReporter,
{
    if image.fuses().is_none() {
        println!("Image has no fuse segment, nothing to write");
        return Ok(());
    }
    let report = nvm::program_fuses(dev, image, progress)?;
    println!("Wrote {} fuse bytes", report.pages);
    release(dev);
    Ok(())
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use updiprog_core::config::DeviceConfig;
    use updiprog_core::ihex;
    use updiprog_core::nvm::NoProgress;
    use updiprog_dummy::DummyUpdi;

    fn device() -> UpdiDevice<DummyUpdi> {
        UpdiDevice::new(DummyUpdi::new_default(), DeviceConfig::default())
    }

    fn image_with_fuses() -> FirmwareImage {
        let hex = ":0400000001020304F2\n\
                   :020000040082F8\n\
                   :0200020055AAFF\n\
                   :00000001FF\n";
        ihex::parse_str(hex, &DeviceConfig::default()).unwrap()
    }

    #[test]
    fn test_flash_programs_and_releases() {
        let image = image_with_fuses();
        let mut dev = device();
        run_flash(&mut dev, &image, FlashOptions::default(), &mut NoProgress).unwrap();

        assert!(!dev.is_prog_mode());
        let target = dev.into_transport();
        assert_eq!(&target.flash()[..4], &[1, 2, 3, 4]);
        assert_eq!(&target.fuses()[2..4], &[0x55, 0xAA]);
        assert!(!target.is_prog_mode());
    }

    #[test]
    fn test_flash_without_fuses() {
        let image = image_with_fuses();
        let mut dev = device();
        let options = FlashOptions {
            verify: false,
            fuses: false,
        };
        run_flash(&mut dev, &image, options, &mut NoProgress).unwrap();
        assert_eq!(dev.into_transport().stats().fuse_writes, 0);
    }

    #[test]
    fn test_verify_mismatch_exit_code() {
        let image = FirmwareImage::from_flash(&DeviceConfig::default(), &[0x12; 64]);
        let mut dev = device();
        let err = run_verify(&mut dev, &image, &mut NoProgress).unwrap_err();
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn test_erase_then_blank_check() {
        let mut target = DummyUpdi::new_default();
        target.flash_mut()[100] = 0x00;
        let mut dev = UpdiDevice::new(target, DeviceConfig::default());

        let err = run_blank_check(&mut dev, &mut NoProgress).unwrap_err();
        assert_eq!(err.exit_code(), 4);

        run_erase(&mut dev, &mut NoProgress).unwrap();
        run_blank_check(&mut dev, &mut NoProgress).unwrap();
    }

    #[test]
    fn test_unreachable_target() {
        let mut target = DummyUpdi::new_default();
        target.set_connected(false);
        let mut dev = UpdiDevice::new(target, DeviceConfig::default());
        let err = run_erase(&mut dev, &mut NoProgress).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        match err {
            CommandError::Pass(e) => assert_eq!(e.code(), -1),
            other => panic!("expected a pass error, got {}", other),
        }
        assert_eq!(dev.into_transport().stats().chip_erases, 0);
    }
}
