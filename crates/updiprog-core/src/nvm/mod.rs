//! NVM programming passes
//!
//! A flashing run is four independent page walks over one connection:
//!
//! 1. [`chip_erase`]
//! 2. [`blank_check`] over the whole flash
//! 3. [`program`] over the populated part of the image
//! 4. [`verify`] over the whole flash
//!
//! Each pass re-establishes the link lazily (only if programming mode is not
//! already confirmed), retries pages according to [`retry`] and returns a
//! [`PassError`] carrying a distinct code per failure class when its budget
//! runs out.
//!
//! The passes are written against [`PageAccess`] rather than
//! [`UpdiDevice`] so the retry policy can be exercised without a target.

pub mod progress;
pub mod retry;

use thiserror::Error;

use crate::app::UpdiDevice;
use crate::config::DeviceConfig;
use crate::constants::ERASED;
use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::link::UpdiTransport;
use crate::poll::Delay;

pub use progress::{NoProgress, ProgressReporter};
use retry::{ProgramRetry, ScanRetry, Step};

/// Settle time after a lazy link initialization
pub const INIT_SETTLE_MS: u32 = 2;
/// Settle time before retrying a page
pub const RETRY_SETTLE_MS: u32 = 5;

/// Page-level device access used by the passes
pub trait PageAccess: Delay {
    /// Device memory map
    fn config(&self) -> &DeviceConfig;

    /// Whether programming mode is confirmed on this connection
    fn is_prog_mode(&self) -> bool;

    /// Re-establish the link and enter programming mode
    fn link_init(&mut self) -> Result<()>;

    /// Erase the whole flash
    fn chip_erase(&mut self) -> Result<()>;

    /// Read one page (or less) at `address`
    fn page_read(&mut self, address: u16, buf: &mut [u8]) -> Result<()>;

    /// Write one page at `address`
    fn page_write(&mut self, address: u16, data: &[u8]) -> Result<()>;

    /// Erase one page at `address`
    fn page_erase(&mut self, address: u16) -> Result<()>;

    /// Read fuse `index`
    fn read_fuse(&mut self, index: usize) -> Result<u8>;

    /// Write fuse `index`
    fn write_fuse(&mut self, index: usize, value: u8) -> Result<()>;
}

impl<T: UpdiTransport> PageAccess for UpdiDevice<T> {
    fn config(&self) -> &DeviceConfig {
        UpdiDevice::config(self)
    }

    fn is_prog_mode(&self) -> bool {
        UpdiDevice::is_prog_mode(self)
    }

    fn link_init(&mut self) -> Result<()> {
        UpdiDevice::link_init(self)
    }

    fn chip_erase(&mut self) -> Result<()> {
        UpdiDevice::chip_erase(self)
    }

    fn page_read(&mut self, address: u16, buf: &mut [u8]) -> Result<()> {
        UpdiDevice::page_read(self, address, buf)
    }

    fn page_write(&mut self, address: u16, data: &[u8]) -> Result<()> {
        UpdiDevice::page_write(self, address, data)
    }

    fn page_erase(&mut self, address: u16) -> Result<()> {
        UpdiDevice::page_erase(self, address)
    }

    fn read_fuse(&mut self, index: usize) -> Result<u8> {
        UpdiDevice::read_fuse(self, index)
    }

    fn write_fuse(&mut self, index: usize, value: u8) -> Result<()> {
        UpdiDevice::write_fuse(self, index, value)
    }
}

/// Which page walk is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Whole-chip erase
    ChipErase,
    /// Check that every flash byte is erased
    BlankCheck,
    /// Write and read back the image
    Program,
    /// Compare the whole flash with the image
    Verify,
    /// Write and read back the fuse bytes of the image
    Fuses,
    /// Dump flash contents
    Read,
}

impl core::fmt::Display for Pass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::ChipErase => "chip erase",
            Self::BlankCheck => "blank check",
            Self::Program => "program",
            Self::Verify => "verify",
            Self::Fuses => "fuses",
            Self::Read => "read",
        };
        f.write_str(name)
    }
}

/// Failure class of a page attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The page could not be read
    Link,
    /// A byte of the page is not erased
    NotBlank,
    /// Loading or committing the page failed
    Write,
    /// Reading back a written page failed
    Read,
    /// The page reads back erased after a write
    Blank,
    /// Too many explicit page erases without success
    EraseBudget,
    /// An explicit page erase failed
    EraseFailed,
    /// The page content differs from the image
    Mismatch,
    /// An NVM controller command failed
    Command,
}

impl core::fmt::Display for Failure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            Self::Link => "link flaky",
            Self::NotBlank => "not blank",
            Self::Write => "write failed",
            Self::Read => "read-back failed",
            Self::Blank => "page reads back erased",
            Self::EraseBudget => "device not erasing",
            Self::EraseFailed => "page erase failed",
            Self::Mismatch => "image mismatch",
            Self::Command => "NVM command failed",
        };
        f.write_str(text)
    }
}

/// A pass gave up
#[derive(Debug, Error)]
#[error("{pass} failed at page {page}: {failure}")]
pub struct PassError {
    /// Pass that failed
    pub pass: Pass,
    /// Page (or fuse index) being processed
    pub page: usize,
    /// Failure class that exhausted its budget
    pub failure: Failure,
    /// Last underlying error, if any
    #[source]
    pub source: Option<Error>,
}

impl PassError {
    fn new(pass: Pass, page: usize, failure: Failure, source: Option<Error>) -> Self {
        Self {
            pass,
            page,
            failure,
            source,
        }
    }

    /// Negative status code of the pass
    ///
    /// Program distinguishes its failure classes; every other pass fails
    /// with -1.
    pub fn code(&self) -> i32 {
        match (self.pass, self.failure) {
            (Pass::Program, Failure::Read) => -2,
            (Pass::Program, Failure::Blank | Failure::EraseBudget) => -3,
            (Pass::Program, Failure::EraseFailed) => -4,
            (Pass::Program, Failure::Mismatch) => -5,
            _ => -1,
        }
    }
}

/// Summary of a completed pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Pages processed
    pub pages: usize,
    /// Page attempts that had to be repeated
    pub retries: usize,
}

/// Result type of a pass
pub type PassResult<T = PassReport> = core::result::Result<T, PassError>;

/// Bring the link up before the first page of a pass
///
/// A target that cannot be reached at all fails the pass as a link failure
/// on page 0, before any page is touched.
fn ensure_prog_mode<D, P>(dev: &mut D, progress: &mut P, pass: Pass) -> PassResult<()>
where
    D: PageAccess + ?Sized,
    P: ProgressReporter + ?Sized,
{
    if dev.is_prog_mode() {
        return Ok(());
    }
    if let Err(e) = dev.link_init() {
        log::warn!("nvm: link initialization failed: {}", e);
        return Err(abort(progress, pass, 0, Failure::Link, Some(e)));
    }
    dev.delay_ms(INIT_SETTLE_MS);
    Ok(())
}

fn relink<D: PageAccess + ?Sized>(dev: &mut D) {
    if let Err(e) = dev.link_init() {
        log::debug!("nvm: link re-initialization failed: {}", e);
    }
    dev.delay_ms(RETRY_SETTLE_MS);
}

fn abort<P: ProgressReporter + ?Sized>(
    progress: &mut P,
    pass: Pass,
    page: usize,
    failure: Failure,
    source: Option<Error>,
) -> PassError {
    log::error!("{}: giving up on page {}: {}", pass, page, failure);
    progress.abort(pass, page, failure);
    PassError::new(pass, page, failure, source)
}

fn note_retry<P: ProgressReporter + ?Sized>(
    progress: &mut P,
    report: &mut PassReport,
    pass: Pass,
    page: usize,
    failure: Failure,
) {
    log::warn!("{}: retrying page {} ({})", pass, page, failure);
    report.retries += 1;
    progress.retry(pass, page, failure);
}

/// Erase the whole chip
pub fn chip_erase<D, P>(dev: &mut D, progress: &mut P) -> PassResult
where
    D: PageAccess + ?Sized,
    P: ProgressReporter + ?Sized,
{
    ensure_prog_mode(dev, progress, Pass::ChipErase)?;
    progress.start(Pass::ChipErase, 1);
    if let Err(e) = dev.chip_erase() {
        return Err(abort(progress, Pass::ChipErase, 0, Failure::Command, Some(e)));
    }
    progress.advance(1, 1);
    progress.finish(Pass::ChipErase);
    log::info!("chip erased");
    Ok(PassReport {
        pages: 1,
        retries: 0,
    })
}

/// Read the whole flash page by page, retrying per `retry`
fn scan<D, P, F>(
    dev: &mut D,
    progress: &mut P,
    pass: Pass,
    mut retry: ScanRetry,
    mut page_ok: F,
) -> PassResult
where
    D: PageAccess + ?Sized,
    P: ProgressReporter + ?Sized,
    F: FnMut(usize, &[u8]) -> bool,
{
    ensure_prog_mode(dev, progress, pass)?;

    let config = dev.config().clone();
    let total = config.pages_for(config.flash_len());
    let mut buf = vec![0u8; config.page_len()];
    let mut report = PassReport::default();

    progress.start(pass, total);
    let mut page = 0;
    while page < total {
        let address = config.page_address(page);
        let (failure, source, step) = match dev.page_read(address, &mut buf) {
            Ok(()) if page_ok(page, &buf) => {
                retry.on_success();
                page += 1;
                progress.advance(page, total);
                continue;
            }
            Ok(()) => (
                retry.data_failure(),
                Some(Error::VerifyMismatch { address }),
                retry.on_data_error(),
            ),
            Err(e) => {
                log::debug!("{}: page {} read failed: {}", pass, page, e);
                (Failure::Link, Some(e), retry.on_link_error())
            }
        };

        match step {
            Step::Abort(failure) => return Err(abort(progress, pass, page, failure, source)),
            Step::LinkRetry => relink(dev),
            Step::DataRetry | Step::EraseEscalate => dev.delay_ms(RETRY_SETTLE_MS),
        }
        note_retry(progress, &mut report, pass, page, failure);
    }

    report.pages = total;
    progress.finish(pass);
    log::info!("{}: {} pages ok, {} retries", pass, total, report.retries);
    Ok(report)
}

/// Check that every flash page reads back erased
pub fn blank_check<D, P>(dev: &mut D, progress: &mut P) -> PassResult
where
    D: PageAccess + ?Sized,
    P: ProgressReporter + ?Sized,
{
    scan(dev, progress, Pass::BlankCheck, ScanRetry::blank_check(), |_, data| {
        data.iter().all(|&b| b == ERASED)
    })
}

/// Compare every flash page with `image`
pub fn verify<D, P>(dev: &mut D, image: &FirmwareImage, progress: &mut P) -> PassResult
where
    D: PageAccess + ?Sized,
    P: ProgressReporter + ?Sized,
{
    let page_len = dev.config().page_len();
    scan(dev, progress, Pass::Verify, ScanRetry::verify(), |page, data| {
        image.page(page, page_len) == data
    })
}

/// Why a program attempt on one page did not succeed
enum PageFault {
    Write(Error),
    Read(Error),
    Blank,
    Mismatch,
}

fn program_page<D: PageAccess + ?Sized>(
    dev: &mut D,
    write: bool,
    address: u16,
    source: &[u8],
    readback: &mut [u8],
) -> core::result::Result<(), PageFault> {
    if write {
        dev.page_write(address, source).map_err(PageFault::Write)?;
    }
    dev.page_read(address, readback).map_err(PageFault::Read)?;
    if readback == source {
        Ok(())
    } else if readback.iter().all(|&b| b == ERASED) {
        Err(PageFault::Blank)
    } else {
        Err(PageFault::Mismatch)
    }
}

/// Write the populated part of `image` and read every page back
///
/// Only `ceil(highest_used / page_size)` pages are touched. The flash is
/// expected to be erased.
pub fn program<D, P>(dev: &mut D, image: &FirmwareImage, progress: &mut P) -> PassResult
where
    D: PageAccess + ?Sized,
    P: ProgressReporter + ?Sized,
{
    ensure_prog_mode(dev, progress, Pass::Program)?;

    let config = dev.config().clone();
    let page_len = config.page_len();
    let total = config.pages_for(image.highest_used());
    let mut buf = vec![0u8; page_len];
    let mut retry = ProgramRetry::new();
    let mut report = PassReport::default();

    progress.start(Pass::Program, total);
    let mut page = 0;
    while page < total {
        let address = config.page_address(page);
        let source = image.page(page, page_len);
        let readback = &mut buf[..source.len()];

        let (failure, cause, step) =
            match program_page(dev, retry.should_write(), address, source, readback) {
                Ok(()) => {
                    retry.on_success();
                    page += 1;
                    progress.advance(page, total);
                    continue;
                }
                Err(PageFault::Write(e)) => {
                    log::debug!("program: page {} write failed: {}", page, e);
                    (Failure::Write, Some(e), retry.on_write_error())
                }
                Err(PageFault::Read(e)) => {
                    log::debug!("program: page {} read-back failed: {}", page, e);
                    (Failure::Read, Some(e), retry.on_read_error())
                }
                Err(PageFault::Blank) => (Failure::Blank, None, retry.on_blank_readback()),
                Err(PageFault::Mismatch) => (
                    Failure::Mismatch,
                    Some(Error::VerifyMismatch { address }),
                    retry.on_mismatch(),
                ),
            };

        match step {
            Step::Abort(failure) => {
                return Err(abort(progress, Pass::Program, page, failure, cause));
            }
            Step::EraseEscalate => {
                log::warn!("program: page {} keeps reading back erased, erasing it", page);
                if let Err(e) = dev.page_erase(address) {
                    log::debug!("program: page {} erase failed: {}", page, e);
                    return Err(abort(
                        progress,
                        Pass::Program,
                        page,
                        Failure::EraseFailed,
                        Some(Error::EraseFailed { address }),
                    ));
                }
            }
            _ => {}
        }
        relink(dev);
        note_retry(progress, &mut report, Pass::Program, page, failure);
    }

    report.pages = total;
    progress.finish(Pass::Program);
    log::info!(
        "program: {} pages written, {} retries",
        total,
        report.retries
    );
    Ok(report)
}

/// Write every fuse byte the image sets and read it back
///
/// Fuses are written one at a time; each one gets the write, read and
/// mismatch budgets of the program pass.
pub fn program_fuses<D, P>(dev: &mut D, image: &FirmwareImage, progress: &mut P) -> PassResult
where
    D: PageAccess + ?Sized,
    P: ProgressReporter + ?Sized,
{
    let fuses: Vec<(usize, u8)> = image.fuse_values().collect();
    let mut report = PassReport::default();
    if fuses.is_empty() {
        return Ok(report);
    }

    ensure_prog_mode(dev, progress, Pass::Fuses)?;
    progress.start(Pass::Fuses, fuses.len());

    let mut retry = ProgramRetry::new();
    let mut done = 0;
    while done < fuses.len() {
        let (index, value) = fuses[done];

        let attempt = if retry.should_write() {
            dev.write_fuse(index, value).map_err(|e| (Failure::Write, e))
        } else {
            Ok(())
        }
        .and_then(|()| dev.read_fuse(index).map_err(|e| (Failure::Read, e)));

        let (failure, cause, step) = match attempt {
            Ok(read) if read == value => {
                log::debug!("fuses: fuse {} = 0x{:02X}", index, value);
                retry.on_success();
                done += 1;
                progress.advance(done, fuses.len());
                continue;
            }
            Ok(read) => {
                log::debug!(
                    "fuses: fuse {} reads 0x{:02X}, expected 0x{:02X}",
                    index,
                    read,
                    value
                );
                (Failure::Mismatch, None, retry.on_mismatch())
            }
            Err((Failure::Write, e)) => (Failure::Write, Some(e), retry.on_write_error()),
            Err((failure, e)) => (failure, Some(e), retry.on_read_error()),
        };

        if let Step::Abort(failure) = step {
            return Err(abort(progress, Pass::Fuses, index, failure, cause));
        }
        relink(dev);
        note_retry(progress, &mut report, Pass::Fuses, index, failure);
    }

    report.pages = fuses.len();
    progress.finish(Pass::Fuses);
    log::info!("fuses: {} written", fuses.len());
    Ok(report)
}

/// Read the first `len` bytes of flash
pub fn read_flash<D, P>(dev: &mut D, len: usize, progress: &mut P) -> PassResult<Vec<u8>>
where
    D: PageAccess + ?Sized,
    P: ProgressReporter + ?Sized,
{
    ensure_prog_mode(dev, progress, Pass::Read)?;

    let config = dev.config().clone();
    let len = len.min(config.flash_len());
    let page_len = config.page_len();
    let total = config.pages_for(len);
    let mut out = vec![ERASED; total * page_len];
    let mut retry = ScanRetry::verify();
    let mut report = PassReport::default();

    progress.start(Pass::Read, total);
    let mut page = 0;
    while page < total {
        let address = config.page_address(page);
        let chunk = &mut out[page * page_len..(page + 1) * page_len];
        match dev.page_read(address, chunk) {
            Ok(()) => {
                retry.on_success();
                page += 1;
                progress.advance(page, total);
            }
            Err(e) => {
                log::debug!("read: page {} failed: {}", page, e);
                if let Step::Abort(failure) = retry.on_link_error() {
                    return Err(abort(progress, Pass::Read, page, failure, Some(e)));
                }
                relink(dev);
                note_retry(progress, &mut report, Pass::Read, page, Failure::Link);
            }
        }
    }

    progress.finish(Pass::Read);
    out.truncate(len);
    Ok(out)
}
