//! Progress bars for the NVM passes

use indicatif::{ProgressBar, ProgressStyle};
use updiprog_core::nvm::{Failure, Pass, ProgressReporter};

/// Create the page progress bar style
fn create_page_bar_style() -> Result<ProgressStyle, indicatif::style::TemplateError> {
    Ok(ProgressStyle::default_bar()
        .template(
            "{spinner:.green} {prefix:>12} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages {msg}",
        )?
        .progress_chars("#>-"))
}

/// Progress reporter using indicatif progress bars, one bar per pass
#[derive(Default)]
pub struct IndicatifProgress {
    bar: Option<ProgressBar>,
    retries: usize,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for IndicatifProgress {
    fn start(&mut self, pass: Pass, total_pages: usize) {
        let pb = ProgressBar::new(total_pages as u64);
        let pb = match create_page_bar_style() {
            Ok(style) => pb.with_style(style),
            Err(_) => pb,
        };
        pb.set_prefix(pass.to_string());
        self.bar = Some(pb);
        self.retries = 0;
    }

    fn advance(&mut self, pages_done: usize, _total_pages: usize) {
        if let Some(pb) = &self.bar {
            pb.set_position(pages_done as u64);
        }
    }

    fn retry(&mut self, pass: Pass, page: usize, failure: Failure) {
        self.retries += 1;
        log::debug!("{}: retrying page {} ({})", pass, page, failure);
        if let Some(pb) = &self.bar {
            pb.set_message(format!("({} retries)", self.retries));
        }
    }

    fn abort(&mut self, pass: Pass, page: usize, failure: Failure) {
        if let Some(pb) = self.bar.take() {
            pb.abandon_with_message(format!("failed at page {}: {}", page, failure));
        } else {
            log::error!("{} failed at page {}: {}", pass, page, failure);
        }
    }

    fn finish(&mut self, _pass: Pass) {
        if let Some(pb) = self.bar.take() {
            if self.retries > 0 {
                pb.finish_with_message(format!("done ({} retries)", self.retries));
            } else {
                pb.finish_with_message("done");
            }
        }
    }
}
