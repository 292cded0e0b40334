//! Progress callbacks for the NVM passes

use super::{Failure, Pass};

/// Callback for progress reporting while a pass walks the flash
pub trait ProgressReporter {
    /// Called once before the first page, with the page count of the pass
    fn start(&mut self, pass: Pass, total_pages: usize);

    /// Called after each page that completed successfully
    fn advance(&mut self, pages_done: usize, total_pages: usize);

    /// Called when a page is about to be retried
    fn retry(&mut self, pass: Pass, page: usize, failure: Failure);

    /// Called when the pass gives up
    fn abort(&mut self, pass: Pass, page: usize, failure: Failure);

    /// Called when the pass completed every page
    fn finish(&mut self, pass: Pass);
}

/// A no-op progress reporter
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn start(&mut self, _pass: Pass, _total_pages: usize) {}
    fn advance(&mut self, _pages_done: usize, _total_pages: usize) {}
    fn retry(&mut self, _pass: Pass, _page: usize, _failure: Failure) {}
    fn abort(&mut self, _pass: Pass, _page: usize, _failure: Failure) {}
    fn finish(&mut self, _pass: Pass) {}
}
