//! Per-page retry policy
//!
//! Each pass keeps a small set of bounded counters for the page it is on.
//! The methods here are pure transitions: they update the counters and say
//! what the pass should do next, without touching the device.

use super::Failure;

/// What the pass does after an attempt on the current page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Re-initialize the link, settle, retry the page
    LinkRetry,
    /// Settle (and for programming, re-initialize), retry the page
    DataRetry,
    /// Erase the page explicitly, re-initialize, retry
    EraseEscalate,
    /// Budget exhausted; the pass fails
    Abort(Failure),
}

/// Link failures tolerated per page while blank checking
pub const BLANK_MAX_LINK_ERRORS: u8 = 3;
/// Non-blank reads tolerated per page while blank checking
pub const BLANK_MAX_DATA_ERRORS: u8 = 10;
/// Link failures tolerated per page while verifying
pub const VERIFY_MAX_LINK_ERRORS: u8 = 3;
/// Mismatching reads tolerated per page while verifying
pub const VERIFY_MAX_DATA_ERRORS: u8 = 10;
/// Write, read, mismatch and erase budget per page while programming
pub const PROGRAM_MAX_ERRORS: u8 = 3;

/// Counters for the read-only passes (blank check, verify)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRetry {
    link: u8,
    data: u8,
    max_link: u8,
    max_data: u8,
    data_failure: Failure,
}

impl ScanRetry {
    /// Policy for the blank check pass
    pub const fn blank_check() -> Self {
        Self::new(BLANK_MAX_LINK_ERRORS, BLANK_MAX_DATA_ERRORS, Failure::NotBlank)
    }

    /// Policy for the verify pass
    pub const fn verify() -> Self {
        Self::new(VERIFY_MAX_LINK_ERRORS, VERIFY_MAX_DATA_ERRORS, Failure::Mismatch)
    }

    const fn new(max_link: u8, max_data: u8, data_failure: Failure) -> Self {
        Self {
            link: 0,
            data: 0,
            max_link,
            max_data,
            data_failure,
        }
    }

    /// The page could not be read
    pub fn on_link_error(&mut self) -> Step {
        self.link += 1;
        if self.link > self.max_link {
            Step::Abort(Failure::Link)
        } else {
            Step::LinkRetry
        }
    }

    /// The page was read but its content is wrong
    pub fn on_data_error(&mut self) -> Step {
        self.data += 1;
        if self.data > self.max_data {
            Step::Abort(self.data_failure)
        } else {
            Step::DataRetry
        }
    }

    /// The page passed; start the next one from zero
    pub fn on_success(&mut self) {
        self.link = 0;
        self.data = 0;
    }

    /// Failure class reported when the data budget runs out
    pub fn data_failure(&self) -> Failure {
        self.data_failure
    }

    /// (link, data) counters, for logging
    pub fn counters(&self) -> (u8, u8) {
        (self.link, self.data)
    }
}

/// Counters for the program pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramRetry {
    write: u8,
    link: u8,
    data: u8,
    erase: u8,
}

impl ProgramRetry {
    /// Fresh counters
    pub const fn new() -> Self {
        Self {
            write: 0,
            link: 0,
            data: 0,
            erase: 0,
        }
    }

    /// The page is rewritten unless the last failure was on the link side
    pub fn should_write(&self) -> bool {
        self.link == 0
    }

    /// `page_write` failed
    pub fn on_write_error(&mut self) -> Step {
        self.write += 1;
        if self.write > PROGRAM_MAX_ERRORS {
            Step::Abort(Failure::Write)
        } else {
            Step::LinkRetry
        }
    }

    /// `page_read` failed after the write
    pub fn on_read_error(&mut self) -> Step {
        self.link += 1;
        if self.link > PROGRAM_MAX_ERRORS {
            Step::Abort(Failure::Read)
        } else {
            Step::LinkRetry
        }
    }

    /// Read-back differs from the source and is entirely erased
    pub fn on_blank_readback(&mut self) -> Step {
        self.link += 1;
        if self.link <= PROGRAM_MAX_ERRORS {
            return Step::LinkRetry;
        }
        self.erase += 1;
        if self.erase > PROGRAM_MAX_ERRORS {
            return Step::Abort(Failure::EraseBudget);
        }
        self.link = 0;
        Step::EraseEscalate
    }

    /// Read-back differs from the source and is not erased
    pub fn on_mismatch(&mut self) -> Step {
        self.link = 0;
        self.data += 1;
        if self.data > PROGRAM_MAX_ERRORS {
            Step::Abort(Failure::Mismatch)
        } else {
            Step::DataRetry
        }
    }

    /// The page verified; reset everything for the next one
    pub fn on_success(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_check_budgets() {
        let mut r = ScanRetry::blank_check();
        for _ in 0..3 {
            assert_eq!(r.on_link_error(), Step::LinkRetry);
        }
        assert_eq!(r.on_link_error(), Step::Abort(Failure::Link));

        let mut r = ScanRetry::blank_check();
        for _ in 0..10 {
            assert_eq!(r.on_data_error(), Step::DataRetry);
        }
        assert_eq!(r.on_data_error(), Step::Abort(Failure::NotBlank));
    }

    #[test]
    fn test_scan_success_resets() {
        let mut r = ScanRetry::verify();
        r.on_link_error();
        r.on_data_error();
        r.on_success();
        assert_eq!(r.counters(), (0, 0));
        for _ in 0..10 {
            assert_eq!(r.on_data_error(), Step::DataRetry);
        }
        assert_eq!(r.on_data_error(), Step::Abort(Failure::Mismatch));
    }

    #[test]
    fn test_scan_never_escalates() {
        for mut r in [ScanRetry::blank_check(), ScanRetry::verify()] {
            let mut steps = Vec::new();
            loop {
                let step = if steps.len() % 2 == 0 {
                    r.on_link_error()
                } else {
                    r.on_data_error()
                };
                steps.push(step);
                if matches!(step, Step::Abort(_)) {
                    break;
                }
            }
            assert!(steps
                .iter()
                .all(|s| matches!(s, Step::LinkRetry | Step::DataRetry | Step::Abort(_))));
            assert_eq!(steps.last(), Some(&Step::Abort(Failure::Link)));
        }
    }

    #[test]
    fn test_program_write_budget() {
        let mut r = ProgramRetry::new();
        for _ in 0..3 {
            assert_eq!(r.on_write_error(), Step::LinkRetry);
            assert!(r.should_write());
        }
        assert_eq!(r.on_write_error(), Step::Abort(Failure::Write));
    }

    #[test]
    fn test_program_read_error_skips_rewrite() {
        let mut r = ProgramRetry::new();
        assert_eq!(r.on_read_error(), Step::LinkRetry);
        assert!(!r.should_write());
        r.on_read_error();
        r.on_read_error();
        assert_eq!(r.on_read_error(), Step::Abort(Failure::Read));
    }

    #[test]
    fn test_program_erase_escalation() {
        let mut r = ProgramRetry::new();
        let mut erases = 0;
        let outcome = loop {
            match r.on_blank_readback() {
                Step::LinkRetry => assert!(!r.should_write()),
                Step::EraseEscalate => {
                    erases += 1;
                    assert!(r.should_write());
                }
                Step::Abort(f) => break f,
                other => panic!("unexpected {:?}", other),
            }
        };
        assert_eq!(outcome, Failure::EraseBudget);
        assert_eq!(erases, 3);
    }

    #[test]
    fn test_program_first_escalation_after_three_retries() {
        let mut r = ProgramRetry::new();
        assert_eq!(r.on_blank_readback(), Step::LinkRetry);
        assert_eq!(r.on_blank_readback(), Step::LinkRetry);
        assert_eq!(r.on_blank_readback(), Step::LinkRetry);
        assert_eq!(r.on_blank_readback(), Step::EraseEscalate);
    }

    #[test]
    fn test_program_mismatch_clears_link_counter() {
        let mut r = ProgramRetry::new();
        r.on_blank_readback();
        assert_eq!(r.on_mismatch(), Step::DataRetry);
        assert!(r.should_write());
        r.on_mismatch();
        r.on_mismatch();
        assert_eq!(r.on_mismatch(), Step::Abort(Failure::Mismatch));
        r.on_success();
        assert_eq!(r, ProgramRetry::new());
    }
}
