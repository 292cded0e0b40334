//! Single-pin GPIO capability consumed by the PHY
//!
//! This is the only hardware seam of the stack. Implementations drive one
//! open-drain style line that the programmer and the target share:
//! - `updiprog-linux-gpio` - Linux GPIO character device
//! - test doubles that record or replay waveforms
//!
//! Like other bitbang traits, the level operations cannot fail: an
//! implementation that hits an I/O error logs it and carries on, since
//! the protocol layers above detect the resulting garbage anyway.

use crate::poll::Delay;

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Released, pull disabled; the target may drive the line
    Input,
    /// Driven by the programmer
    Output,
}

/// Pin/timing capability
pub trait UpdiPin: Delay {
    /// Switch the pin direction
    fn set_direction(&mut self, dir: Direction);

    /// Drive the line (only meaningful as output)
    fn write_level(&mut self, high: bool);

    /// Sample the line
    fn read_level(&mut self) -> bool;
}

impl<P: UpdiPin + ?Sized> UpdiPin for Box<P> {
    fn set_direction(&mut self, dir: Direction) {
        (**self).set_direction(dir)
    }

    fn write_level(&mut self, high: bool) {
        (**self).write_level(high)
    }

    fn read_level(&mut self) -> bool {
        (**self).read_level()
    }
}
