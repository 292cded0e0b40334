//! UPDI link layer
//!
//! Encodes instructions into frames (`SYNC`, opcode, operands) and checks the
//! single-byte acknowledgements the target returns after stores. Every
//! operation is a strict send-then-receive pair; a new frame is never issued
//! before the previous ACK (or its timeout) has been consumed.

use crate::constants::*;
use crate::error::{Error, Result};
use crate::poll::Delay;

/// Byte transport under the link layer
///
/// Implemented by [`crate::phy::Phy`] for real hardware and by emulators in
/// tests. Only one exchange may be in flight at a time.
pub trait UpdiTransport: Delay {
    /// Transmit bytes; does not retry
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive up to `buf.len()` bytes, returning how many arrived.
    ///
    /// A short count means the start-bit wait timed out; it is not an error
    /// at this level.
    fn receive(&mut self, buf: &mut [u8]) -> usize;

    /// Force the target's UPDI state machine back to idle
    fn double_break(&mut self);
}

impl<T: UpdiTransport + ?Sized> UpdiTransport for Box<T> {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        (**self).send(data)
    }

    fn receive(&mut self, buf: &mut [u8]) -> usize {
        (**self).receive(buf)
    }

    fn double_break(&mut self) {
        (**self).double_break()
    }
}

/// UPDI link over a byte transport
pub struct Link<T: UpdiTransport> {
    transport: T,
}

impl<T: UpdiTransport> Link<T> {
    /// Wrap a transport
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Access the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Access the transport mutably
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give the transport back
    pub fn into_inner(self) -> T {
        self.transport
    }

    fn receive_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let n = self.transport.receive(buf);
        if n != buf.len() {
            log::debug!("link: short read, {} of {} bytes", n, buf.len());
            return Err(Error::Timeout);
        }
        Ok(())
    }

    fn expect_ack(&mut self) -> Result<()> {
        let mut response = [0u8; 1];
        match self.transport.receive(&mut response) {
            1 if response[0] == ACK => Ok(()),
            1 => Err(Error::NoAck {
                response: Some(response[0]),
            }),
            _ => Err(Error::NoAck { response: None }),
        }
    }

    /// Load a byte from control/status space
    pub fn load_cs(&mut self, address: u8) -> Result<u8> {
        self.transport.send(&[SYNC, LDCS | (address & 0x0F)])?;
        let mut response = [0u8; 1];
        self.receive_exact(&mut response)?;
        Ok(response[0])
    }

    /// Store a byte to control/status space (no acknowledge)
    pub fn store_cs(&mut self, address: u8, value: u8) -> Result<()> {
        self.transport
            .send(&[SYNC, STCS | (address & 0x0F), value])
    }

    /// Load a single byte from a 16-bit data-space address
    pub fn load_byte(&mut self, address: u16) -> Result<u8> {
        let [lo, hi] = address.to_le_bytes();
        self.transport
            .send(&[SYNC, LDS | ADDRESS_16 | DATA_8, lo, hi])?;
        let mut response = [0u8; 1];
        self.receive_exact(&mut response)?;
        Ok(response[0])
    }

    /// Store a single byte to a 16-bit data-space address
    ///
    /// The value is only sent once the address phase has been acknowledged.
    pub fn store_byte(&mut self, address: u16, value: u8) -> Result<()> {
        let [lo, hi] = address.to_le_bytes();
        self.transport
            .send(&[SYNC, STS | ADDRESS_16 | DATA_8, lo, hi])?;
        self.expect_ack()?;

        self.transport.send(&[value])?;
        self.expect_ack()
    }

    /// Set the target's pointer register for burst access
    pub fn set_pointer(&mut self, address: u16) -> Result<()> {
        let [lo, hi] = address.to_le_bytes();
        self.transport
            .send(&[SYNC, ST | PTR_ADDRESS | DATA_16, lo, hi])?;
        self.expect_ack()
    }

    /// Replay the next LD/ST instruction `count` times
    pub fn set_repeat(&mut self, count: usize) -> Result<()> {
        if count == 0 || count > MAX_BURST {
            return Err(Error::SizeError {
                len: count,
                min: 1,
                max: MAX_BURST,
            });
        }
        let [lo, hi] = ((count - 1) as u16).to_le_bytes();
        self.transport
            .send(&[SYNC, REPEAT | REPEAT_WORD, lo, hi])
    }

    /// Store bytes through the pointer with post-increment, each one ACKed
    pub fn burst_write(&mut self, data: &[u8]) -> Result<()> {
        let Some((&first, rest)) = data.split_first() else {
            return Err(Error::SizeError {
                len: 0,
                min: 1,
                max: MAX_BURST,
            });
        };

        self.transport
            .send(&[SYNC, ST | PTR_INC | DATA_8, first])?;
        self.expect_ack()?;

        for &byte in rest {
            self.transport.send(&[byte])?;
            self.expect_ack()?;
        }
        Ok(())
    }

    /// Load bytes through the pointer with post-increment
    pub fn burst_read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.transport.send(&[SYNC, LD | PTR_INC | DATA_8])?;
        self.receive_exact(buf)
    }

    /// Send a 64-bit key; the wire order is the reverse of the key string
    pub fn send_key(&mut self, key: &[u8; 8]) -> Result<()> {
        self.transport.send(&[SYNC, KEY | KEY_KEY | KEY_64])?;
        let mut reversed = *key;
        reversed.reverse();
        self.transport.send(&reversed)
    }

    /// Double break, restore CTRLA/CTRLB and check that STATUSA answers
    pub fn connect(&mut self) -> Result<()> {
        self.transport.double_break();

        self.store_cs(CS_CTRLB, CtrlB::CCDETDIS.bits())?;
        self.store_cs(CS_CTRLA, CtrlA::IBDLY.bits())?;

        match self.load_cs(CS_STATUSA) {
            Ok(0) | Err(Error::Timeout) => {
                log::debug!("link: no answer from STATUSA");
                Err(Error::LinkDown)
            }
            Ok(status) => {
                log::debug!("link: up, STATUSA=0x{:02X}", status);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl<T: UpdiTransport> Delay for Link<T> {
    fn delay_us(&mut self, us: u32) {
        self.transport.delay_us(us);
    }
}
