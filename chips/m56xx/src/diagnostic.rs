// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Out-of-band byte channel over the diagnostic interrupt endpoint (EP3 IN).
//!
//! Bytes are queued in a ring buffer and moved into the one-packet FIFO as it
//! frees up: once right after each enqueue, and once on every `INTR_TX`
//! interrupt. Each byte is sent as its own forced packet.
//!
//! The channel implements [`IoWrite`], so a board can route `debug!` through
//! it:
//!
//! ```rust,ignore
//! static DIAGNOSTIC: DiagnosticEndpoint<UsbRegisterBlock> =
//!     DiagnosticEndpoint::new(&USB_REGISTERS);
//!
//! DIAGNOSTIC.init();
//! usbd.set_diagnostic(&DIAGNOSTIC);
//! kernel::debug::set_debug_writer(&DIAGNOSTIC);
//! ```

use crate::interrupt::{InterruptMask, InterruptSource};
use crate::registers::{Channel, UsbPeripheral, EPCTRL};
use kernel::collections::queue::Queue;
use kernel::collections::ring_buffer::RingBuffer;
use kernel::debug::IoWrite;
use kernel::utilities::cells::MapCell;
use kernel::ErrorCode;

pub const RING_CAPACITY: usize = 128;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

pub struct DiagnosticEndpoint<'a, R: UsbPeripheral> {
    regs: &'a R,
    ring: MapCell<RingBuffer<u8, RING_CAPACITY>>,
}

impl<'a, R: UsbPeripheral> DiagnosticEndpoint<'a, R> {
    pub const fn new(regs: &'a R) -> Self {
        DiagnosticEndpoint {
            regs,
            ring: MapCell::new(RingBuffer::new(0)),
        }
    }

    /// Reset the endpoint FIFO and put it in send mode. Called once during
    /// board bring-up.
    pub fn init(&self) {
        self.regs
            .write_ctrl(Channel::Diagnostic, EPCTRL::FIFO_RESET::SET);
        self.regs.set_ctrl(Channel::Diagnostic, 0);
        self.regs
            .modify_ctrl(Channel::Diagnostic, EPCTRL::MODE::Send);
    }

    /// Queue one byte. Fails with `BUSY` if the ring is full; queued bytes
    /// are never overwritten.
    pub fn enqueue(&self, byte: u8) -> Result<(), ErrorCode> {
        let _mask = InterruptMask::new(self.regs, InterruptSource::Diagnostic);
        let queued = self.ring.map(|ring| ring.enqueue(byte)).unwrap_or(false);
        if !queued {
            return Err(ErrorCode::BUSY);
        }
        self.drain_one();
        Ok(())
    }

    /// Move the oldest queued byte into the FIFO if there is room for it.
    ///
    /// Runs in interrupt context on every `INTR_TX`, and from `enqueue` with
    /// that source masked.
    pub(crate) fn drain_one(&self) {
        if self.regs.ctrl(Channel::Diagnostic).is_set(EPCTRL::FIFOSTAT) {
            return;
        }
        if let Some(Some(byte)) = self.ring.map(|ring| ring.dequeue()) {
            self.regs.fifo_write(Channel::Diagnostic, byte);
            self.regs
                .modify_ctrl(Channel::Diagnostic, EPCTRL::FORCE_TX::SET);
        }
    }

    /// Number of bytes waiting for the FIFO.
    pub fn queued(&self) -> usize {
        self.ring.map(|ring| ring.len()).unwrap_or(0)
    }

    /// Queue every byte of `s`, stopping at the first one that does not fit.
    /// Bytes queued before the failure stay queued.
    pub fn put_str(&self, s: &str) -> Result<(), ErrorCode> {
        s.bytes().try_for_each(|b| self.enqueue(b))
    }

    /// Queue `byte` as two uppercase hex digits.
    pub fn put_hex_u8(&self, byte: u8) -> Result<(), ErrorCode> {
        self.enqueue(HEX_DIGITS[(byte >> 4) as usize])?;
        self.enqueue(HEX_DIGITS[(byte & 0x0f) as usize])
    }

    /// Queue `value` as two raw bytes, low byte first.
    pub fn put_u16(&self, value: u16) -> Result<(), ErrorCode> {
        value.to_le_bytes().iter().try_for_each(|&b| self.enqueue(b))
    }
}

impl<R: UsbPeripheral> IoWrite for DiagnosticEndpoint<'_, R> {
    fn write(&self, buf: &[u8]) -> usize {
        buf.iter()
            .take_while(|&&b| self.enqueue(b).is_ok())
            .count()
    }
}
