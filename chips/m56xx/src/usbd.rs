// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! USB device controller driver for the M56xx.
//!
//! The peripheral has no DMA and no packet buffers of its own beyond one FIFO
//! per endpoint, so every packet is moved a byte at a time by the CPU:
//!
//! - IN transfers are written into the FIFO until it reports full. The
//!   hardware sends full packets by itself; a short final packet (including a
//!   zero-length one) must be flushed with `FORCE_TX`. Each Tx interrupt
//!   either refills the FIFO or, once the buffer is exhausted, completes the
//!   transfer.
//! - OUT transfers complete on the first packet that arrives, with however
//!   many bytes it carried. Data that arrives while no receive is pending is
//!   kept in a staging buffer and copied into the next receive straight away.
//!   That receive is reported from a deferred call, never from inside
//!   `transfer()`, so a board must `register()` the driver as a
//!   `DeferredCallClient`.
//! - SETUP packets arrive on the control FIFO, flagged by `EPCTRL::SETUP`, and
//!   are reported on their own regardless of any pending control receive.
//!
//! Transfer state is shared between the foreground (`transfer()`) and the
//! interrupt handler. Each direction has one transfer in flight at a time; a
//! second submission gets `BUSY` and its buffer back. The foreground masks the one interrupt source that can
//! touch the state it is changing with an [`InterruptMask`] guard instead of
//! disabling interrupts globally.
//!
//! Endpoints:
//!
//! | address | channel | max packet |
//! |---------|---------|------------|
//! | 0x00 / 0x80 | control | 64 |
//! | 0x81 | bulk IN | 512 |
//! | 0x02 | bulk OUT | 512 |
//! | 0x83 | diagnostic, see [`crate::diagnostic`] | 8 |

use core::cell::Cell;

use kernel::debug;
use kernel::deferred_call::{DeferredCall, DeferredCallClient};
use kernel::hil::usb::{self, EndpointDescriptor, TransferStatus, TransferType};
use kernel::utilities::cells::{MapCell, OptionalCell, TakeCell};
use kernel::ErrorCode;

use crate::config::{Config, CONFIG};
use crate::diagnostic::DiagnosticEndpoint;
use crate::interrupt::{InterruptMask, InterruptSource};
use crate::registers::{Channel, UsbPeripheral, EPCTRL, IE};

pub const CONTROL_OUT: u8 = 0x00;
pub const CONTROL_IN: u8 = 0x80;
pub const BULK_IN: u8 = 0x81;
pub const BULK_OUT: u8 = 0x02;
pub const DIAGNOSTIC_IN: u8 = 0x83;

const CONTROL_MAX_PACKET: usize = Channel::Control.max_packet_size();
const BULK_MAX_PACKET: usize = Channel::BulkOut.max_packet_size();

/// One direction of one endpoint.
///
/// Idle while `buffer` is empty. A submitted transfer is only touched by the
/// interrupt handler until it completes, except through the masked submit
/// and cancel paths. A parked transfer already holds its data and waits for
/// the deferred call to report it.
struct Transfer {
    buffer: TakeCell<'static, [u8]>,
    completed: Cell<usize>,
    remaining: Cell<usize>,
    parked: Cell<bool>,
}

impl Transfer {
    const fn new() -> Self {
        Transfer {
            buffer: TakeCell::empty(),
            completed: Cell::new(0),
            remaining: Cell::new(0),
            parked: Cell::new(false),
        }
    }

    fn is_active(&self) -> bool {
        self.buffer.is_some()
    }

    /// Active and still expecting the hardware to move data.
    fn is_waiting(&self) -> bool {
        self.is_active() && !self.parked.get()
    }

    fn start(&self, buffer: &'static mut [u8], length: usize) {
        self.buffer.put(Some(buffer));
        self.completed.set(0);
        self.remaining.set(length);
        self.parked.set(false);
    }

    fn park(&self, buffer: &'static mut [u8], length: usize) {
        self.buffer.put(Some(buffer));
        self.completed.set(length);
        self.remaining.set(0);
        self.parked.set(true);
    }

    /// Return the buffer and the byte count, leaving the transfer idle.
    fn finish(&self) -> Option<(&'static mut [u8], usize)> {
        let buffer = self.buffer.take()?;
        let completed = self.completed.get();
        self.completed.set(0);
        self.remaining.set(0);
        self.parked.set(false);
        Some((buffer, completed))
    }
}

/// Bytes that arrived on an OUT channel before anyone asked for them.
struct Staging<const N: usize> {
    data: MapCell<[u8; N]>,
    len: Cell<usize>,
}

impl<const N: usize> Staging<N> {
    const fn new() -> Self {
        Staging {
            data: MapCell::new([0; N]),
            len: Cell::new(0),
        }
    }

    /// Drain the channel's FIFO into the staging buffer. Bytes beyond its
    /// capacity are read out and lost; returns how many.
    fn fill<R: UsbPeripheral>(&self, regs: &R, channel: Channel) -> usize {
        let mut dropped = 0;
        self.data.map(|data| {
            let mut len = self.len.get();
            for _ in 0..channel.max_packet_size() {
                if regs.ctrl(channel).is_set(EPCTRL::FIFOSTAT) {
                    break;
                }
                let byte = regs.fifo_read(channel);
                if len < N {
                    data[len] = byte;
                    len += 1;
                } else {
                    dropped += 1;
                }
            }
            self.len.set(len);
        });
        dropped
    }

    /// Copy staged bytes into `dest` and empty the staging buffer. Returns
    /// the bytes copied and the bytes that did not fit.
    fn take_into(&self, dest: &mut [u8]) -> (usize, usize) {
        let staged = self.len.get();
        let copied = staged.min(dest.len());
        self.data
            .map(|data| dest[..copied].copy_from_slice(&data[..copied]));
        self.len.set(0);
        (copied, staged - copied)
    }

    fn clear(&self) {
        self.len.set(0);
    }
}

pub struct Usbd<'a, R: UsbPeripheral> {
    regs: &'a R,
    config: Config,
    client: OptionalCell<&'a dyn usb::Client<'a>>,
    deferred_call: DeferredCall,
    diagnostic: OptionalCell<&'a DiagnosticEndpoint<'a, R>>,
    ctrl_in: Transfer,
    ctrl_out: Transfer,
    bulk_in: Transfer,
    bulk_out: Transfer,
    ctrl_staging: Staging<CONTROL_MAX_PACKET>,
    bulk_staging: Staging<BULK_MAX_PACKET>,
    /// The control Tx source always fires once after a reset with nothing
    /// sent. Set by `init()`, cleared by the first control Tx interrupt.
    ctrl_tx_spurious: Cell<bool>,
    /// Open flags for the control, bulk IN and bulk OUT endpoints.
    opened: [Cell<bool>; 3],
}

impl<'a, R: UsbPeripheral> Usbd<'a, R> {
    pub const fn new(regs: &'a R) -> Self {
        Self::new_with_config(regs, CONFIG)
    }

    pub const fn new_with_config(regs: &'a R, config: Config) -> Self {
        Usbd {
            regs,
            config,
            client: OptionalCell::empty(),
            deferred_call: DeferredCall::new(),
            diagnostic: OptionalCell::empty(),
            ctrl_in: Transfer::new(),
            ctrl_out: Transfer::new(),
            bulk_in: Transfer::new(),
            bulk_out: Transfer::new(),
            ctrl_staging: Staging::new(),
            bulk_staging: Staging::new(),
            ctrl_tx_spurious: Cell::new(false),
            opened: [Cell::new(false), Cell::new(false), Cell::new(false)],
        }
    }

    /// Have the interrupt handler feed the diagnostic endpoint on `INTR_TX`.
    pub fn set_diagnostic(&self, diagnostic: &'a DiagnosticEndpoint<'a, R>) {
        self.diagnostic.set(diagnostic);
    }

    pub fn is_open(&self, address: u8) -> bool {
        Self::open_index(address).is_some_and(|i| self.opened[i].get())
    }

    /// The transfer context an endpoint address selects.
    fn transfer_for(&self, address: u8) -> Option<&Transfer> {
        match address {
            CONTROL_IN => Some(&self.ctrl_in),
            CONTROL_OUT => Some(&self.ctrl_out),
            BULK_IN => Some(&self.bulk_in),
            BULK_OUT => Some(&self.bulk_out),
            _ => None,
        }
    }

    fn open_index(address: u8) -> Option<usize> {
        match address {
            CONTROL_OUT | CONTROL_IN => Some(0),
            BULK_IN => Some(1),
            BULK_OUT => Some(2),
            _ => None,
        }
    }

    /// The channel whose stall bit an endpoint address selects.
    fn stall_channel(address: u8) -> Channel {
        match usb::endpoint_number(address) {
            0 => Channel::Control,
            1 => Channel::BulkIn,
            2 => Channel::BulkOut,
            _ => panic!("usbd: no endpoint to stall for address {:#04x}", address),
        }
    }

    fn complete(
        &self,
        address: u8,
        buffer: Option<&'static mut [u8]>,
        length: usize,
        status: TransferStatus,
    ) {
        if self.config.trace_transfers {
            debug!(
                "usbd: ep {:#04x} complete, {} bytes, {:?}",
                address, length, status
            );
        }
        self.client
            .map(move |client| client.transfer_complete(address, buffer, length, status));
    }

    fn finish(&self, address: u8, transfer: &Transfer, status: TransferStatus) {
        if let Some((buffer, length)) = transfer.finish() {
            self.complete(address, Some(buffer), length, status);
        }
    }

    /// Write as much of the transfer into the FIFO as fits. Once the last
    /// byte is written, a short packet is flushed with `FORCE_TX`; a full one
    /// goes out on its own.
    fn fill_fifo(&self, channel: Channel, transfer: &Transfer) {
        let start = transfer.completed.get();
        let remaining = transfer.remaining.get();
        let packet = remaining.min(channel.max_packet_size());
        let written = transfer
            .buffer
            .map(|buffer| {
                let mut written = 0;
                while written < packet && !self.regs.ctrl(channel).is_set(EPCTRL::FIFOSTAT) {
                    self.regs.fifo_write(channel, buffer[start + written]);
                    written += 1;
                }
                written
            })
            .unwrap_or(0);

        transfer.completed.set(start + written);
        transfer.remaining.set(remaining - written);
        if written == remaining && written < channel.max_packet_size() {
            self.regs.modify_ctrl(channel, EPCTRL::FORCE_TX::SET);
        }
    }

    fn send(
        &self,
        channel: Channel,
        source: InterruptSource,
        transfer: &Transfer,
        buffer: &'static mut [u8],
        length: usize,
    ) {
        let _mask = InterruptMask::new(self.regs, source);
        self.regs.modify_ctrl(channel, EPCTRL::MODE::Send);
        transfer.start(buffer, length);
        self.fill_fifo(channel, transfer);
    }

    fn send_complete(&self, address: u8, channel: Channel, transfer: &Transfer) {
        if !transfer.is_active() {
            return;
        }
        if transfer.remaining.get() > 0 {
            self.fill_fifo(channel, transfer);
        } else {
            self.finish(address, transfer, TransferStatus::Success);
        }
    }

    fn receive<const N: usize>(
        &self,
        address: u8,
        channel: Channel,
        source: InterruptSource,
        transfer: &Transfer,
        staging: &Staging<N>,
        buffer: &'static mut [u8],
        length: usize,
    ) {
        let _mask = InterruptMask::new(self.regs, source);
        if staging.len.get() > 0 {
            let (copied, dropped) = staging.take_into(&mut buffer[..length]);
            if dropped > 0 {
                debug!(
                    "usbd: ep {:#04x} discarded {} staged bytes beyond the request",
                    address, dropped
                );
            }
            transfer.park(buffer, copied);
            self.deferred_call.set();
        } else {
            self.regs.modify_ctrl(channel, EPCTRL::MODE::Receive);
            transfer.start(buffer, length);
        }
    }

    fn receive_complete<const N: usize>(
        &self,
        address: u8,
        channel: Channel,
        transfer: &Transfer,
        staging: &Staging<N>,
    ) {
        let ctrl = self.regs.ctrl(channel);

        if channel == Channel::Control && ctrl.is_set(EPCTRL::SETUP) {
            let mut setup = [0; 8];
            for byte in setup.iter_mut() {
                *byte = self.regs.fifo_read(channel);
            }
            self.regs.modify_ctrl(channel, EPCTRL::SETUP::CLEAR);
            self.client.map(|client| client.setup_received(&setup));
            return;
        }

        if ctrl.is_set(EPCTRL::FIFOSTAT) {
            // Nothing to read: a zero-length packet.
            if transfer.is_waiting() {
                self.finish(address, transfer, TransferStatus::Success);
            } else {
                self.complete(address, None, 0, TransferStatus::Success);
            }
            return;
        }

        if transfer.is_waiting() {
            let start = transfer.completed.get();
            let wanted = transfer.remaining.get().min(channel.max_packet_size());
            let read = transfer
                .buffer
                .map(|buffer| {
                    let mut read = 0;
                    while read < wanted && !self.regs.ctrl(channel).is_set(EPCTRL::FIFOSTAT) {
                        buffer[start + read] = self.regs.fifo_read(channel);
                        read += 1;
                    }
                    read
                })
                .unwrap_or(0);
            transfer.completed.set(start + read);
            transfer.remaining.set(transfer.remaining.get() - read);
            self.finish(address, transfer, TransferStatus::Success);
        } else {
            let dropped = staging.fill(self.regs, channel);
            if dropped > 0 {
                debug!(
                    "usbd: ep {:#04x} staging full, dropped {} bytes",
                    address, dropped
                );
            }
        }
    }

    fn control_send_complete(&self) {
        if self.ctrl_tx_spurious.replace(false) {
            return;
        }
        self.send_complete(CONTROL_IN, Channel::Control, &self.ctrl_in);
    }

    /// Put the control endpoint back in its power-on state and hand back any
    /// control transfer the reset cut short. Bulk endpoints and their
    /// transfers are left as they are.
    fn bus_reset(&self) {
        self.regs
            .write_ctrl(Channel::Control, EPCTRL::FIFO_RESET::SET);
        self.regs.write_ctrl(Channel::Control, EPCTRL::MODE::Receive);
        self.finish(CONTROL_IN, &self.ctrl_in, TransferStatus::Cancelled);
        self.finish(CONTROL_OUT, &self.ctrl_out, TransferStatus::Cancelled);
        self.client.map(|client| client.bus_reset());
    }

    fn reset_channel(&self, channel: Channel) {
        self.regs.write_ctrl(channel, EPCTRL::FIFO_RESET::SET);
        let mode = match channel {
            Channel::BulkIn | Channel::Diagnostic => EPCTRL::MODE::Send,
            Channel::Control | Channel::BulkOut => EPCTRL::MODE::Receive,
        };
        self.regs.write_ctrl(channel, mode);
    }

    /// Service every pending USB interrupt source once.
    ///
    /// Runs on external interrupt 0. The USB gate (`EX0`) stays closed for
    /// the whole handler, so a source raised again while it runs is seen on
    /// the next entry.
    pub fn handle_interrupt(&self) {
        self.regs.modify_cpu_interrupts(IE::EX0::CLEAR);

        let flags = self.regs.take_interrupt_flags();

        if self.config.global_interrupt_handoff {
            self.regs.modify_cpu_interrupts(IE::EA::CLEAR);
        }

        for source in InterruptSource::decode(flags) {
            match source {
                InterruptSource::Diagnostic => {
                    self.diagnostic.map(|diagnostic| diagnostic.drain_one());
                }
                InterruptSource::ControlTx => self.control_send_complete(),
                InterruptSource::ControlRx => self.receive_complete(
                    CONTROL_OUT,
                    Channel::Control,
                    &self.ctrl_out,
                    &self.ctrl_staging,
                ),
                InterruptSource::BusReset => self.bus_reset(),
                InterruptSource::BulkOutRx => self.receive_complete(
                    BULK_OUT,
                    Channel::BulkOut,
                    &self.bulk_out,
                    &self.bulk_staging,
                ),
                InterruptSource::BulkInTx => {
                    self.send_complete(BULK_IN, Channel::BulkIn, &self.bulk_in)
                }
            }
        }

        if self.config.global_interrupt_handoff {
            self.regs.modify_cpu_interrupts(IE::EA::SET);
        }

        self.regs.modify_cpu_interrupts(IE::EX0::SET);
    }
}

impl<R: UsbPeripheral> DeferredCallClient for Usbd<'_, R> {
    /// Report receives that were served from the staging buffers.
    fn handle_deferred_call(&self) {
        for (address, source, transfer) in [
            (CONTROL_OUT, InterruptSource::ControlRx, &self.ctrl_out),
            (BULK_OUT, InterruptSource::BulkOutRx, &self.bulk_out),
        ] {
            let _mask = InterruptMask::new(self.regs, source);
            if transfer.parked.get() {
                self.finish(address, transfer, TransferStatus::Success);
            }
        }
    }

    fn register(&'static self) {
        self.deferred_call.register(self);
    }
}

impl<'a, R: UsbPeripheral> usb::UsbController<'a> for Usbd<'a, R> {
    fn set_client(&self, client: &'a dyn usb::Client<'a>) {
        self.client.set(client);
    }

    fn init(&self) {
        self.regs.set_interrupt_enable(0);
        for channel in [Channel::Control, Channel::BulkIn, Channel::BulkOut] {
            self.reset_channel(channel);
        }
        for (address, transfer) in [
            (CONTROL_IN, &self.ctrl_in),
            (CONTROL_OUT, &self.ctrl_out),
            (BULK_IN, &self.bulk_in),
            (BULK_OUT, &self.bulk_out),
        ] {
            self.finish(address, transfer, TransferStatus::Cancelled);
        }
        self.ctrl_staging.clear();
        self.bulk_staging.clear();
        for opened in self.opened.iter() {
            opened.set(false);
        }
        self.ctrl_tx_spurious.set(true);
        self.regs
            .set_interrupt_enable(InterruptSource::all_enabled());
    }

    // The peripheral attaches, detaches and latches its address without
    // software help.
    fn connect(&self) {}

    fn disconnect(&self) {}

    fn set_address(&self, _address: u8) {}

    fn remote_wakeup(&self) {}

    fn enable_interrupts(&self) {
        self.regs.modify_cpu_interrupts(IE::EX0::SET);
    }

    fn disable_interrupts(&self) {
        self.regs.modify_cpu_interrupts(IE::EX0::CLEAR);
    }

    // No start-of-frame source on this peripheral.
    fn set_sof_enable(&self, _enable: bool) {}

    fn endpoint_open(&self, descriptor: &EndpointDescriptor) -> Result<(), ErrorCode> {
        let (index, channel, transfer_type) = match descriptor.address {
            CONTROL_OUT | CONTROL_IN => (0, Channel::Control, TransferType::Control),
            BULK_IN => (1, Channel::BulkIn, TransferType::Bulk),
            BULK_OUT => (2, Channel::BulkOut, TransferType::Bulk),
            _ => return Err(ErrorCode::NOSUPPORT),
        };
        if descriptor.transfer_type != transfer_type
            || descriptor.max_packet_size as usize > channel.max_packet_size()
        {
            return Err(ErrorCode::INVAL);
        }
        self.opened[index].set(true);
        Ok(())
    }

    fn endpoint_close(&self, address: u8) {
        if let Some(index) = Self::open_index(address) {
            self.opened[index].set(false);
        }
    }

    fn endpoint_close_all(&self) {
        {
            let _mask = InterruptMask::new(self.regs, InterruptSource::BulkInTx);
            self.reset_channel(Channel::BulkIn);
            self.opened[1].set(false);
            self.finish(BULK_IN, &self.bulk_in, TransferStatus::Cancelled);
        }
        {
            let _mask = InterruptMask::new(self.regs, InterruptSource::BulkOutRx);
            self.reset_channel(Channel::BulkOut);
            self.bulk_staging.clear();
            self.opened[2].set(false);
            self.finish(BULK_OUT, &self.bulk_out, TransferStatus::Cancelled);
        }
    }

    fn transfer(
        &self,
        address: u8,
        buffer: &'static mut [u8],
        length: usize,
    ) -> Result<(), (ErrorCode, &'static mut [u8])> {
        if length > buffer.len() {
            return Err((ErrorCode::SIZE, buffer));
        }
        match self.transfer_for(address) {
            None => return Err((ErrorCode::INVAL, buffer)),
            Some(transfer) if transfer.is_active() => return Err((ErrorCode::BUSY, buffer)),
            Some(_) => {}
        }
        if self.config.trace_transfers {
            debug!("usbd: ep {:#04x} submit, {} bytes", address, length);
        }

        match address {
            CONTROL_IN => self.send(
                Channel::Control,
                InterruptSource::ControlTx,
                &self.ctrl_in,
                buffer,
                length,
            ),
            CONTROL_OUT => self.receive(
                CONTROL_OUT,
                Channel::Control,
                InterruptSource::ControlRx,
                &self.ctrl_out,
                &self.ctrl_staging,
                buffer,
                length,
            ),
            BULK_IN => self.send(
                Channel::BulkIn,
                InterruptSource::BulkInTx,
                &self.bulk_in,
                buffer,
                length,
            ),
            BULK_OUT => self.receive(
                BULK_OUT,
                Channel::BulkOut,
                InterruptSource::BulkOutRx,
                &self.bulk_out,
                &self.bulk_staging,
                buffer,
                length,
            ),
            _ => return Err((ErrorCode::INVAL, buffer)),
        }
        Ok(())
    }

    fn endpoint_stall(&self, address: u8) {
        self.regs
            .modify_ctrl(Self::stall_channel(address), EPCTRL::STALL::SET);
    }

    fn endpoint_clear_stall(&self, address: u8) {
        self.regs
            .modify_ctrl(Self::stall_channel(address), EPCTRL::STALL::CLEAR);
    }
}
