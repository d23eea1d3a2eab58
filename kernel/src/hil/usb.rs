// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interface to USB device controller hardware.
//!
//! A device controller driver moves bytes between the host and buffers owned
//! by the USB stack above it. The stack handles enumeration, descriptors and
//! class requests; the controller only knows endpoints, packets and the
//! handful of bus events it reports back through [`Client`].
//!
//! Buffers are lent to the controller with [`UsbController::transfer`] and
//! handed back in [`Client::transfer_complete`]. At most one transfer may be
//! outstanding per endpoint address; submitting a second one before the first
//! completes is a caller bug.

use crate::ErrorCode;

/// Bit 7 of an endpoint address: set for device-to-host (IN) endpoints.
pub const ENDPOINT_DIR_IN: u8 = 0x80;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

/// The endpoint number encoded in the low bits of an endpoint address.
pub const fn endpoint_number(address: u8) -> u8 {
    address & 0x0f
}

pub const fn endpoint_direction(address: u8) -> Direction {
    if address & ENDPOINT_DIR_IN != 0 {
        Direction::In
    } else {
        Direction::Out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferType {
    Control = 0,
    Isochronous,
    Bulk,
    Interrupt,
}

/// The parts of a standard endpoint descriptor a controller cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
    pub interval: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferStatus {
    Success,
    /// The transfer was abandoned before it finished, e.g. because its
    /// endpoint was closed.
    Cancelled,
}

/// USB device controller interface
pub trait UsbController<'a> {
    fn set_client(&self, client: &'a dyn Client<'a>);

    /// Reset the controller and all transfer state to idle.
    fn init(&self);

    fn connect(&self);

    fn disconnect(&self);

    fn set_address(&self, address: u8);

    fn remote_wakeup(&self);

    /// Allow the controller's interrupt to reach the CPU.
    fn enable_interrupts(&self);

    fn disable_interrupts(&self);

    fn set_sof_enable(&self, enable: bool);

    fn endpoint_open(&self, descriptor: &EndpointDescriptor) -> Result<(), ErrorCode>;

    fn endpoint_close(&self, address: u8);

    /// Close all non-control endpoints, cancelling their pending transfers.
    fn endpoint_close_all(&self);

    /// Start a transfer on `address`.
    ///
    /// For IN endpoints the first `length` bytes of `buffer` are sent. For OUT
    /// endpoints up to `length` bytes are received into `buffer`. `Ok(())`
    /// means the transfer was accepted, never that it has finished: the
    /// outcome always arrives through [`Client::transfer_complete`].
    fn transfer(
        &self,
        address: u8,
        buffer: &'static mut [u8],
        length: usize,
    ) -> Result<(), (ErrorCode, &'static mut [u8])>;

    fn endpoint_stall(&self, address: u8);

    fn endpoint_clear_stall(&self, address: u8);
}

/// Events reported by a USB device controller.
///
/// These are called from interrupt context and must not block.
pub trait Client<'a> {
    fn bus_reset(&self);

    /// An 8-byte SETUP packet arrived on the control endpoint.
    fn setup_received(&self, setup: &[u8; 8]);

    /// A transfer on `address` finished after moving `length` bytes.
    ///
    /// `buffer` is the buffer passed to [`UsbController::transfer`]. It is
    /// `None` only when a zero-length packet arrived on an OUT endpoint with no
    /// receive pending.
    fn transfer_complete(
        &self,
        address: u8,
        buffer: Option<&'static mut [u8]>,
        length: usize,
        status: TransferStatus,
    );
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn address_decoding() {
        assert_eq!(endpoint_number(0x81), 1);
        assert_eq!(endpoint_direction(0x81), Direction::In);
        assert_eq!(endpoint_number(0x02), 2);
        assert_eq!(endpoint_direction(0x02), Direction::Out);
        assert_eq!(endpoint_direction(0x00), Direction::Out);
        assert_eq!(endpoint_direction(0x80), Direction::In);
    }
}
