// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! USB interrupt sources and per-source masking.

use crate::registers::{UsbPeripheral, INT0};
use kernel::utilities::registers::{Field, LocalRegisterCopy};

/// One bit of the interrupt-source register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptSource {
    /// The diagnostic interrupt endpoint sent a byte
    Diagnostic,
    /// A control IN packet left the FIFO
    ControlTx,
    /// A control OUT or SETUP packet arrived
    ControlRx,
    /// The host reset the bus
    BusReset,
    /// A bulk OUT packet arrived
    BulkOutRx,
    /// A bulk IN packet left the FIFO
    BulkInTx,
}

/// Sources in the order they are serviced when several are pending.
const DISPATCH_ORDER: [InterruptSource; 6] = [
    InterruptSource::Diagnostic,
    InterruptSource::ControlTx,
    InterruptSource::ControlRx,
    InterruptSource::BusReset,
    InterruptSource::BulkOutRx,
    InterruptSource::BulkInTx,
];

impl InterruptSource {
    pub fn field(self) -> Field<u8, INT0::Register> {
        match self {
            InterruptSource::Diagnostic => INT0::INTR_TX,
            InterruptSource::ControlTx => INT0::CTL_TX,
            InterruptSource::ControlRx => INT0::CTL_RX,
            InterruptSource::BusReset => INT0::BUS_RESET,
            InterruptSource::BulkOutRx => INT0::BLKO_RX,
            InterruptSource::BulkInTx => INT0::BLKI_TX,
        }
    }

    /// The source's bit in the enable and flag registers.
    pub fn bit(self) -> u8 {
        let field = self.field();
        field.mask << field.shift
    }

    /// Every source set in `flags`, each once, in dispatch order.
    pub fn decode(
        flags: LocalRegisterCopy<u8, INT0::Register>,
    ) -> impl Iterator<Item = InterruptSource> {
        DISPATCH_ORDER
            .into_iter()
            .filter(move |source| flags.is_set(source.field()))
    }

    /// The enable bits of every source the driver services.
    pub fn all_enabled() -> u8 {
        DISPATCH_ORDER
            .iter()
            .fold(0, |bits, source| bits | source.bit())
    }
}

/// Holds one interrupt source masked for as long as it lives.
///
/// The foreground and the interrupt handler share transfer state. Rather than
/// disabling interrupts globally, foreground code masks the one source whose
/// handler touches the state it is about to change. Dropping the guard puts
/// the enable bit back the way it was, so nested guards on the same source
/// compose.
pub struct InterruptMask<'a, R: UsbPeripheral> {
    regs: &'a R,
    source: InterruptSource,
    was_enabled: bool,
}

impl<'a, R: UsbPeripheral> InterruptMask<'a, R> {
    pub fn new(regs: &'a R, source: InterruptSource) -> Self {
        let field = source.field();
        let was_enabled = regs.interrupt_enable().is_set(field);
        regs.modify_interrupt_enable(field.val(0));
        InterruptMask {
            regs,
            source,
            was_enabled,
        }
    }
}

impl<R: UsbPeripheral> Drop for InterruptMask<'_, R> {
    fn drop(&mut self) {
        if self.was_enabled {
            self.regs.modify_interrupt_enable(self.source.field().val(1));
        }
    }
}
