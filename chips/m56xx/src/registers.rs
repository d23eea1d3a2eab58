// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! M56xx USB register map.
//!
//! The USB block is a set of byte-wide registers at `0xFE00`. Each endpoint
//! has a control/status register and a FIFO register that is filled or
//! drained one byte at a time. Interrupt sources share one enable register and
//! one read-to-clear flag register, and the whole block sits behind external
//! interrupt 0 of the CPU.

use kernel::utilities::registers::interfaces::{ReadWriteable, Readable, Writeable};
use kernel::utilities::registers::{
    register_bitfields, register_structs, FieldValue, LocalRegisterCopy, ReadOnly, ReadWrite,
    WriteOnly,
};
use kernel::utilities::StaticRef;

register_structs! {
    pub UsbRegisters {
        (0x00 => _reserved0),
        /// Control endpoint control/status
        (0x01 => ctl_ctrl: ReadWrite<u8, EPCTRL::Register>),
        /// Control endpoint FIFO, both directions
        (0x02 => ctl_fifo: ReadWrite<u8>),
        /// Bulk IN endpoint settings, left at their reset values
        (0x03 => _blki_setr),
        (0x04 => blki_ctrl: ReadWrite<u8, EPCTRL::Register>),
        (0x05 => blki_fifo: WriteOnly<u8>),
        (0x06 => _blko_setr),
        (0x07 => blko_ctrl: ReadWrite<u8, EPCTRL::Register>),
        (0x08 => blko_fifo: ReadOnly<u8>),
        (0x09 => _intr_setr),
        (0x0a => intr_ctrl: ReadWrite<u8, EPCTRL::Register>),
        (0x0b => intr_fifo: WriteOnly<u8>),
        (0x0c => _reserved1),
        /// Interrupt 0 enables, one bit per source
        (0x15 => intenr0: ReadWrite<u8, INT0::Register>),
        (0x16 => _reserved2),
        /// Interrupt 0 pending sources. Only enabled sources are reported,
        /// and reading the register clears what it returned.
        (0x17 => intflr0: ReadOnly<u8, INT0::Register>),
        (0x18 => @END),
    }
}

register_structs! {
    pub SfrRegisters {
        /// CPU interrupt enable
        (0x00 => ie: ReadWrite<u8, IE::Register>),
        (0x01 => @END),
    }
}

register_bitfields![u8,
    pub EPCTRL [
        /// Send mode: the FIFO is full. Receive mode: the FIFO is empty.
        FIFOSTAT OFFSET(0) NUMBITS(1) [],
        MODE OFFSET(1) NUMBITS(1) [
            Receive = 0,
            Send = 1
        ],
        /// Send the FIFO contents now as a short (or empty) packet.
        FORCE_TX OFFSET(2) NUMBITS(1) [],
        STALL OFFSET(3) NUMBITS(1) [],
        FIFO_RESET OFFSET(4) NUMBITS(1) [],
        /// Control endpoint only: the FIFO holds a SETUP packet.
        SETUP OFFSET(5) NUMBITS(1) []
    ],
    pub INT0 [
        CTL_TX OFFSET(0) NUMBITS(1) [],
        CTL_RX OFFSET(1) NUMBITS(1) [],
        BLKI_TX OFFSET(2) NUMBITS(1) [],
        BLKO_RX OFFSET(3) NUMBITS(1) [],
        INTR_TX OFFSET(4) NUMBITS(1) [],
        BUS_RESET OFFSET(7) NUMBITS(1) []
    ],
    pub IE [
        /// External interrupt 0, the USB gate
        EX0 OFFSET(0) NUMBITS(1) [],
        /// General interrupt enable
        EA OFFSET(7) NUMBITS(1) []
    ]
];

pub const USB_BASE: StaticRef<UsbRegisters> =
    unsafe { StaticRef::new(0xFE00 as *const UsbRegisters) };

pub const SFR_BASE: StaticRef<SfrRegisters> =
    unsafe { StaticRef::new(0xC000_00A8 as *const SfrRegisters) };

/// The four endpoint register sets of the peripheral.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Control,
    BulkIn,
    BulkOut,
    Diagnostic,
}

impl Channel {
    /// Hardware FIFO depth, which is also the endpoint's max packet size.
    pub const fn max_packet_size(self) -> usize {
        match self {
            Channel::Control => 64,
            Channel::BulkIn | Channel::BulkOut => 512,
            Channel::Diagnostic => 8,
        }
    }

    /// Software writes the FIFO of every channel that sends to the host.
    pub const fn fifo_writable(self) -> bool {
        !matches!(self, Channel::BulkOut)
    }

    /// Software reads the FIFO of every channel that receives from the host.
    pub const fn fifo_readable(self) -> bool {
        matches!(self, Channel::Control | Channel::BulkOut)
    }
}

/// Register-level access to the USB peripheral.
///
/// The driver only touches hardware through this trait. `UsbRegisterBlock` is
/// the memory-mapped implementation; host tests substitute a model of the
/// peripheral.
pub trait UsbPeripheral {
    fn ctrl(&self, channel: Channel) -> LocalRegisterCopy<u8, EPCTRL::Register>;

    fn set_ctrl(&self, channel: Channel, value: u8);

    fn fifo_write(&self, channel: Channel, byte: u8);

    fn fifo_read(&self, channel: Channel) -> u8;

    fn interrupt_enable(&self) -> LocalRegisterCopy<u8, INT0::Register>;

    fn set_interrupt_enable(&self, value: u8);

    /// Read the pending interrupt sources. The read clears them.
    fn take_interrupt_flags(&self) -> LocalRegisterCopy<u8, INT0::Register>;

    fn cpu_interrupts(&self) -> LocalRegisterCopy<u8, IE::Register>;

    fn set_cpu_interrupts(&self, value: u8);

    fn modify_ctrl(&self, channel: Channel, field: FieldValue<u8, EPCTRL::Register>) {
        let mut ctrl = self.ctrl(channel);
        ctrl.modify(field);
        self.set_ctrl(channel, ctrl.get());
    }

    /// Overwrite the whole control register; bits not named in `field` are
    /// written as zero.
    fn write_ctrl(&self, channel: Channel, field: FieldValue<u8, EPCTRL::Register>) {
        let mut ctrl = LocalRegisterCopy::<u8, EPCTRL::Register>::new(0);
        ctrl.modify(field);
        self.set_ctrl(channel, ctrl.get());
    }

    fn modify_interrupt_enable(&self, field: FieldValue<u8, INT0::Register>) {
        let mut enable = self.interrupt_enable();
        enable.modify(field);
        self.set_interrupt_enable(enable.get());
    }

    fn modify_cpu_interrupts(&self, field: FieldValue<u8, IE::Register>) {
        let mut ie = self.cpu_interrupts();
        ie.modify(field);
        self.set_cpu_interrupts(ie.get());
    }
}

/// The memory-mapped USB block plus the CPU interrupt-enable SFR.
pub struct UsbRegisterBlock {
    usb: StaticRef<UsbRegisters>,
    sfr: StaticRef<SfrRegisters>,
}

impl UsbRegisterBlock {
    pub const fn new(usb: StaticRef<UsbRegisters>, sfr: StaticRef<SfrRegisters>) -> Self {
        UsbRegisterBlock { usb, sfr }
    }

    fn ctrl_register(&self, channel: Channel) -> &ReadWrite<u8, EPCTRL::Register> {
        match channel {
            Channel::Control => &self.usb.ctl_ctrl,
            Channel::BulkIn => &self.usb.blki_ctrl,
            Channel::BulkOut => &self.usb.blko_ctrl,
            Channel::Diagnostic => &self.usb.intr_ctrl,
        }
    }
}

impl UsbPeripheral for UsbRegisterBlock {
    fn ctrl(&self, channel: Channel) -> LocalRegisterCopy<u8, EPCTRL::Register> {
        self.ctrl_register(channel).extract()
    }

    fn set_ctrl(&self, channel: Channel, value: u8) {
        self.ctrl_register(channel).set(value);
    }

    fn modify_ctrl(&self, channel: Channel, field: FieldValue<u8, EPCTRL::Register>) {
        self.ctrl_register(channel).modify(field);
    }

    fn write_ctrl(&self, channel: Channel, field: FieldValue<u8, EPCTRL::Register>) {
        self.ctrl_register(channel).write(field);
    }

    fn fifo_write(&self, channel: Channel, byte: u8) {
        match channel {
            Channel::Control => self.usb.ctl_fifo.set(byte),
            Channel::BulkIn => self.usb.blki_fifo.set(byte),
            Channel::Diagnostic => self.usb.intr_fifo.set(byte),
            Channel::BulkOut => unreachable!("bulk OUT FIFO is read-only"),
        }
    }

    fn fifo_read(&self, channel: Channel) -> u8 {
        match channel {
            Channel::Control => self.usb.ctl_fifo.get(),
            Channel::BulkOut => self.usb.blko_fifo.get(),
            Channel::BulkIn | Channel::Diagnostic => unreachable!("IN FIFOs are write-only"),
        }
    }

    fn interrupt_enable(&self) -> LocalRegisterCopy<u8, INT0::Register> {
        self.usb.intenr0.extract()
    }

    fn set_interrupt_enable(&self, value: u8) {
        self.usb.intenr0.set(value);
    }

    fn take_interrupt_flags(&self) -> LocalRegisterCopy<u8, INT0::Register> {
        self.usb.intflr0.extract()
    }

    fn cpu_interrupts(&self) -> LocalRegisterCopy<u8, IE::Register> {
        self.sfr.ie.extract()
    }

    fn set_cpu_interrupts(&self, value: u8) {
        self.sfr.ie.set(value);
    }
}

/// Registers of the single USB port on this chip.
pub const USB_REGISTERS: UsbRegisterBlock = UsbRegisterBlock::new(USB_BASE, SFR_BASE);

/// A host-side model of the peripheral for unit tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::{Channel, UsbPeripheral, EPCTRL, IE, INT0};
    use core::cell::{Cell, RefCell};
    use kernel::utilities::registers::{FieldValue, LocalRegisterCopy};
    use std::collections::VecDeque;
    use std::vec::Vec;

    const CHANNELS: [Channel; 4] = [
        Channel::Control,
        Channel::BulkIn,
        Channel::BulkOut,
        Channel::Diagnostic,
    ];

    fn index(channel: Channel) -> usize {
        match channel {
            Channel::Control => 0,
            Channel::BulkIn => 1,
            Channel::BulkOut => 2,
            Channel::Diagnostic => 3,
        }
    }

    pub(crate) fn int0_bits(field: FieldValue<u8, INT0::Register>) -> u8 {
        let mut reg = LocalRegisterCopy::<u8, INT0::Register>::new(0);
        reg.modify(field);
        reg.get()
    }

    fn ctrl_bits(field: FieldValue<u8, EPCTRL::Register>) -> u8 {
        let mut reg = LocalRegisterCopy::<u8, EPCTRL::Register>::new(0);
        reg.modify(field);
        reg.get()
    }

    /// A packet as it left an IN FIFO.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub(crate) struct Packet {
        pub(crate) channel: Channel,
        pub(crate) data: Vec<u8>,
        pub(crate) forced: bool,
    }

    /// Models the FIFOs, the mode-dependent FIFOSTAT bit, the read-to-clear
    /// flag register (which only reports enabled sources) and the IE SFR.
    ///
    /// The diagnostic FIFO holds a single byte so tests can observe the ring
    /// backing up behind it.
    pub(crate) struct FakeUsb {
        ctrl: [Cell<u8>; 4],
        fifo: [RefCell<VecDeque<u8>>; 4],
        enable: Cell<u8>,
        pending: Cell<u8>,
        ie: Cell<u8>,
        ie_writes: RefCell<Vec<u8>>,
        packets: RefCell<Vec<Packet>>,
        fifo_resets: RefCell<Vec<Channel>>,
    }

    impl FakeUsb {
        pub(crate) fn new() -> FakeUsb {
            FakeUsb {
                ctrl: Default::default(),
                fifo: Default::default(),
                enable: Cell::new(0),
                pending: Cell::new(0),
                ie: Cell::new(0),
                ie_writes: RefCell::new(Vec::new()),
                packets: RefCell::new(Vec::new()),
                fifo_resets: RefCell::new(Vec::new()),
            }
        }

        fn depth(channel: Channel) -> usize {
            match channel {
                Channel::Diagnostic => 1,
                _ => channel.max_packet_size(),
            }
        }

        pub(crate) fn raise(&self, field: FieldValue<u8, INT0::Register>) {
            self.pending.set(self.pending.get() | int0_bits(field));
        }

        pub(crate) fn pending(&self) -> u8 {
            self.pending.get()
        }

        /// The host collects whatever sits in an IN FIFO, and the peripheral
        /// raises the channel's Tx source.
        pub(crate) fn complete_in(&self, channel: Channel) {
            let data: Vec<u8> = self.fifo[index(channel)].borrow_mut().drain(..).collect();
            let ctrl = &self.ctrl[index(channel)];
            let forced = ctrl.get() & ctrl_bits(EPCTRL::FORCE_TX::SET) != 0;
            ctrl.set(ctrl.get() & !ctrl_bits(EPCTRL::FORCE_TX::SET));
            self.packets.borrow_mut().push(Packet {
                channel,
                data,
                forced,
            });
            self.raise(match channel {
                Channel::Control => INT0::CTL_TX::SET,
                Channel::BulkIn => INT0::BLKI_TX::SET,
                Channel::Diagnostic => INT0::INTR_TX::SET,
                Channel::BulkOut => panic!("bulk OUT has no Tx side"),
            });
        }

        /// The host sends `data` to an OUT FIFO and the peripheral raises the
        /// channel's Rx source.
        pub(crate) fn host_out(&self, channel: Channel, data: &[u8], setup: bool) {
            self.fifo[index(channel)].borrow_mut().extend(data.iter().copied());
            if setup {
                let ctrl = &self.ctrl[index(channel)];
                ctrl.set(ctrl.get() | ctrl_bits(EPCTRL::SETUP::SET));
            }
            self.raise(match channel {
                Channel::Control => INT0::CTL_RX::SET,
                Channel::BulkOut => INT0::BLKO_RX::SET,
                _ => panic!("IN channels have no Rx side"),
            });
        }

        pub(crate) fn packets(&self) -> Vec<Packet> {
            self.packets.borrow().clone()
        }

        pub(crate) fn fifo_contents(&self, channel: Channel) -> Vec<u8> {
            self.fifo[index(channel)].borrow().iter().copied().collect()
        }

        pub(crate) fn ie_writes(&self) -> Vec<u8> {
            self.ie_writes.borrow().clone()
        }

        pub(crate) fn fifo_resets(&self) -> Vec<Channel> {
            self.fifo_resets.borrow().clone()
        }

        pub(crate) fn all_channels() -> [Channel; 4] {
            CHANNELS
        }
    }

    impl UsbPeripheral for FakeUsb {
        fn ctrl(&self, channel: Channel) -> LocalRegisterCopy<u8, EPCTRL::Register> {
            let mut reg = LocalRegisterCopy::new(self.ctrl[index(channel)].get());
            let fifo = self.fifo[index(channel)].borrow();
            let stat = if reg.matches_all(EPCTRL::MODE::Send) {
                fifo.len() >= Self::depth(channel)
            } else {
                fifo.is_empty()
            };
            reg.modify(EPCTRL::FIFOSTAT.val(stat as u8));
            reg
        }

        fn set_ctrl(&self, channel: Channel, value: u8) {
            let reset = ctrl_bits(EPCTRL::FIFO_RESET::SET);
            if value & reset != 0 {
                self.fifo[index(channel)].borrow_mut().clear();
                self.fifo_resets.borrow_mut().push(channel);
            }
            // FIFOSTAT is status and FIFO_RESET self-clears.
            let status = ctrl_bits(EPCTRL::FIFOSTAT::SET);
            self.ctrl[index(channel)].set(value & !(reset | status));
        }

        fn fifo_write(&self, channel: Channel, byte: u8) {
            assert!(channel.fifo_writable(), "write to {:?} FIFO", channel);
            let mut fifo = self.fifo[index(channel)].borrow_mut();
            assert!(fifo.len() < Self::depth(channel), "write to a full FIFO");
            fifo.push_back(byte);
        }

        fn fifo_read(&self, channel: Channel) -> u8 {
            assert!(channel.fifo_readable(), "read from {:?} FIFO", channel);
            self.fifo[index(channel)]
                .borrow_mut()
                .pop_front()
                .unwrap_or(0)
        }

        fn interrupt_enable(&self) -> LocalRegisterCopy<u8, INT0::Register> {
            LocalRegisterCopy::new(self.enable.get())
        }

        fn set_interrupt_enable(&self, value: u8) {
            self.enable.set(value);
        }

        fn take_interrupt_flags(&self) -> LocalRegisterCopy<u8, INT0::Register> {
            let taken = self.pending.get() & self.enable.get();
            self.pending.set(self.pending.get() & !taken);
            LocalRegisterCopy::new(taken)
        }

        fn cpu_interrupts(&self) -> LocalRegisterCopy<u8, IE::Register> {
            LocalRegisterCopy::new(self.ie.get())
        }

        fn set_cpu_interrupts(&self, value: u8) {
            self.ie.set(value);
            self.ie_writes.borrow_mut().push(value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::fake::FakeUsb;
    use super::{Channel, UsbPeripheral, EPCTRL};

    #[test]
    fn fifostat_follows_mode() {
        let usb = FakeUsb::new();
        usb.write_ctrl(Channel::Control, EPCTRL::MODE::Receive);
        assert!(usb.ctrl(Channel::Control).is_set(EPCTRL::FIFOSTAT));

        usb.write_ctrl(Channel::Control, EPCTRL::MODE::Send);
        for i in 0..Channel::Control.max_packet_size() {
            assert!(!usb.ctrl(Channel::Control).is_set(EPCTRL::FIFOSTAT));
            usb.fifo_write(Channel::Control, i as u8);
        }
        assert!(usb.ctrl(Channel::Control).is_set(EPCTRL::FIFOSTAT));
    }

    #[test]
    fn fifo_reset_self_clears() {
        let usb = FakeUsb::new();
        usb.write_ctrl(Channel::BulkIn, EPCTRL::MODE::Send);
        usb.fifo_write(Channel::BulkIn, 1);
        usb.write_ctrl(Channel::BulkIn, EPCTRL::FIFO_RESET::SET);
        assert!(usb.fifo_contents(Channel::BulkIn).is_empty());
        assert!(!usb.ctrl(Channel::BulkIn).is_set(EPCTRL::FIFO_RESET));
    }

    #[test]
    fn max_packet_sizes() {
        let sizes: std::vec::Vec<usize> = FakeUsb::all_channels()
            .iter()
            .map(|c| c.max_packet_size())
            .collect();
        assert_eq!(sizes, [64, 512, 512, 8]);
    }

    #[test]
    fn fifo_directions() {
        let writable: std::vec::Vec<bool> = FakeUsb::all_channels()
            .iter()
            .map(|c| c.fifo_writable())
            .collect();
        let readable: std::vec::Vec<bool> = FakeUsb::all_channels()
            .iter()
            .map(|c| c.fifo_readable())
            .collect();
        assert_eq!(writable, [true, true, false, true]);
        assert_eq!(readable, [true, false, true, false]);
    }

    #[test]
    #[should_panic]
    fn read_from_in_fifo() {
        FakeUsb::new().fifo_read(Channel::BulkIn);
    }

    #[test]
    #[should_panic]
    fn write_to_out_fifo() {
        FakeUsb::new().fifo_write(Channel::BulkOut, 0);
    }
}
