// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Compile-time configuration of the M56xx USB driver.
//!
//! Options are plain `bool` fields of a `const` object rather than `#[cfg]`
//! blocks, so every code path is type-checked whichever features a board
//! enables, and disabled paths are folded away by the compiler.

/// Data structure holding compile-time configuration options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Whether the interrupt handler drops the CPU's general interrupt enable
    /// (EA) while it services USB sources, raising it again before reopening
    /// the USB gate.
    ///
    /// Some silicon revisions lose pending sources or re-enter the handler
    /// without this.
    pub global_interrupt_handoff: bool,

    /// Whether the driver prints a `debug!` line for each transfer it starts
    /// and completes.
    pub trace_transfers: bool,
}

/// A unique instance of `Config` where compile-time configuration options are
/// defined. These options are enabled with Cargo features on this crate.
pub const CONFIG: Config = Config {
    global_interrupt_handoff: cfg!(feature = "global_interrupt_handoff"),
    trace_transfers: cfg!(feature = "trace_transfers"),
};
