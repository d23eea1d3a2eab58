// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Core kernel support for the M56xx USB device firmware.
//!
//! The kernel crate holds the code shared between chip drivers and the
//! boards that use them: the Hardware Interface Layer (HIL) definitions,
//! collections that are safe to use without an allocator, register and cell
//! utilities, deferred calls, and the `debug!` logging path.
//!
//! Most `unsafe` code is in this kernel crate.

#![warn(unreachable_pub)]
#![no_std]

#[cfg(test)]
extern crate std;

pub mod collections;
#[macro_use]
pub mod debug;
pub mod deferred_call;
pub mod errorcode;
pub mod hil;
pub mod utilities;

pub use crate::errorcode::ErrorCode;
