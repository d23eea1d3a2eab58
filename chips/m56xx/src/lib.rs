// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Peripheral implementations for the M56xx USB device controller.

#![no_std]
#![crate_name = "m56xx"]
#![crate_type = "rlib"]

#[cfg(test)]
extern crate std;

pub mod config;
pub mod diagnostic;
pub mod interrupt;
pub mod registers;
pub mod usbd;
