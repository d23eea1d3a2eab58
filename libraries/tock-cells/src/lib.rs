// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Tock Cell types.
//!
//! Interior-mutability wrappers for state shared between foreground code and
//! interrupt handlers on a single core. None of them hand out a reference
//! that outlives a closure, so a re-entrant access finds the cell empty
//! instead of aliasing it.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod map_cell;
pub mod optional_cell;
pub mod take_cell;
