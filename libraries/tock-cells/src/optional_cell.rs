// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! `OptionalCell` convenience type

use core::cell::Cell;

/// A `Cell` holding an `Option` of a `Copy` value, such as a client
/// reference that is registered after construction.
pub struct OptionalCell<T: Copy> {
    value: Cell<Option<T>>,
}

impl<T: Copy> OptionalCell<T> {
    pub const fn new(val: T) -> OptionalCell<T> {
        OptionalCell {
            value: Cell::new(Some(val)),
        }
    }

    /// Create an empty `OptionalCell` (contains just `None`).
    pub const fn empty() -> OptionalCell<T> {
        OptionalCell {
            value: Cell::new(None),
        }
    }

    pub fn set(&self, val: T) {
        self.value.set(Some(val));
    }

    pub fn clear(&self) {
        self.value.set(None);
    }

    pub fn is_some(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn is_none(&self) -> bool {
        self.value.get().is_none()
    }

    pub fn get(&self) -> Option<T> {
        self.value.get()
    }

    /// Return the contained value and leave the cell empty.
    pub fn take(&self) -> Option<T> {
        self.value.take()
    }

    // Note: no `unwrap`; a missing value is handled by the caller, not by a
    // panic.

    /// Call a closure on the value if the value exists.
    pub fn map<F, R>(&self, closure: F) -> Option<R>
    where
        F: FnOnce(T) -> R,
    {
        self.value.get().map(closure)
    }

    pub fn map_or<F, R>(&self, default: R, closure: F) -> R
    where
        F: FnOnce(T) -> R,
    {
        self.value.get().map_or(default, closure)
    }
}
