// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Tock specific `TakeCell` type for sharing references.

use core::cell::Cell;

/// A shared slot for a mutable reference, typically a `'static` buffer lent
/// to a driver for the duration of an operation.
///
/// Several holders may share the cell, but only one can reach the reference
/// at a time: either by taking it out, or inside a `map` closure during which
/// the cell appears empty to everyone else.
pub struct TakeCell<'a, T: 'a + ?Sized> {
    val: Cell<Option<&'a mut T>>,
}

impl<'a, T: ?Sized> TakeCell<'a, T> {
    pub const fn empty() -> TakeCell<'a, T> {
        TakeCell {
            val: Cell::new(None),
        }
    }

    pub const fn new(value: &'a mut T) -> TakeCell<'a, T> {
        TakeCell {
            val: Cell::new(Some(value)),
        }
    }

    pub fn is_none(&self) -> bool {
        let inner = self.take();
        let empty = inner.is_none();
        self.val.set(inner);
        empty
    }

    pub fn is_some(&self) -> bool {
        !self.is_none()
    }

    /// Take the reference out, leaving the cell empty.
    pub fn take(&self) -> Option<&'a mut T> {
        self.val.take()
    }

    pub fn put(&self, val: Option<&'a mut T>) {
        self.val.set(val);
    }

    /// Store `val`, returning whatever the cell held before.
    pub fn replace(&self, val: &'a mut T) -> Option<&'a mut T> {
        self.val.replace(Some(val))
    }

    /// Run `closure` on the reference if the cell holds one, then put it
    /// back.
    pub fn map<F, R>(&self, closure: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        self.take().map(|val| {
            let res = closure(&mut *val);
            self.val.set(Some(val));
            res
        })
    }

    pub fn map_or<F, R>(&self, default: R, closure: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        self.map(closure).unwrap_or(default)
    }
}

#[cfg(test)]
mod test {
    use super::TakeCell;
    use std::boxed::Box;

    #[test]
    fn map_returns_reference() {
        let buf: &'static mut [u8] = Box::leak(Box::new([1u8, 2, 3]));
        let cell = TakeCell::new(buf);
        assert_eq!(cell.map(|b| b.len()), Some(3));
        assert!(cell.is_some());

        let buf = cell.take();
        assert!(cell.is_none());
        assert_eq!(cell.map(|b| b.len()), None);
        assert_eq!(cell.map_or(0, |b| b.len()), 0);

        cell.put(buf);
        cell.map(|b| b[0] = 9);
        assert_eq!(cell.take().map(|b| b[0]), Some(9));
    }

    #[test]
    fn empty_during_map() {
        let value: &'static mut u32 = Box::leak(Box::new(5));
        let cell = TakeCell::new(value);
        let nested = cell.map(|v| {
            *v += 1;
            cell.is_none()
        });
        assert_eq!(nested, Some(true));
        assert_eq!(cell.take().copied(), Some(6));
    }
}
