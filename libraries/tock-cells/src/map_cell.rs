// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Tock specific `MapCell` type for sharing owned values.

use core::cell::{Cell, UnsafeCell};
use core::mem::MaybeUninit;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Uninit,
    Init,
    /// A `map` closure holds a reference to the value.
    InsideMap,
}

/// An owned value that can be borrowed mutably through a shared reference,
/// one closure at a time.
///
/// Think of it as an `Option` inside a `RefCell` that never panics: while a
/// `map` closure runs, or after the value is taken, the cell reads as empty
/// and further accesses return `None`.
pub struct MapCell<T> {
    val: UnsafeCell<MaybeUninit<T>>,
    state: Cell<State>,
}

impl<T> MapCell<T> {
    pub const fn empty() -> MapCell<T> {
        MapCell {
            val: UnsafeCell::new(MaybeUninit::uninit()),
            state: Cell::new(State::Uninit),
        }
    }

    pub const fn new(value: T) -> MapCell<T> {
        MapCell {
            val: UnsafeCell::new(MaybeUninit::new(value)),
            state: Cell::new(State::Init),
        }
    }

    pub fn is_none(&self) -> bool {
        !self.is_some()
    }

    pub fn is_some(&self) -> bool {
        self.state.get() == State::Init
    }

    /// Move the value out, leaving the cell empty.
    pub fn take(&self) -> Option<T> {
        if self.is_none() {
            return None;
        }
        self.state.set(State::Uninit);
        // SAFETY: the state was `Init`, so the value is initialized and not
        // borrowed. It is not read again until `put` rewrites it.
        Some(unsafe { (*self.val.get()).assume_init_read() })
    }

    /// Store `val`, dropping any value already held. Does nothing while a
    /// `map` closure is borrowing the current value.
    pub fn put(&self, val: T) {
        if self.state.get() == State::InsideMap {
            return;
        }
        let _ = self.take();
        // SAFETY: the cell is now `Uninit` and nothing borrows its contents.
        unsafe { (*self.val.get()).write(val) };
        self.state.set(State::Init);
    }

    /// Give `closure` mutable access to the value if the cell holds one.
    pub fn map<F, R>(&self, closure: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        if self.is_none() {
            return None;
        }
        self.state.set(State::InsideMap);
        // SAFETY: the value is initialized, and while the state is
        // `InsideMap` no other method reads or writes it.
        let res = closure(unsafe { (*self.val.get()).assume_init_mut() });
        self.state.set(State::Init);
        Some(res)
    }

    pub fn map_or<F, R>(&self, default: R, closure: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        self.map(closure).unwrap_or(default)
    }
}

impl<T> Drop for MapCell<T> {
    fn drop(&mut self) {
        if self.state.get() == State::Init {
            // SAFETY: `Init` means initialized, and `&mut self` rules out any
            // outstanding borrow.
            unsafe { self.val.get_mut().assume_init_drop() };
        }
    }
}

#[cfg(test)]
mod test {
    use super::MapCell;

    #[test]
    fn map_in_place() {
        let cell = MapCell::new([0u8; 4]);
        let len = cell.map(|a| {
            a[1] = 7;
            a.len()
        });
        assert_eq!(len, Some(4));
        assert_eq!(cell.take(), Some([0, 7, 0, 0]));
        assert!(cell.is_none());
        assert_eq!(cell.map(|a| a[0]), None);
    }

    #[test]
    fn reentrant_map_sees_empty() {
        let cell = MapCell::new(1u32);
        let inner = cell.map(|outer| {
            *outer += 1;
            cell.map(|v| *v)
        });
        assert_eq!(inner, Some(None));
        assert_eq!(cell.map_or(0, |v| *v), 2);

        cell.map(|_| cell.put(9));
        assert_eq!(cell.take(), Some(2));
    }

    #[test]
    fn put_into_empty() {
        let cell: MapCell<u16> = MapCell::empty();
        assert_eq!(cell.take(), None);
        cell.put(3);
        cell.put(4);
        assert_eq!(cell.take(), Some(4));
    }
}
