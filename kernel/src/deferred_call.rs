// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Software interrupts for drivers.
//!
//! A driver that must report an event from a foreground call, without calling
//! back into its client before that call returns, sets its [`DeferredCall`].
//! The board's main loop later runs [`DeferredCall::service_next_pending`],
//! which calls the driver's
//! [`handle_deferred_call`](DeferredCallClient::handle_deferred_call).
//!
//! ```rust,ignore
//! impl DeferredCallClient for Usbd<'static, UsbRegisterBlock> {
//!     fn handle_deferred_call(&self) {
//!         // Deliver whatever was parked.
//!     }
//!
//!     fn register(&'static self) {
//!         self.deferred_call.register(self);
//!     }
//! }
//!
//! // Board setup, once the driver has its final `'static` address:
//! USBD.register();
//!
//! // Main loop:
//! while DeferredCall::has_tasks() {
//!     DeferredCall::service_next_pending();
//! }
//! ```
//!
//! At most [`MAX_DEFERRED_CALLS`] deferred calls can be registered.

use crate::utilities::cells::OptionalCell;
use core::cell::Cell;
use core::marker::PhantomData;
use core::ptr::addr_of;

pub const MAX_DEFERRED_CALLS: usize = 32;

/// Implemented by drivers that receive [`DeferredCall`]s.
// `Sized` keeps this from being used as a trait object; `DynDefCallRef` does
// the type erasure instead.
pub trait DeferredCallClient: Sized {
    /// Called from the main loop after the deferred call was set.
    fn handle_deferred_call(&self);

    // Implemented as `self.deferred_call.register(self);`.
    fn register(&'static self);
}

/// A type-erased client: a data pointer and the function that casts it back.
#[derive(Copy, Clone)]
struct DynDefCallRef<'a> {
    data: *const (),
    callback: fn(*const ()),
    _lifetime: PhantomData<&'a ()>,
}

impl<'a> DynDefCallRef<'a> {
    fn new<T: DeferredCallClient>(client: &'a T) -> Self {
        DynDefCallRef {
            data: core::ptr::from_ref(client) as *const (),
            // SAFETY: `data` was made from a `&'a T` above, and `'a` outlives
            // this value.
            callback: |p| unsafe { T::handle_deferred_call(&*p.cast()) },
            _lifetime: PhantomData,
        }
    }

    fn handle_deferred_call(self) {
        (self.callback)(self.data)
    }
}

// The three statics below are only ever borrowed shared, and the kernel runs
// on one thread.
static mut CTR: Cell<usize> = Cell::new(0);

/// Bit `n` is set while the deferred call registered at index `n` is pending.
static mut BITMASK: Cell<u32> = Cell::new(0);

const EMPTY: OptionalCell<DynDefCallRef<'static>> = OptionalCell::empty();

static mut DEFCALLS: [OptionalCell<DynDefCallRef<'static>>; MAX_DEFERRED_CALLS] =
    [EMPTY; MAX_DEFERRED_CALLS];

/// One driver's handle on the deferred call machinery.
///
/// Its slot is assigned by [`register`](DeferredCall::register), so a
/// `DeferredCall` can be built in a `const fn`. Until it is registered,
/// [`set`](DeferredCall::set) schedules nothing.
pub struct DeferredCall {
    idx: OptionalCell<usize>,
}

impl Default for DeferredCall {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredCall {
    pub const fn new() -> Self {
        DeferredCall {
            idx: OptionalCell::empty(),
        }
    }

    /// Bind `client` to this deferred call. Panics if every slot is taken or
    /// if this deferred call was already registered.
    pub fn register<DC: DeferredCallClient>(&self, client: &'static DC) {
        self.register_internal_non_generic(DynDefCallRef::new(client));
    }

    // Kept out of the generic function so it is not monomorphized per client.
    #[inline(never)]
    fn register_internal_non_generic(&self, handler: DynDefCallRef<'static>) {
        // SAFETY: CTR and DEFCALLS are only borrowed shared, from one thread.
        let ctr = unsafe { &*addr_of!(CTR) };
        let defcalls = unsafe { &*addr_of!(DEFCALLS) };
        if self.idx.is_some() {
            panic!("deferred call registered twice");
        }
        let idx = ctr.get();
        if idx >= defcalls.len() {
            panic!("too many deferred calls: {}", idx + 1);
        }
        defcalls[idx].set(handler);
        ctr.set(idx + 1);
        self.idx.set(idx);
    }

    pub fn is_registered(&self) -> bool {
        self.idx.is_some()
    }

    /// Schedule the client's `handle_deferred_call`.
    pub fn set(&self) {
        // SAFETY: BITMASK is only borrowed shared, from one thread.
        let bitmask = unsafe { &*addr_of!(BITMASK) };
        self.idx
            .map(|idx| bitmask.set(bitmask.get() | (1 << idx)));
    }

    /// Whether `set` was called and the callback has not run yet.
    pub fn is_pending(&self) -> bool {
        // SAFETY: BITMASK is only borrowed shared, from one thread.
        let bitmask = unsafe { &*addr_of!(BITMASK) };
        self.idx
            .get()
            .is_some_and(|idx| bitmask.get() & (1 << idx) != 0)
    }

    /// Run the lowest-numbered pending deferred call, clearing it first so the
    /// callback may set it again. Returns the index serviced.
    pub fn service_next_pending() -> Option<usize> {
        // SAFETY: BITMASK and DEFCALLS are only borrowed shared, from one
        // thread.
        let bitmask = unsafe { &*addr_of!(BITMASK) };
        let defcalls = unsafe { &*addr_of!(DEFCALLS) };
        let val = bitmask.get();
        if val == 0 {
            return None;
        }
        let idx = val.trailing_zeros() as usize;
        bitmask.set(val & !(1 << idx));
        defcalls[idx].map(|dc| dc.handle_deferred_call());
        Some(idx)
    }

    pub fn has_tasks() -> bool {
        // SAFETY: BITMASK is only borrowed shared, from one thread.
        let bitmask = unsafe { &*addr_of!(BITMASK) };
        bitmask.get() != 0
    }
}

#[cfg(test)]
mod test {
    use super::{DeferredCall, DeferredCallClient};
    use core::cell::Cell;
    use std::boxed::Box;

    struct Counter {
        deferred_call: DeferredCall,
        calls: Cell<usize>,
        again: Cell<bool>,
    }

    impl DeferredCallClient for Counter {
        fn handle_deferred_call(&self) {
            self.calls.set(self.calls.get() + 1);
            if self.again.replace(false) {
                self.deferred_call.set();
            }
        }

        fn register(&'static self) {
            self.deferred_call.register(self);
        }
    }

    // The only test in this crate that touches the global table.
    #[test]
    fn set_then_service() {
        let counter: &'static Counter = Box::leak(Box::new(Counter {
            deferred_call: DeferredCall::new(),
            calls: Cell::new(0),
            again: Cell::new(false),
        }));

        // Unregistered: nothing is scheduled.
        counter.deferred_call.set();
        assert!(!counter.deferred_call.is_pending());
        assert!(!DeferredCall::has_tasks());

        counter.register();
        assert!(counter.deferred_call.is_registered());
        counter.deferred_call.set();
        counter.deferred_call.set();
        assert!(counter.deferred_call.is_pending());
        assert_eq!(counter.calls.get(), 0);

        assert!(DeferredCall::service_next_pending().is_some());
        assert_eq!(counter.calls.get(), 1);
        assert!(!DeferredCall::has_tasks());
        assert_eq!(DeferredCall::service_next_pending(), None);

        // A callback may schedule itself again.
        counter.again.set(true);
        counter.deferred_call.set();
        DeferredCall::service_next_pending();
        assert!(counter.deferred_call.is_pending());
        DeferredCall::service_next_pending();
        assert_eq!(counter.calls.get(), 3);
        assert!(!DeferredCall::has_tasks());
    }
}
