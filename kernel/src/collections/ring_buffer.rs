// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Fixed-capacity ring buffer with inline storage.
//!
//! `read == write` means the buffer is empty, and `write` is never allowed to
//! advance onto `read`. One slot therefore always stays unused and the usable
//! capacity is `N - 1`. This keeps the empty and full states distinguishable
//! without a separate element counter, so a single producer and a single
//! consumer each only ever move their own index.

use crate::collections::queue::Queue;

pub struct RingBuffer<T, const N: usize> {
    ring: [T; N],
    read: usize,
    write: usize,
}

impl<T: Copy, const N: usize> RingBuffer<T, N> {
    /// Create an empty ring. `fill` is the value the unused slots start with.
    pub const fn new(fill: T) -> RingBuffer<T, N> {
        RingBuffer {
            ring: [fill; N],
            read: 0,
            write: 0,
        }
    }

    /// Total number of slots, including the reserved one.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Returns the number of elements that can be enqueued until the ring
    /// buffer is full.
    pub fn available_len(&self) -> usize {
        N.saturating_sub(1 + Queue::len(self))
    }
}

impl<T: Copy, const N: usize> Queue<T> for RingBuffer<T, N> {
    fn has_elements(&self) -> bool {
        self.read != self.write
    }

    fn is_full(&self) -> bool {
        self.read == (self.write + 1) % N
    }

    fn len(&self) -> usize {
        if self.write >= self.read {
            self.write - self.read
        } else {
            (N - self.read) + self.write
        }
    }

    fn enqueue(&mut self, val: T) -> bool {
        if self.is_full() {
            // Advancing `write` would make the ring look empty.
            false
        } else {
            self.ring[self.write] = val;
            self.write = (self.write + 1) % N;
            true
        }
    }

    fn peek(&self) -> Option<T> {
        if self.has_elements() {
            Some(self.ring[self.read])
        } else {
            None
        }
    }

    fn dequeue(&mut self) -> Option<T> {
        let val = self.peek()?;
        self.read = (self.read + 1) % N;
        Some(val)
    }

    fn empty(&mut self) {
        self.read = 0;
        self.write = 0;
    }
}
