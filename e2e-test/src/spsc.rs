// This file is part of Astarte.
//
// Copyright 2024 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Fixed capacity single-producer single-consumer ring.
//!
//! The shell task is the sole producer and the comparator task the sole consumer, so a pair of
//! free-running atomic counters is all the synchronization needed.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Error returned by the queue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Enqueue on a queue holding `capacity` elements.
    #[error("queue is full")]
    Full,
    /// Dequeue or peek on an empty queue.
    #[error("queue is empty")]
    Empty,
}

struct Inner<T, const N: usize> {
    buf: [UnsafeCell<MaybeUninit<T>>; N],
    /// Next slot to pop, increments forever and wraps modulo `N` on access.
    head: AtomicUsize,
    /// Next slot to push.
    tail: AtomicUsize,
}

// The buffer cells are only touched by the single producer and the single consumer, on disjoint
// index ranges guarded by the head/tail counters.
unsafe impl<T: Send, const N: usize> Sync for Inner<T, N> {}

impl<T, const N: usize> Drop for Inner<T, N> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();

        for i in head..tail {
            // Slots in [head, tail) hold initialized values nobody consumed.
            unsafe { (*self.buf[i % N].get()).assume_init_drop() };
        }
    }
}

/// Creates the two halves of a ring with capacity `N`.
pub fn channel<T, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    let inner = Arc::new(Inner {
        buf: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });

    (
        Producer {
            inner: Arc::clone(&inner),
        },
        Consumer { inner },
    )
}

/// Producing half of the ring.
pub struct Producer<T, const N: usize> {
    inner: Arc<Inner<T, N>>,
}

impl<T, const N: usize> Producer<T, N> {
    /// Enqueues a value, the value is dropped when the queue is full.
    pub fn try_push(&mut self, value: T) -> Result<(), QueueError> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        let head = self.inner.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) == N {
            return Err(QueueError::Full);
        }

        // The slot was either never used or already popped by the consumer.
        unsafe { (*self.inner.buf[tail % N].get()).write(value) };

        self.inner.tail.store(tail.wrapping_add(1), Ordering::Release);

        Ok(())
    }

    /// Number of queued elements.
    pub fn len(&self) -> usize {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        let head = self.inner.head.load(Ordering::Acquire);

        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consuming half of the ring.
pub struct Consumer<T, const N: usize> {
    inner: Arc<Inner<T, N>>,
}

impl<T, const N: usize> Consumer<T, N> {
    /// Dequeues the head element, transferring its ownership to the caller.
    pub fn pop(&mut self) -> Result<T, QueueError> {
        let head = self.inner.head.load(Ordering::Relaxed);
        let tail = self.inner.tail.load(Ordering::Acquire);

        if head == tail {
            return Err(QueueError::Empty);
        }

        let value = unsafe { (*self.inner.buf[head % N].get()).assume_init_read() };

        self.inner.head.store(head.wrapping_add(1), Ordering::Release);

        Ok(value)
    }

    /// Borrows the head element without removing it.
    ///
    /// The producer never touches the slot until [`pop`](Self::pop) releases it.
    pub fn peek(&self) -> Result<&T, QueueError> {
        let head = self.inner.head.load(Ordering::Relaxed);
        let tail = self.inner.tail.load(Ordering::Acquire);

        if head == tail {
            return Err(QueueError::Empty);
        }

        Ok(unsafe { (*self.inner.buf[head % N].get()).assume_init_ref() })
    }

    /// Number of queued elements.
    pub fn len(&self) -> usize {
        let tail = self.inner.tail.load(Ordering::Acquire);
        let head = self.inner.head.load(Ordering::Relaxed);

        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
