// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The single-producer/single-consumer byte ring between the send-side API
//! and the network-progress thread.
//!
//! The producer owns `tail`, the consumer owns `head`; each publishes its
//! own cursor with a Release store and reads the other's with an Acquire
//! load, so the consumer never observes a torn write. One slot is kept
//! empty to tell a full ring from an empty one. Frames are pushed whole,
//! which keeps the stream on message boundaries even though the consumer
//! pops arbitrary prefixes.

use std::cell::UnsafeCell;
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The producer's push did not fit in the free space.
#[derive(Debug, PartialEq, Eq)]
pub struct RingFull;

struct Inner {
    storage: Box<[UnsafeCell<u8>]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// SAFETY: the cells are only ever touched under the SPSC protocol above;
// the producer writes only slots in [tail, head) free space and the
// consumer reads only slots in [head, tail).
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

impl Inner {
    fn capacity(&self) -> usize {
        self.storage.len()
    }

    fn data(&self) -> *mut u8 {
        self.storage.as_ptr() as *const u8 as *mut u8
    }
}

/// Send half. The runtime serializes its producers; the ring itself assumes
/// exactly one pushing thread at a time.
pub struct Producer {
    inner: Arc<Inner>,
    /// Cache of the producer-owned cursor; the atomic is the published copy.
    tail: usize,
}

/// Receive half, owned by the network-progress thread.
pub struct Consumer {
    inner: Arc<Inner>,
    head: usize,
}

/// Construct a ring holding up to `capacity - 1` bytes at a time.
pub fn channel(capacity: usize) -> (Producer, Consumer) {
    assert!(capacity >= 2, "ring needs room for data plus the empty slot");

    let storage = (0..capacity).map(|_| UnsafeCell::new(0)).collect();
    let inner = Arc::new(Inner {
        storage,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });

    (
        Producer {
            inner: Arc::clone(&inner),
            tail: 0,
        },
        Consumer { inner, head: 0 },
    )
}

impl Producer {
    /// Largest frame the ring can ever hold.
    pub fn max_frame_len(&self) -> usize {
        self.inner.capacity() - 1
    }

    /// Append `bytes` atomically: the consumer sees all of them or none.
    /// Fails with `RingFull` when the free space is smaller than `bytes`;
    /// the caller decides whether to retry or give up.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), RingFull> {
        let capacity = self.inner.capacity();
        let head = self.inner.head.load(Ordering::Acquire);

        let used = if self.tail >= head {
            self.tail - head
        } else {
            capacity - (head - self.tail)
        };
        if bytes.len() > capacity - 1 - used {
            return Err(RingFull);
        }

        let first = bytes.len().min(capacity - self.tail);
        // SAFETY: [tail, head) modulo capacity is free space that the
        // consumer will not read until the Release store below.
        unsafe {
            let data = self.inner.data();
            ptr::copy_nonoverlapping(bytes.as_ptr(), data.add(self.tail), first);
            ptr::copy_nonoverlapping(bytes.as_ptr().add(first), data, bytes.len() - first);
        }

        self.tail = (self.tail + bytes.len()) % capacity;
        self.inner.tail.store(self.tail, Ordering::Release);
        Ok(())
    }
}

impl Consumer {
    /// The largest contiguous readable slice, possibly empty. Bytes stay in
    /// the ring until `pop`.
    pub fn peek(&self) -> &[u8] {
        let tail = self.inner.tail.load(Ordering::Acquire);
        let head = self.head;
        if head == tail {
            return &[];
        }

        let end = if tail > head {
            tail
        } else {
            self.inner.capacity()
        };
        // SAFETY: [head, end) was published by the producer's Release store
        // and will not be overwritten until this consumer pops it.
        unsafe { slice::from_raw_parts(self.inner.data().add(head), end - head) }
    }

    /// Release `n` bytes back to the producer. `n` must not exceed the
    /// length of the slice `peek` just returned.
    pub fn pop(&mut self, n: usize) {
        debug_assert!(n <= self.peek().len());
        self.head = (self.head + n) % self.inner.capacity();
        self.inner.head.store(self.head, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Drain everything currently readable, following the wrap point.
    fn drain(consumer: &mut Consumer) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let chunk = consumer.peek();
            if chunk.is_empty() {
                return out;
            }
            out.extend_from_slice(chunk);
            let n = chunk.len();
            consumer.pop(n);
        }
    }

    #[test]
    fn push_peek_pop() {
        let (mut producer, mut consumer) = channel(16);

        producer.push(&[1, 2, 3]).unwrap();
        assert_eq!(consumer.peek(), [1, 2, 3]);

        consumer.pop(3);
        assert!(consumer.peek().is_empty());
    }

    #[test]
    fn keeps_one_slot_empty() {
        let (mut producer, _consumer) = channel(8);
        assert_eq!(producer.max_frame_len(), 7);
        assert_eq!(producer.push(&[0u8; 8]), Err(RingFull));
        producer.push(&[0u8; 7]).unwrap();
        assert_eq!(producer.push(&[0u8; 1]), Err(RingFull));
    }

    #[test]
    fn frees_space_after_pop() {
        let (mut producer, mut consumer) = channel(8);
        producer.push(&[0u8; 7]).unwrap();
        consumer.pop(4);
        producer.push(&[9u8; 4]).unwrap();
        assert_eq!(drain(&mut consumer).len(), 7);
    }

    #[test]
    fn wraps_around_the_buffer_end() {
        let (mut producer, mut consumer) = channel(8);

        producer.push(&[1, 2, 3, 4, 5]).unwrap();
        consumer.pop(5);

        // This push straddles the end of storage; peek must surface it as
        // two contiguous slices in order.
        producer.push(&[6, 7, 8, 9, 10]).unwrap();
        assert_eq!(drain(&mut consumer), [6, 7, 8, 9, 10]);
    }

    #[test]
    fn fifo_across_threads() {
        let (mut producer, mut consumer) = channel(64);

        let writer = thread::spawn(move || {
            for run in 0u8..100 {
                let bytes = [run; 5];
                loop {
                    match producer.push(&bytes) {
                        Ok(()) => break,
                        Err(RingFull) => thread::yield_now(),
                    }
                }
            }
        });

        let mut seen = Vec::new();
        while seen.len() < 500 {
            let chunk = consumer.peek();
            if chunk.is_empty() {
                thread::yield_now();
                continue;
            }
            seen.extend_from_slice(chunk);
            let n = chunk.len();
            consumer.pop(n);
        }
        writer.join().unwrap();

        for (i, &byte) in seen.iter().enumerate() {
            assert_eq!(byte, (i / 5) as u8, "byte {i} out of order");
        }
    }
}
