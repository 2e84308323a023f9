//! Lock-free single-producer/single-consumer handoff.
//!
//! Three pre-allocated slots: the producer owns the back slot, the consumer owns the front
//! slot, and the middle slot is exchanged through one atomic word. Both sides always have a
//! slot nobody else touches, so neither ever waits for the other.
//!
//! The same type carries noise profiles from the control thread to the audio thread and the
//! learned profile back again. Which thread produces is decided by who holds which handle.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Set on the middle word when it holds a slot the consumer has not taken yet
const DIRTY_BIT: u32 = 1 << 31;
const INDEX_MASK: u32 = !DIRTY_BIT;

struct SharedSlots<T> {
    slots: [UnsafeCell<T>; 3],
    /// Index of the middle slot, plus [`DIRTY_BIT`]
    middle: AtomicU32,
}

// Each slot is accessed by at most one handle at a time: the back slot by the producer, the
// front slot by the consumer. Ownership of the middle slot only changes through the atomic
// swaps below, which also order the slot contents between the threads.
unsafe impl<T: Send> Sync for SharedSlots<T> {}

impl<T> SharedSlots<T> {
    /// # Safety
    /// The caller must own `index` according to the handoff protocol.
    unsafe fn slot(&self, index: u32) -> &T {
        &*self.slots[index as usize].get()
    }

    /// # Safety
    /// The caller must own `index` according to the handoff protocol.
    #[allow(clippy::mut_from_ref)]
    unsafe fn slot_mut(&self, index: u32) -> &mut T {
        &mut *self.slots[index as usize].get()
    }
}

/// A triple buffer before it is split into its two role handles
pub struct TripleBuffer<T> {
    shared: Arc<SharedSlots<T>>,
}

impl<T: Clone> TripleBuffer<T> {
    /// Allocate the three slots, each a copy of `initial`. This is the only allocation the
    /// handoff ever makes.
    pub fn new(initial: &T) -> Self {
        Self {
            shared: Arc::new(SharedSlots {
                slots: [
                    UnsafeCell::new(initial.clone()),
                    UnsafeCell::new(initial.clone()),
                    UnsafeCell::new(initial.clone()),
                ],
                middle: AtomicU32::new(1),
            }),
        }
    }
}

impl<T> TripleBuffer<T> {
    /// Split into the producer and consumer ends
    pub fn split(self) -> (ProducerHandle<T>, ConsumerHandle<T>) {
        (
            ProducerHandle {
                shared: self.shared.clone(),
                back: 0,
            },
            ConsumerHandle {
                shared: self.shared,
                front: 2,
            },
        )
    }
}

/// Producer end: writes into its private back slot and publishes it
pub struct ProducerHandle<T> {
    shared: Arc<SharedSlots<T>>,
    back: u32,
}

impl<T> ProducerHandle<T> {
    /// The private back slot. Its contents are whatever was last left in that slot, so
    /// callers overwrite every field they publish.
    pub fn write(&mut self) -> &mut T {
        // SAFETY: the back slot belongs to the producer until the next publish
        unsafe { self.shared.slot_mut(self.back) }
    }

    /// Hand the back slot over to the consumer. A previously published value that was never
    /// consumed is dropped from the exchange and its slot becomes the new back slot.
    pub fn publish(&mut self) {
        let previous = self
            .shared
            .middle
            .swap(self.back | DIRTY_BIT, Ordering::AcqRel);
        self.back = previous & INDEX_MASK;
    }
}

/// Consumer end: picks up the latest published slot as its front slot
pub struct ConsumerHandle<T> {
    shared: Arc<SharedSlots<T>>,
    front: u32,
}

impl<T> ConsumerHandle<T> {
    /// Take the latest published value if there is one. Returns whether a new value arrived,
    /// and the current front value either way.
    pub fn try_consume(&mut self) -> (bool, &T) {
        if !self.has_pending() {
            return (false, self.read());
        }

        let previous = self.shared.middle.swap(self.front, Ordering::AcqRel);
        self.front = previous & INDEX_MASK;
        (true, self.read())
    }

    /// The current front value, without looking for updates
    pub fn read(&self) -> &T {
        // SAFETY: the front slot belongs to the consumer until the next successful consume
        unsafe { self.shared.slot(self.front) }
    }

    /// Whether a published value is waiting to be consumed
    pub fn has_pending(&self) -> bool {
        self.shared.middle.load(Ordering::Acquire) & DIRTY_BIT != 0
    }
}
