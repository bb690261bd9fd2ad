//! # Double-Buffered Records
//!
//! A [`BufferedRecord`] holds two copies of a fixed-layout payload. The
//! *front* copy is the last known-good value and is what readers see. The
//! *back* copy is a staging area that incoming data is written into.
//!
//! ## Swap Discipline
//!
//! The active index flips only after the back copy has been fully written:
//!
//! 1. Copy the incoming value (or raw bytes) into the back slot.
//! 2. If the copy failed, stop. The front is untouched.
//! 3. Otherwise swap, making the back slot the new front.
//!
//! A failed transfer therefore can never tear the front value.
//!
//! ## Layout
//!
//! Payloads are [`bytemuck::Pod`] so that their persisted form is their raw
//! in-memory image (`size_of::<T>()` bytes). Changing a payload's layout is a
//! breaking change for data already stored; owners version their payloads.

use crate::error::{GameSaveError, Result};
use bytemuck::Pod;

#[derive(Debug, Clone)]
pub struct BufferedRecord<T: Pod + Default> {
    slots: [T; 2],
    active: usize,
}

impl<T: Pod + Default> Default for BufferedRecord<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Pod + Default> BufferedRecord<T> {
    pub fn new() -> Self {
        Self {
            slots: [T::default(), T::default()],
            active: 0,
        }
    }

    /// Size in bytes of the persisted image.
    pub const fn byte_len() -> usize {
        std::mem::size_of::<T>()
    }

    pub fn front(&self) -> &T {
        &self.slots[self.active]
    }

    pub fn front_mut(&mut self) -> &mut T {
        &mut self.slots[self.active]
    }

    pub(crate) fn back_mut(&mut self) -> &mut T {
        &mut self.slots[(self.active + 1) & 1]
    }

    pub fn swap(&mut self) {
        self.active = (self.active + 1) & 1;
    }

    /// Copy `value` into the back slot and make it the front.
    pub fn set_data(&mut self, value: &T) {
        *self.back_mut() = *value;
        self.swap();
    }

    /// Raw-copy a persisted image into the back slot and swap.
    ///
    /// A length other than `size_of::<T>()` is a layout/version error: it is
    /// logged and reported, and neither slot is modified.
    pub fn set_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let expected = Self::byte_len();
        if bytes.len() != expected {
            tracing::error!(
                expected,
                actual = bytes.len(),
                "raw copy of save data failed: size mismatch"
            );
            return Err(GameSaveError::SizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        bytemuck::bytes_of_mut(self.back_mut()).copy_from_slice(bytes);
        self.swap();
        Ok(())
    }

    /// The persisted image of the front value.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self.front())
    }

    pub fn reset(&mut self) {
        self.slots = [T::default(), T::default()];
        self.active = 0;
    }

    #[cfg(test)]
    pub(crate) fn active_index(&self) -> usize {
        self.active
    }
}
