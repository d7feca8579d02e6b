/*
Copyright 2026  The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Completion queue consumer.
//!
//! The device writes completion entries in ring order and toggles a color bit
//! each time it wraps. An entry at `tail` is new when its color equals
//! `done_color`; the consumer flips `done_color` whenever its own tail wraps.

use core::marker::PhantomData;

use bytemuck::Pod;

use crate::access::MemOps;
use crate::desc::COLOR_WORD_OFFSET;
use crate::error::DatapathError;

/// A completion record written by the device.
pub trait Completion: Pod {
    /// Extract the color from the little-endian word at [`COLOR_WORD_OFFSET`].
    fn color_of(word: u16) -> bool;
    fn color(&self) -> bool;
    fn comp_index(&self) -> u16;
}

#[derive(Debug)]
pub struct CompletionQueue<C> {
    base_addr: u64,
    num_descs: u16,
    tail: u16,
    done_color: bool,
    _entry: PhantomData<C>,
}

impl<C: Completion> CompletionQueue<C> {
    /// Create a consumer over `num_descs` entries starting at `base_addr`.
    ///
    /// `num_descs` must be a power of two.
    pub fn new(base_addr: u64, num_descs: u16) -> Result<Self, DatapathError> {
        if !num_descs.is_power_of_two() {
            return Err(DatapathError::InvalidLayout);
        }

        Ok(Self {
            base_addr,
            num_descs,
            tail: 0,
            done_color: true,
            _entry: PhantomData,
        })
    }

    #[inline]
    pub fn tail(&self) -> u16 {
        self.tail
    }

    #[inline]
    pub fn done_color(&self) -> bool {
        self.done_color
    }

    #[inline]
    pub fn num_descs(&self) -> u16 {
        self.num_descs
    }

    #[inline]
    fn entry_addr(&self, idx: u16) -> u64 {
        self.base_addr + idx as u64 * core::mem::size_of::<C>() as u64
    }

    /// Return the entry at the tail if the device has written it.
    ///
    /// Pure with respect to queue state.
    pub fn peek<M: MemOps>(&self, mem: &M) -> Result<Option<C>, DatapathError> {
        let addr = self.entry_addr(self.tail);
        let word = mem
            .load_acquire(addr + COLOR_WORD_OFFSET as u64)
            .map_err(|_| DatapathError::MemError)?;

        if C::color_of(word) != self.done_color {
            return Ok(None);
        }

        let entry: C = mem.read_val(addr).map_err(|_| DatapathError::MemError)?;
        Ok(Some(entry))
    }

    /// Advance past the entry at the tail.
    #[inline]
    pub fn consume(&mut self) {
        self.tail = (self.tail + 1) & (self.num_descs - 1);
        if self.tail == 0 {
            self.done_color = !self.done_color;
        }
    }

    pub(crate) fn reset(&mut self) {
        self.tail = 0;
        self.done_color = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::TxComp;
    use crate::testing::Harness;

    #[test]
    fn test_fresh_queue_sees_nothing() {
        let h = Harness::new(8, 1);
        let cq = CompletionQueue::<TxComp>::new(h.layout.cq_table_addr, 8).unwrap();
        assert_eq!(cq.peek(&h.mem).unwrap(), None);
        assert!(cq.done_color());
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        assert_eq!(
            CompletionQueue::<TxComp>::new(0x1000, 6).unwrap_err(),
            DatapathError::InvalidLayout
        );
    }

    #[test]
    fn test_peek_is_pure() {
        let h = Harness::new(8, 1);
        let cq = CompletionQueue::<TxComp>::new(h.layout.cq_table_addr, 8).unwrap();
        h.push_tx_comp(1);

        let a = cq.peek(&h.mem).unwrap().unwrap();
        let b = cq.peek(&h.mem).unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(cq.tail(), 0);
    }

    #[test]
    fn test_color_flips_once_per_wrap() {
        let h = Harness::new(4, 1);
        let mut cq = CompletionQueue::<TxComp>::new(h.layout.cq_table_addr, 4).unwrap();

        for lap in 0..3 {
            for i in 0..4u16 {
                h.push_tx_comp(i);
                let entry = cq.peek(&h.mem).unwrap().unwrap();
                assert_eq!(entry.comp_index(), i);
                cq.consume();
                assert_eq!(cq.peek(&h.mem).unwrap(), None);
            }
            assert_eq!(cq.tail(), 0);
            assert_eq!(cq.done_color(), lap % 2 == 1);
        }
    }

    #[test]
    fn test_stale_entry_after_wrap_not_ready() {
        let h = Harness::new(4, 1);
        let mut cq = CompletionQueue::<TxComp>::new(h.layout.cq_table_addr, 4).unwrap();
        for i in 0..4u16 {
            h.push_tx_comp(i);
            cq.consume();
        }
        // entry 0 still holds the previous lap's color
        assert_eq!(cq.peek(&h.mem).unwrap(), None);
    }
}
