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

//! Descriptor ring bookkeeping.
//!
//! The ring itself lives in device memory; [`DescRing`] holds the driver's
//! side of it: the producer index `head`, the consumer index `tail`, and
//! which buffers are attached to each slot. One slot is always kept empty so
//! that `head == tail` unambiguously means "nothing in flight".

use alloc::vec::Vec;
use core::iter;

use crate::error::DatapathError;
use crate::pool::Buffer;

#[derive(Debug)]
pub struct DescRing {
    num_descs: u16,
    num_segs: u16,
    head: u16,
    tail: u16,
    /// `num_descs * num_segs` ownership slots, indexed by `slot * num_segs + seg`
    info: Vec<Option<Buffer>>,
}

impl DescRing {
    pub fn new(num_descs: u16, num_segs: u16) -> Result<Self, DatapathError> {
        if !num_descs.is_power_of_two() || num_descs < 2 {
            return Err(DatapathError::InvalidConfig("ring size must be a power of two"));
        }
        if num_segs == 0 {
            return Err(DatapathError::InvalidConfig("ring needs at least one segment"));
        }

        let total = num_descs as usize * num_segs as usize;
        Ok(Self {
            num_descs,
            num_segs,
            head: 0,
            tail: 0,
            info: iter::repeat_with(|| None).take(total).collect(),
        })
    }

    #[inline]
    pub fn num_descs(&self) -> u16 {
        self.num_descs
    }

    #[inline]
    pub fn num_segs(&self) -> u16 {
        self.num_segs
    }

    #[inline]
    pub fn head(&self) -> u16 {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> u16 {
        self.tail
    }

    #[inline]
    fn mask(&self) -> u16 {
        self.num_descs - 1
    }

    /// Slots between tail and head.
    #[inline]
    pub fn in_flight(&self) -> u16 {
        self.head.wrapping_sub(self.tail) & self.mask()
    }

    /// Slots the producer may still fill.
    #[inline]
    pub fn space_available(&self) -> u16 {
        self.num_descs - self.in_flight() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Move the producer index forward by `n` slots, wrapping.
    #[inline]
    pub fn advance_head(&mut self, n: u16) {
        self.head = self.head.wrapping_add(n) & self.mask();
    }

    /// Move the consumer index forward by `n` slots, wrapping.
    #[inline]
    pub fn advance_tail(&mut self, n: u16) {
        self.tail = self.tail.wrapping_add(n) & self.mask();
    }

    /// Distance from `tail` to `idx` walking forward.
    #[inline]
    pub fn distance_from_tail(&self, idx: u16) -> u16 {
        idx.wrapping_sub(self.tail) & self.mask()
    }

    #[inline]
    fn info_idx(&self, slot: u16, seg: u16) -> usize {
        debug_assert!(slot < self.num_descs && seg < self.num_segs);
        slot as usize * self.num_segs as usize + seg as usize
    }

    /// Record that `buf` is owned by segment `seg` of `slot`.
    pub fn attach(&mut self, slot: u16, seg: u16, buf: Buffer) -> Result<(), DatapathError> {
        let idx = self.info_idx(slot, seg);
        let entry = &mut self.info[idx];
        if entry.is_some() {
            return Err(DatapathError::SlotOccupied { slot, seg });
        }
        *entry = Some(buf);
        Ok(())
    }

    /// Release ownership of the buffer in segment `seg` of `slot`, if any.
    #[inline]
    pub fn detach(&mut self, slot: u16, seg: u16) -> Option<Buffer> {
        let idx = self.info_idx(slot, seg);
        self.info[idx].take()
    }

    #[inline]
    pub fn is_attached(&self, slot: u16, seg: u16) -> bool {
        self.info[self.info_idx(slot, seg)].is_some()
    }

    #[inline]
    pub fn get(&self, slot: u16, seg: u16) -> Option<&Buffer> {
        self.info[self.info_idx(slot, seg)].as_ref()
    }

    /// Detach every buffer of `slot` and hand each to `release`.
    pub fn drain_slot<F: FnMut(Buffer)>(&mut self, slot: u16, mut release: F) -> usize {
        let start = self.info_idx(slot, 0);
        let end = start + self.num_segs as usize;
        let mut released = 0;
        for buf in self.info[start..end].iter_mut().filter_map(Option::take) {
            release(buf);
            released += 1;
        }
        released
    }

    /// Number of buffers currently owned by the ring.
    pub fn attached(&self) -> usize {
        self.info.iter().filter(|b| b.is_some()).count()
    }

    /// Drop every attached buffer and rewind both indices.
    pub fn reset(&mut self) {
        self.info.iter_mut().for_each(|b| *b = None);
        self.head = 0;
        self.tail = 0;
    }
}
