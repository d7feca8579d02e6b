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

use crate::desc::{RxComp, RxDesc, SgElem, TxComp, TxDesc};
use crate::error::DatapathError;

/// Placement of one queue pair in device memory.
///
/// The region is laid out as:
/// 1. Descriptor table: `num_descs` × 16 bytes
/// 2. Scatter-gather table: `num_descs` × (`num_segs` - 1) × 16 bytes
/// 3. Completion table: `num_descs` × 16 bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub desc_table_addr: u64,
    pub sg_table_addr: u64,
    pub cq_table_addr: u64,
    pub num_descs: u16,
    /// Buffers per descriptor: the head buffer plus scatter-gather elements.
    pub num_segs: u16,
}

const DESC_SIZE: usize = 16;
const DESC_ALIGN: u64 = 16;

const _: () = {
    assert!(TxDesc::SIZE == DESC_SIZE);
    assert!(RxDesc::SIZE == DESC_SIZE);
    assert!(SgElem::SIZE == DESC_SIZE);
    assert!(TxComp::SIZE == DESC_SIZE);
    assert!(RxComp::SIZE == DESC_SIZE);
};

impl Layout {
    /// Compute a layout for a ring of `num_descs` descriptors with `num_segs`
    /// buffers each, starting at `base`.
    ///
    /// # Safety
    /// - `base` must be valid for `Layout::query_size(num_descs, num_segs)` bytes.
    /// - Memory must remain valid for the lifetime of the queue.
    pub const unsafe fn from_base(
        base: u64,
        num_descs: u16,
        num_segs: u16,
    ) -> Result<Self, DatapathError> {
        if !base.is_multiple_of(DESC_ALIGN) || !num_descs.is_power_of_two() || num_segs == 0 {
            return Err(DatapathError::InvalidLayout);
        }

        let desc_bytes = num_descs as u64 * DESC_SIZE as u64;
        let sg_bytes = desc_bytes * (num_segs as u64 - 1);

        Ok(Self {
            desc_table_addr: base,
            sg_table_addr: base + desc_bytes,
            cq_table_addr: base + desc_bytes + sg_bytes,
            num_descs,
            num_segs,
        })
    }

    /// Bytes of device memory needed for a queue of this shape.
    pub const fn query_size(num_descs: usize, num_segs: usize) -> usize {
        let desc_bytes = num_descs * DESC_SIZE;
        desc_bytes + desc_bytes * num_segs.saturating_sub(1) + desc_bytes
    }

    #[inline]
    pub fn desc_addr(&self, idx: u16) -> u64 {
        self.desc_table_addr + idx as u64 * DESC_SIZE as u64
    }

    /// Address of scatter-gather element `elem` (0-based, i.e. buffer `elem + 1`) of slot `idx`.
    #[inline]
    pub fn sg_addr(&self, idx: u16, elem: u16) -> u64 {
        let stride = (self.num_segs as u64 - 1) * DESC_SIZE as u64;
        self.sg_table_addr + idx as u64 * stride + elem as u64 * DESC_SIZE as u64
    }

    #[inline]
    pub fn comp_addr(&self, idx: u16) -> u64 {
        self.cq_table_addr + idx as u64 * DESC_SIZE as u64
    }
}
