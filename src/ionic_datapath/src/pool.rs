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

//! Packet buffer pools.
//!
//! The datapath never allocates packet memory itself. It draws fixed-size
//! buffers from a [`BufferProvider`] in batches and hands them back one at a
//! time. [`Buffer`] is the owned handle: dropping it returns the memory to the
//! pool it came from, so a buffer cannot be freed twice.
//!
//! [`SlabPool`] is a bitmap-backed provider over a fixed region of device
//! memory, one slot per buffer.

use alloc::sync::Arc;
use core::fmt;

use fixedbitset::FixedBitSet;
use smallvec::SmallVec;
use spin::Mutex;
use thiserror::Error;

use crate::error::DatapathError;

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("Invalid region addr {0:#x}")]
    InvalidAlign(u64),
    #[error("Invalid free addr {0:#x} and size {1}")]
    InvalidFree(u64, usize),
    #[error("Invalid argument")]
    InvalidArg,
    #[error("Empty region")]
    EmptyRegion,
    #[error("Out of memory")]
    OutOfMemory,
}

/// A region of device memory handed out by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Allocation {
    /// IO address of the first byte
    pub addr: u64,
    /// Length in bytes
    pub len: usize,
}

/// A source of fixed-size packet buffers.
///
/// Implementations synchronize internally; the datapath may call them from
/// any queue.
pub trait BufferProvider: Send + Sync {
    /// Size of every buffer this provider hands out.
    fn buf_size(&self) -> usize;

    /// Fill `out` with fresh buffers, all or nothing.
    fn alloc_bulk(&self, out: &mut [Allocation]) -> Result<(), AllocError>;

    /// Return a buffer obtained from `alloc_bulk`.
    fn dealloc(&self, alloc: Allocation) -> Result<(), AllocError>;

    /// Buffers currently free.
    fn available(&self) -> usize;
}

/// Shared handle to a buffer provider.
#[derive(Clone)]
pub struct Pool(Arc<dyn BufferProvider>);

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("buf_size", &self.0.buf_size())
            .field("available", &self.0.available())
            .finish()
    }
}

impl Pool {
    pub fn new<P: BufferProvider + 'static>(provider: P) -> Self {
        Self(Arc::new(provider))
    }

    pub fn from_arc(provider: Arc<dyn BufferProvider>) -> Self {
        Self(provider)
    }

    #[inline]
    pub fn buf_size(&self) -> usize {
        self.0.buf_size()
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.0.available()
    }

    /// Take one buffer.
    pub fn get(&self) -> Result<Buffer, DatapathError> {
        let mut slot = [Allocation::default()];
        self.0.alloc_bulk(&mut slot)?;
        Ok(Buffer::new(slot[0], self.clone()))
    }

    /// Take `N` buffers in one provider call and append them to `out`.
    ///
    /// On failure `out` is left untouched.
    pub fn get_bulk<const N: usize>(
        &self,
        out: &mut SmallVec<[Buffer; N]>,
    ) -> Result<(), DatapathError> {
        let mut allocs = [Allocation::default(); N];
        self.0.alloc_bulk(&mut allocs)?;
        out.extend(allocs.into_iter().map(|a| Buffer::new(a, self.clone())));
        Ok(())
    }

    /// Return a buffer to this pool, whichever pool it was taken from.
    ///
    /// Used by queues whose buffers are known to share one pool.
    pub fn put(&self, buf: Buffer) {
        let alloc = buf.into_raw();
        if let Err(e) = self.0.dealloc(alloc) {
            log::warn!("Failed to return buffer {:#x} to pool: {}", alloc.addr, e);
        }
    }
}

/// One packet buffer: a pool element plus the window holding packet data.
pub struct Buffer {
    alloc: Allocation,
    data_off: u16,
    data_len: u16,
    pool: Option<Pool>,
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("addr", &format_args!("{:#x}", self.alloc.addr))
            .field("len", &self.alloc.len)
            .field("data_off", &self.data_off)
            .field("data_len", &self.data_len)
            .finish()
    }
}

impl Buffer {
    fn new(alloc: Allocation, pool: Pool) -> Self {
        Self {
            alloc,
            data_off: 0,
            data_len: 0,
            pool: Some(pool),
        }
    }

    /// Total bytes of the underlying pool element.
    #[inline]
    pub fn buf_len(&self) -> usize {
        self.alloc.len
    }

    /// Bytes available from the data offset to the end of the element.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.alloc.len - self.data_off as usize
    }

    /// IO address of the first data byte.
    #[inline]
    pub fn data_addr(&self) -> u64 {
        self.alloc.addr + self.data_off as u64
    }

    #[inline]
    pub fn data_off(&self) -> u16 {
        self.data_off
    }

    #[inline]
    pub fn data_len(&self) -> u16 {
        self.data_len
    }

    /// Reserve `off` bytes of headroom. Clears the data length.
    pub fn set_data_off(&mut self, off: u16) -> Result<(), DatapathError> {
        if off as usize > self.alloc.len {
            return Err(DatapathError::Alloc(AllocError::InvalidArg));
        }
        self.data_off = off;
        self.data_len = 0;
        Ok(())
    }

    pub fn set_data_len(&mut self, len: u16) -> Result<(), DatapathError> {
        if len as usize > self.capacity() {
            return Err(DatapathError::Alloc(AllocError::InvalidArg));
        }
        self.data_len = len;
        Ok(())
    }

    /// Pool this buffer returns to on drop.
    pub fn pool(&self) -> Option<&Pool> {
        self.pool.as_ref()
    }

    /// Detach from the owning pool without freeing.
    pub fn into_raw(mut self) -> Allocation {
        self.pool = None;
        self.alloc
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take()
            && let Err(e) = pool.0.dealloc(self.alloc)
        {
            log::warn!("Failed to return buffer {:#x} to pool: {}", self.alloc.addr, e);
        }
    }
}

/// Fixed-size buffer provider over a contiguous region.
pub struct SlabPool {
    base_addr: u64,
    buf_size: usize,
    used: Mutex<FixedBitSet>,
}

impl fmt::Debug for SlabPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabPool")
            .field("base_addr", &format_args!("{:#x}", self.base_addr))
            .field("buf_size", &self.buf_size)
            .field("available", &self.available())
            .finish()
    }
}

impl SlabPool {
    /// Carve `region_len` bytes at `base_addr` into buffers of `buf_size` bytes.
    /// The region is rounded down to a multiple of `buf_size`.
    pub fn new(base_addr: u64, region_len: usize, buf_size: usize) -> Result<Self, AllocError> {
        if buf_size == 0 || buf_size > u16::MAX as usize {
            return Err(AllocError::InvalidArg);
        }
        if !base_addr.is_multiple_of(64) {
            return Err(AllocError::InvalidAlign(base_addr));
        }

        let num_slots = region_len / buf_size;
        if num_slots == 0 {
            return Err(AllocError::EmptyRegion);
        }

        Ok(Self {
            base_addr,
            buf_size,
            used: Mutex::new(FixedBitSet::with_capacity(num_slots)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.used.lock().len()
    }

    #[inline]
    fn addr_of(&self, slot: usize) -> u64 {
        self.base_addr + (slot * self.buf_size) as u64
    }

    fn slot_of(&self, alloc: Allocation) -> Option<usize> {
        let off = alloc.addr.checked_sub(self.base_addr)? as usize;
        if alloc.len != self.buf_size || !off.is_multiple_of(self.buf_size) {
            return None;
        }
        Some(off / self.buf_size)
    }
}

impl BufferProvider for SlabPool {
    fn buf_size(&self) -> usize {
        self.buf_size
    }

    fn alloc_bulk(&self, out: &mut [Allocation]) -> Result<(), AllocError> {
        if out.is_empty() {
            return Ok(());
        }

        let mut used = self.used.lock();
        if used.count_zeroes(..) < out.len() {
            return Err(AllocError::OutOfMemory);
        }

        let slots: SmallVec<[usize; 64]> = used.zeroes().take(out.len()).collect();
        for (dst, slot) in out.iter_mut().zip(slots) {
            used.insert(slot);
            *dst = Allocation {
                addr: self.addr_of(slot),
                len: self.buf_size,
            };
        }
        Ok(())
    }

    fn dealloc(&self, alloc: Allocation) -> Result<(), AllocError> {
        let invalid = AllocError::InvalidFree(alloc.addr, alloc.len);
        let slot = self.slot_of(alloc).ok_or(invalid)?;

        let mut used = self.used.lock();
        if slot >= used.len() || !used.contains(slot) {
            return Err(invalid);
        }
        used.set(slot, false);
        Ok(())
    }

    fn available(&self) -> usize {
        self.used.lock().count_zeroes(..)
    }
}
