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

//! Device memory access.
//!
//! Descriptor rings, completion queues and packet buffers all live in memory
//! that the device reads or writes behind the driver's back. Every access the
//! datapath makes to that memory goes through [`MemOps`], so the engines can
//! run against a real DMA region or a plain `Vec` in tests.

use bytemuck::Pod;

/// Access to device-visible memory, addressed by IO virtual address.
///
/// # Safety
///
/// Implementations must ensure that:
/// - addresses handed out by the layout and pools translate to mapped memory
/// - `load_acquire`/`store_release` provide the documented ordering
/// - plain reads and writes never tear an aligned 16-bit word
pub trait MemOps {
    type Error;

    /// Copy `dst.len()` bytes starting at `addr` into `dst`.
    ///
    /// Returns the number of bytes read.
    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error>;

    /// Copy `src` into device memory at `addr`.
    ///
    /// Returns the number of bytes written.
    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error>;

    /// Load a little-endian u16 with acquire semantics.
    ///
    /// Completion color bits are observed through this call; any read of the
    /// rest of the entry that follows it sees the device's writes.
    fn load_acquire(&self, addr: u64) -> Result<u16, Self::Error>;

    /// Store a u16 with release semantics.
    fn store_release(&self, addr: u64, val: u16) -> Result<(), Self::Error>;

    /// Read a Pod value at `addr`.
    fn read_val<T: Pod>(&self, addr: u64) -> Result<T, Self::Error> {
        let mut val = T::zeroed();
        self.read(addr, bytemuck::bytes_of_mut(&mut val))?;
        Ok(val)
    }

    /// Write a Pod value at `addr`.
    fn write_val<T: Pod>(&self, addr: u64, val: T) -> Result<(), Self::Error> {
        self.write(addr, bytemuck::bytes_of(&val))?;
        Ok(())
    }
}
