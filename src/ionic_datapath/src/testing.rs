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

//! Shared fixtures for unit tests: Vec-backed device memory and a minimal
//! device model that reads descriptors and writes completions.

use alloc::rc::Rc;
use core::cell::{Cell, RefCell, UnsafeCell};
use core::ptr;
use core::sync::atomic::{AtomicU16, Ordering};
use core::time::Duration;

use bytemuck::Pod;

use crate::access::MemOps;
use crate::desc::{COLOR_WORD_OFFSET, RxComp, RxDesc, SgElem, TxComp, TxDesc};
use crate::device::{Clock, Doorbell};
use crate::layout::Layout;
use crate::pool::{Pool, SlabPool};

/// Returned by [`TestMem`] writes while failures are switched on.
#[derive(Debug)]
pub struct WriteFault;

/// Test MemOps implementation that maintains pointer provenance.
///
/// Addresses are host pointers into the backing Vec.
pub struct TestMem {
    storage: UnsafeCell<Vec<u8>>,
    base_addr: u64,
    len: usize,
    fail_writes: Cell<bool>,
}

impl TestMem {
    pub fn new(size: usize) -> Self {
        let storage = vec![0u8; size];
        let base_addr = storage.as_ptr() as u64;
        Self {
            storage: UnsafeCell::new(storage),
            base_addr,
            len: size,
            fail_writes: Cell::new(false),
        }
    }

    fn ptr_for_addr(&self, addr: u64, len: usize) -> *mut u8 {
        let offset = (addr - self.base_addr) as usize;
        assert!(offset + len <= self.len, "access outside test memory");
        let storage = unsafe { &mut *self.storage.get() };
        storage.as_mut_ptr().wrapping_add(offset)
    }

    pub fn base_addr(&self) -> u64 {
        self.base_addr
    }

    /// Make `write` and `write_val` fail until switched off again.
    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.set(on);
    }

    fn check_write(&self) -> Result<(), WriteFault> {
        if self.fail_writes.get() {
            return Err(WriteFault);
        }
        Ok(())
    }
}

impl MemOps for Rc<TestMem> {
    type Error = WriteFault;

    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error> {
        let src = self.ptr_for_addr(addr, dst.len());
        unsafe { ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) };
        Ok(dst.len())
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error> {
        self.check_write()?;
        let dst = self.ptr_for_addr(addr, src.len());
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
        Ok(src.len())
    }

    fn read_val<T: Pod>(&self, addr: u64) -> Result<T, Self::Error> {
        let ptr = self.ptr_for_addr(addr, size_of::<T>()).cast::<T>();
        Ok(unsafe { ptr::read_unaligned(ptr) })
    }

    fn write_val<T: Pod>(&self, addr: u64, val: T) -> Result<(), Self::Error> {
        self.check_write()?;
        let ptr = self.ptr_for_addr(addr, size_of::<T>()).cast::<T>();
        unsafe { ptr::write_unaligned(ptr, val) };
        Ok(())
    }

    fn load_acquire(&self, addr: u64) -> Result<u16, Self::Error> {
        let ptr = self.ptr_for_addr(addr, 2).cast::<AtomicU16>();
        Ok(u16::from_le(unsafe { (*ptr).load(Ordering::Acquire) }))
    }

    fn store_release(&self, addr: u64, val: u16) -> Result<(), Self::Error> {
        let ptr = self.ptr_for_addr(addr, 2).cast::<AtomicU16>();
        unsafe { (*ptr).store(val.to_le(), Ordering::Release) };
        Ok(())
    }
}

/// Records every doorbell write.
#[derive(Clone, Default)]
pub struct TestDoorbell(Rc<RefCell<Vec<u16>>>);

impl TestDoorbell {
    pub fn count(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn last(&self) -> Option<u16> {
        self.0.borrow().last().copied()
    }
}

impl Doorbell for TestDoorbell {
    fn ring(&self, head: u16) {
        self.0.borrow_mut().push(head);
    }
}

/// Manually advanced clock.
#[derive(Clone, Default)]
pub struct TestClock(Rc<Cell<Duration>>);

impl TestClock {
    pub fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Duration {
        self.0.get()
    }
}

fn align_up(val: u64, align: u64) -> u64 {
    (val + align - 1) & !(align - 1)
}

const POOL_REGION: usize = 2 * 1024 * 1024;

/// One queue's worth of device memory plus a region to carve pools from.
///
/// Also plays the device: completions are written in ring order with the
/// device's own color, flipping on every wrap.
pub struct Harness {
    pub mem: Rc<TestMem>,
    pub layout: Layout,
    pub doorbell: TestDoorbell,
    pub clock: TestClock,
    next_pool: Cell<u64>,
    pool_end: u64,
    dev_head: Cell<u16>,
    dev_color: Cell<bool>,
}

impl Harness {
    pub fn new(num_descs: u16, num_segs: u16) -> Self {
        let ring_bytes = Layout::query_size(num_descs as usize, num_segs as usize);
        let mem = Rc::new(TestMem::new(ring_bytes + POOL_REGION + 128));

        let base = align_up(mem.base_addr(), 64);
        let layout = unsafe { Layout::from_base(base, num_descs, num_segs).unwrap() };
        let pool_start = align_up(base + ring_bytes as u64, 64);
        let pool_end = mem.base_addr() + (ring_bytes + POOL_REGION + 128) as u64;

        Self {
            mem,
            layout,
            doorbell: TestDoorbell::default(),
            clock: TestClock::default(),
            next_pool: Cell::new(pool_start),
            pool_end,
            dev_head: Cell::new(0),
            dev_color: Cell::new(true),
        }
    }

    /// Reserve `len` bytes of the pool region.
    pub fn carve(&self, len: usize) -> u64 {
        let base = self.next_pool.get();
        assert!(base + len as u64 <= self.pool_end, "test pool region exhausted");
        self.next_pool.set(align_up(base + len as u64, 64));
        base
    }

    /// Carve a pool of `count` buffers of `buf_size` bytes out of the region.
    pub fn pool(&self, buf_size: usize, count: usize) -> Pool {
        let len = buf_size * count;
        Pool::new(SlabPool::new(self.carve(len), len, buf_size).unwrap())
    }

    /// Color the device will stamp on its next completion.
    pub fn color(&self) -> bool {
        self.dev_color.get()
    }

    fn next_comp_addr(&self) -> u64 {
        let idx = self.dev_head.get();
        let next = (idx + 1) & (self.layout.num_descs - 1);
        self.dev_head.set(next);
        let addr = self.layout.comp_addr(idx);
        if next == 0 {
            self.dev_color.set(!self.dev_color.get());
        }
        addr
    }

    fn publish<T: Pod>(&self, entry: T) {
        let addr = self.next_comp_addr();
        let bytes = bytemuck::bytes_of(&entry);
        self.mem.write(addr, &bytes[..COLOR_WORD_OFFSET]).unwrap();
        let word = u16::from_le_bytes([bytes[COLOR_WORD_OFFSET], bytes[COLOR_WORD_OFFSET + 1]]);
        self.mem
            .store_release(addr + COLOR_WORD_OFFSET as u64, word)
            .unwrap();
    }

    /// Report transmit descriptors up to (not including) `comp_index` done.
    pub fn push_tx_comp(&self, comp_index: u16) {
        self.publish(TxComp::new(0, comp_index, self.color()));
    }

    /// Successful receive completion for `comp_index`. Adjust with the
    /// `RxComp` builders and hand it to [`Harness::push_rx_comp`].
    pub fn rx_comp(&self, comp_index: u16, len: u16) -> RxComp {
        RxComp::new(comp_index, len, self.color())
    }

    pub fn push_rx_comp(&self, comp: RxComp) {
        self.publish(comp.with_color(self.color()));
    }

    pub fn tx_desc(&self, idx: u16) -> TxDesc {
        self.mem.read_val(self.layout.desc_addr(idx)).unwrap()
    }

    pub fn rx_desc(&self, idx: u16) -> RxDesc {
        self.mem.read_val(self.layout.desc_addr(idx)).unwrap()
    }

    pub fn sg_elem(&self, idx: u16, elem: u16) -> SgElem {
        self.mem.read_val(self.layout.sg_addr(idx, elem)).unwrap()
    }

    pub fn write_bytes(&self, addr: u64, bytes: &[u8]) {
        self.mem.write(addr, bytes).unwrap();
    }
}
