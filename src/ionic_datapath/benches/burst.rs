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

use std::cell::{Cell, RefCell};
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ionic_datapath::desc::{RxComp, TxComp};
use ionic_datapath::{
    Clock, Doorbell, Layout, MemOps, Packet, Pool, QueueConfig, RxQueue, SlabPool, TxQueue,
};

/// IO virtual address the bench region is mapped at.
const IOVA_BASE: u64 = 0x4000_0000;
const NUM_DESCS: u16 = 256;
const BUF_SIZE: usize = 2048;
const POOL_BUFS: usize = 1024;

/// Plain memory standing in for a DMA region.
struct BenchMem(RefCell<Vec<u8>>);

impl BenchMem {
    fn new(len: usize) -> Self {
        Self(RefCell::new(vec![0; len]))
    }

    fn offset(addr: u64) -> usize {
        (addr - IOVA_BASE) as usize
    }
}

impl MemOps for &BenchMem {
    type Error = ();

    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, ()> {
        let off = BenchMem::offset(addr);
        let mem = self.0.borrow();
        dst.copy_from_slice(mem.get(off..off + dst.len()).ok_or(())?);
        Ok(dst.len())
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, ()> {
        let off = BenchMem::offset(addr);
        let mut mem = self.0.borrow_mut();
        mem.get_mut(off..off + src.len())
            .ok_or(())?
            .copy_from_slice(src);
        Ok(src.len())
    }

    fn load_acquire(&self, addr: u64) -> Result<u16, ()> {
        let mut word = [0u8; 2];
        self.read(addr, &mut word)?;
        Ok(u16::from_le_bytes(word))
    }

    fn store_release(&self, addr: u64, val: u16) -> Result<(), ()> {
        self.write(addr, &val.to_le_bytes()).map(|_| ())
    }
}

struct NullDoorbell;

impl Doorbell for NullDoorbell {
    fn ring(&self, _head: u16) {}
}

struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> Duration {
        Duration::ZERO
    }
}

/// Completion writer playing the device.
struct Device {
    layout: Layout,
    next: Cell<u16>,
    color: Cell<bool>,
}

impl Device {
    fn new(layout: Layout) -> Self {
        Self {
            layout,
            next: Cell::new(0),
            color: Cell::new(true),
        }
    }

    /// Address of the next completion entry and the color to stamp on it.
    fn slot(&self) -> (u64, bool) {
        let idx = self.next.get();
        let color = self.color.get();
        let next = (idx + 1) & (self.layout.num_descs - 1);
        if next == 0 {
            self.color.set(!color);
        }
        self.next.set(next);
        (self.layout.comp_addr(idx), color)
    }

    fn complete_tx(&self, mem: &BenchMem, comp_index: u16) {
        let (addr, color) = self.slot();
        mem.write_val(addr, TxComp::new(0, comp_index, color))
            .unwrap();
    }

    fn complete_rx(&self, mem: &BenchMem, comp_index: u16, len: u16) {
        let (addr, color) = self.slot();
        mem.write_val(addr, RxComp::new(comp_index, len, color))
            .unwrap();
    }
}

/// Lay out one queue and a buffer pool in a fresh region.
fn region(num_segs: u16) -> (BenchMem, Layout, Pool, Pool) {
    let ring_bytes = Layout::query_size(NUM_DESCS as usize, num_segs as usize);
    let ring_bytes = ring_bytes.next_multiple_of(64);
    let pool_bytes = POOL_BUFS * BUF_SIZE;
    let mem = BenchMem::new(ring_bytes + 2 * pool_bytes);

    // SAFETY: the whole range is backed by `mem`
    let layout = unsafe { Layout::from_base(IOVA_BASE, NUM_DESCS, num_segs).unwrap() };
    let first = IOVA_BASE + ring_bytes as u64;
    let second = first + pool_bytes as u64;
    let a = Pool::new(SlabPool::new(first, pool_bytes, BUF_SIZE).unwrap());
    let b = Pool::new(SlabPool::new(second, pool_bytes, BUF_SIZE).unwrap());
    (mem, layout, a, b)
}

fn queue_config() -> QueueConfig {
    let mut cfg = QueueConfig::default();
    cfg.set_num_descs(NUM_DESCS);
    cfg
}

fn tx_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("tx");

    for burst in [1usize, 8, 32] {
        let (mem, layout, pool, _) = region(1);
        let device = Device::new(layout);
        let mut txq = TxQueue::new(&queue_config(), layout, &mem, NullDoorbell, FixedClock).unwrap();
        txq.start().unwrap();
        let mut pkts = Vec::with_capacity(burst);

        group.throughput(Throughput::Elements(burst as u64));
        group.bench_with_input(BenchmarkId::new("post_reclaim", burst), &burst, |b, &burst| {
            b.iter(|| {
                for _ in 0..burst {
                    let mut buf = pool.get().unwrap();
                    buf.set_data_len(64).unwrap();
                    pkts.push(Packet::new(buf));
                }
                txq.transmit_burst(&mut pkts).unwrap();
                device.complete_tx(&mem, txq.ring().head());
                txq.flush_completions().unwrap()
            });
        });
    }

    group.finish();
}

fn rx_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("rx");

    for burst in [1u16, 8, 32] {
        let mut cfg = queue_config();
        cfg.set_frame_size(BUF_SIZE as u32 - cfg.rx_headroom() as u32);
        let (mem, layout, hdr, seg) = region(1);
        let device = Device::new(layout);
        let mut rxq = RxQueue::new(&cfg, layout, &mem, NullDoorbell, FixedClock, hdr, seg).unwrap();
        rxq.start().unwrap();
        let mut out = Vec::with_capacity(burst as usize);

        group.throughput(Throughput::Elements(burst as u64));
        group.bench_with_input(BenchmarkId::new("service_refill", burst), &burst, |b, &burst| {
            b.iter(|| {
                let tail = rxq.ring().tail();
                for i in 0..burst {
                    device.complete_rx(&mem, (tail + i) & (NUM_DESCS - 1), 64);
                }
                let n = rxq.receive_burst(&mut out, burst as usize).unwrap();
                out.clear();
                n
            });
        });
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default();
    targets =
        tx_benchmark,
        rx_benchmark
}
criterion_main!(benches);
