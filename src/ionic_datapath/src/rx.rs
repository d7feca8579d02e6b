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

//! Receive engine.
//!
//! Every posted slot carries a header buffer and, when the queue uses
//! scatter-gather, `num_segs - 1` segment buffers. The ring is kept full
//! minus one slot: each serviced slot is refilled before the burst returns.
//! A rejected completion leaves its buffers attached to the slot, and they
//! are posted again on the next fill.

use alloc::vec::Vec;
use core::cmp::min;
use core::sync::atomic::{Ordering, fence};

use log::{debug, error, trace, warn};
use smallvec::SmallVec;
#[cfg(feature = "tracing")]
use tracing::{Span, instrument};

use crate::access::MemOps;
use crate::config::{QueueConfig, QueueFlags};
use crate::cq::{Completion, CompletionQueue};
use crate::desc::{RxComp, RxCsumFlags, RxDesc, RxOpcode, SgElem};
use crate::device::{Clock, Doorbell};
use crate::error::{CompletionFault, DatapathError};
use crate::layout::Layout;
use crate::packet::{
    ETHER_TYPE_OFFSET, L2Type, Packet, PacketType, RxOffload, csum_offload, ptype_from_ether_type,
    ptype_from_hw,
};
use crate::pool::{Buffer, Pool};
use crate::ring::DescRing;
use crate::stats::RxStats;
use crate::watchdog::{Backoff, Watchdog};

/// Buffers requested from a pool per refill of the local caches.
pub const RX_BULK_ALLOC: usize = 64;

type BufCache = SmallVec<[Buffer; RX_BULK_ALLOC]>;

/// Pop a buffer from `cache`, refilling it from `pool` when empty.
///
/// A full batch is tried first; if the pool cannot supply one, a single
/// buffer is taken instead.
fn take_cached(cache: &mut BufCache, pool: &Pool) -> Result<Buffer, DatapathError> {
    if let Some(buf) = cache.pop() {
        return Ok(buf);
    }
    match pool.get_bulk(cache) {
        Ok(()) => cache.pop().ok_or(DatapathError::ResourceExhausted),
        Err(DatapathError::ResourceExhausted) => pool.get(),
        Err(e) => Err(e),
    }
}

pub struct RxQueue<M, D, C> {
    index: u16,
    mem: M,
    doorbell: D,
    clock: C,
    layout: Layout,
    ring: DescRing,
    cq: CompletionQueue<RxComp>,
    flags: QueueFlags,
    frame_size: u32,
    headroom: u16,
    /// Bytes of packet data a header buffer holds.
    hdr_seg_size: u16,
    /// Bytes of packet data a segment buffer holds.
    seg_size: u16,
    hdr_pool: Pool,
    seg_pool: Pool,
    hdr_cache: BufCache,
    seg_cache: BufCache,
    /// Head slot whose last fill ran out of buffers.
    short_slot: Option<u16>,
    watchdog: Watchdog,
    stats: RxStats,
}

impl<M: MemOps, D: Doorbell, C: Clock> RxQueue<M, D, C> {
    /// Create a stopped receive queue drawing header buffers from `hdr_pool`
    /// and scatter-gather segments from `seg_pool`.
    pub fn new(
        config: &QueueConfig,
        layout: Layout,
        mem: M,
        doorbell: D,
        clock: C,
        hdr_pool: Pool,
        seg_pool: Pool,
    ) -> Result<Self, DatapathError> {
        if layout.num_descs != config.num_descs() || layout.num_segs != config.num_segs() {
            return Err(DatapathError::InvalidLayout);
        }

        let headroom = config.rx_headroom();
        let hdr_seg_size = hdr_pool
            .buf_size()
            .checked_sub(headroom as usize)
            .filter(|&n| n > 0)
            .ok_or(DatapathError::InvalidConfig("header buffers smaller than headroom"))?;
        let hdr_seg_size = min(hdr_seg_size, u16::MAX as usize);
        let seg_size = min(seg_pool.buf_size(), u16::MAX as usize);
        config.validate(Some((hdr_seg_size, seg_size)))?;

        Ok(Self {
            index: config.index(),
            mem,
            doorbell,
            clock,
            layout,
            ring: DescRing::new(layout.num_descs, layout.num_segs)?,
            cq: CompletionQueue::new(layout.cq_table_addr, layout.num_descs)?,
            flags: config.flags(),
            frame_size: config.frame_size(),
            headroom,
            hdr_seg_size: hdr_seg_size as u16,
            seg_size: seg_size as u16,
            hdr_pool,
            seg_pool,
            hdr_cache: SmallVec::new(),
            seg_cache: SmallVec::new(),
            short_slot: None,
            watchdog: Watchdog::new(
                config.watchdog(),
                Backoff::Exponential {
                    max: config.watchdog_max(),
                },
            ),
            stats: RxStats::default(),
        })
    }

    #[inline]
    pub fn index(&self) -> u16 {
        self.index
    }

    #[inline]
    pub fn ring(&self) -> &DescRing {
        &self.ring
    }

    #[inline]
    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = RxStats::default();
    }

    #[inline]
    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Post buffers to every slot and ring the doorbell.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn start(&mut self) -> Result<(), DatapathError> {
        self.ring.reset();
        self.cq.reset();
        self.short_slot = None;
        self.watchdog.reset(self.clock.now());
        self.fill_all()?;
        debug!(
            "rxq {}: started, {} descriptors x {} segments, flags {:?}",
            self.index,
            self.ring.num_descs(),
            self.ring.num_segs(),
            self.flags
        );
        Ok(())
    }

    /// Return every posted and cached buffer to its pool and rewind the queue.
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level= "Trace"))]
    pub fn stop(&mut self) {
        let posted = self.ring.attached();
        let cached = self.hdr_cache.len() + self.seg_cache.len();
        self.ring.reset();
        self.hdr_cache.clear();
        self.seg_cache.clear();
        self.short_slot = None;
        self.cq.reset();
        self.watchdog.reset(self.clock.now());
        debug!(
            "rxq {}: stopped, released {} posted and {} cached buffers",
            self.index, posted, cached
        );
    }

    fn write_desc(&self, slot: u16, buf: &Buffer) -> Result<(), DatapathError> {
        let opcode = if self.ring.num_segs() > 1 {
            RxOpcode::Sg
        } else {
            RxOpcode::Simple
        };
        self.mem
            .write_val(
                self.layout.desc_addr(slot),
                RxDesc::new(opcode, buf.data_addr(), self.hdr_seg_size),
            )
            .map_err(|_| DatapathError::MemError)
    }

    /// Attach buffers to every empty segment of the slot at the ring head.
    ///
    /// Does not advance the head. A slot that is already complete is left
    /// alone. If a pool runs dry the slot keeps whatever was attached and a
    /// later call finishes it.
    pub fn fill_one(&mut self) -> Result<(), DatapathError> {
        let slot = self.ring.head();

        if !self.ring.is_attached(slot, 0) {
            let mut buf = take_cached(&mut self.hdr_cache, &self.hdr_pool)?;
            buf.set_data_off(self.headroom)?;
            self.write_desc(slot, &buf)?;
            self.ring.attach(slot, 0, buf)?;
        }

        for seg in 1..self.ring.num_segs() {
            if self.ring.is_attached(slot, seg) {
                continue;
            }
            let buf = take_cached(&mut self.seg_cache, &self.seg_pool)?;
            self.mem
                .write_val(
                    self.layout.sg_addr(slot, seg - 1),
                    SgElem::new(buf.data_addr(), self.seg_size),
                )
                .map_err(|_| DatapathError::MemError)?;
            self.ring.attach(slot, seg, buf)?;
        }
        Ok(())
    }

    /// Fill slots until the ring is full minus the reserved slot.
    ///
    /// Returns the number of slots made available to the device. A slot
    /// left short counts once in `alloc_failed`, however often it is retried.
    fn refill(&mut self) -> Result<u16, DatapathError> {
        let mut filled = 0;
        while self.ring.space_available() > 0 {
            let slot = self.ring.head();
            if let Err(e) = self.fill_one() {
                if e == DatapathError::ResourceExhausted && self.short_slot != Some(slot) {
                    self.short_slot = Some(slot);
                    self.stats.alloc_failed += 1;
                }
                return Err(e);
            }
            self.short_slot = None;
            self.ring.advance_head(1);
            filled += 1;
        }
        Ok(filled)
    }

    /// Fill every slot except the reserved one, then ring the doorbell.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn fill_all(&mut self) -> Result<(), DatapathError> {
        self.refill()?;
        self.ring_doorbell();
        Ok(())
    }

    fn ring_doorbell(&mut self) {
        fence(Ordering::Release);
        self.doorbell.ring(self.ring.head());
        self.stats.doorbells += 1;
    }

    fn reject(&mut self, idx: u16, fault: CompletionFault) -> DatapathError {
        match fault {
            CompletionFault::Status(_) => self.stats.bad_cq_status += 1,
            _ => self.stats.bad_len += 1,
        }
        warn!("rxq {}: dropping completion {}: {}", self.index, idx, fault);
        DatapathError::MalformedCompletion(fault)
    }

    fn inconsistent(&self, found: u16) -> DatapathError {
        let expected = self.ring.tail();
        error!(
            "rxq {}: completion index {} does not match ring tail {} (head {})",
            self.index,
            found,
            expected,
            self.ring.head()
        );
        DatapathError::ProtocolInconsistency { expected, found }
    }

    fn classify(&self, comp: &RxComp, head: &Buffer, vlan: bool) -> (PacketType, bool) {
        let ptype = ptype_from_hw(comp.pkt_type());
        if !ptype.is_unknown() {
            let l2 = if vlan { L2Type::EtherVlan } else { L2Type::Ether };
            return (PacketType { l2, ..ptype }, false);
        }

        if (head.data_len() as u64) < ETHER_TYPE_OFFSET + 2 {
            return (PacketType::UNKNOWN, false);
        }
        let mut ether_type = [0u8; 2];
        match self
            .mem
            .read(head.data_addr() + ETHER_TYPE_OFFSET, &mut ether_type)
        {
            Ok(_) => (ptype_from_ether_type(u16::from_be_bytes(ether_type)), true),
            Err(_) => (PacketType::UNKNOWN, false),
        }
    }

    /// Turn the completion for the slot at the ring tail into a packet
    /// appended to `out`.
    ///
    /// Does not move the ring or completion queue. On a malformed
    /// completion the slot's buffers stay attached for reuse.
    pub fn service_one(&mut self, comp: &RxComp, out: &mut Vec<Packet>) -> Result<(), DatapathError> {
        let slot = self.ring.tail();
        let idx = comp.comp_index();
        if idx != slot || self.ring.is_empty() {
            return Err(self.inconsistent(idx));
        }

        if comp.status() != 0 {
            return Err(self.reject(idx, CompletionFault::Status(comp.status())));
        }

        let len = comp.len();
        if len == 0 {
            return Err(self.reject(idx, CompletionFault::ZeroLength));
        }
        if len as u32 > self.frame_size {
            return Err(self.reject(
                idx,
                CompletionFault::Oversize {
                    len,
                    max: self.frame_size,
                },
            ));
        }

        let nsge = comp.num_sg_elems();
        let max_sge = self.ring.num_segs() - 1;
        if nsge as u16 > max_sge {
            return Err(self.reject(
                idx,
                CompletionFault::SegmentCount {
                    reported: nsge,
                    max: max_sge,
                },
            ));
        }
        let capacity = self.hdr_seg_size as u32 + nsge as u32 * self.seg_size as u32;
        if len as u32 > capacity {
            return Err(self.reject(idx, CompletionFault::Truncated { len, capacity }));
        }

        let hdr_len = min(self.hdr_seg_size, len);
        let extra = (len - hdr_len).div_ceil(self.seg_size);
        if (0..=extra).any(|seg| !self.ring.is_attached(slot, seg)) {
            return Err(self.inconsistent(idx));
        }

        let Some(mut head) = self.ring.detach(slot, 0) else {
            return Err(self.inconsistent(idx));
        };
        head.set_data_len(hdr_len)?;
        let mut pkt = Packet::new(head);

        let mut left = len - hdr_len;
        for seg in 1..=extra {
            let Some(mut buf) = self.ring.detach(slot, seg) else {
                return Err(self.inconsistent(idx));
            };
            let n = min(self.seg_size, left);
            buf.set_data_len(n)?;
            left -= n;
            pkt.push(buf);
        }

        let csum_flags = comp.csum_flags();
        let mut ol = RxOffload::RSS_HASH;
        pkt.rss_hash = comp.rss_hash();

        let vlan = csum_flags.contains(RxCsumFlags::VLAN);
        if vlan {
            ol |= RxOffload::VLAN | RxOffload::VLAN_STRIPPED;
            pkt.vlan_tci = comp.vlan_tci();
        }
        if csum_flags.contains(RxCsumFlags::CALC) {
            ol |= csum_offload(csum_flags);
        }
        pkt.rx_offload = ol;

        if let Some(head) = pkt.head() {
            let (ptype, parsed) = self.classify(comp, head, vlan);
            pkt.packet_type = ptype;
            if parsed {
                self.stats.header_parses += 1;
            }
        }

        self.stats.packets += 1;
        self.stats.bytes += len as u64;
        out.push(pkt);
        Ok(())
    }

    /// Receive up to `max` packets into `out`.
    ///
    /// Returns the number appended. A [`DatapathError::ProtocolInconsistency`]
    /// stops the burst without consuming the offending completion; packets
    /// received before it are kept in `out`. Running out of buffers while
    /// refilling is not an error, but any other refill failure is.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn receive_burst(&mut self, out: &mut Vec<Packet>, max: usize) -> Result<usize, DatapathError> {
        let start = out.len();
        let head_before = self.ring.head();
        let mut work = 0;
        let mut fatal = None;

        while work < max {
            let comp = match self.cq.peek(&self.mem) {
                Ok(Some(comp)) => comp,
                Ok(None) => break,
                Err(e) => {
                    fatal = Some(e);
                    break;
                }
            };

            match self.service_one(&comp, out) {
                Ok(()) | Err(DatapathError::MalformedCompletion(_)) => {}
                Err(e) => {
                    fatal = Some(e);
                    break;
                }
            }

            self.cq.consume();
            self.ring.advance_tail(1);
            work += 1;
            match self.refill() {
                Ok(_) => {}
                Err(DatapathError::ResourceExhausted) => {
                    debug!(
                        "rxq {}: refill incomplete at slot {}",
                        self.index,
                        self.ring.head()
                    );
                }
                Err(e) => {
                    error!("rxq {}: refill failed: {}", self.index, e);
                    fatal = Some(e);
                    break;
                }
            }
        }

        // retry a slot a previous refill left short
        if work == 0 && fatal.is_none() && self.ring.space_available() > 0 {
            match self.refill() {
                Ok(_) => {}
                Err(DatapathError::ResourceExhausted) => {
                    trace!(
                        "rxq {}: refill still short at slot {}",
                        self.index,
                        self.ring.head()
                    );
                }
                Err(e) => {
                    error!("rxq {}: refill failed: {}", self.index, e);
                    fatal = Some(e);
                }
            }
        }

        let now = self.clock.now();
        if work > 0 || self.ring.head() != head_before {
            self.ring_doorbell();
            self.watchdog.progress(now);
        } else if fatal.is_none() && self.watchdog.poll(now, !self.ring.is_empty()) {
            trace!(
                "rxq {}: watchdog doorbell, next in {:?}",
                self.index,
                self.watchdog.interval()
            );
            self.ring_doorbell();
            self.stats.stalls += 1;
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(out.len() - start),
        }
    }
}
