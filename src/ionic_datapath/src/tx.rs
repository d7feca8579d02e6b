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

//! Transmit engine.
//!
//! Packets are posted one descriptor each: the head buffer goes in the
//! descriptor, further buffers in its scatter-gather elements. The ring keeps
//! every posted buffer until a completion reports the descriptor done.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{Ordering, fence};

use log::{debug, error, trace};
#[cfg(feature = "tracing")]
use tracing::{Span, instrument};

use crate::access::MemOps;
use crate::config::{QueueConfig, QueueFlags};
use crate::cq::{Completion, CompletionQueue};
use crate::desc::{SgElem, TxCmd, TxComp, TxDesc, TxDescFlags, TxOpcode};
use crate::device::{Clock, Doorbell};
use crate::error::DatapathError;
use crate::layout::Layout;
use crate::packet::{Packet, TxOffload};
use crate::pool::{Buffer, Pool};
use crate::ring::DescRing;
use crate::stats::TxStats;
use crate::watchdog::{Backoff, Watchdog};

/// Encoder for packets requesting TCP segmentation offload.
///
/// The encoder owns the descriptor format for such packets; it must attach
/// every buffer it takes from `pkt` to the slots it fills and advance the
/// ring head past them.
pub trait TsoEncoder<M: MemOps> {
    fn post(&mut self, ring: TxRing<'_, M>, pkt: &mut Packet) -> Result<(), DatapathError>;
}

/// Producer-side view of a transmit ring handed to a [`TsoEncoder`].
pub struct TxRing<'a, M> {
    mem: &'a M,
    layout: &'a Layout,
    ring: &'a mut DescRing,
}

impl<M: MemOps> TxRing<'_, M> {
    #[inline]
    pub fn head(&self) -> u16 {
        self.ring.head()
    }

    #[inline]
    pub fn space_available(&self) -> u16 {
        self.ring.space_available()
    }

    #[inline]
    pub fn num_segs(&self) -> u16 {
        self.ring.num_segs()
    }

    pub fn write_desc(&self, idx: u16, desc: TxDesc) -> Result<(), DatapathError> {
        self.mem
            .write_val(self.layout.desc_addr(idx), desc)
            .map_err(|_| DatapathError::MemError)
    }

    pub fn write_sg(&self, idx: u16, elem: u16, sg: SgElem) -> Result<(), DatapathError> {
        self.mem
            .write_val(self.layout.sg_addr(idx, elem), sg)
            .map_err(|_| DatapathError::MemError)
    }

    pub fn attach(&mut self, slot: u16, seg: u16, buf: Buffer) -> Result<(), DatapathError> {
        self.ring.attach(slot, seg, buf)
    }

    /// Hand `n` slots to the device. Fails without moving the head if that
    /// would use the reserved slot.
    pub fn advance_head(&mut self, n: u16) -> Result<(), DatapathError> {
        if n > self.ring.space_available() {
            return Err(DatapathError::ResourceExhausted);
        }
        self.ring.advance_head(n);
        Ok(())
    }
}

pub struct TxQueue<M: MemOps, D, C> {
    index: u16,
    mem: M,
    doorbell: D,
    clock: C,
    layout: Layout,
    ring: DescRing,
    cq: CompletionQueue<TxComp>,
    flags: QueueFlags,
    flush_threshold: u16,
    fast_free: Option<Pool>,
    tso: Option<Box<dyn TsoEncoder<M> + Send>>,
    watchdog: Watchdog,
    stats: TxStats,
}

impl<M: MemOps, D: Doorbell, C: Clock> TxQueue<M, D, C> {
    /// Create a stopped transmit queue over `layout`.
    pub fn new(
        config: &QueueConfig,
        layout: Layout,
        mem: M,
        doorbell: D,
        clock: C,
    ) -> Result<Self, DatapathError> {
        config.validate(None)?;
        if layout.num_descs != config.num_descs() || layout.num_segs != config.num_segs() {
            return Err(DatapathError::InvalidLayout);
        }

        Ok(Self {
            index: config.index(),
            mem,
            doorbell,
            clock,
            layout,
            ring: DescRing::new(layout.num_descs, layout.num_segs)?,
            cq: CompletionQueue::new(layout.cq_table_addr, layout.num_descs)?,
            flags: config.flags(),
            flush_threshold: config.flush_threshold(),
            fast_free: None,
            tso: None,
            watchdog: Watchdog::new(config.watchdog(), Backoff::Fixed),
            stats: TxStats::default(),
        })
    }

    /// Pool that reclaimed buffers go back to when [`QueueFlags::FAST_FREE`] is set.
    pub fn with_fast_free_pool(mut self, pool: Pool) -> Self {
        self.fast_free = Some(pool);
        self
    }

    pub fn with_tso_encoder(mut self, encoder: Box<dyn TsoEncoder<M> + Send>) -> Self {
        self.tso = Some(encoder);
        self
    }

    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn start(&mut self) -> Result<(), DatapathError> {
        if self.flags.contains(QueueFlags::FAST_FREE) && self.fast_free.is_none() {
            return Err(DatapathError::InvalidConfig("fast free without a pool"));
        }

        self.ring.reset();
        self.cq.reset();
        self.watchdog.reset(self.clock.now());
        debug!(
            "txq {}: started, {} descriptors x {} segments, flags {:?}",
            self.index,
            self.ring.num_descs(),
            self.ring.num_segs(),
            self.flags
        );
        Ok(())
    }

    /// Release every buffer still owned by the ring and rewind the queue.
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level= "Trace"))]
    pub fn stop(&mut self) {
        let outstanding = self.ring.attached();
        self.ring.reset();
        self.cq.reset();
        self.watchdog.reset(self.clock.now());
        debug!("txq {}: stopped, released {} buffers", self.index, outstanding);
    }

    #[inline]
    pub fn index(&self) -> u16 {
        self.index
    }

    #[inline]
    pub fn space_available(&self) -> u16 {
        self.ring.space_available()
    }

    #[inline]
    pub fn ring(&self) -> &DescRing {
        &self.ring
    }

    #[inline]
    pub fn stats(&self) -> &TxStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = TxStats::default();
    }

    fn offload_bits(&self, ol: TxOffload) -> (TxOpcode, TxDescFlags) {
        let mut opcode = TxOpcode::CsumNone;
        let mut flags = TxDescFlags::empty();

        if ol.contains(TxOffload::IP_CKSUM) && self.flags.contains(QueueFlags::CSUM_L3) {
            opcode = TxOpcode::CsumHw;
            flags |= TxDescFlags::CSUM_L3;
        }

        let tcp = ol.contains(TxOffload::TCP_CKSUM) && self.flags.contains(QueueFlags::CSUM_TCP);
        let udp = ol.contains(TxOffload::UDP_CKSUM) && self.flags.contains(QueueFlags::CSUM_UDP);
        if tcp || udp {
            opcode = TxOpcode::CsumHw;
            flags |= TxDescFlags::CSUM_L4;
        }

        if ol.contains(TxOffload::VLAN) {
            flags |= TxDescFlags::VLAN;
        }

        let outer_csum = ol.intersects(TxOffload::OUTER_IP_CKSUM | TxOffload::OUTER_UDP_CKSUM);
        let outer_ip = ol.intersects(TxOffload::OUTER_IPV4 | TxOffload::OUTER_IPV6);
        if outer_csum && outer_ip {
            flags |= TxDescFlags::ENCAP;
        }

        (opcode, flags)
    }

    /// Encode `pkt` into the descriptor at the ring head and take ownership of
    /// its buffers.
    ///
    /// On error the head does not move and `pkt` keeps its buffers, though
    /// the descriptor memory at the head may have been partly written.
    pub fn post(&mut self, pkt: &mut Packet) -> Result<(), DatapathError> {
        let nsegs = pkt.num_segs();
        let max = self.ring.num_segs() as usize;
        let Some(first) = pkt.head() else {
            return Err(DatapathError::EmptyPacket);
        };
        if nsegs > max {
            return Err(DatapathError::TooManySegments { segs: nsegs, max });
        }
        if self.ring.space_available() == 0 {
            return Err(DatapathError::ResourceExhausted);
        }

        let head = self.ring.head();
        if let Some(seg) = (0..nsegs as u16).find(|&seg| self.ring.is_attached(head, seg)) {
            return Err(DatapathError::SlotOccupied { slot: head, seg });
        }
        let (opcode, flags) = self.offload_bits(pkt.tx_offload);
        let vlan_tci = if flags.contains(TxDescFlags::VLAN) {
            pkt.vlan_tci
        } else {
            0
        };

        let cmd = TxCmd {
            opcode,
            flags,
            nsge: (nsegs - 1) as u8,
            addr: first.data_addr(),
        };
        self.mem
            .write_val(self.layout.desc_addr(head), TxDesc::new(cmd, first.data_len(), vlan_tci))
            .map_err(|_| DatapathError::MemError)?;

        for (elem, seg) in pkt.segments().iter().skip(1).enumerate() {
            self.mem
                .write_val(
                    self.layout.sg_addr(head, elem as u16),
                    SgElem::new(seg.data_addr(), seg.data_len()),
                )
                .map_err(|_| DatapathError::MemError)?;
        }

        for (seg, buf) in pkt.take_segments().into_iter().enumerate() {
            self.ring.attach(head, seg as u16, buf)?;
        }
        self.ring.advance_head(1);

        if opcode == TxOpcode::CsumNone {
            self.stats.no_csum += 1;
        }
        Ok(())
    }

    fn post_tso(&mut self, pkt: &mut Packet) -> Result<(), DatapathError> {
        let Some(encoder) = self.tso.as_mut() else {
            return Err(DatapathError::TsoUnavailable);
        };
        let ring = TxRing {
            mem: &self.mem,
            layout: &self.layout,
            ring: &mut self.ring,
        };
        encoder.post(ring, pkt)
    }

    /// Reclaim every descriptor the device has reported complete.
    ///
    /// Returns the number of descriptors reclaimed. Calling it again without
    /// new completions changes nothing.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn flush_completions(&mut self) -> Result<usize, DatapathError> {
        let fast_free = match &self.fast_free {
            Some(pool) if self.flags.contains(QueueFlags::FAST_FREE) => Some(pool),
            _ => None,
        };

        let mut reclaimed = 0;
        while let Some(comp) = self.cq.peek(&self.mem)? {
            let comp_index = comp.comp_index();
            if comp_index >= self.ring.num_descs()
                || self.ring.distance_from_tail(comp_index) > self.ring.in_flight()
            {
                error!(
                    "txq {}: completion index {} outside in-flight window {}..{}",
                    self.index,
                    comp_index,
                    self.ring.tail(),
                    self.ring.head()
                );
                return Err(DatapathError::ProtocolInconsistency {
                    expected: self.ring.head(),
                    found: comp_index,
                });
            }

            self.cq.consume();
            self.stats.comps += 1;

            while self.ring.tail() != comp_index {
                let tail = self.ring.tail();
                match fast_free {
                    Some(pool) => self.ring.drain_slot(tail, |buf| pool.put(buf)),
                    None => self.ring.drain_slot(tail, drop),
                };
                self.ring.advance_tail(1);
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    fn ring_doorbell(&mut self) {
        fence(Ordering::Release);
        self.doorbell.ring(self.ring.head());
        self.stats.doorbells += 1;
    }

    /// Post as many of `pkts` as the ring accepts.
    ///
    /// Sent packets are removed from the front of `pkts`; packets that were
    /// refused stay there for the caller. Returns the number sent.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn transmit_burst(&mut self, pkts: &mut Vec<Packet>) -> Result<usize, DatapathError> {
        if self.ring.space_available() < self.flush_threshold {
            self.flush_completions()?;
        }

        let space = self.ring.space_available() as usize;
        let mut nb = pkts.len();
        if nb > space {
            self.stats.stop += (nb - space) as u64;
            nb = space;
        }

        let mut sent = 0;
        let mut bytes = 0u64;
        for pkt in pkts[..nb].iter_mut() {
            let len = pkt.pkt_len() as u64;
            let res = if pkt.tx_offload.contains(TxOffload::TCP_SEG) {
                self.post_tso(pkt)
            } else {
                self.post(pkt)
            };

            if let Err(e) = res {
                debug!("txq {}: dropping {} packets: {}", self.index, nb - sent, e);
                self.stats.drop += (nb - sent) as u64;
                break;
            }
            sent += 1;
            bytes += len;
        }

        let now = self.clock.now();
        if sent > 0 {
            self.ring_doorbell();
            self.watchdog.progress(now);
            self.stats.packets += sent as u64;
            self.stats.bytes += bytes;
        } else if self.watchdog.poll(now, !self.ring.is_empty()) {
            trace!(
                "txq {}: watchdog doorbell, {} descriptors outstanding",
                self.index,
                self.ring.in_flight()
            );
            self.ring_doorbell();
            self.stats.stalls += 1;
        }

        pkts.drain(..sent);
        Ok(sent)
    }
}
