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

//! Packets as seen by the burst API.
//!
//! A [`Packet`] is a chain of [`Buffer`]s plus per-packet metadata. The first
//! buffer carries the headers; the rest hold payload continuation.

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::desc::RxCsumFlags;
use crate::pool::Buffer;

bitflags! {
    /// Offloads requested for a transmitted packet.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TxOffload: u32 {
        const IP_CKSUM        = 1 << 0;
        const TCP_CKSUM       = 1 << 1;
        const UDP_CKSUM       = 1 << 2;
        const VLAN            = 1 << 3;
        const TCP_SEG         = 1 << 4;
        const OUTER_IP_CKSUM  = 1 << 5;
        const OUTER_UDP_CKSUM = 1 << 6;
        const OUTER_IPV4      = 1 << 7;
        const OUTER_IPV6      = 1 << 8;
    }
}

bitflags! {
    /// Metadata derived from a receive completion.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RxOffload: u32 {
        const RSS_HASH       = 1 << 0;
        const VLAN           = 1 << 1;
        const VLAN_STRIPPED  = 1 << 2;
        const IP_CKSUM_GOOD  = 1 << 3;
        const IP_CKSUM_BAD   = 1 << 4;
        const L4_CKSUM_GOOD  = 1 << 5;
        const L4_CKSUM_BAD   = 1 << 6;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum L2Type {
    #[default]
    Unknown,
    Ether,
    EtherVlan,
    EtherArp,
    EtherLldp,
    EtherTimesync,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum L3Type {
    #[default]
    Unknown,
    Ipv4,
    Ipv6,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum L4Type {
    #[default]
    Unknown,
    Tcp,
    Udp,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PacketType {
    pub l2: L2Type,
    pub l3: L3Type,
    pub l4: L4Type,
}

impl PacketType {
    pub const UNKNOWN: Self = Self::new(L2Type::Unknown, L3Type::Unknown, L4Type::Unknown);

    pub const fn new(l2: L2Type, l3: L3Type, l4: L4Type) -> Self {
        Self { l2, l3, l4 }
    }

    #[inline]
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

/// Hardware packet type codes reported in receive completions.
pub mod hw_ptype {
    pub const NON_IP: u8 = 0x00;
    pub const IPV4: u8 = 0x01;
    pub const IPV4_TCP: u8 = 0x03;
    pub const IPV4_UDP: u8 = 0x05;
    pub const IPV6: u8 = 0x08;
    pub const IPV6_TCP: u8 = 0x18;
    pub const IPV6_UDP: u8 = 0x28;
}

const PTYPE_TABLE_LEN: usize = 128;

const fn build_ptype_table() -> [PacketType; PTYPE_TABLE_LEN] {
    let mut table = [PacketType::UNKNOWN; PTYPE_TABLE_LEN];
    table[hw_ptype::IPV4 as usize] = PacketType::new(L2Type::Ether, L3Type::Ipv4, L4Type::Unknown);
    table[hw_ptype::IPV4_TCP as usize] = PacketType::new(L2Type::Ether, L3Type::Ipv4, L4Type::Tcp);
    table[hw_ptype::IPV4_UDP as usize] = PacketType::new(L2Type::Ether, L3Type::Ipv4, L4Type::Udp);
    table[hw_ptype::IPV6 as usize] = PacketType::new(L2Type::Ether, L3Type::Ipv6, L4Type::Unknown);
    table[hw_ptype::IPV6_TCP as usize] = PacketType::new(L2Type::Ether, L3Type::Ipv6, L4Type::Tcp);
    table[hw_ptype::IPV6_UDP as usize] = PacketType::new(L2Type::Ether, L3Type::Ipv6, L4Type::Udp);
    table
}

static PTYPE_TABLE: [PacketType; PTYPE_TABLE_LEN] = build_ptype_table();

/// Map a hardware packet type code to a [`PacketType`]. Unlisted codes are unknown.
#[inline]
pub fn ptype_from_hw(code: u8) -> PacketType {
    PTYPE_TABLE[(code & 0x7f) as usize]
}

/// Bits of the completion checksum flags that index the checksum table.
pub const CSUM_FLAG_MASK: u8 = RxCsumFlags::VLAN.bits() - 1;

const fn build_csum_table() -> [u32; CSUM_FLAG_MASK as usize + 1] {
    let mut table = [0u32; CSUM_FLAG_MASK as usize + 1];
    let mut i = 0;
    while i < table.len() {
        let f = i as u8;
        let mut bits = 0;

        if f & RxCsumFlags::IP_OK.bits() != 0 {
            bits |= RxOffload::IP_CKSUM_GOOD.bits();
        } else if f & RxCsumFlags::IP_BAD.bits() != 0 {
            bits |= RxOffload::IP_CKSUM_BAD.bits();
        }

        let l4_ok = RxCsumFlags::TCP_OK.bits() | RxCsumFlags::UDP_OK.bits();
        let l4_bad = RxCsumFlags::TCP_BAD.bits() | RxCsumFlags::UDP_BAD.bits();
        if f & l4_ok != 0 {
            bits |= RxOffload::L4_CKSUM_GOOD.bits();
        } else if f & l4_bad != 0 {
            bits |= RxOffload::L4_CKSUM_BAD.bits();
        }

        table[i] = bits;
        i += 1;
    }
    table
}

static CSUM_TABLE: [u32; CSUM_FLAG_MASK as usize + 1] = build_csum_table();

/// Checksum verdicts for a completion whose `CALC` flag is set.
#[inline]
pub fn csum_offload(flags: RxCsumFlags) -> RxOffload {
    RxOffload::from_bits_retain(CSUM_TABLE[(flags.bits() & CSUM_FLAG_MASK) as usize])
}

pub const ETHER_TYPE_ARP: u16 = 0x0806;
pub const ETHER_TYPE_LLDP: u16 = 0x88cc;
pub const ETHER_TYPE_1588: u16 = 0x88f7;
/// Offset of the EtherType in an untagged Ethernet header.
pub const ETHER_TYPE_OFFSET: u64 = 12;

/// Classify a non-IP frame by its EtherType. Types other than ARP, LLDP
/// and PTP stay unknown.
pub fn ptype_from_ether_type(ether_type: u16) -> PacketType {
    let l2 = match ether_type {
        ETHER_TYPE_ARP => L2Type::EtherArp,
        ETHER_TYPE_LLDP => L2Type::EtherLldp,
        ETHER_TYPE_1588 => L2Type::EtherTimesync,
        _ => return PacketType::UNKNOWN,
    };
    PacketType::new(l2, L3Type::Unknown, L4Type::Unknown)
}

/// Inline capacity before a chain spills to the heap.
const INLINE_SEGS: usize = 4;

/// A packet: an ordered chain of buffers and its metadata.
#[derive(Debug, Default)]
pub struct Packet {
    segs: SmallVec<[Buffer; INLINE_SEGS]>,
    pub tx_offload: TxOffload,
    pub rx_offload: RxOffload,
    pub vlan_tci: u16,
    pub rss_hash: u32,
    pub packet_type: PacketType,
    /// Header length for segmentation offload.
    pub l234_len: u16,
    /// Segment size for segmentation offload.
    pub mss: u16,
}

impl Packet {
    pub fn new(head: Buffer) -> Self {
        let mut segs = SmallVec::new();
        segs.push(head);
        Self {
            segs,
            ..Default::default()
        }
    }

    /// Link `buf` onto the end of the chain.
    pub fn push(&mut self, buf: Buffer) {
        self.segs.push(buf);
    }

    #[inline]
    pub fn num_segs(&self) -> usize {
        self.segs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segs.is_empty()
    }

    /// Sum of the data lengths of every buffer in the chain.
    pub fn pkt_len(&self) -> u32 {
        self.segs.iter().map(|b| b.data_len() as u32).sum()
    }

    pub fn segments(&self) -> &[Buffer] {
        &self.segs
    }

    pub fn segments_mut(&mut self) -> &mut [Buffer] {
        &mut self.segs
    }

    pub fn head(&self) -> Option<&Buffer> {
        self.segs.first()
    }

    /// Remove every buffer, leaving the metadata.
    pub fn take_segments(&mut self) -> SmallVec<[Buffer; INLINE_SEGS]> {
        core::mem::take(&mut self.segs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Pool, SlabPool};

    #[test]
    fn test_ptype_table_known_entries() {
        let t = ptype_from_hw(hw_ptype::IPV6_UDP);
        assert_eq!(t, PacketType::new(L2Type::Ether, L3Type::Ipv6, L4Type::Udp));
        assert!(ptype_from_hw(hw_ptype::NON_IP).is_unknown());
        assert!(ptype_from_hw(0x7e).is_unknown());
        // color bit is ignored
        assert_eq!(ptype_from_hw(0x80 | hw_ptype::IPV4_TCP).l4, L4Type::Tcp);
    }

    #[test]
    fn test_csum_table() {
        assert_eq!(csum_offload(RxCsumFlags::empty()), RxOffload::empty());
        assert_eq!(
            csum_offload(RxCsumFlags::IP_OK | RxCsumFlags::TCP_OK),
            RxOffload::IP_CKSUM_GOOD | RxOffload::L4_CKSUM_GOOD
        );
        assert_eq!(
            csum_offload(RxCsumFlags::IP_BAD | RxCsumFlags::UDP_BAD),
            RxOffload::IP_CKSUM_BAD | RxOffload::L4_CKSUM_BAD
        );
        // VLAN and CALC do not index the table
        assert_eq!(
            csum_offload(RxCsumFlags::CALC | RxCsumFlags::VLAN | RxCsumFlags::UDP_OK),
            RxOffload::L4_CKSUM_GOOD
        );
    }

    #[test]
    fn test_ether_type_classification() {
        assert_eq!(ptype_from_ether_type(ETHER_TYPE_ARP).l2, L2Type::EtherArp);
        assert_eq!(ptype_from_ether_type(ETHER_TYPE_LLDP).l2, L2Type::EtherLldp);
        assert_eq!(ptype_from_ether_type(ETHER_TYPE_1588).l2, L2Type::EtherTimesync);
        assert!(ptype_from_ether_type(0x0800).is_unknown());
    }

    #[test]
    fn test_chain_length() {
        let pool = Pool::new(SlabPool::new(0x10000, 8 * 512, 512).unwrap());
        let mut head = pool.get().unwrap();
        head.set_data_len(100).unwrap();
        let mut pkt = Packet::new(head);
        for len in [512, 7] {
            let mut b = pool.get().unwrap();
            b.set_data_len(len).unwrap();
            pkt.push(b);
        }
        assert_eq!(pkt.num_segs(), 3);
        assert_eq!(pkt.pkt_len(), 619);

        let segs = pkt.take_segments();
        assert!(pkt.is_empty());
        assert_eq!(segs.len(), 3);
        drop(segs);
        assert_eq!(pool.available(), 8);
    }
}
