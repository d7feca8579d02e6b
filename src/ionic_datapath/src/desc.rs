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

//! Descriptor and completion formats.
//!
//! Every record is 16 bytes and little-endian on the wire. Fields are stored
//! in wire byte order; use the accessors to read them in host order.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::cq::Completion;

/// Transmit opcode placed in bits 7:4 of the command word.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxOpcode {
    CsumNone = 0,
    CsumPartial = 1,
    CsumHw = 2,
    Tso = 3,
}

impl TxOpcode {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::CsumNone),
            1 => Some(Self::CsumPartial),
            2 => Some(Self::CsumHw),
            3 => Some(Self::Tso),
            _ => None,
        }
    }
}

bitflags! {
    /// Transmit descriptor flags, bits 3:0 of the command word.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TxDescFlags: u8 {
        /// Insert `vlan_tci` on the wire.
        const VLAN    = 1 << 0;
        /// Offloads apply to the inner headers of a tunnelled frame.
        const ENCAP   = 1 << 1;
        /// Compute the L3 checksum.
        const CSUM_L3 = 1 << 2;
        /// Compute the L4 checksum.
        const CSUM_L4 = 1 << 3;
    }
}

/// Decoded view of a transmit command word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxCmd {
    pub opcode: TxOpcode,
    pub flags: TxDescFlags,
    /// Number of scatter-gather elements following the descriptor.
    pub nsge: u8,
    pub addr: u64,
}

impl TxCmd {
    const OPCODE_SHIFT: u32 = 4;
    const OPCODE_MASK: u64 = 0xf;
    const FLAGS_SHIFT: u32 = 0;
    const FLAGS_MASK: u64 = 0xf;
    const NSGE_SHIFT: u32 = 8;
    const NSGE_MASK: u64 = 0xf;
    const ADDR_SHIFT: u32 = 12;
    /// Addresses are 52 bits wide.
    pub const ADDR_MASK: u64 = (1 << 52) - 1;
    /// Largest scatter-gather count the command word can carry.
    pub const MAX_NSGE: u8 = Self::NSGE_MASK as u8;

    pub fn encode(&self) -> u64 {
        ((self.opcode as u64 & Self::OPCODE_MASK) << Self::OPCODE_SHIFT)
            | ((self.flags.bits() as u64 & Self::FLAGS_MASK) << Self::FLAGS_SHIFT)
            | ((self.nsge as u64 & Self::NSGE_MASK) << Self::NSGE_SHIFT)
            | ((self.addr & Self::ADDR_MASK) << Self::ADDR_SHIFT)
    }

    pub fn decode(cmd: u64) -> Option<Self> {
        Some(Self {
            opcode: TxOpcode::from_bits(((cmd >> Self::OPCODE_SHIFT) & Self::OPCODE_MASK) as u8)?,
            flags: TxDescFlags::from_bits_truncate(
                ((cmd >> Self::FLAGS_SHIFT) & Self::FLAGS_MASK) as u8,
            ),
            nsge: ((cmd >> Self::NSGE_SHIFT) & Self::NSGE_MASK) as u8,
            addr: (cmd >> Self::ADDR_SHIFT) & Self::ADDR_MASK,
        })
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct TxDesc {
    cmd: u64,
    len: u16,
    vlan_tci: u16,
    hword1: u16,
    hword2: u16,
}

const _: () = assert!(TxDesc::SIZE == 16);
const _: () = assert!(core::mem::offset_of!(TxDesc, len) == 8);
const _: () = assert!(core::mem::offset_of!(TxDesc, vlan_tci) == 10);

impl TxDesc {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn new(cmd: TxCmd, len: u16, vlan_tci: u16) -> Self {
        Self {
            cmd: cmd.encode().to_le(),
            len: len.to_le(),
            vlan_tci: vlan_tci.to_le(),
            hword1: 0,
            hword2: 0,
        }
    }

    /// Descriptor carrying segmentation parameters in the trailing half-words.
    pub fn with_tso(cmd: TxCmd, len: u16, vlan_tci: u16, hdr_len: u16, mss: u16) -> Self {
        Self {
            hword1: hdr_len.to_le(),
            hword2: mss.to_le(),
            ..Self::new(cmd, len, vlan_tci)
        }
    }

    #[inline]
    pub fn cmd(&self) -> Option<TxCmd> {
        TxCmd::decode(u64::from_le(self.cmd))
    }

    #[inline]
    pub fn len(&self) -> u16 {
        u16::from_le(self.len)
    }

    #[inline]
    pub fn vlan_tci(&self) -> u16 {
        u16::from_le(self.vlan_tci)
    }

    #[inline]
    pub fn hdr_len(&self) -> u16 {
        u16::from_le(self.hword1)
    }

    #[inline]
    pub fn mss(&self) -> u16 {
        u16::from_le(self.hword2)
    }
}

/// One scatter-gather element. Transmit and receive share the format.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct SgElem {
    addr: u64,
    len: u16,
    rsvd: [u16; 3],
}

const _: () = assert!(SgElem::SIZE == 16);

impl SgElem {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn new(addr: u64, len: u16) -> Self {
        Self {
            addr: addr.to_le(),
            len: len.to_le(),
            rsvd: [0; 3],
        }
    }

    #[inline]
    pub fn addr(&self) -> u64 {
        u64::from_le(self.addr)
    }

    #[inline]
    pub fn len(&self) -> u16 {
        u16::from_le(self.len)
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RxOpcode {
    Simple = 0,
    Sg = 1,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct RxDesc {
    opcode: u8,
    rsvd: [u8; 5],
    len: u16,
    addr: u64,
}

const _: () = assert!(RxDesc::SIZE == 16);
const _: () = assert!(core::mem::offset_of!(RxDesc, len) == 6);
const _: () = assert!(core::mem::offset_of!(RxDesc, addr) == 8);

impl RxDesc {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn new(opcode: RxOpcode, addr: u64, len: u16) -> Self {
        Self {
            opcode: opcode as u8,
            rsvd: [0; 5],
            len: len.to_le(),
            addr: addr.to_le(),
        }
    }

    #[inline]
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    #[inline]
    pub fn len(&self) -> u16 {
        u16::from_le(self.len)
    }

    #[inline]
    pub fn addr(&self) -> u64 {
        u64::from_le(self.addr)
    }
}

/// Byte offset of the u16 whose top bit is the color, in both completion formats.
pub const COLOR_WORD_OFFSET: usize = 14;
const COLOR_BIT: u16 = 0x8000;
const COLOR_MASK: u8 = 0x80;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct TxComp {
    status: u8,
    rsvd: u8,
    comp_index: u16,
    rsvd2: [u8; 11],
    color: u8,
}

const _: () = assert!(TxComp::SIZE == 16);
const _: () = assert!(core::mem::offset_of!(TxComp, color) == COLOR_WORD_OFFSET + 1);

impl TxComp {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn new(status: u8, comp_index: u16, color: bool) -> Self {
        Self {
            status,
            rsvd: 0,
            comp_index: comp_index.to_le(),
            rsvd2: [0; 11],
            color: if color { COLOR_MASK } else { 0 },
        }
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.status
    }
}

impl Completion for TxComp {
    #[inline]
    fn color_of(word: u16) -> bool {
        word & COLOR_BIT != 0
    }

    #[inline]
    fn color(&self) -> bool {
        self.color & COLOR_MASK != 0
    }

    #[inline]
    fn comp_index(&self) -> u16 {
        u16::from_le(self.comp_index)
    }
}

bitflags! {
    /// Receive completion checksum and tag flags.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct RxCsumFlags: u8 {
        const TCP_OK  = 1 << 0;
        const TCP_BAD = 1 << 1;
        const UDP_OK  = 1 << 2;
        const UDP_BAD = 1 << 3;
        const IP_OK   = 1 << 4;
        const IP_BAD  = 1 << 5;
        /// A VLAN tag was stripped into `vlan_tci`.
        const VLAN    = 1 << 6;
        /// The device validated checksums for this frame.
        const CALC    = 1 << 7;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct RxComp {
    status: u8,
    num_sg_elems: u8,
    comp_index: u16,
    rss_hash: u32,
    csum: u16,
    vlan_tci: u16,
    len: u16,
    csum_flags: u8,
    pkt_type_color: u8,
}

const _: () = assert!(RxComp::SIZE == 16);
const _: () = assert!(core::mem::offset_of!(RxComp, csum_flags) == COLOR_WORD_OFFSET);
const _: () = assert!(core::mem::offset_of!(RxComp, pkt_type_color) == COLOR_WORD_OFFSET + 1);

impl RxComp {
    pub const SIZE: usize = core::mem::size_of::<Self>();
    /// Mask of the hardware packet type in `pkt_type_color`.
    pub const PKT_TYPE_MASK: u8 = 0x7f;

    /// Build a successful completion for `len` bytes at ring position `comp_index`.
    pub fn new(comp_index: u16, len: u16, color: bool) -> Self {
        Self {
            status: 0,
            num_sg_elems: 0,
            comp_index: comp_index.to_le(),
            rss_hash: 0,
            csum: 0,
            vlan_tci: 0,
            len: len.to_le(),
            csum_flags: 0,
            pkt_type_color: if color { COLOR_MASK } else { 0 },
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        let color = if color { COLOR_MASK } else { 0 };
        self.pkt_type_color = (self.pkt_type_color & Self::PKT_TYPE_MASK) | color;
        self
    }

    pub fn with_status(mut self, status: u8) -> Self {
        self.status = status;
        self
    }

    pub fn with_sg_elems(mut self, n: u8) -> Self {
        self.num_sg_elems = n;
        self
    }

    pub fn with_rss_hash(mut self, hash: u32) -> Self {
        self.rss_hash = hash.to_le();
        self
    }

    pub fn with_vlan(mut self, tci: u16) -> Self {
        self.vlan_tci = tci.to_le();
        self.csum_flags |= RxCsumFlags::VLAN.bits();
        self
    }

    pub fn with_csum_flags(mut self, flags: RxCsumFlags) -> Self {
        self.csum_flags |= flags.bits();
        self
    }

    pub fn with_pkt_type(mut self, pkt_type: u8) -> Self {
        self.pkt_type_color =
            (self.pkt_type_color & COLOR_MASK) | (pkt_type & Self::PKT_TYPE_MASK);
        self
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.status
    }

    #[inline]
    pub fn num_sg_elems(&self) -> u8 {
        self.num_sg_elems
    }

    #[inline]
    pub fn rss_hash(&self) -> u32 {
        u32::from_le(self.rss_hash)
    }

    #[inline]
    pub fn vlan_tci(&self) -> u16 {
        u16::from_le(self.vlan_tci)
    }

    #[inline]
    pub fn len(&self) -> u16 {
        u16::from_le(self.len)
    }

    #[inline]
    pub fn csum_flags(&self) -> RxCsumFlags {
        RxCsumFlags::from_bits_retain(self.csum_flags)
    }

    #[inline]
    pub fn pkt_type(&self) -> u8 {
        self.pkt_type_color & Self::PKT_TYPE_MASK
    }
}

impl Completion for RxComp {
    #[inline]
    fn color_of(word: u16) -> bool {
        word & COLOR_BIT != 0
    }

    #[inline]
    fn color(&self) -> bool {
        self.pkt_type_color & COLOR_MASK != 0
    }

    #[inline]
    fn comp_index(&self) -> u16 {
        u16::from_le(self.comp_index)
    }
}
