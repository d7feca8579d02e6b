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

use thiserror::Error;

use crate::pool::AllocError;

/// Why a completion entry was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionFault {
    /// The device reported a non-zero status.
    Status(u8),
    /// The device reported a zero-length frame.
    ZeroLength,
    /// The frame is longer than the queue's maximum frame size.
    Oversize { len: u16, max: u32 },
    /// More scatter-gather elements than the queue posts per descriptor.
    SegmentCount { reported: u8, max: u16 },
    /// The reported elements cannot hold the reported length.
    Truncated { len: u16, capacity: u32 },
}

impl core::fmt::Display for CompletionFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Status(s) => write!(f, "status {s:#x}"),
            Self::ZeroLength => write!(f, "zero length"),
            Self::Oversize { len, max } => write!(f, "length {len} exceeds frame size {max}"),
            Self::SegmentCount { reported, max } => {
                write!(f, "{reported} scatter elements, at most {max} posted")
            }
            Self::Truncated { len, capacity } => {
                write!(f, "length {len} exceeds posted capacity {capacity}")
            }
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DatapathError {
    #[error("Buffer pool exhausted")]
    ResourceExhausted,
    #[error("Malformed completion: {0}")]
    MalformedCompletion(CompletionFault),
    #[error("Completion index {found} does not match ring position {expected}")]
    ProtocolInconsistency { expected: u16, found: u16 },
    #[error("Packet has {segs} segments, queue posts at most {max}")]
    TooManySegments { segs: usize, max: usize },
    #[error("Packet has no buffers")]
    EmptyPacket,
    #[error("Segmentation offload requested without an encoder")]
    TsoUnavailable,
    #[error("Ring slot {slot} segment {seg} already owns a buffer")]
    SlotOccupied { slot: u16, seg: u16 },
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("Invalid memory layout")]
    InvalidLayout,
    #[error("Device memory access failed")]
    MemError,
    #[error("Allocation error: {0}")]
    Alloc(AllocError),
}

impl From<AllocError> for DatapathError {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::OutOfMemory => Self::ResourceExhausted,
            other => Self::Alloc(other),
        }
    }
}
