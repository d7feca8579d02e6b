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

//! Scatter-gather transmit and receive datapath for ionic-style queues.
//!
//! A queue pair is made of a descriptor ring the driver produces into and a
//! completion queue the device produces into. The driver owns every buffer
//! attached to a ring slot until the device reports the slot complete.
//!
//! # Layers
//!
//! - [`MemOps`], [`Doorbell`] and [`Clock`] abstract the device: descriptor and
//!   completion memory, the doorbell register and a monotonic time source.
//! - [`DescRing`] tracks producer/consumer indices and per-slot buffer
//!   ownership. [`CompletionQueue`] tracks the color bit of entries written by
//!   the device.
//! - [`TxQueue`] and [`RxQueue`] implement the burst paths on top of them.
//! - [`Pool`] is the buffer pool capability both engines draw from.
//!
//! # Example
//!
//! ```ignore
//! let layout = unsafe { Layout::from_base(base, 256, 4)? };
//! let mut txq = TxQueue::new(&config, layout, mem, doorbell, clock)?;
//! txq.start()?;
//!
//! let sent = txq.transmit_burst(&mut packets)?;
//! ```

#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

mod access;
pub mod config;
mod cq;
pub mod desc;
mod device;
mod error;
mod layout;
pub mod packet;
mod pool;
mod ring;
pub mod rx;
pub mod stats;
pub mod tx;
mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

pub use access::MemOps;
pub use config::{QueueConfig, QueueFlags};
pub use cq::{Completion, CompletionQueue};
pub use device::{Clock, Doorbell};
#[cfg(feature = "std")]
pub use device::MonotonicClock;
pub use error::{CompletionFault, DatapathError};
pub use layout::Layout;
pub use packet::{L2Type, L3Type, L4Type, Packet, PacketType, RxOffload, TxOffload};
pub use pool::{AllocError, Allocation, Buffer, BufferProvider, Pool, SlabPool};
pub use ring::DescRing;
pub use rx::RxQueue;
pub use stats::{RxStats, TxStats};
pub use tx::{TsoEncoder, TxQueue, TxRing};
pub use watchdog::{Backoff, Watchdog};
