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

//! Per-queue counters.
//!
//! Each queue owns its counters exclusively; read them through the queue's
//! `stats()` accessor.

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TxStats {
    pub packets: u64,
    pub bytes: u64,
    /// Packets posted without any checksum offload.
    pub no_csum: u64,
    /// Packets refused because the ring was full.
    pub stop: u64,
    /// Packets dropped after an encode failure.
    pub drop: u64,
    /// Completion entries processed.
    pub comps: u64,
    /// Doorbells rung by the watchdog.
    pub stalls: u64,
    pub doorbells: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RxStats {
    pub packets: u64,
    pub bytes: u64,
    pub bad_cq_status: u64,
    pub bad_len: u64,
    /// Packets whose type was resolved by reading the Ethernet header.
    pub header_parses: u64,
    /// Refills that could not get buffers from a pool.
    pub alloc_failed: u64,
    /// Doorbells rung by the watchdog.
    pub stalls: u64,
    pub doorbells: u64,
}
