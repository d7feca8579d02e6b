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

use core::cmp::{max, min};
use core::time::Duration;

use bitflags::bitflags;

use crate::desc::TxCmd;
use crate::error::DatapathError;

bitflags! {
    /// Per-queue feature switches.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct QueueFlags: u16 {
        /// Offload IPv4 header checksums.
        const CSUM_L3   = 1 << 0;
        /// Offload TCP checksums.
        const CSUM_TCP  = 1 << 1;
        /// Offload UDP checksums.
        const CSUM_UDP  = 1 << 2;
        /// All transmitted buffers come from the queue's fast-free pool.
        const FAST_FREE = 1 << 3;
        /// The descriptor ring lives in controller memory.
        const CMB       = 1 << 4;
    }
}

/// Configuration shared by transmit and receive queues.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueueConfig {
    /// Queue number, used in log messages.
    index: u16,
    num_descs: u16,
    num_segs: u16,
    /// Transmit reclaim starts when fewer slots than this are free.
    flush_threshold: u16,
    /// Largest frame the receive side accepts.
    frame_size: u32,
    /// Bytes reserved in front of packet data in receive header buffers.
    rx_headroom: u16,
    flags: QueueFlags,
    watchdog: Duration,
    watchdog_max: Duration,
}

impl QueueConfig {
    /// The default ring size
    pub const DEFAULT_NUM_DESCS: u16 = 256;
    /// The minimum ring size
    pub const MIN_NUM_DESCS: u16 = 16;
    /// The maximum ring size
    pub const MAX_NUM_DESCS: u16 = 16384;
    /// The maximum buffers per descriptor: the head plus 15 scatter-gather elements
    pub const MAX_NUM_SEGS: u16 = TxCmd::MAX_NSGE as u16 + 1;
    /// The default transmit flush threshold
    pub const DEFAULT_FLUSH_THRESHOLD: u16 = 32;
    /// Standard Ethernet frame with one VLAN tag
    pub const DEFAULT_FRAME_SIZE: u32 = 1522;
    pub const DEFAULT_RX_HEADROOM: u16 = 128;
    /// The default (and transmit) watchdog interval
    pub const DEFAULT_WATCHDOG: Duration = Duration::from_millis(10);
    /// The minimum watchdog interval
    pub const MIN_WATCHDOG: Duration = Duration::from_millis(1);
    /// The default cap for receive watchdog backoff
    pub const DEFAULT_WATCHDOG_MAX: Duration = Duration::from_millis(1000);

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn set_index(&mut self, index: u16) {
        self.index = index;
    }

    pub fn num_descs(&self) -> u16 {
        self.num_descs
    }

    /// Set the ring size. 0 selects the default, other values are clamped to
    /// the supported range and rounded up to a power of two.
    pub fn set_num_descs(&mut self, num_descs: u16) {
        self.num_descs = match num_descs {
            0 => Self::DEFAULT_NUM_DESCS,
            n => min(Self::MAX_NUM_DESCS, max(n, Self::MIN_NUM_DESCS)).next_power_of_two(),
        };
        self.flush_threshold = min(self.flush_threshold, self.num_descs - 1);
    }

    pub fn num_segs(&self) -> u16 {
        self.num_segs
    }

    pub fn set_num_segs(&mut self, num_segs: u16) {
        self.num_segs = num_segs.clamp(1, Self::MAX_NUM_SEGS);
    }

    pub fn flush_threshold(&self) -> u16 {
        self.flush_threshold
    }

    pub fn set_flush_threshold(&mut self, threshold: u16) {
        self.flush_threshold = min(threshold, self.num_descs - 1);
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Set the maximum receive frame size. 0 selects the default.
    pub fn set_frame_size(&mut self, frame_size: u32) {
        self.frame_size = match frame_size {
            0 => Self::DEFAULT_FRAME_SIZE,
            n => min(n, u16::MAX as u32),
        };
    }

    pub fn rx_headroom(&self) -> u16 {
        self.rx_headroom
    }

    pub fn set_rx_headroom(&mut self, headroom: u16) {
        self.rx_headroom = headroom;
    }

    pub fn flags(&self) -> QueueFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: QueueFlags) {
        self.flags = flags;
    }

    pub fn watchdog(&self) -> Duration {
        self.watchdog
    }

    /// Set the watchdog interval. Zero selects the default; shorter values
    /// are raised to [`Self::MIN_WATCHDOG`].
    pub fn set_watchdog(&mut self, interval: Duration) {
        self.watchdog = match interval.as_millis() {
            0 => Self::DEFAULT_WATCHDOG,
            _ => max(interval, Self::MIN_WATCHDOG),
        };
        self.watchdog_max = max(self.watchdog_max, self.watchdog);
    }

    pub fn watchdog_max(&self) -> Duration {
        self.watchdog_max
    }

    pub fn set_watchdog_max(&mut self, cap: Duration) {
        self.watchdog_max = max(cap, self.watchdog);
    }

    /// Check the settings against each other.
    ///
    /// `rx_buffers` carries the header and segment buffer capacities for
    /// receive queues.
    pub fn validate(&self, rx_buffers: Option<(usize, usize)>) -> Result<(), DatapathError> {
        if !self.num_descs.is_power_of_two()
            || !(Self::MIN_NUM_DESCS..=Self::MAX_NUM_DESCS).contains(&self.num_descs)
        {
            return Err(DatapathError::InvalidConfig("ring size"));
        }
        if self.num_segs == 0 || self.num_segs > Self::MAX_NUM_SEGS {
            return Err(DatapathError::InvalidConfig("segments per descriptor"));
        }
        if self.flush_threshold >= self.num_descs {
            return Err(DatapathError::InvalidConfig("flush threshold"));
        }
        if let Some((hdr, seg)) = rx_buffers {
            if hdr == 0 || seg == 0 {
                return Err(DatapathError::InvalidConfig("receive buffers too small"));
            }
            let capacity = hdr + (self.num_segs as usize - 1) * seg;
            if self.frame_size as usize > capacity {
                return Err(DatapathError::InvalidConfig(
                    "frame size exceeds posted buffer capacity",
                ));
            }
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            index: 0,
            num_descs: Self::DEFAULT_NUM_DESCS,
            num_segs: 1,
            flush_threshold: Self::DEFAULT_FLUSH_THRESHOLD,
            frame_size: Self::DEFAULT_FRAME_SIZE,
            rx_headroom: Self::DEFAULT_RX_HEADROOM,
            flags: QueueFlags::empty(),
            watchdog: Self::DEFAULT_WATCHDOG,
            watchdog_max: Self::DEFAULT_WATCHDOG_MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = QueueConfig::default();
        cfg.validate(None).unwrap();
        assert_eq!(cfg.num_descs(), QueueConfig::DEFAULT_NUM_DESCS);
        assert_eq!(cfg.watchdog(), QueueConfig::DEFAULT_WATCHDOG);
    }

    #[test]
    fn test_num_descs_clamped_and_rounded() {
        let mut cfg = QueueConfig::default();
        cfg.set_num_descs(0);
        assert_eq!(cfg.num_descs(), QueueConfig::DEFAULT_NUM_DESCS);
        cfg.set_num_descs(3);
        assert_eq!(cfg.num_descs(), QueueConfig::MIN_NUM_DESCS);
        cfg.set_num_descs(100);
        assert_eq!(cfg.num_descs(), 128);
        cfg.set_num_descs(u16::MAX);
        assert_eq!(cfg.num_descs(), QueueConfig::MAX_NUM_DESCS);
    }

    #[test]
    fn test_flush_threshold_follows_ring() {
        let mut cfg = QueueConfig::default();
        cfg.set_num_descs(16);
        assert_eq!(cfg.flush_threshold(), 15);
        cfg.set_flush_threshold(1000);
        assert_eq!(cfg.flush_threshold(), 15);
        cfg.validate(None).unwrap();
    }

    #[test]
    fn test_watchdog_bounds() {
        let mut cfg = QueueConfig::default();
        cfg.set_watchdog(Duration::ZERO);
        assert_eq!(cfg.watchdog(), QueueConfig::DEFAULT_WATCHDOG);
        cfg.set_watchdog(Duration::from_micros(1500));
        assert_eq!(cfg.watchdog(), Duration::from_micros(1500));
        cfg.set_watchdog(Duration::from_secs(5));
        assert_eq!(cfg.watchdog_max(), Duration::from_secs(5));
        cfg.set_watchdog_max(Duration::from_millis(1));
        assert_eq!(cfg.watchdog_max(), Duration::from_secs(5));
    }

    #[test]
    fn test_rx_capacity_check() {
        let mut cfg = QueueConfig::default();
        cfg.set_num_segs(6);
        cfg.set_frame_size(9000);
        cfg.validate(Some((256, 2048))).unwrap();
        cfg.set_num_segs(4);
        assert_eq!(
            cfg.validate(Some((256, 2048))).unwrap_err(),
            DatapathError::InvalidConfig("frame size exceeds posted buffer capacity")
        );
        cfg.set_num_segs(40);
        assert_eq!(cfg.num_segs(), QueueConfig::MAX_NUM_SEGS);
    }
}
