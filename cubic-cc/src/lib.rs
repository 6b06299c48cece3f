// Copyright (C) 2025, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! CUBIC congestion control with HyStart++ slow start exit.
//!
//! This crate provides the window-control half of a TCP-like sender: it owns
//! the congestion window and slow start threshold of a single connection and
//! updates them in response to acknowledgments, congestion signals, RTT
//! samples, round boundaries and idle periods reported by the transport.
//!
//! The transport remains responsible for sequencing, retransmission timers
//! and RTT smoothing. It serializes all calls for a connection; there is no
//! shared state between connections.
//!
//! ```
//! use std::time::Instant;
//!
//! let mut config = cubic_cc::Config::new();
//! config.set_max_datagram_size(1460);
//! config.set_hystart_exit_name("midpoint")?;
//!
//! let mut cc = cubic_cc::Congestion::from_config(&config)?;
//!
//! cc.on_ack(
//!     &cubic_cc::AckEvent {
//!         bytes_acked: 1460,
//!         segments_acked: 1,
//!         window_limited: true,
//!         ..Default::default()
//!     },
//!     Instant::now(),
//! );
//!
//! assert_eq!(cc.congestion_window(), 11 * 1460);
//! # Ok::<(), cubic_cc::Error>(())
//! ```

#[macro_use]
extern crate log;

use std::str::FromStr;
use std::time::Duration;

pub use crate::congestion::Congestion;
pub use crate::error::Error;
pub use crate::error::Result;

/// The minimum congestion window and slow start threshold, in packets.
pub const MINIMUM_WINDOW_PACKETS: usize = 2;

const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1200;

const DEFAULT_INITIAL_CONGESTION_WINDOW_PACKETS: usize = 10;

const DEFAULT_MAX_CONGESTION_WINDOW_PACKETS: usize = 10_000;

// RFC3465 recommends L=2 for slow start after a full window of data.
const DEFAULT_ABC_LIMIT: usize = 2;

/// Stores configuration shared between multiple connections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    max_datagram_size: usize,

    initial_congestion_window_packets: usize,

    max_congestion_window_packets: usize,

    abc_limit: usize,

    hystart: bool,

    hystart_exit: HystartExit,
}

impl Config {
    /// Creates a config object with default values.
    pub fn new() -> Self {
        Config {
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            initial_congestion_window_packets:
                DEFAULT_INITIAL_CONGESTION_WINDOW_PACKETS,
            max_congestion_window_packets: DEFAULT_MAX_CONGESTION_WINDOW_PACKETS,
            abc_limit: DEFAULT_ABC_LIMIT,
            hystart: true,
            hystart_exit: HystartExit::LowRttFlight,
        }
    }

    /// Sets the maximum segment size used for window arithmetic.
    ///
    /// The default value is `1200`.
    pub fn set_max_datagram_size(&mut self, v: usize) {
        self.max_datagram_size = v;
    }

    /// Sets the initial congestion window size in terms of packet count.
    ///
    /// The default value is `10`.
    pub fn set_initial_congestion_window_packets(&mut self, packets: usize) {
        self.initial_congestion_window_packets = packets;
    }

    /// Sets the ceiling no window increase can cross, in packets.
    ///
    /// The default value is `10000`.
    pub fn set_max_congestion_window_packets(&mut self, packets: usize) {
        self.max_congestion_window_packets = packets;
    }

    /// Sets the Appropriate Byte Counting limit `L` applied in slow start.
    ///
    /// The default value is `2`.
    pub fn set_abc_limit(&mut self, v: usize) {
        self.abc_limit = v;
    }

    /// Configures whether to enable HyStart++.
    ///
    /// The default value is `true`.
    pub fn enable_hystart(&mut self, v: bool) {
        self.hystart = v;
    }

    /// Sets the slow start threshold policy applied when HyStart++ confirms
    /// a Conservative Slow Start phase.
    ///
    /// The default value is `HystartExit::LowRttFlight`.
    pub fn set_hystart_exit(&mut self, policy: HystartExit) {
        self.hystart_exit = policy;
    }

    /// Sets the HyStart++ exit policy by name.
    ///
    /// If `name` is not valid, `Error::InvalidConfig` is returned.
    ///
    /// ## Examples:
    ///
    /// ```
    /// let mut config = cubic_cc::Config::new();
    /// config.set_hystart_exit_name("keep")?;
    /// # Ok::<(), cubic_cc::Error>(())
    /// ```
    pub fn set_hystart_exit_name(&mut self, name: &str) -> Result<()> {
        self.hystart_exit = HystartExit::from_str(name)?;

        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_datagram_size == 0 {
            return Err(Error::InvalidMss);
        }

        if self.initial_congestion_window_packets == 0 ||
            self.abc_limit == 0 ||
            self.initial_congestion_window_packets >
                self.max_congestion_window_packets
        {
            return Err(Error::InvalidConfig);
        }

        Ok(())
    }

    pub(crate) fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    pub(crate) fn initial_congestion_window(&self) -> usize {
        self.max_datagram_size
            .saturating_mul(self.initial_congestion_window_packets)
    }

    pub(crate) fn max_congestion_window(&self) -> usize {
        self.max_datagram_size
            .saturating_mul(self.max_congestion_window_packets)
    }

    pub(crate) fn abc_limit(&self) -> usize {
        self.abc_limit
    }

    pub(crate) fn hystart(&self) -> bool {
        self.hystart
    }

    pub(crate) fn hystart_exit(&self) -> HystartExit {
        self.hystart_exit
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Slow start threshold policy used when HyStart++ leaves Conservative Slow
/// Start for congestion avoidance.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HystartExit {
    /// Use the flight size observed at the lowest RTT of the latest round.
    /// `lowrtt` in a string form.
    LowRttFlight,
    /// Use the midpoint between the lowest-RTT flight size and the flight
    /// size recorded when CSS was entered. `midpoint` in a string form.
    Midpoint,
    /// Never reduce: the slow start threshold becomes the current window and
    /// growth simply turns linear. `keep` in a string form.
    KeepWindow,
}

impl FromStr for HystartExit {
    type Err = Error;

    /// Converts a string to `HystartExit`.
    ///
    /// If `name` is not valid, `Error::InvalidConfig` is returned.
    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name {
            "lowrtt" => Ok(HystartExit::LowRttFlight),
            "midpoint" => Ok(HystartExit::Midpoint),
            "keep" => Ok(HystartExit::KeepWindow),

            _ => Err(Error::InvalidConfig),
        }
    }
}

/// A congestion signal delivered by the transport.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CongestionSignal {
    /// The duplicate acknowledgment threshold was exceeded.
    DupAck,
    /// The peer echoed an ECN congestion mark.
    Ecn,
    /// The retransmission timer fired.
    Rto,
}

/// The growth regime a connection is in.
///
/// Exactly one phase is active at a time. Whether a congestion event has ever
/// been seen and whether the sender is application limited are tracked
/// separately since they persist across phases.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Exponential growth.
    SlowStart,
    /// HyStart++ throttled slow start, entered on RTT inflation.
    ConservativeSlowStart,
    /// CUBIC or TCP-friendly growth.
    CongestionAvoidance,
    /// Recovering from the given congestion signal.
    LossRecovery(CongestionSignal),
}

/// An acknowledgment as seen by the transport.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct AckEvent {
    /// Newly acknowledged bytes.
    pub bytes_acked: usize,

    /// Newly acknowledged segments.
    pub segments_acked: usize,

    /// Whether the sender was limited by the congestion window rather than
    /// by the application.
    pub window_limited: bool,

    /// Whether the transport is currently in fast or congestion recovery.
    pub in_recovery: bool,

    /// Whether the whole window has already been used this round trip, e.g.
    /// because data below the highest sent sequence is being resent after a
    /// timeout. Slow start then grows by at most one segment per ACK.
    pub window_exhausted: bool,
}

/// Transport state accompanying a congestion signal.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CongestionInfo {
    /// Whether the transport is already recovering from an earlier signal.
    /// Duplicate ACK and ECN signals are ignored in that case.
    pub in_recovery: bool,

    /// Number of times the oldest unacknowledged segment has been
    /// retransmitted by timeout, including this one. Only used for
    /// `CongestionSignal::Rto`.
    pub rto_count: u32,

    /// The peer's advertised receive window in bytes.
    pub peer_window: usize,

    /// Bytes in flight before the loss.
    pub bytes_in_flight: usize,
}

/// A measured round-trip time.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RttSample {
    /// The raw RTT of the acknowledged segment.
    pub latest_rtt: Duration,

    /// The transport's smoothed RTT after taking this sample into account.
    pub smoothed_rtt: Duration,

    /// How many times the measured segment was retransmitted. Samples with
    /// more than one retransmission are ambiguous and get discarded.
    pub retransmit_count: u32,

    /// Bytes in flight when the sample was taken.
    pub flight_size: usize,
}

mod congestion;
mod cubic;
mod error;
mod hystart;
mod rtt;

#[cfg(test)]
mod test_sender;
