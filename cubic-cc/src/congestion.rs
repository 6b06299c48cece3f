// Copyright (C) 2018, Cloudflare, Inc.
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

use std::cmp;

use std::time::Instant;

use crate::cubic;
use crate::hystart;
use crate::rtt::RttTracker;
use crate::AckEvent;
use crate::Config;
use crate::CongestionInfo;
use crate::CongestionSignal;
use crate::Error;
use crate::HystartExit;
use crate::Phase;
use crate::Result;
use crate::RttSample;
use crate::MINIMUM_WINDOW_PACKETS;

/// Per-connection congestion control state.
///
/// A `Congestion` is created when the connection is established and is
/// driven by the transport through the `on_*` hooks. It never shares state
/// with other connections, so callers only need their usual per-connection
/// exclusion.
pub struct Congestion {
    pub(crate) congestion_window: usize,

    pub(crate) ssthresh: usize,

    pub(crate) max_congestion_window: usize,

    pub(crate) max_datagram_size: usize,

    // RFC3465 L.
    pub(crate) abc_limit: usize,

    pub(crate) phase: Phase,

    pub(crate) app_limited: bool,

    // Set by the first congestion event, cleared only by an RTO rollback.
    pub(crate) congestion_event_seen: bool,

    // The last congestion event was a retransmission timeout.
    pub(crate) rto_event: bool,

    pub(crate) congestion_events: usize,

    pub(crate) cubic_state: cubic::State,

    pub(crate) prior: Option<cubic::PriorState>,

    pub(crate) rtt: RttTracker,

    // HyStart++.
    pub(crate) hystart: hystart::Hystart,

    hystart_exit: HystartExit,

    pub(crate) trace_id: String,
}

impl Congestion {
    /// Creates the congestion state of a new connection.
    ///
    /// The window starts at the configured initial window, `ssthresh` is
    /// unbounded and no congestion event has been seen.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let initial_congestion_window = config.initial_congestion_window();

        Ok(Congestion {
            congestion_window: initial_congestion_window,

            ssthresh: usize::MAX,

            max_congestion_window: config.max_congestion_window(),

            max_datagram_size: config.max_datagram_size(),

            abc_limit: config.abc_limit(),

            phase: Phase::SlowStart,

            app_limited: false,

            congestion_event_seen: false,

            rto_event: false,

            congestion_events: 0,

            cubic_state: cubic::State {
                w_max: initial_congestion_window as f64,
                ..Default::default()
            },

            prior: None,

            rtt: RttTracker::default(),

            hystart: hystart::Hystart::new(config.hystart()),

            hystart_exit: config.hystart_exit(),

            trace_id: String::new(),
        })
    }

    /// Sets the identifier prefixed to log lines.
    pub fn set_trace_id(&mut self, trace_id: &str) {
        self.trace_id = trace_id.to_string();
    }

    /// Returns the congestion window in bytes.
    pub fn congestion_window(&self) -> usize {
        self.congestion_window
    }

    /// Returns the slow start threshold in bytes.
    pub fn ssthresh(&self) -> usize {
        self.ssthresh
    }

    /// Returns the current growth phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns true while HyStart++ Conservative Slow Start is active.
    pub fn in_css(&self) -> bool {
        self.hystart.in_css()
    }

    /// Returns true if the last ACK found the sender application limited.
    pub fn is_app_limited(&self) -> bool {
        self.app_limited
    }

    /// Returns the number of congestion events seen, minus the timeouts that
    /// were rolled back.
    pub fn congestion_events(&self) -> usize {
        self.congestion_events
    }

    /// Returns the minimum RTT seen so far, once enough samples arrived.
    pub fn min_rtt(&self) -> Option<std::time::Duration> {
        self.rtt.min_rtt()
    }

    /// Returns the mean RTT of the last closed epoch.
    pub fn mean_rtt(&self) -> Option<std::time::Duration> {
        self.rtt.mean_rtt()
    }

    /// Overrides the congestion window, e.g. when the transport applies its
    /// own restart window after an idle period.
    ///
    /// The value is clamped to one segment and the window ceiling.
    pub fn set_congestion_window(&mut self, cwnd: usize) {
        self.congestion_window =
            cwnd.clamp(self.max_datagram_size, self.max_congestion_window);

        trace!("{} cwnd set {:?}", self.trace_id, self);
    }

    /// Grows the window for newly acknowledged data.
    pub fn on_ack(&mut self, ack: &AckEvent, now: Instant) {
        // No window growth while recovering.
        if ack.in_recovery {
            return;
        }

        if !ack.window_limited {
            self.app_limited = true;

            trace!("{} app limited {:?}", self.trace_id, self);

            return;
        }

        if self.congestion_window <= self.ssthresh || !self.rtt.is_known() {
            cubic::slow_start(self, ack);
        } else {
            if self.hystart.in_css() {
                self.hystart.on_congestion_avoidance();

                debug!(
                    "{} hystart++ css left for congestion avoidance {:?}",
                    self.trace_id, self.hystart
                );
            }

            cubic::congestion_avoidance(self, now);
        }

        trace!("{} on_ack {:?}", self.trace_id, self);
    }

    /// Reacts to a congestion signal.
    pub fn on_congestion_event(
        &mut self, signal: CongestionSignal, info: &CongestionInfo, now: Instant,
    ) {
        cubic::congestion_event(self, signal, info, now);

        trace!(
            "{} congestion event {:?} {:?}",
            self.trace_id,
            signal,
            self
        );
    }

    /// Undoes the last retransmission timeout once it is known to have been
    /// spurious.
    ///
    /// Returns true if the state was rolled back, in which case the caller
    /// should decrement its own count of congestion episodes too.
    pub fn on_rto_spurious(&mut self) -> bool {
        let rolled_back = cubic::rollback(self);

        if rolled_back {
            trace!("{} spurious rto rolled back {:?}", self.trace_id, self);
        }

        rolled_back
    }

    /// Leaves fast recovery once all data outstanding at the congestion
    /// event has been acknowledged.
    pub fn on_post_recovery(&mut self, bytes_in_flight: usize) {
        cubic::post_recovery(self, bytes_in_flight);

        trace!("{} post recovery {:?}", self.trace_id, self);
    }

    /// Takes a new RTT measurement into account.
    pub fn on_rtt_sample(&mut self, sample: &RttSample) {
        // Karn's algorithm.
        if sample.retransmit_count > 1 {
            return;
        }

        self.rtt.record_rtt(sample.smoothed_rtt);

        let abandoned = self.hystart.on_rtt_sample(
            sample.latest_rtt,
            sample.retransmit_count,
            sample.flight_size,
        );

        if abandoned {
            if self.phase == Phase::ConservativeSlowStart {
                self.phase = Phase::SlowStart;
            }

            debug!(
                "{} hystart++ css false positive {:?}",
                self.trace_id, self.hystart
            );
        }
    }

    /// Starts a new round trip.
    pub fn on_new_round(&mut self, round: u64, now: Instant) {
        let ssthresh = match self.hystart.on_new_round(
            round,
            self.congestion_window,
            self.hystart_exit,
        ) {
            Some(v) => v,

            None => return,
        };

        self.ssthresh =
            cmp::max(ssthresh, self.max_datagram_size * MINIMUM_WINDOW_PACKETS);

        cubic::start_epoch(self, now);

        self.phase = if self.congestion_window > self.ssthresh {
            Phase::CongestionAvoidance
        } else {
            Phase::SlowStart
        };

        debug!(
            "{} hystart++ css confirmed ssthresh={} {:?}",
            self.trace_id, self.ssthresh, self.hystart
        );
    }

    /// Resets the cubic epoch after the connection was idle.
    pub fn on_idle(&mut self, now: Instant) {
        self.cubic_state.w_max =
            self.cubic_state.w_max.max(self.congestion_window as f64);

        cubic::start_epoch(self, now);

        if self.hystart.on_idle() {
            debug!("{} hystart++ re-armed after idle", self.trace_id);
        }

        if self.phase == Phase::ConservativeSlowStart {
            self.phase = Phase::SlowStart;
        }

        trace!("{} on_idle {:?}", self.trace_id, self);
    }

    /// Rescales all windows to a new segment size.
    pub fn update_mss(&mut self, new_mss: usize) -> Result<()> {
        if new_mss == 0 {
            return Err(Error::InvalidMss);
        }

        let old_mss = self.max_datagram_size;

        let scale = |v: usize| -> usize {
            (v as u128 * new_mss as u128 / old_mss as u128)
                .try_into()
                .unwrap_or(usize::MAX)
        };

        self.max_congestion_window = cmp::max(
            scale(self.max_congestion_window),
            new_mss.saturating_mul(MINIMUM_WINDOW_PACKETS),
        );

        self.congestion_window = scale(self.congestion_window)
            .clamp(new_mss, self.max_congestion_window);

        if self.ssthresh != usize::MAX {
            self.ssthresh = cmp::max(
                scale(self.ssthresh),
                new_mss.saturating_mul(MINIMUM_WINDOW_PACKETS),
            );
        }

        let ratio = new_mss as f64 / old_mss as f64;

        self.cubic_state.w_max *= ratio;
        self.cubic_state.w_est *= ratio;

        self.max_datagram_size = new_mss;

        trace!("{} mss updated {:?}", self.trace_id, self);

        Ok(())
    }

    /// Releases the state at connection teardown.
    pub fn destroy(self) {
        trace!("{} destroyed", self.trace_id);
    }
}

impl std::fmt::Debug for Congestion {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "cwnd={} ", self.congestion_window)?;

        if self.ssthresh == usize::MAX {
            write!(f, "ssthresh=inf ")?;
        } else {
            write!(f, "ssthresh={} ", self.ssthresh)?;
        }

        write!(f, "phase={:?} ", self.phase)?;

        write!(
            f,
            "cubic={{ k={} w_max={} w_est={} }} ",
            self.cubic_state.k, self.cubic_state.w_max, self.cubic_state.w_est
        )?;

        write!(f, "hystart={:?}", self.hystart)
    }
}
