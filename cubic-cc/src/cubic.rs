// Copyright (C) 2019, Cloudflare, Inc.
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

//! CUBIC Congestion Control
//!
//! This implementation is based on RFC8312:
//! <https://tools.ietf.org/html/rfc8312>
//!
//! Note that Slow Start can use HyStart++ when enabled.

use std::cmp;

use std::time::Duration;
use std::time::Instant;

use crate::congestion::Congestion;
use crate::AckEvent;
use crate::CongestionInfo;
use crate::CongestionSignal;
use crate::Phase;
use crate::MINIMUM_WINDOW_PACKETS;

/// CUBIC Constants.
///
/// These are recommended value in RFC8312.
pub(crate) const BETA_CUBIC: f64 = 0.7;

pub(crate) const C: f64 = 0.4;

/// Fast convergence factor, applied to the window when a loss happens
/// before the previous `w_max` was reached again.
pub(crate) const FAST_CONVERGENCE_FACTOR: f64 = (1.0 + BETA_CUBIC) / 2.0;

/// Growth of the TCP-friendly window in segments per RTT.
pub(crate) const ALPHA_AIMD: f64 = 3.0 * (1.0 - BETA_CUBIC) / (1.0 + BETA_CUBIC);

/// CUBIC State Variables.
///
/// k, w_max, w_est are described in the RFC. Windows are in bytes, k in
/// seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct State {
    pub(crate) k: f64,

    pub(crate) w_max: f64,

    pub(crate) w_est: f64,

    // cwnd right before the last window reduction.
    pub(crate) cwnd_prior: usize,

    pub(crate) epoch_start: Option<Instant>,
}

/// Stores the state from before the first retransmission timeout of a loss
/// episode, so that a spurious timeout can be undone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct PriorState {
    congestion_window: usize,

    ssthresh: usize,

    phase: Phase,

    cubic: State,
}

/// CUBIC Functions.
///
/// Note that these calculations are based on a count of cwnd as bytes,
/// not packets.
/// Unit of t (duration) and RTT are based on seconds (f64).
impl State {
    // K = cubic_root(w_max * (1 - beta_cubic) / C) (Eq. 2)
    pub(crate) fn cubic_k(&self, max_datagram_size: usize) -> f64 {
        let w_max = self.w_max / max_datagram_size as f64;

        libm::cbrt(w_max * (1.0 - BETA_CUBIC) / C)
    }

    // W_cubic(t) = C * (t - K)^3 + w_max (Eq. 1)
    pub(crate) fn w_cubic(&self, t: Duration, max_datagram_size: usize) -> f64 {
        let w_cubic = C *
            (t.as_secs_f64() - self.k).powi(3) *
            max_datagram_size as f64 +
            self.w_max;

        w_cubic.max(0.0)
    }

    // W_est(t) = w_max * beta_cubic + alpha_aimd * (t / RTT) (Eq. 4)
    pub(crate) fn w_est(
        &self, t: Duration, rtt: Duration, max_datagram_size: usize,
    ) -> f64 {
        self.w_max * BETA_CUBIC +
            ALPHA_AIMD *
                (t.as_secs_f64() / rtt.as_secs_f64()) *
                max_datagram_size as f64
    }
}

/// Restarts the cubic epoch at `now`.
pub(crate) fn start_epoch(r: &mut Congestion, now: Instant) {
    r.cubic_state.epoch_start = Some(now);
    r.cubic_state.k = r.cubic_state.cubic_k(r.max_datagram_size);
}

pub(crate) fn slow_start(r: &mut Congestion, ack: &AckEvent) {
    if r.hystart.on_slow_start() {
        debug!("{} hystart++ entered css {:?}", r.trace_id, r.hystart);
    }

    let mss = r.max_datagram_size;

    // RFC3465 Appropriate Byte Counting, limited to one segment once the
    // window was used up.
    let mut inc = if ack.window_exhausted {
        cmp::min(ack.bytes_acked, mss)
    } else {
        cmp::min(
            ack.bytes_acked,
            ack.segments_acked
                .saturating_mul(r.abc_limit)
                .saturating_mul(mss),
        )
    };

    if r.hystart.in_css() {
        inc = r.hystart.css_cwnd_inc(inc);
        r.phase = Phase::ConservativeSlowStart;
    } else {
        r.phase = Phase::SlowStart;
    }

    r.congestion_window = cmp::min(
        r.congestion_window.saturating_add(inc),
        r.max_congestion_window,
    );
}

pub(crate) fn congestion_avoidance(r: &mut Congestion, now: Instant) {
    let rtt = match r.rtt.mean_rtt() {
        Some(v) => v,

        None => return,
    };

    let mss = r.max_datagram_size;

    let from_slow_start = matches!(
        r.phase,
        Phase::SlowStart | Phase::ConservativeSlowStart
    );

    if r.rto_event && from_slow_start {
        // RFC8312 Section 4.7: growth after a timeout starts a new curve
        // from the current window.
        r.rto_event = false;
        r.cubic_state.w_max = r.congestion_window as f64;
        r.cubic_state.k = 0.0;
        r.cubic_state.epoch_start = Some(now);
    } else if from_slow_start ||
        r.app_limited ||
        r.cubic_state.epoch_start.is_none()
    {
        start_epoch(r, now);
    }

    r.phase = Phase::CongestionAvoidance;
    r.app_limited = false;

    let epoch_start = r.cubic_state.epoch_start.unwrap_or(now);
    let t = now.saturating_duration_since(epoch_start);

    // The mean RTT is used on purpose: with min RTT, W_est grows much faster
    // than a Reno flow would whenever queueing dominates the path delay.
    let w_est = r.cubic_state.w_est(t, rtt, mss);
    let w_cubic = r.cubic_state.w_cubic(t.saturating_add(rtt), mss);

    r.cubic_state.w_est = w_est;

    let target = if w_cubic < w_est {
        // AIMD friendly region (W_cubic(t) < W_est)
        w_est
    } else {
        // Concave region or convex region.
        w_cubic
    };

    // cwnd never shrinks on an ACK.
    if (r.congestion_window as f64) < target {
        r.congestion_window = cmp::max(
            r.congestion_window,
            cmp::min(target as usize, r.max_congestion_window),
        );
    }

    // Without any congestion event yet, keep probing for w_max.
    if !r.congestion_event_seen &&
        r.cubic_state.w_max < r.congestion_window as f64
    {
        r.cubic_state.w_max = r.congestion_window as f64;
        r.cubic_state.k = r.cubic_state.cubic_k(mss);
    }
}

pub(crate) fn congestion_event(
    r: &mut Congestion, signal: CongestionSignal, info: &CongestionInfo,
    now: Instant,
) {
    let mss = r.max_datagram_size;

    match signal {
        CongestionSignal::DupAck => r.hystart.on_loss(),

        CongestionSignal::Ecn | CongestionSignal::Rto =>
            r.hystart.on_window_reduction(),
    }

    if r.phase == Phase::ConservativeSlowStart {
        r.phase = Phase::SlowStart;
    }

    match signal {
        CongestionSignal::DupAck => {
            if info.in_recovery {
                return;
            }

            ssthresh_update(r);

            r.congestion_event_seen = true;
            r.congestion_events += 1;

            start_epoch(r, now);

            r.phase = Phase::LossRecovery(signal);
        },

        CongestionSignal::Ecn => {
            if info.in_recovery {
                return;
            }

            ssthresh_update(r);

            r.congestion_event_seen = true;
            r.congestion_events += 1;

            start_epoch(r, now);

            r.congestion_window = r.ssthresh;

            r.phase = Phase::LossRecovery(signal);
        },

        CongestionSignal::Rto => {
            // Only the first timeout of an episode is remembered.
            if info.rto_count <= 1 {
                checkpoint(r);

                let flight = cmp::min(info.peer_window, info.bytes_in_flight);
                let segments = (flight as f64 * BETA_CUBIC) as usize / mss;

                r.ssthresh = cmp::max(MINIMUM_WINDOW_PACKETS, segments) * mss;
            }

            r.congestion_event_seen = true;
            r.rto_event = true;
            r.congestion_events += 1;

            r.congestion_window = mss;

            r.phase = Phase::SlowStart;
        },
    }
}

// Computes the new ssthresh and w_max on a duplicate ACK or ECN signal.
fn ssthresh_update(r: &mut Congestion) {
    let mut cwnd = r.congestion_window as f64;

    r.cubic_state.cwnd_prior = r.congestion_window;

    // Fast convergence
    if cwnd < r.cubic_state.w_max {
        cwnd *= FAST_CONVERGENCE_FACTOR;
    }

    let ssthresh = if r.congestion_event_seen {
        r.cubic_state.w_max = cwnd;

        cwnd * BETA_CUBIC
    } else {
        // Align the concave region with the reduced window on the first
        // congestion event.
        r.cubic_state.w_max = cwnd * BETA_CUBIC;

        cwnd / 2.0
    };

    r.ssthresh = cmp::max(
        ssthresh as usize,
        r.max_datagram_size * MINIMUM_WINDOW_PACKETS,
    );
}

pub(crate) fn post_recovery(r: &mut Congestion, bytes_in_flight: usize) {
    if let Phase::LossRecovery(signal) = r.phase {
        if signal == CongestionSignal::DupAck {
            let mss = r.max_datagram_size;

            // RFC6582: don't send a burst when little is in flight, but
            // never collapse to a single segment either.
            r.congestion_window = if bytes_in_flight < r.ssthresh {
                cmp::max(bytes_in_flight, mss) + mss
            } else {
                r.ssthresh
            };
        }

        r.phase = Phase::CongestionAvoidance;
    }

    r.rtt.end_epoch();
}

fn checkpoint(r: &mut Congestion) {
    r.prior = Some(PriorState {
        congestion_window: r.congestion_window,
        ssthresh: r.ssthresh,
        phase: r.phase,
        cubic: r.cubic_state,
    });
}

pub(crate) fn rollback(r: &mut Congestion) -> bool {
    if !r.rto_event {
        return false;
    }

    let prior = match r.prior.take() {
        Some(v) => v,

        None => return false,
    };

    r.congestion_window = prior.congestion_window;
    r.ssthresh = prior.ssthresh;
    r.phase = prior.phase;
    r.cubic_state = prior.cubic;

    // The next loss is treated as the first congestion event again.
    r.congestion_event_seen = false;
    r.rto_event = false;
    r.congestion_events = r.congestion_events.saturating_sub(1);

    true
}
