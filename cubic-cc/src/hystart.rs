// Copyright (C) 2020, Cloudflare, Inc.
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

//! HyStart++
//!
//! This implementation is based on the following RFC:
//!
//! <https://datatracker.ietf.org/doc/html/rfc9406>
//!
//! Rounds are delimited by the transport, which reports each new round
//! through `on_new_round()`. Conservative Slow Start is confirmed after
//! `CSS_ROUNDS` rounds without the RTT dropping back below the baseline that
//! triggered it.

use std::time::Duration;

use crate::HystartExit;

/// Constants from RFC.
const MIN_RTT_THRESH: Duration = Duration::from_millis(4);

const MAX_RTT_THRESH: Duration = Duration::from_millis(16);

const MIN_RTT_DIVISOR: u32 = 8;

pub const N_RTT_SAMPLE: usize = 8;

pub const CSS_GROWTH_DIVISOR: usize = 4;

pub const CSS_ROUNDS: u64 = 5;

/// Bookkeeping taken when Conservative Slow Start is entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Css {
    entry_round: u64,

    entry_flight: usize,

    baseline_min_rtt: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum State {
    /// Watching slow start rounds for RTT inflation.
    Armed,

    /// In Conservative Slow Start.
    InCss(Css),

    /// Turned off by a loss, or by CSS outliving slow start. Re-armed after
    /// an idle period.
    Disabled,

    /// CSS was confirmed into congestion avoidance. Stays off.
    Exited,
}

pub(crate) struct Hystart {
    enabled: bool,

    state: State,

    round: u64,

    last_round_min_rtt: Duration,

    current_round_min_rtt: Duration,

    rtt_sample_count: usize,

    low_rtt_flight: usize,
}

impl std::fmt::Debug for Hystart {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "state={:?} ", self.state)?;
        write!(f, "round={} ", self.round)?;
        write!(f, "last_round_min_rtt={:?} ", self.last_round_min_rtt)?;
        write!(f, "current_round_min_rtt={:?} ", self.current_round_min_rtt)?;
        write!(f, "rtt_sample_count={} ", self.rtt_sample_count)?;
        write!(f, "low_rtt_flight={}", self.low_rtt_flight)?;

        Ok(())
    }
}

impl Hystart {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,

            state: if enabled { State::Armed } else { State::Disabled },

            round: 0,

            last_round_min_rtt: Duration::MAX,

            current_round_min_rtt: Duration::MAX,

            rtt_sample_count: 0,

            low_rtt_flight: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub fn in_css(&self) -> bool {
        matches!(self.state, State::InCss(_))
    }

    fn enough_samples(&self) -> bool {
        self.rtt_sample_count >= N_RTT_SAMPLE &&
            self.current_round_min_rtt != Duration::MAX &&
            self.last_round_min_rtt != Duration::MAX
    }

    // clamp(MIN_RTT_THRESH, last_round_min_rtt / MIN_RTT_DIVISOR,
    // MAX_RTT_THRESH)
    fn rtt_thresh(&self) -> Duration {
        (self.last_round_min_rtt / MIN_RTT_DIVISOR)
            .clamp(MIN_RTT_THRESH, MAX_RTT_THRESH)
    }

    /// Takes an RTT sample into account. Returns true if a Conservative Slow
    /// Start phase turned out to be a false positive and was abandoned.
    pub fn on_rtt_sample(
        &mut self, rtt: Duration, retransmit_count: u32, flight_size: usize,
    ) -> bool {
        if !self.enabled || retransmit_count > 1 {
            return false;
        }

        self.rtt_sample_count += 1;

        if rtt < self.current_round_min_rtt {
            self.current_round_min_rtt = rtt;
            self.low_rtt_flight = flight_size;
        }

        if let State::InCss(css) = self.state {
            if self.enough_samples() &&
                self.current_round_min_rtt < css.baseline_min_rtt
            {
                // Back to Slow Start.
                self.state = State::Armed;

                return true;
            }
        }

        false
    }

    /// Starts a new round. Returns the slow start threshold to apply if
    /// Conservative Slow Start has lasted long enough to be confirmed.
    pub fn on_new_round(
        &mut self, round: u64, cwnd: usize, policy: HystartExit,
    ) -> Option<usize> {
        self.last_round_min_rtt = self.current_round_min_rtt;
        self.current_round_min_rtt = Duration::MAX;
        self.rtt_sample_count = 0;
        self.round = round;

        let css = match self.state {
            State::InCss(css) => css,

            _ => return None,
        };

        if round.saturating_sub(css.entry_round) < CSS_ROUNDS {
            return None;
        }

        self.state = State::Exited;

        let ssthresh = match policy {
            HystartExit::LowRttFlight => self.low_rtt_flight,

            HystartExit::Midpoint => (self.low_rtt_flight + css.entry_flight) / 2,

            // Just below the window, so that the next ACK is already handled
            // by congestion avoidance.
            HystartExit::KeepWindow => cwnd.saturating_sub(1),
        };

        Some(ssthresh)
    }

    /// Checks whether slow start should turn conservative, right before the
    /// slow start increment is computed. Returns true if CSS was entered.
    pub fn on_slow_start(&mut self) -> bool {
        if self.state != State::Armed || !self.enough_samples() {
            return false;
        }

        if self.current_round_min_rtt <
            self.last_round_min_rtt.saturating_add(self.rtt_thresh())
        {
            return false;
        }

        self.state = State::InCss(Css {
            entry_round: self.round,
            entry_flight: self.low_rtt_flight,
            baseline_min_rtt: self.current_round_min_rtt,
        });

        true
    }

    // Return a cwnd increment during CSS (Conservative Slow Start).
    pub fn css_cwnd_inc(&self, inc: usize) -> usize {
        inc / CSS_GROWTH_DIVISOR
    }

    // A loss shows slow start overshot regardless of what HyStart++ thought.
    pub fn on_loss(&mut self) {
        if matches!(self.state, State::Armed | State::InCss(_)) {
            self.state = State::Disabled;
        }
    }

    // ECN and timeouts reduce the window without proving slow start
    // overshot. CSS is dropped but HyStart++ stays armed, and needs a fresh
    // round to compare against.
    pub fn on_window_reduction(&mut self) {
        if self.in_css() {
            self.state = State::Armed;
            self.last_round_min_rtt = Duration::MAX;
        }
    }

    // The window outgrew ssthresh while CSS was still being validated.
    pub fn on_congestion_avoidance(&mut self) {
        if self.in_css() {
            self.state = State::Disabled;
        }
    }

    /// Re-arms HyStart++ after an idle period, unless it was switched off by
    /// configuration or by a confirmed exit to congestion avoidance.
    pub fn on_idle(&mut self) -> bool {
        if !self.enabled || self.state == State::Exited {
            return false;
        }

        self.state = State::Armed;

        self.last_round_min_rtt = Duration::MAX;
        self.current_round_min_rtt = Duration::MAX;
        self.rtt_sample_count = 0;

        true
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const FLIGHT: usize = 12000;

    fn round_of(hspp: &mut Hystart, rtt: Duration, flight: usize) {
        for _ in 0..N_RTT_SAMPLE {
            hspp.on_rtt_sample(rtt, 0, flight);
        }
    }

    // Two rounds where the second one's minimum RTT is inflated enough to
    // enter CSS at round 2.
    fn enter_css(hspp: &mut Hystart) {
        hspp.on_new_round(1, FLIGHT, HystartExit::LowRttFlight);
        round_of(hspp, Duration::from_millis(50), FLIGHT);

        hspp.on_new_round(2, FLIGHT, HystartExit::LowRttFlight);
        round_of(hspp, Duration::from_millis(70), 2 * FLIGHT);

        assert!(hspp.on_slow_start());
    }

    #[test]
    fn new_round_rolls_min_rtt() {
        let mut hspp = Hystart::new(true);

        round_of(&mut hspp, Duration::from_millis(30), FLIGHT);
        assert_eq!(hspp.current_round_min_rtt, Duration::from_millis(30));

        assert_eq!(hspp.on_new_round(1, FLIGHT, HystartExit::Midpoint), None);

        assert_eq!(hspp.last_round_min_rtt, Duration::from_millis(30));
        assert_eq!(hspp.current_round_min_rtt, Duration::MAX);
        assert_eq!(hspp.rtt_sample_count, 0);
        assert_eq!(hspp.round, 1);
    }

    #[rstest]
    #[case(Duration::from_millis(8), MIN_RTT_THRESH)]
    #[case(Duration::from_millis(80), Duration::from_millis(10))]
    #[case(Duration::from_millis(800), MAX_RTT_THRESH)]
    fn rtt_thresh_is_clamped(#[case] last: Duration, #[case] thresh: Duration) {
        let mut hspp = Hystart::new(true);
        hspp.last_round_min_rtt = last;

        assert_eq!(hspp.rtt_thresh(), thresh);
    }

    #[test]
    fn css_needs_enough_samples() {
        let mut hspp = Hystart::new(true);

        hspp.on_new_round(1, FLIGHT, HystartExit::LowRttFlight);
        round_of(&mut hspp, Duration::from_millis(50), FLIGHT);
        hspp.on_new_round(2, FLIGHT, HystartExit::LowRttFlight);

        for _ in 0..N_RTT_SAMPLE - 1 {
            hspp.on_rtt_sample(Duration::from_millis(100), 0, FLIGHT);
            assert!(!hspp.on_slow_start());
        }

        hspp.on_rtt_sample(Duration::from_millis(100), 0, FLIGHT);
        assert!(hspp.on_slow_start());
    }

    #[test]
    fn small_rtt_increase_stays_in_slow_start() {
        let mut hspp = Hystart::new(true);

        hspp.on_new_round(1, FLIGHT, HystartExit::LowRttFlight);
        round_of(&mut hspp, Duration::from_millis(50), FLIGHT);

        // 6ms is below the 50ms / 8 threshold.
        hspp.on_new_round(2, FLIGHT, HystartExit::LowRttFlight);
        round_of(&mut hspp, Duration::from_millis(56), FLIGHT);

        assert!(!hspp.on_slow_start());
        assert_eq!(hspp.state(), State::Armed);
    }

    #[test]
    fn enter_css_records_entry() {
        let mut hspp = Hystart::new(true);

        enter_css(&mut hspp);

        assert_eq!(
            hspp.state(),
            State::InCss(Css {
                entry_round: 2,
                entry_flight: 2 * FLIGHT,
                baseline_min_rtt: Duration::from_millis(70),
            })
        );

        // Already in CSS.
        assert!(!hspp.on_slow_start());
    }

    #[test]
    fn css_false_positive() {
        let mut hspp = Hystart::new(true);

        enter_css(&mut hspp);

        hspp.on_new_round(3, FLIGHT, HystartExit::LowRttFlight);

        let mut exited = false;
        for _ in 0..N_RTT_SAMPLE {
            exited |= hspp.on_rtt_sample(Duration::from_millis(60), 0, FLIGHT);
        }

        assert!(exited);
        assert_eq!(hspp.state(), State::Armed);
    }

    #[test]
    fn ambiguous_samples_are_ignored() {
        let mut hspp = Hystart::new(true);

        for _ in 0..N_RTT_SAMPLE {
            hspp.on_rtt_sample(Duration::from_millis(10), 2, FLIGHT);
        }

        assert_eq!(hspp.rtt_sample_count, 0);
        assert_eq!(hspp.current_round_min_rtt, Duration::MAX);

        hspp.on_rtt_sample(Duration::from_millis(10), 1, FLIGHT);
        assert_eq!(hspp.rtt_sample_count, 1);
    }

    #[rstest]
    #[case(HystartExit::LowRttFlight, FLIGHT)]
    #[case(HystartExit::Midpoint, (FLIGHT + 2 * FLIGHT) / 2)]
    #[case(HystartExit::KeepWindow, 5 * FLIGHT - 1)]
    fn css_confirmed(#[case] policy: HystartExit, #[case] ssthresh: usize) {
        let mut hspp = Hystart::new(true);

        enter_css(&mut hspp);

        for round in 3..2 + CSS_ROUNDS {
            assert_eq!(hspp.on_new_round(round, 5 * FLIGHT, policy), None);
            round_of(&mut hspp, Duration::from_millis(70), FLIGHT);
        }

        assert_eq!(
            hspp.on_new_round(2 + CSS_ROUNDS, 5 * FLIGHT, policy),
            Some(ssthresh)
        );
        assert_eq!(hspp.state(), State::Exited);

        // A confirmed exit is never re-armed.
        assert!(!hspp.on_idle());
        assert_eq!(hspp.state(), State::Exited);
    }

    #[test]
    fn loss_disables_until_idle() {
        let mut hspp = Hystart::new(true);

        enter_css(&mut hspp);

        hspp.on_loss();
        assert_eq!(hspp.state(), State::Disabled);
        assert!(!hspp.on_slow_start());

        assert!(hspp.on_idle());
        assert_eq!(hspp.state(), State::Armed);
        assert_eq!(hspp.last_round_min_rtt, Duration::MAX);
    }

    #[test]
    fn window_reduction_drops_css() {
        let mut hspp = Hystart::new(true);

        enter_css(&mut hspp);

        hspp.on_window_reduction();
        assert_eq!(hspp.state(), State::Armed);
        assert!(!hspp.on_slow_start());

        // Outside CSS there is nothing to drop.
        hspp.on_loss();
        hspp.on_window_reduction();
        assert_eq!(hspp.state(), State::Disabled);
    }

    #[test]
    fn css_into_congestion_avoidance_disables() {
        let mut hspp = Hystart::new(true);

        enter_css(&mut hspp);

        hspp.on_congestion_avoidance();
        assert_eq!(hspp.state(), State::Disabled);
    }

    #[test]
    fn disabled_by_config() {
        let mut hspp = Hystart::new(false);

        round_of(&mut hspp, Duration::from_millis(50), FLIGHT);
        assert_eq!(hspp.rtt_sample_count, 0);

        assert!(!hspp.on_slow_start());
        assert!(!hspp.on_idle());
        assert_eq!(hspp.state(), State::Disabled);
    }

    #[test]
    fn css_cwnd_inc() {
        let hspp = Hystart::new(true);
        let datagram_size = 1200;

        assert_eq!(hspp.css_cwnd_inc(datagram_size), 300);
    }
}
