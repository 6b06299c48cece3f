// Copyright (C) 2024, Cloudflare, Inc.
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

use std::ops::Deref;
use std::ops::DerefMut;
use std::time::Duration;
use std::time::Instant;

use crate::congestion::Congestion;
use crate::hystart;
use crate::rtt;
use crate::AckEvent;
use crate::Config;
use crate::CongestionInfo;
use crate::CongestionSignal;
use crate::RttSample;

pub(crate) const MSS: usize = 1200;

pub(crate) struct TestSender {
    cc: Congestion,
    pub(crate) time: Instant,
    pub(crate) round: u64,
}

impl TestSender {
    pub(crate) fn new(hystart: bool) -> Self {
        let mut cfg = Config::new();
        cfg.set_max_datagram_size(MSS);
        cfg.enable_hystart(hystart);

        Self::with_config(&cfg)
    }

    pub(crate) fn with_config(cfg: &Config) -> Self {
        TestSender {
            cc: Congestion::from_config(cfg).unwrap(),
            time: Instant::now(),
            round: 0,
        }
    }

    pub(crate) fn ack(&mut self, ack: AckEvent) {
        self.cc.on_ack(&ack, self.time);
    }

    pub(crate) fn ack_n_packets(&mut self, n: usize) {
        for _ in 0..n {
            let mss = self.cc.max_datagram_size;

            self.ack(AckEvent {
                bytes_acked: mss,
                segments_acked: 1,
                window_limited: true,
                ..Default::default()
            });
        }
    }

    pub(crate) fn lose(&mut self, signal: CongestionSignal) {
        let info = CongestionInfo {
            in_recovery: false,
            rto_count: 1,
            peer_window: usize::MAX,
            bytes_in_flight: self.cc.congestion_window,
        };

        self.cc.on_congestion_event(signal, &info, self.time);
    }

    // Leaves recovery with a full window in flight.
    pub(crate) fn recover(&mut self) {
        let bytes_in_flight = self.cc.congestion_window;

        self.cc.on_post_recovery(bytes_in_flight);
    }

    pub(crate) fn update_rtt(&mut self, rtt: Duration) {
        let flight_size = self.cc.congestion_window;

        self.cc.on_rtt_sample(&RttSample {
            latest_rtt: rtt,
            smoothed_rtt: rtt,
            retransmit_count: 0,
            flight_size,
        });
    }

    // Feeds enough samples for the RTT tracker to start reporting.
    pub(crate) fn bootstrap_rtt(&mut self, rtt: Duration) {
        for _ in 0..rtt::MIN_RTT_SAMPLES {
            self.update_rtt(rtt);
        }
    }

    pub(crate) fn sample_round(&mut self, rtt: Duration) {
        for _ in 0..hystart::N_RTT_SAMPLE {
            self.update_rtt(rtt);
        }
    }

    pub(crate) fn next_round(&mut self) {
        self.round += 1;

        self.cc.on_new_round(self.round, self.time);
    }

    // Two rounds with a clear RTT increase, then one ACK to enter CSS.
    pub(crate) fn enter_css(&mut self) {
        self.next_round();
        self.sample_round(Duration::from_millis(50));

        self.next_round();
        self.sample_round(Duration::from_millis(70));

        self.ack_n_packets(1);

        assert!(self.cc.in_css());
    }

    pub(crate) fn advance_time(&mut self, period: Duration) {
        self.time += period;
    }
}

impl Deref for TestSender {
    type Target = Congestion;

    fn deref(&self) -> &Self::Target {
        &self.cc
    }
}

impl DerefMut for TestSender {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.cc
    }
}
