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

//! Per-epoch RTT statistics.
//!
//! CUBIC's TCP-friendly estimate is driven by the mean RTT of the previous
//! congestion epoch rather than by the minimum, so that a path dominated by
//! queueing delay does not make `W_est` grow faster than a competing Reno
//! flow would.

use std::time::Duration;

/// Number of RTT observations ignored before the tracker starts recording.
pub(crate) const MIN_RTT_SAMPLES: usize = 8;

// Smallest RTT the tracker will ever report.
const MIN_RTT_FLOOR: Duration = Duration::from_micros(1);

#[derive(Debug, Default)]
pub(crate) struct RttTracker {
    min_rtt: Option<Duration>,

    mean_rtt: Option<Duration>,

    sum_rtt: Duration,

    sample_count: u32,

    observed: usize,
}

impl RttTracker {
    /// Records the transport's smoothed RTT.
    pub(crate) fn record_rtt(&mut self, srtt: Duration) {
        self.observed = self.observed.saturating_add(1);

        if self.observed < MIN_RTT_SAMPLES {
            return;
        }

        let srtt = srtt.max(MIN_RTT_FLOOR);

        if self.min_rtt.map_or(true, |min_rtt| srtt < min_rtt) {
            self.min_rtt = Some(srtt);

            // Prime the mean until the first epoch average is available.
            if self.mean_rtt.map_or(true, |mean_rtt| srtt > mean_rtt) {
                self.mean_rtt = Some(srtt);
            }
        }

        self.sum_rtt = self.sum_rtt.saturating_add(srtt);
        self.sample_count = self.sample_count.saturating_add(1);
    }

    /// Closes the current congestion epoch, folding its samples into the
    /// mean RTT.
    pub(crate) fn end_epoch(&mut self) {
        if self.sample_count > 0 {
            self.mean_rtt = Some(self.sum_rtt / self.sample_count);
        }

        self.sum_rtt = Duration::ZERO;
        self.sample_count = 0;
    }

    pub(crate) fn min_rtt(&self) -> Option<Duration> {
        self.min_rtt
    }

    pub(crate) fn mean_rtt(&self) -> Option<Duration> {
        self.mean_rtt
    }

    pub(crate) fn is_known(&self) -> bool {
        self.min_rtt.is_some()
    }
}
