// This file is part of Astarte.
//
// Copyright 2024 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Full jitter exponential backoff for the handshake retries.

use std::time::Duration;

use rand::Rng;

/// Backoff context for the reconnection attempts.
///
/// Every draw is uniform in `[0, min(max, initial * 2^attempt)]`, so concurrent devices don't
/// retry in lockstep. The context is reset on each successful entry into the connected state.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempt: 0,
        }
    }

    /// Draws the delay for the next attempt and advances the exponent.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let exp = self
            .initial
            .saturating_mul(2_u32.saturating_pow(self.attempt));
        let cap = exp.min(self.max);

        self.attempt = self.attempt.saturating_add(1);

        let millis = rand::thread_rng().gen_range(0..=cap.as_millis() as u64);

        Duration::from_millis(millis)
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_within_the_growing_cap() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_millis(1000);
        let mut backoff = Backoff::new(initial, max);

        for attempt in 0..16 {
            let cap = initial
                .saturating_mul(2_u32.saturating_pow(attempt))
                .min(max);

            let delay = backoff.next_delay();
            assert!(
                delay <= cap,
                "attempt {attempt}: delay {delay:?} above cap {cap:?}"
            );
        }
    }

    #[test]
    fn reset_restarts_the_exponent() {
        let initial = Duration::from_millis(1);
        let max = Duration::from_millis(1 << 20);
        let mut backoff = Backoff::new(initial, max);

        for _ in 0..10 {
            backoff.next_delay();
        }

        backoff.reset();

        // With the exponent back at zero the cap is the initial delay again.
        let delay = backoff.next_delay();
        assert!(delay <= initial);
    }

    #[test]
    fn exponent_saturates_instead_of_overflowing() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));

        for _ in 0..100 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(60));
        }
    }
}
