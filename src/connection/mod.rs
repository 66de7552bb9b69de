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

//! Connection state machine data and the MQTT transport wrapper.

pub(crate) mod mqtt;
pub mod topic;

use std::time::Duration;

use tokio::time::Instant;

use crate::retry::Backoff;

/// First reconnection delay cap after a failed handshake.
pub(crate) const RECONNECTION_BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Largest reconnection delay cap.
pub(crate) const RECONNECTION_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// States of the device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No MQTT connection.
    Disconnected,
    /// Waiting for the CONNACK of the MQTT session.
    MqttConnecting,
    /// MQTT session established, the Astarte handshake has to run.
    StartHandshake,
    /// Subscriptions, introspection and empty-cache sent, waiting for the acks.
    EndHandshake,
    /// The handshake failed, a retry is scheduled with backoff.
    HandshakeError,
    /// Handshake completed, data can flow.
    Connected,
}

/// Mutable state of the connection state machine.
#[derive(Debug)]
pub(crate) struct Fsm {
    pub(crate) state: ConnectionState,
    /// Session present flag of the last CONNACK.
    pub(crate) session_present: bool,
    /// Set when the broker denies one of the handshake subscriptions.
    pub(crate) subscription_failure: bool,
    /// The user requested the disconnection, the poll loop should wind down.
    pub(crate) closed: bool,
    backoff: Backoff,
    retry_at: Instant,
}

impl Fsm {
    pub(crate) fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            session_present: false,
            subscription_failure: false,
            closed: false,
            backoff: Backoff::new(RECONNECTION_BACKOFF_INITIAL, RECONNECTION_BACKOFF_MAX),
            retry_at: Instant::now(),
        }
    }

    /// Transitions into [`ConnectionState::Connected`], rearming the backoff context.
    pub(crate) fn enter_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.backoff.reset();
        self.retry_at = Instant::now();
    }

    /// Runner tick for [`ConnectionState::HandshakeError`].
    ///
    /// Once the backoff deadline passes the handshake is retried and the next deadline armed.
    pub(crate) fn handshake_error_tick(&mut self) {
        if Instant::now() < self.retry_at {
            return;
        }

        self.state = ConnectionState::StartHandshake;

        let delay = self.backoff.next_delay();
        self.retry_at = Instant::now() + delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_error_retries_immediately_the_first_time() {
        let mut fsm = Fsm::new();
        fsm.state = ConnectionState::HandshakeError;

        fsm.handshake_error_tick();

        assert_eq!(fsm.state, ConnectionState::StartHandshake);
    }

    #[test]
    fn handshake_error_waits_for_the_deadline() {
        let mut fsm = Fsm::new();
        fsm.state = ConnectionState::HandshakeError;
        fsm.retry_at = Instant::now() + Duration::from_secs(60);

        fsm.handshake_error_tick();

        assert_eq!(fsm.state, ConnectionState::HandshakeError);
    }

    #[test]
    fn entering_connected_rearms_the_deadline() {
        let mut fsm = Fsm::new();
        fsm.state = ConnectionState::HandshakeError;
        fsm.retry_at = Instant::now() + Duration::from_secs(60);

        fsm.enter_connected();
        assert_eq!(fsm.state, ConnectionState::Connected);

        // A later handshake failure retries without waiting for the stale deadline.
        fsm.state = ConnectionState::HandshakeError;
        fsm.handshake_error_tick();
        assert_eq!(fsm.state, ConnectionState::StartHandshake);
    }
}
