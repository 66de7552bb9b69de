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

//! Thin typed wrapper over the MQTT client and event loop.
//!
//! Tracks the packet ids of in-flight QoS > 0 publishes and subscribes from the event loop
//! notifications, so the connection state machine can wait for the handshake messages to settle.

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use rumqttc::{Event, Outgoing, Packet, QoS, SubscribeReasonCode};
use tokio::sync::Mutex;
use tracing::{debug, error, trace};

use crate::error::Error;
use crate::interface::MappingPath;
use crate::{AsyncClient, EventLoop};

/// The `<realm>/<device_id>` pair identifying the device on the broker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClientId<S = String> {
    pub(crate) realm: S,
    pub(crate) device_id: S,
}

impl ClientId<String> {
    pub(crate) fn as_ref(&self) -> ClientId<&str> {
        ClientId {
            realm: &self.realm,
            device_id: &self.device_id,
        }
    }
}

impl<S: Display> Display for ClientId<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.realm, self.device_id)
    }
}

/// Event surfaced to the connection state machine by a poll.
#[derive(Debug)]
pub(crate) enum MqttPollEvent {
    /// CONNACK received, the MQTT session is established.
    ConnAck {
        /// Whether the broker resumed the previous session.
        session_present: bool,
    },
    /// An inbound publish on one of the subscribed topics.
    Publish {
        /// Full topic of the publish.
        topic: String,
        /// Raw payload.
        payload: Bytes,
    },
    /// A subscription request was denied by the broker.
    SubAckFailure,
    /// The client sent its DISCONNECT packet.
    Disconnected,
    /// Bookkeeping only, nothing for the state machine.
    Other,
}

#[derive(Debug, Default)]
struct PendingAcks {
    publishes: HashSet<u16>,
    subscribes: HashSet<u16>,
}

impl PendingAcks {
    fn is_empty(&self) -> bool {
        self.publishes.is_empty() && self.subscribes.is_empty()
    }

    fn clear(&mut self) {
        self.publishes.clear();
        self.subscribes.clear();
    }
}

pub(crate) struct SharedMqtt {
    eventloop: Mutex<EventLoop>,
    pending: StdMutex<PendingAcks>,
}

/// Wrapper over the MQTT client, cloneable so the send functions don't contend with the poll
/// loop.
pub(crate) struct Mqtt {
    client_id: ClientId,
    shared: Arc<SharedMqtt>,
    client: AsyncClient,
}

impl Clone for Mqtt {
    fn clone(&self) -> Self {
        Self {
            client_id: self.client_id.clone(),
            shared: Arc::clone(&self.shared),
            client: self.client.clone(),
        }
    }
}

impl Mqtt {
    pub(crate) fn new(
        realm: String,
        device_id: String,
        eventloop: EventLoop,
        client: AsyncClient,
    ) -> Self {
        Self {
            client_id: ClientId { realm, device_id },
            shared: Arc::new(SharedMqtt {
                eventloop: Mutex::new(eventloop),
                pending: StdMutex::new(PendingAcks::default()),
            }),
            client,
        }
    }

    pub(crate) fn client_id(&self) -> ClientId<&str> {
        self.client_id.as_ref()
    }

    /// Base topic of the device, `<realm>/<device_id>`.
    pub(crate) fn base_topic(&self) -> String {
        self.client_id.to_string()
    }

    pub(crate) fn control_consumer_properties_topic(&self) -> String {
        format!("{}/control/consumer/properties", self.client_id)
    }

    pub(crate) fn empty_cache_topic(&self) -> String {
        format!("{}/control/emptyCache", self.client_id)
    }

    /// Wildcard topic to receive every path of a server owned interface.
    pub(crate) fn server_interface_topic(&self, interface_name: &str) -> String {
        format!("{}/{}/#", self.client_id, interface_name)
    }

    /// Polls the event loop with a deadline.
    ///
    /// Returns [`Error::Timeout`] when nothing happens within the deadline, so the caller can run
    /// its periodic work and poll again.
    pub(crate) async fn poll(&self, timeout: Duration) -> Result<MqttPollEvent, Error> {
        let mut eventloop = self.shared.eventloop.lock().await;

        match tokio::time::timeout(timeout, eventloop.poll()).await {
            Err(_elapsed) => Err(Error::Timeout),
            Ok(Err(err)) => Err(Error::Connection(err)),
            Ok(Ok(event)) => Ok(self.handle_event(event)),
        }
    }

    fn handle_event(&self, event: Event) -> MqttPollEvent {
        match event {
            Event::Incoming(Packet::ConnAck(connack)) => {
                debug!("CONNACK session_present={}", connack.session_present);
                // Packet ids restart with the session.
                self.pending().clear();

                MqttPollEvent::ConnAck {
                    session_present: connack.session_present,
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                debug!("incoming publish on {}", publish.topic);

                MqttPollEvent::Publish {
                    topic: publish.topic,
                    payload: publish.payload,
                }
            }
            Event::Incoming(Packet::SubAck(suback)) => {
                self.pending().subscribes.remove(&suback.pkid);

                let failed = suback
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));

                if failed {
                    error!("subscription request has been denied");
                    return MqttPollEvent::SubAckFailure;
                }

                MqttPollEvent::Other
            }
            Event::Incoming(Packet::PubAck(ack)) => {
                self.pending().publishes.remove(&ack.pkid);

                MqttPollEvent::Other
            }
            Event::Incoming(Packet::PubComp(comp)) => {
                self.pending().publishes.remove(&comp.pkid);

                MqttPollEvent::Other
            }
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                // QoS 0 publishes have no packet id and nothing to wait for.
                if pkid != 0 {
                    self.pending().publishes.insert(pkid);
                }

                MqttPollEvent::Other
            }
            Event::Outgoing(Outgoing::Subscribe(pkid)) => {
                self.pending().subscribes.insert(pkid);

                MqttPollEvent::Other
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                debug!("DISCONNECT sent");

                MqttPollEvent::Disconnected
            }
            event => {
                trace!("MQTT event {event:?}");

                MqttPollEvent::Other
            }
        }
    }

    /// True while a QoS > 0 publish or a subscribe is still unacknowledged.
    pub(crate) fn has_pending_outgoing(&self) -> bool {
        !self.pending().is_empty()
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, PendingAcks> {
        // The lock is only held for map operations, poisoning means a panic mid-insert.
        self.shared
            .pending
            .lock()
            .expect("pending acks lock poisoned")
    }

    pub(crate) async fn subscribe(&self, topic: String, qos: QoS) -> Result<(), Error> {
        debug!("subscribing to {topic}");

        self.client.subscribe(topic, qos).await.map_err(Error::from)
    }

    pub(crate) async fn publish(
        &self,
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), Error> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(Error::from)
    }

    /// Publishes a payload on a data topic of the device.
    pub(crate) async fn publish_data(
        &self,
        interface_name: &str,
        path: &MappingPath<'_>,
        qos: QoS,
        payload: Vec<u8>,
    ) -> Result<(), Error> {
        let topic = format!("{}/{}{}", self.client_id, interface_name, path);

        debug!("publishing {} bytes on {topic}", payload.len());

        self.publish(topic, qos, false, payload).await
    }

    pub(crate) async fn disconnect(&self) -> Result<(), Error> {
        self.client.disconnect().await.map_err(Error::from)
    }
}
