// This file is part of Astarte.
//
// Copyright 2024 - 2025 SECO Mind Srl
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

//! The Astarte device: connection state machine, inbound dispatch and the send functions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::QoS;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace};

use crate::connection::mqtt::{Mqtt, MqttPollEvent};
use crate::connection::topic::ParsedTopic;
use crate::connection::{ConnectionState, Fsm};
use crate::error::Error;
use crate::interface::{Aggregation, Interface, InterfaceError, Mapping, MappingPath};
use crate::interfaces::Interfaces;
use crate::payload;
use crate::store::{CacheCheck, IntrospectionCache};
use crate::types::{AstarteData, TypeError};
use crate::{DeviceEvent, EventSender, Timestamp, Value};

/// Payload of the empty-cache control message.
const EMPTY_CACHE_PAYLOAD: &[u8] = b"1";

pub(crate) struct SharedDevice<S> {
    interfaces: Interfaces,
    cache: S,
    fsm: Mutex<Fsm>,
    tx: EventSender,
    /// Poll deadline while waiting for the CONNACK or the handshake.
    connection_timeout: Duration,
    /// Poll deadline in steady state.
    connected_timeout: Duration,
}

/// An Astarte device.
///
/// Cloning is cheap, every clone shares the same connection: the poll loop can run on a dedicated
/// task while other tasks send data.
pub struct AstarteDevice<S> {
    connection: Mqtt,
    shared: Arc<SharedDevice<S>>,
}

impl<S> Clone for AstarteDevice<S> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> std::fmt::Debug for AstarteDevice<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AstarteDevice").finish_non_exhaustive()
    }
}

impl<S> AstarteDevice<S>
where
    S: IntrospectionCache,
{
    pub(crate) fn new(
        interfaces: Interfaces,
        cache: S,
        connection: Mqtt,
        tx: EventSender,
        connection_timeout: Duration,
        connected_timeout: Duration,
    ) -> Self {
        Self {
            connection,
            shared: Arc::new(SharedDevice {
                interfaces,
                cache,
                fsm: Mutex::new(Fsm::new()),
                tx,
                connection_timeout,
                connected_timeout,
            }),
        }
    }

    /// Current state of the connection state machine.
    pub async fn connection_state(&self) -> ConnectionState {
        self.shared.fsm.lock().await.state
    }

    /// Starts connecting the device.
    ///
    /// The MQTT session is established by the poll loop, this only arms the state machine.
    pub async fn connect(&self) -> Result<(), Error> {
        let mut fsm = self.shared.fsm.lock().await;

        match fsm.state {
            ConnectionState::MqttConnecting
            | ConnectionState::StartHandshake
            | ConnectionState::EndHandshake => Err(Error::AlreadyConnecting),
            ConnectionState::Connected => Err(Error::AlreadyConnected),
            ConnectionState::Disconnected | ConnectionState::HandshakeError => {
                debug!("device connection state -> MQTT_CONNECTING");
                fsm.closed = false;
                fsm.state = ConnectionState::MqttConnecting;

                Ok(())
            }
        }
    }

    /// Disconnects from the broker.
    ///
    /// The state machine reaches [`ConnectionState::Disconnected`] once the poll loop observes
    /// the outgoing DISCONNECT.
    pub async fn disconnect(&self) -> Result<(), Error> {
        let mut fsm = self.shared.fsm.lock().await;

        if fsm.state == ConnectionState::Disconnected {
            error!("disconnection request for a disconnected device will be ignored");
            return Err(Error::DeviceNotReady);
        }

        fsm.closed = true;
        drop(fsm);

        self.connection.disconnect().await
    }

    /// One cooperative tick of the device.
    ///
    /// Polls the MQTT event loop with the state dependent deadline, handles the event and runs
    /// the state machine. Returns [`Error::Timeout`] when nothing happened within the deadline,
    /// which is benign in a poll loop.
    pub async fn poll(&self) -> Result<(), Error> {
        let (state, closed) = {
            let fsm = self.shared.fsm.lock().await;
            (fsm.state, fsm.closed)
        };

        let timeout = if state == ConnectionState::Connected {
            self.shared.connected_timeout
        } else {
            self.shared.connection_timeout
        };

        if state == ConnectionState::Disconnected {
            if closed {
                return Err(Error::DeviceNotReady);
            }

            // Nothing drives the socket before connect() is called.
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout);
        }

        match self.connection.poll(timeout).await {
            Ok(event) => self.handle_poll_event(event).await?,
            Err(Error::Timeout) => {
                self.run_state_machine().await?;
                return Err(Error::Timeout);
            }
            Err(err @ Error::Connection(_)) => {
                self.on_connection_error().await;
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        self.run_state_machine().await
    }

    /// Runs the device until it is disconnected by [`disconnect`](Self::disconnect).
    ///
    /// Poll timeouts are benign and connection errors are retried by the MQTT client, everything
    /// else is fatal and returned.
    pub async fn handle_events(&self) -> Result<(), Error> {
        loop {
            match self.poll().await {
                Ok(()) | Err(Error::Timeout) => {}
                Err(Error::Connection(err)) => {
                    error!("couldn't poll the event loop: {err:#?}");

                    // The event loop redials at the next poll, don't spin while it fails.
                    tokio::time::sleep(self.shared.connection_timeout).await;
                }
                Err(Error::DeviceNotReady) => return Ok(()),
                Err(err) => return Err(err),
            }

            let fsm = self.shared.fsm.lock().await;
            if fsm.closed && fsm.state == ConnectionState::Disconnected {
                return Ok(());
            }
        }
    }

    async fn handle_poll_event(&self, event: MqttPollEvent) -> Result<(), Error> {
        match event {
            MqttPollEvent::ConnAck { session_present } => {
                let mut fsm = self.shared.fsm.lock().await;

                debug!("device connection state -> START_HANDSHAKE");
                fsm.state = ConnectionState::StartHandshake;
                fsm.session_present = session_present;
            }
            MqttPollEvent::SubAckFailure => {
                self.shared.fsm.lock().await.subscription_failure = true;
            }
            MqttPollEvent::Publish { topic, payload } => {
                self.dispatch(&topic, &payload).await;
            }
            MqttPollEvent::Disconnected => self.on_disconnected().await,
            MqttPollEvent::Other => {}
        }

        Ok(())
    }

    async fn on_disconnected(&self) {
        let mut fsm = self.shared.fsm.lock().await;

        let was_connected = fsm.state == ConnectionState::Connected;

        debug!("device connection state -> DISCONNECTED");
        fsm.state = ConnectionState::Disconnected;
        drop(fsm);

        if was_connected {
            self.send_event(DeviceEvent::Disconnected).await;
        }
    }

    /// The event loop failed, the next poll redials unless the user closed the device.
    async fn on_connection_error(&self) {
        let mut fsm = self.shared.fsm.lock().await;

        let was_connected = fsm.state == ConnectionState::Connected;

        fsm.state = if fsm.closed {
            ConnectionState::Disconnected
        } else {
            ConnectionState::MqttConnecting
        };
        drop(fsm);

        if was_connected {
            self.send_event(DeviceEvent::Disconnected).await;
        }
    }

    async fn run_state_machine(&self) -> Result<(), Error> {
        let mut fsm = self.shared.fsm.lock().await;

        match fsm.state {
            ConnectionState::Disconnected | ConnectionState::MqttConnecting => Ok(()),
            ConnectionState::StartHandshake => self.start_handshake(&mut fsm).await,
            ConnectionState::EndHandshake => self.end_handshake(&mut fsm).await,
            ConnectionState::HandshakeError => {
                fsm.handshake_error_tick();
                Ok(())
            }
            ConnectionState::Connected => Ok(()),
        }
    }

    async fn start_handshake(&self, fsm: &mut Fsm) -> Result<(), Error> {
        let introspection = self.shared.interfaces.get_introspection_string();

        // Session resumed with an unchanged introspection, the whole handshake can be skipped.
        if fsm.session_present {
            match self.shared.cache.check(&introspection).await {
                Ok(CacheCheck::Current) => {
                    debug!("introspection unchanged, device connection state -> CONNECTED");
                    fsm.enter_connected();

                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => debug!("introspection cache check failed: {err}"),
            }
        }

        fsm.subscription_failure = false;

        self.setup_subscriptions().await?;

        debug!("publishing introspection: {introspection}");
        self.connection
            .publish(
                self.connection.base_topic(),
                QoS::ExactlyOnce,
                false,
                introspection.into_bytes(),
            )
            .await?;

        debug!("sending emptyCache");
        self.connection
            .publish(
                self.connection.empty_cache_topic(),
                QoS::ExactlyOnce,
                false,
                EMPTY_CACHE_PAYLOAD.to_vec(),
            )
            .await?;

        debug!("device connection state -> END_HANDSHAKE");
        fsm.state = ConnectionState::EndHandshake;

        Ok(())
    }

    async fn setup_subscriptions(&self) -> Result<(), Error> {
        self.connection
            .subscribe(
                self.connection.control_consumer_properties_topic(),
                QoS::ExactlyOnce,
            )
            .await?;

        let server_interfaces = self
            .shared
            .interfaces
            .iter()
            .filter(|interface| interface.ownership().is_server());

        for interface in server_interfaces {
            self.connection
                .subscribe(
                    self.connection
                        .server_interface_topic(interface.interface_name()),
                    QoS::ExactlyOnce,
                )
                .await?;
        }

        Ok(())
    }

    async fn end_handshake(&self, fsm: &mut Fsm) -> Result<(), Error> {
        if fsm.subscription_failure {
            error!("subscription request has been denied");
            debug!("device connection state -> HANDSHAKE_ERROR");
            fsm.state = ConnectionState::HandshakeError;

            return Ok(());
        }

        if self.connection.has_pending_outgoing() {
            return Ok(());
        }

        let introspection = self.shared.interfaces.get_introspection_string();
        match self.shared.cache.check(&introspection).await {
            Ok(CacheCheck::Current) => {}
            Ok(_) => {
                debug!("introspection requires updating");
                if let Err(err) = self.shared.cache.store(&introspection).await {
                    debug!("introspection update failed: {err}");
                }
            }
            Err(err) => debug!("introspection cache check failed: {err}"),
        }

        info!("device connected");
        fsm.enter_connected();

        self.send_event(DeviceEvent::Connected {
            session_present: fsm.session_present,
        })
        .await;

        Ok(())
    }

    /// Routes an inbound publish.
    ///
    /// Errors on this path are logged and the message is dropped, a malformed publish must not
    /// take the device down.
    async fn dispatch(&self, topic: &str, payload: &[u8]) {
        let parsed = match ParsedTopic::try_parse(self.connection.client_id(), topic) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!("discarding publish: {err}");
                return;
            }
        };

        match parsed {
            ParsedTopic::Control { path } => {
                // TODO handle the consumer properties purge list.
                debug!("control message on {path} ignored");
            }
            ParsedTopic::InterfacePath { interface, path } => {
                self.dispatch_data(interface, path, payload).await;
            }
        }
    }

    async fn dispatch_data(&self, interface_name: &str, path: &str, payload: &[u8]) {
        let Some(interface) = self.shared.interfaces.get(interface_name) else {
            error!("discarding publish on unknown interface {interface_name}");
            return;
        };

        let mapping_path = match MappingPath::try_from(path) {
            Ok(mapping_path) => mapping_path,
            Err(err) => {
                error!("discarding publish with invalid path: {err}");
                return;
            }
        };

        if payload.is_empty() {
            self.dispatch_unset(interface, &mapping_path).await;
            return;
        }

        match interface.aggregation() {
            Aggregation::Individual => {
                let Some(mapping) = interface.mapping(&mapping_path) else {
                    error!("no mapping {path} in interface {interface_name}, publish discarded");
                    return;
                };

                match payload::deserialize_individual(mapping, payload) {
                    Ok((data, timestamp)) => {
                        self.send_event(DeviceEvent::Data {
                            interface: interface_name.to_string(),
                            path: path.to_string(),
                            value: Value::Individual(data),
                            timestamp,
                        })
                        .await;
                    }
                    Err(err) => {
                        error!("couldn't decode payload on {interface_name}{path}: {err}");
                    }
                }
            }
            Aggregation::Object => {
                match payload::deserialize_object(interface, &mapping_path, payload) {
                    Ok((entries, timestamp)) => {
                        self.send_event(DeviceEvent::Data {
                            interface: interface_name.to_string(),
                            path: path.to_string(),
                            value: Value::Object(entries),
                            timestamp,
                        })
                        .await;
                    }
                    Err(err) => {
                        error!("couldn't decode object on {interface_name}{path}: {err}");
                    }
                }
            }
        }
    }

    async fn dispatch_unset(&self, interface: &Interface, path: &MappingPath<'_>) {
        if !interface.is_properties() {
            error!(
                "empty payload on datastream interface {}, publish discarded",
                interface.interface_name()
            );
            return;
        }

        if interface.mapping(path).is_none() {
            error!(
                "no mapping {path} in interface {}, unset discarded",
                interface.interface_name()
            );
            return;
        }

        self.send_event(DeviceEvent::Unset {
            interface: interface.interface_name().to_string(),
            path: path.as_str().to_string(),
        })
        .await;
    }

    async fn send_event(&self, event: DeviceEvent) {
        trace!("device event {event:?}");

        if self.shared.tx.send(event).await.is_err() {
            debug!("device event receiver dropped, event discarded");
        }
    }

    /// Sends an individual datastream value.
    ///
    /// The timestamp is mandatory when the mapping declares `explicit_timestamp` and rejected
    /// when it doesn't.
    pub async fn send_individual(
        &self,
        interface_name: &str,
        path: &str,
        data: AstarteData,
        timestamp: Option<Timestamp>,
    ) -> Result<(), Error> {
        let mapping_path = MappingPath::try_from(path)?;
        let interface = self.interface(interface_name)?;

        if !interface.ownership().is_device() {
            return Err(Error::InvalidParam("interface is not device owned"));
        }

        if interface.is_properties() {
            return Err(Error::InvalidParam(
                "properties are sent with set_property",
            ));
        }

        if interface.aggregation() == Aggregation::Object {
            return Err(Error::InvalidParam(
                "object interfaces are sent with send_object",
            ));
        }

        let mapping = self.mapping(interface, &mapping_path)?;

        check_data_type(&data, mapping)?;
        check_timestamp(mapping.explicit_timestamp(), timestamp.is_some())?;

        let buf = payload::serialize_individual(&data, timestamp);

        self.connection
            .publish_data(
                interface_name,
                &mapping_path,
                mapping.reliability().into(),
                buf,
            )
            .await
    }

    /// Sends an object datastream.
    ///
    /// The path is the common parent of the entries, each entry key addresses the last endpoint
    /// level.
    pub async fn send_object(
        &self,
        interface_name: &str,
        path: &str,
        entries: HashMap<String, AstarteData>,
        timestamp: Option<Timestamp>,
    ) -> Result<(), Error> {
        let mapping_path = MappingPath::try_from(path)?;
        let interface = self.interface(interface_name)?;

        if !interface.ownership().is_device() {
            return Err(Error::InvalidParam("interface is not device owned"));
        }

        if interface.aggregation() != Aggregation::Object {
            return Err(Error::InvalidParam("interface is not object aggregated"));
        }

        for (key, value) in &entries {
            let full_path = format!("{path}/{key}");
            let entry_path = MappingPath::try_from(full_path.as_str())?;

            let mapping = self.mapping(interface, &entry_path)?;
            check_data_type(value, mapping)?;
        }

        check_timestamp(interface.object_explicit_timestamp(), timestamp.is_some())?;

        let buf = payload::serialize_object(&entries, timestamp);

        self.connection
            .publish_data(
                interface_name,
                &mapping_path,
                interface.object_reliability().into(),
                buf,
            )
            .await
    }

    /// Sets a device owned property.
    ///
    /// Properties are retained by Astarte and always published with a unique reliability.
    pub async fn set_property(
        &self,
        interface_name: &str,
        path: &str,
        data: AstarteData,
    ) -> Result<(), Error> {
        let mapping_path = MappingPath::try_from(path)?;
        let interface = self.properties_interface(interface_name)?;
        let mapping = self.mapping(interface, &mapping_path)?;

        check_data_type(&data, mapping)?;

        let buf = payload::serialize_individual(&data, None);

        self.connection
            .publish_data(interface_name, &mapping_path, QoS::ExactlyOnce, buf)
            .await
    }

    /// Unsets a device owned property, publishing a zero length payload.
    pub async fn unset_property(&self, interface_name: &str, path: &str) -> Result<(), Error> {
        let mapping_path = MappingPath::try_from(path)?;
        let interface = self.properties_interface(interface_name)?;
        let mapping = self.mapping(interface, &mapping_path)?;

        if !mapping.allow_unset() {
            return Err(Error::InvalidParam("mapping doesn't allow unset"));
        }

        self.connection
            .publish_data(interface_name, &mapping_path, QoS::ExactlyOnce, Vec::new())
            .await
    }

    fn interface(&self, name: &str) -> Result<&Interface, Error> {
        self.shared
            .interfaces
            .get(name)
            .ok_or_else(|| InterfaceError::InterfaceNotFound {
                name: name.to_string(),
            })
            .map_err(Error::from)
    }

    fn properties_interface(&self, name: &str) -> Result<&Interface, Error> {
        let interface = self.interface(name)?;

        if !interface.ownership().is_device() {
            return Err(Error::InvalidParam("interface is not device owned"));
        }

        if !interface.is_properties() {
            return Err(Error::InvalidParam("interface is not a properties one"));
        }

        Ok(interface)
    }

    fn mapping<'a>(
        &self,
        interface: &'a Interface,
        path: &MappingPath<'_>,
    ) -> Result<&'a Mapping, Error> {
        interface
            .mapping(path)
            .ok_or_else(|| InterfaceError::MappingNotFound {
                path: path.as_str().to_string(),
            })
            .map_err(Error::from)
    }
}

fn check_data_type(data: &AstarteData, mapping: &Mapping) -> Result<(), Error> {
    if data.mapping_type() != mapping.mapping_type() {
        return Err(TypeError::Mismatch {
            expected: mapping.mapping_type(),
            got: data.mapping_type(),
        }
        .into());
    }

    Ok(())
}

fn check_timestamp(explicit: bool, with_timestamp: bool) -> Result<(), Error> {
    if explicit && !with_timestamp {
        return Err(Error::InvalidParam("mapping requires an explicit timestamp"));
    }

    if !explicit && with_timestamp {
        return Err(Error::InvalidParam(
            "mapping doesn't take an explicit timestamp",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use mockall::predicate;
    use rumqttc::{ConnAck, ConnectReturnCode, Event, Packet};

    use crate::interface::{MappingType, Ownership, Reliability};
    use crate::store::MemoryCache;
    use crate::{AsyncClient, EventLoop, EventReceiver};
    use tokio::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn server_datastream() -> Interface {
        Interface::datastream_individual(
            "org.example.ServerDatastream",
            0,
            1,
            Ownership::Server,
            vec![Mapping::new("/value", MappingType::Boolean).unwrap()],
        )
        .unwrap()
    }

    fn device_datastream() -> Interface {
        Interface::datastream_individual(
            "org.example.DeviceDatastream",
            0,
            1,
            Ownership::Device,
            vec![
                Mapping::new("/unreliable", MappingType::Double).unwrap(),
                Mapping::new("/guaranteed", MappingType::Double)
                    .unwrap()
                    .with_reliability(Reliability::Guaranteed),
                Mapping::new("/unique", MappingType::Double)
                    .unwrap()
                    .with_reliability(Reliability::Unique),
                Mapping::new("/stamped", MappingType::Double)
                    .unwrap()
                    .with_explicit_timestamp(true),
            ],
        )
        .unwrap()
    }

    fn device_properties() -> Interface {
        Interface::properties(
            "org.example.Props",
            0,
            1,
            Ownership::Device,
            vec![
                Mapping::new("/x", MappingType::String)
                    .unwrap()
                    .with_allow_unset(true),
                Mapping::new("/pinned", MappingType::String).unwrap(),
            ],
        )
        .unwrap()
    }

    fn server_properties() -> Interface {
        Interface::properties(
            "org.example.ServerProps",
            0,
            1,
            Ownership::Server,
            vec![Mapping::new("/x", MappingType::String)
                .unwrap()
                .with_allow_unset(true)],
        )
        .unwrap()
    }

    fn mock_device(
        client: AsyncClient,
        eventloop: EventLoop,
        interfaces: Vec<Interface>,
        cache: MemoryCache,
    ) -> (AstarteDevice<MemoryCache>, EventReceiver) {
        let (tx, rx) = mpsc::channel(50);

        let mqtt = Mqtt::new("realm".to_string(), "device_id".to_string(), eventloop, client);
        let device = AstarteDevice::new(
            Interfaces::from_iter(interfaces).unwrap(),
            cache,
            mqtt,
            tx,
            TIMEOUT,
            TIMEOUT,
        );

        (device, rx)
    }

    fn connack(session_present: bool) -> Event {
        Event::Incoming(Packet::ConnAck(ConnAck {
            session_present,
            code: ConnectReturnCode::Success,
        }))
    }

    #[tokio::test]
    async fn first_boot_runs_the_full_handshake() {
        let mut eventloop = EventLoop::default();
        let mut seq = mockall::Sequence::new();
        eventloop
            .expect_poll()
            .once()
            .in_sequence(&mut seq)
            .returning(|| Ok(connack(false)));
        eventloop
            .expect_poll()
            .once()
            .in_sequence(&mut seq)
            .returning(|| Ok(Event::Incoming(Packet::PingResp)));

        let mut client = AsyncClient::default();
        client
            .expect_subscribe::<String>()
            .once()
            .with(
                predicate::eq("realm/device_id/control/consumer/properties".to_string()),
                predicate::eq(QoS::ExactlyOnce),
            )
            .returning(|_, _| Ok(()));
        client
            .expect_subscribe::<String>()
            .once()
            .with(
                predicate::eq("realm/device_id/org.example.ServerDatastream/#".to_string()),
                predicate::eq(QoS::ExactlyOnce),
            )
            .returning(|_, _| Ok(()));
        client
            .expect_publish::<String, Vec<u8>>()
            .once()
            .with(
                predicate::eq("realm/device_id".to_string()),
                predicate::eq(QoS::ExactlyOnce),
                predicate::eq(false),
                predicate::eq(
                    b"org.example.ServerDatastream:0:1;org.example.DeviceDatastream:0:1".to_vec(),
                ),
            )
            .returning(|_, _, _, _| Ok(()));
        client
            .expect_publish::<String, Vec<u8>>()
            .once()
            .with(
                predicate::eq("realm/device_id/control/emptyCache".to_string()),
                predicate::eq(QoS::ExactlyOnce),
                predicate::eq(false),
                predicate::eq(b"1".to_vec()),
            )
            .returning(|_, _, _, _| Ok(()));

        let (device, mut rx) = mock_device(
            client,
            eventloop,
            vec![server_datastream(), device_datastream()],
            MemoryCache::new(),
        );

        assert_eq!(
            device.connection_state().await,
            ConnectionState::Disconnected
        );

        device.connect().await.unwrap();
        assert_eq!(
            device.connection_state().await,
            ConnectionState::MqttConnecting
        );

        // CONNACK: StartHandshake runs and the handshake messages go out.
        device.poll().await.unwrap();
        assert_eq!(
            device.connection_state().await,
            ConnectionState::EndHandshake
        );

        // No pending acks on the mocked event loop, the handshake settles.
        device.poll().await.unwrap();
        assert_eq!(device.connection_state().await, ConnectionState::Connected);

        assert_eq!(
            rx.recv().await.unwrap(),
            DeviceEvent::Connected {
                session_present: false
            }
        );
    }

    #[tokio::test]
    async fn session_present_with_cached_introspection_skips_the_handshake() {
        let mut eventloop = EventLoop::default();
        eventloop
            .expect_poll()
            .once()
            .returning(|| Ok(connack(true)));

        // No subscribe or publish expectations: any handshake traffic panics the mock.
        let client = AsyncClient::default();

        let cache = MemoryCache::new();
        cache
            .store("org.example.ServerDatastream:0:1;org.example.DeviceDatastream:0:1")
            .await
            .unwrap();

        let (device, mut rx) = mock_device(
            client,
            eventloop,
            vec![server_datastream(), device_datastream()],
            cache,
        );

        device.connect().await.unwrap();
        device.poll().await.unwrap();

        assert_eq!(device.connection_state().await, ConnectionState::Connected);
        // The fast path fires no connection event.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn session_present_with_outdated_introspection_runs_the_handshake() {
        let mut eventloop = EventLoop::default();
        eventloop
            .expect_poll()
            .once()
            .returning(|| Ok(connack(true)));

        let mut client = AsyncClient::default();
        client
            .expect_subscribe::<String>()
            .returning(|_, _| Ok(()));
        client
            .expect_publish::<String, Vec<u8>>()
            .returning(|_, _, _, _| Ok(()));

        let cache = MemoryCache::new();
        cache.store("org.example.Old:0:1").await.unwrap();

        let (device, _rx) = mock_device(
            client,
            eventloop,
            vec![server_datastream()],
            cache,
        );

        device.connect().await.unwrap();
        device.poll().await.unwrap();

        assert_eq!(
            device.connection_state().await,
            ConnectionState::EndHandshake
        );
    }

    #[tokio::test]
    async fn connect_state_errors() {
        let (device, _rx) = mock_device(
            AsyncClient::default(),
            EventLoop::default(),
            vec![device_datastream()],
            MemoryCache::new(),
        );

        device.connect().await.unwrap();
        assert!(matches!(
            device.connect().await,
            Err(Error::AlreadyConnecting)
        ));
    }

    #[tokio::test]
    async fn disconnect_when_disconnected_is_not_ready() {
        let (device, _rx) = mock_device(
            AsyncClient::default(),
            EventLoop::default(),
            vec![device_datastream()],
            MemoryCache::new(),
        );

        assert!(matches!(
            device.disconnect().await,
            Err(Error::DeviceNotReady)
        ));
    }

    #[tokio::test]
    async fn qos_follows_the_mapping_reliability() {
        let cases = [
            ("/unreliable", QoS::AtMostOnce),
            ("/guaranteed", QoS::AtLeastOnce),
            ("/unique", QoS::ExactlyOnce),
        ];

        for (path, qos) in cases {
            let mut client = AsyncClient::default();
            client
                .expect_publish::<String, Vec<u8>>()
                .once()
                .with(
                    predicate::eq(format!(
                        "realm/device_id/org.example.DeviceDatastream{path}"
                    )),
                    predicate::eq(qos),
                    predicate::eq(false),
                    predicate::always(),
                )
                .returning(|_, _, _, _| Ok(()));

            let (device, _rx) = mock_device(
                client,
                EventLoop::default(),
                vec![device_datastream()],
                MemoryCache::new(),
            );

            device
                .send_individual(
                    "org.example.DeviceDatastream",
                    path,
                    AstarteData::Double(4.2),
                    None,
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn send_validation_errors() {
        let (device, _rx) = mock_device(
            AsyncClient::default(),
            EventLoop::default(),
            vec![device_datastream(), server_datastream(), device_properties()],
            MemoryCache::new(),
        );

        // Unknown interface.
        let err = device
            .send_individual("org.example.Missing", "/unreliable", 1.0.into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Interface(_)));

        // Server owned interface.
        let err = device
            .send_individual(
                "org.example.ServerDatastream",
                "/value",
                true.into(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParam(_)));

        // Unknown mapping.
        let err = device
            .send_individual("org.example.DeviceDatastream", "/missing", 1.0.into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Interface(_)));

        // Value type mismatch.
        let err = device
            .send_individual(
                "org.example.DeviceDatastream",
                "/unreliable",
                true.into(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Types(_)));

        // Missing explicit timestamp.
        let err = device
            .send_individual("org.example.DeviceDatastream", "/stamped", 1.0.into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParam(_)));

        // Unexpected timestamp.
        let err = device
            .send_individual(
                "org.example.DeviceDatastream",
                "/unreliable",
                1.0.into(),
                Some(Utc.timestamp_opt(1537449422, 0).unwrap()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParam(_)));

        // Properties interface through send_individual.
        let err = device
            .send_individual("org.example.Props", "/x", "v".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParam(_)));
    }

    #[tokio::test]
    async fn properties_are_published_exactly_once() {
        let mut client = AsyncClient::default();
        client
            .expect_publish::<String, Vec<u8>>()
            .once()
            .with(
                predicate::eq("realm/device_id/org.example.Props/x".to_string()),
                predicate::eq(QoS::ExactlyOnce),
                predicate::eq(false),
                predicate::function(|buf: &Vec<u8>| {
                    let doc = crate::bson::BsonDocument::parse(buf).unwrap();

                    doc.lookup("v").unwrap().as_str().unwrap() == "value"
                }),
            )
            .returning(|_, _, _, _| Ok(()));

        let (device, _rx) = mock_device(
            client,
            EventLoop::default(),
            vec![device_properties()],
            MemoryCache::new(),
        );

        device
            .set_property("org.example.Props", "/x", "value".into())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unset_publishes_an_empty_payload() {
        let mut client = AsyncClient::default();
        client
            .expect_publish::<String, Vec<u8>>()
            .once()
            .with(
                predicate::eq("realm/device_id/org.example.Props/x".to_string()),
                predicate::eq(QoS::ExactlyOnce),
                predicate::eq(false),
                predicate::eq(Vec::new()),
            )
            .returning(|_, _, _, _| Ok(()));

        let (device, _rx) = mock_device(
            client,
            EventLoop::default(),
            vec![device_properties()],
            MemoryCache::new(),
        );

        device
            .unset_property("org.example.Props", "/x")
            .await
            .unwrap();

        // Unset on a mapping without allow_unset is rejected.
        let err = device
            .unset_property("org.example.Props", "/pinned")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParam(_)));
    }

    #[tokio::test]
    async fn inbound_individual_is_decoded_and_dispatched() {
        let (device, mut rx) = mock_device(
            AsyncClient::default(),
            EventLoop::default(),
            vec![server_datastream()],
            MemoryCache::new(),
        );

        let payload = payload::serialize_individual(&AstarteData::Boolean(true), None);
        device
            .dispatch("realm/device_id/org.example.ServerDatastream/value", &payload)
            .await;

        assert_eq!(
            rx.recv().await.unwrap(),
            DeviceEvent::Data {
                interface: "org.example.ServerDatastream".to_string(),
                path: "/value".to_string(),
                value: Value::Individual(AstarteData::Boolean(true)),
                timestamp: None,
            }
        );
    }

    #[tokio::test]
    async fn inbound_empty_payload_fires_unset() {
        let (device, mut rx) = mock_device(
            AsyncClient::default(),
            EventLoop::default(),
            vec![server_properties(), server_datastream()],
            MemoryCache::new(),
        );

        device
            .dispatch("realm/device_id/org.example.ServerProps/x", &[])
            .await;

        assert_eq!(
            rx.recv().await.unwrap(),
            DeviceEvent::Unset {
                interface: "org.example.ServerProps".to_string(),
                path: "/x".to_string(),
            }
        );

        // An empty payload on a datastream is dropped.
        device
            .dispatch("realm/device_id/org.example.ServerDatastream/value", &[])
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_inbound_messages_are_dropped() {
        let (device, mut rx) = mock_device(
            AsyncClient::default(),
            EventLoop::default(),
            vec![server_datastream()],
            MemoryCache::new(),
        );

        // Unknown interface.
        let payload = payload::serialize_individual(&AstarteData::Boolean(true), None);
        device
            .dispatch("realm/device_id/org.example.Missing/value", &payload)
            .await;

        // Garbage payload.
        device
            .dispatch(
                "realm/device_id/org.example.ServerDatastream/value",
                b"not bson",
            )
            .await;

        // Type mismatch against the mapping.
        let payload = payload::serialize_individual(&AstarteData::Double(1.0), None);
        device
            .dispatch("realm/device_id/org.example.ServerDatastream/value", &payload)
            .await;

        // Control message.
        device
            .dispatch("realm/device_id/control/consumer/properties", b"data")
            .await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscription_failure_enters_handshake_error_and_retries() {
        let mut eventloop = EventLoop::default();
        let mut seq = mockall::Sequence::new();
        eventloop
            .expect_poll()
            .once()
            .in_sequence(&mut seq)
            .returning(|| Ok(connack(false)));
        eventloop
            .expect_poll()
            .once()
            .in_sequence(&mut seq)
            .returning(|| {
                Ok(Event::Incoming(Packet::SubAck(rumqttc::SubAck {
                    pkid: 1,
                    return_codes: vec![rumqttc::SubscribeReasonCode::Failure],
                })))
            });

        let mut client = AsyncClient::default();
        client.expect_subscribe::<String>().returning(|_, _| Ok(()));
        client
            .expect_publish::<String, Vec<u8>>()
            .returning(|_, _, _, _| Ok(()));

        let (device, _rx) = mock_device(
            client,
            eventloop,
            vec![server_datastream()],
            MemoryCache::new(),
        );

        device.connect().await.unwrap();

        // CONNACK, handshake messages sent.
        device.poll().await.unwrap();
        assert_eq!(
            device.connection_state().await,
            ConnectionState::EndHandshake
        );

        // Denied subscription: the runner first marks the error, the next tick retries
        // immediately since the first backoff deadline is already expired.
        device.poll().await.unwrap();
        let state = device.connection_state().await;
        assert!(
            state == ConnectionState::HandshakeError || state == ConnectionState::EndHandshake,
            "unexpected state {state:?}"
        );
    }

    #[tokio::test]
    async fn object_send_and_receive() {
        let interface = Interface::datastream_object(
            "org.example.Obj",
            0,
            1,
            Ownership::Device,
            vec![
                Mapping::new("/obj/a", MappingType::Double).unwrap(),
                Mapping::new("/obj/b", MappingType::String).unwrap(),
            ],
        )
        .unwrap();

        let mut client = AsyncClient::default();
        client
            .expect_publish::<String, Vec<u8>>()
            .once()
            .with(
                predicate::eq("realm/device_id/org.example.Obj/obj".to_string()),
                predicate::eq(QoS::AtMostOnce),
                predicate::eq(false),
                predicate::always(),
            )
            .returning(|_, _, _, _| Ok(()));

        let (device, _rx) = mock_device(
            client,
            EventLoop::default(),
            vec![interface],
            MemoryCache::new(),
        );

        let entries = HashMap::from([
            ("a".to_string(), AstarteData::Double(4.2)),
            ("b".to_string(), AstarteData::String("obj".to_string())),
        ]);

        device
            .send_object("org.example.Obj", "/obj", entries.clone(), None)
            .await
            .unwrap();

        // Entry outside the interface.
        let bad = HashMap::from([("c".to_string(), AstarteData::Double(1.0))]);
        let err = device
            .send_object("org.example.Obj", "/obj", bad, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Interface(_)));
    }
}
