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

//! Core of the Astarte device SDK.
//!
//! Connects a device to an Astarte instance over MQTT with mutual TLS, advertises a set of typed
//! [`Interface`]s as the device introspection and exchanges BSON encoded payloads: individual
//! datastreams, aggregated objects and retained properties.
//!
//! The entry point is the [`DeviceBuilder`]: it pairs the device (client certificate and broker
//! discovery through the Astarte pairing API) and returns an [`AstarteDevice`] together with the
//! receiving end of the device [event](DeviceEvent) channel.

pub mod bson;
pub mod builder;
pub mod connection;
pub mod credentials;
pub mod crypto;
pub mod device;
pub mod device_id;
pub mod error;
pub mod interface;
pub(crate) mod interfaces;
#[cfg(test)]
pub(crate) mod mock;
pub mod pairing;
pub mod payload;
pub(crate) mod retry;
pub mod store;
pub mod types;

use std::collections::HashMap;

use tokio::sync::mpsc;

#[cfg(test)]
pub(crate) use mock::{MockAsyncClient as AsyncClient, MockEventLoop as EventLoop};
#[cfg(not(test))]
pub(crate) use rumqttc::{AsyncClient, EventLoop};

// Re-exported since their types are part of the public API.
pub use chrono;
pub use rumqttc;

pub use crate::builder::{DeviceBuilder, MqttConfig};
pub use crate::device::AstarteDevice;
pub use crate::error::Error;
pub use crate::interface::Interface;
pub use crate::types::AstarteData;

/// Timestamp attached to datastream payloads.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Sender end of the channel for the [`DeviceEvent`].
pub type EventSender = mpsc::Sender<DeviceEvent>;
/// Receiver end of the channel for the [`DeviceEvent`].
pub type EventReceiver = mpsc::Receiver<DeviceEvent>;

/// Payload of a data event received from Astarte.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Individual datastream or property value.
    Individual(AstarteData),
    /// Object datastream, one value per endpoint segment.
    Object(HashMap<String, AstarteData>),
}

impl Value {
    /// Returns `true` if the value is [`Individual`].
    ///
    /// [`Individual`]: Value::Individual
    #[must_use]
    pub fn is_individual(&self) -> bool {
        matches!(self, Self::Individual(_))
    }

    /// Returns `true` if the value is [`Object`].
    ///
    /// [`Object`]: Value::Object
    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }
}

/// Events delivered by the device to the application.
///
/// Malformed inbound messages never surface here, they are logged and discarded by the poll loop.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// The MQTT session was established and the handshake completed.
    Connected {
        /// Session present flag from the CONNACK of this session.
        session_present: bool,
    },
    /// The connection to the broker was lost or closed.
    Disconnected,
    /// Data received on an interface mapping.
    Data {
        /// Name of the interface the data was received on.
        interface: String,
        /// Path of the endpoint.
        path: String,
        /// The decoded value.
        value: Value,
        /// Explicit timestamp, when the mapping carries one.
        timestamp: Option<Timestamp>,
    },
    /// A server owned property was unset.
    Unset {
        /// Name of the properties interface.
        interface: String,
        /// Path of the unset mapping.
        path: String,
    },
}
