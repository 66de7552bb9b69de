// This file is part of Astarte.
//
// Copyright 2023 - 2024 SECO Mind Srl
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

//! Error types for the Astarte device SDK.

use crate::bson::BsonError;
use crate::builder::BuilderError;
use crate::connection::topic::TopicError;
use crate::crypto::CryptoError;
use crate::interface::path::MappingError;
use crate::interface::InterfaceError;
use crate::pairing::PairingError;
use crate::payload::PayloadError;
use crate::types::TypeError;

/// Astarte error.
///
/// Possible errors returned by functions of the Astarte device SDK.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A parameter failed validation.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// Invariant violation inside the SDK, not recoverable by the caller.
    #[error("internal error: {0}")]
    Internal(&'static str),

    /// No event within the poll deadline.
    #[error("operation timed out")]
    Timeout,

    /// Connect called while a connection attempt is in progress.
    #[error("device is already connecting")]
    AlreadyConnecting,

    /// Connect called on a connected device.
    #[error("device is already connected")]
    AlreadyConnected,

    /// The operation requires a connected or connecting device.
    #[error("device is not ready")]
    DeviceNotReady,

    /// Error from the MQTT client request channel.
    #[error("mqtt client error")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Error on the MQTT connection while polling.
    #[error("mqtt connection error")]
    Connection(#[from] rumqttc::ConnectionError),

    /// Error while building the device.
    #[error("configuration error")]
    Config(#[from] BuilderError),

    /// Error from the pairing API.
    #[error("pairing request failed")]
    Pairing(#[from] PairingError),

    /// Error generating the credentials or the TLS configuration.
    #[error("couldn't prepare the device credentials")]
    Crypto(#[from] CryptoError),

    /// Error encoding or decoding a data payload.
    #[error("couldn't process payload")]
    Payload(#[from] PayloadError),

    /// Malformed BSON document.
    #[error("couldn't process BSON data")]
    Bson(#[from] BsonError),

    /// Errors when converting between Astarte types.
    #[error("couldn't convert to an Astarte type")]
    Types(#[from] TypeError),

    /// Invalid interface or failed interface lookup.
    #[error("invalid interface")]
    Interface(#[from] InterfaceError),

    /// Invalid mapping path.
    #[error("invalid mapping path")]
    Path(#[from] MappingError),

    /// Invalid topic on an inbound publish.
    #[error("invalid topic {}", .0.topic())]
    Topic(#[from] TopicError),
}
