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

//! Provides functionality to configure and pair an instance of the [`AstarteDevice`].

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{MqttOptions, TlsConfiguration, Transport};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::credentials::{CredentialRole, CredentialStore, MemoryCredentialStore};
use crate::crypto::{self, Bundle};
use crate::connection::mqtt::Mqtt;
use crate::device::AstarteDevice;
use crate::error::Error;
use crate::interface::Interface;
use crate::interfaces::Interfaces;
use crate::pairing::{PairingClient, PairingError};
use crate::store::{IntrospectionCache, MemoryCache};
use crate::{AsyncClient, EventLoop, EventReceiver};

/// Number of characters of a Base64 encoded credentials secret.
pub(crate) const CREDENTIALS_SECRET_LEN: usize = 44;

/// Default MQTT port when the broker URL doesn't carry one.
const DEFAULT_BROKER_PORT: u16 = 8883;

/// Capacity of the MQTT request channel and of the device event channel.
const CHANNEL_SIZE: usize = 50;

/// Errors while building the device.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum BuilderError {
    /// The injected credential store failed.
    #[error("credential store operation failed")]
    CredentialStore(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Configuration of the MQTT connection to Astarte.
#[derive(Clone)]
pub struct MqttConfig {
    pub(crate) realm: String,
    pub(crate) device_id: String,
    pub(crate) credentials_secret: String,
    pub(crate) pairing_url: String,
    pub(crate) ignore_ssl_errors: bool,
    pub(crate) keepalive: Duration,
    pub(crate) http_timeout: Duration,
    pub(crate) mqtt_connection_timeout: Duration,
    pub(crate) mqtt_connected_timeout: Duration,
}

impl Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("realm", &self.realm)
            .field("device_id", &self.device_id)
            .field("credentials_secret", &"REDACTED")
            .field("pairing_url", &self.pairing_url)
            .field("ignore_ssl_errors", &self.ignore_ssl_errors)
            .field("keepalive", &self.keepalive)
            .field("http_timeout", &self.http_timeout)
            .field("mqtt_connection_timeout", &self.mqtt_connection_timeout)
            .field("mqtt_connected_timeout", &self.mqtt_connected_timeout)
            .finish_non_exhaustive()
    }
}

impl MqttConfig {
    /// Creates the configuration with the default timeouts.
    pub fn new(realm: &str, device_id: &str, credentials_secret: &str, pairing_url: &str) -> Self {
        Self {
            realm: realm.to_owned(),
            device_id: device_id.to_owned(),
            credentials_secret: credentials_secret.to_owned(),
            pairing_url: pairing_url.to_owned(),
            ignore_ssl_errors: false,
            keepalive: Duration::from_secs(30),
            http_timeout: Duration::from_secs(10),
            mqtt_connection_timeout: Duration::from_secs(5),
            mqtt_connected_timeout: Duration::from_secs(1),
        }
    }

    /// Configure the keep alive timeout.
    ///
    /// The MQTT broker will be pinged when no data exchange has appened
    /// for the duration of the keep alive timeout.
    pub fn keepalive(mut self, duration: Duration) -> Self {
        self.keepalive = duration;

        self
    }

    /// Ignore TLS/SSL certificate errors.
    pub fn ignore_ssl_errors(mut self) -> Self {
        self.ignore_ssl_errors = true;

        self
    }

    /// Timeout for the pairing API requests.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;

        self
    }

    /// Poll deadline while waiting for the CONNACK and during the handshake.
    pub fn mqtt_connection_timeout(mut self, timeout: Duration) -> Self {
        self.mqtt_connection_timeout = timeout;

        self
    }

    /// Poll deadline while connected.
    pub fn mqtt_connected_timeout(mut self, timeout: Duration) -> Self {
        self.mqtt_connected_timeout = timeout;

        self
    }

    fn validate(&self) -> Result<(), Error> {
        if self.realm.is_empty() {
            return Err(Error::InvalidParam("realm must not be empty"));
        }

        if self.device_id.is_empty() {
            return Err(Error::InvalidParam("device id must not be empty"));
        }

        if self.credentials_secret.len() != CREDENTIALS_SECRET_LEN {
            return Err(Error::InvalidParam(
                "credentials secret must be 44 base64 characters",
            ));
        }

        if self.keepalive.is_zero() {
            return Err(Error::InvalidParam("keepalive must be greater than zero"));
        }

        if self.http_timeout.is_zero()
            || self.mqtt_connection_timeout.is_zero()
            || self.mqtt_connected_timeout.is_zero()
        {
            return Err(Error::InvalidParam("timeouts must be greater than zero"));
        }

        Ok(())
    }
}

/// Builder for an [`AstarteDevice`].
///
/// Collects the interfaces of the device introspection and the backing stores, then pairs the
/// device and opens the MQTT connection.
///
/// ```no_run
/// use astarte_device_core::builder::{DeviceBuilder, MqttConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let mqtt_config = MqttConfig::new("realm", "device_id", "credentials_secret", "pairing_url");
///
///     let (device, mut rx_events) = DeviceBuilder::new()
///         .connect_mqtt(mqtt_config)
///         .await
///         .unwrap();
///
///     tokio::spawn(async move {
///         while let Some(event) = rx_events.recv().await {
///             println!("received {event:?}");
///         }
///     });
///
///     device.connect().await.unwrap();
///     device.handle_events().await.unwrap();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DeviceBuilder<S = MemoryCache, C = MemoryCredentialStore> {
    interfaces: Vec<Interface>,
    store: S,
    credentials: C,
}

impl DeviceBuilder {
    /// Creates a builder with volatile stores.
    pub fn new() -> Self {
        Self {
            interfaces: Vec::new(),
            store: MemoryCache::new(),
            credentials: MemoryCredentialStore::new(),
        }
    }
}

impl Default for DeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, C> DeviceBuilder<S, C> {
    /// Adds an interface to the device introspection.
    pub fn interface(mut self, interface: Interface) -> Self {
        debug!("adding interface {}", interface.interface_name());

        self.interfaces.push(interface);

        self
    }

    /// Adds all the interfaces of the iterator.
    pub fn interfaces<I>(mut self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = Interface>,
    {
        self.interfaces.extend(interfaces);

        self
    }

    /// Sets the backing storage for the introspection cache.
    pub fn store<T>(self, store: T) -> DeviceBuilder<T, C>
    where
        T: IntrospectionCache,
    {
        DeviceBuilder {
            interfaces: self.interfaces,
            store,
            credentials: self.credentials,
        }
    }

    /// Sets the storage mediating the process wide TLS credentials.
    pub fn credential_store<T>(self, credentials: T) -> DeviceBuilder<S, T>
    where
        T: CredentialStore,
    {
        DeviceBuilder {
            interfaces: self.interfaces,
            store: self.store,
            credentials,
        }
    }
}

impl<S, C> DeviceBuilder<S, C>
where
    S: IntrospectionCache,
    C: CredentialStore,
{
    /// Pairs the device and prepares the MQTT connection.
    ///
    /// Acquires (or verifies and renews) the TLS client credentials through the pairing API,
    /// discovers the broker and builds the MQTT client. The returned device is disconnected,
    /// [`AstarteDevice::connect`] arms the connection and the poll loop drives it.
    pub async fn connect_mqtt(
        self,
        config: MqttConfig,
    ) -> Result<(AstarteDevice<S>, EventReceiver), Error> {
        config.validate()?;

        let interfaces = Interfaces::from_iter(self.interfaces)?;

        let pairing = PairingClient::new(
            &config.pairing_url,
            &config.realm,
            &config.device_id,
            &config.credentials_secret,
            config.http_timeout,
        )?;

        let (certificate, private_key) =
            ensure_credentials(&pairing, &self.credentials, &config).await?;

        let broker = pairing.get_broker_url().await?;
        let host = broker
            .host_str()
            .ok_or(Error::Internal("validated broker URL without a host"))?;
        let port = broker.port().unwrap_or(DEFAULT_BROKER_PORT);

        let tls = crypto::client_tls_config(&certificate, &private_key, config.ignore_ssl_errors)?;

        let client_id = format!("{}/{}", config.realm, config.device_id);
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(config.keepalive);
        options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
            Arc::new(tls),
        )));

        debug!("{:#?}", options);

        let (client, eventloop) = make_client(options, CHANNEL_SIZE);
        let mqtt = Mqtt::new(config.realm, config.device_id, eventloop, client);

        let (tx, rx) = mpsc::channel(CHANNEL_SIZE);
        let device = AstarteDevice::new(
            interfaces,
            self.store,
            mqtt,
            tx,
            config.mqtt_connection_timeout,
            config.mqtt_connected_timeout,
        );

        Ok((device, rx))
    }
}

#[cfg(not(test))]
fn make_client(options: MqttOptions, cap: usize) -> (AsyncClient, EventLoop) {
    AsyncClient::new(options, cap)
}

#[cfg(test)]
fn make_client(_options: MqttOptions, _cap: usize) -> (AsyncClient, EventLoop) {
    (AsyncClient::default(), EventLoop::default())
}

/// Loads the stored client credentials, or issues new ones through pairing.
///
/// A stored certificate is verified first: when Astarte reports it invalid the old credentials
/// are deleted and a fresh key and certificate take their place.
async fn ensure_credentials<C>(
    pairing: &PairingClient,
    store: &C,
    config: &MqttConfig,
) -> Result<(String, String), Error>
where
    C: CredentialStore,
{
    let certificate = store
        .get(CredentialRole::Certificate)
        .await
        .map_err(store_error)?;
    let private_key = store
        .get(CredentialRole::PrivateKey)
        .await
        .map_err(store_error)?;

    if let (Some(certificate), Some(private_key)) = (certificate, private_key) {
        match pairing.verify_client_certificate(&certificate).await {
            Ok(()) => {
                debug!("stored client certificate is valid");

                return Ok((certificate, private_key));
            }
            Err(PairingError::InvalidCertificate) => {
                info!("stored client certificate is invalid, requesting a new one");

                store
                    .delete(CredentialRole::Certificate)
                    .await
                    .map_err(store_error)?;
                store
                    .delete(CredentialRole::PrivateKey)
                    .await
                    .map_err(store_error)?;
            }
            Err(err) => return Err(err.into()),
        }
    }

    let bundle = Bundle::new(&config.realm, &config.device_id)?;
    let certificate = pairing.get_client_certificate(&bundle.csr).await?;

    store
        .add(CredentialRole::Certificate, &certificate)
        .await
        .map_err(store_error)?;
    store
        .add(CredentialRole::PrivateKey, &bundle.private_key)
        .await
        .map_err(store_error)?;

    Ok((certificate, bundle.private_key))
}

fn store_error<E>(err: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    BuilderError::CredentialStore(Box::new(err)).into()
}
