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

//! Client for the Astarte pairing API.
//!
//! Covers device registration, client certificate issuance and verification, and broker
//! discovery. Every request and response body is wrapped in a `data` object, as the API does.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Error returned by the pairing API operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    /// The HTTP request couldn't be completed.
    #[error("HTTP request couldn't be completed")]
    Request(#[from] reqwest::Error),
    /// The API returned an unexpected status code.
    #[error("API returned an error code {status}: {body}")]
    Api {
        /// Status code of the response.
        status: StatusCode,
        /// Response body, for the logs.
        body: String,
    },
    /// The response body couldn't be decoded.
    #[error("couldn't decode the API response body")]
    Body(#[source] reqwest::Error),
    /// The pairing URL couldn't be parsed.
    #[error("invalid pairing URL")]
    InvalidUrl(#[from] url::ParseError),
    /// The pairing URL can't be extended with the API route.
    #[error("invalid pairing base URL: {0}")]
    InvalidBaseUrl(String),
    /// The returned broker URL is not an `mqtts://host:port` URL.
    #[error("invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    /// The client certificate was rejected by the verify endpoint.
    #[error("client certificate rejected by Astarte")]
    InvalidCertificate,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiData<T> {
    data: T,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    hw_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    credentials_secret: String,
}

#[derive(Debug, Serialize)]
struct CertificateRequest<'a> {
    csr: &'a str,
}

#[derive(Debug, Deserialize)]
struct CertificateResponse {
    client_crt: String,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    client_crt: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    valid: bool,
    #[serde(default)]
    cause: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BrokerResponse {
    url: Url,
}

/// Registers a new device to Astarte.
///
/// Returns the credentials secret the device will authenticate the other pairing calls with. The
/// token is an agent JWT with the `a_pa` claims.
pub async fn register_device(
    token: &str,
    pairing_url: &str,
    realm: &str,
    device_id: &str,
    timeout: Duration,
) -> Result<String, PairingError> {
    let url = api_url(&Url::parse(pairing_url)?, &["v1", realm, "devices"])?;

    debug!("registering device {device_id} at {url}");

    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let response = client
        .post(url)
        .bearer_auth(token)
        .json(&ApiData {
            data: RegisterRequest { hw_id: device_id },
        })
        .send()
        .await?;

    let body: ApiData<RegisterResponse> = expect_status(response, StatusCode::CREATED).await?;

    Ok(body.data.credentials_secret)
}

/// Client for the pairing operations of an already registered device.
#[derive(Debug, Clone)]
pub(crate) struct PairingClient {
    client: reqwest::Client,
    base_url: Url,
    realm: String,
    device_id: String,
    credentials_secret: String,
}

impl PairingClient {
    pub(crate) fn new(
        pairing_url: &str,
        realm: &str,
        device_id: &str,
        credentials_secret: &str,
        timeout: Duration,
    ) -> Result<Self, PairingError> {
        let base_url = Url::parse(pairing_url)?;

        if base_url.cannot_be_a_base() {
            return Err(PairingError::InvalidBaseUrl(pairing_url.to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            realm: realm.to_string(),
            device_id: device_id.to_string(),
            credentials_secret: credentials_secret.to_string(),
        })
    }

    /// Requests a client certificate for the given CSR.
    pub(crate) async fn get_client_certificate(&self, csr: &str) -> Result<String, PairingError> {
        let url = self.device_url(&["protocols", "astarte_mqtt_v1", "credentials"])?;

        debug!("requesting client certificate from {url}");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.credentials_secret)
            .json(&ApiData {
                data: CertificateRequest { csr },
            })
            .send()
            .await?;

        let body: ApiData<CertificateResponse> =
            expect_status(response, StatusCode::CREATED).await?;

        Ok(body.data.client_crt)
    }

    /// Checks the certificate against the verify endpoint.
    ///
    /// An expired or revoked certificate returns [`PairingError::InvalidCertificate`], the caller
    /// is expected to drop the stored credentials and request new ones.
    pub(crate) async fn verify_client_certificate(&self, crt: &str) -> Result<(), PairingError> {
        let url =
            self.device_url(&["protocols", "astarte_mqtt_v1", "credentials", "verify"])?;

        debug!("verifying client certificate at {url}");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.credentials_secret)
            .json(&ApiData {
                data: VerifyRequest { client_crt: crt },
            })
            .send()
            .await?;

        let body: ApiData<VerifyResponse> = expect_status(response, StatusCode::OK).await?;

        if !body.data.valid {
            debug!(
                "certificate is invalid: {}",
                body.data.cause.as_deref().unwrap_or("unknown cause")
            );

            return Err(PairingError::InvalidCertificate);
        }

        Ok(())
    }

    /// Fetches the MQTT broker URL for the device.
    pub(crate) async fn get_broker_url(&self) -> Result<Url, PairingError> {
        let url = self.device_url(&["protocols", "astarte_mqtt_v1", "broker"])?;

        debug!("fetching broker URL from {url}");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.credentials_secret)
            .send()
            .await?;

        let body: ApiData<BrokerResponse> = expect_status(response, StatusCode::OK).await?;
        let broker = body.data.url;

        if broker.scheme() != "mqtts" || broker.host_str().is_none() {
            return Err(PairingError::InvalidBrokerUrl(broker.to_string()));
        }

        Ok(broker)
    }

    fn device_url(&self, rest: &[&str]) -> Result<Url, PairingError> {
        let mut segments = vec!["v1", self.realm.as_str(), "devices", self.device_id.as_str()];
        segments.extend_from_slice(rest);

        api_url(&self.base_url, &segments)
    }
}

fn api_url(base: &Url, segments: &[&str]) -> Result<Url, PairingError> {
    let mut url = base.clone();

    url.path_segments_mut()
        .map_err(|()| PairingError::InvalidBaseUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);

    Ok(url)
}

async fn expect_status<T>(response: reqwest::Response, expected: StatusCode) -> Result<T, PairingError>
where
    T: DeserializeOwned,
{
    let status = response.status();

    if status != expected {
        let body = response.text().await.unwrap_or_default();

        return Err(PairingError::Api { status, body });
    }

    response.json().await.map_err(PairingError::Body)
}
