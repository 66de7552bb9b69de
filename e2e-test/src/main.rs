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

//! End to end test harness.
//!
//! Pairs a device against a real Astarte instance, then reads test commands from stdin and
//! checks that the server driven messages arrive exactly, in order, once.

mod expectations;
mod interfaces;
mod shell;
mod spsc;

use astarte_device_core::builder::{DeviceBuilder, MqttConfig};
use astarte_device_core::{DeviceEvent, EventReceiver};
use eyre::{Result, WrapErr};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::expectations::ExpectationSource;
use crate::shell::Shell;

/// Configuration of the test device, from the environment.
#[derive(Debug)]
struct Config {
    realm: String,
    device_id: String,
    credentials_secret: String,
    pairing_url: String,
    ignore_ssl_errors: bool,
}

impl Config {
    fn from_env() -> Result<Self> {
        Ok(Self {
            realm: env_var("E2E_REALM")?,
            device_id: env_var("E2E_DEVICE_ID")?,
            credentials_secret: env_var("E2E_CREDENTIALS_SECRET")?,
            pairing_url: env_var("E2E_PAIRING_URL")?,
            ignore_ssl_errors: std::env::var("E2E_IGNORE_SSL_ERRORS")
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name).wrap_err_with(|| format!("missing environment variable {name}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let interfaces = interfaces::all();

    let mut mqtt_config = MqttConfig::new(
        &config.realm,
        &config.device_id,
        &config.credentials_secret,
        &config.pairing_url,
    );
    if config.ignore_ssl_errors {
        mqtt_config = mqtt_config.ignore_ssl_errors();
    }

    let (device, events) = DeviceBuilder::new()
        .interfaces(interfaces.clone())
        .connect_mqtt(mqtt_config)
        .await
        .wrap_err("couldn't pair the device")?;

    let (sink, source) = expectations::expectation_queues(&interfaces);

    device.connect().await.wrap_err("couldn't connect")?;

    let poll_device = device.clone();
    let poll_task = tokio::spawn(async move { poll_device.handle_events().await });
    let comparator_task = tokio::spawn(compare_events(events, source));

    let mut shell = Shell::new(device, sink, interfaces);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let code = shell.handle_line(&line).await;
        println!("{code}");

        if shell.terminated() {
            break;
        }
    }

    // Stdin can close without an explicit disconnect, wind down anyway.
    if !shell.terminated() {
        let _ = shell.handle_line("disconnect").await;
    }

    poll_task
        .await
        .wrap_err("poll task panicked")?
        .wrap_err("poll loop failed")?;

    comparator_task.abort();
    let _ = comparator_task.await;

    info!("end to end test terminated");

    Ok(())
}

/// Consumes the device events, comparing each data event with its queued expectation.
async fn compare_events(mut events: EventReceiver, mut source: ExpectationSource) {
    while let Some(event) = events.recv().await {
        match &event {
            DeviceEvent::Connected { session_present } => {
                info!("device connected, session_present={session_present}");
            }
            DeviceEvent::Disconnected => info!("device disconnected"),
            event => match expectations::check_event(&mut source, event) {
                Ok(()) => info!("expectation satisfied: {event:?}"),
                Err(err) => error!("expectation failed: {err:#}"),
            },
        }
    }
}
