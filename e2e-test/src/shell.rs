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

//! Shell surface of the end to end test.
//!
//! One command per line on stdin: `expect_*` queues a message the server should deliver,
//! `send_*` publishes data from the device, `disconnect` winds the test down. Every handler
//! prints exit code `0` on success and `1` on any parameter or enqueue error.

use std::collections::HashMap;

use astarte_device_core::bson::BsonDocument;
use astarte_device_core::interface::{Interface, MappingPath};
use astarte_device_core::store::MemoryCache;
use astarte_device_core::types::AstarteData;
use astarte_device_core::{AstarteDevice, Timestamp};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Args, Parser, Subcommand};
use eyre::{eyre, Result, WrapErr};
use tracing::{error, info};

use crate::expectations::{ExpectationSink, ExpectedMessage};

#[derive(Debug, Parser)]
#[command(name = "e2e", no_binary_name = true)]
pub struct ShellCommand {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "snake_case")]
pub enum Command {
    /// Queue an individual message the server is expected to deliver.
    ExpectIndividual(DataArgs),
    /// Queue an object message the server is expected to deliver.
    ExpectObject(DataArgs),
    /// Queue an expected property set.
    ExpectPropertySet(PropertyArgs),
    /// Queue an expected property unset.
    ExpectPropertyUnset(PathArgs),
    /// Publish an individual datastream value.
    SendIndividual(DataArgs),
    /// Publish an object datastream.
    SendObject(DataArgs),
    /// Set a device owned property.
    SendPropertySet(PropertyArgs),
    /// Unset a device owned property.
    SendPropertyUnset(PathArgs),
    /// Disconnect the device and terminate the poll loop.
    Disconnect,
}

#[derive(Debug, Args)]
pub struct DataArgs {
    /// Name of the interface.
    pub interface: String,
    /// Path of the endpoint, or the common parent for objects.
    pub path: String,
    /// Base64 of a BSON document `{ "v": ... }`.
    pub payload: String,
    /// RFC 3339 timestamp for mappings with an explicit timestamp.
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Args)]
pub struct PropertyArgs {
    /// Name of the properties interface.
    pub interface: String,
    /// Path of the property.
    pub path: String,
    /// Base64 of a BSON document `{ "v": ... }`.
    pub payload: String,
}

#[derive(Debug, Args)]
pub struct PathArgs {
    /// Name of the properties interface.
    pub interface: String,
    /// Path of the property.
    pub path: String,
}

/// Parses a shell line into a command.
pub fn parse_line(line: &str) -> Result<Command, clap::Error> {
    ShellCommand::try_parse_from(line.split_whitespace()).map(|shell| shell.command)
}

/// State shared by the command handlers.
pub struct Shell {
    device: AstarteDevice<MemoryCache>,
    sink: ExpectationSink,
    interfaces: HashMap<String, Interface>,
    terminated: bool,
}

impl Shell {
    pub fn new(
        device: AstarteDevice<MemoryCache>,
        sink: ExpectationSink,
        interfaces: Vec<Interface>,
    ) -> Self {
        let interfaces = interfaces
            .into_iter()
            .map(|interface| (interface.interface_name().to_string(), interface))
            .collect();

        Self {
            device,
            sink,
            interfaces,
            terminated: false,
        }
    }

    /// The `disconnect` command was handled, the poll loop is winding down.
    pub fn terminated(&self) -> bool {
        self.terminated
    }

    /// Handles a line, returning the command exit code.
    pub async fn handle_line(&mut self, line: &str) -> i32 {
        let command = match parse_line(line) {
            Ok(command) => command,
            Err(err) => {
                error!("invalid command: {err}");
                return 1;
            }
        };

        match self.run(command).await {
            Ok(()) => 0,
            Err(err) => {
                error!("command failed: {err:#}");
                1
            }
        }
    }

    async fn run(&mut self, command: Command) -> Result<()> {
        match command {
            Command::ExpectIndividual(args) => {
                let interface = self.interface(&args.interface)?;
                let data = decode_individual(interface, &args.path, &args.payload)?;

                self.sink.push(
                    &args.interface,
                    ExpectedMessage::Individual {
                        path: args.path,
                        data,
                        timestamp: args.timestamp,
                    },
                )
            }
            Command::ExpectObject(args) => {
                let interface = self.interface(&args.interface)?;
                let (entries, bytes) = decode_object(interface, &args.path, &args.payload)?;

                self.sink.push(
                    &args.interface,
                    ExpectedMessage::Object {
                        path: args.path,
                        entries,
                        bytes,
                        timestamp: args.timestamp,
                    },
                )
            }
            Command::ExpectPropertySet(args) => {
                let interface = self.interface(&args.interface)?;
                let data = decode_individual(interface, &args.path, &args.payload)?;

                self.sink.push(
                    &args.interface,
                    ExpectedMessage::Property {
                        path: args.path,
                        data: Some(data),
                    },
                )
            }
            Command::ExpectPropertyUnset(args) => {
                // Only the path is checked, the mapping must still exist.
                let interface = self.interface(&args.interface)?;
                lookup_mapping(interface, &args.path)?;

                self.sink.push(
                    &args.interface,
                    ExpectedMessage::Property {
                        path: args.path,
                        data: None,
                    },
                )
            }
            Command::SendIndividual(args) => {
                let interface = self.interface(&args.interface)?;
                let data = decode_individual(interface, &args.path, &args.payload)?;

                self.device
                    .send_individual(&args.interface, &args.path, data, args.timestamp)
                    .await
                    .wrap_err("failed to send the individual to Astarte")?;

                info!("sent individual");
                Ok(())
            }
            Command::SendObject(args) => {
                let interface = self.interface(&args.interface)?;
                let (entries, _) = decode_object(interface, &args.path, &args.payload)?;

                self.device
                    .send_object(&args.interface, &args.path, entries, args.timestamp)
                    .await
                    .wrap_err("failed to send the object to Astarte")?;

                info!("sent object");
                Ok(())
            }
            Command::SendPropertySet(args) => {
                let interface = self.interface(&args.interface)?;
                let data = decode_individual(interface, &args.path, &args.payload)?;

                self.device
                    .set_property(&args.interface, &args.path, data)
                    .await
                    .wrap_err("failed to set the property")?;

                info!("property set");
                Ok(())
            }
            Command::SendPropertyUnset(args) => {
                self.device
                    .unset_property(&args.interface, &args.path)
                    .await
                    .wrap_err("failed to unset the property")?;

                info!("property unset");
                Ok(())
            }
            Command::Disconnect => {
                info!("stopping the device poll loop");

                self.terminated = true;
                self.device
                    .disconnect()
                    .await
                    .wrap_err("failed to disconnect the device")?;

                Ok(())
            }
        }
    }

    fn interface(&self, name: &str) -> Result<&Interface> {
        self.interfaces
            .get(name)
            .ok_or_else(|| eyre!("unknown interface {name}"))
    }
}

fn lookup_mapping<'a>(
    interface: &'a Interface,
    path: &str,
) -> Result<&'a astarte_device_core::interface::Mapping> {
    let mapping_path = MappingPath::try_from(path).wrap_err("invalid path parameter")?;

    interface
        .mapping(&mapping_path)
        .ok_or_else(|| eyre!("no mapping {path} in {}", interface.interface_name()))
}

/// Decodes a base64 `{ "v": ... }` document against the mapping of the path.
fn decode_individual(interface: &Interface, path: &str, payload: &str) -> Result<AstarteData> {
    let mapping = lookup_mapping(interface, path)?;

    let bytes = STANDARD
        .decode(payload)
        .wrap_err("payload is not valid base64")?;

    let doc = BsonDocument::parse(&bytes).wrap_err("payload is not a valid BSON document")?;
    let v_elem = doc.lookup("v").wrap_err("payload has no value field")?;

    AstarteData::deserialize(&v_elem, mapping.mapping_type())
        .wrap_err("payload doesn't match the mapping type")
}

/// Decodes a base64 `{ "v": { ... } }` document into object entries.
fn decode_object(
    interface: &Interface,
    path: &str,
    payload: &str,
) -> Result<(HashMap<String, AstarteData>, Vec<u8>)> {
    let mapping_path = MappingPath::try_from(path).wrap_err("invalid path parameter")?;

    let bytes = STANDARD
        .decode(payload)
        .wrap_err("payload is not valid base64")?;

    let (entries, _timestamp) =
        astarte_device_core::payload::deserialize_object(interface, &mapping_path, &bytes)
            .wrap_err("payload doesn't decode into object entries")?;

    if entries.is_empty() {
        return Err(eyre!("object payload with no entries"));
    }

    Ok((entries, bytes))
}
