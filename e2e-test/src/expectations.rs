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

//! Expected messages queued per interface and compared against the received device events.

use std::collections::HashMap;

use astarte_device_core::interface::Interface;
use astarte_device_core::{AstarteData, DeviceEvent, Timestamp, Value};
use eyre::{bail, eyre, Result};

use crate::spsc::{self, Consumer, Producer, QueueError};

/// Per interface queue depth.
///
/// Reception order is enforced, it is advisable to test one message at a time since only two
/// messages per interface fit the buffer.
pub const QUEUE_CAPACITY: usize = 2;

/// A message the server is expected to deliver to the device.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedMessage {
    /// An individual datastream value.
    Individual {
        path: String,
        data: AstarteData,
        /// Compared only when set.
        timestamp: Option<Timestamp>,
    },
    /// A property set ([`Some`]) or unset ([`None`]).
    Property {
        path: String,
        data: Option<AstarteData>,
    },
    /// An aggregate object.
    Object {
        path: String,
        entries: HashMap<String, AstarteData>,
        /// Raw BSON document the expectation was declared with, kept for the failure logs.
        bytes: Vec<u8>,
        /// Compared only when set.
        timestamp: Option<Timestamp>,
    },
}

/// Producer side of the expectation queues, owned by the shell task.
pub struct ExpectationSink {
    queues: HashMap<String, Producer<ExpectedMessage, QUEUE_CAPACITY>>,
}

/// Consumer side of the expectation queues, owned by the comparator task.
pub struct ExpectationSource {
    queues: HashMap<String, Consumer<ExpectedMessage, QUEUE_CAPACITY>>,
}

/// Builds an expectation queue for every interface.
pub fn expectation_queues<'a, I>(interfaces: I) -> (ExpectationSink, ExpectationSource)
where
    I: IntoIterator<Item = &'a Interface>,
{
    let mut producers = HashMap::new();
    let mut consumers = HashMap::new();

    for interface in interfaces {
        let (tx, rx) = spsc::channel();

        producers.insert(interface.interface_name().to_string(), tx);
        consumers.insert(interface.interface_name().to_string(), rx);
    }

    (
        ExpectationSink { queues: producers },
        ExpectationSource { queues: consumers },
    )
}

impl ExpectationSink {
    /// Queues an expected message for the interface.
    pub fn push(&mut self, interface: &str, message: ExpectedMessage) -> Result<()> {
        let queue = self
            .queues
            .get_mut(interface)
            .ok_or_else(|| eyre!("no expectation queue for interface {interface}"))?;

        queue
            .try_push(message)
            .map_err(|err| eyre!("couldn't queue the expectation: {err}"))
    }

    /// Number of pending expectations for the interface.
    pub fn count(&self, interface: &str) -> usize {
        self.queues.get(interface).map_or(0, Producer::len)
    }
}

impl ExpectationSource {
    fn pop(&mut self, interface: &str) -> Result<ExpectedMessage> {
        let queue = self
            .queues
            .get_mut(interface)
            .ok_or_else(|| eyre!("no expectation queue for interface {interface}"))?;

        queue
            .pop()
            .map_err(|err| eyre!("no expectation for a message on {interface}: {err}"))
    }

    /// Borrows the next expectation without consuming it.
    pub fn peek(&self, interface: &str) -> Result<&ExpectedMessage, QueueError> {
        self.queues
            .get(interface)
            .ok_or(QueueError::Empty)?
            .peek()
    }
}

/// Compares a received event against the head of its interface queue.
///
/// The expectation is consumed either way, within one interface the arrival order must match the
/// insertion order.
pub fn check_event(source: &mut ExpectationSource, event: &DeviceEvent) -> Result<()> {
    match event {
        DeviceEvent::Connected { .. } | DeviceEvent::Disconnected => Ok(()),
        DeviceEvent::Data {
            interface,
            path,
            value,
            timestamp,
        } => {
            let expected = source.pop(interface)?;

            match (value, expected) {
                (
                    Value::Individual(data),
                    ExpectedMessage::Individual {
                        path: exp_path,
                        data: exp_data,
                        timestamp: exp_timestamp,
                    },
                ) => {
                    check_path(path, &exp_path)?;
                    check_data(data, &exp_data)?;
                    check_timestamp(*timestamp, exp_timestamp)
                }
                (
                    Value::Individual(data),
                    ExpectedMessage::Property {
                        path: exp_path,
                        data: Some(exp_data),
                    },
                ) => {
                    check_path(path, &exp_path)?;
                    check_data(data, &exp_data)
                }
                (
                    Value::Object(entries),
                    ExpectedMessage::Object {
                        path: exp_path,
                        entries: exp_entries,
                        bytes: _,
                        timestamp: exp_timestamp,
                    },
                ) => {
                    check_path(path, &exp_path)?;

                    if *entries != exp_entries {
                        bail!(
                            "object mismatch on {interface}{path}: got {entries:?}, expected {exp_entries:?}"
                        );
                    }

                    check_timestamp(*timestamp, exp_timestamp)
                }
                (value, expected) => {
                    bail!("message shape mismatch on {interface}{path}: got {value:?}, expected {expected:?}")
                }
            }
        }
        DeviceEvent::Unset { interface, path } => {
            let expected = source.pop(interface)?;

            match expected {
                ExpectedMessage::Property {
                    path: exp_path,
                    data: None,
                } => check_path(path, &exp_path),
                other => {
                    bail!("expected {other:?} on {interface}, got an unset for {path}")
                }
            }
        }
    }
}

fn check_path(received: &str, expected: &str) -> Result<()> {
    if received != expected {
        bail!("path mismatch: got {received}, expected {expected}");
    }

    Ok(())
}

fn check_data(received: &AstarteData, expected: &AstarteData) -> Result<()> {
    if received != expected {
        bail!("value mismatch: got {received:?}, expected {expected:?}");
    }

    Ok(())
}

fn check_timestamp(received: Option<Timestamp>, expected: Option<Timestamp>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };

    if received != Some(expected) {
        bail!("timestamp mismatch: got {received:?}, expected {expected:?}");
    }

    Ok(())
}
