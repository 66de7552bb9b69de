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

//! Collection of the interfaces declared by the device.

use std::collections::HashMap;

use itertools::Itertools;

use crate::interface::{Interface, InterfaceError};

/// The device introspection, an insertion ordered set of interfaces indexed by name.
///
/// The introspection string follows the insertion order, so the backing storage is a [`Vec`] with
/// a name index on the side.
#[derive(Debug, Clone, Default)]
pub(crate) struct Interfaces {
    list: Vec<Interface>,
    index: HashMap<String, usize>,
}

impl Interfaces {
    /// Builds the collection, rejecting duplicate interface names.
    pub(crate) fn from_iter<I>(iter: I) -> Result<Self, InterfaceError>
    where
        I: IntoIterator<Item = Interface>,
    {
        let mut interfaces = Interfaces::default();

        for interface in iter {
            if interfaces.index.contains_key(interface.interface_name()) {
                return Err(InterfaceError::DuplicateInterface {
                    name: interface.interface_name().to_string(),
                });
            }

            interfaces
                .index
                .insert(interface.interface_name().to_string(), interfaces.list.len());
            interfaces.list.push(interface);
        }

        Ok(interfaces)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Interface> {
        self.index.get(name).map(|&i| &self.list[i])
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.list.iter()
    }

    /// The introspection string advertised at session start.
    ///
    /// `<name>:<major>:<minor>` entries joined by `;` in insertion order, no trailing separator.
    pub(crate) fn get_introspection_string(&self) -> String {
        self.list.iter().join(";")
    }
}
