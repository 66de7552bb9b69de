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

//! Interface descriptors advertised by the device as its introspection.
//!
//! Descriptors are supplied already validated to the [`crate::builder::DeviceBuilder`], parsing
//! them from the JSON schema source is out of scope here.

pub mod error;
pub mod mapping;
pub mod path;

use std::fmt::Display;

pub use self::error::InterfaceError;
pub use self::mapping::{Endpoint, Mapping, MappingType, Reliability, Retention};
pub use self::path::MappingPath;

/// Maximum number of mappings an interface can declare.
pub(crate) const MAX_INTERFACE_MAPPINGS: usize = 1024;

/// Maximum length of an interface name.
pub(crate) const MAX_INTERFACE_NAME_LEN: usize = 128;

/// Type of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceType {
    /// Stream of non persistent data.
    Datastream,
    /// Stateful, retained values.
    Properties,
}

impl Display for InterfaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceType::Datastream => write!(f, "datastream"),
            InterfaceType::Properties => write!(f, "properties"),
        }
    }
}

/// Ownership of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Ownership {
    /// Data is sent from the device to Astarte.
    Device,
    /// Data is received from Astarte.
    Server,
}

impl Ownership {
    /// Returns `true` if the ownership is [`Device`].
    ///
    /// [`Device`]: Ownership::Device
    #[must_use]
    pub fn is_device(&self) -> bool {
        matches!(self, Self::Device)
    }

    /// Returns `true` if the ownership is [`Server`].
    ///
    /// [`Server`]: Ownership::Server
    #[must_use]
    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server)
    }
}

impl Display for Ownership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ownership::Device => write!(f, "device"),
            Ownership::Server => write!(f, "server"),
        }
    }
}

/// Aggregation of the interface's mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    /// Every mapping changes state or streams data independently.
    #[default]
    Individual,
    /// All the data for every mapping is sent as a single object.
    Object,
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregation::Individual => write!(f, "individual"),
            Aggregation::Object => write!(f, "object"),
        }
    }
}

/// A versioned group of typed endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct Interface {
    name: String,
    version_major: i32,
    version_minor: i32,
    interface_type: InterfaceType,
    ownership: Ownership,
    aggregation: Aggregation,
    mappings: Vec<Mapping>,
}

impl Interface {
    /// Builds an individually aggregated datastream interface.
    pub fn datastream_individual(
        name: &str,
        version_major: i32,
        version_minor: i32,
        ownership: Ownership,
        mappings: Vec<Mapping>,
    ) -> Result<Self, InterfaceError> {
        Self::validated(
            name,
            version_major,
            version_minor,
            InterfaceType::Datastream,
            ownership,
            Aggregation::Individual,
            mappings,
        )
    }

    /// Builds an object aggregated datastream interface.
    ///
    /// All the mappings must share the parent path, the reliability and the timestamp policy.
    pub fn datastream_object(
        name: &str,
        version_major: i32,
        version_minor: i32,
        ownership: Ownership,
        mappings: Vec<Mapping>,
    ) -> Result<Self, InterfaceError> {
        Self::validated(
            name,
            version_major,
            version_minor,
            InterfaceType::Datastream,
            ownership,
            Aggregation::Object,
            mappings,
        )
    }

    /// Builds a properties interface.
    pub fn properties(
        name: &str,
        version_major: i32,
        version_minor: i32,
        ownership: Ownership,
        mappings: Vec<Mapping>,
    ) -> Result<Self, InterfaceError> {
        Self::validated(
            name,
            version_major,
            version_minor,
            InterfaceType::Properties,
            ownership,
            Aggregation::Individual,
            mappings,
        )
    }

    fn validated(
        name: &str,
        version_major: i32,
        version_minor: i32,
        interface_type: InterfaceType,
        ownership: Ownership,
        aggregation: Aggregation,
        mappings: Vec<Mapping>,
    ) -> Result<Self, InterfaceError> {
        validate_name(name)?;

        if version_major == 0 && version_minor == 0 {
            return Err(InterfaceError::MajorMinor);
        }

        if interface_type == InterfaceType::Properties && aggregation == Aggregation::Object {
            return Err(InterfaceError::ObjectProperties);
        }

        if mappings.is_empty() {
            return Err(InterfaceError::EmptyMappings);
        }

        if mappings.len() > MAX_INTERFACE_MAPPINGS {
            return Err(InterfaceError::TooManyMappings(mappings.len()));
        }

        check_unambiguous(&mappings)?;

        if aggregation == Aggregation::Object {
            check_object_consistency(&mappings)?;
        }

        Ok(Self {
            name: name.to_string(),
            version_major,
            version_minor,
            interface_type,
            ownership,
            aggregation,
            mappings,
        })
    }

    /// Name of the interface.
    pub fn interface_name(&self) -> &str {
        &self.name
    }

    /// Major version of the interface.
    pub fn version_major(&self) -> i32 {
        self.version_major
    }

    /// Minor version of the interface.
    pub fn version_minor(&self) -> i32 {
        self.version_minor
    }

    /// Ownership of the interface.
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Type of the interface.
    pub fn interface_type(&self) -> InterfaceType {
        self.interface_type
    }

    /// Aggregation of the interface.
    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// Returns `true` for a properties interface.
    pub fn is_properties(&self) -> bool {
        self.interface_type == InterfaceType::Properties
    }

    /// Finds the mapping matching the path.
    ///
    /// At most one mapping can match, overlapping templates are rejected when the interface is
    /// built.
    pub fn mapping(&self, path: &MappingPath) -> Option<&Mapping> {
        self.mappings.iter().find(|m| m.endpoint().matches(path))
    }

    /// Iterates over the interface mappings.
    pub fn iter_mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.iter()
    }

    /// Reliability shared by the mappings of an object interface.
    pub(crate) fn object_reliability(&self) -> Reliability {
        debug_assert_eq!(self.aggregation, Aggregation::Object);

        self.mappings
            .first()
            .map(|m| m.reliability())
            .unwrap_or_default()
    }

    /// Timestamp policy shared by the mappings of an object interface.
    pub(crate) fn object_explicit_timestamp(&self) -> bool {
        debug_assert_eq!(self.aggregation, Aggregation::Object);

        self.mappings
            .first()
            .map(|m| m.explicit_timestamp())
            .unwrap_or_default()
    }
}

impl Display for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.name, self.version_major, self.version_minor
        )
    }
}

fn validate_name(name: &str) -> Result<(), InterfaceError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_INTERFACE_NAME_LEN
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if !valid {
        return Err(InterfaceError::InvalidName(name.to_string()));
    }

    Ok(())
}

fn check_unambiguous(mappings: &[Mapping]) -> Result<(), InterfaceError> {
    for (i, mapping) in mappings.iter().enumerate() {
        for other in &mappings[i + 1..] {
            if mapping.endpoint() == other.endpoint() {
                return Err(InterfaceError::DuplicateMapping {
                    endpoint: mapping.endpoint().to_string(),
                    duplicate: other.endpoint().to_string(),
                });
            }

            if mapping.endpoint().overlaps(other.endpoint()) {
                return Err(InterfaceError::AmbiguousMapping {
                    endpoint: mapping.endpoint().to_string(),
                    duplicate: other.endpoint().to_string(),
                });
            }
        }
    }

    Ok(())
}

fn check_object_consistency(mappings: &[Mapping]) -> Result<(), InterfaceError> {
    let first = &mappings[0];

    if first.endpoint().levels() < 2 {
        return Err(InterfaceError::ObjectEndpointTooShort(
            first.endpoint().to_string(),
        ));
    }

    for mapping in &mappings[1..] {
        if !first.endpoint().same_parent(mapping.endpoint()) {
            return Err(InterfaceError::InconsistentEndpoints);
        }

        if first.reliability() != mapping.reliability()
            || first.explicit_timestamp() != mapping.explicit_timestamp()
        {
            return Err(InterfaceError::InconsistentMapping);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(endpoint: &str) -> Mapping {
        Mapping::new(endpoint, MappingType::Double).unwrap()
    }

    #[test]
    fn lookup_literal_and_parametric() {
        let interface = Interface::datastream_individual(
            "org.example.Sensors",
            0,
            1,
            Ownership::Device,
            vec![
                mapping("/sensors/%{id}/value"),
                mapping("/uptime"),
            ],
        )
        .unwrap();

        let path = MappingPath::try_from("/sensors/42/value").unwrap();
        assert_eq!(
            interface.mapping(&path).unwrap().endpoint().as_str(),
            "/sensors/%{id}/value"
        );

        let path = MappingPath::try_from("/uptime").unwrap();
        assert_eq!(
            interface.mapping(&path).unwrap().endpoint().as_str(),
            "/uptime"
        );

        let path = MappingPath::try_from("/sensors/42").unwrap();
        assert!(interface.mapping(&path).is_none());
    }

    #[test]
    fn ambiguous_templates_rejected_at_construction() {
        let res = Interface::datastream_individual(
            "org.example.Sensors",
            0,
            1,
            Ownership::Device,
            vec![
                mapping("/sensors/%{id}/value"),
                mapping("/sensors/42/value"),
            ],
        );

        assert!(matches!(res, Err(InterfaceError::AmbiguousMapping { .. })));
    }

    #[test]
    fn duplicate_endpoint_rejected() {
        let res = Interface::properties(
            "org.example.Props",
            1,
            0,
            Ownership::Device,
            vec![mapping("/a"), mapping("/a")],
        );

        assert!(matches!(res, Err(InterfaceError::DuplicateMapping { .. })));
    }

    #[test]
    fn version_zero_zero_rejected() {
        let res = Interface::datastream_individual(
            "org.example.Sensors",
            0,
            0,
            Ownership::Device,
            vec![mapping("/a")],
        );

        assert!(matches!(res, Err(InterfaceError::MajorMinor)));
    }

    #[test]
    fn empty_mappings_rejected() {
        let res = Interface::datastream_individual(
            "org.example.Sensors",
            0,
            1,
            Ownership::Device,
            vec![],
        );

        assert!(matches!(res, Err(InterfaceError::EmptyMappings)));
    }

    #[test]
    fn interface_name_is_validated() {
        let mappings = || vec![mapping("/a")];

        assert!(Interface::datastream_individual(
            "org.astarte-platform.Sensors",
            0,
            1,
            Ownership::Device,
            mappings()
        )
        .is_ok());

        for name in ["", ".leading", "trailing.", "with space", "with/slash"] {
            let res = Interface::datastream_individual(name, 0, 1, Ownership::Device, mappings());
            assert!(
                matches!(res, Err(InterfaceError::InvalidName(_))),
                "accepted invalid name {name:?}"
            );
        }

        let too_long = "a".repeat(MAX_INTERFACE_NAME_LEN + 1);
        let res = Interface::datastream_individual(&too_long, 0, 1, Ownership::Device, mappings());
        assert!(matches!(res, Err(InterfaceError::InvalidName(_))));
    }

    #[test]
    fn object_mappings_share_parent_and_policies() {
        let ok = Interface::datastream_object(
            "org.example.Obj",
            0,
            1,
            Ownership::Device,
            vec![mapping("/obj/one"), mapping("/obj/two")],
        );
        assert!(ok.is_ok());

        let res = Interface::datastream_object(
            "org.example.Obj",
            0,
            1,
            Ownership::Device,
            vec![mapping("/obj/one"), mapping("/other/two")],
        );
        assert!(matches!(res, Err(InterfaceError::InconsistentEndpoints)));

        let res = Interface::datastream_object(
            "org.example.Obj",
            0,
            1,
            Ownership::Device,
            vec![
                mapping("/obj/one").with_explicit_timestamp(true),
                mapping("/obj/two"),
            ],
        );
        assert!(matches!(res, Err(InterfaceError::InconsistentMapping)));

        let res = Interface::datastream_object(
            "org.example.Obj",
            0,
            1,
            Ownership::Device,
            vec![mapping("/shallow")],
        );
        assert!(matches!(
            res,
            Err(InterfaceError::ObjectEndpointTooShort(_))
        ));
    }

    #[test]
    fn properties_reject_object_aggregation() {
        let res = Interface::validated(
            "org.example.Props",
            1,
            0,
            InterfaceType::Properties,
            Ownership::Device,
            Aggregation::Object,
            vec![mapping("/obj/one")],
        );

        assert!(matches!(res, Err(InterfaceError::ObjectProperties)));
    }
}
