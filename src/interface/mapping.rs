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

//! Typed endpoint of an interface, addressed by a path template.

use std::fmt::Display;

use crate::interface::path::MappingPath;

/// Error while parsing an endpoint template.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EndpointError {
    /// The endpoint must start with a slash.
    #[error("endpoint must start with a slash: '{0}'")]
    Prefix(String),
    /// The endpoint has an empty segment.
    #[error("endpoint has an empty segment: '{0}'")]
    EmptySegment(String),
    /// A segment contains a character reserved by the template or MQTT syntax.
    #[error("invalid character '{chr}' in endpoint segment: '{endpoint}'")]
    InvalidCharacter {
        /// The offending character.
        chr: char,
        /// The full endpoint.
        endpoint: String,
    },
    /// A parametric segment with an empty name.
    #[error("parametric segment with an empty name: '{0}'")]
    EmptyParameter(String),
}

/// Segment of an endpoint template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    /// Matches only itself.
    Literal(String),
    /// `%{name}`, matches any single non-empty path segment.
    Parameter(String),
}

impl Segment {
    fn parse(segment: &str, endpoint: &str) -> Result<Self, EndpointError> {
        if let Some(name) = segment
            .strip_prefix("%{")
            .and_then(|rest| rest.strip_suffix('}'))
        {
            if name.is_empty() {
                return Err(EndpointError::EmptyParameter(endpoint.to_string()));
            }

            if let Some(chr) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
                return Err(EndpointError::InvalidCharacter {
                    chr,
                    endpoint: endpoint.to_string(),
                });
            }

            return Ok(Segment::Parameter(name.to_string()));
        }

        if let Some(chr) = segment
            .chars()
            .find(|&c| matches!(c, '%' | '{' | '}' | '#' | '+'))
        {
            return Err(EndpointError::InvalidCharacter {
                chr,
                endpoint: endpoint.to_string(),
            });
        }

        Ok(Segment::Literal(segment.to_string()))
    }

    fn matches(&self, segment: &str) -> bool {
        match self {
            Segment::Literal(literal) => literal == segment,
            // Path segments are already validated as non empty.
            Segment::Parameter(_) => true,
        }
    }

    /// Whether a path segment could match both self and other.
    fn overlaps(&self, other: &Segment) -> bool {
        match (self, other) {
            (Segment::Literal(a), Segment::Literal(b)) => a == b,
            _ => true,
        }
    }
}

/// Parsed endpoint template of a mapping.
///
/// Literal segments match exactly, `%{name}` segments match any non-empty segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    path: String,
    segments: Vec<Segment>,
}

impl Endpoint {
    /// Number of segments of the template.
    pub(crate) fn levels(&self) -> usize {
        self.segments.len()
    }

    /// The template as written.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Checks the path against the template.
    ///
    /// A path matches only when it has the same number of segments as the template.
    pub(crate) fn matches(&self, path: &MappingPath) -> bool {
        let segments = path.segments();

        self.segments.len() == segments.len()
            && self
                .segments
                .iter()
                .zip(segments)
                .all(|(template, segment)| template.matches(segment))
    }

    /// Whether some path could match both templates.
    ///
    /// Used at interface construction, two overlapping templates would make lookups ambiguous.
    pub(crate) fn overlaps(&self, other: &Endpoint) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a.overlaps(b))
    }

    /// Whether the two templates share every level but the last.
    pub(crate) fn same_parent(&self, other: &Endpoint) -> bool {
        self.segments.len() == other.segments.len()
            && self.segments[..self.segments.len() - 1] == other.segments[..other.segments.len() - 1]
    }
}

impl TryFrom<&str> for Endpoint {
    type Error = EndpointError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let rest = value
            .strip_prefix('/')
            .ok_or_else(|| EndpointError::Prefix(value.to_string()))?;

        if rest.is_empty() {
            return Err(EndpointError::EmptySegment(value.to_string()));
        }

        let segments = rest
            .split('/')
            .map(|segment| {
                if segment.is_empty() {
                    return Err(EndpointError::EmptySegment(value.to_string()));
                }

                Segment::parse(segment, value)
            })
            .collect::<Result<Vec<Segment>, EndpointError>>()?;

        Ok(Endpoint {
            path: value.to_string(),
            segments,
        })
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Types of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingType {
    /// Double mapping.
    Double,
    /// Integer mapping.
    Integer,
    /// Boolean mapping.
    Boolean,
    /// Long integer mapping.
    LongInteger,
    /// String mapping.
    String,
    /// Binary mapping.
    BinaryBlob,
    /// Date time mapping.
    DateTime,
    /// Double array mapping.
    DoubleArray,
    /// Integer array mapping.
    IntegerArray,
    /// Boolean array mapping.
    BooleanArray,
    /// Long integer array mapping.
    LongIntegerArray,
    /// String array mapping.
    StringArray,
    /// Binary array mapping.
    BinaryBlobArray,
    /// Date time array mapping.
    DateTimeArray,
}

impl Display for MappingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MappingType::Double => write!(f, "double"),
            MappingType::Integer => write!(f, "integer"),
            MappingType::Boolean => write!(f, "boolean"),
            MappingType::LongInteger => write!(f, "longinteger"),
            MappingType::String => write!(f, "string"),
            MappingType::BinaryBlob => write!(f, "binaryblob"),
            MappingType::DateTime => write!(f, "datetime"),
            MappingType::DoubleArray => write!(f, "doublearray"),
            MappingType::IntegerArray => write!(f, "integerarray"),
            MappingType::BooleanArray => write!(f, "booleanarray"),
            MappingType::LongIntegerArray => write!(f, "longintegerarray"),
            MappingType::StringArray => write!(f, "stringarray"),
            MappingType::BinaryBlobArray => write!(f, "binaryblobarray"),
            MappingType::DateTimeArray => write!(f, "datetimearray"),
        }
    }
}

/// Reliability of a data stream.
///
/// Defines whether the sent data should be considered delivered. Maps one to one onto the MQTT
/// QoS levels. Properties always have a unique reliability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Reliability {
    /// If the transport sends the data.
    #[default]
    Unreliable,
    /// When we know the data has been received at least once.
    Guaranteed,
    /// When we know the data has been received exactly once.
    Unique,
}

impl From<Reliability> for rumqttc::QoS {
    fn from(value: Reliability) -> Self {
        match value {
            Reliability::Unreliable => rumqttc::QoS::AtMostOnce,
            Reliability::Guaranteed => rumqttc::QoS::AtLeastOnce,
            Reliability::Unique => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Retention of a data stream.
///
/// Describes what to do with the sent data if the transport is incapable of delivering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    /// Data is discarded.
    #[default]
    Discard,
    /// Data is kept in a cache in memory.
    Volatile,
    /// Data is kept on disk.
    Stored,
}

/// A single typed endpoint of an interface.
///
/// Mappings are supplied as already validated descriptors, built with [`Mapping::new`] and the
/// `with_*` setters.
///
/// ```
/// use astarte_device_core::interface::{Mapping, MappingType, Reliability};
///
/// let mapping = Mapping::new("/sensors/%{id}/value", MappingType::Double)
///     .unwrap()
///     .with_reliability(Reliability::Guaranteed)
///     .with_explicit_timestamp(true);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    endpoint: Endpoint,
    mapping_type: MappingType,
    reliability: Reliability,
    retention: Retention,
    explicit_timestamp: bool,
    allow_unset: bool,
}

impl Mapping {
    /// Builds a mapping from its endpoint template and type.
    pub fn new(endpoint: &str, mapping_type: MappingType) -> Result<Self, EndpointError> {
        let endpoint = Endpoint::try_from(endpoint)?;

        Ok(Self {
            endpoint,
            mapping_type,
            reliability: Reliability::default(),
            retention: Retention::default(),
            explicit_timestamp: false,
            allow_unset: false,
        })
    }

    /// Sets the reliability, defaults to [`Reliability::Unreliable`].
    pub fn with_reliability(mut self, reliability: Reliability) -> Self {
        self.reliability = reliability;

        self
    }

    /// Sets the retention, defaults to [`Retention::Discard`].
    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;

        self
    }

    /// Marks the mapping as carrying an explicit timestamp.
    pub fn with_explicit_timestamp(mut self, explicit_timestamp: bool) -> Self {
        self.explicit_timestamp = explicit_timestamp;

        self
    }

    /// Permits unsetting the property of this mapping.
    pub fn with_allow_unset(mut self, allow_unset: bool) -> Self {
        self.allow_unset = allow_unset;

        self
    }

    /// The endpoint template.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The declared type.
    pub fn mapping_type(&self) -> MappingType {
        self.mapping_type
    }

    /// The declared reliability.
    pub fn reliability(&self) -> Reliability {
        self.reliability
    }

    /// The declared retention.
    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Whether payloads carry an explicit timestamp.
    pub fn explicit_timestamp(&self) -> bool {
        self.explicit_timestamp
    }

    /// Whether the property can be unset.
    pub fn allow_unset(&self) -> bool {
        self.allow_unset
    }
}
