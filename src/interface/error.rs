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

//! Errors generated by the interface module.

use super::mapping::EndpointError;
use super::MAX_INTERFACE_MAPPINGS;

/// Error for validating an interface descriptor.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum InterfaceError {
    /// The interface name is not a valid reverse domain name.
    #[error("invalid interface name '{0}'")]
    InvalidName(String),
    /// Both major and minor are 0.
    #[error("wrong major and minor")]
    MajorMinor,
    /// The interface has no mapping with the given path.
    #[error("couldn't find the mapping '{path}' in the interface")]
    MappingNotFound {
        /// Path the lookup was performed with.
        path: String,
    },
    /// No interface with the given name in the introspection.
    #[error("couldn't find the interface '{name}'")]
    InterfaceNotFound {
        /// Name of the missing interface.
        name: String,
    },
    /// Error while parsing the endpoint.
    #[error("invalid endpoint")]
    InvalidEndpoint(#[from] EndpointError),
    /// The interface has no mappings.
    #[error("interface with no mappings")]
    EmptyMappings,
    /// The object must have mappings with the same reliability and timestamp policy.
    #[error("object with inconsistent mappings")]
    InconsistentMapping,
    /// The object interface must have the same levels for every mapping, except the last one.
    #[error("object with inconsistent endpoints")]
    InconsistentEndpoints,
    /// The interface endpoints must all be unique.
    #[error("duplicate endpoint mapping '{endpoint}' and '{duplicate}'")]
    DuplicateMapping {
        /// First of the two clashing endpoints.
        endpoint: String,
        /// The endpoint clashing with it.
        duplicate: String,
    },
    /// Two endpoint templates that could both match the same path.
    #[error("ambiguous endpoint mapping '{endpoint}' and '{duplicate}'")]
    AmbiguousMapping {
        /// First of the two overlapping endpoints.
        endpoint: String,
        /// The endpoint overlapping with it.
        duplicate: String,
    },
    /// The object interface should have at least 2 levels.
    #[error("object endpoint should have at least 2 levels: '{0}'")]
    ObjectEndpointTooShort(String),
    /// Properties interfaces are always individually aggregated.
    #[error("properties interfaces can't use object aggregation")]
    ObjectProperties,
    /// Interface with too many mappings.
    #[error(
        "too many mappings {0}, interfaces can have a max of {max} mappings",
        max = MAX_INTERFACE_MAPPINGS
    )]
    TooManyMappings(usize),
    /// Two interfaces with the same name.
    #[error("duplicate interface '{name}' in the introspection")]
    DuplicateInterface {
        /// The duplicated name.
        name: String,
    },
}
