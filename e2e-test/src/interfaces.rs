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

//! Interface descriptors used by the end to end test.
//!
//! Each pair of device and server owned interfaces has an endpoint for every supported mapping
//! type.

use astarte_device_core::interface::{
    Interface, Mapping, MappingType, Ownership, Reliability,
};

pub const DEVICE_DATASTREAM: &str = "org.astarte-platform.e2etest.DeviceDatastream";
pub const SERVER_DATASTREAM: &str = "org.astarte-platform.e2etest.ServerDatastream";
pub const DEVICE_PROPERTY: &str = "org.astarte-platform.e2etest.DeviceProperty";
pub const SERVER_PROPERTY: &str = "org.astarte-platform.e2etest.ServerProperty";
pub const DEVICE_AGGREGATE: &str = "org.astarte-platform.e2etest.DeviceAggregate";
pub const SERVER_AGGREGATE: &str = "org.astarte-platform.e2etest.ServerAggregate";

const ENDPOINTS: [(MappingType, &str); 14] = [
    (MappingType::Double, "double_endpoint"),
    (MappingType::Integer, "integer_endpoint"),
    (MappingType::Boolean, "boolean_endpoint"),
    (MappingType::LongInteger, "longinteger_endpoint"),
    (MappingType::String, "string_endpoint"),
    (MappingType::BinaryBlob, "binaryblob_endpoint"),
    (MappingType::DateTime, "datetime_endpoint"),
    (MappingType::DoubleArray, "doublearray_endpoint"),
    (MappingType::IntegerArray, "integerarray_endpoint"),
    (MappingType::BooleanArray, "booleanarray_endpoint"),
    (MappingType::LongIntegerArray, "longintegerarray_endpoint"),
    (MappingType::StringArray, "stringarray_endpoint"),
    (MappingType::BinaryBlobArray, "binaryblobarray_endpoint"),
    (MappingType::DateTimeArray, "datetimearray_endpoint"),
];

/// Every interface the test device declares, in introspection order.
pub fn all() -> Vec<Interface> {
    vec![
        datastream(DEVICE_DATASTREAM, Ownership::Device),
        datastream(SERVER_DATASTREAM, Ownership::Server),
        property(DEVICE_PROPERTY, Ownership::Device),
        property(SERVER_PROPERTY, Ownership::Server),
        aggregate(DEVICE_AGGREGATE, Ownership::Device),
        aggregate(SERVER_AGGREGATE, Ownership::Server),
    ]
}

fn datastream(name: &str, ownership: Ownership) -> Interface {
    let mappings = ENDPOINTS
        .iter()
        .map(|(mapping_type, endpoint)| {
            Mapping::new(&format!("/{endpoint}"), *mapping_type)
                .unwrap()
                .with_reliability(Reliability::Guaranteed)
                .with_explicit_timestamp(true)
        })
        .collect();

    Interface::datastream_individual(name, 0, 1, ownership, mappings).unwrap()
}

fn property(name: &str, ownership: Ownership) -> Interface {
    let mappings = ENDPOINTS
        .iter()
        .map(|(mapping_type, endpoint)| {
            Mapping::new(&format!("/{endpoint}"), *mapping_type)
                .unwrap()
                .with_allow_unset(true)
        })
        .collect();

    Interface::properties(name, 0, 1, ownership, mappings).unwrap()
}

fn aggregate(name: &str, ownership: Ownership) -> Interface {
    let mappings = ENDPOINTS
        .iter()
        .map(|(mapping_type, endpoint)| {
            Mapping::new(&format!("/sensor/{endpoint}"), *mapping_type)
                .unwrap()
                .with_reliability(Reliability::Guaranteed)
                .with_explicit_timestamp(true)
        })
        .collect();

    Interface::datastream_object(name, 0, 1, ownership, mappings).unwrap()
}
