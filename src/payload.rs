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

//! Serialization of the data payloads exchanged on the MQTT data topics.
//!
//! A payload is a BSON document `{ "v": <value> }` with an optional `"t"` datetime when the
//! mapping declares an explicit timestamp.

use std::collections::HashMap;

use chrono::TimeZone;

use crate::bson::{BsonDocument, BsonError, BsonSerializer, TYPE_DOCUMENT};
use crate::interface::path::MappingError;
use crate::interface::{Interface, Mapping, MappingPath};
use crate::types::{AstarteData, TypeError};
use crate::Timestamp;

/// Error while encoding or decoding a data payload.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// Malformed BSON document.
    #[error("couldn't process the BSON document")]
    Bson(#[from] BsonError),
    /// The value doesn't decode against the declared mapping type.
    #[error("couldn't decode the value")]
    Type(#[from] TypeError),
    /// The document has no `"v"` field.
    #[error("payload document is missing the value field 'v'")]
    MissingValue,
    /// An object entry path has no mapping in the interface.
    #[error("no mapping for the object entry '{path}'")]
    MissingMapping {
        /// Full path of the entry.
        path: String,
    },
    /// An object entry key doesn't form a valid path.
    #[error("invalid object entry path")]
    Path(#[from] MappingError),
}

/// Encodes an individual value, with its timestamp when present.
pub fn serialize_individual(data: &AstarteData, timestamp: Option<Timestamp>) -> Vec<u8> {
    let mut ser = BsonSerializer::new();
    data.serialize("v", &mut ser);

    if let Some(timestamp) = timestamp {
        ser.append_datetime("t", timestamp.timestamp_millis());
    }

    ser.end()
}

/// Encodes an aggregate object, the entries become an embedded document under `"v"`.
pub fn serialize_object(
    entries: &HashMap<String, AstarteData>,
    timestamp: Option<Timestamp>,
) -> Vec<u8> {
    let mut inner = BsonSerializer::new();
    for (key, value) in entries {
        value.serialize(key, &mut inner);
    }

    let mut ser = BsonSerializer::new();
    ser.append_document("v", &inner.end());

    if let Some(timestamp) = timestamp {
        ser.append_datetime("t", timestamp.timestamp_millis());
    }

    ser.end()
}

/// Decodes an individual payload against the mapping of its endpoint.
pub fn deserialize_individual(
    mapping: &Mapping,
    payload: &[u8],
) -> Result<(AstarteData, Option<Timestamp>), PayloadError> {
    let doc = BsonDocument::parse(payload)?;
    let v_elem = lookup_value(&doc)?;

    let data = AstarteData::deserialize(&v_elem, mapping.mapping_type())?;
    let timestamp = deserialize_timestamp(&doc)?;

    Ok((data, timestamp))
}

/// Decodes an object payload, matching every entry against the interface mappings.
///
/// The received path is the common parent of the entries, each entry key is one more level.
pub fn deserialize_object(
    interface: &Interface,
    path: &MappingPath,
    payload: &[u8],
) -> Result<(HashMap<String, AstarteData>, Option<Timestamp>), PayloadError> {
    let doc = BsonDocument::parse(payload)?;
    let v_elem = lookup_value(&doc)?;

    if v_elem.element_type() != TYPE_DOCUMENT {
        return Err(BsonError::TypeMismatch {
            expected: TYPE_DOCUMENT,
            found: v_elem.element_type(),
        }
        .into());
    }

    let entries_doc = v_elem.as_document()?;

    let mut entries = HashMap::new();
    let mut element = entries_doc.first_element()?;
    while let Some(elem) = element {
        let full_path = format!("{}/{}", path.as_str(), elem.name());
        let entry_path = MappingPath::try_from(full_path.as_str())?;

        let mapping = interface
            .mapping(&entry_path)
            .ok_or_else(|| PayloadError::MissingMapping {
                path: full_path.clone(),
            })?;

        let data = AstarteData::deserialize(&elem, mapping.mapping_type())?;
        entries.insert(elem.name().to_string(), data);

        element = elem.next()?;
    }

    let timestamp = deserialize_timestamp(&doc)?;

    Ok((entries, timestamp))
}

fn lookup_value<'a>(doc: &BsonDocument<'a>) -> Result<crate::bson::BsonElement<'a>, PayloadError> {
    doc.lookup("v").map_err(|err| match err {
        BsonError::NotFound(_) => PayloadError::MissingValue,
        other => PayloadError::Bson(other),
    })
}

fn deserialize_timestamp(doc: &BsonDocument) -> Result<Option<Timestamp>, PayloadError> {
    let elem = match doc.lookup("t") {
        Ok(elem) => elem,
        Err(BsonError::NotFound(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let millis = elem.as_datetime_millis()?;
    let timestamp = chrono::Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or(TypeError::OutOfRangeDateTime(millis))?;

    Ok(Some(timestamp))
}
