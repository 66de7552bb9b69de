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

//! Minimal little-endian BSON codec for the subset of the wire format used by the Astarte
//! transport.
//!
//! A document is `int32 total_size | element* | 0x00` and an element is
//! `type_byte | cstring name | body`. The [`ser::BsonSerializer`] builds documents into a growable
//! buffer, while [`de::BsonDocument`] walks the elements of a received document without copying
//! its payload.

pub mod de;
pub mod ser;

pub use self::de::{BsonDocument, BsonElement};
pub use self::ser::BsonSerializer;

/// 64-bit binary floating point.
pub(crate) const TYPE_DOUBLE: u8 = 0x01;
/// UTF-8 string, length prefixed and NUL terminated.
pub(crate) const TYPE_STRING: u8 = 0x02;
/// Embedded document.
pub(crate) const TYPE_DOCUMENT: u8 = 0x03;
/// Array, encoded as a document with decimal string keys.
pub(crate) const TYPE_ARRAY: u8 = 0x04;
/// Binary data with a subtype byte.
pub(crate) const TYPE_BINARY: u8 = 0x05;
/// Boolean, a single `0x00`/`0x01` byte.
pub(crate) const TYPE_BOOLEAN: u8 = 0x08;
/// UTC datetime, milliseconds since the Unix epoch as int64.
pub(crate) const TYPE_DATETIME: u8 = 0x09;
/// 32-bit signed integer.
pub(crate) const TYPE_INT32: u8 = 0x10;
/// 64-bit signed integer.
pub(crate) const TYPE_INT64: u8 = 0x12;

/// Generic binary subtype, the only one Astarte uses.
pub(crate) const SUBTYPE_DEFAULT_BINARY: u8 = 0x00;

/// Smallest valid document: the size prefix plus the terminator.
pub(crate) const MIN_DOCUMENT_SIZE: usize = 5;

/// Error while encoding or walking a BSON document.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BsonError {
    /// The declared document size doesn't fit the buffer.
    #[error("document size prefix doesn't match the received buffer")]
    InvalidPrefix,
    /// An element had a different type byte than the requested one.
    #[error("element has BSON type {found:#04x}, expected {expected:#04x}")]
    TypeMismatch {
        /// The type byte the accessor expected.
        expected: u8,
        /// The type byte found in the document.
        found: u8,
    },
    /// No element with the requested name.
    #[error("no element named '{0}' in the document")]
    NotFound(String),
    /// The buffer ended in the middle of an element.
    #[error("document truncated while walking its elements")]
    Truncated,
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    // The codec has to interoperate with the documents produced and consumed by the Astarte
    // cluster, so cross check both directions against the reference implementation.
    #[test]
    fn serializer_output_matches_reference_crate() {
        let mut ser = BsonSerializer::new();
        ser.append_double("d", 4.5);
        ser.append_string("s", "some value");
        ser.append_boolean("b", true);
        ser.append_int32("i", -71);
        ser.append_int64("l", 45543543534);
        ser.append_binary("bin", b"blob");
        ser.append_datetime("t", 1537449422000);
        let ours = ser.end();

        let timestamp = Utc.timestamp_millis_opt(1537449422000).unwrap();
        let reference = bson::doc! {
            "d": 4.5,
            "s": "some value",
            "b": true,
            "i": -71_i32,
            "l": 45543543534_i64,
            "bin": bson::Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: b"blob".to_vec(),
            },
            "t": timestamp,
        };

        assert_eq!(ours, bson::to_vec(&reference).unwrap());
    }

    #[test]
    fn deserializer_reads_reference_crate_output() {
        let reference = bson::doc! {
            "v": [1.5_f64, 2.5, 3.5],
        };
        let bytes = bson::to_vec(&reference).unwrap();

        let doc = BsonDocument::parse(&bytes).unwrap();
        let v = doc.lookup("v").unwrap();
        let array = v.as_array().unwrap();

        let mut values = Vec::new();
        let mut element = array.first_element().unwrap();
        while let Some(elem) = element {
            values.push(elem.as_double().unwrap());
            element = elem.next().unwrap();
        }

        assert_eq!(values, [1.5, 2.5, 3.5]);
    }
}
