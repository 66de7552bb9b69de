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

//! Provides Astarte specific types to be used to transmit and receive data.

use chrono::{DateTime, TimeZone, Utc};

use crate::bson::{
    BsonElement, BsonError, BsonSerializer, TYPE_ARRAY, TYPE_BINARY, TYPE_BOOLEAN, TYPE_DATETIME,
    TYPE_DOUBLE, TYPE_INT32, TYPE_INT64, TYPE_STRING,
};
use crate::interface::MappingType;

/// Errors converting or decoding an [`AstarteData`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeError {
    /// The value has a different mapping type than the one declared for the endpoint.
    #[error("expected value of mapping type {expected}, got {got}")]
    Mismatch {
        /// Mapping type declared by the endpoint.
        expected: MappingType,
        /// Mapping type of the value.
        got: MappingType,
    },
    /// The BSON element isn't the canonical encoding for the mapping type.
    #[error("BSON element of type {found:#04x} can't be decoded as mapping type {expected}")]
    Decode {
        /// Mapping type declared by the endpoint.
        expected: MappingType,
        /// Type byte found in the document.
        found: u8,
    },
    /// The datetime doesn't fit the representable range.
    #[error("datetime out of the representable range: {0} ms")]
    OutOfRangeDateTime(i64),
    /// Couldn't convert the value.
    #[error("couldn't convert the value to the requested type")]
    Conversion,
    /// Malformed BSON while walking an array or a nested document.
    #[error("couldn't walk the BSON payload")]
    Bson(#[from] BsonError),
}

/// Types supported by the Astarte mappings.
///
/// An implementation of the [From] or [TryFrom] trait is provided for the encapsulated base types.
///
/// ```
/// use astarte_device_core::types::AstarteData;
///
/// let data: AstarteData = 3.14_f64.into();
/// let value = f64::try_from(data).unwrap();
/// assert_eq!(value, 3.14);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum AstarteData {
    /// Double value.
    Double(f64),
    /// Singed integer value.
    Integer(i32),
    /// Boolean value.
    Boolean(bool),
    /// Long integer value.
    LongInteger(i64),
    /// String value.
    String(String),
    /// Binary value.
    BinaryBlob(Vec<u8>),
    /// Date time value.
    DateTime(DateTime<Utc>),
    /// Double array value.
    DoubleArray(Vec<f64>),
    /// Integer array value.
    IntegerArray(Vec<i32>),
    /// Boolean array value.
    BooleanArray(Vec<bool>),
    /// Long integer array value.
    LongIntegerArray(Vec<i64>),
    /// String array value.
    StringArray(Vec<String>),
    /// Binary array value.
    BinaryBlobArray(Vec<Vec<u8>>),
    /// Date time array value.
    DateTimeArray(Vec<DateTime<Utc>>),
}

impl AstarteData {
    /// Mapping type of the value.
    pub fn mapping_type(&self) -> MappingType {
        match self {
            AstarteData::Double(_) => MappingType::Double,
            AstarteData::Integer(_) => MappingType::Integer,
            AstarteData::Boolean(_) => MappingType::Boolean,
            AstarteData::LongInteger(_) => MappingType::LongInteger,
            AstarteData::String(_) => MappingType::String,
            AstarteData::BinaryBlob(_) => MappingType::BinaryBlob,
            AstarteData::DateTime(_) => MappingType::DateTime,
            AstarteData::DoubleArray(_) => MappingType::DoubleArray,
            AstarteData::IntegerArray(_) => MappingType::IntegerArray,
            AstarteData::BooleanArray(_) => MappingType::BooleanArray,
            AstarteData::LongIntegerArray(_) => MappingType::LongIntegerArray,
            AstarteData::StringArray(_) => MappingType::StringArray,
            AstarteData::BinaryBlobArray(_) => MappingType::BinaryBlobArray,
            AstarteData::DateTimeArray(_) => MappingType::DateTimeArray,
        }
    }

    /// Appends the value to the document under the given key.
    ///
    /// Arrays nest a document with decimal string keys in index order.
    pub fn serialize(&self, name: &str, ser: &mut BsonSerializer) {
        match self {
            AstarteData::Double(v) => ser.append_double(name, *v),
            AstarteData::Integer(v) => ser.append_int32(name, *v),
            AstarteData::Boolean(v) => ser.append_boolean(name, *v),
            AstarteData::LongInteger(v) => ser.append_int64(name, *v),
            AstarteData::String(v) => ser.append_string(name, v),
            AstarteData::BinaryBlob(v) => ser.append_binary(name, v),
            AstarteData::DateTime(v) => ser.append_datetime(name, v.timestamp_millis()),
            AstarteData::DoubleArray(arr) => {
                serialize_array(ser, name, arr, |ser, key, v| ser.append_double(key, *v))
            }
            AstarteData::IntegerArray(arr) => {
                serialize_array(ser, name, arr, |ser, key, v| ser.append_int32(key, *v))
            }
            AstarteData::BooleanArray(arr) => {
                serialize_array(ser, name, arr, |ser, key, v| ser.append_boolean(key, *v))
            }
            AstarteData::LongIntegerArray(arr) => {
                serialize_array(ser, name, arr, |ser, key, v| ser.append_int64(key, *v))
            }
            AstarteData::StringArray(arr) => {
                serialize_array(ser, name, arr, |ser, key, v| ser.append_string(key, v))
            }
            AstarteData::BinaryBlobArray(arr) => {
                serialize_array(ser, name, arr, |ser, key, v| ser.append_binary(key, v))
            }
            AstarteData::DateTimeArray(arr) => serialize_array(ser, name, arr, |ser, key, v| {
                ser.append_datetime(key, v.timestamp_millis())
            }),
        }
    }

    /// Decodes a BSON element against the mapping type declared for the endpoint.
    ///
    /// The element must be the canonical encoding of the mapping type, with the single exception
    /// of int32, which is widened where a long integer is expected. Array elements are checked
    /// against the scalar form of the mapping type and an empty nested document decodes to an
    /// empty array.
    pub fn deserialize(element: &BsonElement, expected: MappingType) -> Result<Self, TypeError> {
        let found = element.element_type();
        let mismatch = || TypeError::Decode { expected, found };

        match expected {
            MappingType::Double => {
                check_element_type(found, TYPE_DOUBLE, expected)?;
                element.as_double().map(AstarteData::Double).map_err(Into::into)
            }
            MappingType::Integer => {
                check_element_type(found, TYPE_INT32, expected)?;
                element.as_i32().map(AstarteData::Integer).map_err(Into::into)
            }
            MappingType::Boolean => {
                check_element_type(found, TYPE_BOOLEAN, expected)?;
                element.as_bool().map(AstarteData::Boolean).map_err(Into::into)
            }
            MappingType::LongInteger => {
                if found != TYPE_INT64 && found != TYPE_INT32 {
                    return Err(mismatch());
                }

                element
                    .as_i64()
                    .map(AstarteData::LongInteger)
                    .map_err(Into::into)
            }
            MappingType::String => {
                check_element_type(found, TYPE_STRING, expected)?;
                element
                    .as_str()
                    .map(|s| AstarteData::String(s.to_string()))
                    .map_err(Into::into)
            }
            MappingType::BinaryBlob => {
                check_element_type(found, TYPE_BINARY, expected)?;
                element
                    .as_binary()
                    .map(|b| AstarteData::BinaryBlob(b.to_vec()))
                    .map_err(Into::into)
            }
            MappingType::DateTime => {
                check_element_type(found, TYPE_DATETIME, expected)?;
                let millis = element.as_datetime_millis()?;

                datetime_from_millis(millis).map(AstarteData::DateTime)
            }
            MappingType::DoubleArray => {
                check_element_type(found, TYPE_ARRAY, expected)?;
                collect_array(element, MappingType::Double).map(AstarteData::DoubleArray)
            }
            MappingType::IntegerArray => {
                check_element_type(found, TYPE_ARRAY, expected)?;
                collect_array(element, MappingType::Integer).map(AstarteData::IntegerArray)
            }
            MappingType::BooleanArray => {
                check_element_type(found, TYPE_ARRAY, expected)?;
                collect_array(element, MappingType::Boolean).map(AstarteData::BooleanArray)
            }
            MappingType::LongIntegerArray => {
                check_element_type(found, TYPE_ARRAY, expected)?;
                collect_array(element, MappingType::LongInteger).map(AstarteData::LongIntegerArray)
            }
            MappingType::StringArray => {
                check_element_type(found, TYPE_ARRAY, expected)?;
                collect_array(element, MappingType::String).map(AstarteData::StringArray)
            }
            MappingType::BinaryBlobArray => {
                check_element_type(found, TYPE_ARRAY, expected)?;
                collect_array(element, MappingType::BinaryBlob).map(AstarteData::BinaryBlobArray)
            }
            MappingType::DateTimeArray => {
                check_element_type(found, TYPE_ARRAY, expected)?;
                collect_array(element, MappingType::DateTime).map(AstarteData::DateTimeArray)
            }
        }
    }
}

fn check_element_type(found: u8, canonical: u8, expected: MappingType) -> Result<(), TypeError> {
    if found != canonical {
        return Err(TypeError::Decode { expected, found });
    }

    Ok(())
}

fn serialize_array<T, F>(ser: &mut BsonSerializer, name: &str, items: &[T], mut append: F)
where
    F: FnMut(&mut BsonSerializer, &str, &T),
{
    let mut inner = BsonSerializer::new();
    for (i, item) in items.iter().enumerate() {
        append(&mut inner, &i.to_string(), item);
    }

    ser.append_array_document(name, &inner.end());
}

/// Walks the nested array document decoding every element as the scalar mapping type.
fn collect_array<T>(element: &BsonElement, scalar: MappingType) -> Result<Vec<T>, TypeError>
where
    T: TryFrom<AstarteData, Error = TypeError>,
{
    let doc = element.as_array()?;

    let mut out = Vec::new();
    let mut element = doc.first_element()?;
    while let Some(elem) = element {
        let data = AstarteData::deserialize(&elem, scalar)?;
        out.push(T::try_from(data)?);

        element = elem.next()?;
    }

    Ok(out)
}

fn datetime_from_millis(millis: i64) -> Result<DateTime<Utc>, TypeError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(TypeError::OutOfRangeDateTime(millis))
}

macro_rules! impl_type_conversion_traits {
    ( {$( ($typ:ty, $variant:tt) ,)*}) => {
        $(
            impl From<$typ> for AstarteData {
                fn from(d: $typ) -> Self {
                    AstarteData::$variant(d)
                }
            }

            impl TryFrom<AstarteData> for $typ {
                type Error = TypeError;

                fn try_from(var: AstarteData) -> Result<Self, Self::Error> {
                    match var {
                        AstarteData::$variant(val) => Ok(val),
                        _ => Err(TypeError::Conversion),
                    }
                }
            }
        )*
    };
}

impl_type_conversion_traits!({
    (f64, Double),
    (i32, Integer),
    (bool, Boolean),
    (i64, LongInteger),
    (String, String),
    (Vec<u8>, BinaryBlob),
    (DateTime<Utc>, DateTime),
    (Vec<f64>, DoubleArray),
    (Vec<i32>, IntegerArray),
    (Vec<bool>, BooleanArray),
    (Vec<i64>, LongIntegerArray),
    (Vec<String>, StringArray),
    (Vec<Vec<u8>>, BinaryBlobArray),
    (Vec<DateTime<Utc>>, DateTimeArray),
});

impl From<&str> for AstarteData {
    fn from(d: &str) -> Self {
        AstarteData::String(d.to_string())
    }
}
