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

//! Zero-copy walk over the elements of a received BSON document.

use std::str;

use super::{
    BsonError, MIN_DOCUMENT_SIZE, TYPE_ARRAY, TYPE_BINARY, TYPE_BOOLEAN, TYPE_DATETIME,
    TYPE_DOCUMENT, TYPE_DOUBLE, TYPE_INT32, TYPE_INT64, TYPE_STRING,
};

/// A validated BSON document borrowed from a received buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BsonDocument<'a> {
    bytes: &'a [u8],
}

impl<'a> BsonDocument<'a> {
    /// Validates the size prefix and terminator of the buffer.
    ///
    /// The declared size must fit the buffer; trailing bytes past the declared size are ignored.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, BsonError> {
        if bytes.len() < MIN_DOCUMENT_SIZE {
            return Err(BsonError::InvalidPrefix);
        }

        let size = read_i32(bytes)?;
        let size = usize::try_from(size).map_err(|_| BsonError::InvalidPrefix)?;

        if size < MIN_DOCUMENT_SIZE || size > bytes.len() {
            return Err(BsonError::InvalidPrefix);
        }

        if bytes[size - 1] != 0 {
            return Err(BsonError::InvalidPrefix);
        }

        Ok(Self {
            bytes: &bytes[..size],
        })
    }

    /// Returns the first element of the document, or [`None`] when it is empty.
    pub fn first_element(&self) -> Result<Option<BsonElement<'a>>, BsonError> {
        BsonElement::parse(&self.bytes[4..])
    }

    /// Walks the document looking for the element with the given name.
    pub fn lookup(&self, name: &str) -> Result<BsonElement<'a>, BsonError> {
        let mut element = self.first_element()?;

        while let Some(elem) = element {
            if elem.name() == name {
                return Ok(elem);
            }

            element = elem.next()?;
        }

        Err(BsonError::NotFound(name.to_string()))
    }

    /// The document bytes, size prefix and terminator included.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

/// A single element of a [`BsonDocument`].
///
/// The typed accessors don't allocate, strings and binaries are borrows into the document buffer.
#[derive(Debug, Clone, Copy)]
pub struct BsonElement<'a> {
    type_byte: u8,
    name: &'a str,
    body: &'a [u8],
    rest: &'a [u8],
}

impl<'a> BsonElement<'a> {
    /// Parses the element starting at the head of `region`, [`None`] on the document terminator.
    fn parse(region: &'a [u8]) -> Result<Option<Self>, BsonError> {
        let (&type_byte, after_type) = region.split_first().ok_or(BsonError::Truncated)?;

        if type_byte == 0 {
            return Ok(None);
        }

        let nul = after_type
            .iter()
            .position(|&b| b == 0)
            .ok_or(BsonError::Truncated)?;
        let name = str::from_utf8(&after_type[..nul]).map_err(|_| BsonError::InvalidPrefix)?;

        let after_name = &after_type[nul + 1..];
        let body_size = element_body_size(type_byte, after_name)?;

        Ok(Some(Self {
            type_byte,
            name,
            body: &after_name[..body_size],
            rest: &after_name[body_size..],
        }))
    }

    /// The element after this one, [`None`] when this is the last.
    pub fn next(&self) -> Result<Option<Self>, BsonError> {
        Self::parse(self.rest)
    }

    /// Name of the element.
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// BSON type byte of the element.
    pub fn element_type(&self) -> u8 {
        self.type_byte
    }

    fn check_type(&self, expected: u8) -> Result<(), BsonError> {
        if self.type_byte != expected {
            return Err(BsonError::TypeMismatch {
                expected,
                found: self.type_byte,
            });
        }

        Ok(())
    }

    /// Reads a double element.
    pub fn as_double(&self) -> Result<f64, BsonError> {
        self.check_type(TYPE_DOUBLE)?;

        Ok(f64::from_le_bytes(read_8(self.body)?))
    }

    /// Reads a string element as a borrow into the document.
    pub fn as_str(&self) -> Result<&'a str, BsonError> {
        self.check_type(TYPE_STRING)?;

        // Length and NUL already validated while sizing, only the UTF-8 check is left.
        let bytes = &self.body[4..self.body.len() - 1];

        str::from_utf8(bytes).map_err(|_| BsonError::InvalidPrefix)
    }

    /// Reads a binary element as a borrow into the document, subtype excluded.
    pub fn as_binary(&self) -> Result<&'a [u8], BsonError> {
        self.check_type(TYPE_BINARY)?;

        Ok(&self.body[5..])
    }

    /// Reads a boolean element.
    pub fn as_bool(&self) -> Result<bool, BsonError> {
        self.check_type(TYPE_BOOLEAN)?;

        Ok(self.body[0] != 0)
    }

    /// Reads a UTC datetime element as milliseconds since the Unix epoch.
    pub fn as_datetime_millis(&self) -> Result<i64, BsonError> {
        self.check_type(TYPE_DATETIME)?;

        Ok(i64::from_le_bytes(read_8(self.body)?))
    }

    /// Reads an int32 element.
    pub fn as_i32(&self) -> Result<i32, BsonError> {
        self.check_type(TYPE_INT32)?;

        read_i32(self.body)
    }

    /// Reads an int64 element, widening an int32 element when found instead.
    pub fn as_i64(&self) -> Result<i64, BsonError> {
        match self.type_byte {
            TYPE_INT32 => read_i32(self.body).map(i64::from),
            TYPE_INT64 => Ok(i64::from_le_bytes(read_8(self.body)?)),
            found => Err(BsonError::TypeMismatch {
                expected: TYPE_INT64,
                found,
            }),
        }
    }

    /// Reads an embedded document element.
    pub fn as_document(&self) -> Result<BsonDocument<'a>, BsonError> {
        self.check_type(TYPE_DOCUMENT)?;

        BsonDocument::parse(self.body)
    }

    /// Reads an array element as its backing document.
    pub fn as_array(&self) -> Result<BsonDocument<'a>, BsonError> {
        self.check_type(TYPE_ARRAY)?;

        BsonDocument::parse(self.body)
    }
}

/// Size in bytes of the element body starting at `bytes`, bounds checked.
fn element_body_size(type_byte: u8, bytes: &[u8]) -> Result<usize, BsonError> {
    let size = match type_byte {
        TYPE_DOUBLE | TYPE_DATETIME | TYPE_INT64 => 8,
        TYPE_BOOLEAN => 1,
        TYPE_INT32 => 4,
        TYPE_STRING => {
            let len = read_len(bytes)?;
            if len < 1 {
                return Err(BsonError::InvalidPrefix);
            }

            4 + len
        }
        TYPE_BINARY => 4 + 1 + read_len(bytes)?,
        TYPE_DOCUMENT | TYPE_ARRAY => {
            let size = read_len(bytes)?;
            if size < MIN_DOCUMENT_SIZE {
                return Err(BsonError::InvalidPrefix);
            }

            size
        }
        found => {
            return Err(BsonError::TypeMismatch { expected: 0, found });
        }
    };

    if bytes.len() < size {
        return Err(BsonError::Truncated);
    }

    // A string body must end with its NUL terminator.
    if type_byte == TYPE_STRING && bytes[size - 1] != 0 {
        return Err(BsonError::InvalidPrefix);
    }

    Ok(size)
}

fn read_i32(bytes: &[u8]) -> Result<i32, BsonError> {
    let arr: [u8; 4] = bytes
        .get(..4)
        .ok_or(BsonError::Truncated)?
        .try_into()
        .map_err(|_| BsonError::Truncated)?;

    Ok(i32::from_le_bytes(arr))
}

fn read_len(bytes: &[u8]) -> Result<usize, BsonError> {
    usize::try_from(read_i32(bytes)?).map_err(|_| BsonError::InvalidPrefix)
}

fn read_8(bytes: &[u8]) -> Result<[u8; 8], BsonError> {
    bytes
        .get(..8)
        .ok_or(BsonError::Truncated)?
        .try_into()
        .map_err(|_| BsonError::Truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bson::BsonSerializer;

    use pretty_assertions::assert_eq;

    fn doc_with<F>(build: F) -> Vec<u8>
    where
        F: FnOnce(&mut BsonSerializer),
    {
        let mut ser = BsonSerializer::new();
        build(&mut ser);
        ser.end()
    }

    #[test]
    fn round_trip_every_element_type() {
        let bytes = doc_with(|ser| {
            ser.append_double("double", -1.25);
            ser.append_string("string", "value");
            ser.append_binary("binary", &[1, 2, 3]);
            ser.append_boolean("boolean", false);
            ser.append_datetime("datetime", 1627580808000);
            ser.append_int32("int32", i32::MIN);
            ser.append_int64("int64", i64::MAX);
        });

        let doc = BsonDocument::parse(&bytes).unwrap();

        assert_eq!(doc.lookup("double").unwrap().as_double().unwrap(), -1.25);
        assert_eq!(doc.lookup("string").unwrap().as_str().unwrap(), "value");
        assert_eq!(
            doc.lookup("binary").unwrap().as_binary().unwrap(),
            &[1, 2, 3]
        );
        assert!(!doc.lookup("boolean").unwrap().as_bool().unwrap());
        assert_eq!(
            doc.lookup("datetime")
                .unwrap()
                .as_datetime_millis()
                .unwrap(),
            1627580808000
        );
        assert_eq!(doc.lookup("int32").unwrap().as_i32().unwrap(), i32::MIN);
        assert_eq!(doc.lookup("int64").unwrap().as_i64().unwrap(), i64::MAX);
    }

    #[test]
    fn empty_document_has_no_first_element() {
        let bytes = doc_with(|_| {});
        let doc = BsonDocument::parse(&bytes).unwrap();

        assert!(doc.first_element().unwrap().is_none());
    }

    #[test]
    fn element_walk_preserves_order() {
        let bytes = doc_with(|ser| {
            ser.append_int32("a", 1);
            ser.append_int32("b", 2);
            ser.append_int32("c", 3);
        });
        let doc = BsonDocument::parse(&bytes).unwrap();

        let first = doc.first_element().unwrap().unwrap();
        let second = first.next().unwrap().unwrap();
        let third = second.next().unwrap().unwrap();

        assert_eq!(
            [first.name(), second.name(), third.name()],
            ["a", "b", "c"]
        );
        assert!(third.next().unwrap().is_none());
    }

    #[test]
    fn lookup_missing_element() {
        let bytes = doc_with(|ser| ser.append_boolean("here", true));
        let doc = BsonDocument::parse(&bytes).unwrap();

        let err = doc.lookup("missing").unwrap_err();
        assert_eq!(err, BsonError::NotFound("missing".to_string()));
    }

    #[test]
    fn prefix_larger_than_buffer() {
        let mut bytes = doc_with(|ser| ser.append_int32("a", 1));
        bytes[0] = bytes[0].wrapping_add(1);

        assert_eq!(
            BsonDocument::parse(&bytes).unwrap_err(),
            BsonError::InvalidPrefix
        );
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert_eq!(
            BsonDocument::parse(&[4, 0, 0, 0]).unwrap_err(),
            BsonError::InvalidPrefix
        );
    }

    #[test]
    fn truncated_element_body() {
        let bytes = doc_with(|ser| ser.append_int64("a", 42));
        // Cut the body short but fix the prefix so it passes the document check.
        let mut cut = bytes[..bytes.len() - 5].to_vec();
        let size = cut.len() as i32;
        cut[0..4].copy_from_slice(&size.to_le_bytes());
        *cut.last_mut().unwrap() = 0;

        let doc = BsonDocument::parse(&cut).unwrap();
        assert_eq!(doc.first_element().unwrap_err(), BsonError::Truncated);
    }

    #[test]
    fn int32_widens_to_i64() {
        let bytes = doc_with(|ser| ser.append_int32("v", -7));
        let doc = BsonDocument::parse(&bytes).unwrap();

        assert_eq!(doc.lookup("v").unwrap().as_i64().unwrap(), -7);
    }

    #[test]
    fn int64_does_not_narrow_to_i32() {
        let bytes = doc_with(|ser| ser.append_int64("v", 7));
        let doc = BsonDocument::parse(&bytes).unwrap();

        let err = doc.lookup("v").unwrap().as_i32().unwrap_err();
        assert_eq!(
            err,
            BsonError::TypeMismatch {
                expected: TYPE_INT32,
                found: TYPE_INT64
            }
        );
    }

    #[test]
    fn accessor_type_mismatch() {
        let bytes = doc_with(|ser| ser.append_string("v", "not a double"));
        let doc = BsonDocument::parse(&bytes).unwrap();

        let err = doc.lookup("v").unwrap().as_double().unwrap_err();
        assert_eq!(
            err,
            BsonError::TypeMismatch {
                expected: TYPE_DOUBLE,
                found: TYPE_STRING
            }
        );
    }

    #[test]
    fn embedded_document_walk() {
        let inner = doc_with(|ser| {
            ser.append_string("key", "value");
        });
        let bytes = doc_with(|ser| ser.append_document("v", &inner));

        let doc = BsonDocument::parse(&bytes).unwrap();
        let nested = doc.lookup("v").unwrap().as_document().unwrap();

        assert_eq!(nested.lookup("key").unwrap().as_str().unwrap(), "value");
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut bytes = doc_with(|ser| ser.append_boolean("v", true));
        bytes.extend_from_slice(&[0xff, 0xff]);

        let doc = BsonDocument::parse(&bytes).unwrap();
        assert!(doc.lookup("v").unwrap().as_bool().unwrap());
    }
}
