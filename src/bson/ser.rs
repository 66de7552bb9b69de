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

//! BSON document builder.

use super::{
    SUBTYPE_DEFAULT_BINARY, TYPE_ARRAY, TYPE_BINARY, TYPE_BOOLEAN, TYPE_DATETIME, TYPE_DOCUMENT,
    TYPE_DOUBLE, TYPE_INT32, TYPE_INT64, TYPE_STRING,
};

/// Builder for a single BSON document.
///
/// Elements are appended in call order into a growable buffer seeded with a placeholder size
/// prefix. [`end`](BsonSerializer::end) writes the terminator and stamps the little-endian size
/// over the placeholder, returning the finished document.
#[derive(Debug, Clone)]
pub struct BsonSerializer {
    buf: Vec<u8>,
}

impl BsonSerializer {
    /// Creates a serializer with the size prefix reserved.
    pub fn new() -> Self {
        Self { buf: vec![0; 4] }
    }

    /// Current size of the document, including the prefix but not the terminator.
    pub fn document_size(&self) -> usize {
        self.buf.len()
    }

    fn append_element_header(&mut self, type_byte: u8, name: &str) {
        debug_assert!(!name.as_bytes().contains(&0), "element names are cstrings");

        self.buf.push(type_byte);
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
    }

    /// Appends a double element.
    pub fn append_double(&mut self, name: &str, value: f64) {
        self.append_element_header(TYPE_DOUBLE, name);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a UTF-8 string element.
    pub fn append_string(&mut self, name: &str, value: &str) {
        let len = value.len() + 1;

        self.append_element_header(TYPE_STRING, name);
        self.buf.extend_from_slice(&(len as i32).to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
    }

    /// Appends a binary element with the generic subtype.
    pub fn append_binary(&mut self, name: &str, value: &[u8]) {
        self.append_element_header(TYPE_BINARY, name);
        self.buf
            .extend_from_slice(&(value.len() as i32).to_le_bytes());
        self.buf.push(SUBTYPE_DEFAULT_BINARY);
        self.buf.extend_from_slice(value);
    }

    /// Appends a boolean element.
    pub fn append_boolean(&mut self, name: &str, value: bool) {
        self.append_element_header(TYPE_BOOLEAN, name);
        self.buf.push(u8::from(value));
    }

    /// Appends a UTC datetime element, milliseconds since the Unix epoch.
    pub fn append_datetime(&mut self, name: &str, epoch_millis: i64) {
        self.append_element_header(TYPE_DATETIME, name);
        self.buf.extend_from_slice(&epoch_millis.to_le_bytes());
    }

    /// Appends an int32 element.
    pub fn append_int32(&mut self, name: &str, value: i32) {
        self.append_element_header(TYPE_INT32, name);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends an int64 element.
    pub fn append_int64(&mut self, name: &str, value: i64) {
        self.append_element_header(TYPE_INT64, name);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends an already serialized document as an embedded document element.
    pub fn append_document(&mut self, name: &str, document: &[u8]) {
        self.append_element_header(TYPE_DOCUMENT, name);
        self.buf.extend_from_slice(document);
    }

    /// Appends an already serialized document as an array element.
    ///
    /// The nested document is expected to use decimal string keys `"0"`, `"1"`, … in index order,
    /// as produced by the typed array serializers.
    pub fn append_array_document(&mut self, name: &str, document: &[u8]) {
        self.append_element_header(TYPE_ARRAY, name);
        self.buf.extend_from_slice(document);
    }

    /// Terminates the document and stamps the size prefix.
    pub fn end(mut self) -> Vec<u8> {
        self.buf.push(0);

        let size = self.buf.len() as i32;
        self.buf[0..4].copy_from_slice(&size.to_le_bytes());

        self.buf
    }
}

impl Default for BsonSerializer {
    fn default() -> Self {
        Self::new()
    }
}
