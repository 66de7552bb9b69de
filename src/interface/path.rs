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

//! Path of a mapping, as sent on a topic or passed to the send functions.

use std::fmt::Display;

/// Error while parsing a mapping path.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum MappingError {
    /// The path must start with a slash.
    #[error("path must start with a slash: '{0}'")]
    Prefix(String),
    /// The path has an empty segment.
    #[error("path has an empty segment: '{0}'")]
    EmptySegment(String),
}

/// A validated mapping path, split into its segments.
///
/// Borrows the input since it only lives for the duration of a lookup or send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingPath<'a> {
    path: &'a str,
    segments: Vec<&'a str>,
}

impl<'a> MappingPath<'a> {
    /// The path as received.
    pub fn as_str(&self) -> &'a str {
        self.path
    }

    /// Segments between the slashes.
    pub(crate) fn segments(&self) -> &[&'a str] {
        &self.segments
    }
}

impl<'a> TryFrom<&'a str> for MappingPath<'a> {
    type Error = MappingError;

    fn try_from(value: &'a str) -> Result<Self, Self::Error> {
        let rest = value
            .strip_prefix('/')
            .ok_or_else(|| MappingError::Prefix(value.to_string()))?;

        if rest.is_empty() {
            return Err(MappingError::EmptySegment(value.to_string()));
        }

        let segments = rest
            .split('/')
            .map(|segment| {
                if segment.is_empty() {
                    return Err(MappingError::EmptySegment(value.to_string()));
                }

                Ok(segment)
            })
            .collect::<Result<Vec<&str>, MappingError>>()?;

        Ok(MappingPath {
            path: value,
            segments,
        })
    }
}

impl Display for MappingPath<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_segments() {
        let path = MappingPath::try_from("/a/b/c").unwrap();

        assert_eq!(path.segments(), ["a", "b", "c"]);
        assert_eq!(path.as_str(), "/a/b/c");
    }

    #[test]
    fn rejects_missing_prefix() {
        assert!(matches!(
            MappingPath::try_from("a/b"),
            Err(MappingError::Prefix(_))
        ));
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(matches!(
            MappingPath::try_from("/"),
            Err(MappingError::EmptySegment(_))
        ));
        assert!(matches!(
            MappingPath::try_from("/a//b"),
            Err(MappingError::EmptySegment(_))
        ));
        assert!(matches!(
            MappingPath::try_from("/a/"),
            Err(MappingError::EmptySegment(_))
        ));
    }
}
