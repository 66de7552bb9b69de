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

//! Generation of Astarte device identifiers.
//!
//! A device id is the URL-safe base64 encoding of a UUID, random (v4) or derived
//! deterministically from a namespace and a hardware identifier (v5).

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use uuid::Uuid;

/// Length of the canonical hyphenated UUID text form.
const UUID_STR_LEN: usize = 36;

/// Positions of the hyphens in the canonical text form.
const HYPHEN_POSITIONS: [usize; 4] = [8, 13, 18, 23];

/// Length of the URL-safe unpadded base64 form of a UUID.
const UUID_BASE64URL_LEN: usize = 22;

/// Error while decoding a device id or a UUID.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum DeviceIdError {
    /// The input has the wrong length.
    #[error("expected {expected} characters, got {got}")]
    Length {
        /// Length the codec expected.
        expected: usize,
        /// Length of the input.
        got: usize,
    },
    /// A character outside the expected alphabet or a misplaced hyphen.
    #[error("invalid character '{chr}' at position {position}")]
    InvalidCharacter {
        /// The offending character.
        chr: char,
        /// Byte offset in the input.
        position: usize,
    },
    /// The base64 input couldn't be decoded.
    #[error("couldn't decode base64")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes are not a valid UUID.
    #[error("couldn't build the UUID")]
    Uuid(#[from] uuid::Error),
}

/// Generates a random device id.
pub fn generate_random() -> String {
    to_base64url(&Uuid::new_v4())
}

/// Derives a stable device id from a namespace and a hardware identifier.
///
/// The same `(namespace, name)` pair always produces the same id (UUID v5, SHA-1 based).
pub fn generate_deterministic(namespace: &Uuid, name: &[u8]) -> String {
    to_base64url(&Uuid::new_v5(namespace, name))
}

/// Encodes the UUID in the URL-safe unpadded base64 form used as a device id.
pub fn to_base64url(uuid: &Uuid) -> String {
    URL_SAFE_NO_PAD.encode(uuid.as_bytes())
}

/// Decodes a device id back into its UUID.
pub fn from_base64url(value: &str) -> Result<Uuid, DeviceIdError> {
    if value.len() != UUID_BASE64URL_LEN {
        return Err(DeviceIdError::Length {
            expected: UUID_BASE64URL_LEN,
            got: value.len(),
        });
    }

    let bytes = URL_SAFE_NO_PAD.decode(value)?;

    Uuid::from_slice(&bytes).map_err(DeviceIdError::from)
}

/// Encodes the UUID in standard padded base64.
pub fn to_base64(uuid: &Uuid) -> String {
    STANDARD.encode(uuid.as_bytes())
}

/// Parses strictly the canonical 36 character hyphenated text form.
///
/// The relaxed formats accepted by [`Uuid::parse_str`] (simple, braced, urn) are rejected, the
/// hyphens have to sit at their canonical offsets.
pub fn parse_canonical(value: &str) -> Result<Uuid, DeviceIdError> {
    if value.len() != UUID_STR_LEN {
        return Err(DeviceIdError::Length {
            expected: UUID_STR_LEN,
            got: value.len(),
        });
    }

    for (position, chr) in value.char_indices() {
        if HYPHEN_POSITIONS.contains(&position) {
            if chr != '-' {
                return Err(DeviceIdError::InvalidCharacter { chr, position });
            }
        } else if !chr.is_ascii_hexdigit() {
            return Err(DeviceIdError::InvalidCharacter { chr, position });
        }
    }

    Uuid::parse_str(value).map_err(DeviceIdError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn random_ids_are_v4() {
        let id = generate_random();
        assert_eq!(id.len(), UUID_BASE64URL_LEN);

        let uuid = from_base64url(&id).unwrap();
        assert_eq!(uuid.get_version_num(), 4);
        // Variant bits of byte 8 are 0b10.
        assert_eq!(uuid.as_bytes()[8] >> 6, 0b10);
    }

    #[test]
    fn deterministic_id_is_stable() {
        let namespace = Uuid::nil();

        let first = generate_deterministic(&namespace, b"example");
        let second = generate_deterministic(&namespace, b"example");
        assert_eq!(first, second);

        let other = generate_deterministic(&namespace, b"other");
        assert_ne!(first, other);
    }

    #[test]
    fn v5_version_and_variant_bits() {
        let uuid = Uuid::new_v5(&Uuid::nil(), b"example");
        let bytes = uuid.as_bytes();

        // Version nibble of byte 6 is 0b0101.
        assert_eq!(bytes[6] >> 4, 0x5);
        // Variant bits of byte 8 are 0b10.
        assert_eq!(bytes[8] >> 6, 0b10);
    }

    #[test]
    fn base64url_round_trip() {
        let uuid = Uuid::new_v4();
        let encoded = to_base64url(&uuid);

        assert_eq!(from_base64url(&encoded).unwrap(), uuid);
    }

    #[test]
    fn base64_is_padded() {
        let uuid = Uuid::nil();

        assert_eq!(to_base64(&uuid), "AAAAAAAAAAAAAAAAAAAAAA==");
        assert_eq!(to_base64url(&uuid), "AAAAAAAAAAAAAAAAAAAAAA");
    }

    #[test]
    fn canonical_string_round_trip() {
        let uuid = Uuid::new_v4();
        let text = uuid.hyphenated().to_string();

        assert_eq!(parse_canonical(&text).unwrap(), uuid);
    }

    #[test]
    fn canonical_parse_rejects_relaxed_forms() {
        let uuid = Uuid::new_v4();

        // The simple form parses with the uuid crate but not here.
        let simple = uuid.simple().to_string();
        assert!(Uuid::parse_str(&simple).is_ok());
        assert!(matches!(
            parse_canonical(&simple),
            Err(DeviceIdError::Length { .. })
        ));

        // Misplaced hyphen.
        let mut shifted = uuid.hyphenated().to_string().replace('-', "");
        shifted.insert(9, '-');
        shifted.insert(13, '-');
        shifted.insert(18, '-');
        shifted.insert(23, '-');
        assert!(matches!(
            parse_canonical(&shifted),
            Err(DeviceIdError::InvalidCharacter { .. })
        ));

        // Non hexadecimal digit.
        let mut bad = uuid.hyphenated().to_string();
        bad.replace_range(0..1, "g");
        assert!(matches!(
            parse_canonical(&bad),
            Err(DeviceIdError::InvalidCharacter { .. })
        ));
    }

    #[test]
    fn base64url_rejects_wrong_length() {
        assert!(matches!(
            from_base64url("short"),
            Err(DeviceIdError::Length { .. })
        ));
    }
}
