// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Normalization of the key material released by the KBS.
//!
//! Deployments are observed to release the key either as raw bytes or as
//! base64 text, so both are accepted: the payload is decoded when it is
//! valid base64, and used verbatim otherwise.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use crypto::AES_256_KEY_LENGTH;
use log::debug;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::KeyFormatError;

/// Minimum length of a key encryption key, the size of an AES-256 key.
pub const DEFAULT_MIN_KEY_LENGTH: usize = AES_256_KEY_LENGTH;

/// Key material that passed normalization. It is zeroed on drop, cannot be
/// cloned, and never prints its content.
pub struct DecryptionKey(Zeroizing<Vec<u8>>);

impl DecryptionKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First 8 bytes of the SHA-256 of the key, hex encoded. Safe for logs.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

impl fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionKey")
            .field("len", &self.len())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

pub(crate) fn fingerprint(material: &[u8]) -> String {
    hex::encode(&Sha256::digest(material)[..8])
}

/// Turn a KBS payload into a [`DecryptionKey`] of at least `min_len` bytes.
pub fn normalize(raw: &[u8], min_len: usize) -> Result<DecryptionKey, KeyFormatError> {
    let decoded = std::str::from_utf8(raw)
        .ok()
        .map(str::trim)
        .and_then(|text| STANDARD.decode(text).ok())
        .map(Zeroizing::new)
        .filter(|decoded| !decoded.is_empty());

    let candidate = match decoded {
        // A printable raw key of exactly the scheme size is also valid
        // base64 that decodes to fewer bytes.
        Some(decoded) if decoded.len() < min_len && raw.len() == AES_256_KEY_LENGTH => {
            debug!("base64 decoding of the {} byte payload is too short, using it raw", raw.len());
            Zeroizing::new(raw.to_vec())
        }
        Some(decoded) => decoded,
        None => Zeroizing::new(raw.to_vec()),
    };

    if candidate.is_empty() {
        return Err(KeyFormatError::Empty);
    }

    if candidate.len() < min_len {
        return Err(KeyFormatError::TooShort {
            actual: candidate.len(),
            minimum: min_len,
        });
    }

    Ok(DecryptionKey(candidate))
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use rstest::rstest;
    use test_utils::assert_result;

    use super::*;

    const RAW_KEY: [u8; 32] = [
        0x8f, 0x00, 0x21, 0xee, 0x10, 0x3d, 0xf0, 0x7a, 0x55, 0x01, 0xff, 0x9c, 0x42, 0x42, 0x08,
        0x13, 0x77, 0xa0, 0x0b, 0xcd, 0xd3, 0x6e, 0x2f, 0x90, 0x01, 0x02, 0x03, 0x04, 0xfe, 0xed,
        0xbe, 0xef,
    ];

    fn normalized(raw: &[u8], min_len: usize) -> Result<Vec<u8>, KeyFormatError> {
        normalize(raw, min_len).map(|k| k.as_bytes().to_vec())
    }

    #[rstest]
    #[case::raw_binary(RAW_KEY.to_vec(), Ok(RAW_KEY.to_vec()))]
    #[case::base64(STANDARD.encode(RAW_KEY).into_bytes(), Ok(RAW_KEY.to_vec()))]
    #[case::base64_with_newline(format!("{}\n", STANDARD.encode(RAW_KEY)).into_bytes(), Ok(RAW_KEY.to_vec()))]
    #[case::printable_raw(b"0123456789abcdef0123456789abcdef".to_vec(), Ok(b"0123456789abcdef0123456789abcdef".to_vec()))]
    #[case::empty(vec![], Err(KeyFormatError::Empty))]
    #[case::blank_text(b"   ".to_vec(), Err(KeyFormatError::TooShort { actual: 3, minimum: 32 }))]
    #[case::short_raw(vec![7u8; 16], Err(KeyFormatError::TooShort { actual: 16, minimum: 32 }))]
    #[case::short_base64(STANDARD.encode([7u8; 16]).into_bytes(), Err(KeyFormatError::TooShort { actual: 16, minimum: 32 }))]
    #[case::malformed_base64(b"not base64 at all, just a 40 byte text!!".to_vec(), Ok(b"not base64 at all, just a 40 byte text!!".to_vec()))]
    fn normalize_payloads(
        #[case] raw: Vec<u8>,
        #[case] expected: Result<Vec<u8>, KeyFormatError>,
    ) {
        let msg = format!("payload of {} bytes", raw.len());
        assert_result!(expected, normalized(&raw, DEFAULT_MIN_KEY_LENGTH), msg);
    }

    #[test]
    fn never_returns_an_empty_key() {
        for len in 0..80 {
            for byte in [0u8, b'A', b'=', b'\n', 0xff] {
                let raw = vec![byte; len];
                for min_len in [0, 1, 32] {
                    if let Ok(key) = normalize(&raw, min_len) {
                        assert!(!key.is_empty());
                        assert!(key.len() >= min_len);
                    }
                }
            }
        }
    }

    #[test]
    fn configurable_minimum() {
        let key = normalize(&[1u8; 16], 16).unwrap();
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn debug_hides_material() {
        let key = normalize(&RAW_KEY, 32).unwrap();
        let printed = format!("{key:?}");
        assert!(printed.contains("len: 32"));
        assert!(!printed.contains('['), "{printed}");
        assert_eq!(key.fingerprint().len(), 16);
    }
}
