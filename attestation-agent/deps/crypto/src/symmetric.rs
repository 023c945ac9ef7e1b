// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! APIs for symmetric keys

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::rust::*;

/// Key size shared by every supported wrap type.
pub const AES_256_KEY_LENGTH: usize = 32;

/// Encryption algorithm used to wrap the private layer options of an
/// encrypted image, or the payload of a KBS resource response.
#[derive(EnumString, AsRefStr, Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy, Default)]
pub enum WrapType {
    /// The serialized name follows 5.2.6 section
    /// <https://www.rfc-editor.org/rfc/inline-errata/rfc7518.html>
    #[default]
    #[strum(serialize = "A256GCM")]
    #[serde(rename = "A256GCM")]
    Aes256Gcm,

    /// Not AEAD. Only accepted for unwrapping legacy annotations.
    #[strum(serialize = "A256CTR")]
    #[serde(rename = "A256CTR")]
    Aes256Ctr,
}

impl WrapType {
    pub fn iv_length(&self) -> usize {
        match self {
            WrapType::Aes256Gcm => aes256gcm::NONCE_LENGTH,
            WrapType::Aes256Ctr => aes256ctr::IV_LENGTH,
        }
    }
}

fn check_lengths(key: &[u8], iv: &[u8], wrap_type: WrapType) -> Result<()> {
    if key.len() != AES_256_KEY_LENGTH {
        bail!(
            "{} requires a {AES_256_KEY_LENGTH} byte key, got {} bytes",
            wrap_type.as_ref(),
            key.len()
        );
    }

    if iv.len() != wrap_type.iv_length() {
        bail!(
            "{} requires a {} byte iv, got {} bytes",
            wrap_type.as_ref(),
            wrap_type.iv_length(),
            iv.len()
        );
    }

    Ok(())
}

/// Decrypt the given `ciphertext`.
/// Note:
/// - IV length for A256GCM: 12 bytes
/// - IV length for A256CTR: 16 bytes
pub fn decrypt(key: &[u8], ciphertext: &[u8], iv: &[u8], wrap_type: WrapType) -> Result<Vec<u8>> {
    check_lengths(key, iv, wrap_type)?;
    match wrap_type {
        WrapType::Aes256Gcm => aes256gcm::decrypt(key, ciphertext, iv),
        WrapType::Aes256Ctr => aes256ctr::decrypt(key, ciphertext, iv),
    }
}

/// Encrypt the given `plaintext`. IV lengths follow [`decrypt`].
pub fn encrypt(key: &[u8], plaintext: &[u8], iv: &[u8], wrap_type: WrapType) -> Result<Vec<u8>> {
    check_lengths(key, iv, wrap_type)?;
    match wrap_type {
        WrapType::Aes256Gcm => aes256gcm::encrypt(key, plaintext, iv),
        WrapType::Aes256Ctr => aes256ctr::encrypt(key, plaintext, iv),
    }
}

/// Decrypt the given `ciphertext` with a detached authentication `tag`.
pub fn decrypt_aead(
    key: &[u8],
    ciphertext: &[u8],
    iv: &[u8],
    aad: &[u8],
    tag: &[u8],
    wrap_type: WrapType,
) -> Result<Vec<u8>> {
    check_lengths(key, iv, wrap_type)?;
    match wrap_type {
        WrapType::Aes256Gcm => {
            aes256gcm::decrypt_with_aad_detached_tag(key, ciphertext, iv, aad, tag)
        }
        others => bail!("Algorithm {} is not an AEAD algorithm.", others.as_ref()),
    }
}

pub struct AeadCipher {
    pub tag: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

pub fn encrypt_aead(
    key: &[u8],
    plaintext: &[u8],
    iv: &[u8],
    aad: &[u8],
    wrap_type: WrapType,
) -> Result<AeadCipher> {
    check_lengths(key, iv, wrap_type)?;
    match wrap_type {
        WrapType::Aes256Gcm => aes256gcm::encrypt_with_aad_detached_tag(key, plaintext, iv, aad),
        others => bail!("Algorithm {} is not an AEAD algorithm.", others.as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(WrapType::Aes256Gcm, 12)]
    #[case(WrapType::Aes256Ctr, 16)]
    fn wrap_round_trip(#[case] wrap_type: WrapType, #[case] iv_len: usize) {
        let key = [7u8; 32];
        let iv = vec![1u8; iv_len];
        let wrapped = encrypt(&key, b"layer options", &iv, wrap_type).unwrap();
        assert_eq!(
            decrypt(&key, &wrapped, &iv, wrap_type).unwrap(),
            b"layer options"
        );
    }

    #[rstest]
    #[case(&[0u8; 16], &[0u8; 12])]
    #[case(&[0u8; 48], &[0u8; 12])]
    #[case(&[0u8; 32], &[0u8; 16])]
    fn rejects_bad_lengths(#[case] key: &[u8], #[case] iv: &[u8]) {
        assert!(decrypt(key, b"whatever", iv, WrapType::Aes256Gcm).is_err());
    }

    #[test]
    fn ctr_is_not_aead() {
        assert!(encrypt_aead(&[0u8; 32], b"x", &[0u8; 16], b"", WrapType::Aes256Ctr).is_err());
    }

    #[test]
    fn wrap_type_names() {
        assert_eq!(WrapType::default().as_ref(), "A256GCM");
        assert_eq!("A256CTR".parse::<WrapType>().unwrap(), WrapType::Aes256Ctr);
        let json: WrapType = serde_json::from_str("\"A256GCM\"").unwrap();
        assert_eq!(json, WrapType::Aes256Gcm);
    }
}
