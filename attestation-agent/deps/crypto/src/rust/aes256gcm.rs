// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! This mod implements aes-256-gcm encryption & decryption.
use crate::AeadCipher;
use aes_gcm::{aead::Aead, AeadInPlace, Aes256Gcm, Key, KeyInit, Nonce, Tag};
use anyhow::*;

pub const NONCE_LENGTH: usize = 12;

const TAG_LENGTH: usize = 16;

fn cipher(key: &[u8]) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
}

pub fn encrypt_with_aad_detached_tag(
    key: &[u8],
    data: &[u8],
    iv: &[u8],
    aad: &[u8],
) -> Result<AeadCipher> {
    let mut ciphertext = data.to_vec();
    let tag = cipher(key)
        .encrypt_in_place_detached(Nonce::from_slice(iv), aad, &mut ciphertext)
        .map_err(|e| anyhow!("aes-256-gcm encrypt failed: {:?}", e))?
        .to_vec();
    Ok(AeadCipher { tag, ciphertext })
}

pub fn decrypt_with_aad_detached_tag(
    key: &[u8],
    encrypted_data: &[u8],
    iv: &[u8],
    aad: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>> {
    if tag.len() != TAG_LENGTH {
        bail!("aes-256-gcm tag must be {TAG_LENGTH} bytes, got {}", tag.len());
    }

    let mut plaintext = encrypted_data.to_vec();
    cipher(key)
        .decrypt_in_place_detached(
            Nonce::from_slice(iv),
            aad,
            &mut plaintext,
            Tag::from_slice(tag),
        )
        .map_err(|e| anyhow!("aes-256-gcm decrypt failed: {:?}", e))?;

    Ok(plaintext)
}

pub fn decrypt(key: &[u8], encrypted_data: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    cipher(key)
        .decrypt(Nonce::from_slice(iv), encrypted_data)
        .map_err(|e| anyhow!("aes-256-gcm decrypt failed: {:?}", e))
}

pub fn encrypt(key: &[u8], data: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    cipher(key)
        .encrypt(Nonce::from_slice(iv), data)
        .map_err(|e| anyhow!("aes-256-gcm encrypt failed: {:?}", e))
}
