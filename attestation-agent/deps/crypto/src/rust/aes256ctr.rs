// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! AES-256-CTR with a 128-bit big-endian counter, the layer cipher of
//! `AES_256_CTR_HMAC_SHA256`. Unauthenticated, callers check a MAC first.

use aes_gcm::aes::Aes256;
use anyhow::*;
use ctr::{
    cipher::{KeyIvInit, StreamCipher},
    Ctr128BE,
};

pub const IV_LENGTH: usize = 16;

type Aes256Ctr = Ctr128BE<Aes256>;

fn keystream(key: &[u8], iv: &[u8]) -> Result<Aes256Ctr> {
    Aes256Ctr::new_from_slices(key, iv).map_err(|_| {
        anyhow!(
            "aes-256-ctr needs a 32 byte key and a {IV_LENGTH} byte iv, got {} and {}",
            key.len(),
            iv.len()
        )
    })
}

pub fn decrypt(key: &[u8], encrypted_data: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    let mut plaintext = encrypted_data.to_vec();
    keystream(key, iv)?
        .try_apply_keystream(&mut plaintext)
        .map_err(|e| anyhow!("aes-256-ctr decrypt failed: {e}"))?;
    Ok(plaintext)
}

pub fn encrypt(key: &[u8], data: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    let mut ciphertext = data.to_vec();
    keystream(key, iv)?
        .try_apply_keystream(&mut ciphertext)
        .map_err(|e| anyhow!("aes-256-ctr encrypt failed: {e}"))?;
    Ok(ciphertext)
}
