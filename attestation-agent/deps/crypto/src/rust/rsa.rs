// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! RSA key pair living only inside the TEE for the duration of one
//! KBS conversation.

use anyhow::*;
use rsa::{traits::PublicKeyParts, BigUint, Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use crate::rsa::{PaddingMode, RSA_PUBKEY_LENGTH};

#[derive(Clone)]
pub struct RSAKeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl std::fmt::Debug for RSAKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RSAKeyPair")
            .field("bits", &(self.public_key.size() * 8))
            .finish_non_exhaustive()
    }
}

impl RSAKeyPair {
    pub fn new() -> Result<RSAKeyPair> {
        let mut rng = rand::thread_rng();

        let private_key = RsaPrivateKey::new(&mut rng, RSA_PUBKEY_LENGTH)?;
        let public_key = RsaPublicKey::from(&private_key);

        Ok(RSAKeyPair {
            private_key,
            public_key,
        })
    }

    pub fn decrypt(&self, mode: PaddingMode, cipher_text: &[u8]) -> Result<Vec<u8>> {
        match mode {
            PaddingMode::OAEP256 => self
                .private_key
                .decrypt(Oaep::new::<sha2::Sha256>(), cipher_text)
                .map_err(|e| anyhow!("RSA key decrypt OAEP failed: {:?}", e)),
            PaddingMode::PKCS1v15 => self
                .private_key
                .decrypt(Pkcs1v15Encrypt, cipher_text)
                .map_err(|e| anyhow!("RSA key pkcs1v15 decrypt failed: {:?}", e)),
        }
    }

    /// Big-endian modulus.
    pub fn n(&self) -> Vec<u8> {
        self.public_key.n().to_bytes_be()
    }

    /// Big-endian public exponent.
    pub fn e(&self) -> Vec<u8> {
        self.public_key.e().to_bytes_be()
    }
}

/// Encrypt `plaintext` to the RSA public key given by its big-endian
/// modulus `n` and exponent `e`, as a KBS does when wrapping the content
/// encryption key of a resource response.
pub fn encrypt_to_public_key(
    n: &[u8],
    e: &[u8],
    mode: PaddingMode,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let public_key = RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
        .context("invalid RSA public key")?;
    let mut rng = rand::thread_rng();
    match mode {
        PaddingMode::OAEP256 => public_key
            .encrypt(&mut rng, Oaep::new::<sha2::Sha256>(), plaintext)
            .map_err(|e| anyhow!("RSA OAEP encrypt failed: {:?}", e)),
        PaddingMode::PKCS1v15 => public_key
            .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| anyhow!("RSA pkcs1v15 encrypt failed: {:?}", e)),
    }
}
