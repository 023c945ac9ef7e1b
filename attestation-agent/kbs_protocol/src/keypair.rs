// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use crypto::{
    rsa::{PaddingMode, RSAKeyPair},
    WrapType,
};
use log::warn;
use zeroize::Zeroizing;

use crate::types::{ProtectedHeader, Response, TeePubKey};

/// Ephemeral key pair generated inside the TEE for one KBS conversation.
/// The KBS encrypts released resources to its public half.
#[derive(Debug)]
pub struct TeeKeyPair {
    key: RSAKeyPair,
}

impl TeeKeyPair {
    pub fn new() -> Result<Self> {
        Ok(Self {
            key: RSAKeyPair::new()?,
        })
    }

    /// Export TEE public key as JWK.
    pub fn export_pubkey(&self) -> TeePubKey {
        TeePubKey::RSA {
            alg: PaddingMode::OAEP256.as_ref().to_string(),
            k_mod: URL_SAFE_NO_PAD.encode(self.key.n()),
            k_exp: URL_SAFE_NO_PAD.encode(self.key.e()),
        }
    }

    fn unwrap_cek(&self, header: &ProtectedHeader, wrapped_cek: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let mode: PaddingMode = header
            .alg
            .parse()
            .with_context(|| format!("Unsupported key wrap algorithm: {}", header.alg))?;
        if mode == PaddingMode::PKCS1v15 {
            warn!("Use deprecated Rsa PKCSv1.5 algorithm!");
        }

        Ok(Zeroizing::new(self.key.decrypt(mode, wrapped_cek)?))
    }

    /// Open a JWE resource response. The additional authenticated data is
    /// the encoded protected header, as in JWE compact serialization.
    pub fn decrypt_response(&self, response: Response) -> Result<Vec<u8>> {
        let header = URL_SAFE_NO_PAD
            .decode(&response.protected)
            .context("protected header is not base64url")?;
        let header: ProtectedHeader =
            serde_json::from_slice(&header).context("illegal protected header")?;

        let enc: WrapType = header
            .enc
            .parse()
            .with_context(|| format!("Unsupported content encryption: {}", header.enc))?;
        if enc != WrapType::Aes256Gcm {
            bail!("Content encryption {} is not AEAD", header.enc);
        }

        let wrapped_cek = URL_SAFE_NO_PAD.decode(&response.encrypted_key)?;
        let cek = self.unwrap_cek(&header, &wrapped_cek)?;

        let iv = URL_SAFE_NO_PAD.decode(&response.iv)?;
        let ciphertext = URL_SAFE_NO_PAD.decode(&response.ciphertext)?;
        let tag = URL_SAFE_NO_PAD.decode(&response.tag)?;

        crypto::decrypt_aead(
            &cek,
            &ciphertext,
            &iv,
            response.protected.as_bytes(),
            &tag,
            enc,
        )
    }
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use crypto::{rsa::PaddingMode, WrapType};

    use super::TeeKeyPair;
    use crate::types::{Response, TeePubKey};

    fn seal(pubkey: &TeePubKey, alg: &str, payload: &[u8]) -> Response {
        let TeePubKey::RSA { k_mod, k_exp, .. } = pubkey;
        let n = URL_SAFE_NO_PAD.decode(k_mod).unwrap();
        let e = URL_SAFE_NO_PAD.decode(k_exp).unwrap();

        let protected =
            URL_SAFE_NO_PAD.encode(format!(r#"{{"alg":"{alg}","enc":"A256GCM"}}"#));
        let cek = [9u8; 32];
        let iv = [3u8; 12];
        let mode: PaddingMode = alg.parse().unwrap();
        let encrypted_key = crypto::rsa::encrypt_to_public_key(&n, &e, mode, &cek).unwrap();
        let sealed =
            crypto::encrypt_aead(&cek, payload, &iv, protected.as_bytes(), WrapType::Aes256Gcm)
                .unwrap();

        Response {
            protected,
            encrypted_key: URL_SAFE_NO_PAD.encode(encrypted_key),
            iv: URL_SAFE_NO_PAD.encode(iv),
            ciphertext: URL_SAFE_NO_PAD.encode(sealed.ciphertext),
            tag: URL_SAFE_NO_PAD.encode(sealed.tag),
        }
    }

    #[test]
    fn open_sealed_response() {
        let key = TeeKeyPair::new().unwrap();
        let response = seal(&key.export_pubkey(), "RSA-OAEP-256", b"key material");
        assert_eq!(key.decrypt_response(response).unwrap(), b"key material");
    }

    #[test]
    fn tampered_header_fails() {
        let key = TeeKeyPair::new().unwrap();
        let mut response = seal(&key.export_pubkey(), "RSA-OAEP-256", b"key material");
        response.protected = URL_SAFE_NO_PAD.encode(r#"{"alg":"RSA-OAEP-256","enc":"A256GCM"} "#);
        assert!(key.decrypt_response(response).is_err());
    }

    #[test]
    fn foreign_key_fails() {
        let key = TeeKeyPair::new().unwrap();
        let other = TeeKeyPair::new().unwrap();
        let response = seal(&other.export_pubkey(), "RSA-OAEP-256", b"key material");
        assert!(key.decrypt_response(response).is_err());
    }
}
