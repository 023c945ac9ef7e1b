// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Encrypted layer format.
//!
//! Layers are encrypted the way ocicrypt does with the attestation-agent key
//! provider: the layer body is AES-256-CTR encrypted with a random symmetric
//! key and authenticated with HMAC-SHA256. The symmetric key travels in the
//! private layer options, which are wrapped with the key encryption key (KEK)
//! held by the KBS and stored in the layer annotations together with the
//! resource URI of that KEK.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use crypto::WrapType;
use hmac::{Hmac, Mac};
use oci_client::manifest::OciDescriptor;
use resource_uri::ResourceUri;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::digest::{verify_digest, DigestHasher, LayerDigestHasher, DIGEST_SHA256_PREFIX};

/// Annotation holding the base64 encoded [`AnnotationPacket`].
pub const ANNOTATION_KEY_PROVIDER: &str =
    "org.opencontainers.image.enc.keys.provider.attestation-agent";

/// Annotation holding the base64 encoded [`PublicLayerBlockCipherOptions`].
pub const ANNOTATION_PUBLIC_OPTIONS: &str = "org.opencontainers.image.enc.pubopts";

/// The only layer cipher ocicrypt defines.
pub const AES256CTR: &str = "AES_256_CTR_HMAC_SHA256";

const NONCE_OPTION: &str = "nonce";
const SYMMETRIC_KEY_LENGTH: usize = 32;
const CTR_NONCE_LENGTH: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Content of the key provider annotation of an encrypted layer.
#[serde_as]
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct AnnotationPacket {
    /// KBS resource holding the KEK.
    pub kid: ResourceUri,

    /// Private layer options encrypted with the KEK.
    #[serde_as(as = "Base64")]
    pub wrapped_data: Vec<u8>,

    #[serde_as(as = "Base64")]
    pub iv: Vec<u8>,

    pub wrap_type: WrapType,
}

/// Options that must stay secret: the layer key and the plaintext digest.
#[serde_as]
#[derive(Serialize, Deserialize, Default)]
pub struct PrivateLayerBlockCipherOptions {
    #[serde(rename = "symkey")]
    #[serde_as(as = "Base64")]
    pub symmetric_key: Vec<u8>,

    #[serde(default)]
    pub digest: String,

    #[serde(rename = "cipheroptions", default)]
    #[serde_as(as = "HashMap<_, Base64>")]
    pub cipher_options: HashMap<String, Vec<u8>>,
}

impl Drop for PrivateLayerBlockCipherOptions {
    fn drop(&mut self) {
        self.symmetric_key.zeroize();
    }
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct PublicLayerBlockCipherOptions {
    #[serde(rename = "cipher")]
    pub cipher_type: String,

    #[serde_as(as = "Base64")]
    pub hmac: Vec<u8>,

    #[serde(rename = "cipheroptions", default)]
    #[serde_as(as = "HashMap<_, Base64>")]
    pub cipher_options: HashMap<String, Vec<u8>>,
}

fn annotation<'a>(descriptor: &'a OciDescriptor, key: &str) -> Option<&'a String> {
    descriptor.annotations.as_ref()?.get(key)
}

fn decode_annotation<T: DeserializeOwned>(descriptor: &OciDescriptor, key: &str) -> Result<T> {
    let value = annotation(descriptor, key).ok_or_else(|| anyhow!("missing annotation {key}"))?;
    let json = STANDARD
        .decode(value.trim())
        .with_context(|| format!("annotation {key} is not base64"))?;
    serde_json::from_slice(&json).with_context(|| format!("annotation {key} is malformed"))
}

/// Parse the key provider annotation of an encrypted layer.
pub fn annotation_packet(descriptor: &OciDescriptor) -> Result<AnnotationPacket> {
    decode_annotation(descriptor, ANNOTATION_KEY_PROVIDER)
}

/// Resource URI of the KEK an encrypted layer was wrapped with, if the layer
/// carries a readable key provider annotation.
pub fn layer_kid(descriptor: &OciDescriptor) -> Option<ResourceUri> {
    annotation_packet(descriptor).ok().map(|packet| packet.kid)
}

/// Decrypt an encrypted layer body with the KEK released by the KBS.
///
/// The HMAC is verified before anything is decrypted and the plaintext
/// digest, when recorded, after.
pub fn decrypt_layer(
    kek: &[u8],
    ciphertext: &[u8],
    descriptor: &OciDescriptor,
) -> Result<Zeroizing<Vec<u8>>> {
    let packet = annotation_packet(descriptor)?;
    let public: PublicLayerBlockCipherOptions =
        decode_annotation(descriptor, ANNOTATION_PUBLIC_OPTIONS)?;

    if public.cipher_type != AES256CTR {
        bail!("unsupported layer cipher {}", public.cipher_type);
    }

    let private_json = Zeroizing::new(
        crypto::decrypt(kek, &packet.wrapped_data, &packet.iv, packet.wrap_type)
            .context("unwrap private layer options with the KEK")?,
    );
    let private: PrivateLayerBlockCipherOptions =
        serde_json::from_slice(&private_json).context("private layer options are malformed")?;

    if private.symmetric_key.len() != SYMMETRIC_KEY_LENGTH {
        bail!(
            "layer key must be {SYMMETRIC_KEY_LENGTH} bytes, got {}",
            private.symmetric_key.len()
        );
    }

    let mut mac = HmacSha256::new_from_slice(&private.symmetric_key)
        .map_err(|e| anyhow!("init hmac: {e}"))?;
    mac.update(ciphertext);
    mac.verify_slice(&public.hmac)
        .map_err(|_| anyhow!("layer hmac verification failed"))?;

    let nonce = public
        .cipher_options
        .get(NONCE_OPTION)
        .or_else(|| private.cipher_options.get(NONCE_OPTION))
        .ok_or_else(|| anyhow!("layer cipher options carry no nonce"))?;

    let plaintext = Zeroizing::new(crypto::decrypt(
        &private.symmetric_key,
        ciphertext,
        nonce,
        WrapType::Aes256Ctr,
    )?);

    if !private.digest.is_empty() {
        verify_digest("decrypted layer", &private.digest, &plaintext)?;
    }

    Ok(plaintext)
}

/// Encrypt a layer body for the KEK `kid` names. Returns the ciphertext and
/// the annotations to put on its descriptor.
pub fn encrypt_layer(
    kek: &[u8],
    kid: &ResourceUri,
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<(String, String)>)> {
    let symmetric_key = Zeroizing::new(crypto::random_bytes::<SYMMETRIC_KEY_LENGTH>());
    let nonce = crypto::random_bytes::<CTR_NONCE_LENGTH>();
    let ciphertext = crypto::encrypt(&symmetric_key, plaintext, &nonce, WrapType::Aes256Ctr)?;

    let mut mac = HmacSha256::new_from_slice(&symmetric_key)
        .map_err(|e| anyhow!("init hmac: {e}"))?;
    mac.update(&ciphertext);
    let hmac = mac.finalize().into_bytes().to_vec();

    let mut hasher = LayerDigestHasher::from_digest(DIGEST_SHA256_PREFIX)?;
    hasher.digest_update(plaintext);

    let private = PrivateLayerBlockCipherOptions {
        symmetric_key: symmetric_key.to_vec(),
        digest: hasher.digest_finalize(),
        cipher_options: HashMap::from([(NONCE_OPTION.to_string(), nonce)]),
    };
    let private_json = Zeroizing::new(serde_json::to_vec(&private)?);

    let wrap_type = WrapType::Aes256Gcm;
    let iv = crypto::random_bytes::<12>();
    let packet = AnnotationPacket {
        kid: kid.clone(),
        wrapped_data: crypto::encrypt(kek, &private_json, &iv, wrap_type)?,
        iv,
        wrap_type,
    };

    let public = PublicLayerBlockCipherOptions {
        cipher_type: AES256CTR.to_string(),
        hmac,
        cipher_options: HashMap::new(),
    };

    let annotations = vec![
        (
            ANNOTATION_KEY_PROVIDER.to_string(),
            STANDARD.encode(serde_json::to_vec(&packet)?),
        ),
        (
            ANNOTATION_PUBLIC_OPTIONS.to_string(),
            STANDARD.encode(serde_json::to_vec(&public)?),
        ),
    ];

    Ok((ciphertext, annotations))
}

#[cfg(test)]
mod tests {
    use oci_client::manifest::OciDescriptor;
    use rstest::rstest;

    use super::*;

    const KEK: [u8; 32] = [0x42; 32];

    fn kid() -> ResourceUri {
        "kbs:///default/key/wasm".parse().unwrap()
    }

    fn encrypted(plaintext: &[u8]) -> (Vec<u8>, OciDescriptor) {
        let (ciphertext, annotations) = encrypt_layer(&KEK, &kid(), plaintext).unwrap();
        let descriptor = OciDescriptor {
            media_type: "application/vnd.wasm.content.layer.v1+wasm+encrypted".into(),
            annotations: Some(annotations.into_iter().collect()),
            ..Default::default()
        };
        (ciphertext, descriptor)
    }

    #[rstest]
    #[case(b"\0asm\x01\0\0\0".as_slice())]
    #[case(b"".as_slice())]
    #[case(&[0xa5u8; 70000])]
    fn round_trip(#[case] plaintext: &[u8]) {
        let (ciphertext, descriptor) = encrypted(plaintext);
        assert_eq!(ciphertext.len(), plaintext.len());
        if plaintext.len() > 16 {
            assert_ne!(ciphertext, plaintext);
        }

        let decrypted = decrypt_layer(&KEK, &ciphertext, &descriptor).unwrap();
        assert_eq!(decrypted.as_slice(), plaintext);
        assert_eq!(layer_kid(&descriptor), Some(kid()));
    }

    #[test]
    fn wrong_kek_is_rejected() {
        let (ciphertext, descriptor) = encrypted(b"module bytes");
        let mut kek = KEK;
        kek[31] ^= 1;
        assert!(decrypt_layer(&kek, &ciphertext, &descriptor).is_err());
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let (mut ciphertext, descriptor) = encrypted(b"module bytes");
        ciphertext[0] ^= 0xff;
        let err = decrypt_layer(&KEK, &ciphertext, &descriptor).unwrap_err();
        assert!(err.to_string().contains("hmac"), "{err:#}");
    }

    #[rstest]
    #[case(ANNOTATION_KEY_PROVIDER)]
    #[case(ANNOTATION_PUBLIC_OPTIONS)]
    fn missing_annotation_is_rejected(#[case] key: &str) {
        let (ciphertext, mut descriptor) = encrypted(b"module bytes");
        descriptor.annotations = descriptor
            .annotations
            .map(|annotations| annotations.into_iter().filter(|(k, _)| k != key).collect());
        let err = decrypt_layer(&KEK, &ciphertext, &descriptor).unwrap_err();
        assert!(err.to_string().contains(key), "{err:#}");
    }

    #[test]
    fn annotation_packet_wire_format() {
        let (_, descriptor) = encrypted(b"module bytes");
        let raw = annotation(&descriptor, ANNOTATION_KEY_PROVIDER).unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&STANDARD.decode(raw).unwrap()).unwrap();

        assert_eq!(json["kid"], "kbs:///default/key/wasm");
        assert_eq!(json["wrap_type"], "A256GCM");
        assert_eq!(STANDARD.decode(json["iv"].as_str().unwrap()).unwrap().len(), 12);
    }
}
