// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Messages of the KBS attestation protocol.

use std::fmt;

use attester::Platform;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroizing;

use crate::{Error, Result};

/// JSON key of the request's extra parameters listing the hash algorithms
/// the client can bind runtime data with.
pub const SUPPORTED_HASH_ALGORITHMS_JSON_KEY: &str = "supported-hash-algorithms";

/// JSON key of the challenge's extra parameters naming the algorithm the
/// KBS picked among the supported ones.
pub const SELECTED_HASH_ALGORITHM_JSON_KEY: &str = "selected-hash-algorithm";

/// JSON key of the challenge's extra parameters listing the attestation
/// models the KBS serves. Absent means background-check only.
pub const ATTESTATION_MODES_JSON_KEY: &str = "attestation-modes";

/// The two RATS models a KBS may serve.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProtocolMode {
    /// The KBS appraises the evidence itself and serves the resource on
    /// the attested session.
    BackgroundCheck,

    /// An issuer exchanges the evidence for a token which is then redeemed
    /// at the resource endpoint.
    Passport,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Request {
    pub version: String,
    pub tee: Platform,
    #[serde(rename = "extra-params")]
    pub extra_params: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Challenge {
    // Nonce from KBS to prevent replay attack.
    pub nonce: String,
    #[serde(rename = "extra-params", default)]
    pub extra_params: Value,
}

impl Challenge {
    /// Modes advertised by the KBS, in its order of preference. A KBS that
    /// predates mode discovery leaves the key out and only serves the
    /// background-check model. Modes this client does not know are skipped.
    pub fn attestation_modes(&self) -> Result<Vec<ProtocolMode>> {
        let entries = match self.extra_params.get(ATTESTATION_MODES_JSON_KEY) {
            None | Some(Value::Null) => return Ok(vec![ProtocolMode::BackgroundCheck]),
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                return Err(Error::KbsResponseDeserializationFailed(format!(
                    "`{ATTESTATION_MODES_JSON_KEY}` must be an array, got {other}"
                )))
            }
        };

        if entries.is_empty() {
            return Ok(vec![ProtocolMode::BackgroundCheck]);
        }

        let modes = entries
            .iter()
            .filter_map(|entry| match ProtocolMode::deserialize(entry) {
                Ok(mode) => Some(mode),
                Err(_) => {
                    debug!("ignoring unknown attestation mode {entry}");
                    None
                }
            })
            .collect();
        Ok(modes)
    }
}

/// JWK of the ephemeral TEE public key, RFC 7517.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kty")]
pub enum TeePubKey {
    RSA {
        alg: String,
        #[serde(rename = "n")]
        k_mod: String,
        #[serde(rename = "e")]
        k_exp: String,
    },
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Attestation {
    #[serde(rename = "tee-pubkey")]
    pub tee_pubkey: TeePubKey,
    #[serde(rename = "runtime-data-hash-algorithm")]
    pub hash_algorithm: crypto::HashAlgorithm,
    #[serde(rename = "tee-evidence")]
    pub tee_evidence: Value,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AttestationResponseData {
    // Attestation token in JWT format. Only a passport issuer must set it.
    #[serde(default)]
    pub token: Option<String>,
}

/// JWE (flattened JSON serialization) carrying a resource encrypted to
/// the TEE public key. Every field is base64url without padding.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Response {
    pub protected: String,
    pub encrypted_key: String,
    pub iv: String,
    pub ciphertext: String,
    pub tag: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProtectedHeader {
    /// Algorithm that wraps the content encryption key
    pub alg: String,
    /// Algorithm that encrypts the payload
    pub enc: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ErrorInformation {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub detail: String,
}

/// The bytes of a KBS resource, exactly as released. Never empty.
pub struct RawKeyResponse(Zeroizing<Vec<u8>>);

impl RawKeyResponse {
    pub fn new(resource: &str, bytes: Vec<u8>) -> Result<Self> {
        let bytes = Zeroizing::new(bytes);
        if bytes.is_empty() {
            return Err(Error::EmptyResource(resource.to_string()));
        }

        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for RawKeyResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawKeyResponse")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}
