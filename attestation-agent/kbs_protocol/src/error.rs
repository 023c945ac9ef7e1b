// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use thiserror::Error;

use crate::types::ProtocolMode;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors of the attestation-gated key client. Only
/// [`Error::NetworkTransient`] is worth retrying; everything else is a
/// verdict or a misconfiguration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("attestation rejected by {endpoint}: {info}")]
    AttestationRejected { endpoint: String, info: String },

    #[error("transient network failure: {0}")]
    NetworkTransient(String),

    #[error("KBS returned an empty resource for {0}; refusing to use it as key material")]
    EmptyResource(String),

    #[error("protocol mode mismatch: requested {requested}, but the KBS advertises [{}]", join_modes(.advertised))]
    ProtocolModeMismatch {
        requested: ProtocolMode,
        advertised: Vec<ProtocolMode>,
    },

    #[error("KBS resource not found: {0}")]
    ResourceNotFound(String),

    #[error("KBS internal error: {0}")]
    KbsInternalError(String),

    #[error("deserialize http response failed: {0}")]
    KbsResponseDeserializationFailed(String),

    #[error("decrypt KBS response body failed: {0}")]
    DecryptResponseFailed(String),

    #[error("get evidence failed: {0}")]
    GetEvidence(#[from] attester::EvidenceError),

    #[error("get key pair failed: {0}")]
    GenerateKeyPairFailed(String),

    #[error("invalid hash algorithm: {0}")]
    InvalidHashAlgorithm(String),

    #[error("invalid attestation token: {0}")]
    InvalidToken(String),

    #[error("build http client failed: {0}")]
    HttpClient(String),
}

fn join_modes(modes: &[ProtocolMode]) -> String {
    modes
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NetworkTransient(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::KbsResponseDeserializationFailed(e.to_string())
        } else if e.is_builder() || e.is_redirect() {
            Error::KbsInternalError(e.to_string())
        } else {
            // connect, timeout, request and body errors
            Error::NetworkTransient(e.to_string())
        }
    }
}
