// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Rejections of the key material released by the KBS. Always fatal.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyFormatError {
    #[error("the KBS released an empty key")]
    Empty,

    #[error("the KBS released a key of {actual} bytes, at least {minimum} bytes are required")]
    TooShort { actual: usize, minimum: usize },
}

#[derive(Error, Debug)]
pub enum ManifestError {
    /// Recovered by substituting a default configuration.
    #[error("image config is not a valid OCI image configuration: {0}")]
    ConfigParseFailed(String),

    #[error("invalid image reference {reference}: {message}")]
    InvalidReference { reference: String, message: String },

    #[error("failed to pull image manifest of {reference}: {message}")]
    RegistryUnavailable { reference: String, message: String },

    #[error("image {0} has no layers")]
    NoLayers(String),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("layer {digest} is encrypted but no decryption key was provided")]
    MissingKey { digest: String },

    #[error("failed to decrypt layer {digest}, please ensure that the KBS released the right key: {reason}")]
    DecryptionFailed { digest: String, reason: String },

    #[error("failed to pull blob {digest}: {message}")]
    PullBlobFailed { digest: String, message: String },

    #[error("digest mismatch of {what}: expected {expected}, got {actual}")]
    DigestMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("unsupported digest format: {0}")]
    UnsupportedDigestFormat(String),

    #[error("unsupported layer media type: {0}")]
    UnsupportedMediaType(String),

    #[error("failed to unpack layer {digest}: {source}")]
    UnpackFailed {
        digest: String,
        #[source]
        source: io::Error,
    },

    #[error("no WASM module found in the image layers")]
    NoWasmModule,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| FetchError::Io { context, source }
    }
}

/// Top-level error of one attested run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("evidence collection failed: {0}")]
    Evidence(#[from] attester::EvidenceError),

    #[error("key retrieval failed: {0}")]
    KeyClient(#[from] kbs_protocol::Error),

    #[error("key rejected: {0}")]
    KeyFormat(#[from] KeyFormatError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("image {reference} is encrypted but no KBS endpoint is configured, set `--kbs-uri`, `kbs.url` or an attestation-agent config")]
    MissingKbsEndpoint { reference: String },

    #[error("invalid KBS resource path {path}: {message}")]
    InvalidResourcePath { path: String, message: String },

    #[error("a hardware TEE is required but only the {0} platform is available")]
    HardwareTeeRequired(attester::Platform),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to prepare work directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start WASM runtime {runtime}: {source}")]
    EngineSpawn {
        runtime: String,
        #[source]
        source: io::Error,
    },

    #[error("WASM module exited with {status}: {stderr}")]
    ExecutionFailed { status: String, stderr: String },

    #[error("pipeline did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}
