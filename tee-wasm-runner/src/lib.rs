// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! # tee-wasm-runner
//!
//! Pulls a WASM image from an OCI registry, and when its layers are
//! encrypted, attests the TEE it runs in to a Key Broker Service to get the
//! key that decrypts them. The decrypted module is then handed to a WASM
//! runtime.
//!
//! The pipeline is a single sequence per run:
//!
//! 1. pull the manifest and classify the image ([`classify`])
//! 2. for encrypted images, fetch the key through `kbs_protocol` and
//!    validate it ([`key`])
//! 3. fetch, decrypt and verify the layers into a private per-run
//!    directory ([`fetch`])
//! 4. execute the module ([`engine`]) and remove the directory
//!
//! Registry and runtime are collaborators behind the [`ImageRegistry`] and
//! [`WasmEngine`] traits.

pub mod classify;
pub mod config;
pub mod decoder;
pub mod digest;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod key;
pub mod layer_crypto;
pub mod registry;
pub mod runner;

pub use classify::{classify, Classification, ImageKind};
pub use config::{Cli, RunnerConfig};
pub use engine::{ExecutionOutput, Invocation, WasmEngine, WasmtimeCli};
pub use error::{Error, FetchError, KeyFormatError, ManifestError, Result};
pub use fetch::{ExecutionArtifact, LayerFetcher};
pub use key::{normalize, DecryptionKey};
pub use registry::{ImageRegistry, OciRegistry, PulledManifest};
pub use runner::{RunOutcome, RunRequest, TeeWasmRunner};
