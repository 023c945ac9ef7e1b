// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! # The Client of KBS RCAR Protocol.
//!
//! This crate implements an attestation-gated client of a Key Broker
//! Service: a resource is only released after the TEE this code runs in
//! has proven itself with hardware evidence.
//!
//! ## Protocol
//!
//! Please refer to <https://github.com/confidential-containers/kbs/blob/main/kbs/docs/kbs_attestation_protocol.md>
//!
//! ## Usage
//!
//! Both models of the [RATS architecture](https://datatracker.ietf.org/doc/rfc9334/)
//! are served by the same [`KbsClient`]. The model is picked from the
//! `attestation-modes` the KBS advertises in its auth challenge, or forced
//! with [`KbsClientBuilder::set_protocol_mode`].
//!
//! - Background-Check Model: the evidence is sent to the KBS, which asks
//!   its verifier and then releases the resource on the same session.
//! - Passport Model: the evidence is sent to a token issuer, and the token
//!   it mints is presented to the KBS as a bearer credential.
//!
//! ```no_run
//! use kbs_protocol::evidence_provider::NativeEvidenceProvider;
//! use kbs_protocol::{KbsClientBuilder, KbsClientCapabilities};
//!
//! async fn fetch() {
//!     let evidence_provider = Box::new(NativeEvidenceProvider::new().unwrap());
//!     let client = KbsClientBuilder::with_evidence_provider(evidence_provider, "http://example.kbs.io")
//!         .build()
//!         .unwrap();
//!
//!     // the fetch performs attestation first
//!     let resource = client
//!         .fetch_resource(&"kbs:///default/key/1".parse().unwrap())
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod api;
pub mod builder;
pub mod client;
pub mod error;
pub mod evidence_provider;
pub mod keypair;
pub mod retry;
pub mod token;
pub mod types;

pub use api::*;
pub use builder::KbsClientBuilder;
pub use client::KbsClient;
pub use error::{Error, Result};
pub use keypair::TeeKeyPair;
pub use retry::RetryPolicy;
pub use token::Token;
pub use types::{ProtocolMode, RawKeyResponse};
