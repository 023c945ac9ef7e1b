// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! # Crypto
//!
//! Pure rust crypto primitives shared by the KBS protocol client and the
//! layer decryptor of the runner.
//!
//! ## Components
//!
//! - `symmetric`: AES-256-GCM / AES-256-CTR en/decryption of wrapped keys
//!   and KBS responses
//! - `rsa`: the ephemeral TEE key pair used in the KBS attestation protocol
//! - `HashAlgorithm`: digests used to bind runtime data into evidence

#[macro_use]
extern crate strum;

mod rust;

mod symmetric;
pub use symmetric::*;

mod asymmetric;
pub use asymmetric::*;

mod algorithms;
pub use algorithms::*;

mod random;
pub use random::random_bytes;
