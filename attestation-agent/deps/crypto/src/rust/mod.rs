// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Pure rust suites: the AES modes used for layers, key wrapping and KBS
//! responses, and the RSA key of the KBS handshake.

pub mod aes256ctr;
pub mod aes256gcm;
pub mod rsa;
