// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use rand::RngCore;

/// `N` bytes from the thread-local CSPRNG. Used for nonces and IVs.
pub fn random_bytes<const N: usize>() -> Vec<u8> {
    let mut buffer = vec![0u8; N];
    rand::thread_rng().fill_bytes(&mut buffer);
    buffer
}
