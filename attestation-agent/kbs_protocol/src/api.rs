// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::{client::KbsClient, types::RawKeyResponse, Result};
use async_trait::async_trait;
pub use resource_uri::ResourceUri;

/// What a consumer needs from a KBS: attested release of one resource.
/// Implemented by [`KbsClient`] and by test doubles of the pipeline.
#[async_trait]
pub trait KbsClientCapabilities: Send + Sync {
    async fn fetch_resource(&self, resource_uri: &ResourceUri) -> Result<RawKeyResponse>;
}

#[async_trait]
impl KbsClientCapabilities for KbsClient {
    async fn fetch_resource(&self, resource_uri: &ResourceUri) -> Result<RawKeyResponse> {
        KbsClient::fetch_resource(self, resource_uri).await
    }
}
