// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

pub mod native;
pub use native::*;

pub mod mock;
pub use mock::*;

use crate::Result;
use async_trait::async_trait;
use attester::{Evidence, Platform};

#[async_trait]
pub trait EvidenceProvider: Send + Sync {
    /// Get fresh evidence with `report_data` bound into it.
    async fn get_evidence(&self, report_data: Vec<u8>) -> Result<Evidence>;

    /// The platform the evidence comes from, resolved once at construction.
    fn platform(&self) -> Platform;
}
