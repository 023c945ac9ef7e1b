// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use async_trait::async_trait;
use attester::{Evidence, EvidenceCollector, Platform};

use super::EvidenceProvider;

use crate::Result;

/// Evidence straight from the TEE this process runs in.
pub struct NativeEvidenceProvider(EvidenceCollector);

impl NativeEvidenceProvider {
    pub fn new() -> Result<Self> {
        Ok(Self(EvidenceCollector::new()?))
    }

    pub fn with_collector(collector: EvidenceCollector) -> Self {
        Self(collector)
    }
}

#[async_trait]
impl EvidenceProvider for NativeEvidenceProvider {
    async fn get_evidence(&self, report_data: Vec<u8>) -> Result<Evidence> {
        Ok(self.0.collect_evidence(report_data).await?)
    }

    fn platform(&self) -> Platform {
        self.0.platform()
    }
}
