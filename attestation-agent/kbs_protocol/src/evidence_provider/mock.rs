// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use attester::{Evidence, Platform};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::json;

use super::EvidenceProvider;

use crate::Result;

/// Sample-platform evidence that echoes the report data, for tests.
#[derive(Default)]
pub struct MockedEvidenceProvider {
    calls: Arc<AtomicUsize>,
}

impl MockedEvidenceProvider {
    /// Handle on the number of evidence requests, usable after the
    /// provider was moved into a client.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl EvidenceProvider for MockedEvidenceProvider {
    async fn get_evidence(&self, report_data: Vec<u8>) -> Result<Evidence> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let quote = json!({
            "svn": "1",
            "report_data": STANDARD.encode(report_data),
        });

        Ok(Evidence {
            platform: Platform::Sample,
            data: quote.to_string().into_bytes(),
        })
    }

    fn platform(&self) -> Platform {
        Platform::Sample
    }
}
