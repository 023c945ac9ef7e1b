// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use super::{Attester, TeeEvidence};
use crate::{EvidenceError, Platform, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

const SAMPLE_REPORT_DATA_SIZE: usize = 64;

// A simple example of TEE evidence. It proves nothing.
#[derive(Serialize, Deserialize, Debug)]
struct SampleQuote {
    svn: String,
    report_data: String,
}

#[derive(Debug, Default)]
pub struct SampleAttester {}

#[async_trait::async_trait]
impl Attester for SampleAttester {
    async fn get_evidence(&self, report_data: Vec<u8>) -> Result<TeeEvidence> {
        if report_data.len() > SAMPLE_REPORT_DATA_SIZE {
            return Err(EvidenceError::ReportDataTooLong {
                platform: Platform::Sample,
                max: SAMPLE_REPORT_DATA_SIZE,
                actual: report_data.len(),
            });
        }

        let evidence = SampleQuote {
            svn: "1".to_string(),
            report_data: base64::engine::general_purpose::STANDARD.encode(report_data),
        };

        Ok(serde_json::to_value(&evidence)?)
    }
}
