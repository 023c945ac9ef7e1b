// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! SGX DCAP quotes through the Gramine `/dev/attestation` pseudo files.

use super::{Attester, TeeEvidence};
use crate::{EvidenceError, Platform, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

const SGX_REPORT_DATA_SIZE: usize = 64;

const ATTESTATION_TYPE: &str = "/dev/attestation/attestation_type";
const USER_REPORT_DATA: &str = "/dev/attestation/user_report_data";
const QUOTE: &str = "/dev/attestation/quote";

pub fn detect_platform() -> bool {
    matches!(std::fs::read_to_string(ATTESTATION_TYPE), Ok(d) if d.trim() == "dcap")
}

#[derive(Serialize, Deserialize)]
struct SgxDcapAttesterEvidence {
    /// Base64 encoded SGX quote.
    quote: String,
}

#[derive(Debug, Default)]
pub struct SgxDcapAttester {}

#[async_trait::async_trait]
impl Attester for SgxDcapAttester {
    async fn get_evidence(&self, mut report_data: Vec<u8>) -> Result<TeeEvidence> {
        if report_data.len() > SGX_REPORT_DATA_SIZE {
            return Err(EvidenceError::ReportDataTooLong {
                platform: Platform::Sgx,
                max: SGX_REPORT_DATA_SIZE,
                actual: report_data.len(),
            });
        }

        report_data.resize(SGX_REPORT_DATA_SIZE, 0);

        std::fs::write(USER_REPORT_DATA, report_data)
            .map_err(|e| EvidenceError::io(Platform::Sgx, format!("{USER_REPORT_DATA}: {e}")))?;
        let quote = std::fs::read(QUOTE)
            .map_err(|e| EvidenceError::io(Platform::Sgx, format!("{QUOTE}: {e}")))?;

        let evidence = SgxDcapAttesterEvidence {
            quote: base64::engine::general_purpose::STANDARD.encode(quote),
        };

        Ok(serde_json::to_value(&evidence)?)
    }
}
