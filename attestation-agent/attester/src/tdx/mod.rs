// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use super::tsm_report::*;
use super::{Attester, TeeEvidence};
use crate::{EvidenceError, Platform, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;

const TDX_REPORT_DATA_SIZE: usize = 64;

const TDX_GUEST_IOCTL: &str = "/dev/tdx_guest";

pub fn detect_platform() -> Result<bool> {
    detect_tsm_platform(
        TsmReportProvider::Tdx,
        Platform::Tdx,
        Path::new(TDX_GUEST_IOCTL),
    )
}

#[derive(Serialize, Deserialize)]
struct TdxEvidence {
    // Base64 encoded TD quote.
    quote: String,
}

#[derive(Debug, Default)]
pub struct TdxAttester {}

#[async_trait::async_trait]
impl Attester for TdxAttester {
    async fn get_evidence(&self, mut report_data: Vec<u8>) -> Result<TeeEvidence> {
        if report_data.len() > TDX_REPORT_DATA_SIZE {
            return Err(EvidenceError::ReportDataTooLong {
                platform: Platform::Tdx,
                max: TDX_REPORT_DATA_SIZE,
                actual: report_data.len(),
            });
        }

        report_data.resize(TDX_REPORT_DATA_SIZE, 0);

        let quote_bytes = TsmReportPath::new(TsmReportProvider::Tdx)
            .and_then(|tsm| tsm.attestation_report(TsmReportData::Tdx(report_data)))
            .map_err(|e| e.into_evidence_error(Platform::Tdx))?;

        let engine = base64::engine::general_purpose::STANDARD;
        let evidence = TdxEvidence {
            quote: engine.encode(quote_bytes),
        };

        Ok(serde_json::to_value(&evidence)?)
    }
}
