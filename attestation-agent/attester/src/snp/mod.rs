// Copyright (c) 2022 IBM
//
// SPDX-License-Identifier: Apache-2.0
//

use super::tsm_report::*;
use super::{Attester, TeeEvidence};
use crate::{EvidenceError, Platform, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;

const SNP_REPORT_DATA_SIZE: usize = 64;

// VMPL the report is requested for.
const SNP_PRIVLEVEL: u8 = 0;

const SEV_GUEST_DEVICE: &str = "/dev/sev-guest";

pub fn detect_platform() -> Result<bool> {
    detect_tsm_platform(
        TsmReportProvider::Sev,
        Platform::SevSnp,
        Path::new(SEV_GUEST_DEVICE),
    )
}

#[derive(Serialize, Deserialize)]
struct SnpEvidence {
    /// Base64 encoded attestation report.
    attestation_report: String,
    /// Base64 encoded certificate table, if the host provided one.
    cert_chain: Option<String>,
}

#[derive(Debug, Default)]
pub struct SnpAttester {}

#[async_trait::async_trait]
impl Attester for SnpAttester {
    async fn get_evidence(&self, mut report_data: Vec<u8>) -> Result<TeeEvidence> {
        if report_data.len() > SNP_REPORT_DATA_SIZE {
            return Err(EvidenceError::ReportDataTooLong {
                platform: Platform::SevSnp,
                max: SNP_REPORT_DATA_SIZE,
                actual: report_data.len(),
            });
        }

        report_data.resize(SNP_REPORT_DATA_SIZE, 0);

        let tsm = TsmReportPath::new(TsmReportProvider::Sev)
            .map_err(|e| e.into_evidence_error(Platform::SevSnp))?;
        let report = tsm
            .attestation_report(TsmReportData::Sev(SNP_PRIVLEVEL, report_data))
            .map_err(|e| e.into_evidence_error(Platform::SevSnp))?;
        let certs = tsm
            .supplemental_data()
            .ok()
            .filter(|aux| !aux.is_empty());

        let engine = base64::engine::general_purpose::STANDARD;
        let evidence = SnpEvidence {
            attestation_report: engine.encode(report),
            cert_chain: certs.map(|c| engine.encode(c)),
        };

        Ok(serde_json::to_value(&evidence)?)
    }
}
