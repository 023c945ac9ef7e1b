// Copyright (c) 2023-2024 Arm Ltd.
//
// SPDX-License-Identifier: Apache-2.0
//

use super::tsm_report::*;
use super::{Attester, TeeEvidence};
use crate::{EvidenceError, Platform, Result};
use serde::{Deserialize, Serialize};

const CCA_CHALLENGE_SIZE: usize = 64;

pub fn detect_platform() -> Result<bool> {
    #[cfg(target_arch = "aarch64")]
    return provider_available(TsmReportProvider::Cca, Platform::Cca);
    #[cfg(not(target_arch = "aarch64"))]
    return Ok(false);
}

#[derive(Debug, Default)]
pub struct CcaAttester {}

#[derive(Serialize, Deserialize)]
struct CcaEvidence {
    /// CCA token
    token: Vec<u8>,
}

#[async_trait::async_trait]
impl Attester for CcaAttester {
    async fn get_evidence(&self, mut challenge: Vec<u8>) -> Result<TeeEvidence> {
        if challenge.len() > CCA_CHALLENGE_SIZE {
            return Err(EvidenceError::ReportDataTooLong {
                platform: Platform::Cca,
                max: CCA_CHALLENGE_SIZE,
                actual: challenge.len(),
            });
        }

        challenge.resize(CCA_CHALLENGE_SIZE, 0);
        let token = TsmReportPath::new(TsmReportProvider::Cca)
            .and_then(|tsm| tsm.attestation_report(TsmReportData::Cca(challenge)))
            .map_err(|e| e.into_evidence_error(Platform::Cca))?;

        Ok(serde_json::to_value(&CcaEvidence { token })?)
    }
}
