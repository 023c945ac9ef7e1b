// Copyright (C) Copyright IBM Corp. 2024
//
// SPDX-License-Identifier: Apache-2.0
//

use super::{Attester, TeeEvidence};
use crate::{EvidenceError, Platform, Result};

const PROT_VIRT_GUEST: &str = "/sys/firmware/uv/prot_virt_guest";

pub fn detect_platform() -> bool {
    matches!(std::fs::read_to_string(PROT_VIRT_GUEST), Ok(v) if v.trim() == "1")
}

/// IBM Secure Execution evidence is produced from an attestation request
/// blob the verifier sends along with the challenge. The runner has no
/// way to obtain it, so the platform is detected but not attested.
#[derive(Debug, Default)]
pub struct SeAttester {}

#[async_trait::async_trait]
impl Attester for SeAttester {
    async fn get_evidence(&self, _report_data: Vec<u8>) -> Result<TeeEvidence> {
        Err(EvidenceError::Unsupported(Platform::Se))
    }
}
