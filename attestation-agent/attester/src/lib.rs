// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! # Attester
//!
//! Produces hardware evidence for the TEE this process runs in. The
//! platform is detected once, when the [`EvidenceCollector`] is built, and
//! the resolved [`Platform`] is carried explicitly from then on.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod error;
pub mod sample;

#[cfg(feature = "az-snp-vtpm-attester")]
pub mod az_snp_vtpm;

#[cfg(feature = "az-tdx-vtpm-attester")]
pub mod az_tdx_vtpm;

#[cfg(feature = "cca-attester")]
pub mod cca;

#[cfg(feature = "tdx-attester")]
pub mod tdx;

#[cfg(feature = "sgx-attester")]
pub mod sgx_dcap;

#[cfg(feature = "snp-attester")]
pub mod snp;

#[cfg(feature = "tsm-report")]
pub mod tsm_report;

#[cfg(feature = "se-attester")]
pub mod se;

pub use error::{EvidenceError, Result};

/// TEE platform tags, serialized with the names a KBS expects in the
/// `tee` field of a request.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Platform {
    Sample,
    Tdx,
    #[serde(rename = "snp")]
    #[strum(serialize = "snp")]
    SevSnp,
    Sgx,
    AzSnpVtpm,
    AzTdxVtpm,
    Se,
    Cca,
}

impl Platform {
    pub fn is_hardware(&self) -> bool {
        *self != Platform::Sample
    }
}

pub(crate) type TeeEvidence = serde_json::Value;

pub(crate) type BoxedAttester = Box<dyn Attester + Send + Sync>;

#[async_trait::async_trait]
pub(crate) trait Attester {
    /// Call the hardware driver to get the hardware specific evidence.
    /// `report_data` is bound into the evidence to avoid replay.
    async fn get_evidence(&self, report_data: Vec<u8>) -> Result<TeeEvidence>;
}

impl TryFrom<Platform> for BoxedAttester {
    type Error = EvidenceError;

    fn try_from(value: Platform) -> Result<Self> {
        let attester: BoxedAttester = match value {
            Platform::Sample => Box::<sample::SampleAttester>::default(),
            #[cfg(feature = "tdx-attester")]
            Platform::Tdx => Box::<tdx::TdxAttester>::default(),
            #[cfg(feature = "sgx-attester")]
            Platform::Sgx => Box::<sgx_dcap::SgxDcapAttester>::default(),
            #[cfg(feature = "az-snp-vtpm-attester")]
            Platform::AzSnpVtpm => Box::<az_snp_vtpm::AzSnpVtpmAttester>::default(),
            #[cfg(feature = "az-tdx-vtpm-attester")]
            Platform::AzTdxVtpm => Box::<az_tdx_vtpm::AzTdxVtpmAttester>::default(),
            #[cfg(feature = "cca-attester")]
            Platform::Cca => Box::<cca::CcaAttester>::default(),
            #[cfg(feature = "snp-attester")]
            Platform::SevSnp => Box::<snp::SnpAttester>::default(),
            #[cfg(feature = "se-attester")]
            Platform::Se => Box::<se::SeAttester>::default(),
            #[allow(unreachable_patterns)]
            other => return Err(EvidenceError::Unsupported(other)),
        };

        Ok(attester)
    }
}

/// Probe the hardware attesters in priority order. A permission failure
/// while probing is returned as is: it means a TEE is present but the
/// process is not allowed to use it.
pub fn detect_hardware() -> Result<Platform> {
    #[cfg(feature = "tdx-attester")]
    if tdx::detect_platform()? {
        return Ok(Platform::Tdx);
    }

    #[cfg(feature = "sgx-attester")]
    if sgx_dcap::detect_platform() {
        return Ok(Platform::Sgx);
    }

    #[cfg(feature = "az-tdx-vtpm-attester")]
    if az_tdx_vtpm::detect_platform() {
        return Ok(Platform::AzTdxVtpm);
    }

    #[cfg(feature = "az-snp-vtpm-attester")]
    if az_snp_vtpm::detect_platform() {
        return Ok(Platform::AzSnpVtpm);
    }

    #[cfg(feature = "snp-attester")]
    if snp::detect_platform()? {
        return Ok(Platform::SevSnp);
    }

    #[cfg(feature = "cca-attester")]
    if cca::detect_platform()? {
        return Ok(Platform::Cca);
    }

    #[cfg(feature = "se-attester")]
    if se::detect_platform() {
        return Ok(Platform::Se);
    }

    Err(EvidenceError::NoPlatformDetected)
}

/// Detect which TEE platform this process runs in, downgrading to
/// [`Platform::Sample`] when no hardware is found.
pub fn detect_platform() -> Result<Platform> {
    match detect_hardware() {
        Err(EvidenceError::NoPlatformDetected) => {
            log::warn!(
                "No TEE platform detected. Sample Attester will be used.
         The evidence produced from now on carries NO hardware confidentiality guarantee.
         If you are expecting to collect evidence from inside a confidential guest,
         either your guest is not configured correctly, or this runner was not built
         with support for the platform.

         Attestation will continue using the fallback sample attester."
            );
            Ok(Platform::Sample)
        }
        other => other,
    }
}

/// Attestation evidence of one platform, serialized as the JSON document
/// the KBS verifier for that platform expects.
pub struct Evidence {
    pub platform: Platform,
    pub data: Vec<u8>,
}

impl Evidence {
    /// Consume the evidence as a JSON value for an attestation request.
    pub fn into_json(self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.data)?)
    }
}

impl fmt::Debug for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evidence")
            .field("platform", &self.platform)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Entry point of the crate: owns the attester of the platform detected
/// at construction.
pub struct EvidenceCollector {
    platform: Platform,
    attester: BoxedAttester,
}

impl EvidenceCollector {
    pub fn new() -> Result<Self> {
        Self::with_platform(detect_platform()?)
    }

    pub fn with_platform(platform: Platform) -> Result<Self> {
        Ok(Self {
            platform,
            attester: platform.try_into()?,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Collect evidence with `report_data` bound into it. Every call
    /// produces fresh evidence.
    pub async fn collect_evidence(&self, report_data: Vec<u8>) -> Result<Evidence> {
        let evidence = self.attester.get_evidence(report_data).await?;
        let data = serde_json::to_vec(&evidence)?;
        log::debug!("collected {} evidence ({} bytes)", self.platform, data.len());

        Ok(Evidence {
            platform: self.platform,
            data,
        })
    }
}
