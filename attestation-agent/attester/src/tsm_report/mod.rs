// Copyright (c) 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Quote generation through the Linux TSM configfs ABI. Each request
//! lives in its own uniquely named directory under
//! `/sys/kernel/config/tsm/report`, so concurrent runners on one host
//! never share an in-flight report.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum::EnumString;
use tempfile::tempdir_in;
use thiserror::Error;

use crate::{EvidenceError, Platform};

pub const TSM_REPORT_PATH: &str = "/sys/kernel/config/tsm/report";

#[derive(Error, Debug)]
pub enum TsmReportError {
    #[error("Failed to access TSM Report path")]
    NoTsmReports,
    #[error("Permission denied creating TSM Report path instance: {0}")]
    AccessDenied(#[source] std::io::Error),
    #[error("Failed to create TSM Report path instance: {0}")]
    Open(#[source] std::io::Error),
    #[error("Failed to access TSM Report attribute: {0} ({1})")]
    Access(&'static str, #[source] std::io::Error),
    #[error("Failed to parse TSM Report attribute 'generation': {0}")]
    Parse(#[source] std::num::ParseIntError),
    #[error("Failed to open TSM Report path: missing provider {0:?} (provider={1:?})")]
    MissingProvider(TsmReportProvider, TsmReportProvider),
    #[error("Failed to open TSM Report path: unknown provider ({0})")]
    UnknownProvider(#[from] strum::ParseError),
    #[error("Failed to generate TSM Report: inblob write conflict (generation={0}, expected 1)")]
    InblobConflict(u32),
    #[error("Failed to generate TSM Report: missing inblob (len=0)")]
    InblobLen,
}

impl TsmReportError {
    pub(crate) fn into_evidence_error(self, platform: Platform) -> EvidenceError {
        match self {
            TsmReportError::AccessDenied(source) => EvidenceError::PlatformReportAccessDenied {
                path: PathBuf::from(TSM_REPORT_PATH),
                source,
            },
            other => EvidenceError::io(platform, other),
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy, EnumString)]
pub enum TsmReportProvider {
    #[strum(serialize = "tdx_guest\n")]
    Tdx,
    #[strum(serialize = "sev_guest\n")]
    Sev,
    #[strum(serialize = "arm_cca_guest\n")]
    Cca,
}

pub enum TsmReportData {
    Tdx(Vec<u8>),
    Sev(u8, Vec<u8>),
    Cca(Vec<u8>),
}

/// TsmReportPath instance represents a unique path on ConfigFS
/// provided by the TSM_REPORT attestation ABI. Each instance is a
/// one-shot attestation request and the path is removed when the
/// instance goes out of scope, including on early error returns.
pub struct TsmReportPath {
    path: PathBuf,
}

impl Drop for TsmReportPath {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir(self.path.as_path())
            .map_err(|e| log::error!("Failed to remove TSM Report directory: {}", e));
    }
}

impl TsmReportPath {
    pub fn new(wanted: TsmReportProvider) -> Result<Self, TsmReportError> {
        Self::new_in(Path::new(TSM_REPORT_PATH), wanted)
    }

    fn new_in(root: &Path, wanted: TsmReportProvider) -> Result<Self, TsmReportError> {
        if !root.exists() {
            return Err(TsmReportError::NoTsmReports);
        }

        let p = tempdir_in(root).map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => TsmReportError::AccessDenied(e),
            _ => TsmReportError::Open(e),
        })?;

        // tempdir's own Drop errors on ConfigFS and leaks the created path,
        // so ownership moves to TsmReportPath which removes it the rmdir way.
        let report = Self { path: p.keep() };
        check_tsm_report_provider(report.path.as_path(), wanted)?;

        Ok(report)
    }

    pub fn attestation_report(
        &self,
        provider_data: TsmReportData,
    ) -> Result<Vec<u8>, TsmReportError> {
        let report_path = self.path.as_path();

        let report_data = match provider_data {
            TsmReportData::Tdx(inblob) | TsmReportData::Cca(inblob) => inblob,
            TsmReportData::Sev(privlevel, inblob) => {
                std::fs::write(report_path.join("privlevel"), privlevel.to_string())
                    .map_err(|e| TsmReportError::Access("privlevel", e))?;
                inblob
            }
        };

        if report_data.is_empty() {
            return Err(TsmReportError::InblobLen);
        }

        std::fs::write(report_path.join("inblob"), report_data)
            .map_err(|e| TsmReportError::Access("inblob", e))?;

        let q = std::fs::read(report_path.join("outblob"))
            .map_err(|e| TsmReportError::Access("outblob", e))?;

        check_inblob_write_race(report_path)?;

        Ok(q)
    }

    pub fn supplemental_data(&self) -> Result<Vec<u8>, TsmReportError> {
        let report_path = self.path.as_path();

        let aux = std::fs::read(report_path.join("auxblob"))
            .map_err(|e| TsmReportError::Access("auxblob", e))?;

        check_inblob_write_race(report_path)?;

        Ok(aux)
    }
}

/// Whether the TSM ABI is backed by `wanted`. Only a permission failure
/// is an error; every other failure just means "not this platform".
pub(crate) fn provider_available(
    wanted: TsmReportProvider,
    platform: Platform,
) -> Result<bool, EvidenceError> {
    provider_available_in(Path::new(TSM_REPORT_PATH), wanted, platform)
}

fn provider_available_in(
    root: &Path,
    wanted: TsmReportProvider,
    platform: Platform,
) -> Result<bool, EvidenceError> {
    match TsmReportPath::new_in(root, wanted) {
        Ok(_) => Ok(true),
        Err(e @ TsmReportError::AccessDenied(_)) => Err(e.into_evidence_error(platform)),
        Err(e) => {
            log::debug!("TSM report provider {wanted:?} not available: {e}");
            Ok(false)
        }
    }
}

/// Detect a platform whose evidence is quoted through TSM reports. The
/// guest device node alone still identifies the platform, but then no
/// quote can be produced, which is logged loudly.
pub(crate) fn detect_tsm_platform(
    wanted: TsmReportProvider,
    platform: Platform,
    guest_device: &Path,
) -> Result<bool, EvidenceError> {
    detect_tsm_platform_in(Path::new(TSM_REPORT_PATH), wanted, platform, guest_device)
}

fn detect_tsm_platform_in(
    root: &Path,
    wanted: TsmReportProvider,
    platform: Platform,
    guest_device: &Path,
) -> Result<bool, EvidenceError> {
    if provider_available_in(root, wanted, platform)? {
        return Ok(true);
    }

    if !guest_device.exists() {
        return Ok(false);
    }

    log::warn!(
        "{} exists but {} has no {wanted:?} provider: {platform} evidence is only generated through TSM reports, evidence collection will fail",
        guest_device.display(),
        root.display()
    );
    Ok(true)
}

/// check_inblob_write_race checks that the returned outblob/auxblob
/// matches the quote generation request originally triggered when
/// inblob was written by the TsmReportPath instance.
fn check_inblob_write_race(report_path: &Path) -> Result<(), TsmReportError> {
    let g = std::fs::read_to_string(report_path.join("generation"))
        .map_err(|e| TsmReportError::Access("generation", e))?;

    let generation = g
        .trim_matches('\n')
        .parse::<u32>()
        .map_err(TsmReportError::Parse)?;

    if generation > 1 {
        return Err(TsmReportError::InblobConflict(generation));
    }

    Ok(())
}

/// check_tsm_report_provider checks that the TEE is
/// the requested TsmReportProvider.
fn check_tsm_report_provider(
    report_path: &Path,
    wanted: TsmReportProvider,
) -> Result<(), TsmReportError> {
    let report_provider = std::fs::read_to_string(report_path.join("provider"))
        .map_err(|e| TsmReportError::Access("provider", e))?;

    let provider = TsmReportProvider::from_str(&report_provider)?;
    if provider == wanted {
        Ok(())
    } else {
        Err(TsmReportError::MissingProvider(wanted, provider))
    }
}
