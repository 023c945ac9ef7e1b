// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::path::PathBuf;

use thiserror::Error;

use crate::Platform;

pub type Result<T> = std::result::Result<T, EvidenceError>;

#[derive(Error, Debug)]
pub enum EvidenceError {
    /// No hardware platform was detected. Callers recover by downgrading to
    /// [`Platform::Sample`] with a warning.
    #[error("no TEE platform detected")]
    NoPlatformDetected,

    #[error("permission denied while creating the platform report under {path:?}; the guest is a TEE but this process may not request quotes")]
    PlatformReportAccessDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{platform} evidence generation failed: {message}")]
    PlatformIOError { platform: Platform, message: String },

    #[error("{platform} report data must be no more than {max} bytes, got {actual}")]
    ReportDataTooLong {
        platform: Platform,
        max: usize,
        actual: usize,
    },

    #[error("{0} evidence generation is not supported by this attester")]
    Unsupported(Platform),

    #[error("failed to serialize evidence: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl EvidenceError {
    pub(crate) fn io(platform: Platform, e: impl std::fmt::Display) -> Self {
        Self::PlatformIOError {
            platform,
            message: e.to_string(),
        }
    }
}
