// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use async_compression::tokio::bufread::{GzipDecoder, ZstdDecoder};
use tokio::io::{AsyncRead, BufReader};

use crate::error::FetchError;

pub const LAYER_MEDIA_TYPE_TAR: &str = "application/vnd.oci.image.layer.v1.tar";
pub const LAYER_MEDIA_TYPE_TAR_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const LAYER_MEDIA_TYPE_TAR_ZSTD: &str = "application/vnd.oci.image.layer.v1.tar+zstd";
pub const DOCKER_LAYER_MEDIA_TYPE_TAR_GZIP: &str =
    "application/vnd.docker.image.rootfs.diff.tar.gzip";
pub const LAYER_MEDIA_TYPE_NONDISTRIBUTABLE_TAR: &str =
    "application/vnd.oci.image.layer.nondistributable.v1.tar";
pub const LAYER_MEDIA_TYPE_NONDISTRIBUTABLE_TAR_GZIP: &str =
    "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip";

/// Compression of a tar layer, derived from its (plaintext) media type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display)]
pub enum Compression {
    #[strum(serialize = "uncompressed")]
    Uncompressed,
    #[default]
    #[strum(serialize = "gzip")]
    Gzip,
    #[strum(serialize = "zstd")]
    Zstd,
}

impl Compression {
    /// Wrap `input` into a reader yielding the uncompressed tar stream.
    pub fn async_decompress<'a>(
        &self,
        input: impl AsyncRead + Unpin + Send + 'a,
    ) -> Box<dyn AsyncRead + Unpin + Send + 'a> {
        match self {
            Compression::Uncompressed => Box::new(input),
            Compression::Gzip => Box::new(GzipDecoder::new(BufReader::new(input))),
            Compression::Zstd => Box::new(ZstdDecoder::new(BufReader::new(input))),
        }
    }
}

impl TryFrom<&str> for Compression {
    type Error = FetchError;

    fn try_from(media_type: &str) -> Result<Self, Self::Error> {
        match media_type {
            LAYER_MEDIA_TYPE_TAR | LAYER_MEDIA_TYPE_NONDISTRIBUTABLE_TAR => {
                Ok(Compression::Uncompressed)
            }
            LAYER_MEDIA_TYPE_TAR_GZIP
            | DOCKER_LAYER_MEDIA_TYPE_TAR_GZIP
            | LAYER_MEDIA_TYPE_NONDISTRIBUTABLE_TAR_GZIP => Ok(Compression::Gzip),
            LAYER_MEDIA_TYPE_TAR_ZSTD => Ok(Compression::Zstd),
            other => Err(FetchError::UnsupportedMediaType(other.to_string())),
        }
    }
}
