// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use sha2::Digest;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::FetchError;

pub const DIGEST_SHA256_PREFIX: &str = "sha256:";
pub const DIGEST_SHA512_PREFIX: &str = "sha512:";

pub trait DigestHasher {
    fn digest_update(&mut self, buf: &[u8]);
    fn digest_finalize(self) -> String;
}

#[derive(Clone, Debug)]
pub enum LayerDigestHasher {
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

impl LayerDigestHasher {
    /// Pick the hasher matching the algorithm of an expected digest.
    pub fn from_digest(digest: &str) -> Result<Self, FetchError> {
        if digest.starts_with(DIGEST_SHA256_PREFIX) {
            Ok(LayerDigestHasher::Sha256(sha2::Sha256::new()))
        } else if digest.starts_with(DIGEST_SHA512_PREFIX) {
            Ok(LayerDigestHasher::Sha512(sha2::Sha512::new()))
        } else {
            Err(FetchError::UnsupportedDigestFormat(digest.to_string()))
        }
    }
}

impl DigestHasher for LayerDigestHasher {
    fn digest_update(&mut self, buf: &[u8]) {
        match self {
            LayerDigestHasher::Sha256(hasher) => {
                hasher.update(buf);
            }
            LayerDigestHasher::Sha512(hasher) => {
                hasher.update(buf);
            }
        }
    }

    fn digest_finalize(self) -> String {
        match self {
            LayerDigestHasher::Sha256(hasher) => {
                format!("{}{:x}", DIGEST_SHA256_PREFIX, hasher.finalize())
            }
            LayerDigestHasher::Sha512(hasher) => {
                format!("{}{:x}", DIGEST_SHA512_PREFIX, hasher.finalize())
            }
        }
    }
}

/// Digest of `data` with the algorithm `expected` uses, compared to it.
pub fn verify_digest(what: &str, expected: &str, data: &[u8]) -> Result<(), FetchError> {
    let mut hasher = LayerDigestHasher::from_digest(expected)?;
    hasher.digest_update(data);
    check_digest(what, expected, hasher.digest_finalize())
}

pub fn check_digest(what: &str, expected: &str, actual: String) -> Result<(), FetchError> {
    if actual != expected {
        return Err(FetchError::DigestMismatch {
            what: what.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }

    Ok(())
}

/// Hashes everything read through it.
pub struct HashReader<R, H> {
    reader: R,
    hasher: H,
}

impl<R, H> HashReader<R, H>
where
    R: AsyncRead,
    H: DigestHasher,
{
    pub fn new(reader: R, hasher: H) -> Self {
        HashReader { reader, hasher }
    }

    pub fn finalize(self) -> String {
        self.hasher.digest_finalize()
    }
}

impl<R, H> AsyncRead for HashReader<R, H>
where
    R: AsyncRead + Unpin,
    H: DigestHasher + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let old_position = buf.filled().len();
        let me = &mut *self;
        match Pin::new(&mut me.reader).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let bytes = buf.filled();
                me.hasher.digest_update(&bytes[old_position..]);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Hashes everything written through it, so a blob can be verified while it
/// streams to disk.
pub struct HashWriter<W, H> {
    writer: W,
    hasher: H,
}

impl<W, H> HashWriter<W, H>
where
    W: AsyncWrite,
    H: DigestHasher,
{
    pub fn new(writer: W, hasher: H) -> Self {
        HashWriter { writer, hasher }
    }

    pub fn into_parts(self) -> (W, String) {
        (self.writer, self.hasher.digest_finalize())
    }
}

impl<W, H> AsyncWrite for HashWriter<W, H>
where
    W: AsyncWrite + Unpin,
    H: DigestHasher + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let me = &mut *self;
        match Pin::new(&mut me.writer).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                me.hasher.digest_update(&buf[..written]);
                Poll::Ready(Ok(written))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}
