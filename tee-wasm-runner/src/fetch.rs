// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Decrypting layer fetcher.
//!
//! Every layer ends up under the invocation scope handed in by the caller:
//!
//! ```text
//! <scope>/modules/<digest>.wasm   WASM module layers
//! <scope>/layers/<digest>/        unpacked tar layers
//! ```
//!
//! Nothing is published under its final name before it was fully written,
//! authenticated and digest checked.

use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
};

use futures_util::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info};
use oci_client::manifest::OciDescriptor;
use tempfile::NamedTempFile;
use tokio::{fs, io::AsyncWriteExt};
use tokio_tar::ArchiveBuilder;
use walkdir::WalkDir;

use crate::{
    classify::{is_encrypted_layer, plaintext_media_type, Classification, WASM_MARKER},
    decoder::Compression,
    digest::{
        check_digest, verify_digest, DigestHasher, HashReader, HashWriter, LayerDigestHasher,
        DIGEST_SHA256_PREFIX,
    },
    error::FetchError,
    key::DecryptionKey,
    layer_crypto,
    registry::ImageRegistry,
};

pub const DEFAULT_MAX_CONCURRENT_DOWNLOAD: usize = 3;

const MODULES_DIR: &str = "modules";
const LAYERS_DIR: &str = "layers";
const MODULE_FILE_NAME: &str = "module.wasm";
const WHITEOUT_PREFIX: &str = ".wh.";

type FetchResult<T> = std::result::Result<T, FetchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerContent {
    /// A single WASM module file.
    Module,
    /// An unpacked tar layer.
    Directory,
}

#[derive(Debug, Clone)]
pub struct FetchedLayer {
    pub digest: String,
    pub content: LayerContent,
    pub path: PathBuf,
    pub encrypted: bool,
}

/// The local result of fetching every layer of an image.
#[derive(Debug)]
pub struct ExecutionArtifact {
    /// The module to hand to the engine.
    pub module: PathBuf,
    pub layers: Vec<FetchedLayer>,
}

pub struct LayerFetcher<'a> {
    registry: &'a dyn ImageRegistry,
    image_reference: &'a str,
    scope: &'a Path,
    max_concurrent_download: usize,
}

/// Hex part of a digest, usable as a file name.
fn digest_hex(digest: &str) -> FetchResult<&str> {
    match digest.split_once(':') {
        Some((_, hex)) if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()) => Ok(hex),
        _ => Err(FetchError::UnsupportedDigestFormat(digest.to_string())),
    }
}

/// Write `data` next to `destination` and rename it into place.
fn publish_file(data: &[u8], destination: &Path) -> FetchResult<()> {
    let dir = destination
        .parent()
        .ok_or_else(|| FetchError::Io {
            context: format!("{} has no parent directory", destination.display()),
            source: std::io::ErrorKind::InvalidInput.into(),
        })?;
    let mut staged = NamedTempFile::new_in(dir).map_err(FetchError::io("create staging file"))?;
    staged
        .write_all(data)
        .and_then(|_| staged.as_file().sync_all())
        .map_err(FetchError::io("write staging file"))?;
    staged
        .persist(destination)
        .map_err(|e| FetchError::Io {
            context: format!("publish {}", destination.display()),
            source: e.error,
        })?;
    Ok(())
}

impl<'a> LayerFetcher<'a> {
    /// `scope` must be a directory owned by the caller for this invocation.
    pub fn new(registry: &'a dyn ImageRegistry, image_reference: &'a str, scope: &'a Path) -> Self {
        Self {
            registry,
            image_reference,
            scope,
            max_concurrent_download: DEFAULT_MAX_CONCURRENT_DOWNLOAD,
        }
    }

    pub fn max_concurrent_download(mut self, max: usize) -> Self {
        self.max_concurrent_download = max.max(1);
        self
    }

    /// Fetch all `layers` of an image, at most `max_concurrent_download` at a
    /// time, and locate the module to execute.
    pub async fn fetch_layers(
        &self,
        layers: &[OciDescriptor],
        classification: &Classification,
        key: Option<&DecryptionKey>,
    ) -> FetchResult<ExecutionArtifact> {
        let fetched: Vec<(usize, FetchedLayer)> = stream::iter(layers.iter().enumerate())
            .map(|(index, layer)| async move {
                self.fetch_layer(index, layer, classification, key)
                    .await
                    .map(|fetched| (index, fetched))
            })
            .buffer_unordered(self.max_concurrent_download)
            .try_collect()
            .await?;
        let ordered: BTreeMap<usize, FetchedLayer> = fetched.into_iter().collect();
        let layers: Vec<FetchedLayer> = ordered.into_values().collect();

        let module = locate_module(&layers)?;
        info!("WASM module ready at {}", module.display());
        Ok(ExecutionArtifact { module, layers })
    }

    /// Fetch layer `index` of the manifest. Encrypted layers require `key`.
    pub async fn fetch_layer(
        &self,
        index: usize,
        layer: &OciDescriptor,
        classification: &Classification,
        key: Option<&DecryptionKey>,
    ) -> FetchResult<FetchedLayer> {
        let encrypted = is_encrypted_layer(layer);
        let media_type = plaintext_media_type(&layer.media_type);
        let content = if media_type.contains(WASM_MARKER) {
            LayerContent::Module
        } else {
            LayerContent::Directory
        };

        let name = digest_hex(&layer.digest)?;
        let path = match content {
            LayerContent::Module => self.scope.join(MODULES_DIR).join(format!("{name}.wasm")),
            LayerContent::Directory => self.scope.join(LAYERS_DIR).join(name),
        };

        let diff_id = classification.diff_id(index);
        if encrypted {
            let key = key.ok_or_else(|| FetchError::MissingKey {
                digest: layer.digest.clone(),
            })?;
            self.prepare_parent(&path).await?;
            let ciphertext = self.pull_verified(layer).await?;
            let plaintext = layer_crypto::decrypt_layer(key.as_bytes(), &ciphertext, layer)
                .map_err(|e| FetchError::DecryptionFailed {
                    digest: layer.digest.clone(),
                    reason: format!("{e:#}"),
                })?;
            debug!("decrypted layer {} ({} bytes)", layer.digest, plaintext.len());
            self.publish(&plaintext, layer, media_type, diff_id, content, &path)
                .await?;
        } else if content == LayerContent::Module {
            self.prepare_parent(&path).await?;
            debug!("streaming WASM layer {} to {}", layer.digest, path.display());
            self.stream_module(layer, diff_id, &path).await?;
        } else {
            self.prepare_parent(&path).await?;
            let blob = self.pull_verified(layer).await?;
            self.publish(&blob, layer, media_type, diff_id, content, &path)
                .await?;
        }

        Ok(FetchedLayer {
            digest: layer.digest.clone(),
            content,
            path,
            encrypted,
        })
    }

    async fn prepare_parent(&self, path: &Path) -> FetchResult<()> {
        let parent = path.parent().unwrap_or(self.scope);
        fs::create_dir_all(parent)
            .await
            .map_err(FetchError::io(format!("create {}", parent.display())))
    }

    async fn pull_verified(&self, layer: &OciDescriptor) -> FetchResult<Vec<u8>> {
        let mut blob = Vec::new();
        self.registry
            .pull_blob(self.image_reference, layer, &mut blob)
            .await
            .map_err(|e| FetchError::PullBlobFailed {
                digest: layer.digest.clone(),
                message: format!("{e:#}"),
            })?;
        verify_digest(&format!("layer {}", layer.digest), &layer.digest, &blob)?;
        Ok(blob)
    }

    /// Plaintext module straight from the registry into a staged file.
    async fn stream_module(
        &self,
        layer: &OciDescriptor,
        diff_id: Option<&str>,
        destination: &Path,
    ) -> FetchResult<()> {
        let dir = destination.parent().unwrap_or(self.scope);
        let staged = NamedTempFile::new_in(dir).map_err(FetchError::io("create staging file"))?;
        let file = staged
            .reopen()
            .map_err(FetchError::io("open staging file"))?;

        let mut writer = HashWriter::new(
            fs::File::from_std(file),
            LayerDigestHasher::from_digest(&layer.digest)?,
        );
        self.registry
            .pull_blob(self.image_reference, layer, &mut writer)
            .await
            .map_err(|e| FetchError::PullBlobFailed {
                digest: layer.digest.clone(),
                message: format!("{e:#}"),
            })?;
        writer
            .flush()
            .await
            .map_err(FetchError::io("flush staging file"))?;

        let (mut file, digest) = writer.into_parts();
        file.sync_all()
            .await
            .map_err(FetchError::io("sync staging file"))?;
        check_digest(&format!("layer {}", layer.digest), &layer.digest, digest)?;

        // An uncompressed module's diff_id equals its digest.
        if let Some(diff_id) = diff_id {
            if diff_id != layer.digest {
                return Err(FetchError::DigestMismatch {
                    what: format!("diff_id of layer {}", layer.digest),
                    expected: diff_id.to_string(),
                    actual: layer.digest.clone(),
                });
            }
        }

        staged.persist(destination).map_err(|e| FetchError::Io {
            context: format!("publish {}", destination.display()),
            source: e.error,
        })?;
        Ok(())
    }

    async fn publish(
        &self,
        content_bytes: &[u8],
        layer: &OciDescriptor,
        media_type: &str,
        diff_id: Option<&str>,
        content: LayerContent,
        destination: &Path,
    ) -> FetchResult<()> {
        match content {
            LayerContent::Module => {
                if let Some(diff_id) = diff_id {
                    verify_digest(
                        &format!("diff_id of layer {}", layer.digest),
                        diff_id,
                        content_bytes,
                    )?;
                }
                publish_file(content_bytes, destination)
            }
            LayerContent::Directory => {
                let compression = Compression::try_from(media_type)?;
                self.unpack_layer(content_bytes, compression, layer, diff_id, destination)
                    .await
            }
        }
    }

    async fn unpack_layer(
        &self,
        compressed: &[u8],
        compression: Compression,
        layer: &OciDescriptor,
        diff_id: Option<&str>,
        destination: &Path,
    ) -> FetchResult<()> {
        let hasher = LayerDigestHasher::from_digest(diff_id.unwrap_or(DIGEST_SHA256_PREFIX))?;
        let mut reader = HashReader::new(compression.async_decompress(compressed), hasher);
        let mut tar = Vec::new();
        tokio::io::copy(&mut reader, &mut tar)
            .await
            .map_err(|source| FetchError::UnpackFailed {
                digest: layer.digest.clone(),
                source,
            })?;

        let uncompressed_digest = reader.finalize();
        if let Some(diff_id) = diff_id {
            check_digest(
                &format!("diff_id of layer {}", layer.digest),
                diff_id,
                uncompressed_digest,
            )?;
        }

        let parent = destination.parent().unwrap_or(self.scope);
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(parent)
            .map_err(FetchError::io("create layer staging directory"))?;

        unpack(&tar, staging.path())
            .await
            .map_err(|source| FetchError::UnpackFailed {
                digest: layer.digest.clone(),
                source,
            })?;

        if let Err(e) = fs::rename(staging.path(), destination).await {
            // The same layer listed twice in one manifest.
            if !destination.is_dir() {
                return Err(FetchError::io(format!("publish {}", destination.display()))(e));
            }
            debug!("layer {} already unpacked", layer.digest);
        }
        debug!(
            "unpacked {compression} layer {} to {}",
            layer.digest,
            destination.display()
        );
        Ok(())
    }
}

/// Unpack a tar stream below `destination`. Entries escaping `destination`
/// are refused by `unpack_in`; whiteouts have nothing to delete in a single
/// fresh layer and are skipped.
async fn unpack(tar: &[u8], destination: &Path) -> std::io::Result<()> {
    let mut archive = ArchiveBuilder::new(tar)
        .set_ignore_zeros(true)
        .set_preserve_permissions(false)
        .set_unpack_xattrs(false)
        .build();

    let mut entries = archive.entries()?;
    while let Some(entry) = entries.next().await {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let is_whiteout = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(WHITEOUT_PREFIX));
        if is_whiteout {
            debug!("skipping whiteout {}", path.display());
            continue;
        }

        entry.unpack_in(destination).await?;
    }

    Ok(())
}

/// The first module layer in manifest order, otherwise `module.wasm` of the
/// topmost layer that has one, otherwise the first `*.wasm` file found from
/// the top layer down.
fn locate_module(layers: &[FetchedLayer]) -> FetchResult<PathBuf> {
    if let Some(layer) = layers.iter().find(|l| l.content == LayerContent::Module) {
        return Ok(layer.path.clone());
    }

    let directories: Vec<&Path> = layers
        .iter()
        .rev()
        .filter(|l| l.content == LayerContent::Directory)
        .map(|l| l.path.as_path())
        .collect();

    for dir in &directories {
        let candidate = dir.join(MODULE_FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    for dir in &directories {
        let found = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .find(|entry| {
                entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|ext| ext == "wasm")
            });
        if let Some(entry) = found {
            return Ok(entry.into_path());
        }
    }

    Err(FetchError::NoWasmModule)
}
