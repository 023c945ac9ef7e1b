// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

#![allow(dead_code)]

use std::{
    collections::HashMap,
    os::unix::process::ExitStatusExt,
    path::Path,
    process::ExitStatus,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_compression::tokio::write::GzipEncoder;
use async_trait::async_trait;
use oci_client::manifest::{OciDescriptor, OciImageManifest};
use resource_uri::ResourceUri;
use serde_json::json;
use sha2::{Digest, Sha256};
use tee_wasm_runner::{
    engine::{ExecutionOutput, Invocation, WasmEngine},
    error::{ManifestError, Result},
    layer_crypto::encrypt_layer,
    registry::{ImageRegistry, PulledManifest},
};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// `(module (func (export "add") (param i32 i32) (result i32) local.get 0 local.get 1 i32.add))`
pub const WASM_ADD: &[u8] = &[
    0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, 0x01, 0x07, 0x01, 0x60, 0x02, 0x7f, 0x7f,
    0x01, 0x7f, 0x03, 0x02, 0x01, 0x00, 0x07, 0x07, 0x01, 0x03, 0x61, 0x64, 0x64, 0x00, 0x00,
    0x0a, 0x09, 0x01, 0x07, 0x00, 0x20, 0x00, 0x20, 0x01, 0x6a, 0x0b,
];

pub const KEK: [u8; 32] = [
    0x3c, 0x9a, 0x51, 0x07, 0xe2, 0x44, 0x8b, 0x10, 0x6f, 0xd1, 0x22, 0x95, 0x0e, 0xb7, 0x73, 0x48,
    0xa0, 0x19, 0x5e, 0xc4, 0x2d, 0x8f, 0x61, 0x3b, 0x97, 0x04, 0xfa, 0x3e, 0x58, 0xcb, 0x16, 0x2f,
];

pub const WASM_LAYER: &str = "application/vnd.wasm.content.layer.v1+wasm";
pub const WASM_CONFIG: &str = "application/vnd.wasm.config.v0+json";
pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const TAR_GZIP_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const ENCRYPTED_SUFFIX: &str = "+encrypted";

pub fn sha256(data: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(data))
}

pub fn kid() -> ResourceUri {
    ResourceUri::from_resource_path("default/key/wasm-add").unwrap()
}

/// A layer descriptor and its blob.
pub struct Layer {
    pub descriptor: OciDescriptor,
    pub blob: Vec<u8>,
    /// Digest of the uncompressed plaintext, for the config diff_ids.
    pub diff_id: String,
}

pub fn plain_layer(media_type: &str, blob: Vec<u8>, diff_id: String) -> Layer {
    Layer {
        descriptor: OciDescriptor {
            media_type: media_type.to_string(),
            digest: sha256(&blob),
            size: blob.len() as i64,
            ..Default::default()
        },
        blob,
        diff_id,
    }
}

pub fn encrypted_layer(media_type: &str, plaintext: Vec<u8>, diff_id: String) -> Layer {
    let (ciphertext, annotations) = encrypt_layer(&KEK, &kid(), &plaintext).unwrap();
    let mut layer = plain_layer(&format!("{media_type}{ENCRYPTED_SUFFIX}"), ciphertext, diff_id);
    layer.descriptor.annotations = Some(annotations.into_iter().collect());
    layer
}

pub fn wasm_layer(module: &[u8]) -> Layer {
    plain_layer(WASM_LAYER, module.to_vec(), sha256(module))
}

pub fn encrypted_wasm_layer(module: &[u8]) -> Layer {
    encrypted_layer(WASM_LAYER, module.to_vec(), sha256(module))
}

pub async fn tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tokio_tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tokio_tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).await.unwrap();
    }
    builder.into_inner().await.unwrap()
}

pub async fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(data).await.unwrap();
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}

/// A gzip tar layer holding `files`, encrypted when asked to.
pub async fn tar_gzip_layer(files: &[(&str, &[u8])], encrypted: bool) -> Layer {
    let tar = tar(files).await;
    let diff_id = sha256(&tar);
    let blob = gzip(&tar).await;
    if encrypted {
        encrypted_layer(TAR_GZIP_LAYER, blob, diff_id)
    } else {
        plain_layer(TAR_GZIP_LAYER, blob, diff_id)
    }
}

pub fn config_with_diff_ids(layers: &[Layer]) -> Vec<u8> {
    json!({
        "architecture": "wasm",
        "os": "wasip1",
        "rootfs": {
            "type": "layers",
            "diff_ids": layers.iter().map(|l| l.diff_id.clone()).collect::<Vec<_>>(),
        }
    })
    .to_string()
    .into_bytes()
}

#[derive(Default)]
pub struct InMemoryRegistry {
    images: HashMap<String, PulledManifest>,
    blobs: HashMap<String, Vec<u8>>,
    blob_pulls: AtomicUsize,
    delay: Option<Duration>,
}

impl InMemoryRegistry {
    pub fn push(&mut self, reference: &str, config_media_type: &str, config: Vec<u8>, layers: Vec<Layer>) {
        let manifest = OciImageManifest {
            config: OciDescriptor {
                media_type: config_media_type.to_string(),
                digest: sha256(&config),
                size: config.len() as i64,
                ..Default::default()
            },
            layers: layers.iter().map(|l| l.descriptor.clone()).collect(),
            ..Default::default()
        };
        for layer in layers {
            self.blobs.insert(layer.descriptor.digest, layer.blob);
        }
        self.images.insert(
            reference.to_string(),
            PulledManifest {
                manifest,
                digest: sha256(reference.as_bytes()),
                config,
            },
        );
    }

    /// Replace the blob stored under `digest`, keeping the descriptor.
    pub fn corrupt_blob(&mut self, digest: &str) {
        if let Some(blob) = self.blobs.get_mut(digest) {
            blob[0] ^= 0xff;
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn blob_pulls(&self) -> usize {
        self.blob_pulls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageRegistry for InMemoryRegistry {
    async fn pull_manifest(&self, image_reference: &str) -> std::result::Result<PulledManifest, ManifestError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.images
            .get(image_reference)
            .cloned()
            .ok_or_else(|| ManifestError::RegistryUnavailable {
                reference: image_reference.to_string(),
                message: "repository name not known to registry".to_string(),
            })
    }

    async fn pull_blob(
        &self,
        _image_reference: &str,
        layer: &OciDescriptor,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> anyhow::Result<()> {
        self.blob_pulls.fetch_add(1, Ordering::SeqCst);
        let blob = self
            .blobs
            .get(&layer.digest)
            .ok_or_else(|| anyhow::anyhow!("blob unknown to registry"))?;
        // Two writes, so streaming consumers see more than one chunk.
        let (head, tail) = blob.split_at(blob.len() / 2);
        out.write_all(head).await?;
        out.write_all(tail).await?;
        out.flush().await?;
        Ok(())
    }
}

/// What the fake engine saw of one invocation.
#[derive(Debug, Clone)]
pub struct Seen {
    pub invocation: Invocation,
    pub module: Vec<u8>,
    pub sandbox_entries: usize,
}

/// Stands in for a WASM runtime: checks the module is WASM and evaluates
/// `add` itself.
#[derive(Default)]
pub struct FakeEngine {
    seen: Mutex<Vec<Seen>>,
    exit_code: i32,
}

impl FakeEngine {
    pub fn failing(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Default::default()
        }
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

fn exit_status(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code << 8)
}

#[async_trait]
impl WasmEngine for FakeEngine {
    async fn execute(&self, invocation: &Invocation) -> Result<ExecutionOutput> {
        let module = std::fs::read(&invocation.module).unwrap();
        let sandbox_entries = std::fs::read_dir(&invocation.dir).unwrap().count();
        self.seen.lock().unwrap().push(Seen {
            invocation: invocation.clone(),
            module: module.clone(),
            sandbox_entries,
        });

        if self.exit_code != 0 {
            return Ok(ExecutionOutput {
                status: exit_status(self.exit_code),
                stdout: String::new(),
                stderr: "wasm trap: unreachable".to_string(),
            });
        }

        let stdout = match (invocation.function.as_deref(), module.starts_with(b"\0asm")) {
            (_, false) => {
                return Ok(ExecutionOutput {
                    status: exit_status(1),
                    stdout: String::new(),
                    stderr: "not a WASM module".to_string(),
                })
            }
            (Some("add"), true) => {
                let sum: i64 = invocation
                    .args
                    .iter()
                    .map(|a| a.parse::<i64>().unwrap())
                    .sum();
                format!("{sum}\n")
            }
            (_, true) => String::new(),
        };

        Ok(ExecutionOutput {
            status: exit_status(0),
            stdout,
            stderr: String::new(),
        })
    }
}

/// `run-*` directories left in `work_dir`.
pub fn leftover_scopes(work_dir: &Path) -> Vec<String> {
    match std::fs::read_dir(work_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("run-"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

pub fn shared(registry: InMemoryRegistry) -> Arc<InMemoryRegistry> {
    Arc::new(registry)
}
