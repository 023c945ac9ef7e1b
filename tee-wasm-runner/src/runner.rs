// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! The attested decrypt-and-execute pipeline.

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use attester::{Evidence, EvidenceCollector, Platform};
use kbs_protocol::{
    evidence_provider::{EvidenceProvider, NativeEvidenceProvider},
    KbsClientBuilder, RetryPolicy,
};
use log::{debug, info, warn};
use oci_client::manifest::OciImageManifest;
use resource_uri::ResourceUri;
use tempfile::TempDir;

use crate::{
    classify::{classify, is_encrypted_layer, ImageKind},
    config::{RunnerConfig, DEFAULT_RESOURCE_PATH},
    engine::{ExecutionOutput, Invocation, WasmEngine},
    error::{Error, ManifestError, Result},
    fetch::LayerFetcher,
    key::{normalize, DecryptionKey},
    layer_crypto::layer_kid,
    registry::ImageRegistry,
};

const SCOPE_PREFIX: &str = "run-";
const SANDBOX_DIR: &str = "sandbox";

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub image_reference: String,
    pub function: Option<String>,
    pub args: Vec<String>,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub kind: ImageKind,
    /// Platform whose evidence released the key, for encrypted images.
    pub platform: Option<Platform>,
    pub output: ExecutionOutput,
    /// The invocation directory, when it was kept.
    pub artifacts: Option<PathBuf>,
}

/// Lets one provider instance serve the client built for each run.
struct SharedEvidenceProvider(Arc<dyn EvidenceProvider>);

#[async_trait]
impl EvidenceProvider for SharedEvidenceProvider {
    async fn get_evidence(&self, report_data: Vec<u8>) -> kbs_protocol::Result<Evidence> {
        self.0.get_evidence(report_data).await
    }

    fn platform(&self) -> Platform {
        self.0.platform()
    }
}

pub struct TeeWasmRunner {
    config: RunnerConfig,
    registry: Arc<dyn ImageRegistry>,
    engine: Arc<dyn WasmEngine>,
    evidence_provider: Option<Arc<dyn EvidenceProvider>>,
    retry: RetryPolicy,
}

impl TeeWasmRunner {
    pub fn new(
        config: RunnerConfig,
        registry: Arc<dyn ImageRegistry>,
        engine: Arc<dyn WasmEngine>,
    ) -> Self {
        Self {
            config,
            registry,
            engine,
            evidence_provider: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Use `provider` instead of probing the platform this process runs on.
    pub fn with_evidence_provider(mut self, provider: Arc<dyn EvidenceProvider>) -> Self {
        self.evidence_provider = Some(provider);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Pull, attest, decrypt and execute `request.image_reference`, all
    /// within the configured deadline.
    pub async fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        let deadline = Duration::from_secs(self.config.deadline_secs);
        tokio::time::timeout(deadline, self.run_pipeline(request))
            .await
            .map_err(|_| Error::DeadlineExceeded(deadline))?
    }

    async fn run_pipeline(&self, request: &RunRequest) -> Result<RunOutcome> {
        let reference = &request.image_reference;
        info!("pulling manifest of {reference}");
        let pulled = self.registry.pull_manifest(reference).await?;
        if pulled.manifest.layers.is_empty() {
            return Err(ManifestError::NoLayers(reference.clone()).into());
        }

        let classification = classify(&pulled.manifest, &pulled.config);
        info!(
            "{reference} is {} with {} layer(s)",
            classification.kind,
            pulled.manifest.layers.len()
        );

        let (key, platform) = if classification.kind.is_encrypted() {
            let (key, platform) = self.obtain_key(reference, &pulled.manifest).await?;
            (Some(key), Some(platform))
        } else {
            debug!("{reference} has no encrypted layer, skipping attestation");
            (None, None)
        };

        let scope = self.create_scope()?;
        let artifact = LayerFetcher::new(self.registry.as_ref(), reference, scope.path())
            .max_concurrent_download(self.config.max_concurrent_layer_downloads)
            .fetch_layers(&pulled.manifest.layers, &classification, key.as_ref())
            .await?;
        drop(key);

        let sandbox = scope.path().join(SANDBOX_DIR);
        tokio::fs::create_dir(&sandbox)
            .await
            .map_err(|source| Error::WorkDir {
                path: sandbox.clone(),
                source,
            })?;

        let invocation = Invocation {
            module: artifact.module,
            dir: sandbox,
            function: request.function.clone(),
            args: request.args.clone(),
        };
        let output = self.engine.execute(&invocation).await?;
        if !output.success() {
            return Err(Error::ExecutionFailed {
                status: output.status.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }

        let artifacts = if self.config.keep_artifacts {
            let path = scope.keep();
            warn!("keeping decrypted artifacts at {}", path.display());
            Some(path)
        } else {
            let path = scope.path().to_path_buf();
            if let Err(e) = scope.close() {
                warn!("failed to remove {}: {e}", path.display());
            }
            None
        };

        Ok(RunOutcome {
            kind: classification.kind,
            platform,
            output,
            artifacts,
        })
    }

    /// Attest to the KBS and turn the released resource into a key.
    async fn obtain_key(
        &self,
        reference: &str,
        manifest: &OciImageManifest,
    ) -> Result<(DecryptionKey, Platform)> {
        let kbs_url = self
            .config
            .kbs
            .url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::MissingKbsEndpoint {
                reference: reference.to_string(),
            })?;
        let resource_uri = self.resource_uri(manifest)?;

        let provider = self.evidence_provider()?;
        let platform = provider.platform();

        let mut builder = KbsClientBuilder::with_evidence_provider(provider, kbs_url)
            .set_retry_policy(self.retry);
        if let Some(cert) = &self.config.kbs.cert {
            builder = builder.add_kbs_cert(cert);
        }
        if let Some(mode) = self.config.kbs.protocol_mode {
            builder = builder.set_protocol_mode(mode);
        }
        if let Some(issuer) = &self.config.kbs.token_issuer_url {
            builder = builder.set_token_issuer_url(issuer);
        }
        let client = builder.build()?;

        info!("requesting {resource_uri} from {kbs_url} with {platform} evidence");
        let raw = client.fetch_resource(&resource_uri).await?;
        let key = normalize(raw.as_bytes(), self.config.key.min_len)?;
        drop(raw);

        info!(
            "obtained decryption key {resource_uri} from KBS ({} bytes, fingerprint {})",
            key.len(),
            key.fingerprint()
        );
        Ok((key, platform))
    }

    /// The configured resource, else the one the first encrypted layer
    /// names, else the default.
    fn resource_uri(&self, manifest: &OciImageManifest) -> Result<ResourceUri> {
        if let Some(path) = &self.config.kbs.resource_path {
            let parsed = if path.contains("://") {
                path.parse::<ResourceUri>()
            } else {
                ResourceUri::from_resource_path(path)
            };
            return parsed.map_err(|e| Error::InvalidResourcePath {
                path: path.clone(),
                message: e.to_string(),
            });
        }

        if let Some(kid) = manifest
            .layers
            .iter()
            .filter(|layer| is_encrypted_layer(layer))
            .find_map(layer_kid)
        {
            debug!("using key {kid} named by the layer annotations");
            return Ok(kid);
        }

        ResourceUri::from_resource_path(DEFAULT_RESOURCE_PATH).map_err(|e| {
            Error::InvalidResourcePath {
                path: DEFAULT_RESOURCE_PATH.to_string(),
                message: e.to_string(),
            }
        })
    }

    fn evidence_provider(&self) -> Result<Box<dyn EvidenceProvider>> {
        let provider: Box<dyn EvidenceProvider> = match &self.evidence_provider {
            Some(provider) => Box::new(SharedEvidenceProvider(provider.clone())),
            None => Box::new(NativeEvidenceProvider::with_collector(
                EvidenceCollector::new()?,
            )),
        };

        let platform = provider.platform();
        if !platform.is_hardware() {
            if self.config.require_hardware_tee {
                return Err(Error::HardwareTeeRequired(platform));
            }
            warn!(
                "attesting with the {platform} platform: the KBS key is released without any hardware confidentiality guarantee"
            );
        }

        Ok(provider)
    }

    fn create_scope(&self) -> Result<TempDir> {
        let work_dir = &self.config.work_dir;
        std::fs::create_dir_all(work_dir).map_err(|source| Error::WorkDir {
            path: work_dir.clone(),
            source,
        })?;

        tempfile::Builder::new()
            .prefix(SCOPE_PREFIX)
            .tempdir_in(work_dir)
            .map_err(|source| Error::WorkDir {
                path: work_dir.clone(),
                source,
            })
    }
}
