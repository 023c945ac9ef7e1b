// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use oci_client::{
    client::{ClientConfig, ClientProtocol},
    manifest::{OciDescriptor, OciImageManifest},
    secrets::RegistryAuth,
    Client, Reference,
};
use tokio::io::AsyncWrite;

use crate::error::ManifestError;

/// A manifest together with the raw config blob it points to.
#[derive(Debug, Clone)]
pub struct PulledManifest {
    pub manifest: OciImageManifest,
    pub digest: String,
    pub config: Vec<u8>,
}

/// Source of manifests and blobs.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn pull_manifest(&self, image_reference: &str) -> Result<PulledManifest, ManifestError>;

    /// Write the blob `layer` describes into `out`, verbatim.
    async fn pull_blob(
        &self,
        image_reference: &str,
        layer: &OciDescriptor,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()>;
}

/// [`ImageRegistry`] talking to a real registry with anonymous auth.
pub struct OciRegistry {
    client: Client,
    auth: RegistryAuth,
}

impl OciRegistry {
    /// `insecure` lists the registries reached over plain HTTP.
    pub fn new(insecure: Vec<String>) -> Self {
        let protocol = if insecure.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure)
        };

        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });

        Self {
            client,
            auth: RegistryAuth::Anonymous,
        }
    }
}

fn parse_reference(image_reference: &str) -> Result<Reference, ManifestError> {
    Reference::try_from(image_reference).map_err(|e| ManifestError::InvalidReference {
        reference: image_reference.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl ImageRegistry for OciRegistry {
    async fn pull_manifest(&self, image_reference: &str) -> Result<PulledManifest, ManifestError> {
        let reference = parse_reference(image_reference)?;
        let (manifest, digest, config) = self
            .client
            .pull_manifest_and_config(&reference, &self.auth)
            .await
            .map_err(|e| ManifestError::RegistryUnavailable {
                reference: image_reference.to_string(),
                message: e.to_string(),
            })?;

        debug!("pulled manifest {digest} of {image_reference}");
        Ok(PulledManifest {
            manifest,
            digest,
            config: config.into_bytes(),
        })
    }

    async fn pull_blob(
        &self,
        image_reference: &str,
        layer: &OciDescriptor,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        let reference = parse_reference(image_reference)?;
        self.client.pull_blob(&reference, layer, out).await?;
        Ok(())
    }
}
