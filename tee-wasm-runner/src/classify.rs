// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use log::warn;
use oci_client::manifest::{OciDescriptor, OciImageManifest};
use oci_spec::image::ImageConfiguration;

use crate::error::ManifestError;

/// Media type marker of WASM content, e.g.
/// `application/vnd.wasm.content.layer.v1+wasm`.
pub const WASM_MARKER: &str = "wasm";

/// Media type suffix of an encrypted layer, e.g.
/// `application/vnd.oci.image.layer.v1.tar+gzip+encrypted`.
pub const ENCRYPTED_SUFFIX: &str = "+encrypted";

/// The four ways an image can be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ImageKind {
    WasmPlain,
    WasmEncrypted,
    OciPlain,
    OciEncrypted,
}

impl ImageKind {
    pub fn new(is_wasm: bool, is_encrypted: bool) -> Self {
        match (is_wasm, is_encrypted) {
            (true, false) => ImageKind::WasmPlain,
            (true, true) => ImageKind::WasmEncrypted,
            (false, false) => ImageKind::OciPlain,
            (false, true) => ImageKind::OciEncrypted,
        }
    }

    pub fn is_wasm(&self) -> bool {
        matches!(self, ImageKind::WasmPlain | ImageKind::WasmEncrypted)
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, ImageKind::WasmEncrypted | ImageKind::OciEncrypted)
    }
}

/// Result of inspecting a pulled manifest and its config, computed once per
/// pull.
#[derive(Debug, Clone)]
pub struct Classification {
    pub kind: ImageKind,
    pub config: ImageConfiguration,
    /// Whether `config` is a default standing in for an unparsable one.
    pub config_substituted: bool,
}

impl Classification {
    /// Uncompressed digest the config declares for layer `index`. Nothing
    /// is declared when the config was substituted.
    pub fn diff_id(&self, index: usize) -> Option<&str> {
        if self.config_substituted {
            return None;
        }
        self.config
            .rootfs()
            .diff_ids()
            .get(index)
            .map(String::as_str)
    }
}

pub fn is_encrypted_layer(layer: &OciDescriptor) -> bool {
    layer.media_type.ends_with(ENCRYPTED_SUFFIX)
}

pub fn is_wasm_layer(layer: &OciDescriptor) -> bool {
    layer.media_type.contains(WASM_MARKER)
}

/// Media type of the layer content before it was encrypted.
pub fn plaintext_media_type(media_type: &str) -> &str {
    media_type
        .strip_suffix(ENCRYPTED_SUFFIX)
        .unwrap_or(media_type)
}

/// Strict parse of an OCI image configuration.
pub fn parse_config(raw_config: &[u8]) -> Result<ImageConfiguration, ManifestError> {
    ImageConfiguration::from_reader(raw_config)
        .map_err(|e| ManifestError::ConfigParseFailed(e.to_string()))
}

/// Substitute the default configuration for a config that failed to parse.
/// The flag tells whether the substitution happened.
pub fn or_default_config(
    parsed: Result<ImageConfiguration, ManifestError>,
) -> (ImageConfiguration, bool) {
    match parsed {
        Ok(config) => (config, false),
        Err(e) => {
            warn!("{e}, continuing with a default image configuration");
            (ImageConfiguration::default(), true)
        }
    }
}

/// Classify an image along the WASM and encryption axes. Never fails:
/// WASM artifacts routinely carry a minimal config such as `{}`.
pub fn classify(manifest: &OciImageManifest, raw_config: &[u8]) -> Classification {
    let (config, config_substituted) = or_default_config(parse_config(raw_config));

    let is_wasm = manifest.config.media_type.contains(WASM_MARKER)
        || manifest.layers.iter().any(is_wasm_layer);
    let is_encrypted = manifest.layers.iter().any(is_encrypted_layer);

    Classification {
        kind: ImageKind::new(is_wasm, is_encrypted),
        config,
        config_substituted,
    }
}
