// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::path::PathBuf;

use clap::Parser;
use kbs_protocol::ProtocolMode;
use serde::Deserialize;

use crate::{
    engine::DEFAULT_RUNTIME,
    error::{Error, Result},
    fetch::DEFAULT_MAX_CONCURRENT_DOWNLOAD,
    key::DEFAULT_MIN_KEY_LENGTH,
};

pub const DEFAULT_WORK_DIR: &str = "/run/tee-wasm-runner";
pub const DEFAULT_DEADLINE_SECS: u64 = 300;

/// Resource asked for when neither the configuration nor the image names one.
pub const DEFAULT_RESOURCE_PATH: &str = "default/key/encryption-key";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct KbsSettings {
    /// URL Address of KBS.
    pub url: Option<String>,

    /// Root certificate of the KBS, PEM.
    pub cert: Option<String>,

    /// `<repository>/<type>/<tag>` of the key. Overrides the resource named
    /// in the layer annotations.
    pub resource_path: Option<String>,

    /// Required protocol mode. The KBS picks when unset.
    pub protocol_mode: Option<ProtocolMode>,

    /// Passport token issuer, the KBS itself when unset.
    pub token_issuer_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct KeySettings {
    pub min_len: usize,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct RegistrySettings {
    /// Registries reached over plain HTTP.
    #[serde(default)]
    pub insecure: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RunnerConfig {
    /// Root owned by the runner. Each invocation works in a private
    /// directory below it.
    pub work_dir: PathBuf,

    #[serde(default)]
    pub kbs: KbsSettings,

    pub key: KeySettings,

    pub deadline_secs: u64,

    pub max_concurrent_layer_downloads: usize,

    /// WASM runtime executable.
    pub runtime: String,

    /// Refuse to run on the sample platform.
    pub require_hardware_tee: bool,

    /// Keep the invocation directory after execution, for debugging.
    pub keep_artifacts: bool,

    #[serde(default)]
    pub registry: RegistrySettings,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            kbs: KbsSettings::default(),
            key: KeySettings {
                min_len: DEFAULT_MIN_KEY_LENGTH,
            },
            deadline_secs: DEFAULT_DEADLINE_SECS,
            max_concurrent_layer_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOAD,
            runtime: DEFAULT_RUNTIME.to_string(),
            require_hardware_tee: false,
            keep_artifacts: false,
            registry: RegistrySettings::default(),
        }
    }
}

impl TryFrom<&str> for RunnerConfig {
    type Error = config::ConfigError;

    fn try_from(config_path: &str) -> std::result::Result<Self, Self::Error> {
        Self::builder()?
            .add_source(config::File::with_name(config_path))
            .build()?
            .try_deserialize()
    }
}

impl RunnerConfig {
    fn builder() -> std::result::Result<
        config::ConfigBuilder<config::builder::DefaultState>,
        config::ConfigError,
    > {
        config::Config::builder()
            .set_default("work_dir", DEFAULT_WORK_DIR)?
            .set_default("key.min_len", DEFAULT_MIN_KEY_LENGTH as u64)?
            .set_default("deadline_secs", DEFAULT_DEADLINE_SECS)?
            .set_default(
                "max_concurrent_layer_downloads",
                DEFAULT_MAX_CONCURRENT_DOWNLOAD as u64,
            )?
            .set_default("runtime", DEFAULT_RUNTIME)?
            .set_default("require_hardware_tee", false)?
            .set_default("keep_artifacts", false)
    }

    /// Assemble the configuration of one run: defaults, then the config
    /// file, then the attestation-agent config for the KBS, then flags.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => RunnerConfig::try_from(&path[..])
                .map_err(|e| Error::Config(format!("{path}: {e}")))?,
            None => RunnerConfig::default(),
        };

        if let Some(path) = &cli.aa_config {
            let aa = AaConfig::try_from(&path[..])
                .map_err(|e| Error::Config(format!("{path}: {e}")))?;
            let kbs = aa.token_configs.kbs;
            if config.kbs.url.is_none() && !kbs.url.is_empty() {
                config.kbs.url = Some(kbs.url);
            }
            if config.kbs.cert.is_none() {
                config.kbs.cert = kbs.cert;
            }
        }

        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(work_dir) = &cli.work_dir {
            self.work_dir = work_dir.clone();
        }
        if let Some(url) = &cli.kbs_uri {
            self.kbs.url = Some(url.clone());
        }
        if let Some(path) = &cli.kbs_resource_path {
            self.kbs.resource_path = Some(path.clone());
        }
        if let Some(mode) = cli.protocol_mode {
            self.kbs.protocol_mode = Some(mode);
        }
        if let Some(url) = &cli.token_issuer_url {
            self.kbs.token_issuer_url = Some(url.clone());
        }
        if let Some(runtime) = &cli.runtime {
            self.runtime = runtime.clone();
        }
        if let Some(deadline) = cli.deadline_secs {
            self.deadline_secs = deadline;
        }
        self.require_hardware_tee |= cli.require_hardware_tee;
        self.keep_artifacts |= cli.keep_artifacts;
    }

    pub fn validate(&self) -> Result<()> {
        if self.deadline_secs == 0 {
            return Err(Error::Config("deadline_secs must be positive".into()));
        }
        if self.key.min_len == 0 {
            return Err(Error::Config("key.min_len must be positive".into()));
        }
        if self.max_concurrent_layer_downloads == 0 {
            return Err(Error::Config(
                "max_concurrent_layer_downloads must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// The part of an attestation-agent config the runner reads.
#[derive(Clone, Debug, Deserialize)]
pub struct AaConfig {
    pub token_configs: TokenConfigs,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TokenConfigs {
    pub kbs: AaKbsConfig,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AaKbsConfig {
    /// URL Address of KBS.
    pub url: String,

    /// Cert of KBS
    pub cert: Option<String>,
}

impl TryFrom<&str> for AaConfig {
    type Error = config::ConfigError;
    fn try_from(config_path: &str) -> std::result::Result<Self, Self::Error> {
        let c = config::Config::builder()
            .add_source(config::File::with_name(config_path))
            .build()?;

        let cfg = c.try_deserialize()?;
        Ok(cfg)
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// OCI reference of the WASM image
    #[arg(long)]
    pub image_reference: String,

    /// Directory owned by the runner for per-run scratch space
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// URL of the KBS, e.g. `https://kbs.example.com:8080`
    #[arg(long)]
    pub kbs_uri: Option<String>,

    /// KBS resource holding the image key, e.g. `default/key/encryption-key`
    #[arg(long)]
    pub kbs_resource_path: Option<String>,

    /// Attestation-agent config supplying the KBS URL and certificate
    #[arg(long)]
    pub aa_config: Option<String>,

    /// Runner config file (TOML, JSON or YAML)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Protocol mode to require: `background-check` or `passport`
    #[arg(long)]
    pub protocol_mode: Option<ProtocolMode>,

    /// Token issuer of the passport mode
    #[arg(long)]
    pub token_issuer_url: Option<String>,

    /// WASM runtime executable
    #[arg(long)]
    pub runtime: Option<String>,

    /// Exported function to invoke
    #[arg(long)]
    pub invoke: Option<String>,

    /// Arguments passed to the module or the invoked function
    #[arg(long, num_args = 1.., allow_negative_numbers = true)]
    pub wasm_args: Vec<String>,

    /// Overall deadline of the run in seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Fail instead of falling back to the sample attester
    #[arg(long)]
    pub require_hardware_tee: bool,

    /// Keep decrypted artifacts after the run
    #[arg(long)]
    pub keep_artifacts: bool,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;

    use super::*;

    fn config_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("tee-wasm-runner").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let config = RunnerConfig::from_cli(&parse(&["--image-reference", "r/add:1"])).unwrap();
        assert_eq!(config.work_dir, PathBuf::from(DEFAULT_WORK_DIR));
        assert_eq!(config.key.min_len, 32);
        assert_eq!(config.deadline_secs, 300);
        assert_eq!(config.max_concurrent_layer_downloads, 3);
        assert_eq!(config.runtime, "wasmtime");
        assert!(config.kbs.url.is_none());
        assert!(!config.require_hardware_tee);
    }

    #[rstest]
    #[case(
        ".toml",
        r#"
        work_dir = "/var/lib/runner"
        deadline_secs = 30
        [kbs]
        url = "http://kbs:8080"
        resource_path = "default/key/wasm"
        protocol_mode = "passport"
        [key]
        min_len = 16
        [registry]
        insecure = ["localhost:5000"]
        "#
    )]
    #[case(
        ".json",
        r#"{
            "work_dir": "/var/lib/runner",
            "deadline_secs": 30,
            "kbs": {"url": "http://kbs:8080", "resource_path": "default/key/wasm", "protocol_mode": "passport"},
            "key": {"min_len": 16},
            "registry": {"insecure": ["localhost:5000"]}
        }"#
    )]
    fn config_file_formats(#[case] suffix: &str, #[case] content: &str) {
        let file = config_file(suffix, content);
        let config = RunnerConfig::try_from(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.work_dir, PathBuf::from("/var/lib/runner"));
        assert_eq!(config.deadline_secs, 30);
        assert_eq!(config.kbs.url.as_deref(), Some("http://kbs:8080"));
        assert_eq!(config.kbs.resource_path.as_deref(), Some("default/key/wasm"));
        assert_eq!(config.kbs.protocol_mode, Some(ProtocolMode::Passport));
        assert_eq!(config.key.min_len, 16);
        assert_eq!(config.registry.insecure, vec!["localhost:5000".to_string()]);
        // untouched keys keep their defaults
        assert_eq!(config.runtime, "wasmtime");
        assert_eq!(config.max_concurrent_layer_downloads, 3);
    }

    #[test]
    fn precedence() {
        let file = config_file(
            ".toml",
            r#"
            runtime = "wasmtime-19"
            [kbs]
            url = "http://from-file:8080"
            "#,
        );
        let aa = config_file(
            ".toml",
            r#"
            [token_configs.kbs]
            url = "http://from-aa:8080"
            cert = "-----BEGIN CERTIFICATE-----"
            "#,
        );

        let cli = parse(&[
            "--image-reference",
            "r/add:1",
            "--config",
            file.path().to_str().unwrap(),
            "--aa-config",
            aa.path().to_str().unwrap(),
            "--runtime",
            "/opt/wasmtime",
            "--keep-artifacts",
            "--wasm-args",
            "5",
            "-10",
        ]);
        let config = RunnerConfig::from_cli(&cli).unwrap();
        assert_eq!(config.kbs.url.as_deref(), Some("http://from-file:8080"));
        assert_eq!(config.kbs.cert.as_deref(), Some("-----BEGIN CERTIFICATE-----"));
        assert_eq!(config.runtime, "/opt/wasmtime");
        assert!(config.keep_artifacts);
        assert_eq!(cli.wasm_args, vec!["5", "-10"]);

        let cli = parse(&[
            "--image-reference",
            "r/add:1",
            "--aa-config",
            aa.path().to_str().unwrap(),
            "--kbs-uri",
            "http://from-cli:8080",
        ]);
        let config = RunnerConfig::from_cli(&cli).unwrap();
        assert_eq!(config.kbs.url.as_deref(), Some("http://from-cli:8080"));

        let cli = parse(&[
            "--image-reference",
            "r/add:1",
            "--aa-config",
            aa.path().to_str().unwrap(),
        ]);
        let config = RunnerConfig::from_cli(&cli).unwrap();
        assert_eq!(config.kbs.url.as_deref(), Some("http://from-aa:8080"));
    }

    #[rstest]
    #[case(&["--image-reference", "r", "--deadline-secs", "0"])]
    #[case(&["--image-reference", "r", "--config", "/nonexistent/runner.toml"])]
    fn rejected(#[case] args: &[&str]) {
        let err = RunnerConfig::from_cli(&parse(args)).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[test]
    fn protocol_mode_flag() {
        let cli = parse(&["--image-reference", "r", "--protocol-mode", "background-check"]);
        assert_eq!(cli.protocol_mode, Some(ProtocolMode::BackgroundCheck));
        assert!(Cli::try_parse_from(["x", "--image-reference", "r", "--protocol-mode", "rcar"]).is_err());
    }
}
