// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{
    path::PathBuf,
    process::{ExitStatus, Stdio},
};

use async_trait::async_trait;
use log::{debug, info};
use tokio::process::Command;

use crate::error::{Error, Result};

pub const DEFAULT_RUNTIME: &str = "wasmtime";

/// What to execute: the module, the only host directory it may see, an
/// optional exported function and its arguments.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub module: PathBuf,
    pub dir: PathBuf,
    pub function: Option<String>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

#[async_trait]
pub trait WasmEngine: Send + Sync {
    async fn execute(&self, invocation: &Invocation) -> Result<ExecutionOutput>;
}

/// Runs modules with a WASM runtime CLI, `wasmtime` by default.
pub struct WasmtimeCli {
    runtime: String,
}

impl Default for WasmtimeCli {
    fn default() -> Self {
        Self::new(DEFAULT_RUNTIME)
    }
}

impl WasmtimeCli {
    pub fn new(runtime: &str) -> Self {
        Self {
            runtime: runtime.to_string(),
        }
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut command = Command::new(&self.runtime);
        if let Some(function) = &invocation.function {
            command.arg("--invoke").arg(function);
        }
        command
            .arg("--dir")
            .arg(&invocation.dir)
            .arg(&invocation.module)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl WasmEngine for WasmtimeCli {
    async fn execute(&self, invocation: &Invocation) -> Result<ExecutionOutput> {
        let mut command = self.command(invocation);
        debug!("spawning {:?}", command.as_std());
        info!(
            "executing {} with {}",
            invocation.module.display(),
            self.runtime
        );

        let output = command.output().await.map_err(|source| Error::EngineSpawn {
            runtime: self.runtime.clone(),
            source,
        })?;

        Ok(ExecutionOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, os::unix::fs::PermissionsExt};

    use serial_test::serial;

    use super::*;

    fn script(body: &str) -> tempfile::TempPath {
        let mut file = tempfile::Builder::new()
            .prefix("fake-runtime-")
            .tempfile()
            .unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o755))
            .unwrap();
        file.into_temp_path()
    }

    fn invocation(function: Option<&str>, args: &[&str]) -> Invocation {
        Invocation {
            module: "/scope/modules/abc.wasm".into(),
            dir: "/scope/sandbox".into(),
            function: function.map(str::to_string),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    // Serialized: exec'ing a freshly written script races with forks of
    // other tests holding it open for writing (ETXTBSY).
    #[tokio::test]
    #[serial]
    async fn passes_invocation_as_arguments() {
        let runtime = script(r#"echo "$@""#);
        let engine = WasmtimeCli::new(runtime.to_str().unwrap());

        let output = engine
            .execute(&invocation(Some("add"), &["5", "10"]))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(
            output.stdout.trim(),
            "--invoke add --dir /scope/sandbox /scope/modules/abc.wasm 5 10"
        );

        let output = engine.execute(&invocation(None, &[])).await.unwrap();
        assert_eq!(
            output.stdout.trim(),
            "--dir /scope/sandbox /scope/modules/abc.wasm"
        );
    }

    #[tokio::test]
    #[serial]
    async fn captures_failure() {
        let runtime = script("echo trap >&2; exit 3");
        let engine = WasmtimeCli::new(runtime.to_str().unwrap());

        let output = engine.execute(&invocation(None, &[])).await.unwrap();
        assert!(!output.success());
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stderr.trim(), "trap");
    }

    #[tokio::test]
    async fn missing_runtime() {
        let engine = WasmtimeCli::new("/nonexistent/wasm-runtime");
        let err = engine.execute(&invocation(None, &[])).await.unwrap_err();
        assert!(matches!(err, Error::EngineSpawn { .. }));
    }
}
