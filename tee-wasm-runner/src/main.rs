// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{process::ExitCode, sync::Arc};

use anyhow::Result;
use clap::Parser;
use log::*;
use tee_wasm_runner::{Cli, OciRegistry, RunRequest, RunnerConfig, TeeWasmRunner, WasmtimeCli};

async fn run(cli: Cli) -> Result<String> {
    let config = RunnerConfig::from_cli(&cli)?;
    debug!("runner config: {config:?}");

    let registry = Arc::new(OciRegistry::new(config.registry.insecure.clone()));
    let engine = Arc::new(WasmtimeCli::new(&config.runtime));
    let runner = TeeWasmRunner::new(config, registry, engine);

    let request = RunRequest {
        image_reference: cli.image_reference,
        function: cli.invoke,
        args: cli.wasm_args,
    };
    let outcome = runner.run(&request).await?;
    if let Some(platform) = outcome.platform {
        info!("{} image released by {platform} attestation", outcome.kind);
    }

    Ok(outcome.output.stdout)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();

    match run(cli).await {
        Ok(stdout) => {
            print!("{stdout}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
