// Copyright (c) 2023 Microsoft Corporation
// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::Duration;

use crate::{
    evidence_provider::EvidenceProvider,
    keypair::TeeKeyPair,
    retry::RetryPolicy,
    types::ProtocolMode,
    Error, Result,
};

use super::client::KbsClient;

const KBS_REQ_TIMEOUT_SEC: u64 = 60;

pub struct KbsClientBuilder {
    provider: Box<dyn EvidenceProvider>,
    kbs_certs: Vec<String>,
    kbs_host_url: String,
    token_issuer_url: Option<String>,
    protocol_mode: Option<ProtocolMode>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl KbsClientBuilder {
    pub fn with_evidence_provider(
        evidence_provider: Box<dyn EvidenceProvider>,
        kbs_host_url: &str,
    ) -> Self {
        Self {
            provider: evidence_provider,
            kbs_certs: vec![],
            kbs_host_url: kbs_host_url.trim_end_matches('/').to_string(),
            token_issuer_url: None,
            protocol_mode: None,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(KBS_REQ_TIMEOUT_SEC),
        }
    }

    pub fn add_kbs_cert(mut self, cert_pem: &str) -> Self {
        self.kbs_certs.push(cert_pem.to_string());
        self
    }

    /// Force one attestation model. Without it the first mode the KBS
    /// advertises is used.
    pub fn set_protocol_mode(mut self, mode: ProtocolMode) -> Self {
        self.protocol_mode = Some(mode);
        self
    }

    pub fn set_token_issuer_url(mut self, url: &str) -> Self {
        self.token_issuer_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    pub fn set_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn set_request_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<KbsClient> {
        let mut http_client_builder = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(format!(
                "tee-wasm-runner-kbs-client/{}",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(self.timeout)
            .use_rustls_tls();

        for customer_root_cert in &self.kbs_certs {
            let cert = reqwest::Certificate::from_pem(customer_root_cert.as_bytes())
                .map_err(|e| Error::HttpClient(format!("read KBS public key cert: {e}")))?;
            http_client_builder = http_client_builder.add_root_certificate(cert);
        }

        let tee_key =
            TeeKeyPair::new().map_err(|e| Error::GenerateKeyPairFailed(format!("{e:#}")))?;

        let client = KbsClient {
            provider: self.provider,
            tee_key,
            http_client: http_client_builder
                .build()
                .map_err(|e| Error::HttpClient(format!("build KBS http client: {e}")))?,
            kbs_host_url: self.kbs_host_url,
            token_issuer_url: self.token_issuer_url,
            preferred_mode: self.protocol_mode,
            retry: self.retry,
        };

        Ok(client)
    }
}
