// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! # KBS Client
//!
//! One client serves both attestation models. Which one is used is decided
//! per fetch from the modes the KBS advertises in its auth challenge, before
//! any evidence or resource request is sent:
//! - `rcar_client`: the auth/attest handshake and the background-check flow,
//!   where the resource is read on the attested cookie session.
//! - `token_client`: the passport flow, where an issuer exchanges evidence
//!   for a token that is redeemed at the resource endpoint.

pub mod rcar_client;
pub mod token_client;

use std::fmt;

use log::{debug, info};
use resource_uri::ResourceUri;

use crate::{
    evidence_provider::EvidenceProvider,
    keypair::TeeKeyPair,
    retry::RetryPolicy,
    token::Token,
    types::{ErrorInformation, ProtocolMode, RawKeyResponse, Response},
    Error, Result,
};

pub const KBS_PROTOCOL_VERSION: &str = "0.4.0";

pub const KBS_PREFIX: &str = "kbs/v0";

/// This Client is used to connect to the remote KBS.
pub struct KbsClient {
    pub(crate) provider: Box<dyn EvidenceProvider>,

    /// The asymmetric key pair inside the TEE
    pub(crate) tee_key: TeeKeyPair,

    /// Http client, with a cookie store for the attested session
    pub(crate) http_client: reqwest::Client,

    /// KBS Host URL
    pub(crate) kbs_host_url: String,

    /// Passport token issuer, the KBS itself when unset
    pub(crate) token_issuer_url: Option<String>,

    pub(crate) preferred_mode: Option<ProtocolMode>,

    pub(crate) retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Auth,
    Attest,
    Resource,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Auth => write!(f, "auth"),
            Stage::Attest => write!(f, "attest"),
            Stage::Resource => write!(f, "resource"),
        }
    }
}

/// Pick the protocol mode for this fetch. A preference the KBS does not
/// advertise is a configuration error, never a reason to try it anyway.
pub fn resolve_mode(
    preferred: Option<ProtocolMode>,
    advertised: &[ProtocolMode],
) -> Result<ProtocolMode> {
    match preferred {
        Some(mode) if advertised.contains(&mode) => Ok(mode),
        Some(mode) => Err(Error::ProtocolModeMismatch {
            requested: mode,
            advertised: advertised.to_vec(),
        }),
        None => advertised
            .first()
            .copied()
            .ok_or_else(|| Error::KbsInternalError("KBS advertises no attestation mode".into())),
    }
}

/// Map a non-200 answer of the KBS to the error taxonomy.
pub(crate) async fn error_from_response(
    stage: Stage,
    endpoint: &str,
    res: reqwest::Response,
) -> Error {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    let info = match serde_json::from_str::<ErrorInformation>(&body) {
        Ok(e) if !e.detail.is_empty() => format!("{} ({})", e.detail, e.error_type),
        _ => body,
    };

    match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            Error::AttestationRejected {
                endpoint: endpoint.to_string(),
                info: format!("{status} on {stage}: {info}"),
            }
        }
        reqwest::StatusCode::NOT_FOUND if stage == Stage::Resource => {
            Error::ResourceNotFound(format!("{endpoint}: {info}"))
        }
        reqwest::StatusCode::REQUEST_TIMEOUT
        | reqwest::StatusCode::TOO_MANY_REQUESTS
        | reqwest::StatusCode::BAD_GATEWAY
        | reqwest::StatusCode::SERVICE_UNAVAILABLE
        | reqwest::StatusCode::GATEWAY_TIMEOUT => {
            Error::NetworkTransient(format!("{stage} request to {endpoint} answered {status}"))
        }
        _ => Error::KbsInternalError(format!(
            "{stage} request to {endpoint} answered {status}: {info}"
        )),
    }
}

impl KbsClient {
    pub fn kbs_host_url(&self) -> &str {
        &self.kbs_host_url
    }

    /// Attest and fetch `resource_uri`. The whole exchange is retried on
    /// transient network failures, each attempt with fresh evidence bound
    /// to a fresh nonce.
    pub async fn fetch_resource(&self, resource_uri: &ResourceUri) -> Result<RawKeyResponse> {
        let resource = self
            .retry
            .run("KBS resource fetch", move || {
                self.fetch_resource_once(resource_uri)
            })
            .await?;

        info!("KBS released {resource_uri} ({} bytes)", resource.len());
        Ok(resource)
    }

    async fn fetch_resource_once(&self, resource_uri: &ResourceUri) -> Result<RawKeyResponse> {
        let challenge = self.auth(&self.kbs_host_url).await?;
        let advertised = challenge.attestation_modes()?;
        let mode = resolve_mode(self.preferred_mode, &advertised)?;
        debug!("KBS advertises {advertised:?}, using {mode}");

        match mode {
            ProtocolMode::BackgroundCheck => {
                self.attest(&self.kbs_host_url, challenge).await?;
                self.get_resource(resource_uri, None).await
            }
            ProtocolMode::Passport => {
                let token = self.passport_token(challenge, &advertised).await?;
                self.get_resource(resource_uri, Some(&token)).await
            }
        }
    }

    /// Read a resource from the KBS, on the attested session or with a
    /// passport token.
    pub(crate) async fn get_resource(
        &self,
        resource_uri: &ResourceUri,
        token: Option<&Token>,
    ) -> Result<RawKeyResponse> {
        let endpoint = format!(
            "{}/{KBS_PREFIX}/resource/{}",
            self.kbs_host_url,
            resource_uri.resource_path()
        );

        let mut request = self.http_client.get(&endpoint);
        if let Some(token) = token {
            request = request.bearer_auth(&token.content);
        }

        let res = request.send().await?;
        if res.status() != reqwest::StatusCode::OK {
            return Err(error_from_response(Stage::Resource, &endpoint, res).await);
        }

        let body = res.bytes().await?;
        if body.is_empty() {
            return Err(Error::EmptyResource(resource_uri.to_string()));
        }

        let response: Response = serde_json::from_slice(&body)
            .map_err(|e| Error::KbsResponseDeserializationFailed(e.to_string()))?;
        let payload = self
            .tee_key
            .decrypt_response(response)
            .map_err(|e| Error::DecryptResponseFailed(format!("{e:#}")))?;

        RawKeyResponse::new(&resource_uri.to_string(), payload)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::resolve_mode;
    use crate::{types::ProtocolMode::*, Error};

    #[rstest]
    #[case(None, vec![BackgroundCheck], BackgroundCheck)]
    #[case(None, vec![Passport, BackgroundCheck], Passport)]
    #[case(Some(BackgroundCheck), vec![Passport, BackgroundCheck], BackgroundCheck)]
    #[case(Some(Passport), vec![Passport], Passport)]
    fn mode_resolution(
        #[case] preferred: Option<crate::types::ProtocolMode>,
        #[case] advertised: Vec<crate::types::ProtocolMode>,
        #[case] expected: crate::types::ProtocolMode,
    ) {
        assert_eq!(resolve_mode(preferred, &advertised).unwrap(), expected);
    }

    #[test]
    fn unadvertised_preference_is_a_mismatch() {
        let err = resolve_mode(Some(Passport), &[BackgroundCheck]).unwrap_err();
        match err {
            Error::ProtocolModeMismatch {
                requested,
                advertised,
            } => {
                assert_eq!(requested, Passport);
                assert_eq!(advertised, vec![BackgroundCheck]);
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
