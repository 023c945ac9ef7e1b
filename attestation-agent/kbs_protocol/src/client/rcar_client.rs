// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use attester::Platform;
use crypto::HashAlgorithm;
use log::debug;
use serde_json::json;

use crate::{
    client::{error_from_response, KbsClient, Stage, KBS_PREFIX, KBS_PROTOCOL_VERSION},
    types::{
        Attestation, AttestationResponseData, Challenge, Request,
        SELECTED_HASH_ALGORITHM_JSON_KEY, SUPPORTED_HASH_ALGORITHMS_JSON_KEY,
    },
    Error, Result,
};

/// Hash algorithm to use when the KBS does not select one.
const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha384;

fn get_request_extra_params() -> serde_json::Value {
    json!({ SUPPORTED_HASH_ALGORITHMS_JSON_KEY: HashAlgorithm::list_all() })
}

// The Request lists the supported hash algorithms; the Challenge returns
// which one the KBS wants the runtime data bound with.
pub(crate) fn build_request(tee: Platform) -> Request {
    Request {
        version: String::from(KBS_PROTOCOL_VERSION),
        tee,
        extra_params: get_request_extra_params(),
    }
}

pub(crate) fn selected_hash_algorithm(challenge: &Challenge) -> Result<HashAlgorithm> {
    match challenge.extra_params.get(SELECTED_HASH_ALGORITHM_JSON_KEY) {
        Some(selected) => {
            // A non-string value becomes a blank name, which fails to parse.
            let name = selected.as_str().unwrap_or("").to_lowercase();
            name.parse::<HashAlgorithm>()
                .map_err(|_| Error::InvalidHashAlgorithm(name))
        }
        None => Ok(DEFAULT_HASH_ALGORITHM),
    }
}

impl KbsClient {
    /// First half of the RCAR handshake: announce the platform and receive
    /// a challenge. The challenge also carries the attestation modes the
    /// server serves.
    pub(crate) async fn auth(&self, base_url: &str) -> Result<Challenge> {
        let endpoint = format!("{base_url}/{KBS_PREFIX}/auth");
        let request = build_request(self.provider.platform());
        debug!("send auth request {request:?} to {endpoint}");

        let res = self.http_client.post(&endpoint).json(&request).send().await?;
        if res.status() != reqwest::StatusCode::OK {
            return Err(error_from_response(Stage::Auth, &endpoint, res).await);
        }

        let challenge = res.json::<Challenge>().await?;
        debug!("get challenge: {challenge:?}");
        Ok(challenge)
    }

    /// Second half of the RCAR handshake. Evidence is generated here, bound
    /// to the challenge nonce and the TEE public key, and moved into the
    /// attestation request.
    pub(crate) async fn attest(
        &self,
        base_url: &str,
        challenge: Challenge,
    ) -> Result<AttestationResponseData> {
        let algorithm = selected_hash_algorithm(&challenge)?;
        let tee_pubkey = self.tee_key.export_pubkey();
        let runtime_data = json!({
            "tee-pubkey": tee_pubkey,
            "nonce": challenge.nonce,
        });
        let report_data = algorithm.digest(runtime_data.to_string().as_bytes());
        debug!("Challenge nonce: {}, algorithm: {algorithm}", challenge.nonce);

        let evidence = self.provider.get_evidence(report_data).await?;
        debug!("get evidence: {evidence:?}");

        let attestation = Attestation {
            tee_pubkey,
            hash_algorithm: algorithm,
            tee_evidence: evidence.into_json()?,
        };

        let endpoint = format!("{base_url}/{KBS_PREFIX}/attest");
        debug!("send attest request to {endpoint}");
        let res = self
            .http_client
            .post(&endpoint)
            .json(&attestation)
            .send()
            .await?;
        if res.status() != reqwest::StatusCode::OK {
            return Err(error_from_response(Stage::Attest, &endpoint, res).await);
        }

        let body = res.bytes().await?;
        if body.is_empty() {
            return Ok(AttestationResponseData::default());
        }

        serde_json::from_slice(&body)
            .map_err(|e| Error::KbsResponseDeserializationFailed(e.to_string()))
    }
}
