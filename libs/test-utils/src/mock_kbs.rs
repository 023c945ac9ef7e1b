// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! An in-process KBS speaking the RCAR protocol over plain HTTP, for tests.
//!
//! It verifies that sample evidence is bound to the nonce it handed out and
//! to the TEE public key, and seals released resources to that key. The
//! same server can act as a passport token issuer.

use std::{
    collections::HashMap,
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use crypto::{rsa::PaddingMode, HashAlgorithm, WrapType};
use hyper::{
    header,
    server::conn::AddrStream,
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use log::debug;
use serde_json::{json, Value};
use tokio::sync::oneshot;

const SESSION_COOKIE: &str = "kbs-session-id";
const RESOURCE_PREFIX: &str = "/kbs/v0/resource/";

/// What the resource endpoint answers once the caller is attested.
#[derive(Clone, Debug)]
pub enum ResourceReply {
    /// A JWE sealing these bytes to the TEE key.
    Payload(Vec<u8>),
    /// 200 with no body at all.
    EmptyBody,
    /// 200 with a JWE whose plaintext is empty.
    EmptyPayload,
    NotFound,
    Status(u16),
}

#[derive(Clone, Debug)]
pub struct MockKbsConfig {
    /// Value of `attestation-modes` in the challenge. `None` leaves the key
    /// out, as older servers do.
    pub modes: Option<Vec<String>>,
    pub resource: ResourceReply,
    /// Answer every attestation with 401.
    pub reject_attestation: bool,
    /// Number of leading auth requests answered with 503.
    pub transient_failures: usize,
    /// Mint a token on successful attestation.
    pub issue_token: bool,
    /// Mint tokens that expired long ago.
    pub expired_tokens: bool,
}

impl Default for MockKbsConfig {
    fn default() -> Self {
        Self {
            modes: None,
            resource: ResourceReply::NotFound,
            reject_attestation: false,
            transient_failures: 0,
            issue_token: false,
            expired_tokens: false,
        }
    }
}

impl MockKbsConfig {
    pub fn with_payload(payload: &[u8]) -> Self {
        Self {
            resource: ResourceReply::Payload(payload.to_vec()),
            ..Default::default()
        }
    }

    pub fn modes(mut self, modes: &[&str]) -> Self {
        self.modes = Some(modes.iter().map(|m| m.to_string()).collect());
        self
    }
}

/// Requests seen by the server, per endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub auth: usize,
    pub attest: usize,
    pub resource: usize,
}

#[derive(Default)]
struct Session {
    nonce: String,
    tee_pubkey: Option<Value>,
}

struct State {
    config: MockKbsConfig,
    sessions: HashMap<String, Session>,
    next_session: usize,
    failures_left: usize,
    stats: Stats,
    nonces_attested: Vec<String>,
    resource_paths: Vec<String>,
}

type Shared = Arc<Mutex<State>>;

pub struct MockKbs {
    addr: SocketAddr,
    state: Shared,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockKbs {
    /// Start serving on an ephemeral port of 127.0.0.1. Needs a running
    /// tokio runtime.
    pub fn start(config: MockKbsConfig) -> Self {
        let state = Arc::new(Mutex::new(State {
            failures_left: config.transient_failures,
            config,
            sessions: HashMap::new(),
            next_session: 0,
            stats: Stats::default(),
            nonces_attested: Vec::new(),
            resource_paths: Vec::new(),
        }));

        let service_state = state.clone();
        let make_service = make_service_fn(move |_conn: &AddrStream| {
            let state = service_state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle(state.clone(), req)))
            }
        });

        let server = Server::try_bind(&SocketAddr::from(([127, 0, 0, 1], 0)))
            .expect("bind mock KBS")
            .serve(make_service);
        let addr = server.local_addr();

        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(server.with_graceful_shutdown(async {
            rx.await.ok();
        }));
        debug!("mock KBS listening on {addr}");

        Self {
            addr,
            state,
            shutdown: Some(tx),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn stats(&self) -> Stats {
        self.state.lock().unwrap().stats
    }

    /// Nonces that were answered with valid evidence, in order.
    pub fn nonces_attested(&self) -> Vec<String> {
        self.state.lock().unwrap().nonces_attested.clone()
    }

    pub fn resource_paths(&self) -> Vec<String> {
        self.state.lock().unwrap().resource_paths.clone()
    }
}

impl Drop for MockKbs {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle(state: Shared, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let session = session_id(&req);
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let body = hyper::body::to_bytes(req.into_body())
        .await
        .unwrap_or_default();

    let mut state = state.lock().unwrap();
    let response = match (method, path.as_str()) {
        (Method::POST, "/kbs/v0/auth") => state.auth(&body),
        (Method::POST, "/kbs/v0/attest") => state.attest(session, &body),
        (Method::GET, p) if p.starts_with(RESOURCE_PREFIX) => {
            state.resource(&p[RESOURCE_PREFIX.len()..], session, bearer)
        }
        _ => status(StatusCode::NOT_FOUND, "URL NOT FOUND"),
    };
    Ok(response)
}

impl State {
    fn auth(&mut self, body: &[u8]) -> Response<Body> {
        self.stats.auth += 1;
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return status(StatusCode::SERVICE_UNAVAILABLE, "try again later");
        }

        let Ok(request) = serde_json::from_slice::<Value>(body) else {
            return status(StatusCode::BAD_REQUEST, "BAD REQUEST");
        };
        if request.get("version").and_then(Value::as_str).is_none() {
            return status(StatusCode::BAD_REQUEST, "missing protocol version");
        }

        self.next_session += 1;
        let id = format!("session-{}", self.next_session);
        let nonce = STANDARD.encode(crypto::random_bytes::<32>());
        self.sessions.insert(
            id.clone(),
            Session {
                nonce: nonce.clone(),
                tee_pubkey: None,
            },
        );

        let mut extra_params = json!({ "selected-hash-algorithm": "sha384" });
        if let Some(modes) = &self.config.modes {
            extra_params["attestation-modes"] = json!(modes);
        }
        let challenge = json!({ "nonce": nonce, "extra-params": extra_params });

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::SET_COOKIE, format!("{SESSION_COOKIE}={id}; Path=/"))
            .body(Body::from(challenge.to_string()))
            .unwrap()
    }

    fn attest(&mut self, session: Option<String>, body: &[u8]) -> Response<Body> {
        self.stats.attest += 1;
        let Some(session) = session.and_then(|id| self.sessions.get_mut(&id)) else {
            return error_info(StatusCode::UNAUTHORIZED, "Unauthorized", "no session");
        };
        if self.config.reject_attestation {
            return error_info(
                StatusCode::UNAUTHORIZED,
                "AttestationFailed",
                "evidence does not satisfy the policy",
            );
        }

        let Ok(attestation) = serde_json::from_slice::<Value>(body) else {
            return status(StatusCode::BAD_REQUEST, "BAD REQUEST");
        };
        let tee_pubkey = attestation["tee-pubkey"].clone();
        let runtime_data = json!({
            "tee-pubkey": tee_pubkey,
            "nonce": session.nonce,
        });
        let expected = HashAlgorithm::Sha384.digest(runtime_data.to_string().as_bytes());
        let reported = attestation["tee-evidence"]["report_data"]
            .as_str()
            .and_then(|r| STANDARD.decode(r).ok());
        if reported.as_deref() != Some(&expected[..]) {
            return error_info(
                StatusCode::UNAUTHORIZED,
                "AttestationFailed",
                "report data does not bind nonce and key",
            );
        }

        session.tee_pubkey = Some(tee_pubkey.clone());
        self.nonces_attested.push(session.nonce.clone());

        let body = if self.config.issue_token {
            json!({ "token": mint_token(&tee_pubkey, self.config.expired_tokens) })
        } else {
            json!({})
        };
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn resource(
        &mut self,
        path: &str,
        session: Option<String>,
        bearer: Option<String>,
    ) -> Response<Body> {
        self.stats.resource += 1;
        self.resource_paths.push(path.to_string());

        let tee_pubkey = match bearer {
            Some(token) => token_pubkey(&token),
            None => session
                .and_then(|id| self.sessions.get(&id))
                .and_then(|s| s.tee_pubkey.clone()),
        };
        let Some(tee_pubkey) = tee_pubkey else {
            return error_info(StatusCode::UNAUTHORIZED, "Unauthorized", "not attested");
        };

        match &self.config.resource {
            ResourceReply::Payload(payload) => json_response(seal(&tee_pubkey, payload)),
            ResourceReply::EmptyPayload => json_response(seal(&tee_pubkey, &[])),
            ResourceReply::EmptyBody => Response::new(Body::empty()),
            ResourceReply::NotFound => {
                error_info(StatusCode::NOT_FOUND, "ResourceNotFound", "no such resource")
            }
            ResourceReply::Status(code) => status(
                StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                "mock failure",
            ),
        }
    }
}

fn session_id(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|c| c.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

fn status(code: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(code)
        .body(Body::from(message.to_string()))
        .unwrap()
}

fn error_info(code: StatusCode, error_type: &str, detail: &str) -> Response<Body> {
    let body = json!({ "type": error_type, "detail": detail });
    Response::builder()
        .status(code)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn json_response(body: Value) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Unsigned JWT carrying the attested key, valid for an hour.
fn mint_token(tee_pubkey: &Value, expired: bool) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let iat = if expired { 1_000_000_000 } else { now() };
    let claims = json!({
        "iat": iat,
        "nbf": iat,
        "exp": iat + 3600,
        "tee-pubkey": tee_pubkey,
    });
    format!("{header}.{}.", URL_SAFE_NO_PAD.encode(claims.to_string()))
}

fn token_pubkey(token: &str) -> Option<Value> {
    let claims = token.split('.').nth(1)?;
    let claims = URL_SAFE_NO_PAD.decode(claims).ok()?;
    let claims: Value = serde_json::from_slice(&claims).ok()?;
    if claims["exp"].as_u64()? < now() {
        return None;
    }
    Some(claims["tee-pubkey"].clone())
}

/// JWE sealing `payload` to an RSA JWK, RSA-OAEP-256 over A256GCM.
pub fn seal(tee_pubkey: &Value, payload: &[u8]) -> Value {
    let field = |name: &str| {
        tee_pubkey[name]
            .as_str()
            .and_then(|v| URL_SAFE_NO_PAD.decode(v).ok())
            .expect("RSA JWK")
    };
    let (n, e) = (field("n"), field("e"));

    let protected = URL_SAFE_NO_PAD.encode(r#"{"alg":"RSA-OAEP-256","enc":"A256GCM"}"#);
    let cek = crypto::random_bytes::<32>();
    let iv = crypto::random_bytes::<12>();
    let encrypted_key = crypto::rsa::encrypt_to_public_key(&n, &e, PaddingMode::OAEP256, &cek)
        .expect("wrap CEK");
    let sealed = crypto::encrypt_aead(&cek, payload, &iv, protected.as_bytes(), WrapType::Aes256Gcm)
        .expect("seal payload");

    json!({
        "protected": protected,
        "encrypted_key": URL_SAFE_NO_PAD.encode(encrypted_key),
        "iv": URL_SAFE_NO_PAD.encode(iv),
        "ciphertext": URL_SAFE_NO_PAD.encode(sealed.ciphertext),
        "tag": URL_SAFE_NO_PAD.encode(sealed.tag),
    })
}
