// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! A [`ResourceUri`] names one secret held by a KBS, e.g. the key that
//! wraps the layers of an encrypted WASM image:
//!
//! ```text
//! kbs:///<repository>/<type>/<tag>
//! ```
//!
//! The KBS address is deliberately absent from the URI. Which KBS serves
//! the resource is decided by the runner configuration, so the same image
//! annotation can be redeemed against different brokers.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const SCHEME: &str = "kbs";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResourceUriError {
    #[error("invalid kbs resource uri `{0}`, should be kbs:///<repository>/<type>/<tag>")]
    Malformed(String),

    #[error("scheme must be `kbs`, got `{0}`")]
    Scheme(String),

    #[error("resource path must follow the format '<repository>/<type>/<tag>', got `{0}`")]
    Path(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceUri {
    pub repository: String,
    pub r#type: String,
    pub tag: String,
}

impl ResourceUri {
    /// Build a [`ResourceUri`] from a bare resource path such as
    /// `default/key/encryption-key`. A single leading `/` is accepted.
    pub fn from_resource_path(path: &str) -> Result<Self, ResourceUriError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let segments: Vec<&str> = trimmed.split('/').collect();
        let [repository, r#type, tag] = segments[..] else {
            return Err(ResourceUriError::Path(path.to_string()));
        };

        if [repository, r#type, tag]
            .iter()
            .any(|s| s.is_empty() || *s == "." || *s == "..")
        {
            return Err(ResourceUriError::Path(path.to_string()));
        }

        Ok(Self {
            repository: repository.to_string(),
            r#type: r#type.to_string(),
            tag: tag.to_string(),
        })
    }

    /// `<repository>/<type>/<tag>`, the suffix of the KBS resource endpoint.
    pub fn resource_path(&self) -> String {
        format!("{}/{}/{}", self.repository, self.r#type, self.tag)
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}:///{}", self.resource_path())
    }
}

impl FromStr for ResourceUri {
    type Err = ResourceUriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = url::Url::parse(s).map_err(|_| ResourceUriError::Malformed(s.to_string()))?;
        Self::try_from(url)
    }
}

impl TryFrom<url::Url> for ResourceUri {
    type Error = ResourceUriError;

    fn try_from(value: url::Url) -> Result<Self, Self::Error> {
        if value.scheme() != SCHEME {
            return Err(ResourceUriError::Scheme(value.scheme().to_string()));
        }

        if value.host_str().is_some_and(|h| !h.is_empty()) {
            return Err(ResourceUriError::Malformed(value.to_string()));
        }

        Self::from_resource_path(value.path())
            .map_err(|_| ResourceUriError::Malformed(value.to_string()))
    }
}

impl Serialize for ResourceUri {
    fn serialize<S>(&self, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        ser.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ResourceUri {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let intermediate = String::deserialize(de)?;
        intermediate.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{ResourceUri, ResourceUriError};
    use rstest::rstest;

    #[rstest]
    #[case("kbs:///default/key/encryption-key", "default", "key", "encryption-key")]
    #[case("kbs:///alice/cosign-key/213", "alice", "cosign-key", "213")]
    fn parse_and_print(
        #[case] uri: &str,
        #[case] repository: &str,
        #[case] r#type: &str,
        #[case] tag: &str,
    ) {
        let expected = ResourceUri {
            repository: repository.into(),
            r#type: r#type.into(),
            tag: tag.into(),
        };

        let parsed: ResourceUri = uri.parse().expect("parse failed");
        assert_eq!(parsed, expected);
        assert_eq!(parsed.to_string(), uri);

        let deserialized: ResourceUri =
            serde_json::from_str(&format!("\"{uri}\"")).expect("deserialize failed");
        assert_eq!(deserialized, expected);
        let serialized = serde_json::to_string(&expected).expect("serialize failed");
        assert_eq!(serialized, format!("\"{uri}\""));
    }

    #[rstest]
    #[case("default/key/encryption-key")]
    #[case("/default/key/encryption-key")]
    fn from_resource_path(#[case] path: &str) {
        let uri = ResourceUri::from_resource_path(path).expect("valid path");
        assert_eq!(uri.resource_path(), "default/key/encryption-key");
    }

    #[rstest]
    #[case("default/key")]
    #[case("default/key/tag/extra")]
    #[case("default//tag")]
    #[case("default/../tag")]
    #[case("")]
    fn bad_resource_path(#[case] path: &str) {
        assert_eq!(
            ResourceUri::from_resource_path(path),
            Err(ResourceUriError::Path(path.to_string()))
        );
    }

    #[rstest]
    #[case("https:///default/key/tag")]
    #[case("kbs://kbs.example.com/default/key/tag")]
    #[case("kbs:///default/key")]
    #[case("not a uri")]
    fn bad_uri(#[case] uri: &str) {
        assert!(uri.parse::<ResourceUri>().is_err());
    }
}
