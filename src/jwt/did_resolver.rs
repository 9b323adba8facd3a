//! HTTP-backed [`DidResolver`]: `did:plc` via a PLC directory, `did:web` via
//! `/.well-known/did.json`. The production implementation of the identity
//! directory capability the JWT Verifier's key resolution depends on.

use std::time::Duration;

use async_trait::async_trait;

use super::errors::KeyResolverError;
use super::key_resolver::{DidDocument, DidResolver};

pub struct HttpDidResolver {
    client: reqwest::Client,
    plc_directory: String,
}

impl HttpDidResolver {
    pub fn new(plc_directory: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            plc_directory: plc_directory.into(),
        }
    }
}

impl Default for HttpDidResolver {
    fn default() -> Self {
        Self::new("https://plc.directory")
    }
}

#[async_trait]
impl DidResolver for HttpDidResolver {
    async fn resolve(&self, did: &str) -> Result<DidDocument, KeyResolverError> {
        let url = if let Some(domain) = did.strip_prefix("did:web:") {
            format!("https://{domain}/.well-known/did.json")
        } else if did.starts_with("did:plc:") {
            format!("{}/{did}", self.plc_directory.trim_end_matches('/'))
        } else {
            return Err(KeyResolverError::UnsupportedIssuer(did.to_string()));
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| KeyResolverError::DirectoryLookupFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| KeyResolverError::DirectoryLookupFailed(e.to_string()))?;

        response
            .json::<DidDocument>()
            .await
            .map_err(|e| KeyResolverError::DirectoryLookupFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_plc_directory_url() {
        let resolver = HttpDidResolver::new("https://plc.directory");
        assert_eq!(resolver.plc_directory, "https://plc.directory");
    }
}
