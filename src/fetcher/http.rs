use async_trait::async_trait;

use super::{
    decode_manifest, decode_registry, item_path, manifest_path, validate_key, MetadataFetcher,
    REGISTRY_DOCUMENT,
};
use crate::error::{MetadataError, Result};
use crate::manifest::Manifest;
use crate::registry::VersionRegistry;
use crate::scope::Environment;

/// Metadata held in a remote object store reachable over HTTP.
///
/// Documents are read with `GET <base>/<path>` and written with
/// `PUT <base>/<path>`. Writes carry the bearer token when one is set.
pub struct HttpFetcher {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
    environment: Environment,
}

impl HttpFetcher {
    pub fn new(base_url: &str, environment: Environment) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client: reqwest::Client::new(),
            environment,
        }
    }

    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    fn url(&self, relative: &str) -> String {
        format!("{}/{}", self.base_url, relative)
    }

    async fn get(&self, relative: &str) -> Result<String> {
        let url = self.url(relative);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MetadataError::fetcher(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::fetcher(url, format!("upstream returned {}", status)));
        }
        response
            .text()
            .await
            .map_err(|e| MetadataError::fetcher(url, e))
    }

    async fn put(&self, relative: &str, body: String) -> Result<()> {
        let url = self.url(relative);
        let mut request = self
            .client
            .put(&url)
            .header("content-type", "application/json")
            .body(body);
        if let Some(ref t) = self.token {
            request = request.bearer_auth(t);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MetadataError::fetcher(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MetadataError::fetcher(
                url,
                format!("upload failed ({}): {}", status, body),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataFetcher for HttpFetcher {
    async fn get_item_json(&self, key: &str, version: &str) -> Result<String> {
        validate_key(key)?;
        self.get(&item_path(key, version)).await
    }

    async fn get_version_registry(&self) -> Result<VersionRegistry> {
        let doc = self.get(REGISTRY_DOCUMENT).await?;
        decode_registry(&self.url(REGISTRY_DOCUMENT), doc.as_bytes())
    }

    async fn get_manifest(&self, version: &str) -> Result<Manifest> {
        let relative = manifest_path(version);
        let doc = self.get(&relative).await?;
        decode_manifest(&self.url(&relative), doc.as_bytes())
    }

    async fn set_item_json(&self, key: &str, json: &str, version: &str) -> Result<()> {
        validate_key(key)?;
        self.put(&item_path(key, version), json.to_string()).await
    }

    async fn set_manifest(&self, manifest: &Manifest, version: &str) -> Result<()> {
        let json = self.environment.to_json(manifest)?;
        self.put(&manifest_path(version), json).await
    }

    async fn set_version_registry(&self, registry: &VersionRegistry) -> Result<()> {
        let json = self.environment.to_json(registry)?;
        self.put(REGISTRY_DOCUMENT, json).await
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let fetcher = HttpFetcher::new("https://cdn.example.com/metadata/", Environment::Local);
        assert_eq!(
            fetcher.url(&item_path("Foo", "1.0")),
            "https://cdn.example.com/metadata/1.0/Foo.json"
        );
    }
}
