use accounts_core::entities::TokenResponse;
use accounts_core::AccountsError;
use reqwest::Client;

const METADATA_ROOT: &str = "http://metadata.google.internal/computeMetadata/v1";

/// Reads host identity and a short-lived bearer token from the host-local
/// metadata server. No caching within a batch — every call is a fresh GET.
pub struct MetadataFetcher {
    client: Client,
    root: String,
}

impl MetadataFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            root: METADATA_ROOT.to_string(),
        }
    }

    #[cfg(test)]
    fn with_root(client: Client, root: String) -> Self {
        Self { client, root }
    }

    async fn get_value(&self, path: &str) -> Result<String, AccountsError> {
        let url = format!("{}/{}", self.root, path);
        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| AccountsError::Backend(format!("metadata request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AccountsError::Backend(format!(
                "metadata request to {url} returned status {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AccountsError::Backend(format!("metadata response from {url} unreadable: {e}")))
    }

    pub async fn project(&self) -> Result<String, AccountsError> {
        self.get_value("project/project-id").await
    }

    /// First dot-segment of `instance/hostname`.
    pub async fn instance_name(&self) -> Result<String, AccountsError> {
        let hostname = self.get_value("instance/hostname").await?;
        hostname
            .split('.')
            .next()
            .map(|s| s.to_string())
            .ok_or_else(|| AccountsError::Backend(format!("unparseable instance hostname: {hostname}")))
    }

    /// Last slash-segment of `instance/zone`.
    pub async fn zone(&self) -> Result<String, AccountsError> {
        let zone = self.get_value("instance/zone").await?;
        zone.rsplit('/')
            .next()
            .map(|s| s.to_string())
            .ok_or_else(|| AccountsError::Backend(format!("unparseable instance zone: {zone}")))
    }

    /// `"<token_type> <access_token>"` parsed from
    /// `instance/service-accounts/default/token`.
    pub async fn authorization_header(&self) -> Result<String, AccountsError> {
        let body = self
            .get_value("instance/service-accounts/default/token")
            .await?;
        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AccountsError::Backend(format!("malformed token response: {e}")))?;
        Ok(token.authorization_header())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_instance_name_takes_first_dot_segment() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/instance/hostname")
            .match_header("Metadata-Flavor", "Google")
            .with_status(200)
            .with_body("my-instance.c.my-project.internal")
            .create_async()
            .await;

        let fetcher = MetadataFetcher::with_root(Client::new(), server.url());
        assert_eq!(fetcher.instance_name().await.unwrap(), "my-instance");
    }

    #[tokio::test]
    async fn test_zone_takes_last_slash_segment() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/instance/zone")
            .with_status(200)
            .with_body("projects/123/zones/us-central1-a")
            .create_async()
            .await;

        let fetcher = MetadataFetcher::with_root(Client::new(), server.url());
        assert_eq!(fetcher.zone().await.unwrap(), "us-central1-a");
    }

    #[tokio::test]
    async fn test_authorization_header_format() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/instance/service-accounts/default/token")
            .with_status(200)
            .with_body(r#"{"token_type":"Bearer","access_token":"xyz"}"#)
            .create_async()
            .await;

        let fetcher = MetadataFetcher::with_root(Client::new(), server.url());
        assert_eq!(fetcher.authorization_header().await.unwrap(), "Bearer xyz");
    }

    #[tokio::test]
    async fn test_failure_maps_to_backend() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/project/project-id")
            .with_status(500)
            .create_async()
            .await;

        let fetcher = MetadataFetcher::with_root(Client::new(), server.url());
        assert!(matches!(fetcher.project().await, Err(AccountsError::Backend(_))));
    }
}
