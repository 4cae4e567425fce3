use accounts_core::entities::{is_valid_name, LinuxAccountViewsResponse, AuthorizedKeysViewResponse};
use accounts_core::{AccountsError, AuthorizedKeys, Group, User};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::metadata::MetadataFetcher;
use crate::token_bucket::TokenBucket;

/// The two upstream operations the dispatcher and refresh loop depend on,
/// pulled out as a trait so both can be driven against a deterministic fake
/// in tests instead of a real network. Production code always wires up
/// `AccountsHttpClient`.
#[async_trait]
pub trait AccountsSource: Send + Sync {
    async fn get_users_and_groups(
        &self,
        for_user_name: Option<&str>,
    ) -> Result<(Vec<User>, Vec<Group>), AccountsError>;

    async fn get_authorized_keys(&self, user_name: &str) -> Result<AuthorizedKeys, AccountsError>;
}

/// Configuration for reaching the upstream Accounts API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_root: String,
    pub ca_version: String,
    pub compute_version: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_root: "https://www.googleapis.com/".to_string(),
            ca_version: "alpha".to_string(),
            compute_version: "v1".to_string(),
        }
    }
}

pub struct AccountsHttpClient {
    client: Client,
    metadata: MetadataFetcher,
    config: ApiConfig,
    linux_account_views: TokenBucket,
    authorized_keys_view: TokenBucket,
}

impl AccountsHttpClient {
    pub fn new(config: ApiConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            metadata: MetadataFetcher::new(client.clone()),
            client,
            config,
            linux_account_views: TokenBucket::linux_account_views(),
            authorized_keys_view: TokenBucket::authorized_keys_view(),
        }
    }

    fn trim_root(&self) -> &str {
        self.config.api_root.trim_end_matches('/')
    }

    async fn instance_url(&self, project: &str, zone: &str, instance: &str) -> String {
        format!(
            "{}/compute/{}/projects/{}/zones/{}/instances/{}",
            self.trim_root(),
            self.config.compute_version,
            project,
            zone,
            instance
        )
    }

    async fn authorization_header(&self) -> Result<String, AccountsError> {
        self.metadata.authorization_header().await
    }

    async fn send_view_request(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<serde_json::Value, AccountsError> {
        let auth = self.authorization_header().await?;

        let response = self
            .client
            .post(url)
            .query(query)
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| AccountsError::Backend(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(AccountsError::NotFound(url.to_string()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AccountsError::Backend(format!("unreadable response body from {url}: {e}")))?;

        if !status.is_success() {
            return Err(AccountsError::Backend(body));
        }

        serde_json::from_str(&body).map_err(|_| AccountsError::Backend(body))
    }

    fn wall_clock_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs()
    }
}

#[async_trait]
impl AccountsSource for AccountsHttpClient {
    async fn get_users_and_groups(
        &self,
        for_user_name: Option<&str>,
    ) -> Result<(Vec<User>, Vec<Group>), AccountsError> {
        self.linux_account_views.consume()?;

        let project = self.metadata.project().await?;
        let zone = self.metadata.zone().await?;
        let instance = self.metadata.instance_name().await?;
        let instance_url = self.instance_url(&project, &zone, &instance).await;

        let url = format!(
            "{}/computeaccounts/{}/projects/{}/zones/{}/linuxAccountViews",
            self.trim_root(),
            self.config.ca_version,
            project,
            zone
        );

        let mut query = vec![("instance", instance_url.as_str())];
        if let Some(name) = for_user_name {
            query.push(("user", name));
        }

        let body = self.send_view_request(&url, &query).await?;
        let parsed: LinuxAccountViewsResponse = serde_json::from_value(body)
            .map_err(|e| AccountsError::Backend(format!("malformed linuxAccountViews response: {e}")))?;

        let users = parsed
            .resource
            .user_views
            .into_iter()
            .map(User::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let groups = parsed
            .resource
            .group_views
            .into_iter()
            .map(Group::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((users, groups))
    }

    async fn get_authorized_keys(&self, user_name: &str) -> Result<AuthorizedKeys, AccountsError> {
        // Validated before any network I/O: prevents path injection into
        // the request URL.
        if !is_valid_name(user_name) {
            return Err(AccountsError::NotFound("Invalid username".to_string()));
        }

        self.authorized_keys_view.consume()?;

        let project = self.metadata.project().await?;
        let zone = self.metadata.zone().await?;
        let instance = self.metadata.instance_name().await?;
        let instance_url = self.instance_url(&project, &zone, &instance).await;

        let url = format!(
            "{}/computeaccounts/{}/projects/{}/zones/{}/authorizedKeysView/{}",
            self.trim_root(),
            self.config.ca_version,
            project,
            zone,
            user_name
        );

        let body = self
            .send_view_request(&url, &[("instance", instance_url.as_str())])
            .await?;
        let parsed: AuthorizedKeysViewResponse = serde_json::from_value(body)
            .map_err(|e| AccountsError::Backend(format!("malformed authorizedKeysView response: {e}")))?;

        let keys = parsed.resource.into_keys()?;
        Ok(AuthorizedKeys {
            timestamp: Self::wall_clock_now(),
            keys,
        })
    }
}

/// Convenience alias used by the dispatcher/refresh loop to depend on the
/// trait rather than a concrete type.
pub type SharedAccountsSource = Arc<dyn AccountsSource>;
