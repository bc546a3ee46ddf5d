use crate::{
    error::{Error, Result},
    sync::RemotePreferencesService,
    types::{AccountId, SettingValue},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct PreferencesBody {
    #[serde(default)]
    preferences: HashMap<String, SettingValue>,
}

#[derive(Debug, Serialize)]
struct UpdateBody<'a> {
    value: &'a SettingValue,
}

/// JSON-over-HTTP preferences service client
pub struct HttpRemote {
    base_url: Url,
    access_token: Option<String>,
    http_client: reqwest::Client,
}

impl HttpRemote {
    /// Create a client for the service rooted at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(Error::UrlParse(format!("{} cannot be used as a base URL", base_url)));
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("prefsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url,
            access_token: None,
            http_client,
        })
    }

    /// Send `token` as a bearer token with every request
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::UrlParse(format!("{} cannot be used as a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(Error::Remote {
            status: status.as_u16(),
            message: if message.is_empty() {
                status.to_string()
            } else {
                message
            },
        })
    }
}

#[async_trait]
impl RemotePreferencesService for HttpRemote {
    async fn get_preferences(&self, account: &AccountId) -> Result<HashMap<String, SettingValue>> {
        let account = account.to_string();
        let url = self.endpoint(&["preferences", &account])?;
        debug!("GET {}", url);

        let response = self.authorize(self.http_client.get(url)).send().await?;
        let response = Self::check_status(response).await?;
        let body: PreferencesBody = serde_json::from_slice(&response.bytes().await?)?;
        Ok(body.preferences)
    }

    async fn update_preference(&self, account: &AccountId, key: &str, value: &SettingValue) -> Result<()> {
        let account = account.to_string();
        let url = self.endpoint(&["preferences", &account, key])?;
        debug!("PUT {}", url);

        let request = self.http_client.put(url).json(&UpdateBody { value });
        let response = self.authorize(request).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }
}
