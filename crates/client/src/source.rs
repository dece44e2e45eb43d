//! Backend notification listing endpoint.

use std::future::Future;

use bulletin_common::config::AppConfig;
use bulletin_common::error::{BulletinError, Result};
use bulletin_common::types::NotificationRecord;
use bulletin_engine::{FetchMode, FetchRequest};

/// Anything that can answer a [`FetchRequest`].
pub trait NotificationSource {
    fn fetch(&self, request: FetchRequest) -> impl Future<Output = Result<Vec<NotificationRecord>>>;
}

/// `GET {base}/api/notifications?limit=N[&after_id=X]` over reqwest.
#[derive(Debug, Clone)]
pub struct HttpNotificationSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotificationSource {
    pub fn new(api_base_url: &str, client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: format!("{}/api/notifications", api_base_url.trim_end_matches('/')),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("bulletin/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::new(&config.api_base_url, client))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Query parameters for a request.
    pub fn query(request: &FetchRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![("limit", request.limit.to_string())];
        if let FetchMode::Incremental { after_id } = request.mode {
            query.push(("after_id", after_id.to_string()));
        }
        query
    }
}

impl NotificationSource for HttpNotificationSource {
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<NotificationRecord>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&Self::query(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BulletinError::Status {
                status: status.as_u16(),
                url: self.endpoint.clone(),
            });
        }

        // Decode from bytes so a malformed payload surfaces as a decode error.
        let body = response.bytes().await?;
        let records: Vec<NotificationRecord> = serde_json::from_slice(&body)?;
        Ok(records)
    }
}
