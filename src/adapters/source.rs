use crate::domain::ports::TextSource;
use crate::utils::error::{LookupError, Result};
use reqwest::Client;
use url::Url;

/// Reads text from `http(s)://` URLs, `file://` URLs or plain paths.
#[derive(Debug, Clone)]
pub struct SourceReader {
    client: Client,
}

impl SourceReader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl TextSource for SourceReader {
    async fn read_text(&self, location: &str) -> Result<String> {
        let location = location.trim();
        if location.starts_with("http://") || location.starts_with("https://") {
            tracing::debug!("Fetching {}", location);
            let response = self.client.get(location).send().await?.error_for_status()?;
            return Ok(response.text().await?);
        }

        let path = if location.starts_with("file://") {
            let url = Url::parse(location).map_err(|e| LookupError::InvalidConfigValue {
                field: "source".to_string(),
                value: location.to_string(),
                reason: e.to_string(),
            })?;
            url.to_file_path().map_err(|_| LookupError::InvalidConfigValue {
                field: "source".to_string(),
                value: location.to_string(),
                reason: "not a local file URL".to_string(),
            })?
        } else {
            location.into()
        };
        Ok(tokio::fs::read_to_string(path).await?)
    }
}
