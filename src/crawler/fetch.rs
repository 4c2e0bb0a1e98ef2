//! Blocking HTTP layer behind the crawler.

use std::time::Duration;
use thiserror::Error;

use crate::config::CrawlerConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("refusing to fetch '{0}': outside the site origin")]
    OutsideOrigin(String),

    #[error("refusing privileged request to '{0}': host or scheme differs from the site origin")]
    CrossOriginPrivileged(String),

    #[error("request to '{url}' failed: {message}")]
    Transport { url: String, message: String },

    #[error("failed to read response body")]
    Body(#[from] std::io::Error),
}

/// Response after following redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub final_url: String,
    pub body: String,
}

/// A single blocking GET with custom headers. Error statuses are responses,
/// not errors; only transport-level failures are.
pub trait PageFetcher {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<RawResponse, FetchError>;
}

pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    pub fn new(config: &CrawlerConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirects(config.max_redirects)
            .user_agent(&config.user_agent)
            .build();
        Self { agent }
    }
}

impl PageFetcher for UreqFetcher {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<RawResponse, FetchError> {
        let mut request = self.agent.get(url);
        for (name, value) in headers {
            request = request.set(name, value);
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => {
                return Err(FetchError::Transport {
                    url: url.to_string(),
                    message: transport.to_string(),
                })
            }
        };

        let status = response.status();
        let final_url = response.get_url().to_string();
        let body = response.into_string()?;
        Ok(RawResponse {
            status,
            final_url,
            body,
        })
    }
}
