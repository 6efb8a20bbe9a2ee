//! Fetch/render collaborator seam.
//!
//! The orchestrators only need two capabilities: rendered page text for a
//! URL, and an interactive page on which a reveal control can be clicked
//! until it stops producing new content. A reveal that times out is a normal
//! outcome, not an error; it is how pagination terminates.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("GET {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// The control was clicked and new matching elements appeared.
    Revealed,
    /// No clickable control, or the wait elapsed. Pagination is finished.
    TimedOut,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Rendered page text for a URL.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;

    /// An interactive page for list pagination.
    async fn open(&self, url: &str) -> Result<Box<dyn PageSession>, FetchError>;
}

#[async_trait]
pub trait PageSession: Send {
    /// Clicks the element with id `control_id` and waits for a new element of
    /// class `reveal_class` to appear.
    async fn click_and_wait(
        &mut self,
        control_id: &str,
        reveal_class: &str,
    ) -> Result<ClickOutcome, FetchError>;

    /// Page content as currently revealed.
    fn content(&self) -> String;
}

/// Plain-HTTP renderer. It has no script engine, so on its sessions the
/// reveal control is never clickable and pagination ends with the initially
/// served content.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, "whakoom-scrape/0.1")
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_owned(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_owned(),
            });
        }

        response.text().await.map_err(|source| FetchError::Request {
            url: url.to_owned(),
            source,
        })
    }

    async fn open(&self, url: &str) -> Result<Box<dyn PageSession>, FetchError> {
        let html = self.fetch(url).await?;
        Ok(Box::new(StaticSession { html }))
    }
}

struct StaticSession {
    html: String,
}

#[async_trait]
impl PageSession for StaticSession {
    async fn click_and_wait(
        &mut self,
        _control_id: &str,
        _reveal_class: &str,
    ) -> Result<ClickOutcome, FetchError> {
        Ok(ClickOutcome::TimedOut)
    }

    fn content(&self) -> String {
        self.html.clone()
    }
}
