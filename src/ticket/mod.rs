//! Image-move tickets
//!
//! A ticket is titled `[PORTER] image[:tag][|platform,platform]`. The queue
//! hands out one open ticket at a time and receives the outcome as a comment,
//! labels and a close.

use crate::constants::ticket::TITLE_PREFIX;
use crate::error::Result;
use async_trait::async_trait;

pub mod github;

pub use github::GitHubQueue;

/// One open request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub id: u64,
    pub title: String,
    pub requester: String,
}

/// Image and optional platform list named by a ticket title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRequest {
    pub image: String,
    pub platforms: Option<String>,
}

#[async_trait]
pub trait TicketQueue: Send + Sync {
    /// Newest open request, if any.
    async fn fetch_open_request(&self) -> Result<Option<Ticket>>;

    async fn post_comment(&self, id: u64, text: &str) -> Result<()>;

    async fn add_labels(&self, id: u64, labels: &[&str]) -> Result<()>;

    async fn close(&self, id: u64) -> Result<()>;
}

/// Split a ticket title into image and platform list.
pub fn parse_title(title: &str) -> TicketRequest {
    let cleaned = title.replacen(TITLE_PREFIX, "", 1);
    let (image, platforms) = match cleaned.split_once('|') {
        Some((image, platforms)) => (image, Some(platforms)),
        None => (cleaned.as_str(), None),
    };
    TicketRequest {
        image: image.trim().to_string(),
        platforms: platforms
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string),
    }
}
