//! Public profile text used as extra prompt context.

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct GitHubUser {
    bio: Option<String>,
}

/// Fetch the GitHub bio of `username`.
///
/// Failures are logged and yield `None`; the assistant works without it.
pub async fn fetch_github_bio(username: &str) -> Option<String> {
    fetch_github_bio_from(GITHUB_API_URL, username).await
}

async fn fetch_github_bio_from(base_url: &str, username: &str) -> Option<String> {
    let username = username.trim();
    if username.is_empty() {
        return None;
    }

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(concat!("folio/", env!("CARGO_PKG_VERSION")))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!("Failed to create HTTP client: {}", e);
            return None;
        }
    };

    let url = format!("{}/users/{}", base_url.trim_end_matches('/'), username);
    debug!("Fetching profile from {}", url);

    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!("Could not fetch GitHub profile for {}: {}", username, e);
            return None;
        }
    };

    if !response.status().is_success() {
        warn!(
            "GitHub profile request for {} returned {}",
            username,
            response.status()
        );
        return None;
    }

    match response.json::<GitHubUser>().await {
        Ok(user) => user.bio.and_then(|bio| normalize_bio(&bio)),
        Err(e) => {
            warn!("Unexpected GitHub profile response for {}: {}", username, e);
            None
        }
    }
}

/// Collapse whitespace; an empty bio counts as none.
fn normalize_bio(bio: &str) -> Option<String> {
    let collapsed = bio.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bio() {
        assert_eq!(
            normalize_bio("  Builds things\r\n with   Rust "),
            Some("Builds things with Rust".to_string())
        );
        assert_eq!(normalize_bio(" \n "), None);
    }

    #[test]
    fn test_user_without_bio() {
        let user: GitHubUser = serde_json::from_str(r#"{"login": "someone", "bio": null}"#).unwrap();
        assert_eq!(user.bio, None);
    }

    #[tokio::test]
    async fn test_blank_username_skips_request() {
        assert_eq!(fetch_github_bio_from("http://127.0.0.1:9", "  ").await, None);
    }

    #[tokio::test]
    async fn test_unreachable_server_yields_none() {
        assert_eq!(fetch_github_bio_from("http://127.0.0.1:9", "someone").await, None);
    }
}
