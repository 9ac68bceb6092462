use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use groundswell_common::{GroundswellError, RawPost, RedditCredential};

use super::types::{Listing, TokenResponse};
use crate::planner::SamplingStrategy;
use crate::traits::{ForumApi, ListingPage};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_URL: &str = "https://oauth.reddit.com";

/// Expire cached tokens a minute early to avoid racing the real expiry.
const TOKEN_SLACK_SECS: i64 = 60;

struct CachedToken {
    access_token: String,
    expires_at: i64,
}

/// OAuth (password grant) Reddit listing client. One instance serves every
/// credential; tokens are cached per username.
pub struct RedditClient {
    http: reqwest::Client,
    user_agent: String,
    token_url: String,
    api_url: String,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl RedditClient {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            user_agent: user_agent.into(),
            token_url: TOKEN_URL.to_string(),
            api_url: API_URL.to_string(),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Point at a different endpoint pair (tests, proxies).
    pub fn with_urls(mut self, token_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self.api_url = api_url.into();
        self
    }

    async fn token_for(&self, credential: &RedditCredential) -> Result<String, GroundswellError> {
        {
            let tokens = self.tokens.lock().await;
            if let Some(cached) = tokens.get(&credential.username) {
                if cached.expires_at > Utc::now().timestamp() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        debug!(username = credential.username.as_str(), "Fetching access token");

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&credential.client_id, Some(&credential.client_secret))
            .header("User-Agent", &self.user_agent)
            .form(&[
                ("grant_type", "password"),
                ("username", credential.username.as_str()),
                ("password", credential.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| GroundswellError::SourceApi(format!("token request failed: {e}")))?;

        if response.status().as_u16() == 429 {
            return Err(GroundswellError::RateLimited);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GroundswellError::SourceApi(format!(
                "token request failed ({status}): {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GroundswellError::SourceApi(format!("token decode failed: {e}")))?;

        let access_token = token.access_token.clone();
        self.tokens.lock().await.insert(
            credential.username.clone(),
            CachedToken {
                access_token: token.access_token,
                expires_at: Utc::now().timestamp() + token.expires_in as i64 - TOKEN_SLACK_SECS,
            },
        );
        Ok(access_token)
    }

    fn listing_url(&self, strategy: &SamplingStrategy, after: Option<&str>) -> String {
        let mut url = format!(
            "{}/r/{}/{}?limit={}&raw_json=1",
            self.api_url,
            strategy.sub_source,
            strategy.sort.as_str(),
            strategy.limit.min(100),
        );
        if let Some(filter) = strategy.time_filter {
            url.push_str(&format!("&t={}", filter.as_str()));
        }
        if let Some(offset) = strategy.offset {
            url.push_str(&format!("&count={offset}"));
        }
        if let Some(cursor) = after {
            url.push_str(&format!("&after={cursor}"));
        }
        url
    }
}

#[async_trait]
impl ForumApi for RedditClient {
    async fn listing(
        &self,
        credential: &RedditCredential,
        strategy: &SamplingStrategy,
        after: Option<&str>,
    ) -> Result<ListingPage, GroundswellError> {
        let token = self.token_for(credential).await?;
        let url = self.listing_url(strategy, after);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(|e| GroundswellError::SourceApi(format!("listing request failed: {e}")))?;

        if response.status().as_u16() == 429 {
            return Err(GroundswellError::RateLimited);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            // The API sometimes signals quota exhaustion in a 200-shaped error
            // body; treat any explicit ratelimit message as such.
            if body.to_lowercase().contains("ratelimit") {
                return Err(GroundswellError::RateLimited);
            }
            return Err(GroundswellError::SourceApi(format!(
                "listing failed ({status}): {body}"
            )));
        }

        let listing: Listing = response
            .json()
            .await
            .map_err(|e| GroundswellError::SourceApi(format!("listing decode failed: {e}")))?;

        let cursor = listing.data.after.clone();
        let mut posts: Vec<RawPost> = listing
            .data
            .children
            .into_iter()
            .map(|t| t.data.into_raw())
            .collect();

        // Historical-window strategies bound created_at client-side; the
        // listing endpoint itself has no timestamp parameters.
        if strategy.before.is_some() || strategy.after_ts.is_some() {
            let before = strategy.before.unwrap_or(i64::MAX);
            let after_ts = strategy.after_ts.unwrap_or(0);
            posts.retain(|p| p.created_at >= after_ts && p.created_at < before);
        }

        if posts.is_empty() {
            warn!(
                sub_source = strategy.sub_source.as_str(),
                sort = strategy.sort.as_str(),
                "Listing returned no posts"
            );
        }

        Ok(ListingPage {
            posts,
            after: cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{SortMethod, TimeFilter};

    fn strategy() -> SamplingStrategy {
        SamplingStrategy {
            sub_source: "startups".into(),
            sort: SortMethod::Top,
            time_filter: Some(TimeFilter::Week),
            limit: 50,
            before: None,
            after_ts: None,
            offset: Some(100),
        }
    }

    #[test]
    fn listing_url_carries_all_parameters() {
        let client = RedditClient::new("groundswell/0.1");
        let url = client.listing_url(&strategy(), Some("t3_cursor"));
        assert!(url.starts_with("https://oauth.reddit.com/r/startups/top?"));
        assert!(url.contains("limit=50"));
        assert!(url.contains("t=week"));
        assert!(url.contains("count=100"));
        assert!(url.contains("after=t3_cursor"));
    }

    #[test]
    fn listing_limit_is_capped() {
        let client = RedditClient::new("groundswell/0.1");
        let mut s = strategy();
        s.limit = 500;
        let url = client.listing_url(&s, None);
        assert!(url.contains("limit=100"));
    }
}
