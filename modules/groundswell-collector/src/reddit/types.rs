use serde::Deserialize;

use groundswell_common::RawPost;

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    /// Seconds until expiry.
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListingData {
    pub children: Vec<Thing>,
    pub after: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Thing {
    pub data: ListedPost,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListedPost {
    /// Fullname, e.g. `t3_abc123`; globally unique within the source.
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub permalink: String,
    pub subreddit: String,
    pub created_utc: f64,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub num_comments: i64,
}

impl ListedPost {
    pub fn into_raw(self) -> RawPost {
        let metadata = serde_json::json!({
            "over_18": self.over_18,
            "num_comments": self.num_comments,
        });
        RawPost {
            id: self.name,
            source: "reddit".to_string(),
            title: self.title,
            body: self.selftext,
            author: self.author,
            score: self.score,
            url: format!("https://www.reddit.com{}", self.permalink),
            sub_source: self.subreddit,
            created_at: self.created_utc as i64,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_deserializes_and_converts() {
        let json = r#"{
            "data": {
                "children": [
                    {"data": {
                        "name": "t3_abc",
                        "title": "My faucet leaks",
                        "selftext": "help",
                        "author": "bob",
                        "score": 12,
                        "permalink": "/r/plumbing/comments/abc/",
                        "subreddit": "plumbing",
                        "created_utc": 1700000000.0
                    }}
                ],
                "after": "t3_abc"
            }
        }"#;

        let listing: Listing = serde_json::from_str(json).unwrap();
        assert_eq!(listing.data.after.as_deref(), Some("t3_abc"));

        let raw = listing.data.children.into_iter().next().unwrap().data.into_raw();
        assert_eq!(raw.id, "t3_abc");
        assert_eq!(raw.sub_source, "plumbing");
        assert_eq!(raw.created_at, 1_700_000_000);
        assert!(raw.url.contains("/r/plumbing/"));
    }
}
