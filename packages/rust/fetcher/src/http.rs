//! Paginated JSON posts API source.

use std::time::Duration;

use chrono::FixedOffset;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use moltdigest_shared::{Candidate, DigestError, FeedSpec, FetchCounts, Result, SourceConfig};

use crate::FeedSource;
use crate::record::{NormalizeOptions, merge_duplicates, parse_records};

/// User-Agent string for source requests.
const USER_AGENT: &str = concat!("moltdigest/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 3;

/// One page of the posts listing.
#[derive(Debug, Deserialize)]
struct PostsPage {
    #[serde(default)]
    posts: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    next_offset: Option<u64>,
}

/// Candidates plus what it took to get them.
#[derive(Debug, Clone)]
pub struct FetchBatch {
    pub candidates: Vec<Candidate>,
    pub counts: FetchCounts,
}

/// Fetches candidates from the posts API, one configured listing after another.
pub struct HttpFeedSource {
    client: Client,
    base_url: String,
    api_key: String,
    feeds: Vec<FeedSpec>,
    page_size: u32,
    normalize: NormalizeOptions,
}

impl HttpFeedSource {
    /// Build a source from config. The key comes from the environment, never from config.
    pub fn new(config: &SourceConfig, api_key: String, offset: FixedOffset) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DigestError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            feeds: config.feeds.clone(),
            page_size: config.page_size.max(1),
            normalize: NormalizeOptions {
                offset,
                permalink_template: Some(config.permalink_template.clone()),
            },
        })
    }

    /// Fetch every configured listing and merge repeated posts.
    #[instrument(skip_all, fields(base_url = %self.base_url))]
    pub async fn fetch_batch(&self) -> Result<FetchBatch> {
        let mut records = Vec::new();
        for feed in &self.feeds {
            let listing = self.fetch_listing(feed).await?;
            info!(sort = %feed.sort, count = listing.len(), "fetched listing");
            records.extend(listing);
        }

        let fetched = records.len();
        let candidates = merge_duplicates(parse_records(&records, &self.normalize)?);
        let counts = FetchCounts {
            fetched,
            unique: candidates.len(),
        };

        info!(fetched, unique = counts.unique, "fetch complete");
        Ok(FetchBatch { candidates, counts })
    }

    /// Page through one listing until `want` records, the end, or a stuck offset.
    async fn fetch_listing(&self, feed: &FeedSpec) -> Result<Vec<Value>> {
        let want = feed.want as usize;
        let mut posts: Vec<Value> = Vec::new();
        let mut offset: u64 = 0;

        while posts.len() < want {
            let limit = (want - posts.len()).min(self.page_size as usize);
            let page = self.fetch_page(&feed.sort, limit, offset).await?;
            let got = page.posts.len();
            posts.extend(page.posts);

            debug!(sort = %feed.sort, offset, got, has_more = page.has_more, "fetched page");

            if !page.has_more || got == 0 {
                break;
            }
            match page.next_offset {
                Some(next) if next != offset => offset = next,
                _ => break,
            }
        }

        posts.truncate(want);
        Ok(posts)
    }

    async fn fetch_page(&self, sort: &str, limit: usize, offset: u64) -> Result<PostsPage> {
        let url = format!("{}/posts", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[
                ("sort", sort.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await
            .map_err(|e| DigestError::SourceUnavailable(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::SourceUnavailable(format!(
                "{url}: HTTP {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DigestError::SourceUnavailable(format!("{url}: failed to read body: {e}")))?;

        serde_json::from_str(&body)
            .map_err(|e| DigestError::malformed(format!("{url}: invalid posts page: {e}")))
    }
}

impl FeedSource for HttpFeedSource {
    async fn fetch(&self) -> Result<Vec<Candidate>> {
        Ok(self.fetch_batch().await?.candidates)
    }

    fn describe(&self) -> String {
        let feeds: Vec<String> = self
            .feeds
            .iter()
            .map(|f| format!("{}×{}", f.sort, f.want))
            .collect();
        format!("{} ({})", self.base_url, feeds.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source_config(base_url: &str, feeds: Vec<FeedSpec>) -> SourceConfig {
        SourceConfig {
            base_url: base_url.into(),
            page_size: 2,
            timeout_secs: 5,
            feeds,
            ..SourceConfig::default()
        }
    }

    fn post(id: &str) -> Value {
        json!({
            "id": id,
            "title": format!("Post {id}"),
            "content": "Agents that run on cron.",
            "created_at": "2026-10-17T01:00:00Z"
        })
    }

    fn taipei() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[tokio::test]
    async fn follows_pagination_and_merges_listings() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/posts"))
            .and(query_param("sort", "hot"))
            .and(query_param("offset", "0"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "posts": [post("a"), post("b")],
                "has_more": true,
                "next_offset": 2
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/posts"))
            .and(query_param("sort", "hot"))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "posts": [post("c")],
                "has_more": false
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/posts"))
            .and(query_param("sort", "new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "posts": [post("c"), post("d")],
                "has_more": false
            })))
            .mount(&server)
            .await;

        let config = source_config(
            &server.uri(),
            vec![
                FeedSpec { sort: "hot".into(), want: 10 },
                FeedSpec { sort: "new".into(), want: 10 },
            ],
        );
        let source = HttpFeedSource::new(&config, "test-key".into(), taipei()).unwrap();
        let batch = source.fetch_batch().await.expect("fetch");

        assert_eq!(batch.counts.fetched, 5);
        assert_eq!(batch.counts.unique, 4);
        let ids: Vec<&str> = batch.candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(
            batch.candidates[0].post_url,
            "https://www.moltbook.com/post/a"
        );
    }

    #[tokio::test]
    async fn stops_when_offset_does_not_advance() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "posts": [post("a")],
                "has_more": true,
                "next_offset": 0
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = source_config(&server.uri(), vec![FeedSpec { sort: "new".into(), want: 50 }]);
        let source = HttpFeedSource::new(&config, "k".into(), taipei()).unwrap();
        let candidates = source.fetch().await.expect("fetch");
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn server_error_is_source_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = source_config(&server.uri(), vec![FeedSpec { sort: "hot".into(), want: 5 }]);
        let source = HttpFeedSource::new(&config, "k".into(), taipei()).unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, DigestError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_host_is_source_unavailable() {
        let config = source_config(
            "http://127.0.0.1:9",
            vec![FeedSpec { sort: "hot".into(), want: 5 }],
        );
        let source = HttpFeedSource::new(&config, "k".into(), taipei()).unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, DigestError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let config = source_config(&server.uri(), vec![FeedSpec { sort: "hot".into(), want: 5 }]);
        let source = HttpFeedSource::new(&config, "k".into(), taipei()).unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, DigestError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn record_without_title_is_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "posts": [{ "id": "a", "content": "x", "created_at": "2026-10-17T01:00:00Z" }],
                "has_more": false
            })))
            .mount(&server)
            .await;

        let config = source_config(&server.uri(), vec![FeedSpec { sort: "hot".into(), want: 5 }]);
        let source = HttpFeedSource::new(&config, "k".into(), taipei()).unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(err.to_string().contains("'title'"));
    }
}
