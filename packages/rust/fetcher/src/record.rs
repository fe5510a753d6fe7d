//! Feed record schema and normalization.
//!
//! The source returns loosely shaped JSON. Every record is checked against an
//! explicit schema here; a record missing a required field fails the whole
//! fetch with `MalformedResponse` instead of producing a partial candidate.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use moltdigest_shared::{Candidate, CandidateId, DigestError, Result};

/// Title used when the source sends an explicit `null` title.
const UNTITLED: &str = "(untitled)";

/// How raw records become candidates.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Publication timezone every timestamp is converted to.
    pub offset: FixedOffset,
    /// Permalink for records without `post_url`; `{id}` is replaced.
    pub permalink_template: Option<String>,
}

/// Sub-forum object as nested by the posts API.
#[derive(Debug, Deserialize)]
struct Community {
    name: Option<String>,
}

/// Wire shape of one record. Every field is optional here; [`into_candidate`]
/// decides what is required.
#[derive(Debug, Deserialize)]
struct RawRecord {
    id: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    title: Option<Option<String>>,
    post_url: Option<String>,
    #[serde(alias = "url")]
    external_url: Option<String>,
    #[serde(default, alias = "content", deserialize_with = "present")]
    body: Option<Option<String>>,
    #[serde(alias = "created_at")]
    fetched_at: Option<String>,
    community: Option<String>,
    submolt: Option<Community>,
    upvotes: Option<i64>,
    comment_count: Option<i64>,
    engagement: Option<u64>,
    #[serde(default)]
    summary_points: Vec<String>,
}

/// Distinguish a field that is absent (`None`) from one that is `null` (`Some(None)`).
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Validate and normalize a batch of raw records, in order.
pub fn parse_records(records: &[Value], opts: &NormalizeOptions) -> Result<Vec<Candidate>> {
    records
        .iter()
        .enumerate()
        .map(|(index, value)| {
            let raw: RawRecord = serde_json::from_value(value.clone()).map_err(|e| {
                DigestError::malformed(format!("record {index}: unexpected shape: {e}"))
            })?;
            into_candidate(raw, opts)
                .map_err(|field| DigestError::malformed(format!("record {index}: {field}")))
        })
        .collect()
}

/// Drop repeated ids, keeping the first occurrence.
pub fn merge_duplicates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let before = candidates.len();
    let merged: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| seen.insert(c.id.clone()))
        .collect();
    if merged.len() < before {
        debug!(duplicates = before - merged.len(), "merged repeated post ids");
    }
    merged
}

fn into_candidate(raw: RawRecord, opts: &NormalizeOptions) -> std::result::Result<Candidate, String> {
    let id = match raw.id {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => return Err("field 'id' must be a non-empty string or number".into()),
        None => return Err("missing required field 'id'".into()),
    };

    let title = match raw.title {
        Some(Some(t)) => collapse_whitespace(&t),
        Some(None) => UNTITLED.to_string(),
        None => return Err("missing required field 'title'".into()),
    };
    let title = if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title
    };

    let raw_body = match raw.body {
        Some(body) => normalize_body(body.as_deref().unwrap_or_default()),
        None => return Err("missing required field 'body'".into()),
    };

    let fetched_at = match raw.fetched_at {
        Some(ts) => DateTime::parse_from_rfc3339(ts.trim())
            .map_err(|e| format!("field 'fetched_at' is not RFC 3339 ('{ts}'): {e}"))?
            .with_timezone(&opts.offset),
        None => return Err("missing required field 'fetched_at'".into()),
    };

    let post_url = match (raw.post_url, opts.permalink_template.as_deref()) {
        (Some(url), _) if !url.trim().is_empty() => url.trim().to_string(),
        (_, Some(template)) => template.replace("{id}", &id),
        _ => return Err("missing required field 'post_url'".into()),
    };
    if !is_web_url(&post_url) {
        return Err(format!("field 'post_url' is not an http(s) URL ('{post_url}')"));
    }

    let external_url = raw
        .external_url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .and_then(|u| {
            if is_web_url(&u) {
                Some(u)
            } else {
                warn!(url = %u, "ignoring non-http external link");
                None
            }
        });

    let community = raw
        .community
        .or(raw.submolt.and_then(|s| s.name))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let engagement = raw.engagement.unwrap_or_else(|| {
        let upvotes = raw.upvotes.unwrap_or(0).max(0) as u64;
        let comments = raw.comment_count.unwrap_or(0).max(0) as u64;
        upvotes + comments
    });

    let summary_points = raw
        .summary_points
        .iter()
        .map(|p| collapse_whitespace(p))
        .filter(|p| !p.is_empty())
        .collect();

    Ok(Candidate {
        id: CandidateId::new(id),
        title,
        post_url,
        external_url,
        raw_body,
        fetched_at,
        community,
        engagement,
        summary_points,
    })
}

fn is_web_url(s: &str) -> bool {
    Url::parse(s)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_body(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}
