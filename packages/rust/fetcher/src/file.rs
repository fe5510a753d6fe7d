//! Candidate file source: reads the JSON written by `moltdigest fetch`.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, instrument};

use moltdigest_shared::{Candidate, DigestError, Result};

use crate::FeedSource;
use crate::record::{NormalizeOptions, merge_duplicates, parse_records};

/// Reads candidates from a local file.
///
/// Accepts a candidate file (`{"candidates": [...]}`), a raw API dump
/// (`{"posts": [...]}`), or a bare array of records.
pub struct FileFeedSource {
    path: PathBuf,
    normalize: NormalizeOptions,
}

impl FileFeedSource {
    pub fn new(path: impl Into<PathBuf>, normalize: NormalizeOptions) -> Self {
        Self {
            path: path.into(),
            normalize,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FeedSource for FileFeedSource {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn fetch(&self) -> Result<Vec<Candidate>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            DigestError::SourceUnavailable(format!("{}: {e}", self.path.display()))
        })?;

        let value: Value = serde_json::from_str(&content).map_err(|e| {
            DigestError::malformed(format!("{}: invalid JSON: {e}", self.path.display()))
        })?;

        let records = match &value {
            Value::Array(records) => records.as_slice(),
            Value::Object(map) => match map.get("candidates").or_else(|| map.get("posts")) {
                Some(Value::Array(records)) => records.as_slice(),
                _ => {
                    return Err(DigestError::malformed(format!(
                        "{}: expected a 'candidates' or 'posts' array",
                        self.path.display()
                    )));
                }
            },
            _ => {
                return Err(DigestError::malformed(format!(
                    "{}: expected a JSON array or object",
                    self.path.display()
                )));
            }
        };

        let candidates = merge_duplicates(parse_records(records, &self.normalize)?);
        info!(count = candidates.len(), "loaded candidates from file");
        Ok(candidates)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset, Utc};
    use moltdigest_shared::{CANDIDATE_FILE_VERSION, CandidateFile, CandidateId, FetchCounts};

    fn temp_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("md-fetcher-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn opts() -> NormalizeOptions {
        NormalizeOptions {
            offset: FixedOffset::east_opt(8 * 3600).unwrap(),
            permalink_template: None,
        }
    }

    #[tokio::test]
    async fn reads_back_a_candidate_file() {
        let path = temp_file("candidates.json");
        let file = CandidateFile {
            schema_version: CANDIDATE_FILE_VERSION,
            generated_at: Utc::now(),
            source: "test".into(),
            counts: FetchCounts { fetched: 1, unique: 1 },
            candidates: vec![Candidate {
                id: CandidateId::new("c-1"),
                title: "Storage healing notes".into(),
                post_url: "https://posts.example.com/p/c-1".into(),
                external_url: Some("https://min.io/docs".into()),
                raw_body: "Erasure sets heal in the background.".into(),
                fetched_at: DateTime::parse_from_rfc3339("2026-10-17T09:00:00+08:00").unwrap(),
                community: Some("storage".into()),
                engagement: 7,
                summary_points: vec!["one".into(), "two".into()],
            }],
        };
        std::fs::write(&path, serde_json::to_string_pretty(&file).unwrap()).unwrap();

        let source = FileFeedSource::new(&path, opts());
        let candidates = source.fetch().await.expect("fetch");
        assert_eq!(candidates, file.candidates);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn accepts_bare_array() {
        let path = temp_file("bare.json");
        std::fs::write(
            &path,
            r#"[{"id":"x","title":"t","body":"b","post_url":"https://posts.example.com/p/x","fetched_at":"2026-10-17T00:00:00Z"}]"#,
        )
        .unwrap();

        let candidates = FileFeedSource::new(&path, opts()).fetch().await.unwrap();
        assert_eq!(candidates.len(), 1);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn missing_file_is_source_unavailable() {
        let path = temp_file("does-not-exist.json");
        let err = FileFeedSource::new(&path, opts()).fetch().await.unwrap_err();
        assert!(matches!(err, DigestError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn wrong_shape_is_malformed() {
        let path = temp_file("shape.json");
        std::fs::write(&path, r#"{"items": []}"#).unwrap();
        let err = FileFeedSource::new(&path, opts()).fetch().await.unwrap_err();
        assert!(matches!(err, DigestError::MalformedResponse { .. }));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
