//! Digest rendering: candidate → [`DigestEntry`] → markdown.
//!
//! Every entry follows the same fixed structure: title, link line, optional
//! external-link line, numbered summary points, idea bullets and a single
//! self-contained task block. Candidate ids are never written to the output
//! on their own; a post URL built from the permalink template carries the
//! public post id inside the link, and nowhere else.

mod ideas;
mod summarize;

use std::fmt::Write as _;

use tracing::{debug, instrument};

use moltdigest_shared::{Candidate, Digest, DigestConfig, DigestEntry, Result};

pub use ideas::{MAX_IDEAS, suggest_ideas};
pub use summarize::{ExtractiveSummarizer, Summarizer};

use summarize::single_line;

const UNTITLED: &str = "(untitled)";

// ---------------------------------------------------------------------------
// Task block
// ---------------------------------------------------------------------------

/// Copyable zh-Hant instruction for one post. Embeds `post_url` verbatim and
/// references nothing outside this entry.
pub fn task_block(post_url: &str, external_url: Option<&str>) -> String {
    let mut block = String::from(
        "請閱讀下面這篇貼文，並用繁體中文輸出：\n\
         1) 6–10 點中文重點摘要（偏研究、可執行）\n\
         2) 3 個可以落地到現有工作流的自動化 idea（最好能接排程與 git）\n\
         3) 挑其中 1 個 idea，給出具體步驟、檔案與排程設定草案\n\
         \n",
    );
    let _ = writeln!(block, "貼文連結 Post：{post_url}");
    if let Some(external) = external_url {
        let _ = writeln!(block, "外部連結 External：{external}");
    }
    block
}

/// A code fence longer than any backtick run in `content`.
fn fence_for(content: &str) -> String {
    let longest = content
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat(longest.max(2) + 1)
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Builds entries and assembles the digest document.
pub struct Renderer {
    summarizer: Box<dyn Summarizer>,
    config: DigestConfig,
}

impl Renderer {
    pub fn new(summarizer: Box<dyn Summarizer>, config: DigestConfig) -> Self {
        Self { summarizer, config }
    }

    /// Renderer with the extractive summarizer.
    pub fn extractive(config: DigestConfig) -> Self {
        Self::new(Box::new(ExtractiveSummarizer::default()), config)
    }

    /// Render one candidate.
    ///
    /// Fails with `TemplateViolation` when the summary has the wrong number of
    /// points or the task block lost the post URL. Callers drop the entry.
    #[instrument(skip_all, fields(post_url = %candidate.post_url))]
    pub fn render(&self, candidate: &Candidate) -> Result<DigestEntry> {
        let title = match single_line(&candidate.title) {
            t if t.is_empty() => UNTITLED.to_string(),
            t => t,
        };
        let summary_points: Vec<String> = self
            .summarizer
            .summarize(candidate)
            .iter()
            .map(|p| single_line(p))
            .filter(|p| !p.is_empty())
            .collect();

        let topic_text = [
            candidate.title.as_str(),
            candidate.raw_body.as_str(),
            candidate.external_url.as_deref().unwrap_or_default(),
            candidate.community.as_deref().unwrap_or_default(),
        ]
        .join(" ");

        let entry = DigestEntry {
            title,
            post_url: candidate.post_url.clone(),
            external_url: candidate.external_url.clone(),
            summary_points,
            ideas: suggest_ideas(&topic_text),
            task_block: task_block(&candidate.post_url, candidate.external_url.as_deref()),
            source_id: candidate.id.clone(),
        };
        entry.validate()?;
        debug!(points = entry.summary_points.len(), "rendered entry");
        Ok(entry)
    }

    /// Assemble the full markdown document. Entry order is preserved.
    pub fn render_digest(&self, digest: &Digest) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {}（{}）", self.config.title, digest.date_key);
        out.push('\n');
        if !self.config.preface.trim().is_empty() {
            let _ = writeln!(out, "{}", self.config.preface.trim());
            out.push('\n');
        }

        for (i, entry) in digest.entries.iter().enumerate() {
            render_entry(&mut out, i + 1, entry);
        }
        out
    }
}

fn render_entry(out: &mut String, number: usize, entry: &DigestEntry) {
    let _ = writeln!(out, "## {number}. {}", entry.title);
    out.push('\n');
    let _ = writeln!(out, "- 連結 Link：{}", entry.post_url);
    if let Some(external) = &entry.external_url {
        let _ = writeln!(out, "- 外部連結 External：{external}");
    }
    out.push('\n');

    out.push_str("### 重點摘要 Summary\n\n");
    for (i, point) in entry.summary_points.iter().enumerate() {
        let _ = writeln!(out, "{}. {point}", i + 1);
    }
    out.push('\n');

    if !entry.ideas.is_empty() {
        out.push_str("### 可落地的點子 Ideas\n\n");
        for idea in &entry.ideas {
            let _ = writeln!(out, "- {idea}");
        }
        out.push('\n');
    }

    out.push_str("### 可複製的任務 Task\n\n");
    let fence = fence_for(&entry.task_block);
    let _ = writeln!(out, "{fence}");
    out.push_str(&entry.task_block);
    if !entry.task_block.ends_with('\n') {
        out.push('\n');
    }
    let _ = writeln!(out, "{fence}");
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use moltdigest_shared::{CandidateId, DateKey, DigestError};

    struct FixedPoints(usize);

    impl Summarizer for FixedPoints {
        fn summarize(&self, _: &Candidate) -> Vec<String> {
            (1..=self.0).map(|i| format!("Statement number {i}")).collect()
        }
    }

    fn candidate(id: &str) -> Candidate {
        Candidate {
            id: CandidateId::new(id),
            title: "Cron-driven\nagents".into(),
            post_url: format!("https://posts.example.com/p/{id}"),
            external_url: Some("https://blog.example.com/agents".into()),
            raw_body: "We run agents on cron.".into(),
            fetched_at: DateTime::parse_from_rfc3339("2026-10-17T08:00:00+08:00").unwrap(),
            community: Some("automation".into()),
            engagement: 3,
            summary_points: vec![],
        }
    }

    fn renderer(points: usize) -> Renderer {
        Renderer::new(Box::new(FixedPoints(points)), DigestConfig::default())
    }

    #[test]
    fn renders_valid_entry() {
        let entry = renderer(7).render(&candidate("a1")).unwrap();
        assert_eq!(entry.title, "Cron-driven agents");
        assert_eq!(entry.summary_points.len(), 7);
        assert!(entry.task_block.contains("https://posts.example.com/p/a1"));
        assert!(entry.task_block.contains("https://blog.example.com/agents"));
        assert!(!entry.ideas.is_empty() && entry.ideas.len() <= MAX_IDEAS);
        assert_eq!(entry.source_id.as_str(), "a1");
    }

    #[test]
    fn too_few_points_is_template_violation() {
        let err = renderer(4).render(&candidate("a1")).unwrap_err();
        assert!(matches!(err, DigestError::TemplateViolation { .. }));
        assert!(renderer(11).render(&candidate("a1")).is_err());
    }

    #[test]
    fn digest_keeps_order_and_structure() {
        let r = renderer(6);
        let digest = Digest {
            date_key: "2026-10-17".parse::<DateKey>().unwrap(),
            entries: vec![
                r.render(&candidate("first")).unwrap(),
                r.render(&candidate("second")).unwrap(),
            ],
        };
        let md = r.render_digest(&digest);

        assert!(md.starts_with(&format!("# {}（2026-10-17）\n", DigestConfig::default().title)));
        let first = md.find("p/first").unwrap();
        let second = md.find("p/second").unwrap();
        assert!(first < second);
        assert!(md.contains("## 1. Cron-driven agents"));
        assert!(md.contains("## 2. Cron-driven agents"));
        assert!(md.contains("6. Statement number 6"));
        assert_eq!(md.matches("```\n").count(), 4);
    }

    #[test]
    fn output_never_contains_raw_ids() {
        let r = renderer(6);
        let mut c = candidate("zz-internal-9f3");
        c.post_url = "https://posts.example.com/p/public-slug".into();
        let digest = Digest {
            date_key: "2026-10-17".parse().unwrap(),
            entries: vec![r.render(&c).unwrap()],
        };
        assert!(!r.render_digest(&digest).contains("zz-internal-9f3"));
    }

    #[test]
    fn permalink_ids_appear_only_inside_the_post_link() {
        // The default permalink template embeds the public post id in the URL.
        let r = renderer(6);
        let c = candidate("post-7f2c");
        let digest = Digest {
            date_key: "2026-10-17".parse().unwrap(),
            entries: vec![r.render(&c).unwrap()],
        };
        let md = r.render_digest(&digest);

        let in_links = md.matches(c.post_url.as_str()).count();
        assert_eq!(in_links, 2);
        assert_eq!(md.matches("post-7f2c").count(), in_links);
    }

    #[test]
    fn fence_outgrows_backtick_runs() {
        assert_eq!(fence_for("plain"), "```");
        assert_eq!(fence_for("has ``` inside"), "````");
        assert_eq!(fence_for("a ````` b"), "``````");

        let r = renderer(6);
        let mut c = candidate("b1");
        c.external_url = Some("https://example.com/```weird".into());
        let digest = Digest {
            date_key: "2026-10-17".parse().unwrap(),
            entries: vec![r.render(&c).unwrap()],
        };
        let md = r.render_digest(&digest);
        assert!(md.contains("\n````\n"));
    }

    #[test]
    fn empty_preface_is_skipped() {
        let config = DigestConfig {
            preface: "  ".into(),
            ..DigestConfig::default()
        };
        let r = Renderer::new(Box::new(FixedPoints(6)), config);
        let digest = Digest {
            date_key: "2026-10-17".parse().unwrap(),
            entries: vec![],
        };
        let md = r.render_digest(&digest);
        assert_eq!(md.lines().count(), 2);
    }
}
