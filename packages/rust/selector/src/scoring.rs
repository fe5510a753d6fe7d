//! Candidate quality scoring.

use moltdigest_shared::{Candidate, ScoringConfig};

/// Pluggable quality heuristic. Higher scores are selected first.
pub trait ScoringPolicy: Send + Sync {
    fn score(&self, candidate: &Candidate) -> i64;
}

/// Topical keyword weights plus link and engagement bonuses.
#[derive(Debug, Clone)]
pub struct KeywordScorer {
    /// Lowercased keyword → weight.
    keywords: Vec<(String, i64)>,
    link_bonus: i64,
    engagement_weight: i64,
}

impl KeywordScorer {
    pub fn new(
        keywords: impl IntoIterator<Item = (String, i64)>,
        link_bonus: i64,
        engagement_weight: i64,
    ) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .map(|(k, w)| (k.to_lowercase(), w))
                .filter(|(k, _)| !k.is_empty())
                .collect(),
            link_bonus,
            engagement_weight,
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(
            config.keywords.iter().map(|(k, w)| (k.clone(), *w)),
            config.link_bonus,
            config.engagement_weight,
        )
    }

    fn keyword_score(&self, candidate: &Candidate) -> i64 {
        let text = [
            candidate.title.as_str(),
            candidate.raw_body.as_str(),
            candidate.external_url.as_deref().unwrap_or_default(),
            candidate.community.as_deref().unwrap_or_default(),
        ]
        .join(" ")
        .to_lowercase();

        self.keywords
            .iter()
            .filter(|(keyword, _)| text.contains(keyword.as_str()))
            .map(|(_, weight)| weight)
            .sum()
    }
}

impl ScoringPolicy for KeywordScorer {
    fn score(&self, candidate: &Candidate) -> i64 {
        let mut score = self.keyword_score(candidate);
        if candidate.external_url.is_some() {
            score += self.link_bonus;
        }
        // floor(log2(1 + engagement)); 0 engagement contributes nothing
        let engagement = candidate.engagement.saturating_add(1).ilog2() as i64;
        score + self.engagement_weight * engagement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use moltdigest_shared::CandidateId;

    fn candidate(title: &str, body: &str) -> Candidate {
        Candidate {
            id: CandidateId::new("id"),
            title: title.into(),
            post_url: "https://posts.example.com/p/1".into(),
            external_url: None,
            raw_body: body.into(),
            fetched_at: DateTime::parse_from_rfc3339("2026-10-17T08:00:00+08:00").unwrap(),
            community: None,
            engagement: 0,
            summary_points: vec![],
        }
    }

    fn scorer() -> KeywordScorer {
        KeywordScorer::new(
            [("Kubernetes".to_string(), 6), ("cron".to_string(), 3), ("自動化".to_string(), 5)],
            1,
            2,
        )
    }

    #[test]
    fn keywords_count_once_case_insensitive() {
        let c = candidate("KUBERNETES upgrade", "kubernetes kubernetes cron");
        assert_eq!(scorer().score(&c), 9);
    }

    #[test]
    fn cjk_keywords_match() {
        let c = candidate("排程與自動化", "");
        assert_eq!(scorer().score(&c), 5);
    }

    #[test]
    fn link_and_engagement_bonuses() {
        let mut c = candidate("nothing relevant", "");
        assert_eq!(scorer().score(&c), 0);

        c.external_url = Some("https://example.com".into());
        assert_eq!(scorer().score(&c), 1);

        // log2(1 + 7) = 3, weight 2
        c.engagement = 7;
        assert_eq!(scorer().score(&c), 7);
    }

    #[test]
    fn community_is_topical_signal() {
        let mut c = candidate("weekly thread", "");
        c.community = Some("cron-lovers".into());
        assert_eq!(scorer().score(&c), 3);
    }

    #[test]
    fn default_config_scores_agent_posts() {
        let scorer = KeywordScorer::from_config(&ScoringConfig::default());
        let c = candidate("Moltbot workflow on cron", "");
        assert!(scorer.score(&c) >= 10 + 4 + 3);
    }
}
