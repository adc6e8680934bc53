//! Candidate selection
//!
//! The highest-scoring candidate wins. Ties on score are broken by title
//! similarity to the source, then by release type (album over single over
//! anything else), then by order of appearance.

use crate::config::SelectionConfig;
use crate::track::CandidateMatch;
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub candidate: CandidateMatch,
    /// Fuzzy similarity (0 - 100) between candidate and source title
    pub title_similarity: u8,
}

/// No candidate cleared the acceptance thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct NoConfidentMatch {
    /// Best candidate seen, if there was any
    pub best: Option<Selection>,
}

impl NoConfidentMatch {
    pub fn describe(&self) -> String {
        match &self.best {
            Some(s) => format!(
                "{} (score {:.2}, title similarity {})",
                s.candidate.metadata.display_name(),
                s.candidate.score,
                s.title_similarity
            ),
            None => "none".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Selector {
    min_score: f64,
    min_title_similarity: u8,
}

impl Selector {
    pub fn new(min_score: f64, min_title_similarity: u8) -> Self {
        Self {
            min_score,
            min_title_similarity,
        }
    }

    pub fn from_config(config: &SelectionConfig) -> Self {
        Self::new(config.min_score, config.min_title_similarity)
    }

    /// Pick the best candidate, accepting it when its score is at least
    /// `min_score` and its title similarity at least `min_title_similarity`
    pub fn select(
        &self,
        candidates: &[CandidateMatch],
        source_title: Option<&str>,
    ) -> Result<Selection, NoConfidentMatch> {
        let mut best: Option<Selection> = None;

        for candidate in candidates {
            let title_similarity = source_title
                .map(|title| token_set_ratio(&candidate.metadata.display_name(), title))
                .unwrap_or(0);
            let current = Selection {
                candidate: candidate.clone(),
                title_similarity,
            };

            let replace = match &best {
                None => true,
                Some(previous) => rank(&current, previous) == Ordering::Greater,
            };
            if replace {
                best = Some(current);
            }
        }

        match best {
            Some(selection)
                if selection.candidate.score >= self.min_score
                    && selection.title_similarity >= self.min_title_similarity =>
            {
                Ok(selection)
            }
            best => Err(NoConfidentMatch { best }),
        }
    }
}

fn rank(a: &Selection, b: &Selection) -> Ordering {
    let score = |s: &Selection| if s.candidate.score.is_nan() { f64::MIN } else { s.candidate.score };
    score(a)
        .partial_cmp(&score(b))
        .unwrap_or(Ordering::Equal)
        .then(a.title_similarity.cmp(&b.title_similarity))
        .then(a.candidate.release_type.cmp(&b.candidate.release_type))
}

fn tokens(s: &str) -> BTreeSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Order-insensitive similarity (0 - 100) that ignores tokens present in only
/// one string when the other's tokens are fully contained in it
pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    let a = tokens(a);
    let b = tokens(b);
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let join = |set: Vec<&String>| set.into_iter().map(String::as_str).collect::<Vec<_>>().join(" ");
    let common = join(a.intersection(&b).collect());
    let only_a = join(a.difference(&b).collect());
    let only_b = join(b.difference(&a).collect());

    let with_a = format!("{} {}", common, only_a).trim().to_string();
    let with_b = format!("{} {}", common, only_b).trim().to_string();

    let ratio = |x: &str, y: &str| strsim::normalized_levenshtein(x, y);
    let best = if common.is_empty() {
        ratio(&with_a, &with_b)
    } else {
        ratio(&common, &with_a)
            .max(ratio(&common, &with_b))
            .max(ratio(&with_a, &with_b))
    };

    (best * 100.0).round() as u8
}
