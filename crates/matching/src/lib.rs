//! Skill matching between a CV and a job posting.
//!
//! Everything here is pure and deterministic: the same inputs always give the
//! same [`SkillMatch`]. Skills are only ever compared in their normalized form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod score;
mod synonyms;

pub use score::{calculate_job_match_score, MatchCategory, MatchDetailGroups, MatchScore};
pub use synonyms::SynonymTable;

pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;
/// Shorter normalized skills never take part in fuzzy matching.
pub const FUZZY_MIN_LEN: usize = 4;

#[derive(Debug, Error, PartialEq)]
pub enum MatchError {
    #[error("fuzzy threshold must be within 0.0..=1.0, got {0}")]
    InvalidThreshold(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Substring,
    Synonym,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDetail {
    pub job_skill: String,
    pub cv_skill: String,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillMatch {
    pub matched: Vec<String>,
    pub unmatched: Vec<String>,
    pub percentage: u8,
    pub details: Vec<MatchDetail>,
}

/// Lowercases, trims, then drops `.`, `_`, `-` and all whitespace.
pub fn normalize_skill(skill: &str) -> String {
    skill
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '.' | '_' | '-') && !c.is_whitespace())
        .collect()
}

/// Classic dynamic-programming edit distance over chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j]
            } else {
                1 + prev[j].min(prev[j + 1]).min(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// `1 - distance / max_len`, with two empty strings counted as identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

pub fn percentage(matched: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((matched as f64 / total as f64) * 100.0).round() as u8
}

#[derive(Debug, Clone)]
pub struct SkillMatcher {
    threshold: f64,
    synonyms: SynonymTable,
}

impl Default for SkillMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_FUZZY_THRESHOLD,
            synonyms: SynonymTable::default(),
        }
    }
}

impl SkillMatcher {
    pub fn new(threshold: f64) -> Result<Self, MatchError> {
        Self::with_synonyms(threshold, SynonymTable::default())
    }

    pub fn with_synonyms(threshold: f64, synonyms: SynonymTable) -> Result<Self, MatchError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MatchError::InvalidThreshold(threshold));
        }
        Ok(Self {
            threshold,
            synonyms,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Tier that relates two skills, strongest first, if any.
    pub fn compare(&self, job_skill: &str, cv_skill: &str) -> Option<MatchType> {
        let job = normalize_skill(job_skill);
        let cv = normalize_skill(cv_skill);
        self.compare_normalized(&job, &cv)
    }

    fn compare_normalized(&self, job: &str, cv: &str) -> Option<MatchType> {
        [
            MatchType::Exact,
            MatchType::Substring,
            MatchType::Synonym,
            MatchType::Fuzzy,
        ]
        .into_iter()
        .find(|tier| self.matches_in_tier(*tier, job, cv))
    }

    fn matches_in_tier(&self, tier: MatchType, job: &str, cv: &str) -> bool {
        if job.is_empty() || cv.is_empty() {
            return false;
        }
        match tier {
            MatchType::Exact => job == cv,
            MatchType::Substring => job.contains(cv) || cv.contains(job),
            MatchType::Synonym => self.synonyms.are_synonyms(job, cv),
            MatchType::Fuzzy => {
                job.chars().count() >= FUZZY_MIN_LEN
                    && cv.chars().count() >= FUZZY_MIN_LEN
                    && similarity(job, cv) >= self.threshold
            }
        }
    }

    /// Matches every job skill against the CV.
    ///
    /// CV skills are walked in input order and the first one related to the
    /// job skill by any tier wins, reporting its strongest tier.
    pub fn calculate(&self, cv_skills: &[String], job_skills: &[String]) -> SkillMatch {
        let cv_normalized: Vec<(&String, String)> = cv_skills
            .iter()
            .map(|skill| (skill, normalize_skill(skill)))
            .collect();

        let mut result = SkillMatch::default();
        for job_skill in job_skills {
            let job = normalize_skill(job_skill);
            let hit = cv_normalized.iter().find_map(|(cv_skill, cv)| {
                self.compare_normalized(&job, cv)
                    .map(|tier| (tier, *cv_skill))
            });

            match hit {
                Some((match_type, cv_skill)) => {
                    result.matched.push(job_skill.clone());
                    result.details.push(MatchDetail {
                        job_skill: job_skill.clone(),
                        cv_skill: cv_skill.clone(),
                        match_type,
                    });
                }
                None => result.unmatched.push(job_skill.clone()),
            }
        }
        result.percentage = percentage(result.matched.len(), job_skills.len());
        result
    }
}

/// [`SkillMatcher::calculate`] with the default synonym table.
pub fn calculate_skill_match(
    cv_skills: &[String],
    job_skills: &[String],
    fuzzy_threshold: f64,
) -> Result<SkillMatch, MatchError> {
    Ok(SkillMatcher::new(fuzzy_threshold)?.calculate(cv_skills, job_skills))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skills(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalization_strips_separators_and_case() {
        assert_eq!(normalize_skill("  React.js "), "reactjs");
        assert_eq!(normalize_skill("CI_CD-Pipeline"), "cicdpipeline");
        assert_eq!(normalize_skill("Amazon Web\tServices"), "amazonwebservices");
        assert_eq!(normalize_skill("ci/cd"), "ci/cd");
    }

    #[test]
    fn levenshtein_reference_values() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("rust", "rust"), 0);
        assert_eq!(levenshtein("pythom", "python"), 1);
        assert!((similarity("pythom", "python") - (1.0 - 1.0 / 6.0)).abs() < 1e-9);
    }

    #[test]
    fn synonym_match_for_abbreviation() {
        let result = calculate_skill_match(&skills(&["js"]), &skills(&["JavaScript"]), 0.8)
            .expect("match");
        assert_eq!(result.matched, skills(&["JavaScript"]));
        assert_eq!(result.details[0].match_type, MatchType::Synonym);
        assert_eq!(result.details[0].cv_skill, "js");
    }

    #[test]
    fn fuzzy_match_for_typo() {
        let result =
            calculate_skill_match(&skills(&["Python"]), &skills(&["Pythom"]), 0.8).expect("match");
        assert_eq!(result.percentage, 100);
        assert_eq!(result.details[0].match_type, MatchType::Fuzzy);
    }

    #[test]
    fn fuzzy_requires_four_chars() {
        let matcher = SkillMatcher::default();
        // "sql" vs "sqk" is 0.67 similar and too short anyway.
        assert_eq!(matcher.compare("sql", "sqk"), None);
        let strict = SkillMatcher::new(0.6).expect("matcher");
        assert_eq!(strict.compare("abc", "abd"), None);
        assert_eq!(strict.compare("abcd", "abce"), Some(MatchType::Fuzzy));
    }

    #[test]
    fn dotted_names_match_after_normalization() {
        let result =
            calculate_skill_match(&skills(&["react"]), &skills(&["React.js"]), 0.8).expect("match");
        assert_eq!(result.percentage, 100);
        assert!(matches!(
            result.details[0].match_type,
            MatchType::Exact | MatchType::Substring
        ));
    }

    #[test]
    fn earliest_related_cv_skill_wins() {
        let result = SkillMatcher::default()
            .calculate(&skills(&["js", "javascript"]), &skills(&["JavaScript"]));
        assert_eq!(result.details[0].cv_skill, "js");
        assert_eq!(result.details[0].match_type, MatchType::Synonym);

        let result = SkillMatcher::default()
            .calculate(&skills(&["golang", "go"]), &skills(&["Go"]));
        assert_eq!(result.details[0].cv_skill, "golang");
        assert_eq!(result.details[0].match_type, MatchType::Substring);
    }

    #[test]
    fn empty_job_skills_score_zero() {
        let result = SkillMatcher::default().calculate(&skills(&["rust"]), &[]);
        assert_eq!(result.percentage, 0);
        assert!(result.matched.is_empty());
        assert!(result.unmatched.is_empty());
    }

    #[test]
    fn blank_skills_never_match() {
        let result = SkillMatcher::default().calculate(&skills(&["  ", "rust"]), &skills(&["-"]));
        assert_eq!(result.unmatched, skills(&["-"]));
    }

    #[test]
    fn typescript_docker_graphql_scenario() {
        let result = SkillMatcher::default().calculate(
            &skills(&["ts", "containerization", "REST"]),
            &skills(&["TypeScript", "Docker", "GraphQL"]),
        );
        assert_eq!(result.matched, skills(&["TypeScript", "Docker"]));
        assert_eq!(result.unmatched, skills(&["GraphQL"]));
        assert_eq!(result.percentage, 67);
        assert!(result
            .details
            .iter()
            .all(|detail| detail.match_type == MatchType::Synonym));
    }

    #[test]
    fn repeated_runs_are_identical() {
        let cv = skills(&["Rust", "Tokio", "PostgreSQL", "k8s"]);
        let job = skills(&["rust", "Kubernetes", "Postgres", "Kafka"]);
        let matcher = SkillMatcher::default();
        assert_eq!(matcher.calculate(&cv, &job), matcher.calculate(&cv, &job));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        assert_eq!(
            SkillMatcher::new(1.5).expect_err("invalid"),
            MatchError::InvalidThreshold(1.5)
        );
        assert!(SkillMatcher::new(f64::NAN).is_err());
    }
}
