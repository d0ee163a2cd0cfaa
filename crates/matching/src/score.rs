use serde::{Deserialize, Serialize};

use crate::{MatchError, MatchType, SkillMatch, SkillMatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchCategory {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl MatchCategory {
    pub fn from_percentage(percentage: u8) -> Self {
        match percentage {
            80.. => Self::Excellent,
            60..=79 => Self::Good,
            40..=59 => Self::Fair,
            _ => Self::Poor,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
        }
    }
}

/// Job skills grouped by how they matched. Substring hits count as exact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDetailGroups {
    pub exact: Vec<String>,
    pub synonym: Vec<String>,
    pub fuzzy: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchScore {
    pub percentage: u8,
    pub matched: Vec<String>,
    pub unmatched: Vec<String>,
    pub category: MatchCategory,
    pub details: MatchDetailGroups,
}

impl From<SkillMatch> for MatchScore {
    fn from(result: SkillMatch) -> Self {
        let mut details = MatchDetailGroups::default();
        for detail in result.details {
            let bucket = match detail.match_type {
                MatchType::Exact | MatchType::Substring => &mut details.exact,
                MatchType::Synonym => &mut details.synonym,
                MatchType::Fuzzy => &mut details.fuzzy,
            };
            bucket.push(detail.job_skill);
        }

        Self {
            percentage: result.percentage,
            category: MatchCategory::from_percentage(result.percentage),
            matched: result.matched,
            unmatched: result.unmatched,
            details,
        }
    }
}

impl SkillMatcher {
    pub fn score(&self, cv_skills: &[String], job_skills: &[String]) -> MatchScore {
        self.calculate(cv_skills, job_skills).into()
    }
}

pub fn calculate_job_match_score(
    cv_skills: &[String],
    job_skills: &[String],
    fuzzy_threshold: f64,
) -> Result<MatchScore, MatchError> {
    Ok(SkillMatcher::new(fuzzy_threshold)?.score(cv_skills, job_skills))
}
