use crate::normalize_skill;

const DEFAULT_GROUPS: &[(&str, &[&str])] = &[
    (
        "javascript",
        &["js", "ecmascript", "es6", "es2015", "node", "nodejs", "node.js"],
    ),
    ("typescript", &["ts"]),
    ("python", &["py"]),
    ("react.js", &["react", "reactjs"]),
    ("vue.js", &["vue", "vuejs"]),
    ("angular", &["angularjs", "angular.js"]),
    ("node.js", &["node", "nodejs", "javascript"]),
    ("postgresql", &["postgres", "psql"]),
    ("mongodb", &["mongo"]),
    ("kubernetes", &["k8s"]),
    ("docker", &["containerization"]),
    ("aws", &["amazon web services"]),
    ("gcp", &["google cloud platform", "google cloud"]),
    ("azure", &["microsoft azure"]),
    ("ci", &["continuous integration"]),
    ("cd", &["continuous deployment", "continuous delivery"]),
    (
        "ci/cd",
        &["cicd", "continuous integration", "continuous deployment"],
    ),
    ("frontend", &["front-end", "front end", "fe"]),
    ("backend", &["back-end", "back end", "be"]),
    ("fullstack", &["full-stack", "full stack"]),
    ("api", &["rest", "restful", "rest api"]),
    ("sql", &["structured query language"]),
    ("nosql", &["no-sql"]),
    ("ml", &["machine learning"]),
    ("ai", &["artificial intelligence"]),
    ("oop", &["object-oriented programming", "object oriented"]),
    ("fp", &["functional programming"]),
    ("tdd", &["test-driven development", "test driven development"]),
    ("git", &["version control", "source control"]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct SynonymGroup {
    canonical: String,
    members: Vec<String>,
}

impl SynonymGroup {
    fn contains(&self, normalized: &str) -> bool {
        self.canonical == normalized || self.members.iter().any(|m| m == normalized)
    }
}

/// Canonical skill terms and their alternate spellings, stored normalized.
///
/// Two skills are synonyms when one table entry lists both. Membership is
/// never chained across entries: `node` sits in both the `javascript` and
/// `node.js` entries, which does not make those entries' other members
/// equivalent to each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynonymTable {
    groups: Vec<SynonymGroup>,
}

impl SynonymTable {
    pub fn new<I, C, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (C, Vec<S>)>,
        C: AsRef<str>,
        S: AsRef<str>,
    {
        let groups = entries
            .into_iter()
            .map(|(canonical, synonyms)| SynonymGroup {
                canonical: normalize_skill(canonical.as_ref()),
                members: synonyms
                    .iter()
                    .map(|s| normalize_skill(s.as_ref()))
                    .collect(),
            })
            .collect();
        Self { groups }
    }

    pub fn empty() -> Self {
        Self { groups: Vec::new() }
    }

    /// True when some entry holds both already-normalized skills.
    pub fn are_synonyms(&self, a: &str, b: &str) -> bool {
        self.groups
            .iter()
            .any(|group| group.contains(a) && group.contains(b))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl Default for SynonymTable {
    fn default() -> Self {
        Self::new(
            DEFAULT_GROUPS
                .iter()
                .map(|(canonical, synonyms)| (*canonical, synonyms.to_vec())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_entries_are_normalized() {
        let table = SynonymTable::default();
        assert_eq!(table.len(), DEFAULT_GROUPS.len());
        assert!(table.are_synonyms("javascript", "js"));
        assert!(table.are_synonyms("js", "nodejs"));
        assert!(table.are_synonyms("ci/cd", "cicd"));
        assert!(table.are_synonyms("api", "restapi"));
        assert!(table.are_synonyms("frontend", "frontend"));
    }

    #[test]
    fn membership_does_not_chain_across_entries() {
        let table = SynonymTable::new(vec![("alpha", vec!["shared"]), ("beta", vec!["shared"])]);
        assert!(table.are_synonyms("alpha", "shared"));
        assert!(table.are_synonyms("beta", "shared"));
        assert!(!table.are_synonyms("alpha", "beta"));
    }

    #[test]
    fn empty_table_matches_nothing() {
        let table = SynonymTable::empty();
        assert!(table.is_empty());
        assert!(!table.are_synonyms("js", "javascript"));
    }
}
