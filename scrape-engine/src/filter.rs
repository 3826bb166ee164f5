use gleaner_core::config::CommentSection;
use gleaner_core::{Comment, ConfigError};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

/// Post-processing applied to every strategy's candidates before the
/// pipeline decides whether the strategy produced anything.
pub trait CandidateFilter<T>: Send + Sync {
    fn apply(&self, candidates: Vec<T>) -> Vec<T>;
}

/// UI text that lands in comment lists but was never written by a person.
const DEFAULT_BOILERPLATE: [&str; 8] = [
    r"original audio",
    r"^see translation$",
    r"^(view|hide) (all )?(\d+ )?(more )?repl(y|ies)",
    r"^reply$",
    r"^liked by\b",
    r"^verified$",
    r"^see more$",
    r"^\d+\s*(likes?|replies)$",
];

#[derive(Debug, Clone)]
pub struct CommentFilter {
    min_length: usize,
    boilerplate: Vec<Regex>,
}

impl CommentFilter {
    pub const DEFAULT_MIN_LENGTH: usize = 2;

    pub fn new() -> Self {
        let boilerplate = DEFAULT_BOILERPLATE
            .iter()
            .filter_map(|pattern| compile(pattern).ok())
            .collect();

        Self {
            min_length: Self::DEFAULT_MIN_LENGTH,
            boilerplate,
        }
    }

    pub fn from_section(section: &CommentSection) -> Result<Self, ConfigError> {
        Self::new()
            .with_min_length(section.min_length)
            .with_patterns(&section.extra_boilerplate_patterns)
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    /// Adds case-insensitive patterns on top of the defaults.
    pub fn with_patterns(mut self, patterns: &[String]) -> Result<Self, ConfigError> {
        for pattern in patterns {
            let regex = compile(pattern).map_err(|_| ConfigError::InvalidValue {
                field: "comments.extra_boilerplate_patterns".to_string(),
                value: pattern.clone(),
            })?;
            self.boilerplate.push(regex);
        }
        Ok(self)
    }

    pub fn is_meaningful(&self, comment: &Comment) -> bool {
        let text = comment.text.trim();
        if text.is_empty() || text.chars().count() < self.min_length {
            return false;
        }
        !self.boilerplate.iter().any(|regex| regex.is_match(text))
    }
}

impl Default for CommentFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateFilter<Comment> for CommentFilter {
    fn apply(&self, candidates: Vec<Comment>) -> Vec<Comment> {
        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .filter(|comment| self.is_meaningful(comment))
            .map(|mut comment| {
                comment.text = comment.text.trim().to_string();
                comment
            })
            .filter(|comment| seen.insert((comment.author.clone(), comment.text.clone())))
            .collect()
    }
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}
