use regex::{Regex, RegexBuilder};

use crate::utils::Result;

/// True when `pattern` matches `text` starting at its first character.
///
/// Patterns built here are anchored with `^`, so a miss at position 0 ends
/// the search there instead of scanning the rest of the name.
pub fn matches_at_start(pattern: &Regex, text: &str) -> bool {
    pattern.find(text).is_some_and(|m| m.start() == 0)
}

fn anchored(pattern: &str, case_insensitive: bool) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(&format!("^(?:{})", pattern))
        .case_insensitive(case_insensitive)
        .build()
}

/// Compile a user supplied search expression (case-insensitive).
pub fn compile_search(pattern: &str) -> Result<Regex> {
    Ok(anchored(pattern, true)?)
}

/// An ordered list of precompiled name patterns; the first match wins.
#[derive(Clone, Debug)]
pub struct PatternList {
    patterns: Vec<Regex>,
}

impl PatternList {
    pub fn new<S: AsRef<str>>(patterns: &[S], case_insensitive: bool) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| anchored(p.as_ref(), case_insensitive))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn matches_any(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| matches_at_start(p, name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Regex> {
        self.patterns.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_patterns_anchor_at_start() {
        let hidden = PatternList::new(&[r"\..*", r"Thumbs\.db"], false).unwrap();
        assert!(hidden.matches_any(".invisible"));
        assert!(hidden.matches_any("Thumbs.db"));
        assert!(!hidden.matches_any("my.Thumbs.db"));
        assert!(!hidden.matches_any("visible.txt"));
        assert!(!hidden.matches_any("thumbs.db"));
    }

    #[test]
    fn test_search_is_case_insensitive_prefix() {
        let pattern = compile_search("foo").unwrap();
        assert!(matches_at_start(&pattern, "Foo/"));
        assert!(matches_at_start(&pattern, "fooö"));
        assert!(!matches_at_start(&pattern, "barfoo"));
    }

    #[test]
    fn test_alternation_is_anchored_as_a_whole() {
        let covers = PatternList::new(&["cover|folder"], true).unwrap();
        assert!(covers.matches_any("Folder.jpg"));
        assert!(!covers.matches_any("my-folder.jpg"));
        assert!(!compile_search("a|b").unwrap().is_match("xb"));
    }

    #[test]
    fn test_malformed_pattern_is_an_error() {
        assert!(compile_search("(unclosed").is_err());
        assert!(PatternList::new(&["["], false).is_err());
    }
}
