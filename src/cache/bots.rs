const BOT_SUFFIX: &str = "[bot]";

/// Login classifier built from the cache's bot pattern table.
///
/// A login is a bot when it contains any configured pattern
/// (case-insensitive) or ends with `[bot]`.
#[derive(Debug, Clone, Default)]
pub struct BotPatterns {
    patterns: Vec<String>,
}

impl BotPatterns {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_bot(&self, login: &str) -> bool {
        let login = login.to_lowercase();
        login.ends_with(BOT_SUFFIX) || self.patterns.iter().any(|p| login.contains(p.as_str()))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> BotPatterns {
        BotPatterns::new(["dependabot", "renovate", "github-actions"])
    }

    #[test]
    fn test_pattern_substring_match() {
        let bots = defaults();
        assert!(bots.is_bot("dependabot"));
        assert!(bots.is_bot("my-renovate-runner"));
        assert!(bots.is_bot("github-actions"));
    }

    #[test]
    fn test_pattern_match_is_case_insensitive() {
        let bots = BotPatterns::new(["DependaBot"]);
        assert!(bots.is_bot("DEPENDABOT-preview"));
        assert!(bots.is_bot("dependabot"));
    }

    #[test]
    fn test_bot_suffix_matches_without_patterns() {
        let bots = BotPatterns::default();
        assert!(bots.is_bot("some-app[bot]"));
        assert!(bots.is_bot("Some-App[BOT]"));
        assert!(!bots.is_bot("[bot]-prefixed-human"));
    }

    #[test]
    fn test_humans_are_not_bots() {
        let bots = defaults();
        assert!(!bots.is_bot("alice"));
        assert!(!bots.is_bot("octocat"));
        assert!(!bots.is_bot(""));
    }

    #[test]
    fn test_blank_patterns_are_ignored() {
        let bots = BotPatterns::new(["", "  "]);
        assert_eq!(bots.len(), 0);
        assert!(!bots.is_bot("alice"));
    }
}
