//! Free-text heuristics shared by the adapters: skill classification, reward
//! extraction and description truncation.

use clawsmos_core::SkillCategory;
use once_cell::sync::Lazy;
use regex::Regex;

pub const DESCRIPTION_LIMIT: usize = 200;

/// Keyword sets in priority order. The first category with any substring hit wins.
const SKILL_KEYWORDS: &[(SkillCategory, &[&str])] = &[
    (
        SkillCategory::Coding,
        &[
            "code",
            "sdk",
            "api",
            "bot",
            "integrate",
            "develop",
            "smart contract",
            "blockchain",
        ],
    ),
    (
        SkillCategory::Writing,
        &["write", "thread", "blog", "content", "article", "documentation"],
    ),
    (
        SkillCategory::Design,
        &["design", "logo", "banner", "ui", "ux", "graphics"],
    ),
    (
        SkillCategory::Research,
        &["research", "find", "analyze", "investigate", "study"],
    ),
    (
        SkillCategory::Marketing,
        &["marketing", "social", "promote", "campaign", "outreach"],
    ),
];

pub fn classify(text: &str) -> SkillCategory {
    let lower = text.to_lowercase();
    SKILL_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(skill, _)| *skill)
        .unwrap_or(SkillCategory::Other)
}

static REWARD_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\$(\d+(?:\.\d{2})?)",
        r"(?i)(\d+)\s*(?:USDC|USD)",
        r"(?i)(\d+)\s*dollars?",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("reward pattern compiles"))
    .collect()
});

/// Pulls a monetary amount out of unstructured text; 0 when nothing matches.
pub fn extract_reward(text: &str) -> f64 {
    REWARD_PATTERNS
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
}

static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").expect("number pattern compiles")
});

/// Lenient numeric read of a string: the longest leading number, ignoring
/// surrounding whitespace and any trailing text (`"50 USDC"` reads as 50).
pub fn parse_leading_number(text: &str) -> Option<f64> {
    LEADING_NUMBER
        .find(text.trim())
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

pub fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}...", &text[..cut]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_uses_first_matching_category() {
        assert_eq!(
            classify("Build Twitter Bot for NFT Monitoring"),
            SkillCategory::Coding
        );
        assert_eq!(
            classify("Write Agent Economics Research Report"),
            SkillCategory::Writing
        );
        assert_eq!(classify("Design Logo for Agent Platform"), SkillCategory::Design);
        assert_eq!(classify("Investigate token flows"), SkillCategory::Research);
        assert_eq!(classify("Run an outreach CAMPAIGN"), SkillCategory::Marketing);
        assert_eq!(classify("random unrelated text"), SkillCategory::Other);
        assert_eq!(classify(""), SkillCategory::Other);
    }

    #[test]
    fn classify_is_deterministic() {
        let text = "Document the SDK and promote it on social";
        let first = classify(text);
        assert!((0..10).all(|_| classify(text) == first));
        assert_eq!(first, SkillCategory::Coding);
    }

    #[test]
    fn extract_reward_follows_pattern_priority() {
        assert_eq!(extract_reward("Pay is $75 for this job"), 75.0);
        assert_eq!(extract_reward("Reward: 50 USDC"), 50.0);
        assert_eq!(extract_reward("no amount mentioned"), 0.0);
        assert_eq!(extract_reward("$12.50 bounty"), 12.5);
        assert_eq!(extract_reward("paying 30 dollars"), 30.0);
        assert_eq!(extract_reward("40 usd or $90"), 90.0);
    }

    #[test]
    fn leading_number_behaves_like_a_lenient_float_read() {
        assert_eq!(parse_leading_number("50 USDC"), Some(50.0));
        assert_eq!(parse_leading_number(" 12.75"), Some(12.75));
        assert_eq!(parse_leading_number("abc"), None);
        assert_eq!(parse_leading_number(""), None);
    }

    #[test]
    fn truncate_keeps_short_text_and_suffixes_long_text() {
        let short = "a".repeat(DESCRIPTION_LIMIT);
        assert_eq!(truncate_text(&short, DESCRIPTION_LIMIT), short);

        let long = "b".repeat(DESCRIPTION_LIMIT + 1);
        let cut = truncate_text(&long, DESCRIPTION_LIMIT);
        assert_eq!(cut.len(), DESCRIPTION_LIMIT + 3);
        assert!(cut.ends_with("b..."));

        let multibyte = "é".repeat(DESCRIPTION_LIMIT + 5);
        let cut = truncate_text(&multibyte, DESCRIPTION_LIMIT);
        assert_eq!(cut.chars().count(), DESCRIPTION_LIMIT + 3);
    }
}
