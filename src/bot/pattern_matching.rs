// src/bot/pattern_matching.rs - Acrostic and ASCII-art detection

use log::debug;
use regex::RegexSet;

/// Characters that make up most hand-drawn ASCII shapes
const ART_CHARS: &[char] = &[
    '/', '\\', '|', '_', '-', '<', '>', '[', ']', '{', '}', '+', '=', '*', '(', ')',
];

/// Single-line shapes that are art regardless of line count
const ART_SIGNATURES: &[&str] = &[
    // /-/-/  or  -\-\-
    r"(?:[/\\]-){2,}",
    r"(?:-[/\\]){2,}",
    // [---]  (----)  <-->
    r"[\[({<]\s*-{2,}\s*[\])}>]",
    // |__|
    r"\|_{2,}\|",
    // /--\  \__/
    r"[/\\][_\-]{2,}[/\\]",
    // ///
    r"[/\\]{3,}",
];

/// Minimum number of non-empty lines before line-based checks apply
const MIN_LINES: usize = 3;

/// Structural evasion patterns that hide a message in its layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralPattern {
    /// First letters of successive lines spell a target acronym
    Acrostic,

    /// Text drawn with punctuation, e.g. a ballot box or a party logo
    AsciiArt,
}

/// Stateless acrostic and ASCII-art detection
#[derive(Debug, Clone)]
pub struct StructuralDetector {
    acronyms: Vec<String>,
    signatures: RegexSet,
}

impl StructuralDetector {
    pub fn new(acronyms: &[String]) -> Result<Self, regex::Error> {
        Ok(Self {
            acronyms: acronyms.to_vec(),
            signatures: RegexSet::new(ART_SIGNATURES)?,
        })
    }

    /// Which structural pattern, if any, the text exhibits. Acrostics are checked first.
    pub fn detect(&self, text: &str) -> Option<StructuralPattern> {
        if self.is_acrostic(text) {
            Some(StructuralPattern::Acrostic)
        } else if self.is_ascii_art(text) {
            Some(StructuralPattern::AsciiArt)
        } else {
            None
        }
    }

    pub fn matches(&self, pattern: StructuralPattern, text: &str) -> bool {
        match pattern {
            StructuralPattern::Acrostic => self.is_acrostic(text),
            StructuralPattern::AsciiArt => self.is_ascii_art(text),
        }
    }

    /// True when the uppercased first letters of 3+ lines contain a target acronym
    pub fn is_acrostic(&self, text: &str) -> bool {
        let lines = non_empty_lines(text);
        if lines.len() < MIN_LINES {
            return false;
        }

        let initials: String = lines
            .iter()
            .filter_map(|line| line.chars().next())
            .flat_map(char::to_uppercase)
            .collect();

        match self.acronyms.iter().find(|a| initials.contains(a.as_str())) {
            Some(acronym) => {
                debug!("Acrostic '{}' found in initials '{}'", acronym, initials);
                true
            }
            None => false,
        }
    }

    /// Line-density check for 3+ lines, or any single-line art signature
    pub fn is_ascii_art(&self, text: &str) -> bool {
        let lines = non_empty_lines(text);
        if lines.len() >= MIN_LINES {
            let art_lines = lines
                .iter()
                .filter(|line| line.contains(ART_CHARS))
                .count();

            // At least half the lines carry drawing characters
            if art_lines * 2 >= lines.len() {
                debug!("ASCII art by density: {}/{} lines", art_lines, lines.len());
                return true;
            }
        }

        if self.signatures.is_match(text) {
            debug!("ASCII art signature matched");
            return true;
        }

        false
    }
}

fn non_empty_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::keywords::KeywordSet;

    fn detector() -> StructuralDetector {
        StructuralDetector::new(&KeywordSet::default().acronyms).unwrap()
    }

    #[test]
    fn test_acrostic_spells_vote() {
        let text = "Vote\nOught to\nThink\nEarnestly";
        assert_eq!(detector().detect(text), Some(StructuralPattern::Acrostic));
    }

    #[test]
    fn test_acrostic_contained_not_equal() {
        // x, P, A, P, y -> "XPAPY" contains "PAP"
        let text = "xylophones\nplease\nall\npeople\nyawn";
        assert!(detector().is_acrostic(text));
    }

    #[test]
    fn test_acrostic_skips_blank_lines_and_indent() {
        let text = "  we could\n\n   probably go\n";
        // Only two non-empty lines
        assert!(!detector().is_acrostic(text));

        let text = "  we could\n\n   probably go\n  somewhere";
        assert!(detector().is_acrostic(text));
    }

    #[test]
    fn test_acrostic_needs_three_lines() {
        assert!(!detector().is_acrostic("Whatever\nPeople"));
    }

    #[test]
    fn test_ascii_art_by_density() {
        let ballot = " _____\n|     |\n| [x] |\n|_____|";
        assert!(detector().is_ascii_art(ballot));
    }

    #[test]
    fn test_plain_paragraphs_are_not_art() {
        let text = "morning all\nanyone up for lunch\nthe usual place";
        assert!(!detector().is_ascii_art(text));
    }

    #[test]
    fn test_single_line_signatures() {
        let d = detector();
        assert!(d.is_ascii_art("/-/-/-/"));
        assert!(d.is_ascii_art("look [----] here"));
        assert!(d.is_ascii_art("\\__/"));
        assert!(d.is_ascii_art("///"));
    }

    #[test]
    fn test_url_is_not_art() {
        let d = detector();
        let url = "https://example.com/a/b";
        assert!(!d.signatures.is_match(url));
        assert!(!d.is_ascii_art(url));
        assert_eq!(d.detect(url), None);
    }

    #[test]
    fn test_code_fences_are_over_flagged() {
        // Accepted false positive: technical text trips the density check
        let snippet = "fn main() {\n    let x = a + b;\n}";
        assert!(detector().is_ascii_art(snippet));
    }
}
