// src/bot/keyword_matching.rs - Lexical and symbolic election keyword matching

use log::debug;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::bot::keywords::{KeywordSet, KeywordSetError};

/// Which rule family produced a keyword hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordRule {
    Glyph,
    Token,
    CjkTerm,
    Rhetorical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordHit {
    pub rule: KeywordRule,
    pub matched: String,
}

/// Compiled form of a [`KeywordSet`].
///
/// Core tokens and core regex alternatives are folded into one word-bounded
/// regex; the rhetorical tier gets its own regex so it can be switched off
/// without touching the core tier.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    version: String,
    glyphs: Vec<String>,
    core: Option<Regex>,
    rhetorical: Option<Regex>,
    rhetorical_enabled: bool,
    cjk_terms: Vec<String>,
    evasion_fragments: Vec<String>,
    acronyms: Vec<String>,
}

impl KeywordMatcher {
    /// Validate and compile a keyword set
    pub fn compile(set: &KeywordSet) -> Result<Self, KeywordSetError> {
        set.validate()?;

        let core = Self::build_alternation(set.core_tokens(), &set.patterns)?;
        let rhetorical =
            Self::build_alternation(set.rhetorical_phrases.iter(), &set.rhetorical_patterns)?;

        debug!(
            "Compiled keyword set '{}' ({} glyphs, {} cjk terms)",
            set.version,
            set.glyphs.len(),
            set.cjk_terms.len()
        );

        Ok(Self {
            version: set.version.clone(),
            glyphs: set.glyphs.clone(),
            core,
            rhetorical,
            rhetorical_enabled: true,
            cjk_terms: set.cjk_terms.clone(),
            evasion_fragments: set.evasion_fragments.clone(),
            acronyms: set.acronyms.clone(),
        })
    }

    /// Toggle the rhetorical tier
    pub fn with_rhetorical(mut self, enabled: bool) -> Self {
        self.rhetorical_enabled = enabled;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn rhetorical_enabled(&self) -> bool {
        self.rhetorical_enabled
    }

    pub fn evasion_fragments(&self) -> &[String] {
        &self.evasion_fragments
    }

    pub fn acronyms(&self) -> &[String] {
        &self.acronyms
    }

    pub fn matches(&self, text: &str) -> bool {
        self.find(text).is_some()
    }

    /// First hit across the core tier and, when enabled, the rhetorical tier
    pub fn find(&self, text: &str) -> Option<KeywordHit> {
        if text.is_empty() {
            return None;
        }

        if let Some(hit) = self.find_core(text) {
            return Some(hit);
        }

        if self.rhetorical_enabled {
            return self.find_rhetorical(text);
        }

        None
    }

    /// Glyphs, word-bounded tokens and CJK terms
    pub fn find_core(&self, text: &str) -> Option<KeywordHit> {
        if let Some(glyph) = self.glyphs.iter().find(|g| text.contains(g.as_str())) {
            return Some(KeywordHit {
                rule: KeywordRule::Glyph,
                matched: glyph.clone(),
            });
        }

        let normalized = normalize(text);
        if let Some(m) = self.core.as_ref().and_then(|re| re.find(&normalized)) {
            return Some(KeywordHit {
                rule: KeywordRule::Token,
                matched: m.as_str().to_string(),
            });
        }

        // No case folding or word boundaries for CJK
        self.cjk_terms
            .iter()
            .find(|term| text.contains(term.as_str()))
            .map(|term| KeywordHit {
                rule: KeywordRule::CjkTerm,
                matched: term.clone(),
            })
    }

    pub fn find_rhetorical(&self, text: &str) -> Option<KeywordHit> {
        let normalized = normalize(text);
        self.rhetorical
            .as_ref()
            .and_then(|re| re.find(&normalized))
            .map(|m| KeywordHit {
                rule: KeywordRule::Rhetorical,
                matched: m.as_str().to_string(),
            })
    }

    fn build_alternation<'a>(
        literals: impl Iterator<Item = &'a String>,
        raw: &[String],
    ) -> Result<Option<Regex>, KeywordSetError> {
        let mut parts: Vec<String> = literals.map(|l| regex::escape(l)).collect();
        parts.extend(raw.iter().map(|p| format!("(?:{})", p)));

        if parts.is_empty() {
            return Ok(None);
        }

        // Longest first so the reported match is the most specific one
        parts.sort_by(|a, b| b.len().cmp(&a.len()));
        let combined = format!(r"\b(?:{})\b", parts.join("|"));
        Ok(Some(Regex::new(&combined)?))
    }
}

/// Compatibility-fold, lowercase and straighten apostrophes for Latin matching
pub fn normalize(text: &str) -> String {
    text.nfkc()
        .collect::<String>()
        .to_lowercase()
        .replace(['\u{2018}', '\u{2019}'], "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> KeywordMatcher {
        KeywordMatcher::compile(&KeywordSet::default()).unwrap()
    }

    #[test]
    fn test_standalone_party_abbreviation() {
        let m = matcher();
        let hit = m.find("honestly PAP again?").unwrap();
        assert_eq!(hit.rule, KeywordRule::Token);
        assert_eq!(hit.matched, "pap");
    }

    #[test]
    fn test_word_boundaries_respected() {
        let m = matcher();
        assert!(!m.matches("I had papaya for breakfast"));
        assert!(!m.matches("swpsp"));
        assert!(!m.matches("see you at lunch tomorrow"));
    }

    #[test]
    fn test_multi_word_terms() {
        let m = matcher();
        assert!(m.matches("Nomination Day is next week"));
        assert!(m.matches("anyone watching the sample count?"));
        assert!(m.matches("Workers’ Party rally tonight"));
        assert!(m.matches("heading to Aljunied GRC"));
    }

    #[test]
    fn test_flower_symbol_terms() {
        let hit = matcher().find("the lotus people are at it again").unwrap();
        assert_eq!(hit.rule, KeywordRule::Token);
        assert_eq!(hit.matched, "lotus");
        assert!(matcher().matches("SUNFLOWER gang"));
    }

    #[test]
    fn test_fullwidth_letters_fold() {
        assert!(matcher().matches("ＰＡＰ"));
    }

    #[test]
    fn test_glyph_containment() {
        let hit = matcher().find("go go ⚡⚡").unwrap();
        assert_eq!(hit.rule, KeywordRule::Glyph);
    }

    #[test]
    fn test_cjk_substring_without_boundaries() {
        let hit = matcher().find("明天大家去投票吧").unwrap();
        assert_eq!(hit.rule, KeywordRule::CjkTerm);
        assert_eq!(hit.matched, "投票");
    }

    #[test]
    fn test_rhetorical_tier_toggle() {
        let text = "we need real leaders who keep working on the ground";
        let hit = matcher().find(text).unwrap();
        assert_eq!(hit.rule, KeywordRule::Rhetorical);

        let strict = matcher().with_rhetorical(false);
        assert!(!strict.matches(text));
        assert!(strict.find_rhetorical(text).is_some());
    }

    #[test]
    fn test_empty_text_never_matches() {
        assert!(!matcher().matches(""));
    }

    #[test]
    fn test_empty_set_compiles_to_nothing() {
        let set = KeywordSet {
            version: "empty".to_string(),
            glyphs: vec![],
            parties: vec![],
            electoral_terms: vec![],
            geography: vec![],
            figures: vec![],
            symbols: vec![],
            patterns: vec![],
            rhetorical_phrases: vec![],
            rhetorical_patterns: vec![],
            cjk_terms: vec![],
            evasion_fragments: vec![],
            acronyms: vec![],
        };
        let m = KeywordMatcher::compile(&set).unwrap();
        assert!(!m.matches("vote pap"));
    }
}
