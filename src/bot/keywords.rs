// src/bot/keywords.rs - Versioned bilingual keyword configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating or compiling a [`KeywordSet`]
#[derive(Debug, Error)]
pub enum KeywordSetError {
    #[error("keyword set '{version}' has non-lowercase entries in {list}: {entries:?}")]
    NotLowercase {
        version: String,
        list: &'static str,
        entries: Vec<String>,
    },

    #[error("acrostic targets must be uppercase, found: {0:?}")]
    AcronymCase(Vec<String>),

    #[error("empty entry in {0}")]
    EmptyEntry(&'static str),

    #[error("invalid regex in keyword set: {0}")]
    Regex(#[from] regex::Error),
}

/// Bilingual collection of election-related tokens, glyphs and phrases.
///
/// Every Latin-script list is stored lowercase. Glyphs and CJK terms are
/// compared by raw substring containment, so case folding never applies to
/// them. Acrostic targets are stored uppercase because the acrostic detector
/// uppercases the first letter of each line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordSet {
    pub version: String,

    /// Flags, party colours, ballot icons and similar symbols
    #[serde(default)]
    pub glyphs: Vec<String>,

    /// Party names and abbreviations
    #[serde(default)]
    pub parties: Vec<String>,

    /// Voting, campaigning and counting vocabulary
    #[serde(default)]
    pub electoral_terms: Vec<String>,

    /// Constituency vocabulary
    #[serde(default)]
    pub geography: Vec<String>,

    /// Named political figures
    #[serde(default)]
    pub figures: Vec<String>,

    /// Party symbols spelled out as words
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Raw regex alternatives for the core tier
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Indirect campaign rhetoric. Higher false-positive risk, toggled separately.
    #[serde(default)]
    pub rhetorical_phrases: Vec<String>,

    /// Raw regex alternatives for the rhetorical tier
    #[serde(default)]
    pub rhetorical_patterns: Vec<String>,

    /// Chinese terms matched by substring
    #[serde(default)]
    pub cjk_terms: Vec<String>,

    /// Fragments the sequence tracker looks for in reassembled short messages
    #[serde(default)]
    pub evasion_fragments: Vec<String>,

    /// Targets for the acrostic detector
    #[serde(default)]
    pub acronyms: Vec<String>,
}

impl KeywordSet {
    /// Check the normalization invariants and that every regex compiles
    pub fn validate(&self) -> Result<(), KeywordSetError> {
        let lowercase_lists: [(&'static str, &Vec<String>); 6] = [
            ("parties", &self.parties),
            ("electoral_terms", &self.electoral_terms),
            ("geography", &self.geography),
            ("figures", &self.figures),
            ("symbols", &self.symbols),
            ("rhetorical_phrases", &self.rhetorical_phrases),
        ];

        for (list, entries) in lowercase_lists {
            if entries.iter().any(|e| e.trim().is_empty()) {
                return Err(KeywordSetError::EmptyEntry(list));
            }
            let offenders: Vec<String> = entries
                .iter()
                .filter(|e| e.to_lowercase() != **e)
                .cloned()
                .collect();
            if !offenders.is_empty() {
                return Err(KeywordSetError::NotLowercase {
                    version: self.version.clone(),
                    list,
                    entries: offenders,
                });
            }
        }

        // Regex lists are exempt from the case check since escapes like \S are uppercase
        for (list, entries) in [
            ("patterns", &self.patterns),
            ("rhetorical_patterns", &self.rhetorical_patterns),
            ("glyphs", &self.glyphs),
            ("cjk_terms", &self.cjk_terms),
            ("evasion_fragments", &self.evasion_fragments),
            ("acronyms", &self.acronyms),
        ] {
            if entries.iter().any(|e| e.trim().is_empty()) {
                return Err(KeywordSetError::EmptyEntry(list));
            }
        }

        let bad_acronyms: Vec<String> = self
            .acronyms
            .iter()
            .filter(|a| a.to_uppercase() != **a)
            .cloned()
            .collect();
        if !bad_acronyms.is_empty() {
            return Err(KeywordSetError::AcronymCase(bad_acronyms));
        }

        for pattern in self.patterns.iter().chain(&self.rhetorical_patterns) {
            regex::Regex::new(pattern)?;
        }

        Ok(())
    }

    /// Literal tokens of the core tier, in matching order
    pub fn core_tokens(&self) -> impl Iterator<Item = &String> {
        self.parties
            .iter()
            .chain(&self.electoral_terms)
            .chain(&self.geography)
            .chain(&self.figures)
            .chain(&self.symbols)
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for KeywordSet {
    fn default() -> Self {
        Self {
            version: "ge2025.3".to_string(),
            glyphs: owned(&[
                "🇸🇬", "⚡", "🔨", "⚒", "🗳", "☑", "✅", "✔", "🔵", "⚪", "🔴", "🟦", "⬜", "🟥",
            ]),
            parties: owned(&[
                "pap",
                "wp",
                "psp",
                "sdp",
                "rdu",
                "spp",
                "nsp",
                "sda",
                "ppp",
                "people's action party",
                "peoples action party",
                "action party",
                "workers' party",
                "workers party",
                "progress singapore party",
                "singapore democratic party",
                "red dot united",
                "reform party",
                "national solidarity party",
                "singapore people's party",
                "people's power party",
                "peoples power party",
                "people's alliance for reform",
                "singapore democratic alliance",
            ]),
            electoral_terms: owned(&[
                "vote",
                "votes",
                "voted",
                "voting",
                "voter",
                "voters",
                "ballot",
                "ballots",
                "poll",
                "polls",
                "polling",
                "polling day",
                "polling station",
                "election",
                "elections",
                "electoral",
                "general election",
                "by-election",
                "ge2025",
                "ge 2025",
                "campaign",
                "campaigning",
                "nomination day",
                "cooling day",
                "cooling-off day",
                "cooling off day",
                "sample count",
                "candidate",
                "candidates",
                "manifesto",
                "rally",
                "rallies",
                "walkover",
                "constituency",
                "constituencies",
                "elections department",
            ]),
            geography: owned(&["grc", "smc", "grcs", "smcs"]),
            figures: owned(&[
                "lawrence wong",
                "lee hsien loong",
                "lee kuan yew",
                "goh chok tong",
                "pritam singh",
                "sylvia lim",
                "jamus lim",
                "he ting ru",
                "tan cheng bock",
                "leong mun wai",
                "hazel poa",
                "chee soon juan",
                "paul tambyah",
                "kenneth jeyaretnam",
                "ong ye kung",
                "chan chun sing",
                "gan kim yong",
                "k shanmugam",
                "vivian balakrishnan",
                "lhl",
                "lky",
            ]),
            symbols: owned(&[
                "lightning",
                "lightning bolt",
                "thunderbolt",
                "hammer",
                "flower",
                "flowers",
                "lotus",
                "orchid",
                "hibiscus",
                "sunflower",
            ]),
            patterns: owned(&[
                r"ge\s?20\d\d",
                r"vote\s*(?:for|4)\s*\w+",
            ]),
            rhetorical_phrases: owned(&[
                "alternative voices",
                "alternative voice",
                "ruling party",
                "opposition party",
                "opposition parties",
                "years of leadership",
                "checks and balances",
                "check and balance",
                "supermajority",
                "two-thirds majority",
                "first world parliament",
                "4g leaders",
                "fourth generation leaders",
                "strong mandate",
                "make your vote count",
                "your vote is secret",
            ]),
            rhetorical_patterns: owned(&[
                r"real\s+leaders?\b.{0,40}\bon\s+the\s+ground",
                r"(?:proven|steady)\s+(?:track\s+record|hands)",
                r"(?:more|stronger)\s+opposition\s+(?:voices?|in\s+parliament)",
            ]),
            cjk_terms: owned(&[
                "选举", "選舉", "大选", "大選", "投票", "选民", "選民", "候选人", "候選人", "选区",
                "選區", "集选区", "集選區", "单选区", "單選區", "竞选", "競選", "提名日", "冷静日",
                "冷靜日", "投票日", "人民行动党", "人民行動黨", "行动党", "行動黨", "工人党",
                "工人黨", "前进党", "前進黨", "民主党", "民主黨", "反对党", "反對黨", "执政党",
                "執政黨", "李显龙", "李顯龍", "黄循财", "黃循財", "毕丹星", "畢丹星", "林瑞莲",
                "林瑞蓮", "陈清木", "陳清木",
            ]),
            evasion_fragments: owned(&[
                "vote", "pap", "wp", "psp", "sdp", "votefor", "votepap", "election", "VOTE", "PAP",
                "WP", "PSP", "SDP", "VOTEFOR", "VOTEPAP", "ELECTION", "Vote", "Pap", "Wp",
                "Psp", "Sdp", "VoteFor", "VotePap", "Election",
            ]),
            acronyms: owned(&[
                "VOTE", "PAP", "WP", "PSP", "SDP", "RDU", "GRC", "SMC", "VOTEPAP", "VOTEWP",
                "VOTEPSP", "VOTESDP", "GE2025",
            ]),
        }
    }
}
