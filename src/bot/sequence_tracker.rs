// src/bot/sequence_tracker.rs - Split-message evasion detection per sender

use log::{debug, info};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::bot::keyword_matching::KeywordMatcher;
use crate::config::SenderWindowConfig;

/// Messages at or below this many characters (after trimming) are buffered
pub const SHORT_MESSAGE_MAX_CHARS: usize = 3;

/// Recent short messages from one sender
#[derive(Debug, Default)]
pub struct SenderWindow {
    buffer: VecDeque<String>,
    last_seen: Option<Instant>,
}

impl SenderWindow {
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    /// Clear the buffer if the sender went quiet, then mark activity
    fn touch(&mut self, now: Instant, idle: Duration) {
        if let Some(last) = self.last_seen {
            if now.saturating_duration_since(last) > idle {
                self.buffer.clear();
            }
        }
        self.last_seen = Some(now);
    }

    fn push(&mut self, fragment: String, cap: usize) {
        self.buffer.push_back(fragment);
        while self.buffer.len() > cap {
            self.buffer.pop_front();
        }
    }

    /// Check every run of two or more buffered messages that ends with the
    /// newest one. Runs start on message boundaries, so letters from unrelated
    /// fragments ("how", "pls") never combine into a hit.
    fn completed_sequence(&self, matcher: &KeywordMatcher) -> Option<String> {
        let len = self.buffer.len();
        for start in (0..len.saturating_sub(1)).rev() {
            let run: Vec<&str> = self.buffer.range(start..).map(String::as_str).collect();
            let joined = run.concat();
            let spaced = run.join(" ");

            if matcher.matches(&joined) || matcher.matches(&spaced) {
                return Some(spaced);
            }
            if matcher
                .evasion_fragments()
                .iter()
                .any(|fragment| fragment.to_lowercase() == joined)
            {
                return Some(joined);
            }
        }
        None
    }
}

struct Slot {
    window: Arc<Mutex<SenderWindow>>,
    touched: Instant,
}

/// Tracks short consecutive messages per sender to catch words split across sends.
///
/// Windows live in a bounded map: senders idle past the TTL are dropped first,
/// then the least recently active sender once the map is full. Each sender's
/// window sits behind its own async mutex so two messages from the same sender
/// are evaluated one after the other.
pub struct SequenceTracker {
    windows: std::sync::Mutex<HashMap<String, Slot>>,
    idle: Duration,
    buffer_cap: usize,
    max_senders: usize,
    ttl: Duration,
}

impl SequenceTracker {
    pub fn new(config: &SenderWindowConfig) -> Self {
        Self {
            windows: std::sync::Mutex::new(HashMap::new()),
            idle: Duration::from_secs(config.idle_secs),
            buffer_cap: config.buffer_cap.max(1),
            max_senders: config.max_senders.max(1),
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    /// Record a message and report whether the sender's recent short messages spell something flagged
    pub async fn observe(&self, sender_id: &str, text: &str, matcher: &KeywordMatcher) -> bool {
        self.observe_at(sender_id, text, matcher, Instant::now()).await
    }

    pub async fn observe_at(
        &self,
        sender_id: &str,
        text: &str,
        matcher: &KeywordMatcher,
        now: Instant,
    ) -> bool {
        let slot = self.window_for(sender_id, now);
        let mut window = slot.lock().await;

        // Long messages still count as activity so a sequence isn't reset mid-way
        window.touch(now, self.idle);

        let trimmed = text.trim();
        if trimmed.chars().count() > SHORT_MESSAGE_MAX_CHARS {
            return false;
        }

        window.push(trimmed.to_lowercase(), self.buffer_cap);

        match window.completed_sequence(matcher) {
            Some(spelled) => {
                info!("Split-message sequence from {} spelled '{}'", sender_id, spelled);
                // A completed sequence is used up
                window.buffer.clear();
                true
            }
            None => false,
        }
    }

    /// Buffered message count for a sender, if tracked
    pub async fn buffer_len(&self, sender_id: &str) -> Option<usize> {
        let window = {
            let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
            windows.get(sender_id).map(|slot| slot.window.clone())
        }?;
        let len = window.lock().await.len();
        Some(len)
    }

    pub fn tracked_senders(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear(&self) {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("Cleared all sender windows");
    }

    fn window_for(&self, sender_id: &str, now: Instant) -> Arc<Mutex<SenderWindow>> {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(slot) = windows.get_mut(sender_id) {
            slot.touched = now;
            return slot.window.clone();
        }

        if windows.len() >= self.max_senders {
            self.evict(&mut windows, now);
        }

        let window = Arc::new(Mutex::new(SenderWindow::default()));
        windows.insert(
            sender_id.to_string(),
            Slot {
                window: window.clone(),
                touched: now,
            },
        );
        window
    }

    /// Windows still held by an in-flight observe are never evicted, so a
    /// sender can't end up with two windows. If every window is in use the
    /// map briefly grows past `max_senders`.
    fn evict(&self, windows: &mut HashMap<String, Slot>, now: Instant) {
        let ttl = self.ttl;
        let before = windows.len();
        windows.retain(|_, slot| {
            Arc::strong_count(&slot.window) > 1 || now.saturating_duration_since(slot.touched) <= ttl
        });

        if windows.len() >= self.max_senders {
            let oldest = windows
                .iter()
                .filter(|(_, slot)| Arc::strong_count(&slot.window) == 1)
                .min_by_key(|(_, slot)| slot.touched)
                .map(|(sender, _)| sender.clone());
            if let Some(sender) = oldest {
                windows.remove(&sender);
            }
        }

        debug!("Evicted {} sender windows", before - windows.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::keywords::KeywordSet;

    fn matcher() -> KeywordMatcher {
        KeywordMatcher::compile(&KeywordSet::default()).unwrap()
    }

    fn tracker() -> SequenceTracker {
        SequenceTracker::new(&SenderWindowConfig::default())
    }

    #[tokio::test]
    async fn test_split_vote_detected_on_last_letter() {
        let t = tracker();
        let m = matcher();
        let start = Instant::now();

        assert!(!t.observe_at("s", "v", &m, start).await);
        assert!(!t.observe_at("s", "o", &m, start + Duration::from_secs(1)).await);
        assert!(!t.observe_at("s", "t", &m, start + Duration::from_secs(2)).await);
        assert!(t.observe_at("s", "e", &m, start + Duration::from_secs(3)).await);
    }

    #[tokio::test]
    async fn test_interleaved_senders_do_not_combine() {
        let t = tracker();
        let m = matcher();
        let now = Instant::now();

        assert!(!t.observe_at("alice", "v", &m, now).await);
        assert!(!t.observe_at("bob", "o", &m, now).await);
        assert!(!t.observe_at("alice", "t", &m, now).await);
        assert!(!t.observe_at("bob", "e", &m, now).await);

        // Alice completing her own sequence still triggers
        assert!(!t.observe_at("alice", "x", &m, now).await);
        assert!(!t.observe_at("bob", "a", &m, now).await);
        assert_eq!(t.buffer_len("alice").await, Some(3));
        assert_eq!(t.buffer_len("bob").await, Some(3));

        let t = tracker();
        for (sender, letter) in [
            ("alice", "v"),
            ("bob", "a"),
            ("alice", "o"),
            ("bob", "b"),
            ("alice", "t"),
            ("bob", "c"),
        ] {
            assert!(!t.observe_at(sender, letter, &m, now).await);
        }
        assert!(t.observe_at("alice", "e", &m, now).await);
    }

    #[tokio::test]
    async fn test_idle_gap_starts_fresh_buffer() {
        let t = tracker();
        let m = matcher();
        let start = Instant::now();

        t.observe_at("s", "v", &m, start).await;
        t.observe_at("s", "o", &m, start + Duration::from_secs(10)).await;
        assert_eq!(t.buffer_len("s").await, Some(2));

        let later = start + Duration::from_secs(10 + 301);
        assert!(!t.observe_at("s", "t", &m, later).await);
        assert_eq!(t.buffer_len("s").await, Some(1));

        // "t" + "e" alone spells nothing
        assert!(!t.observe_at("s", "e", &m, later + Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_long_messages_keep_sequence_alive() {
        let t = tracker();
        let m = matcher();
        let start = Instant::now();

        t.observe_at("s", "p", &m, start).await;
        t.observe_at("s", "a", &m, start + Duration::from_secs(200)).await;
        // Not buffered, but refreshes activity
        assert!(!t
            .observe_at("s", "how is everyone", &m, start + Duration::from_secs(400))
            .await);
        assert_eq!(t.buffer_len("s").await, Some(2));
        assert!(t.observe_at("s", "p", &m, start + Duration::from_secs(600)).await);
    }

    #[tokio::test]
    async fn test_buffer_is_capped_fifo() {
        let config = SenderWindowConfig {
            buffer_cap: 3,
            ..SenderWindowConfig::default()
        };
        let t = SequenceTracker::new(&config);
        let m = matcher();
        let now = Instant::now();

        for letter in ["v", "o", "x", "y", "z"] {
            assert!(!t.observe_at("s", letter, &m, now).await);
        }
        assert_eq!(t.buffer_len("s").await, Some(3));
    }

    #[tokio::test]
    async fn test_trimmed_and_lowercased() {
        let t = tracker();
        let m = matcher();
        let now = Instant::now();

        assert!(!t.observe_at("s", "  W ", &m, now).await);
        assert!(t.observe_at("s", "P\n", &m, now).await);
    }

    #[tokio::test]
    async fn test_bounded_sender_map_evicts_oldest() {
        let config = SenderWindowConfig {
            max_senders: 2,
            ..SenderWindowConfig::default()
        };
        let t = SequenceTracker::new(&config);
        let m = matcher();
        let start = Instant::now();

        t.observe_at("a", "v", &m, start).await;
        t.observe_at("b", "v", &m, start + Duration::from_secs(1)).await;
        t.observe_at("c", "v", &m, start + Duration::from_secs(2)).await;

        assert_eq!(t.tracked_senders(), 2);
        assert_eq!(t.buffer_len("a").await, None);
        assert_eq!(t.buffer_len("c").await, Some(1));
    }

    #[tokio::test]
    async fn test_completed_sequence_clears_window() {
        let t = tracker();
        let m = matcher();
        let now = Instant::now();

        for letter in ["v", "o", "t"] {
            assert!(!t.observe_at("s", letter, &m, now).await);
        }
        assert!(t.observe_at("s", "e", &m, now).await);
        assert_eq!(t.buffer_len("s").await, Some(0));

        // Follow-up chatter no longer carries the old sequence
        assert!(!t.observe_at("s", "ok", &m, now).await);
        assert!(!t.observe_at("s", "lol", &m, now).await);
    }

    #[tokio::test]
    async fn test_unrelated_fragments_do_not_combine() {
        let t = tracker();
        let m = matcher();
        let now = Instant::now();

        // "howpls" contains "wp" but only across fragment interiors
        assert!(!t.observe_at("s", "how", &m, now).await);
        assert!(!t.observe_at("s", "pls", &m, now).await);
    }

    #[tokio::test]
    async fn test_sequence_after_earlier_chatter() {
        let t = tracker();
        let m = matcher();
        let now = Instant::now();

        for fragment in ["ok", "hmm", "p", "a"] {
            assert!(!t.observe_at("s", fragment, &m, now).await);
        }
        assert!(t.observe_at("s", "p", &m, now).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_observes_for_one_sender() {
        let t = Arc::new(tracker());
        let m = Arc::new(matcher());

        let mut handles = Vec::new();
        for _ in 0..20 {
            let (t, m) = (t.clone(), m.clone());
            handles.push(tokio::spawn(async move { t.observe("s", "x", &m).await }));
        }
        for handle in handles {
            assert!(!handle.await.unwrap());
        }
        assert_eq!(t.buffer_len("s").await, Some(20));
        assert_eq!(t.tracked_senders(), 1);

        let t = Arc::new(tracker());
        for letter in ["v", "o", "t"] {
            t.observe("s", letter, &m).await;
        }
        // Two racing "e"s: exactly one completes the word, the other starts fresh
        let (a, b) = {
            let (t1, m1, t2, m2) = (t.clone(), m.clone(), t.clone(), m.clone());
            tokio::join!(
                tokio::spawn(async move { t1.observe("s", "e", &m1).await }),
                tokio::spawn(async move { t2.observe("s", "e", &m2).await })
            )
        };
        assert!(a.unwrap() ^ b.unwrap());
        assert_eq!(t.buffer_len("s").await, Some(1));
    }

    #[tokio::test]
    async fn test_window_in_use_is_not_evicted() {
        let config = SenderWindowConfig {
            max_senders: 2,
            ..SenderWindowConfig::default()
        };
        let t = SequenceTracker::new(&config);
        let m = matcher();
        let start = Instant::now();

        let held = t.window_for("a", start);
        t.observe_at("b", "x", &m, start + Duration::from_secs(1)).await;
        t.observe_at("c", "x", &m, start + Duration::from_secs(2)).await;

        // "a" is oldest but still held, so "b" goes instead
        assert_eq!(t.buffer_len("a").await, Some(0));
        assert_eq!(t.buffer_len("b").await, None);
        drop(held);
    }

    #[tokio::test]
    async fn test_ttl_expired_senders_dropped_first() {
        let config = SenderWindowConfig {
            max_senders: 2,
            ttl_secs: 60,
            ..SenderWindowConfig::default()
        };
        let t = SequenceTracker::new(&config);
        let m = matcher();
        let start = Instant::now();

        t.observe_at("a", "x", &m, start).await;
        t.observe_at("b", "x", &m, start + Duration::from_secs(30)).await;
        // "a" has been idle past the ttl, "b" has not
        t.observe_at("c", "x", &m, start + Duration::from_secs(70)).await;

        assert_eq!(t.buffer_len("a").await, None);
        assert_eq!(t.buffer_len("b").await, Some(1));
    }
}
