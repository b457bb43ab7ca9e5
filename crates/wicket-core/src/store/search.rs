//! Identity/IP lookup and bigram text search over live topics.
//!
//! Both modes share one entry point: an empty query string selects
//! identity/IP lookup (`token` is compared against every post's raw
//! token), anything else selects bigram text search. Both honour a soft
//! time budget so a pathological query can't stall the reader lock
//! indefinitely.

use std::time::Instant;

use crate::longid;
use crate::model::Post;

use super::Store;

const MAX_BIGRAMS: usize = 128;

impl Store {
    /// Looks up posts by raw identity/IP token, or by bigram text search
    /// when `qtext` is non-empty, returning up to `max` matches and the
    /// total number found (which may exceed `max`).
    ///
    /// A leading `>>123...` in `qtext` restricts the search to the topic
    /// named by that long-ID; the rest of the string after the digit run
    /// (and any single following space) is the actual query text.
    ///
    /// # Panics
    ///
    /// Never panics; `timeout_ms` of `0` simply means the budget is
    /// already exhausted before the first topic is checked.
    #[must_use]
    pub fn get_posts_by(
        &self,
        token: [u8; 8],
        qtext: &str,
        max: usize,
        timeout_ms: u64,
    ) -> (Vec<Post>, usize) {
        let (restrict_to, query) = parse_topic_restriction(qtext);
        let deadline = Instant::now() + std::time::Duration::from_millis(timeout_ms);

        let state = self.state.read();
        let mut results = Vec::new();
        let mut total = 0usize;

        if query.is_empty() {
            for (_, topic) in state.arena.iter() {
                if Instant::now() >= deadline {
                    break;
                }
                if restrict_to.is_some_and(|id| id != topic.id) {
                    continue;
                }
                for post in &topic.posts {
                    if post.ip_token == token || post.user_token == token {
                        total += 1;
                        if results.len() < max {
                            results.push(post.clone());
                        }
                    }
                }
            }
            return (results, total);
        }

        let bigrams = query_bigrams(query);
        let threshold = bigrams.len() / 2 + 1;

        for (_, topic) in state.arena.iter() {
            if Instant::now() >= deadline {
                break;
            }
            if restrict_to.is_some_and(|id| id != topic.id) {
                continue;
            }

            if bigram_score(&topic.subject, &bigrams) >= threshold {
                if let Some(first) = topic.posts.first() {
                    total += 1;
                    if results.len() < max {
                        results.push(first.clone());
                    }
                }
                continue;
            }

            for post in &topic.posts {
                if bigram_score(&post.message, &bigrams) >= threshold {
                    total += 1;
                    if results.len() < max {
                        results.push(post.clone());
                    }
                }
            }
        }

        (results, total)
    }
}

/// Splits a leading `>>LONGID` topic restriction off `qtext`, returning the
/// restricted topic ID (if any) and the remaining query text.
fn parse_topic_restriction(qtext: &str) -> (Option<u32>, &str) {
    let Some(rest) = qtext.strip_prefix(">>") else { return (None, qtext) };
    let digits_len = rest.chars().take_while(char::is_ascii_digit).count();
    if digits_len == 0 {
        return (None, qtext);
    }
    let (digits, remainder) = rest.split_at(digits_len);
    let Ok(long_id) = digits.parse::<u64>() else { return (None, qtext) };
    let Ok((topic_id, _)) = longid::split_long_id(long_id) else { return (None, qtext) };
    (Some(topic_id), remainder.strip_prefix(' ').unwrap_or(remainder))
}

fn lower_ascii(c: char) -> char {
    if c.is_ascii_uppercase() { c.to_ascii_lowercase() } else { c }
}

#[allow(clippy::cast_possible_truncation)]
fn bigram(a: char, b: char) -> u32 {
    (u32::from(a as u32 as u16) << 16) | u32::from(b as u32 as u16)
}

/// Builds the sorted, space-stripped, lowercased adjacent-bigram set for a
/// query string, capped at [`MAX_BIGRAMS`] entries.
fn query_bigrams(qtext: &str) -> Vec<u32> {
    let chars: Vec<char> = qtext.chars().filter(|&c| c != ' ').map(lower_ascii).collect();
    let mut bigrams: Vec<u32> = chars.windows(2).map(|w| bigram(w[0], w[1])).take(MAX_BIGRAMS).collect();
    bigrams.sort_unstable();
    bigrams
}

/// Scores `text` against `bigrams`: lowercased adjacent character pairs,
/// spaces NOT stripped (unlike [`query_bigrams`]), returning as soon as the
/// match count crosses `bigrams.len() / 2 + 1` hits.
fn bigram_score(text: &str, bigrams: &[u32]) -> usize {
    if bigrams.is_empty() {
        return 0;
    }
    let threshold = bigrams.len() / 2 + 1;
    let mut score = 0;
    let mut prev: Option<char> = None;
    for c in text.chars().map(lower_ascii) {
        if let Some(p) = prev {
            if bigrams.binary_search(&bigram(p, c)).is_ok() {
                score += 1;
                if score >= threshold {
                    return score;
                }
            }
        }
        prev = Some(c);
    }
    score
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::model::{ForumConfig, Post, PostStatus, Topic, TopicFlags};
    use crate::store::arena::Arena;
    use crate::store::StoreState;

    use super::*;

    fn store_with(topics: Vec<Topic>) -> Store {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("main.txt");
        crate::log::LogFile::create(&log_path).unwrap();
        let log = crate::log::LogFile::open(&log_path).unwrap();

        let mut arena = Arena::new();
        let mut tail = None;
        for t in topics {
            tail = Some(arena.insert_after(tail, t));
        }

        let state = StoreState {
            log,
            arena,
            topics_count: 1,
            blocked: std::collections::HashSet::new(),
            sticky_tail: None,
            max_live_topics: 10,
            config: ForumConfig::default(),
        };
        // Leak the tempdir so the log file outlives the test body; the OS
        // reclaims it at process exit.
        std::mem::forget(dir);

        Store {
            state: parking_lot::RwLock::new(state),
            path: log_path,
            cooldown: crate::throttle::CooldownGate::new(),
            uuid_dedup: crate::throttle::UuidDedup::new(),
            bad_users: crate::throttle::BadUsers::new(),
        }
    }

    fn post(id: u16, user: [u8; 8], ip: [u8; 8], msg: &str) -> Post {
        Post {
            id,
            created_at: 1000,
            user_token: user,
            ip_token: ip,
            status: PostStatus::default(),
            message: msg.to_string(),
            image: None,
        }
    }

    fn topic(id: u32, subject: &str, posts: Vec<Post>) -> Topic {
        Topic {
            id,
            subject: subject.to_string(),
            created_at: 1000,
            modified_at: 1000,
            flags: TopicFlags::default(),
            posts,
        }
    }

    #[test]
    fn identity_search_finds_every_post_from_token() {
        let token = [7u8; 8];
        let store = store_with(vec![
            topic(1, "a", vec![post(1, token, [0; 8], "hi")]),
            topic(2, "b", vec![post(1, token, [0; 8], "yo")]),
            topic(3, "c", vec![post(1, [1; 8], [0; 8], "nope")]),
        ]);

        let (results, total) = store.get_posts_by(token, "", 50, 100);
        assert_eq!(total, 2);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn text_search_matches_on_bigram_threshold() {
        let store = store_with(vec![topic(
            1,
            "hello world foo",
            vec![post(1, [0; 8], [0; 8], "lorem ipsum")],
        )]);

        let (results, total) = store.get_posts_by([0; 8], "ello worl", 50, 100);
        assert_eq!(total, 1);
        assert_eq!(results.len(), 1);

        let (_, total_miss) = store.get_posts_by([0; 8], "zzz", 50, 100);
        assert_eq!(total_miss, 0);
    }

    #[test]
    fn topic_restriction_prefix_limits_to_one_topic() {
        let store = store_with(vec![
            topic(1, "hello world", vec![post(1, [0; 8], [0; 8], "x")]),
            topic(2, "hello world", vec![post(1, [0; 8], [0; 8], "x")]),
        ]);

        let long_id = longid::pack_long_id(2, 1);
        let (results, total) = store.get_posts_by([0; 8], &format!(">>{long_id} hello wor"), 50, 100);
        assert_eq!(total, 1);
        assert_eq!(results[0].id, 1);
    }
}
