//! The append-only threaded-post store: log file, in-memory live-topic
//! arena, and the reader/writer lock that keeps them in lockstep.
//!
//! All mutators take the writer lock, append the corresponding opcode, then
//! mutate in-memory state before releasing it — so the log and the arena
//! can never diverge under concurrent writers. Read paths take the reader
//! lock for their entire duration and return owned copies, releasing the
//! lock before the caller renders anything.

mod arena;
pub mod archive;
pub mod mutators;
mod replay;
pub mod search;
pub mod snapshot;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::{Result, StoreError};
use crate::log::LogFile;
use crate::model::{ForumConfig, Topic};
use crate::throttle::{BadUsers, CooldownGate, UuidDedup};
use arena::Arena;

/// Current Unix time in seconds, saturating rather than panicking if the
/// system clock is somehow set before the epoch.
pub(crate) fn unix_now() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
}

/// Everything guarded by the store's single reader/writer lock.
pub(crate) struct StoreState {
    pub(crate) log: LogFile,
    pub(crate) arena: Arena,
    pub(crate) topics_count: u32,
    pub(crate) blocked: HashSet<[u8; 8]>,
    pub(crate) sticky_tail: Option<u32>,
    pub(crate) max_live_topics: u32,
    pub(crate) config: ForumConfig,
}

/// A single open forum store, backed by one log file.
pub struct Store {
    pub(crate) state: RwLock<StoreState>,
    path: PathBuf,
    /// Per-identity/IP post cooldown.
    pub cooldown: CooldownGate,
    /// One-shot compose-form UUID dedup.
    pub uuid_dedup: UuidDedup,
    /// Per-user failed-challenge counter.
    pub bad_users: BadUsers,
}

/// A snapshot of a live topic's flag bits and position, returned by read
/// paths that need more than [`Topic`] alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicSummary {
    /// The topic's ID.
    pub id: u32,
    /// Whether the topic is pinned above the non-sticky region.
    pub sticky: bool,
    /// Whether the topic currently accepts new posts.
    pub locked: bool,
}

impl Store {
    /// Opens the store at `path`, creating a fresh log if none exists, and
    /// replaying it to rebuild in-memory state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corruption`] if the log fails its structural
    /// checks, and [`StoreError::Io`] on any filesystem failure. Per the
    /// main-log loading contract, a corrupted main log is meant to prevent
    /// the process from starting at all; callers should treat an `Err` here
    /// as fatal and exit rather than attempt to continue with partial state.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            LogFile::create(path)?;
        }
        let mut log = LogFile::open(path)?;
        let bytes = log.read_committed()?;
        let mut replayed = replay::replay(&bytes)?;

        let config = match &replayed.config_json {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| StoreError::Corruption(format!("invalid config JSON: {e}")))?,
            None => ForumConfig::default(),
        };
        let max_live_topics = replayed.max_live_topics.unwrap_or(config.max_live_topics);

        replay::deobfuscate_tokens(&mut replayed.arena, &config.salt);

        let state = StoreState {
            log,
            arena: replayed.arena,
            topics_count: replayed.topics_count,
            blocked: replayed.blocked,
            sticky_tail: replayed.sticky_tail,
            max_live_topics,
            config,
        };

        Ok(Self {
            state: RwLock::new(state),
            path: path.to_path_buf(),
            cooldown: CooldownGate::new(),
            uuid_dedup: UuidDedup::new(),
            bad_users: BadUsers::new(),
        })
    }

    /// The log file path this store was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The total number of topics ever created (including archived/purged).
    #[must_use]
    pub fn topics_count(&self) -> u32 {
        self.state.read().topics_count
    }

    /// The number of currently-live topics.
    #[must_use]
    pub fn live_topics_count(&self) -> usize {
        self.state.read().arena.len()
    }

    /// A copy of the current forum configuration.
    #[must_use]
    pub fn config(&self) -> ForumConfig {
        self.state.read().config.clone()
    }

    /// Whether `token` (a raw, un-obfuscated identity or IP token) is
    /// currently blocked.
    #[must_use]
    pub fn is_blocked(&self, token: [u8; 8]) -> bool {
        self.state.read().blocked.contains(&token)
    }

    /// Fetches a single live topic by ID.
    #[must_use]
    pub fn get_topic(&self, topic_id: u32) -> Option<Topic> {
        let state = self.state.read();
        let idx = state.arena.index_of(topic_id)?;
        state.arena.get(idx).cloned()
    }

    /// Fetches up to `limit` live topics starting at list position `offset`
    /// (0-based, head-to-tail order: stickies first, then most-recently
    /// active).
    #[must_use]
    pub fn get_topics(&self, offset: usize, limit: usize) -> Vec<Topic> {
        let state = self.state.read();
        state.arena.iter().skip(offset).take(limit).map(|(_, t)| t.clone()).collect()
    }

    /// Summaries (ID, sticky, locked) for every live topic, in list order.
    #[must_use]
    pub fn topic_summaries(&self) -> Vec<TopicSummary> {
        let state = self.state.read();
        state
            .arena
            .iter()
            .map(|(_, t)| TopicSummary { id: t.id, sticky: t.flags.sticky, locked: t.flags.locked })
            .collect()
    }
}
