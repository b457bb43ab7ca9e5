//! Snapshot job: rewrites the log into a compacted form holding only live
//! topics, so a long-running forum doesn't carry every historical toggle
//! and deleted/archived topic forever.
//!
//! Unlike the main log, a snapshot is written in one shot: header first
//! (both slots already pointing at the final length), then the live topics
//! head-to-tail, each followed by its current flag markers, then the
//! allocator counter, blocked tokens, config, and max-live-topics.

use std::fs;
use std::path::Path;

use wicket_codec::Writer;

use crate::crypto;
use crate::error::Result;
use crate::log::HEADER_LEN;
use crate::opcode::Opcode;

use super::{Store, StoreState};

const MAGIC: [u8; 3] = *b"zzz";

impl Store {
    /// Writes a compacted snapshot of the current state to `dest_path`,
    /// holding the reader lock for the duration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StoreError::Io`] if `dest_path` cannot be
    /// created or written.
    pub fn snapshot_to(&self, dest_path: &Path) -> Result<()> {
        let state = self.state.read();
        write(&state, dest_path)
    }
}

/// Builds the compacted snapshot body for `state` and writes it to
/// `dest_path` as a complete, self-contained log file.
pub fn write(state: &StoreState, dest_path: &Path) -> Result<()> {
    let mut body = Writer::new();

    for (_, topic) in state.arena.iter() {
        body.write_u8(Opcode::NewTopic.to_byte()).write_u32(topic.id);
        body.write_str(&topic.subject)?;

        for post in &topic.posts {
            if post.is_deleted() {
                continue;
            }
            let obf_ip = crypto::xor_token(post.ip_token, &state.config.salt, post.created_at, topic.id, post.id);
            let obf_user =
                crypto::xor_token(post.user_token, &state.config.salt, post.created_at, topic.id, post.id);
            body.write_u8(Opcode::NewPost.to_byte());
            body.write_u32(topic.id).write_u16(post.id).write_u8(post.status.to_byte());
            body.write_u32(post.created_at).write_bytes8(obf_ip).write_bytes8(obf_user);
            body.write_str(&post.message)?;

            if let Some(image) = &post.image {
                body.write_u8(Opcode::AttachImage.to_byte()).write_u32(topic.id).write_u16(post.id);
                body.write_str(&image.path)?;
                body.write_str(&image.name)?;
                body.write_u32(image.size).write_u16(image.width).write_u16(image.height);
            }
        }

        if topic.flags.locked {
            body.write_u8(Opcode::ToggleLocked.to_byte()).write_u32(topic.id);
        }
        if topic.flags.free_reply {
            body.write_u8(Opcode::ToggleFreeReply.to_byte()).write_u32(topic.id);
        }
        if topic.flags.saged {
            body.write_u8(Opcode::ToggleSaged.to_byte()).write_u32(topic.id);
        }
        if topic.flags.sticky {
            body.write_u8(Opcode::ToggleSticky.to_byte()).write_u32(topic.id);
        }
    }

    body.write_u8(Opcode::TopicsCount.to_byte()).write_u32(state.topics_count);

    for token in &state.blocked {
        body.write_u8(Opcode::ToggleBlock.to_byte()).write_bytes8(*token);
    }

    let config_json = serde_json::to_string(&state.config).unwrap_or_default();
    body.write_u8(Opcode::SetConfig.to_byte());
    body.write_str(&config_json)?;

    body.write_u8(Opcode::SetMaxLiveTopics.to_byte()).write_u32(state.max_live_topics);

    let body = body.into_bytes();
    let end = HEADER_LEN + body.len() as u64;

    let mut out = Vec::with_capacity(usize::try_from(end).unwrap_or(body.len()));
    out.extend_from_slice(&MAGIC);
    out.push(0);
    out.extend_from_slice(&end.to_be_bytes()[2..8]);
    out.extend_from_slice(&end.to_be_bytes()[2..8]);
    out.extend_from_slice(&body);

    if dest_path.exists() {
        fs::remove_file(dest_path)?;
    }
    fs::write(dest_path, out)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::tempdir;

    use crate::log::LogFile;
    use crate::model::{ForumConfig, Post, PostStatus, Topic, TopicFlags};
    use crate::store::arena::Arena;

    use super::*;

    fn topic(id: u32) -> Topic {
        Topic {
            id,
            subject: format!("t{id}"),
            created_at: 1,
            modified_at: 1,
            flags: TopicFlags { sticky: true, ..TopicFlags::default() },
            posts: vec![Post {
                id: 1,
                created_at: 1,
                user_token: [1; 8],
                ip_token: [2; 8],
                status: PostStatus::default(),
                message: "hi".into(),
                image: None,
            }],
        }
    }

    #[test]
    fn snapshot_round_trips_through_replay() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("main.txt");
        LogFile::create(&log_path).unwrap();
        let log = LogFile::open(&log_path).unwrap();

        let mut arena = Arena::new();
        arena.insert_after(None, topic(1));

        let state = StoreState {
            log,
            arena,
            topics_count: 1,
            blocked: std::collections::HashSet::from([[9u8; 8]]),
            sticky_tail: None,
            max_live_topics: 10,
            config: ForumConfig::default(),
        };

        let dest = dir.path().join("main.txt.snapshot");
        write(&state, &dest).unwrap();

        let mut snap = LogFile::open(&dest).unwrap();
        let bytes = snap.read_committed().unwrap();
        let replayed = crate::store::replay::replay(&bytes).unwrap();
        assert_eq!(replayed.topics_count, 1);
        assert!(replayed.blocked.contains(&[9u8; 8]));
    }
}
