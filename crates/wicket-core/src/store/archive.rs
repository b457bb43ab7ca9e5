//! Archive job: demotes overflow topics to per-topic files, path-sharded by
//! ID, so the live arena never grows past `max_live_topics`.
//!
//! Triggered from [`super::mutators`] on new-topic creation and on
//! `SetMaxLiveTopics` shrink. Archiving a topic writes a standalone framed
//! blob (no header — just the topic's own `T`/`P`/`I`/`W` records, deleted
//! posts dropped), then appends an `A` record to the main log and unlinks
//! the topic from the live list.

use std::fs;
use std::path::{Path, PathBuf};

use wicket_codec::Writer;

use crate::crypto;
use crate::error::Result;
use crate::model::{PostStatus, Topic};
use crate::opcode::Opcode;

use super::StoreState;

/// Runs the archive job: while the arena holds more than
/// `state.max_live_topics` live topics, archives from the tail.
///
/// # Errors
///
/// Returns [`crate::error::StoreError::Io`] if writing an archive file or
/// appending to the main log fails. A failure leaves the offending topic
/// live; topics already archived earlier in the same call stay archived.
pub fn run(state: &mut StoreState, log_path: &Path) -> Result<()> {
    while state.arena.len() > state.max_live_topics as usize {
        let Some(tail) = tail_index(state) else { break };
        let Some(topic) = state.arena.get(tail) else { break };
        let topic_id = topic.id;

        let archive_path = build_archive_path(log_path, topic_id);
        fs::create_dir_all(archive_path.parent().unwrap_or(&archive_path))?;
        fs::write(&archive_path, serialize_topic(topic, &state.config.salt)?)?;

        let mut w = Writer::new();
        w.write_u8(Opcode::Archive.to_byte()).write_u32(topic_id);
        state.log.append(&w.into_bytes())?;

        if state.sticky_tail == Some(tail) {
            state.sticky_tail = state.arena.prev_of(tail);
        }
        state.arena.unlink(tail);
    }
    Ok(())
}

fn tail_index(state: &StoreState) -> Option<u32> {
    let mut cur = state.arena.head()?;
    loop {
        match state.arena.next_of(cur) {
            Some(next) => cur = next,
            None => return Some(cur),
        }
    }
}

/// `archive/{id/100000}/{id/1000}/{id}`, relative to the main log's parent
/// directory.
fn build_archive_path(log_path: &Path, topic_id: u32) -> PathBuf {
    let root = log_path.parent().unwrap_or_else(|| Path::new("."));
    root.join("archive")
        .join((topic_id / 100_000).to_string())
        .join((topic_id / 1000).to_string())
        .join(topic_id.to_string())
}

fn serialize_topic(topic: &Topic, salt: &[u8; 16]) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.write_u8(Opcode::NewTopic.to_byte()).write_u32(topic.id);
    w.write_str(&topic.subject)?;

    for post in &topic.posts {
        if post.is_deleted() {
            continue;
        }
        let obf_ip = crypto::xor_token(post.ip_token, salt, post.created_at, topic.id, post.id);
        let obf_user = crypto::xor_token(post.user_token, salt, post.created_at, topic.id, post.id);
        w.write_u8(Opcode::NewPost.to_byte());
        w.write_u32(topic.id).write_u16(post.id).write_u8(0).write_u32(post.created_at);
        w.write_bytes8(obf_ip).write_bytes8(obf_user);
        w.write_str(&post.message)?;

        if let Some(image) = &post.image {
            w.write_u8(Opcode::AttachImage.to_byte()).write_u32(topic.id).write_u16(post.id);
            w.write_str(&image.path)?;
            w.write_str(&image.name)?;
            w.write_u32(image.size).write_u16(image.width).write_u16(image.height);
        }
        if post.status.has(PostStatus::NSFW) {
            w.write_u8(Opcode::ToggleNsfw.to_byte()).write_u32(topic.id).write_u16(post.id);
        }
    }

    Ok(w.into_bytes())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use tempfile::tempdir;

    use crate::model::{Post, TopicFlags};
    use crate::store::arena::Arena;

    use super::*;

    fn topic(id: u32, msg: &str) -> Topic {
        Topic {
            id,
            subject: format!("t{id}"),
            created_at: 1,
            modified_at: 1,
            flags: TopicFlags::default(),
            posts: vec![Post {
                id: 1,
                created_at: 1,
                user_token: [1; 8],
                ip_token: [2; 8],
                status: PostStatus::default(),
                message: msg.to_string(),
                image: None,
            }],
        }
    }

    fn state_with(log_path: &std::path::Path, topics: Vec<Topic>, max: u32) -> StoreState {
        crate::log::LogFile::create(log_path).unwrap();
        let log = crate::log::LogFile::open(log_path).unwrap();
        let mut arena = Arena::new();
        let mut tail = None;
        for t in topics {
            tail = Some(arena.insert_after(tail, t));
        }
        StoreState {
            log,
            arena,
            topics_count: 2,
            blocked: std::collections::HashSet::new(),
            sticky_tail: None,
            max_live_topics: max,
            config: crate::model::ForumConfig::default(),
        }
    }

    #[test]
    fn archives_overflow_topics_from_tail() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("main.txt");
        let mut state = state_with(&log_path, vec![topic(1, "first"), topic(2, "second")], 1);

        run(&mut state, &log_path).unwrap();

        assert_eq!(state.arena.len(), 1);
        assert_eq!(state.arena.head().map(|i| state.arena.get(i).unwrap().id), Some(1));

        let archived_path: PathBuf =
            dir.path().join("archive").join("0").join("0").join("2");
        assert!(archived_path.exists());
        let bytes = std::fs::read(&archived_path).unwrap();
        assert_eq!(bytes[0], Opcode::NewTopic.to_byte());
    }

    #[test]
    fn does_nothing_when_under_cap() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("main.txt");
        let mut state = state_with(&log_path, vec![topic(1, "only")], 10);

        run(&mut state, &log_path).unwrap();
        assert_eq!(state.arena.len(), 1);
    }
}
