//! Opcode replayer: rebuilds in-memory store state from a log's raw record
//! bytes.
//!
//! A single function dispatches on [`Opcode`] and applies each record to an
//! [`Arena`], mirroring exactly the ordering policy the live mutators apply
//! (see `store::mod`), so replaying a log always reaches the same state the
//! mutators produced when they wrote it.

use std::collections::HashSet;

use wicket_codec::Reader;

use crate::crypto;
use crate::error::{Result, StoreError};
use crate::model::{Image, Post, PostStatus, Topic, TopicFlags};
use crate::opcode::Opcode;
use crate::store::arena::Arena;

/// Everything an opcode stream can rebuild.
///
/// Config and max-live-topics are `Option` because archive files (which
/// never carry `C`/`M` records, only a single topic's `T`/`P`/`I`/`a`/`W`
/// records) leave them unset.
#[derive(Debug, Default)]
pub struct Replayed {
    /// Live topics in list order, with sticky promotion already applied.
    pub arena: Arena,
    /// The `topicsCount` allocator value, as of the most recent `T` or `t`.
    pub topics_count: u32,
    /// Blocked identity/IP tokens.
    pub blocked: HashSet<[u8; 8]>,
    /// The most recent `C` record's raw JSON body, if any.
    pub config_json: Option<String>,
    /// The most recent `M` record's value, if any.
    pub max_live_topics: Option<u32>,
    /// The arena index of the last (most recently promoted) sticky topic,
    /// or `None` if no topic is currently sticky. Needed by the caller to
    /// continue appending new stickies/non-stickies in the right place.
    pub sticky_tail: Option<u32>,
}

/// Replays a byte stream of concatenated opcode records (no header) into
/// [`Replayed`] state.
///
/// # Errors
///
/// Returns [`StoreError::Corruption`] on any structural violation: an
/// unrecognised opcode, a string failing its CRC-8 check, a reference to an
/// unknown topic or post, or a post position that does not equal
/// `len(topic.posts) + 1`.
pub fn replay(bytes: &[u8]) -> Result<Replayed> {
    let mut r = Reader::new(bytes);
    let mut state = Replayed::default();

    while !r.is_empty() {
        let op = r.read_u8()?;
        let opcode = Opcode::from_byte(op)
            .ok_or_else(|| StoreError::Corruption(format!("unknown opcode {op:#x}")))?;
        apply(opcode, &mut r, &mut state)?;
    }

    Ok(state)
}

fn apply(opcode: Opcode, r: &mut Reader<'_>, state: &mut Replayed) -> Result<()> {
    match opcode {
        Opcode::NewTopic => {
            let id = r.read_u32()?;
            let subject = r.read_string()?;
            if state.arena.index_of(id).is_some() {
                return Err(StoreError::Corruption(format!("topic {id} already exists")));
            }
            let topic = Topic {
                id,
                subject,
                created_at: 0,
                modified_at: 0,
                flags: TopicFlags::default(),
                posts: Vec::new(),
            };
            let idx = state.arena.insert_after(state.sticky_tail, topic);
            let _ = idx;
            state.topics_count += 1;
        }
        Opcode::TopicsCount => {
            state.topics_count = r.read_u32()?;
        }
        Opcode::NewPost => {
            let topic_id = r.read_u32()?;
            let post_id = r.read_u16()?;
            let status = PostStatus::from_byte(r.read_u8()?);
            let created_at = r.read_u32()?;
            let ip_token = r.read_bytes8()?;
            let user_token = r.read_bytes8()?;
            let message = r.read_string()?;

            let idx = get_idx(&state.arena, topic_id)?;
            let saged = {
                let topic = arena_get_mut(&mut state.arena, idx)?;
                let expected = u16::try_from(topic.posts.len() + 1)
                    .map_err(|_| StoreError::Corruption("topic post count overflowed u16".into()))?;
                if post_id != expected {
                    return Err(StoreError::Corruption(format!(
                        "post {post_id} out of order in topic {topic_id}, expected {expected}"
                    )));
                }
                if topic.posts.len() >= 4000 {
                    return Err(StoreError::Corruption(format!("topic {topic_id} exceeds 4000 posts")));
                }
                if topic.posts.is_empty() {
                    topic.created_at = created_at;
                } else {
                    topic.modified_at = created_at;
                }
                topic.posts.push(Post {
                    id: post_id,
                    created_at,
                    user_token,
                    ip_token,
                    status,
                    message,
                    image: None,
                });
                topic.flags.saged
            };

            if !saged {
                state.arena.move_after(idx, state.sticky_tail);
            }
        }
        Opcode::AppendPost => {
            let topic_id = r.read_u32()?;
            let post_id = r.read_u16()?;
            let extra = r.read_string()?;
            find_post_mut(&mut state.arena, topic_id, post_id)?.message.push_str(&extra);
        }
        Opcode::AttachImage => {
            let topic_id = r.read_u32()?;
            let post_id = r.read_u16()?;
            let path = r.read_string()?;
            let name = r.read_string()?;
            let size = r.read_u32()?;
            let width = r.read_u16()?;
            let height = r.read_u16()?;
            find_post_mut(&mut state.arena, topic_id, post_id)?.image =
                Some(Image { path, name, size, width, height });
        }
        Opcode::ToggleDeleted => {
            let topic_id = r.read_u32()?;
            let post_id = r.read_u16()?;
            find_post_mut(&mut state.arena, topic_id, post_id)?.status.toggle(PostStatus::DELETED);
        }
        Opcode::ToggleNsfw => {
            let topic_id = r.read_u32()?;
            let post_id = r.read_u16()?;
            find_post_mut(&mut state.arena, topic_id, post_id)?.status.toggle(PostStatus::NSFW);
        }
        Opcode::ToggleBlock => {
            let token = r.read_bytes8()?;
            if !state.blocked.remove(&token) {
                state.blocked.insert(token);
            }
        }
        Opcode::ToggleSticky => {
            let topic_id = r.read_u32()?;
            let idx = get_idx(&state.arena, topic_id)?;
            let now_sticky = {
                let topic = arena_get_mut(&mut state.arena, idx)?;
                topic.flags.sticky = !topic.flags.sticky;
                topic.flags.sticky
            };
            if now_sticky {
                state.arena.move_after(idx, state.sticky_tail);
                state.sticky_tail = Some(idx);
            } else {
                if state.sticky_tail == Some(idx) {
                    state.sticky_tail = state.arena.prev_of(idx);
                }
                state.arena.move_after(idx, state.sticky_tail);
            }
        }
        Opcode::ToggleLocked => {
            let topic_id = r.read_u32()?;
            let idx = get_idx(&state.arena, topic_id)?;
            arena_get_mut(&mut state.arena, idx)?.flags.locked ^= true;
        }
        Opcode::ToggleFreeReply => {
            let topic_id = r.read_u32()?;
            let idx = get_idx(&state.arena, topic_id)?;
            arena_get_mut(&mut state.arena, idx)?.flags.free_reply ^= true;
        }
        Opcode::ToggleSaged => {
            let topic_id = r.read_u32()?;
            let idx = get_idx(&state.arena, topic_id)?;
            arena_get_mut(&mut state.arena, idx)?.flags.saged ^= true;
        }
        Opcode::Archive | Opcode::Purge => {
            let topic_id = r.read_u32()?;
            let idx = get_idx(&state.arena, topic_id)?;
            if state.sticky_tail == Some(idx) {
                state.sticky_tail = state.arena.prev_of(idx);
            }
            state.arena.unlink(idx);
        }
        Opcode::SetConfig => {
            state.config_json = Some(r.read_string()?);
        }
        Opcode::SetMaxLiveTopics => {
            state.max_live_topics = Some(r.read_u32()?);
        }
    }
    Ok(())
}

/// Recovers every post's raw identity/IP token from the obfuscated bytes
/// the wire format carries.
///
/// [`apply`] stores the `NewPost` record's `ip_token`/`user_token` fields
/// verbatim, since the forum salt (needed to undo the XOR mask) is only
/// known once a `C` record has been seen and parsed — which may be
/// anywhere in the stream, including after the posts it would apply to.
/// Callers run this once, after `replay` returns and the salt is in hand.
pub fn deobfuscate_tokens(arena: &mut Arena, salt: &[u8; 16]) {
    let indices: Vec<u32> = arena.iter().map(|(idx, _)| idx).collect();
    for idx in indices {
        let Some(topic) = arena.get_mut(idx) else { continue };
        let topic_id = topic.id;
        for post in &mut topic.posts {
            post.ip_token = crypto::xor_token(post.ip_token, salt, post.created_at, topic_id, post.id);
            post.user_token = crypto::xor_token(post.user_token, salt, post.created_at, topic_id, post.id);
        }
    }
}

fn get_idx(arena: &Arena, topic_id: u32) -> Result<u32> {
    arena
        .index_of(topic_id)
        .ok_or_else(|| StoreError::Corruption(format!("operation references unknown topic {topic_id}")))
}

fn arena_get_mut(arena: &mut Arena, idx: u32) -> Result<&mut Topic> {
    arena
        .get_mut(idx)
        .ok_or_else(|| StoreError::Corruption("arena index desynced from id map".into()))
}

fn find_post_mut<'a>(arena: &'a mut Arena, topic_id: u32, post_id: u16) -> Result<&'a mut Post> {
    let idx = get_idx(arena, topic_id)?;
    let topic = arena_get_mut(arena, idx)?;
    let pos = usize::from(post_id)
        .checked_sub(1)
        .ok_or_else(|| StoreError::Corruption("post id 0 is invalid".into()))?;
    topic
        .posts
        .get_mut(pos)
        .ok_or_else(|| StoreError::Corruption(format!("unknown post {post_id} in topic {topic_id}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wicket_codec::Writer;

    use super::*;

    fn topic_record(id: u32, subject: &str) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u8(Opcode::NewTopic.to_byte());
        w.write_u32(id);
        w.write_str(subject).unwrap();
        w.into_bytes()
    }

    fn post_record(topic_id: u32, post_id: u16, msg: &str) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u8(Opcode::NewPost.to_byte());
        w.write_u32(topic_id).write_u16(post_id).write_u8(0).write_u32(1000);
        w.write_bytes8([0; 8]).write_bytes8([0; 8]);
        w.write_str(msg).unwrap();
        w.into_bytes()
    }

    #[test]
    fn replays_topic_and_post() {
        let mut bytes = topic_record(1, "hi");
        bytes.extend(post_record(1, 1, "hello"));

        let state = replay(&bytes).unwrap();
        assert_eq!(state.topics_count, 1);
        let idx = state.arena.index_of(1).unwrap();
        let topic = state.arena.get(idx).unwrap();
        assert_eq!(topic.posts.len(), 1);
        assert_eq!(topic.posts[0].message, "hello");
    }

    #[test]
    fn out_of_order_post_is_corruption() {
        let mut bytes = topic_record(1, "hi");
        bytes.extend(post_record(1, 2, "oops"));
        assert!(replay(&bytes).is_err());
    }

    #[test]
    fn post_to_unknown_topic_is_corruption() {
        let bytes = post_record(9, 1, "oops");
        assert!(replay(&bytes).is_err());
    }

    #[test]
    fn deobfuscate_tokens_recovers_raw_values() {
        let salt = [3u8; 16];
        let raw_ip = [1u8; 8];
        let raw_user = [2u8; 8];
        let obf_ip = crypto::xor_token(raw_ip, &salt, 1000, 1, 1);
        let obf_user = crypto::xor_token(raw_user, &salt, 1000, 1, 1);

        let mut w = Writer::new();
        w.write_u8(Opcode::NewPost.to_byte());
        w.write_u32(1).write_u16(1).write_u8(0).write_u32(1000);
        w.write_bytes8(obf_ip).write_bytes8(obf_user);
        w.write_str("hi").unwrap();

        let mut bytes = topic_record(1, "t");
        bytes.extend(w.into_bytes());

        let mut state = replay(&bytes).unwrap();
        deobfuscate_tokens(&mut state.arena, &salt);

        let idx = state.arena.index_of(1).unwrap();
        let post = &state.arena.get(idx).unwrap().posts[0];
        assert_eq!(post.ip_token, raw_ip);
        assert_eq!(post.user_token, raw_user);
    }

    #[test]
    fn sticky_promotes_above_non_sticky() {
        let mut bytes = topic_record(1, "a");
        bytes.extend(post_record(1, 1, "a1"));
        bytes.extend(topic_record(2, "b"));
        bytes.extend(post_record(2, 1, "b1"));
        let mut w = Writer::new();
        w.write_u8(Opcode::ToggleSticky.to_byte()).write_u32(1);
        bytes.extend(w.into_bytes());

        let state = replay(&bytes).unwrap();
        let order: Vec<u32> = state.arena.iter().map(|(_, t)| t.id).collect();
        assert_eq!(order, vec![1, 2]);
    }
}
