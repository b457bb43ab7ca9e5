//! Store mutators: `NewTopic`, `NewPost`, `OperateTopic`, `DeletePost`,
//! `FlagPost`, `Block`, `AppendPost`, `SetMaxLiveTopics`, `UpdateConfig`.
//!
//! Every mutator here follows the same shape: append the opcode(s) under
//! the writer lock, then apply the identical mutation the replayer would
//! apply to those same bytes. If the append fails, the function returns
//! before touching in-memory state, so a failed write never leaves the log
//! and the arena disagreeing.

use wicket_codec::Writer;

use crate::crypto;
use crate::error::{Result, StoreError};
use crate::identity;
use crate::longid;
use crate::model::{ForumConfig, Image, PermissionMask, Post, PostStatus, Topic, TopicFlags, User};
use crate::opcode::Opcode;

use super::archive;
use super::{Store, unix_now};

/// The four single-bit topic operations plus purge, dispatched by
/// [`Store::operate_topic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicOp {
    /// `S` — toggle sticky.
    Sticky,
    /// `L` — toggle locked.
    Locked,
    /// `F` — toggle free-reply.
    FreeReply,
    /// `G` — toggle saged.
    Saged,
    /// `X` — purge (unlink without archiving).
    Purge,
}

impl Store {
    /// Runs the anti-abuse gate every new topic/post submission must pass:
    /// per-identity cool-down, one-shot compose-UUID dedup, and the dice-roll
    /// challenge. Called before the writer lock is taken, since a failed
    /// challenge may itself call [`Self::block`], which takes that lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RateLimited`] if `user`/`ip_token` is still
    /// inside its cool-down window or `uuid` has already been submitted,
    /// [`StoreError::ChallengeRequired`] if the dice roll demands a
    /// challenge the caller hasn't answered yet, and
    /// [`StoreError::ChallengeFailed`] if the caller's answer was wrong (this
    /// also counts a strike towards the auto-block threshold).
    fn gate_submission(
        &self,
        user: &User,
        ip_token: [u8; 8],
        uuid: [u8; 16],
        now: u32,
        challenge_response: Option<bool>,
    ) -> Result<()> {
        let cooldown_secs = self.config().cooldown_secs;
        let cooldown_key = if user.is_valid() { user.id } else { ip_token };
        self.cooldown.check_and_record(cooldown_key, now, cooldown_secs)?;
        self.uuid_dedup.check_and_record(uuid)?;

        if identity::roll_challenge(user, &mut rand::thread_rng()) {
            match challenge_response {
                None => return Err(StoreError::ChallengeRequired),
                Some(false) => {
                    if self.bad_users.record_failure(user.id) {
                        self.block(user.id)?;
                    }
                    return Err(StoreError::ChallengeFailed);
                }
                Some(true) => self.bad_users.clear(&user.id),
            }
        }
        Ok(())
    }

    /// Creates a new topic with its first post, returning the packed
    /// long-ID of that post.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TooMany`] if the topic ID space (`u32`) is
    /// exhausted, and anything [`Self::gate_submission`] returns.
    #[allow(clippy::too_many_arguments)]
    pub fn new_topic(
        &self,
        subject: &str,
        message: &str,
        image: Option<Image>,
        user: &User,
        ip_token: [u8; 8],
        uuid: [u8; 16],
        challenge_response: Option<bool>,
        sage: bool,
    ) -> Result<u64> {
        let now = unix_now();
        self.gate_submission(user, ip_token, uuid, now, challenge_response)?;

        let mut state = self.state.write();
        let topic_id = state
            .topics_count
            .checked_add(1)
            .ok_or_else(|| StoreError::TooMany("topic ID space exhausted".into()))?;

        let mut w = Writer::new();
        w.write_u8(Opcode::NewTopic.to_byte()).write_u32(topic_id);
        w.write_str(subject)?;
        state.log.append(&w.into_bytes())?;

        let salt = state.config.salt;
        let obf_ip = crypto::xor_token(ip_token, &salt, now, topic_id, 1);
        let obf_user = crypto::xor_token(user.id, &salt, now, topic_id, 1);
        let mut w = Writer::new();
        w.write_u8(Opcode::NewPost.to_byte());
        w.write_u32(topic_id).write_u16(1).write_u8(0).write_u32(now);
        w.write_bytes8(obf_ip).write_bytes8(obf_user);
        w.write_str(message)?;
        state.log.append(&w.into_bytes())?;

        if let Some(img) = &image {
            state.log.append(&attach_image_record(topic_id, 1, img)?)?;
        }
        if sage {
            let mut w = Writer::new();
            w.write_u8(Opcode::ToggleSaged.to_byte()).write_u32(topic_id);
            state.log.append(&w.into_bytes())?;
        }

        let topic = Topic {
            id: topic_id,
            subject: subject.to_string(),
            created_at: now,
            modified_at: 0,
            flags: TopicFlags { saged: sage, ..TopicFlags::default() },
            posts: vec![Post {
                id: 1,
                created_at: now,
                user_token: user.id,
                ip_token,
                status: PostStatus::default(),
                message: message.to_string(),
                image,
            }],
        };
        state.arena.insert_after(state.sticky_tail, topic);
        state.topics_count = topic_id;

        if state.arena.len() > state.max_live_topics as usize {
            archive::run(&mut state, &self.path)?;
        }

        Ok(longid::pack_long_id(topic_id, 1))
    }

    /// Appends a post to an existing topic, returning the packed long-ID of
    /// the new post.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if `topic_id` is not live,
    /// [`StoreError::Permission`] if the topic is locked,
    /// [`StoreError::TooMany`] if the topic already holds 4000 posts (the
    /// topic is locked as a side effect of this case), and anything
    /// [`Self::gate_submission`] returns.
    #[allow(clippy::too_many_arguments)]
    pub fn new_post(
        &self,
        topic_id: u32,
        message: &str,
        image: Option<Image>,
        user: &User,
        ip_token: [u8; 8],
        uuid: [u8; 16],
        challenge_response: Option<bool>,
        sage: bool,
    ) -> Result<u64> {
        let now = unix_now();
        self.gate_submission(user, ip_token, uuid, now, challenge_response)?;

        let mut state = self.state.write();
        let idx = state
            .arena
            .index_of(topic_id)
            .ok_or_else(|| StoreError::NotFound(format!("topic {topic_id}")))?;

        let (post_id, already_locked, saged) = {
            let topic = state
                .arena
                .get(idx)
                .ok_or_else(|| StoreError::Corruption("topic vanished under writer lock".into()))?;
            (
                u16::try_from(topic.posts.len() + 1).unwrap_or(u16::MAX),
                topic.flags.locked,
                topic.flags.saged || sage,
            )
        };
        if already_locked {
            return Err(StoreError::Permission(format!("topic {topic_id} is locked")));
        }

        if usize::from(post_id) > 4000 {
            let mut w = Writer::new();
            w.write_u8(Opcode::ToggleLocked.to_byte()).write_u32(topic_id);
            state.log.append(&w.into_bytes())?;
            state
                .arena
                .get_mut(idx)
                .ok_or_else(|| StoreError::Corruption("topic vanished under writer lock".into()))?
                .flags
                .locked = true;
            return Err(StoreError::TooMany(format!("topic {topic_id} already holds 4000 posts")));
        }

        let salt = state.config.salt;
        let obf_ip = crypto::xor_token(ip_token, &salt, now, topic_id, post_id);
        let obf_user = crypto::xor_token(user.id, &salt, now, topic_id, post_id);
        let mut w = Writer::new();
        w.write_u8(Opcode::NewPost.to_byte());
        w.write_u32(topic_id).write_u16(post_id).write_u8(0).write_u32(now);
        w.write_bytes8(obf_ip).write_bytes8(obf_user);
        w.write_str(message)?;
        state.log.append(&w.into_bytes())?;

        if let Some(img) = &image {
            state.log.append(&attach_image_record(topic_id, post_id, img)?)?;
        }

        {
            let topic = state
                .arena
                .get_mut(idx)
                .ok_or_else(|| StoreError::Corruption("topic vanished under writer lock".into()))?;
            topic.modified_at = now;
            topic.posts.push(Post {
                id: post_id,
                created_at: now,
                user_token: user.id,
                ip_token,
                status: PostStatus::default(),
                message: message.to_string(),
                image,
            });
        }

        if !saged {
            let sticky_tail = state.sticky_tail;
            state.arena.move_after(idx, sticky_tail);
        }

        Ok(longid::pack_long_id(topic_id, post_id))
    }

    /// Toggles a topic-wide flag, or purges the topic outright.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if `topic_id` is not live.
    pub fn operate_topic(&self, topic_id: u32, op: TopicOp) -> Result<()> {
        let mut state = self.state.write();
        let idx = state
            .arena
            .index_of(topic_id)
            .ok_or_else(|| StoreError::NotFound(format!("topic {topic_id}")))?;

        let byte = match op {
            TopicOp::Sticky => Opcode::ToggleSticky,
            TopicOp::Locked => Opcode::ToggleLocked,
            TopicOp::FreeReply => Opcode::ToggleFreeReply,
            TopicOp::Saged => Opcode::ToggleSaged,
            TopicOp::Purge => Opcode::Purge,
        };
        let mut w = Writer::new();
        w.write_u8(byte.to_byte()).write_u32(topic_id);
        state.log.append(&w.into_bytes())?;

        match op {
            TopicOp::Sticky => {
                let now_sticky = {
                    let topic = state
                        .arena
                        .get_mut(idx)
                        .ok_or_else(|| StoreError::Corruption("topic vanished under writer lock".into()))?;
                    topic.flags.sticky = !topic.flags.sticky;
                    topic.flags.sticky
                };
                if now_sticky {
                    let sticky_tail = state.sticky_tail;
                    state.arena.move_after(idx, sticky_tail);
                    state.sticky_tail = Some(idx);
                } else {
                    if state.sticky_tail == Some(idx) {
                        state.sticky_tail = state.arena.prev_of(idx);
                    }
                    let sticky_tail = state.sticky_tail;
                    state.arena.move_after(idx, sticky_tail);
                }
            }
            TopicOp::Locked => {
                state
                    .arena
                    .get_mut(idx)
                    .ok_or_else(|| StoreError::Corruption("topic vanished under writer lock".into()))?
                    .flags
                    .locked ^= true;
            }
            TopicOp::FreeReply => {
                state
                    .arena
                    .get_mut(idx)
                    .ok_or_else(|| StoreError::Corruption("topic vanished under writer lock".into()))?
                    .flags
                    .free_reply ^= true;
            }
            TopicOp::Saged => {
                state
                    .arena
                    .get_mut(idx)
                    .ok_or_else(|| StoreError::Corruption("topic vanished under writer lock".into()))?
                    .flags
                    .saged ^= true;
            }
            TopicOp::Purge => {
                if state.sticky_tail == Some(idx) {
                    state.sticky_tail = state.arena.prev_of(idx);
                }
                state.arena.unlink(idx);
            }
        }

        Ok(())
    }

    /// Deletes (or undeletes — the bit is a toggle) a post, or just its
    /// attached image when `image_only` is set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if `post_long_id` doesn't resolve to
    /// a live post, and [`StoreError::Permission`] if `user` lacks
    /// `LOCK_SAGE_DELETE` and isn't the post's own author.
    pub fn delete_post(
        &self,
        user: &User,
        post_long_id: u64,
        image_only: bool,
        on_image_delete: impl FnOnce(&Image),
    ) -> Result<()> {
        let mut state = self.state.write();
        let (topic_id, post_id) = longid::split_long_id(post_long_id)?;
        let idx = state
            .arena
            .index_of(topic_id)
            .ok_or_else(|| StoreError::NotFound(format!("topic {topic_id}")))?;

        let owner_token = {
            let topic = state
                .arena
                .get(idx)
                .ok_or_else(|| StoreError::Corruption("topic vanished under writer lock".into()))?;
            let post = topic
                .posts
                .get(usize::from(post_id) - 1)
                .ok_or_else(|| StoreError::NotFound(format!("post {post_id}")))?;
            post.user_token
        };
        if !user.permissions().can(PermissionMask::LOCK_SAGE_DELETE) && user.id != owner_token {
            return Err(StoreError::Permission("cannot delete this post".into()));
        }

        if !image_only {
            let mut w = Writer::new();
            w.write_u8(Opcode::ToggleDeleted.to_byte()).write_u32(topic_id).write_u16(post_id);
            state.log.append(&w.into_bytes())?;
        }

        let topic = state
            .arena
            .get_mut(idx)
            .ok_or_else(|| StoreError::Corruption("topic vanished under writer lock".into()))?;
        let post = topic
            .posts
            .get_mut(usize::from(post_id) - 1)
            .ok_or_else(|| StoreError::NotFound(format!("post {post_id}")))?;
        if !image_only {
            post.status.toggle(PostStatus::DELETED);
        }
        if let Some(image) = &post.image {
            on_image_delete(image);
        }

        Ok(())
    }

    /// Toggles the NSFW flag on a post (the generic bit-toggle path; NSFW
    /// is the only flag currently routed through it).
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::delete_post`].
    pub fn flag_post(&self, user: &User, post_long_id: u64) -> Result<()> {
        let mut state = self.state.write();
        let (topic_id, post_id) = longid::split_long_id(post_long_id)?;
        let idx = state
            .arena
            .index_of(topic_id)
            .ok_or_else(|| StoreError::NotFound(format!("topic {topic_id}")))?;

        let owner_token = {
            let topic = state
                .arena
                .get(idx)
                .ok_or_else(|| StoreError::Corruption("topic vanished under writer lock".into()))?;
            let post = topic
                .posts
                .get(usize::from(post_id) - 1)
                .ok_or_else(|| StoreError::NotFound(format!("post {post_id}")))?;
            post.user_token
        };
        if !user.permissions().can(PermissionMask::LOCK_SAGE_DELETE) && user.id != owner_token {
            return Err(StoreError::Permission("cannot flag this post".into()));
        }

        let mut w = Writer::new();
        w.write_u8(Opcode::ToggleNsfw.to_byte()).write_u32(topic_id).write_u16(post_id);
        state.log.append(&w.into_bytes())?;

        let topic = state
            .arena
            .get_mut(idx)
            .ok_or_else(|| StoreError::Corruption("topic vanished under writer lock".into()))?;
        let post = topic
            .posts
            .get_mut(usize::from(post_id) - 1)
            .ok_or_else(|| StoreError::NotFound(format!("post {post_id}")))?;
        post.status.toggle(PostStatus::NSFW);
        Ok(())
    }

    /// Toggles membership of `token` in the blocked-identities/IPs set.
    /// A call with the all-zero token is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the append fails.
    pub fn block(&self, token: [u8; 8]) -> Result<()> {
        if token == [0; 8] {
            return Ok(());
        }
        let mut state = self.state.write();
        let mut w = Writer::new();
        w.write_u8(Opcode::ToggleBlock.to_byte()).write_bytes8(token);
        state.log.append(&w.into_bytes())?;

        if !state.blocked.remove(&token) {
            state.blocked.insert(token);
        }
        Ok(())
    }

    /// Concatenates `extra` onto an existing post's message. Callers are
    /// responsible for checking the `APPEND_ANNOUNCE` permission bit before
    /// calling this.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if `post_long_id` doesn't resolve.
    pub fn append_post(&self, post_long_id: u64, extra: &str) -> Result<()> {
        let mut state = self.state.write();
        let (topic_id, post_id) = longid::split_long_id(post_long_id)?;
        let idx = state
            .arena
            .index_of(topic_id)
            .ok_or_else(|| StoreError::NotFound(format!("topic {topic_id}")))?;

        let mut w = Writer::new();
        w.write_u8(Opcode::AppendPost.to_byte()).write_u32(topic_id).write_u16(post_id);
        w.write_str(extra)?;
        state.log.append(&w.into_bytes())?;

        let topic = state
            .arena
            .get_mut(idx)
            .ok_or_else(|| StoreError::Corruption("topic vanished under writer lock".into()))?;
        let post = topic
            .posts
            .get_mut(usize::from(post_id) - 1)
            .ok_or_else(|| StoreError::NotFound(format!("post {post_id}")))?;
        post.message.push_str(extra);
        Ok(())
    }

    /// Sets the maximum number of live topics, running the archive job
    /// first if this shrinks the cap below the current live count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the archive job or the append fails.
    pub fn set_max_live_topics(&self, n: u32) -> Result<()> {
        let mut state = self.state.write();
        if (n as usize) < state.arena.len() {
            state.max_live_topics = n;
            archive::run(&mut state, &self.path)?;
        }

        let mut w = Writer::new();
        w.write_u8(Opcode::SetMaxLiveTopics.to_byte()).write_u32(n);
        state.log.append(&w.into_bytes())?;
        state.max_live_topics = n;
        Ok(())
    }

    /// Replaces the forum configuration, persisting it as a `C` record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the append fails; the in-memory
    /// configuration is left unchanged in that case.
    pub fn update_config(&self, config: ForumConfig) -> Result<()> {
        let json = serde_json::to_string(&config)
            .map_err(|e| StoreError::InvalidInput(format!("config does not serialise: {e}")))?;

        let mut state = self.state.write();
        let mut w = Writer::new();
        w.write_u8(Opcode::SetConfig.to_byte());
        w.write_str(&json)?;
        state.log.append(&w.into_bytes())?;
        state.config = config;
        Ok(())
    }
}

fn attach_image_record(topic_id: u32, post_id: u16, image: &Image) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.write_u8(Opcode::AttachImage.to_byte()).write_u32(topic_id).write_u16(post_id);
    w.write_str(&image.path)?;
    w.write_str(&image.name)?;
    w.write_u32(image.size).write_u16(image.width).write_u16(image.height);
    Ok(w.into_bytes())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::longid;
    use crate::model::User;
    use crate::store::Store;

    fn open_store(dir: &std::path::Path) -> Store {
        let path = dir.join("main.txt");
        crate::log::LogFile::create(&path).unwrap();
        let store = Store::open(&path).unwrap();
        let mut config = store.config();
        config.cooldown_secs = 0;
        store.update_config(config).unwrap();
        store
    }

    fn uuid(n: u128) -> [u8; 16] {
        n.to_be_bytes()
    }

    #[test]
    fn new_topic_long_id_splits_to_first_post_and_replays_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let long_id = store
            .new_topic("hi", "hello", None, &User::anonymous(), [2; 8], uuid(1), None, false)
            .unwrap();
        assert_eq!(longid::split_long_id(long_id).unwrap(), (1, 1));

        let path = store.path().to_path_buf();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        let topic = reopened.get_topic(1).unwrap();
        assert_eq!(topic.subject, "hi");
        assert_eq!(topic.posts.len(), 1);
        assert_eq!(topic.posts[0].message, "hello");
    }

    #[test]
    fn the_4001st_post_fails_with_too_many_and_locks_the_topic() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store
            .new_topic("hi", "first", None, &User::anonymous(), [2; 8], uuid(0), None, false)
            .unwrap();

        for i in 0..3999 {
            store
                .new_post(1, "reply", None, &User::anonymous(), [2; 8], uuid(i + 1), None, false)
                .unwrap();
        }

        let err = store
            .new_post(1, "one too many", None, &User::anonymous(), [2; 8], uuid(4000), None, false)
            .unwrap_err();
        assert!(matches!(err, crate::error::StoreError::TooMany(_)));
        assert!(store.get_topic(1).unwrap().flags.locked);
    }

    #[test]
    fn sticky_topic_stays_on_top_and_sage_suppresses_promotion() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        store.new_topic("A", "first", None, &User::anonymous(), [2; 8], uuid(1), None, false).unwrap();
        store.operate_topic(1, super::TopicOp::Sticky).unwrap();
        store.new_topic("B", "first", None, &User::anonymous(), [2; 8], uuid(2), None, false).unwrap();

        let order: Vec<u32> = store.get_topics(0, 10).iter().map(|t| t.id).collect();
        assert_eq!(order, vec![1, 2]);

        store.operate_topic(1, super::TopicOp::Saged).unwrap();
        store
            .new_post(1, "a reply to a saged topic", None, &User::anonymous(), [2; 8], uuid(3), None, false)
            .unwrap();

        let order: Vec<u32> = store.get_topics(0, 10).iter().map(|t| t.id).collect();
        assert_eq!(order, vec![1, 2], "a saged topic must not be promoted by a new post");
    }
}
