//! Parses and applies the `!!op=value` moderation commands embedded in a
//! post's subject or body.
//!
//! A subject line is checked for exactly one of the two subject-only forms
//! (`!!append=` / `!!announce`); every `!!op=value` line in the body is
//! parsed independently and applied in order. Each command is gated on the
//! caller's [`PermissionMask`] before anything is written.

use wicket_core::model::{ForumConfig, PermissionMask, User};
use wicket_core::store::mutators::TopicOp;
use wicket_core::{Result, Store, StoreError};

/// A subject-line command: these only make sense attached to the post
/// being created, since they reference it by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectCommand {
    /// `!!append=<longid>`: appends the post body to the referenced post
    /// instead of creating a new one.
    Append {
        /// Packed `(topic_id, post_id)` of the post to extend.
        long_id: u64,
    },
    /// `!!announce`: replaces [`ForumConfig::announcement`] with the post
    /// body.
    Announce,
}

/// Looks for a subject-line command, returning the rest of the subject
/// unchanged (these commands don't carry inline text of their own — the
/// post body supplies it).
#[must_use]
pub fn parse_subject(subject: &str) -> Option<SubjectCommand> {
    if let Some(rest) = subject.strip_prefix("!!append=") {
        return rest.trim().parse().ok().map(|long_id| SubjectCommand::Append { long_id });
    }
    if subject.trim() == "!!announce" {
        return Some(SubjectCommand::Announce);
    }
    None
}

/// A single parsed `!!op=value` body line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyCommand {
    /// The `op` half of `!!op=value`.
    pub op: String,
    /// The `value` half of `!!op=value`.
    pub value: String,
}

/// Extracts every `!!op=value` line from `body`, in order.
#[must_use]
pub fn parse_body(body: &str) -> Vec<BodyCommand> {
    body.lines()
        .filter_map(|line| line.strip_prefix("!!"))
        .filter_map(|rest| rest.split_once('='))
        .map(|(op, value)| BodyCommand { op: op.trim().to_string(), value: value.trim().to_string() })
        .collect()
}

/// Applies one [`BodyCommand`] against `store` on behalf of `user`,
/// enforcing the permission bit each operation requires.
///
/// # Errors
///
/// Returns [`StoreError::Permission`] if `user`'s mask lacks the bit the
/// operation requires, [`StoreError::InvalidInput`] if `value` doesn't
/// parse for a numeric/topic/post-addressed operation, and whatever the
/// underlying [`Store`] mutator returns otherwise.
pub fn apply_body_command(store: &Store, user: &User, cmd: &BodyCommand) -> Result<()> {
    let perms = user.permissions();
    match cmd.op.as_str() {
        "stick" => require(perms, PermissionMask::STICKY_PURGE, || {
            store.operate_topic(parse_u32(&cmd.value)?, TopicOp::Sticky)
        }),
        "purge" => require(perms, PermissionMask::STICKY_PURGE, || {
            store.operate_topic(parse_u32(&cmd.value)?, TopicOp::Purge)
        }),
        "lock" => require(perms, PermissionMask::LOCK_SAGE_DELETE, || {
            store.operate_topic(parse_u32(&cmd.value)?, TopicOp::Locked)
        }),
        "sage" => require(perms, PermissionMask::LOCK_SAGE_DELETE, || {
            store.operate_topic(parse_u32(&cmd.value)?, TopicOp::Saged)
        }),
        "free-reply" => require(perms, PermissionMask::LOCK_SAGE_DELETE, || {
            store.operate_topic(parse_u32(&cmd.value)?, TopicOp::FreeReply)
        }),
        "delete" => require(perms, PermissionMask::LOCK_SAGE_DELETE, || {
            store.delete_post(user, parse_u64(&cmd.value)?, false, |_| {})
        }),
        "delete-image" => require(perms, PermissionMask::LOCK_SAGE_DELETE, || {
            store.delete_post(user, parse_u64(&cmd.value)?, true, |_| {})
        }),
        "block" => require(perms, PermissionMask::BLOCK, || {
            let long_id = parse_u64(&cmd.value)?;
            let topic = store
                .get_topic(wicket_core::longid::split_long_id(long_id)?.0)
                .ok_or_else(|| StoreError::NotFound("topic for block target".into()))?;
            let (_, post_id) = wicket_core::longid::split_long_id(long_id)?;
            let post = topic
                .posts
                .get(usize::from(post_id) - 1)
                .ok_or_else(|| StoreError::NotFound("post for block target".into()))?;
            store.block(post.user_token)
        }),
        "max-live-topics" => require(perms, PermissionMask::ADMIN, || {
            store.set_max_live_topics(parse_u32(&cmd.value)?)
        }),
        "max-message-len" => with_config(store, perms, |c| c.max_message_len = parse_usize(&cmd.value)?),
        "max-subject-len" => with_config(store, perms, |c| c.max_subject_len = parse_usize(&cmd.value)?),
        "search-timeout" => with_config(store, perms, |c| c.search_timeout_ms = parse_u64(&cmd.value)?),
        "cooldown" => with_config(store, perms, |c| c.cooldown_secs = parse_u32(&cmd.value)?),
        "max-image-size" => with_config(store, perms, |c| c.max_image_size_mb = parse_u32(&cmd.value)?),
        "title" => with_config(store, perms, |c| c.title = cmd.value.clone()),
        "url" => with_config(store, perms, |c| c.url = cmd.value.clone()),
        "moat" => apply_moat(store, perms, &cmd.value),
        other => Err(StoreError::InvalidInput(format!("unknown mod command {other:?}"))),
    }
}

/// `moat=cookie|image|recaptcha|production` toggles one of the anti-abuse
/// barriers. `production` has no corresponding runtime [`ForumConfig`]
/// field (production mode is fixed at process start via the `-s` flag) so
/// it is accepted but logged rather than acted on.
fn apply_moat(store: &Store, perms: PermissionMask, value: &str) -> Result<()> {
    match value {
        "cookie" => with_config(store, perms, |c| c.no_more_new_users = !c.no_more_new_users),
        "image" => with_config(store, perms, |c| c.no_image_upload = !c.no_image_upload),
        "recaptcha" => with_config(store, perms, |c| c.no_recaptcha = !c.no_recaptcha),
        "production" => {
            require(perms, PermissionMask::ADMIN, || {
                tracing::warn!("moat=production requested at runtime; restart with -s to change mode");
                Ok(())
            })
        }
        other => Err(StoreError::InvalidInput(format!("unknown moat target {other:?}"))),
    }
}

fn require(perms: PermissionMask, bit: u8, op: impl FnOnce() -> Result<()>) -> Result<()> {
    if !perms.can(bit) {
        return Err(StoreError::Permission("mod command requires a permission the caller lacks".into()));
    }
    op()
}

fn with_config(store: &Store, perms: PermissionMask, edit: impl FnOnce(&mut ForumConfig) -> Result<()>) -> Result<()> {
    require(perms, PermissionMask::ADMIN, || {
        let mut config = store.config();
        edit(&mut config)?;
        store.update_config(config)
    })
}

fn parse_u32(value: &str) -> Result<u32> {
    value.parse().map_err(|_| StoreError::InvalidInput(format!("expected an integer, got {value:?}")))
}

fn parse_u64(value: &str) -> Result<u64> {
    value.parse().map_err(|_| StoreError::InvalidInput(format!("expected an integer, got {value:?}")))
}

fn parse_usize(value: &str) -> Result<usize> {
    value.parse().map_err(|_| StoreError::InvalidInput(format!("expected an integer, got {value:?}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_append_subject() {
        assert_eq!(parse_subject("!!append=4294967297"), Some(SubjectCommand::Append { long_id: 4_294_967_297 }));
    }

    #[test]
    fn parses_announce_subject() {
        assert_eq!(parse_subject("!!announce"), Some(SubjectCommand::Announce));
    }

    #[test]
    fn ordinary_subject_is_not_a_command() {
        assert_eq!(parse_subject("just a subject"), None);
    }

    #[test]
    fn parses_every_body_line() {
        let body = "hello\n!!lock=7\nworld\n!!title=My Forum\n";
        let cmds = parse_body(body);
        assert_eq!(cmds, vec![
            BodyCommand { op: "lock".into(), value: "7".into() },
            BodyCommand { op: "title".into(), value: "My Forum".into() },
        ]);
    }

    #[test]
    fn rejects_non_admin_config_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.txt");
        wicket_core::log::LogFile::create(&path).unwrap();
        let store = Store::open(&path).unwrap();
        let user = User::anonymous();
        let cmd = BodyCommand { op: "title".into(), value: "x".into() };
        assert!(matches!(apply_body_command(&store, &user, &cmd), Err(StoreError::Permission(_))));
    }
}
