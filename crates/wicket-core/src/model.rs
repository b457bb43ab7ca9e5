//! Core data model: topics, posts, images, users, and forum configuration.

use serde::{Deserialize, Serialize};

/// Post status bits packed into a single on-disk byte.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PostStatus(u8);

impl PostStatus {
    /// Post has been deleted (or, for an archived post, was always hidden).
    pub const DELETED: u8 = 1 << 0;
    /// Poster's identity token should be rendered instead of staying
    /// anonymous.
    pub const SHOW_ID: u8 = 1 << 1;
    /// Post is sage'd individually (distinct from a topic-wide sage).
    pub const SAGE: u8 = 1 << 2;
    /// Post is flagged not-safe-for-work. Transient: never written to the
    /// log by itself, toggled in memory by opcode `W`.
    pub const NSFW: u8 = 1 << 3;

    /// Wraps a raw status byte as read from the log.
    #[must_use]
    pub fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// The raw status byte, as written to the log.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        self.0
    }

    /// Whether `bit` is set.
    #[must_use]
    pub fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    /// Flips `bit` and returns the new value.
    pub fn toggle(&mut self, bit: u8) -> &mut Self {
        self.0 ^= bit;
        self
    }
}

/// An image attached to a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Relative, date-sharded storage path.
    pub path: String,
    /// Sanitised display name (what the uploader called the file).
    pub name: String,
    /// Size in bytes.
    pub size: u32,
    /// Pixel width, when known.
    pub width: u16,
    /// Pixel height, when known.
    pub height: u16,
}

/// A single post within a topic.
///
/// Posts are immutable once appended except for the [`PostStatus::DELETED`]
/// toggle and mod-only message concatenation via `AppendPost`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// 1-based ID, unique within the owning topic (`1..=4000`).
    pub id: u16,
    /// Unix seconds at creation time.
    pub created_at: u32,
    /// Raw (un-obfuscated) poster identity token. The wire format carries
    /// the AES-masked form (see `crypto`); mutators write raw tokens here
    /// directly, and the replayer's main-log load path undoes the mask
    /// once the salt is known (see `store::replay::deobfuscate_tokens`).
    pub user_token: [u8; 8],
    /// Raw (un-obfuscated) poster IP token. See [`Post::user_token`] for
    /// the on-disk/in-memory convention.
    pub ip_token: [u8; 8],
    /// Status bits (deleted, show-id, sage, nsfw).
    pub status: PostStatus,
    /// Rendered-at-read-time message body.
    pub message: String,
    /// Optional attached image.
    pub image: Option<Image>,
}

impl Post {
    /// Whether the post is currently deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status.has(PostStatus::DELETED)
    }
}

/// Per-topic flag bits, each independently toggleable.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TopicFlags {
    /// Pinned to the top of the live list, above non-sticky topics.
    pub sticky: bool,
    /// Closed to new posts.
    pub locked: bool,
    /// Migrated to a per-topic archive file and unlinked from the live list.
    pub archived: bool,
    /// Exempt from the post length floor and other new-reply gating.
    pub free_reply: bool,
    /// Excluded from front-promotion on new posts.
    pub saged: bool,
}

/// A topic and its ordered sequence of posts.
///
/// Topic IDs are strictly increasing and never reused; a topic's position
/// in the live ordering is tracked separately by the arena that owns it
/// (see `wicket_core::store`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    /// Monotonically assigned ID (`topics_count + 1` at creation).
    pub id: u32,
    /// Subject line.
    pub subject: String,
    /// Unix seconds at creation (the first post's timestamp).
    pub created_at: u32,
    /// Unix seconds of the most recent non-sage post.
    pub modified_at: u32,
    /// Sticky / locked / archived / free-reply / saged bits.
    pub flags: TopicFlags,
    /// Posts in append order; `posts[i].id == i + 1` is an invariant
    /// enforced at replay time.
    pub posts: Vec<Post>,
}

impl Topic {
    /// Whether every post in the topic has been deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.posts.iter().all(Post::is_deleted)
    }

    /// Number of posts, deleted or not.
    #[must_use]
    pub fn post_count(&self) -> usize {
        self.posts.len()
    }
}

/// Permission bits carried by a [`User`] cookie's mask byte.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PermissionMask(pub u8);

impl PermissionMask {
    /// Full administrative access.
    pub const ADMIN: u8 = 1 << 0;
    /// Exempt from the challenge dice roll.
    pub const NO_ROLL: u8 = 1 << 1;
    /// May lock, sage, or delete any post/topic (not only their own).
    pub const LOCK_SAGE_DELETE: u8 = 1 << 2;
    /// May sticky or purge topics.
    pub const STICKY_PURGE: u8 = 1 << 3;
    /// May block identities/IPs.
    pub const BLOCK: u8 = 1 << 4;
    /// May append to an existing post and edit the forum announcement.
    pub const APPEND_ANNOUNCE: u8 = 1 << 5;

    /// Whether `bit` is granted.
    #[must_use]
    pub fn can(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    /// The OR of every moderation-capable bit except [`Self::NO_ROLL`].
    #[must_use]
    pub fn can_moderate(self) -> bool {
        let moderation_bits = Self::ADMIN
            | Self::LOCK_SAGE_DELETE
            | Self::STICKY_PURGE
            | Self::BLOCK
            | Self::APPEND_ANNOUNCE;
        self.0 & moderation_bits != 0
    }
}

/// A cookie-carried, server-signed user record.
///
/// Doubles as an anti-abuse gate: [`crate::identity`] combines the post
/// counter with a probabilistic dice roll to decide whether a challenge is
/// required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// 8-byte identity token.
    pub id: [u8; 8],
    /// Permission mask bits.
    pub mask: u8,
    /// Posts made so far under this identity.
    pub posts: u32,
    /// Threshold at which the challenge dice roll stops firing.
    pub n: u32,
    /// Unix seconds the identity was first minted.
    pub created_at: u32,
    /// Unix seconds of the most recent post.
    pub last_post_at: u32,
}

impl User {
    /// The all-zero identity, representing an anonymous or unverified
    /// caller.
    #[must_use]
    pub fn anonymous() -> Self {
        Self { id: [0; 8], mask: 0, posts: 0, n: 0, created_at: 0, last_post_at: 0 }
    }

    /// Whether this is a real (non-anonymous) identity.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.id != [0; 8]
    }

    /// This user's permission mask.
    #[must_use]
    pub fn permissions(&self) -> PermissionMask {
        PermissionMask(self.mask)
    }
}

/// Recognised forum-wide configuration options.
///
/// The only source of truth for a running value is the most recent `C`
/// opcode in the log; on crash recovery the reloaded value always wins over
/// any cached copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumConfig {
    /// Maximum subject length in characters.
    pub max_subject_len: usize,
    /// Maximum message length in characters.
    pub max_message_len: usize,
    /// Minimum message length in characters.
    pub min_message_len: usize,
    /// Maximum upload size, in megabytes.
    pub max_image_size_mb: u32,
    /// Per-identity cooldown between posts, in seconds.
    pub cooldown_secs: u32,
    /// Posts rendered per page.
    pub posts_per_page: usize,
    /// Topics rendered per page.
    pub topics_per_page: usize,
    /// Soft time budget for a single search call, in milliseconds.
    pub search_timeout_ms: u64,
    /// Maximum number of topics kept live before the archive job demotes
    /// the oldest overflow.
    pub max_live_topics: u32,
    /// Disables new (never-before-seen) identities from posting.
    pub no_more_new_users: bool,
    /// Disables image uploads forum-wide.
    pub no_image_upload: bool,
    /// Disables the CAPTCHA challenge entirely.
    pub no_recaptcha: bool,
    /// Forum display title.
    pub title: String,
    /// CSRF-origin URL.
    pub url: String,
    /// Sitewide announcement banner text.
    pub announcement: String,
    /// 16-byte salt derived from the startup secret; used both for the
    /// identity cookie MAC and the per-post AES token key.
    #[serde(with = "salt_hex")]
    pub salt: [u8; 16],
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            max_subject_len: 60,
            max_message_len: 10_000,
            min_message_len: 3,
            max_image_size_mb: 4,
            cooldown_secs: 2,
            posts_per_page: 20,
            topics_per_page: 15,
            search_timeout_ms: 100,
            max_live_topics: 10_000,
            no_more_new_users: false,
            no_image_upload: false,
            no_recaptcha: false,
            title: String::new(),
            url: String::new(),
            announcement: String::new(),
            salt: [0; 16],
        }
    }
}

mod salt_hex {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 16], s: S) -> Result<S::Ok, S::Error> {
        data_encoding::HEXLOWER.encode(v).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 16], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = data_encoding::HEXLOWER
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("salt must be 16 bytes"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let mut cfg = ForumConfig::default();
        cfg.salt = [7; 16];
        cfg.title = "test forum".into();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ForumConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn permission_mask_moderation_or() {
        let admin = PermissionMask(PermissionMask::ADMIN);
        assert!(admin.can_moderate());
        let roll_only = PermissionMask(PermissionMask::NO_ROLL);
        assert!(!roll_only.can_moderate());
    }
}
