//! Wicket Core
//!
//! The append-only threaded-post store behind an anonymous image-board
//! engine: a crash-safe binary log, a doubly-linked live-topic list,
//! AES-obfuscated identity/IP tokens, a cookie-backed anti-abuse identity
//! service, and bigram-indexed search.
//!
//! # Architecture
//!
//! [`log`] and [`opcode`] define the wire format; [`store::replay`] (not
//! exported — an implementation detail of [`store::Store::open`])
//! reconstructs in-memory state from it. [`store`] holds the live arena and
//! every mutator ([`store::Store::new_topic`], [`store::Store::new_post`],
//! [`store::Store::operate_topic`], …), plus the archive, snapshot, and
//! search passes. [`identity`] and [`throttle`] implement the anti-abuse
//! layer that sits in front of the store; [`crypto`] is the AES primitive
//! both [`store`] and [`identity`] build on.
//!
//! # Components
//!
//! - [`store::Store`]: the guarded log + arena, and every read/write operation
//! - [`identity::User`]: the signed cookie record and its dice-roll challenge decision
//! - [`throttle`]: bounded LRU caches guarding against double-posting and abuse
//! - [`crypto`]: the AES keystream used to obfuscate on-disk tokens
//! - [`longid`]: the dense `(topic_id, post_id)` URL packing

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod crypto;
pub mod error;
pub mod identity;
pub mod log;
pub mod longid;
pub mod model;
pub mod opcode;
pub mod store;
pub mod throttle;

pub use error::{Result, StoreError};
pub use model::{ForumConfig, Image, Post, PostStatus, Topic, TopicFlags};
pub use store::Store;
