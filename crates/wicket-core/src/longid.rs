//! Dense long-ID packing: `(topic_id, post_id)` as a single `u64` suitable
//! for URLs.
//!
//! A post index (`post_id - 1`) needs at most 12 bits (topics cap out at
//! 4000 posts), but most topics never get anywhere near that many replies.
//! Rather than always reserving 12 bits, the packing picks the narrowest of
//! four widths that fits the index and records which one it picked in a
//! fixed 2-bit scheme tag at the bottom of the value. Because the tag sits
//! at a fixed bit position regardless of which scheme is active, decoding is
//! unambiguous: read the tag first, then reinterpret the rest accordingly.
//!
//! | scheme tag | index width | covers post index |
//! |---|---|---|
//! | 0 | 2 bits | `0..4` |
//! | 1 | 4 bits | `0..16` |
//! | 2 | 8 bits | `0..256` |
//! | 3 | 12 bits | `0..4096` |

use crate::error::{Result, StoreError};

const SCHEMES: [(u64, u32); 4] = [(0, 2), (1, 4), (2, 8), (3, 12)];

/// Packs a `(topic_id, post_id)` pair into a dense long-ID.
///
/// `post_id` must be in `1..=4000`; `topic_id` may be any `u32`.
pub fn pack_long_id(topic_id: u32, post_id: u16) -> u64 {
    debug_assert!((1..=4000).contains(&post_id), "post_id out of range: {post_id}");
    let idx = u64::from(post_id - 1);

    let (tag, width) = SCHEMES.into_iter().find(|(_, w)| idx < (1u64 << w)).unwrap_or_else(|| {
        // idx is bounded by 3999 < 4096, so the widest scheme always matches.
        SCHEMES[3]
    });

    (u64::from(topic_id) << (width + 2)) | (idx << 2) | tag
}

/// Splits a dense long-ID back into `(topic_id, post_id)`.
///
/// # Errors
///
/// Returns [`StoreError::InvalidInput`] if the scheme tag is inconsistent
/// (cannot happen for IDs produced by [`pack_long_id`], but caller-supplied
/// IDs are untrusted input).
pub fn split_long_id(long_id: u64) -> Result<(u32, u16)> {
    let tag = long_id & 0b11;
    let (_, width) = SCHEMES
        .into_iter()
        .find(|(t, _)| *t == tag)
        .ok_or_else(|| StoreError::InvalidInput(format!("invalid long-id scheme tag {tag}")))?;

    let idx = (long_id >> 2) & ((1u64 << width) - 1);
    let topic_id = long_id >> (width + 2);
    let topic_id =
        u32::try_from(topic_id).map_err(|_| StoreError::InvalidInput("long-id overflow".into()))?;

    #[allow(clippy::cast_possible_truncation)]
    let post_id = (idx + 1) as u16;
    Ok((topic_id, post_id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn first_post_of_first_topic() {
        let id = pack_long_id(1, 1);
        assert_eq!(split_long_id(id).unwrap(), (1, 1));
    }

    proptest! {
        #[test]
        fn round_trip(topic_id in 1u32..=u32::MAX, post_id in 1u16..=4000) {
            let packed = pack_long_id(topic_id, post_id);
            prop_assert_eq!(split_long_id(packed).unwrap(), (topic_id, post_id));
        }

        #[test]
        fn scheme_picks_narrowest_width(post_id in 1u16..=4000) {
            let packed = pack_long_id(1, post_id);
            let idx = u64::from(post_id - 1);
            let tag = packed & 0b11;
            let expected_tag = if idx < 4 { 0 } else if idx < 16 { 1 } else if idx < 256 { 2 } else { 3 };
            prop_assert_eq!(tag, expected_tag);
        }
    }
}
