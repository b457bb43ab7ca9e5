//! Cookie-carried, server-signed user record: sign/verify and the challenge
//! dice roll.

use std::f64::consts::PI;

use std::sync::OnceLock;

use data_encoding::{Specification, Encoding};
use rand::Rng;
use sha2::{Digest, Sha256};
use wicket_codec::Writer;

use crate::model::User;

/// `abcdefghijklmnopqrstuvwxyz234567` alphabet, `1`-padded, matching the
/// on-disk cookie hash encoding.
fn base32_encoding() -> &'static Encoding {
    static ENCODING: OnceLock<Encoding> = OnceLock::new();
    ENCODING.get_or_init(|| {
        let mut spec = Specification::new();
        spec.symbols.push_str("abcdefghijklmnopqrstuvwxyz234567");
        spec.padding = Some('1');
        // Alphabet and padding are a fixed, valid literal; this cannot fail.
        #[allow(clippy::expect_used)]
        spec.encoding().expect("static base32 specification is valid")
    })
}

/// Packs the hashed fields of a [`User`] record for MAC computation.
///
/// Deliberately excludes the hash field itself; layout is
/// `id(8) || mask(1) || posts(4) || n(4) || created_at(4) || last_post_at(4)`.
fn pack_user(u: &User) -> Vec<u8> {
    let mut w = Writer::with_capacity(25);
    w.write_bytes8(u.id).write_u8(u.mask).write_u32(u.posts).write_u32(u.n);
    w.write_u32(u.created_at).write_u32(u.last_post_at);
    w.into_bytes()
}

/// Computes the 30-character base32 MAC for `user` under `salt`.
///
/// `sha256(pack(user) || salt)` is rehashed 16 further times, and the first
/// 30 bytes of the final digest are base32-encoded.
#[must_use]
pub fn compute_hash(user: &User, salt: &[u8; 16]) -> String {
    let mut packed = pack_user(user);
    packed.extend_from_slice(salt);

    let mut digest = Sha256::digest(&packed);
    for _ in 0..16 {
        digest = Sha256::digest(digest);
    }

    base32_encoding().encode(&digest[..30])
}

/// Prepares a cookie value for a fresh or updated post by `u`: bumps the
/// post counter, stamps `last_post_at`, and returns the serialised,
/// URL-safe cookie body (the caller is responsible for actually setting the
/// cookie header).
#[must_use]
pub fn set_user(mut u: User, now: u32, salt: &[u8; 16]) -> (User, String) {
    u.posts += 1;
    u.last_post_at = now;
    let hash = compute_hash(&u, salt);
    (u, encode_cookie(&u, &hash))
}

/// Decodes and verifies a cookie value, returning [`User::anonymous`] if the
/// cookie is absent, malformed, or fails its MAC.
#[must_use]
pub fn get_user(cookie_value: &str, salt: &[u8; 16]) -> User {
    let Some((u, claimed_hash)) = decode_cookie(cookie_value) else {
        return User::anonymous();
    };

    if compute_hash(&u, salt) != claimed_hash {
        return User::anonymous();
    }

    u
}

/// Serialised record body, with `,` and `"` substituted so the cookie value
/// stays URL-safe without percent-encoding.
#[derive(serde::Serialize, serde::Deserialize)]
struct CookieRecord {
    id: [u8; 8],
    mask: u8,
    posts: u32,
    n: u32,
    created_at: u32,
    last_post_at: u32,
    hash: String,
}

fn encode_cookie(u: &User, hash: &str) -> String {
    let record = CookieRecord {
        id: u.id,
        mask: u.mask,
        posts: u.posts,
        n: u.n,
        created_at: u.created_at,
        last_post_at: u.last_post_at,
        hash: hash.to_string(),
    };
    let json = serde_json::to_string(&record).unwrap_or_default();
    json.replace(',', ";").replace('"', "'")
}

fn decode_cookie(value: &str) -> Option<(User, String)> {
    let json = value.replace(';', ",").replace('\'', "\"");
    let record: CookieRecord = serde_json::from_str(&json).ok()?;
    let user = User {
        id: record.id,
        mask: record.mask,
        posts: record.posts,
        n: record.n,
        created_at: record.created_at,
        last_post_at: record.last_post_at,
    };
    Some((user, record.hash))
}

/// Whether a poster with `n` (threshold) and `posts` (count so far) must be
/// challenged, given a uniform `draw` in `[0, 1)`.
///
/// Only meaningful for `n` in `5..=20`; outside that range the dice roll
/// never mandates a challenge. The excuse probability is
/// `atan(n - posts) / pi + 0.51`, smoothly sliding from "always challenge"
/// early in a user's posting history to "never challenge" once they've
/// posted well past `n`.
#[must_use]
pub fn needs_challenge(n: u32, posts: u32, draw: f64) -> bool {
    if !(5..=20).contains(&n) {
        return false;
    }
    let p_excused = (f64::from(n) - f64::from(posts)).atan() / PI + 0.51;
    draw >= p_excused
}

/// Draws the dice roll for `user` using `rng`.
pub fn roll_challenge<R: Rng + ?Sized>(user: &User, rng: &mut R) -> bool {
    needs_challenge(user.n, user.posts, rng.gen_range(0.0..1.0))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn cookie_round_trips_with_incremented_posts() {
        let salt = [3u8; 16];
        let u = User { id: [1; 8], mask: 0, posts: 4, n: 10, created_at: 1000, last_post_at: 1000 };
        let (updated, cookie) = set_user(u, 2000, &salt);
        assert_eq!(updated.posts, 5);
        assert_eq!(updated.last_post_at, 2000);

        let back = get_user(&cookie, &salt);
        assert_eq!(back, updated);
    }

    #[test]
    fn tampered_cookie_is_anonymous() {
        let salt = [3u8; 16];
        let u = User { id: [1; 8], mask: 0, posts: 4, n: 10, created_at: 1000, last_post_at: 1000 };
        let (_updated, cookie) = set_user(u, 2000, &salt);
        assert!(cookie.contains("'posts':5"));
        let tampered = cookie.replace("'posts':5", "'posts':9");
        assert_eq!(get_user(&tampered, &salt), User::anonymous());
    }

    #[test]
    fn missing_cookie_is_anonymous() {
        assert_eq!(get_user("", &[0; 16]), User::anonymous());
        assert_eq!(get_user("garbage", &[0; 16]), User::anonymous());
    }

    #[test]
    fn dice_roll_outside_window_never_challenges() {
        assert!(!needs_challenge(4, 0, 0.0));
        assert!(!needs_challenge(21, 0, 0.0));
    }

    #[test]
    fn dice_roll_is_deterministic_given_seeded_rng() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let user = User { id: [1; 8], mask: 0, posts: 1, n: 10, created_at: 0, last_post_at: 0 };
        let a = roll_challenge(&user, &mut rng);
        let mut rng2 = ChaCha8Rng::seed_from_u64(42);
        let b = roll_challenge(&user, &mut rng2);
        assert_eq!(a, b);
    }
}
