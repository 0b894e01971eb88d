//! Bearer tokens for session grants: 32 random bytes, hex encoded

use rand::RngCore;

pub const TOKEN_BYTES: usize = 32;

/// How much of a key may appear in logs or listings
pub const TOKEN_PREFIX_CHARS: usize = 8;

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Shape check only; says nothing about whether the token was ever issued
pub fn is_well_formed_token(token: &str) -> bool {
    token.len() == TOKEN_BYTES * 2
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Keys are bearer credentials; only their prefix is ever shown
pub fn redact_token(key: &str) -> String {
    key.chars().take(TOKEN_PREFIX_CHARS).collect()
}
