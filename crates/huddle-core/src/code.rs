use rand::Rng;
use rand::rngs::OsRng;

/// Character set for room codes and generated ids (0-9, A-Z, a-z).
pub const BASE62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Fixed length of a room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Required prefix for guest ids.
pub const GUEST_ID_PREFIX: &str = "guest_";

const GUEST_ID_RAW_LEN: usize = 6;
const NICKNAME_RAW_LEN: usize = 6;

fn random_base62(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| BASE62[rng.gen_range(0..BASE62.len())] as char)
        .collect()
}

/// Generate a 6-character Base62 room code from the OS RNG.
/// Uniqueness is the caller's concern; retry on collision.
pub fn generate_room_code() -> String {
    random_base62(ROOM_CODE_LEN)
}

/// Validates that a code is exactly [`ROOM_CODE_LEN`] Base62 characters.
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN && code.bytes().all(|b| BASE62.contains(&b))
}

/// Generate a fresh guest id (`guest_` + 6 Base62 characters).
pub fn generate_guest_id() -> String {
    format!("{GUEST_ID_PREFIX}{}", random_base62(GUEST_ID_RAW_LEN))
}

/// Validates the `guest_xxxxxx` id shape.
pub fn is_valid_guest_id(id: &str) -> bool {
    let Some(raw) = id.strip_prefix(GUEST_ID_PREFIX) else {
        return false;
    };
    raw.len() == GUEST_ID_RAW_LEN && raw.bytes().all(|b| BASE62.contains(&b))
}

/// Generate a display nickname (`User_` + 6 Base62 characters).
pub fn generate_nickname() -> String {
    format!("User_{}", random_base62(NICKNAME_RAW_LEN))
}
