use argon2::{
    Argon2,
    PasswordHash,
    PasswordVerifier,
    PasswordHasher,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

use argon2::password_hash::{SaltString, rand_core::OsRng as PHOsRng};

/// Ticket alphabet: no 0/O or 1/I/L, so codes survive being read over the phone.
const TICKET_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";
const TICKET_LEN: usize = 8;
pub const TICKET_PREFIX: &str = "APT-";

/// Verify password using Argon2 hash stored in DB.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let parsed = match PasswordHash::new(stored_hash) {
        Ok(p) => p,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Argon2id with a random salt; the PHC string goes into app_user.password_hash.
pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut PHOsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| format!("argon2 hash error: {e}"))
}

/// Opaque bearer token handed to the client. Only its hash is stored.
pub fn generate_access_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex of a bearer token.
pub fn hash_access_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Human-typeable appointment ticket, e.g. `APT-7KQ2M9XD`.
pub fn generate_ticket() -> String {
    let mut rng = OsRng;
    let code: String = (0..TICKET_LEN)
        .map(|_| TICKET_ALPHABET[rng.gen_range(0..TICKET_ALPHABET.len())] as char)
        .collect();
    format!("{TICKET_PREFIX}{code}")
}

/// Tickets are typed by patients; accept lowercase and stray spaces.
pub fn normalize_ticket(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let phc = hash_password("Secret12").unwrap();
        assert!(phc.starts_with("$argon2id$"));
        assert!(verify_password("Secret12", &phc));
        assert!(!verify_password("secret12", &phc));
        assert!(!verify_password("Secret12", "not-a-phc-string"));
    }

    #[test]
    fn access_tokens_are_unique_and_hash_is_hex() {
        let a = generate_access_token();
        let b = generate_access_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);

        let h = hash_access_token(&a);
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_access_token(&a));
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tickets_use_unambiguous_alphabet() {
        for _ in 0..50 {
            let t = generate_ticket();
            assert!(t.starts_with(TICKET_PREFIX));
            let code = &t[TICKET_PREFIX.len()..];
            assert_eq!(code.len(), TICKET_LEN);
            assert!(code.bytes().all(|b| TICKET_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn ticket_input_is_forgiving() {
        assert_eq!(normalize_ticket(" apt-7kq2 m9xd "), "APT-7KQ2M9XD");
    }
}
