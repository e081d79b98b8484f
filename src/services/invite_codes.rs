use rand::Rng;
use sha2::{Digest, Sha256};

const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Invite codes look like "ALGO10-INV-K7M2P9QX": a slug of the exam title,
/// a fixed tag, and a random suffix from an ambiguity-free alphabet.
pub(crate) fn generate_invite_code(exam_title: &str) -> String {
    let normalized_title = exam_title
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .take(6)
        .collect::<String>()
        .to_uppercase();

    let random = generate_suffix(8);
    format!("{}-INV-{}", normalized_title, random)
}

/// Access codes for `code`-mode exams share the alphabet but carry no slug.
pub(crate) fn generate_access_code() -> String {
    generate_suffix(8)
}

/// Only the SHA-256 digest is stored; the cleartext code is shown once.
pub(crate) fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut output = String::with_capacity(len);
    for _ in 0..len {
        let index = rng.gen_range(0..ALPHABET.len());
        output.push(ALPHABET[index] as char);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_code_carries_title_slug() {
        let code = generate_invite_code("Algo 101: Midterm");
        assert!(code.starts_with("ALGO10-INV-"));
        assert_eq!(code.len(), "ALGO10-INV-".len() + 8);
    }

    #[test]
    fn hash_is_stable_and_hex() {
        let code = "ALGO10-INV-K7M2P9QX";
        let first = hash_code(code);
        assert_eq!(first, hash_code(code));
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn access_codes_avoid_ambiguous_characters() {
        for _ in 0..20 {
            let code = generate_access_code();
            assert_eq!(code.len(), 8);
            assert!(!code.contains('0'));
            assert!(!code.contains('O'));
            assert!(!code.contains('1'));
            assert!(!code.contains('I'));
        }
    }
}
