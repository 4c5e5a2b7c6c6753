//! Human-shareable join codes

use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{VotingError, VotingResult};

/// Uppercase letters and digits without the easily confused `I`, `O`, `0` and `1`
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const JOIN_CODE_LEN: usize = 6;

fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9]{6}$").expect("Failed to compile join code regex"))
}

/// Generate a random join code
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Normalise user input into the stored form of a join code.
///
/// Codes are case-insensitive and surrounding whitespace is ignored.
pub fn normalize(input: &str) -> VotingResult<String> {
    let code = input.trim().to_ascii_uppercase();
    if !code_pattern().is_match(&code) {
        return Err(VotingError::InvalidJoinCode(input.trim().to_string()));
    }

    Ok(code)
}
