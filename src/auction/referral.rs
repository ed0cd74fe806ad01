// Referral codes: short public lookup keys for joining an auction.

use rand::rngs::OsRng;
use rand::Rng;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Referral codes are always exactly this long.
pub const CODE_LEN: usize = 8;

/// A code stays joinable until this long after the auction date.
const JOIN_WINDOW_MS: i64 = 2 * 24 * 60 * 60 * 1000;

/// Generate an 8-character `[A-Z0-9]` code from OS entropy.
///
/// Uniqueness is enforced by the caller (lookup, regenerate on collision);
/// at 36^8 possible codes a collision is practically unreachable.
pub fn generate_code() -> String {
    let mut rng = OsRng;
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Whether `code` has the exact shape of a referral code.
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

/// Whether a referral join is still allowed: codes expire two days after the
/// scheduled auction date.
pub fn join_window_open(auction_date_ms: i64, now_ms: i64) -> bool {
    now_ms <= auction_date_ms + JOIN_WINDOW_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_well_formed() {
        for _ in 0..50 {
            let code = generate_code();
            assert!(is_well_formed(&code), "bad code: {code}");
        }
    }

    #[test]
    fn generated_codes_vary() {
        let codes: std::collections::HashSet<String> = (0..10).map(|_| generate_code()).collect();
        assert!(codes.len() > 1);
    }

    #[test]
    fn well_formed_rejects_wrong_shapes() {
        assert!(is_well_formed("AB12CD34"));
        assert!(!is_well_formed("ab12cd34")); // lowercase not in alphabet
        assert!(!is_well_formed("AB12CD3")); // too short
        assert!(!is_well_formed("AB12CD345")); // too long
        assert!(!is_well_formed("AB12CD3!"));
    }

    #[test]
    fn join_window_closes_two_days_after_auction_date() {
        let date = 1_000_000_000_000;
        assert!(join_window_open(date, date - 1));
        assert!(join_window_open(date, date + JOIN_WINDOW_MS));
        assert!(!join_window_open(date, date + JOIN_WINDOW_MS + 1));
    }
}
