//! Six-digit password reset codes.
//!
//! Codes are drawn from the OS CSPRNG with `Rng::gen_range(100_000..=999_999)`.
//! `rand`'s integer `Uniform` sampler uses widening multiplication with
//! rejection of the biased zone, so each of the 900 000 values is equally
//! likely; there is no `% 900_000` step and therefore no modulo bias.

use rand::{rngs::OsRng, Rng};
use time::{Duration, OffsetDateTime};

pub const RESET_CODE_MIN: u32 = 100_000;
pub const RESET_CODE_MAX: u32 = 999_999;

/// Codes stay valid for 15 minutes after issue.
pub const RESET_CODE_TTL: Duration = Duration::minutes(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetCode {
    pub code: String,
    pub expires_at: OffsetDateTime,
}

impl ResetCode {
    /// New code expiring [`RESET_CODE_TTL`] after `now`.
    pub fn generate(now: OffsetDateTime) -> Self {
        Self {
            code: random_code(),
            expires_at: now + RESET_CODE_TTL,
        }
    }
}

pub fn random_code() -> String {
    let n: u32 = OsRng.gen_range(RESET_CODE_MIN..=RESET_CODE_MAX);
    format!("{n:06}")
}

/// A code is expired once `now` is strictly past its expiry.
pub fn is_expired(expires_at: OffsetDateTime, now: OffsetDateTime) -> bool {
    expires_at < now
}

#[cfg(test)]
pub(crate) fn looks_like_code(candidate: &str) -> bool {
    candidate.len() == 6 && candidate.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn codes_are_six_digits_in_range() {
        for _ in 0..1_000 {
            let code = random_code();
            assert!(looks_like_code(&code), "bad code {code}");
            let n: u32 = code.parse().unwrap();
            assert!((RESET_CODE_MIN..=RESET_CODE_MAX).contains(&n));
        }
    }

    #[test]
    fn expiry_is_fifteen_minutes_out() {
        let now = datetime!(2024-05-01 12:00 UTC);
        let code = ResetCode::generate(now);
        assert_eq!(code.expires_at, datetime!(2024-05-01 12:15 UTC));
    }

    #[test]
    fn expiry_boundary() {
        let exp = datetime!(2024-05-01 12:15 UTC);
        assert!(!is_expired(exp, datetime!(2024-05-01 12:14:59 UTC)));
        assert!(!is_expired(exp, exp));
        assert!(is_expired(exp, datetime!(2024-05-01 12:15:01 UTC)));
    }

    #[test]
    fn shape_check() {
        assert!(looks_like_code("012345"));
        assert!(!looks_like_code("12345"));
        assert!(!looks_like_code("12345a"));
        assert!(!looks_like_code(""));
    }
}
