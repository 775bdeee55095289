//! Codes sent to the voter's phone: the three-number mobile challenge and the
//! six-digit one-time code of the alternative method.

use rand::{seq::index::sample, Rng};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use tracing::info;

use super::error::VerificationError;
use super::timer::{Countdown, Tick};

const CHALLENGE_MIN: u8 = 10;
const CHALLENGE_SPAN: usize = 90;
const CHALLENGE_OPTIONS: usize = 3;
const OTP_DIGITS: usize = 6;

/// Three distinct two-digit numbers; the phone receives `expected` and the
/// voter has to pick it out of `options`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobileChallenge {
    options: [u8; CHALLENGE_OPTIONS],
    expected: u8,
}

impl MobileChallenge {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut options = [0u8; CHALLENGE_OPTIONS];
        for (slot, index) in options
            .iter_mut()
            .zip(sample(rng, CHALLENGE_SPAN, CHALLENGE_OPTIONS))
        {
            // index < 90, so the sum always fits in two digits
            *slot = CHALLENGE_MIN + u8::try_from(index).unwrap_or(0);
        }

        let expected = options[rng.gen_range(0..CHALLENGE_OPTIONS)];

        Self { options, expected }
    }

    #[must_use]
    pub const fn options(&self) -> [u8; CHALLENGE_OPTIONS] {
        self.options
    }

    #[must_use]
    pub const fn expected(&self) -> u8 {
        self.expected
    }

    #[must_use]
    pub const fn is_correct(&self, selected: u8) -> bool {
        selected == self.expected
    }
}

/// One-time code issued for the alternative method, valid until its
/// countdown runs out.
#[derive(Debug)]
pub struct IssuedOtp {
    code: SecretString,
    countdown: Countdown,
}

impl IssuedOtp {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, ttl_seconds: u64) -> Self {
        let code: String = (0..OTP_DIGITS)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();

        Self {
            code: SecretString::from(code),
            countdown: Countdown::new(ttl_seconds),
        }
    }

    pub fn tick(&mut self) -> Tick {
        self.countdown.tick()
    }

    #[must_use]
    pub const fn seconds_remaining(&self) -> u64 {
        self.countdown.remaining()
    }

    #[must_use]
    pub const fn is_expired(&self) -> bool {
        self.countdown.is_expired()
    }

    #[must_use]
    pub fn code(&self) -> &SecretString {
        &self.code
    }

    /// # Errors
    /// `CodeExpired` once the countdown has run out, `InputMismatch` when the
    /// candidate differs.
    pub fn verify(&self, candidate: &str) -> Result<(), VerificationError> {
        if self.is_expired() {
            return Err(VerificationError::CodeExpired);
        }

        if candidate.trim() == self.code.expose_secret() {
            Ok(())
        } else {
            Err(VerificationError::InputMismatch)
        }
    }
}

/// What gets sent to the voter's phone.
pub enum DeliveredCode<'a> {
    MobileChallenge(u8),
    AlternativeOtp(&'a SecretString),
}

impl fmt::Debug for DeliveredCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MobileChallenge(code) => f.debug_tuple("MobileChallenge").field(code).finish(),
            Self::AlternativeOtp(_) => f.write_str("AlternativeOtp(..)"),
        }
    }
}

/// Outbound channel for verification codes.
pub trait CodeDelivery: Send + Sync {
    fn deliver(&self, phone: &str, code: &DeliveredCode<'_>);
}

/// Simulated SMS gateway: writes the message to the log.
#[derive(Clone, Debug)]
pub struct LogDelivery;

impl CodeDelivery for LogDelivery {
    fn deliver(&self, phone: &str, code: &DeliveredCode<'_>) {
        let phone = mask_digits(phone);
        match code {
            DeliveredCode::MobileChallenge(expected) => {
                info!(phone = %phone, code = expected, "sms: mobile verification code");
            }
            DeliveredCode::AlternativeOtp(otp) => {
                info!(phone = %phone, otp = otp.expose_secret(), "sms: one-time code");
            }
        }
    }
}

/// Keep only the last four digits of a phone or Aadhaar number.
#[must_use]
pub fn mask_digits(value: &str) -> String {
    let digits: Vec<char> = value.chars().filter(char::is_ascii_digit).collect();
    let visible = digits.len().saturating_sub(4);
    digits
        .iter()
        .enumerate()
        .map(|(i, c)| if i < visible { '*' } else { *c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn challenge_has_three_distinct_two_digit_options() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let challenge = MobileChallenge::generate(&mut rng);
            let options = challenge.options();
            assert!(options.iter().all(|n| (10..=99).contains(n)));
            assert_ne!(options[0], options[1]);
            assert_ne!(options[0], options[2]);
            assert_ne!(options[1], options[2]);
            assert!(options.contains(&challenge.expected()));
            assert!(challenge.is_correct(challenge.expected()));
        }
    }

    #[test]
    fn otp_is_six_digits() {
        let mut rng = StdRng::seed_from_u64(11);
        let otp = IssuedOtp::generate(&mut rng, 120);
        let code = otp.code().expose_secret();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(otp.seconds_remaining(), 120);
    }

    #[test]
    fn otp_verify_matches_and_expires() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut otp = IssuedOtp::generate(&mut rng, 2);
        let code = otp.code().expose_secret().to_string();

        assert_eq!(otp.verify("nope"), Err(VerificationError::InputMismatch));
        assert_eq!(otp.verify(&format!(" {code} ")), Ok(()));

        otp.tick();
        otp.tick();
        assert!(otp.is_expired());
        assert_eq!(otp.verify(&code), Err(VerificationError::CodeExpired));
    }

    #[test]
    fn otp_debug_does_not_leak() {
        let mut rng = StdRng::seed_from_u64(5);
        let otp = IssuedOtp::generate(&mut rng, 60);
        let code = otp.code().expose_secret().to_string();
        let rendered = format!("{:?}", DeliveredCode::AlternativeOtp(otp.code()));
        assert!(!rendered.contains(&code));
    }

    #[test]
    fn mask_digits_keeps_last_four() {
        assert_eq!(mask_digits("+91 98765 43210"), "********3210");
        assert_eq!(mask_digits("123"), "123");
    }
}
