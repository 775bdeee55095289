//! Verification methods and the evidence each one checks.
//!
//! Outcomes are simulated: documents are matched against their published
//! number formats, the camera and fingerprint sensor pass at a fixed rate,
//! signatures pass a canvas quality check, and the alternative method compares
//! security answers and a one-time code.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use super::challenge::IssuedOtp;
use super::error::VerificationError;
use super::storage::UserRecord;

pub const FACIAL_PASS_RATE: f64 = 0.8;
pub const BIOMETRIC_PASS_RATE: f64 = 0.85;

const SIGNATURE_MIN_POINTS: usize = 20;
const SIGNATURE_MIN_WIDTH: f32 = 40.0;
const SIGNATURE_MIN_HEIGHT: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMethod {
    Mobile,
    Facial,
    Document,
    Biometric,
    Signature,
    Alternative,
}

impl VerificationMethod {
    /// Methods selectable during identity verification.
    pub const IDENTITY: [Self; 5] = [
        Self::Facial,
        Self::Document,
        Self::Biometric,
        Self::Signature,
        Self::Alternative,
    ];

    #[must_use]
    pub const fn is_identity(self) -> bool {
        !matches!(self, Self::Mobile)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Facial => "facial",
            Self::Document => "document",
            Self::Biometric => "biometric",
            Self::Signature => "signature",
            Self::Alternative => "alternative",
        }
    }
}

impl fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Aadhaar,
    VoterId,
    Pan,
    Passport,
    DrivingLicence,
}

impl DocumentKind {
    const fn pattern(self) -> &'static str {
        match self {
            Self::Aadhaar => r"^\d{4}\s?\d{4}\s?\d{4}$",
            Self::VoterId => r"^[A-Z]{3}\d{7}$",
            Self::Pan => r"^[A-Z]{5}\d{4}[A-Z]$",
            Self::Passport => r"^[A-Z]\d{7}$",
            Self::DrivingLicence => r"^[A-Z]{2}\d{2}\s?\d{11}$",
        }
    }

    #[must_use]
    pub fn matches(self, number: &str) -> bool {
        let number = number.trim().to_uppercase();
        Regex::new(self.pattern()).map_or(false, |re| re.is_match(&number))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FacialCapture {
    Captured { face_detected: bool },
    DeviceUnavailable { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SecurityAnswers {
    pub constituency: String,
    pub phone_last_four: String,
    pub aadhaar_last_four: String,
}

/// Input for one identity-verification attempt, tagged by method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum IdentityEvidence {
    Facial {
        capture: FacialCapture,
    },
    Document {
        kind: DocumentKind,
        number: String,
    },
    Biometric {
        sensor_ready: bool,
    },
    Signature {
        strokes: Vec<Vec<Point>>,
    },
    Alternative {
        answers: SecurityAnswers,
        otp: String,
    },
}

/// Source of the randomized pass/fail outcomes.
pub trait OutcomeSampler: Send {
    fn passes(&mut self, rate: f64) -> bool;
}

#[derive(Debug)]
pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for RandomSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeSampler for RandomSampler {
    fn passes(&mut self, rate: f64) -> bool {
        self.rng.gen_bool(rate.clamp(0.0, 1.0))
    }
}

/// Everything a check may consult besides the evidence itself.
pub struct CheckContext<'a> {
    pub user: &'a UserRecord,
    pub otp: Option<&'a IssuedOtp>,
    pub sampler: &'a mut dyn OutcomeSampler,
}

impl IdentityEvidence {
    #[must_use]
    pub const fn method(&self) -> VerificationMethod {
        match self {
            Self::Facial { .. } => VerificationMethod::Facial,
            Self::Document { .. } => VerificationMethod::Document,
            Self::Biometric { .. } => VerificationMethod::Biometric,
            Self::Signature { .. } => VerificationMethod::Signature,
            Self::Alternative { .. } => VerificationMethod::Alternative,
        }
    }

    /// Run the method's check.
    ///
    /// # Errors
    /// `InputMismatch` when the evidence is rejected, `ExternalDeviceFailure`
    /// when the capture device was unavailable, `CodeExpired` when the
    /// alternative method's code is missing or expired.
    pub fn check(&self, ctx: &mut CheckContext<'_>) -> Result<(), VerificationError> {
        match self {
            Self::Facial { capture } => match capture {
                FacialCapture::DeviceUnavailable { reason } => {
                    Err(VerificationError::ExternalDeviceFailure(reason.clone()))
                }
                FacialCapture::Captured { face_detected } => {
                    pass_if(*face_detected && ctx.sampler.passes(FACIAL_PASS_RATE))
                }
            },
            Self::Document { kind, number } => pass_if(kind.matches(number)),
            Self::Biometric { sensor_ready } => {
                if !sensor_ready {
                    return Err(VerificationError::ExternalDeviceFailure(
                        "fingerprint sensor not ready".to_string(),
                    ));
                }
                pass_if(ctx.sampler.passes(BIOMETRIC_PASS_RATE))
            }
            Self::Signature { strokes } => pass_if(signature_quality_ok(strokes)),
            Self::Alternative { answers, otp } => {
                if !answers_match(answers, ctx.user) {
                    return Err(VerificationError::InputMismatch);
                }
                ctx.otp
                    .ok_or(VerificationError::CodeExpired)
                    .and_then(|issued| issued.verify(otp))
            }
        }
    }
}

const fn pass_if(passed: bool) -> Result<(), VerificationError> {
    if passed {
        Ok(())
    } else {
        Err(VerificationError::InputMismatch)
    }
}

fn signature_quality_ok(strokes: &[Vec<Point>]) -> bool {
    let points: Vec<&Point> = strokes.iter().flatten().collect();
    if points.len() < SIGNATURE_MIN_POINTS {
        return false;
    }

    let (min_x, max_x, min_y, max_y) = points.iter().fold(
        (f32::MAX, f32::MIN, f32::MAX, f32::MIN),
        |(min_x, max_x, min_y, max_y), p| {
            (min_x.min(p.x), max_x.max(p.x), min_y.min(p.y), max_y.max(p.y))
        },
    );

    max_x - min_x >= SIGNATURE_MIN_WIDTH && max_y - min_y >= SIGNATURE_MIN_HEIGHT
}

fn last_four_digits(value: &str) -> String {
    let digits: Vec<char> = value.chars().filter(char::is_ascii_digit).collect();
    digits[digits.len().saturating_sub(4)..].iter().collect()
}

fn answers_match(answers: &SecurityAnswers, user: &UserRecord) -> bool {
    let constituency = user.constituency.trim();
    let phone = last_four_digits(&user.phone);
    let aadhaar = last_four_digits(&user.aadhaar);

    !constituency.is_empty()
        && phone.len() == 4
        && aadhaar.len() == 4
        && answers.constituency.trim().eq_ignore_ascii_case(constituency)
        && last_four_digits(&answers.phone_last_four) == phone
        && last_four_digits(&answers.aadhaar_last_four) == aadhaar
}
