use std::{fmt, ops::RangeInclusive, str::FromStr};

pub const CFG_SCALE_RANGE: RangeInclusive<u32> = 1..=30;
pub const STEPS_RANGE: RangeInclusive<u32> = 1..=100;
pub const DEFAULT_CFG_SCALE: u32 = 8;
pub const DEFAULT_STEPS: u32 = 50;

/// Samplers users may request from the diffusion backend.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Sampler {
    Lms,
    #[default]
    EulerA,
    Euler,
    Dpm2,
}

impl Sampler {
    pub const ALL: [Sampler; 4] = [Sampler::Lms, Sampler::EulerA, Sampler::Euler, Sampler::Dpm2];

    /// The name the webui knows the sampler by.
    pub fn name(self) -> &'static str {
        match self {
            Sampler::Lms => "LMS",
            Sampler::EulerA => "Euler a",
            Sampler::Euler => "Euler",
            Sampler::Dpm2 => "DPM2",
        }
    }
}

impl fmt::Display for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Sampler {
    type Err = ValidationError;

    /// Matches case-insensitively against the sampler names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Sampler::ALL
            .into_iter()
            .find(|sampler| sampler.name().to_lowercase() == lower)
            .ok_or_else(|| ValidationError::Sampler(s.to_owned()))
    }
}

/// A submission rejected before anything is sent to a backend.
///
/// The `Display` output is the reply shown to the user.
#[derive(thiserror::Error, PartialEq, Eq, Debug)]
pub enum ValidationError {
    #[error("A prompt is required.")]
    MissingPrompt,
    #[error("CFG scale {0} not valid. Needs to be between 1 and 30.")]
    CfgScale(String),
    #[error("Sampler {0} not valid. Specify LMS, Euler a, Euler or DPM2.")]
    Sampler(String),
    #[error("Steps {0} not valid. Needs to be between 1 and 100.")]
    Steps(String),
}

/// The text fields of a submitted form, exactly as the user typed them.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct RawParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub cfg_scale: String,
    pub sampler: String,
    pub steps: String,
}

/// Generation parameters after defaults and bounds have been applied.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GenParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub cfg_scale: u32,
    pub sampler: Sampler,
    pub steps: u32,
}

impl TryFrom<RawParams> for GenParams {
    type Error = ValidationError;

    /// Validates fields in form order and stops at the first failure.
    fn try_from(raw: RawParams) -> Result<Self, Self::Error> {
        if raw.prompt.trim().is_empty() {
            return Err(ValidationError::MissingPrompt);
        }

        let cfg_scale = parse_bounded(&raw.cfg_scale, DEFAULT_CFG_SCALE, CFG_SCALE_RANGE)
            .ok_or_else(|| ValidationError::CfgScale(raw.cfg_scale.clone()))?;

        let sampler = if raw.sampler.is_empty() {
            Sampler::default()
        } else {
            raw.sampler.parse()?
        };

        let steps = parse_bounded(&raw.steps, DEFAULT_STEPS, STEPS_RANGE)
            .ok_or_else(|| ValidationError::Steps(raw.steps.clone()))?;

        Ok(GenParams {
            prompt: raw.prompt,
            negative_prompt: raw.negative_prompt,
            cfg_scale,
            sampler,
            steps,
        })
    }
}

/// Empty input yields `default`; anything else must be an integer within `range`.
fn parse_bounded(value: &str, default: u32, range: RangeInclusive<u32>) -> Option<u32> {
    if value.is_empty() {
        return Some(default);
    }
    value
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|v| range.contains(v))
}
