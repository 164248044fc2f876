use serde::{Deserialize, Serialize};

/// Range and step of one UI slider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SliderBounds {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub default: f64,
}

impl SliderBounds {
    /// Clamp into `[min, max]` and snap onto the step grid anchored at `min`.
    /// Non-finite input falls back to the default.
    pub fn snap(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.default;
        }
        let clamped = value.clamp(self.min, self.max);
        let steps = ((clamped - self.min) / self.step).round();
        let mut snapped = round_cents(self.min + steps * self.step);
        if snapped > self.max {
            snapped = round_cents(snapped - self.step);
        }
        snapped
    }
}

// keeps 0.1 + 2 * 0.1 at 0.3 instead of 0.30000000000000004
fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub const MAX_LENGTH: SliderBounds = SliderBounds {
    min: 50.0,
    max: 512.0,
    step: 50.0,
    default: 500.0,
};

pub const TEMPERATURE: SliderBounds = SliderBounds {
    min: 0.1,
    max: 1.0,
    step: 0.1,
    default: 0.5,
};

pub const TOP_P: SliderBounds = SliderBounds {
    min: 0.1,
    max: 1.0,
    step: 0.05,
    default: 0.5,
};

/// Sampling settings for one request. Always within the slider bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParams {
    /// Prompt plus generated tokens.
    pub max_length: usize,
    pub temperature: f64,
    pub top_p: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_length: MAX_LENGTH.default as usize,
            temperature: TEMPERATURE.default,
            top_p: TOP_P.default,
        }
    }
}

impl GenerationParams {
    pub fn bounded(max_length: f64, temperature: f64, top_p: f64) -> Self {
        Self {
            max_length: MAX_LENGTH.snap(max_length) as usize,
            temperature: TEMPERATURE.snap(temperature),
            top_p: TOP_P.snap(top_p),
        }
    }
}

/// Wire form: every field optional, missing ones take the slider default.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RawGenerationParams {
    #[serde(default)]
    pub max_length: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
}

impl From<RawGenerationParams> for GenerationParams {
    fn from(raw: RawGenerationParams) -> Self {
        GenerationParams::bounded(
            raw.max_length.unwrap_or(MAX_LENGTH.default),
            raw.temperature.unwrap_or(TEMPERATURE.default),
            raw.top_p.unwrap_or(TOP_P.default),
        )
    }
}
