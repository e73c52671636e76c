// ============================================================================
// ADJUSTMENT PIPELINE - tonal adjustments recomputed from the original buffer
// ============================================================================
//
// `compute_displayed` is a pure function of (original, params).  Every call
// starts over from the untouched original, so returning a slider to neutral
// restores the original pixels exactly instead of an accumulated
// approximation.  The five transforms run fused in a single pass per pixel,
// in fixed order, with the intermediate value kept in f32 and clamped to
// [0, 255] after each stage; the result is rounded once at the end.
// Rows are processed in parallel via rayon.
// ============================================================================

use std::fmt;
use std::str::FromStr;

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// ============================================================================
// PARAMETERS
// ============================================================================

/// One adjustable slider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdjustmentKey {
    Brightness,
    Contrast,
    Temperature,
    Saturation,
    Enhancement,
}

impl AdjustmentKey {
    pub fn all() -> &'static [AdjustmentKey] {
        &[
            AdjustmentKey::Brightness,
            AdjustmentKey::Contrast,
            AdjustmentKey::Temperature,
            AdjustmentKey::Saturation,
            AdjustmentKey::Enhancement,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            AdjustmentKey::Brightness => "brightness",
            AdjustmentKey::Contrast => "contrast",
            AdjustmentKey::Temperature => "temperature",
            AdjustmentKey::Saturation => "saturation",
            AdjustmentKey::Enhancement => "enhancement",
        }
    }

    /// Declared slider range.  Every key uses `[-100, 100]` with neutral 0;
    /// saturation is additive around 0 (multiplier `1 + s/100`).
    pub fn range(&self) -> (i32, i32) {
        (-100, 100)
    }

    pub fn neutral(&self) -> i32 {
        0
    }

    pub fn clamp_value(&self, value: i32) -> i32 {
        let (lo, hi) = self.range();
        value.clamp(lo, hi)
    }
}

impl fmt::Display for AdjustmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AdjustmentKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "brightness" => Ok(AdjustmentKey::Brightness),
            "contrast" => Ok(AdjustmentKey::Contrast),
            "temperature" | "temp" => Ok(AdjustmentKey::Temperature),
            "saturation" => Ok(AdjustmentKey::Saturation),
            "enhancement" | "enhance" => Ok(AdjustmentKey::Enhancement),
            other => Err(format!("unknown adjustment '{}'", other)),
        }
    }
}

/// Slider values.  `Default` is fully neutral.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentParams {
    pub brightness: i32,
    pub contrast: i32,
    pub temperature: i32,
    pub saturation: i32,
    pub enhancement: i32,
}

impl AdjustmentParams {
    pub const NEUTRAL: AdjustmentParams = AdjustmentParams {
        brightness: 0,
        contrast: 0,
        temperature: 0,
        saturation: 0,
        enhancement: 0,
    };

    pub fn get(&self, key: AdjustmentKey) -> i32 {
        match key {
            AdjustmentKey::Brightness => self.brightness,
            AdjustmentKey::Contrast => self.contrast,
            AdjustmentKey::Temperature => self.temperature,
            AdjustmentKey::Saturation => self.saturation,
            AdjustmentKey::Enhancement => self.enhancement,
        }
    }

    /// Store `value` as given; range enforcement is the caller's job.
    pub fn set(&mut self, key: AdjustmentKey, value: i32) {
        match key {
            AdjustmentKey::Brightness => self.brightness = value,
            AdjustmentKey::Contrast => self.contrast = value,
            AdjustmentKey::Temperature => self.temperature = value,
            AdjustmentKey::Saturation => self.saturation = value,
            AdjustmentKey::Enhancement => self.enhancement = value,
        }
    }

    pub fn with(mut self, key: AdjustmentKey, value: i32) -> Self {
        self.set(key, value);
        self
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }
}

// ============================================================================
// PER-PIXEL TRANSFORM
// ============================================================================

/// Precomputed per-call constants.  Stages at their neutral value are skipped.
#[derive(Clone, Copy, Debug)]
pub struct PixelTransform {
    brightness: Option<f32>,
    contrast: Option<f32>,
    temperature: Option<(f32, f32)>,
    saturation: Option<f32>,
    enhancement: Option<f32>,
}

impl PixelTransform {
    pub fn new(params: &AdjustmentParams) -> Self {
        let brightness = (params.brightness != 0).then(|| params.brightness as f32 * 2.55);

        let contrast = (params.contrast != 0).then(|| {
            let c = params.contrast as f32;
            (259.0 * (c + 255.0)) / (255.0 * (259.0 - c))
        });

        // (red shift, blue shift)
        let temperature = match params.temperature {
            0 => None,
            t if t > 0 => {
                let t = t as f32;
                Some((t * 2.55, -t * 1.275))
            }
            t => {
                let t = (t as f32).abs();
                Some((-t * 1.275, t * 2.55))
            }
        };

        let saturation = (params.saturation != 0).then(|| 1.0 + params.saturation as f32 / 100.0);
        let enhancement = (params.enhancement != 0).then(|| 1.0 + params.enhancement as f32 * 0.01);

        Self {
            brightness,
            contrast,
            temperature,
            saturation,
            enhancement,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.brightness.is_none()
            && self.contrast.is_none()
            && self.temperature.is_none()
            && self.saturation.is_none()
            && self.enhancement.is_none()
    }

    /// Run all active stages on one pixel's RGB, in order.
    #[inline]
    pub fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        let [mut r, mut g, mut b] = rgb;

        if let Some(offset) = self.brightness {
            r = clamp_channel(r + offset);
            g = clamp_channel(g + offset);
            b = clamp_channel(b + offset);
        }

        if let Some(factor) = self.contrast {
            r = clamp_channel(factor * (r - 128.0) + 128.0);
            g = clamp_channel(factor * (g - 128.0) + 128.0);
            b = clamp_channel(factor * (b - 128.0) + 128.0);
        }

        if let Some((red_shift, blue_shift)) = self.temperature {
            r = clamp_channel(r + red_shift);
            b = clamp_channel(b + blue_shift);
        }

        if let Some(factor) = self.saturation {
            let gray = 0.299 * r + 0.587 * g + 0.114 * b;
            r = clamp_channel(gray + (r - gray) * factor);
            g = clamp_channel(gray + (g - gray) * factor);
            b = clamp_channel(gray + (b - gray) * factor);
        }

        if let Some(factor) = self.enhancement {
            r = clamp_channel(128.0 + (r - 128.0) * factor);
            g = clamp_channel(128.0 + (g - 128.0) * factor);
            b = clamp_channel(128.0 + (b - 128.0) * factor);
        }

        [r, g, b]
    }
}

/// Clamp into [0, 255]; NaN (e.g. contrast at its pole) becomes 0.
#[inline]
fn clamp_channel(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 255.0) }
}

#[inline]
fn to_u8(v: f32) -> u8 {
    clamp_channel(v.round()) as u8
}

// ============================================================================
// PIPELINE ENTRY POINT
// ============================================================================

/// Recompute the displayed buffer from `original`.  Alpha is copied through.
pub fn compute_displayed(original: &RgbaImage, params: &AdjustmentParams) -> RgbaImage {
    let transform = PixelTransform::new(params);
    if transform.is_identity() {
        return original.clone();
    }

    let w = original.width() as usize;
    let h = original.height() as usize;
    if w == 0 || h == 0 {
        return original.clone();
    }

    let src_raw = original.as_raw();
    let mut dst_raw = vec![0u8; w * h * 4];
    let stride = w * 4;

    dst_raw.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        let row_in = &src_raw[y * stride..(y + 1) * stride];
        for (px_in, px_out) in row_in.chunks_exact(4).zip(row_out.chunks_exact_mut(4)) {
            let [r, g, b] = transform.apply([px_in[0] as f32, px_in[1] as f32, px_in[2] as f32]);
            px_out[0] = to_u8(r);
            px_out[1] = to_u8(g);
            px_out[2] = to_u8(b);
            px_out[3] = px_in[3];
        }
    });

    // Same dimensions as `original`, so the length always matches.
    RgbaImage::from_raw(w as u32, h as u32, dst_raw).unwrap_or_else(|| original.clone())
}
