//! Color encodings and transfer functions.
//!
//! The engine processes everything in a single internal working space: linear-light,
//! Rec.709 primaries, premultiplied-alpha `f32` RGBA. Sources declare their native
//! encoding; the compiler inserts the input transform (IDT) immediately downstream of
//! every non-working source and the output transform (ODT) immediately upstream of the
//! final output. No other node ever observes a non-working encoding.

/// A pixel color encoding observed at a node boundary.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ColorEncoding {
    /// Linear light, Rec.709 primaries. The internal working space.
    Linear,
    /// sRGB transfer function.
    Srgb,
    /// Rec.709 OETF (BT.709 camera curve).
    Rec709,
}

impl ColorEncoding {
    /// The single internal working space.
    pub const WORKING: ColorEncoding = ColorEncoding::Linear;

    /// `true` when this encoding is the internal working space.
    pub fn is_working(self) -> bool {
        self == Self::WORKING
    }
}

/// sRGB electro-optical transfer: encoded value to linear light.
pub fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

/// Inverse sRGB transfer: linear light to encoded value.
pub fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// Rec.709 inverse OETF: encoded value to linear light.
pub fn rec709_to_linear(v: f32) -> f32 {
    if v < 0.081 {
        v / 4.5
    } else {
        ((v + 0.099) / 1.099).powf(1.0 / 0.45)
    }
}

/// Rec.709 OETF: linear light to encoded value.
pub fn linear_to_rec709(v: f32) -> f32 {
    if v < 0.018 {
        v * 4.5
    } else {
        1.099 * v.powf(0.45) - 0.099
    }
}

/// Relative luminance of one linear-light RGB triple (Rec.709 weights).
pub fn luminance(r: f32, g: f32, b: f32) -> f32 {
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

/// Mean luminance across a tightly packed RGBA32F buffer.
pub fn mean_luminance(pixels: &[f32]) -> f32 {
    let n = pixels.len() / 4;
    if n == 0 {
        return 0.0;
    }
    let mut acc = 0.0f64;
    for px in pixels.chunks_exact(4) {
        acc += f64::from(luminance(px[0], px[1], px[2]));
    }
    (acc / n as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_space_is_linear() {
        assert!(ColorEncoding::Linear.is_working());
        assert!(!ColorEncoding::Srgb.is_working());
        assert!(!ColorEncoding::Rec709.is_working());
    }

    #[test]
    fn srgb_round_trip_anchors() {
        // Anchor values from the sRGB definition.
        assert!((srgb_to_linear(0.0) - 0.0).abs() < 1e-6);
        assert!((srgb_to_linear(1.0) - 1.0).abs() < 1e-6);
        assert!((srgb_to_linear(0.5) - 0.2140).abs() < 1e-3);
        for &v in &[0.0f32, 0.02, 0.25, 0.5, 0.75, 1.0] {
            assert!((linear_to_srgb(srgb_to_linear(v)) - v).abs() < 1e-5);
        }
    }

    #[test]
    fn rec709_round_trip() {
        for &v in &[0.0f32, 0.05, 0.3, 0.7, 1.0] {
            assert!((linear_to_rec709(rec709_to_linear(v)) - v).abs() < 1e-5);
        }
    }

    #[test]
    fn mean_luminance_of_mid_gray() {
        let px = vec![0.5f32, 0.5, 0.5, 1.0].repeat(16);
        assert!((mean_luminance(&px) - 0.5).abs() < 1e-6);
    }
}
