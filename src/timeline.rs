//! Declarative timeline model: tracks, clips, effect calls, and transitions.
//!
//! The timeline is pure data. Compilation reads it at one evaluation time and emits a
//! render graph; nothing here touches devices or pixels.

use crate::foundation::color::ColorEncoding;
use crate::foundation::error::{WeftError, WeftResult};
use crate::foundation::time::TimeRange;
use crate::graph::Params;

/// Opaque reference to a media asset, resolved at execution time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct AssetRef(pub String);

impl std::fmt::Display for AssetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of media a clip draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Decoded video frames.
    Video,
    /// A still image.
    Image,
    /// Generated content ("black", test patterns).
    Procedural,
}

/// One feature application on a clip.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct EffectCall {
    /// Feature id, looked up in the manifest set.
    pub feature: String,
    /// Call-site parameter overrides.
    #[serde(default)]
    pub params: Params,
}

/// Easing applied to transition progress. Monotonic by construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ease {
    /// Identity.
    #[default]
    Linear,
    /// Hermite smoothstep.
    SmoothStep,
}

impl Ease {
    /// Map raw progress in `[0, 1]` through the curve.
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::SmoothStep => t * t * (3.0 - 2.0 * t),
        }
    }
}

/// Wipe sweep direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WipeDir {
    /// Front moves from the left edge to the right.
    LeftToRight,
    /// Front moves from the right edge to the left.
    RightToLeft,
    /// Front moves from the top edge down.
    TopToBottom,
    /// Front moves from the bottom edge up.
    BottomToTop,
}

impl WipeDir {
    /// Persisted parameter value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LeftToRight => "left_to_right",
            Self::RightToLeft => "right_to_left",
            Self::TopToBottom => "top_to_bottom",
            Self::BottomToTop => "bottom_to_top",
        }
    }
}

/// The transition family.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionKind {
    /// Hard cut at the window midpoint.
    Cut,
    /// Linear blend from A to B.
    Crossfade,
    /// Fade A to a solid color, then the color to B.
    DipToColor {
        /// The dip color, straight RGBA.
        color: [f32; 4],
    },
    /// Spatial reveal of B along an axis.
    Wipe {
        /// Sweep direction.
        dir: WipeDir,
    },
}

/// A transition out of one clip into the next.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TransitionDescriptor {
    /// Which transition.
    #[serde(flatten)]
    pub kind: TransitionKind,
    /// The time window the transition spans.
    pub window: TimeRange,
    /// Easing applied to raw window progress.
    #[serde(default)]
    pub ease: Ease,
}

impl TransitionDescriptor {
    /// Eased progress at `t`: 0 before the window, 1 after, monotonic within. A pure
    /// function of time, so re-rendering any frame reproduces it exactly.
    pub fn progress(&self, t: f64) -> f64 {
        if self.window.duration_s <= 0.0 {
            return if t >= self.window.start_s { 1.0 } else { 0.0 };
        }
        let raw = (t - self.window.start_s) / self.window.duration_s;
        self.ease.apply(raw)
    }
}

fn default_opacity() -> f64 {
    1.0
}

/// A clip on a track.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Clip {
    /// Stable clip id, used in diagnostics.
    pub id: String,
    /// The media it draws from.
    pub asset: AssetRef,
    /// Media kind.
    pub source: SourceKind,
    /// The encoding the media is stored in, converted to the working space at ingest.
    pub encoding: ColorEncoding,
    /// Placement on the timeline.
    pub range: TimeRange,
    /// Composited opacity over lower tracks.
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    /// Effect chain, applied in order.
    #[serde(default)]
    pub effects: Vec<EffectCall>,
    /// Transition out of this clip into its successor on the same track.
    #[serde(default)]
    pub transition_out: Option<TransitionDescriptor>,
}

/// A horizontal lane of clips. Later tracks composite over earlier ones.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Track {
    /// Display name.
    pub name: String,
    /// Clips in timeline order.
    pub clips: Vec<Clip>,
}

impl Track {
    /// Clips whose range contains `t`, in declaration order.
    pub fn active_at(&self, t: f64) -> Vec<&Clip> {
        self.clips.iter().filter(|c| c.range.contains(t)).collect()
    }
}

/// Output canvas dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

fn default_output_encoding() -> ColorEncoding {
    ColorEncoding::Srgb
}

/// The whole edit.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Timeline {
    /// Output canvas.
    pub canvas: Canvas,
    /// Encoding of the delivered frame.
    #[serde(default = "default_output_encoding")]
    pub output_encoding: ColorEncoding,
    /// Tracks, bottom first.
    pub tracks: Vec<Track>,
}

impl Timeline {
    /// Structural validation: sane canvas, valid ranges and opacities, transition
    /// windows inside a real overlap candidate.
    pub fn validate(&self) -> WeftResult<()> {
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(WeftError::validation("canvas dimensions must be nonzero"));
        }
        for track in &self.tracks {
            for clip in &track.clips {
                if !clip.range.duration_s.is_finite() || clip.range.duration_s <= 0.0 {
                    return Err(WeftError::validation(format!(
                        "clip '{}': duration must be positive and finite",
                        clip.id
                    )));
                }
                if !(0.0..=1.0).contains(&clip.opacity) {
                    return Err(WeftError::validation(format!(
                        "clip '{}': opacity {} outside [0, 1]",
                        clip.id, clip.opacity
                    )));
                }
                if let Some(tr) = &clip.transition_out
                    && tr.window.duration_s < 0.0
                {
                    return Err(WeftError::validation(format!(
                        "clip '{}': negative transition window",
                        clip.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// End of the last clip on any track, in seconds.
    pub fn duration_s(&self) -> f64 {
        self.tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .map(|c| c.range.end_s())
            .fold(0.0, f64::max)
    }
}
