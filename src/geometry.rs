//! Frame geometry for reframing a source to 16:9.
//!
//! Everything here is integer arithmetic on pixel counts, no media types.
//! A 16:9 target is always built from a unit count `k` as `16k x 9k`, with
//! `k` even so both dimensions stay even for 4:2:0 chroma subsampling.

use std::{fmt, str::FromStr};

use image::Rgb;

use crate::error::ConversionError;

/// Sources whose width is within this many `width * 9 - height * 16` units
/// of 16:9 are passed through unchanged (one pixel of width is 9 units).
const PASSTHROUGH_TOLERANCE: u64 = 16;

/// Exact 16:9 output dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetGeometry {
    width: u32,
    height: u32,
}

impl TargetGeometry {
    fn from_units(k: u32) -> Self {
        Self {
            width: 16 * k,
            height: 9 * k,
        }
    }

    /// Largest even-unit 16:9 rectangle that fits inside `width x height`.
    pub fn within(width: u32, height: u32) -> Option<Self> {
        let k = (width / 16).min(height / 9) & !1;
        (k > 0).then(|| Self::from_units(k))
    }

    /// Smallest even-unit 16:9 rectangle that contains `width x height`.
    pub fn covering(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let k = width.div_ceil(16).max(height.div_ceil(9));
        let k = k + (k & 1);
        Some(Self::from_units(k))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl fmt::Display for TargetGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How a source that is not 16:9 is brought to 16:9.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FitPolicy {
    /// Trim the overflowing edges, keeping the frame centered.
    #[default]
    Crop,
    /// Keep all content and add letterbox or pillarbox bars.
    Pad,
}

/// Colour of padding bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillColor(pub Rgb<u8>);

impl Default for FillColor {
    fn default() -> Self {
        Self(Rgb([0, 0, 0]))
    }
}

impl FillColor {
    /// BT.601 limited range `(Y, Cb, Cr)`.
    pub fn to_yuv(self) -> [u8; 3] {
        let [r, g, b] = self.0 .0.map(i32::from);
        let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
        let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
        let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
        [y, u, v].map(|c| c.clamp(0, 255) as u8)
    }
}

impl FromStr for FillColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let named = match s.to_ascii_lowercase().as_str() {
            "black" => Some([0, 0, 0]),
            "white" => Some([255, 255, 255]),
            "gray" | "grey" => Some([128, 128, 128]),
            _ => None,
        };
        if let Some(rgb) = named {
            return Ok(Self(Rgb(rgb)));
        }

        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(format!("expected a colour name or #rrggbb, got {s:?}"));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| format!("invalid hex colour {s:?}"))
        };
        Ok(Self(Rgb([channel(0)?, channel(2)?, channel(4)?])))
    }
}

impl fmt::Display for FillColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0 .0;
        write!(f, "#{r:02x}{g:02x}{b:02x}")
    }
}

/// How each source frame is relocated into the target frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformPlan {
    /// Keep the `width x height` window at `(x_offset, y_offset)` of the source.
    Crop {
        x_offset: u32,
        y_offset: u32,
        width: u32,
        height: u32,
    },
    /// Place the source inside bars of `fill_color`.
    Pad {
        top: u32,
        bottom: u32,
        left: u32,
        right: u32,
        fill_color: FillColor,
    },
}

impl fmt::Display for TransformPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crop {
                x_offset,
                y_offset,
                width,
                height,
            } => write!(f, "crop {width}x{height} at ({x_offset}, {y_offset})"),
            Self::Pad {
                top,
                bottom,
                left,
                right,
                fill_color,
            } => write!(
                f,
                "pad top={top} bottom={bottom} left={left} right={right} with {fill_color}"
            ),
        }
    }
}

/// Outcome of planning: the output geometry and, unless the source is
/// already 16:9, the transform that produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub source_width: u32,
    pub source_height: u32,
    pub target: TargetGeometry,
    pub transform: Option<TransformPlan>,
}

impl Plan {
    /// Decides how a `width x height` source becomes 16:9.
    pub fn new(
        width: u32,
        height: u32,
        policy: FitPolicy,
        fill_color: FillColor,
    ) -> Result<Self, ConversionError> {
        let geometry_error = || ConversionError::Geometry { width, height };
        if width == 0 || height == 0 {
            return Err(geometry_error());
        }

        if is_widescreen(width, height) {
            return Ok(Self {
                source_width: width,
                source_height: height,
                target: TargetGeometry { width, height },
                transform: None,
            });
        }

        let (target, transform) = match policy {
            FitPolicy::Crop => {
                let target = TargetGeometry::within(width, height).ok_or_else(geometry_error)?;
                let transform = TransformPlan::Crop {
                    x_offset: centered(width - target.width),
                    y_offset: centered(height - target.height),
                    width: target.width,
                    height: target.height,
                };
                (target, transform)
            }
            FitPolicy::Pad => {
                let target = TargetGeometry::covering(width, height).ok_or_else(geometry_error)?;
                let horizontal = target.width - width;
                let vertical = target.height - height;
                let left = centered(horizontal);
                let top = centered(vertical);
                let transform = TransformPlan::Pad {
                    top,
                    bottom: vertical - top,
                    left,
                    right: horizontal - left,
                    fill_color,
                };
                (target, transform)
            }
        };

        Ok(Self {
            source_width: width,
            source_height: height,
            target,
            transform: Some(transform),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.transform.is_none()
    }
}

/// True when the width is within one pixel of `height * 16 / 9`.
pub fn is_widescreen(width: u32, height: u32) -> bool {
    let w = u64::from(width) * 9;
    let h = u64::from(height) * 16;
    w.abs_diff(h) <= PASSTHROUGH_TOLERANCE
}

/// Half of `slack`, floored to an even pixel.
fn centered(slack: u32) -> u32 {
    (slack / 2) & !1
}

pub fn ratio(width: u32, height: u32) -> f64 {
    f64::from(width) / f64::from(height)
}
