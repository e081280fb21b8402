//! Aspect ratio + long-edge resolution to concrete pixel dimensions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Edge of the placeholder square sent when the server picks dimensions.
pub const PLACEHOLDER_EDGE: u32 = 1024;

/// A user-chosen aspect ratio: either `auto` or `W:H`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectRatio {
    Auto,
    Fixed { w: u32, h: u32 },
}

impl AspectRatio {
    /// Resolve against a long-edge resolution. `placeholder` is used for `Auto`.
    pub fn resolve(self, resolution: u32, placeholder: u32) -> Result<Dimensions> {
        match self {
            AspectRatio::Auto => Ok(Dimensions {
                width: placeholder,
                height: placeholder,
                is_auto: true,
            }),
            AspectRatio::Fixed { w, h } => {
                if resolution == 0 {
                    return Err(EngineError::InvalidRatio(
                        "resolution must be greater than zero".into(),
                    ));
                }
                let (long, short) = if w >= h { (w, h) } else { (h, w) };
                let scaled = (resolution as f64 * short as f64 / long as f64).round() as u32;
                if scaled == 0 {
                    return Err(EngineError::InvalidRatio(format!(
                        "{}:{} is too extreme for {}px",
                        w, h, resolution
                    )));
                }
                let (width, height) = if w >= h {
                    (resolution, scaled)
                } else {
                    (scaled, resolution)
                };
                Ok(Dimensions {
                    width,
                    height,
                    is_auto: false,
                })
            }
        }
    }
}

impl FromStr for AspectRatio {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "auto" {
            return Ok(AspectRatio::Auto);
        }
        let (w, h) = s
            .split_once(':')
            .ok_or_else(|| EngineError::InvalidRatio(format!("expected W:H, got {:?}", s)))?;
        let parse = |part: &str| -> Result<u32> {
            part.trim()
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| EngineError::InvalidRatio(format!("bad component in {:?}", s)))
        };
        Ok(AspectRatio::Fixed {
            w: parse(w)?,
            h: parse(h)?,
        })
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AspectRatio::Auto => write!(f, "auto"),
            AspectRatio::Fixed { w, h } => write!(f, "{}:{}", w, h),
        }
    }
}

/// Concrete output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub is_auto: bool,
}

impl Dimensions {
    /// The backend's `image_size` field: the server only knows `auto` and `custom`.
    pub fn image_size_param(&self) -> &'static str {
        if self.is_auto {
            "auto"
        } else {
            "custom"
        }
    }
}

/// Resolve `ratio` ("auto" or "W:H") at the given long-edge resolution.
///
/// # Example
/// ```
/// use gallery_jobs::resolve_dimensions;
///
/// let dim = resolve_dimensions("16:9", 1280).unwrap();
/// assert_eq!((dim.width, dim.height), (1280, 720));
/// ```
pub fn resolve_dimensions(ratio: &str, resolution: u32) -> Result<Dimensions> {
    ratio.parse::<AspectRatio>()?.resolve(resolution, PLACEHOLDER_EDGE)
}
