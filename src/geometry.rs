//! Conversions between display space (pixels on the rendered canvas) and
//! normalized label space (unit square, YOLO convention: center-x, center-y,
//! width, height).
//!
//! Normalization always divides by the dimensions of the canvas the rectangle
//! was actually drawn on. Dividing by the source image dimensions after a
//! zoom/rotation has been applied upstream silently corrupts every box, so the
//! canvas size itself is computed here ([`canvas_size`]) and the UI is expected
//! to feed it back unchanged.

use crate::error::CoreError;

/// Fixed height of the rendered canvas before zoom.
pub const CANVAS_HEIGHT: f64 = 600.0;
/// Cap on the derived canvas width, so extreme aspect ratios do not produce
/// degenerate layouts.
pub const MAX_CANVAS_WIDTH: f64 = 1600.0;

/// A rectangle in canvas pixels. Width and height may be negative when the
/// user dragged from the far corner backwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// A normalized axis-aligned box: center and extent as fractions of the image
/// dimensions, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxGeometry {
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
}

/// Quarter-turn rotation applied to the stored image before rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

/// Dimensions of the rendered canvas in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasSize {
    pub width: f64,
    pub height: f64,
}

impl Rotation {
    /// Pixel dimensions of the image as presented to the annotator. 90/270
    /// swap width and height.
    pub fn presented_dims(self, width_px: u32, height_px: u32) -> (u32, u32) {
        match self {
            Rotation::Deg0 | Rotation::Deg180 => (width_px, height_px),
            Rotation::Deg90 | Rotation::Deg270 => (height_px, width_px),
        }
    }
}

/// Canvas size for an image presented at the given dimensions: height fixed at
/// [`CANVAS_HEIGHT`], width from the aspect ratio capped at
/// [`MAX_CANVAS_WIDTH`], then the zoom multiplier. Dimensions must be known
/// and positive; an unregistered size fails with
/// [`CoreError::MissingDimensions`] rather than defaulting.
pub fn canvas_size(presented_w: u32, presented_h: u32, zoom: f64) -> Result<CanvasSize, CoreError> {
    if presented_w == 0 || presented_h == 0 || !zoom.is_finite() || zoom <= 0.0 {
        return Err(CoreError::MissingDimensions);
    }
    let aspect = presented_w as f64 / presented_h as f64;
    let width = (CANVAS_HEIGHT * aspect).min(MAX_CANVAS_WIDTH);
    Ok(CanvasSize {
        width: width * zoom,
        height: CANVAS_HEIGHT * zoom,
    })
}

fn clamp_unit(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Normalize a canvas-space rectangle into the unit square.
///
/// Backward drags (negative width/height) are folded into the equivalent
/// forward rectangle first. Edges are clamped into [0, 1]; small overshoot
/// from pixel rounding at the image border is silent correction, not an
/// error.
pub fn to_normalized(rect: PixelRect, canvas: CanvasSize) -> BoxGeometry {
    let (left, width) = if rect.width >= 0.0 {
        (rect.left, rect.width)
    } else {
        (rect.left + rect.width, -rect.width)
    };
    let (top, height) = if rect.height >= 0.0 {
        (rect.top, rect.height)
    } else {
        (rect.top + rect.height, -rect.height)
    };

    let x0 = clamp_unit(left / canvas.width);
    let x1 = clamp_unit((left + width) / canvas.width);
    let y0 = clamp_unit(top / canvas.height);
    let y1 = clamp_unit((top + height) / canvas.height);

    BoxGeometry {
        center_x: (x0 + x1) / 2.0,
        center_y: (y0 + y1) / 2.0,
        width: x1 - x0,
        height: y1 - y0,
    }
}

/// Inverse of [`to_normalized`], used to draw saved boxes back onto a canvas
/// for review.
pub fn to_display_pixels(geo: BoxGeometry, canvas: CanvasSize) -> PixelRect {
    PixelRect {
        left: (geo.center_x - geo.width / 2.0) * canvas.width,
        top: (geo.center_y - geo.height / 2.0) * canvas.height,
        width: geo.width * canvas.width,
        height: geo.height * canvas.height,
    }
}

impl BoxGeometry {
    /// Clamp the box into the unit square, preserving the clamped edges.
    pub fn clamped(self) -> BoxGeometry {
        let x0 = clamp_unit(self.center_x - self.width / 2.0);
        let x1 = clamp_unit(self.center_x + self.width / 2.0);
        let y0 = clamp_unit(self.center_y - self.height / 2.0);
        let y1 = clamp_unit(self.center_y + self.height / 2.0);
        BoxGeometry {
            center_x: (x0 + x1) / 2.0,
            center_y: (y0 + y1) / 2.0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }

    /// A box with no area carries no label information.
    pub fn is_degenerate(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Map a box normalized against the rotated rendering back into the
    /// stored image's frame. Axis-aligned boxes map exactly under quarter
    /// turns; only center position and the width/height pairing change.
    pub fn into_stored_frame(self, rotation: Rotation) -> BoxGeometry {
        match rotation {
            Rotation::Deg0 => self,
            Rotation::Deg90 => BoxGeometry {
                center_x: self.center_y,
                center_y: 1.0 - self.center_x,
                width: self.height,
                height: self.width,
            },
            Rotation::Deg180 => BoxGeometry {
                center_x: 1.0 - self.center_x,
                center_y: 1.0 - self.center_y,
                width: self.width,
                height: self.height,
            },
            Rotation::Deg270 => BoxGeometry {
                center_x: 1.0 - self.center_y,
                center_y: self.center_x,
                width: self.height,
                height: self.width,
            },
        }
    }

    /// Map a stored-frame box into the rotated rendering, for overlaying
    /// saved boxes while the annotator has a rotation active.
    pub fn into_presented_frame(self, rotation: Rotation) -> BoxGeometry {
        match rotation {
            Rotation::Deg0 => self,
            Rotation::Deg90 => BoxGeometry {
                center_x: 1.0 - self.center_y,
                center_y: self.center_x,
                width: self.height,
                height: self.width,
            },
            Rotation::Deg180 => BoxGeometry {
                center_x: 1.0 - self.center_x,
                center_y: 1.0 - self.center_y,
                width: self.width,
                height: self.height,
            },
            Rotation::Deg270 => BoxGeometry {
                center_x: self.center_y,
                center_y: 1.0 - self.center_x,
                width: self.height,
                height: self.width,
            },
        }
    }
}

/// Full inbound path for a drawn rectangle: normalize against the canvas it
/// was drawn on, then undo the active rotation so the stored box is always in
/// the stored image's frame.
pub fn normalize_drawn(rect: PixelRect, canvas: CanvasSize, rotation: Rotation) -> BoxGeometry {
    to_normalized(rect, canvas).into_stored_frame(rotation)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANVAS: CanvasSize = CanvasSize {
        width: 800.0,
        height: 600.0,
    };

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "expected {b}, got {a}");
    }

    #[test]
    fn round_trip_inside_canvas() {
        let rect = PixelRect {
            left: 120.0,
            top: 45.0,
            width: 200.0,
            height: 330.0,
        };
        let back = to_display_pixels(to_normalized(rect, CANVAS), CANVAS);
        assert_close(back.left, rect.left);
        assert_close(back.top, rect.top);
        assert_close(back.width, rect.width);
        assert_close(back.height, rect.height);
    }

    #[test]
    fn backward_drag_matches_forward() {
        let forward = PixelRect {
            left: 100.0,
            top: 50.0,
            width: 200.0,
            height: 100.0,
        };
        let backward = PixelRect {
            left: 300.0,
            top: 150.0,
            width: -200.0,
            height: -100.0,
        };
        assert_eq!(
            to_normalized(forward, CANVAS),
            to_normalized(backward, CANVAS)
        );
    }

    #[test]
    fn overshoot_is_clamped_to_edge() {
        let rect = PixelRect {
            left: -5.0,
            top: -5.0,
            width: 900.0,
            height: 700.0,
        };
        let geo = to_normalized(rect, CANVAS);
        assert_close(geo.center_x - geo.width / 2.0, 0.0);
        assert_close(geo.center_y - geo.height / 2.0, 0.0);
        assert_close(geo.center_x + geo.width / 2.0, 1.0);
        assert_close(geo.center_y + geo.height / 2.0, 1.0);
    }

    #[test]
    fn canvas_width_follows_aspect_ratio() {
        let canvas = canvas_size(400, 300, 1.0).unwrap();
        assert_close(canvas.width, 800.0);
        assert_close(canvas.height, 600.0);
    }

    #[test]
    fn canvas_width_is_capped() {
        let canvas = canvas_size(10_000, 100, 1.0).unwrap();
        assert_close(canvas.width, MAX_CANVAS_WIDTH);
    }

    #[test]
    fn zoom_scales_both_dimensions() {
        let canvas = canvas_size(400, 300, 2.0).unwrap();
        assert_close(canvas.width, 1600.0);
        assert_close(canvas.height, 1200.0);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(canvas_size(0, 300, 1.0).is_err());
        assert!(canvas_size(400, 0, 1.0).is_err());
    }

    #[test]
    fn rotation_round_trips_through_stored_frame() {
        let geo = BoxGeometry {
            center_x: 0.25,
            center_y: 0.6,
            width: 0.1,
            height: 0.3,
        };
        for rotation in [
            Rotation::Deg0,
            Rotation::Deg90,
            Rotation::Deg180,
            Rotation::Deg270,
        ] {
            let back = geo
                .into_stored_frame(rotation)
                .into_presented_frame(rotation);
            assert_close(back.center_x, geo.center_x);
            assert_close(back.center_y, geo.center_y);
            assert_close(back.width, geo.width);
            assert_close(back.height, geo.height);
        }
    }

    #[test]
    fn quarter_turn_swaps_extents() {
        let geo = BoxGeometry {
            center_x: 0.5,
            center_y: 0.5,
            width: 0.4,
            height: 0.2,
        };
        let stored = geo.into_stored_frame(Rotation::Deg90);
        assert_close(stored.width, 0.2);
        assert_close(stored.height, 0.4);
    }

    #[test]
    fn deg90_top_left_maps_to_stored_bottom_left() {
        // A box drawn in the top-left of a 90-degree-rotated rendering sits in
        // the bottom-left of the stored image.
        let geo = BoxGeometry {
            center_x: 0.1,
            center_y: 0.1,
            width: 0.1,
            height: 0.1,
        };
        let stored = geo.into_stored_frame(Rotation::Deg90);
        assert_close(stored.center_x, 0.1);
        assert_close(stored.center_y, 0.9);
    }

    #[test]
    fn normalize_drawn_undoes_the_rotation() {
        // Stored image 400x300, presented rotated 90 degrees: 300x400, so the
        // canvas is 450x600. A rectangle in the canvas top-left corner lands
        // in the stored image's bottom-left corner.
        let (pw, ph) = Rotation::Deg90.presented_dims(400, 300);
        let canvas = canvas_size(pw, ph, 1.0).unwrap();
        assert_close(canvas.width, 450.0);

        let rect = PixelRect {
            left: 0.0,
            top: 0.0,
            width: 45.0,
            height: 60.0,
        };
        let stored = normalize_drawn(rect, canvas, Rotation::Deg90);
        assert_close(stored.center_x, 0.05);
        assert_close(stored.center_y, 0.95);
        assert_close(stored.width, 0.1);
        assert_close(stored.height, 0.1);
    }

    #[test]
    fn presented_dims_swap_on_quarter_turns() {
        assert_eq!(Rotation::Deg90.presented_dims(400, 300), (300, 400));
        assert_eq!(Rotation::Deg180.presented_dims(400, 300), (400, 300));
    }

    #[test]
    fn clamped_preserves_interior_boxes() {
        let geo = BoxGeometry {
            center_x: 0.5,
            center_y: 0.5,
            width: 0.2,
            height: 0.1,
        };
        assert_eq!(geo.clamped(), geo);
    }

    #[test]
    fn degenerate_after_clamp_is_detected() {
        // Entirely outside the unit square: clamps to a zero-area sliver.
        let geo = BoxGeometry {
            center_x: 1.5,
            center_y: 0.5,
            width: 0.2,
            height: 0.1,
        };
        assert!(geo.clamped().is_degenerate());
    }
}
