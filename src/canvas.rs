// ============================================================================
// CANVAS - mask surface, stroke coordinates and the display viewport
// ============================================================================
//
// The mask surface is an RGBA overlay the size of the *display* raster: the
// brush paints a translucent constant onto it and any pixel with non-zero
// alpha counts as "marked".  The viewport converts pointer positions in
// display space into surface pixels under zoom, pan and device pixel ratio.
// ============================================================================

use std::time::{Duration, Instant};

use egui::{Pos2, Rect, Vec2};
use image::{GrayImage, Luma, RgbaImage};
use serde::{Deserialize, Serialize};

// ============================================================================
// STROKE POINT
// ============================================================================

/// One sampled brush position in surface pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f32,
    pub y: f32,
}

impl StrokePoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Rescale by independent x / y factors (surface resize, display→original).
    pub fn scaled(self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn to_pos2(self) -> Pos2 {
        Pos2::new(self.x, self.y)
    }
}

impl From<Pos2> for StrokePoint {
    fn from(p: Pos2) -> Self {
        Self::new(p.x, p.y)
    }
}

// ============================================================================
// SURFACE ERRORS
// ============================================================================

/// Largest accepted surface edge, in pixels.
pub const MAX_SURFACE_DIM: u32 = 32_768;

/// Rejects zero and oversized dimensions.
pub fn check_dimensions(width: u32, height: u32) -> Result<(), SurfaceError> {
    if width == 0 || height == 0 {
        return Err(SurfaceError::ZeroSized);
    }
    if width > MAX_SURFACE_DIM || height > MAX_SURFACE_DIM {
        return Err(SurfaceError::TooLarge { width, height });
    }
    Ok(())
}

/// Unrecoverable surface states.  Everything else in the mask pipeline is
/// fail-soft and never produces an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// Width or height is zero.
    ZeroSized,
    /// Width or height exceeds [`MAX_SURFACE_DIM`].
    TooLarge { width: u32, height: u32 },
    /// A buffer of one size was handed to a surface of another.
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// Raw pixel data does not hold `width * height * 4` bytes.
    BufferLength { expected: usize, actual: usize },
}

impl std::fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceError::ZeroSized => write!(f, "surface has zero width or height"),
            SurfaceError::TooLarge { width, height } => write!(
                f,
                "surface {}x{} exceeds the {} px per-axis limit",
                width, height, MAX_SURFACE_DIM
            ),
            SurfaceError::DimensionMismatch { expected, actual } => write!(
                f,
                "surface size mismatch: expected {}x{}, got {}x{}",
                expected.0, expected.1, actual.0, actual.1
            ),
            SurfaceError::BufferLength { expected, actual } => write!(
                f,
                "pixel buffer holds {} bytes, expected {}",
                actual, expected
            ),
        }
    }
}

impl std::error::Error for SurfaceError {}

// ============================================================================
// MASK SURFACE
// ============================================================================

/// The paint surface strokes are rasterized onto.
///
/// Cloning produces an independent deep copy of the pixel data, which is what
/// history snapshots rely on.
#[derive(Clone, PartialEq)]
pub struct MaskSurface {
    pixels: RgbaImage,
}

impl std::fmt::Debug for MaskSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskSurface")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("marked", &self.marked_pixel_count())
            .finish()
    }
}

impl MaskSurface {
    /// Fully transparent surface of the given size.
    pub fn new(width: u32, height: u32) -> Result<Self, SurfaceError> {
        check_dimensions(width, height)?;
        Ok(Self {
            pixels: RgbaImage::new(width, height),
        })
    }

    /// Wrap an existing overlay image.
    pub fn from_image(pixels: RgbaImage) -> Result<Self, SurfaceError> {
        check_dimensions(pixels.width(), pixels.height())?;
        Ok(Self { pixels })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut RgbaImage {
        &mut self.pixels
    }

    /// Erase every mark.
    pub fn clear(&mut self) {
        for p in self.pixels.pixels_mut() {
            p.0 = [0, 0, 0, 0];
        }
    }

    /// True when the pixel carries any mask alpha.  Out-of-range reads are
    /// unmarked.
    pub fn is_marked(&self, x: u32, y: u32) -> bool {
        self.pixels
            .get_pixel_checked(x, y)
            .is_some_and(|p| p.0[3] > 0)
    }

    pub fn marked_pixel_count(&self) -> usize {
        self.pixels.pixels().filter(|p| p.0[3] > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.pixels().all(|p| p.0[3] == 0)
    }

    /// Binary mask at surface resolution: 255 where marked, 0 elsewhere.
    pub fn to_hole_mask(&self) -> GrayImage {
        let (w, h) = self.dimensions();
        let mut mask = GrayImage::new(w, h);
        for (x, y, p) in self.pixels.enumerate_pixels() {
            if p.0[3] > 0 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask
    }

    pub fn memory_bytes(&self) -> usize {
        self.pixels.as_raw().len()
    }
}

// ============================================================================
// VIEWPORT - zoom / pan state and pointer mapping
// ============================================================================

pub const MIN_ZOOM: f32 = 0.1;
pub const MAX_ZOOM: f32 = 3.0;
const ZOOM_STEP: f32 = 1.2;
/// Default maximum pan magnitude (display pixels, per axis).
pub const DEFAULT_MAX_PAN_OFFSET: f32 = 500.0;

/// Map a display-space pointer position into surface pixels.
///
/// `viewport_rect` is the on-screen rectangle the surface currently occupies
/// (already scaled and panned).  The result is always clamped to
/// `[0, width] × [0, height]`; a degenerate rectangle maps everything onto the
/// surface origin.
pub fn map_to_surface(
    pointer: Pos2,
    viewport_rect: Rect,
    surface_width: u32,
    surface_height: u32,
) -> StrokePoint {
    let w = surface_width as f32;
    let h = surface_height as f32;
    let scale_x = if viewport_rect.width() > f32::EPSILON {
        w / viewport_rect.width()
    } else {
        0.0
    };
    let scale_y = if viewport_rect.height() > f32::EPSILON {
        h / viewport_rect.height()
    } else {
        0.0
    };

    let rel = pointer - viewport_rect.min;
    let x = rel.x * scale_x;
    let y = rel.y * scale_y;

    // NaN input collapses to the origin rather than escaping the clamp.
    let x = if x.is_nan() { 0.0 } else { x.clamp(0.0, w) };
    let y = if y.is_nan() { 0.0 } else { y.clamp(0.0, h) };
    StrokePoint::new(x, y)
}

/// Display-side view of the surface inside its container.
#[derive(Clone, Debug, PartialEq)]
pub struct Viewport {
    /// Size of the visible container in display (CSS-like) pixels.
    container: Vec2,
    pub zoom: f32,
    pan_offset: Vec2,
    /// Surface pixels per display pixel at zoom 1.0.
    device_pixel_ratio: f32,
    max_pan_offset: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(Vec2::new(800.0, 600.0), 1.0)
    }
}

impl Viewport {
    pub fn new(container: Vec2, device_pixel_ratio: f32) -> Self {
        Self {
            container,
            zoom: 1.0,
            pan_offset: Vec2::ZERO,
            device_pixel_ratio: sanitize_ratio(device_pixel_ratio),
            max_pan_offset: DEFAULT_MAX_PAN_OFFSET,
        }
    }

    pub fn with_max_pan_offset(mut self, max_pan_offset: f32) -> Self {
        self.max_pan_offset = max_pan_offset.abs();
        self.clamp_pan();
        self
    }

    pub fn container(&self) -> Vec2 {
        self.container
    }

    pub fn set_container(&mut self, container: Vec2) {
        self.container = container;
    }

    pub fn device_pixel_ratio(&self) -> f32 {
        self.device_pixel_ratio
    }

    pub fn set_device_pixel_ratio(&mut self, ratio: f32) {
        self.device_pixel_ratio = sanitize_ratio(ratio);
    }

    pub fn pan_offset(&self) -> Vec2 {
        self.pan_offset
    }

    pub fn zoom_in(&mut self) {
        self.apply_zoom(ZOOM_STEP);
    }

    pub fn zoom_out(&mut self) {
        self.apply_zoom(1.0 / ZOOM_STEP);
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = clamp_zoom(zoom);
    }

    pub fn apply_zoom(&mut self, zoom_factor: f32) {
        self.zoom = clamp_zoom(self.zoom * zoom_factor);
    }

    /// Zoom while keeping `anchor` (display space, relative to the container
    /// origin) over the same surface point, as far as the pan limit allows.
    pub fn zoom_around_point(&mut self, zoom_factor: f32, anchor: Pos2) {
        let old_zoom = self.zoom;
        self.apply_zoom(zoom_factor);
        let actual_factor = self.zoom / old_zoom;
        let container_center = Pos2::new(self.container.x * 0.5, self.container.y * 0.5);
        let old_center = container_center + self.pan_offset;
        let new_center = anchor + (old_center - anchor) * actual_factor;
        self.pan_offset = new_center - container_center;
        self.clamp_pan();
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.pan_offset += delta;
        self.clamp_pan();
    }

    pub fn reset(&mut self) {
        self.zoom = 1.0;
        self.pan_offset = Vec2::ZERO;
    }

    fn clamp_pan(&mut self) {
        let m = self.max_pan_offset;
        let x = if self.pan_offset.x.is_finite() { self.pan_offset.x.clamp(-m, m) } else { 0.0 };
        let y = if self.pan_offset.y.is_finite() { self.pan_offset.y.clamp(-m, m) } else { 0.0 };
        self.pan_offset = Vec2::new(x, y);
    }

    /// On-screen rectangle of a `surface_width × surface_height` surface,
    /// centred in the container and shifted by the pan offset.
    pub fn visible_rect(&self, surface_width: u32, surface_height: u32) -> Rect {
        let size = Vec2::new(
            surface_width as f32 / self.device_pixel_ratio * self.zoom,
            surface_height as f32 / self.device_pixel_ratio * self.zoom,
        );
        let center = Pos2::new(self.container.x * 0.5, self.container.y * 0.5) + self.pan_offset;
        Rect::from_center_size(center, size)
    }

    /// Pointer (container-relative display coordinates) → surface pixels.
    pub fn map_pointer(&self, pointer: Pos2, surface_width: u32, surface_height: u32) -> StrokePoint {
        let rect = self.visible_rect(surface_width, surface_height);
        map_to_surface(pointer, rect, surface_width, surface_height)
    }
}

fn clamp_zoom(zoom: f32) -> f32 {
    if zoom.is_finite() {
        zoom.clamp(MIN_ZOOM, MAX_ZOOM)
    } else {
        1.0
    }
}

fn sanitize_ratio(ratio: f32) -> f32 {
    if ratio.is_finite() && ratio > 0.0 { ratio } else { 1.0 }
}

// ============================================================================
// RESIZE DEBOUNCER
// ============================================================================

/// Coalesces bursts of surface-resize requests; only the last one in a burst
/// is released, once `delay` has passed without a newer request.
#[derive(Clone, Debug)]
pub struct ResizeDebouncer {
    delay: Duration,
    pending: Option<(u32, u32, Instant)>,
}

impl ResizeDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn request(&mut self, width: u32, height: u32, now: Instant) {
        self.pending = Some((width, height, now));
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns the settled size once the burst has gone quiet.
    pub fn poll(&mut self, now: Instant) -> Option<(u32, u32)> {
        let (w, h, at) = self.pending?;
        if now.saturating_duration_since(at) >= self.delay {
            self.pending = None;
            Some((w, h))
        } else {
            None
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_surface_is_rejected() {
        assert_eq!(MaskSurface::new(0, 10).unwrap_err(), SurfaceError::ZeroSized);
        assert_eq!(MaskSurface::new(10, 0).unwrap_err(), SurfaceError::ZeroSized);
        assert!(MaskSurface::new(1, 1).is_ok());
    }

    #[test]
    fn oversized_surface_is_rejected_without_allocating() {
        assert_eq!(
            MaskSurface::new(3_000_000_000, 3_000_000_000).unwrap_err(),
            SurfaceError::TooLarge { width: 3_000_000_000, height: 3_000_000_000 }
        );
        assert!(matches!(
            MaskSurface::new(10, MAX_SURFACE_DIM + 1),
            Err(SurfaceError::TooLarge { .. })
        ));
        assert!(check_dimensions(MAX_SURFACE_DIM, 1).is_ok());
    }

    #[test]
    fn surface_clone_is_independent() {
        let mut a = MaskSurface::new(4, 4).unwrap();
        let b = a.clone();
        a.pixels_mut().put_pixel(1, 1, image::Rgba([255, 0, 0, 128]));
        assert!(a.is_marked(1, 1));
        assert!(!b.is_marked(1, 1));
        assert!(b.is_empty());
    }

    #[test]
    fn hole_mask_follows_alpha() {
        let mut s = MaskSurface::new(3, 2).unwrap();
        s.pixels_mut().put_pixel(2, 1, image::Rgba([0, 0, 0, 1]));
        let m = s.to_hole_mask();
        assert_eq!(m.get_pixel(2, 1).0[0], 255);
        assert_eq!(m.get_pixel(0, 0).0[0], 0);
        assert_eq!(s.marked_pixel_count(), 1);
    }

    #[test]
    fn map_to_surface_scales_by_rect() {
        let rect = Rect::from_min_size(Pos2::new(100.0, 50.0), Vec2::new(200.0, 100.0));
        let p = map_to_surface(Pos2::new(150.0, 75.0), rect, 400, 200);
        assert!((p.x - 100.0).abs() < 1e-4);
        assert!((p.y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn map_to_surface_clamps_far_outside_pointers() {
        let rect = Rect::from_min_size(Pos2::new(0.0, 0.0), Vec2::new(100.0, 100.0));
        let p = map_to_surface(Pos2::new(-5000.0, 9000.0), rect, 100, 100);
        assert_eq!(p, StrokePoint::new(0.0, 100.0));
        let q = map_to_surface(Pos2::new(1e9, -1e9), rect, 100, 100);
        assert_eq!(q, StrokePoint::new(100.0, 0.0));
    }

    #[test]
    fn map_to_surface_handles_degenerate_rect() {
        let rect = Rect::from_min_size(Pos2::new(10.0, 10.0), Vec2::ZERO);
        let p = map_to_surface(Pos2::new(50.0, 50.0), rect, 100, 100);
        assert_eq!(p, StrokePoint::new(0.0, 0.0));
    }

    #[test]
    fn zoom_is_clamped() {
        let mut vp = Viewport::default();
        for _ in 0..50 {
            vp.zoom_in();
        }
        assert_eq!(vp.zoom, MAX_ZOOM);
        for _ in 0..100 {
            vp.zoom_out();
        }
        assert_eq!(vp.zoom, MIN_ZOOM);
        vp.set_zoom(f32::NAN);
        assert_eq!(vp.zoom, 1.0);
    }

    #[test]
    fn pan_is_clamped_to_max_offset() {
        let mut vp = Viewport::default().with_max_pan_offset(100.0);
        vp.pan_by(Vec2::new(1000.0, -1000.0));
        assert_eq!(vp.pan_offset(), Vec2::new(100.0, -100.0));
    }

    #[test]
    fn viewport_accounts_for_device_pixel_ratio() {
        // 200x100 surface on a 2x display occupies 100x50 display pixels.
        let vp = Viewport::new(Vec2::new(100.0, 50.0), 2.0);
        let rect = vp.visible_rect(200, 100);
        assert!((rect.width() - 100.0).abs() < 1e-4);
        assert!((rect.height() - 50.0).abs() < 1e-4);
        let p = vp.map_pointer(Pos2::new(50.0, 25.0), 200, 100);
        assert!((p.x - 100.0).abs() < 1e-4);
        assert!((p.y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn zoom_around_point_keeps_anchor_fixed() {
        let mut vp = Viewport::new(Vec2::new(200.0, 200.0), 1.0);
        let anchor = Pos2::new(150.0, 100.0);
        let before = vp.map_pointer(anchor, 200, 200);
        vp.zoom_around_point(2.0, anchor);
        assert_eq!(vp.zoom, 2.0);
        let after = vp.map_pointer(anchor, 200, 200);
        assert!((before.x - after.x).abs() < 1e-3, "{} vs {}", before.x, after.x);
        assert!((before.y - after.y).abs() < 1e-3);

        // Beyond MAX_ZOOM only the remaining factor is applied.
        vp.zoom_around_point(10.0, anchor);
        assert_eq!(vp.zoom, MAX_ZOOM);
        let clamped = vp.map_pointer(anchor, 200, 200);
        assert!((before.x - clamped.x).abs() < 1e-3);
    }

    #[test]
    fn zoomed_and_panned_mapping_round_trips_centre() {
        let mut vp = Viewport::new(Vec2::new(400.0, 400.0), 1.0);
        vp.set_zoom(2.0);
        vp.pan_by(Vec2::new(30.0, -20.0));
        // The container centre shifted by the pan is the surface centre.
        let p = vp.map_pointer(Pos2::new(230.0, 180.0), 100, 100);
        assert!((p.x - 50.0).abs() < 1e-4);
        assert!((p.y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn debouncer_releases_only_last_request() {
        let start = Instant::now();
        let mut d = ResizeDebouncer::new(Duration::from_millis(100));
        d.request(10, 10, start);
        d.request(20, 20, start + Duration::from_millis(50));
        assert_eq!(d.poll(start + Duration::from_millis(120)), None);
        assert_eq!(d.poll(start + Duration::from_millis(150)), Some((20, 20)));
        assert!(!d.has_pending());
        assert_eq!(d.poll(start + Duration::from_millis(500)), None);
    }
}
