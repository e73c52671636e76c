// ============================================================================
// MASK BRUSH - stroke log, round brush rasterization and the stroke gesture
// ============================================================================

use image::{ImageBuffer, Pixel, Rgba};
use serde::{Deserialize, Serialize};

use crate::canvas::{MaskSurface, StrokePoint};

pub const MIN_BRUSH_SIZE: u32 = 5;
pub const MAX_BRUSH_SIZE: u32 = 100;
pub const DEFAULT_BRUSH_SIZE: u32 = 20;

/// Translucent red overlay used for damaged-region marks.
pub const MASK_COLOR: Rgba<u8> = Rgba([255, 0, 0, 128]);

// ============================================================================
// BRUSH CONFIG
// ============================================================================

/// Round brush: `diameter` is both the dot diameter and the segment width.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrushConfig {
    diameter: u32,
    color: Rgba<u8>,
}

impl Default for BrushConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BRUSH_SIZE)
    }
}

impl BrushConfig {
    /// Diameter is clamped to `[MIN_BRUSH_SIZE, MAX_BRUSH_SIZE]`.
    pub fn new(diameter: u32) -> Self {
        Self {
            diameter: diameter.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE),
            color: MASK_COLOR,
        }
    }

    pub fn with_color(mut self, color: Rgba<u8>) -> Self {
        // A zero-alpha brush would paint nothing the mask can detect.
        self.color = if color.0[3] == 0 { MASK_COLOR } else { color };
        self
    }

    pub fn diameter(&self) -> u32 {
        self.diameter
    }

    pub fn radius(&self) -> f32 {
        self.diameter as f32 / 2.0
    }

    pub fn color(&self) -> Rgba<u8> {
        self.color
    }

    pub fn set_diameter(&mut self, diameter: u32) {
        self.diameter = diameter.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE);
    }
}

// ============================================================================
// STROKE LOG
// ============================================================================

/// Ordered brush points plus the index where every stroke begins.
///
/// Points within a stroke are connected; consecutive strokes are not.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StrokeLog {
    points: Vec<StrokePoint>,
    starts: Vec<usize>,
}

impl StrokeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from stored parts.  A log whose boundaries or
    /// coordinates are inconsistent is treated as empty.
    pub fn from_parts(points: Vec<StrokePoint>, starts: Vec<usize>) -> Self {
        let log = Self { points, starts };
        if log.is_consistent() {
            log
        } else {
            crate::log_warn!(
                "Discarding corrupt stroke log ({} points, {} strokes)",
                log.points.len(),
                log.starts.len()
            );
            Self::default()
        }
    }

    /// Build a log from per-stroke point lists, skipping empty strokes.
    pub fn from_strokes<I>(strokes: I) -> Self
    where
        I: IntoIterator<Item = Vec<StrokePoint>>,
    {
        let mut log = Self::default();
        for stroke in strokes {
            if stroke.is_empty() {
                continue;
            }
            log.starts.push(log.points.len());
            log.points.extend(stroke);
        }
        if log.is_consistent() { log } else { Self::default() }
    }

    fn is_consistent(&self) -> bool {
        if self.points.is_empty() {
            return self.starts.is_empty();
        }
        if self.starts.first() != Some(&0) {
            return false;
        }
        let ordered = self.starts.windows(2).all(|w| w[0] < w[1]);
        let in_range = self.starts.iter().all(|&s| s < self.points.len());
        ordered && in_range && self.points.iter().all(StrokePoint::is_finite)
    }

    pub fn points(&self) -> &[StrokePoint] {
        &self.points
    }

    pub fn starts(&self) -> &[usize] {
        &self.starts
    }

    pub fn stroke_count(&self) -> usize {
        self.starts.len()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Each stroke as a slice of its points.
    pub fn strokes(&self) -> impl Iterator<Item = &[StrokePoint]> + '_ {
        self.starts.iter().enumerate().map(move |(i, &start)| {
            let end = self.starts.get(i + 1).copied().unwrap_or(self.points.len());
            &self.points[start..end]
        })
    }

    fn begin(&mut self, point: StrokePoint) {
        self.starts.push(self.points.len());
        self.points.push(point);
    }

    fn push(&mut self, point: StrokePoint) {
        self.points.push(point);
    }

    /// Remove the most recent stroke, returning its points.
    pub fn pop_stroke(&mut self) -> Option<Vec<StrokePoint>> {
        let start = self.starts.pop()?;
        Some(self.points.split_off(start))
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.starts.clear();
    }

    /// Copy with every point rescaled; boundaries are unchanged.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            points: self.points.iter().map(|p| p.scaled(sx, sy)).collect(),
            starts: self.starts.clone(),
        }
    }

    pub fn memory_bytes(&self) -> usize {
        self.points.len() * std::mem::size_of::<StrokePoint>()
            + self.starts.len() * std::mem::size_of::<usize>()
    }
}

// ============================================================================
// RASTER PRIMITIVES
// ============================================================================

/// Paint every pixel whose centre lies within `radius` of the segment `a → b`
/// (a round-capped line; `a == b` yields a filled disc).
///
/// Covered pixels are set to `value`, not blended, so overlapping segments of
/// the same stroke never build up extra opacity.
pub fn paint_capsule<P>(
    target: &mut ImageBuffer<P, Vec<P::Subpixel>>,
    a: StrokePoint,
    b: StrokePoint,
    radius: f32,
    value: P,
) where
    P: Pixel,
{
    let (w, h) = target.dimensions();
    if w == 0 || h == 0 || radius <= 0.0 || !a.is_finite() || !b.is_finite() {
        return;
    }

    let min_x = (a.x.min(b.x) - radius).floor().max(0.0);
    let min_y = (a.y.min(b.y) - radius).floor().max(0.0);
    let max_x = (a.x.max(b.x) + radius).ceil().min((w - 1) as f32);
    let max_y = (a.y.max(b.y) + radius).ceil().min((h - 1) as f32);
    if min_x > max_x || min_y > max_y {
        return;
    }

    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    let radius_sq = radius * radius;

    for y in (min_y as u32)..=(max_y as u32) {
        let py = y as f32 + 0.5;
        for x in (min_x as u32)..=(max_x as u32) {
            let px = x as f32 + 0.5;
            // Closest point on the segment to the pixel centre.
            let t = if len_sq > 0.0 {
                (((px - a.x) * dx + (py - a.y) * dy) / len_sq).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let cx = a.x + dx * t;
            let cy = a.y + dy * t;
            let ddx = px - cx;
            let ddy = py - cy;
            if ddx * ddx + ddy * ddy <= radius_sq {
                target.put_pixel(x, y, value);
            }
        }
    }
}

/// Draw one logged stroke: a dot at its first point, then a segment to each
/// following point.
pub fn paint_stroke<P>(
    target: &mut ImageBuffer<P, Vec<P::Subpixel>>,
    points: &[StrokePoint],
    radius: f32,
    value: P,
) where
    P: Pixel,
{
    let Some(&first) = points.first() else { return };
    paint_capsule(target, first, first, radius, value);
    for pair in points.windows(2) {
        paint_capsule(target, pair[0], pair[1], radius, value);
    }
}

// ============================================================================
// STROKE RASTERIZER - press / move / release
// ============================================================================

/// Gesture state.  Move events are only meaningful while `Stroking`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StrokeState {
    Idle,
    Stroking { last: StrokePoint },
}

/// Summary handed back when a gesture finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StrokeEnd {
    /// Zero-based index of the stroke in the log.
    pub stroke_index: usize,
    pub point_count: usize,
}

/// Renders brush gestures onto a [`MaskSurface`] and records them in a
/// [`StrokeLog`].
#[derive(Clone, Debug)]
pub struct StrokeRasterizer {
    pub brush: BrushConfig,
    state: StrokeState,
}

impl Default for StrokeRasterizer {
    fn default() -> Self {
        Self::new(BrushConfig::default())
    }
}

impl StrokeRasterizer {
    pub fn new(brush: BrushConfig) -> Self {
        Self {
            brush,
            state: StrokeState::Idle,
        }
    }

    pub fn state(&self) -> StrokeState {
        self.state
    }

    pub fn is_stroking(&self) -> bool {
        matches!(self.state, StrokeState::Stroking { .. })
    }

    /// Press: dot at `point`, start a new stroke in the log.  A press while
    /// already stroking closes the previous gesture first.
    pub fn begin_stroke(&mut self, surface: &mut MaskSurface, log: &mut StrokeLog, point: StrokePoint) {
        if self.is_stroking() {
            self.end_stroke(log);
        }
        paint_capsule(surface.pixels_mut(), point, point, self.brush.radius(), self.brush.color());
        log.begin(point);
        self.state = StrokeState::Stroking { last: point };
    }

    /// Move: segment from the previous sample to `to`.  Ignored while idle.
    pub fn extend_stroke(&mut self, surface: &mut MaskSurface, log: &mut StrokeLog, to: StrokePoint) -> bool {
        let StrokeState::Stroking { last } = self.state else {
            return false;
        };
        paint_capsule(surface.pixels_mut(), last, to, self.brush.radius(), self.brush.color());
        log.push(to);
        self.state = StrokeState::Stroking { last: to };
        true
    }

    /// Release.  Leaves the surface untouched; returns `None` when no gesture
    /// was active.
    pub fn end_stroke(&mut self, log: &StrokeLog) -> Option<StrokeEnd> {
        if !self.is_stroking() {
            return None;
        }
        self.state = StrokeState::Idle;
        let stroke_index = log.stroke_count().checked_sub(1)?;
        let start = log.starts()[stroke_index];
        Some(StrokeEnd {
            stroke_index,
            point_count: log.len() - start,
        })
    }

    /// Drop any in-progress gesture without touching the log.
    pub fn reset(&mut self) {
        self.state = StrokeState::Idle;
    }
}

/// Clear `surface` and redraw every stroke in `log` with `brush`.
pub fn replay(surface: &mut MaskSurface, log: &StrokeLog, brush: &BrushConfig) {
    surface.clear();
    let radius = brush.radius();
    let color = brush.color();
    for stroke in log.strokes() {
        paint_stroke(surface.pixels_mut(), stroke, radius, color);
    }
}
