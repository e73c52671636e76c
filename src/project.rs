use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use egui::{Pos2, Vec2};
use image::RgbaImage;
use uuid::Uuid;

use crate::canvas::{MaskSurface, ResizeDebouncer, SurfaceError, Viewport, check_dimensions};
use crate::components::history::HistoryManager;
use crate::components::tools::{self, BrushConfig, StrokeEnd, StrokeLog, StrokeRasterizer};
use crate::io::{self, SessionFileError, SessionFileV1};
use crate::ops::adjustments::{self, AdjustmentKey, AdjustmentParams};
use crate::ops::inpaint::{JobPoll, MaskPayload, RestorationJob, RestorationRequest, RestorationService};
use crate::settings::AppSettings;

/// Pointer position in container-relative display coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    pub x: f32,
    pub y: f32,
}

impl PointerEvent {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn pos(self) -> Pos2 {
        Pos2::new(self.x, self.y)
    }
}

/// What a finished restoration poll produced.
#[derive(Debug)]
pub enum RestorationStatus {
    Idle,
    Pending,
    Finished(Result<RgbaImage, String>),
}

/// One loaded photo with its mask, history and adjustment state.
///
/// All mutation happens through `&mut self` on the caller's thread; each
/// handler completes its snapshot-then-mutate sequence before returning.
pub struct Session {
    pub id: Uuid,
    /// Untouched pixels the adjustments are always recomputed from.
    original: RgbaImage,
    params: AdjustmentParams,
    displayed: RgbaImage,
    surface: MaskSurface,
    strokes: StrokeLog,
    rasterizer: StrokeRasterizer,
    pub viewport: Viewport,
    history: HistoryManager,
    resize: ResizeDebouncer,
    clear_pending: bool,
    restoration: Option<RestorationJob>,
    restoration_token: u64,
    /// Where `end_stroke` persists the session, if anywhere.
    autosave_path: Option<PathBuf>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("original", &self.original.dimensions())
            .field("surface", &self.surface)
            .field("strokes", &self.strokes.stroke_count())
            .field("params", &self.params)
            .field("history", &self.history)
            .finish()
    }
}

impl Session {
    /// Start a session on `original`.  The mask surface gets `display_size`
    /// (the on-screen raster the user paints on).
    pub fn new(original: RgbaImage, display_size: (u32, u32), settings: &AppSettings) -> Result<Self, SurfaceError> {
        check_dimensions(original.width(), original.height())?;
        let surface = MaskSurface::new(display_size.0, display_size.1)?;
        let brush = BrushConfig::new(settings.brush_size).with_color(settings.brush_color);
        let viewport = Viewport::new(
            Vec2::new(display_size.0 as f32, display_size.1 as f32),
            1.0,
        )
        .with_max_pan_offset(settings.max_pan_offset);

        crate::log_info!(
            "Session started: original {}x{}, display {}x{}",
            original.width(),
            original.height(),
            display_size.0,
            display_size.1
        );

        Ok(Self {
            id: Uuid::new_v4(),
            displayed: original.clone(),
            original,
            params: AdjustmentParams::default(),
            surface,
            strokes: StrokeLog::new(),
            rasterizer: StrokeRasterizer::new(brush),
            viewport,
            history: HistoryManager::new(settings.max_undo_steps)
                .with_memory_limit(settings.history_memory_bytes()),
            resize: ResizeDebouncer::new(settings.resize_debounce()),
            clear_pending: false,
            restoration: None,
            restoration_token: 0,
            autosave_path: None,
        })
    }

    /// Session whose display surface matches the original 1:1.
    pub fn with_original_size(original: RgbaImage, settings: &AppSettings) -> Result<Self, SurfaceError> {
        let size = original.dimensions();
        Self::new(original, size, settings)
    }

    /// Persist to `path` after every completed stroke.
    pub fn set_autosave_path(&mut self, path: Option<PathBuf>) {
        self.autosave_path = path;
    }

    pub fn autosave_path(&self) -> Option<&Path> {
        self.autosave_path.as_deref()
    }

    /// Autosave into the configured autosave directory, keyed by session id,
    /// when `settings.autosave` is on.
    pub fn enable_autosave(&mut self, settings: &AppSettings) {
        self.autosave_path = settings
            .autosave
            .then(|| settings.resolved_autosave_dir().join(format!("{}.rfs", self.id)));
        if let Some(path) = &self.autosave_path {
            crate::log_info!("Autosaving to {}", path.display());
        }
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.history.undo_description()
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.history.redo_description()
    }

    /// Replace the photo.  Mask, strokes, history and adjustments all reset.
    pub fn load_image(&mut self, original: RgbaImage, display_size: (u32, u32)) -> Result<(), SurfaceError> {
        check_dimensions(original.width(), original.height())?;
        self.surface = MaskSurface::new(display_size.0, display_size.1)?;
        self.viewport
            .set_container(Vec2::new(display_size.0 as f32, display_size.1 as f32));
        self.viewport.reset();
        self.displayed = original.clone();
        self.original = original;
        self.params = AdjustmentParams::default();
        self.strokes.clear();
        self.rasterizer.reset();
        self.history.clear();
        self.resize.cancel();
        self.clear_pending = false;
        self.restoration = None;
        self.id = Uuid::new_v4();
        crate::log_info!(
            "Image replaced: {}x{}",
            self.original.width(),
            self.original.height()
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn original(&self) -> &RgbaImage {
        &self.original
    }

    /// The adjusted buffer, for export.
    pub fn displayed_buffer(&self) -> &RgbaImage {
        &self.displayed
    }

    pub fn params(&self) -> AdjustmentParams {
        self.params
    }

    pub fn surface(&self) -> &MaskSurface {
        &self.surface
    }

    pub fn strokes(&self) -> &StrokeLog {
        &self.strokes
    }

    pub fn stroke_count(&self) -> usize {
        self.strokes.stroke_count()
    }

    pub fn brush(&self) -> BrushConfig {
        self.rasterizer.brush
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn is_stroking(&self) -> bool {
        self.rasterizer.is_stroking()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ------------------------------------------------------------------
    // Pointer input
    // ------------------------------------------------------------------

    fn map_pointer(&self, event: PointerEvent) -> crate::canvas::StrokePoint {
        let (w, h) = self.surface.dimensions();
        self.viewport.map_pointer(event.pos(), w, h)
    }

    /// Press: snapshot first, then rasterize the first dot.
    pub fn on_pointer_down(&mut self, event: PointerEvent) {
        if self.rasterizer.is_stroking() {
            self.finish_stroke();
        }
        let point = self.map_pointer(event);
        self.history.record("Brush Stroke", &self.surface, &self.strokes);
        self.rasterizer.begin_stroke(&mut self.surface, &mut self.strokes, point);
    }

    /// Move: extends the active stroke; ignored while idle.
    pub fn on_pointer_move(&mut self, event: PointerEvent) {
        if !self.rasterizer.is_stroking() {
            return;
        }
        let point = self.map_pointer(event);
        self.rasterizer.extend_stroke(&mut self.surface, &mut self.strokes, point);
    }

    /// Release.
    pub fn on_pointer_up(&mut self, _event: PointerEvent) -> Option<StrokeEnd> {
        self.finish_stroke()
    }

    /// Pointer left the surface mid-gesture: same path as a release.
    pub fn on_pointer_leave(&mut self) -> Option<StrokeEnd> {
        self.finish_stroke()
    }

    fn finish_stroke(&mut self) -> Option<StrokeEnd> {
        let end = self.rasterizer.end_stroke(&self.strokes)?;
        crate::log_info!(
            "Stroke {} ended with {} point(s)",
            end.stroke_index + 1,
            end.point_count
        );
        if let Some(path) = self.autosave_path.clone()
            && let Err(e) = self.save(&path)
        {
            crate::log_warn!("Autosave to {} failed: {}", path.display(), e);
        }
        Some(end)
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub fn undo(&mut self) -> Option<String> {
        self.finish_stroke();
        let desc = self.history.undo(&mut self.surface, &mut self.strokes);
        if let Some(ref d) = desc {
            crate::log_info!(
                "Undo '{}' (past {}, future {})",
                d,
                self.history.undo_count(),
                self.history.redo_count()
            );
        }
        desc
    }

    pub fn redo(&mut self) -> Option<String> {
        self.finish_stroke();
        let desc = self.history.redo(&mut self.surface, &mut self.strokes);
        if let Some(ref d) = desc {
            crate::log_info!(
                "Redo '{}' (past {}, future {})",
                d,
                self.history.undo_count(),
                self.history.redo_count()
            );
        }
        desc
    }

    /// Remove the most recent stroke (by its recorded start index) as a
    /// new, undoable action.  No-op without strokes.
    pub fn undo_last_stroke(&mut self) -> bool {
        self.finish_stroke();
        if self.strokes.stroke_count() == 0 {
            return false;
        }
        self.history.record("Undo Last Stroke", &self.surface, &self.strokes);
        self.strokes.pop_stroke();
        tools::replay(&mut self.surface, &self.strokes, &self.rasterizer.brush);
        true
    }

    /// Ask to clear the mask.  Nothing happens until [`Self::confirm_clear`].
    pub fn request_clear(&mut self) {
        self.clear_pending = true;
    }

    pub fn cancel_clear(&mut self) {
        self.clear_pending = false;
    }

    pub fn clear_pending(&self) -> bool {
        self.clear_pending
    }

    /// Execute a previously requested clear.  Returns `false` if no clear was
    /// requested.
    pub fn confirm_clear(&mut self) -> bool {
        if !self.clear_pending {
            return false;
        }
        self.clear_pending = false;
        self.finish_stroke();
        self.history.record("Clear Mask", &self.surface, &self.strokes);
        self.surface.clear();
        self.strokes.clear();
        crate::log_info!("Mask cleared");
        true
    }

    // ------------------------------------------------------------------
    // Brush / adjustments
    // ------------------------------------------------------------------

    /// Applies to new strokes and to every later replay (resize, undo last
    /// stroke, session load).
    pub fn set_brush_size(&mut self, diameter: u32) {
        self.rasterizer.brush.set_diameter(diameter);
    }

    /// Slider input.  The value is clamped to the declared range, then the
    /// displayed buffer is recomputed from the original.
    pub fn on_param_change(&mut self, key: AdjustmentKey, value: i32) -> &RgbaImage {
        let clamped = key.clamp_value(value);
        if clamped != value {
            crate::log_warn!("{} value {} out of range, clamped to {}", key, value, clamped);
        }
        self.params.set(key, clamped);
        self.displayed = adjustments::compute_displayed(&self.original, &self.params);
        &self.displayed
    }

    pub fn set_params(&mut self, params: AdjustmentParams) -> &RgbaImage {
        for &key in AdjustmentKey::all() {
            self.params.set(key, key.clamp_value(params.get(key)));
        }
        self.displayed = adjustments::compute_displayed(&self.original, &self.params);
        &self.displayed
    }

    pub fn reset_adjustments(&mut self) -> &RgbaImage {
        self.set_params(AdjustmentParams::default())
    }

    // ------------------------------------------------------------------
    // Resize
    // ------------------------------------------------------------------

    /// Queue a display-surface resize; bursts are coalesced.
    pub fn request_resize(&mut self, width: u32, height: u32, now: Instant) {
        self.resize.request(width, height, now);
    }

    /// Apply the last queued resize once its burst has settled.
    pub fn poll_resize(&mut self, now: Instant) -> Result<bool, SurfaceError> {
        match self.resize.poll(now) {
            Some((w, h)) => {
                self.resize_surface(w, h)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Resize immediately: every stroke point (live and in history) is
    /// rescaled by new/old and the surfaces are rebuilt by replay.
    pub fn resize_surface(&mut self, width: u32, height: u32) -> Result<(), SurfaceError> {
        let (old_w, old_h) = self.surface.dimensions();
        if (width, height) == (old_w, old_h) {
            return Ok(());
        }
        let mut new_surface = MaskSurface::new(width, height)?;
        self.finish_stroke();

        let sx = width as f32 / old_w as f32;
        let sy = height as f32 / old_h as f32;
        let brush = self.rasterizer.brush;

        self.strokes = self.strokes.scaled(sx, sy);
        tools::replay(&mut new_surface, &self.strokes, &brush);
        self.surface = new_surface;

        let template = self.surface.clone();
        self.history.remap(|snap| {
            let log = snap.strokes().scaled(sx, sy);
            let mut surface = template.clone();
            tools::replay(&mut surface, &log, &brush);
            crate::components::history::MaskSnapshot::capture(&surface, &log)
        });

        self.viewport
            .set_container(Vec2::new(width as f32, height as f32));
        crate::log_info!(
            "Surface resized {}x{} -> {}x{}, replayed {} stroke(s)",
            old_w,
            old_h,
            width,
            height,
            self.strokes.stroke_count()
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Restoration hand-off
    // ------------------------------------------------------------------

    /// Stroke log + brush + both size pairs, for the restoration request.
    pub fn serialize_mask(&self) -> MaskPayload {
        MaskPayload::from_log(
            &self.strokes,
            self.rasterizer.brush.diameter(),
            self.surface.dimensions(),
            self.original.dimensions(),
        )
    }

    pub fn build_restoration_request(&self) -> RestorationRequest {
        let payload = self.serialize_mask();
        RestorationRequest {
            image: self.displayed.clone(),
            hole_mask: payload.rasterize_hole_mask(),
            payload,
            params: self.params,
        }
    }

    /// Submit to `service` in the background.  A newer submission replaces
    /// any pending one.
    pub fn submit_restoration(&mut self, service: Arc<dyn RestorationService>) -> u64 {
        self.restoration_token = self.restoration_token.wrapping_add(1);
        let token = self.restoration_token;
        let request = self.build_restoration_request();
        crate::log_info!(
            "Restoration #{} submitted ({} masked pixels)",
            token,
            request.masked_pixel_count()
        );
        self.restoration = Some(RestorationJob::spawn(token, service, request));
        token
    }

    /// Non-blocking check on the current restoration job.
    pub fn poll_restoration(&mut self) -> RestorationStatus {
        let Some(job) = self.restoration.as_ref() else {
            return RestorationStatus::Idle;
        };
        match job.poll() {
            JobPoll::Pending => RestorationStatus::Pending,
            JobPoll::Done(outcome) => {
                self.restoration = None;
                if outcome.token != self.restoration_token {
                    return RestorationStatus::Idle;
                }
                match &outcome.result {
                    Ok(img) => {
                        crate::log_info!(
                            "Restoration #{} finished ({}x{})",
                            outcome.token,
                            img.width(),
                            img.height()
                        );
                    }
                    Err(e) => {
                        crate::log_err!("Restoration #{} failed: {}", outcome.token, e);
                    }
                }
                RestorationStatus::Finished(outcome.result)
            }
            JobPoll::Lost => {
                self.restoration = None;
                crate::log_err!("Restoration worker exited without a result");
                RestorationStatus::Finished(Err("restoration worker exited without a result".to_string()))
            }
        }
    }

    // ------------------------------------------------------------------
    // Session files
    // ------------------------------------------------------------------

    pub fn save(&self, path: &Path) -> Result<(), SessionFileError> {
        let file = SessionFileV1::new(
            &self.original,
            self.params,
            self.surface.dimensions(),
            &self.strokes,
            self.rasterizer.brush.diameter(),
        );
        io::write_session_file(&file, path)?;
        crate::log_info!("Session saved to {}", path.display());
        Ok(())
    }

    /// Rebuild a session from disk.  The mask is replayed from the stroke
    /// log; a corrupt log loads as an empty mask.
    pub fn load(path: &Path, settings: &AppSettings) -> Result<Self, SessionFileError> {
        let file = io::read_session_file(path)?;
        let original = file
            .original_image()
            .ok_or_else(|| SessionFileError::InvalidFormat("pixel data size mismatch".into()))?;
        let display = (file.display_width, file.display_height);

        let mut session = Self::new(original, display, settings)
            .map_err(|e| SessionFileError::InvalidFormat(e.to_string()))?;
        session.rasterizer.brush.set_diameter(file.brush_size);
        session.strokes = StrokeLog::from_parts(file.points, file.stroke_starts);
        tools::replay(&mut session.surface, &session.strokes, &session.rasterizer.brush);
        session.set_params(file.params);
        crate::log_info!(
            "Session loaded from {} ({} stroke(s))",
            path.display(),
            session.strokes.stroke_count()
        );
        Ok(session)
    }
}
