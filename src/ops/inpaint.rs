// ============================================================================
// Restoration hand-off - mask payload, hole mask and the async job boundary
// ============================================================================
//
// The restoration algorithm itself is an opaque external service.  This
// module only produces what it consumes (the displayed image plus a binary
// hole mask at original resolution) and carries the result back through a
// channel so the mask and adjustment pipelines never wait on it.

use std::sync::Arc;
use std::sync::mpsc;

use image::{GrayImage, Luma, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::canvas::{MAX_SURFACE_DIM, StrokePoint, check_dimensions};
use crate::components::tools::{StrokeLog, paint_stroke};
use crate::ops::adjustments::AdjustmentParams;

// -- Mask payload ------------------------------------------------------------

/// Serialized stroke mask.  Coordinates are in *display* surface space and
/// travel with both the display and the original dimensions so the receiver
/// can rescale to full resolution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskPayload {
    pub coordinates: Vec<StrokePoint>,
    /// Index into `coordinates` where each stroke begins.  Receivers that
    /// ignore it treat the list as a single polyline.
    #[serde(default)]
    pub stroke_starts: Vec<usize>,
    #[serde(alias = "brush_size")]
    pub brush_diameter: u32,
    pub display_width: u32,
    pub display_height: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl MaskPayload {
    pub fn from_log(
        log: &StrokeLog,
        brush_diameter: u32,
        display: (u32, u32),
        original: (u32, u32),
    ) -> Self {
        Self {
            coordinates: log.points().to_vec(),
            stroke_starts: log.starts().to_vec(),
            brush_diameter,
            display_width: display.0,
            display_height: display.1,
            original_width: original.0,
            original_height: original.1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Display → original scale factors.  Degenerate display sizes map 1:1.
    pub fn scale_factors(&self) -> (f32, f32) {
        let sx = if self.display_width > 0 {
            self.original_width as f32 / self.display_width as f32
        } else {
            1.0
        };
        let sy = if self.display_height > 0 {
            self.original_height as f32 / self.display_height as f32
        } else {
            1.0
        };
        (sx, sy)
    }

    /// Stroke log in display space.  A missing boundary list means a single
    /// stroke; inconsistent boundaries yield an empty log.
    pub fn stroke_log(&self) -> StrokeLog {
        let starts = if self.stroke_starts.is_empty() && !self.coordinates.is_empty() {
            vec![0]
        } else {
            self.stroke_starts.clone()
        };
        StrokeLog::from_parts(self.coordinates.clone(), starts)
    }

    /// Both size pairs must be non-zero and within [`MAX_SURFACE_DIM`].
    pub fn validate(&self) -> Result<(), String> {
        check_dimensions(self.display_width, self.display_height)
            .map_err(|e| format!("bad display size: {}", e))?;
        check_dimensions(self.original_width, self.original_height)
            .map_err(|e| format!("bad original size: {}", e))
    }

    /// Rasterize a binary hole mask (255 = damaged) at original resolution.
    ///
    /// Points are rescaled per axis; the brush diameter is scaled by the mean
    /// of the two factors.  An original size beyond [`MAX_SURFACE_DIM`] yields
    /// an empty 0x0 mask.
    pub fn rasterize_hole_mask(&self) -> GrayImage {
        if self.original_width > MAX_SURFACE_DIM || self.original_height > MAX_SURFACE_DIM {
            crate::log_warn!(
                "Refusing to rasterize a {}x{} hole mask",
                self.original_width,
                self.original_height
            );
            return GrayImage::new(0, 0);
        }
        let mut mask = GrayImage::new(self.original_width, self.original_height);
        if self.original_width == 0 || self.original_height == 0 {
            return mask;
        }
        let (sx, sy) = self.scale_factors();
        let log = self.stroke_log().scaled(sx, sy);
        let radius = self.brush_diameter as f32 * (sx + sy) * 0.25;
        for stroke in log.strokes() {
            paint_stroke(&mut mask, stroke, radius, Luma([255u8]));
        }
        mask
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("payload encode failed: {}", e))
    }

    pub fn from_json(src: &str) -> Result<Self, String> {
        let payload: Self = serde_json::from_str(src).map_err(|e| format!("payload decode failed: {}", e))?;
        payload.validate()?;
        Ok(payload)
    }
}

// -- Request / service -------------------------------------------------------

/// Everything an external restoration service receives.
#[derive(Clone, Debug)]
pub struct RestorationRequest {
    /// Displayed (adjusted) buffer at original resolution.
    pub image: RgbaImage,
    /// Binary mask: >0 = pixels to restore.  Same size as `image`.
    pub hole_mask: GrayImage,
    pub payload: MaskPayload,
    pub params: AdjustmentParams,
}

impl RestorationRequest {
    pub fn masked_pixel_count(&self) -> usize {
        self.hole_mask.pixels().filter(|p| p.0[0] > 0).count()
    }
}

/// Opaque restoration backend (HTTP client, local model, test double...).
pub trait RestorationService: Send + Sync {
    fn restore(&self, request: &RestorationRequest) -> Result<RgbaImage, String>;
}

// -- Job ---------------------------------------------------------------------

/// Result delivered back to the session.
#[derive(Debug)]
pub struct RestorationOutcome {
    pub token: u64,
    pub result: Result<RgbaImage, String>,
}

/// Handle for an in-flight restoration.
pub struct RestorationJob {
    token: u64,
    receiver: mpsc::Receiver<RestorationOutcome>,
}

/// Polling state of a job.
#[derive(Debug)]
pub enum JobPoll {
    Pending,
    Done(RestorationOutcome),
    /// The worker vanished without reporting.
    Lost,
}

impl RestorationJob {
    /// Run `service` on the rayon pool.  Returns immediately.  A panicking
    /// service is reported as an error result.
    pub fn spawn(token: u64, service: Arc<dyn RestorationService>, request: RestorationRequest) -> Self {
        let (sender, receiver) = mpsc::channel();
        rayon::spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| service.restore(&request)))
                .unwrap_or_else(|payload| {
                    let detail = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_default();
                    crate::log_err!("Restoration service panicked: {}", detail);
                    Err("restoration service panicked".to_string())
                });
            // The session may have been dropped meanwhile; nothing to do then.
            let _ = sender.send(RestorationOutcome { token, result });
        });
        Self { token, receiver }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    /// Non-blocking check.
    pub fn poll(&self) -> JobPoll {
        match self.receiver.try_recv() {
            Ok(outcome) => JobPoll::Done(outcome),
            Err(mpsc::TryRecvError::Empty) => JobPoll::Pending,
            Err(mpsc::TryRecvError::Disconnected) => JobPoll::Lost,
        }
    }

    /// Blocking wait, for headless callers.
    pub fn wait(self) -> Result<RgbaImage, String> {
        match self.receiver.recv() {
            Ok(outcome) => outcome.result,
            Err(_) => Err("restoration worker exited without a result".to_string()),
        }
    }
}
