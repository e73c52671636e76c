//! RestoreFE: photo-restoration front-end core.
//!
//! A [`project::Session`] owns one loaded photo, its adjustment parameters,
//! the damage mask painted over it and the undo history for that mask.
//! The restoration algorithm itself stays behind
//! [`ops::inpaint::RestorationService`].

pub mod logger;

pub mod canvas;
pub mod cli;
pub mod components;
pub mod io;
pub mod ops;
pub mod project;
pub mod settings;

pub use canvas::{MaskSurface, StrokePoint, Viewport};
pub use ops::adjustments::{AdjustmentKey, AdjustmentParams};
pub use ops::inpaint::{MaskPayload, RestorationService};
pub use project::{PointerEvent, Session};
pub use settings::AppSettings;
