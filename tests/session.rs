use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};

use restorefe::ops::inpaint::RestorationRequest;
use restorefe::project::RestorationStatus;
use restorefe::{AdjustmentKey, AppSettings, PointerEvent, RestorationService, Session};

fn photo(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 90, 255]))
}

fn session(w: u32, h: u32) -> Session {
    Session::with_original_size(photo(w, h), &AppSettings::default()).unwrap()
}

fn drag(s: &mut Session, from: (f32, f32), to: (f32, f32)) {
    s.on_pointer_down(PointerEvent::new(from.0, from.1));
    s.on_pointer_move(PointerEvent::new(to.0, to.1));
    s.on_pointer_up(PointerEvent::new(to.0, to.1));
}

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("restorefe-it-{}-{}", std::process::id(), name))
}

#[test]
fn twenty_pixel_brush_marks_a_band() {
    let mut s = session(100, 100);
    assert_eq!(s.brush().diameter(), 20);
    drag(&mut s, (10.0, 10.0), (50.0, 10.0));

    assert_eq!(s.stroke_count(), 1);
    assert!(s.strokes().len() >= 2);
    let surface = s.surface();
    assert!(surface.is_marked(30, 10));
    assert!(surface.is_marked(30, 19));
    assert!(!surface.is_marked(30, 25));
    assert!(!surface.is_marked(80, 10));
}

#[test]
fn n_undos_then_n_redos_are_symmetric() {
    let mut s = session(80, 80);
    let mut states = vec![s.surface().clone()];
    for i in 0..4 {
        let y = 10.0 + i as f32 * 15.0;
        drag(&mut s, (5.0, y), (70.0, y));
        states.push(s.surface().clone());
    }
    assert_eq!(s.stroke_count(), 4);

    for expected in states.iter().rev().skip(1) {
        assert!(s.undo().is_some());
        assert_eq!(s.surface(), expected);
    }
    assert!(s.undo().is_none());
    assert!(s.surface().is_empty());

    for expected in states.iter().skip(1) {
        assert!(s.redo().is_some());
        assert_eq!(s.surface(), expected);
    }
    assert!(s.redo().is_none());
    assert_eq!(s.stroke_count(), 4);
}

#[test]
fn new_stroke_after_undo_discards_redo() {
    let mut s = session(60, 60);
    drag(&mut s, (10.0, 10.0), (50.0, 10.0));
    drag(&mut s, (10.0, 40.0), (50.0, 40.0));
    s.undo();
    assert!(s.can_redo());

    drag(&mut s, (30.0, 5.0), (30.0, 55.0));
    assert!(!s.can_redo());
    assert!(s.redo().is_none());
    assert_eq!(s.stroke_count(), 2);
}

#[test]
fn undo_last_stroke_removes_whole_stroke_and_is_undoable() {
    let mut s = session(100, 100);
    drag(&mut s, (10.0, 10.0), (90.0, 10.0));
    s.on_pointer_down(PointerEvent::new(10.0, 80.0));
    s.on_pointer_move(PointerEvent::new(40.0, 80.0));
    s.on_pointer_move(PointerEvent::new(90.0, 80.0));
    s.on_pointer_up(PointerEvent::new(90.0, 80.0));
    assert_eq!(s.stroke_count(), 2);

    assert!(s.undo_last_stroke());
    assert_eq!(s.stroke_count(), 1);
    assert_eq!(s.strokes().len(), 2);
    assert!(s.surface().is_marked(50, 10));
    assert!(!s.surface().is_marked(50, 80));

    s.undo();
    assert_eq!(s.stroke_count(), 2);
    assert!(s.surface().is_marked(50, 80));

    let mut empty = session(10, 10);
    assert!(!empty.undo_last_stroke());
    assert!(!empty.can_undo());
}

#[test]
fn returning_sliders_to_neutral_restores_original_exactly() {
    let mut s = session(32, 24);
    s.on_param_change(AdjustmentKey::Contrast, 50);
    s.on_param_change(AdjustmentKey::Saturation, -70);
    s.on_param_change(AdjustmentKey::Temperature, 35);
    assert_ne!(s.displayed_buffer(), s.original());

    s.on_param_change(AdjustmentKey::Contrast, 0);
    s.on_param_change(AdjustmentKey::Saturation, 0);
    s.on_param_change(AdjustmentKey::Temperature, 0);
    assert_eq!(s.displayed_buffer(), s.original());

    s.on_param_change(AdjustmentKey::Brightness, -30);
    s.reset_adjustments();
    assert_eq!(s.displayed_buffer(), s.original());
}

#[test]
fn adjustments_do_not_touch_the_mask() {
    let mut s = session(50, 50);
    drag(&mut s, (10.0, 25.0), (40.0, 25.0));
    let before = s.surface().clone();
    s.on_param_change(AdjustmentKey::Enhancement, 80);
    assert_eq!(s.surface(), &before);
    assert_eq!(s.stroke_count(), 1);
}

#[test]
fn pointer_far_outside_is_clamped_to_surface() {
    let mut s = session(40, 30);
    s.on_pointer_down(PointerEvent::new(-500.0, -500.0));
    s.on_pointer_move(PointerEvent::new(9000.0, 9000.0));
    s.on_pointer_up(PointerEvent::new(9000.0, 9000.0));
    for p in s.strokes().points() {
        assert!((0.0..=40.0).contains(&p.x), "x out of range: {}", p.x);
        assert!((0.0..=30.0).contains(&p.y), "y out of range: {}", p.y);
    }
    assert!(s.surface().is_marked(0, 0));
    assert!(s.surface().is_marked(39, 29));
}

#[test]
fn zoomed_view_maps_centre_to_surface_centre() {
    let mut s = session(100, 80);
    s.viewport.set_zoom(2.0);
    s.on_pointer_down(PointerEvent::new(50.0, 40.0));
    s.on_pointer_up(PointerEvent::new(50.0, 40.0));
    let p = s.strokes().points()[0];
    assert!((p.x - 50.0).abs() < 1e-3);
    assert!((p.y - 40.0).abs() < 1e-3);
}

#[test]
fn clear_only_after_confirmation() {
    let mut s = session(40, 40);
    drag(&mut s, (5.0, 20.0), (35.0, 20.0));
    s.request_clear();
    assert!(s.clear_pending());
    assert!(!s.surface().is_empty());
    assert!(s.confirm_clear());
    assert!(s.surface().is_empty());
    assert_eq!(s.serialize_mask().coordinates.len(), 0);
}

#[test]
fn debounced_resize_rescales_strokes_and_history() {
    let mut s = session(100, 100);
    drag(&mut s, (10.0, 10.0), (50.0, 10.0));
    drag(&mut s, (10.0, 60.0), (50.0, 60.0));

    let t0 = Instant::now();
    s.request_resize(150, 150, t0);
    s.request_resize(200, 200, t0 + Duration::from_millis(100));
    assert!(!s.poll_resize(t0 + Duration::from_millis(200)).unwrap());
    assert_eq!(s.surface().dimensions(), (100, 100));
    assert!(s.poll_resize(t0 + Duration::from_millis(400)).unwrap());
    assert_eq!(s.surface().dimensions(), (200, 200));

    let first = s.strokes().points()[0];
    assert_eq!((first.x, first.y), (20.0, 20.0));
    assert!(s.surface().is_marked(60, 20));
    assert!(s.surface().is_marked(60, 120));

    // The snapshot from before the second stroke was rescaled too.
    s.undo();
    assert_eq!(s.surface().dimensions(), (200, 200));
    assert!(s.surface().is_marked(60, 20));
    assert!(!s.surface().is_marked(60, 120));
}

#[test]
fn payload_carries_boundaries_and_sizes() {
    let img = photo(400, 300);
    let mut s = Session::new(img, (200, 150), &AppSettings::default()).unwrap();
    drag(&mut s, (10.0, 10.0), (60.0, 10.0));
    drag(&mut s, (10.0, 100.0), (60.0, 100.0));

    let payload = s.serialize_mask();
    assert_eq!(payload.stroke_starts, vec![0, 2]);
    assert_eq!((payload.display_width, payload.display_height), (200, 150));
    assert_eq!((payload.original_width, payload.original_height), (400, 300));
    assert_eq!(payload.brush_diameter, 20);

    let hole = payload.rasterize_hole_mask();
    assert_eq!(hole.dimensions(), (400, 300));
    assert_eq!(hole.get_pixel(70, 20).0[0], 255);
    // Strokes stay separate: nothing between them.
    assert_eq!(hole.get_pixel(70, 110).0[0], 0);
}

struct Gray;

impl RestorationService for Gray {
    fn restore(&self, request: &RestorationRequest) -> Result<RgbaImage, String> {
        if request.hole_mask.dimensions() != request.image.dimensions() {
            return Err("size mismatch".into());
        }
        Ok(RgbaImage::from_pixel(
            request.image.width(),
            request.image.height(),
            Rgba([128, 128, 128, 255]),
        ))
    }
}

#[test]
fn restoration_runs_in_background_and_reports_back() {
    let mut s = session(64, 48);
    drag(&mut s, (5.0, 5.0), (40.0, 5.0));
    assert!(matches!(s.poll_restoration(), RestorationStatus::Idle));

    s.submit_restoration(Arc::new(Gray));
    let deadline = Instant::now() + Duration::from_secs(10);
    let result = loop {
        match s.poll_restoration() {
            RestorationStatus::Finished(r) => break r,
            RestorationStatus::Pending => {
                assert!(Instant::now() < deadline, "restoration never finished");
                std::thread::sleep(Duration::from_millis(5));
            }
            RestorationStatus::Idle => panic!("job vanished"),
        }
    };
    let restored = result.unwrap();
    assert_eq!(restored.dimensions(), (64, 48));
    assert!(matches!(s.poll_restoration(), RestorationStatus::Idle));
}

#[test]
fn session_file_round_trip_replays_mask() {
    let path = temp_path("session.rfs");
    let mut s = session(50, 40);
    s.on_param_change(AdjustmentKey::Brightness, 15);
    s.set_brush_size(30);
    drag(&mut s, (5.0, 20.0), (45.0, 20.0));
    s.save(&path).unwrap();

    let back = Session::load(&path, &AppSettings::default()).unwrap();
    assert_eq!(back.original(), s.original());
    assert_eq!(back.params(), s.params());
    assert_eq!(back.displayed_buffer(), s.displayed_buffer());
    assert_eq!(back.strokes(), s.strokes());
    assert_eq!(back.surface(), s.surface());
    assert!(!back.can_undo());
    let _ = std::fs::remove_file(&path);
}

#[test]
fn autosave_writes_after_each_stroke() {
    let path = temp_path("autosave.rfs");
    let _ = std::fs::remove_file(&path);
    let mut s = session(30, 30);
    s.set_autosave_path(Some(path.clone()));

    s.on_pointer_down(PointerEvent::new(5.0, 5.0));
    assert!(!path.exists());
    s.on_pointer_leave();
    assert!(path.exists());

    let back = Session::load(&path, &AppSettings::default()).unwrap();
    assert_eq!(back.stroke_count(), 1);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn autosave_follows_settings_directory() {
    let dir = temp_path("autosave-dir");
    let _ = std::fs::remove_dir_all(&dir);
    let settings = AppSettings { autosave_dir: Some(dir.clone()), ..AppSettings::default() };
    let mut s = Session::with_original_size(photo(20, 20), &settings).unwrap();
    s.enable_autosave(&settings);
    let path = s.autosave_path().unwrap().to_path_buf();
    assert_eq!(path.parent(), Some(dir.as_path()));

    drag(&mut s, (2.0, 2.0), (15.0, 2.0));
    assert!(path.exists());

    s.enable_autosave(&AppSettings { autosave: false, ..settings });
    assert!(s.autosave_path().is_none());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn history_descriptions_name_the_next_action() {
    let mut s = session(40, 40);
    assert_eq!(s.undo_description(), None);
    drag(&mut s, (5.0, 5.0), (30.0, 5.0));
    assert_eq!(s.undo_description(), Some("Brush Stroke"));
    s.request_clear();
    s.confirm_clear();
    assert_eq!(s.undo_description(), Some("Clear Mask"));
    s.undo();
    assert_eq!(s.redo_description(), Some("Clear Mask"));
    assert_eq!(s.undo_description(), Some("Brush Stroke"));
}

#[test]
fn corrupt_display_size_in_session_file_is_an_error() {
    let path = temp_path("huge-display.rfs");
    let s = session(2, 2);
    s.save(&path).unwrap();

    // No strokes: the file ends with display_w, display_h, two empty vecs and
    // the brush size.
    let mut raw = std::fs::read(&path).unwrap();
    let tail = 4 + 4 + 8 + 8 + 4;
    let at = raw.len() - tail;
    raw[at..at + 4].copy_from_slice(&3_000_000_000u32.to_le_bytes());
    raw[at + 4..at + 8].copy_from_slice(&3_000_000_000u32.to_le_bytes());
    std::fs::write(&path, &raw).unwrap();

    let err = Session::load(&path, &AppSettings::default()).unwrap_err();
    assert!(err.to_string().contains("display"), "{}", err);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn oversized_display_surface_is_rejected() {
    let err = Session::new(photo(4, 4), (3_000_000_000, 10), &AppSettings::default()).unwrap_err();
    assert!(matches!(err, restorefe::canvas::SurfaceError::TooLarge { .. }));
}

struct Broken;

impl RestorationService for Broken {
    fn restore(&self, _request: &RestorationRequest) -> Result<RgbaImage, String> {
        panic!("backend crashed");
    }
}

#[test]
fn panicking_service_leaves_session_usable() {
    let mut s = session(40, 40);
    drag(&mut s, (5.0, 5.0), (30.0, 5.0));
    s.submit_restoration(Arc::new(Broken));

    let deadline = Instant::now() + Duration::from_secs(10);
    let result = loop {
        match s.poll_restoration() {
            RestorationStatus::Finished(r) => break r,
            RestorationStatus::Pending => {
                assert!(Instant::now() < deadline, "restoration never finished");
                std::thread::sleep(Duration::from_millis(5));
            }
            RestorationStatus::Idle => panic!("job vanished"),
        }
    };
    assert!(result.is_err());

    // Painting still works afterwards.
    drag(&mut s, (5.0, 30.0), (30.0, 30.0));
    assert_eq!(s.stroke_count(), 2);
}
