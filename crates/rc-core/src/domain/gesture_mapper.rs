//! Viewer-to-device coordinate mapping.
//!
//! # The problem (for beginners)
//!
//! The viewer watches the device screen inside a browser window whose size
//! has nothing to do with the device's resolution.  A click at (640, 360) in
//! a 1280×720 viewer window must land at (960, 540) on a 1920×1080 device.
//!
//! When the two aspect ratios differ, the picture is scaled *uniformly* (the
//! same factor on both axes, so circles stay round) and centred.  The unused
//! band is split evenly on both sides:
//!
//! ```text
//!  remote relatively wider → letterbox     remote relatively taller → pillarbox
//!  ┌──────────────────────┐                ┌──────────────────────┐
//!  │░░░░░░░ offset_y ░░░░░│                │░░░│              │░░░│
//!  │                      │                │ o │              │ o │
//!  │      mapped area     │                │ f │  mapped area │ f │
//!  │                      │                │ f │              │ f │
//!  │░░░░░░░ offset_y ░░░░░│                │ x │              │ x │
//!  └──────────────────────┘                └──────────────────────┘
//! ```
//!
//! # Formula
//!
//! ```text
//! sx = device_w / remote_w        sy = device_h / remote_h
//! s  = sx               if sx == sy
//! s  = min(sx, sy)      otherwise (both axes)
//! offset = (device_dim - remote_dim * s) / 2
//! device = round(remote * s + offset), clamped to [0, device_dim - 1]
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scale factors closer than this are treated as equal.
const SCALE_EPSILON: f64 = 1e-9;

/// A point in viewer coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A point in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevicePoint {
    pub x: i32,
    pub y: i32,
}

/// Current orientation of the device display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    #[serde(rename = "0")]
    Rotation0,
    #[serde(rename = "90")]
    Rotation90,
    #[serde(rename = "180")]
    Rotation180,
    #[serde(rename = "270")]
    Rotation270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Rotation0 => 0,
            Rotation::Rotation90 => 90,
            Rotation::Rotation180 => 180,
            Rotation::Rotation270 => 270,
        }
    }

    /// Parses a rotation from degrees; anything but 0/90/180/270 is `None`.
    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::Rotation0),
            90 => Some(Rotation::Rotation90),
            180 => Some(Rotation::Rotation180),
            270 => Some(Rotation::Rotation270),
            _ => None,
        }
    }
}

/// Physical display size as currently oriented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetrics {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
}

/// Where the mapper reads the device's display size from.
///
/// On a real device this is a platform query; tests and the CLI use a fixed
/// value.
pub trait DisplayMetricsSource: Send + Sync {
    fn display_metrics(&self) -> DisplayMetrics;
}

/// Converts viewer coordinates into device pixels.
pub struct GestureMapper {
    source: Arc<dyn DisplayMetricsSource>,
    device: DisplayMetrics,
    rc_width: u32,
    rc_height: u32,
    scale_x: f64,
    scale_y: f64,
    offset_x: f64,
    offset_y: f64,
}

impl GestureMapper {
    /// Creates a mapper for a `rc_width`×`rc_height` viewer and reads the
    /// device metrics once from `source`.
    pub fn new(rc_width: u32, rc_height: u32, source: Arc<dyn DisplayMetricsSource>) -> Self {
        let device = source.display_metrics();
        let mut mapper = Self {
            source,
            device,
            rc_width,
            rc_height,
            scale_x: 0.0,
            scale_y: 0.0,
            offset_x: 0.0,
            offset_y: 0.0,
        };
        mapper.recompute();
        mapper
    }

    /// Re-reads the display metrics (after a rotation or resolution change).
    pub fn update_display_metrics(&mut self) {
        self.device = self.source.display_metrics();
        self.recompute();
        debug!(
            width = self.device.width,
            height = self.device.height,
            rotation = self.device.rotation.degrees(),
            "display metrics updated"
        );
    }

    /// Changes the viewer dimensions (the viewer window was resized).
    pub fn set_remote_dimensions(&mut self, width: u32, height: u32) {
        self.rc_width = width;
        self.rc_height = height;
        self.recompute();
    }

    fn recompute(&mut self) {
        let (dw, dh) = (self.device.width as f64, self.device.height as f64);
        let (rw, rh) = (self.rc_width as f64, self.rc_height as f64);

        if dw == 0.0 || dh == 0.0 || rw == 0.0 || rh == 0.0 {
            // Degenerate geometry; map_point rejects everything.
            self.scale_x = 0.0;
            self.scale_y = 0.0;
            self.offset_x = 0.0;
            self.offset_y = 0.0;
            return;
        }

        let sx = dw / rw;
        let sy = dh / rh;
        if (sx - sy).abs() > SCALE_EPSILON {
            let s = sx.min(sy);
            self.scale_x = s;
            self.scale_y = s;
            self.offset_x = (dw - rw * s) / 2.0;
            self.offset_y = (dh - rh * s) / 2.0;
        } else {
            self.scale_x = sx;
            self.scale_y = sy;
            self.offset_x = 0.0;
            self.offset_y = 0.0;
        }
    }

    fn is_degenerate(&self) -> bool {
        self.rc_width == 0 || self.rc_height == 0 || self.device.width == 0 || self.device.height == 0
    }

    /// Maps one viewer point, or `None` if it lies outside the viewer area.
    ///
    /// The accepted range is `[0, rc_width)` × `[0, rc_height)`; NaN is rejected.
    pub fn map_point(&self, x: f64, y: f64) -> Option<DevicePoint> {
        if self.is_degenerate() {
            return None;
        }
        // `contains` is false for NaN.
        if !(0.0..self.rc_width as f64).contains(&x) || !(0.0..self.rc_height as f64).contains(&y) {
            return None;
        }

        let max_x = (self.device.width - 1) as f64;
        let max_y = (self.device.height - 1) as f64;
        let dx = (x * self.scale_x + self.offset_x).round().clamp(0.0, max_x);
        let dy = (y * self.scale_y + self.offset_y).round().clamp(0.0, max_y);

        Some(DevicePoint {
            x: dx as i32,
            y: dy as i32,
        })
    }

    /// Maps every point, or returns `None` if any single point is invalid.
    pub fn map_points(&self, points: &[Point]) -> Option<Vec<DevicePoint>> {
        points.iter().map(|p| self.map_point(p.x, p.y)).collect()
    }

    pub fn device_dimensions(&self) -> (u32, u32) {
        (self.device.width, self.device.height)
    }

    pub fn rc_dimensions(&self) -> (u32, u32) {
        (self.rc_width, self.rc_height)
    }

    pub fn scale_factors(&self) -> (f64, f64) {
        (self.scale_x, self.scale_y)
    }

    pub fn offsets(&self) -> (f64, f64) {
        (self.offset_x, self.offset_y)
    }

    pub fn rotation(&self) -> Rotation {
        self.device.rotation
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedMetrics(Mutex<DisplayMetrics>);

    impl FixedMetrics {
        fn new(width: u32, height: u32) -> Arc<Self> {
            Arc::new(Self(Mutex::new(DisplayMetrics {
                width,
                height,
                rotation: Rotation::Rotation0,
            })))
        }

        fn set(&self, metrics: DisplayMetrics) {
            *self.0.lock().unwrap() = metrics;
        }
    }

    impl DisplayMetricsSource for FixedMetrics {
        fn display_metrics(&self) -> DisplayMetrics {
            *self.0.lock().unwrap()
        }
    }

    fn mapper(rc: (u32, u32), device: (u32, u32)) -> GestureMapper {
        GestureMapper::new(rc.0, rc.1, FixedMetrics::new(device.0, device.1))
    }

    #[test]
    fn test_matching_aspect_scales_without_offset() {
        // Arrange
        let m = mapper((1280, 720), (1920, 1080));

        // Act
        let p = m.map_point(640.0, 360.0);

        // Assert
        assert_eq!(p, Some(DevicePoint { x: 960, y: 540 }));
        assert_eq!(m.scale_factors(), (1.5, 1.5));
        assert_eq!(m.offsets(), (0.0, 0.0));
    }

    #[test]
    fn test_origin_maps_to_origin() {
        let m = mapper((800, 600), (1600, 1200));
        assert_eq!(m.map_point(0.0, 0.0), Some(DevicePoint { x: 0, y: 0 }));
    }

    #[test]
    fn test_wider_remote_is_letterboxed() {
        // 1000x500 viewer on a 1000x1000 device: s = min(1, 2) = 1, offset_y = 250.
        let m = mapper((1000, 500), (1000, 1000));

        assert_eq!(m.scale_factors(), (1.0, 1.0));
        assert_eq!(m.offsets(), (0.0, 250.0));
        assert_eq!(m.map_point(500.0, 0.0), Some(DevicePoint { x: 500, y: 250 }));
    }

    #[test]
    fn test_taller_remote_is_pillarboxed() {
        // 500x1000 viewer on a 1000x1000 device: s = 1, offset_x = 250.
        let m = mapper((500, 1000), (1000, 1000));

        assert_eq!(m.offsets(), (250.0, 0.0));
        assert_eq!(m.map_point(0.0, 500.0), Some(DevicePoint { x: 250, y: 500 }));
    }

    #[test]
    fn test_point_on_far_edge_is_rejected() {
        let m = mapper((100, 100), (200, 200));
        assert_eq!(m.map_point(100.0, 50.0), None);
        assert_eq!(m.map_point(50.0, 100.0), None);
    }

    #[test]
    fn test_negative_and_nan_coordinates_are_rejected() {
        let m = mapper((100, 100), (200, 200));
        assert_eq!(m.map_point(-0.5, 10.0), None);
        assert_eq!(m.map_point(10.0, f64::NAN), None);
    }

    #[test]
    fn test_last_pixel_is_clamped_inside_device() {
        // 99.9 * 2 = 199.8 rounds to 200, which must clamp to 199.
        let m = mapper((100, 100), (200, 200));
        assert_eq!(m.map_point(99.9, 99.9), Some(DevicePoint { x: 199, y: 199 }));
    }

    #[test]
    fn test_map_points_rejects_whole_batch_when_one_point_invalid() {
        let m = mapper((100, 100), (200, 200));
        let points = [Point::new(10.0, 10.0), Point::new(150.0, 10.0)];
        assert_eq!(m.map_points(&points), None);
    }

    #[test]
    fn test_map_points_maps_every_point_in_order() {
        let m = mapper((100, 100), (200, 200));
        let points = [Point::new(10.0, 10.0), Point::new(20.0, 30.0)];
        assert_eq!(
            m.map_points(&points),
            Some(vec![DevicePoint { x: 20, y: 20 }, DevicePoint { x: 40, y: 60 }])
        );
    }

    #[test]
    fn test_zero_remote_dimensions_reject_every_point() {
        let m = mapper((0, 720), (1920, 1080));
        assert_eq!(m.map_point(0.0, 0.0), None);
    }

    #[test]
    fn test_set_remote_dimensions_recomputes_scale() {
        let mut m = mapper((100, 100), (200, 200));

        m.set_remote_dimensions(200, 200);

        assert_eq!(m.rc_dimensions(), (200, 200));
        assert_eq!(m.scale_factors(), (1.0, 1.0));
        assert_eq!(m.map_point(150.0, 150.0), Some(DevicePoint { x: 150, y: 150 }));
    }

    #[test]
    fn test_update_display_metrics_picks_up_rotation() {
        let source = FixedMetrics::new(1080, 1920);
        let mut m = GestureMapper::new(1080, 1920, source.clone());
        source.set(DisplayMetrics {
            width: 1920,
            height: 1080,
            rotation: Rotation::Rotation90,
        });

        m.update_display_metrics();

        assert_eq!(m.device_dimensions(), (1920, 1080));
        assert_eq!(m.rotation(), Rotation::Rotation90);
    }

    #[test]
    fn test_rotation_degrees_round_trip() {
        for degrees in [0, 90, 180, 270] {
            assert_eq!(Rotation::from_degrees(degrees).map(Rotation::degrees), Some(degrees));
        }
        assert_eq!(Rotation::from_degrees(45), None);
    }
}
