//! Gesture vocabulary shared by the wire protocol and the input injector.
//!
//! A [`RemoteGesture`] is what the viewer sends: coordinates in the viewer's
//! own pixel space, exactly as they appear in the JSON `input` message.
//!
//! A [`DeviceGesture`] is what the injector replays: device pixels and a
//! concrete stroke duration.  The conversion between the two lives in the
//! input-routing use case, which owns the [`GestureMapper`](crate::GestureMapper).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::gesture_mapper::{DevicePoint, Point};

/// How long a tap holds the pointer down.
pub const TAP_DURATION: Duration = Duration::from_millis(100);

/// How long a long press holds the pointer down.
pub const LONG_PRESS_DURATION: Duration = Duration::from_millis(1000);

/// Swipe duration used when the viewer does not specify one.
pub const DEFAULT_SWIPE_DURATION: Duration = Duration::from_millis(300);

/// Multi-step path duration used when the viewer does not specify one.
pub const DEFAULT_MULTI_STEP_DURATION: Duration = Duration::from_millis(500);

/// Minimum number of points in a [`RemoteGesture::MultiStep`] path.
pub const MIN_PATH_POINTS: usize = 2;

/// A pointer gesture in viewer coordinates.
///
/// Serialized with a `"kind"` tag, e.g. `{"kind":"tap","x":10.0,"y":20.0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteGesture {
    Tap {
        x: f64,
        y: f64,
    },
    LongPress {
        x: f64,
        y: f64,
    },
    Swipe {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        /// Overrides [`DEFAULT_SWIPE_DURATION`] when present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    /// A freehand stroke through every point in order.
    MultiStep {
        points: Vec<Point>,
        #[serde(default = "default_multi_step_duration_ms")]
        duration_ms: u64,
    },
}

fn default_multi_step_duration_ms() -> u64 {
    DEFAULT_MULTI_STEP_DURATION.as_millis() as u64
}

impl RemoteGesture {
    /// Short lower-case name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteGesture::Tap { .. } => "tap",
            RemoteGesture::LongPress { .. } => "long_press",
            RemoteGesture::Swipe { .. } => "swipe",
            RemoteGesture::MultiStep { .. } => "multi_step",
        }
    }
}

/// A gesture ready to be replayed on the device screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceGesture {
    Tap {
        at: DevicePoint,
        duration: Duration,
    },
    LongPress {
        at: DevicePoint,
        duration: Duration,
    },
    Swipe {
        from: DevicePoint,
        to: DevicePoint,
        duration: Duration,
    },
    Path {
        points: Vec<DevicePoint>,
        duration: Duration,
    },
}

impl DeviceGesture {
    pub fn duration(&self) -> Duration {
        match self {
            DeviceGesture::Tap { duration, .. }
            | DeviceGesture::LongPress { duration, .. }
            | DeviceGesture::Swipe { duration, .. }
            | DeviceGesture::Path { duration, .. } => *duration,
        }
    }
}
