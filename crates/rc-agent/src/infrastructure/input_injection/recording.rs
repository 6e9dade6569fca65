//! Injector that records gestures instead of replaying them.
//!
//! Each injected gesture is pushed into a `Mutex<Vec<...>>` so tests can
//! inspect exactly what reached the injection seam and in what order.  The
//! history is unbounded; the binary uses
//! [`LoggingInjector`](super::LoggingInjector) instead.
//!
//! Set `should_fail = true` to simulate a platform that refuses injection.

use std::sync::{Mutex, PoisonError};

use rc_core::DeviceGesture;
use tracing::info;

use crate::application::route_input::{GestureInjector, InjectionError};

#[derive(Debug, Default)]
pub struct RecordingInjector {
    /// Every gesture accepted so far.
    pub gestures: Mutex<Vec<DeviceGesture>>,
    /// When `true`, `inject` returns [`InjectionError::Unavailable`].
    pub should_fail: bool,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded gestures.
    pub fn recorded(&self) -> Vec<DeviceGesture> {
        self.gestures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl GestureInjector for RecordingInjector {
    fn inject(&self, gesture: &DeviceGesture) -> Result<(), InjectionError> {
        if self.should_fail {
            return Err(InjectionError::Unavailable);
        }
        info!(?gesture, "gesture injected");
        self.gestures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(gesture.clone());
        Ok(())
    }
}
