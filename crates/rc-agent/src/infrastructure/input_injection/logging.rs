//! Injector for builds without a platform input service.
//!
//! Logs every gesture and keeps only a running count, so a long-lived agent
//! does not accumulate gesture history.

use std::sync::atomic::{AtomicU64, Ordering};

use rc_core::DeviceGesture;
use tracing::info;

use crate::application::route_input::{GestureInjector, InjectionError};

#[derive(Debug, Default)]
pub struct LoggingInjector {
    injected: AtomicU64,
}

impl LoggingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gestures accepted since start-up.
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }
}

impl GestureInjector for LoggingInjector {
    fn inject(&self, gesture: &DeviceGesture) -> Result<(), InjectionError> {
        let n = self.injected.fetch_add(1, Ordering::Relaxed) + 1;
        info!(?gesture, injected = n, "gesture injected (no platform injector)");
        Ok(())
    }
}
