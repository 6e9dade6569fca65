//! Display metrics from configuration.
//!
//! A platform build would query the window manager for the current size and
//! rotation.  [`StaticDisplayMetrics`] holds whatever the configuration (or a
//! later call to [`set`](StaticDisplayMetrics::set)) says, which is enough
//! for kiosks with a fixed panel and for tests.

use std::sync::{PoisonError, RwLock};

use rc_core::{DisplayMetrics, DisplayMetricsSource, Rotation};
use tracing::info;

/// A [`DisplayMetricsSource`] backed by a value in memory.
#[derive(Debug)]
pub struct StaticDisplayMetrics {
    metrics: RwLock<DisplayMetrics>,
}

impl StaticDisplayMetrics {
    pub fn new(width: u32, height: u32, rotation: Rotation) -> Self {
        Self {
            metrics: RwLock::new(DisplayMetrics {
                width,
                height,
                rotation,
            }),
        }
    }

    /// Replaces the metrics, e.g. after the panel was rotated.
    ///
    /// Mappers pick the change up on their next
    /// `update_display_metrics()` call.
    pub fn set(&self, metrics: DisplayMetrics) {
        info!(
            width = metrics.width,
            height = metrics.height,
            rotation = metrics.rotation.degrees(),
            "display metrics changed"
        );
        *self.metrics.write().unwrap_or_else(PoisonError::into_inner) = metrics;
    }
}

impl DisplayMetricsSource for StaticDisplayMetrics {
    fn display_metrics(&self) -> DisplayMetrics {
        *self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }
}
