//! RouteInputUseCase: replays viewer gestures on the device screen.
//!
//! A gesture arrives in viewer coordinates.  The use case maps every point
//! through the [`GestureMapper`], fills in the stroke duration, and hands the
//! resulting [`DeviceGesture`] to a [`GestureInjector`].
//!
//! A gesture is all-or-nothing: if any of its points falls outside the
//! viewer area the whole gesture is rejected and nothing is injected.

use std::time::Duration;

use rc_core::domain::gesture::{
    DEFAULT_SWIPE_DURATION, LONG_PRESS_DURATION, MIN_PATH_POINTS, TAP_DURATION,
};
use rc_core::{DeviceGesture, GestureMapper, RemoteGesture};
use thiserror::Error;
use tracing::{debug, warn};

/// Error returned by a [`GestureInjector`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InjectionError {
    #[error("injection backend error: {0}")]
    Backend(String),
    #[error("injection is not available (missing permission or service)")]
    Unavailable,
}

/// Error type for the route-input use case.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteInputError {
    /// At least one point lies outside the viewer area.
    #[error("{kind} gesture has coordinates outside the viewer area")]
    InvalidCoordinates { kind: &'static str },

    #[error("multi-step gesture needs at least 2 points, got {0}")]
    TooFewPoints(usize),

    #[error(transparent)]
    Injection(#[from] InjectionError),
}

/// Replays a mapped gesture on the device.
///
/// The platform implementation (accessibility service, uinput, ...) lives in
/// the infrastructure layer; tests use a mock.
#[cfg_attr(test, mockall::automock)]
pub trait GestureInjector: Send + Sync {
    fn inject(&self, gesture: &DeviceGesture) -> Result<(), InjectionError>;
}

impl<T: GestureInjector + ?Sized> GestureInjector for std::sync::Arc<T> {
    fn inject(&self, gesture: &DeviceGesture) -> Result<(), InjectionError> {
        (**self).inject(gesture)
    }
}

/// Use case that maps and injects remote gestures.
pub struct RouteInputUseCase<I: GestureInjector> {
    mapper: GestureMapper,
    injector: I,
}

impl<I: GestureInjector> RouteInputUseCase<I> {
    pub fn new(mapper: GestureMapper, injector: I) -> Self {
        Self { mapper, injector }
    }

    /// Maps `gesture` to device pixels and injects it.
    ///
    /// Returns the injected gesture on success.
    ///
    /// # Errors
    ///
    /// - [`RouteInputError::InvalidCoordinates`] if any point is outside the
    ///   viewer area (nothing is injected).
    /// - [`RouteInputError::TooFewPoints`] for a path with fewer than two points.
    /// - [`RouteInputError::Injection`] if the injector fails.
    pub fn handle_gesture(&self, gesture: &RemoteGesture) -> Result<DeviceGesture, RouteInputError> {
        let mapped = self.map(gesture)?;
        debug!(kind = gesture.kind(), ?mapped, "injecting gesture");
        self.injector.inject(&mapped).map_err(|e| {
            warn!(kind = gesture.kind(), "gesture injection failed: {e}");
            RouteInputError::Injection(e)
        })?;
        Ok(mapped)
    }

    fn map(&self, gesture: &RemoteGesture) -> Result<DeviceGesture, RouteInputError> {
        let invalid = || RouteInputError::InvalidCoordinates {
            kind: gesture.kind(),
        };

        match gesture {
            RemoteGesture::Tap { x, y } => Ok(DeviceGesture::Tap {
                at: self.mapper.map_point(*x, *y).ok_or_else(invalid)?,
                duration: TAP_DURATION,
            }),
            RemoteGesture::LongPress { x, y } => Ok(DeviceGesture::LongPress {
                at: self.mapper.map_point(*x, *y).ok_or_else(invalid)?,
                duration: LONG_PRESS_DURATION,
            }),
            RemoteGesture::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            } => {
                let from = self.mapper.map_point(*x1, *y1).ok_or_else(invalid)?;
                let to = self.mapper.map_point(*x2, *y2).ok_or_else(invalid)?;
                let duration = duration_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_SWIPE_DURATION);
                Ok(DeviceGesture::Swipe { from, to, duration })
            }
            RemoteGesture::MultiStep {
                points,
                duration_ms,
            } => {
                if points.len() < MIN_PATH_POINTS {
                    return Err(RouteInputError::TooFewPoints(points.len()));
                }
                let points = self.mapper.map_points(points).ok_or_else(invalid)?;
                Ok(DeviceGesture::Path {
                    points,
                    duration: Duration::from_millis(*duration_ms),
                })
            }
        }
    }

    /// Applies a viewer resize to the mapper.
    pub fn handle_viewer_resize(&mut self, width: u32, height: u32) {
        debug!(width, height, "viewer resized");
        self.mapper.set_remote_dimensions(width, height);
    }

    /// Re-reads the device display metrics (rotation, resolution change).
    pub fn refresh_display_metrics(&mut self) {
        self.mapper.update_display_metrics();
    }

    pub fn mapper(&self) -> &GestureMapper {
        &self.mapper
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
