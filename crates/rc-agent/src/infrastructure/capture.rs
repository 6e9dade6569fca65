//! Synthetic capture source.
//!
//! A platform build grabs the screen through a compositor API and writes the
//! pixels into the encoder's [`InputSurface`].  [`TestPatternSource`] does the
//! same with generated frames so the whole pipeline (encode → buffer → send)
//! can run on a desktop or in CI.
//!
//! The pattern is a grey background with a white vertical bar that moves
//! one step per frame, so consecutive frames differ in only a few columns
//! and delta frames stay small.

use std::time::Duration;

use rc_core::clock;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use super::encoder::{InputSurface, RawFrame};

const BACKGROUND: [u8; 4] = [0x30, 0x30, 0x30, 0xFF];
const BAR: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Renders frame number `index` of the test pattern as RGBA.
pub fn render_test_pattern(width: u32, height: u32, index: u64) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let bar_width = (w / 16).max(1);
    let bar_x = if w == 0 { 0 } else { (index as usize * 4) % w };

    let mut data = Vec::with_capacity(w * h * 4);
    for _ in 0..h {
        for x in 0..w {
            let in_bar = x >= bar_x && x < bar_x + bar_width;
            data.extend_from_slice(if in_bar { &BAR } else { &BACKGROUND });
        }
    }
    data
}

/// Feeds generated frames into an encoder at a fixed rate.
pub struct TestPatternSource {
    surface: InputSurface,
    frame_rate: u32,
}

impl TestPatternSource {
    pub fn new(surface: InputSurface, frame_rate: u32) -> Self {
        Self {
            surface,
            frame_rate: frame_rate.max(1),
        }
    }

    /// Builds frame `index` at the surface's dimensions.
    pub fn frame(&self, index: u64) -> RawFrame {
        let (width, height) = self.surface.dimensions();
        RawFrame {
            width,
            height,
            data: render_test_pattern(width, height, index),
            captured_at_ms: clock::monotonic_ms(),
        }
    }

    /// Submits frames until `shutdown` turns `true`.
    ///
    /// Returns the number of frames the encoder accepted.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = time::interval(Duration::from_secs(1) / self.frame_rate);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let (width, height) = self.surface.dimensions();
        info!(width, height, fps = self.frame_rate, "test pattern source started");

        let mut index = 0u64;
        let mut accepted = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.surface.submit(self.frame(index)) {
                        accepted += 1;
                    }
                    index += 1;
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!(
            generated = index,
            accepted,
            busy_drops = self.surface.dropped_frames(),
            "test pattern source stopped"
        );
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_has_rgba_size() {
        assert_eq!(render_test_pattern(8, 2, 0).len(), 8 * 2 * 4);
    }

    #[test]
    fn test_bar_moves_between_frames() {
        let first = render_test_pattern(64, 1, 0);
        let second = render_test_pattern(64, 1, 1);

        assert_ne!(first, second);
        assert_eq!(&first[0..4], &BAR);
        assert_eq!(&second[0..4], &BACKGROUND);
        assert_eq!(&second[16..20], &BAR);
    }

    #[test]
    fn test_zero_width_renders_nothing() {
        assert!(render_test_pattern(0, 10, 3).is_empty());
    }
}
