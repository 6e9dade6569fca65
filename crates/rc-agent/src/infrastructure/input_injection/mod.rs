//! Gesture injectors.
//!
//! Replaying a gesture on a real screen needs a platform service (an
//! accessibility service, `uinput`, a vendor SDK).  Those live outside this
//! crate and implement [`GestureInjector`](crate::application::route_input::GestureInjector).
//!
//! [`LoggingInjector`] is what the CLI runs with when no platform service is
//! wired in.  [`RecordingInjector`] keeps every gesture and is for tests.

pub mod logging;
pub mod recording;

pub use logging::LoggingInjector;
pub use recording::RecordingInjector;
