//! Test doubles and fixtures shared by the supervisor suites.

mod installation;
mod loader;
mod reporter;

pub use installation::{Install, MODULE, install};
pub use loader::StubLoader;
pub use reporter::{HealthEvent, RecordingHealthReporter};
