//! Declarative test suites
//!
//! Each suite is a directory holding a `task.yaml` descriptor with an
//! execute script, an optional restore script, a distro allow-list and an
//! expected outcome.

mod descriptor;
mod intent;
mod loader;

pub use descriptor::{is_compatible, suite_name, Expect, Suite, SuiteDescriptor, DESCRIPTOR_FILE};
pub use intent::{Intent, IntentClassifier};
pub use loader::{discover, MalformedSuite, SuiteEntry, SuiteSet};
