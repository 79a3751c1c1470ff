//! Common utilities shared by every stage

pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod paths;

pub use config::HarnessConfig;
pub use error::{DescriptorError, Error, Result};
pub use host::HostInfo;
pub use paths::ProofLayout;
