//! Suite verdicts, the run summary and the proof bundle

mod archive;
mod result;

pub use archive::{list_members, package};
pub use result::{
    any_failed, load_handoff, persist_results, script_log_paths, write_json, RunSummary, Status,
    SuiteResult, SuiteResultBuilder, HANDOFF_ENV, HARNESS_POLICY, INCOMPATIBLE_RC, MALFORMED_RC,
};
