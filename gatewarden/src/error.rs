// gatewarden/src/error.rs
//
// Result-sum error types. Exceptions-for-control-flow are forbidden in the
// core: every fallible detector returns Result<_, DetectorError>, and the
// engine translates the variants into failed_detectors entries. The host
// adapter never sees a panic from the pipeline.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DetectorError {
    #[error("detector timed out")]
    Timeout,
    #[error("malformed input")]
    BadInput,
    #[error("transient failure")]
    Transient,
    #[error("backing state unhealthy")]
    Unhealthy,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is shut down")]
    ShutDown,
    #[error("snapshot store: {0}")]
    Snapshot(String),
    #[error("config: {0}")]
    Config(String),
}
