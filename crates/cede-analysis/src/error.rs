use thiserror::Error;

/// Failure taxonomy for talking to the analysis engine.
///
/// Corruption of locally persisted data (cache or history) is deliberately
/// absent: it is swallowed at the read boundary with a warning so damaged
/// state can never block a fresh submission or poll.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Transport-level failure before an HTTP status was obtained.
    #[error("engine request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The engine answered with a non-2xx status.
    #[error("engine returned HTTP {status}: {message}")]
    Server { status: u16, message: String },

    /// The poll budget ran out without observing a terminal state.
    #[error("task polling timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// The engine reported the analysis as FAILED.
    #[error("{message}")]
    Failed { task_id: String, message: String },
}
