use thiserror::Error;

/// Failure modes of one tutor generation call. The scheduler retries only
/// `RateLimited`; everything else surfaces immediately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    /// Provider signalled throttling (HTTP 429 or an explicit quota reply).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Transport-level trouble that a later, separate run may not see.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The request itself is bad or the provider rejected it for good.
    #[error("provider error: {0}")]
    Fatal(String),
}

impl GenerateError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GenerateError::RateLimited(_))
    }
}

#[derive(Error, Debug)]
pub enum ResumeError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// Another live process owns this run. `--force` overrides.
    #[error("run {run_id} is owned by live pid {owner_pid}; pass --force to take it over")]
    LockHeld { run_id: String, owner_pid: u32 },

    #[error("run {0} has no recorded scope and no results to infer it from")]
    ScopeUnknown(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Precondition failures caught before any work is scheduled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("no scenarios selected")]
    NoScenarios,

    #[error("no profiles selected")]
    NoProfiles,

    #[error("unknown scenario id: {0}")]
    UnknownScenario(String),

    #[error("unknown profile name: {0}")]
    UnknownProfile(String),
}
