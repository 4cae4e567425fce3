use thiserror::Error;

/// Unified error type for the accounts proxy.
///
/// `NotFound`/`Backend`/`OutOfQuota` are the "lookup" kinds a dispatcher
/// handler can expect and map to a status code; `AlreadyServing`/`NotServing`
/// are server lifecycle misuse and never reach a handler.
#[derive(Error, Debug)]
pub enum AccountsError {
    #[error("Not found: [{0}]")]
    NotFound(String),

    #[error("Backend error: [{0}]")]
    Backend(String),

    #[error("Out of quota, retry in {wait_seconds:.1}s")]
    OutOfQuota { wait_seconds: f64 },

    #[error("Already serving")]
    AlreadyServing,

    #[error("Not serving")]
    NotServing,
}

impl AccountsError {
    /// Map to the dispatcher's response status code. Only meaningful for the
    /// three "lookup" variants; lifecycle variants never reach a handler.
    pub fn protocol_status(&self) -> u16 {
        match self {
            AccountsError::NotFound(_) => 404,
            AccountsError::Backend(_) => 500,
            AccountsError::OutOfQuota { .. } => 500,
            AccountsError::AlreadyServing | AccountsError::NotServing => 500,
        }
    }

    /// True for the kinds a refresh loop should log and swallow rather than
    /// escalate as fatal.
    pub fn is_lookup_failure(&self) -> bool {
        matches!(
            self,
            AccountsError::NotFound(_) | AccountsError::Backend(_) | AccountsError::OutOfQuota { .. }
        )
    }
}
