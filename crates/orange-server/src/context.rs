//! The business-logic context the dispatcher delegates to.
//!
//! The dispatcher opens and closes every response envelope, but for `call`
//! and `list` the context writes the outcome itself through the capability it
//! is handed. [`Outcome`] can write one key and is consumed doing so;
//! [`ResultSlot`] can only fill the already opened `result` key.

use orange_protocol::{CallParams, Outcome, ResultSlot};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("not supported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),
}

/// Executes authenticated calls, enumerates objects and manages sessions.
///
/// Invoked concurrently from every worker, hence `Send + Sync`.
pub trait Context: Send + Sync + 'static {
    /// Run `call.object`.`call.method` for session `call.sid`. Must write
    /// `result` or `error` through `outcome`; the dispatcher does not check.
    fn invoke_call(
        &self,
        call: CallParams<'_>,
        outcome: Outcome<'_>,
    ) -> impl std::future::Future<Output = ()> + Send;

    /// Enumerate what `sid` may call under `path` into the `result` table.
    fn list(
        &self,
        sid: &str,
        path: &str,
        result: ResultSlot<'_>,
    ) -> impl std::future::Future<Output = ()> + Send;

    /// Check `proof` against the challenge `token` and open a session.
    fn login(
        &self,
        username: &str,
        token: &str,
        proof: &str,
    ) -> impl std::future::Future<Output = Result<String, ContextError>> + Send;

    fn logout(
        &self,
        sid: &str,
    ) -> impl std::future::Future<Output = Result<(), ContextError>> + Send;
}
