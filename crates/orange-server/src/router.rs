//! Service router: a [`Context`] that routes calls to services by object name.
//!
//! Each service owns one object (e.g. `system`) and the methods under it.
//! The router does not check session ids; login and logout are delegated to
//! an optional [`Authenticator`] and rejected when none is installed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use orange_protocol::{CallParams, Outcome, ResultSlot, errno};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::context::{Context, ContextError};

/// Error returned by a service method, sent as `{"code": -errno, "str": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct CallError {
    pub code: i64,
    pub message: String,
}

impl CallError {
    pub fn new(errno: i64, message: impl Into<String>) -> Self {
        Self {
            code: -errno,
            message: message.into(),
        }
    }

    pub fn not_found(object: &str, method: &str) -> Self {
        Self::new(errno::ENOENT, format!("No such method: {object}.{method}"))
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(errno::EINVAL, message)
    }

    pub fn to_value(&self) -> Value {
        json!({ "code": self.code, "str": self.message })
    }
}

pub type CallResult = Result<Value, CallError>;

/// One callable object.
pub trait Service: Send + Sync {
    /// The object name clients address (e.g. "system").
    fn object(&self) -> &str;

    /// Method names, as reported by `list`.
    fn methods(&self) -> Vec<String>;

    fn call(
        &self,
        method: &str,
        args: &Map<String, Value>,
    ) -> impl Future<Output = CallResult> + Send;
}

/// Session handling plugged into the router.
pub trait Authenticator: Send + Sync {
    fn login(&self, username: &str, token: &str, proof: &str) -> Result<String, ContextError>;
    fn logout(&self, sid: &str) -> Result<(), ContextError>;
}

/// Object-safe wrapper for the Service trait.
trait ServiceDyn: Send + Sync {
    fn object_dyn(&self) -> &str;
    fn methods_dyn(&self) -> Vec<String>;
    fn call_dyn<'a>(
        &'a self,
        method: &'a str,
        args: &'a Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = CallResult> + Send + 'a>>;
}

impl<T: Service> ServiceDyn for T {
    fn object_dyn(&self) -> &str {
        self.object()
    }
    fn methods_dyn(&self) -> Vec<String> {
        self.methods()
    }
    fn call_dyn<'a>(
        &'a self,
        method: &'a str,
        args: &'a Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = CallResult> + Send + 'a>> {
        Box::pin(self.call(method, args))
    }
}

#[derive(Default)]
pub struct ServiceRouter {
    services: Vec<Box<dyn ServiceDyn>>,
    auth: Option<Arc<dyn Authenticator>>,
}

impl ServiceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_service<S: Service + 'static>(&mut self, service: S) {
        info!("Registering service: {}", service.object());
        self.services.push(Box::new(service));
    }

    pub fn set_authenticator(&mut self, auth: Arc<dyn Authenticator>) {
        self.auth = Some(auth);
    }

    pub fn objects(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.object_dyn()).collect()
    }

    fn find(&self, object: &str) -> Option<&dyn ServiceDyn> {
        self.services
            .iter()
            .find(|s| s.object_dyn() == object)
            .map(|s| s.as_ref())
    }

    fn authenticator(&self) -> Result<&Arc<dyn Authenticator>, ContextError> {
        self.auth
            .as_ref()
            .ok_or_else(|| ContextError::Unsupported("no authenticator configured".into()))
    }
}

/// `*` matches everything, a trailing `*` matches a prefix, anything else
/// must match exactly.
fn path_matches(pattern: &str, object: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => object.starts_with(prefix),
        None => pattern == object,
    }
}

impl Context for ServiceRouter {
    async fn invoke_call(&self, call: CallParams<'_>, outcome: Outcome<'_>) {
        let Some(service) = self.find(call.object) else {
            debug!(object = call.object, "call to unknown object");
            outcome.error(CallError::not_found(call.object, call.method).to_value());
            return;
        };

        match service.call_dyn(call.method, call.args).await {
            Ok(value) => outcome.result(value),
            Err(e) => outcome.error(e.to_value()),
        }
    }

    async fn list(&self, _sid: &str, path: &str, mut result: ResultSlot<'_>) {
        for service in &self.services {
            let object = service.object_dyn();
            if path_matches(path, object) {
                result.insert(object, json!(service.methods_dyn()));
            }
        }
    }

    async fn login(&self, username: &str, token: &str, proof: &str) -> Result<String, ContextError> {
        self.authenticator()?.login(username, token, proof)
    }

    async fn logout(&self, sid: &str) -> Result<(), ContextError> {
        self.authenticator()?.logout(sid)
    }
}

#[cfg(test)]
mod tests {
    use super::path_matches;

    #[test]
    fn wildcard_paths() {
        assert!(path_matches("*", "system"));
        assert!(path_matches("net*", "network"));
        assert!(!path_matches("net*", "system"));
        assert!(path_matches("system", "system"));
        assert!(!path_matches("sys", "system"));
    }
}
