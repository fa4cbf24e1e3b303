//! Method names accepted in the `method` field of a call envelope.

/// The five call kinds understood by the dispatcher.
pub struct Methods;

impl Methods {
    pub const CALL: &str = "call";
    pub const LIST: &str = "list";
    pub const CHALLENGE: &str = "challenge";
    pub const LOGIN: &str = "login";
    pub const LOGOUT: &str = "logout";

    pub const ALL: [&str; 5] = [
        Self::CALL,
        Self::LIST,
        Self::CHALLENGE,
        Self::LOGIN,
        Self::LOGOUT,
    ];

    pub fn is_known(method: &str) -> bool {
        Self::ALL.contains(&method)
    }
}

/// Wildcard path used by `list` when the client sends none.
pub const LIST_WILDCARD: &str = "*";
