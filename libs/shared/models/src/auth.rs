use serde::{Deserialize, Serialize};

/// The already-authenticated caller handed to us by the connection layer.
/// Token verification happens upstream; this core only ever sees the
/// resolved identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub email: Option<String>,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
        }
    }
}
