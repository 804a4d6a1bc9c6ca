use serde::{Deserialize, Serialize};

/// Who a request acts as, as established by a login or a verified bearer token.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    /// Subject identifier issued by the identity authority.
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}
