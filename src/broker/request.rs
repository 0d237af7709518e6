//! Connect requests
//!
//! What the broker needs to know about an upgrade request: which application
//! and user the peer belongs to, plus a snapshot of every request parameter.

use std::collections::HashMap;

/// Query parameter carrying the application identifier
pub const APP_ID_PARAM: &str = "appId";
/// Query parameter carrying the user identifier
pub const USER_ID_PARAM: &str = "userId";

/// Identity and parameters of a connecting peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub app_id: String,
    pub user_id: String,
    pub params: HashMap<String, String>,
}

impl ConnectRequest {
    pub fn new(app_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            user_id: user_id.into(),
            params: HashMap::new(),
        }
    }

    /// Add a request parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Build from decoded request parameters
    ///
    /// The identifiers are read from `appId` and `userId`; all parameters,
    /// those two included, are kept in the snapshot.
    pub fn from_params(params: HashMap<String, String>) -> Self {
        let app_id = params.get(APP_ID_PARAM).cloned().unwrap_or_default();
        let user_id = params.get(USER_ID_PARAM).cloned().unwrap_or_default();

        Self {
            app_id,
            user_id,
            params,
        }
    }

    /// Both identifiers present
    pub fn is_valid(&self) -> bool {
        !self.app_id.is_empty() && !self.user_id.is_empty()
    }
}
