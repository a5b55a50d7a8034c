//! Storage key names.

/// Names under which the token pair is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenKeys {
    pub access: String,
    pub refresh: String,
}

impl TokenKeys {
    /// Default access token name
    pub const ACCESS_TOKEN: &'static str = "accessToken";

    /// Default refresh token name
    pub const REFRESH_TOKEN: &'static str = "refreshToken";

    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl Default for TokenKeys {
    fn default() -> Self {
        Self::new(Self::ACCESS_TOKEN, Self::REFRESH_TOKEN)
    }
}
