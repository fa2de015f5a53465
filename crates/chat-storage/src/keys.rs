//! Storage key constants.

/// Storage keys used by the client session
pub struct StorageKeys;

impl StorageKeys {
    /// Short-lived access token
    pub const ACCESS_TOKEN: &'static str = "chatapp_access_token";

    /// Long-lived refresh token
    pub const REFRESH_TOKEN: &'static str = "chatapp_refresh_token";

    /// Cached user profile (JSON)
    pub const USER: &'static str = "chatapp_user";

    /// Every key owned by the session, in clear order.
    pub const ALL: [&'static str; 3] = [Self::ACCESS_TOKEN, Self::REFRESH_TOKEN, Self::USER];
}
