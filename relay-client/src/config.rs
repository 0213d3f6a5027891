//! Application credentials and identity sent in the connection handshake.

/// Schema layer negotiated at connect time unless overridden.
pub const DEFAULT_LAYER: i32 = 75;

/// Endpoint used when no session exists yet.
pub const DEFAULT_ENDPOINT: &str = "149.154.167.50:443";

/// Credentials and client identity for `initConnection`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Application id issued by the service.
    pub app_id: i32,
    /// Application hash issued by the service.
    pub app_hash: String,
    /// Client version string.
    pub app_version: String,
    /// Device model string.
    pub device_model: String,
    /// OS name/version string.
    pub system_version: String,
    /// System language code.
    pub system_lang_code: String,
    /// Language pack name.
    pub lang_pack: String,
    /// Language code.
    pub lang_code: String,
    /// Schema layer to announce at connect time.
    pub layer: i32,
}

impl AppConfig {
    /// Defaults for everything except the credentials.
    pub fn new(app_id: i32, app_hash: &str) -> Self {
        Self {
            app_id,
            app_hash: app_hash.to_string(),
            app_version: "0.0.1".to_string(),
            device_model: "Unknown".to_string(),
            system_version: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
            system_lang_code: "en".to_string(),
            lang_pack: String::new(),
            lang_code: "en".to_string(),
            layer: DEFAULT_LAYER,
        }
    }
}
