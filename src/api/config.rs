//! Configuration for the provisioning handshake and account registration.

use serde::{Deserialize, Serialize};

/// Handshake transport parameters.
///
/// Plain data struct; hosts can build it directly or load it from JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Verb the provisioning socket uses for both requests.
    pub verb: String,
    /// Path of the request announcing the provisioning address.
    pub address_path: String,
    /// Path of the request carrying the encrypted provisioning envelope.
    pub message_path: String,
    /// Prefix of the linking URI shown to the user.
    pub link_prefix: String,
}

impl HandshakeConfig {
    pub fn default_config() -> HandshakeConfig {
        HandshakeConfig {
            verb: "PUT".to_string(),
            address_path: "/v1/address".to_string(),
            message_path: "/v1/message".to_string(),
            link_prefix: "tsdevice:/".to_string(),
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(bytes: &[u8]) -> Result<HandshakeConfig, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Sizes of the secrets generated during registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Signaling key length: 32 bytes cipher key plus 20 bytes MAC key.
    pub signaling_key_len: usize,
    /// Random bytes behind the server password.
    pub password_len: usize,
}

impl RegistrationConfig {
    pub fn default_config() -> RegistrationConfig {
        RegistrationConfig {
            signaling_key_len: 32 + 20,
            password_len: 16,
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<RegistrationConfig, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self::default_config()
    }
}
