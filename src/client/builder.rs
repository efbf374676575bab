//! Simplified builder API for creating OpenEVSE clients.

use crate::client::OpenEvse;
use crate::connection::PushOptions;
use crate::utils::OpenEvseError;

/// Configuration for an OpenEVSE client.
///
/// This struct provides a simple way to configure the connection with
/// sensible defaults.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Charger host name or address, optionally with a port
    /// (e.g. "openevse.local" or "192.168.1.4:8080")
    pub host: String,
    /// Username for HTTP basic authentication
    pub user: Option<String>,
    /// Password for HTTP basic authentication
    pub password: Option<String>,
    /// Push-connection tuning (backoff, keepalive cadence)
    pub push_options: PushOptions,
    /// Externally owned HTTP session to share across clients; its
    /// lifecycle stays with the caller
    pub session: Option<reqwest::Client>,
}

impl ClientConfig {
    /// Creates a new configuration for the given charger host.
    ///
    /// # Arguments
    ///
    /// * `host` - The charger host name or address
    ///
    /// # Returns
    ///
    /// A new `ClientConfig` with default values
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            password: None,
            push_options: PushOptions::default(),
            session: None,
        }
    }

    /// Sets the username for authentication.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the password for authentication.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the push-connection options.
    #[must_use]
    pub fn push_options(mut self, push_options: PushOptions) -> Self {
        self.push_options = push_options;
        self
    }

    /// Shares an externally owned HTTP session instead of building a
    /// private one.
    #[must_use]
    pub fn session(mut self, session: reqwest::Client) -> Self {
        self.session = Some(session);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns an error when the host does not form a valid URL or the
    /// push options fail validation.
    pub fn build(self) -> Result<OpenEvse, OpenEvseError> {
        OpenEvse::with_session(
            &self.host,
            self.user,
            self.password,
            self.push_options,
            self.session,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("openevse.local")
            .user("admin")
            .password("secret")
            .push_options(PushOptions::fast());

        assert_eq!(config.host, "openevse.local");
        assert_eq!(config.user, Some("admin".to_string()));
        assert_eq!(config.password, Some("secret".to_string()));
        assert_eq!(config.push_options.base_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_build_creates_client() {
        let client = ClientConfig::new("192.168.1.4:8080").build().unwrap();
        assert!(format!("{client:?}").contains("192.168.1.4"));
    }

    #[test]
    fn test_build_rejects_invalid_push_options() {
        let result = ClientConfig::new("openevse.local")
            .push_options(PushOptions::new().with_max_failed_attempts(0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_rejects_invalid_host() {
        assert!(ClientConfig::new("not a host").build().is_err());
    }

    #[test]
    fn test_external_session_is_accepted() {
        let session = reqwest::Client::new();
        let client = ClientConfig::new("openevse.local").session(session).build();
        assert!(client.is_ok());
    }
}
