use thiserror::Error;

/// Errors surfaced by the OpenEVSE client.
///
/// REST-layer failures are raised to the immediate caller; the websocket
/// listener never raises out of its driving task and reports failures
/// through [`PushEvent::ConnectionState`](crate::connection::PushEvent)
/// instead.
#[derive(Debug, Error)]
pub enum OpenEvseError {
    /// The charger rejected the configured credentials (HTTP 401).
    #[error("authentication failure")]
    Authentication,

    /// The charger answered with HTTP 400 or an undecodable body.
    #[error("error parsing response: {0}")]
    ParseJson(String),

    /// The request did not complete within the client timeout.
    #[error("timeout while updating {0}")]
    Timeout(String),

    /// The charger firmware is too old for the requested endpoint.
    /// Raised before any network call is made.
    #[error("feature not supported by charger firmware")]
    UnsupportedFeature,

    /// A parameter was outside the range the charger accepts.
    #[error("invalid value for {field}: {value}")]
    InvalidValue {
        /// Name of the rejected parameter.
        field: &'static str,
        /// The rejected value, rendered for logging.
        value: String,
    },

    /// The charger does not report a serial number (pre-4.x firmware).
    #[error("charger reported no serial number")]
    MissingSerial,

    /// `ws_start` was called while the push listener is already running.
    #[error("websocket listener already running")]
    AlreadyListening,

    /// The charger acknowledged the request but reported a failure message.
    #[error("command failed: {0}")]
    Command(String),

    /// Transport-level HTTP failure (connection refused, TLS, ...).
    #[error("http request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// The configured host does not form a valid URL.
    #[error("invalid server address: {0}")]
    Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for OpenEvseError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            let url = err
                .url()
                .map(|url| url.to_string())
                .unwrap_or_else(|| "unknown url".to_string());
            OpenEvseError::Timeout(url)
        } else {
            OpenEvseError::Request(err)
        }
    }
}
