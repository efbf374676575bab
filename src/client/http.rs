use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, error, warn};
use url::Url;

use crate::utils::OpenEvseError;

const USER_AGENT: &str = "openevse-rs";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One-shot REST transport for the charger's HTTP API.
///
/// Every call maps the device's status-code conventions onto
/// [`OpenEvseError`] and raises failures to the caller; nothing is
/// retried or swallowed here.
#[derive(Debug, Clone)]
pub(crate) struct RestClient {
    http: reqwest::Client,
    base: Url,
    user: Option<String>,
    password: Option<String>,
}

impl RestClient {
    /// Creates the transport. When `session` is given, that externally
    /// owned client is shared instead of building a private one; its
    /// lifecycle stays with the caller.
    pub(crate) fn new(
        base: Url,
        user: Option<String>,
        password: Option<String>,
        session: Option<reqwest::Client>,
    ) -> Result<Self, OpenEvseError> {
        let http = match session {
            Some(session) => session,
            None => reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(OpenEvseError::Request)?,
        };
        Ok(Self {
            http,
            base,
            user,
            password,
        })
    }

    /// Issues a request against a path relative to the charger base URL.
    ///
    /// `body` is sent as JSON, `form` as a pre-encoded
    /// `application/x-www-form-urlencoded` payload (the legacy RAPI and
    /// divert endpoints). Responses are decoded leniently: the charger
    /// answers some endpoints with bare text, which is passed through as a
    /// JSON string value.
    pub(crate) async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        form: Option<String>,
    ) -> Result<Value, OpenEvseError> {
        let url = self.base.join(path)?;
        debug!("connecting to {url} with data: {body:?} form: {form:?} using method {method}");

        let mut builder = self.http.request(method, url);
        if let (Some(user), Some(password)) = (&self.user, &self.password) {
            builder = builder.basic_auth(user, Some(password));
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        if let Some(form) = form {
            builder = builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(form);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        let message: Value = serde_json::from_str(&text).unwrap_or_else(|_| {
            warn!("non JSON response: {text}");
            Value::String(text.clone())
        });

        if status == StatusCode::BAD_REQUEST {
            let detail = message
                .get("msg")
                .or_else(|| message.get("error"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            error!("error 400: {detail}");
            return Err(OpenEvseError::ParseJson(detail));
        }
        if status == StatusCode::UNAUTHORIZED {
            error!("authentication error: {message}");
            return Err(OpenEvseError::Authentication);
        }
        if matches!(status.as_u16(), 404 | 405 | 500) {
            warn!("{message}");
        }

        Ok(message)
    }

    /// GET helper returning the decoded object, for the `/status` and
    /// `/config` style endpoints that always answer with a mapping.
    pub(crate) async fn get_object(
        &self,
        path: &str,
    ) -> Result<serde_json::Map<String, Value>, OpenEvseError> {
        match self.request(Method::GET, path, None, None).await? {
            Value::Object(entries) => Ok(entries),
            other => Err(OpenEvseError::ParseJson(format!(
                "expected a JSON object from /{path}, got: {other}"
            ))),
        }
    }

    /// Best-effort GET against an absolute external URL (the firmware
    /// release lookup). Non-200 answers and transport failures map to
    /// `None`; this path never raises.
    pub(crate) async fn fetch_external(&self, url: &str) -> Option<Value> {
        debug!("connecting to {url} using method get");
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                error!("{err}: {url}");
                return None;
            }
        };
        if response.status() != StatusCode::OK {
            return None;
        }
        match response.json().await {
            Ok(message) => Some(message),
            Err(err) => {
                error!("{err}");
                None
            }
        }
    }
}
