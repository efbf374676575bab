//! The OpenEVSE façade: cached charger state, REST operations and the
//! push-connection lifecycle.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use reqwest::Method;
use semver::Version;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::client::http::RestClient;
use crate::client::listener::UpdateListener;
use crate::client::model::{
    CLAIM_CLIENT_ID, Claim, ChargeMode, DeviceInfo, FirmwareRelease, LimitType, MAX_AMPS,
    MIN_AMPS, Override, RapiResponse, SafetyCounts, charger_state_name, parse_firmware,
    version_gate,
};
use crate::connection::{ConnectionState, PushEvent, PushOptions, PushSocket};
use crate::utils::{OpenEvseError, value_truthy, websocket_uri};

/// Pushed keys that signal the cached view is stale and a full REST
/// resync must run before the payload is merged.
const UPDATE_TRIGGERS: [&str; 6] = [
    "config_version",
    "claims_version",
    "override_version",
    "schedule_version",
    "schedule_plan_version",
    "limit_version",
];

const GITHUB_RELEASES_BASE: &str = "https://api.github.com/repos/OpenEVSE/";

struct Inner {
    url: Url,
    user: Option<String>,
    password: Option<String>,
    rest: RestClient,
    push_options: PushOptions,
    status: RwLock<Map<String, Value>>,
    config: RwLock<Map<String, Value>>,
    firmware: RwLock<Option<Version>>,
    ws_listening: AtomicBool,
    socket: Mutex<Option<Arc<PushSocket>>>,
    listener: RwLock<Option<Arc<dyn UpdateListener>>>,
}

/// A single OpenEVSE charger.
///
/// Holds the cached `status` and `config` mappings, keeps them fresh
/// through [`update`](OpenEvse::update) and the websocket push channel,
/// and exposes the device operations and typed accessors over the cache.
/// Cloning is cheap and every clone shares the same cached state.
#[derive(Clone)]
pub struct OpenEvse {
    inner: Arc<Inner>,
}

impl Debug for OpenEvse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenEvse")
            .field("url", &self.inner.url.as_str())
            .field("ws_state", &self.ws_state())
            .finish()
    }
}

impl OpenEvse {
    /// Connects to a charger reachable at `host` (name or address,
    /// optionally with a port) without authentication.
    pub fn new(host: &str) -> Result<Self, OpenEvseError> {
        Self::with_credentials(host, None, None)
    }

    /// Connects to a charger with HTTP basic-auth credentials.
    pub fn with_credentials(
        host: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, OpenEvseError> {
        Self::with_options(
            host,
            user.map(str::to_string),
            password.map(str::to_string),
            PushOptions::default(),
        )
    }

    pub(crate) fn with_options(
        host: &str,
        user: Option<String>,
        password: Option<String>,
        push_options: PushOptions,
    ) -> Result<Self, OpenEvseError> {
        Self::with_session(host, user, password, push_options, None)
    }

    /// Builds the façade over an externally owned HTTP session, shared
    /// across façade instances by the caller.
    pub(crate) fn with_session(
        host: &str,
        user: Option<String>,
        password: Option<String>,
        push_options: PushOptions,
        session: Option<reqwest::Client>,
    ) -> Result<Self, OpenEvseError> {
        push_options
            .validate()
            .map_err(|err| OpenEvseError::InvalidValue {
                field: "push_options",
                value: err,
            })?;
        let url = Url::parse(&format!("http://{host}/"))?;
        let rest = RestClient::new(url.clone(), user.clone(), password.clone(), session)?;
        Ok(Self {
            inner: Arc::new(Inner {
                url,
                user,
                password,
                rest,
                push_options,
                status: RwLock::new(Map::new()),
                config: RwLock::new(Map::new()),
                firmware: RwLock::new(None),
                ws_listening: AtomicBool::new(false),
                socket: Mutex::new(None),
                listener: RwLock::new(None),
            }),
        })
    }

    /// Registers the callback invoked after each merged push payload.
    pub fn set_update_listener(&self, listener: impl UpdateListener + 'static) {
        *self.inner.listener.write() = Some(Arc::new(listener));
    }

    /// Refreshes the cached state from the charger and lazily starts the
    /// push connection.
    ///
    /// While the push channel is live only `config` is re-fetched; the
    /// status cache is kept current by the pushed updates themselves.
    pub async fn update(&self) -> Result<(), OpenEvseError> {
        if !self.inner.ws_listening.load(Ordering::SeqCst) {
            debug!("updating data from {}status", self.inner.url);
            let status = self.inner.rest.get_object("status").await?;
            debug!("status update: {status:?}");
            *self.inner.status.write() = status;
        }

        debug!("updating data from {}config", self.inner.url);
        let config = self.inner.rest.get_object("config").await?;
        debug!("config update: {config:?}");
        let firmware = config
            .get("version")
            .and_then(Value::as_str)
            .and_then(parse_firmware);
        *self.inner.firmware.write() = firmware;
        *self.inner.config.write() = config;

        self.start_push_if_needed();
        Ok(())
    }

    /// Verifies the charger is reachable and returns its serial and model.
    pub async fn test_and_get(&self) -> Result<DeviceInfo, OpenEvseError> {
        let response = self.inner.rest.get_object("config").await?;
        let serial = match response.get("wifi_serial").and_then(Value::as_str) {
            Some(serial) => serial.to_string(),
            None => {
                debug!("older firmware detected, missing serial");
                return Err(OpenEvseError::MissingSerial);
            }
        };
        let model = response
            .get("buildenv")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Ok(DeviceInfo { serial, model })
    }

    // ---------------------------------------------------------------
    // Push connection lifecycle
    // ---------------------------------------------------------------

    /// Starts the websocket listener explicitly.
    pub fn ws_start(&self) -> Result<(), OpenEvseError> {
        if self.inner.ws_listening.load(Ordering::SeqCst) {
            return Err(OpenEvseError::AlreadyListening);
        }
        self.start_push_if_needed();
        Ok(())
    }

    /// Stops the websocket listener and closes the transport.
    pub async fn ws_disconnect(&self) {
        self.inner.ws_listening.store(false, Ordering::SeqCst);
        let socket = self.inner.socket.lock().take();
        match socket {
            Some(socket) => socket.close().await,
            None => debug!("websocket listener was not running"),
        }
    }

    /// Current state of the push connection.
    pub fn ws_state(&self) -> ConnectionState {
        match self.inner.socket.lock().as_ref() {
            Some(socket) => socket.state(),
            None => ConnectionState::Idle,
        }
    }

    fn start_push_if_needed(&self) {
        let mut slot = self.inner.socket.lock();
        if slot.is_some() {
            return;
        }
        let uri = match websocket_uri(&self.inner.url) {
            Ok(uri) => uri,
            Err(err) => {
                warn!("cannot derive websocket uri: {err}");
                return;
            }
        };
        let credentials = match (&self.inner.user, &self.inner.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };

        let (events, receiver) = mpsc::unbounded_channel();
        let socket = Arc::new(PushSocket::new(
            uri,
            credentials,
            events,
            self.inner.push_options.clone(),
        ));
        *slot = Some(socket.clone());
        drop(slot);

        let merge_client = self.clone();
        tokio::spawn(async move { merge_client.run_merge_loop(receiver).await });

        let listen_socket = socket.clone();
        tokio::spawn(async move { listen_socket.listen().await });

        let interval = self.inner.push_options.keepalive_interval;
        tokio::spawn(async move {
            while socket.state() != ConnectionState::Stopped {
                tokio::time::sleep(interval).await;
                if socket.state() == ConnectionState::Stopped {
                    break;
                }
                socket.keepalive().await;
            }
        });
    }

    async fn run_merge_loop(self, mut events: mpsc::UnboundedReceiver<PushEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_push(event).await;
        }
    }

    pub(crate) async fn handle_push(&self, event: PushEvent) {
        match event {
            PushEvent::ConnectionState { state, reason } => {
                self.handle_state_signal(state, reason);
            }
            PushEvent::Data(payload) => self.merge_push(payload).await,
        }
    }

    fn handle_state_signal(&self, state: ConnectionState, reason: Option<String>) {
        match state {
            ConnectionState::Connected => {
                debug!("websocket to {} successful", self.inner.url);
                self.inner.ws_listening.store(true, Ordering::SeqCst);
            }
            ConnectionState::Disconnected => {
                debug!("websocket to {} disconnected, retrying", self.inner.url);
                if let Some(reason) = reason {
                    debug!("disconnect message: {reason}");
                }
                self.inner.ws_listening.store(false, Ordering::SeqCst);
            }
            ConnectionState::Stopped => {
                // Stopped without an error is expected during shutdown.
                if let Some(reason) = reason {
                    debug!(
                        "websocket to {} failed, aborting [error: {reason}]",
                        self.inner.url
                    );
                }
                self.inner.ws_listening.store(false, Ordering::SeqCst);
            }
            ConnectionState::Idle | ConnectionState::Starting => {}
        }
    }

    async fn merge_push(&self, mut payload: Map<String, Value>) {
        debug!("websocket data: {payload:?}");

        if let Some(watthour) = payload.remove("wh") {
            payload.insert("watthour".to_string(), watthour);
        }

        if payload
            .keys()
            .any(|key| UPDATE_TRIGGERS.contains(&key.as_str()))
        {
            if let Err(err) = self.update().await {
                warn!("resync after push update failed: {err}");
            }
        }

        {
            let mut status = self.inner.status.write();
            for (key, value) in payload {
                status.insert(key, value);
            }
        }

        let listener = self.inner.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_status_update();
        }
    }

    // ---------------------------------------------------------------
    // REST operations
    // ---------------------------------------------------------------

    /// Sends a RAPI command over the legacy `/r` channel.
    pub async fn send_command(&self, command: &str) -> Result<RapiResponse, OpenEvseError> {
        debug!("posting rapi command: {command}");
        let form = serde_urlencoded::to_string([("json", "1"), ("rapi", command)])
            .map_err(|err| OpenEvseError::ParseJson(err.to_string()))?;
        let value = self
            .inner
            .rest
            .request(Method::POST, "r", None, Some(form))
            .await?;
        match value.get("ret").and_then(Value::as_str) {
            Some(ret) => Ok(RapiResponse {
                command: value
                    .get("cmd")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                response: ret.to_string(),
            }),
            None => {
                let msg = value
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Err(OpenEvseError::Command(msg))
            }
        }
    }

    /// Returns the charging schedule.
    pub async fn get_schedule(&self) -> Result<Value, OpenEvseError> {
        debug!("getting current schedule from {}schedule", self.inner.url);
        self.inner
            .rest
            .request(Method::POST, "schedule", None, None)
            .await
    }

    /// Sets the startup charge mode.
    pub async fn set_charge_mode(&self, mode: ChargeMode) -> Result<(), OpenEvseError> {
        debug!("setting charge mode to {}", mode.as_str());
        let response = self
            .post("config", json!({"charge_mode": mode.as_str()}))
            .await?;
        Self::expect_done(&response)
    }

    /// Flips the solar-divert enable flag. Requires firmware 2.9.1.
    pub async fn toggle_divert(&self) -> Result<Value, OpenEvseError> {
        self.require_version("2.9.1")?;

        let enabled = match self.inner.config.read().get("divert_enabled") {
            Some(value) => value_truthy(value),
            None => {
                debug!("unable to check divert status");
                return Err(OpenEvseError::UnsupportedFeature);
            }
        };
        debug!("toggling divert: {}", !enabled);
        self.post("config", json!({"divert_enabled": !enabled}))
            .await
    }

    /// Returns the manual override. Requires firmware 4.0.1.
    pub async fn get_override(&self) -> Result<Value, OpenEvseError> {
        self.require_version("4.0.1")?;
        debug!("getting data from {}override", self.inner.url);
        self.inner
            .rest
            .request(Method::GET, "override", None, None)
            .await
    }

    /// Sets the manual override, preserving fields the caller leaves
    /// unset. Requires firmware 4.0.1.
    pub async fn set_override(&self, settings: Override) -> Result<Value, OpenEvseError> {
        self.require_version("4.0.1")?;

        let mut data = match self.get_override().await? {
            Value::Object(entries) => entries,
            _ => Map::new(),
        };

        data.insert("auto_release".to_string(), json!(settings.auto_release));
        if let Some(state) = settings.state {
            data.insert("state".to_string(), json!(state.as_str()));
        }
        if let Some(charge_current) = settings.charge_current {
            data.insert("charge_current".to_string(), json!(charge_current));
        }
        if let Some(max_current) = settings.max_current {
            data.insert("max_current".to_string(), json!(max_current));
        }
        if let Some(energy_limit) = settings.energy_limit {
            data.insert("energy_limit".to_string(), json!(energy_limit));
        }
        if let Some(time_limit) = settings.time_limit {
            data.insert("time_limit".to_string(), json!(time_limit));
        }

        debug!("override data: {data:?}");
        debug!("setting override config on {}override", self.inner.url);
        self.post("override", Value::Object(data)).await
    }

    /// Toggles the manual override. Uses the HTTP API on firmware 4.0.1
    /// and newer, RAPI `$FE`/`$FS` below.
    pub async fn toggle_override(&self) -> Result<(), OpenEvseError> {
        if self.version_check("4.0.1", None) {
            debug!("toggling manual override {}override", self.inner.url);
            let response = self
                .inner
                .rest
                .request(Method::PATCH, "override", None, None)
                .await?;
            debug!("toggle response: {response:?}");
        } else {
            debug!("toggling manual override via rapi");
            let command = if self.state_raw() == Some(254) {
                "$FE"
            } else {
                "$FS"
            };
            let reply = self.send_command(command).await?;
            debug!("toggle response: {}", reply.response);
        }
        Ok(())
    }

    /// Clears the manual override. Requires firmware 4.0.1.
    pub async fn clear_override(&self) -> Result<(), OpenEvseError> {
        self.require_version("4.0.1")?;
        debug!("clearing manual override {}override", self.inner.url);
        let response = self
            .inner
            .rest
            .request(Method::DELETE, "override", None, None)
            .await?;
        debug!(
            "clear response: {}",
            response.get("msg").and_then(|v| v.as_str()).unwrap_or("")
        );
        Ok(())
    }

    /// Sets the soft current limit. Uses the override endpoint on
    /// firmware 4.1.2 and newer, RAPI `$SC` below.
    pub async fn set_current(&self, amps: i64) -> Result<(), OpenEvseError> {
        if self.version_check("4.1.2", None) {
            let floor = self.config_i64("min_current_hard").unwrap_or(MIN_AMPS);
            let ceiling = self.config_i64("max_current_hard").unwrap_or(MAX_AMPS);
            if amps < floor || amps > ceiling {
                error!("invalid value for current limit: {amps}");
                return Err(OpenEvseError::InvalidValue {
                    field: "amps",
                    value: amps.to_string(),
                });
            }

            debug!("setting current limit to {amps}");
            let response = self
                .set_override(Override {
                    charge_current: Some(amps),
                    ..Override::default()
                })
                .await?;
            debug!("set current response: {response:?}");
        } else {
            debug!("setting current via rapi");
            let reply = self.send_command(&format!("$SC {amps} N")).await?;
            debug!("set current response: {}", reply.response);
        }
        Ok(())
    }

    /// Sets the EVSE service level (0 = auto, 1, 2).
    pub async fn set_service_level(&self, level: i64) -> Result<(), OpenEvseError> {
        if !(0..=2).contains(&level) {
            error!("invalid service level: {level}");
            return Err(OpenEvseError::InvalidValue {
                field: "level",
                value: level.to_string(),
            });
        }
        debug!("set service level to: {level}");
        let response = self.post("config", json!({"service": level})).await?;
        Self::expect_done(&response)
    }

    /// Restarts the WiFi gateway module.
    pub async fn restart_wifi(&self) -> Result<(), OpenEvseError> {
        let response = self.post("restart", json!({"device": "gateway"})).await?;
        debug!(
            "wifi restart response: {}",
            response.get("msg").and_then(|v| v.as_str()).unwrap_or("")
        );
        Ok(())
    }

    /// Restarts the EVSE module. Uses the HTTP API on firmware 5.0.0 and
    /// newer, RAPI `$FR` below.
    pub async fn restart_evse(&self) -> Result<(), OpenEvseError> {
        if self.version_check("5.0.0", None) {
            debug!("restarting evse module via http");
            let response = self.post("restart", json!({"device": "evse"})).await?;
            debug!(
                "evse restart response: {}",
                response.get("msg").and_then(|v| v.as_str()).unwrap_or("")
            );
        } else {
            debug!("restarting evse module via rapi");
            let reply = self.send_command("$FR").await?;
            debug!("evse restart response: {}", reply.response);
        }
        Ok(())
    }

    /// Returns the current charge limit. Requires firmware 5.0.0.
    pub async fn get_limit(&self) -> Result<Value, OpenEvseError> {
        self.require_version("5.0.0")?;
        debug!("getting limit config on {}limit", self.inner.url);
        self.inner
            .rest
            .request(Method::GET, "limit", None, None)
            .await
    }

    /// Sets a charge limit. Requires firmware 5.0.0.
    pub async fn set_limit(
        &self,
        limit_type: LimitType,
        value: i64,
        release: Option<bool>,
    ) -> Result<Value, OpenEvseError> {
        self.require_version("5.0.0")?;

        let mut data = match self.get_limit().await? {
            Value::Object(entries) => entries,
            _ => Map::new(),
        };
        data.insert("type".to_string(), json!(limit_type.as_str()));
        data.insert("value".to_string(), json!(value));
        if let Some(release) = release {
            data.insert("release".to_string(), json!(release));
        }

        debug!("limit data: {data:?}");
        debug!("setting limit config on {}limit", self.inner.url);
        self.post("limit", Value::Object(data)).await
    }

    /// Clears the charge limit. Requires firmware 5.0.0.
    pub async fn clear_limit(&self) -> Result<Value, OpenEvseError> {
        self.require_version("5.0.0")?;
        debug!("clearing limit config on {}limit", self.inner.url);
        self.inner
            .rest
            .request(Method::DELETE, "limit", None, None)
            .await
    }

    /// Makes an EVSE manager claim. Requires firmware 4.1.0.
    pub async fn make_claim(
        &self,
        claim: Claim,
        client: Option<u32>,
    ) -> Result<Value, OpenEvseError> {
        self.require_version("4.1.0")?;

        let client = client.unwrap_or(CLAIM_CLIENT_ID);
        let mut data = Map::new();
        data.insert("auto_release".to_string(), json!(claim.auto_release));
        if let Some(state) = claim.state {
            data.insert("state".to_string(), json!(state.as_str()));
        }
        if let Some(charge_current) = claim.charge_current {
            data.insert("charge_current".to_string(), json!(charge_current));
        }
        if let Some(max_current) = claim.max_current {
            data.insert("max_current".to_string(), json!(max_current));
        }

        debug!("claim data: {data:?}");
        debug!("setting up claim on {}claims/{client}", self.inner.url);
        self.post(&format!("claims/{client}"), Value::Object(data))
            .await
    }

    /// Releases an EVSE manager claim. Requires firmware 4.1.0.
    pub async fn release_claim(&self, client: Option<u32>) -> Result<Value, OpenEvseError> {
        self.require_version("4.1.0")?;
        let client = client.unwrap_or(CLAIM_CLIENT_ID);
        debug!("releasing claim on {}claims/{client}", self.inner.url);
        self.inner
            .rest
            .request(Method::DELETE, &format!("claims/{client}"), None, None)
            .await
    }

    /// Lists claims; `target` selects the resolved-target view.
    /// Requires firmware 4.1.0.
    pub async fn list_claims(&self, target: bool) -> Result<Value, OpenEvseError> {
        self.require_version("4.1.0")?;
        let path = if target { "claims/target" } else { "claims" };
        debug!("getting claims on {}{path}", self.inner.url);
        self.inner.rest.request(Method::GET, path, None, None).await
    }

    /// Sets the LED brightness. Requires firmware 4.1.0.
    pub async fn set_led_brightness(&self, level: i64) -> Result<(), OpenEvseError> {
        self.require_version("4.1.0")?;
        debug!("setting led brightness to {level}");
        self.post("config", json!({"led_brightness": level})).await?;
        Ok(())
    }

    /// Sets the divert mode through the legacy form-encoded endpoint.
    pub async fn set_divert_mode(&self, mode: ChargeMode) -> Result<(), OpenEvseError> {
        debug!("setting divert mode to {}", mode.as_str());
        let form = serde_urlencoded::to_string([("divertmode", mode.divert_code())])
            .map_err(|err| OpenEvseError::ParseJson(err.to_string()))?;
        let response = self
            .inner
            .rest
            .request(Method::POST, "divertmode", None, Some(form))
            .await?;
        if response.as_str() != Some("Divert Mode changed") {
            error!("problem issuing command: {response:?}");
            return Err(OpenEvseError::Command(response.to_string()));
        }
        Ok(())
    }

    /// Pushes a grid voltage reading to the charger. Requires
    /// firmware 2.9.1.
    pub async fn grid_voltage(&self, voltage: Option<i64>) -> Result<(), OpenEvseError> {
        self.require_version("2.9.1")?;

        let mut data = Map::new();
        if let Some(voltage) = voltage {
            data.insert("voltage".to_string(), json!(voltage));
        }
        if data.is_empty() {
            info!("no sensor data to send to device");
            return Ok(());
        }
        debug!("posting voltage: {data:?}");
        let response = self.post("status", Value::Object(data)).await?;
        debug!("voltage posting response: {response:?}");
        Ok(())
    }

    /// Pushes self-production sensor data. Grid import/export is inverted
    /// by default (`-import`/`+export`); grid wins over solar when both
    /// are given. Requires firmware 2.9.1.
    pub async fn self_production(
        &self,
        grid: Option<i64>,
        solar: Option<i64>,
        invert: bool,
        voltage: Option<i64>,
    ) -> Result<(), OpenEvseError> {
        self.require_version("2.9.1")?;

        let grid = grid.map(|grid| if invert { -grid } else { grid });

        let mut data = Map::new();
        if let Some(grid) = grid {
            data.insert("grid_ie".to_string(), json!(grid));
        } else if let Some(solar) = solar {
            data.insert("solar".to_string(), json!(solar));
        }
        if let Some(voltage) = voltage {
            data.insert("voltage".to_string(), json!(voltage));
        }
        if data.is_empty() {
            info!("no sensor data to send to device");
            return Ok(());
        }
        debug!("posting self-production: {data:?}");
        let response = self.post("status", Value::Object(data)).await?;
        debug!("self-production response: {response:?}");
        Ok(())
    }

    /// Pushes vehicle state-of-charge data. Requires firmware 4.1.0.
    pub async fn soc(
        &self,
        battery_level: Option<i64>,
        battery_range: Option<i64>,
        time_to_full: Option<i64>,
        voltage: Option<i64>,
    ) -> Result<(), OpenEvseError> {
        self.require_version("4.1.0")?;

        let mut data = Map::new();
        if let Some(battery_level) = battery_level {
            data.insert("battery_level".to_string(), json!(battery_level));
        }
        if let Some(battery_range) = battery_range {
            data.insert("battery_range".to_string(), json!(battery_range));
        }
        if let Some(time_to_full) = time_to_full {
            data.insert("time_to_full_charge".to_string(), json!(time_to_full));
        }
        if let Some(voltage) = voltage {
            data.insert("voltage".to_string(), json!(voltage));
        }
        if data.is_empty() {
            info!("no soc data to send to device");
            return Ok(());
        }
        debug!("posting soc data: {data:?}");
        let response = self.post("status", Value::Object(data)).await?;
        debug!("soc response: {response:?}");
        Ok(())
    }

    /// Looks up the latest published firmware for this hardware line.
    /// Best effort: every failure maps to `None`.
    pub async fn firmware_check(&self) -> Option<FirmwareRelease> {
        let current = self.inner.firmware.read().clone();
        let Some(current) = current else {
            warn!("unable to find firmware version");
            return None;
        };

        let repo = if current >= Version::new(3, 0, 0) {
            "ESP32_WiFi_V4.x"
        } else {
            "ESP8266_WiFi_v2.x"
        };
        let url = format!("{GITHUB_RELEASES_BASE}{repo}/releases/latest");

        let message = self.inner.rest.fetch_external(&url).await?;
        let latest_version = message.get("tag_name")?.as_str()?.to_string();
        let release_url = message.get("html_url")?.as_str()?.to_string();
        let notes = message.get("body").and_then(Value::as_str).unwrap_or("");
        let release_summary = if notes.chars().count() > 255 {
            let head: String = notes.chars().take(253).collect();
            format!("{head}..")
        } else {
            notes.to_string()
        };

        Some(FirmwareRelease {
            latest_version,
            release_summary,
            release_url,
        })
    }

    /// Returns whether the charger firmware satisfies the given range.
    pub fn version_check(&self, min: &str, max: Option<&str>) -> bool {
        version_gate(self.inner.firmware.read().as_ref(), min, max)
    }

    fn require_version(&self, min: &str) -> Result<(), OpenEvseError> {
        if self.version_check(min, None) {
            Ok(())
        } else {
            debug!("feature not supported for older firmware");
            Err(OpenEvseError::UnsupportedFeature)
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, OpenEvseError> {
        let response = self
            .inner
            .rest
            .request(Method::POST, path, Some(&body), None)
            .await?;
        // A config_version in the reply means our cached view just went
        // stale.
        if response.get("config_version").is_some() {
            self.update().await?;
        }
        Ok(response)
    }

    fn expect_done(response: &Value) -> Result<(), OpenEvseError> {
        let result = response.get("msg").and_then(Value::as_str).unwrap_or("");
        if result == "done" || result == "no change" {
            Ok(())
        } else {
            error!("problem issuing command: {result}");
            Err(OpenEvseError::Command(result.to_string()))
        }
    }

    // ---------------------------------------------------------------
    // Cache accessors
    // ---------------------------------------------------------------

    fn status_i64(&self, key: &str) -> Option<i64> {
        self.inner.status.read().get(key).and_then(Value::as_i64)
    }

    fn status_f64(&self, key: &str) -> Option<f64> {
        self.inner.status.read().get(key).and_then(Value::as_f64)
    }

    fn status_str(&self, key: &str) -> Option<String> {
        self.inner
            .status
            .read()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn status_flag(&self, key: &str) -> bool {
        self.inner
            .status
            .read()
            .get(key)
            .map(value_truthy)
            .unwrap_or(false)
    }

    fn config_i64(&self, key: &str) -> Option<i64> {
        self.inner.config.read().get(key).and_then(Value::as_i64)
    }

    fn config_str(&self, key: &str) -> Option<String> {
        self.inner
            .config
            .read()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn config_flag(&self, key: &str) -> bool {
        self.inner
            .config
            .read()
            .get(key)
            .map(value_truthy)
            .unwrap_or(false)
    }

    /// Charger hostname.
    pub fn hostname(&self) -> Option<String> {
        self.config_str("hostname")
    }

    /// SSID the charger is connected to.
    pub fn wifi_ssid(&self) -> Option<String> {
        self.config_str("ssid")
    }

    /// Ammeter current offset.
    pub fn ammeter_offset(&self) -> Option<i64> {
        self.config_i64("offset")
    }

    /// Ammeter current scale factor.
    pub fn ammeter_scale_factor(&self) -> Option<i64> {
        self.config_i64("scale")
    }

    /// Whether the over-temperature check is enabled.
    pub fn temp_check_enabled(&self) -> bool {
        self.config_flag("tempt")
    }

    /// Whether the diode check is enabled.
    pub fn diode_check_enabled(&self) -> bool {
        self.config_flag("diodet")
    }

    /// Whether the vent-required check is enabled.
    pub fn vent_required_enabled(&self) -> bool {
        self.config_flag("ventt")
    }

    /// Whether the ground check is enabled.
    pub fn ground_check_enabled(&self) -> bool {
        self.config_flag("groundt")
    }

    /// Whether the stuck-relay check is enabled.
    pub fn stuck_relay_check_enabled(&self) -> bool {
        self.config_flag("relayt")
    }

    /// Configured service level.
    pub fn service_level(&self) -> Option<i64> {
        self.config_i64("service")
    }

    /// EVSE controller firmware version.
    pub fn openevse_firmware(&self) -> Option<String> {
        self.config_str("firmware")
    }

    /// WiFi module firmware version, with any `dev` suffix stripped.
    pub fn wifi_firmware(&self) -> Option<String> {
        let value = self.config_str("version")?;
        if value.contains("dev") {
            debug!("stripping 'dev' from version");
            let parts: Vec<&str> = value.split('.').take(3).collect();
            return Some(parts.join("."));
        }
        Some(value)
    }

    /// Soft current limit, falling back to the pilot value.
    pub fn max_current_soft(&self) -> Option<i64> {
        self.config_i64("max_current_soft")
            .or_else(|| self.status_i64("pilot"))
    }

    /// Maximum current reported by the charger.
    pub fn max_current(&self) -> Option<i64> {
        self.status_i64("max_current")
    }

    /// Effective charge current: an active claim's value clamped to the
    /// hard limit, else the soft limit, else the pilot value.
    pub async fn charge_current(&self) -> Result<Option<i64>, OpenEvseError> {
        let claims = match self.list_claims(true).await {
            Ok(claims) => Some(claims),
            Err(OpenEvseError::UnsupportedFeature) => None,
            Err(err) => return Err(err),
        };
        if let Some(current) = claims
            .as_ref()
            .and_then(|claims| claims.get("properties"))
            .and_then(|properties| properties.get("charge_current"))
            .and_then(Value::as_i64)
        {
            let ceiling = self.config_i64("max_current_hard").unwrap_or(MAX_AMPS);
            return Ok(Some(current.min(ceiling)));
        }
        if let Some(soft) = self.config_i64("max_current_soft") {
            return Ok(Some(soft));
        }
        Ok(self.status_i64("pilot"))
    }

    /// Charger IP address.
    pub fn ip_address(&self) -> Option<String> {
        self.status_str("ipaddress")
    }

    /// Line voltage in volts.
    pub fn charging_voltage(&self) -> Option<i64> {
        self.status_i64("voltage")
    }

    /// Network mode the charger reports.
    pub fn mode(&self) -> Option<String> {
        self.status_str("mode")
    }

    /// Whether the charger is on ethernet rather than WiFi.
    pub fn using_ethernet(&self) -> bool {
        self.status_flag("eth_connected")
    }

    /// Stuck-relay trip count.
    pub fn stuck_relay_trip_count(&self) -> Option<i64> {
        self.status_i64("stuckcount")
    }

    /// Missing-ground trip count.
    pub fn no_gnd_trip_count(&self) -> Option<i64> {
        self.status_i64("nogndcount")
    }

    /// GFCI trip count.
    pub fn gfi_trip_count(&self) -> Option<i64> {
        self.status_i64("gfcicount")
    }

    /// Charger status string, derived from the numeric state when the
    /// firmware does not report one directly.
    pub fn status(&self) -> Option<String> {
        self.status_str("status")
            .or_else(|| self.state().map(str::to_string))
    }

    /// Human-readable charger state.
    pub fn state(&self) -> Option<&'static str> {
        self.status_i64("state").map(charger_state_name)
    }

    /// Raw numeric charger state.
    pub fn state_raw(&self) -> Option<i64> {
        self.status_i64("state")
    }

    /// Elapsed charging time in seconds.
    pub fn charge_time_elapsed(&self) -> Option<i64> {
        self.status_i64("elapsed")
    }

    /// WiFi signal strength in dBm.
    pub fn wifi_signal(&self) -> Option<i64> {
        self.status_i64("srssi")
    }

    /// Instantaneous charge current in amps; 0 when not charging.
    pub fn charging_current(&self) -> Option<f64> {
        self.status_f64("amp")
    }

    /// Pilot-advertised current capacity in amps.
    pub fn current_capacity(&self) -> Option<i64> {
        self.status_i64("pilot")
    }

    /// Total energy usage in Wh.
    pub fn usage_total(&self) -> Option<f64> {
        self.status_f64("total_energy")
            .or_else(|| self.status_f64("watthour"))
    }

    /// Ambient sensor temperature in degrees Celsius.
    pub fn ambient_temperature(&self) -> Option<f64> {
        let status = self.inner.status.read();
        let primary = status
            .get("temp")
            .filter(|value| value_truthy(value))
            .and_then(Value::as_f64);
        match primary {
            Some(temp) => Some(temp / 10.0),
            None => status
                .get("temp1")
                .and_then(Value::as_f64)
                .map(|temp| temp / 10.0),
        }
    }

    /// Real-time-clock sensor temperature in degrees Celsius.
    pub fn rtc_temperature(&self) -> Option<f64> {
        self.scaled_temperature("temp2")
    }

    /// IR remote sensor temperature in degrees Celsius.
    pub fn ir_temperature(&self) -> Option<f64> {
        self.scaled_temperature("temp3")
    }

    /// ESP module temperature in degrees Celsius.
    pub fn esp_temperature(&self) -> Option<f64> {
        self.scaled_temperature("temp4")
    }

    fn scaled_temperature(&self, key: &str) -> Option<f64> {
        self.inner
            .status
            .read()
            .get(key)
            .filter(|value| value_truthy(value))
            .and_then(Value::as_f64)
            .map(|temp| temp / 10.0)
    }

    /// RTC time reported by the charger.
    pub fn time(&self) -> Option<String> {
        self.status_str("time")
    }

    /// Energy usage of the current charging session in Wh.
    pub fn usage_session(&self) -> Option<f64> {
        if let Some(session) = self.status_f64("session_energy") {
            return Some(session);
        }
        self.status_f64("wattsec")
            .map(|wattsec| (wattsec / 3600.0 * 100.0).round() / 100.0)
    }

    /// Energy usage for the current day in Wh.
    pub fn total_day(&self) -> Option<f64> {
        self.status_f64("total_day")
    }

    /// Energy usage for the current week in Wh.
    pub fn total_week(&self) -> Option<f64> {
        self.status_f64("total_week")
    }

    /// Energy usage for the current month in Wh.
    pub fn total_month(&self) -> Option<f64> {
        self.status_f64("total_month")
    }

    /// Energy usage for the current year in Wh.
    pub fn total_year(&self) -> Option<f64> {
        self.status_f64("total_year")
    }

    /// Whether a charge limit is set.
    pub fn has_limit(&self) -> Option<bool> {
        let status = self.inner.status.read();
        status
            .get("has_limit")
            .or_else(|| status.get("limit"))
            .map(value_truthy)
    }

    /// RAPI protocol version, `None` when the charger reports `-`.
    pub fn protocol_version(&self) -> Option<String> {
        self.config_str("protocol").filter(|value| value != "-")
    }

    /// Vehicle-connected flag.
    pub fn vehicle(&self) -> Option<i64> {
        self.status_i64("vehicle")
    }

    /// Whether an OTA update is in progress.
    pub fn ota_update(&self) -> Option<i64> {
        self.status_i64("ota_update")
    }

    /// Whether a manual override is set.
    pub fn manual_override(&self) -> Option<i64> {
        self.status_i64("manual_override")
    }

    /// Active divert mode.
    pub fn divertmode(&self) -> Option<ChargeMode> {
        self.status_i64("divertmode").map(|mode| {
            if mode == 1 {
                ChargeMode::Fast
            } else {
                ChargeMode::Eco
            }
        })
    }

    /// Configured startup charge mode.
    pub fn charge_mode(&self) -> Option<String> {
        self.config_str("charge_mode")
    }

    /// Computed available current for divert in amps.
    pub fn available_current(&self) -> Option<f64> {
        self.status_f64("available_current")
    }

    /// Smoothed available current for divert in amps.
    pub fn smoothed_available_current(&self) -> Option<f64> {
        self.status_f64("smoothed_available_current")
    }

    /// Divert charge rate.
    pub fn charge_rate(&self) -> Option<f64> {
        self.status_f64("charge_rate")
    }

    /// Whether solar divert is enabled.
    pub fn divert_active(&self) -> bool {
        self.config_flag("divert_enabled")
    }

    /// WiFi module serial number.
    pub fn wifi_serial(&self) -> Option<String> {
        self.config_str("wifi_serial")
    }

    /// Instantaneous charge power in watts, computed from V·I.
    pub fn charging_power(&self) -> Option<f64> {
        let status = self.inner.status.read();
        let voltage = status.get("voltage").and_then(Value::as_f64)?;
        let amps = status.get("amp").and_then(Value::as_f64)?;
        Some((voltage * amps * 100.0).round() / 100.0)
    }

    /// Whether the power shaper is active.
    pub fn shaper_active(&self) -> Option<bool> {
        self.inner
            .status
            .read()
            .get("shaper")
            .map(value_truthy)
    }

    /// Shaper live power reading in watts.
    pub fn shaper_live_power(&self) -> Option<i64> {
        self.status_i64("shaper_live_pwr")
    }

    /// Shaper available current; the 255 sentinel maps to the pilot
    /// value.
    pub fn shaper_available_current(&self) -> Option<i64> {
        match self.status_i64("shaper_cur") {
            Some(255) => self.status_i64("pilot"),
            other => other,
        }
    }

    /// Shaper maximum power in watts.
    pub fn shaper_max_power(&self) -> Option<i64> {
        self.status_i64("shaper_max_pwr")
    }

    /// Whether the shaper reading is current.
    pub fn shaper_updated(&self) -> bool {
        self.status_flag("shaper_updated")
    }

    /// Vehicle battery level, with the legacy key as fallback.
    pub fn vehicle_soc(&self) -> Option<i64> {
        self.status_i64("vehicle_soc")
            .or_else(|| self.status_i64("battery_level"))
    }

    /// Vehicle battery range, with the legacy key as fallback.
    pub fn vehicle_range(&self) -> Option<i64> {
        self.status_i64("vehicle_range")
            .or_else(|| self.status_i64("battery_range"))
    }

    /// Time to full charge, with the legacy key as fallback.
    pub fn vehicle_eta(&self) -> Option<i64> {
        self.status_i64("vehicle_eta")
            .or_else(|| self.status_i64("time_to_full_charge"))
    }

    /// Hard minimum current in amps.
    pub fn min_amps(&self) -> i64 {
        self.config_i64("min_current_hard").unwrap_or(MIN_AMPS)
    }

    /// Hard maximum current in amps.
    pub fn max_amps(&self) -> i64 {
        self.config_i64("max_current_hard").unwrap_or(MAX_AMPS)
    }

    /// Whether the charger's MQTT connection is up.
    pub fn mqtt_connected(&self) -> bool {
        self.status_flag("mqtt_connected")
    }

    /// Whether the charger's emoncms connection is up.
    pub fn emoncms_connected(&self) -> Option<bool> {
        self.inner
            .status
            .read()
            .get("emoncms_connected")
            .map(value_truthy)
    }

    /// Whether the charger's OCPP connection is up.
    pub fn ocpp_connected(&self) -> Option<bool> {
        self.inner
            .status
            .read()
            .get("ocpp_connected")
            .map(value_truthy)
    }

    /// Charger uptime in seconds.
    pub fn uptime(&self) -> Option<i64> {
        self.status_i64("uptime")
    }

    /// Free RAM on the WiFi module in bytes.
    pub fn freeram(&self) -> Option<i64> {
        self.status_i64("freeram")
    }

    /// Safety trip counters; present only when the firmware reports all
    /// three.
    pub fn checks_count(&self) -> Option<SafetyCounts> {
        let status = self.inner.status.read();
        Some(SafetyCounts {
            gfci: status.get("gfcicount").and_then(Value::as_i64)?,
            no_ground: status.get("nogndcount").and_then(Value::as_i64)?,
            stuck_relay: status.get("stuckcount").and_then(Value::as_i64)?,
        })
    }

    /// Override state string (`auto` when no explicit state is set), or
    /// `None` on firmware without the override endpoint.
    pub async fn override_state(&self) -> Result<Option<String>, OpenEvseError> {
        let response = match self.get_override().await {
            Ok(response) => response,
            Err(OpenEvseError::UnsupportedFeature) => {
                debug!("override state unavailable on older firmware");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        Ok(Some(
            response
                .get("state")
                .and_then(Value::as_str)
                .unwrap_or("auto")
                .to_string(),
        ))
    }
}
