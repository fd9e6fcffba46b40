//! Session and relay configuration
//!
//! JSON documents with humantime durations (`"50ms"`, `"10s"`). Every field
//! has a default, so `{}` is a valid configuration. A few values can be
//! overridden from the environment:
//!
//! | variable | field |
//! |---|---|
//! | `COHORT_ROOM` | `SessionConfig::room` |
//! | `COHORT_RELAY_ADDR` | `SessionConfig::relay_addr` |
//! | `COHORT_TELEMETRY_URL` | `SessionConfig::telemetry_url` |
//! | `COHORT_BIND` | `RelayConfig::bind` |

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use cohort_core::{CohortError, CohortResult, Profile, Role, RoomId, UserId, Vec3};
use cohort_sync::{ModeratorConfig, PresenceConfig, PRESENCE_INTERVAL};
use cohort_telemetry::{CollectorConfig, FlushPolicy, SampleScope};
use cohort_transport::UdpRelayConfig;
use cohort_voice::VoiceConfig;
use serde::{Deserialize, Serialize};

use crate::LogFormat;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub room: String,
    pub display_name: String,
    pub role: Role,
    pub user_id: Option<String>,
    /// UDP relay to connect to
    pub relay_addr: Option<SocketAddr>,
    /// Telemetry endpoint base; telemetry is kept local when unset
    pub telemetry_url: Option<String>,
    /// Lesson or activity the samples belong to
    pub context_id: String,
    pub model_id: Option<String>,

    #[serde(with = "duration_str")]
    pub presence_interval: Duration,
    #[serde(with = "duration_str")]
    pub override_interval: Duration,
    #[serde(with = "duration_str")]
    pub telemetry_interval: Duration,
    #[serde(with = "duration_str")]
    pub stale_after: Duration,
    /// Wait for a membership snapshot before repeating the join
    #[serde(with = "duration_str")]
    pub rejoin_after: Duration,
    #[serde(with = "duration_str")]
    pub dwell_threshold: Duration,
    pub flush_max_samples: usize,
    #[serde(with = "duration_str")]
    pub flush_max_age: Duration,
    #[serde(with = "duration_str")]
    pub upload_timeout: Duration,
    #[serde(with = "duration_str")]
    pub shutdown_flush_timeout: Duration,
    pub ignored_targets: Vec<String>,

    pub rig_height: f32,
    pub pointer_range: f32,

    pub voice: VoiceSettings,
    pub log_format: LogFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            room: "lobby".to_string(),
            display_name: "Guest".to_string(),
            role: Role::Guest,
            user_id: None,
            relay_addr: None,
            telemetry_url: None,
            context_id: "free-view".to_string(),
            model_id: None,
            presence_interval: Duration::from_millis(50),
            override_interval: Duration::from_millis(50),
            telemetry_interval: Duration::from_secs(1),
            stale_after: Duration::from_secs(15),
            rejoin_after: Duration::from_secs(1),
            dwell_threshold: Duration::from_secs(1),
            flush_max_samples: 10,
            flush_max_age: Duration::from_secs(10),
            upload_timeout: Duration::from_secs(5),
            shutdown_flush_timeout: Duration::from_secs(2),
            ignored_targets: vec!["Scene".to_string()],
            rig_height: cohort_core::DEFAULT_EYE_HEIGHT,
            pointer_range: 10.0,
            voice: VoiceSettings::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Voice mentor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub voice_name: String,
    pub scene_description: String,
    pub mentor_position: [f32; 3],
}

impl Default for VoiceSettings {
    fn default() -> Self {
        let defaults = VoiceConfig::default();
        let p = defaults.mentor_position;
        Self {
            voice_name: defaults.voice_name,
            scene_description: defaults.scene_description,
            mentor_position: [p.x, p.y, p.z],
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> CohortResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CohortError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> CohortResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CohortError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Apply `COHORT_*` environment overrides
    pub fn with_env(self) -> CohortResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> CohortResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(room) = lookup("COHORT_ROOM") {
            self.room = room;
        }
        if let Some(addr) = lookup("COHORT_RELAY_ADDR") {
            let addr = addr
                .parse()
                .map_err(|e| CohortError::InvalidConfig(format!("COHORT_RELAY_ADDR: {e}")))?;
            self.relay_addr = Some(addr);
        }
        if let Some(url) = lookup("COHORT_TELEMETRY_URL") {
            self.telemetry_url = Some(url);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> CohortResult<()> {
        if self.room.trim().is_empty() {
            return Err(CohortError::InvalidConfig("room must not be empty".into()));
        }
        for (name, value) in [
            ("presence_interval", self.presence_interval),
            ("override_interval", self.override_interval),
            ("telemetry_interval", self.telemetry_interval),
        ] {
            if value.is_zero() {
                return Err(CohortError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        // Peers must get at least one frame in before they count as silent.
        if self.stale_after <= self.presence_interval {
            return Err(CohortError::InvalidConfig(
                "stale_after must exceed presence_interval".into(),
            ));
        }
        if self.rejoin_after < self.presence_interval {
            return Err(CohortError::InvalidConfig(
                "rejoin_after must be at least presence_interval".into(),
            ));
        }
        if self.flush_max_samples == 0 {
            return Err(CohortError::InvalidConfig(
                "flush_max_samples must be positive".into(),
            ));
        }
        if !(self.pointer_range > 0.0) {
            return Err(CohortError::InvalidConfig("pointer_range must be positive".into()));
        }
        Ok(())
    }

    pub fn room_id(&self) -> RoomId {
        RoomId::new(self.room.clone())
    }

    pub fn profile(&self) -> Profile {
        let profile = Profile::new(self.display_name.clone(), self.role);
        match &self.user_id {
            Some(id) => profile.with_user(UserId::new(id.clone())),
            None => profile,
        }
    }

    pub fn presence(&self) -> PresenceConfig {
        let ticks = self.rejoin_after.as_nanos() / self.presence_interval.as_nanos().max(1);
        PresenceConfig {
            stale_after: self.stale_after,
            rejoin_after_ticks: u32::try_from(ticks).unwrap_or(u32::MAX).max(1),
        }
    }

    pub fn moderator(&self) -> ModeratorConfig {
        ModeratorConfig {
            rig_height: self.rig_height,
            pointer_range: self.pointer_range,
        }
    }

    pub fn collector(&self) -> CollectorConfig {
        CollectorConfig {
            interval: self.telemetry_interval,
            dwell_threshold: self.dwell_threshold,
            ignored_targets: self.ignored_targets.clone(),
            flush: FlushPolicy {
                max_samples: self.flush_max_samples,
                max_age: self.flush_max_age,
            },
        }
    }

    pub fn sample_scope(&self) -> SampleScope {
        SampleScope {
            user_id: self
                .user_id
                .as_ref()
                .map(|id| UserId::new(id.clone()))
                .unwrap_or_else(UserId::anonymous),
            context_id: self.context_id.clone(),
            model_id: self.model_id.clone(),
        }
    }

    pub fn voice_config(&self) -> VoiceConfig {
        let [x, y, z] = self.voice.mentor_position;
        VoiceConfig {
            voice_name: self.voice.voice_name.clone(),
            scene_description: self.voice.scene_description.clone(),
            mentor_position: Vec3::new(x, y, z),
            ..VoiceConfig::default()
        }
    }
}

/// Relay server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    #[serde(with = "duration_str")]
    pub idle_timeout: Duration,
    #[serde(with = "duration_str")]
    pub sweep_interval: Duration,
    pub log_format: LogFormat,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let udp = UdpRelayConfig::default();
        Self {
            bind: udp.bind,
            idle_timeout: udp.idle_timeout,
            sweep_interval: udp.sweep_interval,
            log_format: LogFormat::default(),
        }
    }
}

impl RelayConfig {
    pub fn from_json(json: &str) -> CohortResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CohortError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> CohortResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CohortError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn with_env(self) -> CohortResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> CohortResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("COHORT_BIND") {
            self.bind = bind
                .parse()
                .map_err(|e| CohortError::InvalidConfig(format!("COHORT_BIND: {e}")))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> CohortResult<()> {
        if self.sweep_interval.is_zero() {
            return Err(CohortError::InvalidConfig("sweep_interval must be positive".into()));
        }
        // Clients stream at the presence rate; anything shorter evicts live members.
        if self.idle_timeout <= PRESENCE_INTERVAL {
            return Err(CohortError::InvalidConfig(format!(
                "idle_timeout must exceed {}",
                humantime::format_duration(PRESENCE_INTERVAL)
            )));
        }
        Ok(())
    }

    pub fn udp(&self) -> UdpRelayConfig {
        UdpRelayConfig {
            bind: self.bind,
            idle_timeout: self.idle_timeout,
            sweep_interval: self.sweep_interval,
        }
    }
}

/// Durations as humantime strings
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
