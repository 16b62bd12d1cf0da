use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::audio::{AudioSource, OutputTarget, SystemAudio, CAPTURE_FRAME_SIZE, DEFAULT_PLAYBACK_RATE};
use crate::session::SessionConfig;
use crate::transport::{EndpointTokenProvider, StaticToken, TokenProvider};
use crate::vad::VadConfig;

/// Prefix for environment overrides, e.g. `ROLEPLAY_VOICE__SERVER__URL`
pub const ENV_PREFIX: &str = "ROLEPLAY_VOICE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub audio: AudioConfig,
    pub vad: VadSettings,
    pub reconnect: ReconnectConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/api/voice".to_string(),
        }
    }
}

/// Either a fixed token or an endpoint that issues one
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token: Option<String>,
    pub token_endpoint: Option<String>,
    /// Credential for the token endpoint itself
    pub endpoint_bearer: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture_frame_size: usize,
    pub playback_rate: f32,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_frame_size: CAPTURE_FRAME_SIZE,
            playback_rate: DEFAULT_PLAYBACK_RATE,
            input_device: None,
            output_device: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    pub energy_threshold: f32,
    pub sustained_ms: u64,
    pub server_sustained_ms: u64,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            sustained_ms: 300,
            server_sustained_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub token_ms: u64,
    pub handshake_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            token_ms: 10_000,
            handshake_ms: 10_000,
        }
    }
}

impl Config {
    /// Load from an optional file (any format the `config` crate knows)
    /// with `ROLEPLAY_VOICE__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn vad_config(&self) -> VadConfig {
        VadConfig {
            energy_threshold: self.vad.energy_threshold,
            sustained_duration: Duration::from_millis(self.vad.sustained_ms),
            server_sustained_duration: Duration::from_millis(self.vad.server_sustained_ms),
        }
    }

    pub fn session_config(
        &self,
        conversation_id: impl Into<String>,
        scenario_id: impl Into<String>,
        persona_id: impl Into<String>,
    ) -> SessionConfig {
        SessionConfig {
            conversation_id: conversation_id.into(),
            scenario_id: scenario_id.into(),
            persona_id: persona_id.into(),
            server_url: self.server.url.clone(),
            capture_frame_size: self.audio.capture_frame_size,
            playback_rate: self.audio.playback_rate,
            vad: self.vad_config(),
            max_reconnect_attempts: self.reconnect.max_attempts,
            reconnect_backoff: Duration::from_millis(self.reconnect.backoff_ms),
            token_timeout: Duration::from_millis(self.timeouts.token_ms),
            handshake_timeout: Duration::from_millis(self.timeouts.handshake_ms),
        }
    }

    /// Token source; an endpoint wins over a static token
    pub fn token_provider(&self) -> Result<Arc<dyn TokenProvider>> {
        if let Some(endpoint) = &self.auth.token_endpoint {
            let mut provider = EndpointTokenProvider::new(endpoint.clone());
            if let Some(bearer) = &self.auth.endpoint_bearer {
                provider = provider.with_bearer(bearer.clone());
            }
            return Ok(Arc::new(provider));
        }

        match &self.auth.token {
            Some(token) => Ok(Arc::new(StaticToken::new(token.clone()))),
            None => anyhow::bail!("Set auth.token or auth.token_endpoint"),
        }
    }

    /// Devices for a run; a WAV file replaces the microphone when given
    pub fn system_audio(&self, wav_input: Option<std::path::PathBuf>, speakers: bool) -> SystemAudio {
        let input = match wav_input {
            Some(path) => AudioSource::File(path),
            None => AudioSource::Microphone(self.audio.input_device.clone()),
        };
        let output = if speakers {
            OutputTarget::Speakers(self.audio.output_device.clone())
        } else {
            OutputTarget::Discard
        };

        let mut audio = SystemAudio::new(input, output);
        audio.frame_size = self.audio.capture_frame_size;
        audio
    }
}
