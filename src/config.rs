//! Command line and environment configuration.

use crate::client::{Endpoint, Provider};
use crate::error::{RealtimeError, Result};
use crate::helper::DEFAULT_HELPER_URL;
use crate::protocol::{SessionOptions, Voice};
use crate::runner::Settings;
use crate::session::UnknownToolPolicy;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    Azure,
    Openai,
}

/// Realtime voice assistant with local tools
#[derive(Parser, Debug, Clone)]
#[command(name = "rtvoice", version, about)]
pub struct Cli {
    /// Azure OpenAI resource endpoint, or an OpenAI-compatible realtime URL
    #[arg(long, env = "REALTIME_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long, env = "REALTIME_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Azure deployment name, or the OpenAI model
    #[arg(long, alias = "model", env = "REALTIME_DEPLOYMENT")]
    pub deployment: Option<String>,

    /// Defaults to azure when the endpoint mentions azure
    #[arg(long, value_enum, env = "REALTIME_PROVIDER")]
    pub provider: Option<ProviderKind>,

    /// System instructions for the model
    #[arg(long, env = "REALTIME_INSTRUCTIONS")]
    pub instructions: Option<String>,

    #[arg(long, env = "REALTIME_TEMPERATURE")]
    pub temperature: Option<f32>,

    /// alloy, echo or shimmer
    #[arg(long, env = "REALTIME_VOICE")]
    pub voice: Option<Voice>,

    /// Base URL of the local helper service
    #[arg(long, env = "HELPER_URL", default_value = DEFAULT_HELPER_URL)]
    pub helper_url: String,

    /// Stream this PCM16 mono WAV file instead of a microphone
    #[arg(long)]
    pub input_wav: Option<PathBuf>,

    /// Write model audio to this WAV file
    #[arg(long)]
    pub output_wav: Option<PathBuf>,

    /// Use the PulseAudio microphone and speakers
    #[cfg(feature = "pulse")]
    #[arg(long, conflicts_with_all = ["input_wav", "output_wav"])]
    pub pulse: bool,

    /// Connect without sending microphone audio
    #[arg(long)]
    pub no_record: bool,

    /// Answer calls to unknown functions instead of ignoring them
    #[arg(long)]
    pub reject_unknown_tools: bool,
}

impl Cli {
    /// Validate and convert into runner settings.
    pub fn settings(&self) -> Result<Settings> {
        let api_key = non_empty(&self.api_key)
            .ok_or_else(|| RealtimeError::Config("an API key is required (REALTIME_API_KEY)".to_string()))?;
        let endpoint = non_empty(&self.endpoint);
        let deployment = non_empty(&self.deployment);

        let kind = self.provider.unwrap_or(match endpoint {
            Some(url) if Provider::looks_like_azure(url) => ProviderKind::Azure,
            _ => ProviderKind::Openai,
        });

        let provider = match kind {
            ProviderKind::Azure => Provider::Azure {
                endpoint: endpoint
                    .ok_or_else(|| RealtimeError::Config("Azure requires an endpoint (REALTIME_ENDPOINT)".to_string()))?
                    .to_string(),
                deployment: deployment
                    .ok_or_else(|| {
                        RealtimeError::Config("Azure requires a deployment (REALTIME_DEPLOYMENT)".to_string())
                    })?
                    .to_string(),
            },
            ProviderKind::Openai => Provider::OpenAi {
                base_url: endpoint.map(str::to_string),
                model: deployment
                    .ok_or_else(|| RealtimeError::Config("OpenAI requires a model (--model)".to_string()))?
                    .to_string(),
            },
        };

        if let Some(t) = self.temperature {
            if !t.is_finite() {
                return Err(RealtimeError::Config(format!("temperature must be a number, got {}", t)));
            }
        }

        let endpoint = Endpoint {
            provider,
            api_key: api_key.to_string(),
        };
        // Surface a malformed endpoint before the first start
        endpoint.url()?;

        Ok(Settings {
            endpoint,
            options: SessionOptions {
                instructions: self.instructions.clone(),
                temperature: self.temperature,
                voice: self.voice,
            },
            record: !self.no_record,
            unknown_tools: if self.reject_unknown_tools {
                UnknownToolPolicy::Reject
            } else {
                UnknownToolPolicy::Ignore
            },
            advertised_tools: None,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
