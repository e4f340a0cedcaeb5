// ABOUTME: Custom serde helpers for config types.
// ABOUTME: Provider lists in short or detailed form, and duration parsing for env and CLI.

use nonempty::NonEmpty;
use serde::Deserialize;
use std::time::Duration;

use super::ProviderConfig;

pub fn deserialize_providers<'de, D>(deserializer: D) -> Result<NonEmpty<ProviderConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values: Vec<ProviderEntry> = Vec::deserialize(deserializer)?;
    let providers = values
        .into_iter()
        .map(ProviderEntry::into_provider_config)
        .collect::<Result<Vec<_>, _>>()
        .map_err(serde::de::Error::custom)?;

    NonEmpty::from_vec(providers)
        .ok_or_else(|| serde::de::Error::custom("at least one provider is required"))
}

pub fn default_providers() -> NonEmpty<ProviderConfig> {
    NonEmpty::new(ProviderConfig::local())
}

/// A provider is either a bare host string or a full mapping.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProviderEntry {
    Simple(String),
    Detailed(ProviderConfig),
}

impl ProviderEntry {
    fn into_provider_config(self) -> Result<ProviderConfig, String> {
        let mut provider = match self {
            ProviderEntry::Simple(host) => ProviderConfig::from_host(&host)?,
            ProviderEntry::Detailed(provider) => provider,
        };
        if provider.id.trim().is_empty() {
            provider.id = ProviderConfig::default_id(provider.host.as_deref());
        }
        Ok(provider)
    }
}

#[derive(Deserialize)]
struct HumanDuration(#[serde(with = "humantime_serde")] Duration);

/// Parse `90s`, `15m`, `1h 30m` and friends.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let quoted = serde_yaml::to_string(value.trim()).map_err(|e| e.to_string())?;
    serde_yaml::from_str::<HumanDuration>(&quoted)
        .map(|HumanDuration(duration)| duration)
        .map_err(|_| format!("invalid duration: {value}"))
}
