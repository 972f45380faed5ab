use std::{collections::BTreeMap, time::Duration};

use aliri_clock::UnixTime;
use serde::{Deserialize, Serialize};
use warden_jose::jws;

use crate::{error::ConfigError, paged::DEFAULT_CHUNK_SIZE, store::Dn};

const DEFAULT_KEY_REGENERATION_HOURS: u64 = 48;
const DEFAULT_ID_TOKEN_LIFETIME: u64 = 3600;
const DEFAULT_CLEAN_SERVICE_INTERVAL: u64 = 600;
const DEFAULT_CONFIGURATION_UPDATE_INTERVAL: u64 = 30;
const DEFAULT_KEY_ROTATION_CHECK_INTERVAL: u64 = 3600;
const DEFAULT_METRIC_KEEP_DAYS: u64 = 7;
const DEFAULT_UMA_RPT_LIFETIME: u64 = 3600;

/// What rotation does with keys that carry no expiration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ManualKeyPolicy {
    /// Keep them as they are; they are never pruned
    #[default]
    Retain,
    /// Give them the expiration of a freshly generated key, so they age out
    StampExpiration,
}

/// The dynamic application configuration
///
/// Intervals are in seconds unless their name says otherwise. A zero
/// interval or size falls back to its default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfiguration {
    /// Whether key rotation runs at all
    pub key_regeneration_enabled: bool,
    /// How often signing keys are regenerated, in hours
    pub key_regeneration_interval: u64,
    /// The lifetime of the longest-lived token signed with a rotated key
    pub id_token_lifetime: u64,
    /// The algorithms a signing key is kept for
    pub key_algorithms: Vec<jws::Algorithm>,
    /// What rotation does with keys that carry no expiration
    pub manual_key_policy: ManualKeyPolicy,
    /// The period of the cleanup sweep
    pub clean_service_interval: u64,
    /// The number of entries fetched per sweep chunk
    pub cleanup_batch_size: usize,
    /// How long metric samples are kept, in days
    pub metric_reporter_keep_data_days: u64,
    /// The period of the configuration staleness check
    pub configuration_update_interval: u64,
    /// The period of the key rotation check
    pub key_rotation_check_interval: u64,
    /// The lifetime of requesting party tokens
    pub uma_rpt_lifetime: u64,
    /// Where to fetch keys not found in the local key set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
}

impl Default for AppConfiguration {
    fn default() -> Self {
        Self {
            key_regeneration_enabled: true,
            key_regeneration_interval: DEFAULT_KEY_REGENERATION_HOURS,
            id_token_lifetime: DEFAULT_ID_TOKEN_LIFETIME,
            key_algorithms: vec![
                jws::Algorithm::RS256,
                jws::Algorithm::RS384,
                jws::Algorithm::RS512,
                jws::Algorithm::ES256,
                jws::Algorithm::ES384,
                jws::Algorithm::ES512,
            ],
            manual_key_policy: ManualKeyPolicy::Retain,
            clean_service_interval: DEFAULT_CLEAN_SERVICE_INTERVAL,
            cleanup_batch_size: DEFAULT_CHUNK_SIZE,
            metric_reporter_keep_data_days: DEFAULT_METRIC_KEEP_DAYS,
            configuration_update_interval: DEFAULT_CONFIGURATION_UPDATE_INTERVAL,
            key_rotation_check_interval: DEFAULT_KEY_ROTATION_CHECK_INTERVAL,
            uma_rpt_lifetime: DEFAULT_UMA_RPT_LIFETIME,
            jwks_uri: None,
        }
    }
}

fn or_default(value: u64, default: u64) -> u64 {
    if value == 0 {
        default
    } else {
        value
    }
}

impl AppConfiguration {
    /// The algorithms to keep rotated keys for
    ///
    /// # Errors
    ///
    /// A symmetric algorithm or `none` is configured. Such keys can never
    /// be published.
    pub fn rotation_algorithms(&self) -> Result<&[jws::Algorithm], ConfigError> {
        match self
            .key_algorithms
            .iter()
            .find(|alg| alg.is_symmetric() || **alg == jws::Algorithm::NONE)
        {
            Some(alg) => Err(ConfigError::UnsupportedAlgorithm(*alg)),
            None => Ok(&self.key_algorithms),
        }
    }

    /// The time between key regenerations
    #[must_use]
    pub fn key_regeneration_period(&self) -> Duration {
        Duration::from_secs(
            or_default(self.key_regeneration_interval, DEFAULT_KEY_REGENERATION_HOURS)
                .saturating_mul(3600),
        )
    }

    /// The expiration, in epoch milliseconds, of a key generated at `now`
    ///
    /// A key outlives the regeneration period by the token lifetime, so
    /// that the last token it signed expires before it does.
    #[must_use]
    pub fn key_expiration(&self, now: UnixTime) -> u64 {
        now.0
            .saturating_add(self.key_regeneration_period().as_secs())
            .saturating_add(self.id_token_lifetime)
            .saturating_mul(1000)
    }

    /// The period of the cleanup sweep
    #[must_use]
    pub fn cleanup_period(&self) -> Duration {
        Duration::from_secs(or_default(
            self.clean_service_interval,
            DEFAULT_CLEAN_SERVICE_INTERVAL,
        ))
    }

    /// The period of the configuration staleness check
    #[must_use]
    pub fn reload_period(&self) -> Duration {
        Duration::from_secs(or_default(
            self.configuration_update_interval,
            DEFAULT_CONFIGURATION_UPDATE_INTERVAL,
        ))
    }

    /// The period of the key rotation check
    #[must_use]
    pub fn rotation_check_period(&self) -> Duration {
        Duration::from_secs(or_default(
            self.key_rotation_check_interval,
            DEFAULT_KEY_ROTATION_CHECK_INTERVAL,
        ))
    }

    /// The number of entries fetched per sweep chunk
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        if self.cleanup_batch_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.cleanup_batch_size
        }
    }
}

/// Where each kind of entry lives in the store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BaseDn {
    /// Clients, with their grants and tokens below them
    pub clients: Dn,
    /// Resource set permissions
    pub uma_permissions: Dn,
    /// Short-lived device requests
    pub ephemeral_requests: Dn,
    /// Device registrations
    pub device_registrations: Dn,
    /// Metric samples
    pub metrics: Dn,
}

impl Default for BaseDn {
    fn default() -> Self {
        Self {
            clients: Dn::from_static("ou=clients,o=warden"),
            uma_permissions: Dn::from_static("ou=uma_permission,o=warden"),
            ephemeral_requests: Dn::from_static("ou=u2f_requests,o=warden"),
            device_registrations: Dn::from_static("ou=people,o=warden"),
            metrics: Dn::from_static("ou=metric,o=warden"),
        }
    }
}

/// The static layout of the store
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaticConfiguration {
    /// Where each kind of entry lives
    pub base_dn: BaseDn,
}

/// A protocol error message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// The error code
    pub id: String,
    /// A human-readable description
    pub description: String,
    /// A page describing the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Protocol error messages, grouped by endpoint
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCatalog {
    groups: BTreeMap<String, Vec<ErrorMessage>>,
}

impl ErrorCatalog {
    /// Looks up the message for an error code within an endpoint's group
    #[must_use]
    pub fn message(&self, group: &str, id: &str) -> Option<&ErrorMessage> {
        self.groups.get(group)?.iter().find(|m| m.id == id)
    }

    /// The names of the groups in the catalog
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    #[test]
    fn missing_fields_take_defaults() -> Result<()> {
        let app: AppConfiguration =
            serde_json::from_str(r#"{ "keyRegenerationEnabled": false, "cleanupBatchSize": 25 }"#)?;

        assert!(!app.key_regeneration_enabled);
        assert_eq!(app.chunk_size(), 25);
        assert_eq!(app.key_regeneration_interval, 48);
        assert_eq!(app.manual_key_policy, ManualKeyPolicy::Retain);
        assert_eq!(app.key_algorithms.len(), 6);
        Ok(())
    }

    #[test]
    fn zero_periods_fall_back_to_defaults() {
        let app = AppConfiguration {
            clean_service_interval: 0,
            configuration_update_interval: 0,
            key_rotation_check_interval: 0,
            key_regeneration_interval: 0,
            cleanup_batch_size: 0,
            ..AppConfiguration::default()
        };

        assert_eq!(app.cleanup_period(), Duration::from_secs(600));
        assert_eq!(app.reload_period(), Duration::from_secs(30));
        assert_eq!(app.rotation_check_period(), Duration::from_secs(3600));
        assert_eq!(app.key_regeneration_period(), Duration::from_secs(48 * 3600));
        assert_eq!(app.chunk_size(), 100);
    }

    #[test]
    fn key_expiration_covers_interval_and_token_lifetime() {
        let app = AppConfiguration {
            key_regeneration_interval: 1,
            id_token_lifetime: 60,
            ..AppConfiguration::default()
        };
        assert_eq!(app.key_expiration(UnixTime(1_000)), (1_000 + 3_600 + 60) * 1000);
    }

    #[test]
    fn huge_regeneration_interval_saturates() {
        let app = AppConfiguration {
            key_regeneration_interval: u64::MAX / 2,
            ..AppConfiguration::default()
        };
        assert_eq!(app.key_regeneration_period(), Duration::from_secs(u64::MAX));
        assert_eq!(app.key_expiration(UnixTime(1_000)), u64::MAX);
    }

    #[test]
    fn symmetric_rotation_algorithms_are_rejected() {
        let app = AppConfiguration {
            key_algorithms: vec![jws::Algorithm::RS256, jws::Algorithm::HS256],
            ..AppConfiguration::default()
        };
        assert!(matches!(
            app.rotation_algorithms(),
            Err(ConfigError::UnsupportedAlgorithm(jws::Algorithm::HS256))
        ));
    }

    #[test]
    fn manual_key_policy_uses_camel_case() -> Result<()> {
        let policy: ManualKeyPolicy = serde_json::from_str(r#""stampExpiration""#)?;
        assert_eq!(policy, ManualKeyPolicy::StampExpiration);
        Ok(())
    }

    #[test]
    fn error_catalog_finds_messages_by_group() -> Result<()> {
        let catalog: ErrorCatalog = serde_json::from_str(
            r#"{
                "token": [
                    { "id": "invalid_grant", "description": "The grant is invalid" }
                ],
                "uma": [
                    { "id": "invalid_ticket", "description": "Unknown ticket", "uri": "https://warden.example/errors" }
                ]
            }"#,
        )?;

        let message = catalog.message("uma", "invalid_ticket").map(|m| m.description.as_str());
        assert_eq!(message, Some("Unknown ticket"));
        assert!(catalog.message("token", "invalid_ticket").is_none());
        assert!(catalog.message("authorize", "invalid_grant").is_none());
        assert_eq!(catalog.groups().collect::<Vec<_>>(), vec!["token", "uma"]);
        Ok(())
    }
}
