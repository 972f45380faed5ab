//! Entries kept in the directory store

use std::collections::BTreeSet;

use aliri_braid::braid;
use aliri_clock::UnixTime;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::store::{Dn, DnRef, Entry};

/// An OAuth2 client identifier
#[braid(serde, ref_doc = "A borrowed reference to a [`ClientId`]")]
pub struct ClientId;

/// Generates a random alphanumeric code, used for token values and tickets
pub(crate) fn random_code(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// The persisted configuration record
///
/// Each payload is an independent JSON document. Writers must bump the
/// revision on every change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conf {
    /// Where the record lives
    pub dn: Dn,

    /// The revision counter
    #[serde(rename = "oxRevision", default)]
    pub revision: u64,

    /// The dynamic application configuration
    #[serde(rename = "oxAuthConfDynamic", default)]
    pub dynamic: Option<String>,

    /// The static DN layout
    #[serde(rename = "oxAuthConfStatic", default)]
    pub statics: Option<String>,

    /// The published key set
    #[serde(rename = "oxAuthConfWebKeys", default)]
    pub web_keys: Option<String>,

    /// The error catalog
    #[serde(rename = "oxAuthConfErrors", default)]
    pub errors: Option<String>,
}

impl Entry for Conf {
    const OBJECT_CLASS: &'static str = "oxAuthConfiguration";

    fn dn(&self) -> &DnRef {
        &self.dn
    }
}

/// The attribute holding the configuration revision
pub const REVISION_ATTRIBUTE: &str = "oxRevision";

/// The revision of a configuration record, read on its own
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct ConfRevision {
    /// The revision counter
    #[serde(rename = "oxRevision", default)]
    pub revision: u64,
}

/// A UMA requesting party token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UmaRpt {
    /// Where the token lives
    pub dn: Dn,

    /// The unique identifier of the entry
    #[serde(rename = "uniqueIdentifier")]
    pub id: String,

    /// The token value presented by clients
    #[serde(rename = "oxAuthTokenCode")]
    pub code: String,

    /// The client the token was issued to
    #[serde(rename = "oxAuthClientId")]
    pub client_id: ClientId,

    /// The authorization server host the token is bound to
    #[serde(rename = "oxAmHost")]
    pub am_host: String,

    /// Whether the token is valid across resource servers
    #[serde(rename = "oxUmaIsGlobal", default)]
    pub is_global: bool,

    /// When the token was issued
    #[serde(rename = "oxAuthCreation")]
    pub created_at: UnixTime,

    /// When the token expires
    #[serde(rename = "oxAuthExpiration")]
    pub expires_at: UnixTime,

    /// The DNs of the permissions granted to the token, in the order they were added
    #[serde(rename = "oxAuthPermission", default)]
    pub permissions: Vec<Dn>,
}

impl Entry for UmaRpt {
    const OBJECT_CLASS: &'static str = "oxAuthUmaRPT";

    fn dn(&self) -> &DnRef {
        &self.dn
    }
}

/// A permission on a protected resource set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSetPermission {
    /// Where the permission lives
    pub dn: Dn,

    /// The ticket handed to the requesting party
    #[serde(rename = "oxTicket")]
    pub ticket: String,

    /// The resource set the permission applies to
    #[serde(rename = "oxResourceSetId")]
    pub resource_set_id: String,

    /// The scopes granted on the resource set
    #[serde(rename = "oxAuthUmaScope", default)]
    pub scopes: BTreeSet<String>,

    /// The authorization server host the permission is bound to
    #[serde(rename = "oxAmHost")]
    pub am_host: String,

    /// When the permission expires
    #[serde(rename = "oxAuthExpiration")]
    pub expires_at: UnixTime,
}

impl Entry for ResourceSetPermission {
    const OBJECT_CLASS: &'static str = "oxAuthUmaResourceSetPermission";

    fn dn(&self) -> &DnRef {
        &self.dn
    }
}

/// The kind of token a grant record holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// An access token
    AccessToken,
    /// A refresh token
    RefreshToken,
    /// An authorization code
    AuthorizationCode,
}

impl TokenKind {
    /// The stored name of the kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::AuthorizationCode => "authorization_code",
        }
    }
}

/// A token issued under an authorization grant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    /// Where the token lives
    pub dn: Dn,

    /// The token value
    #[serde(rename = "oxAuthTokenCode")]
    pub code: String,

    /// What kind of token this is
    #[serde(rename = "oxAuthTokenType")]
    pub kind: TokenKind,

    /// The client the token was issued to
    #[serde(rename = "oxAuthClientId")]
    pub client_id: ClientId,

    /// When the token expires
    #[serde(rename = "oxAuthExpiration")]
    pub expires_at: UnixTime,
}

impl Entry for TokenGrant {
    const OBJECT_CLASS: &'static str = "oxAuthToken";

    fn dn(&self) -> &DnRef {
        &self.dn
    }
}

/// A registered client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Where the client lives
    pub dn: Dn,

    /// The client's identifier
    #[serde(rename = "inum")]
    pub client_id: ClientId,

    /// When the client's secret, and with it the client, expires
    #[serde(
        rename = "oxAuthClientSecretExpiresAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub secret_expires_at: Option<UnixTime>,
}

impl Entry for Client {
    const OBJECT_CLASS: &'static str = "oxAuthClient";

    fn dn(&self) -> &DnRef {
        &self.dn
    }
}

/// A short-lived request awaiting a device response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralRequest {
    /// Where the request lives
    pub dn: Dn,

    /// The request identifier
    #[serde(rename = "oxRequestId")]
    pub request_id: String,

    /// When the request was created
    #[serde(rename = "creationDate")]
    pub created_at: UnixTime,
}

impl EphemeralRequest {
    /// A request stored below `base`
    pub fn new(base: &DnRef, request_id: &str, created_at: UnixTime) -> Self {
        Self {
            dn: base.child("oxRequestId", request_id),
            request_id: request_id.to_owned(),
            created_at,
        }
    }
}

impl Entry for EphemeralRequest {
    const OBJECT_CLASS: &'static str = "oxU2fRequest";

    fn dn(&self) -> &DnRef {
        &self.dn
    }
}

/// The state of a device registration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Registration has started but was never completed
    Pending,
    /// The device is registered
    Active,
}

/// A device registration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    /// Where the registration lives
    pub dn: Dn,

    /// The registration identifier
    #[serde(rename = "oxId")]
    pub id: String,

    /// The registration state
    #[serde(rename = "oxStatus")]
    pub status: DeviceStatus,

    /// When the registration was created
    #[serde(rename = "creationDate")]
    pub created_at: UnixTime,
}

impl Entry for DeviceRegistration {
    const OBJECT_CLASS: &'static str = "oxDeviceRegistration";

    fn dn(&self) -> &DnRef {
        &self.dn
    }
}

/// A recorded metric sample
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEntry {
    /// Where the sample lives
    pub dn: Dn,

    /// The sample identifier
    #[serde(rename = "uniqueIdentifier")]
    pub id: String,

    /// When the sample period started
    #[serde(rename = "oxStartDate")]
    pub started_at: UnixTime,
}

impl Entry for MetricEntry {
    const OBJECT_CLASS: &'static str = "oxMetric";

    fn dn(&self) -> &DnRef {
        &self.dn
    }
}

/// An organizational branch grouping other entries
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Where the branch lives
    pub dn: Dn,

    /// The branch name
    #[serde(rename = "ou")]
    pub name: String,
}

impl Entry for Branch {
    const OBJECT_CLASS: &'static str = "organizationalUnit";

    fn dn(&self) -> &DnRef {
        &self.dn
    }
}
