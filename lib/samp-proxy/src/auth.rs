//! HTTP Basic Authentication gate for the dispatch server

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hyper::header::{HeaderMap, AUTHORIZATION};
use md5::{Digest, Md5};
use samp_core::{CoreError, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Realm advertised in `WWW-Authenticate` challenges
pub const REALM: &str = "Protected access";

/// MD5 digest of a password, as kept in the credential store
pub fn hash_password(password: &str) -> [u8; 16] {
    let digest = Md5::digest(password.as_bytes());
    let mut hash = [0u8; 16];
    hash.copy_from_slice(&digest);
    hash
}

/// Build an `Authorization` header value
pub fn encode_basic(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}

/// Decode an `Authorization: Basic` header value into `(user, password)`
pub fn decode_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// User name carried by a request's Basic credentials, if any
pub fn basic_user(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(decode_basic)
        .map(|(user, _)| user)
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct CredentialEntry {
    hash: [u8; 16],
    groups: Vec<String>,
}

/// Read-only store of user password hashes and group memberships
///
/// The file format is one user per line, `user=<md5 hex><group>,<group>`,
/// where the first 32 characters after `=` are the hex digest.
#[derive(Clone, Debug, Default)]
pub struct CredentialStore {
    users: HashMap<String, CredentialEntry>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse credential file contents
    pub fn parse(contents: &str) -> Result<Self> {
        let mut users = HashMap::new();

        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (user, rest) = line.split_once('=').ok_or_else(|| {
                CoreError::InvalidConfiguration(format!(
                    "credential line {} has no '=' separator",
                    index + 1
                ))
            })?;
            let (digest, groups) = (rest.get(..32), rest.get(32..));
            let hash = digest
                .and_then(|hex_digest| hex::decode(hex_digest).ok())
                .and_then(|bytes| <[u8; 16]>::try_from(bytes).ok())
                .ok_or_else(|| {
                    CoreError::InvalidConfiguration(format!(
                        "credential line {} has no valid MD5 digest",
                        index + 1
                    ))
                })?;
            let groups = groups
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|group| !group.is_empty())
                .map(str::to_string)
                .collect();

            users.insert(user.trim().to_string(), CredentialEntry { hash, groups });
        }

        debug!("Loaded credentials for {} user(s)", users.len());
        Ok(Self { users })
    }

    /// Load a credential file from disk
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let store = Self::parse(&contents)?;
        info!("Credential store loaded from {}", path.display());
        Ok(store)
    }

    pub fn with_user(mut self, user: &str, password: &str, groups: &[&str]) -> Self {
        self.users.insert(
            user.to_string(),
            CredentialEntry {
                hash: hash_password(password),
                groups: groups.iter().map(|g| g.to_string()).collect(),
            },
        );
        self
    }

    /// Whether `password` hashes to the stored digest for `user`
    pub fn verify(&self, user: &str, password: &str) -> bool {
        self.users
            .get(user)
            .map(|entry| entry.hash == hash_password(password))
            .unwrap_or(false)
    }

    pub fn in_group(&self, user: &str, group: &str) -> bool {
        self.users
            .get(user)
            .map(|entry| entry.groups.iter().any(|g| g == group))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Which authenticated users may reach the dispatcher
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RestrictionScope {
    /// Any user with a matching password
    #[default]
    Unrestricted,
    /// Exactly this user
    User(String),
    /// Members of this group
    Group(String),
}

/// Access policy: an optional administrator plus a scope
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessRestriction {
    pub admin: Option<String>,
    pub scope: RestrictionScope,
}

impl AccessRestriction {
    pub fn user(user: impl Into<String>) -> Self {
        Self {
            admin: None,
            scope: RestrictionScope::User(user.into()),
        }
    }

    pub fn group(group: impl Into<String>) -> Self {
        Self {
            admin: None,
            scope: RestrictionScope::Group(group.into()),
        }
    }

    pub fn with_admin(mut self, admin: impl Into<String>) -> Self {
        self.admin = Some(admin.into());
        self
    }

    /// Evaluate the rules in order; a failed rule never falls through to a looser one
    pub fn permits(&self, store: &CredentialStore, user: &str, password: &str) -> bool {
        let password_ok = store.verify(user, password);

        if self.admin.as_deref() == Some(user) && password_ok {
            return true;
        }

        match &self.scope {
            RestrictionScope::User(allowed) => user == allowed && password_ok,
            RestrictionScope::Group(group) => store.in_group(user, group) && password_ok,
            // An admin alone restricts access to the admin
            RestrictionScope::Unrestricted => self.admin.is_none() && password_ok,
        }
    }
}

/// Decides whether an inbound request may be dispatched
pub trait AccessGate: Send + Sync {
    fn authorize(&self, headers: &HeaderMap) -> Result<()>;
}

/// Admits every request
#[derive(Clone, Debug, Default)]
pub struct OpenAccess;

impl AccessGate for OpenAccess {
    fn authorize(&self, _headers: &HeaderMap) -> Result<()> {
        Ok(())
    }
}

/// Requires Basic credentials that satisfy an `AccessRestriction`
#[derive(Clone, Debug)]
pub struct BasicAuthGate {
    store: CredentialStore,
    restriction: AccessRestriction,
}

impl BasicAuthGate {
    pub fn new(store: CredentialStore, restriction: AccessRestriction) -> Self {
        Self { store, restriction }
    }
}

impl AccessGate for BasicAuthGate {
    fn authorize(&self, headers: &HeaderMap) -> Result<()> {
        let credentials = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(decode_basic);

        match credentials {
            Some((user, password)) if self.restriction.permits(&self.store, &user, &password) => {
                debug!("Authorized user {}", user);
                Ok(())
            }
            Some((user, _)) => {
                warn!("Rejected credentials for user {}", user);
                Err(CoreError::Unauthorized)
            }
            None => {
                debug!("Request without Basic credentials");
                Err(CoreError::Unauthorized)
            }
        }
    }
}
