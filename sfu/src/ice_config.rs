//! ICE server configuration cache: parses the external JSON descriptor
//! once, refreshes it lazily, and derives HMAC-SHA1 TURN credentials on
//! demand (spec.md §3 "ICE Configuration Cache", §6).

use std::sync::Mutex;

use ring::hmac;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::time::{now_jiffies, JIFFIES_PER_SEC};

/// Hard refresh: a snapshot older than this is never handed out as-is.
const HARD_REFRESH_JIFFIES: u64 = 5 * 60 * JIFFIES_PER_SEC;
/// Background refresh: a snapshot older than this triggers a refresh the
/// caller should kick off, while the stale snapshot is still returned.
const BACKGROUND_REFRESH_JIFFIES: u64 = 2 * 60 * JIFFIES_PER_SEC;

/// HMAC-SHA1 TURN usernames are minted this far in the future (spec.md §6).
const HMAC_CREDENTIAL_LIFETIME_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
    Password,
    Oauth,
    #[serde(rename = "hmac-sha1")]
    HmacSha1,
}

/// One entry of the external JSON descriptor: `[{ urls, username,
/// credential, credentialType }]` (spec.md §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IceServerDescriptor {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
    #[serde(rename = "credentialType", default)]
    pub credential_type: Option<CredentialType>,
}

/// A descriptor resolved to concrete username/password, ready to hand to
/// the ICE transport.
#[derive(Debug, Clone)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

fn hmac_credential(secret: &[u8], username: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, secret);
    let signature = hmac::sign(&key, username.as_bytes());
    base64::encode(signature.as_ref())
}

/// Resolves one descriptor entry, minting a fresh HMAC-SHA1 username and
/// credential when `credentialType == "hmac-sha1"` (spec.md §6: `username
/// = "<unix_ts+86400>[:<orig_user>]"`, `credential =
/// base64(HMAC_SHA1(secret, username))`).
fn resolve(entry: &IceServerDescriptor, secret: &[u8]) -> IceServer {
    match entry.credential_type {
        Some(CredentialType::HmacSha1) => {
            let expiry = now_jiffies() / JIFFIES_PER_SEC + HMAC_CREDENTIAL_LIFETIME_SECS;
            let username = if entry.username.is_empty() {
                expiry.to_string()
            } else {
                format!("{expiry}:{}", entry.username)
            };
            let credential = hmac_credential(secret, &username);
            IceServer {
                urls: entry.urls.clone(),
                username,
                credential,
            }
        }
        _ => IceServer {
            urls: entry.urls.clone(),
            username: entry.username.clone(),
            credential: entry.credential.clone(),
        },
    }
}

struct Snapshot {
    servers: Vec<IceServer>,
    refreshed_at_jiffies: u64,
}

/// Process-wide accessor: re-reads and re-parses the JSON descriptor from
/// `source` on each refresh, resolving HMAC-SHA1 entries with `secret`.
/// Exposes a single accessor that performs the age check and reports
/// whether a background refresh should be scheduled (spec.md §9 "Global
/// state... expose as a refreshable snapshot").
pub struct IceConfigCache<F: Fn() -> Result<String> + Send + Sync> {
    source: F,
    secret: Vec<u8>,
    snapshot: Mutex<Option<Snapshot>>,
}

/// Whether the returned snapshot also warrants a background refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    RefreshInBackground,
}

impl<F: Fn() -> Result<String> + Send + Sync> IceConfigCache<F> {
    pub fn new(source: F, secret: Vec<u8>) -> Self {
        IceConfigCache {
            source,
            secret,
            snapshot: Mutex::new(None),
        }
    }

    fn parse(&self, raw: &str) -> Result<Vec<IceServer>> {
        let descriptors: Vec<IceServerDescriptor> =
            serde_json::from_str(raw).map_err(|e| Error::Other(format!("ice config parse: {e}")))?;
        Ok(descriptors.iter().map(|d| resolve(d, &self.secret)).collect())
    }

    fn refresh(&self) -> Result<Vec<IceServer>> {
        let raw = (self.source)()?;
        let servers = self.parse(&raw)?;
        *self.snapshot.lock().unwrap() = Some(Snapshot {
            servers: servers.clone(),
            refreshed_at_jiffies: now_jiffies(),
        });
        Ok(servers)
    }

    /// Returns the current server list (refreshing eagerly if the cache
    /// is empty or older than the hard threshold) plus whether the
    /// caller should additionally kick off a background refresh.
    pub fn get(&self) -> Result<(Vec<IceServer>, Freshness)> {
        let now = now_jiffies();
        let age = {
            let snap = self.snapshot.lock().unwrap();
            snap.as_ref().map(|s| now.saturating_sub(s.refreshed_at_jiffies))
        };

        match age {
            None => Ok((self.refresh()?, Freshness::Fresh)),
            Some(age) if age >= HARD_REFRESH_JIFFIES => Ok((self.refresh()?, Freshness::Fresh)),
            Some(age) => {
                let servers = self.snapshot.lock().unwrap().as_ref().unwrap().servers.clone();
                let freshness = if age >= BACKGROUND_REFRESH_JIFFIES {
                    Freshness::RefreshInBackground
                } else {
                    Freshness::Fresh
                };
                Ok((servers, freshness))
            }
        }
    }
}

#[cfg(test)]
mod ice_config_test;
