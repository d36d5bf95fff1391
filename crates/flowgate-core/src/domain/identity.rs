//! Identity resolution - derives rate-limit keys from request metadata.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RateLimitError;

/// Address value used when a request carries no address information.
pub const LOOPBACK_PLACEHOLDER: &str = "127.0.0.1";

/// One axis of rate limiting. Each dimension has its own limit, window,
/// and counter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Address,
    Session,
}

impl Dimension {
    /// Key-prefix tag for this dimension.
    pub fn tag(&self) -> &'static str {
        match self {
            Dimension::Address => "ip",
            Dimension::Session => "session",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A resolved rate-limit key, unique per (dimension, value).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub dimension: Dimension,
    pub value: String,
}

impl Identity {
    pub fn new(dimension: Dimension, value: impl Into<String>) -> Self {
        Self {
            dimension,
            value: value.into(),
        }
    }

    /// The string key counters are indexed by, e.g. `ip:203.0.113.4`.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.dimension.tag(), self.value)
    }
}

/// Raw identity material extracted from an inbound request by the host.
/// The host reads headers and cookies; this type stays protocol-free.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    /// Explicit caller-supplied identifier, highest precedence.
    pub client_id: Option<String>,
    /// Forwarded-for address list, client-supplied hops first.
    pub forwarded_for: Vec<String>,
    /// Direct real-address header value.
    pub real_address: Option<String>,
    /// Existing session key, if the request already carries one.
    pub session_key: Option<String>,
}

impl RequestMetadata {
    /// True when every identity source is absent or blank.
    pub fn is_empty(&self) -> bool {
        non_blank(self.client_id.as_deref()).is_none()
            && !self.forwarded_for.iter().any(|e| !e.trim().is_empty())
            && non_blank(self.real_address.as_deref()).is_none()
            && non_blank(self.session_key.as_deref()).is_none()
    }
}

/// Outcome of identity resolution: one key per active dimension, plus a
/// newly minted session key the host must persist.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub address: Identity,
    pub session: Option<Identity>,
    pub minted_session_key: Option<String>,
}

impl Resolution {
    pub fn identity(&self, dimension: Dimension) -> Option<&Identity> {
        match dimension {
            Dimension::Address => Some(&self.address),
            Dimension::Session => self.session.as_ref(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve the rate-limit identities for a request.
///
/// Address precedence: explicit client id, then the *last* entry of the
/// forwarded-for list (the hop added by the proxy nearest this server,
/// which the client cannot spoof), then the real-address header, then
/// the loopback placeholder.
///
/// Session precedence: the existing session key when present; otherwise,
/// when `mint_session` is set, a fresh random key is generated and
/// reported back so the host can persist it.
///
/// Metadata blank in every field with minting disabled is an error:
/// counting against an empty key would merge unrelated callers.
pub fn resolve(
    meta: &RequestMetadata,
    mint_session: bool,
) -> Result<Resolution, RateLimitError> {
    if meta.is_empty() && !mint_session {
        return Err(RateLimitError::MissingIdentity);
    }

    let address_value = non_blank(meta.client_id.as_deref())
        .or_else(|| {
            meta.forwarded_for
                .iter()
                .rev()
                .find_map(|entry| non_blank(Some(entry.as_str())))
        })
        .or_else(|| non_blank(meta.real_address.as_deref()))
        .unwrap_or(LOOPBACK_PLACEHOLDER);
    let address = Identity::new(Dimension::Address, address_value);

    let (session, minted_session_key) = match non_blank(meta.session_key.as_deref()) {
        Some(key) => (Some(Identity::new(Dimension::Session, key)), None),
        None if mint_session => {
            let key = Uuid::new_v4().to_string();
            (
                Some(Identity::new(Dimension::Session, key.clone())),
                Some(key),
            )
        }
        None => (None, None),
    };

    Ok(Resolution {
        address,
        session,
        minted_session_key,
    })
}
