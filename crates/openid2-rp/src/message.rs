//! OpenID 2.0 protocol messages.
//!
//! Indirect messages (the browser redirect to the provider and back) carry
//! their fields as `openid.*` query or form parameters. Direct responses from
//! the provider, such as association responses, use key-value form encoding:
//! one `key:value` pair per line, each line terminated by `\n`.
//!
//! # Example
//!
//! ```
//! use openid2_rp::message::{Message, encode_kv_form, parse_kv_form};
//!
//! let message = Message::from_pairs([
//!     ("openid.mode", "id_res"),
//!     ("openid.ns", "http://specs.openid.net/auth/2.0"),
//!     ("state", "not-an-openid-field"),
//! ]);
//! assert_eq!(message.get("mode"), Some("id_res"));
//! assert_eq!(message.len(), 2);
//!
//! let body = encode_kv_form([("mode", "error"), ("error", "bad")]).unwrap();
//! assert_eq!(body, "mode:error\nerror:bad\n");
//! assert_eq!(parse_kv_form(&body).unwrap().get("error").map(String::as_str), Some("bad"));
//! ```
//!
//! # References
//!
//! - [OpenID Authentication 2.0, Section 4](https://openid.net/specs/openid-authentication-2_0.html#anchor4)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

/// OpenID Authentication 2.0 namespace URI (`openid.ns`).
pub const OPENID2_NS: &str = "http://specs.openid.net/auth/2.0";

/// Claimed identifier / identity value used when the provider chooses the identifier.
pub const IDENTIFIER_SELECT: &str = "http://specs.openid.net/auth/2.0/identifier_select";

/// Prefix shared by every protocol field in indirect messages.
pub const OPENID_PREFIX: &str = "openid.";

/// Errors raised while encoding or decoding key-value form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvFormError {
    /// A non-empty line has no `:` separator.
    #[error("Line {line} is missing the ':' separator")]
    MissingSeparator {
        /// One-based line number.
        line: usize,
    },

    /// A key contains a character that cannot be encoded.
    #[error("Invalid key in key-value form: {0:?}")]
    InvalidKey(String),

    /// A value contains a newline.
    #[error("Invalid value for key {0:?}: values must not contain newlines")]
    InvalidValue(String),
}

/// Parses a key-value form document.
///
/// Carriage returns before the line terminator are tolerated. Duplicate keys
/// keep the last value.
pub fn parse_kv_form(body: &str) -> Result<BTreeMap<String, String>, KvFormError> {
    let mut fields = BTreeMap::new();

    for (idx, raw_line) in body.split('\n').enumerate() {
        let line = raw_line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or(KvFormError::MissingSeparator { line: idx + 1 })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(KvFormError::InvalidKey(key.to_string()));
        }

        fields.insert(key.to_string(), value.trim().to_string());
    }

    Ok(fields)
}

/// Encodes pairs as key-value form, preserving the given order.
pub fn encode_kv_form<'a, I>(pairs: I) -> Result<String, KvFormError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();

    for (key, value) in pairs {
        if key.is_empty() || key.contains(':') || key.contains('\n') {
            return Err(KvFormError::InvalidKey(key.to_string()));
        }
        if value.contains('\n') {
            return Err(KvFormError::InvalidValue(key.to_string()));
        }
        out.push_str(key);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }

    Ok(out)
}

/// The `openid.*` fields of an indirect message.
///
/// Keys are stored with their `openid.` prefix; accessors take the bare
/// field name (`mode`, `ax.value.email`, ...). Parameters outside the
/// `openid.` namespace are dropped on construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    params: BTreeMap<String, String>,
}

impl Message {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a message from raw parameter pairs (e.g. decoded callback
    /// query or form fields).
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let params = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(OPENID_PREFIX))
            .collect();

        Self { params }
    }

    /// Builds a message from the query string of a callback URL.
    #[must_use]
    pub fn from_url_query(url: &Url) -> Self {
        Self::from_pairs(url.query_pairs().into_owned())
    }

    /// Returns a field by its bare name.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.params
            .get(&format!("{OPENID_PREFIX}{field}"))
            .map(String::as_str)
    }

    /// Returns `true` if the field is present.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Sets a field by its bare name, replacing any previous value.
    pub fn set(&mut self, field: &str, value: impl Into<String>) {
        self.params
            .insert(format!("{OPENID_PREFIX}{field}"), value.into());
    }

    /// Aliases a namespace URI is declared under (`openid.ns.<alias>`), in
    /// key order. A message may declare the same URI more than once.
    pub fn namespace_aliases<'a>(&'a self, namespace_uri: &str) -> impl Iterator<Item = &'a str> {
        self.params.iter().filter_map(move |(key, value)| {
            let alias = key.strip_prefix(OPENID_PREFIX)?.strip_prefix("ns.")?;
            (value == namespace_uri && !alias.is_empty()).then_some(alias)
        })
    }

    /// First alias a namespace URI is declared under.
    #[must_use]
    pub fn namespace_alias(&self, namespace_uri: &str) -> Option<&str> {
        self.namespace_aliases(namespace_uri).next()
    }

    /// Iterates over full parameter names and values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of `openid.*` fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Returns `true` if the message has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Message
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}
