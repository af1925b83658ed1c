//! Attribute Exchange 1.0.
//!
//! Every authentication request carries the same fetch request: full name,
//! nickname and gender as optional attributes, email as required. A
//! provider may still omit any of them, so extraction never fails; missing
//! or unsigned values are simply absent.
//!
//! # References
//!
//! - [OpenID Attribute Exchange 1.0](https://openid.net/specs/openid-attribute-exchange-1_0.html)

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::message::{Message, OPENID_PREFIX};

/// Attribute Exchange namespace URI.
pub const AX_NS: &str = "http://openid.net/srv/ax/1.0";

/// Alias the fetch request is declared under.
pub const AX_ALIAS: &str = "ax";

/// `namePerson` type URI.
pub const TYPE_FULL_NAME: &str = "http://axschema.org/namePerson";
/// `namePerson/friendly` type URI.
pub const TYPE_NICKNAME: &str = "http://axschema.org/namePerson/friendly";
/// `contact/email` type URI.
pub const TYPE_EMAIL: &str = "http://axschema.org/contact/email";
/// `person/gender` type URI.
pub const TYPE_GENDER: &str = "http://axschema.org/person/gender";

/// One requested attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttributeRequest {
    /// Alias within the fetch request.
    pub alias: &'static str,
    /// Attribute type URI.
    pub type_uri: &'static str,
    /// Whether the attribute is listed under `required`.
    pub required: bool,
}

/// The fixed attribute list sent with every request.
pub const REQUESTED_ATTRIBUTES: [AttributeRequest; 4] = [
    AttributeRequest {
        alias: "fullname",
        type_uri: TYPE_FULL_NAME,
        required: false,
    },
    AttributeRequest {
        alias: "nickname",
        type_uri: TYPE_NICKNAME,
        required: false,
    },
    AttributeRequest {
        alias: "email",
        type_uri: TYPE_EMAIL,
        required: true,
    },
    AttributeRequest {
        alias: "gender",
        type_uri: TYPE_GENDER,
        required: false,
    },
];

/// Fetch request fields (bare names, without the `openid.` prefix).
#[must_use]
pub fn fetch_request_fields() -> Vec<(String, String)> {
    let mut fields = vec![
        (format!("ns.{AX_ALIAS}"), AX_NS.to_string()),
        (format!("{AX_ALIAS}.mode"), "fetch_request".to_string()),
    ];

    for attr in &REQUESTED_ATTRIBUTES {
        fields.push((format!("{AX_ALIAS}.type.{}", attr.alias), attr.type_uri.to_string()));
    }

    let list = |required: bool| {
        REQUESTED_ATTRIBUTES
            .iter()
            .filter(|a| a.required == required)
            .map(|a| a.alias)
            .collect::<Vec<_>>()
            .join(",")
    };
    fields.push((format!("{AX_ALIAS}.required"), list(true)));
    fields.push((format!("{AX_ALIAS}.if_available"), list(false)));

    fields
}

/// Profile attributes returned by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxAttributes {
    /// `namePerson`.
    pub full_name: Option<String>,
    /// `namePerson/friendly`.
    pub nickname: Option<String>,
    /// `contact/email`.
    pub email: Option<String>,
    /// `person/gender`.
    pub gender: Option<String>,
}

impl AxAttributes {
    fn slot(&mut self, type_uri: &str) -> Option<&mut Option<String>> {
        match type_uri {
            TYPE_FULL_NAME => Some(&mut self.full_name),
            TYPE_NICKNAME => Some(&mut self.nickname),
            TYPE_EMAIL => Some(&mut self.email),
            TYPE_GENDER => Some(&mut self.gender),
            _ => None,
        }
    }

    /// Returns `true` if no attribute was returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.nickname.is_none()
            && self.email.is_none()
            && self.gender.is_none()
    }
}

/// Extracts the requested attributes from a positive assertion.
///
/// `signed` holds the bare names of the signed fields. The namespace
/// declaration, each `type.<alias>` and the value read must all be signed;
/// anything else is ignored. The provider's own aliases are honoured, both
/// for the extension and for individual attributes.
#[must_use]
pub fn extract(message: &Message, signed: &HashSet<&str>) -> AxAttributes {
    let mut attributes = AxAttributes::default();

    // Only a signed declaration counts; unsigned duplicates are ignored.
    let Some(ns_alias) = message
        .namespace_aliases(AX_NS)
        .find(|alias| signed.contains(format!("ns.{alias}").as_str()))
    else {
        if message.namespace_alias(AX_NS).is_some() {
            tracing::debug!("Ignoring unsigned attribute exchange namespace");
        }
        return attributes;
    };
    if message.get(&format!("{ns_alias}.mode")) != Some("fetch_response") {
        return attributes;
    }

    let type_prefix = format!("{OPENID_PREFIX}{ns_alias}.type.");
    for (key, type_uri) in message.iter() {
        let Some(attr_alias) = key.strip_prefix(&type_prefix) else {
            continue;
        };
        let type_field = &key[OPENID_PREFIX.len()..];
        if !signed.contains(type_field) {
            continue;
        }

        let value_field = match message.get(&format!("{ns_alias}.count.{attr_alias}")) {
            Some(count) => {
                if count.trim().parse::<u32>().unwrap_or(0) == 0 {
                    continue;
                }
                format!("{ns_alias}.value.{attr_alias}.1")
            }
            None => format!("{ns_alias}.value.{attr_alias}"),
        };
        if !signed.contains(value_field.as_str()) {
            continue;
        }

        let Some(value) = message.get(&value_field).filter(|v| !v.is_empty()) else {
            continue;
        };
        if let Some(slot) = attributes.slot(type_uri) {
            *slot = Some(value.to_string());
        }
    }

    attributes
}
