//! Mock OpenID provider for integration tests.
//!
//! Serves an XRDS document at `/id`, an HTML identity page at `/alice`
//! and an association endpoint at `/auth` that performs a real
//! Diffie-Hellman exchange. Assertions are signed with the provider's copy
//! of the MAC key, so a successful verification proves the key exchange.

#![allow(dead_code)]

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use openid2_rp::association::{AssociationType, SessionType, encrypt_mac_key};
use openid2_rp::ax::AX_NS;
use openid2_rp::message::{Message, OPENID2_NS, encode_kv_form};
use openid2_rp::{
    AuthRequest, OpenIdConsumer, ProviderRecord, RelyingPartyConfig, SessionState,
    StaticProviderLookup,
};
use time::OffsetDateTime;
use time::macros::format_description;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const RETURN_URL: &str = "https://app.example.com/openid/return?flow=42";
pub const ASSOC_HANDLE: &str = "{HMAC}{mock}{1}";
pub const SHA1_KEY: [u8; 20] = [0x13; 20];
pub const SHA256_KEY: [u8; 32] = [0x37; 32];

/// How the association endpoint behaves.
#[derive(Debug, Clone)]
pub struct OpOptions {
    pub expires_in: u64,
    pub reject_association: bool,
}

impl Default for OpOptions {
    fn default() -> Self {
        Self {
            expires_in: 3600,
            reject_association: false,
        }
    }
}

struct AssociateResponder {
    options: OpOptions,
}

impl Respond for AssociateResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let params: Vec<(String, String)> = url::form_urlencoded::parse(&request.body)
            .into_owned()
            .collect();
        let get = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };

        if self.options.reject_association {
            let body = encode_kv_form([
                ("ns", OPENID2_NS),
                ("error", "association type not supported"),
                ("error_code", "unsupported-type"),
                ("assoc_type", "HMAC-SHA1"),
                ("session_type", "DH-SHA1"),
            ])
            .unwrap();
            return ResponseTemplate::new(400).set_body_string(body);
        }

        let assoc_type = get("openid.assoc_type");
        let session_type = get("openid.session_type");
        let key: &[u8] = match AssociationType::from_name(&assoc_type) {
            Some(AssociationType::HmacSha1) => &SHA1_KEY,
            _ => &SHA256_KEY,
        };
        let session = SessionType::from_name(&session_type).unwrap();
        let expires_in = self.options.expires_in.to_string();

        let mut fields = vec![
            ("ns".to_string(), OPENID2_NS.to_string()),
            ("assoc_handle".to_string(), ASSOC_HANDLE.to_string()),
            ("assoc_type".to_string(), assoc_type.clone()),
            ("session_type".to_string(), session_type.clone()),
            ("expires_in".to_string(), expires_in),
        ];
        if session.is_diffie_hellman() {
            let (server_public, enc_mac_key) =
                encrypt_mac_key(&get("openid.dh_consumer_public"), key, session).unwrap();
            fields.push(("dh_server_public".to_string(), server_public));
            fields.push(("enc_mac_key".to_string(), enc_mac_key));
        } else {
            fields.push(("mac_key".to_string(), STANDARD.encode(key)));
        }

        let body = encode_kv_form(fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))).unwrap();
        ResponseTemplate::new(200).set_body_raw(body, "text/plain; charset=utf-8")
    }
}

pub struct MockOp {
    pub server: MockServer,
}

impl MockOp {
    pub async fn start() -> Self {
        Self::start_with(OpOptions::default()).await
    }

    pub async fn start_with(options: OpOptions) -> Self {
        let server = MockServer::start().await;
        let op = Self { server };

        Mock::given(method("GET"))
            .and(path("/id"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(op.xrds(), "application/xrds+xml"),
            )
            .mount(&op.server)
            .await;

        Mock::given(method("GET"))
            .and(path("/alice"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    format!(
                        r#"<html><head><link rel="openid2.provider" href="{}"></head><body>Alice</body></html>"#,
                        op.endpoint()
                    ),
                    "text/html; charset=utf-8",
                ),
            )
            .mount(&op.server)
            .await;

        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(AssociateResponder { options })
            .mount(&op.server)
            .await;

        op
    }

    pub fn xrds(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<xrds:XRDS xmlns:xrds="xri://$xrds" xmlns="xri://$xrd*($v*2.0)">
  <XRD>
    <Service priority="0">
      <Type>http://specs.openid.net/auth/2.0/server</Type>
      <Type>{AX_NS}</Type>
      <URI>{}</URI>
    </Service>
  </XRD>
</xrds:XRDS>"#,
            self.endpoint()
        )
    }

    pub fn endpoint(&self) -> String {
        format!("{}/auth", self.server.uri())
    }

    pub fn discovery_url(&self) -> String {
        format!("{}/id", self.server.uri())
    }

    /// An identifier in the provider's own namespace.
    pub fn claimed_id(&self) -> String {
        format!("{}/id/0123456789", self.server.uri())
    }

    pub fn identity_page(&self) -> String {
        format!("{}/alice", self.server.uri())
    }

    pub fn consumer(&self) -> OpenIdConsumer {
        self.consumer_with(RelyingPartyConfig::default())
    }

    pub fn consumer_with(&self, config: RelyingPartyConfig) -> OpenIdConsumer {
        let lookup = StaticProviderLookup::new().with_provider(
            "google",
            ProviderRecord::with_discovery("google", self.discovery_url()),
        );
        OpenIdConsumer::new(config, Arc::new(lookup)).unwrap()
    }

    /// Builds a signed positive assertion for `request`, as the provider would.
    pub fn assertion(
        &self,
        state: &SessionState,
        request: &AuthRequest,
        claimed_id: &str,
        ax_fields: &[(&str, &str)],
    ) -> Message {
        let key: &[u8] = match state.assoc_type {
            AssociationType::HmacSha1 => &SHA1_KEY,
            AssociationType::HmacSha256 => &SHA256_KEY,
        };
        let endpoint = self.endpoint();
        let nonce = fresh_nonce();

        let mut fields: Vec<(&str, &str)> = vec![
            ("op_endpoint", endpoint.as_str()),
            ("claimed_id", claimed_id),
            ("identity", claimed_id),
            ("return_to", request.return_to.as_str()),
            ("response_nonce", nonce.as_str()),
            ("assoc_handle", request.assoc_handle().unwrap()),
        ];
        fields.extend_from_slice(ax_fields);

        let signed_data = encode_kv_form(fields.iter().copied()).unwrap();
        let sig = state.assoc_type.sign(key, signed_data.as_bytes());
        let signed: Vec<&str> = fields.iter().map(|(k, _)| *k).collect();

        let mut message = Message::new();
        message.set("ns", OPENID2_NS);
        message.set("mode", "id_res");
        for (k, v) in &fields {
            message.set(k, *v);
        }
        message.set("signed", signed.join(","));
        message.set("sig", STANDARD.encode(sig));
        message
    }
}

/// A nonce stamped with the current second.
pub fn fresh_nonce() -> String {
    let stamp = OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
        ))
        .unwrap();
    format!("{stamp}{}", rand::random::<u32>())
}

/// The URL the provider redirects the browser to.
pub fn callback_url(request: &AuthRequest, message: &Message) -> Url {
    let mut url = request.return_to.clone();
    url.query_pairs_mut().extend_pairs(message.iter());
    url
}
