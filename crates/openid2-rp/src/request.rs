//! Authentication request construction.
//!
//! Builds the `checkid_setup` request sent through the user's browser to
//! the provider. The request names the association handle so the provider
//! signs its response with the shared key, and always carries the
//! attribute exchange fetch request from [`crate::ax`].
//!
//! # References
//!
//! - [OpenID Authentication 2.0, Section 9](https://openid.net/specs/openid-authentication-2_0.html#requesting_authentication)

use serde::Serialize;
use url::Url;

use crate::ax::{self, AttributeRequest, REQUESTED_ATTRIBUTES};
use crate::error::RpError;
use crate::message::{OPENID_PREFIX, OPENID2_NS};
use crate::session::SessionState;

/// An outbound authentication request.
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest {
    /// Provider endpoint the user is sent to.
    pub endpoint: Url,

    /// Where the provider sends the user back.
    pub return_to: Url,

    /// Realm the user is asked to trust.
    pub realm: String,

    /// Requested profile attributes.
    pub attributes: Vec<AttributeRequest>,

    /// Full `openid.*` parameter list, in the order sent.
    params: Vec<(String, String)>,
}

impl AuthRequest {
    /// Returns the `openid.*` parameters in the order sent.
    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Returns a parameter by its bare field name (`mode`, `ax.mode`, ...).
    #[must_use]
    pub fn param(&self, field: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.strip_prefix(OPENID_PREFIX) == Some(field))
            .map(|(_, v)| v.as_str())
    }

    /// The association handle the request is bound to.
    #[must_use]
    pub fn assoc_handle(&self) -> Option<&str> {
        self.param("assoc_handle")
    }

    /// URL for an HTTP redirect to the provider. Any query the endpoint
    /// already has is preserved.
    #[must_use]
    pub fn redirect_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .extend_pairs(self.params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        url
    }

    /// An HTML page that POSTs the request to the provider on load, for
    /// requests too long for a redirect URL.
    #[must_use]
    pub fn auto_submit_form(&self) -> String {
        let mut html = String::with_capacity(1024);
        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
        html.push_str("<meta charset=\"utf-8\">\n<title>OpenID sign-in</title>\n</head>\n");
        html.push_str("<body onload=\"document.forms[0].submit()\">\n");
        html.push_str(&format!(
            "<form method=\"POST\" action=\"{}\" accept-charset=\"UTF-8\">\n",
            html_escape(self.endpoint.as_str())
        ));
        for (key, value) in &self.params {
            html.push_str(&format!(
                "<input type=\"hidden\" name=\"{}\" value=\"{}\">\n",
                html_escape(key),
                html_escape(value)
            ));
        }
        html.push_str("<noscript><button type=\"submit\">Continue</button></noscript>\n");
        html.push_str("</form>\n</body>\n</html>\n");
        html
    }
}

/// Simple HTML escaping for attribute values.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Parses and checks a return URL.
pub fn parse_return_url(return_url: &str) -> Result<Url, RpError> {
    let url = Url::parse(return_url.trim())
        .map_err(|e| RpError::invalid_request(format!("return URL is not a URL: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(RpError::invalid_request(format!(
            "return URL scheme must be http or https, got {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(RpError::invalid_request("return URL has no host"));
    }
    if url.fragment().is_some() {
        return Err(RpError::invalid_request("return URL must not have a fragment"));
    }

    Ok(url)
}

/// The origin of a URL as a realm (`scheme://host[:port]/`).
#[must_use]
pub fn origin_realm(url: &Url) -> String {
    let mut realm = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        realm.push_str(&format!(":{port}"));
    }
    realm.push('/');
    realm
}

/// Checks that `return_to` falls under `realm`.
///
/// A realm host starting with `*.` matches that domain and any subdomain.
/// Scheme and port must be equal, and the return URL path must extend the
/// realm path at a segment boundary.
pub fn validate_realm(realm: &str, return_to: &Url) -> Result<(), RpError> {
    let (wildcard, realm_str) = match realm.split_once("://*.") {
        Some((scheme, rest)) => (true, format!("{scheme}://{rest}")),
        None => (false, realm.to_string()),
    };

    let realm_url = Url::parse(&realm_str)
        .map_err(|e| RpError::invalid_request(format!("realm is not a URL: {e}")))?;

    if !matches!(realm_url.scheme(), "http" | "https") {
        return Err(RpError::invalid_request("realm scheme must be http or https"));
    }
    if realm_url.fragment().is_some() {
        return Err(RpError::invalid_request("realm must not have a fragment"));
    }
    let Some(realm_host) = realm_url.host_str() else {
        return Err(RpError::invalid_request("realm has no host"));
    };

    let mismatch = || {
        RpError::invalid_request(format!("return URL {return_to} is not under realm {realm}"))
    };

    if realm_url.scheme() != return_to.scheme()
        || realm_url.port_or_known_default() != return_to.port_or_known_default()
    {
        return Err(mismatch());
    }

    let return_host = return_to.host_str().unwrap_or_default();
    let host_matches = if wildcard {
        return_host == realm_host || return_host.ends_with(&format!(".{realm_host}"))
    } else {
        return_host == realm_host
    };
    if !host_matches {
        return Err(mismatch());
    }

    let realm_path = realm_url.path();
    let return_path = return_to.path();
    let path_matches = return_path == realm_path
        || (return_path.starts_with(realm_path)
            && (realm_path.ends_with('/') || return_path[realm_path.len()..].starts_with('/')));
    if !path_matches {
        return Err(mismatch());
    }

    Ok(())
}

/// Builds the `checkid_setup` request for an established association.
///
/// `realm` defaults to the origin of the return URL.
pub fn build_request(
    state: &SessionState,
    return_url: &str,
    realm: Option<&str>,
) -> Result<AuthRequest, RpError> {
    let return_to = parse_return_url(return_url)?;
    let realm = realm.map_or_else(|| origin_realm(&return_to), str::to_string);
    validate_realm(&realm, &return_to)?;

    let endpoint = &state.endpoint;
    let mut params: Vec<(String, String)> = vec![
        ("ns".to_string(), OPENID2_NS.to_string()),
        ("mode".to_string(), "checkid_setup".to_string()),
        (
            "claimed_id".to_string(),
            endpoint.request_claimed_id().to_string(),
        ),
        ("identity".to_string(), endpoint.request_identity().to_string()),
        ("assoc_handle".to_string(), state.assoc_handle.clone()),
        ("return_to".to_string(), return_to.to_string()),
        ("realm".to_string(), realm.clone()),
    ];
    params.extend(ax::fetch_request_fields());

    let params = params
        .into_iter()
        .map(|(k, v)| (format!("{OPENID_PREFIX}{k}"), v))
        .collect();

    tracing::debug!(
        "Built checkid_setup request for {} (realm {})",
        endpoint.endpoint,
        realm
    );

    Ok(AuthRequest {
        endpoint: endpoint.endpoint.clone(),
        return_to,
        realm,
        attributes: REQUESTED_ATTRIBUTES.to_vec(),
        params,
    })
}
