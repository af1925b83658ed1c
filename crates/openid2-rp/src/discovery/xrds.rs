//! XRDS document parsing.
//!
//! Only the final `XRD` element of an XRDS document is authoritative (it is
//! the result of following any XRI resolution chain). Each `Service`
//! element contributes its `Type` URIs, its `URI`s with their priorities and
//! an optional `LocalID`.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use url::Url;

use super::{
    DiscoveryError, EndpointDescriptor, OPENID2_SERVER_TYPE, OPENID2_SIGNON_TYPE,
    ProtocolVersion, ServiceKind,
};

/// A `Service` element of the final XRD.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XrdsService {
    /// Service priority (lower is preferred).
    pub priority: Option<u32>,
    /// Declared `Type` URIs.
    pub types: Vec<String>,
    /// Endpoint URIs with their own priorities, in document order.
    pub uris: Vec<(String, Option<u32>)>,
    /// OP-local identifier.
    pub local_id: Option<String>,
}

/// The parts of an XRDS document relevant to OpenID discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XrdsDocument {
    /// `CanonicalID` of the final XRD (used as claimed id for XRIs).
    pub canonical_id: Option<String>,
    /// Services of the final XRD, in document order.
    pub services: Vec<XrdsService>,
}

#[derive(Debug, Clone, Copy)]
enum TextField {
    Type,
    Uri(Option<u32>),
    LocalId,
    CanonicalId,
}

fn priority_attr(element: &BytesStart<'_>) -> Option<u32> {
    element.attributes().flatten().find_map(|attr| {
        if attr.key.local_name().as_ref() != b"priority" {
            return None;
        }
        attr.unescape_value().ok()?.trim().parse().ok()
    })
}

/// Parses an XRDS document.
///
/// # Errors
///
/// Returns [`DiscoveryError::ParseError`] if the document is not well-formed
/// XML or contains no `XRD` element.
pub fn parse_xrds(xml: &str) -> Result<XrdsDocument, DiscoveryError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut saw_xrds = false;
    let mut last_xrd: Option<XrdsDocument> = None;
    let mut current_xrd: Option<XrdsDocument> = None;
    let mut current_service: Option<XrdsService> = None;
    let mut text_field: Option<TextField> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"XRDS" => saw_xrds = true,
                    b"XRD" => current_xrd = Some(XrdsDocument::default()),
                    b"Service" if current_xrd.is_some() => {
                        current_service = Some(XrdsService {
                            priority: priority_attr(&e),
                            ..XrdsService::default()
                        });
                    }
                    b"Type" if current_service.is_some() => text_field = Some(TextField::Type),
                    b"URI" if current_service.is_some() => {
                        text_field = Some(TextField::Uri(priority_attr(&e)));
                    }
                    b"LocalID" if current_service.is_some() => {
                        text_field = Some(TextField::LocalId);
                    }
                    b"CanonicalID" if current_xrd.is_some() && current_service.is_none() => {
                        text_field = Some(TextField::CanonicalId);
                    }
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"XRD" {
                    last_xrd = Some(XrdsDocument::default());
                }
            }
            Ok(Event::Text(e)) => {
                if text_field.is_some() {
                    let value = e
                        .unescape()
                        .map_err(|err| DiscoveryError::ParseError(format!("XRDS text: {err}")))?;
                    text.push_str(&value);
                }
            }
            Ok(Event::CData(e)) => {
                if text_field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                match (name.as_ref(), text_field.take()) {
                    (b"Type", Some(TextField::Type)) => {
                        if let Some(service) = current_service.as_mut() {
                            service.types.push(text.trim().to_string());
                        }
                    }
                    (b"URI", Some(TextField::Uri(priority))) => {
                        if let Some(service) = current_service.as_mut() {
                            service.uris.push((text.trim().to_string(), priority));
                        }
                    }
                    (b"LocalID", Some(TextField::LocalId)) => {
                        if let Some(service) = current_service.as_mut() {
                            service.local_id = Some(text.trim().to_string());
                        }
                    }
                    (b"CanonicalID", Some(TextField::CanonicalId)) => {
                        if let Some(xrd) = current_xrd.as_mut() {
                            xrd.canonical_id = Some(text.trim().to_string());
                        }
                    }
                    (b"Service", _) => {
                        if let (Some(service), Some(xrd)) =
                            (current_service.take(), current_xrd.as_mut())
                        {
                            xrd.services.push(service);
                        }
                    }
                    (b"XRD", _) => last_xrd = current_xrd.take(),
                    (_, field) => text_field = field,
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DiscoveryError::ParseError(format!("XRDS parse error: {e}")));
            }
            _ => {}
        }
    }

    if !saw_xrds {
        return Err(DiscoveryError::ParseError(
            "document has no XRDS root element".to_string(),
        ));
    }

    last_xrd.ok_or_else(|| DiscoveryError::ParseError("XRDS document has no XRD".to_string()))
}

impl XrdsDocument {
    /// Converts the OpenID 2.0 services into ordered endpoint descriptors.
    ///
    /// OP identifier services come first. Within a kind, services sort by
    /// ascending priority, then URIs by ascending priority; missing
    /// priorities sort last and ties keep document order. Services with no
    /// OpenID 2.0 type and URIs that are not absolute URLs are skipped.
    #[must_use]
    pub fn endpoints(&self, claimed_id: Option<&str>) -> Vec<EndpointDescriptor> {
        let mut ranked = Vec::new();

        for service in &self.services {
            let kind = if service.types.iter().any(|t| t == OPENID2_SERVER_TYPE) {
                ServiceKind::OpIdentifier
            } else if service.types.iter().any(|t| t == OPENID2_SIGNON_TYPE) {
                ServiceKind::ClaimedIdentifier
            } else {
                continue;
            };

            for (uri, uri_priority) in &service.uris {
                let Ok(endpoint) = Url::parse(uri) else {
                    tracing::debug!("Skipping XRDS service URI that is not a URL: {}", uri);
                    continue;
                };

                let descriptor = match kind {
                    ServiceKind::OpIdentifier => EndpointDescriptor {
                        endpoint,
                        version: ProtocolVersion::OpenId2,
                        kind,
                        claimed_id: None,
                        local_id: None,
                        types: service.types.clone(),
                        priority: service.priority,
                    },
                    ServiceKind::ClaimedIdentifier => EndpointDescriptor {
                        endpoint,
                        version: ProtocolVersion::OpenId2,
                        kind,
                        claimed_id: claimed_id.map(str::to_string),
                        local_id: service.local_id.clone(),
                        types: service.types.clone(),
                        priority: service.priority,
                    },
                };

                let rank = (
                    u8::from(kind != ServiceKind::OpIdentifier),
                    service.priority.unwrap_or(u32::MAX),
                    uri_priority.unwrap_or(u32::MAX),
                );
                ranked.push((rank, descriptor));
            }
        }

        ranked.sort_by_key(|(rank, _)| *rank);
        ranked.into_iter().map(|(_, d)| d).collect()
    }
}
