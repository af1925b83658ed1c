//! HTML-based discovery.
//!
//! Used when the identifier page is not an XRDS document: the page may point
//! to one through `<meta http-equiv="X-XRDS-Location">`, or declare the
//! provider directly with `<link rel="openid2.provider">`.

use scraper::{Html, Selector};

/// Discovery information found in an HTML page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlDiscovery {
    /// Yadis document location from `<meta http-equiv="X-XRDS-Location">`.
    pub xrds_location: Option<String>,
    /// OpenID 2.0 provider endpoint (`openid2.provider`).
    pub provider: Option<String>,
    /// OP-local identifier (`openid2.local_id`).
    pub local_id: Option<String>,
}

fn rel_contains(rel: &str, wanted: &str) -> bool {
    rel.split_ascii_whitespace()
        .any(|token| token.eq_ignore_ascii_case(wanted))
}

/// Extracts discovery information from an HTML document.
///
/// The first matching element of each kind wins.
#[must_use]
pub fn parse_html(body: &str) -> HtmlDiscovery {
    let document = Html::parse_document(body);
    let mut found = HtmlDiscovery::default();

    if let Ok(meta) = Selector::parse("meta[http-equiv]") {
        found.xrds_location = document.select(&meta).find_map(|element| {
            let equiv = element.value().attr("http-equiv")?;
            if !equiv.trim().eq_ignore_ascii_case("x-xrds-location") {
                return None;
            }
            let content = element.value().attr("content")?.trim();
            (!content.is_empty()).then(|| content.to_string())
        });
    }

    if let Ok(link) = Selector::parse("link[rel][href]") {
        for element in document.select(&link) {
            let (Some(rel), Some(href)) = (element.value().attr("rel"), element.value().attr("href"))
            else {
                continue;
            };
            let href = href.trim();
            if href.is_empty() {
                continue;
            }

            if found.provider.is_none() && rel_contains(rel, "openid2.provider") {
                found.provider = Some(href.to_string());
            }
            if found.local_id.is_none() && rel_contains(rel, "openid2.local_id") {
                found.local_id = Some(href.to_string());
            }
        }
    }

    found
}
