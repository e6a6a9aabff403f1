//! External search surfaces. Each surface is read-only,
//! network-bound and failure-tolerant: any error is logged and degrades to
//! an empty result list rather than propagating.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::http_client::HttpClient;
use crate::manifest::parse_manifest;
use crate::resolve::{GallicaResolver, InstitutResolver, Resolver, VaticanResolver};

const SEARCH_TIMEOUT: Duration = Duration::from_secs(20);
const VATICAN_PROBE_TIMEOUT: Duration = Duration::from_secs(8);

/// One hit from any of the three search surfaces.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub doc_id: String,
    pub title: String,
    pub manifest_url: String,
    pub thumbnail_url: Option<String>,
    pub library: &'static str,
}

/// BnF via SRU. CQL: `(dc.title all "<query>")
/// and (dc.type all "manuscrit")`.
pub fn search_gallica(client: &HttpClient, query: &str, max_records: u32) -> Vec<SearchResult> {
    let escaped = query.replace('"', "'");
    let cql = format!(r#"(dc.title all "{escaped}") and (dc.type all "manuscrit")"#);
    search_gallica_by_cql(client, &cql, max_records.min(50))
}

fn search_gallica_by_cql(client: &HttpClient, cql: &str, max_records: u32) -> Vec<SearchResult> {
    let url = format!(
        "https://gallica.bnf.fr/SRU?operation=searchRetrieve&version=1.2&query={}&maximumRecords={max_records}&startRecord=1&collapsing=true",
        urlencode(cql)
    );

    let response = match client.get(&url, SEARCH_TIMEOUT) {
        Ok(response) if response.is_success() => response,
        Ok(response) => {
            tracing::warn!(status = response.status, %url, "Gallica SRU search failed");
            return Vec::new();
        }
        Err(error) => {
            tracing::warn!(%error, %url, "Gallica SRU search failed");
            return Vec::new();
        }
    };

    parse_gallica_sru(&response.text())
}

fn parse_gallica_sru(xml: &str) -> Vec<SearchResult> {
    let document = match roxmltree::Document::parse(xml) {
        Ok(document) => document,
        Err(error) => {
            tracing::warn!(%error, "Gallica SRU response was not valid XML");
            return Vec::new();
        }
    };

    let resolver = GallicaResolver;
    document
        .descendants()
        .filter(|node| node.is_element() && node.tag_name().name() == "record")
        .filter_map(|record| parse_gallica_record(record, &resolver))
        .collect()
}

/// DC fields live in the Dublin Core namespace but some SRU endpoints emit
/// them unprefixed; either is accepted.
fn parse_gallica_record(record: roxmltree::Node, resolver: &GallicaResolver) -> Option<SearchResult> {
    let mut title = None;
    let mut identifiers = Vec::new();

    for node in record.descendants() {
        if !node.is_element() {
            continue;
        }
        let Some(text) = node.text().map(str::trim).filter(|t| !t.is_empty()) else {
            continue;
        };
        match node.tag_name().name() {
            "title" if title.is_none() => title = Some(text.to_string()),
            "identifier" => identifiers.push(text.to_string()),
            _ => {}
        }
    }

    let (doc_id, ark) = extract_valid_identifier(&identifiers, resolver)?;
    let resolved = resolver.resolve(&ark).ok()?;
    let thumbnail_url = format!("https://gallica.bnf.fr/ark:/12148/{doc_id}.thumbnail");

    Some(SearchResult {
        doc_id,
        title: title.unwrap_or_else(|| "Untitled".to_string()),
        manifest_url: resolved.manifest_url,
        thumbnail_url: Some(thumbnail_url),
        library: "Gallica",
    })
}

/// Scans DC identifiers for an `ark:/` substring first; falls back to a
/// bare identifier the Gallica resolver itself accepts, constructing
/// `ark:/12148/<id>`.
fn extract_valid_identifier(identifiers: &[String], resolver: &GallicaResolver) -> Option<(String, String)> {
    for identifier in identifiers {
        if let Some(pos) = identifier.find("ark:/") {
            let ark = &identifier[pos..];
            let doc_id = ark.rsplit('/').next()?.to_string();
            return Some((doc_id, ark.to_string()));
        }
        if resolver.can_resolve(identifier) {
            return Some((identifier.clone(), format!("ark:/12148/{identifier}")));
        }
    }
    None
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

static INSTITUT_RECORD_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a[^>]+href=["'](?P<href>/records/item/(?P<id>\d+)[^"']*)["'][^>]*>(?P<title>.*?)</a>"#)
        .expect("static Institut record-link regex is valid")
});
static HTML_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("static HTML tag regex is valid"));

/// Institut de France via HTML scrape: matches anchors against the record
/// link pattern used by the catalogue's search results page.
pub fn search_institut(client: &HttpClient, query: &str, max_results: usize) -> Vec<SearchResult> {
    let url = format!(
        "https://bibnum.institutdefrance.fr/records/default?search={}",
        urlencode(query)
    );
    let response = match client.get(&url, SEARCH_TIMEOUT) {
        Ok(response) if response.is_success() => response,
        Ok(response) => {
            tracing::warn!(status = response.status, %url, "Institut search failed");
            return Vec::new();
        }
        Err(error) => {
            tracing::warn!(%error, %url, "Institut search failed");
            return Vec::new();
        }
    };

    let candidates = extract_institut_candidates(&response.text(), max_results);
    let resolver = InstitutResolver;
    let mut results = Vec::new();
    for (doc_id, fallback_title) in candidates {
        if results.len() >= max_results {
            break;
        }
        let Ok(resolved) = resolver.resolve(&doc_id) else {
            continue;
        };
        let title = fetch_institut_title(client, &resolved.manifest_url).unwrap_or(fallback_title);
        results.push(SearchResult {
            doc_id: resolved.doc_id,
            title,
            manifest_url: resolved.manifest_url,
            thumbnail_url: None,
            library: "Institut de France",
        });
    }
    results
}

fn extract_institut_candidates(html: &str, max_results: usize) -> Vec<(String, String)> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for captures in INSTITUT_RECORD_LINK_RE.captures_iter(html) {
        let id = captures["id"].to_string();
        if !seen.insert(id.clone()) {
            continue;
        }
        let raw_title = HTML_TAG_RE.replace_all(&captures["title"], " ").trim().to_string();
        let title = if raw_title.is_empty() {
            format!("Document {id}")
        } else {
            raw_title
        };
        out.push((id, title));
        if out.len() >= max_results {
            break;
        }
    }
    out
}

fn fetch_institut_title(client: &HttpClient, manifest_url: &str) -> Option<String> {
    let response = client.get(manifest_url, SEARCH_TIMEOUT).ok()?;
    if !response.is_success() {
        return None;
    }
    let raw = response.json().ok()?;
    parse_manifest(&raw).label
}

const VATICAN_NUMERIC_COLLECTIONS: [&str; 7] =
    ["Urb.lat", "Vat.lat", "Pal.lat", "Reg.lat", "Barb.lat", "Vat.gr", "Pal.gr"];
const VATICAN_TEXT_PREFIXES: [&str; 5] = ["Urb.lat.", "Vat.lat.", "Pal.lat.", "Reg.lat.", "Barb.lat."];

/// Vatican via probing: no public
/// search API, so candidate shelfmarks are synthesized and each candidate
/// manifest is probed with a short timeout.
pub fn search_vatican(client: &HttpClient, query: &str, max_results: usize) -> Vec<SearchResult> {
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }

    let mut results = Vec::new();

    if let Ok(normalized) = crate::resolve::vatican_normalize_shelfmark(query) {
        if let Some(result) = probe_vatican_candidate(client, &normalized) {
            results.push(result);
        }
    }
    if results.len() >= max_results {
        results.truncate(max_results);
        return results;
    }

    let candidates = if query.chars().all(|c| c.is_ascii_digit()) {
        VATICAN_NUMERIC_COLLECTIONS
            .iter()
            .map(|collection| format!("MSS_{collection}.{query}"))
            .collect::<Vec<_>>()
    } else if query_contains_known_prefix(query) {
        Vec::new()
    } else if let Some(number) = extract_first_number(query) {
        VATICAN_TEXT_PREFIXES
            .iter()
            .map(|prefix| format!("MSS_{prefix}{number}"))
            .collect()
    } else {
        Vec::new()
    };

    for candidate in candidates {
        if results.len() >= max_results {
            break;
        }
        if let Some(result) = probe_vatican_candidate(client, &candidate) {
            results.push(result);
        }
    }
    results
}

fn query_contains_known_prefix(query: &str) -> bool {
    let compact = query.to_lowercase().replace(['.', ' '], "");
    VATICAN_TEXT_PREFIXES
        .iter()
        .any(|prefix| compact.contains(&prefix.to_lowercase().replace('.', "")))
}

fn extract_first_number(query: &str) -> Option<String> {
    static DIGITS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\d+").expect("static digits regex is valid"));
    DIGITS_RE.find(query).map(|m| m.as_str().to_string())
}

fn probe_vatican_candidate(client: &HttpClient, ms_id: &str) -> Option<SearchResult> {
    let manifest_url = format!("https://digi.vatlib.it/iiif/{ms_id}/manifest.json");
    let response = client.get(&manifest_url, VATICAN_PROBE_TIMEOUT).ok()?;
    if !response.is_success() {
        return None;
    }
    let raw = response.json().ok()?;
    let parsed = parse_manifest(&raw);
    Some(SearchResult {
        doc_id: ms_id.to_string(),
        title: parsed.label.unwrap_or_else(|| ms_id.to_string()),
        manifest_url,
        thumbnail_url: None,
        library: "Vaticana",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_sru_record() {
        let xml = r#"<?xml version="1.0"?>
        <srw:searchRetrieveResponse xmlns:srw="http://www.loc.gov/zing/srw/" xmlns:dc="http://purl.org/dc/elements/1.1/">
          <srw:records>
            <srw:record>
              <srw:recordData>
                <dc:title>Missel</dc:title>
                <dc:identifier>ark:/12148/btv1b10033406t</dc:identifier>
              </srw:recordData>
            </srw:record>
          </srw:records>
        </srw:searchRetrieveResponse>"#;
        let results = parse_gallica_sru(xml);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "btv1b10033406t");
        assert_eq!(results[0].title, "Missel");
    }

    #[test]
    fn institut_link_extraction_dedups_by_id() {
        let html = r#"
            <a href="/records/item/111-ms">First</a>
            <a href="/records/item/111-ms?tab=info">First duplicate</a>
            <a href="/records/item/222">Second</a>
        "#;
        let candidates = extract_institut_candidates(html, 10);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].0, "111");
        assert_eq!(candidates[1].0, "222");
    }

    #[test]
    fn vatican_numeric_query_builds_one_candidate_per_collection() {
        assert!(query_contains_known_prefix("Urb.lat.123"));
        assert_eq!(extract_first_number("abc 456"), Some("456".to_string()));
    }
}
