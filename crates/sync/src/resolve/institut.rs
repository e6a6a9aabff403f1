//! Institut de France resolver: recognizes bibnum.institutdefrance.fr
//! identifiers and viewer URLs.

use regex::Regex;
use std::sync::LazyLock;

use super::{ResolvedDocument, Resolver};
use crate::error::ResolverError;

const LIBRARY: &str = "Institut de France";
const BASE_URL: &str = "https://bibnum.institutdefrance.fr";

static NUMERIC_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{3,}$").expect("static numeric-id regex is valid"));
static VIEWER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/viewer/(?P<id>\d+)").expect("static viewer regex is valid"));
static MANIFEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/iiif/(?P<id>\d+)/manifest/?$").expect("static manifest-path regex is valid")
});
static RECORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/records/item/(?P<id>\d+)").expect("static record regex is valid")
});

fn extract_doc_id(text: &str) -> Option<String> {
    for pattern in [&*MANIFEST_RE, &*VIEWER_RE, &*RECORD_RE] {
        if let Some(captures) = pattern.captures(text) {
            return Some(captures["id"].to_string());
        }
    }
    None
}

pub struct InstitutResolver;

impl Resolver for InstitutResolver {
    fn can_resolve(&self, input: &str) -> bool {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return false;
        }
        trimmed.to_lowercase().contains("bibnum.institutdefrance.fr") || NUMERIC_ID_RE.is_match(trimmed)
    }

    fn resolve(&self, input: &str) -> Result<ResolvedDocument, ResolverError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ResolverError::EmptyInput { library: LIBRARY });
        }

        let doc_id = if NUMERIC_ID_RE.is_match(trimmed) {
            trimmed.to_string()
        } else {
            extract_doc_id(trimmed).ok_or_else(|| ResolverError::UnrecognizedInput {
                library: LIBRARY,
                input: trimmed.to_string(),
            })?
        };

        Ok(ResolvedDocument {
            manifest_url: format!("{BASE_URL}/iiif/{doc_id}/manifest"),
            doc_id,
        })
    }

    fn library_name(&self) -> &'static str {
        LIBRARY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_bare_numeric_id() {
        let resolver = InstitutResolver;
        let resolved = resolver.resolve("123456").unwrap();
        assert_eq!(
            resolved.manifest_url,
            "https://bibnum.institutdefrance.fr/iiif/123456/manifest"
        );
    }

    #[test]
    fn resolves_viewer_url() {
        let resolver = InstitutResolver;
        let resolved = resolver
            .resolve("https://bibnum.institutdefrance.fr/viewer/42177")
            .unwrap();
        assert_eq!(resolved.doc_id, "42177");
    }

    #[test]
    fn resolves_record_item_url() {
        let resolver = InstitutResolver;
        let resolved = resolver
            .resolve("https://bibnum.institutdefrance.fr/records/item/98765-ms")
            .unwrap();
        assert_eq!(resolved.doc_id, "98765");
    }

    #[test]
    fn resolves_manifest_url() {
        let resolver = InstitutResolver;
        let resolved = resolver
            .resolve("https://bibnum.institutdefrance.fr/iiif/5555/manifest")
            .unwrap();
        assert_eq!(resolved.doc_id, "5555");
    }
}
