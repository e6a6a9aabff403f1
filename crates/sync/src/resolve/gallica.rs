//! BnF/Gallica resolver: splits Gallica ark identifiers and also accepts
//! bare `b`/`c`-prefixed ids.

use regex::Regex;
use std::sync::LazyLock;

use super::{ResolvedDocument, Resolver};
use crate::error::ResolverError;

const LIBRARY: &str = "Gallica";

static ARK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ark:/(?P<naan>\d+)/(?P<id>[^/?#]+)").expect("static ark regex is valid"));

static BARE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[bc][a-z0-9]+$").expect("static bare-id regex is valid"));

pub struct GallicaResolver;

impl Resolver for GallicaResolver {
    fn can_resolve(&self, input: &str) -> bool {
        let trimmed = input.trim();
        trimmed.contains("gallica.bnf.fr")
            || ARK_RE.is_match(trimmed)
            || BARE_ID_RE.is_match(trimmed)
    }

    fn resolve(&self, input: &str) -> Result<ResolvedDocument, ResolverError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ResolverError::EmptyInput { library: LIBRARY });
        }

        if let Some(captures) = ARK_RE.captures(trimmed) {
            let naan = &captures["naan"];
            let id = captures["id"].trim_end_matches(".item").to_string();
            return Ok(ResolvedDocument {
                manifest_url: format!("https://gallica.bnf.fr/iiif/ark:/{naan}/{id}/manifest.json"),
                doc_id: id,
            });
        }

        if BARE_ID_RE.is_match(trimmed) {
            return Ok(ResolvedDocument {
                manifest_url: format!(
                    "https://gallica.bnf.fr/iiif/ark:/12148/{trimmed}/manifest.json"
                ),
                doc_id: trimmed.to_string(),
            });
        }

        Err(ResolverError::UnrecognizedInput {
            library: LIBRARY,
            input: trimmed.to_string(),
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
    fn resolves_bare_b_prefixed_id() {
        let resolver = GallicaResolver;
        let resolved = resolver.resolve("btv1b10033406t").unwrap();
        assert_eq!(
            resolved.manifest_url,
            "https://gallica.bnf.fr/iiif/ark:/12148/btv1b10033406t/manifest.json"
        );
        assert_eq!(resolved.doc_id, "btv1b10033406t");
    }

    #[test]
    fn resolves_full_ark_url() {
        let resolver = GallicaResolver;
        let resolved = resolver
            .resolve("https://gallica.bnf.fr/ark:/12148/btv1b84260335")
            .unwrap();
        assert_eq!(resolved.doc_id, "btv1b84260335");
        assert_eq!(
            resolved.manifest_url,
            "https://gallica.bnf.fr/iiif/ark:/12148/btv1b84260335/manifest.json"
        );
    }

    #[test]
    fn rejects_unrecognized_input() {
        let resolver = GallicaResolver;
        assert!(resolver.resolve("totally unrelated text").is_err());
    }
}
