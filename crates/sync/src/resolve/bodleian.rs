//! Bodleian resolver: extracts the UUID identifying a digitized object from
//! an Oxford Digital Bodleian viewer URL or bare UUID input.

use regex::Regex;
use std::sync::LazyLock;

use super::{ResolvedDocument, Resolver};
use crate::error::ResolverError;

const LIBRARY: &str = "Bodleian";

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})")
        .expect("static UUID regex is valid")
});

pub struct BodleianResolver;

impl Resolver for BodleianResolver {
    fn can_resolve(&self, input: &str) -> bool {
        let trimmed = input.trim();
        trimmed.contains("digital.bodleian.ox.ac.uk") || UUID_RE.is_match(trimmed)
    }

    fn resolve(&self, input: &str) -> Result<ResolvedDocument, ResolverError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ResolverError::EmptyInput { library: LIBRARY });
        }

        let Some(captures) = UUID_RE.captures(trimmed) else {
            return Err(ResolverError::InvalidIdentifier {
                library: LIBRARY,
                input: trimmed.to_string(),
            });
        };
        let uuid = captures[1].to_lowercase();
        Ok(ResolvedDocument {
            manifest_url: format!("https://iiif.bodleian.ox.ac.uk/iiif/manifest/{uuid}.json"),
            doc_id: uuid,
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
    fn resolves_url_with_trailing_slash() {
        let resolver = BodleianResolver;
        let resolved = resolver
            .resolve("https://digital.bodleian.ox.ac.uk/objects/cb1df5f1-7435-468b-8860-d56db988b929/")
            .unwrap();
        assert_eq!(
            resolved.manifest_url,
            "https://iiif.bodleian.ox.ac.uk/iiif/manifest/cb1df5f1-7435-468b-8860-d56db988b929.json"
        );
    }

    #[test]
    fn resolves_bare_uuid() {
        let resolver = BodleianResolver;
        let resolved = resolver.resolve("cb1df5f1-7435-468b-8860-d56db988b929").unwrap();
        assert_eq!(resolved.doc_id, "cb1df5f1-7435-468b-8860-d56db988b929");
    }

    #[test]
    fn non_uuid_input_is_an_error() {
        let resolver = BodleianResolver;
        assert!(resolver.resolve("Urb.lat.1779").is_err());
    }
}
