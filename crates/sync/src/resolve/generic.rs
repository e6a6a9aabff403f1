//! Fallback resolver: treats the input as an already-resolved manifest URL.

use super::{ResolvedDocument, Resolver};
use crate::error::ResolverError;

const LIBRARY: &str = "Local";

pub struct GenericResolver;

impl Resolver for GenericResolver {
    fn can_resolve(&self, input: &str) -> bool {
        input.trim().to_lowercase().starts_with("http")
    }

    fn resolve(&self, input: &str) -> Result<ResolvedDocument, ResolverError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ResolverError::EmptyInput { library: LIBRARY });
        }
        if !trimmed.to_lowercase().starts_with("http") {
            return Err(ResolverError::UnrecognizedInput {
                library: LIBRARY,
                input: trimmed.to_string(),
            });
        }

        let trimmed_slashes = trimmed.trim_end_matches('/');
        let mut segments: Vec<&str> = trimmed_slashes.split('/').collect();
        let mut candidate_id = segments.pop().unwrap_or_default().to_string();
        if matches!(candidate_id.to_lowercase().as_str(), "manifest.json" | "manifest") {
            candidate_id = segments.pop().unwrap_or_default().to_string();
        }

        Ok(ResolvedDocument {
            manifest_url: trimmed.to_string(),
            doc_id: candidate_id,
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
    fn passes_through_arbitrary_manifest_url() {
        let resolver = GenericResolver;
        let resolved = resolver
            .resolve("https://example.org/iiif/some-doc/manifest.json")
            .unwrap();
        assert_eq!(resolved.manifest_url, "https://example.org/iiif/some-doc/manifest.json");
        assert_eq!(resolved.doc_id, "some-doc");
    }

    #[test]
    fn rejects_non_url_input() {
        let resolver = GenericResolver;
        assert!(resolver.resolve("Urb.lat.1779").is_err());
    }
}
