//! Vatican Library resolver: shelfmark normalization and recognition
//! (`normalize_shelfmark`) for the Biblioteca Apostolica Vaticana's
//! `MSS_<Coll>.<n>`-style identifiers.

use regex::Regex;
use std::sync::LazyLock;

use super::{ResolvedDocument, Resolver};
use crate::error::ResolverError;

const LIBRARY: &str = "Vaticana";

static SHELF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?xi)
        ^(?:MSS[_\s\-]*)?
        (?P<coll>vat|urb|pal|reg|barb|ott|borg|arch|cap)
        [\s._\-:]*(?P<series>lat|gr)?[\s._\-:]*
        (?P<number>\d+)$
        ",
    )
    .expect("static Vatican shelfmark regex is valid")
});

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("static UUID regex is valid")
});

static VIEWER_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"digi\.vatlib\.it/iiif/(?P<id>[^/]+)/manifest\.json")
        .expect("static Vatican viewer URL regex is valid")
});

/// Normalizes a Vatican shelfmark to `MSS_<Coll>.<series>.<n>` or
/// `MSS_<Coll>.<n>`. A UUID-shaped input is explicitly rejected naming
/// Oxford/Bodleian, since a bare UUID identifies a Bodleian object instead.
pub fn normalize_shelfmark(raw: &str) -> Result<String, ResolverError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ResolverError::EmptyInput { library: LIBRARY });
    }

    if UUID_RE.is_match(trimmed) {
        return Err(ResolverError::WrongLibrary {
            input: trimmed.to_string(),
            requested_library: LIBRARY,
            actual_library: "Oxford (Bodleian)",
        });
    }

    let without_prefix = Regex::new(r"(?i)^MSS[_\s\-]*")
        .expect("static MSS prefix regex is valid")
        .replace(trimmed, "");
    let collapsed = Regex::new(r"\s+")
        .expect("static whitespace regex is valid")
        .replace_all(&without_prefix, " ");
    let candidate = collapsed.replace(['.', '/'], " ");
    let candidate = candidate.trim();

    let captures = SHELF_RE
        .captures(candidate)
        .ok_or_else(|| ResolverError::UnrecognizedInput {
            library: LIBRARY,
            input: raw.to_string(),
        })?;

    let mut coll = captures["coll"].to_string();
    coll.get_mut(0..1).map(|c| c.make_ascii_uppercase());
    let number = &captures["number"];

    Ok(match captures.name("series") {
        Some(series) => format!("MSS_{coll}.{}.{number}", series.as_str().to_lowercase()),
        None => format!("MSS_{coll}.{number}"),
    })
}

pub struct VaticanResolver;

impl Resolver for VaticanResolver {
    fn can_resolve(&self, input: &str) -> bool {
        let trimmed = input.trim();
        trimmed.contains("digi.vatlib.it")
            || trimmed.to_uppercase().starts_with("MSS_")
            || SHELF_RE.is_match(trimmed)
    }

    fn resolve(&self, input: &str) -> Result<ResolvedDocument, ResolverError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ResolverError::EmptyInput { library: LIBRARY });
        }

        if trimmed.contains("digi.vatlib.it") {
            if let Some(captures) = VIEWER_ID_RE.captures(trimmed) {
                let doc_id = captures["id"].to_string();
                return Ok(ResolvedDocument {
                    manifest_url: trimmed.to_string(),
                    doc_id,
                });
            }
            let doc_id = trimmed
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or(trimmed)
                .to_string();
            return Ok(ResolvedDocument {
                manifest_url: format!("https://digi.vatlib.it/iiif/{doc_id}/manifest.json"),
                doc_id,
            });
        }

        let doc_id = normalize_shelfmark(trimmed)?;
        Ok(ResolvedDocument {
            manifest_url: format!("https://digi.vatlib.it/iiif/{doc_id}/manifest.json"),
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
    fn normalizes_dotted_shelfmark() {
        assert_eq!(normalize_shelfmark("Urb. lat. 1779").unwrap(), "MSS_Urb.lat.1779");
    }

    #[test]
    fn normalizes_space_separated_shelfmark() {
        assert_eq!(normalize_shelfmark("urb lat 1779").unwrap(), "MSS_Urb.lat.1779");
    }

    #[test]
    fn normalizes_shelfmark_without_series() {
        assert_eq!(normalize_shelfmark("Vat 123").unwrap(), "MSS_Vat.123");
    }

    #[test]
    fn uuid_input_names_oxford() {
        let err = normalize_shelfmark("080f88f5-7586-4b8a-8064-63ab3495393c").unwrap_err();
        assert!(err.to_string().contains("Oxford"));
    }

    #[test]
    fn resolves_full_shelfmark_to_manifest_url() {
        let resolver = VaticanResolver;
        let resolved = resolver.resolve("Urb. lat. 1779").unwrap();
        assert_eq!(
            resolved.manifest_url,
            "https://digi.vatlib.it/iiif/MSS_Urb.lat.1779/manifest.json"
        );
        assert_eq!(resolved.doc_id, "MSS_Urb.lat.1779");
    }

    #[test]
    fn resolves_viewer_url() {
        let resolver = VaticanResolver;
        let resolved = resolver
            .resolve("https://digi.vatlib.it/iiif/MSS_Vat.lat.3225/manifest.json")
            .unwrap();
        assert_eq!(resolved.doc_id, "MSS_Vat.lat.3225");
    }

    #[test]
    fn rejects_garbage_input() {
        let resolver = VaticanResolver;
        assert!(resolver.resolve("not a shelfmark at all").is_err());
    }
}
