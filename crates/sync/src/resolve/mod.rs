//! Resolver registry: a closed table of keyword/constructor pairs plus a
//! default entry, rather than a class hierarchy of resolvers.

mod bodleian;
mod gallica;
mod generic;
mod institut;
mod vatican;

use crate::error::ResolverError;

pub use bodleian::BodleianResolver;
pub use gallica::GallicaResolver;
pub use generic::GenericResolver;
pub use institut::InstitutResolver;
pub use vatican::VaticanResolver;
pub use vatican::normalize_shelfmark as vatican_normalize_shelfmark;

/// A resolved manifest URL plus the document id the rest of the system will
/// key the manuscript row on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDocument {
    pub manifest_url: String,
    pub doc_id: String,
}

pub trait Resolver: Send + Sync {
    fn can_resolve(&self, input: &str) -> bool;
    fn resolve(&self, input: &str) -> Result<ResolvedDocument, ResolverError>;
    fn library_name(&self) -> &'static str;
}

type Constructor = fn() -> Box<dyn Resolver>;

/// Keyword, constructor pairs matched by case-insensitive substring against
/// the library name.
const REGISTRY: &[(&[&str], Constructor)] = &[
    (&["vatican", "vaticana"], || Box::new(VaticanResolver)),
    (&["gallica", "bnf"], || Box::new(GallicaResolver)),
    (&["institut", "bibnum"], || Box::new(InstitutResolver)),
    (&["oxford", "bodleian"], || Box::new(BodleianResolver)),
];

/// Selects a resolver for `library_name`, falling back to the generic
/// URL-passthrough resolver for anything unrecognized.
pub fn resolver_for(library_name: &str) -> Box<dyn Resolver> {
    let lowered = library_name.to_lowercase();
    for (keywords, constructor) in REGISTRY {
        if keywords.iter().any(|k| lowered.contains(k)) {
            return constructor();
        }
    }
    Box::new(GenericResolver)
}

/// Resolves `input` against the resolver selected for `library_name`.
pub fn resolve(library_name: &str, input: &str) -> Result<ResolvedDocument, ResolverError> {
    resolver_for(library_name).resolve(input.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_library_falls_back_to_generic() {
        let resolver = resolver_for("Some Obscure Archive");
        assert_eq!(resolver.library_name(), "Local");
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        assert_eq!(resolver_for("VATICANA (BAV)").library_name(), "Vaticana");
        assert_eq!(resolver_for("gallica (bnf)").library_name(), "Gallica");
        assert_eq!(resolver_for("Institut de France").library_name(), "Institut de France");
        assert_eq!(resolver_for("Bodleian Library").library_name(), "Bodleian");
    }
}
