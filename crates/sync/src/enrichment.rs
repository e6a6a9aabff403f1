//! Manifest catalog enrichment. A pure function combining
//! manifest fields with an optional detail-page scrape; no network IO of
//! its own beyond the detail-page fetch the caller chooses to perform.

use crate::manifest::ParsedManifest;

/// Closed item-type set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Manoscritto,
    LibroAStampa,
    Incunabolo,
    Periodico,
    MusicaSpartito,
    MappaAtlante,
    Miscellanea,
    NonClassificato,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Manoscritto => "manoscritto",
            ItemType::LibroAStampa => "libro a stampa",
            ItemType::Incunabolo => "incunabolo",
            ItemType::Periodico => "periodico",
            ItemType::MusicaSpartito => "musica/spartito",
            ItemType::MappaAtlante => "mappa/atlante",
            ItemType::Miscellanea => "miscellanea",
            ItemType::NonClassificato => "non classificato",
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an item type came from inference or was set by a user. Manual classifications are never overwritten by
/// a later automatic inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemTypeSource {
    Auto,
    Manual,
}

/// Result of combining a parsed manifest with enrichment rules.
#[derive(Debug, Clone)]
pub struct EnrichedMetadata {
    pub shelfmark: Option<String>,
    pub date_label: Option<String>,
    pub language_label: Option<String>,
    pub item_type: ItemType,
    pub source_detail_url: Option<String>,
    pub reference_text: Option<String>,
}

/// Ordered rule table matched against a lowercased concatenation of label,
/// description, and metadata type/genre/format/material/description fields.
const ITEM_TYPE_RULES: &[(&str, ItemType)] = &[
    ("incunab", ItemType::Incunabolo),
    ("musica", ItemType::MusicaSpartito),
    ("spartito", ItemType::MusicaSpartito),
    ("mappa", ItemType::MappaAtlante),
    ("atlante", ItemType::MappaAtlante),
    ("periodico", ItemType::Periodico),
    ("libro a stampa", ItemType::LibroAStampa),
    ("manoscritto", ItemType::Manoscritto),
    ("miscellanea", ItemType::Miscellanea),
];

fn infer_item_type(manifest: &ParsedManifest) -> ItemType {
    let mut haystack = String::new();
    if let Some(label) = &manifest.label {
        haystack.push_str(label);
        haystack.push(' ');
    }
    if let Some(description) = &manifest.description {
        haystack.push_str(description);
        haystack.push(' ');
    }
    for (key, value) in &manifest.metadata {
        let key_lower = key.to_lowercase();
        if matches!(key_lower.as_str(), "type" | "genre" | "format" | "material" | "description") {
            haystack.push_str(value);
            haystack.push(' ');
        }
    }
    let haystack = haystack.to_lowercase();

    ITEM_TYPE_RULES
        .iter()
        .find(|(token, _)| haystack.contains(token))
        .map(|(_, item_type)| *item_type)
        .unwrap_or(ItemType::NonClassificato)
}

/// A candidate URL and its score for source-detail-URL selection.
fn score_candidate(library: &str, url: &str) -> i32 {
    let lower = url.to_lowercase();
    let mut score = 0;

    if library.eq_ignore_ascii_case("Vaticana") && lower.contains("/mss/detail/") {
        score += 320;
    }
    if library.eq_ignore_ascii_case("Gallica") && lower.contains("archivesetmanuscrits.bnf.fr") {
        score += 250;
    }
    if library.eq_ignore_ascii_case("Bodleian") && lower.contains("/objects/") {
        score += 220;
    }
    if lower.contains("oai") {
        score -= 500;
    }
    if lower.contains("search") {
        score -= 160;
    }
    if lower.contains(".thumbnail") || lower.contains(".highres") {
        score -= 90;
    }
    if lower.starts_with("https") {
        score += 1;
    }
    score
}

/// Picks the best source-detail-URL candidate among `seeAlso`, `related`,
/// `homepage`, `rendering`, `service`, and metadata fields.
/// Ties favor `seeAlso` candidates, which are listed first and so win any
/// stable sort by construction.
fn pick_source_detail_url(manifest: &ParsedManifest, library: &str, doc_id: &str) -> Option<String> {
    let mut candidates: Vec<String> = manifest.see_also_urls.clone();
    if let Some(candidate) = &manifest.source_detail_url_candidate {
        if !candidates.contains(candidate) {
            candidates.push(candidate.clone());
        }
    }

    let best = candidates
        .into_iter()
        .max_by_key(|url| score_candidate(library, url));

    best.or_else(|| {
        if library.eq_ignore_ascii_case("Vaticana") {
            Some(format!("https://digi.vatlib.it/mss/detail/{doc_id}"))
        } else {
            None
        }
    })
}

/// Derives a catalog record from a parsed manifest.
/// `prior_item_type` carries forward an existing manual classification so
/// it is never overwritten by automatic inference.
pub fn enrich(
    manifest: &ParsedManifest,
    doc_id: &str,
    library: &str,
    prior_item_type: Option<(ItemType, ItemTypeSource)>,
) -> EnrichedMetadata {
    let shelfmark = manifest
        .shelfmark
        .clone()
        .or_else(|| Some(doc_id.to_string()));

    let item_type = match prior_item_type {
        Some((item_type, ItemTypeSource::Manual)) => item_type,
        _ => infer_item_type(manifest),
    };

    EnrichedMetadata {
        shelfmark,
        date_label: manifest.date_label.clone(),
        language_label: manifest.language_label.clone(),
        item_type,
        source_detail_url: pick_source_detail_url(manifest, library, doc_id),
        reference_text: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::parse_manifest;
    use serde_json::json;

    fn sample_manifest(label: &str, metadata: serde_json::Value) -> ParsedManifest {
        parse_manifest(&json!({ "label": label, "metadata": metadata }))
    }

    #[test]
    fn infers_incunabolo_over_manoscritto() {
        let manifest = sample_manifest(
            "Test",
            json!([{"label": "Type", "value": "incunabolo manoscritto"}]),
        );
        let enriched = enrich(&manifest, "doc1", "Vaticana", None);
        assert_eq!(enriched.item_type, ItemType::Incunabolo);
    }

    #[test]
    fn manual_classification_is_never_overwritten() {
        let manifest = sample_manifest("Test", json!([{"label": "Type", "value": "incunabolo"}]));
        let enriched = enrich(
            &manifest,
            "doc1",
            "Vaticana",
            Some((ItemType::Manoscritto, ItemTypeSource::Manual)),
        );
        assert_eq!(enriched.item_type, ItemType::Manoscritto);
    }

    #[test]
    fn unrecognized_manifest_is_non_classificato() {
        let manifest = sample_manifest("Nothing special", json!([]));
        let enriched = enrich(&manifest, "doc1", "Gallica", None);
        assert_eq!(enriched.item_type, ItemType::NonClassificato);
    }

    #[test]
    fn vatican_detail_url_is_derived_when_absent() {
        let manifest = sample_manifest("Test", json!([]));
        let enriched = enrich(&manifest, "MSS_Urb.lat.1779", "Vaticana", None);
        assert_eq!(
            enriched.source_detail_url.as_deref(),
            Some("https://digi.vatlib.it/mss/detail/MSS_Urb.lat.1779")
        );
    }

    #[test]
    fn oai_candidate_loses_to_mss_detail_candidate() {
        assert!(score_candidate("Vaticana", "https://digi.vatlib.it/mss/detail/x") > score_candidate("Vaticana", "https://oai.example.org/record/x"));
    }

    #[test]
    fn shelfmark_falls_back_to_doc_id() {
        let manifest = sample_manifest("Test", json!([]));
        let enriched = enrich(&manifest, "doc123", "Gallica", None);
        assert_eq!(enriched.shelfmark.as_deref(), Some("doc123"));
    }
}
