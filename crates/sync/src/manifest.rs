//! IIIF v2/v3 manifest parsing and label normalization.

use serde_json::Value;

/// Every IIIF label/value shape collapses to this canonical form before any
/// downstream code sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedValue {
    Empty,
    Text(String),
}

impl NormalizedValue {
    pub fn as_option(&self) -> Option<&str> {
        match self {
            NormalizedValue::Empty => None,
            NormalizedValue::Text(s) => Some(s.as_str()),
        }
    }

    pub fn into_option(self) -> Option<String> {
        match self {
            NormalizedValue::Empty => None,
            NormalizedValue::Text(s) => Some(s),
        }
    }
}

/// Generic site chrome that must be treated as empty even if present.
const GENERIC_TITLE_NEEDLES: [&str; 4] = ["digivatlib", "gallica", "advancedsearch", "untitled"];

fn is_generic_title(s: &str) -> bool {
    let compact: String = s
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    if compact.is_empty() {
        return true;
    }
    GENERIC_TITLE_NEEDLES.iter().any(|needle| compact == *needle)
}

/// Normalizes a IIIF label/value field that may appear as: a bare string; a
/// list of strings; a list of language-tagged dicts (`{"@value", "@language"}`);
/// or a v3 language map (`{"en": ["..."], ...}`). Joins multi-value lists
/// with " | " and returns the first nonempty result.
pub fn normalize_label_value(value: &Value) -> NormalizedValue {
    let text = match value {
        Value::Null => return NormalizedValue::Empty,
        Value::String(s) => s.clone(),
        Value::Array(items) => join_array(items),
        Value::Object(map) => {
            // v3 language map: {"en": ["a", "b"], "none": ["c"]}
            if map.values().all(|v| v.is_array() || v.is_string() || v.is_null()) {
                join_language_map(map)
            } else if let Some(v) = map.get("@value") {
                return normalize_label_value(v);
            } else {
                return NormalizedValue::Empty;
            }
        }
        _ => return NormalizedValue::Empty,
    };

    let trimmed = text.trim();
    if trimmed.is_empty() || is_generic_title(trimmed) {
        NormalizedValue::Empty
    } else {
        NormalizedValue::Text(trimmed.to_string())
    }
}

fn join_array(items: &[Value]) -> String {
    let parts: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get("@value")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            _ => None,
        })
        .filter(|s| !s.trim().is_empty())
        .collect();
    parts.join(" | ")
}

fn join_language_map(map: &serde_json::Map<String, Value>) -> String {
    let mut parts = Vec::new();
    for v in map.values() {
        match v {
            Value::Array(items) => {
                for item in items {
                    if let Value::String(s) = item {
                        if !s.trim().is_empty() {
                            parts.push(s.clone());
                        }
                    }
                }
            }
            Value::String(s) if !s.trim().is_empty() => parts.push(s.clone()),
            _ => {}
        }
    }
    parts.join(" | ")
}

/// One logical page within a manifest.
#[derive(Debug, Clone)]
pub struct Canvas {
    pub index: usize,
    pub service_base_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub label: Option<String>,
}

/// Everything the download engine, catalog enrichment and job manager need
/// from a parsed manifest.
#[derive(Debug, Clone)]
pub struct ParsedManifest {
    pub label: Option<String>,
    pub description: Option<String>,
    pub attribution: Option<String>,
    pub canvases: Vec<Canvas>,
    pub metadata: Vec<(String, String)>,
    pub see_also_urls: Vec<String>,
    pub source_detail_url_candidate: Option<String>,
    pub shelfmark: Option<String>,
    pub date_label: Option<String>,
    pub language_label: Option<String>,
    pub raw: Value,
}

pub fn parse_manifest(raw: &Value) -> ParsedManifest {
    let label = raw.get("label").map(normalize_label_value).and_then(|v| v.into_option());
    let description = raw
        .get("description")
        .map(normalize_label_value)
        .and_then(|v| v.into_option());
    let attribution = raw
        .get("attribution")
        .or_else(|| raw.get("requiredStatement"))
        .map(normalize_label_value)
        .and_then(|v| v.into_option());

    let metadata = parse_metadata(raw.get("metadata"));
    let canvases = enumerate_canvases(raw);
    let see_also_urls = collect_url_field(raw.get("seeAlso"));

    let shelfmark = ["shelfmark", "collocation", "segnatura"]
        .iter()
        .find_map(|wanted| metadata.iter().find(|(k, _)| k.to_lowercase() == *wanted).map(|(_, v)| v.clone()));
    let date_label = metadata
        .iter()
        .find(|(k, _)| k.to_lowercase().contains("date"))
        .map(|(_, v)| v.clone());
    let language_label = metadata
        .iter()
        .find(|(k, _)| k.to_lowercase().contains("language"))
        .map(|(_, v)| v.clone());

    let source_detail_url_candidate = pick_first_detail_candidate(raw, &see_also_urls);

    ParsedManifest {
        label,
        description,
        attribution,
        canvases,
        metadata,
        see_also_urls,
        source_detail_url_candidate,
        shelfmark,
        date_label,
        language_label,
        raw: raw.clone(),
    }
}

fn parse_metadata(metadata: Option<&Value>) -> Vec<(String, String)> {
    let Some(Value::Array(entries)) = metadata else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let label = entry.get("label").map(normalize_label_value)?.into_option()?;
            let value = entry
                .get("value")
                .map(normalize_label_value)
                .and_then(|v| v.into_option())
                .unwrap_or_default();
            Some((label, value))
        })
        .collect()
}

/// Reads `sequences[0].canvases[]` (v2) or `items[]` (v3), resolving each
/// canvas's IIIF Image API service base URL.
fn enumerate_canvases(raw: &Value) -> Vec<Canvas> {
    let entries: &[Value] = if let Some(Value::Array(sequences)) = raw.get("sequences") {
        if let Some(first) = sequences.first() {
            match first.get("canvases") {
                Some(Value::Array(canvases)) if !canvases.is_empty() => canvases,
                _ => &[],
            }
        } else {
            &[]
        }
    } else if let Some(Value::Array(items)) = raw.get("items") {
        items
    } else {
        &[]
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, canvas)| Canvas {
            index,
            service_base_url: resolve_canvas_service_base_url(canvas),
            thumbnail_url: extract_thumbnail(canvas),
            label: canvas
                .get("label")
                .map(normalize_label_value)
                .and_then(|v| v.into_option()),
        })
        .collect()
}

/// Follows `images[0]` (v2) / `items[0]` (v3), descending into
/// `resource`/`body` if the entry is an annotation, then reads `service`
/// (itself possibly a list) for `@id`/`id`. Degrades to stripping
/// `/full/...` off the resource id when no service is present.
fn resolve_canvas_service_base_url(canvas: &Value) -> Option<String> {
    let image_entries = canvas
        .get("images")
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty())
        .or_else(|| canvas.get("items").and_then(Value::as_array))?;
    let first = image_entries.first()?;

    let resource = descend_to_resource(first);

    if let Some(service) = resource.get("service") {
        let service_obj = match service {
            Value::Array(list) => list.first()?,
            other => other,
        };
        if let Some(id) = service_obj
            .get("@id")
            .or_else(|| service_obj.get("id"))
            .and_then(Value::as_str)
        {
            return Some(id.trim_end_matches('/').to_string());
        }
    }

    let resource_id = resource
        .get("@id")
        .or_else(|| resource.get("id"))
        .and_then(Value::as_str)?;
    if let Some(stripped) = resource_id.split("/full/").next() {
        Some(stripped.trim_end_matches('/').to_string())
    } else {
        Some(resource_id.to_string())
    }
}

/// If `entry` looks like an annotation (has `@type`/`type` containing
/// "Annotation"), descend into `resource` (v2) or `body` (v3); otherwise the
/// entry itself is the resource (e.g. a v3 item nested one level deeper).
fn descend_to_resource(entry: &Value) -> &Value {
    let kind = entry
        .get("@type")
        .or_else(|| entry.get("type"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if kind.contains("Annotation") {
        if let Some(resource) = entry.get("resource") {
            return descend_to_resource_inner(resource);
        }
        if let Some(body) = entry.get("body") {
            return descend_to_resource_inner(body);
        }
    }
    // v3 canvases nest items[].items[].body three levels deep; walk down
    // through nested "items" arrays of length 1 looking for a body/resource.
    if let Some(Value::Array(inner)) = entry.get("items") {
        if let Some(first) = inner.first() {
            return descend_to_resource(first);
        }
    }
    entry
}

fn descend_to_resource_inner(v: &Value) -> &Value {
    v
}

fn extract_thumbnail(canvas: &Value) -> Option<String> {
    match canvas.get("thumbnail")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("@id")
            .or_else(|| map.get("id"))
            .and_then(Value::as_str)
            .map(String::from),
        Value::Array(list) => list.first().and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get("@id")
                .or_else(|| map.get("id"))
                .and_then(Value::as_str)
                .map(String::from),
            _ => None,
        }),
        _ => None,
    }
}

fn collect_url_field(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Object(map)) => map
            .get("@id")
            .or_else(|| map.get("id"))
            .and_then(Value::as_str)
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => map
                    .get("@id")
                    .or_else(|| map.get("id"))
                    .and_then(Value::as_str)
                    .map(String::from),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn pick_first_detail_candidate(raw: &Value, see_also: &[String]) -> Option<String> {
    if let Some(first) = see_also.first() {
        return Some(first.clone());
    }
    for key in ["related", "homepage", "rendering"] {
        if let Some(urls) = collect_url_field(raw.get(key)).into_iter().next() {
            return Some(urls);
        }
    }
    None
}
