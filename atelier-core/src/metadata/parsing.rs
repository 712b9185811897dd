//! Shared parsing utilities for metadata extraction: safe embedded-JSON
//! decoding, graph shape heuristics, the Auto1111 parameter parser, and
//! rating/tag normalization.

use base64::Engine;
use regex::Regex;
use serde_json::{Map, Value};
use std::io::Read;
use std::sync::LazyLock;

pub const MAX_METADATA_JSON_SIZE: usize = 10 * 1024 * 1024;
pub const MAX_DECOMPRESSED_SIZE: usize = 50 * 1024 * 1024;
const MIN_BASE64_CANDIDATE_LEN: usize = 80;

pub const MAX_TAG_LENGTH: usize = 100;
pub const MAX_TAGS: usize = 50;

static BASE64_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/=\s]+$").expect("valid regex"));
static A1111_KV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|,\s*)([^:,]+):\s*").expect("valid regex"));
static A1111_PARAM_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n(?:Steps|Size|Model|Seed|CFG|Sampler|Denoising|Ens|Version):")
        .expect("valid regex")
});

/// Decompress zlib data in chunks, bailing out once the output exceeds the cap.
fn safe_zlib_decompress(data: &[u8], max_size: usize) -> Option<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    let mut chunk = [0u8; 81920];
    loop {
        match decoder.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                out.extend_from_slice(&chunk[..n]);
                if out.len() > max_size {
                    return None;
                }
            }
            Err(_) => return None,
        }
    }
    Some(out)
}

fn loads_object(s: &str) -> Option<Value> {
    let parsed: Value = serde_json::from_str(s).ok()?;
    match parsed {
        Value::Object(_) => Some(parsed),
        // Some exporters double-encode: a JSON string containing the object.
        Value::String(nested) => {
            let inner: Value = serde_json::from_str(&nested).ok()?;
            inner.is_object().then_some(inner)
        }
        _ => None,
    }
}

/// Parse JSON embedded in tag text, handling the common `workflow:`/`prompt:`
/// prefixes and base64(+zlib) wrapping.
pub fn try_parse_json_text(text: &str) -> Option<Value> {
    let mut raw = text.trim();
    if raw.is_empty() {
        return None;
    }

    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("workflow:") {
        raw = raw[9..].trim_start();
    } else if lower.starts_with("prompt:") {
        raw = raw[7..].trim_start();
    } else if lower.starts_with("makeprompt:") {
        raw = raw[11..].trim_start();
    }

    if raw.len() > MAX_METADATA_JSON_SIZE {
        return None;
    }

    if let Some(direct) = loads_object(raw) {
        return Some(direct);
    }

    // Base64 candidate check
    if raw.len() < MIN_BASE64_CANDIDATE_LEN || raw.len() > MAX_METADATA_JSON_SIZE * 2 {
        return None;
    }
    if !BASE64_RE.is_match(raw) {
        return None;
    }

    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let mut decoded = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .ok()?;

    if decoded.starts_with(b"x\x9c") || decoded.starts_with(b"x\xda") {
        if let Some(decompressed) = safe_zlib_decompress(&decoded, MAX_DECOMPRESSED_SIZE) {
            decoded = decompressed;
        }
    }

    let decoded_text = String::from_utf8_lossy(&decoded);
    let decoded_text = decoded_text.trim();
    if decoded_text.is_empty() || decoded_text.len() > MAX_METADATA_JSON_SIZE {
        return None;
    }
    loads_object(decoded_text)
}

/// Try to parse a JSON payload from a tag value. Accepts strings or lists of
/// strings (exiftool splits long values into arrays for some containers).
pub fn parse_json_value(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => try_parse_json_text(s),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .find_map(try_parse_json_text),
        _ => None,
    }
}

/// Accept plain integers or colon-delimited numeric ids (e.g. "91:68").
pub fn looks_like_prompt_node_id(value: &str) -> bool {
    let s = value.trim();
    if s.is_empty() {
        return false;
    }
    s.split(':')
        .filter(|p| !p.is_empty())
        .all(|p| p.chars().all(|c| c.is_ascii_digit()))
        && s.split(':').any(|p| !p.is_empty())
}

/// Heuristic check for an editor-export workflow graph (`nodes: [...]`).
pub fn looks_like_workflow(value: Option<&Value>) -> bool {
    let Some(Value::Object(map)) = value else {
        return false;
    };
    let Some(Value::Array(nodes)) = map.get("nodes") else {
        return false;
    };
    if nodes.is_empty() {
        return false;
    }
    if let Some(links) = map.get("links") {
        if !links.is_array() && !links.is_null() {
            return false;
        }
    }

    let sample: Vec<_> = nodes.iter().take(5).collect();
    let mut valid_nodes = 0;
    for node in &sample {
        let Value::Object(node) = node else { continue };
        if node.contains_key("type") && node.contains_key("id") {
            valid_nodes += 1;
            continue;
        }
        if node.contains_key("id")
            && (node.contains_key("title")
                || node.contains_key("outputs")
                || node.contains_key("inputs"))
        {
            valid_nodes += 1;
        }
    }

    valid_nodes >= (sample.len() / 2).max(1)
}

/// Heuristic check for a runtime prompt graph (dict keyed by numeric node id,
/// nodes with `class_type` + `inputs`).
pub fn looks_like_prompt_graph(value: Option<&Value>) -> bool {
    let Some(Value::Object(map)) = value else {
        return false;
    };
    if map.is_empty() {
        return false;
    }
    // Workflow exports carry `nodes: []`; don't confuse the two shapes.
    if matches!(map.get("nodes"), Some(Value::Array(_))) {
        return false;
    }

    let keys: Vec<_> = map.keys().take(8).collect();
    let mut digit_keys = 0;
    let mut valid_nodes = 0;
    for k in &keys {
        if looks_like_prompt_node_id(k) {
            digit_keys += 1;
        }
        let Some(Value::Object(node)) = map.get(*k) else {
            continue;
        };
        let class_type = node
            .get("class_type")
            .or_else(|| node.get("type"))
            .and_then(Value::as_str);
        let inputs = node.get("inputs").map(Value::is_object).unwrap_or(false);
        if class_type.is_some() && inputs {
            valid_nodes += 1;
        }
    }

    let needed = (keys.len() / 2).max(2);
    digit_keys >= needed && valid_nodes >= needed
}

/// Parsed Auto1111/Forge parameters text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Auto1111Params {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub steps: Option<i64>,
    pub sampler: Option<String>,
    pub cfg: Option<f64>,
    pub seed: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub model: Option<String>,
}

impl Auto1111Params {
    pub fn is_empty(&self) -> bool {
        self.prompt.is_none()
            && self.negative_prompt.is_none()
            && self.steps.is_none()
            && self.sampler.is_none()
            && self.cfg.is_none()
            && self.seed.is_none()
            && self.width.is_none()
            && self.height.is_none()
            && self.model.is_none()
    }
}

/// Parse Auto1111/Forge parameters text into prompt, negative prompt, and the
/// key-value tail.
pub fn parse_auto1111_params(params_text: &str) -> Option<Auto1111Params> {
    let text = params_text.trim();
    if text.is_empty() {
        return None;
    }

    let mut result = Auto1111Params::default();
    let remaining: String;

    const NEG_MARKER: &str = "Negative prompt:";
    if let Some(neg_idx) = text.find(NEG_MARKER) {
        result.prompt = non_empty(text[..neg_idx].trim());
        let after = text[neg_idx + NEG_MARKER.len()..].trim_start();

        // Find where the key-value parameter block starts (e.g. "\nSteps: 20").
        if let Some(m) = A1111_PARAM_START_RE.find(after) {
            result.negative_prompt = non_empty(after[..m.start()].trim());
            remaining = after[m.start()..].trim().to_string();
        } else {
            result.negative_prompt = non_empty(after.trim());
            remaining = String::new();
        }
    } else if let Some(m) = A1111_PARAM_START_RE.find(text) {
        result.prompt = non_empty(text[..m.start()].trim());
        remaining = text[m.start()..].trim().to_string();
    } else if text.starts_with("Steps:") {
        result.prompt = Some(String::new());
        remaining = text.to_string();
    } else {
        result.prompt = non_empty(text);
        remaining = String::new();
    }

    if !remaining.is_empty() {
        let matches: Vec<_> = A1111_KV_RE.captures_iter(&remaining).collect();
        for (i, cap) in matches.iter().enumerate() {
            let key = cap
                .get(1)
                .map(|m| m.as_str().trim().to_ascii_lowercase().replace(' ', "_"))
                .unwrap_or_default();
            if key.is_empty() {
                continue;
            }
            let value_start = cap.get(0).map(|m| m.end()).unwrap_or(0);
            let value_end = matches
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(remaining.len());
            let value = remaining[value_start..value_end]
                .trim()
                .trim_matches(',')
                .trim();

            match key.as_str() {
                "steps" => result.steps = value.parse().ok(),
                "sampler" => result.sampler = non_empty(value),
                "cfg_scale" | "cfg" => result.cfg = value.parse().ok(),
                "seed" => result.seed = value.parse().ok(),
                "size" | "hires_resize" => {
                    if let Some((w, h)) = value.split_once('x') {
                        if let (Ok(w), Ok(h)) = (w.trim().parse(), h.trim().parse()) {
                            result.width = Some(w);
                            result.height = Some(h);
                        }
                    }
                }
                "model" => result.model = non_empty(value),
                _ => {}
            }
        }
    }

    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Normalize rating values to 0..5 stars. Accepts 0..5 directly, 0..100-ish
/// "percent" values (Windows SharedUserRating / RatingPercent), and string
/// numbers. Percent thresholds: 88/63/38/13.
pub fn coerce_rating_to_stars(value: &Value) -> Option<i64> {
    let scalar = match value {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let v: f64 = match scalar {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.replace(',', ".").parse().ok()?
        }
        _ => return None,
    };

    if v <= 5.0 {
        let stars = v.round() as i64;
        return Some(stars.clamp(0, 5));
    }
    Some(if v <= 0.0 {
        0
    } else if v >= 88.0 {
        5
    } else if v >= 63.0 {
        4
    } else if v >= 38.0 {
        3
    } else if v >= 13.0 {
        2
    } else {
        1
    })
}

/// Split a tag blob on the common separators: semicolon (Windows), comma,
/// pipe, and newlines. Deduplicates while keeping order.
pub fn split_tags(text: &str) -> Vec<String> {
    let raw = text.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for chunk in raw.replace('\r', "\n").replace('|', ";").split('\n') {
        for part in chunk.split(';') {
            for tag in part.split(',') {
                let tag = tag.trim();
                if tag.is_empty() || tag.len() > MAX_TAG_LENGTH {
                    continue;
                }
                if seen.insert(tag.to_string()) {
                    out.push(tag.to_string());
                }
            }
        }
    }
    out
}

/// Canonicalize a user/extractor tag list: strip, case-insensitive dedupe,
/// drop empties and over-long entries, cap the count.
pub fn canonicalize_tags(tags: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() || tag.len() > MAX_TAG_LENGTH {
            continue;
        }
        if seen.insert(tag.to_lowercase()) {
            out.push(tag.to_string());
        }
        if out.len() >= MAX_TAGS {
            break;
        }
    }
    out
}

/// Build the normalization map used to match grouped exiftool keys.
///
/// ExifTool with `-G1 -s` yields keys like `XMP-xmp:Rating`; normalize into a
/// few predictable aliases (`xmp-xmp:rating`, `xmp:rating`, `rating`) so OS
/// metadata (Windows Explorer stars/tags) is not missed.
fn build_norm_map(data: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (k, v) in data {
        let kl = k.trim().to_lowercase();
        if kl.is_empty() {
            continue;
        }
        out.entry(kl.clone()).or_insert_with(|| v.clone());
        if let Some((group, tag)) = kl.split_once(':') {
            if !tag.is_empty() {
                out.entry(tag.to_string()).or_insert_with(|| v.clone());
                let group_last = group.rsplit('-').next().unwrap_or("");
                if !group_last.is_empty() && group_last != group {
                    out.entry(format!("{group_last}:{tag}"))
                        .or_insert_with(|| v.clone());
                }
            }
        }
    }
    out
}

const RATING_CANDIDATES: &[&str] = &[
    "xmp:rating",
    "xmp-xmp:rating",
    "microsoft:ratingpercent",
    "xmp-microsoft:ratingpercent",
    "microsoft:shareduserrating",
    "xmp-microsoft:shareduserrating",
    "rating",
    "ratingpercent",
    "shareduserrating",
];

const TAG_CANDIDATES: &[&str] = &[
    "dc:subject",
    "xmp-dc:subject",
    "xmp:subject",
    "iptc:keywords",
    "photoshop:keywords",
    "lr:hierarchicalsubject",
    "microsoft:category",
    "xmp-microsoft:category",
    "xpkeywords",
    "keywords",
    "subject",
    "category",
];

/// Extract rating and tags from an exiftool map, normalizing common grouped
/// key spellings.
pub fn extract_rating_tags(exif_data: Option<&Map<String, Value>>) -> (Option<i64>, Vec<String>) {
    let Some(exif_data) = exif_data else {
        return (None, Vec::new());
    };
    let norm = build_norm_map(exif_data);

    let mut rating = None;
    for key in RATING_CANDIDATES {
        if let Some(value) = norm.get(*key) {
            rating = coerce_rating_to_stars(value);
            if rating.is_some() {
                break;
            }
        }
    }

    let mut tags: Vec<String> = Vec::new();
    for key in TAG_CANDIDATES {
        let Some(value) = norm.get(*key) else { continue };
        match value {
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::String(s) => tags.extend(split_tags(s)),
                        Value::Null => {}
                        other => tags.extend(split_tags(&other.to_string())),
                    }
                }
            }
            Value::String(s) => tags.extend(split_tags(s)),
            Value::Null => {}
            other => tags.extend(split_tags(&other.to_string())),
        }
    }
    // De-dupe while keeping order
    let mut seen = std::collections::HashSet::new();
    tags.retain(|t| seen.insert(t.clone()));
    (rating, tags)
}

/// Priority list for "Date Taken" / "Content Created".
const DATE_CANDIDATES: &[&str] = &[
    "ExifIFD:DateTimeOriginal",
    "ExifIFD:CreateDate",
    "DateTimeOriginal",
    "CreateDate",
    "QuickTime:CreateDate",
    "QuickTime:CreationDate",
    "RIFF:DateTimeOriginal",
    "IPTC:DateCreated",
    "XMP-photoshop:DateCreated",
    "Composite:DateTimeCreated",
];

/// Best candidate for the generation (content creation) time.
pub fn extract_date_created(exif_data: Option<&Map<String, Value>>) -> Option<String> {
    let exif_data = exif_data?;
    for key in DATE_CANDIDATES {
        if let Some(Value::String(s)) = exif_data.get(*key) {
            if !s.is_empty() {
                return Some(s.clone());
            }
        }
    }
    None
}

pub const MODEL_EXTS: &[&str] = &[
    ".safetensors",
    ".ckpt",
    ".pt",
    ".pth",
    ".bin",
    ".gguf",
    ".json",
];

/// Strip directories and known model extensions from a model identifier.
pub fn clean_model_name(value: &str) -> Option<String> {
    let s = value.trim();
    if s.is_empty() {
        return None;
    }
    let s = s.replace('\\', "/");
    let s = s.rsplit('/').next().unwrap_or(&s).to_string();
    let lower = s.to_lowercase();
    for ext in MODEL_EXTS {
        if lower.ends_with(ext) {
            return Some(s[..s.len() - ext.len()].to_string());
        }
    }
    Some(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auto1111_round_trip() {
        let text = "a cat\nNegative prompt: lowres\nSteps: 20, Sampler: Euler a, CFG scale: 7, Seed: 1234567890, Size: 512x512, Model: sd_xl_base.safetensors";
        let parsed = parse_auto1111_params(text).unwrap();
        assert_eq!(parsed.prompt.as_deref(), Some("a cat"));
        assert_eq!(parsed.negative_prompt.as_deref(), Some("lowres"));
        assert_eq!(parsed.steps, Some(20));
        assert_eq!(parsed.sampler.as_deref(), Some("Euler a"));
        assert_eq!(parsed.cfg, Some(7.0));
        assert_eq!(parsed.seed, Some(1234567890));
        assert_eq!(parsed.width, Some(512));
        assert_eq!(parsed.height, Some(512));
        assert_eq!(parsed.model.as_deref(), Some("sd_xl_base.safetensors"));
    }

    #[test]
    fn test_auto1111_no_negative() {
        let text = "a dog\nSteps: 10, Sampler: DPM++ 2M";
        let parsed = parse_auto1111_params(text).unwrap();
        assert_eq!(parsed.prompt.as_deref(), Some("a dog"));
        assert_eq!(parsed.negative_prompt, None);
        assert_eq!(parsed.steps, Some(10));
        assert_eq!(parsed.sampler.as_deref(), Some("DPM++ 2M"));
    }

    #[test]
    fn test_auto1111_plain_text_is_prompt() {
        let parsed = parse_auto1111_params("just a prompt").unwrap();
        assert_eq!(parsed.prompt.as_deref(), Some("just a prompt"));
        assert_eq!(parsed.steps, None);
    }

    #[test]
    fn test_auto1111_empty() {
        assert_eq!(parse_auto1111_params("   "), None);
    }

    #[test]
    fn test_try_parse_json_with_prefix() {
        let parsed = try_parse_json_text("Workflow: {\"nodes\": []}").unwrap();
        assert!(parsed.get("nodes").is_some());
    }

    #[test]
    fn test_try_parse_json_double_encoded() {
        let parsed = try_parse_json_text("\"{\\\"a\\\": 1}\"").unwrap();
        assert_eq!(parsed.get("a").and_then(Value::as_i64), Some(1));
    }

    #[test]
    fn test_try_parse_json_base64() {
        let engine = base64::engine::general_purpose::STANDARD;
        // Pad the payload so it clears the minimum candidate length.
        let payload = json!({"key": "value", "padding": "x".repeat(60)}).to_string();
        let encoded = engine.encode(payload.as_bytes());
        assert!(encoded.len() >= MIN_BASE64_CANDIDATE_LEN);
        let parsed = try_parse_json_text(&encoded).unwrap();
        assert_eq!(parsed.get("key").and_then(Value::as_str), Some("value"));
    }

    #[test]
    fn test_try_parse_json_rejects_garbage() {
        assert!(try_parse_json_text("not json at all").is_none());
        assert!(try_parse_json_text("").is_none());
        assert!(try_parse_json_text("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_prompt_node_ids() {
        assert!(looks_like_prompt_node_id("12"));
        assert!(looks_like_prompt_node_id("91:68"));
        assert!(!looks_like_prompt_node_id("abc"));
        assert!(!looks_like_prompt_node_id(""));
        assert!(!looks_like_prompt_node_id("12:abc"));
    }

    #[test]
    fn test_workflow_shape() {
        let wf = json!({"nodes": [{"type": "KSampler", "id": 3}], "links": []});
        assert!(looks_like_workflow(Some(&wf)));
        assert!(!looks_like_workflow(Some(&json!({"nodes": []}))));
        assert!(!looks_like_workflow(Some(&json!({"a": 1}))));
        assert!(!looks_like_workflow(None));
    }

    #[test]
    fn test_prompt_graph_shape() {
        let graph = json!({
            "3": {"class_type": "KSampler", "inputs": {"seed": 1}},
            "4": {"class_type": "CheckpointLoaderSimple", "inputs": {}},
        });
        assert!(looks_like_prompt_graph(Some(&graph)));
        // Workflow export shape must not match.
        let wf = json!({"nodes": [{"type": "KSampler", "id": 3}]});
        assert!(!looks_like_prompt_graph(Some(&wf)));
        assert!(!looks_like_prompt_graph(Some(&json!({}))));
    }

    #[test]
    fn test_rating_coercion() {
        assert_eq!(coerce_rating_to_stars(&json!(3)), Some(3));
        assert_eq!(coerce_rating_to_stars(&json!(5)), Some(5));
        assert_eq!(coerce_rating_to_stars(&json!("4")), Some(4));
        // Percent-style values
        assert_eq!(coerce_rating_to_stars(&json!(99)), Some(5));
        assert_eq!(coerce_rating_to_stars(&json!(75)), Some(4));
        assert_eq!(coerce_rating_to_stars(&json!(50)), Some(3));
        assert_eq!(coerce_rating_to_stars(&json!(25)), Some(2));
        assert_eq!(coerce_rating_to_stars(&json!(7)), Some(1));
        assert_eq!(coerce_rating_to_stars(&json!([2])), Some(2));
        assert_eq!(coerce_rating_to_stars(&json!(null)), None);
        assert_eq!(coerce_rating_to_stars(&json!("")), None);
    }

    #[test]
    fn test_split_tags_separators() {
        assert_eq!(split_tags("a; b, c|d\ne"), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(split_tags("dup; dup"), vec!["dup"]);
        assert!(split_tags("").is_empty());
    }

    #[test]
    fn test_canonicalize_tags() {
        let tags = vec![
            "Cats".to_string(),
            "cats".to_string(),
            "Fluffy".to_string(),
            " ".to_string(),
        ];
        assert_eq!(canonicalize_tags(&tags), vec!["Cats", "Fluffy"]);

        let long = "x".repeat(MAX_TAG_LENGTH + 1);
        assert!(canonicalize_tags(&[long]).is_empty());

        let many: Vec<String> = (0..80).map(|i| format!("tag{i}")).collect();
        assert_eq!(canonicalize_tags(&many).len(), MAX_TAGS);
    }

    #[test]
    fn test_extract_rating_tags_grouped_keys() {
        let mut exif = Map::new();
        exif.insert("XMP-xmp:Rating".into(), json!(4));
        exif.insert("XMP-dc:Subject".into(), json!(["cat", "fluffy"]));
        let (rating, tags) = extract_rating_tags(Some(&exif));
        assert_eq!(rating, Some(4));
        assert_eq!(tags, vec!["cat", "fluffy"]);
    }

    #[test]
    fn test_extract_rating_percent_key() {
        let mut exif = Map::new();
        exif.insert("XMP-microsoft:RatingPercent".into(), json!(75));
        let (rating, _) = extract_rating_tags(Some(&exif));
        assert_eq!(rating, Some(4));
    }

    #[test]
    fn test_date_priority() {
        let mut exif = Map::new();
        exif.insert("CreateDate".into(), json!("2024:01:02 03:04:05"));
        exif.insert("DateTimeOriginal".into(), json!("2023:12:31 00:00:00"));
        assert_eq!(
            extract_date_created(Some(&exif)).as_deref(),
            Some("2023:12:31 00:00:00")
        );
    }

    #[test]
    fn test_clean_model_name() {
        assert_eq!(
            clean_model_name("models\\sd_xl_base.safetensors").as_deref(),
            Some("sd_xl_base")
        );
        assert_eq!(clean_model_name("a/b/model.ckpt").as_deref(), Some("model"));
        assert_eq!(clean_model_name("plain").as_deref(), Some("plain"));
        assert_eq!(clean_model_name("  "), None);
    }
}
