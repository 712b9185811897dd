//! Per-kind metadata extractors producing a normalized record.
//!
//! Each extractor takes pre-fetched tag-reader / media-probe payloads and
//! returns a record dict with a `quality` tag. Embedded workflow/prompt
//! payloads are discovered via strict shape checks only.

use super::parsing::{
    extract_date_created, extract_rating_tags, looks_like_prompt_graph, looks_like_workflow,
    parse_auto1111_params, parse_json_value, try_parse_json_text, Auto1111Params,
};
use crate::error::{AtelierError, Quality};
use crate::geninfo::parse_geninfo_from_prompt;
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::warn;

/// A normalized metadata record: the raw/interpreted field map plus its
/// completeness tag (also mirrored under `data["quality"]`).
#[derive(Debug, Clone)]
pub struct MetadataRecord {
    pub data: Map<String, Value>,
    pub quality: Quality,
}

impl MetadataRecord {
    pub fn new(quality: Quality) -> Self {
        let mut data = Map::new();
        data.insert("quality".into(), json!(quality.as_str()));
        Self { data, quality }
    }

    pub fn bump_quality(&mut self, quality: Quality) {
        self.quality.bump(quality);
        self.data
            .insert("quality".into(), json!(self.quality.as_str()));
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        match self.data.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        match self.data.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn width(&self) -> Option<i64> {
        self.get_i64("width")
    }

    pub fn height(&self) -> Option<i64> {
        self.get_i64("height")
    }

    pub fn duration(&self) -> Option<f64> {
        self.get_f64("duration")
    }

    pub fn rating(&self) -> Option<i64> {
        self.get_i64("rating")
    }

    pub fn tags(&self) -> Vec<String> {
        self.data
            .get("tags")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn apply_auto1111(record: &mut MetadataRecord, parsed: &Auto1111Params) {
    if let Some(v) = &parsed.prompt {
        record.set("prompt", json!(v));
    }
    if let Some(v) = &parsed.negative_prompt {
        record.set("negative_prompt", json!(v));
    }
    if let Some(v) = parsed.steps {
        record.set("steps", json!(v));
    }
    if let Some(v) = &parsed.sampler {
        record.set("sampler", json!(v));
    }
    if let Some(v) = parsed.cfg {
        record.set("cfg", json!(v));
    }
    if let Some(v) = parsed.seed {
        record.set("seed", json!(v));
    }
    if let Some(v) = parsed.width {
        record.set("width", json!(v));
    }
    if let Some(v) = parsed.height {
        record.set("height", json!(v));
    }
    if let Some(v) = &parsed.model {
        record.set("model", json!(v));
    }
}

/// Some pipelines embed a wrapper object like `{"workflow": {...},
/// "prompt": "{...json...}"}` inside a single tag. Only return values that
/// match the expected shapes.
fn unwrap_workflow_prompt_container(container: &Value) -> (Option<Value>, Option<Value>) {
    let Some(map) = container.as_object() else {
        return (None, None);
    };
    let wf = map.get("workflow").or_else(|| map.get("Workflow"));
    let pr = map.get("prompt").or_else(|| map.get("Prompt"));

    let wf_out = wf.filter(|v| looks_like_workflow(Some(v))).cloned();
    let pr_out = match pr {
        Some(v) if looks_like_prompt_graph(Some(v)) => Some(v.clone()),
        Some(Value::String(s)) => {
            // Prompt can be a JSON string literal.
            try_parse_json_text(s).filter(|p| looks_like_prompt_graph(Some(p)))
        }
        _ => None,
    };
    (wf_out, pr_out)
}

/// Optimized scan of tag metadata for workflow/prompt JSON fields. Known
/// payload keys are inspected before the rest to avoid expensive decode work
/// on thousands of irrelevant tags.
pub fn extract_json_fields(tag_data: &Map<String, Value>) -> (Option<Value>, Option<Value>) {
    const PRIORITY_KEYS: &[&str] = &[
        "UserComment",
        "Comment",
        "Description",
        "ImageDescription",
        "Parameters",
        "Workflow",
        "Prompt",
        "ExifOffset",
        "Make",
        "Model",
    ];
    let is_priority = |k: &str| {
        let kl = k.to_ascii_lowercase();
        PRIORITY_KEYS.iter().any(|pk| kl.contains(&pk.to_ascii_lowercase()))
    };

    let mut sorted_items: Vec<(&String, &Value)> = tag_data.iter().collect();
    sorted_items.sort_by_key(|(k, _)| if is_priority(k) { 0 } else { 1 });

    let mut workflow: Option<Value> = None;
    let mut prompt: Option<Value> = None;

    for (key, value) in sorted_items {
        if workflow.is_some() && prompt.is_some() {
            break;
        }
        // Skip obviously short strings.
        if value.as_str().map(|s| s.len() < 10).unwrap_or(false) {
            continue;
        }
        let Some(parsed) = parse_json_value(value) else {
            continue;
        };

        let (wf_candidate, pr_candidate) = unwrap_workflow_prompt_container(&parsed);
        if workflow.is_none() {
            workflow = wf_candidate;
        }
        if prompt.is_none() {
            prompt = pr_candidate;
        }
        if workflow.is_some() && prompt.is_some() {
            break;
        }

        if workflow.is_none() && looks_like_workflow(Some(&parsed)) {
            workflow = Some(parsed.clone());
        }
        if prompt.is_none() && looks_like_prompt_graph(Some(&parsed)) {
            prompt = Some(parsed.clone());
        }

        // Prefixed payloads ("workflow: {...}") or key-name hints.
        if let Some(text) = value.as_str() {
            let text_lower = text.trim().to_ascii_lowercase();
            let key_lower = key.to_ascii_lowercase();
            if workflow.is_none()
                && (text_lower.starts_with("workflow:") || key_lower.contains("workflow"))
                && looks_like_workflow(Some(&parsed))
            {
                workflow = Some(parsed.clone());
            }
            if prompt.is_none()
                && (text_lower.starts_with("prompt:") || key_lower.contains("prompt"))
                && looks_like_prompt_graph(Some(&parsed))
            {
                prompt = Some(parsed);
            }
        }
    }

    (workflow, prompt)
}

/// Rebuild a minimum parameter set from a workflow-only export (no prompt
/// graph): the graph parser handles the LiteGraph shape, and its fields are
/// mapped back onto the flat record keys.
fn reconstruct_params_from_workflow(workflow: &Value) -> Option<Map<String, Value>> {
    let parsed = parse_geninfo_from_prompt(None, Some(workflow)).ok()??;
    let mut out = Map::new();
    if let Some(v) = parsed.pointer("/positive/value") {
        out.insert("prompt".into(), v.clone());
    }
    if let Some(v) = parsed.pointer("/negative/value") {
        out.insert("negative_prompt".into(), v.clone());
    }
    if let Some(v) = parsed.pointer("/steps/value") {
        out.insert("steps".into(), v.clone());
    }
    if let Some(v) = parsed.pointer("/sampler/name") {
        out.insert("sampler".into(), v.clone());
    }
    if let Some(v) = parsed.pointer("/cfg/value") {
        out.insert("cfg".into(), v.clone());
    }
    if let Some(v) = parsed.pointer("/seed/value") {
        out.insert("seed".into(), v.clone());
    }
    if let Some(v) = parsed.pointer("/size/width") {
        out.insert("width".into(), v.clone());
    }
    if let Some(v) = parsed.pointer("/size/height") {
        out.insert("height".into(), v.clone());
    }
    if let Some(v) = parsed.pointer("/checkpoint/name") {
        out.insert("model".into(), v.clone());
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Apply workflow/prompt graphs plus rating/tags/date into a record.
fn apply_common_tag_fields(
    record: &mut MetadataRecord,
    tag_data: &Map<String, Value>,
    workflow: Option<Value>,
    prompt: Option<Value>,
) {
    let (mut wf, mut pr) = (workflow, prompt);
    if wf.is_none() || pr.is_none() {
        let (scanned_wf, scanned_pr) = extract_json_fields(tag_data);
        if wf.is_none() {
            wf = scanned_wf;
        }
        if pr.is_none() {
            pr = scanned_pr;
        }
    }

    if let Some(wf) = wf.filter(|w| looks_like_workflow(Some(w))) {
        record.set("workflow", wf);
        record.bump_quality(Quality::Full);
    }
    if let Some(pr) = pr.filter(|p| looks_like_prompt_graph(Some(p))) {
        record.set("prompt", pr);
        if record.quality != Quality::Full {
            record.bump_quality(Quality::Partial);
        }
    }

    // Workflow-only exports: rebuild a minimum parameter set.
    if record.get("workflow").is_some() && record.get("parameters").is_none() {
        let workflow = record.get("workflow").cloned();
        if let Some(reconstructed) = workflow.as_ref().and_then(reconstruct_params_from_workflow) {
            for (k, v) in reconstructed {
                record.data.entry(k).or_insert(v);
            }
            record.bump_quality(Quality::Partial);
        }
    }

    let (rating, tags) = extract_rating_tags(Some(tag_data));
    if let Some(rating) = rating {
        record.set("rating", json!(rating));
    }
    if !tags.is_empty() {
        record.set("tags", json!(tags));
    }

    if let Some(date) = extract_date_created(Some(tag_data)) {
        record.set("generation_time", json!(date));
    }
}

/// Dimensions from generic image tag keys, when the Auto1111 tail didn't
/// provide them.
fn apply_image_dimensions(record: &mut MetadataRecord, tag_data: &Map<String, Value>) {
    if record.width().is_some() && record.height().is_some() {
        return;
    }
    let dim = |names: &[&str]| -> Option<i64> {
        for name in names {
            for (k, v) in tag_data {
                if k == name || k.ends_with(&format!(":{name}")) {
                    if let Some(n) = v.as_i64() {
                        return Some(n);
                    }
                    if let Some(s) = v.as_str() {
                        if let Ok(n) = s.parse() {
                            return Some(n);
                        }
                    }
                }
            }
        }
        None
    };
    let width = dim(&["ImageWidth", "ExifImageWidth"]);
    let height = dim(&["ImageHeight", "ExifImageHeight"]);
    if let (Some(w), Some(h)) = (width, height) {
        record.set("width", json!(w));
        record.set("height", json!(h));
    }
}

/// Extract PNG metadata: `PNG:Parameters` carries Auto1111 text; graphs are
/// discovered from the generic tag scan.
pub fn extract_png_metadata(
    path: &Path,
    tag_data: Option<&Map<String, Value>>,
) -> crate::Result<MetadataRecord> {
    if !path.exists() {
        return Err(AtelierError::NotFound(format!(
            "File not found: {}",
            path.display()
        )));
    }

    let mut record = MetadataRecord::new(Quality::None);
    let Some(tag_data) = tag_data else {
        return Ok(record);
    };
    record.set("raw", Value::Object(tag_data.clone()));

    let png_params = tag_data
        .iter()
        .find(|(k, _)| k.as_str() == "PNG:Parameters" || k.ends_with(":Parameters"))
        .and_then(|(_, v)| v.as_str());
    if let Some(params) = png_params {
        record.set("parameters", json!(params));
        record.bump_quality(Quality::Partial);
        if let Some(parsed) = parse_auto1111_params(params) {
            apply_auto1111(&mut record, &parsed);
        }
    }

    apply_common_tag_fields(&mut record, tag_data, None, None);
    apply_image_dimensions(&mut record, tag_data);
    Ok(record)
}

/// Extract WEBP metadata. Workflow/prompt JSON may live in EXIF:Make/Model or
/// description fields, sometimes with `Workflow:`/`Prompt:` prefixes, and
/// Auto1111 text can hide in description tags.
pub fn extract_webp_metadata(
    path: &Path,
    tag_data: Option<&Map<String, Value>>,
) -> crate::Result<MetadataRecord> {
    if !path.exists() {
        return Err(AtelierError::NotFound(format!(
            "File not found: {}",
            path.display()
        )));
    }

    let mut record = MetadataRecord::new(Quality::None);
    let Some(tag_data) = tag_data else {
        return Ok(record);
    };
    record.set("raw", Value::Object(tag_data.clone()));

    let inspect = |keys: &[&str]| -> Option<Value> {
        keys.iter()
            .find_map(|k| tag_data.get(*k).and_then(|v| parse_json_value(v)))
    };

    let mut workflow: Option<Value> = None;
    let mut prompt: Option<Value> = None;

    let potential_workflow = inspect(&["EXIF:Make", "IFD0:Make", "Keys:Workflow", "comfyui:workflow"]);
    let potential_prompt = inspect(&["EXIF:Model", "IFD0:Model", "Keys:Prompt", "comfyui:prompt"]);

    // Cross-check: sometimes the prompt graph sits in the workflow tag and
    // vice versa.
    if let Some(candidate) = potential_workflow {
        if looks_like_workflow(Some(&candidate)) {
            workflow = Some(candidate);
        } else if looks_like_prompt_graph(Some(&candidate)) {
            prompt = Some(candidate);
        }
    }
    if let Some(candidate) = potential_prompt {
        if prompt.is_none() && looks_like_prompt_graph(Some(&candidate)) {
            prompt = Some(candidate);
        } else if workflow.is_none() && looks_like_workflow(Some(&candidate)) {
            workflow = Some(candidate);
        }
    }

    if workflow.is_none() || prompt.is_none() {
        let (scanned_wf, scanned_pr) = extract_json_fields(tag_data);
        if workflow.is_none() {
            workflow = scanned_wf;
        }
        if prompt.is_none() {
            prompt = scanned_pr;
        }
    }

    // Auto1111 text or prefixed JSON in description fields.
    const TEXT_KEYS: &[&str] = &[
        "EXIF:ImageDescription",
        "IFD0:ImageDescription",
        "ImageDescription",
        "EXIF:UserComment",
        "IFD0:UserComment",
        "UserComment",
        "EXIF:Comment",
        "IFD0:Comment",
        "EXIF:Subject",
        "IFD0:Subject",
    ];
    for key in TEXT_KEYS {
        let Some(candidate) = tag_data.get(*key).and_then(Value::as_str) else {
            continue;
        };
        if let Some(parsed) = try_parse_json_text(candidate) {
            if workflow.is_none() && looks_like_workflow(Some(&parsed)) {
                workflow = Some(parsed);
                continue;
            }
            if prompt.is_none() && looks_like_prompt_graph(Some(&parsed)) {
                prompt = Some(parsed);
                continue;
            }
        }
        if let Some(parsed) = parse_auto1111_params(candidate) {
            record.set("parameters", json!(candidate));
            apply_auto1111(&mut record, &parsed);
            if record.quality != Quality::Full {
                record.bump_quality(Quality::Partial);
            }
        }
    }

    apply_common_tag_fields(&mut record, tag_data, workflow, prompt);
    apply_image_dimensions(&mut record, tag_data);
    Ok(record)
}

/// Generic image (JPEG etc.): raw tags, rating/tags, dimensions.
pub fn extract_generic_image_metadata(
    path: &Path,
    tag_data: Option<&Map<String, Value>>,
) -> crate::Result<MetadataRecord> {
    if !path.exists() {
        return Err(AtelierError::NotFound(format!(
            "File not found: {}",
            path.display()
        )));
    }
    let mut record = MetadataRecord::new(Quality::None);
    let Some(tag_data) = tag_data else {
        return Ok(record);
    };
    record.set("raw", Value::Object(tag_data.clone()));
    record.bump_quality(Quality::Partial);
    apply_common_tag_fields(&mut record, tag_data, None, None);
    apply_image_dimensions(&mut record, tag_data);
    Ok(record)
}

fn stream_tag_maps(probe_data: &Value) -> Vec<&Map<String, Value>> {
    probe_data
        .get("streams")
        .and_then(Value::as_array)
        .map(|streams| {
            streams
                .iter()
                .filter_map(|s| s.get("tags").and_then(Value::as_object))
                .collect()
        })
        .unwrap_or_default()
}

fn collect_text_candidates(container: &Map<String, Value>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for (k, v) in container {
        match v {
            Value::String(s) => out.push((k.clone(), s.clone())),
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = item.as_str() {
                        out.push((k.clone(), s.to_string()));
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// Extract video metadata. Tag-reader keys like `QuickTime:Workflow` are
/// preferred, then a generic tag scan, then media-probe container/stream
/// tags. Only embedded tags are trusted; no sidecar files.
pub fn extract_video_metadata(
    path: &Path,
    tag_data: Option<&Map<String, Value>>,
    probe_data: Option<&Value>,
) -> crate::Result<MetadataRecord> {
    if !path.exists() {
        return Err(AtelierError::NotFound(format!(
            "File not found: {}",
            path.display()
        )));
    }

    let empty = Map::new();
    let tag_data = tag_data.unwrap_or(&empty);

    let mut record = MetadataRecord::new(Quality::None);
    record.set("raw", Value::Object(tag_data.clone()));
    if let Some(probe) = probe_data {
        record.set("raw_ffprobe", probe.clone());

        let video_stream = probe.get("video_stream");
        let width = video_stream.and_then(|s| s.get("width")).cloned();
        let height = video_stream.and_then(|s| s.get("height")).cloned();
        if let (Some(w), Some(h)) = (width, height) {
            if !w.is_null() && !h.is_null() {
                record.set("width", w);
                record.set("height", h);
            }
        }
        if let Some(fps) = video_stream.and_then(|s| s.get("r_frame_rate")) {
            record.set("fps", fps.clone());
        }
        if let Some(duration) = crate::probes::ffprobe::duration_of(probe) {
            record.set("duration", json!(duration));
        }
    }

    let inspect = |keys: &[&str]| -> Option<Value> {
        keys.iter()
            .find_map(|k| tag_data.get(*k).and_then(|v| parse_json_value(v)))
    };

    let mut workflow: Option<Value> = None;
    let mut prompt: Option<Value> = None;

    let potential_workflow = inspect(&["QuickTime:Workflow", "Keys:Workflow", "comfyui:workflow"]);
    let potential_prompt = inspect(&["QuickTime:Prompt", "Keys:Prompt", "comfyui:prompt"]);

    if let Some(candidate) = potential_workflow {
        if looks_like_workflow(Some(&candidate)) {
            workflow = Some(candidate);
        } else if looks_like_prompt_graph(Some(&candidate)) {
            prompt = Some(candidate);
        } else {
            let (wf_w, pr_w) = unwrap_workflow_prompt_container(&candidate);
            if workflow.is_none() {
                workflow = wf_w;
            }
            if prompt.is_none() {
                prompt = pr_w;
            }
        }
    }
    if let Some(candidate) = potential_prompt {
        if prompt.is_none() && looks_like_prompt_graph(Some(&candidate)) {
            prompt = Some(candidate);
        } else if workflow.is_none() && looks_like_workflow(Some(&candidate)) {
            workflow = Some(candidate);
        } else {
            let (wf_w, pr_w) = unwrap_workflow_prompt_container(&candidate);
            if workflow.is_none() {
                workflow = wf_w;
            }
            if prompt.is_none() {
                prompt = pr_w;
            }
        }
    }

    // Fallback scan across all tag-reader tags.
    if workflow.is_none() || prompt.is_none() {
        let (scanned_wf, scanned_pr) = extract_json_fields(tag_data);
        if workflow.is_none() {
            workflow = scanned_wf.filter(|w| looks_like_workflow(Some(w)));
        }
        if prompt.is_none() {
            prompt = scanned_pr.filter(|p| looks_like_prompt_graph(Some(p)));
        }
    }

    // Some encoders store metadata in the media-probe container tags.
    let format_tags = probe_data
        .and_then(|p| p.get("format"))
        .and_then(|f| f.get("tags"))
        .and_then(Value::as_object);
    if let Some(tags) = format_tags {
        if workflow.is_none() || prompt.is_none() {
            let (scanned_wf, scanned_pr) = extract_json_fields(tags);
            if workflow.is_none() {
                workflow = scanned_wf.filter(|w| looks_like_workflow(Some(w)));
            }
            if prompt.is_none() {
                prompt = scanned_pr.filter(|p| looks_like_prompt_graph(Some(p)));
            }
        }
    }

    // VHS and other pipelines may tag the stream rather than the container.
    let stream_tags = probe_data.map(stream_tag_maps).unwrap_or_default();
    for tags in &stream_tags {
        if workflow.is_some() && prompt.is_some() {
            break;
        }
        let (scanned_wf, scanned_pr) = extract_json_fields(tags);
        if workflow.is_none() {
            workflow = scanned_wf.filter(|w| looks_like_workflow(Some(w)));
        }
        if prompt.is_none() {
            prompt = scanned_pr.filter(|p| looks_like_prompt_graph(Some(p)));
        }
    }

    // Auto1111-style text in comment/description tags.
    if record.get("parameters").is_none() {
        let mut candidates = collect_text_candidates(tag_data);
        if let Some(tags) = format_tags {
            candidates.extend(collect_text_candidates(tags));
        }
        for tags in &stream_tags {
            candidates.extend(collect_text_candidates(tags));
        }
        for (_, text) in candidates {
            let Some(parsed) = parse_auto1111_params(&text) else {
                continue;
            };
            record.set("parameters", json!(text));
            // Keep the string prompt only when no prompt graph exists.
            if prompt.is_none() {
                if let Some(p) = &parsed.prompt {
                    record.set("prompt", json!(p));
                }
                if let Some(n) = &parsed.negative_prompt {
                    record.set("negative_prompt", json!(n));
                }
            }
            if record.quality != Quality::Full {
                record.bump_quality(Quality::Partial);
            }
            break;
        }
    }

    apply_common_tag_fields(&mut record, tag_data, workflow, prompt);
    Ok(record)
}

/// Extract audio metadata: technical stream facts from the media probe plus
/// the same embedded workflow/prompt shape checks.
pub fn extract_audio_metadata(
    path: &Path,
    tag_data: Option<&Map<String, Value>>,
    probe_data: Option<&Value>,
) -> crate::Result<MetadataRecord> {
    if !path.exists() {
        return Err(AtelierError::NotFound(format!(
            "File not found: {}",
            path.display()
        )));
    }

    let empty = Map::new();
    let tag_data = tag_data.unwrap_or(&empty);

    let mut record = MetadataRecord::new(Quality::None);
    record.set("raw", Value::Object(tag_data.clone()));

    if let Some(probe) = probe_data {
        record.set("raw_ffprobe", probe.clone());
        if let Some(stream) = probe.get("audio_stream").filter(|s| s.is_object()) {
            for (key, out_key) in [
                ("codec_name", "codec"),
                ("sample_rate", "sample_rate"),
                ("channels", "channels"),
                ("bit_rate", "bit_rate"),
            ] {
                if let Some(v) = stream.get(key) {
                    record.set(out_key, v.clone());
                }
            }
            record.bump_quality(Quality::Partial);
        }
        if let Some(duration) = crate::probes::ffprobe::duration_of(probe) {
            record.set("duration", json!(duration));
        }
    }

    let mut workflow: Option<Value> = None;
    let mut prompt: Option<Value> = None;
    let (scanned_wf, scanned_pr) = extract_json_fields(tag_data);
    workflow = workflow.or(scanned_wf);
    prompt = prompt.or(scanned_pr);

    let format_tags = probe_data
        .and_then(|p| p.get("format"))
        .and_then(|f| f.get("tags"))
        .and_then(Value::as_object);
    if let Some(tags) = format_tags {
        if workflow.is_none() || prompt.is_none() {
            let (scanned_wf, scanned_pr) = extract_json_fields(tags);
            if workflow.is_none() {
                workflow = scanned_wf;
            }
            if prompt.is_none() {
                prompt = scanned_pr;
            }
        }
        // Auto1111-style text in audio comment tags.
        if record.get("parameters").is_none() {
            for (_, text) in collect_text_candidates(tags) {
                if let Some(parsed) = parse_auto1111_params(&text) {
                    record.set("parameters", json!(text));
                    if prompt.is_none() {
                        if let Some(p) = &parsed.prompt {
                            record.set("prompt", json!(p));
                        }
                    }
                    record.bump_quality(Quality::Partial);
                    break;
                }
            }
        }
    }

    apply_common_tag_fields(&mut record, tag_data, workflow, prompt);
    Ok(record)
}

/// Convert an extractor panic-free failure into a degraded record wrapper.
pub fn degraded_record(err: &AtelierError, filepath: &Path) -> MetadataRecord {
    warn!(path = %filepath.display(), code = err.code(), "metadata extraction degraded: {err}");
    let mut record = MetadataRecord::new(Quality::Degraded);
    record.set("filepath", json!(filepath.to_string_lossy()));
    record.set("error", json!(err.to_string()));
    record.set("code", json!(err.code()));
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, b"stub").unwrap();
        path
    }

    #[test]
    fn test_png_auto1111_parameters() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "test.png");
        let mut tags = Map::new();
        tags.insert(
            "PNG:Parameters".into(),
            json!("a cat\nNegative prompt: lowres\nSteps: 20, Sampler: Euler a, CFG scale: 7, Seed: 1234567890, Size: 512x512, Model: sd_xl_base.safetensors"),
        );

        let record = extract_png_metadata(&path, Some(&tags)).unwrap();
        assert_eq!(record.quality, Quality::Partial);
        assert_eq!(record.get("prompt").and_then(Value::as_str), Some("a cat"));
        assert_eq!(
            record.get("negative_prompt").and_then(Value::as_str),
            Some("lowres")
        );
        assert_eq!(record.width(), Some(512));
        assert_eq!(record.height(), Some(512));
        assert_eq!(
            record.get("model").and_then(Value::as_str),
            Some("sd_xl_base.safetensors")
        );
    }

    #[test]
    fn test_png_with_embedded_prompt_graph() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "graph.png");
        let graph = json!({
            "3": {"class_type": "KSampler", "inputs": {"seed": 1}},
            "4": {"class_type": "CheckpointLoaderSimple", "inputs": {}},
        });
        let mut tags = Map::new();
        tags.insert("PNG:Prompt".into(), json!(graph.to_string()));

        let record = extract_png_metadata(&path, Some(&tags)).unwrap();
        assert!(looks_like_prompt_graph(record.get("prompt")));
        assert_eq!(record.quality, Quality::Partial);
    }

    #[test]
    fn test_png_workflow_bumps_quality_full() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "wf.png");
        let wf = json!({"nodes": [{"type": "KSampler", "id": 3}], "links": []});
        let mut tags = Map::new();
        tags.insert("PNG:Workflow".into(), json!(wf.to_string()));

        let record = extract_png_metadata(&path, Some(&tags)).unwrap();
        assert!(record.get("workflow").is_some());
        assert_eq!(record.quality, Quality::Full);
    }

    #[test]
    fn test_webp_make_model_fields() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "x.webp");
        let graph = json!({
            "3": {"class_type": "KSampler", "inputs": {"seed": 1}},
            "4": {"class_type": "VAEDecode", "inputs": {}},
        });
        let mut tags = Map::new();
        tags.insert("EXIF:Model".into(), json!(graph.to_string()));

        let record = extract_webp_metadata(&path, Some(&tags)).unwrap();
        assert!(looks_like_prompt_graph(record.get("prompt")));
    }

    #[test]
    fn test_video_quicktime_tags_and_probe_facts() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "clip.mp4");
        let graph = json!({
            "3": {"class_type": "KSampler", "inputs": {"seed": 1}},
            "4": {"class_type": "SaveVideo", "inputs": {}},
        });
        let mut tags = Map::new();
        tags.insert("QuickTime:Prompt".into(), json!(graph.to_string()));

        let probe = json!({
            "format": {"duration": "4.2"},
            "streams": [],
            "video_stream": {"width": 832, "height": 480, "r_frame_rate": "24/1"},
            "audio_stream": {},
        });

        let record = extract_video_metadata(&path, Some(&tags), Some(&probe)).unwrap();
        assert_eq!(record.width(), Some(832));
        assert_eq!(record.height(), Some(480));
        assert_eq!(record.duration(), Some(4.2));
        assert!(looks_like_prompt_graph(record.get("prompt")));
    }

    #[test]
    fn test_video_stream_tags_fallback() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "clip2.mp4");
        let wf = json!({"nodes": [{"type": "SaveVideo", "id": 1}], "links": []});
        let probe = json!({
            "format": {},
            "streams": [
                {"codec_type": "video", "tags": {"workflow": wf.to_string()}}
            ],
            "video_stream": {},
            "audio_stream": {},
        });

        let record = extract_video_metadata(&path, None, Some(&probe)).unwrap();
        assert!(record.get("workflow").is_some());
    }

    #[test]
    fn test_audio_technical_fields() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "song.flac");
        let probe = json!({
            "format": {"duration": "180.0"},
            "streams": [],
            "video_stream": {},
            "audio_stream": {"codec_name": "flac", "sample_rate": "44100", "channels": 2, "bit_rate": "920000"},
        });

        let record = extract_audio_metadata(&path, None, Some(&probe)).unwrap();
        assert_eq!(record.get("codec").and_then(Value::as_str), Some("flac"));
        assert_eq!(record.duration(), Some(180.0));
        assert_eq!(record.quality, Quality::Partial);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = extract_png_metadata(Path::new("/nonexistent/x.png"), None).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_extract_json_fields_priority_and_shapes() {
        let graph = json!({
            "3": {"class_type": "KSampler", "inputs": {"seed": 1}},
            "4": {"class_type": "SaveImage", "inputs": {}},
        });
        let mut tags = Map::new();
        tags.insert("SomeIrrelevantTag".into(), json!("short"));
        tags.insert("UserComment".into(), json!(graph.to_string()));
        let (wf, pr) = extract_json_fields(&tags);
        assert!(wf.is_none());
        assert!(pr.is_some());
    }

    #[test]
    fn test_wrapped_workflow_prompt_container() {
        let wf = json!({"nodes": [{"type": "SaveImage", "id": 9}]});
        let graph = json!({
            "3": {"class_type": "KSampler", "inputs": {"seed": 1}},
            "4": {"class_type": "SaveImage", "inputs": {}},
        });
        let container = json!({"workflow": wf, "prompt": graph.to_string()});
        let mut tags = Map::new();
        tags.insert("ItemList:Comment".into(), json!(container.to_string()));
        let (wf_out, pr_out) = extract_json_fields(&tags);
        assert!(wf_out.is_some());
        assert!(pr_out.is_some());
    }
}
