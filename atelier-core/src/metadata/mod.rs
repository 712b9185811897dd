//! Metadata service: orchestrates per-file and batch extraction, routes to
//! per-kind extractors, and enriches records with parsed generation info.

pub mod extractors;
pub mod parsing;

use crate::asset::{classify_path, ext_of, AssetKind};
use crate::config::{GeninfoConfig, MetadataConfig};
use crate::error::{AtelierError, Quality};
use crate::geninfo::{self, graph::Limits};
use crate::probes::{ExifTool, FfProbe, ProbeBackend, ProbeMode, ProbeRouter};
use crossbeam_channel::{bounded, Receiver, Sender};
use extractors::{
    extract_audio_metadata, extract_generic_image_metadata, extract_png_metadata,
    extract_video_metadata, MetadataRecord,
};
use parsing::{clean_model_name, extract_rating_tags, parse_auto1111_params};
use rayon::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Narrow tag set for the lightweight rating/tags read.
const RATING_TAG_SET: &[&str] = &[
    // Ratings (XMP + Windows)
    "XMP-xmp:Rating",
    "XMP-microsoft:RatingPercent",
    "Microsoft:SharedUserRating",
    "Rating",
    "RatingPercent",
    // Tags/keywords
    "XMP-dc:Subject",
    "XMP:Subject",
    "IPTC:Keywords",
    "Keywords",
    "XPKeywords",
    "Microsoft:Category",
    "Subject",
];

pub struct MetadataService {
    exiftool: Arc<ExifTool>,
    ffprobe: Arc<FfProbe>,
    router: ProbeRouter,
    limits: Limits,
    permits: (Sender<()>, Receiver<()>),
}

impl MetadataService {
    pub fn new(metadata_config: &MetadataConfig, geninfo_config: &GeninfoConfig) -> Self {
        let exiftool = Arc::new(ExifTool::new(
            metadata_config.exiftool_bin.clone(),
            Duration::from_secs(metadata_config.exiftool_timeout_secs.max(1)),
        ));
        let ffprobe = Arc::new(FfProbe::new(
            metadata_config.ffprobe_bin.clone(),
            Duration::from_secs(metadata_config.ffprobe_timeout_secs.max(1)),
        ));
        let router = ProbeRouter::new(
            exiftool.clone(),
            ffprobe.clone(),
            ProbeMode::parse(&metadata_config.probe_backend),
        );

        let concurrency = metadata_config.extract_concurrency.max(1);
        let permits = bounded(concurrency);
        for _ in 0..concurrency {
            let _ = permits.0.send(());
        }

        Self {
            exiftool,
            ffprobe,
            router,
            limits: Limits::from(geninfo_config),
            permits,
        }
    }

    pub fn exiftool(&self) -> &Arc<ExifTool> {
        &self.exiftool
    }

    fn acquire_permit(&self) -> ExtractPermit<'_> {
        let _ = self.permits.1.recv();
        ExtractPermit {
            sender: &self.permits.0,
        }
    }

    /// Extract metadata for a single file.
    pub fn get_metadata(
        &self,
        path: &Path,
        probe_override: Option<ProbeMode>,
    ) -> crate::Result<MetadataRecord> {
        if !path.exists() {
            return Err(AtelierError::NotFound(format!(
                "File not found: {}",
                path.display()
            )));
        }
        let _permit = self.acquire_permit();
        self.get_metadata_impl(path, probe_override)
    }

    fn get_metadata_impl(
        &self,
        path: &Path,
        probe_override: Option<ProbeMode>,
    ) -> crate::Result<MetadataRecord> {
        let kind = classify_path(path);
        if kind == AssetKind::Unknown {
            return Err(AtelierError::Unsupported(path.to_path_buf()));
        }
        debug!(path = %path.display(), kind = kind.as_str(), "extracting metadata");

        let backends = self.router.pick(path, probe_override);
        let allow_exif = backends.contains(&ProbeBackend::Exiftool);
        let allow_ffprobe = backends.contains(&ProbeBackend::Ffprobe);

        match kind {
            AssetKind::Image => self.extract_image(path, allow_exif),
            AssetKind::Video => self.extract_video(path, allow_exif, allow_ffprobe),
            AssetKind::Audio => self.extract_audio(path, allow_exif, allow_ffprobe),
            _ => {
                let mut record = MetadataRecord::new(Quality::None);
                record.set("file_info", self.file_info(path));
                Ok(record)
            }
        }
    }

    fn read_exif(&self, path: &Path) -> Option<Map<String, Value>> {
        match self.exiftool.read(path, None) {
            Ok(map) => Some(map),
            Err(e) => {
                debug!(path = %path.display(), "exiftool read failed: {e}");
                None
            }
        }
    }

    fn read_ffprobe(&self, path: &Path) -> Option<Value> {
        match self.ffprobe.read(path) {
            Ok(data) => Some(data),
            Err(e) => {
                debug!(path = %path.display(), "ffprobe read failed: {e}");
                None
            }
        }
    }

    fn extract_image(&self, path: &Path, allow_exif: bool) -> crate::Result<MetadataRecord> {
        if !allow_exif {
            let mut record = MetadataRecord::new(Quality::None);
            record.set("file_info", self.file_info(path));
            record.set("exif", Value::Null);
            return Ok(record);
        }

        let exif_data = self.read_exif(path);
        let Some(exif_data) = exif_data else {
            let mut record = MetadataRecord::new(Quality::None);
            record.set("file_info", self.file_info(path));
            record.set("exif", Value::Null);
            return Ok(record);
        };

        let ext = ext_of(path);
        let mut record = match ext.as_str() {
            ".png" => extract_png_metadata(path, Some(&exif_data))?,
            ".webp" => extractors::extract_webp_metadata(path, Some(&exif_data))?,
            _ => extract_generic_image_metadata(path, Some(&exif_data))?,
        };

        record.set("file_info", self.file_info(path));
        record.set("exif", Value::Object(exif_data));
        self.enrich_with_geninfo(&mut record);
        Ok(record)
    }

    fn extract_video(
        &self,
        path: &Path,
        allow_exif: bool,
        allow_ffprobe: bool,
    ) -> crate::Result<MetadataRecord> {
        let exif_data = if allow_exif { self.read_exif(path) } else { None };
        let ffprobe_data = if allow_ffprobe {
            self.read_ffprobe(path)
        } else {
            None
        };

        let mut record = extract_video_metadata(path, exif_data.as_ref(), ffprobe_data.as_ref())?;
        record.set("file_info", self.file_info(path));
        record.set(
            "exif",
            exif_data.map(Value::Object).unwrap_or(Value::Null),
        );
        record.set("ffprobe", ffprobe_data.unwrap_or(Value::Null));
        self.enrich_with_geninfo(&mut record);
        Ok(record)
    }

    fn extract_audio(
        &self,
        path: &Path,
        allow_exif: bool,
        allow_ffprobe: bool,
    ) -> crate::Result<MetadataRecord> {
        if !allow_exif && !allow_ffprobe {
            let mut record = MetadataRecord::new(Quality::None);
            record.set("file_info", self.file_info(path));
            record.set("exif", Value::Null);
            record.set("ffprobe", Value::Null);
            return Ok(record);
        }

        let exif_data = if allow_exif { self.read_exif(path) } else { None };
        let ffprobe_data = if allow_ffprobe {
            self.read_ffprobe(path)
        } else {
            None
        };

        let mut record = extract_audio_metadata(path, exif_data.as_ref(), ffprobe_data.as_ref())?;
        record.set("file_info", self.file_info(path));
        record.set(
            "exif",
            exif_data.map(Value::Object).unwrap_or(Value::Null),
        );
        record.set("ffprobe", ffprobe_data.unwrap_or(Value::Null));
        self.enrich_with_geninfo(&mut record);
        Ok(record)
    }

    /// Extract metadata for many files, batching probe invocations.
    pub fn get_metadata_batch(
        &self,
        paths: &[PathBuf],
        probe_override: Option<ProbeMode>,
    ) -> HashMap<String, crate::Result<MetadataRecord>> {
        if paths.is_empty() {
            return HashMap::new();
        }
        let _permit = self.acquire_permit();

        let mut results: HashMap<String, crate::Result<MetadataRecord>> = HashMap::new();

        // Group existing files by kind.
        let mut images = Vec::new();
        let mut videos = Vec::new();
        let mut audios = Vec::new();
        let mut others = Vec::new();
        for path in paths {
            if !path.exists() {
                continue;
            }
            match classify_path(path) {
                AssetKind::Image => images.push(path.as_path()),
                AssetKind::Video => videos.push(path.as_path()),
                AssetKind::Audio => audios.push(path.as_path()),
                _ => others.push(path.as_path()),
            }
        }

        // Schedule probe targets (dedupe: each tool runs once per file).
        let mut exif_targets: Vec<&Path> = Vec::new();
        let mut ffprobe_targets: Vec<&Path> = Vec::new();
        for &path in images.iter().chain(videos.iter()).chain(audios.iter()) {
            let backends = self.router.pick(path, probe_override);
            if backends.contains(&ProbeBackend::Exiftool) {
                exif_targets.push(path);
            }
            if backends.contains(&ProbeBackend::Ffprobe) {
                ffprobe_targets.push(path);
            }
        }

        let exif_results = if exif_targets.is_empty() {
            HashMap::new()
        } else {
            self.exiftool.read_batch(&exif_targets)
        };
        let ffprobe_results = if ffprobe_targets.is_empty() {
            HashMap::new()
        } else {
            self.ffprobe.read_batch(&ffprobe_targets)
        };

        let exif_for = |path: &Path| -> Option<&Map<String, Value>> {
            exif_results
                .get(path.to_string_lossy().as_ref())
                .and_then(|r| r.as_ref().ok())
        };
        let ffprobe_for = |path: &Path| -> Option<&Value> {
            ffprobe_results
                .get(path.to_string_lossy().as_ref())
                .and_then(|r| r.as_ref().ok())
        };

        // Probe payloads are in hand; the remaining shape scans + geninfo
        // parsing are CPU-bound and parallelize per file.
        let media: Vec<(&Path, AssetKind)> = images
            .iter()
            .map(|&p| (p, AssetKind::Image))
            .chain(videos.iter().map(|&p| (p, AssetKind::Video)))
            .chain(audios.iter().map(|&p| (p, AssetKind::Audio)))
            .collect();

        let entries: Vec<(String, crate::Result<MetadataRecord>)> = media
            .par_iter()
            .map(|&(path, kind)| {
                let exif_data = exif_for(path);
                let probe_data = ffprobe_for(path);
                let extracted = match kind {
                    AssetKind::Image => match ext_of(path).as_str() {
                        ".png" => extract_png_metadata(path, exif_data),
                        ".webp" => extractors::extract_webp_metadata(path, exif_data),
                        _ => extract_generic_image_metadata(path, exif_data),
                    },
                    AssetKind::Video => extract_video_metadata(path, exif_data, probe_data),
                    _ => extract_audio_metadata(path, exif_data, probe_data),
                };
                let entry = extracted.map(|mut record| {
                    record.set("file_info", self.file_info(path));
                    record.set(
                        "exif",
                        exif_data
                            .map(|m| Value::Object(m.clone()))
                            .unwrap_or(Value::Null),
                    );
                    if kind != AssetKind::Image {
                        record.set("ffprobe", probe_data.cloned().unwrap_or(Value::Null));
                    }
                    self.enrich_with_geninfo(&mut record);
                    record
                });
                (path.to_string_lossy().into_owned(), entry)
            })
            .collect();
        results.extend(entries);

        for path in others {
            let mut record = MetadataRecord::new(Quality::None);
            record.set("file_info", self.file_info(path));
            results.insert(path.to_string_lossy().into_owned(), Ok(record));
        }

        results
    }

    /// Fast path for drag-and-drop: only the embedded workflow/prompt, no
    /// media probe, no geninfo, no cache write.
    pub fn get_workflow_only(&self, path: &Path) -> crate::Result<Value> {
        if !path.exists() {
            return Err(AtelierError::NotFound(format!(
                "File not found: {}",
                path.display()
            )));
        }

        let none_payload = json!({"workflow": null, "prompt": null, "quality": "none"});
        let kind = classify_path(path);
        if !matches!(kind, AssetKind::Image | AssetKind::Video) {
            return Ok(none_payload);
        }

        let exif_data = match self.exiftool.read(path, None) {
            Ok(map) => map,
            Err(e) => {
                debug!(path = %path.display(), "exiftool failed reading workflow-only metadata: {e}");
                return Ok(none_payload);
            }
        };

        let ext = ext_of(path);
        let record = match kind {
            AssetKind::Image => match ext.as_str() {
                ".png" => extract_png_metadata(path, Some(&exif_data))?,
                ".webp" => extractors::extract_webp_metadata(path, Some(&exif_data))?,
                _ => return Ok(none_payload),
            },
            // No ffprobe here (can be slow); the extractor reads tag-reader
            // keys only.
            _ => extract_video_metadata(path, Some(&exif_data), None)?,
        };

        Ok(json!({
            "workflow": record.get("workflow").cloned().unwrap_or(Value::Null),
            "prompt": record.get("prompt").cloned().unwrap_or(Value::Null),
            "quality": record.quality.as_str(),
        }))
    }

    /// Lightweight extraction of rating/tags only. Used to hydrate missing
    /// rating/tags from on-disk metadata without a full scan.
    pub fn extract_rating_tags_only(&self, path: &Path) -> crate::Result<(Option<i64>, Vec<String>)> {
        if !path.exists() {
            return Err(AtelierError::NotFound(format!(
                "File not found: {}",
                path.display()
            )));
        }
        match self.exiftool.read(path, Some(RATING_TAG_SET)) {
            Ok(exif_data) => Ok(extract_rating_tags(Some(&exif_data))),
            Err(e) => {
                debug!(path = %path.display(), "exiftool failed reading rating/tags: {e}");
                Ok((None, Vec::new()))
            }
        }
    }

    /// Parse geninfo from the record's prompt graph / workflow; fall back to
    /// Auto1111 parameters. `geninfo` always ends up a dict (possibly empty).
    fn enrich_with_geninfo(&self, record: &mut MetadataRecord) {
        let prompt = record.get("prompt").cloned();
        let workflow = record.get("workflow").cloned();

        let parsed = geninfo::parse_geninfo_with_limits(prompt.as_ref(), workflow.as_ref(), self.limits)
            .unwrap_or_else(|e| {
                debug!("geninfo parse skipped: {e}");
                None
            });

        if let Some(geninfo) = parsed {
            record.set("geninfo", geninfo);
            return;
        }
        if record.get("geninfo").is_some() {
            return;
        }

        let fallback = build_geninfo_from_parameters(&record.data);
        let empty = fallback.is_none();
        record.set("geninfo", fallback.unwrap_or_else(|| json!({})));
        if empty && looks_like_media_pipeline(prompt.as_ref()) {
            record.set(
                "geninfo_status",
                json!({"kind": "media_pipeline", "reason": "no_sampler"}),
            );
        }
    }

    fn file_info(&self, path: &Path) -> Value {
        let mut info = json!({
            "filename": path.file_name().and_then(|n| n.to_str()).unwrap_or(""),
            "filepath": path.to_string_lossy(),
            "kind": classify_path(path).as_str(),
            "ext": ext_of(path),
        });
        if let Ok(meta) = std::fs::metadata(path) {
            info["size"] = json!(meta.len());
            if let Ok(mtime) = meta.modified() {
                if let Ok(secs) = mtime.duration_since(std::time::UNIX_EPOCH) {
                    info["mtime"] = json!(secs.as_secs_f64());
                }
            }
            if let Ok(ctime) = meta.created() {
                if let Ok(secs) = ctime.duration_since(std::time::UNIX_EPOCH) {
                    info["ctime"] = json!(secs.as_secs_f64());
                }
            }
        } else {
            warn!(path = %path.display(), "stat failed while building file info");
        }
        info
    }
}

struct ExtractPermit<'a> {
    sender: &'a Sender<()>,
}

impl Drop for ExtractPermit<'_> {
    fn drop(&mut self) {
        let _ = self.sender.send(());
    }
}

/// Build a `geninfo` object from explicit Auto1111/Forge-style parameter
/// fields. Accuracy-first: only uses fields already parsed by the extractor.
fn build_geninfo_from_parameters(meta: &Map<String, Value>) -> Option<Value> {
    let mut fields = meta.clone();
    if let Some(params_text) = meta.get("parameters").and_then(Value::as_str) {
        if let Some(parsed) = parse_auto1111_params(params_text) {
            let mut set = |k: &str, v: Option<Value>| {
                if let Some(v) = v {
                    fields.insert(k.to_string(), v);
                }
            };
            set("prompt", parsed.prompt.map(Value::from));
            set("negative_prompt", parsed.negative_prompt.map(Value::from));
            set("steps", parsed.steps.map(Value::from));
            set("sampler", parsed.sampler.map(Value::from));
            set("cfg", parsed.cfg.map(Value::from));
            set("seed", parsed.seed.map(Value::from));
            set("width", parsed.width.map(Value::from));
            set("height", parsed.height.map(Value::from));
            set("model", parsed.model.map(Value::from));
        }
    }

    let get_str = |k: &str| fields.get(k).and_then(Value::as_str).filter(|s| !s.trim().is_empty());

    let mut out = Map::new();
    out.insert(
        "engine".into(),
        json!({"parser_version": "geninfo-params-v1", "source": "parameters"}),
    );

    if let Some(pos) = get_str("prompt") {
        out.insert(
            "positive".into(),
            json!({"value": pos.trim(), "confidence": "high", "source": "parameters"}),
        );
    }
    if let Some(neg) = get_str("negative_prompt") {
        out.insert(
            "negative".into(),
            json!({"value": neg.trim(), "confidence": "high", "source": "parameters"}),
        );
    }
    if let Some(sampler) = fields.get("sampler").filter(|v| !v.is_null()) {
        out.insert(
            "sampler".into(),
            json!({"name": stringify(sampler), "confidence": "high", "source": "parameters"}),
        );
    }
    if let Some(scheduler) = fields.get("scheduler").filter(|v| !v.is_null()) {
        out.insert(
            "scheduler".into(),
            json!({"name": stringify(scheduler), "confidence": "high", "source": "parameters"}),
        );
    }
    if let Some(steps) = as_i64(fields.get("steps")) {
        out.insert(
            "steps".into(),
            json!({"value": steps, "confidence": "high", "source": "parameters"}),
        );
    }
    if let Some(cfg) = as_f64(fields.get("cfg")) {
        out.insert(
            "cfg".into(),
            json!({"value": cfg, "confidence": "high", "source": "parameters"}),
        );
    }
    if let Some(seed) = as_i64(fields.get("seed")) {
        out.insert(
            "seed".into(),
            json!({"value": seed, "confidence": "high", "source": "parameters"}),
        );
    }
    if let (Some(w), Some(h)) = (as_i64(fields.get("width")), as_i64(fields.get("height"))) {
        out.insert(
            "size".into(),
            json!({"width": w, "height": h, "confidence": "high", "source": "parameters"}),
        );
    }
    if let Some(model) = get_str("model") {
        if let Some(ckpt) = clean_model_name(model) {
            let field = json!({"name": ckpt, "confidence": "high", "source": "parameters"});
            out.insert("checkpoint".into(), field.clone());
            out.insert("models".into(), json!({"checkpoint": field}));
        }
    }

    if out.len() > 1 {
        Some(Value::Object(out))
    } else {
        None
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_i64(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Detect "media-only" graphs (load video -> combine/save) that do not
/// represent generation, so such assets are not flagged as having generation
/// data.
fn looks_like_media_pipeline(prompt_graph: Option<&Value>) -> bool {
    let Some(Value::Object(graph)) = prompt_graph else {
        return false;
    };
    if graph.is_empty() {
        return false;
    }
    let types: Vec<String> = graph
        .values()
        .filter_map(|node| {
            node.get("class_type")
                .or_else(|| node.get("type"))
                .and_then(Value::as_str)
                .map(str::to_ascii_lowercase)
        })
        .collect();
    if types.is_empty() {
        return false;
    }

    // Any sampler-like node means it's not media-only.
    if types.iter().any(|t| {
        (t.contains("ksampler") && !t.contains("select"))
            || t.contains("samplercustom")
            || (t.contains("sampler") && !t.contains("select"))
    }) {
        return false;
    }

    let has_load = types
        .iter()
        .any(|t| t.contains("loadvideo") || t.contains("vhs_loadvideo"));
    let has_combine = types.iter().any(|t| {
        t.contains("videocombine") || t.contains("video_combine") || t.contains("vhs_videocombine")
    });
    let has_save = types.iter().any(|t| {
        t.starts_with("save")
            || t.contains("savevideo")
            || t.contains("savegif")
            || t.contains("saveanimatedwebp")
    });
    has_load && (has_combine || has_save)
}

/// Whether a graph (workflow export or prompt graph) contains a sampler-like
/// node. Used when deriving the `has_generation_data` flag.
pub fn graph_has_sampler(graph: Option<&Value>) -> bool {
    let Some(graph) = graph else { return false };

    let sampler_type = |ct: &str, inputs: Option<&Map<String, Value>>| -> bool {
        if ct.is_empty() {
            return false;
        }
        if ct.contains("ksampler") && !ct.contains("select") {
            return true;
        }
        if ct.contains("samplercustom") {
            return true;
        }
        if ct.contains("sampler") && !ct.contains("select") {
            // For prompt graphs require a sampling-ish input to avoid false
            // positives; workflow exports carry no usable inputs dict.
            return match inputs {
                Some(ins) => ["steps", "cfg", "cfg_scale", "seed", "denoise"]
                    .iter()
                    .any(|k| ins.contains_key(*k)),
                None => true,
            };
        }
        false
    };

    // Workflow export: dict with `nodes: []`.
    if let Some(nodes) = graph.get("nodes").and_then(Value::as_array) {
        return nodes.iter().any(|node| {
            let ct = node
                .get("type")
                .or_else(|| node.get("class_type"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_ascii_lowercase();
            sampler_type(&ct, None)
        });
    }

    // Prompt graph: dict of nodes with `class_type`.
    if let Some(map) = graph.as_object() {
        return map.values().any(|node| {
            let ct = node
                .get("class_type")
                .or_else(|| node.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_ascii_lowercase();
            sampler_type(&ct, node.get("inputs").and_then(Value::as_object))
        });
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_geninfo_from_parameters() {
        let mut meta = Map::new();
        meta.insert(
            "parameters".into(),
            json!("a cat\nNegative prompt: lowres\nSteps: 20, Sampler: Euler a, CFG scale: 7, Seed: 1234567890, Size: 512x512, Model: sd_xl_base.safetensors"),
        );
        let out = build_geninfo_from_parameters(&meta).unwrap();
        assert_eq!(
            out.pointer("/positive/value").and_then(Value::as_str),
            Some("a cat")
        );
        assert_eq!(
            out.pointer("/negative/value").and_then(Value::as_str),
            Some("lowres")
        );
        assert_eq!(out.pointer("/steps/value").and_then(Value::as_i64), Some(20));
        assert_eq!(
            out.pointer("/sampler/name").and_then(Value::as_str),
            Some("Euler a")
        );
        assert_eq!(out.pointer("/cfg/value").and_then(Value::as_f64), Some(7.0));
        assert_eq!(
            out.pointer("/seed/value").and_then(Value::as_i64),
            Some(1234567890)
        );
        assert_eq!(out.pointer("/size/width").and_then(Value::as_i64), Some(512));
        assert_eq!(
            out.pointer("/checkpoint/name").and_then(Value::as_str),
            Some("sd_xl_base")
        );
        assert_eq!(
            out.pointer("/engine/parser_version").and_then(Value::as_str),
            Some("geninfo-params-v1")
        );
    }

    #[test]
    fn test_build_geninfo_empty_when_no_fields() {
        assert!(build_geninfo_from_parameters(&Map::new()).is_none());
    }

    #[test]
    fn test_media_pipeline_detection() {
        let graph = json!({
            "1": {"class_type": "VHS_LoadVideo", "inputs": {}},
            "2": {"class_type": "VHS_VideoCombine", "inputs": {}},
        });
        assert!(looks_like_media_pipeline(Some(&graph)));

        let with_sampler = json!({
            "1": {"class_type": "VHS_LoadVideo", "inputs": {}},
            "2": {"class_type": "KSampler", "inputs": {}},
            "3": {"class_type": "VHS_VideoCombine", "inputs": {}},
        });
        assert!(!looks_like_media_pipeline(Some(&with_sampler)));
        assert!(!looks_like_media_pipeline(None));
    }

    #[test]
    fn test_graph_has_sampler_shapes() {
        let prompt = json!({
            "3": {"class_type": "KSampler", "inputs": {"steps": 20}},
        });
        assert!(graph_has_sampler(Some(&prompt)));

        let workflow = json!({"nodes": [{"type": "SamplerCustomAdvanced", "id": 1}]});
        assert!(graph_has_sampler(Some(&workflow)));

        let selector_only = json!({
            "3": {"class_type": "KSamplerSelect", "inputs": {"sampler_name": "euler"}},
        });
        assert!(!graph_has_sampler(Some(&selector_only)));

        let media = json!({
            "1": {"class_type": "VHS_LoadVideo", "inputs": {}},
        });
        assert!(!graph_has_sampler(Some(&media)));
    }
}
