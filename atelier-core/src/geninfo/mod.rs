//! Deterministic generation-info parser.
//!
//! Interprets an embedded node-graph as a generation pipeline and derives
//! structured prompt/model/sampler info. Strictly "no-guess": every field is
//! traced from an actual node, carries a confidence level and a
//! `NodeType:node_id` source, and the parser returns `Ok(None)` rather than
//! inventing values.

pub mod graph;

use graph::{
    collect_upstream, inputs_of, is_link, is_reroute, lower_type, nid_key, node_type,
    normalize_graph_input, resolve_link, scalar, walk_passthrough, Limits, NodeMap,
};
use crate::metadata::parsing::clean_model_name;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tracing::debug;

const SINK_CLASS_TYPES: &[&str] = &[
    "saveimage",
    "saveimagewebsocket",
    "previewimage",
    "vhs_savevideo",
    "vhs_videocombine",
    "saveanimatedwebp",
    "savegif",
    "savevideo",
    "saveaudio",
    "save_audio",
    "vhs_saveaudio",
];

/// Parse generation information from a prompt graph (dict of nodes) and/or a
/// LiteGraph workflow export. Returns `Ok(None)` when not enough information
/// is available.
pub fn parse_geninfo_from_prompt(
    prompt_graph: Option<&Value>,
    workflow: Option<&Value>,
) -> crate::Result<Option<Value>> {
    parse_geninfo_with_limits(prompt_graph, workflow, Limits::default())
}

/// Same as [`parse_geninfo_from_prompt`] with explicit traversal caps.
pub fn parse_geninfo_with_limits(
    prompt_graph: Option<&Value>,
    workflow: Option<&Value>,
    limits: Limits,
) -> crate::Result<Option<Value>> {
    let workflow_meta = extract_workflow_metadata(workflow);
    let fallback = |meta: &Map<String, Value>| {
        if meta.is_empty() {
            None
        } else {
            Some(json!({ "metadata": meta }))
        }
    };

    let Some(nodes) = normalize_graph_input(prompt_graph, workflow) else {
        return Ok(fallback(&workflow_meta));
    };

    let mut sinks = find_candidate_sinks(&nodes);
    if sinks.is_empty() {
        return Ok(fallback(&workflow_meta));
    }

    // Prefer "real" sinks (SaveVideo over PreviewImage, etc.). Candidates are
    // pre-sorted by id so equal priorities stay deterministic.
    sinks.sort_by_key(|nid| nid_key(nid));
    sinks.sort_by_key(|nid| {
        nodes
            .get(nid)
            .map(|n| sink_priority(n, nid))
            .unwrap_or((4, 1, 0))
    });

    Ok(extract_geninfo(&nodes, &sinks, &workflow_meta, limits))
}

fn sink_priority(node: &Value, node_id: &str) -> (i32, i32, i64) {
    let ct = lower_type(node);

    // Video graphs often contain both PreviewImage and SaveVideo;
    // PreviewImage can hang off intermediate nodes and does not reliably
    // reflect the final render.
    let group = if matches!(ct.as_str(), "savevideo" | "vhs_savevideo" | "vhs_videocombine")
        || (ct.contains("save") && ct.contains("video"))
    {
        0
    } else if matches!(ct.as_str(), "saveaudio" | "save_audio" | "vhs_saveaudio")
        || (ct.contains("save") && ct.contains("audio"))
    {
        1
    } else if matches!(
        ct.as_str(),
        "saveimage" | "saveimagewebsocket" | "saveanimatedwebp" | "savegif"
    ) || (ct.contains("save") && ct.contains("image"))
    {
        2
    } else if ct == "previewimage" || ct.contains("preview") {
        3
    } else {
        4
    };

    // Within a group, prefer sinks that consume `images`.
    let has_images = if inputs_of(node).get("images").map(is_link).unwrap_or(false) {
        0
    } else {
        1
    };

    // Tie-break: prefer higher node ids (likely added later / final output).
    let nid_score = node_id.parse::<i64>().map(|n| -n).unwrap_or(0);

    (group, has_images, nid_score)
}

fn find_candidate_sinks(nodes: &NodeMap) -> Vec<String> {
    let mut sinks = Vec::new();
    for (node_id, node) in nodes {
        let ct = lower_type(node);
        if SINK_CLASS_TYPES.contains(&ct.as_str()) {
            sinks.push(node_id.clone());
            continue;
        }
        // Custom save nodes (WAS, Impact, CR, ...): "save"/"preview" plus a
        // media hint.
        if (ct.contains("save") || ct.contains("preview"))
            && (ct.contains("image") || ct.contains("video") || ct.contains("audio"))
        {
            sinks.push(node_id.clone());
        }
    }
    sinks
}

fn pick_sink_inputs<'a>(node: &'a Value) -> Option<&'a Value> {
    let ins = inputs_of(node);
    const PREFERRED: &[&str] = &[
        "audio",
        "audios",
        "waveform",
        "images",
        "image",
        "frames",
        "video",
        "samples",
        "latent",
        "latent_image",
    ];
    for key in PREFERRED {
        if let Some(v) = ins.get(*key) {
            if is_link(v) {
                return Some(v);
            }
        }
    }
    ins.values().find(|v| is_link(v))
}

/// Sampler-like nodes representing the core diffusion step. Video/custom
/// stacks (e.g. Wan) use different node names while still providing sampler
/// parameters.
fn is_sampler(node: &Value) -> bool {
    let ct = lower_type(node);
    if ct.is_empty() {
        return false;
    }
    // KSamplerSelect is a sampler selector node, not a diffusion sampler.
    if ct.contains("ksampler") && ct.contains("select") {
        return false;
    }
    if ct.contains("ksampler") {
        return true;
    }
    if ct.contains("iterativelatentupscale") {
        return true;
    }
    // Marigold depth estimation acts as the sampler for depth maps.
    if ct.contains("marigold") {
        return true;
    }
    // Kijai Flux inference samplers.
    if ct.contains("flux") && (ct.contains("sampler") || ct.contains("params")) {
        return true;
    }
    if ct == "flux2" || ct.contains("flux_2") {
        return true;
    }

    let ins = inputs_of(node);
    // Generic detection: any node with steps + cfg + seed is likely a sampler.
    let has_steps = ins.get("steps").is_some();
    let has_cfg = ins.get("cfg").is_some() || ins.get("cfg_scale").is_some() || ins.get("guidance").is_some();
    let has_seed = ins.get("seed").is_some() || ins.get("noise_seed").is_some();
    if has_steps && has_cfg && has_seed {
        return true;
    }

    // WanVideoSampler / custom samplers: require a model link or at least one
    // real sampling parameter to avoid matching unrelated "*sampler*" nodes.
    if ct.contains("sampler") && !ct.contains("select") {
        if ins.get("model").map(is_link).unwrap_or(false) {
            return true;
        }
        for k in ["steps", "cfg", "cfg_scale", "seed", "scheduler", "denoise"] {
            if ins.get(k).is_some() {
                return true;
            }
        }
        if ins.get("text_embeds").map(is_link).unwrap_or(false)
            || ins.get("hyvid_embeds").map(is_link).unwrap_or(false)
        {
            return true;
        }
    }
    false
}

/// Flux/SD3 pipelines use SamplerCustom[Advanced] orchestrators wiring
/// noise/sigmas/sampler/guider nodes together.
fn is_advanced_sampler(node: &Value) -> bool {
    let ct = lower_type(node);
    if ct.is_empty() {
        return false;
    }
    if ct.contains("samplercustom") {
        return true;
    }
    let ins = inputs_of(node);
    let linked = |k: &str| ins.get(k).map(is_link).unwrap_or(false);
    // "guider" + "sigmas" is the defining signature of the decoupled
    // interaction; guider + sampler covers stacks that handle sigmas
    // internally.
    if linked("guider") && linked("sigmas") {
        return true;
    }
    if linked("guider") && linked("sampler") {
        return true;
    }
    ["noise", "guider", "sampler", "sigmas"].iter().all(|k| linked(k))
}

fn select_samplers_near_sink<F>(
    nodes: &NodeMap,
    sink_node_id: &str,
    limits: Limits,
    pred: F,
) -> (Option<String>, &'static str)
where
    F: Fn(&Value) -> bool,
{
    let Some(sink) = nodes.get(sink_node_id) else {
        return (None, "none");
    };
    let Some(start_link) = pick_sink_inputs(sink) else {
        return (None, "none");
    };
    let Some(start_src) = walk_passthrough(nodes, start_link) else {
        return (None, "none");
    };
    let dist = collect_upstream(nodes, &start_src, limits);
    let mut candidates: Vec<(usize, (i64, String))> = dist
        .iter()
        .filter(|(nid, _)| nodes.get(*nid).map(&pred).unwrap_or(false))
        .map(|(nid, d)| (*d, nid_key(nid)))
        .collect();
    if candidates.is_empty() {
        return (None, "none");
    }
    candidates.sort();
    let best_depth = candidates[0].0;
    let best: Vec<_> = candidates.iter().filter(|(d, _)| *d == best_depth).collect();
    let chosen = best[0].1 .1.clone();
    if best.len() == 1 {
        (Some(chosen), "high")
    } else {
        // Ambiguous: multiple samplers equally close to the sink.
        (Some(chosen), "medium")
    }
}

fn select_primary_sampler(nodes: &NodeMap, sink_node_id: &str, limits: Limits) -> (Option<String>, &'static str) {
    select_samplers_near_sink(nodes, sink_node_id, limits, is_sampler)
}

fn select_advanced_sampler(nodes: &NodeMap, sink_node_id: &str, limits: Limits) -> (Option<String>, &'static str) {
    select_samplers_near_sink(nodes, sink_node_id, limits, is_advanced_sampler)
}

/// Last resort when sinks exist but are not linked to the generation branch:
/// score every sampler-like node in the whole graph.
fn select_any_sampler(nodes: &NodeMap) -> (Option<String>, &'static str) {
    let mut candidates: Vec<(i64, i64, String)> = Vec::new();
    for (nid, node) in nodes {
        if !is_sampler(node) {
            continue;
        }
        let ins = inputs_of(node);
        let mut score = 0i64;
        if ins.get("model").map(is_link).unwrap_or(false) {
            score += 3;
        }
        if ins.get("positive").map(is_link).unwrap_or(false)
            || ins.get("text_embeds").map(is_link).unwrap_or(false)
        {
            score += 3;
        }
        for k in ["steps", "cfg", "cfg_scale", "seed", "denoise", "scheduler"] {
            if ins.get(k).is_some() {
                score += 1;
            }
        }
        let n_int = nid.parse::<i64>().unwrap_or(i64::MAX);
        candidates.push((-score, n_int, nid.clone()));
    }
    if candidates.is_empty() {
        return (None, "none");
    }
    candidates.sort();
    (Some(candidates[0].2.clone()), "low")
}

fn field(value: Option<&Value>, confidence: &str, source: &str) -> Option<Value> {
    let value = value?;
    if value.is_null() || value.as_str().map(|s| s.is_empty()).unwrap_or(false) {
        return None;
    }
    Some(json!({"value": value, "confidence": confidence, "source": source}))
}

fn field_name(name: Option<&str>, confidence: &str, source: &str) -> Option<Value> {
    let name = name?;
    if name.is_empty() {
        return None;
    }
    Some(json!({"name": name, "confidence": confidence, "source": source}))
}

fn source_of(nodes: &NodeMap, nid: &str) -> String {
    let ty = nodes.get(nid).map(node_type).unwrap_or("");
    format!("{ty}:{nid}")
}

fn trace_sampler_name(nodes: &NodeMap, link: &Value) -> Option<(String, String)> {
    let src_id = walk_passthrough(nodes, link)?;
    let node = nodes.get(&src_id)?;
    let ins = inputs_of(node);
    let val = scalar(ins.get("sampler_name")).or_else(|| scalar(ins.get("sampler")))?;
    Some((value_to_string(val), source_of(nodes, &src_id)))
}

fn trace_noise_seed<'a>(nodes: &'a NodeMap, link: &Value) -> Option<(&'a Value, String)> {
    let src_id = walk_passthrough(nodes, link)?;
    let node = nodes.get(&src_id)?;
    let ins = inputs_of(node);
    for k in ["noise_seed", "seed", "value", "int", "number"] {
        if let Some(v) = scalar(ins.get(k)) {
            return Some((v, source_of(nodes, &src_id)));
        }
    }
    None
}

struct SigmasTrace<'a> {
    steps: Option<Value>,
    steps_confidence: Option<&'static str>,
    scheduler: Option<&'a Value>,
    denoise: Option<&'a Value>,
    model_link: Option<&'a Value>,
    source: Option<String>,
}

/// For advanced sampler pipelines, `sigmas` points to a scheduler node that
/// carries steps/scheduler/denoise and sometimes a `model` link.
fn trace_scheduler_sigmas<'a>(nodes: &'a NodeMap, link: &Value) -> SigmasTrace<'a> {
    let empty = SigmasTrace {
        steps: None,
        steps_confidence: None,
        scheduler: None,
        denoise: None,
        model_link: None,
        source: None,
    };
    let Some(src_id) = walk_passthrough(nodes, link) else {
        return empty;
    };
    let Some(node) = nodes.get(&src_id) else {
        return empty;
    };
    let ins = inputs_of(node);

    let mut steps = scalar(ins.get("steps")).cloned();
    let mut steps_confidence = steps.as_ref().map(|_| "high");
    if steps.is_none() {
        // Manual sigma schedules (e.g. ManualSigmas) carry no explicit `steps`
        // field; count the numeric entries and treat it as (steps + 1).
        if let Some(sigmas) = ins.get("sigmas").and_then(Value::as_str) {
            let numeric = sigmas
                .replace('\n', " ")
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .filter(|p| p.parse::<f64>().is_ok())
                .count();
            if numeric >= 2 {
                steps = Some(Value::from((numeric - 1).max(1)));
                steps_confidence = Some("low");
            }
        }
    }

    SigmasTrace {
        steps,
        steps_confidence,
        scheduler: scalar(ins.get("scheduler")),
        denoise: scalar(ins.get("denoise")),
        model_link: ins.get("model").filter(|v| is_link(v)),
        source: Some(source_of(nodes, &src_id)),
    }
}

fn trace_guidance_from_conditioning<'a>(
    nodes: &'a NodeMap,
    conditioning_link: &Value,
    limits: Limits,
) -> Option<(&'a Value, String)> {
    let start_id = walk_passthrough(nodes, conditioning_link)?;
    let dist = collect_upstream(nodes, &start_id, limits);
    let mut ordered: Vec<(&String, &usize)> = dist.iter().collect();
    ordered.sort_by(|a, b| a.1.cmp(b.1).then_with(|| nid_key(a.0).cmp(&nid_key(b.0))));
    for (nid, _) in ordered {
        let Some(node) = nodes.get(nid) else { continue };
        let ins = inputs_of(node);
        for k in ["guidance", "cfg", "cfg_scale"] {
            if let Some(v) = scalar(ins.get(k)) {
                return Some((v, source_of(nodes, nid)));
            }
        }
    }
    None
}

/// Traverse the conditioning chain upstream to find a node providing
/// `guidance` (Flux).
fn trace_guidance_value(nodes: &NodeMap, start_link: &Value) -> Option<(f64, String)> {
    let start_id = walk_passthrough(nodes, start_link)?;
    let mut stack = vec![(start_id, 0usize)];
    let mut visited: HashSet<String> = HashSet::new();

    while let Some((nid, depth)) = stack.pop() {
        if depth > 15 || !visited.insert(nid.clone()) {
            continue;
        }
        let Some(node) = nodes.get(&nid) else { continue };
        let ins = inputs_of(node);

        if let Some(g) = scalar(ins.get("guidance")).and_then(Value::as_f64) {
            return Some((g, source_of(nodes, &nid)));
        }

        let ct = lower_type(node);
        let should_expand = is_reroute(node)
            || ct.contains("conditioning")
            || ct.contains("guider")
            || ct.contains("flux")
            || ins.keys().any(|k| k.to_ascii_lowercase().contains("conditioning"));
        if should_expand {
            for (k, v) in ins {
                if k.to_ascii_lowercase().contains("conditioning") && is_link(v) {
                    if let Some(src) = walk_passthrough(nodes, v) {
                        if !visited.contains(&src) {
                            stack.push((src, depth + 1));
                        }
                    }
                }
            }
        }
    }
    None
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Conservative heuristic: accept human-ish prompt strings, reject
/// numbers/gibberish.
fn looks_like_prompt_string(value: Option<&Value>) -> bool {
    let Some(s) = value.and_then(Value::as_str) else {
        return false;
    };
    let s = s.trim();
    if s.len() < 6 {
        return false;
    }
    if s.chars()
        .all(|c| c.is_ascii_digit() || c.is_whitespace() || matches!(c, '.' | ',' | '+' | '-'))
    {
        return false;
    }
    if s.chars().any(|c| (c as u32) < 9) {
        return false;
    }
    s.chars().any(char::is_alphabetic)
}

/// A node with textual inputs AND a linked `clip` input. Avoids "guessing"
/// prompts from unrelated nodes.
fn looks_like_text_encoder(node: &Value) -> bool {
    let ins = inputs_of(node);
    if !ins.get("clip").map(is_link).unwrap_or(false) {
        return false;
    }
    for key in ["text", "prompt", "text_g", "text_l", "instruction"] {
        match ins.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return true,
            Some(v) if is_link(v) => return true,
            _ => {}
        }
    }
    false
}

/// Custom nodes that output CONDITIONING directly without a `clip` link but
/// still hold prompt text. Only accept clearly conditioning/prompt-related
/// node types.
fn looks_like_conditioning_text(node: &Value) -> bool {
    let ct = lower_type(node);
    if !ct.contains("conditioning") && !ct.contains("prompt") && !ct.contains("textencode") {
        return false;
    }
    let ins = inputs_of(node);
    for key in ["text", "prompt", "text_g", "text_l", "instruction"] {
        let v = ins.get(key);
        if looks_like_prompt_string(v) {
            return true;
        }
        if v.map(is_link).unwrap_or(false) {
            return true;
        }
    }
    false
}

/// DFS upstream from a conditioning link, collecting text-encoder-like node
/// ids. Expansion is restricted to conditioning composition and passthrough
/// nodes; `ConditioningZeroOut` chains are pruned on the negative branch
/// because they don't represent a user-authored negative prompt.
fn collect_text_encoder_nodes(
    nodes: &NodeMap,
    start_link: &Value,
    limits: Limits,
    branch: Option<&str>,
) -> Vec<String> {
    let Some(start_id) = walk_passthrough(nodes, start_link) else {
        return Vec::new();
    };

    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<(String, usize)> = vec![(start_id, 0)];
    let mut found: Vec<String> = Vec::new();

    let should_expand = |node: &Value| -> bool {
        let ct = lower_type(node);
        if branch == Some("negative") && ct.contains("conditioningzeroout") {
            return false;
        }
        if ct.contains("conditioningsetarea") {
            return true;
        }
        if is_reroute(node) {
            return true;
        }
        if ct.contains("conditioning") {
            return true;
        }
        let ins = inputs_of(node);
        if ins.keys().any(|k| k.to_ascii_lowercase().contains("conditioning")) {
            return true;
        }
        // Wan/VHS wrappers pass conditioning through nodes exposing
        // `positive`/`negative` links without "Conditioning" in the name.
        if let Some(branch) = branch {
            if ins.get(branch).map(is_link).unwrap_or(false) {
                return true;
            }
        }
        ins.get("positive").map(is_link).unwrap_or(false)
            || ins.get("negative").map(is_link).unwrap_or(false)
    };

    while let Some((nid, depth)) = stack.pop() {
        if visited.len() >= limits.max_link_nodes || depth > limits.max_graph_depth {
            continue;
        }
        if !visited.insert(nid.clone()) {
            continue;
        }
        let Some(node) = nodes.get(&nid) else { continue };

        if looks_like_text_encoder(node) || looks_like_conditioning_text(node) {
            found.push(nid);
            continue;
        }
        if !should_expand(node) {
            continue;
        }

        let ins = inputs_of(node);

        // When a branch is requested and the node exposes it explicitly,
        // follow only that path to avoid mixing pos/neg prompts.
        if let Some(branch_key) = branch {
            if let Some(v) = ins.get(branch_key).filter(|v| is_link(v)) {
                if let Some(src) = walk_passthrough(nodes, v) {
                    if !visited.contains(&src) {
                        stack.push((src, depth + 1));
                    }
                }
                continue;
            }
        }

        for (k, v) in ins {
            let k_s = k.to_ascii_lowercase();
            if branch == Some("positive")
                && (matches!(k_s.as_str(), "negative" | "neg" | "negative_prompt")
                    || k_s.starts_with("negative_"))
            {
                continue;
            }
            if branch == Some("negative")
                && (matches!(k_s.as_str(), "positive" | "pos" | "positive_prompt")
                    || k_s.starts_with("positive_"))
            {
                continue;
            }
            if is_link(v) {
                if let Some(src) = walk_passthrough(nodes, v) {
                    if !visited.contains(&src) {
                        stack.push((src, depth + 1));
                    }
                }
            }
        }
    }

    found.sort_by_key(|nid| nid_key(nid));
    found
}

fn resolve_scalar_from_link<'a>(nodes: &'a NodeMap, value: &Value) -> Option<&'a Value> {
    let src_id = walk_passthrough(nodes, value)?;
    let node = nodes.get(&src_id)?;
    let ins = inputs_of(node);
    for k in [
        "seed", "value", "number", "int", "float", "text", "string", "prompt", "input", "text_a",
        "text_b",
    ] {
        if let Some(v) = scalar(ins.get(k)) {
            return Some(v);
        }
    }
    None
}

/// Collect prompt text fragments from a conditioning link as (text, source)
/// pairs in deterministic order. Never invents text.
fn collect_texts_from_conditioning(
    nodes: &NodeMap,
    start_link: &Value,
    limits: Limits,
    branch: Option<&str>,
) -> Vec<(String, String)> {
    let node_ids = collect_text_encoder_nodes(nodes, start_link, limits, branch);
    let mut out = Vec::new();
    for nid in node_ids {
        let Some(node) = nodes.get(&nid) else { continue };
        let ins = inputs_of(node);
        let mut candidates: Vec<String> = Vec::new();
        for key in ["text", "prompt", "text_g", "text_l", "instruction"] {
            match ins.get(key) {
                Some(Value::String(s)) if !s.trim().is_empty() => {
                    candidates.push(s.trim().to_string());
                }
                Some(v) if is_link(v) => {
                    let resolved = resolve_scalar_from_link(nodes, v);
                    if looks_like_prompt_string(resolved) {
                        if let Some(s) = resolved.and_then(Value::as_str) {
                            candidates.push(s.trim().to_string());
                        }
                    }
                }
                _ => {}
            }
        }
        if !candidates.is_empty() {
            out.push((candidates.join("\n"), source_of(nodes, &nid)));
        }
    }
    out
}

fn join_texts(items: &[(String, String)]) -> Option<(String, String)> {
    if items.is_empty() {
        return None;
    }
    let text = items
        .iter()
        .map(|(t, _)| t.as_str())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();
    if text.is_empty() {
        return None;
    }
    let sources: Vec<&str> = items.iter().map(|(_, s)| s.as_str()).collect();
    let distinct: HashSet<&&str> = sources.iter().collect();
    let source = if distinct.len() <= 1 {
        sources[0].to_string()
    } else {
        format!("{} (+{})", sources[0], sources.len() - 1)
    };
    Some((text, source))
}

/// Wan/video stacks encode prompts into "text_embeds" via nodes like
/// WanVideoTextEncode which keep positive/negative as plain string inputs.
fn extract_posneg_from_text_embeds(
    nodes: &NodeMap,
    text_embeds_link: &Value,
) -> (Option<(String, String)>, Option<(String, String)>) {
    let Some(src_id) = walk_passthrough(nodes, text_embeds_link) else {
        return (None, None);
    };
    let Some(node) = nodes.get(&src_id) else {
        return (None, None);
    };
    let ins = inputs_of(node);

    let get_str = |keys: &[&str]| -> Option<String> {
        for k in keys {
            if let Some(s) = ins.get(*k).and_then(Value::as_str) {
                let s = s.trim();
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            }
        }
        None
    };

    // WanVideoTextEncode uses positive_prompt/negative_prompt,
    // HyVideoTextEncode uses prompt.
    let pos = get_str(&["positive", "prompt", "text", "text_g", "text_l", "positive_prompt"]);
    let neg = get_str(&["negative", "negative_prompt"]);

    let source = source_of(nodes, &src_id);
    (
        pos.map(|p| (p, source.clone())),
        neg.map(|n| (n, source.clone())),
    )
}

/// Fallback extraction for KSampler values stored in LiteGraph
/// `widgets_values`. Common order:
/// `[seed, control_after_generate, steps, cfg, sampler_name, scheduler, denoise]`
fn extract_ksampler_widget_params(node: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    if !lower_type(node).contains("ksampler") {
        return out;
    }
    let Some(widgets) = node.get("widgets_values").and_then(Value::as_array) else {
        return out;
    };
    let mut put = |key: &str, idx: usize| {
        if let Some(v) = widgets.get(idx) {
            out.insert(key.to_string(), v.clone());
        }
    };
    put("seed", 0);
    put("steps", 2);
    put("cfg", 3);
    put("sampler_name", 4);
    put("scheduler", 5);
    put("denoise", 6);
    out
}

/// Best-effort lyrics extraction for audio text-encode nodes (AceStep-like).
fn extract_lyrics(nodes: &NodeMap) -> Option<(String, Option<Value>, String)> {
    for (nid, node) in nodes {
        let ct = lower_type(node);
        if !ct.contains("textencode") && !ct.contains("lyrics") {
            continue;
        }
        let ins = inputs_of(node);

        let mut lyrics: Option<String> = None;
        for key in ["lyrics", "lyric", "lyric_text", "text_lyrics"] {
            if let Some(s) = ins.get(key).and_then(Value::as_str) {
                if !s.trim().is_empty() {
                    lyrics = Some(s.trim().to_string());
                    break;
                }
            }
        }

        let mut strength: Option<Value> = None;
        for key in ["lyrics_strength", "lyric_strength"] {
            if let Some(v) = scalar(ins.get(key)) {
                strength = Some(v.clone());
                break;
            }
        }

        // AceStep: widgets_values[0]=tags, [1]=lyrics, [2]=lyrics_strength
        if let Some(widgets) = node.get("widgets_values").and_then(Value::as_array) {
            if lyrics.is_none() {
                if let Some(s) = widgets.get(1).and_then(Value::as_str) {
                    if !s.trim().is_empty() {
                        lyrics = Some(s.trim().to_string());
                    }
                }
            }
            if strength.is_none() {
                strength = scalar(widgets.get(2)).cloned();
            }
        }

        if let Some(lyrics) = lyrics {
            return Some((lyrics, strength, source_of(nodes, nid)));
        }
    }
    None
}

/// Walk the model chain upstream collecting LoRAs and loader identities,
/// stopping at a checkpoint/unet/diffusion loader.
fn trace_model_chain(
    nodes: &NodeMap,
    model_link: &Value,
    confidence: &str,
) -> (Map<String, Value>, Vec<Value>) {
    let mut loras: Vec<Value> = Vec::new();
    let mut models: Map<String, Value> = Map::new();

    let mut current_link = Some(model_link.clone());
    let mut hops = 0;
    while let Some(link) = current_link.take() {
        hops += 1;
        if hops >= 80 {
            break;
        }
        let Some(node_id) = walk_passthrough(nodes, &link) else {
            break;
        };
        let Some(node) = nodes.get(&node_id) else { break };
        let ct = lower_type(node);
        let ins = inputs_of(node);
        let source = source_of(nodes, &node_id);

        let first_model_string = || -> Option<String> {
            for k in [
                "ckpt_name",
                "checkpoint",
                "checkpoint_name",
                "model_name",
                "model",
                "diffusion_name",
                "diffusion",
                "diffusion_model",
                "unet_name",
                "unet",
            ] {
                if let Some(s) = ins.get(k).and_then(Value::as_str) {
                    if !s.trim().is_empty() {
                        return Some(s.trim().to_string());
                    }
                }
            }
            // Last resort: any model-like filename among the inputs.
            for v in ins.values() {
                if let Some(s) = v.as_str() {
                    let lower = s.trim().to_lowercase().replace('\\', "/");
                    if crate::metadata::parsing::MODEL_EXTS
                        .iter()
                        .any(|ext| lower.ends_with(ext))
                    {
                        return Some(s.trim().to_string());
                    }
                }
            }
            None
        };

        // Custom LoRA loaders may not contain "lora" in the class type but
        // expose `lora_name` + a linked `model` input.
        let lora_ish = ct.contains("lora")
            || (ins.get("lora_name").is_some() && ins.get("model").map(is_link).unwrap_or(false));
        if lora_ish {
            // rgthree "Power Lora Loader" stores multiple LoRAs under
            // lora_1/lora_2/... objects instead of a flat `lora_name`.
            for (k, v) in ins {
                if !k.to_ascii_lowercase().starts_with("lora_") {
                    continue;
                }
                let Some(entry) = v.as_object() else { continue };
                if entry.get("on") == Some(&Value::Bool(false)) {
                    continue;
                }
                let name = entry
                    .get("lora")
                    .or_else(|| entry.get("lora_name"))
                    .or_else(|| entry.get("name"))
                    .and_then(Value::as_str)
                    .and_then(clean_model_name);
                let Some(name) = name else { continue };
                let strength = entry
                    .get("strength")
                    .or_else(|| entry.get("strength_model"))
                    .or_else(|| entry.get("weight"))
                    .or_else(|| entry.get("lora_strength"));
                let strength_clip = entry.get("strength_clip").or_else(|| entry.get("clip_strength"));
                loras.push(json!({
                    "name": name,
                    "strength_model": strength,
                    "strength_clip": strength_clip,
                    "confidence": confidence,
                    "source": format!("{source}:{k}"),
                }));
            }

            let name = ins
                .get("lora_name")
                .or_else(|| ins.get("lora"))
                .or_else(|| ins.get("name"))
                .and_then(Value::as_str)
                .and_then(clean_model_name);
            if let Some(name) = name {
                let strength_model = ins
                    .get("strength_model")
                    .or_else(|| ins.get("strength"))
                    .or_else(|| ins.get("weight"))
                    .or_else(|| ins.get("lora_strength"));
                let strength_clip = ins.get("strength_clip").or_else(|| ins.get("clip_strength"));
                loras.push(json!({
                    "name": name,
                    "strength_model": strength_model,
                    "strength_clip": strength_clip,
                    "confidence": confidence,
                    "source": source,
                }));
            }

            current_link = ins.get("model").filter(|v| is_link(v)).cloned();
            if current_link.is_some() {
                continue;
            }
            break;
        }

        // Model sampling / patch nodes (e.g. ModelSamplingSD3) just transform
        // a model object; follow their `model` input.
        if (ct.contains("modelsampling") || ct.contains("model_sampling"))
            && ins.get("model").map(is_link).unwrap_or(false)
        {
            current_link = ins.get("model").cloned();
            continue;
        }

        // Diffusion model loaders (video stacks, gguf, unet-only, ...).
        if ct.contains("loaddiffusionmodel")
            || ct.contains("diffusionmodel")
            || ct.contains("unetloader")
            || ct.contains("loadunet")
            || ct == "unet"
            || ct.contains("videomodel")
        {
            let unet = ins
                .get("unet_name")
                .or_else(|| ins.get("unet"))
                .and_then(Value::as_str)
                .and_then(clean_model_name);
            let diffusion = ins
                .get("diffusion_name")
                .or_else(|| ins.get("diffusion"))
                .or_else(|| ins.get("model_name"))
                .or_else(|| ins.get("ckpt_name"))
                .or_else(|| ins.get("model"))
                .and_then(Value::as_str)
                .and_then(clean_model_name);
            if let Some(unet) = unet {
                let source = source.clone();
                models.entry("unet".to_string()).or_insert_with(|| {
                    json!({"name": unet, "confidence": confidence, "source": source})
                });
            }
            if let Some(diffusion) = diffusion {
                let source = source.clone();
                models.entry("diffusion".to_string()).or_insert_with(|| {
                    json!({"name": diffusion, "confidence": confidence, "source": source})
                });
            }
            if let Some(next) = ins.get("model").filter(|v| is_link(v)) {
                current_link = Some(next.clone());
                continue;
            }
            break;
        }

        // Generic "model loader" custom nodes (e.g. WanVideoModelLoader)
        // expose only a model path without "ckpt_name" naming.
        if ct.contains("modelloader")
            || ct.contains("model_loader")
            || ct.contains("model-loader")
            || ct.contains("ltxvideomodel")
            || ct.contains("wanvideomodel")
            || ct.contains("hyvideomodel")
            || ct.contains("cogvideomodel")
        {
            if let Some(name) = first_model_string().as_deref().and_then(clean_model_name) {
                // Video wrappers use a single diffusion model file; map it to
                // checkpoint.
                models.entry("checkpoint".to_string()).or_insert_with(|| {
                    json!({"name": name, "confidence": confidence, "source": source})
                });
            }
            break;
        }

        let is_checkpoint_loader = ["checkpointloader", "checkpoint_loader", "loadcheckpoint", "load_checkpoint"]
            .iter()
            .any(|s| ct.contains(s));
        if is_checkpoint_loader || ins.get("ckpt_name").is_some() {
            let ckpt = ins
                .get("ckpt_name")
                .or_else(|| ins.get("model_name"))
                .and_then(Value::as_str)
                .and_then(clean_model_name);
            if let Some(ckpt) = ckpt {
                models.entry("checkpoint".to_string()).or_insert_with(|| {
                    json!({"name": ckpt, "confidence": confidence, "source": source})
                });
            }
            break;
        }

        // Generic switch/selector nodes in the model chain (e.g. rgthree):
        // follow the single upstream link when present.
        if (ct.contains("switch") || ct.contains("selector"))
            && !ins.get("model").map(is_link).unwrap_or(false)
        {
            let links: Vec<&Value> = ins.values().filter(|v| is_link(v)).collect();
            if links.len() == 1 {
                current_link = Some(links[0].clone());
                continue;
            }
        }

        // Any node exposing a model-like filename is recorded as checkpoint.
        if !models.contains_key("checkpoint") {
            if let Some(name) = first_model_string().as_deref().and_then(clean_model_name) {
                models.insert(
                    "checkpoint".to_string(),
                    json!({"name": name, "confidence": confidence, "source": source}),
                );
            }
        }

        current_link = ins.get("model").filter(|v| is_link(v)).cloned();
        if current_link.is_none() {
            break;
        }
    }

    (models, loras)
}

fn trace_named_loader(
    nodes: &NodeMap,
    link: &Value,
    keys: &[&str],
    confidence: &str,
) -> Option<Value> {
    let mut current_link = Some(link.clone());
    let mut hops = 0;
    while let Some(link) = current_link.take() {
        hops += 1;
        if hops >= 80 {
            return None;
        }
        let node_id = walk_passthrough(nodes, &link)?;
        let node = nodes.get(&node_id)?;
        let ins = inputs_of(node);
        let source = source_of(nodes, &node_id);

        // DualCLIPLoader-style nodes expose clip_name1/clip_name2.
        if keys.contains(&"clip_name1") && keys.contains(&"clip_name2") {
            let c1 = ins.get("clip_name1").and_then(Value::as_str).and_then(clean_model_name);
            let c2 = ins.get("clip_name2").and_then(Value::as_str).and_then(clean_model_name);
            if let (Some(c1), Some(c2)) = (c1, c2) {
                return Some(json!({
                    "name": format!("{c1} + {c2}"),
                    "confidence": confidence,
                    "source": source,
                }));
            }
        }
        for k in keys {
            if let Some(name) = ins.get(*k).and_then(Value::as_str).and_then(clean_model_name) {
                return Some(json!({"name": name, "confidence": confidence, "source": source}));
            }
        }
        for follow in ["clip", "vae", "model"] {
            if let Some(next) = ins.get(follow).filter(|v| is_link(v)) {
                current_link = Some(next.clone());
                break;
            }
        }
        current_link.as_ref()?;
    }
    None
}

/// Find the VAEDecode closest to the sink and trace its `vae` input.
fn trace_vae_from_sink(
    nodes: &NodeMap,
    sink_start_id: &str,
    confidence: &str,
    limits: Limits,
) -> Option<Value> {
    let dist = collect_upstream(nodes, sink_start_id, limits);
    let mut candidates: Vec<(usize, (i64, String))> = dist
        .iter()
        .filter(|(nid, _)| {
            nodes
                .get(*nid)
                .map(|n| lower_type(n).contains("vaedecode"))
                .unwrap_or(false)
        })
        .map(|(nid, d)| (*d, nid_key(nid)))
        .collect();
    candidates.sort();
    let node_id = &candidates.first()?.1 .1;
    let node = nodes.get(node_id)?;
    let vae_link = inputs_of(node).get("vae").filter(|v| is_link(v))?;
    trace_named_loader(nodes, vae_link, &["vae_name", "name"], confidence)
}

const CLIP_NAME_KEYS: &[&str] = &[
    "clip_name",
    "clip_name1",
    "clip_name2",
    "clip_name_l",
    "clip_name_g",
    "name",
];

fn trace_clip_from_text_encoder(
    nodes: &NodeMap,
    encoder_link: &Value,
    confidence: &str,
    limits: Limits,
) -> Option<Value> {
    if let Some(encoder_id) = walk_passthrough(nodes, encoder_link) {
        if let Some(node) = nodes.get(&encoder_id) {
            if let Some(clip_link) = inputs_of(node).get("clip").filter(|v| is_link(v)) {
                return trace_named_loader(nodes, clip_link, CLIP_NAME_KEYS, confidence);
            }
        }
    }

    // The link may point at a Conditioning* node; collect upstream encoders.
    let encoders = collect_text_encoder_nodes(nodes, encoder_link, limits, Some("positive"));
    let node = nodes.get(encoders.first()?)?;
    let clip_link = inputs_of(node).get("clip").filter(|v| is_link(v))?;
    trace_named_loader(nodes, clip_link, CLIP_NAME_KEYS, confidence)
}

fn trace_clip_skip(nodes: &NodeMap, clip_link: &Value, confidence: &str) -> Option<Value> {
    let mut current_link = Some(clip_link.clone());
    let mut hops = 0;
    while let Some(link) = current_link.take() {
        hops += 1;
        if hops >= 60 {
            return None;
        }
        let node_id = walk_passthrough(nodes, &link)?;
        let node = nodes.get(&node_id)?;
        let ct = lower_type(node).replace('_', "");
        let ins = inputs_of(node);
        if ct.contains("clipsetlastlayer") {
            let val = ins
                .get("stop_at_clip_layer")
                .or_else(|| ins.get("clip_stop_at_layer"))
                .or_else(|| ins.get("clip_skip"));
            return field(scalar(val), confidence, &source_of(nodes, &node_id));
        }
        current_link = ins.get("clip").filter(|v| is_link(v)).cloned();
        current_link.as_ref()?;
    }
    None
}

/// Walk upstream from the sampler's latent input until an EmptyLatentImage
/// (or any node exposing width+height) is found.
fn trace_size(nodes: &NodeMap, latent_link: &Value, confidence: &str) -> Option<Value> {
    let mut current_link = Some(latent_link.clone());
    let mut hops = 0;
    while let Some(link) = current_link.take() {
        hops += 1;
        if hops >= 80 {
            return None;
        }
        let node_id = walk_passthrough(nodes, &link)?;
        let node = nodes.get(&node_id)?;
        let ct = lower_type(node);
        let ins = inputs_of(node);
        let source = source_of(nodes, &node_id);

        let w = scalar(ins.get("width"));
        let h = scalar(ins.get("height"));
        if ct.contains("emptylatentimage") || (w.is_some() && h.is_some()) {
            let (w, h) = (w?, h?);
            return Some(json!({
                "width": w,
                "height": h,
                "confidence": confidence,
                "source": source,
            }));
        }

        // Pass-through along the latent/sample link.
        current_link = ["samples", "latent", "latent_image", "image"]
            .iter()
            .find_map(|k| ins.get(*k).filter(|v| is_link(v)).cloned());
        current_link.as_ref()?;
    }
    None
}

fn extract_workflow_metadata(workflow: Option<&Value>) -> Map<String, Value> {
    let mut meta = Map::new();
    if let Some(extra) = workflow.and_then(|w| w.get("extra")).and_then(Value::as_object) {
        for k in ["title", "author", "license", "version", "description"] {
            if let Some(v) = extra.get(k) {
                let s = value_to_string(v).trim().to_string();
                if !s.is_empty() {
                    meta.insert(k.to_string(), Value::String(s));
                }
            }
        }
    }
    meta
}

fn node_title(node: &Value) -> String {
    node.get("_meta")
        .and_then(|m| m.get("title"))
        .or_else(|| node.get("title"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Determine how an input node is used (first_frame, control_video,
/// mask/inpaint, source, ...) by a limited-depth BFS downstream to the first
/// meaningful consumer. Competing labels collapse by a fixed priority.
fn detect_input_role(nodes: &NodeMap, subject_node_id: &str) -> &'static str {
    let mut roles: HashSet<&'static str> = HashSet::new();
    let mut frontier: HashSet<String> = HashSet::new();
    let mut visited: HashSet<String> = HashSet::new();
    frontier.insert(subject_node_id.to_string());
    visited.insert(subject_node_id.to_string());

    let subject = nodes.get(subject_node_id);
    if let Some(subject) = subject {
        let title = node_title(subject);
        let ins = inputs_of(subject);
        let filename = ins
            .get("image")
            .or_else(|| ins.get("video"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_ascii_lowercase();

        if title.contains("first") || filename.contains("first") || title.contains("start") {
            roles.insert("first_frame");
        }
        if title.contains("last") || filename.contains("last") || title.contains("end") {
            roles.insert("last_frame");
        }
        if title.contains("control") {
            roles.insert("control");
        }
        if title.contains("mask") || title.contains("inpaint") {
            roles.insert("mask/inpaint");
        }
        if title.contains("depth") {
            roles.insert("depth");
        }
        if title.contains("reference") || title.contains("ref") || title.contains("style") {
            roles.insert("style/reference");
        }
    }

    for _ in 0..8 {
        if frontier.is_empty() {
            break;
        }
        let mut next_frontier: HashSet<String> = HashSet::new();

        for (nid, node) in nodes {
            if visited.contains(nid) {
                continue;
            }
            let ins = inputs_of(node);
            let mut hit_input_name = String::new();
            let mut linked = false;
            for (k, v) in ins {
                if let Some((src_id, _)) = resolve_link(v) {
                    if frontier.contains(&src_id) {
                        linked = true;
                        hit_input_name = k.to_ascii_lowercase();
                        break;
                    }
                }
            }
            if !linked {
                continue;
            }

            let target_type = lower_type(node);
            if target_type.contains("ipadapter") {
                roles.insert("style/reference");
            } else if target_type.contains("controlnet") {
                let subject_is_video = subject
                    .map(|s| lower_type(s).contains("video"))
                    .unwrap_or(false);
                roles.insert(if subject_is_video {
                    "control_video"
                } else {
                    "control_image"
                });
            } else if hit_input_name.contains("mask")
                || target_type.contains("mask")
                || target_type.contains("inpaint")
            {
                roles.insert("mask/inpaint");
            } else if target_type.contains("depth") || hit_input_name.contains("depth") {
                roles.insert("depth");
            } else if target_type.contains("vace") {
                // VACE uses control video/image for video generation.
                if hit_input_name.contains("control") || hit_input_name.contains("reference") {
                    roles.insert("control_video");
                } else if hit_input_name.contains("start") || hit_input_name.contains("first") {
                    roles.insert("first_frame");
                } else if hit_input_name.contains("end") || hit_input_name.contains("last") {
                    roles.insert("last_frame");
                } else {
                    roles.insert("source");
                }
            } else if target_type.contains("starttoend") || target_type.contains("framerange") {
                if hit_input_name.contains("start") || hit_input_name.contains("first") {
                    roles.insert("first_frame");
                } else if hit_input_name.contains("end") || hit_input_name.contains("last") {
                    roles.insert("last_frame");
                } else {
                    roles.insert("frame_range");
                }
            } else if hit_input_name.contains("first") || hit_input_name.contains("start") {
                roles.insert("first_frame");
            } else if hit_input_name.contains("last") || hit_input_name.contains("end") {
                roles.insert("last_frame");
            } else if target_type.contains("img2vid") || target_type.contains("i2v") {
                roles.insert("source");
            } else if target_type.contains("vaeencode") {
                roles.insert("source");
            } else if target_type.contains("sampler") {
                if hit_input_name.contains("image") || hit_input_name.contains("latent") {
                    roles.insert("source");
                }
            } else {
                // Intermediate node (Resize, Upscale, ...): keep tracing what
                // it connects to.
                next_frontier.insert(nid.clone());
            }
        }

        visited.extend(next_frontier.iter().cloned());
        frontier = next_frontier;
    }

    // Priority resolution, most specific first.
    for role in [
        "first_frame",
        "last_frame",
        "mask/inpaint",
        "depth",
        "control_video",
        "control_image",
        "control",
        "source",
        "style/reference",
        "frame_range",
    ] {
        if roles.contains(role) {
            return role;
        }
    }
    "input"
}

/// Extract input file references (LoadImage/LoadVideo/LoadAudio, etc.) with
/// usage context.
fn extract_input_files(nodes: &NodeMap) -> Vec<Value> {
    let mut inputs = Vec::new();
    let mut seen: HashSet<(String, String, String)> = HashSet::new();

    for (nid, node) in nodes {
        let ntype = lower_type(node);
        let clean: String = ntype.chars().filter(|c| !matches!(c, ' ' | '_' | '-')).collect();

        let mut is_image_load = clean.contains("loadimage")
            || clean.contains("imageloader")
            || clean.contains("inputimage");
        let is_video_load = clean.contains("loadvideo")
            || clean.contains("videoloader")
            || clean.contains("inputvideo");
        let is_audio_load = clean.contains("loadaudio")
            || clean.contains("audioloader")
            || clean.contains("inputaudio");
        if clean.contains("ipadapter") && clean.contains("image") {
            is_image_load = true;
        }
        if !(is_image_load || is_video_load || is_audio_load) {
            continue;
        }

        let ins = inputs_of(node);
        let mut filename = [
            "image",
            "video",
            "filename",
            "audio",
            "file",
            "media_source",
            "path",
            "image_path",
            "video_path",
            "audio_path",
        ]
        .iter()
        .find_map(|k| ins.get(*k).and_then(Value::as_str))
        .map(str::to_string);

        // Workflow-format widgets: find the first string that looks like a
        // file path.
        if filename.is_none() {
            if let Some(widgets) = node.get("widgets_values").and_then(Value::as_array) {
                filename = widgets
                    .iter()
                    .filter_map(Value::as_str)
                    .find(|w| (w.contains('.') || w.contains('/') || w.contains('\\')) && w.len() > 4)
                    .map(str::to_string);
            }
        }

        let Some(filename) = filename.filter(|f| !f.is_empty()) else {
            continue;
        };
        let subfolder = ins
            .get("subfolder")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let key = (filename.clone(), subfolder.clone(), ntype.clone());
        if !seen.insert(key) {
            continue;
        }

        let role = detect_input_role(nodes, nid);
        let file_type = if is_audio_load {
            "audio"
        } else if is_video_load {
            "video"
        } else {
            "image"
        };
        inputs.push(json!({
            "filename": filename,
            "subfolder": subfolder,
            "type": file_type,
            "node_id": nid,
            "folder_type": ins.get("type").and_then(Value::as_str).unwrap_or("input"),
            "role": role,
        }));
    }
    inputs
}

/// Collect all distinct positive and negative prompts across up to the first
/// `max_sinks` sinks, for multi-output workflows.
fn collect_all_prompts_from_sinks(
    nodes: &NodeMap,
    sinks: &[String],
    limits: Limits,
) -> (Vec<String>, Vec<String>) {
    const MAX_SINKS: usize = 20;
    let mut all_positive = Vec::new();
    let mut all_negative = Vec::new();
    let mut seen_pos = HashSet::new();
    let mut seen_neg = HashSet::new();

    for sink_id in sinks.iter().take(MAX_SINKS) {
        let (sampler_id, _) = select_primary_sampler(nodes, sink_id, limits);
        let sampler_id = sampler_id.or_else(|| select_advanced_sampler(nodes, sink_id, limits).0);
        let Some(sampler_id) = sampler_id else { continue };
        let Some(sampler) = nodes.get(&sampler_id) else {
            continue;
        };
        let ins = inputs_of(sampler);

        if let Some(link) = ins.get("positive").filter(|v| is_link(v)) {
            for (text, _) in collect_texts_from_conditioning(nodes, link, limits, Some("positive")) {
                let t = text.trim().to_string();
                if !t.is_empty() && seen_pos.insert(t.clone()) {
                    all_positive.push(t);
                }
            }
        }
        if let Some(link) = ins.get("negative").filter(|v| is_link(v)) {
            for (text, _) in collect_texts_from_conditioning(nodes, link, limits, Some("negative")) {
                let t = text.trim().to_string();
                if !t.is_empty() && seen_neg.insert(t.clone()) {
                    all_negative.push(t);
                }
            }
        }
    }
    (all_positive, all_negative)
}

/// Classify the workflow as T2I/I2I/T2V/I2V/V2V and audio variants.
fn determine_workflow_type(nodes: &NodeMap, sink_node_id: &str, sampler_id: Option<&str>) -> String {
    // 1. Output type from the sink class.
    let sink_type = nodes.get(sink_node_id).map(lower_type).unwrap_or_default();
    let is_audio_out =
        sink_type.contains("audio") && !sink_type.contains("image") && !sink_type.contains("video");
    let is_video_out = !is_audio_out
        && (sink_type.contains("video") || sink_type.contains("animate") || sink_type.contains("gif"));
    let suffix = if is_audio_out {
        "A"
    } else if is_video_out {
        "V"
    } else {
        "I"
    };

    // 2a. Scan the whole graph for input signals. This catches
    // reference-based workflows (Redux, IP-Adapter, ControlNet, ...).
    let mut has_image_input = false;
    let mut has_video_input = false;
    let mut has_audio_input = false;

    for node in nodes.values() {
        let ct = lower_type(node);

        if ct.contains("vaeencode") {
            let ins = inputs_of(node);
            let pixel_link = ins.get("pixels").or_else(|| ins.get("image"));
            if let Some(pixel_link) = pixel_link.filter(|v| is_link(v)) {
                if let Some(pix_src_id) = walk_passthrough(nodes, pixel_link) {
                    let pct = nodes.get(&pix_src_id).map(lower_type).unwrap_or_default();
                    if pct.contains("loadvideo") || pct.contains("videoloader") {
                        has_video_input = true;
                    } else if pct.contains("loadimage") || pct.contains("imageloader") {
                        has_image_input = true;
                    }
                }
            }
        }

        if ct.contains("loadimage") || ct.contains("imageloader") {
            has_image_input = true;
        }
        if ct.contains("loadvideo") || ct.contains("videoloader") {
            has_video_input = true;
        }
        if ct.contains("loadaudio")
            || ct.contains("audioloader")
            || (ct.contains("load") && ct.contains("audio"))
        {
            has_audio_input = true;
        }
    }

    // 2b. Trace the main latent path from the sampler for EmptyLatent vs
    // VAEEncode vs LoadLatent.
    if let Some(sampler) = sampler_id.and_then(|id| nodes.get(id)) {
        let ins = inputs_of(sampler);
        let latent_link = ins
            .get("latent_image")
            .or_else(|| ins.get("samples"))
            .or_else(|| ins.get("latent"));
        if let Some(latent_link) = latent_link.filter(|v| is_link(v)) {
            let mut curr_id = walk_passthrough(nodes, latent_link);
            let mut hops = 0;
            while let Some(nid) = curr_id.take() {
                hops += 1;
                if hops >= 15 {
                    break;
                }
                let Some(node) = nodes.get(&nid) else { break };
                let ct = lower_type(node);
                if ct.contains("emptylatent") {
                    break;
                }
                if ct.contains("vaeencode") {
                    let ins = inputs_of(node);
                    let pixel_link = ins.get("pixels").or_else(|| ins.get("image"));
                    match pixel_link
                        .filter(|v| is_link(v))
                        .and_then(|v| walk_passthrough(nodes, v))
                    {
                        Some(pix_src_id) => {
                            let pct = nodes.get(&pix_src_id).map(lower_type).unwrap_or_default();
                            if pct.contains("loadvideo") || pct.contains("videoloader") {
                                has_video_input = true;
                            } else {
                                has_image_input = true;
                            }
                        }
                        None => has_image_input = true,
                    }
                    break;
                }
                if ct.contains("loadlatent") {
                    // Assume a loaded latent came from an image.
                    has_image_input = true;
                    break;
                }
                // Pass-through (LatentUpscale, Duplicate, ...).
                let next = ["samples", "latent", "latent_image"]
                    .iter()
                    .find_map(|k| inputs_of(node).get(*k).filter(|v| is_link(v)));
                match next.and_then(|v| walk_passthrough(nodes, v)) {
                    Some(next_id) => curr_id = Some(next_id),
                    None => break,
                }
            }
        }
    }

    // 3. Prefix priority: A > V > I > T.
    let prefix = if has_audio_input {
        "A"
    } else if has_video_input {
        "V"
    } else if has_image_input {
        "I"
    } else {
        "T"
    };
    format!("{prefix}2{suffix}")
}

fn extract_geninfo(
    nodes: &NodeMap,
    sinks: &[String],
    workflow_meta: &Map<String, Value>,
    limits: Limits,
) -> Option<Value> {
    let sink_id = &sinks[0];
    let (mut sampler_id, mut sampler_conf) = select_primary_sampler(nodes, sink_id, limits);
    let mut sampler_mode = "primary";

    if sampler_id.is_none() {
        let (id, conf) = select_advanced_sampler(nodes, sink_id, limits);
        if id.is_some() {
            sampler_mode = "advanced";
            sampler_conf = conf;
        }
        sampler_id = id;
    }
    if sampler_id.is_none() {
        let (id, conf) = select_any_sampler(nodes);
        if id.is_some() {
            sampler_mode = "global";
            sampler_conf = conf;
        }
        sampler_id = id;
    }

    // Marigold / Qwen-instruction workflows have no sampler proper; the
    // estimator/instruction node stands in.
    if sampler_id.is_none() {
        for (nid, node) in nodes {
            let ct = lower_type(node);
            if ct.contains("marigold") || (ct.contains("instruction") && ct.contains("qwen")) {
                sampler_id = Some(nid.clone());
                sampler_conf = "low";
                break;
            }
        }
    }

    let Some(sampler_id) = sampler_id else {
        let mut out = Map::new();
        if !workflow_meta.is_empty() {
            out.insert("metadata".into(), Value::Object(workflow_meta.clone()));
        }
        let input_files = extract_input_files(nodes);
        if !input_files.is_empty() {
            out.insert("inputs".into(), Value::Array(input_files));
        }
        if out.is_empty() {
            return None;
        }
        return Some(Value::Object(out));
    };

    // Stable upstream start for secondary traces (VAE, workflow type).
    let sink_start_id = nodes
        .get(sink_id)
        .and_then(pick_sink_inputs)
        .and_then(|link| walk_passthrough(nodes, link));

    let sampler_node = nodes.get(&sampler_id).cloned().unwrap_or(Value::Null);
    let sampler_source = format!("{}:{}", node_type(&sampler_node), sampler_id);
    let confidence = sampler_conf;
    let ins = inputs_of(&sampler_node).clone();
    let sampler_ct = lower_type(&sampler_node);
    let advanced = is_advanced_sampler(&sampler_node);

    let mut field_sources: Map<String, Value> = Map::new();
    let mut field_confidence: Map<String, Value> = Map::new();

    // Prompts
    let mut pos_val: Option<(String, String)> = None;
    let mut neg_val: Option<(String, String)> = None;
    let mut conditioning_link: Option<Value> = None;
    let mut guider_cfg_value: Option<Value> = None;
    let mut guider_cfg_source: Option<String> = None;
    let mut guider_model_link: Option<Value> = None;

    // Qwen instruction prompts live directly on the node.
    if sampler_ct.contains("instruction") && sampler_ct.contains("qwen") {
        if let Some(p) = ins
            .get("instruction")
            .or_else(|| ins.get("text"))
            .and_then(Value::as_str)
        {
            if !p.trim().is_empty() {
                pos_val = Some((
                    p.trim().to_string(),
                    format!("{sampler_source}:instruction"),
                ));
            }
        }
    }

    // FluxKohyaInferenceSampler (Kijai) stores the prompt directly.
    if sampler_ct.contains("flux") && sampler_ct.contains("trainer") {
        if let Some(p) = ins.get("prompt").and_then(Value::as_str) {
            if !p.trim().is_empty() {
                pos_val = Some((p.trim().to_string(), format!("{sampler_source}:prompt")));
            }
        }
    }

    // Wan/video stacks encode prompts into text embeds.
    if let Some(link) = ins
        .get("text_embeds")
        .or_else(|| ins.get("hyvid_embeds"))
        .filter(|v| is_link(v))
    {
        let (p, n) = extract_posneg_from_text_embeds(nodes, link);
        pos_val = pos_val.or(p);
        neg_val = neg_val.or(n);
    }

    if let Some(link) = ins.get("positive").filter(|v| is_link(v)) {
        let items = collect_texts_from_conditioning(nodes, link, limits, Some("positive"));
        if let Some(joined) = join_texts(&items) {
            pos_val = Some(joined);
        }
        conditioning_link = Some(link.clone());
    }
    if let Some(link) = ins.get("negative").filter(|v| is_link(v)) {
        let items = collect_texts_from_conditioning(nodes, link, limits, Some("negative"));
        if let Some(joined) = join_texts(&items) {
            neg_val = Some(joined);
        }
    }

    // Flux-style guidance pipelines pass conditioning through a guider node.
    if advanced {
        if let Some(guider_link) = ins.get("guider").filter(|v| is_link(v)) {
            let guider_id = walk_passthrough(nodes, guider_link);
            if let Some(guider_node) = guider_id.as_ref().and_then(|id| nodes.get(id)) {
                let gins = inputs_of(guider_node);
                if let Some(cond) = gins.get("conditioning").filter(|v| is_link(v)) {
                    conditioning_link = Some(cond.clone());
                    if pos_val.is_none() {
                        let items = collect_texts_from_conditioning(nodes, cond, limits, None);
                        if let Some(joined) = join_texts(&items) {
                            pos_val = Some(joined);
                        }
                    }
                }
                // CFGGuider-style guiders expose positive/negative links.
                if let Some(positive) = gins.get("positive").filter(|v| is_link(v)) {
                    if conditioning_link.is_none() {
                        conditioning_link = Some(positive.clone());
                    }
                    if pos_val.is_none() {
                        let items =
                            collect_texts_from_conditioning(nodes, positive, limits, Some("positive"));
                        if let Some(joined) = join_texts(&items) {
                            pos_val = Some(joined);
                        }
                    }
                }
                if neg_val.is_none() {
                    if let Some(negative) = gins.get("negative").filter(|v| is_link(v)) {
                        let items =
                            collect_texts_from_conditioning(nodes, negative, limits, Some("negative"));
                        if let Some(joined) = join_texts(&items) {
                            neg_val = Some(joined);
                        }
                    }
                }

                // Guidance scale sometimes lives on the guider node; otherwise
                // an upstream FluxGuidance provides it via conditioning.
                let cfg_val = scalar(gins.get("cfg"))
                    .or_else(|| scalar(gins.get("cfg_scale")))
                    .or_else(|| scalar(gins.get("guidance")));
                if let Some(cfg_val) = cfg_val {
                    guider_cfg_value = Some(cfg_val.clone());
                    guider_cfg_source = guider_id.as_ref().map(|id| source_of(nodes, id));
                } else if let Some(cond) = gins.get("conditioning") {
                    if let Some((g, src)) = trace_guidance_value(nodes, cond) {
                        guider_cfg_value = Some(json!(g));
                        guider_cfg_source = Some(src);
                    }
                }

                if let Some(model) = gins.get("model").filter(|v| is_link(v)) {
                    guider_model_link = Some(model.clone());
                }
            }
        }
    }

    // Last resort (still no guessing): some custom sampler nodes store prompt
    // strings directly.
    if pos_val.is_none() {
        for k in ["positive_prompt", "prompt", "positive", "text", "text_g", "text_l"] {
            let v = ins.get(k);
            if looks_like_prompt_string(v) {
                pos_val = Some((
                    v.and_then(Value::as_str).unwrap_or("").trim().to_string(),
                    format!("{sampler_source}:{k}"),
                ));
                break;
            }
        }
    }
    if neg_val.is_none() {
        for k in ["negative_prompt", "negative", "neg", "text_negative"] {
            let v = ins.get(k);
            if looks_like_prompt_string(v) {
                neg_val = Some((
                    v.and_then(Value::as_str).unwrap_or("").trim().to_string(),
                    format!("{sampler_source}:{k}"),
                ));
                break;
            }
        }
    }

    // Sampler params
    let mut sampler_name = scalar(ins.get("sampler_name"))
        .or_else(|| scalar(ins.get("sampler")))
        .map(value_to_string);
    if sampler_name.is_none() && sampler_ct.contains("marigold") {
        sampler_name = Some(node_type(&sampler_node).to_string());
    }
    let mut scheduler = scalar(ins.get("scheduler")).cloned();
    // Marigold uses denoise_steps.
    let mut steps = scalar(ins.get("steps"))
        .or_else(|| scalar(ins.get("denoise_steps")))
        .cloned();
    // embedded_guidance_scale is used by HunyuanVideoSampler.
    let mut cfg = scalar(ins.get("cfg"))
        .or_else(|| scalar(ins.get("cfg_scale")))
        .or_else(|| scalar(ins.get("guidance")))
        .or_else(|| scalar(ins.get("guidance_scale")))
        .or_else(|| scalar(ins.get("embedded_guidance_scale")))
        .cloned();
    let mut denoise = scalar(ins.get("denoise")).cloned();
    let mut seed_val = scalar(ins.get("seed")).cloned();
    if seed_val.is_none() {
        if let Some(link) = ins.get("seed").filter(|v| is_link(v)) {
            seed_val = resolve_scalar_from_link(nodes, link).cloned();
        }
    }

    // LiteGraph workflows keep KSampler scalar params in widgets_values.
    if sampler_name.is_none()
        || scheduler.is_none()
        || steps.is_none()
        || cfg.is_none()
        || denoise.is_none()
        || seed_val.is_none()
    {
        let widgets = extract_ksampler_widget_params(&sampler_node);
        if sampler_name.is_none() {
            sampler_name = scalar(widgets.get("sampler_name")).map(value_to_string);
        }
        if scheduler.is_none() {
            scheduler = scalar(widgets.get("scheduler")).cloned();
        }
        if steps.is_none() {
            steps = scalar(widgets.get("steps")).cloned();
        }
        if cfg.is_none() {
            cfg = scalar(widgets.get("cfg")).cloned();
        }
        if denoise.is_none() {
            denoise = scalar(widgets.get("denoise")).cloned();
        }
        if seed_val.is_none() {
            seed_val = scalar(widgets.get("seed")).cloned();
        }
    }

    let mut model_link_for_chain = ins.get("model").filter(|v| is_link(v)).cloned();
    if model_link_for_chain.is_none() {
        model_link_for_chain = guider_model_link.clone();
    }

    // Advanced sampler: sampler_name/steps/scheduler/denoise/seed live on
    // linked nodes.
    if advanced {
        if sampler_name.is_none() {
            if let Some(link) = ins.get("sampler").filter(|v| is_link(v)) {
                if let Some((name, _src)) = trace_sampler_name(nodes, link) {
                    sampler_name = Some(name);
                }
            }
        }
        if let Some(link) = ins.get("sigmas").filter(|v| is_link(v)) {
            let trace = trace_scheduler_sigmas(nodes, link);
            if steps.is_none() {
                if let Some(st) = trace.steps {
                    steps = Some(st);
                    if let Some(src) = &trace.source {
                        field_sources.insert("steps".into(), json!(src));
                    }
                    if let Some(conf) = trace.steps_confidence {
                        field_confidence.insert("steps".into(), json!(conf));
                    }
                }
            }
            if scheduler.is_none() {
                if let Some(sch) = trace.scheduler {
                    scheduler = Some(sch.clone());
                    if let Some(src) = &trace.source {
                        field_sources.insert("scheduler".into(), json!(src));
                    }
                }
            }
            if denoise.is_none() {
                if let Some(den) = trace.denoise {
                    denoise = Some(den.clone());
                    if let Some(src) = &trace.source {
                        field_sources.insert("denoise".into(), json!(src));
                    }
                }
            }
            if model_link_for_chain.is_none() {
                model_link_for_chain = trace.model_link.cloned();
            }
        }
        if seed_val.is_none() {
            if let Some(link) = ins.get("noise").filter(|v| is_link(v)) {
                if let Some((seed, src)) = trace_noise_seed(nodes, link) {
                    seed_val = Some(seed.clone());
                    field_sources.insert("seed".into(), json!(src));
                }
            }
        }
        if cfg.is_none() {
            if let Some(cond) = conditioning_link.as_ref() {
                if let Some((g, src)) = trace_guidance_from_conditioning(nodes, cond, limits) {
                    cfg = Some(g.clone());
                    field_sources.insert("cfg".into(), json!(src));
                }
            }
        }
    }

    if cfg.is_none() {
        if let Some(value) = guider_cfg_value {
            cfg = Some(value);
            if let Some(src) = guider_cfg_source {
                field_sources.insert("cfg".into(), json!(src));
            }
        }
    }

    // Model chain + LoRAs
    let (mut models, loras) = match model_link_for_chain.as_ref() {
        Some(link) => trace_model_chain(nodes, link, confidence),
        None => (Map::new(), Vec::new()),
    };

    // Related model loaders (non-diffusion), e.g. latent upscalers in video
    // workflows.
    if !models.contains_key("upscaler") {
        for (node_id, node) in nodes {
            let ct = lower_type(node);
            if !ct.contains("upscalemodelloader")
                && !ct.contains("upscale_model")
                && !ct.contains("latentupscale")
            {
                continue;
            }
            let ins2 = inputs_of(node);
            let name = ins2
                .get("model_name")
                .or_else(|| ins2.get("upscale_model"))
                .or_else(|| ins2.get("upscale_model_name"))
                .and_then(Value::as_str)
                .and_then(clean_model_name);
            if let Some(name) = name {
                models.insert(
                    "upscaler".to_string(),
                    json!({"name": name, "confidence": "medium", "source": source_of(nodes, node_id)}),
                );
                break;
            }
        }
    }

    // Size
    let size = ins
        .get("latent_image")
        .filter(|v| is_link(v))
        .and_then(|link| trace_size(nodes, link, confidence));

    // Clip skip, from the positive encoder's clip link.
    let mut clip_skip = None;
    if let Some(cond) = conditioning_link.as_ref() {
        let encoders = collect_text_encoder_nodes(nodes, cond, limits, Some("positive"));
        let encoder_id = encoders
            .first()
            .cloned()
            .or_else(|| walk_passthrough(nodes, cond));
        if let Some(pos_node) = encoder_id.and_then(|id| nodes.get(&id)) {
            if let Some(clip_link) = inputs_of(pos_node).get("clip").filter(|v| is_link(v)) {
                clip_skip = trace_clip_skip(nodes, clip_link, confidence);
            }
        }
    }

    // CLIP model (via the text encoder's clip input).
    let clip = conditioning_link
        .as_ref()
        .and_then(|cond| trace_clip_from_text_encoder(nodes, cond, confidence, limits));

    // VAE model (via the VAEDecode on the sink path).
    let vae = sink_start_id
        .as_ref()
        .and_then(|start| trace_vae_from_sink(nodes, start, confidence, limits));

    let wf_type = determine_workflow_type(nodes, sink_id, Some(sampler_id.as_str()));

    let mut out = Map::new();
    out.insert(
        "engine".into(),
        json!({
            "parser_version": "geninfo-v1",
            "sink": node_type(nodes.get(sink_id).unwrap_or(&Value::Null)),
            "sampler_mode": sampler_mode,
            "type": wf_type,
        }),
    );
    if !workflow_meta.is_empty() {
        out.insert("metadata".into(), Value::Object(workflow_meta.clone()));
    }

    if let Some((text, source)) = pos_val {
        out.insert(
            "positive".into(),
            json!({"value": text, "confidence": confidence, "source": source}),
        );
    }
    if let Some((text, source)) = neg_val {
        out.insert(
            "negative".into(),
            json!({"value": text, "confidence": confidence, "source": source}),
        );
    }

    if let Some((lyrics, strength, source)) = extract_lyrics(nodes) {
        out.insert(
            "lyrics".into(),
            json!({"value": lyrics, "confidence": "high", "source": source}),
        );
        if let Some(strength) = strength {
            if let Some(f) = field(Some(&strength), "high", &source) {
                out.insert("lyrics_strength".into(), f);
            }
        }
    }

    // Backward compatible: keep top-level `checkpoint` (best-effort).
    let preferred = models
        .get("checkpoint")
        .or_else(|| models.get("unet"))
        .or_else(|| models.get("diffusion"))
        .cloned();
    if let Some(preferred) = preferred {
        out.insert("checkpoint".into(), preferred);
    }
    if !loras.is_empty() {
        out.insert("loras".into(), Value::Array(loras));
    }
    if let Some(clip) = clip.clone() {
        out.insert("clip".into(), clip);
    }
    if let Some(vae) = vae.clone() {
        out.insert("vae".into(), vae);
    }

    if !models.is_empty() || clip.is_some() || vae.is_some() {
        let mut merged = Map::new();
        for key in ["checkpoint", "unet", "diffusion", "upscaler"] {
            if let Some(v) = models.get(key) {
                merged.insert(key.to_string(), v.clone());
            }
        }
        if let Some(clip) = clip {
            merged.insert("clip".into(), clip);
        }
        if let Some(vae) = vae {
            merged.insert("vae".into(), vae);
        }
        if !merged.is_empty() {
            out.insert("models".into(), Value::Object(merged));
        }
    }

    if let Some(f) = field_name(sampler_name.as_deref(), confidence, &sampler_source) {
        out.insert("sampler".into(), f);
    }
    if let Some(f) = field_name(
        scheduler.as_ref().map(value_to_string).as_deref(),
        confidence,
        &sampler_source,
    ) {
        out.insert("scheduler".into(), f);
    }

    for (key, val) in [
        ("steps", steps),
        ("cfg", cfg),
        ("seed", seed_val),
        ("denoise", denoise),
    ] {
        let source = field_sources
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(&sampler_source)
            .to_string();
        let conf = field_confidence
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(confidence);
        if let Some(f) = field(val.as_ref(), conf, &source) {
            out.insert(key.to_string(), f);
        }
    }

    if let Some(size) = size {
        out.insert("size".into(), size);
    }
    if let Some(clip_skip) = clip_skip {
        out.insert("clip_skip".into(), clip_skip);
    }

    let input_files = extract_input_files(nodes);
    if !input_files.is_empty() {
        out.insert("inputs".into(), Value::Array(input_files));
    }

    // Multi-output workflows: surface all distinct prompt variants.
    if sinks.len() > 1 {
        let (all_pos, all_neg) = collect_all_prompts_from_sinks(nodes, sinks, limits);
        if all_pos.len() > 1 {
            out.insert("all_positive_prompts".into(), json!(all_pos));
        }
        if all_neg.len() > 1 {
            out.insert("all_negative_prompts".into(), json!(all_neg));
        }
    }

    // Do-not-lie: nothing useful besides engine means no geninfo.
    if out.len() <= 1 {
        debug!("geninfo extraction yielded no fields");
        if !workflow_meta.is_empty() {
            return Some(json!({ "metadata": workflow_meta }));
        }
        return None;
    }

    Some(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sd15_graph() -> Value {
        json!({
            "3": {"class_type": "KSampler", "inputs": {
                "seed": 42, "steps": 20, "cfg": 7.5,
                "sampler_name": "euler", "scheduler": "normal", "denoise": 1.0,
                "model": ["4", 0],
                "positive": ["6", 0],
                "negative": ["7", 0],
                "latent_image": ["5", 0]
            }},
            "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "sd15.safetensors"}},
            "5": {"class_type": "EmptyLatentImage", "inputs": {"width": 512, "height": 768, "batch_size": 1}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "a majestic fox", "clip": ["4", 1]}},
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "blurry, lowres", "clip": ["4", 1]}},
            "8": {"class_type": "VAEDecode", "inputs": {"samples": ["3", 0], "vae": ["4", 2]}},
            "9": {"class_type": "SaveImage", "inputs": {"images": ["8", 0], "filename_prefix": "out"}}
        })
    }

    #[test]
    fn test_empty_graph_returns_none() {
        assert!(parse_geninfo_from_prompt(Some(&json!({})), None)
            .unwrap()
            .is_none());
        assert!(parse_geninfo_from_prompt(None, None).unwrap().is_none());
    }

    #[test]
    fn test_no_sampler_returns_none_without_metadata() {
        let graph = json!({
            "1": {"class_type": "LoadVideo", "inputs": {"video": "in.mp4"}},
        });
        assert!(parse_geninfo_from_prompt(Some(&graph), None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_no_sampler_returns_metadata_when_workflow_extra_present() {
        let graph = json!({"1": {"class_type": "Note", "inputs": {}}});
        let workflow = json!({"nodes": [], "extra": {"title": "My Flow"}});
        let out = parse_geninfo_from_prompt(Some(&graph), Some(&workflow))
            .unwrap()
            .unwrap();
        assert_eq!(
            out.get("metadata").and_then(|m| m.get("title")).and_then(Value::as_str),
            Some("My Flow")
        );
        assert!(out.get("engine").is_none());
    }

    #[test]
    fn test_basic_ksampler_extraction() {
        let out = parse_geninfo_from_prompt(Some(&sd15_graph()), None)
            .unwrap()
            .unwrap();

        assert_eq!(
            out.pointer("/positive/value").and_then(Value::as_str),
            Some("a majestic fox")
        );
        assert_eq!(
            out.pointer("/negative/value").and_then(Value::as_str),
            Some("blurry, lowres")
        );
        assert_eq!(out.pointer("/steps/value").and_then(Value::as_i64), Some(20));
        assert_eq!(out.pointer("/cfg/value").and_then(Value::as_f64), Some(7.5));
        assert_eq!(out.pointer("/seed/value").and_then(Value::as_i64), Some(42));
        assert_eq!(
            out.pointer("/sampler/name").and_then(Value::as_str),
            Some("euler")
        );
        assert_eq!(
            out.pointer("/checkpoint/name").and_then(Value::as_str),
            Some("sd15")
        );
        assert_eq!(out.pointer("/size/width").and_then(Value::as_i64), Some(512));
        assert_eq!(out.pointer("/size/height").and_then(Value::as_i64), Some(768));
        assert_eq!(
            out.pointer("/engine/sampler_mode").and_then(Value::as_str),
            Some("primary")
        );
        assert_eq!(
            out.pointer("/engine/type").and_then(Value::as_str),
            Some("T2I")
        );
        assert_eq!(
            out.pointer("/positive/source").and_then(Value::as_str),
            Some("CLIPTextEncode:6")
        );
    }

    #[test]
    fn test_flux_advanced_sampler() {
        let graph = json!({
            "10": {"class_type": "SamplerCustomAdvanced", "inputs": {
                "noise": ["11", 0],
                "guider": ["12", 0],
                "sampler": ["13", 0],
                "sigmas": ["14", 0],
                "latent_image": ["15", 0]
            }},
            "11": {"class_type": "RandomNoise", "inputs": {"noise_seed": 42}},
            "12": {"class_type": "BasicGuider", "inputs": {"model": ["17", 0], "conditioning": ["16", 0]}},
            "13": {"class_type": "KSamplerSelect", "inputs": {"sampler_name": "euler"}},
            "14": {"class_type": "BasicScheduler", "inputs": {"model": ["17", 0], "steps": 20, "scheduler": "simple", "denoise": 1.0}},
            "15": {"class_type": "EmptyLatentImage", "inputs": {"width": 1024, "height": 1024}},
            "16": {"class_type": "FluxGuidance", "inputs": {"guidance": 3.5, "conditioning": ["18", 0]}},
            "17": {"class_type": "UNETLoader", "inputs": {"unet_name": "flux1-dev.safetensors"}},
            "18": {"class_type": "CLIPTextEncode", "inputs": {"text": "an astronaut riding a horse", "clip": ["19", 0]}},
            "19": {"class_type": "DualCLIPLoader", "inputs": {"clip_name1": "t5xxl.safetensors", "clip_name2": "clip_l.safetensors"}},
            "20": {"class_type": "VAEDecode", "inputs": {"samples": ["10", 0], "vae": ["21", 0]}},
            "21": {"class_type": "VAELoader", "inputs": {"vae_name": "ae.safetensors"}},
            "22": {"class_type": "SaveImage", "inputs": {"images": ["20", 0]}}
        });

        let out = parse_geninfo_from_prompt(Some(&graph), None).unwrap().unwrap();

        assert_eq!(
            out.pointer("/engine/sampler_mode").and_then(Value::as_str),
            Some("advanced")
        );
        assert_eq!(out.pointer("/steps/value").and_then(Value::as_i64), Some(20));
        assert_eq!(out.pointer("/seed/value").and_then(Value::as_i64), Some(42));
        assert_eq!(out.pointer("/cfg/value").and_then(Value::as_f64), Some(3.5));
        assert_eq!(
            out.pointer("/sampler/name").and_then(Value::as_str),
            Some("euler")
        );
        assert_eq!(
            out.pointer("/scheduler/name").and_then(Value::as_str),
            Some("simple")
        );
        assert_eq!(
            out.pointer("/positive/value").and_then(Value::as_str),
            Some("an astronaut riding a horse")
        );
        assert_eq!(
            out.pointer("/models/unet/name").and_then(Value::as_str),
            Some("flux1-dev")
        );
        assert_eq!(
            out.pointer("/clip/name").and_then(Value::as_str),
            Some("t5xxl + clip_l")
        );
        assert_eq!(
            out.pointer("/vae/name").and_then(Value::as_str),
            Some("ae")
        );
    }

    #[test]
    fn test_sink_ranking_prefers_save_over_preview() {
        let mut graph = sd15_graph();
        graph.as_object_mut().unwrap().insert(
            "99".into(),
            json!({"class_type": "PreviewImage", "inputs": {"images": ["8", 0]}}),
        );
        let out = parse_geninfo_from_prompt(Some(&graph), None).unwrap().unwrap();
        assert_eq!(
            out.pointer("/engine/sink").and_then(Value::as_str),
            Some("SaveImage")
        );
    }

    #[test]
    fn test_lora_chain() {
        let graph = json!({
            "3": {"class_type": "KSampler", "inputs": {
                "seed": 1, "steps": 25, "cfg": 6.0,
                "sampler_name": "dpmpp_2m", "scheduler": "karras",
                "model": ["10", 0],
                "positive": ["6", 0], "negative": ["7", 0],
                "latent_image": ["5", 0]
            }},
            "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "base.safetensors"}},
            "5": {"class_type": "EmptyLatentImage", "inputs": {"width": 512, "height": 512}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "castle on a hill", "clip": ["10", 1]}},
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "ugly", "clip": ["10", 1]}},
            "8": {"class_type": "VAEDecode", "inputs": {"samples": ["3", 0], "vae": ["4", 2]}},
            "9": {"class_type": "SaveImage", "inputs": {"images": ["8", 0]}},
            "10": {"class_type": "LoraLoader", "inputs": {
                "lora_name": "style_lora.safetensors",
                "strength_model": 0.8, "strength_clip": 0.7,
                "model": ["4", 0], "clip": ["4", 1]
            }}
        });

        let out = parse_geninfo_from_prompt(Some(&graph), None).unwrap().unwrap();
        let loras = out.get("loras").and_then(Value::as_array).unwrap();
        assert_eq!(loras.len(), 1);
        assert_eq!(
            loras[0].get("name").and_then(Value::as_str),
            Some("style_lora")
        );
        assert_eq!(
            loras[0].get("strength_model").and_then(Value::as_f64),
            Some(0.8)
        );
        assert_eq!(
            out.pointer("/checkpoint/name").and_then(Value::as_str),
            Some("base")
        );
    }

    #[test]
    fn test_negative_zeroout_pruned() {
        let graph = json!({
            "3": {"class_type": "KSampler", "inputs": {
                "seed": 1, "steps": 20, "cfg": 7.0,
                "sampler_name": "euler", "scheduler": "normal",
                "model": ["4", 0],
                "positive": ["6", 0],
                "negative": ["7", 0],
                "latent_image": ["5", 0]
            }},
            "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "m.safetensors"}},
            "5": {"class_type": "EmptyLatentImage", "inputs": {"width": 512, "height": 512}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "a sunny meadow", "clip": ["4", 1]}},
            "7": {"class_type": "ConditioningZeroOut", "inputs": {"conditioning": ["6", 0]}},
            "8": {"class_type": "VAEDecode", "inputs": {"samples": ["3", 0], "vae": ["4", 2]}},
            "9": {"class_type": "SaveImage", "inputs": {"images": ["8", 0]}}
        });

        let out = parse_geninfo_from_prompt(Some(&graph), None).unwrap().unwrap();
        assert_eq!(
            out.pointer("/positive/value").and_then(Value::as_str),
            Some("a sunny meadow")
        );
        // The zeroed-out branch must not surface the positive prompt as
        // negative.
        assert!(out.get("negative").is_none());
    }

    #[test]
    fn test_wan_text_embeds() {
        let graph = json!({
            "1": {"class_type": "WanVideoSampler", "inputs": {
                "steps": 30, "cfg": 6.0, "seed": 7,
                "model": ["2", 0],
                "text_embeds": ["3", 0],
                "samples": ["4", 0]
            }},
            "2": {"class_type": "WanVideoModelLoader", "inputs": {"model": "wan2.1_t2v.safetensors"}},
            "3": {"class_type": "WanVideoTextEncode", "inputs": {
                "positive_prompt": "a river at dawn",
                "negative_prompt": "static, watermark"
            }},
            "4": {"class_type": "EmptyLatentImage", "inputs": {"width": 832, "height": 480}},
            "5": {"class_type": "VHS_VideoCombine", "inputs": {"images": ["1", 0]}}
        });

        let out = parse_geninfo_from_prompt(Some(&graph), None).unwrap().unwrap();
        assert_eq!(
            out.pointer("/positive/value").and_then(Value::as_str),
            Some("a river at dawn")
        );
        assert_eq!(
            out.pointer("/negative/value").and_then(Value::as_str),
            Some("static, watermark")
        );
        assert_eq!(
            out.pointer("/engine/type").and_then(Value::as_str),
            Some("T2V")
        );
        assert_eq!(
            out.pointer("/checkpoint/name").and_then(Value::as_str),
            Some("wan2.1_t2v")
        );
    }

    #[test]
    fn test_input_files_and_roles() {
        let graph = json!({
            "1": {"class_type": "LoadImage", "inputs": {"image": "ref.png"}},
            "2": {"class_type": "VAEEncode", "inputs": {"pixels": ["1", 0], "vae": ["4", 2]}},
            "3": {"class_type": "KSampler", "inputs": {
                "seed": 5, "steps": 12, "cfg": 5.5,
                "sampler_name": "euler", "denoise": 0.6,
                "model": ["4", 0],
                "positive": ["6", 0], "negative": ["7", 0],
                "latent_image": ["2", 0]
            }},
            "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "m.safetensors"}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "same but painterly", "clip": ["4", 1]}},
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "photo", "clip": ["4", 1]}},
            "8": {"class_type": "VAEDecode", "inputs": {"samples": ["3", 0], "vae": ["4", 2]}},
            "9": {"class_type": "SaveImage", "inputs": {"images": ["8", 0]}}
        });

        let out = parse_geninfo_from_prompt(Some(&graph), None).unwrap().unwrap();
        let inputs = out.get("inputs").and_then(Value::as_array).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(
            inputs[0].get("filename").and_then(Value::as_str),
            Some("ref.png")
        );
        assert_eq!(inputs[0].get("role").and_then(Value::as_str), Some("source"));
        assert_eq!(
            out.pointer("/engine/type").and_then(Value::as_str),
            Some("I2I")
        );
    }

    #[test]
    fn test_litegraph_workflow_widgets_fallback() {
        let workflow = json!({
            "nodes": [
                {"id": 3, "type": "KSampler",
                 "inputs": [
                    {"name": "model", "link": 1},
                    {"name": "positive", "link": 2},
                    {"name": "negative", "link": 3},
                    {"name": "latent_image", "link": 4}
                 ],
                 "widgets_values": [99, "randomize", 30, 8.0, "dpmpp_2m", "karras", 1.0]},
                {"id": 4, "type": "CheckpointLoaderSimple", "inputs": [], "widgets_values": ["dream.safetensors"]},
                {"id": 5, "type": "EmptyLatentImage", "inputs": [
                    {"name": "width", "widget": {"name": "width"}},
                    {"name": "height", "widget": {"name": "height"}}
                 ], "widgets_values": [768, 512]},
                {"id": 6, "type": "CLIPTextEncode", "inputs": [{"name": "clip", "link": 5}], "widgets_values": ["a quiet harbor at night"]},
                {"id": 7, "type": "CLIPTextEncode", "inputs": [{"name": "clip", "link": 6}], "widgets_values": ["overexposed photographs"]},
                {"id": 8, "type": "VAEDecode", "inputs": [{"name": "samples", "link": 7}, {"name": "vae", "link": 8}]},
                {"id": 9, "type": "SaveImage", "inputs": [{"name": "images", "link": 9}]}
            ],
            "links": [
                [1, 4, 0, 3, 0, "MODEL"],
                [2, 6, 0, 3, 1, "CONDITIONING"],
                [3, 7, 0, 3, 2, "CONDITIONING"],
                [4, 5, 0, 3, 3, "LATENT"],
                [5, 4, 1, 6, 0, "CLIP"],
                [6, 4, 1, 7, 0, "CLIP"],
                [7, 3, 0, 8, 0, "LATENT"],
                [8, 4, 2, 8, 1, "VAE"],
                [9, 8, 0, 9, 0, "IMAGE"]
            ]
        });

        let out = parse_geninfo_from_prompt(None, Some(&workflow)).unwrap().unwrap();
        assert_eq!(out.pointer("/steps/value").and_then(Value::as_i64), Some(30));
        assert_eq!(out.pointer("/seed/value").and_then(Value::as_i64), Some(99));
        assert_eq!(out.pointer("/cfg/value").and_then(Value::as_f64), Some(8.0));
        assert_eq!(
            out.pointer("/sampler/name").and_then(Value::as_str),
            Some("dpmpp_2m")
        );
        assert_eq!(
            out.pointer("/positive/value").and_then(Value::as_str),
            Some("a quiet harbor at night")
        );
    }

    #[test]
    fn test_media_only_pipeline_has_no_sampler() {
        let graph = json!({
            "1": {"class_type": "VHS_LoadVideo", "inputs": {"video": "in.mp4"}},
            "2": {"class_type": "VHS_VideoCombine", "inputs": {"images": ["1", 0]}}
        });
        // A sink exists but nothing sampler-like; only inputs survive.
        let out = parse_geninfo_from_prompt(Some(&graph), None).unwrap();
        if let Some(out) = out {
            assert!(out.get("steps").is_none());
            assert!(out.get("positive").is_none());
        }
    }

    #[test]
    fn test_cycle_does_not_hang() {
        let graph = json!({
            "1": {"class_type": "KSampler", "inputs": {
                "seed": 1, "steps": 2, "cfg": 1.0, "sampler_name": "euler",
                "model": ["2", 0], "latent_image": ["2", 0]
            }},
            "2": {"class_type": "Reroute", "inputs": {"value": ["1", 0]}},
            "3": {"class_type": "SaveImage", "inputs": {"images": ["1", 0]}}
        });
        let out = parse_geninfo_from_prompt(Some(&graph), None).unwrap();
        assert!(out.is_some());
    }
}
