//! Graph normalization and bounded traversal helpers for the geninfo parser.
//!
//! Input graphs are user-supplied and may be huge or cyclic; every traversal
//! here is iterative, carries a visited set, and enforces node/depth caps.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::LazyLock;

/// Nodes keyed by stringified node id, in deterministic order.
pub type NodeMap = BTreeMap<String, Value>;

static EMPTY_INPUTS: LazyLock<Map<String, Value>> = LazyLock::new(Map::new);

/// Traversal caps for a normalized graph.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_graph_nodes: usize,
    pub max_link_nodes: usize,
    pub max_graph_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_graph_nodes: 5000,
            max_link_nodes: 200,
            max_graph_depth: 100,
        }
    }
}

impl From<&crate::config::GeninfoConfig> for Limits {
    fn from(cfg: &crate::config::GeninfoConfig) -> Self {
        Self {
            max_graph_nodes: cfg.max_graph_nodes.max(1),
            max_link_nodes: cfg.max_link_nodes.max(1),
            max_graph_depth: cfg.max_graph_depth.max(1),
        }
    }
}

pub fn node_type(node: &Value) -> &str {
    node.get("class_type")
        .or_else(|| node.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

pub fn lower_type(node: &Value) -> String {
    node_type(node).to_ascii_lowercase()
}

pub fn inputs_of(node: &Value) -> &Map<String, Value> {
    node.get("inputs")
        .and_then(Value::as_object)
        .unwrap_or(&EMPTY_INPUTS)
}

fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Prompt-graph link node ids are usually integers, but some exporters encode
/// ids like "57:35". Accept only digit-or-digit+colon patterns.
fn looks_like_node_id(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64(),
        Value::String(s) => {
            let s = s.trim();
            !s.is_empty()
                && s.split(':')
                    .filter(|p| !p.is_empty())
                    .all(|p| p.chars().all(|c| c.is_ascii_digit()))
                && s.split(':').any(|p| !p.is_empty())
        }
        _ => false,
    }
}

/// A link is a 2-element array `[node_id, output_slot]`.
pub fn is_link(value: &Value) -> bool {
    resolve_link(value).is_some()
}

pub fn resolve_link(value: &Value) -> Option<(String, i64)> {
    let arr = value.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    if !looks_like_node_id(&arr[0]) {
        return None;
    }
    let slot = to_i64(&arr[1])?;
    let id = match &arr[0] {
        Value::String(s) => s.trim().to_string(),
        other => to_i64(other)?.to_string(),
    };
    Some((id, slot))
}

/// Scalar values usable as field payloads (numbers and strings).
pub fn scalar(value: Option<&Value>) -> Option<&Value> {
    match value {
        Some(v @ (Value::Number(_) | Value::String(_) | Value::Bool(_))) => Some(v),
        _ => None,
    }
}

pub fn is_reroute(node: &Value) -> bool {
    lower_type(node).contains("reroute")
}

/// Follow a link through obvious pass-through nodes (Reroute), returning the
/// final source node id.
pub fn walk_passthrough(nodes: &NodeMap, start_link: &Value) -> Option<String> {
    let (mut node_id, _) = resolve_link(start_link)?;
    for _ in 0..50 {
        let Some(node) = nodes.get(&node_id) else {
            return Some(node_id);
        };
        if !is_reroute(node) {
            return Some(node_id);
        }
        let next = inputs_of(node).values().find(|v| is_link(v));
        match next.and_then(|v| resolve_link(v)) {
            Some((next_id, _)) => node_id = next_id,
            None => return Some(node_id),
        }
    }
    Some(node_id)
}

/// BFS upstream from a node id, returning node -> distance. Bounded by the
/// node/depth caps; cycles are suppressed via the distance map.
pub fn collect_upstream(nodes: &NodeMap, start_node_id: &str, limits: Limits) -> HashMap<String, usize> {
    let mut dist: HashMap<String, usize> = HashMap::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    queue.push_back((start_node_id.to_string(), 0));

    while let Some((nid, d)) = queue.pop_front() {
        if dist.len() >= limits.max_graph_nodes {
            break;
        }
        if d > limits.max_graph_depth || dist.contains_key(&nid) {
            continue;
        }
        dist.insert(nid.clone(), d);

        let Some(node) = nodes.get(&nid) else { continue };
        for v in inputs_of(node).values() {
            if let Some((src_id, _)) = resolve_link(v) {
                queue.push_back((src_id, d + 1));
            }
        }
    }
    dist
}

/// Sort key placing numeric node ids first in ascending order.
pub fn nid_key(id: &str) -> (i64, String) {
    match id.parse::<i64>() {
        Ok(n) => (n, id.to_string()),
        Err(_) => (i64::MAX, id.to_string()),
    }
}

/// Normalize a prompt graph or LiteGraph workflow into `NodeMap`.
///
/// LiteGraph workflows carry `nodes: [{id, type, inputs: [{name, link}],
/// widgets_values}]` and `links: [[link_id, src_node, src_slot, tgt_node,
/// tgt_slot, type]]`; each node's `inputs` dict is rebuilt from the link
/// table and widget values.
pub fn normalize_graph_input(prompt_graph: Option<&Value>, workflow: Option<&Value>) -> Option<NodeMap> {
    let target = match prompt_graph {
        Some(v @ Value::Object(map)) if !map.is_empty() => v,
        _ => match workflow {
            Some(v @ Value::Object(map)) if map.contains_key("nodes") => v,
            _ => return None,
        },
    };
    let target_map = target.as_object()?;

    let mut nodes_by_id = NodeMap::new();

    if let Some(Value::Array(raw_nodes)) = target_map.get("nodes") {
        // LiteGraph format: build link map link_id -> (src_node, src_slot)
        let mut link_to_source: HashMap<i64, (i64, i64)> = HashMap::new();
        if let Some(Value::Array(links)) = target_map.get("links") {
            for link in links {
                if let Some(arr) = link.as_array() {
                    if arr.len() >= 3 {
                        if let (Some(link_id), Some(src), Some(slot)) =
                            (to_i64(&arr[0]), to_i64(&arr[1]), to_i64(&arr[2]))
                        {
                            link_to_source.insert(link_id, (src, slot));
                        }
                    }
                }
            }
        }

        for node in raw_nodes {
            let Some(node_obj) = node.as_object() else {
                continue;
            };
            let Some(node_id) = node_obj.get("id").and_then(to_i64) else {
                continue;
            };
            let node_id = node_id.to_string();

            let mut converted = Map::new();
            converted.insert("class_type".into(), node_obj.get("type").cloned().unwrap_or(Value::Null));
            converted.insert("type".into(), node_obj.get("type").cloned().unwrap_or(Value::Null));
            converted.insert("id".into(), node_obj.get("id").cloned().unwrap_or(Value::Null));
            for key in ["widgets_values", "outputs", "properties", "title", "mode"] {
                if let Some(v) = node_obj.get(key) {
                    converted.insert(key.into(), v.clone());
                }
            }

            let widgets = node_obj.get("widgets_values");
            let widgets_list: &[Value] = match widgets {
                Some(Value::Array(items)) => items,
                _ => &[],
            };

            let mut inputs = Map::new();
            if let Some(Value::Array(raw_inputs)) = node_obj.get("inputs") {
                let mut widget_idx = 0usize;
                for inp in raw_inputs {
                    let Some(inp) = inp.as_object() else { continue };
                    let Some(name) = inp.get("name").and_then(Value::as_str) else {
                        continue;
                    };
                    let link_id = inp.get("link").and_then(to_i64);
                    if let Some(link_id) = link_id {
                        if let Some((src_node, src_slot)) = link_to_source.get(&link_id) {
                            inputs.insert(
                                name.to_string(),
                                Value::Array(vec![
                                    Value::String(src_node.to_string()),
                                    Value::from(*src_slot),
                                ]),
                            );
                            continue;
                        }
                    }
                    if inp.contains_key("widget") {
                        if let Some(v) = widgets_list.get(widget_idx) {
                            inputs.insert(name.to_string(), v.clone());
                        }
                        widget_idx += 1;
                    }
                }
            } else if let Some(Value::Object(dict_inputs)) = node_obj.get("inputs") {
                inputs = dict_inputs.clone();
            }

            // VHS and some other nodes keep widgets_values as a dict.
            if let Some(Value::Object(widget_map)) = widgets {
                for (k, v) in widget_map {
                    inputs.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }

            // Text-ish nodes often keep their prompt only in widgets_values.
            if !widgets_list.is_empty() && !inputs.contains_key("text") {
                let tl = node_obj
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_ascii_lowercase();
                if ["primitive", "string", "text", "encode"]
                    .iter()
                    .any(|p| tl.contains(p))
                {
                    if let Some(text) = widgets_list
                        .iter()
                        .find_map(|w| w.as_str().filter(|s| s.trim().len() > 10))
                    {
                        inputs.insert("text".into(), Value::String(text.to_string()));
                        inputs.insert("value".into(), Value::String(text.to_string()));
                    }
                }
            }

            converted.insert("inputs".into(), Value::Object(inputs));
            nodes_by_id.insert(node_id, Value::Object(converted));
        }
    } else {
        // Prompt-graph format: use as-is
        for (k, v) in target_map {
            if v.is_object() {
                nodes_by_id.insert(k.clone(), v.clone());
            }
        }
    }

    if nodes_by_id.is_empty() {
        None
    } else {
        Some(nodes_by_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_map(v: Value) -> NodeMap {
        normalize_graph_input(Some(&v), None).unwrap()
    }

    #[test]
    fn test_resolve_link_shapes() {
        assert_eq!(resolve_link(&json!(["4", 0])), Some(("4".into(), 0)));
        assert_eq!(resolve_link(&json!([4, 1])), Some(("4".into(), 1)));
        assert_eq!(resolve_link(&json!(["91:68", 0])), Some(("91:68".into(), 0)));
        assert_eq!(resolve_link(&json!(["abc", 0])), None);
        assert_eq!(resolve_link(&json!([4])), None);
        assert_eq!(resolve_link(&json!("x")), None);
    }

    #[test]
    fn test_walk_passthrough_reroutes() {
        let nodes = node_map(json!({
            "1": {"class_type": "EmptyLatentImage", "inputs": {}},
            "2": {"class_type": "Reroute", "inputs": {"value": ["1", 0]}},
            "3": {"class_type": "Reroute", "inputs": {"value": ["2", 0]}},
        }));
        assert_eq!(
            walk_passthrough(&nodes, &json!(["3", 0])).as_deref(),
            Some("1")
        );
    }

    #[test]
    fn test_collect_upstream_bounded_and_cycle_safe() {
        let nodes = node_map(json!({
            "1": {"class_type": "A", "inputs": {"x": ["2", 0]}},
            "2": {"class_type": "B", "inputs": {"x": ["1", 0]}},
        }));
        let dist = collect_upstream(&nodes, "1", Limits::default());
        assert_eq!(dist.len(), 2);
        assert_eq!(dist.get("1"), Some(&0));
        assert_eq!(dist.get("2"), Some(&1));
    }

    #[test]
    fn test_normalize_litegraph_workflow() {
        let workflow = json!({
            "nodes": [
                {"id": 1, "type": "CLIPTextEncode",
                 "inputs": [{"name": "clip", "link": 10}, {"name": "text", "widget": {"name": "text"}}],
                 "widgets_values": ["a painting of a fox"]},
                {"id": 2, "type": "CheckpointLoaderSimple", "inputs": [], "widgets_values": ["sd15.safetensors"]},
            ],
            "links": [[10, 2, 1, 1, 0, "CLIP"]],
        });
        let nodes = normalize_graph_input(None, Some(&workflow)).unwrap();
        let encoder = nodes.get("1").unwrap();
        let ins = inputs_of(encoder);
        assert_eq!(resolve_link(ins.get("clip").unwrap()), Some(("2".into(), 1)));
        assert_eq!(
            ins.get("text").and_then(Value::as_str),
            Some("a painting of a fox")
        );
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert!(normalize_graph_input(Some(&json!({})), None).is_none());
        assert!(normalize_graph_input(None, None).is_none());
        assert!(normalize_graph_input(Some(&json!("s")), None).is_none());
    }

    #[test]
    fn test_nid_key_orders_numerically() {
        let mut ids = vec!["10", "2", "alpha", "1"];
        ids.sort_by_key(|id| nid_key(id));
        assert_eq!(ids, vec!["1", "2", "10", "alpha"]);
    }
}
