//! Reading documents to import.
//!
//! Two shapes are accepted: the engine's own document JSON (an object with
//! a `nodes` array) and the nested tree export written by folder, drive,
//! calendar and mail exporters. Tree nodes nest under `children`, `items`
//! and `subtasks`; a `nodeGuid` is kept as the node's guid and a root
//! `treeId` as the document id.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crossref_types::{RawDocument, RawNode, SourceFingerprint};

/// One node of a tree export. Unknown exporter fields are ignored.
#[derive(Debug, Default, Deserialize)]
struct TreeNode {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, rename = "nodeGuid")]
    node_guid: Option<String>,
    /// Only meaningful on the root
    #[serde(default, rename = "treeId")]
    tree_id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    /// Comma-separated
    #[serde(default)]
    keywords: Option<String>,
    #[serde(default)]
    children: Vec<TreeNode>,
    #[serde(default)]
    items: Vec<TreeNode>,
    #[serde(default)]
    subtasks: Vec<TreeNode>,
}

impl TreeNode {
    /// Nested nodes under every key exporters use, in document order.
    fn take_descendants(&mut self) -> Vec<TreeNode> {
        let mut nested = std::mem::take(&mut self.children);
        nested.append(&mut self.items);
        nested.append(&mut self.subtasks);
        nested
    }
}

/// Overrides applied on top of the file contents.
#[derive(Debug, Default, Clone)]
pub struct ImportOptions {
    pub source: Option<String>,
    pub name: Option<String>,
    pub document_id: Option<String>,
}

/// Read `path` into a host payload.
pub fn load_document(path: &Path, options: &ImportOptions) -> Result<RawDocument> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let mut raw = parse_document(value)
        .with_context(|| format!("Unrecognized document in {}", path.display()))?;

    if raw.display_name.trim().is_empty() {
        raw.display_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    if let Some(name) = &options.name {
        raw.display_name = name.clone();
    }
    if let Some(id) = &options.document_id {
        raw.document_id = Some(id.clone());
    }
    raw.source = match &options.source {
        Some(source) => Some(SourceFingerprint::new(source.clone())),
        None => {
            let canonical = fs::canonicalize(path)
                .with_context(|| format!("Failed to resolve {}", path.display()))?;
            Some(SourceFingerprint::new(canonical.to_string_lossy()))
        }
    };
    Ok(raw)
}

/// Decide which shape `value` has and convert it.
pub fn parse_document(value: Value) -> Result<RawDocument> {
    if value.get("nodes").is_some() {
        return serde_json::from_value(value).context("Invalid document JSON");
    }
    let root: TreeNode = serde_json::from_value(value).context("Invalid tree export")?;
    Ok(from_tree(root))
}

/// The root names the document; its descendants become nodes.
fn from_tree(mut root: TreeNode) -> RawDocument {
    let mut raw = RawDocument::new(root.name.trim());
    raw.document_id = root.tree_id.take().filter(|id| !id.trim().is_empty());
    let mut seen = HashSet::new();
    for (i, child) in root.take_descendants().into_iter().enumerate() {
        flatten(child, None, &i.to_string(), &mut seen, &mut raw.nodes);
    }
    raw
}

fn flatten(
    mut node: TreeNode,
    parent: Option<&str>,
    path: &str,
    seen: &mut HashSet<String>,
    out: &mut Vec<RawNode>,
) {
    // Exporter ids are paths or remote ids: usable as legacy ids only, and
    // only while unique within the export. The position handle links
    // parents inside this payload and is never stored.
    let legacy_id = node
        .id
        .as_ref()
        .and_then(id_text)
        .filter(|id| seen.insert(id.clone()));
    let local_ref = format!("tree:{path}");
    let descendants = node.take_descendants();

    let body = match (node.description, node.content) {
        (Some(description), Some(content)) if !content.is_empty() => {
            format!("{description}\n\n{content}")
        }
        (Some(description), _) => description,
        (None, Some(content)) => content,
        (None, None) => String::new(),
    };
    let mut tags = node.tags;
    if let Some(keywords) = &node.keywords {
        tags.extend(
            keywords
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string),
        );
    }

    let mut raw = RawNode::new(node.name.trim())
        .with_local_ref(local_ref.clone())
        .with_body(body)
        .with_tags(tags);
    if let Some(guid) = node.node_guid.filter(|g| !g.trim().is_empty()) {
        raw = raw.with_guid(guid);
    }
    if let Some(legacy_id) = legacy_id {
        raw = raw.with_legacy_id(legacy_id);
    }
    if let Some(kind) = node.kind {
        raw = raw.with_type(kind);
    }
    if let Some(parent) = parent {
        raw = raw.with_parent(parent);
    }
    out.push(raw);

    for (i, child) in descendants.into_iter().enumerate() {
        flatten(child, Some(&local_ref), &format!("{path}.{i}"), seen, out);
    }
}

fn id_text(id: &Value) -> Option<String> {
    match id {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
