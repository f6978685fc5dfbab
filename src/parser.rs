// 🌳 Tag Tree Parser - tolerant reader for `<s_NAME>...</s_NAME>` sequences
//
// The document model emits a receipt as one flat token string. Tags can repeat,
// nest arbitrarily, or stop half-way when generation hits max_length.
// parse() never fails: the worst case is an empty Map.

use log::debug;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;

const OPEN_PREFIX: &str = "<s_";
const CLOSE_PREFIX: &str = "</s_";

/// Separator the decoder places between values of one leaf
const SEPARATOR: &str = "<sep/>";

/// End-of-sequence / padding markers, stripped anywhere in the sequence
const CONTROL_MARKERS: &[&str] = &["</s>", "<s>", "<pad>", "<unk>"];

/// Task prompts the decoder is seeded with
const DEFAULT_TASK_MARKERS: &[&str] = &["<s_cord-v2>"];

// ============================================================================
// TAG VALUE
// ============================================================================

/// Generic parsed tree.
///
/// A `Map` keeps its children in order of first appearance. A name that shows
/// up more than once under the same parent is stored once, as a `List` of every
/// occurrence.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Leaf(String),
    List(Vec<TagValue>),
    Map(Vec<(String, TagValue)>),
}

impl TagValue {
    /// Empty map (what an unusable sequence parses to)
    pub fn empty() -> Self {
        TagValue::Map(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TagValue::Leaf(text) => text.is_empty(),
            TagValue::List(items) => items.is_empty(),
            TagValue::Map(entries) => entries.is_empty(),
        }
    }

    /// Child by name.
    ///
    /// On a `List`, the first element that is a map holding `key` answers.
    /// The decoder sometimes repeats a whole section (`total` twice), and the
    /// first copy is the one we read.
    pub fn get(&self, key: &str) -> Option<&TagValue> {
        match self {
            TagValue::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            TagValue::List(items) => items.iter().find_map(|item| match item {
                TagValue::Map(_) | TagValue::List(_) => item.get(key),
                TagValue::Leaf(_) => None,
            }),
            TagValue::Leaf(_) => None,
        }
    }

    /// Walk a path of names (e.g. `["total", "total_price"]`)
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<&TagValue> {
        path.iter()
            .try_fold(self, |node, key| node.get(key.as_ref()))
    }

    /// Elements of a list, or the value itself as a one-element list.
    ///
    /// A receipt with a single `menu` block parses to a Map, one with three
    /// blocks to a List; callers iterate both the same way. Nested lists
    /// (repeated blocks that each hold `<sep/>` groups) are flattened in order.
    pub fn entries(&self) -> Vec<&TagValue> {
        match self {
            TagValue::List(items) => items.iter().flat_map(|item| item.entries()).collect(),
            other => vec![other],
        }
    }

    /// First non-empty leaf text
    pub fn text(&self) -> Option<&str> {
        match self {
            TagValue::Leaf(text) if !text.is_empty() => Some(text.as_str()),
            TagValue::Leaf(_) | TagValue::Map(_) => None,
            TagValue::List(items) => items.iter().find_map(|item| item.text()),
        }
    }

    /// Convenience: `lookup(path)` then `text()`
    pub fn text_at<S: AsRef<str>>(&self, path: &[S]) -> Option<&str> {
        self.lookup(path).and_then(|v| v.text())
    }

    /// Number of nodes in the tree (leaves, lists and maps)
    pub fn node_count(&self) -> usize {
        1 + match self {
            TagValue::Leaf(_) => 0,
            TagValue::List(items) => items.iter().map(|i| i.node_count()).sum(),
            TagValue::Map(entries) => entries.iter().map(|(_, v)| v.node_count()).sum(),
        }
    }

    /// JSON value with map keys in order of first appearance
    pub fn to_json(&self) -> Value {
        match self {
            TagValue::Leaf(text) => Value::String(text.clone()),
            TagValue::List(items) => Value::Array(items.iter().map(|i| i.to_json()).collect()),
            TagValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl Serialize for TagValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TagValue::Leaf(text) => serializer.serialize_str(text),
            TagValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            TagValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

// ============================================================================
// PARSER
// ============================================================================

/// TagTreeParser - strips decoder control markers, then builds a TagValue
#[derive(Debug, Clone)]
pub struct TagTreeParser {
    task_markers: Vec<String>,
}

impl TagTreeParser {
    pub fn new() -> Self {
        TagTreeParser {
            task_markers: DEFAULT_TASK_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Builder: add a task prompt (e.g. a fine-tuned model's own `<s_receipt-v1>`)
    pub fn with_task_marker(mut self, marker: impl Into<String>) -> Self {
        self.task_markers.push(marker.into());
        self
    }

    /// Parse a decoded sequence. Never fails.
    pub fn parse(&self, sequence: &str) -> TagValue {
        let cleaned = self.strip_markers(sequence);
        let tree = TagValue::Map(parse_entries(&cleaned));

        debug!(
            "Parsed tag sequence: {} bytes in, {} nodes out",
            sequence.len(),
            tree.node_count()
        );

        tree
    }

    /// Remove control markers everywhere and task prompts (open and close form)
    pub fn strip_markers(&self, sequence: &str) -> String {
        let mut cleaned = sequence.to_string();

        for marker in CONTROL_MARKERS {
            cleaned = cleaned.replace(marker, "");
        }

        for marker in &self.task_markers {
            cleaned = cleaned.replace(marker.as_str(), "");
            if let Some(name) = marker.strip_prefix(OPEN_PREFIX) {
                cleaned = cleaned.replace(&format!("{}{}", CLOSE_PREFIX, name), "");
            }
        }

        cleaned.trim().to_string()
    }
}

impl Default for TagTreeParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse with the default task markers
pub fn parse(sequence: &str) -> TagValue {
    TagTreeParser::new().parse(sequence)
}

// ============================================================================
// SCANNER
// ============================================================================

struct OpenTag<'a> {
    name: &'a str,
    content_start: usize,
}

/// All occurrences of one name under one parent, in order
struct Slot<'a> {
    name: &'a str,
    values: Vec<TagValue>,
}

fn parse_entries(input: &str) -> Vec<(String, TagValue)> {
    let mut slots: Vec<Slot> = Vec::new();
    let mut pos = 0;

    while let Some(tag) = next_open_tag(input, pos) {
        let (content, next_pos) = match find_matching_close(input, tag.name, tag.content_start) {
            Some((close_at, close_len)) => (&input[tag.content_start..close_at], close_at + close_len),
            // Truncated: the rest of the sequence belongs to this tag
            None => (&input[tag.content_start..], input.len()),
        };

        let value = parse_content(content);
        match slots.iter_mut().find(|s| s.name == tag.name) {
            Some(slot) => slot.values.push(value),
            None => slots.push(Slot {
                name: tag.name,
                values: vec![value],
            }),
        }

        pos = next_pos;
    }

    slots
        .into_iter()
        .map(|mut slot| {
            let value = if slot.values.len() == 1 {
                slot.values.remove(0)
            } else {
                TagValue::List(slot.values)
            };
            (slot.name.to_string(), value)
        })
        .collect()
}

fn parse_content(content: &str) -> TagValue {
    if next_open_tag(content, 0).is_none() {
        return leaf_value(content);
    }

    let mut groups: Vec<TagValue> = split_groups(content)
        .into_iter()
        .map(parse_entries)
        .filter(|entries| !entries.is_empty())
        .map(TagValue::Map)
        .collect();

    match groups.len() {
        0 => TagValue::empty(),
        1 => groups.remove(0),
        _ => TagValue::List(groups),
    }
}

/// Cut nested content at every `<sep/>` that follows a closed sibling tag.
///
/// `<s_nm>A</s_nm><s_price>1</s_price><sep/><s_nm>B</s_nm>` is two items,
/// not one item with two names. A `<sep/>` inside a tag belongs to its leaf.
fn split_groups(input: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut group_start = 0;
    let mut pos = 0;

    while let Some(tag) = next_open_tag(input, pos) {
        let after = match find_matching_close(input, tag.name, tag.content_start) {
            Some((close_at, close_len)) => close_at + close_len,
            None => break,
        };

        let rest = &input[after..];
        let trimmed = rest.trim_start();
        if trimmed.starts_with(SEPARATOR) {
            let sep_at = after + (rest.len() - trimmed.len());
            groups.push(&input[group_start..sep_at]);
            group_start = sep_at + SEPARATOR.len();
        }

        pos = after;
    }

    groups.push(&input[group_start..]);
    groups
}

/// Next well-formed `<s_NAME>` at or after `from`
fn next_open_tag(input: &str, from: usize) -> Option<OpenTag<'_>> {
    let mut cursor = from;

    while cursor < input.len() {
        let start = cursor + input[cursor..].find(OPEN_PREFIX)?;
        let name_start = start + OPEN_PREFIX.len();
        let name_end = name_start + input[name_start..].find('>')?;
        let name = &input[name_start..name_end];

        if !name.is_empty() && !name.contains('<') && !name.contains(char::is_whitespace) {
            return Some(OpenTag {
                name,
                content_start: name_end + 1,
            });
        }

        cursor = name_start;
    }

    None
}

/// Position and length of the `</s_NAME>` closing the tag opened before `from`.
///
/// Depth counts only tags of the same name, so `<s_sub><s_sub>..</s_sub></s_sub>`
/// pairs outer with outer while siblings of other names are ignored.
fn find_matching_close(input: &str, name: &str, from: usize) -> Option<(usize, usize)> {
    let open = format!("{}{}>", OPEN_PREFIX, name);
    let close = format!("{}{}>", CLOSE_PREFIX, name);

    let mut depth = 1usize;
    let mut cursor = from;

    loop {
        let next_close = cursor + input[cursor..].find(&close)?;
        let next_open = input[cursor..].find(&open).map(|i| cursor + i);

        match next_open {
            Some(open_at) if open_at < next_close => {
                depth += 1;
                cursor = open_at + open.len();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some((next_close, close.len()));
                }
                cursor = next_close + close.len();
            }
        }
    }
}

fn leaf_value(content: &str) -> TagValue {
    let text = strip_stray_closers(content);

    if text.contains(SEPARATOR) {
        let mut parts: Vec<TagValue> = text
            .split(SEPARATOR)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| TagValue::Leaf(p.to_string()))
            .collect();

        return match parts.len() {
            0 => TagValue::Leaf(String::new()),
            1 => parts.remove(0),
            _ => TagValue::List(parts),
        };
    }

    TagValue::Leaf(text.trim().to_string())
}

/// Drop `</s_other>` fragments the decoder left inside a leaf
fn strip_stray_closers(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find(CLOSE_PREFIX) {
        out.push_str(&rest[..start]);
        match rest[start..].find('>') {
            Some(end) => rest = &rest[start + end + 1..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);

    out
}

// ============================================================================
// TESTS
// ============================================================================
