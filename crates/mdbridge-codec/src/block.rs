//! Typed block model
//!
//! The block-list API returns every block as a type discriminator plus a
//! type-specific JSON body. This module maps that raw shape into one tagged
//! enum with typed inline elements, so the decoder can match exhaustively
//! instead of probing nested dictionaries per type. Unrecognized types
//! become [`Block::Unknown`] carrying whatever text could be salvaged;
//! content is never dropped at parse time.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use mdbridge_core::ports::RawBlock;

use crate::CodecError;

// Service block-type discriminators (block list API)
const TYPE_PAGE: u32 = 1;
const TYPE_TEXT: u32 = 2;
const TYPE_HEADING_MIN: u32 = 3; // heading 1
const TYPE_HEADING_MAX: u32 = 11; // heading 9
const TYPE_BULLET: u32 = 12;
const TYPE_ORDERED: u32 = 13;
const TYPE_CODE: u32 = 14;
const TYPE_QUOTE: u32 = 15;
const TYPE_TODO: u32 = 17;
const TYPE_CALLOUT: u32 = 19;
const TYPE_DIVIDER: u32 = 22;
const TYPE_FILE: u32 = 23;
const TYPE_IMAGE: u32 = 27;
const TYPE_TABLE: u32 = 31;
const TYPE_TABLE_CELL: u32 = 32;

/// Inline style flags on a text run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextStyle {
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
    pub underline: bool,
    pub inline_code: bool,
}

/// One inline element inside a block's text body
#[derive(Debug, Clone, PartialEq)]
pub enum InlineElement {
    /// Styled text run, optionally hyperlinked
    TextRun {
        text: String,
        style: TextStyle,
        link: Option<String>,
    },
    /// Inline reference to another remote document
    MentionDoc { token: String, title: String },
    /// Inline reference to a user
    MentionUser { name: String },
    /// Time-based reminder
    Reminder { at: Option<DateTime<Utc>> },
}

/// Ordered-list numbering directive carried by the block itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSequence {
    /// Continue from the previous sibling's number
    Auto,
    /// Restart (or start) at this number
    Explicit(u64),
}

/// One block, typed by its discriminator
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Page {
        title: Vec<InlineElement>,
    },
    Heading {
        level: u8,
        elements: Vec<InlineElement>,
    },
    Text {
        elements: Vec<InlineElement>,
    },
    Bullet {
        elements: Vec<InlineElement>,
    },
    Ordered {
        elements: Vec<InlineElement>,
        sequence: ListSequence,
    },
    Todo {
        elements: Vec<InlineElement>,
        done: bool,
    },
    Quote {
        elements: Vec<InlineElement>,
    },
    Callout {
        elements: Vec<InlineElement>,
    },
    Code {
        language: Option<String>,
        elements: Vec<InlineElement>,
    },
    Table {
        rows: usize,
        columns: usize,
        cells: Vec<String>,
    },
    TableCell,
    Image {
        token: Option<String>,
    },
    File {
        token: Option<String>,
        name: Option<String>,
    },
    Divider,
    /// Any discriminator this codec does not know; children (or raw text)
    /// still render
    Unknown {
        raw_text: Option<String>,
    },
}

/// A parsed block together with its position in the tree
#[derive(Debug, Clone)]
pub struct BlockNode {
    pub id: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub block: Block,
}

/// The parsed document: all blocks by id, rooted at the single page block
#[derive(Debug, Clone)]
pub struct BlockTree {
    nodes: HashMap<String, BlockNode>,
    root_id: String,
}

impl BlockTree {
    /// Parses a raw block list into a typed tree
    ///
    /// The root is the page block (or, failing that, the single parentless
    /// block). Child references must resolve within the list.
    pub fn parse(raw: &[RawBlock]) -> Result<Self, CodecError> {
        let mut nodes = HashMap::with_capacity(raw.len());
        let mut root_id = None;

        for rb in raw {
            let block = parse_block(rb);
            if matches!(block, Block::Page { .. }) && root_id.is_none() {
                root_id = Some(rb.block_id.clone());
            }
            nodes.insert(
                rb.block_id.clone(),
                BlockNode {
                    id: rb.block_id.clone(),
                    parent: rb.parent_id.clone(),
                    children: rb.children.clone(),
                    block,
                },
            );
        }

        let root_id = root_id
            .or_else(|| {
                raw.iter()
                    .find(|rb| rb.parent_id.is_none())
                    .map(|rb| rb.block_id.clone())
            })
            .ok_or(CodecError::MissingRoot)?;

        for node in nodes.values() {
            for child in &node.children {
                if !nodes.contains_key(child) {
                    return Err(CodecError::DanglingChild {
                        parent: node.id.clone(),
                        child: child.clone(),
                    });
                }
            }
        }

        Ok(Self { nodes, root_id })
    }

    pub fn root(&self) -> &BlockNode {
        // root_id is validated at parse time
        &self.nodes[&self.root_id]
    }

    pub fn get(&self, id: &str) -> Option<&BlockNode> {
        self.nodes.get(id)
    }

    /// Ordered child ids of the document root
    pub fn root_children(&self) -> &[String] {
        &self.root().children
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ============================================================================
// Raw JSON parsing
// ============================================================================

fn parse_block(raw: &RawBlock) -> Block {
    let content = &raw.content;
    match raw.block_type {
        TYPE_PAGE => Block::Page {
            title: parse_elements(content),
        },
        TYPE_TEXT => Block::Text {
            elements: parse_elements(content),
        },
        t if (TYPE_HEADING_MIN..=TYPE_HEADING_MAX).contains(&t) => Block::Heading {
            level: (t - TYPE_HEADING_MIN + 1) as u8,
            elements: parse_elements(content),
        },
        TYPE_BULLET => Block::Bullet {
            elements: parse_elements(content),
        },
        TYPE_ORDERED => Block::Ordered {
            elements: parse_elements(content),
            sequence: parse_sequence(content),
        },
        TYPE_CODE => Block::Code {
            language: content
                .pointer("/style/language")
                .and_then(Value::as_str)
                .map(str::to_string),
            elements: parse_elements(content),
        },
        TYPE_QUOTE => Block::Quote {
            elements: parse_elements(content),
        },
        TYPE_TODO => Block::Todo {
            elements: parse_elements(content),
            done: content
                .pointer("/style/done")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        },
        TYPE_CALLOUT => Block::Callout {
            elements: parse_elements(content),
        },
        TYPE_DIVIDER => Block::Divider,
        TYPE_FILE => Block::File {
            token: content.get("token").and_then(Value::as_str).map(str::to_string),
            name: content.get("name").and_then(Value::as_str).map(str::to_string),
        },
        TYPE_IMAGE => Block::Image {
            token: content.get("token").and_then(Value::as_str).map(str::to_string),
        },
        TYPE_TABLE => {
            let rows = content
                .pointer("/property/row_size")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            let columns = content
                .pointer("/property/column_size")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            // Cell ids may come in the body or as plain children
            let cells = content
                .get("cells")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_else(|| raw.children.clone());
            Block::Table {
                rows,
                columns,
                cells,
            }
        }
        TYPE_TABLE_CELL => Block::TableCell,
        other => {
            tracing::debug!(block_type = other, block_id = %raw.block_id, "Unknown block type");
            Block::Unknown {
                raw_text: plain_text(content),
            }
        }
    }
}

fn parse_elements(content: &Value) -> Vec<InlineElement> {
    let Some(items) = content.get("elements").and_then(Value::as_array) else {
        return Vec::new();
    };
    items.iter().filter_map(parse_element).collect()
}

fn parse_element(v: &Value) -> Option<InlineElement> {
    if let Some(run) = v.get("text_run") {
        let text = run
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let style_v = run.get("text_element_style");
        let flag = |name: &str| {
            style_v
                .and_then(|s| s.get(name))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        let style = TextStyle {
            bold: flag("bold"),
            italic: flag("italic"),
            strikethrough: flag("strikethrough"),
            underline: flag("underline"),
            inline_code: flag("inline_code"),
        };
        let link = style_v
            .and_then(|s| s.pointer("/link/url"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return Some(InlineElement::TextRun { text, style, link });
    }
    if let Some(m) = v.get("mention_doc") {
        return Some(InlineElement::MentionDoc {
            token: m
                .get("token")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            title: m
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    if let Some(m) = v.get("mention_user") {
        return Some(InlineElement::MentionUser {
            name: m
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    if let Some(r) = v.get("reminder") {
        let at = r
            .get("expire_time_ms")
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        return Some(InlineElement::Reminder { at });
    }
    None
}

fn parse_sequence(content: &Value) -> ListSequence {
    match content.pointer("/style/sequence").and_then(Value::as_str) {
        Some("auto") | None => ListSequence::Auto,
        Some(n) => n
            .parse::<u64>()
            .map(ListSequence::Explicit)
            .unwrap_or(ListSequence::Auto),
    }
}

/// Best-effort plain text of an unknown block's body
fn plain_text(content: &Value) -> Option<String> {
    let elements = parse_elements(content);
    if elements.is_empty() {
        return None;
    }
    let text: String = elements
        .iter()
        .filter_map(|e| match e {
            InlineElement::TextRun { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(id: &str, block_type: u32, parent: Option<&str>, children: &[&str], content: Value) -> RawBlock {
        RawBlock {
            block_id: id.to_string(),
            block_type,
            parent_id: parent.map(str::to_string),
            children: children.iter().map(|c| c.to_string()).collect(),
            content,
        }
    }

    fn text_content(s: &str) -> Value {
        json!({ "elements": [{ "text_run": { "content": s } }] })
    }

    #[test]
    fn test_parse_builds_rooted_tree() {
        let blocks = vec![
            raw("root", TYPE_PAGE, None, &["h", "p"], text_content("Doc")),
            raw("h", 3, Some("root"), &[], text_content("Title")),
            raw("p", TYPE_TEXT, Some("root"), &[], text_content("Body")),
        ];
        let tree = BlockTree::parse(&blocks).unwrap();

        assert_eq!(tree.root_children(), &["h".to_string(), "p".to_string()]);
        assert!(matches!(
            tree.get("h").unwrap().block,
            Block::Heading { level: 1, .. }
        ));
    }

    #[test]
    fn test_parse_rejects_dangling_child() {
        let blocks = vec![raw("root", TYPE_PAGE, None, &["ghost"], text_content("Doc"))];
        assert!(matches!(
            BlockTree::parse(&blocks),
            Err(CodecError::DanglingChild { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_missing_root() {
        let blocks = vec![raw("a", TYPE_TEXT, Some("b"), &[], text_content("x"))];
        assert!(matches!(
            BlockTree::parse(&blocks),
            Err(CodecError::MissingRoot)
        ));
    }

    #[test]
    fn test_heading_levels_span_discriminator_range() {
        for (t, level) in [(3u32, 1u8), (5, 3), (11, 9)] {
            let blocks = vec![
                raw("root", TYPE_PAGE, None, &["h"], text_content("Doc")),
                raw("h", t, Some("root"), &[], text_content("x")),
            ];
            let tree = BlockTree::parse(&blocks).unwrap();
            match &tree.get("h").unwrap().block {
                Block::Heading { level: l, .. } => assert_eq!(*l, level),
                other => panic!("expected heading, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_text_run_styles_and_link() {
        let content = json!({
            "elements": [{
                "text_run": {
                    "content": "styled",
                    "text_element_style": {
                        "bold": true,
                        "inline_code": true,
                        "link": { "url": "https://example.com" }
                    }
                }
            }]
        });
        let blocks = vec![
            raw("root", TYPE_PAGE, None, &["p"], text_content("Doc")),
            raw("p", TYPE_TEXT, Some("root"), &[], content),
        ];
        let tree = BlockTree::parse(&blocks).unwrap();
        match &tree.get("p").unwrap().block {
            Block::Text { elements } => match &elements[0] {
                InlineElement::TextRun { text, style, link } => {
                    assert_eq!(text, "styled");
                    assert!(style.bold && style.inline_code);
                    assert!(!style.italic);
                    assert_eq!(link.as_deref(), Some("https://example.com"));
                }
                other => panic!("expected text run, got {other:?}"),
            },
            other => panic!("expected text block, got {other:?}"),
        }
    }

    #[test]
    fn test_ordered_sequence_parsing() {
        let explicit = json!({
            "elements": [{ "text_run": { "content": "x" } }],
            "style": { "sequence": "5" }
        });
        let blocks = vec![
            raw("root", TYPE_PAGE, None, &["o"], text_content("Doc")),
            raw("o", TYPE_ORDERED, Some("root"), &[], explicit),
        ];
        let tree = BlockTree::parse(&blocks).unwrap();
        match &tree.get("o").unwrap().block {
            Block::Ordered { sequence, .. } => assert_eq!(*sequence, ListSequence::Explicit(5)),
            other => panic!("expected ordered, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_keeps_raw_text() {
        let blocks = vec![
            raw("root", TYPE_PAGE, None, &["u"], text_content("Doc")),
            raw("u", 9999, Some("root"), &[], text_content("salvaged")),
        ];
        let tree = BlockTree::parse(&blocks).unwrap();
        match &tree.get("u").unwrap().block {
            Block::Unknown { raw_text } => assert_eq!(raw_text.as_deref(), Some("salvaged")),
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_table_cells_fall_back_to_children() {
        let content = json!({ "property": { "row_size": 1, "column_size": 2 } });
        let blocks = vec![
            raw("root", TYPE_PAGE, None, &["t"], text_content("Doc")),
            raw("t", TYPE_TABLE, Some("root"), &["c1", "c2"], content),
            raw("c1", TYPE_TABLE_CELL, Some("t"), &[], json!({})),
            raw("c2", TYPE_TABLE_CELL, Some("t"), &[], json!({})),
        ];
        let tree = BlockTree::parse(&blocks).unwrap();
        match &tree.get("t").unwrap().block {
            Block::Table { rows, columns, cells } => {
                assert_eq!((*rows, *columns), (1, 2));
                assert_eq!(cells, &["c1".to_string(), "c2".to_string()]);
            }
            other => panic!("expected table, got {other:?}"),
        }
    }
}
