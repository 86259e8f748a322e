//! Round-trip stability of the codec
//!
//! Rendered Markdown must survive its own re-encoding: splitting the
//! decoder's output and splitting it again yields the same blocks, and the
//! structural features (heading levels, inline markers, ordered numbering,
//! table cell count) are preserved verbatim in the split blocks.

use std::collections::HashMap;

use serde_json::{json, Value};

use mdbridge_codec::{split_markdown, BlockTree, Decoder};
use mdbridge_core::ports::RawBlock;

fn raw(id: &str, block_type: u32, parent: Option<&str>, children: &[&str], content: Value) -> RawBlock {
    RawBlock {
        block_id: id.to_string(),
        block_type,
        parent_id: parent.map(str::to_string),
        children: children.iter().map(|c| c.to_string()).collect(),
        content,
    }
}

fn text(s: &str) -> Value {
    json!({ "elements": [{ "text_run": { "content": s } }] })
}

fn sample_document() -> Vec<RawBlock> {
    let styled = json!({
        "elements": [
            { "text_run": { "content": "bold", "text_element_style": { "bold": true } } },
            { "text_run": { "content": " and " } },
            { "text_run": { "content": "code", "text_element_style": { "inline_code": true } } }
        ]
    });
    let table = json!({ "property": { "row_size": 2, "column_size": 2 } });
    vec![
        raw(
            "root",
            1,
            None,
            &["h1", "p", "o1", "o2", "h2", "t"],
            text("Doc"),
        ),
        raw("h1", 3, Some("root"), &[], text("Top")),
        raw("p", 2, Some("root"), &[], styled),
        raw("o1", 13, Some("root"), &[], text("first")),
        raw("o2", 13, Some("root"), &[], text("second")),
        raw("h2", 4, Some("root"), &[], text("Sub")),
        raw("t", 31, Some("root"), &["c1", "c2", "c3", "c4"], table),
        raw("c1", 32, Some("t"), &["x1"], json!({})),
        raw("c2", 32, Some("t"), &["x2"], json!({})),
        raw("c3", 32, Some("t"), &["x3"], json!({})),
        raw("c4", 32, Some("t"), &["x4"], json!({})),
        raw("x1", 2, Some("c1"), &[], text("H1")),
        raw("x2", 2, Some("c2"), &[], text("H2")),
        raw("x3", 2, Some("c3"), &[], text("v1")),
        raw("x4", 2, Some("c4"), &[], text("v2")),
    ]
}

fn decode_sample() -> String {
    let tree = BlockTree::parse(&sample_document()).unwrap();
    let paths = HashMap::new();
    Decoder::new(&paths, "assets").decode(&tree).unwrap().markdown
}

#[test]
fn test_decoded_markdown_resplits_stably() {
    let markdown = decode_sample();
    let first = split_markdown(&markdown);

    let rejoined = first
        .iter()
        .map(|b| b.text.clone())
        .collect::<Vec<_>>()
        .join("\n\n");
    let second = split_markdown(&rejoined);

    assert_eq!(first, second);
}

#[test]
fn test_heading_levels_survive() {
    let blocks = split_markdown(&decode_sample());
    let texts: Vec<&str> = blocks.iter().map(|b| b.text.as_str()).collect();
    assert!(texts.contains(&"# Top"));
    assert!(texts.contains(&"## Sub"));
}

#[test]
fn test_inline_markers_survive() {
    let blocks = split_markdown(&decode_sample());
    assert!(blocks.iter().any(|b| b.text == "**bold** and `code`"));
}

#[test]
fn test_ordered_numbering_survives() {
    let blocks = split_markdown(&decode_sample());
    assert!(blocks.iter().any(|b| b.text == "1. first\n2. second"));
}

#[test]
fn test_table_cell_count_survives() {
    let blocks = split_markdown(&decode_sample());
    let table = blocks
        .iter()
        .find(|b| b.text.starts_with('|'))
        .expect("table block present");

    let data_rows: Vec<&str> = table
        .text
        .lines()
        .filter(|l| !l.contains("---"))
        .collect();
    assert_eq!(data_rows.len(), 2);
    for row in data_rows {
        // "| a | b |" has 2 cells between 3 pipes
        assert_eq!(row.matches('|').count(), 3);
    }
}
