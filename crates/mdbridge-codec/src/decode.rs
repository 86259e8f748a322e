//! Block tree → Markdown rendering
//!
//! Pure recursive rendering: every subtree renders into an owned list of
//! lines which the caller concatenates, so no mutable line buffer is shared
//! across recursion levels. Asset references (images, file attachments) are
//! not downloaded here; the decoder schedules them as [`AssetRequest`]s and
//! emits relative links to where they will land, preferring local copies
//! the caller already knows about.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::block::{Block, BlockNode, BlockTree, InlineElement, ListSequence};
use crate::CodecError;

/// An image/file block whose content should be fetched into the assets
/// folder after rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    pub token: String,
    /// Path relative to the document's directory, as linked in the Markdown
    pub relative_path: PathBuf,
}

/// Result of decoding one document
#[derive(Debug, Clone)]
pub struct DecodeOutput {
    pub markdown: String,
    pub assets: Vec<AssetRequest>,
}

/// Lines plus scheduled assets for one rendered subtree
#[derive(Debug, Default)]
struct Rendered {
    lines: Vec<String>,
    assets: Vec<AssetRequest>,
}

impl Rendered {
    fn new() -> Self {
        Self::default()
    }

    fn absorb(&mut self, other: Rendered) {
        self.lines.extend(other.lines);
        self.assets.extend(other.assets);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Bullet,
    Ordered,
    Todo,
}

fn list_kind(block: &Block) -> Option<ListKind> {
    match block {
        Block::Bullet { .. } => Some(ListKind::Bullet),
        Block::Ordered { .. } => Some(ListKind::Ordered),
        Block::Todo { .. } => Some(ListKind::Todo),
        _ => None,
    }
}

/// Renders a parsed [`BlockTree`] into Markdown
///
/// `token_paths` maps remote object tokens to already-known relative local
/// paths; links and mentions pointing at a tracked document are rewritten
/// through it, and assets with a known copy are not re-scheduled.
pub struct Decoder<'a> {
    token_paths: &'a HashMap<String, PathBuf>,
    assets_dir: &'a str,
}

impl<'a> Decoder<'a> {
    pub fn new(token_paths: &'a HashMap<String, PathBuf>, assets_dir: &'a str) -> Self {
        Self {
            token_paths,
            assets_dir,
        }
    }

    /// Renders the whole document below the root page block
    pub fn decode(&self, tree: &BlockTree) -> Result<DecodeOutput, CodecError> {
        let rendered = self.render_siblings(tree, tree.root_children(), 0)?;
        let mut markdown = rendered.lines.join("\n");
        if !markdown.is_empty() {
            markdown.push('\n');
        }
        Ok(DecodeOutput {
            markdown,
            assets: rendered.assets,
        })
    }

    /// Renders an ordered sibling list, grouping consecutive same-kind list
    /// blocks into one run. Top-level groups (depth 0) are separated by one
    /// blank line.
    fn render_siblings(
        &self,
        tree: &BlockTree,
        ids: &[String],
        depth: usize,
    ) -> Result<Rendered, CodecError> {
        let mut out = Rendered::new();
        let mut i = 0;
        while i < ids.len() {
            let Some(node) = tree.get(&ids[i]) else {
                i += 1;
                continue;
            };

            let group = if let Some(kind) = list_kind(&node.block) {
                let mut j = i;
                while j < ids.len() {
                    match tree.get(&ids[j]) {
                        Some(n) if list_kind(&n.block) == Some(kind) => j += 1,
                        _ => break,
                    }
                }
                let run: Vec<&BlockNode> = ids[i..j].iter().filter_map(|id| tree.get(id)).collect();
                i = j;
                self.render_list_run(tree, &run)?
            } else {
                i += 1;
                self.render_block(tree, node)?
            };

            if depth == 0 && !out.lines.is_empty() && !group.lines.is_empty() {
                out.lines.push(String::new());
            }
            out.absorb(group);
        }
        Ok(out)
    }

    /// Renders one run of consecutive same-kind list siblings
    ///
    /// Ordered numbering continues across the run; an explicit sequence on
    /// a block resets the counter. Nested children indent by a fixed step,
    /// wider for ordered lists so continuation lines clear the marker.
    fn render_list_run(
        &self,
        tree: &BlockTree,
        run: &[&BlockNode],
    ) -> Result<Rendered, CodecError> {
        let mut out = Rendered::new();
        let mut counter: u64 = 0;

        for node in run {
            let (marker, child_indent) = match &node.block {
                Block::Bullet { .. } => ("- ".to_string(), "  "),
                Block::Todo { done, .. } => {
                    let m = if *done { "- [x] " } else { "- [ ] " };
                    (m.to_string(), "  ")
                }
                Block::Ordered { sequence, .. } => {
                    counter = match sequence {
                        ListSequence::Explicit(n) => *n,
                        ListSequence::Auto => counter + 1,
                    };
                    (format!("{counter}. "), "   ")
                }
                _ => continue,
            };

            let elements = match &node.block {
                Block::Bullet { elements }
                | Block::Todo { elements, .. }
                | Block::Ordered { elements, .. } => elements,
                _ => continue,
            };

            let text = self.render_inline(elements);
            let mut item_lines = text.split('\n');
            if let Some(first) = item_lines.next() {
                out.lines.push(format!("{marker}{first}"));
            }
            for continuation in item_lines {
                out.lines.push(format!("{child_indent}{continuation}"));
            }

            if !node.children.is_empty() {
                let child = self.render_siblings(tree, &node.children, 1)?;
                for line in child.lines {
                    if line.is_empty() {
                        out.lines.push(String::new());
                    } else {
                        out.lines.push(format!("{child_indent}{line}"));
                    }
                }
                out.assets.extend(child.assets);
            }
        }
        Ok(out)
    }

    fn render_block(&self, tree: &BlockTree, node: &BlockNode) -> Result<Rendered, CodecError> {
        let mut out = Rendered::new();
        match &node.block {
            // Containers with no text of their own
            Block::Page { .. } | Block::TableCell => {
                out = self.render_siblings(tree, &node.children, 1)?;
            }
            Block::Heading { level, elements } => {
                let hashes = "#".repeat(usize::from(*level));
                out.lines
                    .push(format!("{hashes} {}", self.render_inline(elements)));
            }
            Block::Text { elements } => {
                let text = self.render_inline(elements);
                out.lines.extend(text.split('\n').map(str::to_string));
                if !node.children.is_empty() {
                    let child = self.render_siblings(tree, &node.children, 1)?;
                    out.absorb(child);
                }
            }
            Block::Quote { elements } | Block::Callout { elements } => {
                let mut inner_lines: Vec<String> = Vec::new();
                let text = self.render_inline(elements);
                if !text.is_empty() {
                    inner_lines.extend(text.split('\n').map(str::to_string));
                }
                let child = self.render_siblings(tree, &node.children, 0)?;
                if !child.lines.is_empty() {
                    if !inner_lines.is_empty() {
                        inner_lines.push(String::new());
                    }
                    inner_lines.extend(child.lines);
                }
                out.assets.extend(child.assets);
                // A blank line inside a quote stays a quote line
                for line in inner_lines {
                    if line.is_empty() {
                        out.lines.push(">".to_string());
                    } else {
                        out.lines.push(format!("> {line}"));
                    }
                }
            }
            Block::Code { language, elements } => {
                let raw: String = elements
                    .iter()
                    .filter_map(|e| match e {
                        InlineElement::TextRun { text, .. } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                out.lines
                    .push(format!("```{}", language.as_deref().unwrap_or("")));
                out.lines
                    .extend(raw.trim_end_matches('\n').split('\n').map(str::to_string));
                out.lines.push("```".to_string());
            }
            Block::Table {
                rows,
                columns,
                cells,
            } => {
                out = self.render_table(tree, &node.id, *rows, *columns, cells)?;
            }
            Block::Image { token } => {
                let line = self.asset_link(token.as_deref(), None, true, &mut out.assets);
                out.lines.push(line);
            }
            Block::File { token, name } => {
                let line = self.asset_link(token.as_deref(), name.as_deref(), false, &mut out.assets);
                out.lines.push(line);
            }
            Block::Divider => out.lines.push("---".to_string()),
            // Unknown content renders its children, or its raw text; it is
            // never dropped
            Block::Unknown { raw_text } => {
                if !node.children.is_empty() {
                    out = self.render_siblings(tree, &node.children, 0)?;
                } else if let Some(text) = raw_text {
                    out.lines.extend(text.split('\n').map(str::to_string));
                }
            }
            // List blocks reaching here were not grouped (single stray
            // child of a non-list parent); render as a one-item run
            Block::Bullet { .. } | Block::Ordered { .. } | Block::Todo { .. } => {
                out = self.render_list_run(tree, &[node])?;
            }
        }
        Ok(out)
    }

    /// Reshapes the flat cell list row-major; first row becomes the header
    fn render_table(
        &self,
        tree: &BlockTree,
        table_id: &str,
        rows: usize,
        columns: usize,
        cells: &[String],
    ) -> Result<Rendered, CodecError> {
        let mut out = Rendered::new();
        if cells.is_empty() {
            return Ok(out);
        }

        let columns = if columns == 0 { cells.len() } else { columns };
        let rows = if rows == 0 {
            cells.len().div_ceil(columns)
        } else {
            rows
        };
        if rows * columns != cells.len() {
            return Err(CodecError::MalformedTable(table_id.to_string()));
        }

        let mut matrix: Vec<Vec<String>> = Vec::with_capacity(rows);
        for r in 0..rows {
            let mut row = Vec::with_capacity(columns);
            for c in 0..columns {
                let cell_id = &cells[r * columns + c];
                let text = match tree.get(cell_id) {
                    Some(cell) => {
                        let rendered = self.render_siblings(tree, &cell.children, 1)?;
                        out.assets.extend(rendered.assets);
                        flatten_cell(&rendered.lines)
                    }
                    None => String::new(),
                };
                row.push(text);
            }
            matrix.push(row);
        }

        out.lines.push(format!("| {} |", matrix[0].join(" | ")));
        out.lines
            .push(format!("|{}|", vec![" --- "; columns].join("|")));
        for row in &matrix[1..] {
            out.lines.push(format!("| {} |", row.join(" | ")));
        }
        Ok(out)
    }

    fn asset_link(
        &self,
        token: Option<&str>,
        name: Option<&str>,
        image: bool,
        assets: &mut Vec<AssetRequest>,
    ) -> String {
        let Some(token) = token else {
            return name.unwrap_or_default().to_string();
        };
        let label = name.unwrap_or(token);

        let path = match self.token_paths.get(token) {
            Some(known) => known.clone(),
            None => {
                let file_name = name.map_or_else(|| token.to_string(), str::to_string);
                let relative = Path::new(self.assets_dir).join(file_name);
                assets.push(AssetRequest {
                    token: token.to_string(),
                    relative_path: relative.clone(),
                });
                relative
            }
        };

        if image {
            format!("![{label}]({})", path.display())
        } else {
            format!("[{label}]({})", path.display())
        }
    }

    /// Renders inline elements into one string
    ///
    /// Style markers wrap in a fixed nesting order (code innermost, then
    /// bold, italic, strikethrough, underline) so re-encoding is stable;
    /// the hyperlink wraps the fully styled text.
    fn render_inline(&self, elements: &[InlineElement]) -> String {
        let mut out = String::new();
        for element in elements {
            match element {
                InlineElement::TextRun { text, style, link } => {
                    let mut t = text.clone();
                    if style.inline_code {
                        t = format!("`{t}`");
                    }
                    if style.bold {
                        t = format!("**{t}**");
                    }
                    if style.italic {
                        t = format!("*{t}*");
                    }
                    if style.strikethrough {
                        t = format!("~~{t}~~");
                    }
                    if style.underline {
                        t = format!("<u>{t}</u>");
                    }
                    if let Some(url) = link {
                        let target = self.rewrite_link(url);
                        t = format!("[{t}]({target})");
                    }
                    out.push_str(&t);
                }
                InlineElement::MentionDoc { token, title } => {
                    match self.token_paths.get(token) {
                        Some(path) => out.push_str(&format!("[{title}]({})", path.display())),
                        None => out.push_str(&format!("[[{title}]]")),
                    }
                }
                InlineElement::MentionUser { name } => out.push_str(&format!("@{name}")),
                InlineElement::Reminder { at } => match at {
                    Some(at) => {
                        out.push_str(&format!("[reminder: {}]", at.format("%Y-%m-%d %H:%M")));
                    }
                    None => out.push_str("[reminder]"),
                },
            }
        }
        out
    }

    /// Rewrites a URL to a relative local path when it targets a tracked
    /// document
    fn rewrite_link(&self, url: &str) -> String {
        for (token, path) in self.token_paths {
            if url.contains(token.as_str()) {
                return path.display().to_string();
            }
        }
        url.to_string()
    }
}

/// Flattens a rendered cell subtree into a single table-cell line:
/// lines join with `<br>`, and leading indentation survives as
/// non-breaking spaces so nested lists stay readable inside the cell.
fn flatten_cell(lines: &[String]) -> String {
    lines
        .iter()
        .filter(|l| !l.is_empty())
        .map(|l| {
            let trimmed = l.trim_start_matches(' ');
            let pad = l.len() - trimmed.len();
            format!("{}{}", "\u{a0}".repeat(pad), trimmed)
        })
        .collect::<Vec<_>>()
        .join("<br>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdbridge_core::ports::RawBlock;
    use serde_json::{json, Value};

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

    fn decode(blocks: Vec<RawBlock>) -> DecodeOutput {
        let tree = BlockTree::parse(&blocks).unwrap();
        let paths = HashMap::new();
        Decoder::new(&paths, "assets").decode(&tree).unwrap()
    }

    #[test]
    fn test_headings_and_paragraphs() {
        let out = decode(vec![
            raw("root", 1, None, &["h1", "p", "h3"], text("Doc")),
            raw("h1", 3, Some("root"), &[], text("Title")),
            raw("p", 2, Some("root"), &[], text("Body text")),
            raw("h3", 5, Some("root"), &[], text("Deep")),
        ]);
        assert_eq!(out.markdown, "# Title\n\nBody text\n\n### Deep\n");
    }

    #[test]
    fn test_inline_style_nesting_order() {
        let content = json!({
            "elements": [{
                "text_run": {
                    "content": "x",
                    "text_element_style": { "bold": true, "italic": true, "inline_code": true }
                }
            }]
        });
        let out = decode(vec![
            raw("root", 1, None, &["p"], text("Doc")),
            raw("p", 2, Some("root"), &[], content),
        ]);
        assert_eq!(out.markdown, "***`x`***\n");
    }

    #[test]
    fn test_ordered_numbering_continues_and_resets() {
        let auto = |s: &str| json!({ "elements": [{ "text_run": { "content": s } }] });
        let explicit = json!({
            "elements": [{ "text_run": { "content": "c" } }],
            "style": { "sequence": "10" }
        });
        let out = decode(vec![
            raw("root", 1, None, &["a", "b", "c", "d"], text("Doc")),
            raw("a", 13, Some("root"), &[], auto("a")),
            raw("b", 13, Some("root"), &[], auto("b")),
            raw("c", 13, Some("root"), &[], explicit),
            raw("d", 13, Some("root"), &[], auto("d")),
        ]);
        assert_eq!(out.markdown, "1. a\n2. b\n10. c\n11. d\n");
    }

    #[test]
    fn test_nested_bullet_indentation() {
        let out = decode(vec![
            raw("root", 1, None, &["a"], text("Doc")),
            raw("a", 12, Some("root"), &["a1"], text("outer")),
            raw("a1", 12, Some("a"), &[], text("inner")),
        ]);
        assert_eq!(out.markdown, "- outer\n  - inner\n");
    }

    #[test]
    fn test_todo_markers() {
        let done = json!({
            "elements": [{ "text_run": { "content": "done" } }],
            "style": { "done": true }
        });
        let out = decode(vec![
            raw("root", 1, None, &["t1", "t2"], text("Doc")),
            raw("t1", 17, Some("root"), &[], text("open")),
            raw("t2", 17, Some("root"), &[], done),
        ]);
        assert_eq!(out.markdown, "- [ ] open\n- [x] done\n");
    }

    #[test]
    fn test_quote_nesting_and_blank_lines() {
        let out = decode(vec![
            raw("root", 1, None, &["q"], text("Doc")),
            raw("q", 15, Some("root"), &["p1", "p2"], text("lead")),
            raw("p1", 2, Some("q"), &[], text("first")),
            raw("p2", 2, Some("q"), &[], text("second")),
        ]);
        // Blank separators inside the quote render as ">" alone
        assert_eq!(out.markdown, "> lead\n>\n> first\n>\n> second\n");
    }

    #[test]
    fn test_code_block_verbatim() {
        let code = json!({
            "elements": [{ "text_run": { "content": "fn main() {}\n// # not a heading\n" } }],
            "style": { "language": "rust" }
        });
        let out = decode(vec![
            raw("root", 1, None, &["c"], text("Doc")),
            raw("c", 14, Some("root"), &[], code),
        ]);
        assert_eq!(
            out.markdown,
            "```rust\nfn main() {}\n// # not a heading\n```\n"
        );
    }

    #[test]
    fn test_table_reshape_and_header() {
        let table = json!({ "property": { "row_size": 2, "column_size": 2 } });
        let out = decode(vec![
            raw("root", 1, None, &["t"], text("Doc")),
            raw("t", 31, Some("root"), &["c1", "c2", "c3", "c4"], table),
            raw("c1", 32, Some("t"), &["x1"], json!({})),
            raw("c2", 32, Some("t"), &["x2"], json!({})),
            raw("c3", 32, Some("t"), &["x3"], json!({})),
            raw("c4", 32, Some("t"), &["x4"], json!({})),
            raw("x1", 2, Some("c1"), &[], text("A")),
            raw("x2", 2, Some("c2"), &[], text("B")),
            raw("x3", 2, Some("c3"), &[], text("1")),
            raw("x4", 2, Some("c4"), &[], text("2")),
        ]);
        assert_eq!(out.markdown, "| A | B |\n| --- | --- |\n| 1 | 2 |\n");
    }

    #[test]
    fn test_multiline_cell_flattens_with_br() {
        let table = json!({ "property": { "row_size": 1, "column_size": 1 } });
        let out = decode(vec![
            raw("root", 1, None, &["t"], text("Doc")),
            raw("t", 31, Some("root"), &["c1"], table),
            raw("c1", 32, Some("t"), &["l1"], json!({})),
            raw("l1", 12, Some("c1"), &["l2"], text("outer")),
            raw("l2", 12, Some("l1"), &[], text("inner")),
        ]);
        assert_eq!(
            out.markdown,
            "| - outer<br>\u{a0}\u{a0}- inner |\n| --- |\n"
        );
    }

    #[test]
    fn test_image_scheduled_into_assets() {
        let out = decode(vec![
            raw("root", 1, None, &["i"], text("Doc")),
            raw("i", 27, Some("root"), &[], json!({ "token": "imgTok1" })),
        ]);
        assert_eq!(out.markdown, "![imgTok1](assets/imgTok1)\n");
        assert_eq!(
            out.assets,
            vec![AssetRequest {
                token: "imgTok1".to_string(),
                relative_path: PathBuf::from("assets/imgTok1"),
            }]
        );
    }

    #[test]
    fn test_known_asset_not_rescheduled() {
        let blocks = vec![
            raw("root", 1, None, &["f"], text("Doc")),
            raw(
                "f",
                23,
                Some("root"),
                &[],
                json!({ "token": "fileTok1", "name": "report.pdf" }),
            ),
        ];
        let tree = BlockTree::parse(&blocks).unwrap();
        let mut paths = HashMap::new();
        paths.insert("fileTok1".to_string(), PathBuf::from("assets/report.pdf"));
        let out = Decoder::new(&paths, "assets").decode(&tree).unwrap();

        assert_eq!(out.markdown, "[report.pdf](assets/report.pdf)\n");
        assert!(out.assets.is_empty());
    }

    #[test]
    fn test_link_rewritten_to_tracked_document() {
        let content = json!({
            "elements": [{
                "text_run": {
                    "content": "see here",
                    "text_element_style": {
                        "link": { "url": "https://cloud.example/docs/docTok9" }
                    }
                }
            }]
        });
        let blocks = vec![
            raw("root", 1, None, &["p"], text("Doc")),
            raw("p", 2, Some("root"), &[], content),
        ];
        let tree = BlockTree::parse(&blocks).unwrap();
        let mut paths = HashMap::new();
        paths.insert("docTok9".to_string(), PathBuf::from("other/note.md"));
        let out = Decoder::new(&paths, "assets").decode(&tree).unwrap();

        assert_eq!(out.markdown, "[see here](other/note.md)\n");
    }

    #[test]
    fn test_mentions_and_reminder() {
        let content = json!({
            "elements": [
                { "mention_doc": { "token": "unknownTok", "title": "Linked doc" } },
                { "text_run": { "content": " " } },
                { "mention_user": { "name": "amira" } },
                { "text_run": { "content": " " } },
                { "reminder": { "expire_time_ms": 1765000800000i64 } }
            ]
        });
        let out = decode(vec![
            raw("root", 1, None, &["p"], text("Doc")),
            raw("p", 2, Some("root"), &[], content),
        ]);
        assert!(out.markdown.starts_with("[[Linked doc]] @amira [reminder: 2025-12-06"));
    }

    #[test]
    fn test_divider_and_unknown_fallback() {
        let out = decode(vec![
            raw("root", 1, None, &["d", "u"], text("Doc")),
            raw("d", 22, Some("root"), &[], json!({})),
            raw("u", 777, Some("root"), &[], text("kept anyway")),
        ]);
        assert_eq!(out.markdown, "---\n\nkept anyway\n");
    }
}
