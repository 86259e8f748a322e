//! Markdown block splitting and hashing
//!
//! The remote service performs the actual Markdown → block conversion; this
//! module only decides where one block ends and the next begins, so the
//! diff engine can address edits by block index. The splitter is a
//! line-oriented state machine:
//!
//! - fenced code runs verbatim to its closing fence (nothing inside a
//!   fence is reinterpreted as structure)
//! - a table starts only when a pipe row is immediately followed by a
//!   valid separator line
//! - a blank line ends a list unless the following line is indented
//!   continuation or another marker
//! - headings and thematic breaks are single-line blocks
//!
//! Each block is normalized (trailing spaces stripped per line) before its
//! SHA-256 hash is taken, so editor whitespace churn does not register as a
//! content change.

use sha2::{Digest, Sha256};

use mdbridge_core::domain::newtypes::ContentHash;

/// One split block: normalized text plus its content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownBlock {
    pub text: String,
    pub hash: ContentHash,
}

impl MarkdownBlock {
    fn from_lines(lines: &[String]) -> Option<Self> {
        if lines.is_empty() {
            return None;
        }
        let text = lines
            .iter()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n")
            .trim_end()
            .to_string();
        if text.is_empty() {
            return None;
        }
        let hash = hash_block(&text);
        Some(Self { text, hash })
    }
}

/// SHA-256 of a normalized block's text
pub fn hash_block(text: &str) -> ContentHash {
    let hex = format!("{:x}", Sha256::digest(text.as_bytes()));
    // A sha2 hex digest is always 64 lowercase hex characters
    ContentHash::new(hex).expect("sha256 digest is a valid content hash")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Paragraph,
    List,
    Table,
}

/// Splits Markdown text into normalized, hashed blocks
pub fn split_markdown(markdown: &str) -> Vec<MarkdownBlock> {
    let lines: Vec<&str> = markdown.lines().collect();
    let mut blocks: Vec<MarkdownBlock> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut mode = Mode::Idle;
    let mut i = 0;

    fn flush(blocks: &mut Vec<MarkdownBlock>, current: &mut Vec<String>) {
        if let Some(block) = MarkdownBlock::from_lines(current) {
            blocks.push(block);
        }
        current.clear();
    }

    while i < lines.len() {
        let line = lines[i];

        // Fenced code: consume verbatim through the closing fence (or EOF)
        if let Some((fence_char, fence_len)) = fence_open(line) {
            flush(&mut blocks, &mut current);
            current.push(line.to_string());
            i += 1;
            while i < lines.len() {
                current.push(lines[i].to_string());
                let closed = is_fence_close(lines[i], fence_char, fence_len);
                i += 1;
                if closed {
                    break;
                }
            }
            flush(&mut blocks, &mut current);
            mode = Mode::Idle;
            continue;
        }

        if line.trim().is_empty() {
            // A blank line inside a list only ends it when what follows is
            // neither indented continuation nor another marker
            if mode == Mode::List {
                let continues = lines.get(i + 1).is_some_and(|next| {
                    !next.trim().is_empty()
                        && (next.starts_with(' ') || is_list_marker(next))
                });
                if continues {
                    current.push(String::new());
                    i += 1;
                    continue;
                }
            }
            flush(&mut blocks, &mut current);
            mode = Mode::Idle;
            i += 1;
            continue;
        }

        if is_heading(line) || is_thematic_break(line) {
            flush(&mut blocks, &mut current);
            current.push(line.to_string());
            flush(&mut blocks, &mut current);
            mode = Mode::Idle;
            i += 1;
            continue;
        }

        // A pipe row opens a table only when the next line is a valid
        // separator; otherwise it is just paragraph text with pipes
        if mode != Mode::Table
            && is_table_row(line)
            && lines.get(i + 1).is_some_and(|n| is_table_separator(n))
        {
            flush(&mut blocks, &mut current);
            mode = Mode::Table;
            current.push(line.to_string());
            i += 1;
            continue;
        }
        if mode == Mode::Table {
            if is_table_row(line) || is_table_separator(line) {
                current.push(line.to_string());
                i += 1;
                continue;
            }
            flush(&mut blocks, &mut current);
            mode = Mode::Idle;
            // fall through: the current line starts something new
        }

        if is_list_marker(line) {
            if mode != Mode::List {
                flush(&mut blocks, &mut current);
                mode = Mode::List;
            }
            current.push(line.to_string());
            i += 1;
            continue;
        }
        if mode == Mode::List && line.starts_with(' ') {
            current.push(line.to_string());
            i += 1;
            continue;
        }

        if mode != Mode::Paragraph {
            flush(&mut blocks, &mut current);
            mode = Mode::Paragraph;
        }
        current.push(line.to_string());
        i += 1;
    }

    flush(&mut blocks, &mut current);
    blocks
}

// ============================================================================
// Line classification
// ============================================================================

fn fence_open(line: &str) -> Option<(char, usize)> {
    let t = line.trim_start();
    for c in ['`', '~'] {
        let n = t.chars().take_while(|&x| x == c).count();
        if n >= 3 {
            return Some((c, n));
        }
    }
    None
}

fn is_fence_close(line: &str, fence_char: char, fence_len: usize) -> bool {
    let t = line.trim();
    !t.is_empty() && t.chars().all(|x| x == fence_char) && t.chars().count() >= fence_len
}

fn is_heading(line: &str) -> bool {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    (1..=6).contains(&hashes) && line.as_bytes().get(hashes) == Some(&b' ')
}

fn is_thematic_break(line: &str) -> bool {
    let t = line.trim();
    t.len() >= 3 && t.chars().all(|c| c == '-')
}

fn is_table_row(line: &str) -> bool {
    line.trim_start().starts_with('|')
}

/// `| --- | :--: |` style separator, required right under the header row
fn is_table_separator(line: &str) -> bool {
    let t = line.trim();
    if !t.starts_with('|') {
        return false;
    }
    let inner = t.trim_matches('|');
    let mut cells = 0;
    for cell in inner.split('|') {
        let c = cell.trim();
        if c.is_empty() {
            return false;
        }
        let body = c.trim_start_matches(':').trim_end_matches(':');
        if body.is_empty() || !body.chars().all(|ch| ch == '-') {
            return false;
        }
        cells += 1;
    }
    cells > 0
}

fn is_list_marker(line: &str) -> bool {
    let t = line.trim_start();
    if t.starts_with("- ") || t.starts_with("* ") || t.starts_with("+ ") {
        return true;
    }
    // Ordered: digits then "." or ")" then a space
    let digits = t.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return false;
    }
    matches!(t.as_bytes().get(digits), Some(b'.') | Some(b')'))
        && t.as_bytes().get(digits + 1) == Some(&b' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(blocks: &[MarkdownBlock]) -> Vec<&str> {
        blocks.iter().map(|b| b.text.as_str()).collect()
    }

    #[test]
    fn test_three_block_split() {
        let blocks = split_markdown("# Title\n\npara\n\nnew");
        assert_eq!(texts(&blocks), vec!["# Title", "para", "new"]);
    }

    #[test]
    fn test_fenced_code_is_one_verbatim_block() {
        let md = "before\n\n```rust\n# not a heading\n\nlet x = 1;\n```\n\nafter\n";
        let blocks = split_markdown(md);
        assert_eq!(blocks.len(), 3);
        assert_eq!(
            blocks[1].text,
            "```rust\n# not a heading\n\nlet x = 1;\n```"
        );
    }

    #[test]
    fn test_unterminated_fence_runs_to_eof() {
        let blocks = split_markdown("```\ncode\nmore");
        assert_eq!(texts(&blocks), vec!["```\ncode\nmore"]);
    }

    #[test]
    fn test_table_requires_separator_line() {
        let with = split_markdown("| a | b |\n| --- | --- |\n| 1 | 2 |\n");
        assert_eq!(with.len(), 1);

        // A lone pipe row with no separator is just a paragraph
        let without = split_markdown("| a | b |\njust text\n");
        assert_eq!(texts(&without), vec!["| a | b |\njust text"]);
    }

    #[test]
    fn test_list_continues_over_blank_when_indented() {
        let md = "- item one\n\n  continuation\n- item two\n";
        let blocks = split_markdown(md);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "- item one\n\n  continuation\n- item two");
    }

    #[test]
    fn test_list_ends_on_blank_before_plain_paragraph() {
        let blocks = split_markdown("- item\n\nplain paragraph\n");
        assert_eq!(texts(&blocks), vec!["- item", "plain paragraph"]);
    }

    #[test]
    fn test_ordered_marker_variants() {
        let blocks = split_markdown("1. one\n2) two\n10. ten\n");
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_heading_and_divider_are_own_blocks() {
        let blocks = split_markdown("## Section\n---\ntext\n");
        assert_eq!(texts(&blocks), vec!["## Section", "---", "text"]);
    }

    #[test]
    fn test_trailing_space_normalization_stabilizes_hash() {
        let a = split_markdown("para with spaces   \n");
        let b = split_markdown("para with spaces\n");
        assert_eq!(a[0].hash, b[0].hash);
        assert_eq!(a[0].text, "para with spaces");
    }

    #[test]
    fn test_hash_is_content_addressed() {
        let one = split_markdown("alpha\n\nbeta\n");
        let two = split_markdown("alpha\n\ngamma\n");
        assert_eq!(one[0].hash, two[0].hash);
        assert_ne!(one[1].hash, two[1].hash);
    }

    #[test]
    fn test_split_is_stable_under_resplit() {
        let md = "# T\n\n- a\n- b\n\n| h |\n| --- |\n| v |\n\n```\nx\n```\n";
        let first = split_markdown(md);
        let rejoined = first
            .iter()
            .map(|b| b.text.clone())
            .collect::<Vec<_>>()
            .join("\n\n");
        let second = split_markdown(&rejoined);
        assert_eq!(first, second);
    }
}
