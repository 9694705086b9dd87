//! Line-oriented comparison of result payloads.
//!
//! Payloads are rendered to an indented text form with sorted keys, split
//! into lines, and matched by recursively taking the longest common block of
//! lines. The matching blocks are turned into equal/insert/delete/replace
//! opcodes over line ranges.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Kind of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    Equal,
    Insert,
    Delete,
    Replace,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Tag::Equal => "equal",
            Tag::Insert => "insert",
            Tag::Delete => "delete",
            Tag::Replace => "replace",
        };
        f.write_str(tag)
    }
}

/// Turns `first[a_start..a_end]` into `second[b_start..b_end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opcode {
    pub tag: Tag,
    pub a_start: usize,
    pub a_end: usize,
    pub b_start: usize,
    pub b_end: usize,
}

/// Both rendered sides and the opcodes between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub first: Vec<String>,
    pub second: Vec<String>,
    pub opcodes: Vec<Opcode>,
}

/// Render a payload as indented text.
///
/// Maps become `key: value` lines, list items are prefixed with `- `, and
/// nesting adds one tab per level. Strings are rendered without quotes.
pub fn render(value: &Value) -> String {
    render_at(value, 0)
}

fn render_at(value: &Value, depth: usize) -> String {
    let tab = "\t".repeat(depth);
    match value {
        Value::Array(items) => {
            let mut rendered = String::from("\n");
            for item in items {
                rendered.push_str(&format!("{}- {}\n", tab, render_at(item, depth + 1)));
            }
            rendered
        }
        // serde_json maps iterate in key order.
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| format!("\n{}{}: {}", tab, key, render_at(value, depth + 1)))
            .collect(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a payload and split it into lines.
pub fn render_lines(value: &Value) -> Vec<String> {
    render(value).lines().map(String::from).collect()
}

/// Compare two payloads.
pub fn diff(first: &Value, second: &Value) -> Comparison {
    let first = render_lines(first);
    let second = render_lines(second);
    let opcodes = opcodes(&first, &second);
    Comparison {
        first,
        second,
        opcodes,
    }
}

/// Opcodes turning `a` into `b`.
pub fn opcodes<T: AsRef<str>>(a: &[T], b: &[T]) -> Vec<Opcode> {
    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    for (ai, bj, size) in matching_blocks(a, b) {
        let tag = match (i < ai, j < bj) {
            (true, true) => Some(Tag::Replace),
            (true, false) => Some(Tag::Delete),
            (false, true) => Some(Tag::Insert),
            (false, false) => None,
        };
        if let Some(tag) = tag {
            result.push(Opcode {
                tag,
                a_start: i,
                a_end: ai,
                b_start: j,
                b_end: bj,
            });
        }
        i = ai + size;
        j = bj + size;
        if size > 0 {
            result.push(Opcode {
                tag: Tag::Equal,
                a_start: ai,
                a_end: i,
                b_start: bj,
                b_end: j,
            });
        }
    }
    result
}

/// Maximal matching blocks `(a_index, b_index, len)`, in order, ending with
/// the `(a.len(), b.len(), 0)` sentinel.
fn matching_blocks<T: AsRef<str>>(a: &[T], b: &[T]) -> Vec<(usize, usize, usize)> {
    let mut b_index: HashMap<&str, Vec<usize>> = HashMap::new();
    for (j, line) in b.iter().enumerate() {
        b_index.entry(line.as_ref()).or_default().push(j);
    }

    let mut queue = vec![(0, a.len(), 0, b.len())];
    let mut blocks = Vec::new();
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, &b_index, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        blocks.push((i, j, k));
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    blocks.sort_unstable();

    let mut merged: Vec<(usize, usize, usize)> = Vec::with_capacity(blocks.len() + 1);
    for (i, j, k) in blocks {
        match merged.last_mut() {
            Some(last) if last.0 + last.2 == i && last.1 + last.2 == j => last.2 += k,
            _ => merged.push((i, j, k)),
        }
    }
    merged.push((a.len(), b.len(), 0));
    merged
}

/// Longest block of equal lines within `a[alo..ahi]` and `b[blo..bhi]`.
///
/// Ties go to the block starting earliest in `a`, then earliest in `b`.
fn longest_match<T: AsRef<str>>(
    a: &[T],
    b_index: &HashMap<&str, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    let mut run_lengths: HashMap<usize, usize> = HashMap::new();
    for (i, line) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next_lengths = HashMap::new();
        if let Some(positions) = b_index.get(line.as_ref()) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = j
                    .checked_sub(1)
                    .and_then(|prev| run_lengths.get(&prev))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                next_lengths.insert(j, k);
                if k > best_size {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_size = k;
                }
            }
        }
        run_lengths = next_lengths;
    }
    (best_i, best_j, best_size)
}
