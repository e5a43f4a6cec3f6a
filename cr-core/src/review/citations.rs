//! Citation parsing, validation, and the single repair pass

use std::collections::HashMap;

use cr_providers::PRInfo;
use serde_json::Value;
use tracing::debug;

use crate::types::{DiffCitation, Side};

/// Old/new line counts for one cited file.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCounts {
    pub old: u32,
    pub new: u32,
}

/// Parse model-supplied citation values.
///
/// Accepts objects (`{path, side, startLine, endLine}`) and strings in the
/// `path:start-end` or `path:line` forms; strings default to the unified
/// side and get repaired later.
pub fn parse_raw_citations(raw: &[Value]) -> Vec<DiffCitation> {
    let mut citations = Vec::new();
    for item in raw {
        match item {
            Value::Object(map) => {
                let path = map
                    .get("path")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let side = map
                    .get("side")
                    .and_then(Value::as_str)
                    .map(Side::parse)
                    .unwrap_or(Side::Unified);
                let start_line = line_field(map, "startLine", "start_line").unwrap_or(1);
                let end_line = line_field(map, "endLine", "end_line").unwrap_or(start_line);
                citations.push(DiffCitation {
                    path,
                    side,
                    start_line,
                    end_line,
                    label: map
                        .get("label")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    reason: map
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });
            }
            Value::String(s) => {
                if let Some(citation) = parse_citation_string(s) {
                    citations.push(citation);
                }
            }
            _ => {}
        }
    }
    citations
}

fn line_field(map: &serde_json::Map<String, Value>, camel: &str, snake: &str) -> Option<u32> {
    map.get(camel)
        .or_else(|| map.get(snake))
        .and_then(Value::as_u64)
        .map(|n| n as u32)
}

/// Parse a `path:start-end` or `path:line` citation string.
pub fn parse_citation_string(s: &str) -> Option<DiffCitation> {
    let (path, line_part) = s.rsplit_once(':')?;
    let (start, end) = match line_part.split_once('-') {
        Some((start, end)) => (start.trim().parse().ok()?, end.trim().parse().ok()?),
        None => {
            let line: u32 = line_part.trim().parse().ok()?;
            (line, line)
        }
    };
    Some(DiffCitation {
        path: path.to_string(),
        side: Side::Unified,
        start_line: start,
        end_line: end,
        label: None,
        reason: String::new(),
    })
}

/// Basic shape normalization: non-empty path, 1-based ordered range.
pub fn normalize_citation(mut citation: DiffCitation) -> Option<DiffCitation> {
    if citation.path.is_empty() {
        return None;
    }
    if citation.start_line > citation.end_line {
        std::mem::swap(&mut citation.start_line, &mut citation.end_line);
    }
    if citation.start_line == 0 {
        return None;
    }
    Some(citation)
}

/// The single repair pass over one citation.
///
/// A citation survives iff its path is part of the change set and its lines
/// exist on the indicated side. `unified` citations get a concrete side
/// inferred from the line counts: additions when the start fits the new
/// file, deletions when it fits the old file, dropped otherwise. Explicit
/// sides are never reassigned.
pub fn repair_citation(
    citation: DiffCitation,
    pr: &PRInfo,
    counts: &HashMap<String, LineCounts>,
) -> Option<DiffCitation> {
    let mut citation = normalize_citation(citation)?;
    if !pr.touches(&citation.path) {
        debug!(path = %citation.path, "citation path outside the change set");
        return None;
    }
    let counts = counts.get(&citation.path)?;

    match citation.side {
        Side::Additions => (citation.end_line <= counts.new).then_some(citation),
        Side::Deletions => (citation.end_line <= counts.old).then_some(citation),
        Side::Unified => {
            if citation.start_line <= counts.new {
                citation.side = Side::Additions;
                citation.end_line = citation.end_line.min(counts.new);
                Some(citation)
            } else if citation.start_line <= counts.old {
                citation.side = Side::Deletions;
                citation.end_line = citation.end_line.min(counts.old);
                Some(citation)
            } else {
                debug!(path = %citation.path, start = citation.start_line, "citation beyond both sides");
                None
            }
        }
    }
}
