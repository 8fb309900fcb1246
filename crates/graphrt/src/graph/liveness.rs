//! Opt-in validator for the compiler's storage plan.
//!
//! The executor trusts `storage_id` aliasing; this walk recomputes entry
//! live ranges from the node order and rejects plans in which two entries
//! sharing a pool buffer are live at the same time. Reuse at a single
//! boundary node is allowed: a kernel may write an output into the buffer of
//! an input that dies at that same node.

use std::collections::HashMap;

use anyhow::{bail, Result};

use super::Graph;

#[derive(Debug, Clone, Copy)]
struct EntrySpan {
    entry: usize,
    def: usize,
    last_use: usize,
}

/// Checks that entries sharing a `storage_id` have non-overlapping live
/// ranges. Input entries are live from the first node, output entries to the
/// last.
pub fn validate_plan(graph: &Graph) -> Result<()> {
    let total = graph.num_node_entries();
    let num_nodes = graph.num_nodes();
    let mut def = vec![0usize; total];
    let mut last_use = vec![0usize; total];

    for (nid, node) in graph.nodes.iter().enumerate() {
        for k in 0..node.num_outputs() {
            let e = graph.entry_id(nid as u32, k);
            def[e] = nid;
            last_use[e] = nid;
        }
    }
    for &nid in &graph.input_nodes {
        def[graph.entry_id(nid, 0)] = 0;
    }
    for (nid, node) in graph.nodes.iter().enumerate() {
        for input in &node.inputs {
            let e = graph.entry_id_of(input);
            last_use[e] = last_use[e].max(nid);
        }
    }
    let end = num_nodes.saturating_sub(1);
    for head in &graph.outputs {
        last_use[graph.entry_id_of(head)] = end;
    }

    let mut by_storage: HashMap<i64, Vec<EntrySpan>> = HashMap::new();
    for entry in 0..total {
        by_storage
            .entry(graph.attrs.storage_id[entry])
            .or_default()
            .push(EntrySpan {
                entry,
                def: def[entry],
                last_use: last_use[entry],
            });
    }

    for (sid, mut spans) in by_storage {
        spans.sort_by_key(|span| (span.def, span.last_use));
        let mut prev: Option<EntrySpan> = None;
        for span in spans {
            if let Some(prev) = prev.filter(|prev| span.def < prev.last_use) {
                bail!(
                    "storage id {sid} is shared by entries {} (live {}..={}) and {} (live {}..={}) which overlap",
                    prev.entry,
                    prev.def,
                    prev.last_use,
                    span.entry,
                    span.def,
                    span.last_use
                );
            }
            let keep = match prev {
                Some(p) if p.last_use >= span.last_use => p,
                _ => span,
            };
            prev = Some(keep);
        }
    }

    Ok(())
}
