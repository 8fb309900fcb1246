//! Strict decoder for the textual graph description.
//!
//! The format is an order-insensitive object mixing mandatory and optional
//! keys, so each object is folded through a bitmask accumulator: one bit per
//! required key, checked once at the end. Unknown keys are fatal everywhere
//! except inside operator attribute objects and the skippable storage-plan
//! attributes.

use anyhow::{anyhow, bail, ensure, Context, Result};
use serde_json::Value;

use super::{Graph, GraphAttrs, Node, NodeEntry, NodeOp, OpParam};

const GRAPH_NODES: u32 = 1;
const GRAPH_ARG_NODES: u32 = 1 << 1;
const GRAPH_NODE_ROW_PTR: u32 = 1 << 2;
const GRAPH_HEADS: u32 = 1 << 3;
const GRAPH_ATTRS: u32 = 1 << 4;
const GRAPH_REQUIRED: u32 =
    GRAPH_NODES | GRAPH_ARG_NODES | GRAPH_NODE_ROW_PTR | GRAPH_HEADS | GRAPH_ATTRS;

const NODE_OP: u32 = 1;
const NODE_NAME: u32 = 1 << 1;
const NODE_INPUTS: u32 = 1 << 2;
const NODE_REQUIRED: u32 = NODE_OP | NODE_NAME | NODE_INPUTS;

const PARAM_FUNC_NAME: u32 = 1;
const PARAM_NUM_INPUTS: u32 = 1 << 1;
const PARAM_NUM_OUTPUTS: u32 = 1 << 2;
const PARAM_FLATTEN_DATA: u32 = 1 << 3;
const PARAM_REQUIRED: u32 =
    PARAM_FUNC_NAME | PARAM_NUM_INPUTS | PARAM_NUM_OUTPUTS | PARAM_FLATTEN_DATA;

const ATTR_DLTYPE: u32 = 1;
const ATTR_STORAGE_ID: u32 = 1 << 1;
const ATTR_SHAPE: u32 = 1 << 2;
const ATTR_REQUIRED: u32 = ATTR_DLTYPE | ATTR_STORAGE_ID | ATTR_SHAPE;

/// Decodes a graph description. Structural invariants are checked separately
/// by [`Graph::validate`].
pub fn parse_graph(json_text: &str) -> Result<Graph> {
    let root: Value =
        serde_json::from_str(json_text).context("graph description is not valid JSON")?;
    let root = root
        .as_object()
        .ok_or_else(|| anyhow!("graph description must be a JSON object"))?;

    let mut bitmask = 0u32;
    let mut nodes = Vec::new();
    let mut input_nodes = Vec::new();
    let mut node_row_ptr = Vec::new();
    let mut outputs = Vec::new();
    let mut attrs = GraphAttrs::default();

    for (key, value) in root {
        match key.as_str() {
            "nodes" => {
                nodes = parse_nodes(value)?;
                bitmask |= GRAPH_NODES;
            }
            "arg_nodes" => {
                input_nodes = parse_u32_array(value).context("decoding arg_nodes")?;
                bitmask |= GRAPH_ARG_NODES;
            }
            "node_row_ptr" => {
                node_row_ptr = parse_u32_array(value).context("decoding node_row_ptr")?;
                bitmask |= GRAPH_NODE_ROW_PTR;
            }
            "heads" => {
                outputs = parse_entry_array(value).context("decoding heads")?;
                bitmask |= GRAPH_HEADS;
            }
            "attrs" => {
                attrs = parse_attrs(value)?;
                bitmask |= GRAPH_ATTRS;
            }
            other => bail!("unsupported top-level key '{other}' in graph description"),
        }
    }
    ensure!(
        bitmask == GRAPH_REQUIRED,
        "graph description is missing required top-level fields"
    );

    Ok(Graph {
        nodes,
        input_nodes,
        outputs,
        node_row_ptr,
        attrs,
    })
}

fn parse_nodes(value: &Value) -> Result<Vec<Node>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("'nodes' must be an array"))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_node(item).with_context(|| format!("decoding node {i}")))
        .collect()
}

fn parse_node(value: &Value) -> Result<Node> {
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("node must be an object"))?;

    let mut bitmask = 0u32;
    let mut op_type = String::new();
    let mut name = String::new();
    let mut inputs = Vec::new();
    let mut control_deps = Vec::new();
    let mut param = None;

    for (key, value) in obj {
        match key.as_str() {
            "op" => {
                op_type = parse_string(value).context("decoding node op")?;
                bitmask |= NODE_OP;
            }
            "name" => {
                name = parse_string(value).context("decoding node name")?;
                bitmask |= NODE_NAME;
            }
            "inputs" => {
                inputs = parse_entry_array(value).context("decoding node inputs")?;
                bitmask |= NODE_INPUTS;
            }
            "attr" | "attrs" => {
                param = Some(parse_op_param(value)?);
            }
            "control_deps" => {
                control_deps = parse_u32_array(value).context("decoding control_deps")?;
            }
            other => bail!("unsupported node key '{other}'"),
        }
    }
    ensure!(
        bitmask == NODE_REQUIRED,
        "node is missing one of the required keys op/name/inputs"
    );

    let op = match op_type.as_str() {
        "null" => NodeOp::Null,
        "tvm_op" => {
            let param =
                param.ok_or_else(|| anyhow!("operator node '{name}' has no attribute object"))?;
            NodeOp::Kernel(param)
        }
        other => bail!("unsupported operator type '{other}' on node '{name}'"),
    };

    Ok(Node {
        name,
        op,
        inputs,
        control_deps,
    })
}

fn parse_op_param(value: &Value) -> Result<OpParam> {
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("node attributes must be an object"))?;

    let mut bitmask = 0u32;
    let mut func_name = String::new();
    let mut num_inputs = 0u32;
    let mut num_outputs = 0u32;
    let mut flatten_data = false;

    // Integer fields arrive as decimal strings. Attribute keys outside the
    // operator parameters are ignored, not rejected.
    for (key, value) in obj {
        match key.as_str() {
            "func_name" => {
                func_name = parse_string(value).context("decoding func_name")?;
                bitmask |= PARAM_FUNC_NAME;
            }
            "num_inputs" => {
                num_inputs = parse_decimal_string(value).context("decoding num_inputs")?;
                bitmask |= PARAM_NUM_INPUTS;
            }
            "num_outputs" => {
                num_outputs = parse_decimal_string(value).context("decoding num_outputs")?;
                bitmask |= PARAM_NUM_OUTPUTS;
            }
            "flatten_data" => {
                flatten_data = parse_decimal_string(value).context("decoding flatten_data")? != 0;
                bitmask |= PARAM_FLATTEN_DATA;
            }
            _ => {}
        }
    }
    ensure!(
        bitmask == PARAM_REQUIRED,
        "operator attributes are missing one of func_name/num_inputs/num_outputs/flatten_data"
    );

    Ok(OpParam {
        func_name,
        num_inputs,
        num_outputs,
        flatten_data,
    })
}

fn parse_attrs(value: &Value) -> Result<GraphAttrs> {
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("'attrs' must be an object"))?;

    let mut bitmask = 0u32;
    let mut attrs = GraphAttrs::default();

    for (key, value) in obj {
        match key.as_str() {
            "dltype" => {
                let payload = tagged_payload(key, value, "list_str")?;
                attrs.dltype = parse_string_array(payload).context("decoding dltype")?;
                bitmask |= ATTR_DLTYPE;
            }
            "storage_id" => {
                let payload = tagged_payload(key, value, "list_int")?;
                attrs.storage_id = parse_i64_array(payload).context("decoding storage_id")?;
                bitmask |= ATTR_STORAGE_ID;
            }
            "shape" => {
                let payload = tagged_payload(key, value, "list_shape")?;
                attrs.shape = parse_shape_array(payload).context("decoding shape")?;
                bitmask |= ATTR_SHAPE;
            }
            other => {
                // Auxiliary plan attributes are tolerated only when they carry
                // a tag we know how to step over.
                let tag = attr_tag(other, value)?;
                if tag != "list_int" && tag != "size_t" {
                    bail!("cannot skip graph attribute '{other}' tagged '{tag}'");
                }
            }
        }
    }
    ensure!(
        bitmask == ATTR_REQUIRED,
        "graph attributes are missing one of dltype/storage_id/shape"
    );

    Ok(attrs)
}

fn tagged_payload<'a>(key: &str, value: &'a Value, expected: &str) -> Result<&'a Value> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("graph attribute '{key}' must be a tagged array"))?;
    ensure!(
        items.len() == 2,
        "graph attribute '{key}' must have exactly a tag and a payload"
    );
    let tag = items[0]
        .as_str()
        .ok_or_else(|| anyhow!("graph attribute '{key}' has a non-string tag"))?;
    ensure!(
        tag == expected,
        "graph attribute '{key}' is tagged '{tag}', expected '{expected}'"
    );
    Ok(&items[1])
}

fn attr_tag<'a>(key: &str, value: &'a Value) -> Result<&'a str> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("graph attribute '{key}' must be a tagged array"))?;
    ensure!(
        items.len() == 2,
        "graph attribute '{key}' must have exactly a tag and a payload"
    );
    items[0]
        .as_str()
        .ok_or_else(|| anyhow!("graph attribute '{key}' has a non-string tag"))
}

fn parse_entry_array(value: &Value) -> Result<Vec<NodeEntry>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("expected an array of node entries"))?;
    items.iter().map(parse_entry).collect()
}

fn parse_entry(value: &Value) -> Result<NodeEntry> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("node entry must be an array"))?;
    ensure!(
        items.len() == 2 || items.len() == 3,
        "node entry must be [node_id, index] or [node_id, index, version]"
    );
    Ok(NodeEntry {
        node_id: parse_u32(&items[0]).context("decoding entry node id")?,
        index: parse_u32(&items[1]).context("decoding entry output index")?,
        version: match items.get(2) {
            Some(v) => parse_u32(v).context("decoding entry version")?,
            None => 0,
        },
    })
}

fn parse_shape_array(value: &Value) -> Result<Vec<Vec<i64>>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("expected an array of shapes"))?;
    items.iter().map(parse_i64_array).collect()
}

fn parse_string(value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("expected a string, got {value}"))
}

fn parse_string_array(value: &Value) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("expected an array of strings"))?;
    items.iter().map(parse_string).collect()
}

fn parse_u32(value: &Value) -> Result<u32> {
    let n = value
        .as_u64()
        .ok_or_else(|| anyhow!("expected a non-negative integer, got {value}"))?;
    u32::try_from(n).map_err(|_| anyhow!("integer {n} out of range"))
}

fn parse_u32_array(value: &Value) -> Result<Vec<u32>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("expected an array of integers"))?;
    items.iter().map(parse_u32).collect()
}

fn parse_i64(value: &Value) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| anyhow!("expected an integer, got {value}"))
}

fn parse_i64_array(value: &Value) -> Result<Vec<i64>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("expected an array of integers"))?;
    items.iter().map(parse_i64).collect()
}

fn parse_decimal_string(value: &Value) -> Result<u32> {
    let s = value
        .as_str()
        .ok_or_else(|| anyhow!("expected a decimal string, got {value}"))?;
    s.parse()
        .map_err(|_| anyhow!("'{s}' is not a decimal integer"))
}
