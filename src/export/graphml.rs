//! GraphML export: pixel graph → `<graphml>` document.
//!
//! ```text
//! PixelGraph → write_graphml() → <key/> declarations, <node/> with x, y,
//!   probability, <edge/> with weight → any GraphML consumer
//! ```
//!
//! Floats are written with shortest round-trip formatting, so
//! `read_graphml(write_graphml(g)) == g`. The reader only understands the
//! layout this writer produces (one element per line).

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use hashbrown::HashMap;

use crate::model::{AttrValue, NodeId, PixelEdge, PixelGraph, PixelNode};
use crate::{Error, Result};

const EDGE_WEIGHT: &str = "weight";

/// Write `graph` as a directed GraphML document.
pub fn write_graphml(graph: &PixelGraph, writer: &mut dyn Write) -> Result<()> {
    // Header
    writeln!(writer, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(writer, r#"<graphml xmlns="http://graphml.graphdrawing.org/xmlns">"#)?;

    let sample = PixelNode::new(NodeId(0), 0, 0, 0.0);
    for (name, value) in sample.attributes() {
        writeln!(
            writer,
            r#"  <key id="{name}" for="node" attr.name="{name}" attr.type="{}"/>"#,
            value.graphml_type()
        )?;
    }
    writeln!(
        writer,
        r#"  <key id="{EDGE_WEIGHT}" for="edge" attr.name="{EDGE_WEIGHT}" attr.type="double"/>"#
    )?;
    writeln!(writer, r#"  <key id="width" for="graph" attr.name="width" attr.type="int"/>"#)?;
    writeln!(writer, r#"  <key id="height" for="graph" attr.name="height" attr.type="int"/>"#)?;

    writeln!(writer, r#"  <graph id="G" edgedefault="directed">"#)?;
    writeln!(writer, r#"    <data key="width">{}</data>"#, graph.width())?;
    writeln!(writer, r#"    <data key="height">{}</data>"#, graph.height())?;

    for node in graph.nodes() {
        writeln!(writer, r#"    <node id="n{}">"#, node.id)?;
        for (name, value) in node.attributes() {
            writeln!(writer, r#"      <data key="{name}">{value}</data>"#)?;
        }
        writeln!(writer, "    </node>")?;
    }

    for (i, edge) in graph.edges().iter().enumerate() {
        writeln!(writer, r#"    <edge id="e{i}" source="n{}" target="n{}">"#, edge.src, edge.dst)?;
        writeln!(
            writer,
            r#"      <data key="{EDGE_WEIGHT}">{}</data>"#,
            AttrValue::from(edge.weight)
        )?;
        writeln!(writer, "    </edge>")?;
    }

    writeln!(writer, "  </graph>")?;
    writeln!(writer, "</graphml>")?;
    Ok(())
}

pub fn save_graphml(graph: &PixelGraph, path: impl AsRef<Path>) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_graphml(graph, &mut out)?;
    out.flush()?;
    Ok(())
}

// ============================================================================
// Reader
// ============================================================================

enum Open {
    Node { id: NodeId, data: HashMap<String, AttrValue> },
    Edge { src: NodeId, dst: NodeId, weight: Option<f32> },
}

/// Parse a document produced by `write_graphml`.
pub fn read_graphml(reader: impl BufRead) -> Result<PixelGraph> {
    let mut types: HashMap<String, String> = HashMap::new();
    let mut graph_data: HashMap<String, AttrValue> = HashMap::new();
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    let mut open: Option<Open> = None;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let lineno = idx + 1;
        let err = |message: String| Error::Parse { what: "graphml", line: lineno, message };
        let tag = line.trim();

        if tag.starts_with("<key ") {
            let id = attr(tag, "id").ok_or_else(|| err("key without id".into()))?;
            let ty = attr(tag, "attr.type").unwrap_or("string");
            types.insert(id.to_string(), ty.to_string());
        } else if tag.starts_with("<node ") {
            let id = node_ref(tag, "id").ok_or_else(|| err("node without id".into()))?;
            open = Some(Open::Node { id, data: HashMap::new() });
        } else if tag.starts_with("<edge ") {
            let src = node_ref(tag, "source").ok_or_else(|| err("edge without source".into()))?;
            let dst = node_ref(tag, "target").ok_or_else(|| err("edge without target".into()))?;
            open = Some(Open::Edge { src, dst, weight: None });
        } else if tag.starts_with("<data ") {
            let key = attr(tag, "key").ok_or_else(|| err("data without key".into()))?;
            let raw = tag
                .split_once('>')
                .and_then(|(_, rest)| rest.strip_suffix("</data>"))
                .ok_or_else(|| err("unterminated data element".into()))?;
            let value = typed_value(types.get(key).map(String::as_str), raw)
                .ok_or_else(|| err(format!("bad value '{raw}' for key '{key}'")))?;
            match open.as_mut() {
                Some(Open::Node { data, .. }) => {
                    data.insert(key.to_string(), value);
                }
                Some(Open::Edge { weight, .. }) if key == EDGE_WEIGHT => {
                    *weight = value.as_float().map(|w| w as f32);
                }
                Some(Open::Edge { .. }) => {}
                None => {
                    graph_data.insert(key.to_string(), value);
                }
            }
        } else if tag == "</node>" {
            let Some(Open::Node { id, data }) = open.take() else {
                return Err(err("unexpected </node>".into()));
            };
            let int = |k: &str| data.get(k).and_then(AttrValue::as_int);
            let (Some(x), Some(y), Some(p)) =
                (int("x"), int("y"), data.get("probability").and_then(AttrValue::as_float))
            else {
                return Err(err(format!("node {id} lacks x, y or probability")));
            };
            nodes.push(PixelNode::new(id, x as u32, y as u32, p as f32));
        } else if tag == "</edge>" {
            let Some(Open::Edge { src, dst, weight }) = open.take() else {
                return Err(err("unexpected </edge>".into()));
            };
            let weight = weight.ok_or_else(|| err(format!("edge {src}->{dst} has no weight")))?;
            edges.push(PixelEdge::new(src, dst, weight));
        }
    }

    let dim = |key: &str, fallback: usize| {
        graph_data
            .get(key)
            .and_then(AttrValue::as_int)
            .map_or(fallback, |v| v as usize)
    };
    let width = dim("width", nodes.iter().map(|n| n.x as usize + 1).max().unwrap_or(0));
    let height = dim("height", nodes.iter().map(|n| n.y as usize + 1).max().unwrap_or(0));
    nodes.sort_by_key(|n| n.id);
    PixelGraph::from_parts(width, height, nodes, edges)
}

pub fn load_graphml(path: impl AsRef<Path>) -> Result<PixelGraph> {
    read_graphml(BufReader::new(File::open(path)?))
}

/// Value of `name="..."` inside a start tag.
fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!(" {name}=\"");
    let start = tag.find(&needle)? + needle.len();
    let len = tag[start..].find('"')?;
    Some(&tag[start..start + len])
}

fn node_ref(tag: &str, name: &str) -> Option<NodeId> {
    attr(tag, name)?.strip_prefix('n')?.parse().ok().map(NodeId)
}

fn typed_value(ty: Option<&str>, raw: &str) -> Option<AttrValue> {
    match ty {
        Some("int") | Some("long") => raw.parse::<i64>().ok().map(AttrValue::Int),
        Some("double") | Some("float") => raw.parse::<f64>().ok().map(AttrValue::Float),
        _ => Some(AttrValue::String(raw.to_string())),
    }
}
