// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traffic-generator configuration models.
//!
//! tgen reads an action-dependency graph in graphml. The server is a
//! bare listener; the client either runs a fixed chain of timed
//! transfers (one-shot mode) or loops pause/stream forever (continuous
//! mode).

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

/// Client traffic model parameters.
#[derive(Debug, Clone)]
pub struct TGenModelConf {
    /// Seconds to wait before the first transfer.
    pub initial_pause_seconds: u64,
    /// Number of transfers in one-shot mode; zero selects continuous mode.
    pub num_transfers: u64,
    /// Transfer size, in tgen units (e.g. "5 MiB").
    pub transfer_size: String,
    pub continuous_transfers: bool,
    /// Seconds between consecutive transfers.
    pub inter_transfer_pause_seconds: u64,
    /// Servers to fetch from, `host:port` or `<onion>:port`.
    pub servers: Vec<String>,
}

impl Default for TGenModelConf {
    fn default() -> Self {
        Self {
            initial_pause_seconds: 0,
            num_transfers: 1,
            transfer_size: "5 MiB".to_string(),
            continuous_transfers: false,
            inter_transfer_pause_seconds: 5,
            servers: Vec::new(),
        }
    }
}

/// A small directed action graph, serialized as graphml.
#[derive(Debug, Default)]
pub struct ActionGraph {
    nodes: Vec<(String, Vec<(String, String)>)>,
    edges: Vec<(String, String)>,
}

impl ActionGraph {
    fn add_node(&mut self, id: &str, attrs: &[(&str, String)]) {
        self.nodes.push((
            id.to_string(),
            attrs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect(),
        ));
    }

    fn add_edge(&mut self, source: &str, target: &str) {
        self.edges.push((source.to_string(), target.to_string()));
    }

    /// Serialize to graphml, one `<key>` per distinct attribute name.
    pub fn to_graphml(&self) -> std::io::Result<String> {
        // stable key ids: first-seen order over sorted attribute names
        let mut key_ids = BTreeMap::new();
        for (_, attrs) in &self.nodes {
            for (name, _) in attrs {
                let next = format!("d{}", key_ids.len());
                key_ids.entry(name.clone()).or_insert(next);
            }
        }

        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

        let mut graphml = BytesStart::new("graphml");
        graphml.push_attribute(("xmlns", "http://graphml.graphdrawing.org/xmlns"));
        writer.write_event(Event::Start(graphml))?;

        for (name, id) in &key_ids {
            let mut key = BytesStart::new("key");
            key.push_attribute(("attr.name", name.as_str()));
            key.push_attribute(("attr.type", "string"));
            key.push_attribute(("for", "node"));
            key.push_attribute(("id", id.as_str()));
            writer.write_event(Event::Empty(key))?;
        }

        let mut graph = BytesStart::new("graph");
        graph.push_attribute(("edgedefault", "directed"));
        writer.write_event(Event::Start(graph))?;

        for (id, attrs) in &self.nodes {
            let mut node = BytesStart::new("node");
            node.push_attribute(("id", id.as_str()));
            writer.write_event(Event::Start(node))?;
            for (name, value) in attrs {
                let mut data = BytesStart::new("data");
                if let Some(key_id) = key_ids.get(name) {
                    data.push_attribute(("key", key_id.as_str()));
                }
                writer.write_event(Event::Start(data))?;
                writer.write_event(Event::Text(BytesText::new(value)))?;
                writer.write_event(Event::End(BytesEnd::new("data")))?;
            }
            writer.write_event(Event::End(BytesEnd::new("node")))?;
        }

        for (source, target) in &self.edges {
            let mut edge = BytesStart::new("edge");
            edge.push_attribute(("source", source.as_str()));
            edge.push_attribute(("target", target.as_str()));
            writer.write_event(Event::Empty(edge))?;
        }

        writer.write_event(Event::End(BytesEnd::new("graph")))?;
        writer.write_event(Event::End(BytesEnd::new("graphml")))?;

        let bytes = writer.into_inner().into_inner();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_graphml()?)
    }
}

/// The server side: listen and serve.
pub fn listen_model(tgen_port: u16) -> ActionGraph {
    let mut graph = ActionGraph::default();
    graph.add_node(
        "start",
        &[
            ("serverport", tgen_port.to_string()),
            ("loglevel", "info".to_string()),
            ("heartbeat", "1 minute".to_string()),
        ],
    );
    graph
}

/// The client side: timed transfers through the local socks proxy.
pub fn torperf_model(
    tgen_port: u16,
    socks_port: Option<u16>,
    conf: &TGenModelConf,
) -> ActionGraph {
    let mut graph = ActionGraph::default();

    let mut start_attrs = vec![
        ("serverport", tgen_port.to_string()),
        ("peers", conf.servers.join(",")),
        ("loglevel", "info".to_string()),
        ("heartbeat", "1 minute".to_string()),
    ];
    if let Some(port) = socks_port {
        start_attrs.push(("socksproxy", format!("127.0.0.1:{port}")));
    }
    graph.add_node("start", &start_attrs);

    let stream_attrs = || {
        [
            ("sendsize", "0".to_string()),
            ("recvsize", conf.transfer_size.clone()),
            ("timeout", "15 seconds".to_string()),
            ("stallout", "10 seconds".to_string()),
        ]
    };

    if conf.num_transfers > 0 {
        // One-shot: start -> pause -> stream-0 -> pause-0 -> ... -> end
        graph.add_node(
            "pause",
            &[("time", format!("{} seconds", conf.initial_pause_seconds))],
        );
        graph.add_edge("start", "pause");

        for i in 0..conf.num_transfers {
            graph.add_node(&format!("stream-{i}"), &stream_attrs());
            graph.add_node(
                &format!("pause-{i}"),
                &[("time", format!("{} seconds", conf.inter_transfer_pause_seconds))],
            );
            graph.add_edge(&format!("stream-{i}"), &format!("pause-{i}"));
            if i > 0 {
                graph.add_edge(&format!("pause-{}", i - 1), &format!("stream-{i}"));
            }
        }
        graph.add_node("end", &[("count", conf.num_transfers.to_string())]);
        graph.add_edge("pause", "stream-0");
        graph.add_edge(&format!("pause-{}", conf.num_transfers - 1), "end");
    } else if conf.continuous_transfers {
        // Continuous: pause <-> stream, forever
        graph.add_node(
            "pause",
            &[("time", format!("{} seconds", conf.inter_transfer_pause_seconds))],
        );
        graph.add_node("stream", &stream_attrs());
        graph.add_edge("start", "pause");
        graph.add_edge("pause", "stream");
        graph.add_edge("stream", "pause");
    }

    graph
}

#[cfg(test)]
#[path = "tgen_tests.rs"]
mod tests;
