//! Template fragments.
//!
//! Template text is parsed once with html5ever into a `Fragment` and cached by
//! its exact text; every mount clones the cached fragment into the DOM.
//!
//! Parsing runs in fragment mode with a `<template>` context, so table parts
//! such as `<tr>` or `<col>` survive at the top level the way they do inside
//! a browser template.

use html5ever::tendril::TendrilSink;
use html5ever::{local_name, namespace_url, ns, parse_fragment, QualName};
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use std::collections::HashMap;
use std::rc::Rc;

use super::dom::{Dom, NodeId};

#[derive(Debug, Clone, PartialEq)]
pub enum FragmentNode {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
        children: Vec<FragmentNode>,
    },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub nodes: Vec<FragmentNode>,
}

impl Fragment {
    /// Parse template markup as the content of a `<template>` element.
    pub fn parse(text: &str) -> Self {
        let context = QualName::new(None, ns!(html), local_name!("template"));
        let dom = parse_fragment(RcDom::default(), Default::default(), context, Vec::new()).one(text);
        let mut nodes = Vec::new();
        collect_fragment(&dom.document, &mut nodes);
        Fragment { nodes }
    }

    /// Clone the fragment into `parent`, returning the top-level nodes created.
    pub fn instantiate(&self, dom: &mut Dom, parent: NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .map(|node| {
                let id = build(dom, node);
                dom.append_child(parent, id);
                id
            })
            .collect()
    }
}

/// Fragment parsing puts the parsed nodes under a synthetic `<html>` root.
fn collect_fragment(handle: &Handle, out: &mut Vec<FragmentNode>) {
    for child in handle.children.borrow().iter() {
        match &child.data {
            NodeData::Element { name, .. } if &*name.local == "html" => {
                out.extend(child.children.borrow().iter().filter_map(convert));
            }
            _ => out.extend(convert(child)),
        }
    }
}

fn convert(handle: &Handle) -> Option<FragmentNode> {
    match &handle.data {
        NodeData::Text { contents } => Some(FragmentNode::Text(contents.borrow().to_string())),
        NodeData::Comment { contents } => Some(FragmentNode::Comment(contents.to_string())),
        NodeData::Element {
            name,
            attrs,
            template_contents,
            ..
        } => {
            let attributes = attrs
                .borrow()
                .iter()
                .map(|a| (a.name.local.to_string(), a.value.to_string()))
                .collect();
            // <template> keeps its content in a separate document fragment.
            let source = template_contents.borrow().clone().unwrap_or_else(|| handle.clone());
            let children = source.children.borrow().iter().filter_map(convert).collect();
            Some(FragmentNode::Element {
                tag: name.local.to_string(),
                attributes,
                children,
            })
        }
        _ => None,
    }
}

fn build(dom: &mut Dom, node: &FragmentNode) -> NodeId {
    match node {
        FragmentNode::Text(text) => dom.create_text(text),
        FragmentNode::Comment(text) => dom.create_comment(text),
        FragmentNode::Element {
            tag,
            attributes,
            children,
        } => {
            let id = dom.create_element(tag);
            for (name, value) in attributes {
                dom.set_attribute(id, name, value);
            }
            for child in children {
                let child_id = build(dom, child);
                dom.append_child(id, child_id);
            }
            id
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// Parsed fragments keyed by exact template text.
#[derive(Debug, Default)]
pub struct TemplateCache {
    fragments: HashMap<String, Rc<Fragment>>,
    parses: usize,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fragment(&mut self, text: &str) -> Rc<Fragment> {
        if let Some(fragment) = self.fragments.get(text) {
            return Rc::clone(fragment);
        }
        self.parses += 1;
        let fragment = Rc::new(Fragment::parse(text));
        self.fragments.insert(text.to_string(), Rc::clone(&fragment));
        fragment
    }

    /// Number of times template text was actually parsed.
    pub fn parses(&self) -> usize {
        self.parses
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fragment() {
        let fragment = Fragment::parse("<p class=\"a\">ID: {{id}}</p><button>go</button>");
        assert_eq!(fragment.nodes.len(), 2);
        assert_eq!(
            fragment.nodes[0],
            FragmentNode::Element {
                tag: "p".to_string(),
                attributes: vec![("class".to_string(), "a".to_string())],
                children: vec![FragmentNode::Text("ID: {{id}}".to_string())],
            }
        );
    }

    #[test]
    fn test_leading_style_is_kept_first() {
        let fragment = Fragment::parse("<style>p{}</style><p>x</p>");
        let tags: Vec<&str> = fragment
            .nodes
            .iter()
            .filter_map(|n| match n {
                FragmentNode::Element { tag, .. } => Some(tag.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tags, vec!["style", "p"]);
    }

    #[test]
    fn test_table_rows_survive_at_top_level() {
        let fragment = Fragment::parse("<tr class=\"row\"><td>{{id}}</td></tr>");
        assert_eq!(
            fragment.nodes,
            vec![FragmentNode::Element {
                tag: "tr".to_string(),
                attributes: vec![("class".to_string(), "row".to_string())],
                children: vec![FragmentNode::Element {
                    tag: "td".to_string(),
                    attributes: Vec::new(),
                    children: vec![FragmentNode::Text("{{id}}".to_string())],
                }],
            }]
        );

        let mut dom = Dom::new();
        let host = dom.create_element("tbody");
        fragment.instantiate(&mut dom, host);
        let cells = dom.query_selector_all(host, "tr.row > td").unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(dom.text_content(cells[0]), "{{id}}");
    }

    #[test]
    fn test_instantiate_clones() {
        let mut dom = Dom::new();
        let a = dom.create_element("div");
        let b = dom.create_element("div");
        let fragment = Fragment::parse("<span>hi</span>");
        let first = fragment.instantiate(&mut dom, a);
        let second = fragment.instantiate(&mut dom, b);
        assert_ne!(first, second);
        assert_eq!(dom.text_content(a), "hi");
        assert_eq!(dom.text_content(b), "hi");
    }

    #[test]
    fn test_cache_parses_once_per_text() {
        let mut cache = TemplateCache::new();
        let first = cache.fragment("<p>x</p>");
        let second = cache.fragment("<p>x</p>");
        assert!(Rc::ptr_eq(&first, &second));
        cache.fragment("<p>y</p>");
        assert_eq!(cache.parses(), 2);
        assert_eq!(cache.len(), 2);
    }
}
