//! Arena DOM for the runtime.
//!
//! Nodes live in a single `Vec` and are addressed by `NodeId`. The model
//! covers what component wiring needs: documents, elements, text, shadow
//! roots, fragments, event listeners, adopted style sheets and a small
//! selector engine.

use std::collections::BTreeMap;
use std::rc::Rc;

use super::styles::StyleSheet;
use super::InstanceId;
use crate::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Document,
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
    },
    Text(String),
    Comment(String),
    ShadowRoot {
        host: NodeId,
    },
    Fragment,
}

/// What a listener does when its event fires: call a bound component method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub instance: InstanceId,
    pub method: String,
}

#[derive(Debug, Clone)]
struct Listener {
    id: ListenerId,
    event_type: String,
    binding: Binding,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    shadow_root: Option<NodeId>,
    listeners: Vec<Listener>,
    adopted_sheets: Vec<Rc<StyleSheet>>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Node {
            kind,
            parent: None,
            children: Vec::new(),
            shadow_root: None,
            listeners: Vec::new(),
            adopted_sheets: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Dom {
    nodes: Vec<Node>,
    next_listener: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TREE
// ═══════════════════════════════════════════════════════════════════════════════

impl Dom {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node::new(kind));
        NodeId(self.nodes.len() - 1)
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn create_document(&mut self) -> NodeId {
        self.push(NodeKind::Document)
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attributes: BTreeMap::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Comment(text.to_string()))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.push(NodeKind::Fragment)
    }

    /// Attach (or return the existing) shadow root of `host`.
    pub fn attach_shadow(&mut self, host: NodeId) -> NodeId {
        if let Some(root) = self.node(host).shadow_root {
            return root;
        }
        let root = self.push(NodeKind::ShadowRoot { host });
        self.node_mut(host).shadow_root = Some(root);
        root
    }

    pub fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        self.node(host).shadow_root
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Element { .. })
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Append `child` to `parent`. Fragments are emptied into the parent.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if matches!(self.node(child).kind, NodeKind::Fragment) {
            let moved = std::mem::take(&mut self.node_mut(child).children);
            for grandchild in moved {
                self.node_mut(grandchild).parent = None;
                self.append_child(parent, grandchild);
            }
            return;
        }
        self.detach(child);
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
    }

    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.node_mut(id).parent.take() {
            self.node_mut(parent).children.retain(|&c| c != id);
        }
    }

    pub fn clear_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.node_mut(id).children);
        for child in children {
            self.node_mut(child).parent = None;
        }
    }

    /// Descendants of `root` in tree order, not entering shadow trees.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    pub fn text_nodes(&self, root: NodeId) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|&id| matches!(self.node(id).kind, NodeKind::Text(_)))
            .collect()
    }

    /// Next node on the way to the tree root; shadow roots continue at their host.
    fn composed_parent(&self, id: NodeId) -> Option<NodeId> {
        match (&self.node(id).kind, self.node(id).parent) {
            (NodeKind::ShadowRoot { host }, _) => Some(*host),
            (_, parent) => parent,
        }
    }

    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(next) = self.composed_parent(current) {
            current = next;
        }
        current
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        matches!(self.node(self.root_of(id)).kind, NodeKind::Document)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ATTRIBUTES AND TEXT
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn get_attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { attributes, .. } => attributes.get(name).map(String::as_str),
            _ => None,
        }
    }

    /// Set an attribute and return its previous value.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Option<String> {
        match &mut self.node_mut(id).kind {
            NodeKind::Element { attributes, .. } => {
                attributes.insert(name.to_ascii_lowercase(), value.to_string())
            }
            _ => None,
        }
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Option<String> {
        match &mut self.node_mut(id).kind {
            NodeKind::Element { attributes, .. } => attributes.remove(&name.to_ascii_lowercase()),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn set_text(&mut self, id: NodeId, value: String) {
        if let NodeKind::Text(text) = &mut self.node_mut(id).kind {
            *text = value;
        }
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        if let Some(text) = self.text(id) {
            return text.to_string();
        }
        self.text_nodes(id)
            .into_iter()
            .filter_map(|t| self.text(t))
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LISTENERS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn add_listener(&mut self, id: NodeId, event_type: &str, binding: Binding) -> ListenerId {
        self.next_listener += 1;
        let listener_id = ListenerId(self.next_listener);
        self.node_mut(id).listeners.push(Listener {
            id: listener_id,
            event_type: event_type.to_string(),
            binding,
        });
        listener_id
    }

    pub fn remove_listener(&mut self, id: NodeId, listener: ListenerId) -> bool {
        let listeners = &mut self.node_mut(id).listeners;
        let before = listeners.len();
        listeners.retain(|l| l.id != listener);
        listeners.len() != before
    }

    pub fn listener_count(&self, id: NodeId, event_type: &str) -> usize {
        self.node(id)
            .listeners
            .iter()
            .filter(|l| l.event_type == event_type)
            .count()
    }

    /// Propagation path of an event: the target, then its ancestors up to the
    /// tree root, crossing shadow boundaries.
    pub fn event_path(&self, target: NodeId) -> Vec<NodeId> {
        let mut path = vec![target];
        let mut current = target;
        while let Some(next) = self.composed_parent(current) {
            path.push(next);
            current = next;
        }
        path
    }

    pub fn bindings_for(&self, id: NodeId, event_type: &str) -> Vec<Binding> {
        self.node(id)
            .listeners
            .iter()
            .filter(|l| l.event_type == event_type)
            .map(|l| l.binding.clone())
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ADOPTED STYLE SHEETS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Adopt `sheet` on `root`. Returns false if a sheet with the same hash is
    /// already applied there.
    pub fn adopt_sheet(&mut self, root: NodeId, sheet: Rc<StyleSheet>) -> bool {
        let sheets = &mut self.node_mut(root).adopted_sheets;
        if sheets.iter().any(|s| s.hash == sheet.hash) {
            return false;
        }
        sheets.push(sheet);
        true
    }

    pub fn remove_sheet(&mut self, root: NodeId, hash: &str) -> bool {
        let sheets = &mut self.node_mut(root).adopted_sheets;
        let before = sheets.len();
        sheets.retain(|s| s.hash != hash);
        sheets.len() != before
    }

    pub fn adopted_sheets(&self, root: NodeId) -> &[Rc<StyleSheet>] {
        &self.node(root).adopted_sheets
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn query_selector_all(&self, root: NodeId, selector: &str) -> Result<Vec<NodeId>, RuntimeError> {
        let selector = Selector::parse(selector)?;
        Ok(self
            .descendants(root)
            .into_iter()
            .filter(|&id| selector.matches(self, id))
            .collect())
    }

    pub fn query_selector(&self, root: NodeId, selector: &str) -> Result<Option<NodeId>, RuntimeError> {
        Ok(self.query_selector_all(root, selector)?.into_iter().next())
    }

    fn element_parent(&self, id: NodeId) -> Option<NodeId> {
        self.parent(id).filter(|&p| self.is_element(p))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SELECTORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

/// `parts[i]` and `parts[i + 1]` are joined by `combinators[i]`.
#[derive(Debug, Clone, PartialEq)]
struct Complex {
    parts: Vec<Compound>,
    combinators: Vec<Combinator>,
}

/// A parsed selector list.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    alternatives: Vec<Complex>,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn read_ident(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && is_ident_char(chars[end]) {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

fn parse_attribute_selector(inner: &str) -> Option<(String, Option<String>)> {
    let (name, value) = match inner.split_once('=') {
        Some((name, value)) => {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (name.trim(), Some(unquoted.to_string()))
        }
        None => (inner.trim(), None),
    };
    if name.is_empty() || !name.chars().all(is_ident_char) {
        return None;
    }
    Some((name.to_ascii_lowercase(), value))
}

fn parse_complex(text: &str) -> Result<Complex, RuntimeError> {
    let invalid = || RuntimeError::InvalidSelector(text.to_string());
    let chars: Vec<char> = text.trim().chars().collect();
    if chars.is_empty() {
        return Err(invalid());
    }

    let mut parts = Vec::new();
    let mut combinators = Vec::new();
    let mut current = Compound::default();
    let mut has_current = false;
    let mut pending: Option<Combinator> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            if has_current && pending.is_none() {
                pending = Some(Combinator::Descendant);
            }
            i += 1;
            continue;
        }
        if c == '>' {
            if !has_current {
                return Err(invalid());
            }
            pending = Some(Combinator::Child);
            i += 1;
            continue;
        }
        if let Some(combinator) = pending.take() {
            parts.push(std::mem::take(&mut current));
            combinators.push(combinator);
            has_current = false;
        }

        match c {
            '*' => {
                if has_current {
                    return Err(invalid());
                }
                i += 1;
            }
            '#' | '.' => {
                let (ident, next) = read_ident(&chars, i + 1);
                if ident.is_empty() {
                    return Err(invalid());
                }
                if c == '#' {
                    current.id = Some(ident);
                } else {
                    current.classes.push(ident);
                }
                i = next;
            }
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .map(|offset| i + offset)
                    .ok_or_else(invalid)?;
                let inner: String = chars[i + 1..close].iter().collect();
                current
                    .attributes
                    .push(parse_attribute_selector(&inner).ok_or_else(invalid)?);
                i = close + 1;
            }
            c if is_ident_char(c) => {
                if has_current {
                    return Err(invalid());
                }
                let (ident, next) = read_ident(&chars, i);
                current.tag = Some(ident.to_ascii_lowercase());
                i = next;
            }
            _ => return Err(invalid()),
        }
        has_current = true;
    }

    if pending.is_some() || !has_current {
        return Err(invalid());
    }
    parts.push(current);
    Ok(Complex { parts, combinators })
}

impl Selector {
    pub fn parse(text: &str) -> Result<Self, RuntimeError> {
        let alternatives = text
            .split(',')
            .map(parse_complex)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Selector { alternatives })
    }

    pub fn matches(&self, dom: &Dom, id: NodeId) -> bool {
        self.alternatives
            .iter()
            .any(|complex| match_from(dom, id, complex, complex.parts.len() - 1))
    }
}

fn matches_compound(dom: &Dom, id: NodeId, compound: &Compound) -> bool {
    let NodeKind::Element { tag, attributes } = dom.kind(id) else {
        return false;
    };
    if compound.tag.as_ref().is_some_and(|t| t != tag) {
        return false;
    }
    if let Some(expected) = &compound.id {
        if attributes.get("id") != Some(expected) {
            return false;
        }
    }
    if !compound.classes.is_empty() {
        let class_attr = attributes.get("class").map(String::as_str).unwrap_or("");
        let classes: Vec<&str> = class_attr.split_whitespace().collect();
        if !compound.classes.iter().all(|c| classes.contains(&c.as_str())) {
            return false;
        }
    }
    compound
        .attributes
        .iter()
        .all(|(name, value)| match (attributes.get(name), value) {
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == expected,
            (None, _) => false,
        })
}

fn match_from(dom: &Dom, id: NodeId, complex: &Complex, index: usize) -> bool {
    if !matches_compound(dom, id, &complex.parts[index]) {
        return false;
    }
    if index == 0 {
        return true;
    }
    match complex.combinators[index - 1] {
        Combinator::Child => dom
            .element_parent(id)
            .is_some_and(|parent| match_from(dom, parent, complex, index - 1)),
        Combinator::Descendant => {
            let mut ancestor = dom.element_parent(id);
            while let Some(candidate) = ancestor {
                if match_from(dom, candidate, complex, index - 1) {
                    return true;
                }
                ancestor = dom.element_parent(candidate);
            }
            false
        }
    }
}
