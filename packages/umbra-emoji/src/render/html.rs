//! HTML fragment tree.
//!
//! Status bodies are parsed as a `<body>` fragment by html5ever into a small
//! owned tree. Text nodes and attribute values hold decoded text, so emoji
//! written as character references (`&#x1F60A;`) are found like literal ones.
//! Serialization escapes them again with `html-escape`.

use std::borrow::Cow;
use std::cell::{Ref, RefCell};
use std::collections::VecDeque;
use std::fmt;

use html5ever::interface::ElemName;
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::tokenizer::TokenizerOpts;
use html5ever::tree_builder::{
    ElementFlags, NodeOrText, QuirksMode, TreeBuilderOpts, TreeSink,
};
use html5ever::{LocalName, Namespace, ParseOpts, QualName};
use once_cell::sync::Lazy;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Elements that never have children
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose text content is serialized without escaping
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext",
];

/// Elements whose text is never emoji-substituted
pub const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "textarea", "title", "xmp", "iframe", "noembed", "noframes", "plaintext",
];

/// An element attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Name, `prefix:local` for namespaced attributes
    pub name: String,
    /// Decoded value
    pub value: String,
}

/// An element and its subtree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Local tag name
    pub name: String,
    /// Attributes in source order
    pub attrs: Vec<Attribute>,
    /// Child nodes
    pub children: Vec<Node>,
}

impl Element {
    /// An element without attributes or children
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Add an attribute
    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push(Attribute {
            name: name.to_string(),
            value: value.to_string(),
        });
        self
    }

    /// Decoded value of an attribute
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    fn is_void(&self) -> bool {
        VOID_ELEMENTS.contains(&self.name.as_str())
    }

    fn is_raw_text(&self) -> bool {
        RAW_TEXT_ELEMENTS.contains(&self.name.as_str())
    }
}

/// A node of the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Decoded text
    Text(String),
    /// An element
    Element(Element),
    /// `<!-- ... -->` body
    Comment(String),
}

/// A parsed HTML fragment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    /// Top-level nodes
    pub children: Vec<Node>,
}

impl Fragment {
    /// Parse `html` as the content of a `<body>`. Never fails: the HTML
    /// parser recovers from broken markup the way browsers do.
    pub fn parse(html: &str) -> Self {
        let context = QualName::new(
            None,
            Namespace::from(HTML_NAMESPACE),
            LocalName::from("body"),
        );
        let opts = ParseOpts {
            tokenizer: TokenizerOpts::default(),
            tree_builder: TreeBuilderOpts {
                scripting_enabled: false,
                ..TreeBuilderOpts::default()
            },
        };
        html5ever::parse_fragment(FragmentSink::new(), opts, context, Vec::new()).one(html)
    }

    /// Decoded text nodes outside [`SKIPPED_ELEMENTS`], breadth-first, with
    /// their paths
    pub fn text_nodes(&self) -> Vec<(Vec<usize>, &str)> {
        let mut found = Vec::new();
        let mut queue: VecDeque<(Vec<usize>, &Node)> = self
            .children
            .iter()
            .enumerate()
            .map(|(i, node)| (vec![i], node))
            .collect();

        while let Some((path, node)) = queue.pop_front() {
            match node {
                Node::Text(text) => found.push((path, text.as_str())),
                Node::Element(element) if !SKIPPED_ELEMENTS.contains(&element.name.as_str()) => {
                    for (i, child) in element.children.iter().enumerate() {
                        let mut child_path = path.clone();
                        child_path.push(i);
                        queue.push_back((child_path, child));
                    }
                }
                _ => {}
            }
        }

        found
    }

    /// Replace the node at `path` with `nodes`. Returns false if `path` does
    /// not exist.
    pub fn splice(&mut self, path: &[usize], nodes: Vec<Node>) -> bool {
        let Some((&last, parents)) = path.split_last() else {
            return false;
        };

        let mut siblings = &mut self.children;
        for &index in parents {
            match siblings.get_mut(index) {
                Some(Node::Element(element)) => siblings = &mut element.children,
                _ => return false,
            }
        }

        if last >= siblings.len() {
            return false;
        }
        siblings.splice(last..=last, nodes);
        true
    }
}

// ============================================================================
// SERIALIZATION
// ============================================================================

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.children {
            write!(f, "{}", node)?;
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Text(text) => f.write_str(&escape_nbsp(html_escape::encode_text(text))),
            Node::Comment(body) => write!(f, "<!--{}-->", body),
            Node::Element(element) => write!(f, "{}", element),
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        for attr in &self.attrs {
            let value = html_escape::encode_double_quoted_attribute(&attr.value);
            write!(f, " {}=\"{}\"", attr.name, escape_nbsp(value))?;
        }
        f.write_str(">")?;

        if self.is_void() {
            return Ok(());
        }
        for child in &self.children {
            match child {
                Node::Text(text) if self.is_raw_text() => f.write_str(text)?,
                _ => write!(f, "{}", child)?,
            }
        }
        write!(f, "</{}>", self.name)
    }
}

/// No-break spaces are written as `&nbsp;`
fn escape_nbsp(text: Cow<'_, str>) -> Cow<'_, str> {
    if text.contains('\u{a0}') {
        Cow::Owned(text.replace('\u{a0}', "&nbsp;"))
    } else {
        text
    }
}

// ============================================================================
// TREE SINK
// ============================================================================

/// Name handed to the tree builder for handles that are not elements
static NO_NAME: Lazy<QualName> =
    Lazy::new(|| QualName::new(None, Namespace::from(""), LocalName::from("")));

enum SinkData {
    Document,
    Element {
        name: QualName,
        attrs: Vec<html5ever::Attribute>,
    },
    Text(String),
    Comment(String),
}

struct SinkNode {
    parent: Option<usize>,
    children: Vec<usize>,
    data: SinkData,
}

/// Arena the parser builds into. Handles are indices; node 0 is the document.
struct FragmentSink {
    nodes: RefCell<Vec<SinkNode>>,
}

#[derive(Debug)]
struct SinkName<'a>(Ref<'a, QualName>);

impl ElemName for SinkName<'_> {
    fn ns(&self) -> &Namespace {
        &self.0.ns
    }

    fn local_name(&self) -> &LocalName {
        &self.0.local
    }
}

impl FragmentSink {
    fn new() -> Self {
        Self {
            nodes: RefCell::new(vec![SinkNode {
                parent: None,
                children: Vec::new(),
                data: SinkData::Document,
            }]),
        }
    }

    fn create(&self, data: SinkData) -> usize {
        push_node(&mut self.nodes.borrow_mut(), data)
    }

    fn build(nodes: &[SinkNode], id: usize) -> Option<Node> {
        match &nodes[id].data {
            SinkData::Document => None,
            SinkData::Text(text) => Some(Node::Text(text.clone())),
            SinkData::Comment(body) => Some(Node::Comment(body.clone())),
            SinkData::Element { name, attrs } => Some(Node::Element(Element {
                name: name.local.to_string(),
                attrs: attrs
                    .iter()
                    .map(|attr| Attribute {
                        name: match &attr.name.prefix {
                            Some(prefix) => format!("{}:{}", prefix, attr.name.local),
                            None => attr.name.local.to_string(),
                        },
                        value: attr.value.to_string(),
                    })
                    .collect(),
                children: nodes[id]
                    .children
                    .iter()
                    .filter_map(|&child| Self::build(nodes, child))
                    .collect(),
            })),
        }
    }
}

fn push_node(nodes: &mut Vec<SinkNode>, data: SinkData) -> usize {
    nodes.push(SinkNode {
        parent: None,
        children: Vec::new(),
        data,
    });
    nodes.len() - 1
}

fn detach(nodes: &mut [SinkNode], id: usize) {
    if let Some(parent) = nodes[id].parent.take() {
        nodes[parent].children.retain(|&child| child != id);
    }
}

/// Append `text` to `target` if it is a text node
fn merge_text(nodes: &mut [SinkNode], target: Option<usize>, text: &str) -> bool {
    match target.map(|id| &mut nodes[id].data) {
        Some(SinkData::Text(existing)) => {
            existing.push_str(text);
            true
        }
        _ => false,
    }
}

impl TreeSink for FragmentSink {
    type Handle = usize;
    type Output = Fragment;
    type ElemName<'a>
        = SinkName<'a>
    where
        Self: 'a;

    /// The fragment is everything under the `<html>` root the parser creates
    fn finish(self) -> Fragment {
        let nodes = self.nodes.into_inner();
        let root = nodes[0]
            .children
            .iter()
            .copied()
            .find(|&id| matches!(nodes[id].data, SinkData::Element { .. }));

        let children = match root {
            Some(root) => nodes[root]
                .children
                .iter()
                .filter_map(|&id| Self::build(&nodes, id))
                .collect(),
            None => Vec::new(),
        };
        Fragment { children }
    }

    fn parse_error(&self, msg: Cow<'static, str>) {
        tracing::trace!("HTML parse error: {}", msg);
    }

    fn get_document(&self) -> usize {
        0
    }

    fn elem_name<'a>(&'a self, target: &'a usize) -> SinkName<'a> {
        SinkName(Ref::map(self.nodes.borrow(), |nodes| match &nodes[*target].data {
            SinkData::Element { name, .. } => name,
            _ => &*NO_NAME,
        }))
    }

    fn create_element(
        &self,
        name: QualName,
        attrs: Vec<html5ever::Attribute>,
        _flags: ElementFlags,
    ) -> usize {
        self.create(SinkData::Element { name, attrs })
    }

    fn create_comment(&self, text: StrTendril) -> usize {
        self.create(SinkData::Comment(text.to_string()))
    }

    fn create_pi(&self, _target: StrTendril, data: StrTendril) -> usize {
        self.create(SinkData::Comment(data.to_string()))
    }

    fn append(&self, parent: &usize, child: NodeOrText<usize>) {
        let mut nodes = self.nodes.borrow_mut();
        let id = match child {
            NodeOrText::AppendNode(id) => {
                detach(&mut nodes, id);
                id
            }
            NodeOrText::AppendText(text) => {
                let last = nodes[*parent].children.last().copied();
                if merge_text(&mut nodes, last, &text) {
                    return;
                }
                push_node(&mut nodes, SinkData::Text(text.to_string()))
            }
        };
        nodes[id].parent = Some(*parent);
        nodes[*parent].children.push(id);
    }

    fn append_before_sibling(&self, sibling: &usize, new_node: NodeOrText<usize>) {
        let mut nodes = self.nodes.borrow_mut();
        let Some(parent) = nodes[*sibling].parent else {
            return;
        };
        let id = match new_node {
            NodeOrText::AppendNode(id) => {
                detach(&mut nodes, id);
                id
            }
            NodeOrText::AppendText(text) => {
                let siblings = &nodes[parent].children;
                let previous = siblings
                    .iter()
                    .position(|&child| child == *sibling)
                    .and_then(|i| i.checked_sub(1))
                    .map(|i| siblings[i]);
                if merge_text(&mut nodes, previous, &text) {
                    return;
                }
                push_node(&mut nodes, SinkData::Text(text.to_string()))
            }
        };

        let children = &mut nodes[parent].children;
        let position = children
            .iter()
            .position(|&child| child == *sibling)
            .unwrap_or(children.len());
        children.insert(position, id);
        nodes[id].parent = Some(parent);
    }

    fn append_based_on_parent_node(
        &self,
        element: &usize,
        prev_element: &usize,
        child: NodeOrText<usize>,
    ) {
        let has_parent = self.nodes.borrow()[*element].parent.is_some();
        if has_parent {
            self.append_before_sibling(element, child);
        } else {
            self.append(prev_element, child);
        }
    }

    fn append_doctype_to_document(
        &self,
        _name: StrTendril,
        _public_id: StrTendril,
        _system_id: StrTendril,
    ) {
    }

    fn get_template_contents(&self, target: &usize) -> usize {
        *target
    }

    fn same_node(&self, x: &usize, y: &usize) -> bool {
        x == y
    }

    fn set_quirks_mode(&self, _mode: QuirksMode) {}

    fn add_attrs_if_missing(&self, target: &usize, attrs: Vec<html5ever::Attribute>) {
        let mut nodes = self.nodes.borrow_mut();
        if let SinkData::Element { attrs: existing, .. } = &mut nodes[*target].data {
            for attr in attrs {
                if !existing.iter().any(|e| e.name == attr.name) {
                    existing.push(attr);
                }
            }
        }
    }

    fn remove_from_parent(&self, target: &usize) {
        detach(&mut self.nodes.borrow_mut(), *target);
    }

    fn reparent_children(&self, node: &usize, new_parent: &usize) {
        let mut nodes = self.nodes.borrow_mut();
        let moved = std::mem::take(&mut nodes[*node].children);
        for &child in &moved {
            nodes[child].parent = Some(*new_parent);
        }
        nodes[*new_parent].children.extend(moved);
    }
}
