//! In-process document tree consumed by the capturer.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Freed slots are
//! reused; each slot carries a generation so a stale id never resolves to the
//! node that took its place.

use crate::model::ChartId;
use crate::rendering::Color;
use crate::{Error, Result};
use image::RgbaImage;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    Block,
    None,
}

/// The small subset of CSS the layout understands.
#[derive(Debug, Clone, PartialEq)]
pub struct Style {
    pub display: Display,
    /// Explicit width in CSS pixels
    pub width: Option<u32>,
    /// Explicit height in CSS pixels
    pub height: Option<u32>,
    pub padding: u32,
    /// Spacing between children
    pub gap: u32,
    /// Lay children out in a grid with this many columns
    pub columns: Option<u32>,
    pub background: Option<Color>,
    pub color: Color,
    pub text_scale: u32,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            display: Display::Block,
            width: None,
            height: None,
            padding: 0,
            gap: 0,
            columns: None,
            background: None,
            color: Color::WHITE,
            text_scale: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementData {
    pub tag: String,
    pub id: Option<String>,
    pub class: Option<String>,
}

/// A retained bitmap target the chart renderer paints into.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceData {
    pub chart_id: Option<ChartId>,
    pub pixels: RgbaImage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub src: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Element(ElementData),
    Text(String),
    Surface(SurfaceData),
    Image(ImageData),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub style: Style,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_hidden(&self) -> bool {
        self.style.display == Display::None
    }

    pub fn as_surface(&self) -> Option<&SurfaceData> {
        match &self.kind {
            NodeKind::Surface(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Debug, Clone)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<usize>,
    root: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create a document holding only a `body` root.
    pub fn new() -> Self {
        let body = Node {
            kind: NodeKind::Element(ElementData { tag: "body".into(), id: None, class: None }),
            style: Style::default(),
            parent: None,
            children: Vec::new(),
        };
        Self {
            slots: vec![Slot { generation: 0, node: Some(body) }],
            free: Vec::new(),
            root: NodeId { index: 0, generation: 0 },
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.slots
            .get_mut(id.index)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
            .ok_or_else(|| Error::Other(format!("stale node id {:?}", id)))
    }

    /// Create a detached node.
    pub fn create(&mut self, kind: NodeKind, style: Style) -> NodeId {
        let node = Node { kind, style, parent: None, children: Vec::new() };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = Some(node);
                NodeId { index, generation: slot.generation }
            }
            None => {
                self.slots.push(Slot { generation: 0, node: Some(node) });
                NodeId { index: self.slots.len() - 1, generation: 0 }
            }
        }
    }

    pub fn create_element(&mut self, tag: &str, id: Option<&str>, class: Option<&str>, style: Style) -> NodeId {
        self.create(
            NodeKind::Element(ElementData {
                tag: tag.to_string(),
                id: id.map(str::to_string),
                class: class.map(str::to_string),
            }),
            style,
        )
    }

    pub fn create_text(&mut self, text: impl Into<String>, style: Style) -> NodeId {
        self.create(NodeKind::Text(text.into()), style)
    }

    /// Create a blank (fully transparent) drawing surface.
    pub fn create_surface(&mut self, chart_id: Option<ChartId>, width: u32, height: u32, style: Style) -> NodeId {
        self.create(NodeKind::Surface(SurfaceData { chart_id, pixels: RgbaImage::new(width, height) }), style)
    }

    pub fn create_image(&mut self, src: String, style: Style) -> NodeId {
        self.create(NodeKind::Image(ImageData { src }), style)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.ensure_detached(child)?;
        self.node_mut(child)?.parent = Some(parent);
        self.node_mut(parent)?.children.push(child);
        Ok(())
    }

    /// Insert `new` as the sibling immediately before `reference`.
    pub fn insert_before(&mut self, reference: NodeId, new: NodeId) -> Result<()> {
        self.ensure_detached(new)?;
        let parent = self
            .node(reference)
            .and_then(|n| n.parent)
            .ok_or_else(|| Error::Other(format!("node {:?} has no parent", reference)))?;
        let siblings = &mut self.node_mut(parent)?.children;
        let pos = siblings
            .iter()
            .position(|c| *c == reference)
            .ok_or_else(|| Error::Other("corrupt sibling list".into()))?;
        siblings.insert(pos, new);
        self.node_mut(new)?.parent = Some(parent);
        Ok(())
    }

    /// Detach `id` from its parent and free its whole subtree.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        if id == self.root {
            return Err(Error::Other("cannot remove the document root".into()));
        }
        if let Some(parent) = self.node_mut(id)?.parent.take() {
            self.node_mut(parent)?.children.retain(|c| *c != id);
        }
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            let Some(slot) = self.slots.get_mut(n.index).filter(|s| s.generation == n.generation) else {
                continue;
            };
            if let Some(node) = slot.node.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(n.index);
                stack.extend(node.children);
            }
        }
        Ok(())
    }

    fn ensure_detached(&self, id: NodeId) -> Result<()> {
        match self.node(id) {
            Some(n) if n.parent.is_none() && id != self.root => Ok(()),
            Some(_) => Err(Error::Other(format!("node {:?} is already attached", id))),
            None => Err(Error::Other(format!("stale node id {:?}", id))),
        }
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if c == self.root {
                return true;
            }
            cur = self.node(c).and_then(|n| n.parent);
        }
        false
    }

    /// `root` and every node below it, in document (pre-)order.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.node(id) {
                out.push(id);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Look up an attached element by its `id` attribute.
    pub fn get_element_by_id(&self, element_id: &str) -> Option<NodeId> {
        self.descendants(self.root).into_iter().find(|id| {
            matches!(self.node(*id).map(|n| &n.kind),
                Some(NodeKind::Element(e)) if e.id.as_deref() == Some(element_id))
        })
    }

    /// Drawing surfaces under `root` in document order.
    pub fn surfaces(&self, root: NodeId) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|id| matches!(self.node(*id).map(|n| &n.kind), Some(NodeKind::Surface(_))))
            .collect()
    }

    pub fn images(&self, root: NodeId) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|id| matches!(self.node(*id).map(|n| &n.kind), Some(NodeKind::Image(_))))
            .collect()
    }

    /// Find the attached surface tagged with `chart_id`.
    pub fn surface_for_chart(&self, chart_id: &ChartId) -> Option<NodeId> {
        self.surfaces(self.root).into_iter().find(|id| {
            self.node(*id)
                .and_then(Node::as_surface)
                .and_then(|s| s.chart_id.as_ref())
                == Some(chart_id)
        })
    }

    pub fn set_display(&mut self, id: NodeId, display: Display) -> Result<()> {
        self.node_mut(id)?.style.display = display;
        Ok(())
    }

    /// Replace a surface's pixel buffer.
    pub fn paint_surface(&mut self, id: NodeId, pixels: RgbaImage) -> Result<()> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Surface(s) => {
                s.pixels = pixels;
                Ok(())
            }
            _ => Err(Error::Other(format!("node {:?} is not a drawing surface", id))),
        }
    }

    /// Whether `id` and all its ancestors are displayed.
    pub fn is_rendered(&self, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(c) = cur {
            match self.node(c) {
                Some(n) if !n.is_hidden() => cur = n.parent,
                _ => return false,
            }
        }
        true
    }

    /// SHA-256 over everything that affects what the attached tree looks like.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for id in self.descendants(self.root) {
            let Some(node) = self.node(id) else { continue };
            hasher.update(format!("{:?}|{}|", node.style, node.children.len()).as_bytes());
            match &node.kind {
                NodeKind::Element(e) => hasher.update(format!("E{}#{:?}.{:?}", e.tag, e.id, e.class).as_bytes()),
                NodeKind::Text(t) => hasher.update(format!("T{}", t).as_bytes()),
                NodeKind::Surface(s) => {
                    hasher.update(format!("S{:?}{}x{}", s.chart_id, s.pixels.width(), s.pixels.height()).as_bytes());
                    hasher.update(s.pixels.as_raw());
                }
                NodeKind::Image(i) => hasher.update(format!("I{}", i.src).as_bytes()),
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Serialize the subtree rooted at `id` as markup.
    pub fn to_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_html(id, &mut out);
        out
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id) else { return };
        let hidden = if node.is_hidden() { " style=\"display:none\"" } else { "" };
        match &node.kind {
            NodeKind::Text(t) => out.push_str(&escape(t)),
            NodeKind::Surface(s) => {
                let _ = write!(out, "<canvas width=\"{}\" height=\"{}\"", s.pixels.width(), s.pixels.height());
                if let Some(c) = &s.chart_id {
                    let _ = write!(out, " data-chart-id=\"{}\"", escape(c.as_str()));
                }
                let _ = write!(out, "{}></canvas>", hidden);
            }
            NodeKind::Image(i) => {
                let _ = write!(out, "<img src=\"{}\"{}>", escape(&i.src), hidden);
            }
            NodeKind::Element(e) => {
                let _ = write!(out, "<{}", e.tag);
                if let Some(v) = &e.id {
                    let _ = write!(out, " id=\"{}\"", escape(v));
                }
                if let Some(v) = &e.class {
                    let _ = write!(out, " class=\"{}\"", escape(v));
                }
                out.push_str(hidden);
                out.push('>');
                for child in &node.children {
                    self.write_html(*child, out);
                }
                let _ = write!(out, "</{}>", e.tag);
            }
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new();
        let root = doc.root();
        let wrap = doc.create_element("div", Some("wrap"), None, Style::default());
        doc.append_child(root, wrap).unwrap();
        let a = doc.create_surface(Some(ChartId("a".into())), 4, 4, Style::default());
        let b = doc.create_surface(Some(ChartId("b".into())), 4, 4, Style::default());
        doc.append_child(wrap, a).unwrap();
        doc.append_child(wrap, b).unwrap();
        (doc, wrap, a, b)
    }

    #[test]
    fn freed_slots_are_reused_without_aliasing() {
        let (mut doc, wrap, _a, _b) = tree();
        let slots = doc.slots.len();
        let first = doc.create_image("x".into(), Style::default());
        doc.append_child(wrap, first).unwrap();
        doc.remove(first).unwrap();
        for _ in 0..100 {
            let img = doc.create_image("y".into(), Style::default());
            doc.append_child(wrap, img).unwrap();
            doc.remove(img).unwrap();
        }
        assert_eq!(doc.slots.len(), slots + 1);
        let reused = doc.create_text("t", Style::default());
        assert!(doc.node(first).is_none());
        assert!(doc.node(reused).is_some());
        assert!(doc.remove(first).is_err());
    }

    #[test]
    fn surfaces_come_back_in_document_order() {
        let (doc, wrap, a, b) = tree();
        assert_eq!(doc.surfaces(wrap), vec![a, b]);
        assert_eq!(doc.surface_for_chart(&ChartId("b".into())), Some(b));
        assert_eq!(doc.get_element_by_id("wrap"), Some(wrap));
    }

    #[test]
    fn insert_before_then_remove_restores_digest() {
        let (mut doc, wrap, _a, b) = tree();
        let before = doc.digest();
        let img = doc.create_image("data:image/png;base64,".into(), Style::default());
        doc.insert_before(b, img).unwrap();
        doc.set_display(b, Display::None).unwrap();
        assert_eq!(doc.node(wrap).unwrap().children()[1], img);
        assert_ne!(doc.digest(), before);

        doc.set_display(b, Display::Block).unwrap();
        doc.remove(img).unwrap();
        assert_eq!(doc.digest(), before);
        assert!(doc.node(img).is_none());
    }

    #[test]
    fn detached_subtrees_are_not_found() {
        let (mut doc, wrap, a, _b) = tree();
        doc.remove(wrap).unwrap();
        assert!(doc.get_element_by_id("wrap").is_none());
        assert!(!doc.is_attached(a));
        assert!(doc.remove(doc.root()).is_err());
    }

    #[test]
    fn cannot_attach_twice() {
        let (mut doc, wrap, a, _b) = tree();
        assert!(doc.append_child(wrap, a).is_err());
    }

    #[test]
    fn rendered_respects_hidden_ancestors() {
        let (mut doc, wrap, a, _b) = tree();
        assert!(doc.is_rendered(a));
        doc.set_display(wrap, Display::None).unwrap();
        assert!(!doc.is_rendered(a));
    }

    #[test]
    fn html_marks_hidden_surfaces() {
        let (mut doc, wrap, a, _b) = tree();
        doc.set_display(a, Display::None).unwrap();
        let html = doc.to_html(wrap);
        assert!(html.starts_with("<div id=\"wrap\">"));
        assert!(html.contains("data-chart-id=\"a\" style=\"display:none\""));
    }
}
