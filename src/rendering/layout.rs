/// Block and grid layout over the document tree

use crate::dom::{Document, NodeId, NodeKind};
use std::collections::HashMap;

/// Glyph cell width at scale 1
pub const CHAR_WIDTH: u32 = 8;
/// Line height at scale 1
pub const LINE_HEIGHT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoxContent {
    Block,
    Text { lines: Vec<String> },
    Surface,
    Image,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutNode {
    pub node: NodeId,
    pub rect: Rect,
    pub content: BoxContent,
}

#[derive(Debug, Clone, Default)]
pub struct LayoutTree {
    pub nodes: Vec<LayoutNode>,
    pub width: u32,
    pub height: u32,
}

/// Lay out `root` and its rendered descendants.
///
/// `intrinsic` supplies the natural size of decoded images; images without an
/// explicit style size and no entry there collapse to zero.
pub fn layout_subtree(
    doc: &Document,
    root: NodeId,
    viewport_width: u32,
    intrinsic: &HashMap<NodeId, (u32, u32)>,
) -> LayoutTree {
    let mut ctx = LayoutContext { doc, intrinsic, nodes: Vec::new() };
    let width = doc
        .node(root)
        .and_then(|n| n.style.width)
        .unwrap_or(viewport_width);
    let (w, h) = ctx.layout(root, 0, 0, width);
    LayoutTree { nodes: ctx.nodes, width: w, height: h }
}

struct LayoutContext<'a> {
    doc: &'a Document,
    intrinsic: &'a HashMap<NodeId, (u32, u32)>,
    nodes: Vec<LayoutNode>,
}

impl LayoutContext<'_> {
    /// Returns the (width, height) the node occupies.
    fn layout(&mut self, id: NodeId, x: i32, y: i32, avail_w: u32) -> (u32, u32) {
        let doc = self.doc;
        let Some(node) = doc.node(id) else { return (0, 0) };
        if node.is_hidden() {
            return (0, 0);
        }
        let style = &node.style;

        match &node.kind {
            NodeKind::Text(text) => {
                let scale = style.text_scale.max(1);
                let inner = avail_w.saturating_sub(style.padding * 2);
                let lines = wrap(text, (inner / (CHAR_WIDTH * scale)).max(1) as usize);
                let h = lines.len() as u32 * LINE_HEIGHT * scale + style.padding * 2;
                let h = style.height.unwrap_or(h);
                self.nodes.push(LayoutNode {
                    node: id,
                    rect: Rect { x, y, width: avail_w, height: h },
                    content: BoxContent::Text { lines },
                });
                (avail_w, h)
            }
            NodeKind::Surface(s) => {
                let w = style.width.unwrap_or(s.pixels.width());
                let h = style.height.unwrap_or(s.pixels.height());
                self.nodes.push(LayoutNode {
                    node: id,
                    rect: Rect { x, y, width: w, height: h },
                    content: BoxContent::Surface,
                });
                (w, h)
            }
            NodeKind::Image(_) => {
                let (iw, ih) = self.intrinsic.get(&id).copied().unwrap_or((0, 0));
                let w = style.width.unwrap_or(iw);
                let h = style.height.unwrap_or(ih);
                self.nodes.push(LayoutNode {
                    node: id,
                    rect: Rect { x, y, width: w, height: h },
                    content: BoxContent::Image,
                });
                (w, h)
            }
            NodeKind::Element(_) => {
                let width = style.width.unwrap_or(avail_w);
                let pad = style.padding;
                let gap = style.gap;
                let columns = style.columns;
                let explicit_h = style.height;
                let inner_w = width.saturating_sub(pad * 2);
                let slot = self.nodes.len();
                self.nodes.push(LayoutNode {
                    node: id,
                    rect: Rect { x, y, width, height: 0 },
                    content: BoxContent::Block,
                });

                let children: Vec<NodeId> = node
                    .children()
                    .iter()
                    .copied()
                    .filter(|c| doc.node(*c).map(|n| !n.is_hidden()).unwrap_or(false))
                    .collect();

                let cx = x + pad as i32;
                let mut cy = y + pad as i32;
                let mut content_h = 0u32;
                match columns {
                    Some(cols) if cols > 1 => {
                        let cols = cols as usize;
                        let col_w = inner_w.saturating_sub(gap * (cols as u32 - 1)) / cols as u32;
                        for (row_idx, row) in children.chunks(cols).enumerate() {
                            if row_idx > 0 {
                                cy += gap as i32;
                                content_h += gap;
                            }
                            let mut row_h = 0;
                            for (col, child) in row.iter().enumerate() {
                                let col_x = cx + (col as u32 * (col_w + gap)) as i32;
                                let (_, h) = self.layout(*child, col_x, cy, col_w);
                                row_h = row_h.max(h);
                            }
                            cy += row_h as i32;
                            content_h += row_h;
                        }
                    }
                    _ => {
                        for (i, child) in children.iter().enumerate() {
                            if i > 0 {
                                cy += gap as i32;
                                content_h += gap;
                            }
                            let (_, h) = self.layout(*child, cx, cy, inner_w);
                            cy += h as i32;
                            content_h += h;
                        }
                    }
                }

                let height = explicit_h.unwrap_or(content_h + pad * 2);
                self.nodes[slot].rect.height = height;
                (width, height)
            }
        }
    }
}

/// Greedy word wrap to at most `chars_per_line` characters per line.
pub fn wrap(text: &str, chars_per_line: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut cur = String::new();
    for word in text.split_whitespace() {
        if !cur.is_empty() && cur.chars().count() + word.chars().count() + 1 > chars_per_line {
            lines.push(std::mem::take(&mut cur));
        }
        if !cur.is_empty() {
            cur.push(' ');
        }
        cur.push_str(word);
    }
    if !cur.is_empty() {
        lines.push(cur);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Display, Style};

    #[test]
    fn wraps_on_word_boundaries() {
        assert_eq!(wrap("hello big world", 9), vec!["hello big", "world"]);
        assert_eq!(wrap("", 4), vec![String::new()]);
    }

    #[test]
    fn grid_places_children_side_by_side() {
        let mut doc = Document::new();
        let root = doc.root();
        let grid = doc.create_element(
            "div",
            None,
            None,
            Style { columns: Some(2), gap: 10, padding: 5, ..Default::default() },
        );
        doc.append_child(root, grid).unwrap();
        let a = doc.create_surface(None, 40, 30, Style::default());
        let b = doc.create_surface(None, 40, 50, Style::default());
        let c = doc.create_surface(None, 40, 20, Style::default());
        for s in [a, b, c] {
            doc.append_child(grid, s).unwrap();
        }

        let tree = layout_subtree(&doc, grid, 210, &HashMap::new());
        let rect = |id| tree.nodes.iter().find(|n| n.node == id).unwrap().rect;
        assert_eq!(rect(a).x, 5);
        assert_eq!(rect(b).x, 5 + 95 + 10);
        assert_eq!(rect(c).y, 5 + 50 + 10);
        // two rows (50 + 20) + gap + padding
        assert_eq!(tree.height, 50 + 10 + 20 + 10);
        assert_eq!(tree.width, 210);
    }

    #[test]
    fn hidden_nodes_take_no_space() {
        let mut doc = Document::new();
        let root = doc.root();
        let col = doc.create_element("div", None, None, Style::default());
        doc.append_child(root, col).unwrap();
        let a = doc.create_surface(None, 10, 30, Style::default());
        let b = doc.create_surface(None, 10, 40, Style::default());
        doc.append_child(col, a).unwrap();
        doc.append_child(col, b).unwrap();
        doc.set_display(a, Display::None).unwrap();

        let tree = layout_subtree(&doc, col, 100, &HashMap::new());
        assert_eq!(tree.height, 40);
        assert!(tree.nodes.iter().all(|n| n.node != a));
    }
}
