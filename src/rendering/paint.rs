/// Paint commands produced from a laid-out subtree

use crate::dom::{Document, NodeId};
use crate::rendering::layout::{BoxContent, LayoutTree, Rect, CHAR_WIDTH, LINE_HEIGHT};
use crate::rendering::Color;

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        rect: Rect,
        color: Color,
    },
    /// One filled cell per visible glyph
    Text {
        x: i32,
        y: i32,
        lines: Vec<String>,
        scale: u32,
        color: Color,
    },
    /// Draw the decoded pixels of an image node stretched into `rect`
    Image {
        rect: Rect,
        node: NodeId,
    },
}

/// Build the display list in paint order (parents before children).
///
/// Live drawing surfaces produce no command: their pixel buffers are not
/// readable by the serializer, so they show up as empty space.
pub fn build_display_list(doc: &Document, layout: &LayoutTree) -> Vec<PaintCommand> {
    let mut out = Vec::new();
    for ln in &layout.nodes {
        let Some(node) = doc.node(ln.node) else { continue };
        let style = &node.style;
        if let Some(bg) = style.background {
            if bg.a > 0 && ln.rect.width > 0 && ln.rect.height > 0 {
                out.push(PaintCommand::SolidRect { rect: ln.rect, color: bg });
            }
        }
        match &ln.content {
            BoxContent::Text { lines } if lines.iter().any(|l| !l.trim().is_empty()) => {
                out.push(PaintCommand::Text {
                    x: ln.rect.x + style.padding as i32,
                    y: ln.rect.y + style.padding as i32,
                    lines: lines.clone(),
                    scale: style.text_scale.max(1),
                    color: style.color,
                });
            }
            BoxContent::Image if ln.rect.width > 0 && ln.rect.height > 0 => {
                out.push(PaintCommand::Image { rect: ln.rect, node: ln.node });
            }
            _ => {}
        }
    }
    out
}

/// Rectangles covered by the glyphs of a text command, in CSS pixels.
pub fn glyph_rects(x: i32, y: i32, lines: &[String], scale: u32) -> Vec<Rect> {
    let s = scale as i32;
    let mut rects = Vec::new();
    for (row, line) in lines.iter().enumerate() {
        for (col, ch) in line.chars().enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            rects.push(Rect {
                x: x + col as i32 * (CHAR_WIDTH as i32) * s + s,
                y: y + row as i32 * (LINE_HEIGHT as i32) * s + s,
                width: 6 * scale,
                height: 8 * scale,
            });
        }
    }
    rects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Style;
    use crate::rendering::layout::layout_subtree;
    use std::collections::HashMap;

    #[test]
    fn surfaces_paint_nothing() {
        let mut doc = Document::new();
        let root = doc.root();
        let card = doc.create_element(
            "div",
            None,
            None,
            Style { background: Some(Color::rgb(1, 2, 3)), ..Default::default() },
        );
        doc.append_child(root, card).unwrap();
        let s = doc.create_surface(None, 20, 20, Style::default());
        doc.append_child(card, s).unwrap();
        let t = doc.create_text("hi", Style::default());
        doc.append_child(card, t).unwrap();

        let layout = layout_subtree(&doc, card, 100, &HashMap::new());
        let cmds = build_display_list(&doc, &layout);
        assert_eq!(cmds.len(), 2);
        assert!(matches!(cmds[0], PaintCommand::SolidRect { .. }));
        assert!(matches!(cmds[1], PaintCommand::Text { y: 20, .. }));
    }

    #[test]
    fn glyphs_skip_whitespace() {
        let rects = glyph_rects(0, 0, &["a b".to_string()], 2);
        assert_eq!(rects.len(), 2);
        assert_eq!(rects[1].x, 2 * 8 * 2 + 2);
        assert_eq!(rects[0].width, 12);
    }
}
