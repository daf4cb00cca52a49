use crate::normalize::{Element, Node, NodeKind};

/// Render a normalized tree as Markdown. Block constructs are separated
/// by one blank line; inline runs between blocks collapse into
/// paragraphs of their own.
pub fn render(nodes: &[Node]) -> String {
    render_blocks(nodes).join("\n\n")
}

fn render_blocks(nodes: &[Node]) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut inline = String::new();
    for node in nodes {
        match node {
            Node::Text(value) => push_inline_text(&mut inline, value),
            Node::Element(element) => match render_inline_element(element) {
                Some(rendered) => inline.push_str(&rendered),
                None => {
                    flush_inline(&mut inline, &mut blocks);
                    render_block_element(element, &mut blocks);
                }
            },
        }
    }
    flush_inline(&mut inline, &mut blocks);
    blocks.retain(|block| !block.is_empty());
    blocks
}

fn render_inline_element(element: &Element) -> Option<String> {
    let rendered = match &element.kind {
        NodeKind::Strong => wrap_inline("**", &element.children),
        NodeKind::Emphasis => wrap_inline("*", &element.children),
        NodeKind::Strikethrough => wrap_inline("~~", &element.children),
        NodeKind::InlineCode => {
            let code = literal_text(&element.children);
            if code.is_empty() {
                String::new()
            } else {
                format!("`{code}`")
            }
        }
        NodeKind::Link { href } => {
            let text = render_inline(&element.children);
            let text = text.trim();
            let text = if text.is_empty() { href.as_str() } else { text };
            if text.is_empty() {
                String::new()
            } else {
                format!("[{text}]({href})")
            }
        }
        NodeKind::Image { src, alt } => format!("![{alt}]({src})"),
        NodeKind::LineBreak => "\n".to_string(),
        _ => return None,
    };
    Some(rendered)
}

fn render_block_element(element: &Element, blocks: &mut Vec<String>) {
    match &element.kind {
        NodeKind::Heading(level) => {
            let text = render_inline(&element.children);
            let text = text.trim();
            if !text.is_empty() {
                let level = usize::from((*level).clamp(1, 6));
                blocks.push(format!("{} {}", "#".repeat(level), text));
            }
        }
        NodeKind::Paragraph => {
            let text = render_inline(&element.children);
            let text = text.trim();
            if !text.is_empty() {
                blocks.push(text.to_string());
            }
        }
        NodeKind::Rule => blocks.push("---".to_string()),
        NodeKind::CodeBlock { language } => {
            let body = literal_text(&element.children);
            let body = body.trim_matches('\n');
            let language = language.as_deref().unwrap_or("");
            if body.is_empty() {
                blocks.push(format!("```{language}\n```"));
            } else {
                blocks.push(format!("```{language}\n{body}\n```"));
            }
        }
        NodeKind::Blockquote => {
            let inner = render_blocks(&element.children).join("\n\n");
            if inner.is_empty() {
                return;
            }
            let quoted = inner
                .lines()
                .map(|line| {
                    if line.is_empty() {
                        ">".to_string()
                    } else {
                        format!("> {line}")
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            blocks.push(quoted);
        }
        NodeKind::BulletList | NodeKind::OrderedList => {
            let list = render_list(element, 0);
            if !list.is_empty() {
                blocks.push(list);
            }
        }
        NodeKind::ListItem => {
            // An item without a surrounding list degrades to its content.
            blocks.extend(render_blocks(&element.children));
        }
        NodeKind::Table => {
            let table = render_table(element);
            if !table.is_empty() {
                blocks.push(table);
            }
        }
        NodeKind::TableRow | NodeKind::TableHeaderCell | NodeKind::TableCell => {
            blocks.extend(render_blocks(&element.children));
        }
        NodeKind::Details => {
            let mut summary = None::<String>;
            let mut body = Vec::new();
            for child in &element.children {
                match child {
                    Node::Element(inner)
                        if inner.kind == NodeKind::Summary && summary.is_none() =>
                    {
                        summary = Some(render_inline(&inner.children).trim().to_string());
                    }
                    other => body.push(other.clone()),
                }
            }
            let mut parts = Vec::new();
            if let Some(title) = summary.filter(|title| !title.is_empty()) {
                parts.push(format!("**{title}**"));
            }
            parts.extend(render_blocks(&body));
            if !parts.is_empty() {
                blocks.push(parts.join("\n\n"));
            }
        }
        NodeKind::Summary => {
            let text = render_inline(&element.children);
            let text = text.trim();
            if !text.is_empty() {
                blocks.push(format!("**{text}**"));
            }
        }
        NodeKind::Container => blocks.extend(render_blocks(&element.children)),
        // Inline kinds never reach here; render_blocks diverts them.
        _ => {
            let text = render_inline(std::slice::from_ref(&Node::Element(element.clone())));
            let text = text.trim();
            if !text.is_empty() {
                blocks.push(text.to_string());
            }
        }
    }
}

fn render_inline(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Text(value) => push_inline_text(&mut out, value),
            Node::Element(element) => match render_inline_element(element) {
                Some(rendered) => out.push_str(&rendered),
                None => {
                    if element.kind == NodeKind::Container {
                        out.push_str(&render_inline(&element.children));
                        continue;
                    }
                    // Block content nested in an inline context keeps its
                    // own lines.
                    let mut blocks = Vec::new();
                    render_block_element(element, &mut blocks);
                    if blocks.is_empty() {
                        continue;
                    }
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                    out.push_str(&blocks.join("\n\n"));
                }
            },
        }
    }
    out
}

fn wrap_inline(marker: &str, children: &[Node]) -> String {
    let text = render_inline(children);
    let text = text.trim();
    if text.is_empty() {
        String::new()
    } else {
        format!("{marker}{text}{marker}")
    }
}

fn push_inline_text(out: &mut String, value: &str) {
    if value.trim().is_empty() {
        if !out.is_empty() && !out.ends_with(' ') && !out.ends_with('\n') {
            out.push(' ');
        }
        return;
    }
    let mut collapsed = String::with_capacity(value.len());
    let mut previous_space = false;
    for ch in value.chars() {
        if ch.is_whitespace() {
            if !previous_space {
                collapsed.push(' ');
            }
            previous_space = true;
        } else {
            collapsed.push(ch);
            previous_space = false;
        }
    }
    if out.is_empty() || out.ends_with(' ') || out.ends_with('\n') {
        out.push_str(collapsed.trim_start());
    } else {
        out.push_str(&collapsed);
    }
}

fn flush_inline(inline: &mut String, blocks: &mut Vec<String>) {
    let trimmed = inline.trim();
    if !trimmed.is_empty() {
        blocks.push(trimmed.to_string());
    }
    inline.clear();
}

fn render_list(element: &Element, depth: usize) -> String {
    let ordered = element.kind == NodeKind::OrderedList;
    let indent = "  ".repeat(depth);
    let mut lines: Vec<String> = Vec::new();
    let mut index = 0usize;

    for child in &element.children {
        let Node::Element(item) = child else { continue };
        match &item.kind {
            NodeKind::ListItem => {
                index += 1;
                let marker = if ordered {
                    format!("{index}. ")
                } else {
                    "- ".to_string()
                };

                let mut content_nodes = Vec::new();
                let mut nested = Vec::new();
                for sub in &item.children {
                    match sub {
                        Node::Element(inner)
                            if matches!(
                                inner.kind,
                                NodeKind::BulletList | NodeKind::OrderedList
                            ) =>
                        {
                            nested.push(render_list(inner, depth + 1));
                        }
                        other => content_nodes.push(other.clone()),
                    }
                }

                let content = render_blocks(&content_nodes).join("\n");
                let mut content_lines = content.lines();
                let first = content_lines.next().unwrap_or("");
                lines.push(format!("{indent}{marker}{first}").trim_end().to_string());
                for continuation in content_lines {
                    lines.push(format!("{indent}  {continuation}"));
                }
                lines.extend(nested.into_iter().filter(|list| !list.is_empty()));
            }
            NodeKind::BulletList | NodeKind::OrderedList => {
                let list = render_list(item, depth + 1);
                if !list.is_empty() {
                    lines.push(list);
                }
            }
            _ => {}
        }
    }
    lines.join("\n")
}

fn render_table(element: &Element) -> String {
    let mut rows: Vec<(Vec<String>, bool)> = Vec::new();
    collect_rows(&element.children, &mut rows);
    if rows.is_empty() {
        return String::new();
    }

    // The separator belongs directly after the first row that carries
    // header cells; a headerless table still gets one after row zero so
    // the output stays a valid table.
    let separator_after = rows
        .iter()
        .position(|(_, has_header)| *has_header)
        .unwrap_or(0);

    let mut lines = Vec::new();
    for (row_index, (cells, _)) in rows.iter().enumerate() {
        lines.push(format!("| {} |", cells.join(" | ")));
        if row_index == separator_after {
            let separator = vec!["---"; cells.len()];
            lines.push(format!("| {} |", separator.join(" | ")));
        }
    }
    lines.join("\n")
}

fn collect_rows(nodes: &[Node], rows: &mut Vec<(Vec<String>, bool)>) {
    for node in nodes {
        let Node::Element(element) = node else { continue };
        match &element.kind {
            NodeKind::TableRow => {
                let mut cells = Vec::new();
                let mut has_header = false;
                collect_cells(&element.children, &mut cells, &mut has_header);
                if !cells.is_empty() {
                    rows.push((cells, has_header));
                }
            }
            NodeKind::Container => collect_rows(&element.children, rows),
            _ => {}
        }
    }
}

fn collect_cells(nodes: &[Node], cells: &mut Vec<String>, has_header: &mut bool) {
    for node in nodes {
        let Node::Element(element) = node else { continue };
        match &element.kind {
            NodeKind::TableHeaderCell => {
                *has_header = true;
                cells.push(render_cell(&element.children));
            }
            NodeKind::TableCell => cells.push(render_cell(&element.children)),
            NodeKind::Container => collect_cells(&element.children, cells, has_header),
            _ => {}
        }
    }
}

fn render_cell(nodes: &[Node]) -> String {
    render_blocks(nodes)
        .join(" ")
        .replace('\n', " ")
        .replace('|', "\\|")
        .trim()
        .to_string()
}

fn literal_text(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Text(value) => out.push_str(value),
            Node::Element(element) => out.push_str(&literal_text(&element.children)),
        }
    }
    out
}
