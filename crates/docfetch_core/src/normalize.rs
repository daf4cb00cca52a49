use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// A node in the normalized document tree. Text keeps its raw entity
/// escapes; decoding is the post-processor's job.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Element(Element),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub kind: NodeKind,
    pub children: Vec<Node>,
}

/// Closed vocabulary of node kinds the renderer understands. Every
/// proprietary construct is rewritten onto one of these during
/// normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Heading(u8),
    Paragraph,
    LineBreak,
    Rule,
    Strong,
    Emphasis,
    Strikethrough,
    InlineCode,
    CodeBlock { language: Option<String> },
    Blockquote,
    BulletList,
    OrderedList,
    ListItem,
    Table,
    TableRow,
    TableHeaderCell,
    TableCell,
    Link { href: String },
    Image { src: String, alt: String },
    Details,
    Summary,
    Container,
}

impl Node {
    pub fn text(value: impl Into<String>) -> Self {
        Node::Text(value.into())
    }

    pub fn element(kind: NodeKind, children: Vec<Node>) -> Self {
        Node::Element(Element { kind, children })
    }
}

/// Parse raw storage-format markup and rewrite every recognized macro
/// construct into the plain node vocabulary above. Never fails:
/// malformed input degrades to whatever could be parsed.
pub fn normalize(markup: &str) -> Vec<Node> {
    normalize_raw(parse_raw(markup))
}

#[derive(Debug, Clone)]
enum RawNode {
    Text(String),
    Tag(RawTag),
}

#[derive(Debug, Clone)]
struct RawTag {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<RawNode>,
}

fn parse_raw(markup: &str) -> Vec<RawNode> {
    let mut reader = Reader::from_str(markup);
    reader.config_mut().check_end_names = false;

    let mut stack: Vec<RawTag> = Vec::new();
    let mut roots: Vec<RawNode> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(open_tag(&start)),
            Ok(Event::Empty(start)) => {
                let tag = open_tag(&start);
                append_raw(&mut stack, &mut roots, RawNode::Tag(tag));
            }
            Ok(Event::Text(text)) => {
                let value = String::from_utf8_lossy(&text).into_owned();
                if !value.is_empty() {
                    append_raw(&mut stack, &mut roots, RawNode::Text(value));
                }
            }
            Ok(Event::CData(data)) => {
                let value = String::from_utf8_lossy(&data).into_owned();
                append_raw(&mut stack, &mut roots, RawNode::Text(value));
            }
            Ok(Event::End(_)) => {
                if let Some(tag) = stack.pop() {
                    append_raw(&mut stack, &mut roots, RawNode::Tag(tag));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    // Unclosed tags at EOF still contribute their parsed content.
    while let Some(tag) = stack.pop() {
        append_raw(&mut stack, &mut roots, RawNode::Tag(tag));
    }
    roots
}

fn open_tag(start: &BytesStart<'_>) -> RawTag {
    let name = String::from_utf8_lossy(start.name().as_ref()).to_ascii_lowercase();
    let mut attrs = Vec::new();
    for attr in start.attributes().with_checks(false).flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
        let value = attr
            .unescape_value()
            .map(Cow::into_owned)
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
        attrs.push((key, value));
    }
    RawTag {
        name,
        attrs,
        children: Vec::new(),
    }
}

fn append_raw(stack: &mut [RawTag], roots: &mut Vec<RawNode>, node: RawNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

fn normalize_raw(raw: Vec<RawNode>) -> Vec<Node> {
    let mut out = Vec::new();
    for node in raw {
        match node {
            RawNode::Text(value) => out.push(Node::Text(value)),
            RawNode::Tag(tag) => out.extend(normalize_tag(tag)),
        }
    }
    out
}

fn normalize_tag(tag: RawTag) -> Vec<Node> {
    match tag.name.as_str() {
        "ac:structured-macro" | "ac:macro" => rewrite_macro(tag),
        "ac:link" => rewrite_link(tag),
        "ac:image" => rewrite_image(tag),
        "ac:emoticon" => rewrite_emoticon(&tag),
        // Macro plumbing encountered outside a macro carries no meaning.
        "ac:parameter" | "ac:plain-text-body" | "ac:placeholder" => Vec::new(),
        name if name.starts_with("ac:") || name.starts_with("ri:") => normalize_raw(tag.children),
        _ => normalize_html_tag(tag),
    }
}

/// Collected pieces of one structured macro: its parameters, optional
/// plain-text body and already-normalized rich-text body. Normalizing
/// the body before the wrapper is rewritten is what makes nested macros
/// resolve inside-out.
struct MacroInput {
    params: Vec<(String, String)>,
    plain_body: Option<String>,
    body: Vec<Node>,
}

impl MacroInput {
    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

type MacroRewrite = fn(&MacroInput) -> Vec<Node>;

const MACRO_REWRITES: &[(&str, MacroRewrite)] = &[
    ("code", rewrite_code),
    ("info", rewrite_info),
    ("note", rewrite_note),
    ("warning", rewrite_warning),
    ("tip", rewrite_tip),
    ("panel", rewrite_panel),
    ("expand", rewrite_expand),
    ("status", rewrite_status),
    ("toc", rewrite_toc),
];

fn rewrite_macro(tag: RawTag) -> Vec<Node> {
    let name = attr_value(&tag.attrs, "ac:name")
        .unwrap_or_default()
        .to_ascii_lowercase();
    let input = collect_macro_input(tag.children);
    for (macro_name, rewrite) in MACRO_REWRITES {
        if *macro_name == name {
            return rewrite(&input);
        }
    }
    // Unrecognized macro: unwrap its rich-text body, or vanish.
    input.body
}

fn collect_macro_input(children: Vec<RawNode>) -> MacroInput {
    let mut params = Vec::new();
    let mut plain_body = None;
    let mut body = Vec::new();
    for child in children {
        match child {
            RawNode::Tag(tag) if tag.name == "ac:parameter" => {
                let key = attr_value(&tag.attrs, "ac:name")
                    .unwrap_or_default()
                    .to_string();
                params.push((key, raw_text(&tag.children)));
            }
            RawNode::Tag(tag) if tag.name == "ac:plain-text-body" => {
                plain_body = Some(raw_text(&tag.children));
            }
            RawNode::Tag(tag) if tag.name == "ac:rich-text-body" => {
                body.extend(normalize_raw(tag.children));
            }
            RawNode::Tag(tag) => body.extend(normalize_tag(tag)),
            RawNode::Text(value) => {
                if !value.trim().is_empty() {
                    body.push(Node::Text(value));
                }
            }
        }
    }
    MacroInput {
        params,
        plain_body,
        body,
    }
}

fn rewrite_code(input: &MacroInput) -> Vec<Node> {
    let Some(body) = input.plain_body.clone() else {
        return Vec::new();
    };
    let language = input.param("language").map(ToString::to_string);
    vec![Node::element(
        NodeKind::CodeBlock { language },
        vec![Node::Text(body)],
    )]
}

fn rewrite_info(input: &MacroInput) -> Vec<Node> {
    callout("Info", input)
}

fn rewrite_note(input: &MacroInput) -> Vec<Node> {
    callout("Note", input)
}

fn rewrite_warning(input: &MacroInput) -> Vec<Node> {
    callout("Warning", input)
}

fn rewrite_tip(input: &MacroInput) -> Vec<Node> {
    callout("Tip", input)
}

fn callout(label: &str, input: &MacroInput) -> Vec<Node> {
    let mut children = vec![Node::element(
        NodeKind::Paragraph,
        vec![Node::element(NodeKind::Strong, vec![Node::text(label)])],
    )];
    children.extend(input.body.iter().cloned());
    vec![Node::element(NodeKind::Blockquote, children)]
}

fn rewrite_panel(input: &MacroInput) -> Vec<Node> {
    let mut children = Vec::new();
    if let Some(title) = input.param("title") {
        children.push(Node::element(
            NodeKind::Paragraph,
            vec![Node::element(NodeKind::Strong, vec![Node::text(title)])],
        ));
    }
    children.extend(input.body.iter().cloned());
    if children.is_empty() {
        return Vec::new();
    }
    vec![Node::element(NodeKind::Blockquote, children)]
}

fn rewrite_expand(input: &MacroInput) -> Vec<Node> {
    let title = input.param("title").unwrap_or("Details");
    let mut children = vec![Node::element(
        NodeKind::Summary,
        vec![Node::text(title)],
    )];
    children.extend(input.body.iter().cloned());
    vec![Node::element(NodeKind::Details, children)]
}

fn rewrite_status(input: &MacroInput) -> Vec<Node> {
    let Some(title) = input.param("title") else {
        return Vec::new();
    };
    vec![Node::element(
        NodeKind::Strong,
        vec![Node::text(format!("[{title}]"))],
    )]
}

fn rewrite_toc(_input: &MacroInput) -> Vec<Node> {
    Vec::new()
}

fn rewrite_link(tag: RawTag) -> Vec<Node> {
    let mut href = None::<String>;
    let mut fallback_label = String::new();
    let mut label_nodes: Vec<Node> = Vec::new();

    for child in tag.children {
        match child {
            RawNode::Tag(inner) if inner.name == "ri:page" => {
                if let Some(title) = attr_value(&inner.attrs, "ri:content-title") {
                    let title = title.trim();
                    if !title.is_empty() {
                        href = Some(format!("confluence://{}", urlencoding::encode(title)));
                        fallback_label = title.to_string();
                    }
                }
            }
            RawNode::Tag(inner) if inner.name == "ri:attachment" => {
                if let Some(filename) = attr_value(&inner.attrs, "ri:filename") {
                    let filename = filename.trim();
                    if !filename.is_empty() {
                        href = Some(format!("attachment://{}", urlencoding::encode(filename)));
                        fallback_label = filename.to_string();
                    }
                }
            }
            RawNode::Tag(inner) if inner.name == "ac:plain-text-link-body" => {
                let label = raw_text(&inner.children);
                if !label.trim().is_empty() {
                    label_nodes = vec![Node::Text(label)];
                }
            }
            RawNode::Tag(inner) if inner.name == "ac:link-body" => {
                label_nodes = normalize_raw(inner.children);
            }
            _ => {}
        }
    }

    let Some(href) = href else {
        // Malformed link keeps its visible text, loses the link itself.
        return label_nodes;
    };
    if label_nodes.is_empty() {
        if fallback_label.is_empty() {
            return Vec::new();
        }
        label_nodes = vec![Node::text(fallback_label)];
    }
    vec![Node::element(NodeKind::Link { href }, label_nodes)]
}

fn rewrite_image(tag: RawTag) -> Vec<Node> {
    let alt = attr_value(&tag.attrs, "ac:alt").unwrap_or_default().to_string();
    for child in &tag.children {
        let RawNode::Tag(inner) = child else { continue };
        if inner.name == "ri:attachment"
            && let Some(filename) = attr_value(&inner.attrs, "ri:filename")
            && !filename.trim().is_empty()
        {
            let src = format!("attachment://{}", urlencoding::encode(filename.trim()));
            return vec![Node::element(NodeKind::Image { src, alt }, Vec::new())];
        }
        if inner.name == "ri:url"
            && let Some(value) = attr_value(&inner.attrs, "ri:value")
            && !value.trim().is_empty()
        {
            let src = value.trim().to_string();
            return vec![Node::element(NodeKind::Image { src, alt }, Vec::new())];
        }
    }
    Vec::new()
}

const EMOTICON_TOKENS: &[(&str, &str)] = &[
    ("smile", "🙂"),
    ("sad", "🙁"),
    ("wink", "😉"),
    ("laugh", "😄"),
    ("cheeky", "😛"),
    ("thumbs-up", "👍"),
    ("thumbs-down", "👎"),
    ("information", "ℹ️"),
    ("tick", "✅"),
    ("cross", "❌"),
    ("warning", "⚠️"),
    ("question", "❓"),
    ("plus", "➕"),
    ("minus", "➖"),
    ("heart", "❤️"),
    ("broken-heart", "💔"),
    ("star", "⭐"),
    ("yellow-star", "⭐"),
    ("light-on", "💡"),
];

fn rewrite_emoticon(tag: &RawTag) -> Vec<Node> {
    let name = attr_value(&tag.attrs, "ac:name").unwrap_or_default();
    let token = EMOTICON_TOKENS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, token)| *token)
        .unwrap_or("");
    if token.is_empty() {
        return Vec::new();
    }
    vec![Node::text(token)]
}

fn normalize_html_tag(tag: RawTag) -> Vec<Node> {
    let kind = match tag.name.as_str() {
        "h1" => NodeKind::Heading(1),
        "h2" => NodeKind::Heading(2),
        "h3" => NodeKind::Heading(3),
        "h4" => NodeKind::Heading(4),
        "h5" => NodeKind::Heading(5),
        "h6" => NodeKind::Heading(6),
        "p" => NodeKind::Paragraph,
        "br" => NodeKind::LineBreak,
        "hr" => NodeKind::Rule,
        "strong" | "b" => NodeKind::Strong,
        "em" | "i" => NodeKind::Emphasis,
        "del" | "s" | "strike" => NodeKind::Strikethrough,
        "code" => NodeKind::InlineCode,
        "pre" => NodeKind::CodeBlock { language: None },
        "blockquote" => NodeKind::Blockquote,
        "ul" => NodeKind::BulletList,
        "ol" => NodeKind::OrderedList,
        "li" => NodeKind::ListItem,
        "table" => NodeKind::Table,
        "tr" => NodeKind::TableRow,
        "th" => NodeKind::TableHeaderCell,
        "td" => NodeKind::TableCell,
        "details" => NodeKind::Details,
        "summary" => NodeKind::Summary,
        "a" => NodeKind::Link {
            href: attr_value(&tag.attrs, "href").unwrap_or_default().to_string(),
        },
        "img" => {
            let src = attr_value(&tag.attrs, "src").unwrap_or_default().to_string();
            if src.is_empty() {
                return Vec::new();
            }
            let alt = attr_value(&tag.attrs, "alt").unwrap_or_default().to_string();
            return vec![Node::element(NodeKind::Image { src, alt }, Vec::new())];
        }
        // div, span, thead, tbody and anything else unrecognized: pass
        // rendered children through without extra markup.
        _ => NodeKind::Container,
    };
    vec![Node::element(kind, normalize_raw(tag.children))]
}

fn attr_value<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn raw_text(nodes: &[RawNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            RawNode::Text(value) => out.push_str(value),
            RawNode::Tag(tag) => out.push_str(&raw_text(&tag.children)),
        }
    }
    out
}
