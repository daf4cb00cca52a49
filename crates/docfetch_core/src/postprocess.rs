/// Cleanup passes applied once after rendering, in a fixed order.
/// Applying the whole pipeline to its own output changes nothing.
pub fn postprocess(input: &str) -> String {
    let text = decode_entities(input);
    let text = strip_residual_tags(&text);
    let text = collapse_internal_targets(&text);
    let text = collapse_blank_runs(&text);
    let text = unescape_over_escaped(&text);
    text.trim().to_string()
}

const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("amp", "&"),
    ("lt", "<"),
    ("gt", ">"),
    ("quot", "\""),
    ("apos", "'"),
    ("nbsp", " "),
    ("ndash", "–"),
    ("mdash", "—"),
    ("hellip", "…"),
    ("lsquo", "\u{2018}"),
    ("rsquo", "\u{2019}"),
    ("ldquo", "\u{201C}"),
    ("rdquo", "\u{201D}"),
    ("middot", "·"),
    ("bull", "•"),
    ("copy", "©"),
    ("reg", "®"),
    ("trade", "™"),
    ("deg", "°"),
    ("times", "×"),
    ("laquo", "«"),
    ("raquo", "»"),
];

fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut index = 0usize;
    while index < bytes.len() {
        if bytes[index] != b'&' {
            let ch_len = utf8_len(bytes[index]);
            out.push_str(&input[index..index + ch_len]);
            index += ch_len;
            continue;
        }
        let rest = &input[index + 1..];
        let Some(end) = rest.find(';').filter(|end| *end <= 10) else {
            out.push('&');
            index += 1;
            continue;
        };
        let name = &rest[..end];
        if let Some(decoded) = decode_entity_name(name) {
            out.push_str(&decoded);
            index += 1 + end + 1;
        } else {
            out.push('&');
            index += 1;
        }
    }
    out
}

fn decode_entity_name(name: &str) -> Option<String> {
    if let Some(digits) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        let code = u32::from_str_radix(digits, 16).ok()?;
        return char::from_u32(code).map(String::from);
    }
    if let Some(digits) = name.strip_prefix('#') {
        let code = digits.parse::<u32>().ok()?;
        return char::from_u32(code).map(String::from);
    }
    NAMED_ENTITIES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, replacement)| (*replacement).to_string())
}

/// Drop any leftover raw tag except anchors and images, which survive
/// verbatim. Tag bodies stay; only the tag markup itself goes.
fn strip_residual_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        match tag_span(candidate) {
            Some((span, keep)) => {
                if keep {
                    out.push_str(&candidate[..span]);
                }
                rest = &candidate[span..];
            }
            None => {
                out.push('<');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Length of the tag starting at `input` (which begins with `<`) and
/// whether it should be kept. Returns None when this is not a tag.
fn tag_span(input: &str) -> Option<(usize, bool)> {
    let mut chars = input.char_indices().skip(1);
    let (_, first) = chars.next()?;
    let is_tag_start = first.is_ascii_alphabetic() || first == '/' || first == '!';
    if !is_tag_start {
        return None;
    }
    let close = input.find('>')?;
    let name_start = if first == '/' { 2 } else { 1 };
    let name: String = input[name_start..close]
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric())
        .collect();
    let keep = name.eq_ignore_ascii_case("a") || name.eq_ignore_ascii_case("img");
    Some((close + 1, keep))
}

/// Rewrite `[text](confluence://...)` and `![alt](attachment://...)`
/// down to bracketed text. Standalone files have no use for the
/// internal schemes.
fn collapse_internal_targets(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    loop {
        let Some(bracket) = rest.find('[') else {
            out.push_str(rest);
            return out;
        };
        let (head, tail) = rest.split_at(bracket);
        let is_image = head.ends_with('!');
        let Some(close) = tail.find(']') else {
            out.push_str(head);
            out.push('[');
            rest = &tail[1..];
            continue;
        };
        let text = &tail[1..close];
        let after = &tail[close + 1..];
        let target = after.strip_prefix('(').and_then(|inner| {
            // `]` at close, `(` right after, then the target, then `)`.
            inner.find(')').map(|end| (&inner[..end], close + 2 + end + 1))
        });
        match target {
            Some((target, consumed))
                if target.starts_with("confluence://")
                    || target.starts_with("attachment://") =>
            {
                let mut head_out = head;
                if is_image && let Some(stripped) = head.strip_suffix('!') {
                    head_out = stripped;
                }
                out.push_str(head_out);
                let label = if text.is_empty() {
                    decoded_target_name(target)
                } else {
                    text.to_string()
                };
                out.push('[');
                out.push_str(&label);
                out.push(']');
                rest = &tail[consumed..];
            }
            _ => {
                out.push_str(head);
                out.push('[');
                rest = &tail[1..];
            }
        }
    }
}

fn decoded_target_name(target: &str) -> String {
    let name = target
        .strip_prefix("confluence://")
        .or_else(|| target.strip_prefix("attachment://"))
        .unwrap_or(target);
    urlencoding::decode(name)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_else(|_| name.to_string())
}

fn collapse_blank_runs(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut newlines = 0usize;
    for ch in input.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push('\n');
            }
        } else {
            newlines = 0;
            out.push(ch);
        }
    }
    out
}

fn unescape_over_escaped(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\'
            && let Some(next) = chars.peek()
            && matches!(next, '_' | '*')
        {
            continue;
        }
        out.push(ch);
    }
    out
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        byte if byte < 0x80 => 1,
        byte if byte < 0xE0 => 2,
        byte if byte < 0xF0 => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::postprocess;

    #[test]
    fn named_and_numeric_entities_decode() {
        assert_eq!(postprocess("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(postprocess("&#65;&#x42;"), "AB");
        assert_eq!(postprocess("1 &ndash; 2"), "1 – 2");
    }

    #[test]
    fn unknown_entities_pass_through() {
        assert_eq!(postprocess("&bogus; stays"), "&bogus; stays");
    }

    #[test]
    fn residual_tags_are_stripped_except_anchors_and_images() {
        assert_eq!(postprocess("<div>kept</div>"), "kept");
        assert_eq!(
            postprocess(r#"<a href="https://x">link</a>"#),
            r#"<a href="https://x">link</a>"#
        );
        assert_eq!(
            postprocess(r#"<img src="pic.png">"#),
            r#"<img src="pic.png">"#
        );
        assert_eq!(postprocess("a <!-- gone --> b"), "a  b");
    }

    #[test]
    fn lone_angle_bracket_is_preserved() {
        assert_eq!(postprocess("3 < 4"), "3 < 4");
    }

    #[test]
    fn internal_link_targets_collapse_to_bracketed_text() {
        assert_eq!(
            postprocess("see [notes](confluence://Release%20Notes)"),
            "see [notes]"
        );
        assert_eq!(
            postprocess("![diagram](attachment://arch.png)"),
            "[diagram]"
        );
        assert_eq!(
            postprocess("![](attachment://arch%20overview.png)"),
            "[arch overview.png]"
        );
    }

    #[test]
    fn external_links_are_untouched() {
        assert_eq!(
            postprocess("[site](https://example.org)"),
            "[site](https://example.org)"
        );
    }

    #[test]
    fn blank_runs_collapse_to_one_blank_line() {
        assert_eq!(postprocess("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn over_escaped_underscores_and_asterisks_unescape() {
        assert_eq!(postprocess(r"snake\_case and \*star"), "snake_case and *star");
    }

    #[test]
    fn whole_document_is_trimmed() {
        assert_eq!(postprocess("\n\n  text  \n\n"), "text");
    }

    #[test]
    fn postprocessing_is_idempotent() {
        let samples = [
            "# Title\n\na &amp; b\n\n\n- item\n\n[notes](confluence://Release%20Notes)\n<div>x</div>",
            "plain paragraph with [site](https://example.org) and `code`",
            "| a | b |\n| --- | --- |\n| 1 | 2 |",
        ];
        for sample in samples {
            let once = postprocess(sample);
            let twice = postprocess(&once);
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }
}
