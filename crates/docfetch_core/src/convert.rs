use chrono::{DateTime, Utc};

use crate::frontmatter::{Frontmatter, build_frontmatter, render_frontmatter};
use crate::normalize::normalize;
use crate::postprocess::postprocess;
use crate::remote::RemoteDocument;
use crate::render::render;

/// Output of one conversion call. Not persisted as-is; the store writes
/// the rendered file and keeps its own metadata.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub markdown: String,
    pub frontmatter: Frontmatter,
}

/// Normalize, render and clean one remote document. Deterministic for
/// a fixed `synced_at`.
pub fn convert_document(document: &RemoteDocument, synced_at: DateTime<Utc>) -> ConversionResult {
    let nodes = normalize(&document.content);
    let markdown = postprocess(&render(&nodes));
    let frontmatter = build_frontmatter(document, synced_at);
    ConversionResult {
        markdown,
        frontmatter,
    }
}

/// Header, one blank line, body, trailing newline.
pub fn render_file(result: &ConversionResult) -> String {
    format!(
        "{}\n\n{}\n",
        render_frontmatter(&result.frontmatter),
        result.markdown
    )
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{convert_document, render_file};
    use crate::remote::RemoteDocument;

    fn document(content: &str) -> RemoteDocument {
        RemoteDocument {
            id: "9001".to_string(),
            title: "Guide".to_string(),
            space_key: "DOC".to_string(),
            version: 2,
            created_at: Utc.with_ymd_and_hms(2025, 10, 5, 7, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2026, 1, 20, 16, 45, 0).unwrap(),
            author: "Robin".to_string(),
            content: content.to_string(),
            web_url: "https://wiki.example.org/spaces/DOC/pages/9001".to_string(),
            labels: vec!["guide".to_string()],
        }
    }

    #[test]
    fn converting_twice_is_byte_identical_for_a_fixed_instant() {
        let doc = document(
            r#"<h1>Guide</h1><p>alpha &amp; beta</p><ac:structured-macro ac:name="info"><ac:rich-text-body><p>heads up</p></ac:rich-text-body></ac:structured-macro>"#,
        );
        let instant = Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap();
        let first = convert_document(&doc, instant);
        let second = convert_document(&doc, instant);
        assert_eq!(first.markdown, second.markdown);
        assert_eq!(render_file(&first), render_file(&second));
    }

    #[test]
    fn only_synced_at_differs_between_conversion_instants() {
        let doc = document("<p>stable body</p>");
        let first = convert_document(&doc, Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap());
        let second = convert_document(&doc, Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap());
        assert_eq!(first.markdown, second.markdown);
        assert_eq!(first.frontmatter.modified_at, second.frontmatter.modified_at);
        assert_ne!(first.frontmatter.synced_at, second.frontmatter.synced_at);
    }

    #[test]
    fn rendered_file_separates_header_and_body_with_a_blank_line() {
        let doc = document("<p>body text</p>");
        let instant = Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap();
        let file = render_file(&convert_document(&doc, instant));
        assert!(file.starts_with("---\n"));
        assert!(file.contains("---\n\nbody text\n"));
        assert!(file.ends_with("\n"));
    }
}
