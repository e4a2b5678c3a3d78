//! Prompt templates for document OCR.
//!
//! A template that contains [`IMAGE_PLACEHOLDER`] makes the request carry the
//! page image; a template without it is sent as text only. Templates are
//! passed to the backend verbatim so grounding markers such as
//! `<|grounding|>` reach models that understand them.

/// Marks where the page image goes in a prompt.
pub const IMAGE_PLACEHOLDER: &str = "<image>";

/// Default template: layout-aware conversion to Markdown.
pub const DOCUMENT_TO_MARKDOWN: &str = "<image>\n<|grounding|>Convert the document to markdown.";

/// Built-in templates by display name, default first.
pub const PRESETS: &[(&str, &str)] = &[
    ("Document to Markdown", DOCUMENT_TO_MARKDOWN),
    ("OCR with Grounding", "<image>\n<|grounding|>OCR this image."),
    ("Free OCR", "<image>\nFree OCR."),
    ("Parse Figure", "<image>\nParse the figure."),
    ("Describe Image", "<image>\nDescribe this image in detail."),
];

/// Look up a built-in template by name, ignoring case and surrounding blanks.
pub fn preset(name: &str) -> Option<&'static str> {
    let wanted = name.trim();
    PRESETS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(wanted))
        .map(|(_, p)| *p)
}

/// Whether requests built from `prompt` must carry the page image.
pub fn references_image(prompt: &str) -> bool {
    prompt.contains(IMAGE_PLACEHOLDER)
}

/// The prompt text with image placeholders removed, for chat-style backends
/// that attach images out of band.
pub fn strip_image_placeholder(prompt: &str) -> String {
    prompt.replace(IMAGE_PLACEHOLDER, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_preset_is_first() {
        assert_eq!(PRESETS[0].1, DOCUMENT_TO_MARKDOWN);
        assert_eq!(preset(" free ocr "), Some("<image>\nFree OCR."));
        assert_eq!(preset("unknown"), None);
    }

    #[test]
    fn every_preset_references_the_image() {
        assert!(PRESETS.iter().all(|(_, p)| references_image(p)));
        assert!(!references_image("Summarise the text."));
    }

    #[test]
    fn placeholder_is_stripped() {
        assert_eq!(
            strip_image_placeholder(DOCUMENT_TO_MARKDOWN),
            "<|grounding|>Convert the document to markdown."
        );
    }
}
