//! Task prompts for digitizing directory pages.
//!
//! The JSON *shape* of the answer is enforced by the response schema sent
//! with every request (see [`crate::schema::PageShape::response_schema`]);
//! the prompt only explains how to read the page and how to fill the fields.
//!
//! Callers can override the default via [`crate::config::DigitizeConfig::prompt`];
//! the constant here is used only when no override is provided.
//!
//! Every prompt is rendered per request by [`render`]: the
//! [`TARGET_PAGE_PLACEHOLDER`] is replaced with where the target page sits in
//! the uploaded window.

use crate::pipeline::window::TargetOffset;

/// Marker replaced with the target page's position, e.g. `page 2 of the 3 attached pages`.
pub const TARGET_PAGE_PLACEHOLDER: &str = "{TARGET_PAGE}";

/// Default task prompt for a single directory page.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are digitizing a scanned page from a historical directory of pipeline construction projects. Extract every project entry on the page into the JSON structure you have been given.

Follow these rules precisely:

1. PAGE
   - "pgnum" is the page number printed on the page.
   - "yr" is the year the data describes, not the year the directory was published.

2. ENTRIES
   - One entry per project, in the order they appear on the page.
   - If several pages are attached, extract entries from {TARGET_PAGE} only; use the other pages only to complete an entry that continues across a page break.
   - "state_heading" is the state section heading the entry is listed under.
   - "project_num" is the project number printed for government projects.

3. ENUMERATED FIELDS
   - Use only the allowed values.
   - Use "UNK" when the information is present but illegible or ambiguous.
   - Use "NA" when the field does not apply to the entry.
   - "new_construction" is TRUE for new lines and extensions, FALSE for replacements, reconditioning or conversions.
   - "construction_complete" is TRUE only when the entry says the work is completed.

4. LENGTH
   - Length in miles as a number. Convert feet to miles.
   - Use -1 when the length is unknown and -2 when it does not apply.

5. OUTPUT
   - Transcribe company names and places exactly as printed.
   - Do NOT invent entries. Do NOT add commentary."#;

/// How the prompt refers to the target page.
pub fn target_page_phrase(target: TargetOffset) -> String {
    if target.window_len <= 1 {
        "the attached page".to_string()
    } else {
        format!(
            "page {} of the {} attached pages",
            target.position, target.window_len
        )
    }
}

/// Fill in the target position. A multi-page window whose prompt has no
/// placeholder gets the instruction appended.
pub fn render(template: &str, target: TargetOffset) -> String {
    let phrase = target_page_phrase(target);
    if template.contains(TARGET_PAGE_PLACEHOLDER) {
        template.replace(TARGET_PAGE_PLACEHOLDER, &phrase)
    } else if target.window_len > 1 {
        format!("{template}\n\nExtract entries from {phrase} only.")
    } else {
        template.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_mentions_sentinels() {
        assert!(DEFAULT_EXTRACTION_PROMPT.contains("\"UNK\""));
        assert!(DEFAULT_EXTRACTION_PROMPT.contains("\"NA\""));
        assert!(DEFAULT_EXTRACTION_PROMPT.contains("-1"));
    }

    #[test]
    fn render_names_target_position() {
        let last = render(DEFAULT_EXTRACTION_PROMPT, TargetOffset::within(10, 8, 10));
        assert!(last.contains("extract entries from page 3 of the 3 attached pages only"));
        assert!(!last.contains(TARGET_PAGE_PLACEHOLDER));

        let middle = render(DEFAULT_EXTRACTION_PROMPT, TargetOffset::within(10, 9, 11));
        assert!(middle.contains("page 2 of the 3 attached pages"));

        let single = render(DEFAULT_EXTRACTION_PROMPT, TargetOffset::within(4, 4, 4));
        assert!(single.contains("from the attached page only"));
    }

    #[test]
    fn custom_prompt_without_marker_gets_instruction() {
        assert_eq!(
            render("read it", TargetOffset::within(5, 4, 5)),
            "read it\n\nExtract entries from page 2 of the 2 attached pages only."
        );
        assert_eq!(render("read it", TargetOffset::within(5, 5, 5)), "read it");
    }
}
