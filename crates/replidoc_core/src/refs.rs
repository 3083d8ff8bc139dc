//! Markup reference extraction.
//!
//! `refs` and `attachment_refs` on a document are derived, not authored:
//! the replica recomputes them from the markup on every save. The
//! parser itself is a collaborator consumed through [`RefExtractor`];
//! the default implementation recognizes `[[id]]` document links and
//! `![[id]]` attachment embeds.

use regex::Regex;

use crate::attachment::AttachmentId;
use crate::document::DocumentId;

/// References extracted from a markup body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedRefs {
    /// Referenced document ids, in order of first appearance
    pub refs: Vec<DocumentId>,
    /// Referenced attachment ids, in order of first appearance
    pub attachment_refs: Vec<AttachmentId>,
}

/// Extracts referenced ids from a markup body.
///
/// Implementations must be pure: same markup in, same refs out.
pub trait RefExtractor {
    /// Extract document and attachment references from `markup`
    fn extract(&self, markup: &str) -> ExtractedRefs;
}

/// Default extractor for the `[[id]]` / `![[id]]` link syntax.
pub struct MarkupRefExtractor {
    link: Regex,
}

impl MarkupRefExtractor {
    /// Build the extractor
    pub fn new() -> Self {
        // the leading `!` marks an attachment embed
        let link = Regex::new(r"(!)?\[\[([a-z0-9]+)\]\]").expect("static regex");
        MarkupRefExtractor { link }
    }
}

impl Default for MarkupRefExtractor {
    fn default() -> Self {
        MarkupRefExtractor::new()
    }
}

impl RefExtractor for MarkupRefExtractor {
    fn extract(&self, markup: &str) -> ExtractedRefs {
        let mut extracted = ExtractedRefs::default();

        for capture in self.link.captures_iter(markup) {
            let id = &capture[2];

            if capture.get(1).is_some() {
                let id = AttachmentId::from(id);
                if !extracted.attachment_refs.contains(&id) {
                    extracted.attachment_refs.push(id);
                }
            } else {
                let id = DocumentId::from(id);
                if !extracted.refs.contains(&id) {
                    extracted.refs.push(id);
                }
            }
        }

        extracted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_document_and_attachment_refs() {
        let extractor = MarkupRefExtractor::new();
        let refs = extractor.extract("see [[doc1]] and ![[att1]], also [[doc2]]");

        assert_eq!(refs.refs, vec![DocumentId::from("doc1"), DocumentId::from("doc2")]);
        assert_eq!(refs.attachment_refs, vec![AttachmentId::from("att1")]);
    }

    #[test]
    fn deduplicates_preserving_order() {
        let extractor = MarkupRefExtractor::new();
        let refs = extractor.extract("[[b]] [[a]] [[b]] ![[x]] ![[x]]");

        assert_eq!(refs.refs, vec![DocumentId::from("b"), DocumentId::from("a")]);
        assert_eq!(refs.attachment_refs, vec![AttachmentId::from("x")]);
    }

    #[test]
    fn empty_markup_has_no_refs() {
        let extractor = MarkupRefExtractor::new();
        assert_eq!(extractor.extract(""), ExtractedRefs::default());
    }
}
