//! Display rendering and incremental hardening of link markup.

use crossref_types::DocumentId;

use crate::parser::{format_hard_link, parse_links, replace_spans, LinkTarget, MISSING_LINK_TEXT};
use crate::resolver::{LinkResolver, Resolution, TitleLookup};

/// Body as shown to a reader. Raw uids never appear: a hard link shows its
/// alias, else the target's current title, else [`MISSING_LINK_TEXT`].
pub fn render_body<L: TitleLookup + ?Sized>(body: &str, lookup: &L) -> String {
    let spans = parse_links(body);
    if spans.is_empty() {
        return body.to_string();
    }
    replace_spans(body, &spans, |span| {
        if let Some(alias) = &span.alias {
            return alias.clone();
        }
        match &span.target {
            LinkTarget::Soft { title } => title.clone(),
            LinkTarget::Hard { uid } => lookup
                .title_of(uid)
                .unwrap_or_else(|| MISSING_LINK_TEXT.to_string()),
        }
    })
}

/// Rewrite soft links that resolve to exactly one node into hard links,
/// keeping what the reader saw as the alias. Returns `None` when nothing
/// changes. Meant for one node at a time, when it is opened.
pub fn harden_body<L: TitleLookup + ?Sized>(
    body: &str,
    scope: &DocumentId,
    lookup: &L,
) -> Option<String> {
    let spans = parse_links(body);
    if !spans.iter().any(|s| s.is_soft()) {
        return None;
    }

    let resolver = LinkResolver::new(lookup);
    let mut changed = false;
    let hardened = replace_spans(body, &spans, |span| {
        let original = span.markup(body).to_string();
        let LinkTarget::Soft { title } = &span.target else {
            return original;
        };
        match resolver.resolve_soft_link(title, Some(scope)) {
            Resolution::Resolved(uid) => {
                changed = true;
                let display = span.alias.as_deref().unwrap_or(title);
                format_hard_link(&uid, Some(display))
            }
            Resolution::Ambiguous(_) | Resolution::Orphan => original,
        }
    });

    changed.then_some(hardened)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::Titles;

    fn doc(s: &str) -> DocumentId {
        DocumentId::parse(s).unwrap()
    }

    #[test]
    fn test_render_never_shows_uid() {
        let titles = Titles::default().with("D:B", "Beta");
        let rendered = render_body(
            "[[uid:D:B]] / [[uid:D:B|Bee]] / [[uid:D:GONE]] / [[uid:D:GONE|Old]] / [[Soft|Shown]] / [[Soft]]",
            &titles,
        );
        assert_eq!(rendered, "Beta / Bee / [missing link] / Old / Shown / Soft");
        assert!(!rendered.contains("uid:"));
    }

    #[test]
    fn test_harden_only_unambiguous() {
        let titles = Titles::default()
            .with("D:B", "Beta")
            .with("E:1", "Twin")
            .with("F:1", "Twin");
        let body = "see [[beta|the B]], [[Twin]], [[Nobody]] and [[Beta]]";
        let hardened = harden_body(body, &doc("D"), &titles).unwrap();
        assert_eq!(
            hardened,
            "see [[uid:D:B|the B]], [[Twin]], [[Nobody]] and [[uid:D:B|Beta]]"
        );
        // Rendering is unchanged by hardening.
        assert_eq!(render_body(&hardened, &titles), render_body(body, &titles));
    }

    #[test]
    fn test_harden_is_noop_when_nothing_resolves() {
        let titles = Titles::default().with("E:1", "Twin").with("F:1", "Twin");
        assert_eq!(harden_body("[[Twin]] [[uid:E:1]]", &doc("D"), &titles), None);
        assert_eq!(harden_body("plain", &doc("D"), &titles), None);
    }
}
