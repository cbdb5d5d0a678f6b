//! Link markup parsing.
//!
//! Four forms are recognized in a single pass:
//!
//! ```text
//! [[Some Title]]
//! [[Some Title|Display Text]]
//! [[uid:DOCUMENT_ID:NODE_GUID]]
//! [[uid:DOCUMENT_ID:NODE_GUID|Display Text]]
//! ```
//!
//! Anything else between double brackets is literal text.

use std::sync::LazyLock;

use regex::Regex;

use crossref_types::{DocumentId, NodeGuid, Uid};

/// Prefix that marks a hard link target.
pub const HARD_LINK_PREFIX: &str = "uid:";

/// Rendered in place of a hard link whose target no longer exists.
pub const MISSING_LINK_TEXT: &str = "[missing link]";

const LINK_PATTERN: &str = r"\[\[(?:uid:(?P<doc>[A-Za-z0-9_-]+):(?P<guid>[A-Za-z0-9_-]+)|(?P<title>[^\[\]|\r\n]+?))(?:\|(?P<alias>[^\[\]|\r\n]+?))?\]\]";

static LINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(LINK_PATTERN).expect("link pattern is valid"));

/// What a link points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Title reference, resolved by lookup
    Soft { title: String },
    /// Explicit uid
    Hard { uid: Uid },
}

/// One link found in a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpan {
    /// Byte offset of the opening `[[`.
    pub start: usize,
    /// Byte offset just past the closing `]]`.
    pub end: usize,
    pub target: LinkTarget,
    pub alias: Option<String>,
}

impl LinkSpan {
    /// The raw markup of this link within `body`.
    pub fn markup<'b>(&self, body: &'b str) -> &'b str {
        &body[self.start..self.end]
    }

    /// Display text known without any lookup: the alias, or the typed title.
    pub fn static_display(&self) -> Option<&str> {
        match (&self.alias, &self.target) {
            (Some(alias), _) => Some(alias),
            (None, LinkTarget::Soft { title }) => Some(title),
            (None, LinkTarget::Hard { .. }) => None,
        }
    }

    pub fn is_soft(&self) -> bool {
        matches!(self.target, LinkTarget::Soft { .. })
    }
}

/// Find every well-formed link in `body`, in order of appearance.
pub fn parse_links(body: &str) -> Vec<LinkSpan> {
    if !body.contains("[[") {
        return Vec::new();
    }

    let mut spans = Vec::new();
    for caps in LINK_REGEX.captures_iter(body) {
        let Some(whole) = caps.get(0) else {
            continue;
        };

        let alias = caps
            .name("alias")
            .map(|m| m.as_str().trim())
            .filter(|a| !a.is_empty())
            .map(str::to_string);

        let target = match (caps.name("doc"), caps.name("guid"), caps.name("title")) {
            (Some(doc), Some(guid), _) => {
                match (DocumentId::parse(doc.as_str()), NodeGuid::parse(guid.as_str())) {
                    (Ok(doc), Ok(guid)) => LinkTarget::Hard {
                        uid: Uid::new(doc, guid),
                    },
                    _ => continue,
                }
            }
            (_, _, Some(title)) => {
                let title = title.as_str().trim();
                // A malformed hard link falls through to the title branch.
                if title.is_empty() || title.starts_with(HARD_LINK_PREFIX) {
                    continue;
                }
                LinkTarget::Soft {
                    title: title.to_string(),
                }
            }
            _ => continue,
        };

        spans.push(LinkSpan {
            start: whole.start(),
            end: whole.end(),
            target,
            alias,
        });
    }
    spans
}

/// Body with every link replaced by the display text known without lookup.
/// Hard links without an alias contribute nothing.
pub fn plain_text(body: &str) -> String {
    let spans = parse_links(body);
    if spans.is_empty() {
        return body.to_string();
    }
    replace_spans(body, &spans, |span| {
        span.static_display().unwrap_or_default().to_string()
    })
}

/// Rebuild `body` with each span replaced by `f(span)`.
pub(crate) fn replace_spans<F>(body: &str, spans: &[LinkSpan], mut f: F) -> String
where
    F: FnMut(&LinkSpan) -> String,
{
    let mut out = String::with_capacity(body.len());
    let mut cursor = 0;
    for span in spans {
        out.push_str(&body[cursor..span.start]);
        out.push_str(&f(span));
        cursor = span.end;
    }
    out.push_str(&body[cursor..]);
    out
}

/// Hard-link markup for `uid`, with an optional alias.
pub fn format_hard_link(uid: &Uid, alias: Option<&str>) -> String {
    match alias {
        Some(alias) => format!("[[{}{}|{}]]", HARD_LINK_PREFIX, uid, alias),
        None => format!("[[{}{}]]", HARD_LINK_PREFIX, uid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(body: &str) -> Vec<(LinkTarget, Option<String>)> {
        parse_links(body)
            .into_iter()
            .map(|s| (s.target, s.alias))
            .collect()
    }

    fn soft(title: &str) -> LinkTarget {
        LinkTarget::Soft {
            title: title.to_string(),
        }
    }

    fn hard(uid: &str) -> LinkTarget {
        LinkTarget::Hard {
            uid: Uid::parse(uid).unwrap(),
        }
    }

    #[test]
    fn test_all_four_forms_in_one_body() {
        let body = "a [[Beta]] b [[Gamma|the g]] c [[uid:D1:N2]] d [[uid:D1:N3|Shown]]";
        assert_eq!(
            targets(body),
            vec![
                (soft("Beta"), None),
                (soft("Gamma"), Some("the g".to_string())),
                (hard("D1:N2"), None),
                (hard("D1:N3"), Some("Shown".to_string())),
            ]
        );
    }

    #[test]
    fn test_spans_cover_markup() {
        let body = "see [[Beta]] now";
        let spans = parse_links(body);
        assert_eq!(spans[0].markup(body), "[[Beta]]");
    }

    #[test]
    fn test_malformed_is_literal() {
        assert!(parse_links("[[]]").is_empty());
        assert!(parse_links("[[   ]]").is_empty());
        assert!(parse_links("[[uid:bad id:X]]").is_empty());
        assert!(parse_links("[[uid:D1]]").is_empty());
        assert!(parse_links("[[uid:D1:N1 trailing]]").is_empty());
        assert!(parse_links("[[line\nbreak]]").is_empty());
        assert!(parse_links("[single]").is_empty());
        assert!(parse_links("[[unclosed").is_empty());
        assert!(parse_links("[[a|b|c]]").is_empty());
    }

    #[test]
    fn test_nested_brackets_match_innermost() {
        assert_eq!(targets("[[outer [[inner]] tail]]"), vec![(soft("inner"), None)]);
    }

    #[test]
    fn test_blank_alias_is_dropped() {
        assert_eq!(targets("[[Beta| ]]"), vec![(soft("Beta"), None)]);
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(
            plain_text("x [[Beta]] y [[uid:D:N|Shown]] z [[uid:D:M]]!"),
            "x Beta y Shown z !"
        );
        assert_eq!(plain_text("no links"), "no links");
    }

    #[test]
    fn test_format_hard_link_parses_back() {
        let uid = Uid::parse("D1:N1").unwrap();
        let markup = format_hard_link(&uid, Some("Alpha"));
        assert_eq!(markup, "[[uid:D1:N1|Alpha]]");
        assert_eq!(targets(&markup), vec![(hard("D1:N1"), Some("Alpha".into()))]);
    }
}
