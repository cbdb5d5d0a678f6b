//! Soft link resolution and mention extraction.

use std::collections::HashMap;

use crossref_graph::{Mention, MentionKind};
use crossref_types::{normalize_title, DocumentId, Uid};
use tracing::debug;

use crate::parser::{parse_links, plain_text, LinkSpan, LinkTarget};

/// Characters of surrounding text kept on each side of a link in an excerpt.
pub const EXCERPT_CONTEXT_CHARS: usize = 40;

/// Read access to node titles, supplied by whoever owns the index.
pub trait TitleLookup {
    /// Uids whose normalized title equals the normalized `title`, in uid
    /// order. With a scope, only uids of that document.
    fn find_by_title(&self, title: &str, scope: Option<&DocumentId>) -> Vec<Uid>;

    /// Current title of a node.
    fn title_of(&self, uid: &Uid) -> Option<String>;

    fn contains(&self, uid: &Uid) -> bool {
        self.title_of(uid).is_some()
    }
}

/// Outcome of resolving a soft link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Uid),
    /// More than one candidate. The caller has to choose.
    Ambiguous(Vec<Uid>),
    /// No candidate. The link stays as typed.
    Orphan,
}

/// Why a link produced no mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedReason {
    Orphan,
    Ambiguous(Vec<Uid>),
    MissingTarget(Uid),
}

/// A link that could not be turned into an edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedLink {
    pub source: Uid,
    /// Link markup as written.
    pub markup: String,
    pub reason: UnresolvedReason,
}

/// Mentions and unresolved links found in one body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyLinks {
    pub mentions: Vec<Mention>,
    pub unresolved: Vec<UnresolvedLink>,
}

pub struct LinkResolver<'a, L: TitleLookup + ?Sized> {
    lookup: &'a L,
}

impl<'a, L: TitleLookup + ?Sized> LinkResolver<'a, L> {
    pub fn new(lookup: &'a L) -> Self {
        Self { lookup }
    }

    /// Resolve a title reference: the scope document first, then all
    /// documents. Never picks among several candidates.
    pub fn resolve_soft_link(&self, text: &str, scope: Option<&DocumentId>) -> Resolution {
        if normalize_title(text).is_empty() {
            return Resolution::Orphan;
        }

        if let Some(scope) = scope {
            let local = self.lookup.find_by_title(text, Some(scope));
            match local.len() {
                0 => {}
                1 => return Resolution::Resolved(local[0].clone()),
                _ => return Resolution::Ambiguous(local),
            }
        }

        let mut global = self.lookup.find_by_title(text, None);
        match global.len() {
            0 => Resolution::Orphan,
            1 => Resolution::Resolved(global.remove(0)),
            _ => Resolution::Ambiguous(global),
        }
    }

    /// Resolve one parsed link to a target uid.
    pub fn resolve_span(&self, span: &LinkSpan, scope: Option<&DocumentId>) -> Result<Uid, UnresolvedReason> {
        match &span.target {
            LinkTarget::Hard { uid } => {
                if self.lookup.contains(uid) {
                    Ok(uid.clone())
                } else {
                    Err(UnresolvedReason::MissingTarget(uid.clone()))
                }
            }
            LinkTarget::Soft { title } => match self.resolve_soft_link(title, scope) {
                Resolution::Resolved(uid) => Ok(uid),
                Resolution::Ambiguous(candidates) => Err(UnresolvedReason::Ambiguous(candidates)),
                Resolution::Orphan => Err(UnresolvedReason::Orphan),
            },
        }
    }

    /// Turn every link in `source`'s body into a mention or an unresolved
    /// link. Links back to `source` itself are skipped. There is one
    /// mention per target: the first hard link to it if there is one,
    /// otherwise the first soft link.
    pub fn resolve_body(&self, source: &Uid, body: &str) -> BodyLinks {
        let mut result = BodyLinks::default();
        let mut by_target: HashMap<Uid, usize> = HashMap::new();
        let scope = source.document_id();

        for span in parse_links(body) {
            let target = match self.resolve_span(&span, Some(scope)) {
                Ok(target) => target,
                Err(reason) => {
                    result.unresolved.push(UnresolvedLink {
                        source: source.clone(),
                        markup: span.markup(body).to_string(),
                        reason,
                    });
                    continue;
                }
            };
            if &target == source {
                continue;
            }

            let kind = if span.is_soft() {
                MentionKind::Soft
            } else {
                MentionKind::Hard
            };
            match by_target.get(&target) {
                Some(&at)
                    if result.mentions[at].kind == MentionKind::Soft
                        && kind == MentionKind::Hard =>
                {
                    result.mentions[at].excerpt = self.excerpt(body, &span, &target);
                    result.mentions[at].kind = kind;
                }
                Some(_) => {}
                None => {
                    by_target.insert(target.clone(), result.mentions.len());
                    result.mentions.push(Mention {
                        source: source.clone(),
                        excerpt: self.excerpt(body, &span, &target),
                        target,
                        kind,
                    });
                }
            }
        }

        if !result.unresolved.is_empty() {
            debug!(
                source = %source,
                mentions = result.mentions.len(),
                unresolved = result.unresolved.len(),
                "Body has unresolved links"
            );
        }
        result
    }

    /// Text around a link with markup reduced to display text.
    fn excerpt(&self, body: &str, span: &LinkSpan, target: &Uid) -> String {
        let display = span
            .static_display()
            .map(str::to_string)
            .or_else(|| self.lookup.title_of(target))
            .unwrap_or_default();

        let before = plain_text(&body[..span.start]);
        let after = plain_text(&body[span.end..]);
        let text = format!(
            "{}{}{}",
            last_chars(&before, EXCERPT_CONTEXT_CHARS),
            display,
            first_chars(&after, EXCERPT_CONTEXT_CHARS)
        );
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

fn first_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn last_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}
