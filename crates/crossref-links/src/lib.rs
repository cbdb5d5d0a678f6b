//! # crossref-links
//!
//! Links inside node bodies: parsing the four markup forms, resolving
//! title references to uids, rendering for display and hardening soft
//! links into explicit uid links.
//!
//! Resolution never guesses. A title with several candidates is reported
//! as [`Resolution::Ambiguous`] and produces no edge.

pub mod parser;
pub mod render;
pub mod resolver;

pub use parser::{
    format_hard_link, parse_links, plain_text, LinkSpan, LinkTarget, HARD_LINK_PREFIX,
    MISSING_LINK_TEXT,
};
pub use render::{harden_body, render_body};
pub use resolver::{
    BodyLinks, LinkResolver, Resolution, TitleLookup, UnresolvedLink, UnresolvedReason,
    EXCERPT_CONTEXT_CHARS,
};
