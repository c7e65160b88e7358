//! Space-delimited scope strings (RFC 6749 §3.3).

use std::collections::BTreeSet;

/// An ordered, de-duplicated set of scope tokens.
pub type ScopeSet = BTreeSet<String>;

/// The scope that turns an OAuth request into an OpenID Connect one.
pub const OPENID: &str = "openid";

/// Parse a space-delimited scope parameter. Blank input yields an empty set.
#[must_use]
pub fn parse_scope(raw: &str) -> ScopeSet {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Render a scope set as the space-delimited wire form.
#[must_use]
pub fn format_scope(scopes: &ScopeSet) -> String {
    scopes.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}
