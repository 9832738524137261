//! Parsers for `lxc` text output.
//!
//! CLI text is a de facto API, so all scraping is concentrated here behind
//! documented contracts with explicit fallbacks: a parse miss yields `None`
//! and callers degrade to `Unknown`/`false` rather than raising.

/// Extracts the value of a `Field:` line from `lxc info` output.
///
/// Input: the full stdout of `lxc info <name>`. Output: the trimmed text
/// after the first line whose trimmed form starts with `field_name`
/// (including the colon), or `None` when no such line exists or the value
/// is empty.
pub(crate) fn field_value<'a>(text: &'a str, field_name: &str) -> Option<&'a str> {
    text.lines()
        .find_map(|line| line.trim_start().strip_prefix(field_name))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Extracts the `Status:` field from `lxc info` output.
pub(crate) fn status_field(text: &str) -> Option<&str> {
    field_value(text, "Status:")
}

/// Extracts the `Type:` field from `lxc info` output.
pub(crate) fn type_field(text: &str) -> Option<&str> {
    field_value(text, "Type:")
}

/// Extracts the address from `lxc list <name> -c 4 --format csv` output.
///
/// Input: CSV with the IPv4 column only; the cell looks like
/// `10.110.0.4 (eth0)`. Output: the first whitespace-separated token of the
/// first cell of the first row, or `None` when the listing is empty.
pub(crate) fn first_address(csv: &str) -> Option<&str> {
    csv.lines()
        .next()?
        .split(',')
        .next()?
        .split_whitespace()
        .next()
}
