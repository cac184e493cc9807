/// Parse a positive `usize` from an environment variable.
///
/// Missing, unparsable and zero values all read as `None`.
pub(crate) fn positive_usize(name: &str) -> Option<usize> {
    parse_positive(std::env::var(name).ok().as_deref())
}

fn parse_positive(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|v| v.trim().parse::<usize>().ok()).filter(|&n| n > 0)
}
