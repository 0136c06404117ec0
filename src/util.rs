use itertools::Itertools;

pub fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Trim every name, drop the blank ones and join the rest with ", ".
/// Returns `None` when nothing is left.
pub fn join_names<S: AsRef<str>>(names: &[S]) -> Option<String> {
    let joined = names
        .iter()
        .map(|n| n.as_ref().trim())
        .filter(|n| !n.is_empty())
        .join(", ");

    match joined.len() {
        0 => None,
        _ => Some(joined),
    }
}

/// Render seconds as `m:ss`.
pub fn format_clock(total_secs: u32) -> String {
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}
