/// Text cleanup helpers shared by the fetchers and the formatter.

/// Strips markup tags from a fragment and collapses whitespace.
pub fn strip_html(html: &str) -> String {
    let without_tags = html
        .chars()
        .fold((String::new(), false), |(mut out, in_tag), c| match c {
            '<' => (out, true),
            '>' => (out, false),
            _ if !in_tag => {
                out.push(c);
                (out, in_tag)
            }
            _ => (out, in_tag),
        })
        .0;

    unescape_entities(&without_tags)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves the handful of named entities that show up in feed summaries.
pub fn unescape_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

/// Truncates to `max_len` characters, appending `...` when anything was
/// cut. Operates on character boundaries so multi-byte text stays valid.
pub fn truncate(text: &str, max_len: usize) -> String {
    let count = text.chars().count();
    if count <= max_len {
        return text.to_string();
    }
    let suffix = "...";
    let keep = max_len.saturating_sub(suffix.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(suffix);
    out
}
