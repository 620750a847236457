//! Plain-prose rendering of assistant replies for synthesis.
//!
//! Chat replies are written for the screen: markdown emphasis, headings,
//! bullet lists, links and inline knowledge references. None of that should
//! be read aloud.

/// Convert a reply into text suitable for speech synthesis.
///
/// Applies, in order:
/// 1. Knowledge references `[[knowledge:id|Title]]` → `Title` (bare ids removed)
/// 2. Markdown links `[label](url)` → `label`
/// 3. Heading, quote and bullet prefixes removed per line
/// 4. Emphasis / code markers (`*`, `_`, `` ` ``, `~`) removed
/// 5. Whitespace collapsed, blank lines dropped
pub fn to_speech_text(text: &str) -> String {
    let text = strip_knowledge_refs(text);
    let text = strip_links(&text);

    let mut lines = Vec::new();
    for line in text.lines() {
        let line = strip_line_prefix(line.trim());
        let line: String = line
            .chars()
            .filter(|c| !matches!(c, '*' | '_' | '`' | '~'))
            .collect();
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}

fn strip_line_prefix(line: &str) -> &str {
    let line = line.trim_start_matches('#').trim_start_matches('>').trim_start();
    if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("+ "))
        .or_else(|| line.strip_prefix("・"))
    {
        return rest.trim_start();
    }
    // Ordered list: "12. item"
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0
        && let Some(rest) = line[digits..].strip_prefix(". ")
    {
        return rest.trim_start();
    }
    line
}

fn strip_knowledge_refs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("[[") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("]]") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let inner = &after[..end];
        if let Some((_, label)) = inner.split_once('|') {
            out.push_str(label.trim());
        } else if !inner.starts_with("knowledge:") {
            out.push_str(inner);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn strip_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find("](") else {
            break;
        };
        let Some(paren_end) = after[close + 2..].find(')') else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(&after[..close]);
        rest = &after[close + 2 + paren_end + 1..];
    }
    out.push_str(rest);
    out
}
