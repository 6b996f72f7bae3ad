/// Escape text for an HTML text node.
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escape text for a double-quoted attribute value.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Encode a page title for the `$1` slot of an article path: spaces become
/// underscores and URL-significant characters are percent-encoded. Non-ASCII
/// characters are kept as-is.
pub fn encode_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for ch in title.trim().chars() {
        match ch {
            ' ' => out.push('_'),
            '"' | '%' | '?' | '&' | '\'' | '<' | '>' | '\\' | '^' | '`' | '{' | '}' | '|'
            | '[' | ']' | '+' | '=' => {
                let mut buf = [0u8; 4];
                for byte in ch.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{byte:02X}"));
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Substitute an encoded title into a `$1` URL pattern.
pub fn expand_url_pattern(pattern: &str, title: &str) -> String {
    let encoded = encode_title(title);
    if pattern.contains("$1") {
        pattern.replace("$1", &encoded)
    } else {
        format!("{}/{}", pattern.trim_end_matches('/'), encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::{encode_title, escape_attr, escape_text, expand_url_pattern};

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(escape_text("a<b>&c"), "a&lt;b&gt;&amp;c");
        assert_eq!(escape_attr("say \"hi\" 'x'"), "say &quot;hi&quot; &#39;x&#39;");
    }

    #[test]
    fn encode_title_keeps_unicode_and_underscores_spaces() {
        assert_eq!(encode_title(" Main Page "), "Main_Page");
        assert_eq!(encode_title("A&B?"), "A%26B%3F");
        assert_eq!(encode_title("الصفحة الرئيسية"), "الصفحة_الرئيسية");
    }

    #[test]
    fn url_pattern_without_placeholder_appends_title() {
        assert_eq!(expand_url_pattern("/wiki/$1", "Foo bar"), "/wiki/Foo_bar");
        assert_eq!(expand_url_pattern("/media/", "Logo.png"), "/media/Logo.png");
    }
}
