use async_trait::async_trait;
use bytes::Bytes;
use serde::de::IgnoredAny;
use thiserror::Error;

/// File extensions the built-in minifier knows how to handle.
pub const DEFAULT_MINIFY_EXTENSIONS: &[&str] =
    &["js", "mjs", "cjs", "css", "json", "html", "htm", "svg", "xml"];

/// Reasons a body could not be minified.
#[derive(Debug, Error)]
pub enum MinifyError {
    /// The body of a text format was not UTF-8.
    #[error("content is not valid UTF-8")]
    NotUtf8(#[from] core::str::Utf8Error),

    /// A JSON body did not parse.
    #[error("content is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A string, comment, tag or similar construct ran until the end of the body.
    #[error("unterminated {0}")]
    Unterminated(&'static str),

    /// No minifier exists for the extension.
    #[error("no minifier available for '.{0}' files")]
    Unsupported(String),
}

/// Shrinks a response body, keyed by file extension.
#[async_trait]
pub trait Minifier: Send + Sync {
    /// Minify `body`, treating it as a file with the given lowercased extension.
    async fn minify(&self, body: Bytes, extension: &str) -> Result<Bytes, MinifyError>;
}

/// Conservative whitespace and comment stripping for common web formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinMinifier;

#[async_trait]
impl Minifier for BuiltinMinifier {
    async fn minify(&self, body: Bytes, extension: &str) -> Result<Bytes, MinifyError> {
        if extension == "json" {
            return minify_json(&body).map(Bytes::from);
        }
        let source = core::str::from_utf8(&body)?;
        let minified = match extension {
            "js" | "mjs" | "cjs" => minify_js(source)?,
            "css" => minify_css(source)?,
            "html" | "htm" => minify_markup(source, false)?,
            "svg" | "xml" => minify_markup(source, true)?,
            other => return Err(MinifyError::Unsupported(other.to_owned())),
        };
        Ok(Bytes::from(minified))
    }
}

/// Strip whitespace outside of strings after making sure the document parses.
fn minify_json(body: &[u8]) -> Result<Vec<u8>, MinifyError> {
    serde_json::from_slice::<IgnoredAny>(body)?;
    let mut out = Vec::with_capacity(body.len());
    let mut in_string = false;
    let mut escaped = false;
    for &byte in body {
        if in_string {
            out.push(byte);
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
        } else if !byte.is_ascii_whitespace() {
            if byte == b'"' {
                in_string = true;
            }
            out.push(byte);
        }
    }
    Ok(out)
}

fn minify_css(source: &str) -> Result<String, MinifyError> {
    const TIGHT: &[char] = &['{', '}', ';', ','];

    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                skip_block_comment(&mut chars)?;
                pending_space = true;
            }
            '"' | '\'' => {
                flush_space(&mut out, &mut pending_space, c, TIGHT);
                copy_quoted(&mut out, &mut chars, c, "string")?;
            }
            c if c.is_whitespace() => pending_space = true,
            '}' if out.ends_with(';') => {
                out.pop();
                out.push('}');
                pending_space = false;
            }
            c => {
                flush_space(&mut out, &mut pending_space, c, TIGHT);
                out.push(c);
            }
        }
    }
    Ok(out)
}

fn flush_space(out: &mut String, pending: &mut bool, next: char, tight: &[char]) {
    if *pending
        && !out.is_empty()
        && !tight.contains(&next)
        && !out.ends_with(|c| tight.contains(&c))
    {
        out.push(' ');
    }
    *pending = false;
}

fn skip_block_comment(chars: &mut impl Iterator<Item = char>) -> Result<bool, MinifyError> {
    let mut saw_newline = false;
    let mut prev = '\0';
    for c in chars.by_ref() {
        if prev == '*' && c == '/' {
            return Ok(saw_newline);
        }
        saw_newline |= c == '\n';
        prev = c;
    }
    Err(MinifyError::Unterminated("comment"))
}

fn copy_quoted(
    out: &mut String,
    chars: &mut impl Iterator<Item = char>,
    quote: char,
    what: &'static str,
) -> Result<(), MinifyError> {
    out.push(quote);
    let mut escaped = false;
    for c in chars.by_ref() {
        out.push(c);
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Ok(());
        }
    }
    Err(MinifyError::Unterminated(what))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || !c.is_ascii()
}

/// Whether a `/` following `out` starts a regular expression literal rather than a division.
fn regex_allowed(out: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "return",
        "typeof",
        "instanceof",
        "case",
        "do",
        "else",
        "in",
        "of",
        "new",
        "delete",
        "void",
        "throw",
        "yield",
        "await",
    ];

    let trimmed = out.trim_end();
    if trimmed.ends_with("++") || trimmed.ends_with("--") {
        return false;
    }
    match trimmed.chars().next_back() {
        None => true,
        Some(')' | ']' | '}' | '"' | '\'' | '`') => false,
        Some(c) if is_word_char(c) => {
            let word_start = trimmed
                .char_indices()
                .rev()
                .take_while(|(_, c)| is_word_char(*c))
                .last()
                .map_or(0, |(i, _)| i);
            KEYWORDS.contains(&&trimmed[word_start..])
        }
        Some(_) => true,
    }
}

fn minify_js(source: &str) -> Result<String, MinifyError> {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    // None: no whitespace pending, Some(true): pending run contained a newline.
    let mut pending: Option<bool> = None;

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                pending = Some(true);
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let newline = skip_block_comment(&mut chars)?;
                pending = Some(pending.unwrap_or(false) || newline);
            }
            c if c.is_whitespace() => {
                pending = Some(pending.unwrap_or(false) || c == '\n');
            }
            c => {
                if let Some(newline) = pending.take()
                    && let Some(prev) = out.chars().next_back()
                {
                    if newline {
                        out.push('\n');
                    } else if (is_word_char(prev) && is_word_char(c))
                        || (prev == c && matches!(c, '+' | '-'))
                        || (prev.is_ascii_digit() && c == '.')
                    {
                        out.push(' ');
                    }
                }
                match c {
                    '"' | '\'' => copy_quoted(&mut out, &mut chars, c, "string")?,
                    '`' => copy_quoted(&mut out, &mut chars, c, "template literal")?,
                    '/' if regex_allowed(&out) => copy_regex(&mut out, &mut chars)?,
                    c => out.push(c),
                }
            }
        }
    }
    Ok(out)
}

fn copy_regex(out: &mut String, chars: &mut impl Iterator<Item = char>) -> Result<(), MinifyError> {
    out.push('/');
    let mut escaped = false;
    let mut in_class = false;
    for c in chars.by_ref() {
        out.push(c);
        match c {
            '\n' => break,
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => return Ok(()),
            _ => {}
        }
    }
    Err(MinifyError::Unterminated("regular expression"))
}

/// Collapse whitespace and drop comments in HTML, SVG or XML.
///
/// Contents of `pre`, `textarea`, `script` and `style` elements, CDATA sections and
/// processing instructions are copied verbatim.
/// With `drop_inter_tag_whitespace` whitespace-only text between two tags is removed.
fn minify_markup(source: &str, drop_inter_tag_whitespace: bool) -> Result<String, MinifyError> {
    const RAW_ELEMENTS: &[&str] = &["pre", "textarea", "script", "style"];

    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while !rest.is_empty() {
        if let Some(comment) = rest.strip_prefix("<!--") {
            let end = comment
                .find("-->")
                .ok_or(MinifyError::Unterminated("comment"))?;
            rest = &comment[end + 3..];
            continue;
        }

        // Character data and processing instructions are copied untouched.
        if let Some(len) = verbatim_length(rest, "<![CDATA[", "]]>", "CDATA section")
            .or_else(|| verbatim_length(rest, "<?", "?>", "processing instruction"))
            .transpose()?
        {
            out.push_str(&rest[..len]);
            rest = &rest[len..];
            continue;
        }

        if rest.starts_with('<') {
            let tag_len = tag_length(rest).ok_or(MinifyError::Unterminated("tag"))?;
            let (tag, after) = rest.split_at(tag_len);
            push_collapsed_tag(&mut out, tag);
            rest = after;

            let name: String = tag[1..]
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase();
            if RAW_ELEMENTS.contains(&name.as_str()) && !tag.ends_with("/>") {
                let closing = format!("</{name}");
                let end = find_ignore_ascii_case(rest, &closing)
                    .ok_or(MinifyError::Unterminated("element"))?;
                out.push_str(&rest[..end]);
                rest = &rest[end..];
            }
            continue;
        }

        let text_end = rest.find('<').unwrap_or(rest.len());
        let (text, after) = rest.split_at(text_end);
        rest = after;
        if text.trim().is_empty() {
            let between_tags = out.ends_with('>') && rest.starts_with('<');
            if !(drop_inter_tag_whitespace && between_tags) && !rest.is_empty() {
                push_space(&mut out);
            }
            continue;
        }
        if text.starts_with(char::is_whitespace) {
            push_space(&mut out);
        }
        for (i, word) in text.split_whitespace().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(word);
        }
        if text.ends_with(char::is_whitespace) && !rest.is_empty() {
            out.push(' ');
        }
    }
    Ok(out)
}

/// Length of the section at the start of `markup` opened by `open` and closed by `close`.
fn verbatim_length(
    markup: &str,
    open: &str,
    close: &str,
    what: &'static str,
) -> Option<Result<usize, MinifyError>> {
    let inner = markup.strip_prefix(open)?;
    Some(
        inner
            .find(close)
            .map(|end| open.len() + end + close.len())
            .ok_or(MinifyError::Unterminated(what)),
    )
}

/// Byte offset of the first ASCII case-insensitive match of `needle`.
///
/// `needle` must start with an ASCII character for the offset to be a char boundary.
fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

fn push_space(out: &mut String) {
    if !out.is_empty() && !out.ends_with(' ') {
        out.push(' ');
    }
}

/// Length of the tag at the start of `markup`, honouring quoted attribute values.
fn tag_length(markup: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in markup.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(i + 1),
            _ => {}
        }
    }
    None
}

fn push_collapsed_tag(out: &mut String, tag: &str) {
    let mut quote = None;
    let mut pending_space = false;
    for c in tag.chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c.is_whitespace() => pending_space = true,
            None => {
                if pending_space && !matches!(c, '>' | '/' | '=') && !out.ends_with('=') {
                    out.push(' ');
                }
                pending_space = false;
                if matches!(c, '"' | '\'') {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }
}
