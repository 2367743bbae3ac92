use crate::reference::ParsedReference;
use anyhow::{Result, bail};
use core::{fmt, str::FromStr};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use url::Url;

// Characters that cannot appear verbatim inside a single URL path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Raw-content URL convention used when no other template is configured.
pub const DEFAULT_UPSTREAM_TEMPLATE: &str =
    "https://raw.githubusercontent.com/{owner}/{repo}/{ref}/{path}";

/// Builds upstream fetch URLs out of a [`ParsedReference`].
///
/// Supports the `{owner}`, `{repo}`, `{ref}` and `{path}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    template: String,
}

impl UrlTemplate {
    /// Validate and wrap a template.
    ///
    /// The template must contain `{owner}` and expand into an absolute http(s) URL.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = Self {
            template: template.into(),
        };
        if !template.template.contains("{owner}") {
            bail!(
                "upstream template '{}' is missing the {{owner}} placeholder",
                template.template
            );
        }
        let sample = template.resolve(&ParsedReference::parse("owner/repo/ref/file.txt")?);
        let url = Url::parse(&sample)?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!(
                "upstream template '{}' must use the http or https scheme",
                template.template
            );
        }
        Ok(template)
    }

    /// Expand the template for the given reference.
    ///
    /// Every part is percent-encoded per path segment. Absent parts expand to
    /// nothing and any trailing slashes they leave behind are removed.
    pub fn resolve(&self, reference: &ParsedReference) -> String {
        let path = reference
            .path()
            .split('/')
            .map(encode_segment)
            .collect::<Vec<_>>()
            .join("/");
        let expanded = self
            .template
            .replace("{owner}", &encode_segment(reference.owner()))
            .replace("{repo}", &encode_segment(reference.repo()))
            .replace("{ref}", &encode_segment(reference.reference()))
            .replace("{path}", &path);
        expanded.trim_end_matches('/').to_owned()
    }
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

impl Default for UrlTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_UPSTREAM_TEMPLATE.to_owned(),
        }
    }
}

impl FromStr for UrlTemplate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}
