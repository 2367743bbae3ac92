use mime::Mime;
use url::Url;

/// Secondary classifications appended to textual content types by default.
pub const DEFAULT_EXTRA_CLASSIFICATIONS: &[(&str, &str)] = &[
    ("text/plain", "charset=utf-8"),
    ("text/html", "charset=utf-8"),
    ("text/css", "charset=utf-8"),
    ("text/javascript", "charset=utf-8"),
    ("text/markdown", "charset=utf-8"),
    ("text/xml", "charset=utf-8"),
    ("application/javascript", "charset=utf-8"),
    ("application/json", "charset=utf-8"),
    ("application/xml", "charset=utf-8"),
    ("image/svg+xml", "charset=utf-8"),
];

/// The content type sent to the client and the extension used to pick a minifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeDecision {
    /// Value of the `Content-Type` response header. May be empty.
    pub content_type: String,
    /// Lowercased file extension, if one could be found.
    pub extension: Option<String>,
}

/// Reconciles the upstream `Content-Type`, the upstream file name and an
/// auxiliary classification table.
#[derive(Debug, Clone)]
pub struct MimeResolver {
    extra_classifications: Box<[(String, String)]>,
}

impl Default for MimeResolver {
    fn default() -> Self {
        Self::new(
            DEFAULT_EXTRA_CLASSIFICATIONS
                .iter()
                .map(|(mime, extra)| ((*mime).to_owned(), (*extra).to_owned())),
        )
    }
}

impl MimeResolver {
    /// Create a resolver with the given `(mime essence, classification)` pairs.
    pub fn new(extra_classifications: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            extra_classifications: extra_classifications
                .into_iter()
                .map(|(mime, extra)| (mime.to_ascii_lowercase(), extra))
                .collect(),
        }
    }

    /// Decide the final content type of an upstream file.
    ///
    /// The type guessed from the upstream file name always takes precedence over
    /// the upstream header. The extension comes from `path_hint` when it has one,
    /// otherwise from the final content type.
    pub fn resolve(
        &self,
        upstream_content_type: Option<&str>,
        upstream_url: &str,
        path_hint: Option<&str>,
    ) -> MimeDecision {
        let mut content_type = upstream_content_type.unwrap_or_default().trim().to_owned();
        let extra = self.extra_classification(&content_type);

        if let Some(guessed) = guess_from_url(upstream_url) {
            content_type = guessed.essence_str().to_owned();
        }

        if let Some(extra) = extra
            && !has_parameter(&content_type, extra)
        {
            content_type = format!("{content_type}; {extra}");
        }

        let extension = path_hint
            .filter(|ext| !ext.is_empty())
            .map(str::to_ascii_lowercase)
            .or_else(|| {
                mime_guess::get_mime_extensions_str(&essence(&content_type))
                    .and_then(|exts| exts.first())
                    .map(|ext| (*ext).to_owned())
            });

        MimeDecision {
            content_type,
            extension,
        }
    }

    fn extra_classification(&self, content_type: &str) -> Option<&str> {
        if content_type.is_empty() {
            return None;
        }
        let essence = essence(content_type);
        self.extra_classifications
            .iter()
            .find(|(mime, _)| *mime == essence)
            .map(|(_, extra)| extra.as_str())
    }
}

/// The `type/subtype` part of a content type, lowercased.
pub fn essence(content_type: &str) -> String {
    match content_type.parse::<Mime>() {
        Ok(mime) => mime.essence_str().to_owned(),
        Err(_) => content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase(),
    }
}

fn has_parameter(content_type: &str, parameter: &str) -> bool {
    content_type
        .split(';')
        .skip(1)
        .any(|p| p.trim().eq_ignore_ascii_case(parameter.trim()))
}

fn guess_from_url(upstream_url: &str) -> Option<Mime> {
    let file_name = match Url::parse(upstream_url) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::to_owned),
        Err(_) => upstream_url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .map(str::to_owned),
    }?;
    mime_guess::from_path(file_name).first()
}

#[cfg(test)]
mod tests {
    use super::{MimeDecision, MimeResolver, essence};

    const RAW: &str = "https://raw.githubusercontent.com/o/r/main";

    #[test]
    fn test_extension_guess_beats_header() {
        let resolver = MimeResolver::default();
        let decision = resolver.resolve(Some("text/plain"), &format!("{RAW}/logo.svg"), None);
        assert!(decision.content_type.starts_with("image/svg+xml"));
        assert_eq!(decision.content_type, "image/svg+xml; charset=utf-8");
        assert_eq!(decision.extension.as_deref(), Some("svg"));
    }

    #[test]
    fn test_header_kept_without_extension() {
        let resolver = MimeResolver::default();
        let decision = resolver.resolve(
            Some("text/plain; charset=utf-8"),
            "https://raw.githubusercontent.com/torvalds/linux/master/README",
            None,
        );
        assert_eq!(decision.content_type, "text/plain; charset=utf-8");
        // First extension mime_guess lists for text/plain, never a minifiable one.
        assert_eq!(decision.extension.as_deref(), Some("asm"));
        assert!(!crate::DEFAULT_MINIFY_EXTENSIONS.contains(&"asm"));

        let decision = resolver.resolve(
            Some("application/json"),
            "https://raw.githubusercontent.com/o/r/main/LICENSE",
            None,
        );
        assert_eq!(decision.extension.as_deref(), Some("json"));
    }

    #[test]
    fn test_extra_appended_to_guess() {
        let resolver = MimeResolver::default();
        let decision = resolver.resolve(
            Some("text/plain; charset=utf-8"),
            &format!("{RAW}/style.css"),
            Some("css"),
        );
        assert_eq!(decision.content_type, "text/css; charset=utf-8");
        assert_eq!(decision.extension.as_deref(), Some("css"));
    }

    #[test]
    fn test_no_extra_for_binary_header() {
        let resolver = MimeResolver::default();
        let decision = resolver.resolve(
            Some("application/octet-stream"),
            &format!("{RAW}/image.png"),
            Some("png"),
        );
        assert_eq!(decision.content_type, "image/png");
    }

    #[test]
    fn test_path_hint_wins_for_extension() {
        let resolver = MimeResolver::default();
        let decision = resolver.resolve(
            Some("text/plain"),
            &format!("{RAW}/data.json"),
            Some("JSON"),
        );
        assert_eq!(decision.extension.as_deref(), Some("json"));
        assert_eq!(decision.content_type, "application/json; charset=utf-8");
    }

    #[test]
    fn test_empty_in_empty_out() {
        let resolver = MimeResolver::default();
        assert_eq!(
            resolver.resolve(None, "https://raw.githubusercontent.com/o", None),
            MimeDecision {
                content_type: String::new(),
                extension: None,
            }
        );
    }

    #[test]
    fn test_query_is_ignored_in_url() {
        let resolver = MimeResolver::new([]);
        let decision = resolver.resolve(None, &format!("{RAW}/index.html?token=abc"), None);
        assert_eq!(decision.content_type, "text/html");
    }

    #[test]
    fn test_idempotent() {
        let resolver = MimeResolver::default();
        let url = format!("{RAW}/src/main.css");
        assert_eq!(
            resolver.resolve(Some("text/plain"), &url, Some("css")),
            resolver.resolve(Some("text/plain"), &url, Some("css")),
        );
    }

    #[test]
    fn test_custom_table() {
        let resolver = MimeResolver::new([("Text/Plain".to_owned(), "x-source=true".to_owned())]);
        let decision = resolver.resolve(Some("text/plain"), &format!("{RAW}/Makefile"), None);
        assert_eq!(decision.content_type, "text/plain; x-source=true");
    }

    #[test]
    fn test_essence() {
        assert_eq!(essence("Text/HTML; charset=UTF-8"), mime::TEXT_HTML.essence_str());
        assert_eq!(essence(""), "");
    }
}
