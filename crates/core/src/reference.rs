use core::fmt;
use percent_encoding::percent_decode_str;
use thiserror::Error;

/// A request path that could not be turned into a [`ParsedReference`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Nothing was left after stripping slashes and the query string.
    #[error("missing owner")]
    MissingOwner,

    /// A segment was empty (`a//b`), a `.`/`..` path component, or did not decode cleanly.
    #[error("invalid path segment '{segment}' in '{path}'")]
    InvalidSegment {
        /// The request path, without its query and outer slashes.
        path: String,
        /// The offending segment as it appeared in the request.
        segment: String,
    },

    /// A ref was given without a file path after it.
    #[error("missing file path after ref '{reference}' in '{path}'")]
    MissingFilePath {
        /// The request path, without its query and outer slashes.
        path: String,
        /// The ref that had no file after it.
        reference: String,
    },
}

/// An incoming request path split into the parts the upstream understands.
///
/// Empty strings stand for absent parts. `owner` is never empty and a non-empty
/// `path` always comes with a `repo` and a `ref`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedReference {
    owner: String,
    repo: String,
    reference: String,
    path: String,
}

impl ParsedReference {
    /// Parse a path of the shape `owner[/repo[/ref/path...]]`.
    ///
    /// Anything after a `?` is ignored, as are leading and trailing slashes.
    /// Segments are percent-decoded.
    pub fn parse(raw_path: &str) -> Result<Self, ParseError> {
        let without_query = raw_path.split_once('?').map_or(raw_path, |(p, _)| p);
        let trimmed = without_query.trim_matches('/');
        if trimmed.is_empty() {
            return Err(ParseError::MissingOwner);
        }

        let segments = trimmed
            .split('/')
            .map(|raw| decode_segment(trimmed, raw))
            .collect::<Result<Vec<_>, _>>()?;

        let mut segments = segments.into_iter();
        let owner = segments.next().unwrap_or_default();
        let repo = segments.next().unwrap_or_default();
        let reference = segments.next().unwrap_or_default();
        let path = segments.collect::<Vec<_>>().join("/");

        if !reference.is_empty() && path.is_empty() {
            return Err(ParseError::MissingFilePath {
                path: trimmed.to_owned(),
                reference,
            });
        }

        Ok(Self {
            owner,
            repo,
            reference,
            path,
        })
    }

    /// The account or organization name.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The repository name, empty for owner-level requests.
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// The branch, tag or commit, empty unless a file was requested.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// The file path inside the repository, without a leading slash.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this reference points at a repository.
    pub fn has_repo(&self) -> bool {
        !self.repo.is_empty()
    }

    /// Whether this reference points at a file inside a repository.
    pub fn has_path(&self) -> bool {
        !self.path.is_empty()
    }

    /// The extension of the requested file name, lowercased.
    ///
    /// Dotfiles such as `.gitignore` have no extension.
    pub fn extension(&self) -> Option<String> {
        let file_name = self.path.rsplit('/').next()?;
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
                Some(ext.to_ascii_lowercase())
            }
            _ => None,
        }
    }
}

/// Percent-decode one path segment, refusing anything that could change the shape of the path.
fn decode_segment(path: &str, raw: &str) -> Result<String, ParseError> {
    let invalid = || ParseError::InvalidSegment {
        path: path.to_owned(),
        segment: raw.to_owned(),
    };
    let decoded = percent_decode_str(raw).decode_utf8().map_err(|_| invalid())?;
    if decoded.is_empty() || decoded == "." || decoded == ".." || decoded.contains(['/', '\\']) {
        return Err(invalid());
    }
    Ok(decoded.into_owned())
}

impl fmt::Display for ParsedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.owner)?;
        for part in [&self.repo, &self.reference, &self.path] {
            if part.is_empty() {
                break;
            }
            write!(f, "/{part}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ParseError, ParsedReference};

    #[test]
    fn test_parse_owner_only() {
        let parsed = ParsedReference::parse("/torvalds").unwrap();
        assert_eq!(parsed.owner(), "torvalds");
        assert_eq!(parsed.repo(), "");
        assert!(!parsed.has_repo());
        assert!(!parsed.has_path());
    }

    #[test]
    fn test_parse_owner_and_repo() {
        let parsed = ParsedReference::parse("/torvalds/linux/").unwrap();
        assert_eq!(parsed.owner(), "torvalds");
        assert_eq!(parsed.repo(), "linux");
        assert_eq!(parsed.reference(), "");
        assert_eq!(parsed.path(), "");
    }

    #[test]
    fn test_parse_full_reference() {
        let parsed = ParsedReference::parse("/torvalds/linux/master/drivers/net/Kconfig").unwrap();
        assert_eq!(parsed.owner(), "torvalds");
        assert_eq!(parsed.repo(), "linux");
        assert_eq!(parsed.reference(), "master");
        assert_eq!(parsed.path(), "drivers/net/Kconfig");
    }

    #[test]
    fn test_parse_resplits_to_original_segments() {
        let raw = "owner/repo/v1.2.3/src/lib/index.js";
        let parsed = ParsedReference::parse(raw).unwrap();
        let rebuilt: Vec<&str> = [parsed.owner(), parsed.repo(), parsed.reference()]
            .into_iter()
            .chain(parsed.path().split('/'))
            .collect();
        assert_eq!(rebuilt, raw.split('/').collect::<Vec<_>>());
        assert_eq!(parsed.to_string(), raw);
    }

    #[test]
    fn test_parse_ignores_query() {
        let parsed = ParsedReference::parse("/a/b/main/c.js?minify&x=1").unwrap();
        assert_eq!(parsed.path(), "c.js");

        assert_eq!(
            ParsedReference::parse("?minify"),
            Err(ParseError::MissingOwner)
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(ParsedReference::parse("/"), Err(ParseError::MissingOwner));
        assert_eq!(ParsedReference::parse(""), Err(ParseError::MissingOwner));
        assert!(matches!(
            ParsedReference::parse("/a//b"),
            Err(ParseError::InvalidSegment { .. })
        ));
        assert!(matches!(
            ParsedReference::parse("/a/b/main/../../secret"),
            Err(ParseError::InvalidSegment { .. })
        ));
        assert!(matches!(
            ParsedReference::parse("/a/b/main"),
            Err(ParseError::MissingFilePath { .. })
        ));
    }

    #[test]
    fn test_parse_decodes_segments() {
        let parsed = ParsedReference::parse("/bann%65d/my%20repo/main/a%2Bb.txt").unwrap();
        assert_eq!(parsed.owner(), "banned");
        assert_eq!(parsed.repo(), "my repo");
        assert_eq!(parsed.path(), "a+b.txt");

        for path in ["/a/b/main/%2e%2E/x", "/a/b/main/x%2Fy", "/a/b/main/%ff", "/a/b/main/x%5Cy"] {
            assert!(
                matches!(
                    ParsedReference::parse(path),
                    Err(ParseError::InvalidSegment { .. })
                ),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn test_extension() {
        let ext = |p: &str| ParsedReference::parse(p).unwrap().extension();
        assert_eq!(ext("/a/b/main/dist/app.min.JS"), Some("js".to_owned()));
        assert_eq!(ext("/a/b/main/README"), None);
        assert_eq!(ext("/a/b/main/.gitignore"), None);
        assert_eq!(ext("/a/b/main/v1.0/Makefile"), None);
        assert_eq!(ext("/a/b"), None);
    }
}
