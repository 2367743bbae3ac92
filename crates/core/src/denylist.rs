use crate::reference::ParsedReference;
use core::{fmt, str::FromStr};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// A single entry of the [`Denylist`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanRule {
    /// Bans every repository of an owner.
    Owner(String),
    /// Bans one repository of an owner.
    Repo(String, String),
}

/// A rule that could not be loaded.
#[derive(Debug, Error)]
pub enum BanRuleError {
    /// The owner was absent or empty.
    #[error("ban rule must have a non-empty owner")]
    MissingOwner,

    /// A repo key was given but left empty.
    #[error("ban rule for owner '{0}' has an empty repo")]
    EmptyRepo(String),

    /// A compact rule had more than one `/`.
    #[error("ban rule '{0}' must be of the form 'owner' or 'owner/repo'")]
    InvalidShape(String),

    /// The denylist file could not be read.
    #[error("failed to read denylist file: {0}")]
    Io(#[from] std::io::Error),

    /// The denylist file is not valid TOML or has unknown keys.
    #[error("failed to parse denylist file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Why a request was refused by the [`Denylist`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Banned {
    /// Matched an owner rule.
    #[error("banned owner: {0}")]
    Owner(String),

    /// Matched a repository rule.
    #[error("banned repo: {0}/{1}")]
    Repo(String, String),
}

impl BanRule {
    /// Build a rule from its loose key/value form.
    ///
    /// `owner` is required, `repo` is optional and neither may be empty.
    pub fn new(owner: Option<String>, repo: Option<String>) -> Result<Self, BanRuleError> {
        let owner = owner
            .filter(|o| !o.is_empty())
            .ok_or(BanRuleError::MissingOwner)?;
        match repo {
            None => Ok(Self::Owner(owner)),
            Some(repo) if repo.is_empty() => Err(BanRuleError::EmptyRepo(owner)),
            Some(repo) => Ok(Self::Repo(owner, repo)),
        }
    }

    fn matches(&self, reference: &ParsedReference, ignore_case: bool) -> Option<Banned> {
        let same = |rule: &str, requested: &str| {
            if ignore_case {
                rule.eq_ignore_ascii_case(requested)
            } else {
                rule == requested
            }
        };
        match self {
            Self::Owner(owner) if same(owner.as_str(), reference.owner()) => {
                Some(Banned::Owner(owner.clone()))
            }
            Self::Repo(owner, repo)
                if same(owner.as_str(), reference.owner()) && same(repo.as_str(), reference.repo()) =>
            {
                Some(Banned::Repo(owner.clone(), repo.clone()))
            }
            _ => None,
        }
    }
}

impl FromStr for BanRule {
    type Err = BanRuleError;

    /// Parse the compact `owner` or `owner/repo` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('/') {
            None => Self::new(Some(s.to_owned()), None),
            Some((_, repo)) if repo.contains('/') => Err(BanRuleError::InvalidShape(s.to_owned())),
            Some((owner, repo)) => Self::new(Some(owner.to_owned()), Some(repo.to_owned())),
        }
    }
}

impl fmt::Display for BanRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner(owner) => f.write_str(owner),
            Self::Repo(owner, repo) => write!(f, "{owner}/{repo}"),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBanRule {
    owner: Option<String>,
    repo: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DenylistFile {
    #[serde(default)]
    ban: Vec<RawBanRule>,
}

/// Ordered owner and repository bans, checked on every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Denylist {
    rules: Box<[BanRule]>,
    ignore_case: bool,
}

impl Denylist {
    /// Create a denylist from already validated rules, keeping their order.
    pub fn new(rules: impl IntoIterator<Item = BanRule>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
            ignore_case: false,
        }
    }

    /// Compare owner and repository names ASCII case-insensitively.
    ///
    /// Off by default, names must then match exactly.
    pub fn with_ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    /// Parse a TOML document made of `[[ban]]` tables.
    ///
    /// ```toml
    /// [[ban]]
    /// owner = "someone"
    ///
    /// [[ban]]
    /// owner = "someone-else"
    /// repo = "leaked-secrets"
    /// ```
    pub fn from_toml(document: &str) -> Result<Self, BanRuleError> {
        let file: DenylistFile = toml::from_str(document)?;
        let rules = file
            .ban
            .into_iter()
            .map(|raw| BanRule::new(raw.owner, raw.repo))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    /// Read and parse a denylist file, see [`Denylist::from_toml`].
    pub fn from_file(path: &Path) -> Result<Self, BanRuleError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// Append rules after the existing ones.
    pub fn extend(&mut self, rules: impl IntoIterator<Item = BanRule>) {
        self.rules = self.rules.iter().cloned().chain(rules).collect();
    }

    /// The rules in the order they are checked.
    pub fn rules(&self) -> &[BanRule] {
        &self.rules
    }

    /// Refuse the reference if any rule matches, reporting the first match.
    pub fn check(&self, reference: &ParsedReference) -> Result<(), Banned> {
        match self.rules.iter().find_map(|rule| rule.matches(reference, self.ignore_case)) {
            Some(banned) => Err(banned),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BanRule, BanRuleError, Banned, Denylist};
    use crate::reference::ParsedReference;

    fn reference(path: &str) -> ParsedReference {
        ParsedReference::parse(path).unwrap()
    }

    #[test]
    fn test_owner_rule_ignores_repo() {
        let denylist = Denylist::new([BanRule::Owner("bannedowner".into())]);
        assert_eq!(
            denylist.check(&reference("/bannedowner/anyrepo/main/x.js")),
            Err(Banned::Owner("bannedowner".into()))
        );
        assert!(denylist.check(&reference("/bannedowner")).is_err());
        assert!(denylist.check(&reference("/someone/anyrepo")).is_ok());
    }

    #[test]
    fn test_case_sensitivity() {
        let rules = [
            BanRule::Owner("bannedowner".into()),
            BanRule::Repo("someone".into(), "Secret".into()),
        ];
        let exact = Denylist::new(rules.clone());
        assert!(exact.check(&reference("/BannedOwner/x")).is_ok());
        assert!(exact.check(&reference("/someone/secret")).is_ok());

        let folded = Denylist::new(rules).with_ignore_case(true);
        assert_eq!(
            folded.check(&reference("/BannedOwner/x")),
            Err(Banned::Owner("bannedowner".into()))
        );
        assert_eq!(
            folded.check(&reference("/SomeOne/SECRET/main/a.txt")),
            Err(Banned::Repo("someone".into(), "Secret".into()))
        );
        assert!(folded.check(&reference("/someone/secrets")).is_ok());
    }

    #[test]
    fn test_repo_rule_needs_both() {
        let denylist = Denylist::new([BanRule::Repo("owner".into(), "secret".into())]);
        assert_eq!(
            denylist.check(&reference("/owner/secret/main/a.txt")),
            Err(Banned::Repo("owner".into(), "secret".into()))
        );
        assert!(denylist.check(&reference("/owner/public/main/a.txt")).is_ok());
        assert!(denylist.check(&reference("/owner")).is_ok());
        assert!(denylist.check(&reference("/other/secret")).is_ok());
    }

    #[test]
    fn test_first_match_wins() {
        let repo_first = Denylist::new([
            BanRule::Repo("owner".into(), "repo".into()),
            BanRule::Owner("owner".into()),
        ]);
        let owner_first = Denylist::new([
            BanRule::Owner("owner".into()),
            BanRule::Repo("owner".into(), "repo".into()),
        ]);
        let target = reference("/owner/repo");
        assert_eq!(
            repo_first.check(&target),
            Err(Banned::Repo("owner".into(), "repo".into()))
        );
        assert_eq!(owner_first.check(&target), Err(Banned::Owner("owner".into())));
    }

    #[test]
    fn test_from_toml() {
        let denylist = Denylist::from_toml(
            r#"
            [[ban]]
            owner = "a"

            [[ban]]
            owner = "b"
            repo = "c"
            "#,
        )
        .unwrap();
        assert_eq!(
            denylist.rules(),
            &[BanRule::Owner("a".into()), BanRule::Repo("b".into(), "c".into())]
        );
        assert_eq!(Denylist::from_toml("").unwrap(), Denylist::default());
    }

    #[test]
    fn test_from_toml_rejects_malformed_rules() {
        assert!(matches!(
            Denylist::from_toml("[[ban]]\nrepo = \"c\"\n"),
            Err(BanRuleError::MissingOwner)
        ));
        assert!(matches!(
            Denylist::from_toml("[[ban]]\nowner = \"a\"\nbranch = \"main\"\n"),
            Err(BanRuleError::Toml(_))
        ));
        assert!(matches!(
            Denylist::from_toml("[[ban]]\nowner = \"a\"\nrepo = \"\"\n"),
            Err(BanRuleError::EmptyRepo(_))
        ));
    }

    #[test]
    fn test_compact_form() {
        assert_eq!("a".parse::<BanRule>().unwrap(), BanRule::Owner("a".into()));
        assert_eq!(
            "a/b".parse::<BanRule>().unwrap(),
            BanRule::Repo("a".into(), "b".into())
        );
        assert!("a/b/c".parse::<BanRule>().is_err());
        assert!("/b".parse::<BanRule>().is_err());
        assert!("a/".parse::<BanRule>().is_err());
        assert_eq!("a/b".parse::<BanRule>().unwrap().to_string(), "a/b");
    }

    #[test]
    fn test_extend_keeps_order() {
        let mut denylist = Denylist::new([BanRule::Owner("a".into())]);
        denylist.extend([BanRule::Owner("b".into())]);
        assert_eq!(
            denylist.rules(),
            &[BanRule::Owner("a".into()), BanRule::Owner("b".into())]
        );
    }
}
