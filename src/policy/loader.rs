//! Ordered INI section reader for policy files.
//!
//! Policy files are plain INI: named sections of `key = value` pairs.
//! Section order is preserved because resolution is first-match-wins.

use std::path::Path;

use ini::{Ini, ParseOption, Properties};

use super::error::PolicyError;

/// One named section, in file order.
#[derive(Debug, Clone)]
pub struct Section<'a> {
    pub name: &'a str,
    properties: &'a Properties,
}

impl<'a> Section<'a> {
    /// Value of `key` with surrounding quotes removed.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.properties.get(key).map(unquote)
    }
}

/// Parsed policy file.
pub struct PolicyFile {
    ini: Ini,
}

impl PolicyFile {
    /// Read and parse an INI file.
    ///
    /// Backslashes are kept verbatim so regular expressions survive intact.
    pub fn read(path: &Path) -> Result<Self, PolicyError> {
        let options = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..Default::default()
        };
        let ini = Ini::load_from_file_opt(path, options).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { ini })
    }

    /// Parse INI text; used for inline configuration and tests.
    pub fn parse(content: &str) -> Result<Self, ini::ParseError> {
        let options = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..Default::default()
        };
        Ok(Self {
            ini: Ini::load_from_str_opt(content, options)?,
        })
    }

    /// Named sections in file order. Keys outside any section and sections
    /// with an empty name are skipped.
    pub fn sections(&self) -> impl Iterator<Item = Section<'_>> {
        self.ini.iter().filter_map(|(name, properties)| {
            let name = name?.trim();
            (!name.is_empty()).then_some(Section { name, properties })
        })
    }
}

/// Strip one pair of matching surrounding quotes.
fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_keep_file_order() {
        let file = PolicyFile::parse(
            "[zeta]\npattern = ^z\n\n[alpha]\npattern = ^a\n\n[mid]\npattern = .*\n",
        )
        .unwrap();
        let names: Vec<_> = file.sections().map(|s| s.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_values_are_unquoted_and_verbatim() {
        let file = PolicyFile::parse(
            "[carbon]\npattern = \"^carbon\\.agents\\.\"\nretentions = '60:90d'\n",
        )
        .unwrap();
        let section = file.sections().next().unwrap();
        assert_eq!(section.get("pattern"), Some(r"^carbon\.agents\."));
        assert_eq!(section.get("retentions"), Some("60:90d"));
        assert_eq!(section.get("missing"), None);
    }

    #[test]
    fn test_global_keys_are_ignored() {
        let file = PolicyFile::parse("stray = 1\n[only]\npattern = .*\n").unwrap();
        let names: Vec<_> = file.sections().map(|s| s.name).collect();
        assert_eq!(names, vec!["only"]);
    }

    #[test]
    fn test_comments_are_ignored() {
        let file = PolicyFile::parse("# header\n; note\n[a]\npattern = .*\n").unwrap();
        assert_eq!(file.sections().count(), 1);
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\".*\""), ".*");
        assert_eq!(unquote("'x'"), "x");
        assert_eq!(unquote("\"unbalanced"), "\"unbalanced");
        assert_eq!(unquote("  plain  "), "plain");
    }
}
