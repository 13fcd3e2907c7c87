//! Output file naming.
//!
//! A name pattern is a template with placeholders:
//!
//! - `{index}` / `{index:03}` - the block's 1-based ordinal, optionally zero-padded
//! - `{stem}` - source file name without extension
//! - `{ext}` - extension of the output format
//!
//! Every pattern must contain an `{index}` placeholder, which keeps names
//! within one run pairwise distinct.

use crate::error::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([a-z]+)(?::0?(\d+))?\}").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Index { width: usize },
    Stem,
    Ext,
}

/// A parsed output name template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePattern {
    source: String,
    parts: Vec<Part>,
}

impl NamePattern {
    /// Default template: source stem plus a three-digit ordinal.
    pub const DEFAULT: &'static str = "{stem}_{index:03}.{ext}";

    /// Parse a template.
    pub fn parse(pattern: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = Vec::new();
        let mut last = 0;
        let mut has_index = false;

        for caps in PLACEHOLDER.captures_iter(pattern) {
            let whole = caps.get(0).ok_or_else(|| invalid("malformed placeholder"))?;
            if whole.start() > last {
                parts.push(Part::Literal(pattern[last..whole.start()].to_string()));
            }
            let width = caps.get(2).map(|w| w.as_str().parse::<usize>());
            let part = match (&caps[1], width) {
                ("index", None) => Part::Index { width: 0 },
                ("index", Some(Ok(width))) if width <= 12 => Part::Index { width },
                ("index", Some(_)) => return Err(invalid("index width must be at most 12")),
                ("stem", None) => Part::Stem,
                ("ext", None) => Part::Ext,
                (name, _) => return Err(invalid(&format!("unknown placeholder '{}'", name))),
            };
            has_index |= matches!(part, Part::Index { .. });
            parts.push(part);
            last = whole.end();
        }
        if last < pattern.len() {
            parts.push(Part::Literal(pattern[last..].to_string()));
        }

        if !has_index {
            return Err(invalid("pattern must contain an {index} placeholder"));
        }
        let stray = parts.iter().any(|p| match p {
            Part::Literal(s) => s.contains('{') || s.contains('}'),
            _ => false,
        });
        if stray {
            return Err(invalid("unbalanced or malformed braces"));
        }

        Ok(Self {
            source: pattern.to_string(),
            parts,
        })
    }

    /// The template text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// File name for a block ordinal.
    pub fn render(&self, ordinal: usize, stem: &str, ext: &str) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Index { width } => out.push_str(&format!("{:0width$}", ordinal, width = *width)),
                Part::Stem => out.push_str(stem),
                Part::Ext => out.push_str(ext),
            }
        }
        out
    }

    /// Output paths for `ordinals` under `dir`, checked for collisions.
    pub fn paths_for(
        &self,
        dir: &Path,
        ordinals: &[usize],
        stem: &str,
        ext: &str,
    ) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::with_capacity(ordinals.len());
        let mut paths = Vec::with_capacity(ordinals.len());
        for &ordinal in ordinals {
            let path = dir.join(self.render(ordinal, stem, ext));
            if !seen.insert(path.clone()) {
                return Err(Error::InvalidPattern {
                    pattern: self.source.clone(),
                    reason: format!("name collision at {}", path.display()),
                });
            }
            paths.push(path);
        }
        Ok(paths)
    }
}

impl Default for NamePattern {
    fn default() -> Self {
        // The default template is a constant known to parse
        Self {
            source: Self::DEFAULT.to_string(),
            parts: vec![
                Part::Stem,
                Part::Literal("_".to_string()),
                Part::Index { width: 3 },
                Part::Literal(".".to_string()),
                Part::Ext,
            ],
        }
    }
}

/// File stem of `path`, or `"document"` when it has none.
pub fn source_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pattern() {
        let pattern = NamePattern::parse(NamePattern::DEFAULT).unwrap();
        assert_eq!(pattern, NamePattern::default());
        assert_eq!(pattern.render(7, "exam", "hwp"), "exam_007.hwp");
        assert_eq!(pattern.render(1234, "exam", "hwp"), "exam_1234.hwp");
    }

    #[test]
    fn test_unpadded_index() {
        let pattern = NamePattern::parse("problem-{index}.txt").unwrap();
        assert_eq!(pattern.render(12, "ignored", "hwp"), "problem-12.txt");
    }

    #[test]
    fn test_width_without_leading_zero() {
        let pattern = NamePattern::parse("{index:4}").unwrap();
        assert_eq!(pattern.render(5, "", ""), "0005");
    }

    #[test]
    fn test_rejects_missing_index() {
        assert!(NamePattern::parse("{stem}.{ext}").is_err());
        assert!(NamePattern::parse("fixed.hwp").is_err());
    }

    #[test]
    fn test_rejects_unknown_and_stray() {
        assert!(NamePattern::parse("{index}_{date}").is_err());
        assert!(NamePattern::parse("{index}_{stem").is_err());
        assert!(NamePattern::parse("{stem:03}_{index}").is_err());
    }

    #[test]
    fn test_paths_are_distinct() {
        let pattern = NamePattern::default();
        let ordinals: Vec<usize> = (1..=1500).collect();
        let paths = pattern.paths_for(Path::new("out"), &ordinals, "exam", "hwp").unwrap();
        let unique: HashSet<_> = paths.iter().collect();
        assert_eq!(unique.len(), ordinals.len());
        assert_eq!(paths[0], Path::new("out").join("exam_001.hwp"));
    }

    #[test]
    fn test_duplicate_ordinals_collide() {
        let pattern = NamePattern::default();
        assert!(pattern.paths_for(Path::new("out"), &[3, 3], "exam", "hwp").is_err());
    }

    #[test]
    fn test_source_stem() {
        assert_eq!(source_stem(Path::new("/tmp/exam 2024.hwp")), "exam 2024");
        assert_eq!(source_stem(Path::new("/")), "document");
    }
}
