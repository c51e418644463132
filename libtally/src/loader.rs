use anyhow::{Context, Result};
use log::debug;

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where a piece of ledger text came from.
///
/// Lines pulled in through `include` remember the location of that directive,
/// so diagnostics can show the whole include chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub path: Arc<PathBuf>,
    /// 1-based.
    pub line: usize,
    pub included_from: Option<Arc<SourceLocation>>,
}

impl SourceLocation {
    pub fn new<P: Into<PathBuf>>(path: P, line: usize) -> Self {
        Self {
            path: Arc::new(path.into()),
            line,
            included_from: None,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.line)?;
        let mut by = self.included_from.as_deref();
        while let Some(location) = by {
            write!(
                f,
                " (included from {}:{})",
                location.path.display(),
                location.line
            )?;
            by = location.included_from.as_deref();
        }
        Ok(())
    }
}

/// A single significant line of ledger text: trimmed, never blank, never a comment.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerLine {
    pub text: String,
    pub location: SourceLocation,
}

const INCLUDE: &str = "include";

#[derive(Default)]
struct Loader {
    visited: HashSet<PathBuf>,
    lines: Vec<LedgerLine>,
}

impl Loader {
    fn file(&mut self, path: &Path, by: Option<Arc<SourceLocation>>) -> Result<()> {
        let canonical = fs::canonicalize(path).with_context(|| match &by {
            Some(location) => format!("{}: cannot include {}", location, path.display()),
            None => format!("cannot open {}", path.display()),
        })?;
        if !self.visited.insert(canonical.clone()) {
            debug!("{} already included, skipping", canonical.display());
            return Ok(());
        }

        let content = fs::read_to_string(&canonical)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.text(&content, Arc::new(path.to_path_buf()), &base, by)
    }

    fn text(
        &mut self,
        content: &str,
        origin: Arc<PathBuf>,
        base: &Path,
        by: Option<Arc<SourceLocation>>,
    ) -> Result<()> {
        for (idx, raw) in content.lines().enumerate() {
            let text = raw.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }

            let location = SourceLocation {
                path: origin.clone(),
                line: idx + 1,
                included_from: by.clone(),
            };

            if let Some(target) = include_target(text) {
                let target = base.join(target);
                self.file(&target, Some(Arc::new(location)))?;
                continue;
            }

            self.lines.push(LedgerLine {
                text: text.to_string(),
                location,
            });
        }

        Ok(())
    }
}

fn include_target(text: &str) -> Option<&str> {
    let rest = text.strip_prefix(INCLUDE)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim();
    (!rest.is_empty()).then_some(rest)
}

/// Read the ledger file at `path`, expanding includes depth-first.
///
/// Relative include paths are resolved against the directory of the file
/// containing the directive. Including an already visited file is a no-op.
pub fn ingest(path: &Path) -> Result<Vec<LedgerLine>> {
    let mut loader = Loader::default();
    loader.file(path, None)?;
    Ok(loader.lines)
}

/// Same as [`ingest`], for text that is already in memory. `origin` only names
/// the text in diagnostics; includes are resolved against the working directory.
pub fn ingest_str(content: &str, origin: &str) -> Result<Vec<LedgerLine>> {
    let mut loader = Loader::default();
    loader.text(content, Arc::new(PathBuf::from(origin)), Path::new(""), None)?;
    Ok(loader.lines)
}

#[cfg(test)]
mod tests {
    use crate::loader::{ingest, ingest_str, SourceLocation};

    use anyhow::Result;
    use std::fs;

    #[test]
    fn strips_blanks_and_comments() -> Result<()> {
        let lines = ingest_str("# header\n\n  set budget 100 $  \n\t# indented comment\nend\n", "book")?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "set budget 100 $");
        assert_eq!(lines[0].location, SourceLocation::new("book", 3));
        assert_eq!(lines[1].location.line, 5);
        Ok(())
    }

    #[test]
    fn expands_includes_depth_first() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("main.ledger"), "set a 1\ninclude rates.ledger\nset c 3\n")?;
        fs::write(dir.path().join("rates.ledger"), "# rates\nset b 2\n")?;

        let lines = ingest(&dir.path().join("main.ledger"))?;
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["set a 1", "set b 2", "set c 3"]);

        let included = &lines[1].location;
        assert_eq!(included.line, 2);
        assert!(included.path.ends_with("rates.ledger"));
        let by = included.included_from.as_ref().unwrap();
        assert!(by.path.ends_with("main.ledger"));
        assert_eq!(by.line, 2);
        assert!(format!("{}", included).contains("(included from "));
        Ok(())
    }

    #[test]
    fn reinclusion_is_a_noop() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("a.ledger"), "set a 1\ninclude b.ledger\n")?;
        fs::write(dir.path().join("b.ledger"), "set b 2\ninclude a.ledger\ninclude b.ledger\n")?;

        let lines = ingest(&dir.path().join("a.ledger"))?;
        assert_eq!(lines.len(), 2);
        Ok(())
    }

    #[test]
    fn missing_include_is_fatal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("a.ledger"), "include nowhere.ledger\n")?;

        let err = ingest(&dir.path().join("a.ledger")).unwrap_err();
        assert!(format!("{}", err).contains("cannot include"));
        Ok(())
    }

    #[test]
    fn include_needs_a_path() -> Result<()> {
        let lines = ingest_str("includes\ninclude\n", "book")?;
        assert_eq!(lines.len(), 2);
        Ok(())
    }
}
