//! Entry-class discovery
//!
//! `javac` insists that a public class lives in a file of the same name, so
//! the name has to be known before anything is written to disk. This is a
//! line scan, not a parse: the first `public class <Name>` wins and the name
//! is passed through unvalidated. A bad name comes back as a compiler
//! diagnostic.

use crate::{Result, SandboxError};

const DECLARATION: &str = "public class ";

/// Extract the name of the first public top-level class in `source`.
pub fn extract_entry_name(source: &str) -> Result<String> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(DECLARATION))
        .find_map(name_after_class_keyword)
        .ok_or(SandboxError::EntryNotFound)
}

fn name_after_class_keyword(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace();
    tokens.find(|token| *token == "class")?;
    let name = tokens.next()?.replace('{', "");
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_owned())
}
