//! `javac` invocation and diagnostic collection

use crate::workspace::SOURCE_EXT;
use crate::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Severity reported by the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Error,
    Warning,
    Note,
}

impl DiagnosticKind {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "note" | "Note" => Some(Self::Note),
            _ => None,
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Note => "note",
        })
    }
}

/// One compiler message with the lines `javac` printed under it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Source file name, without the workspace directory
    pub file: Option<String>,
    pub line: Option<u32>,
    pub message: String,
    /// Source excerpt, caret and `symbol:`/`location:` lines
    pub detail: Vec<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}: {}: {}", self.kind, self.message)?,
            _ => write!(f, "{}: {}", self.kind, self.message)?,
        }
        for detail in &self.detail {
            write!(f, "\n{detail}")?;
        }
        Ok(())
    }
}

/// Result of one compiler run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutcome {
    /// `javac` exit status was success
    pub success: bool,
    /// Parsed diagnostics in emission order
    pub diagnostics: Vec<Diagnostic>,
    /// Everything the compiler printed, used when nothing could be parsed
    pub raw: String,
}

impl CompileOutcome {
    /// Build an outcome from compiler status and combined output text.
    #[must_use]
    pub fn from_output(success: bool, raw: String) -> Self {
        Self {
            success,
            diagnostics: parse_diagnostics(&raw),
            raw,
        }
    }

    /// Text reported to the caller when compilation failed.
    #[must_use]
    pub fn error_text(&self) -> String {
        if self.diagnostics.is_empty() {
            return self.raw.clone();
        }
        self.diagnostics.iter().fold(String::new(), |mut text, d| {
            text.push_str(&d.to_string());
            text.push('\n');
            text
        })
    }

    #[must_use]
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::Warning)
    }
}

/// Parse `javac` output into diagnostics.
///
/// Headers look like `/tmp/java_compile_x/Main.java:3: error: ';' expected`
/// or, without a location, `warning: [options] ...` and `Note: ...`. Other
/// lines belong to the header above them; the trailing `N errors` summary
/// is dropped.
#[must_use]
pub fn parse_diagnostics(raw: &str) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();

    for line in raw.lines() {
        if let Some(diagnostic) = parse_located(line).or_else(|| parse_unlocated(line)) {
            diagnostics.push(diagnostic);
        } else if is_summary(line) || line.trim().is_empty() {
            continue;
        } else if let Some(last) = diagnostics.last_mut() {
            last.detail.push(line.to_owned());
        }
    }

    diagnostics
}

fn parse_located(line: &str) -> Option<Diagnostic> {
    let suffix = format!(".{SOURCE_EXT}:");
    let (path, rest) = line.split_once(suffix.as_str())?;
    let (line_no, rest) = rest.split_once(": ")?;
    let line_no = line_no.parse().ok()?;
    let (kind, message) = rest.split_once(": ")?;
    let kind = DiagnosticKind::parse(kind)?;

    let file = Path::new(&format!("{path}.{SOURCE_EXT}"))
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());

    Some(Diagnostic {
        kind,
        file,
        line: Some(line_no),
        message: message.to_owned(),
        detail: Vec::new(),
    })
}

fn parse_unlocated(line: &str) -> Option<Diagnostic> {
    let (kind, message) = line.split_once(": ")?;
    let kind = DiagnosticKind::parse(kind)?;
    Some(Diagnostic {
        kind,
        file: None,
        line: None,
        message: message.to_owned(),
        detail: Vec::new(),
    })
}

fn is_summary(line: &str) -> bool {
    let mut words = line.split_whitespace();
    let counted = words.next().is_some_and(|n| n.parse::<u32>().is_ok());
    counted
        && matches!(words.next(), Some("error" | "errors" | "warning" | "warnings"))
        && words.next().is_none()
}

/// Runs `javac` against a workspace
#[derive(Debug, Clone)]
pub struct Compiler {
    javac: PathBuf,
    timeout: Duration,
}

impl Compiler {
    #[must_use]
    pub fn new(javac: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            javac: javac.into(),
            timeout,
        }
    }

    /// Compile `<workspace>/<entry>.java`, writing classes into the workspace.
    pub async fn compile(&self, workspace: &Path, entry: &str) -> Result<CompileOutcome> {
        let source = workspace.join(format!("{entry}.{SOURCE_EXT}"));
        let start = Instant::now();

        let mut child = Command::new(&self.javac)
            .arg("-J-Duser.language=en")
            .arg("-encoding")
            .arg("UTF-8")
            .arg("-d")
            .arg(workspace)
            .arg("-sourcepath")
            .arg(workspace)
            .arg(&source)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::from_spawn(&self.javac, e))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("javac stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("javac stderr not captured"))?;

        let collected = tokio::time::timeout(self.timeout, async {
            let (mut out, mut err) = (Vec::new(), Vec::new());
            let (status, read_out, read_err) = tokio::join!(
                child.wait(),
                stdout.read_to_end(&mut out),
                stderr.read_to_end(&mut err),
            );
            read_out?;
            read_err?;
            Ok::<_, io::Error>((status?, out, err))
        })
        .await;

        let Ok(collected) = collected else {
            // Reaped here so the workspace never goes away under a live javac.
            if let Err(e) = child.kill().await {
                tracing::debug!(entry, error = %e, "compiler already gone");
            }
            tracing::warn!(entry, timeout = ?self.timeout, "compiler overran its deadline");
            return Ok(CompileOutcome::from_output(
                false,
                format!("compilation timed out after {}s", self.timeout.as_secs()),
            ));
        };
        let (status, stdout, stderr) = collected?;

        let mut raw = String::from_utf8_lossy(&stderr).into_owned();
        raw.push_str(&String::from_utf8_lossy(&stdout));
        let outcome = CompileOutcome::from_output(status.success(), raw);

        tracing::debug!(
            entry,
            success = outcome.success,
            diagnostics = outcome.diagnostics.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "compilation finished"
        );

        Ok(outcome)
    }
}
