use docpad::{Diagnostic, Result, Severity};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Command;

/// One compilation request: a laid-out package and where to put its output.
#[derive(Debug, Clone)]
pub struct CompileJob {
    pub manifest_path: PathBuf,
    pub target_dir: PathBuf,
    /// Package name, used to pick the package's own artifacts.
    pub package: String,
}

#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub artifacts: Vec<PathBuf>,
}

/// The capability that turns a laid-out package into artifacts.
pub trait Compiler {
    fn compile(&self, job: &CompileJob) -> Result<CompileOutput>;
}

/// Compiles with `cargo build --message-format=json`.
#[derive(Debug, Clone)]
pub struct CargoCompiler {
    cargo: PathBuf,
    release: bool,
    offline: bool,
}

impl Default for CargoCompiler {
    fn default() -> Self {
        Self {
            cargo: std::env::var_os("CARGO")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("cargo")),
            release: false,
            offline: false,
        }
    }
}

impl CargoCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cargo(mut self, cargo: impl Into<PathBuf>) -> Self {
        self.cargo = cargo.into();
        self
    }

    pub fn release(mut self, release: bool) -> Self {
        self.release = release;
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }
}

impl Compiler for CargoCompiler {
    fn compile(&self, job: &CompileJob) -> Result<CompileOutput> {
        let mut command = Command::new(&self.cargo);
        command
            .arg("build")
            .arg("--message-format=json")
            .arg("--manifest-path")
            .arg(&job.manifest_path)
            .arg("--target-dir")
            .arg(&job.target_dir);
        if self.release {
            command.arg("--release");
        }
        if self.offline {
            command.arg("--offline");
        }

        log::debug!("Running {:?}", command);
        let output = command.output()?;

        let mut result = parse_messages(&String::from_utf8_lossy(&output.stdout), &job.package);
        result.success = result.success && output.status.success();

        if !result.success && !result.diagnostics.iter().any(Diagnostic::is_error) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr.trim();
            result.diagnostics.push(Diagnostic::error(if message.is_empty() {
                format!("cargo exited with {}", output.status)
            } else {
                message.to_string()
            }));
        }
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
enum CargoMessage {
    CompilerMessage {
        message: RustcMessage,
    },
    CompilerArtifact {
        target: Target,
        #[serde(default)]
        filenames: Vec<PathBuf>,
    },
    BuildFinished {
        success: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct RustcMessage {
    message: String,
    level: String,
    #[serde(default)]
    spans: Vec<RustcSpan>,
}

#[derive(Debug, Deserialize)]
struct RustcSpan {
    file_name: String,
    line_start: usize,
    column_start: usize,
    #[serde(default)]
    is_primary: bool,
}

#[derive(Debug, Deserialize)]
struct Target {
    name: String,
}

/// Parse cargo's JSON message stream. Lines that are not JSON (build script
/// output, progress) are skipped.
fn parse_messages(stdout: &str, package: &str) -> CompileOutput {
    let package_target = package.replace('-', "_");
    let mut output = CompileOutput::default();
    let mut finished = None;

    for line in stdout.lines().filter(|l| l.starts_with('{')) {
        let message = match serde_json::from_str::<CargoMessage>(line) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Skipping unparseable cargo message: {e}");
                continue;
            }
        };
        match message {
            CargoMessage::CompilerMessage { message } => {
                if let Some(diagnostic) = to_diagnostic(message) {
                    output.diagnostics.push(diagnostic);
                }
            }
            CargoMessage::CompilerArtifact { target, filenames } => {
                if target.name.replace('-', "_") == package_target {
                    output.artifacts.extend(filenames);
                }
            }
            CargoMessage::BuildFinished { success } => finished = Some(success),
            CargoMessage::Other => {}
        }
    }

    output.success = finished.unwrap_or(false) && !output.diagnostics.iter().any(Diagnostic::is_error);
    output
}

fn to_diagnostic(message: RustcMessage) -> Option<Diagnostic> {
    let severity = match message.level.as_str() {
        level if level.starts_with("error") => Severity::Error,
        "warning" => Severity::Warning,
        "note" | "help" => Severity::Note,
        // "failure-note" and friends only repeat what an error already said.
        _ => return None,
    };
    let mut diagnostic = Diagnostic {
        severity,
        ..Diagnostic::error(message.message)
    };
    let span = message
        .spans
        .iter()
        .find(|s| s.is_primary)
        .or_else(|| message.spans.first());
    if let Some(span) = span {
        diagnostic = diagnostic.at(span.file_name.as_str(), span.line_start, span.column_start);
    }
    Some(diagnostic)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = r#"{"reason":"compiler-artifact","package_id":"docpad 0.3.0","target":{"name":"docpad","kind":["lib"]},"filenames":["/t/debug/libdocpad.rlib"]}
   Compiling out v0.0.0
{"reason":"compiler-message","package_id":"out 0.0.0","target":{"name":"out"},"message":{"message":"unused import: `Arc`","level":"warning","spans":[{"file_name":"src/units/ctx.rs","line_start":3,"column_start":5,"is_primary":true}],"rendered":"warning: unused import"}}
{"reason":"compiler-artifact","package_id":"out 0.0.0","target":{"name":"out","kind":["lib"]},"filenames":["/t/debug/libout.rlib"]}
{"reason":"build-finished","success":true}"#;

    #[test]
    fn test_parse_successful_build() {
        let output = parse_messages(STREAM, "out");
        assert!(output.success);
        assert_eq!(output.artifacts, vec![PathBuf::from("/t/debug/libout.rlib")]);
        assert_eq!(output.diagnostics.len(), 1);

        let warning = &output.diagnostics[0];
        assert_eq!(warning.severity, Severity::Warning);
        assert_eq!(warning.file.as_deref(), Some("src/units/ctx.rs"));
        assert_eq!(warning.line, Some(3));
    }

    #[test]
    fn test_parse_failed_build() {
        let stream = r#"{"reason":"compiler-message","message":{"message":"cannot find type `Missing` in crate `models`","level":"error","spans":[{"file_name":"src/units/ctx.rs","line_start":9,"column_start":40,"is_primary":false},{"file_name":"src/units/ctx.rs","line_start":12,"column_start":7,"is_primary":true}]}}
{"reason":"compiler-message","message":{"message":"aborting due to 1 previous error","level":"failure-note","spans":[]}}
{"reason":"build-finished","success":false}"#;
        let output = parse_messages(stream, "out");

        assert!(!output.success);
        assert!(output.artifacts.is_empty());
        assert_eq!(output.diagnostics.len(), 1);
        assert_eq!(
            output.diagnostics[0].to_string(),
            "error: cannot find type `Missing` in crate `models` --> src/units/ctx.rs:12:7"
        );
    }

    #[test]
    fn test_missing_build_finished_is_failure() {
        let output = parse_messages("not json\n", "out");
        assert!(!output.success);
        assert!(output.diagnostics.is_empty());
    }
}
