//! Verification service boundary.
//!
//! A [`Verifier`] compares the probe with one stored reference image and
//! reports whether they show the same person, plus a distance score. Any
//! per-pair failure is returned as a [`VerifyError`] and treated by the
//! matcher as inconclusive.

use crate::probe::Probe;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("failed to read reference {}: {source}", path.display())]
    Reference {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("failed to run verifier command `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("verifier command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
    #[error("malformed verifier output: {0}")]
    MalformedOutput(#[from] serde_json::Error),
}

/// Outcome of comparing two images.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Verdict {
    pub verified: bool,
    pub distance: f32,
}

/// Face-comparison oracle.
pub trait Verifier {
    fn verify(&self, probe: &Probe, reference: &Path) -> Result<Verdict, VerifyError>;
}

impl<V: Verifier + ?Sized> Verifier for &V {
    fn verify(&self, probe: &Probe, reference: &Path) -> Result<Verdict, VerifyError> {
        (**self).verify(probe, reference)
    }
}

impl<V: Verifier + ?Sized> Verifier for Box<V> {
    fn verify(&self, probe: &Probe, reference: &Path) -> Result<Verdict, VerifyError> {
        (**self).verify(probe, reference)
    }
}

/// Verifier that shells out to an external program, e.g. a DeepFace wrapper.
///
/// Each argument is a template; `{probe}`, `{reference}`, `{model}` and
/// `{enforce_detection}` are substituted per call. When no argument mentions
/// `{probe}`, the probe and reference paths are appended. The program must
/// print `{"verified": <bool>, "distance": <number>}` on stdout.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    program: String,
    args: Vec<String>,
    model: String,
    enforce_detection: bool,
}

impl CommandVerifier {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        model: impl Into<String>,
        enforce_detection: bool,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            model: model.into(),
            enforce_detection,
        }
    }

    fn render_args(&self, probe: &Path, reference: &Path) -> Vec<String> {
        let probe = probe.to_string_lossy();
        let reference = reference.to_string_lossy();
        let enforce = if self.enforce_detection { "true" } else { "false" };

        let mut rendered: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace("{probe}", &probe)
                    .replace("{reference}", &reference)
                    .replace("{model}", &self.model)
                    .replace("{enforce_detection}", enforce)
            })
            .collect();

        if !self.args.iter().any(|a| a.contains("{probe}")) {
            rendered.push(probe.into_owned());
            rendered.push(reference.into_owned());
        }
        rendered
    }
}

impl Verifier for CommandVerifier {
    fn verify(&self, probe: &Probe, reference: &Path) -> Result<Verdict, VerifyError> {
        let args = self.render_args(probe.path(), reference);
        tracing::trace!(program = %self.program, ?args, "running verifier command");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| VerifyError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(VerifyError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_verdict(&output.stdout)
    }
}

/// Parse a verifier's JSON verdict. Extra fields are ignored.
pub fn parse_verdict(stdout: &[u8]) -> Result<Verdict, VerifyError> {
    Ok(serde_json::from_slice(stdout)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict() {
        let v = parse_verdict(br#"{"verified": true, "distance": 0.12, "model": "Facenet512"}"#)
            .unwrap();
        assert!(v.verified);
        assert!((v.distance - 0.12).abs() < 1e-6);
    }

    #[test]
    fn test_parse_verdict_rejects_garbage() {
        assert!(matches!(
            parse_verdict(b"Face could not be detected"),
            Err(VerifyError::MalformedOutput(_))
        ));
        assert!(parse_verdict(br#"{"verified": true}"#).is_err());
    }

    #[test]
    fn test_render_args_with_placeholders() {
        let v = CommandVerifier::new(
            "deepface-verify",
            vec![
                "--model={model}".into(),
                "--enforce={enforce_detection}".into(),
                "{probe}".into(),
                "{reference}".into(),
            ],
            "Facenet512",
            false,
        );
        let args = v.render_args(Path::new("/tmp/p.jpg"), Path::new("/g/user_1/a.jpg"));
        assert_eq!(
            args,
            vec!["--model=Facenet512", "--enforce=false", "/tmp/p.jpg", "/g/user_1/a.jpg"]
        );
    }

    #[test]
    fn test_render_args_appends_paths() {
        let v = CommandVerifier::new("cmp", vec!["--json".into()], "m", true);
        let args = v.render_args(Path::new("p.jpg"), Path::new("r.jpg"));
        assert_eq!(args, vec!["--json", "p.jpg", "r.jpg"]);
    }
}
