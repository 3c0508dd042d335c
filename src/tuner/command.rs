use std::io::Write;
use std::process::{Command, Stdio};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, TunerError};
use crate::models::{EvaluationRequest, PipelineDescription, TrialResult};
use crate::tuner::adapters::PipelineModule;

/// Pipeline backed by an external program.
///
/// The program is run as `<program> <args...> prepare` or
/// `<program> <args...> evaluate`, reads one JSON document on stdin and
/// answers with one JSON document on stdout. `prepare` receives and returns a
/// pipeline description; `evaluate` receives an evaluation request and
/// returns a trial result.
#[derive(Debug, Clone)]
pub struct CommandPipeline {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandPipeline {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
        }
    }

    /// Split a shell-like command line on whitespace.
    pub fn from_command_line(name: impl Into<String>, command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| TunerError::InvalidInput("empty pipeline command".into()))?;
        Ok(Self::new(name, program, parts.collect()))
    }

    fn call<I: Serialize, O: DeserializeOwned>(&self, action: &str, input: &I) -> Result<O> {
        let payload = serde_json::to_vec(input)?;
        debug!("running {} {:?} {}", self.program, self.args, action);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(action)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TunerError::Evaluator(format!("cannot spawn '{}': {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .map_err(|e| TunerError::Evaluator(format!("cannot write request: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| TunerError::Evaluator(format!("'{}' did not finish: {}", self.program, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TunerError::Evaluator(format!(
                "'{} {}' exited with {}: {}",
                self.program,
                action,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            TunerError::Evaluator(format!("invalid {} output from '{}': {}", action, self.program, e))
        })
    }
}

impl PipelineModule for CommandPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, base: &PipelineDescription) -> Result<PipelineDescription> {
        self.call("prepare", base)
    }

    fn evaluate(&self, request: &EvaluationRequest) -> Result<TrialResult> {
        self.call("evaluate", request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_split() {
        let pipeline = CommandPipeline::from_command_line("bench", "python3 bench.py --fast").unwrap();
        assert_eq!(pipeline.name(), "bench");
        assert_eq!(pipeline.program, "python3");
        assert_eq!(pipeline.args, vec!["bench.py", "--fast"]);

        assert!(matches!(
            CommandPipeline::from_command_line("x", "   ").unwrap_err(),
            TunerError::InvalidInput(_)
        ));
    }

    #[test]
    fn test_missing_program_is_evaluator_error() {
        let pipeline = CommandPipeline::new("ghost", "/nonexistent/pipeline-program", vec![]);
        let err = pipeline.prepare(&PipelineDescription::default()).unwrap_err();
        assert!(matches!(err, TunerError::Evaluator(_)));
    }
}
