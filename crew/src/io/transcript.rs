//! Run transcripts under `<dir>/<run_id>/`.
//!
//! Transcripts are product artifacts, written only for completed runs and
//! independent of `RUST_LOG`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::types::{InputBindings, StageRecord};
use crate::pipeline::RunReport;
use crate::reasoning::{DelegationRecord, ToolInvocation};
use crate::tools::TextResult;

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta<'a> {
    pub run_id: &'a str,
    pub bindings: &'a InputBindings,
    pub stages: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageTranscript<'a> {
    pub index: usize,
    pub task: &'a str,
    pub role: &'a str,
    pub description: &'a str,
    pub output: &'a str,
    /// Hex SHA-256 of `output`, for comparing runs without diffing text.
    pub output_sha256: String,
    pub used_fallback: bool,
    pub tool_invocations: Vec<InvocationEntry<'a>>,
    pub delegations: &'a [DelegationRecord],
}

#[derive(Debug, Clone, Serialize)]
pub struct InvocationEntry<'a> {
    pub tool: &'a str,
    pub query: &'a str,
    #[serde(flatten)]
    pub outcome: InvocationOutcome<'a>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InvocationOutcome<'a> {
    Ok { result: &'a TextResult },
    Error { kind: &'static str, message: String },
}

impl<'a> From<&'a ToolInvocation> for InvocationEntry<'a> {
    fn from(invocation: &'a ToolInvocation) -> Self {
        let outcome = match &invocation.response {
            Ok(result) => InvocationOutcome::Ok { result },
            Err(err) => InvocationOutcome::Error {
                kind: err.kind(),
                message: err.to_string(),
            },
        };
        Self {
            tool: &invocation.tool,
            query: &invocation.query,
            outcome,
        }
    }
}

impl<'a> From<&'a StageRecord> for StageTranscript<'a> {
    fn from(record: &'a StageRecord) -> Self {
        Self {
            index: record.index,
            task: &record.task_name,
            role: &record.role,
            description: &record.description,
            output: &record.output.text,
            output_sha256: text_sha256(&record.output.text),
            used_fallback: record.output.used_fallback,
            tool_invocations: record
                .output
                .tool_invocations
                .iter()
                .map(InvocationEntry::from)
                .collect(),
            delegations: &record.output.delegations,
        }
    }
}

fn text_sha256(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct TranscriptPaths {
    pub dir: PathBuf,
    pub run_path: PathBuf,
}

impl TranscriptPaths {
    pub fn new(root: &Path, run_id: &str) -> Self {
        let dir = root.join(run_id);
        Self {
            run_path: dir.join("run.json"),
            dir,
        }
    }

    pub fn stage_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("stage-{}.json", index + 1))
    }
}

pub fn write_transcript(
    root: &Path,
    bindings: &InputBindings,
    report: &RunReport,
) -> Result<TranscriptPaths> {
    let paths = TranscriptPaths::new(root, &report.run_id);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create transcript dir {}", paths.dir.display()))?;

    // Write in deterministic order to keep transcripts stable.
    let meta = RunMeta {
        run_id: &report.run_id,
        bindings,
        stages: report.context.len(),
        duration_ms: report.duration.as_millis() as u64,
    };
    write_json(&paths.run_path, &meta)?;
    for record in report.context.records() {
        write_json(&paths.stage_path(record.index), &StageTranscript::from(record))?;
    }
    Ok(paths)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
