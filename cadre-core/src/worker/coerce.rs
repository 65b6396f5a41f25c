//! Coercion of raw model text into typed artifacts

use crate::error::{Error, Result};
use crate::model::{
    ArtifactKind, CodeFile, DeploymentBundle, Requirements, TaskArtifact, TestRun,
};
use crate::model::Architecture;

/// Extract the payload from a markdown code fence, if the text carries one
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_fence = &trimmed[start + 3..];
    // Skip an optional language tag on the fence line
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

fn parse<T: for<'de> serde::Deserialize<'de>>(payload: &str, kind: ArtifactKind) -> Result<T> {
    serde_json::from_str(payload).map_err(|e| {
        Error::Shape(format!(
            "output does not parse as {kind}: {e} (line {}, column {})",
            e.line(),
            e.column()
        ))
    })
}

/// Coerce raw model text into the declared artifact kind.
///
/// JSON payloads may be wrapped in markdown fences. A parse failure returns
/// `Error::Shape` carrying the diagnostic, which feeds the next attempt's
/// context.
pub fn coerce(text: &str, kind: ArtifactKind) -> Result<TaskArtifact> {
    if kind == ArtifactKind::Text {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::Shape("empty text output".to_string()));
        }
        return Ok(TaskArtifact::Text(trimmed.to_string()));
    }

    let payload = strip_code_fences(text);
    if payload.is_empty() {
        return Err(Error::Shape(format!("empty output, expected {kind} JSON")));
    }

    match kind {
        ArtifactKind::Requirements => {
            Ok(TaskArtifact::Requirements(parse::<Requirements>(payload, kind)?))
        }
        ArtifactKind::Architecture => {
            Ok(TaskArtifact::Architecture(parse::<Architecture>(payload, kind)?))
        }
        ArtifactKind::CodeFiles => {
            // Accept either a bare array or a single file object
            if payload.trim_start().starts_with('[') {
                Ok(TaskArtifact::CodeFiles(parse::<Vec<CodeFile>>(payload, kind)?))
            } else {
                Ok(TaskArtifact::CodeFiles(vec![parse::<CodeFile>(payload, kind)?]))
            }
        }
        ArtifactKind::TestReport => Ok(TaskArtifact::TestReport(parse::<TestRun>(payload, kind)?)),
        ArtifactKind::Deployment => {
            Ok(TaskArtifact::Deployment(parse::<DeploymentBundle>(payload, kind)?))
        }
        ArtifactKind::Text => unreachable!("handled above"),
    }
}
