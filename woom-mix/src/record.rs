//! Line-delimited JSON records for streamed results

use base64::Engine;
use serde::Serialize;

use crate::error::StageFallback;
use crate::orchestrator::{JobReport, JobStatus};

/// Transport form of one [`JobReport`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRecord {
    pub identifier: String,
    pub status: JobStatus,
    /// `k/N`
    pub progress: String,
    /// Base64 artifact bytes on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<&'static str>,
    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<StageFallback>,
}

impl BatchRecord {
    pub fn from_report(report: &JobReport) -> Self {
        let (payload, mime_type, error) = match &report.outcome {
            Ok(artifact) => (
                Some(base64::engine::general_purpose::STANDARD.encode(&artifact.bytes)),
                Some(artifact.format.mime_type()),
                None,
            ),
            Err(failure) => (None, None, Some(failure.to_string())),
        };

        Self {
            identifier: report.identifier.clone(),
            status: report.status(),
            progress: report.progress.to_string(),
            payload,
            mime_type,
            error,
            fallbacks: report.fallbacks.clone(),
        }
    }

    /// One JSON object without a trailing newline
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<&JobReport> for BatchRecord {
    fn from(report: &JobReport) -> Self {
        Self::from_report(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{JobFailure, Stage};
    use crate::orchestrator::Progress;
    use woom_audio::{AudioFormat, OutputArtifact};

    fn progress() -> Progress {
        Progress {
            completed: 2,
            total: 4,
        }
    }

    #[test]
    fn test_success_record() {
        let report = JobReport {
            identifier: "v2_mixed.wav".into(),
            progress: progress(),
            outcome: Ok(OutputArtifact {
                bytes: b"RIFF".to_vec(),
                format: AudioFormat::Wav,
                frames: 1,
            }),
            fallbacks: vec![StageFallback::new(Stage::Trim, "empty after trim")],
        };
        let json: serde_json::Value =
            serde_json::from_str(&BatchRecord::from(&report).to_json_line().unwrap()).unwrap();

        assert_eq!(json["identifier"], "v2_mixed.wav");
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["progress"], "2/4");
        assert_eq!(json["payload"], "UklGRg==");
        assert_eq!(json["mime_type"], "audio/wav");
        assert_eq!(json["fallbacks"][0]["stage"], "trim");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failure_record() {
        let report = JobReport {
            identifier: "v4_mixed.wav".into(),
            progress: progress(),
            outcome: Err(JobFailure::new("v4_mixed.wav", Stage::Retune, "resampler failed")),
            fallbacks: Vec::new(),
        };
        let line = BatchRecord::from_report(&report).to_json_line().unwrap();
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "v4_mixed.wav failed at retune: resampler failed");
        assert!(json.get("payload").is_none());
        assert!(json.get("fallbacks").is_none());
        assert!(!line.contains('\n'));
    }
}
