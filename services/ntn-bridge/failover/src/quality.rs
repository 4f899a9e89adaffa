//! Connection-quality collaborator.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::FailoverError;

/// Direction the link quality is heading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTrend {
    /// Getting better
    Improving,
    /// Flat
    Stable,
    /// Getting worse
    Degrading,
    /// Not enough samples
    #[default]
    #[serde(other)]
    Unknown,
}

/// Issue the collaborator expects to occur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictedIssue {
    /// Signal quality will keep dropping
    SignalDeterioration,
    /// Throughput will drop
    ThroughputDecline,
    /// Latency will rise
    LatencyIncrease,
    /// Anything this build does not know
    #[serde(other)]
    Unknown,
}

/// Snapshot of a node's satellite link quality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// Signal quality, 0 to 100
    pub signal_quality_score: f64,
    /// Throughput and loss performance, 0 to 100
    pub performance_score: f64,
    /// Trend over the assessment window
    #[serde(default)]
    pub quality_trend: QualityTrend,
    /// Issues expected soon
    #[serde(default)]
    pub predicted_issues: Vec<PredictedIssue>,
}

impl QualityAssessment {
    /// Assessment without predictions
    pub fn new(signal_quality_score: f64, performance_score: f64, trend: QualityTrend) -> Self {
        Self {
            signal_quality_score,
            performance_score,
            quality_trend: trend,
            predicted_issues: Vec::new(),
        }
    }

    /// Add a predicted issue
    pub fn with_issue(mut self, issue: PredictedIssue) -> Self {
        self.predicted_issues.push(issue);
        self
    }
}

/// Source of quality assessments
#[async_trait]
pub trait ConnectionQualityAssessor: Send + Sync {
    /// Assess `node_id` over the trailing `window`
    async fn assess_connection_quality(
        &self,
        node_id: &str,
        window: Duration,
    ) -> Result<QualityAssessment, FailoverError>;
}

/// Assessments held in memory and set by the caller
#[derive(Debug, Default)]
pub struct StaticQualitySource {
    assessments: DashMap<String, QualityAssessment>,
}

impl StaticQualitySource {
    /// Empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the assessment returned for a node
    pub fn set(&self, node_id: impl Into<String>, assessment: QualityAssessment) {
        self.assessments.insert(node_id.into(), assessment);
    }

    /// Forget a node
    pub fn remove(&self, node_id: &str) {
        self.assessments.remove(node_id);
    }
}

#[async_trait]
impl ConnectionQualityAssessor for StaticQualitySource {
    async fn assess_connection_quality(
        &self,
        node_id: &str,
        _window: Duration,
    ) -> Result<QualityAssessment, FailoverError> {
        self.assessments
            .get(node_id)
            .map(|a| a.clone())
            .ok_or_else(|| FailoverError::NoAssessment(node_id.to_string()))
    }
}

/// Assessments read from a JSON object keyed by node id.
///
/// The file is re-read on every call so an external process can rewrite it.
#[derive(Debug, Clone)]
pub struct FileQualitySource {
    path: PathBuf,
}

impl FileQualitySource {
    /// Source backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConnectionQualityAssessor for FileQualitySource {
    async fn assess_connection_quality(
        &self,
        node_id: &str,
        _window: Duration,
    ) -> Result<QualityAssessment, FailoverError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut all: HashMap<String, QualityAssessment> = serde_json::from_str(&content)?;
        all.remove(node_id)
            .ok_or_else(|| FailoverError::NoAssessment(node_id.to_string()))
    }
}
