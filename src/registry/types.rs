//! Usage facts and ingestion batches.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a source lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// A Grafana dashboard, identified by UID.
    Grafana,
    /// A Perses dashboard, identified by `project/name`.
    Perses,
    /// A Prometheus rule group (recording or alerting).
    PrometheusRule,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Grafana => "grafana",
            Origin::Perses => "perses",
            Origin::PrometheusRule => "prometheus_rule",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dashboard or rule group that references metrics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
    pub origin: Origin,
}

impl SourceRef {
    pub fn new(id: impl Into<String>, origin: Origin) -> Self {
        Self {
            id: id.into(),
            origin,
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    Valid,
    Invalid,
}

/// Normalized statement that `metric` is (or is not validly) referenced by `source`.
///
/// For `Invalid` facts `metric` holds the offending expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageFact {
    pub metric: String,
    pub source: SourceRef,
    pub kind: UsageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Why a fact was refused by the merge engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptySource,
    EmptyMetric,
    EmptyExpression,
    ForeignSource,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::EmptySource => "empty_source",
            RejectReason::EmptyMetric => "empty_metric",
            RejectReason::EmptyExpression => "empty_expression",
            RejectReason::ForeignSource => "foreign_source",
        }
    }
}

impl UsageFact {
    pub fn valid(metric: impl Into<String>, source: SourceRef) -> Self {
        Self {
            metric: metric.into(),
            source,
            kind: UsageKind::Valid,
            detail: None,
        }
    }

    pub fn invalid(expression: impl Into<String>, source: SourceRef, detail: impl Into<String>) -> Self {
        Self {
            metric: expression.into(),
            source,
            kind: UsageKind::Invalid,
            detail: Some(detail.into()),
        }
    }

    /// Check the fact is well-formed.
    pub fn validate(&self) -> Result<(), RejectReason> {
        if self.source.id.trim().is_empty() {
            return Err(RejectReason::EmptySource);
        }
        if self.metric.trim().is_empty() {
            return Err(match self.kind {
                UsageKind::Valid => RejectReason::EmptyMetric,
                UsageKind::Invalid => RejectReason::EmptyExpression,
            });
        }
        Ok(())
    }
}

/// A broken reference reported by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidMetric {
    pub expression: String,
    #[serde(default)]
    pub detail: String,
}

/// Result of scanning one source: the complete set of what it currently uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub source: SourceRef,
    #[serde(default)]
    pub valid_metrics: BTreeSet<String>,
    #[serde(default)]
    pub invalid_metrics: Vec<InvalidMetric>,
}

impl ScanReport {
    pub fn new(source: SourceRef) -> Self {
        Self {
            source,
            valid_metrics: BTreeSet::new(),
            invalid_metrics: Vec::new(),
        }
    }

    pub fn with_metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_metrics.extend(metrics.into_iter().map(Into::into));
        self
    }

    pub fn with_invalid(mut self, expression: impl Into<String>, detail: impl Into<String>) -> Self {
        self.invalid_metrics.push(InvalidMetric {
            expression: expression.into(),
            detail: detail.into(),
        });
        self
    }

    /// Translate the scan into a full-replace batch.
    pub fn into_batch(self) -> Batch {
        let source = self.source;
        let mut facts = Vec::with_capacity(self.valid_metrics.len() + self.invalid_metrics.len());
        facts.extend(
            self.valid_metrics
                .into_iter()
                .map(|metric| UsageFact::valid(metric, source.clone())),
        );
        facts.extend(
            self.invalid_metrics
                .into_iter()
                .map(|inv| UsageFact::invalid(inv.expression, source.clone(), inv.detail)),
        );
        Batch::Replace { source, facts }
    }
}

/// Unit of work carried by the ingestion queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch {
    /// The facts are the complete current state of `source`; anything it
    /// reported before and does not report now is retracted.
    Replace { source: SourceRef, facts: Vec<UsageFact> },
    /// Incremental facts, added or overwritten without retracting anything.
    Upsert { facts: Vec<UsageFact> },
}

impl Batch {
    pub fn len(&self) -> usize {
        match self {
            Batch::Replace { facts, .. } | Batch::Upsert { facts } => facts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Batch::Replace { .. } => "replace",
            Batch::Upsert { .. } => "upsert",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_report_into_batch() {
        let source = SourceRef::new("dash-1", Origin::Grafana);
        let batch = ScanReport::new(source.clone())
            .with_metrics(["run", "service_color", "run"])
            .with_invalid("up{job=", "parse error")
            .into_batch();

        match batch {
            Batch::Replace { source: s, facts } => {
                assert_eq!(s, source);
                assert_eq!(facts.len(), 3);
                assert_eq!(facts[0], UsageFact::valid("run", source.clone()));
                assert_eq!(facts[2].kind, UsageKind::Invalid);
                assert_eq!(facts[2].detail.as_deref(), Some("parse error"));
            }
            other => panic!("unexpected batch {:?}", other),
        }
    }

    #[test]
    fn test_validate() {
        let source = SourceRef::new("rule-1", Origin::PrometheusRule);
        assert!(UsageFact::valid("up", source.clone()).validate().is_ok());
        assert_eq!(
            UsageFact::valid("  ", source.clone()).validate(),
            Err(RejectReason::EmptyMetric)
        );
        assert_eq!(
            UsageFact::invalid("", source, "x").validate(),
            Err(RejectReason::EmptyExpression)
        );
        let nameless = SourceRef::new("", Origin::Grafana);
        assert_eq!(
            UsageFact::valid("up", nameless).validate(),
            Err(RejectReason::EmptySource)
        );
    }

    #[test]
    fn test_origin_serde() {
        let source = SourceRef::new("g", Origin::PrometheusRule);
        let json = serde_json::to_string(&source).unwrap();
        assert_eq!(json, r#"{"id":"g","origin":"prometheus_rule"}"#);
        let back: SourceRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, source);
    }
}
