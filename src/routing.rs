// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Static event routing.
//!
//! Rules are parsed and validated once at startup. Routing is fan-out: every
//! enabled rule that matches an event contributes its target, and events that
//! match nothing go to the default target.
//!
//! # Example
//!
//! ```
//! use event_sync_engine::{Event, EventKind, RoutingRule, RoutingTable, Severity};
//! use serde_json::json;
//!
//! let table = RoutingTable::new(
//!     vec![RoutingRule::any("crit", "error_alerts").with_severity(Severity::Critical)],
//!     "default",
//! );
//!
//! let event = Event::new(EventKind::Signal, "trading", json!({}))
//!     .with_severity(Severity::Critical);
//! assert_eq!(table.route(&event).into_iter().collect::<Vec<_>>(), vec!["error_alerts"]);
//! ```

use std::collections::{BTreeSet, HashSet};

use tracing::trace;

use crate::config::RoutingRuleSpec;
use crate::event::{Event, EventKind, Severity};

/// Wildcard source match.
pub const ANY_SOURCE: &str = "*";

/// A validated routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    pub id: String,
    pub source_match: String,
    /// Empty matches every event type
    pub type_match: HashSet<EventKind>,
    pub severity_match: Option<Severity>,
    pub target_name: String,
    pub enabled: bool,
}

impl RoutingRule {
    /// An enabled rule matching every event.
    pub fn any(id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_match: ANY_SOURCE.to_string(),
            type_match: HashSet::new(),
            severity_match: None,
            target_name: target.into(),
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_match = source.into();
        self
    }

    #[must_use]
    pub fn with_types<I: IntoIterator<Item = EventKind>>(mut self, types: I) -> Self {
        self.type_match = types.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity_match = Some(severity);
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        self.enabled
            && (self.source_match == ANY_SOURCE || self.source_match == event.source)
            && (self.type_match.is_empty() || self.type_match.contains(&event.kind))
            && self.severity_match.map_or(true, |s| s == event.severity)
    }
}

impl From<&RoutingRuleSpec> for RoutingRule {
    fn from(spec: &RoutingRuleSpec) -> Self {
        Self {
            id: spec.id.clone(),
            source_match: spec.source.clone(),
            type_match: spec.types.iter().cloned().collect(),
            severity_match: spec.severity,
            target_name: spec.target.clone(),
            enabled: spec.enabled,
        }
    }
}

/// Immutable rule set mapping events to target names.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    rules: Vec<RoutingRule>,
    default_target: String,
}

impl RoutingTable {
    pub fn new(rules: Vec<RoutingRule>, default_target: impl Into<String>) -> Self {
        Self {
            rules,
            default_target: default_target.into(),
        }
    }

    /// Build from config specs. Cross references are checked by
    /// [`SyncConfig::validate`](crate::SyncConfig::validate).
    pub fn from_specs(specs: &[RoutingRuleSpec], default_target: impl Into<String>) -> Self {
        Self::new(specs.iter().map(RoutingRule::from).collect(), default_target)
    }

    #[must_use]
    pub fn default_target(&self) -> &str {
        &self.default_target
    }

    #[must_use]
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Targets for an event. Never empty.
    #[must_use]
    pub fn route(&self, event: &Event) -> BTreeSet<String> {
        let mut targets: BTreeSet<String> = self
            .rules
            .iter()
            .filter(|rule| rule.matches(event))
            .map(|rule| rule.target_name.clone())
            .collect();

        if targets.is_empty() {
            targets.insert(self.default_target.clone());
        }
        trace!(source = %event.source, kind = %event.kind, ?targets, "Event routed");
        targets
    }
}
