//! Check reconciliation.
//!
//! For one check-owning host, [`plan`] diffs the checks the events need
//! against the remote state and returns only the definitions that changed.
//! [`apply`] writes them back and invalidates the host's cached state.
//!
//! Service attributes are reconciled once per service per pass; child
//! references are added per event.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use common::{CallContext, ContextError, HttpError};
use tracing::{debug, error, info};

use crate::api::{CheckDefinition, ChildCheck, JugglerApi};
use crate::config::{AggregatorArgs, DesiredCheck};
use crate::script::Event;

/// A check being reconciled together with what changed on it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCheck {
    pub check: CheckDefinition,
    /// Attributes that differed from the remote definition
    pub changes: Vec<&'static str>,
}

impl PendingCheck {
    fn existing(check: CheckDefinition) -> Self {
        Self {
            check,
            changes: Vec::new(),
        }
    }

    fn new(host: &str, service: &str, desired: &DesiredCheck) -> Self {
        Self {
            check: CheckDefinition {
                host: host.to_string(),
                service: service.to_string(),
                aggregator: desired.aggregator.clone(),
                ..CheckDefinition::default()
            },
            changes: vec!["new"],
        }
    }

    fn mark(&mut self, change: &'static str) {
        debug!(
            host = %self.check.host,
            service = %self.check.service,
            change,
            "Check outdated"
        );
        self.changes.push(change);
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Checks of `host` that must be written for `events` to be covered.
///
/// `remote` is the current state of the host's checks, by service.
#[must_use]
pub fn plan(
    desired: &DesiredCheck,
    host: &str,
    mut remote: BTreeMap<String, CheckDefinition>,
    events: &[&Event],
) -> Vec<PendingCheck> {
    let mut children: HashSet<(String, String)> = remote
        .iter()
        .flat_map(|(service, check)| {
            check
                .children
                .iter()
                .map(move |child| (child.host.clone(), service.clone()))
        })
        .collect();

    let mut reconciled = BTreeSet::new();
    let mut pending: BTreeMap<String, PendingCheck> = BTreeMap::new();

    for event in events {
        let service = event.service.as_str();
        let check = pending.entry(service.to_string()).or_insert_with(|| {
            remote.remove(service).map_or_else(
                || {
                    info!(host = %host, service = %service, "Add new check");
                    PendingCheck::new(host, service, desired)
                },
                PendingCheck::existing,
            )
        });

        if reconciled.insert(service.to_string()) {
            debug!(host = %host, service = %service, "Ensure check");
            ensure_ttl(check, desired);
            ensure_aggregator(check, desired);
            ensure_methods(check, desired);
            ensure_flap(check, desired, service);
            ensure_tags(check, desired);
            ensure_description(check, desired);
            ensure_namespace(check, desired);
        }

        if children.insert((event.host.clone(), service.to_string())) {
            debug!(host = %host, service = %service, child = %event.host, "Add child");
            check.check.children.push(ChildCheck::host(&event.host, service));
            check.mark("children");
        }
    }

    pending
        .into_values()
        .filter(PendingCheck::is_dirty)
        .map(|mut p| {
            p.check.host = host.to_string();
            p
        })
        .collect()
}

fn ensure_ttl(p: &mut PendingCheck, desired: &DesiredCheck) {
    if p.check.ttl != desired.ttl {
        p.check.ttl = desired.ttl;
        p.mark("ttl");
    }
}

/// Limits are compared by their printed form, so `1` and `"1"` are equal.
fn limits_differ(have: &AggregatorArgs, want: &AggregatorArgs) -> bool {
    have.ignore_nodata != want.ignore_nodata
        || have.limits.len() != want.limits.len()
        || want.limits.iter().zip(&have.limits).any(|(want, have)| {
            want.iter().any(|(key, value)| {
                have.get(key)
                    .map_or(true, |current| current.to_string() != value.to_string())
            })
        })
}

/// The aggregator name alone never makes a check outdated; it is replaced
/// together with differing args.
fn ensure_aggregator(p: &mut PendingCheck, desired: &DesiredCheck) {
    if limits_differ(&p.check.aggregator_kwargs, &desired.aggregator_kwargs) {
        p.check.aggregator.clone_from(&desired.aggregator);
        p.check.aggregator_kwargs = desired.aggregator_kwargs.clone();
        p.mark("aggregator");
    }
}

fn ensure_methods(p: &mut PendingCheck, desired: &DesiredCheck) {
    let outdated = p.check.methods.len() != desired.methods.len()
        || desired
            .methods
            .iter()
            .any(|m| !p.check.methods.contains(m));
    if outdated {
        p.check.methods.clone_from(&desired.methods);
        p.mark("methods");
    }
}

fn ensure_flap(p: &mut PendingCheck, desired: &DesiredCheck, service: &str) {
    let mut current = p.check.flap.unwrap_or_default();
    current.enable = 1;

    let wanted = match desired.checks_options.get(service) {
        Some(flap) if flap.is_enabled() => Some(*flap),
        Some(_) => {
            p.check.flap = Some(current);
            return;
        }
        None => desired.flap.filter(|flap| flap.is_enabled()),
    };

    match wanted {
        Some(flap) if flap != current => {
            p.check.flap = Some(flap);
            p.mark("flap");
        }
        Some(_) => p.check.flap = Some(current),
        None => p.check.flap = None,
    }
}

fn ensure_tags(p: &mut PendingCheck, desired: &DesiredCheck) {
    if p.check.tags.is_empty() {
        p.check.tags.clone_from(&desired.tags);
        p.mark("tags");
        return;
    }
    let mut added = false;
    for tag in &desired.tags {
        if !p.check.tags.contains(tag) {
            p.check.tags.push(tag.clone());
            added = true;
        }
    }
    if added {
        p.mark("tags");
    }
}

fn ensure_description(p: &mut PendingCheck, desired: &DesiredCheck) {
    if !desired.description.is_empty() && p.check.description != desired.description {
        p.check.description.clone_from(&desired.description);
        p.mark("description");
    }
}

fn ensure_namespace(p: &mut PendingCheck, desired: &DesiredCheck) {
    if let Some(namespace) = &desired.namespace {
        if &p.check.namespace != namespace {
            p.check.namespace.clone_from(namespace);
            p.mark("namespace");
        }
    }
}

/// Outcome of one host's reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub host: String,
    pub updated: Vec<String>,
    /// Services whose update was rejected by every write host
    pub failed: BTreeMap<String, HttpError>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_in_sync(&self, service: &str) -> bool {
        !self.failed.contains_key(service)
    }
}

/// Deletes the host's cached checks when dropped, if any update was attempted.
struct InvalidateOnDrop<'a> {
    api: &'a JugglerApi,
    host: &'a str,
    armed: bool,
}

impl Drop for InvalidateOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(host = %self.host, "Clean cached checks");
            self.api.cache().delete(self.host);
        }
    }
}

/// Write every pending check of `host`.
///
/// A rejected update is recorded and the next service is tried; a context
/// error aborts the pass.
pub async fn apply(
    api: &JugglerApi,
    ctx: &CallContext,
    host: &str,
    pending: Vec<PendingCheck>,
) -> Result<ReconcileReport, ContextError> {
    let mut report = ReconcileReport {
        host: host.to_string(),
        ..ReconcileReport::default()
    };
    let _invalidate = InvalidateOnDrop {
        api,
        host,
        armed: !pending.is_empty(),
    };

    for PendingCheck { check, changes } in pending {
        debug!(host = %host, service = %check.service, changes = ?changes, "Updating check");
        match api.update_check(ctx, &check).await {
            Ok(()) => report.updated.push(check.service),
            Err(HttpError::Cancelled(err)) => return Err(err),
            Err(err) => {
                error!(host = %host, service = %check.service, error = %err, "Failed to update check");
                report.failed.insert(check.service, err);
            }
        }
    }
    Ok(report)
}
