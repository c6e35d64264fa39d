//! Condition bookkeeping for control plane status
//!
//! Conditions live in a list ordered `Ready` first, then alphabetically by type,
//! matching what Cluster API tooling expects. Setting a condition whose status
//! did not change keeps the original `lastTransitionTime`.
//!
//! [`aggregate`] reduces per-machine readiness into a single parent condition.
//! It is a pure function of the snapshot it is given and remembers nothing.

use crate::crd::{Condition, ConditionSeverity, ConditionStatus, Machine, READY_CONDITION};

/// Aggregate readiness of all owned machines
pub const MACHINES_READY: &str = "MachinesReady";

/// Whether observed replicas match desired replicas
pub const RESIZED: &str = "Resized";

/// Whether the last machine creation attempt succeeded
pub const MACHINES_CREATED: &str = "MachinesCreated";

/// Reason: creating machines to reach desired replicas
pub const SCALING_UP: &str = "ScalingUp";

/// Reason: deleting machines to reach desired replicas
pub const SCALING_DOWN: &str = "ScalingDown";

/// Reason: the control plane is being torn down
pub const DELETING: &str = "Deleting";

/// Reason: the infrastructure machine template could not be cloned
pub const INFRASTRUCTURE_TEMPLATE_CLONING_FAILED: &str = "InfrastructureTemplateCloningFailed";

/// Reason: the bootstrap config could not be created
pub const BOOTSTRAP_TEMPLATE_CLONING_FAILED: &str = "BootstrapTemplateCloningFailed";

/// Reason: the Machine object could not be created
pub const MACHINE_CREATION_FAILED: &str = "MachineCreationFailed";

/// Fallback reason when a not-ready child gives none
pub const NOT_READY: &str = "NotReady";

/// Find a condition by type
pub fn get<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Whether a condition of the given type is present
pub fn has(conditions: &[Condition], type_: &str) -> bool {
    get(conditions, type_).is_some()
}

/// Insert or replace a condition, keeping the list ordered
pub fn set(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
    conditions.sort_by(|a, b| {
        (a.type_ != READY_CONDITION, a.type_.as_str())
            .cmp(&(b.type_ != READY_CONDITION, b.type_.as_str()))
    });
}

/// Set a condition to `True`
pub fn mark_true(conditions: &mut Vec<Condition>, type_: &str) {
    set(conditions, Condition::true_(type_));
}

/// Set a condition to `False` with a reason and severity
pub fn mark_false(
    conditions: &mut Vec<Condition>,
    type_: &str,
    reason: &str,
    severity: ConditionSeverity,
    message: impl Into<String>,
) {
    set(conditions, Condition::false_(type_, reason, severity, message));
}

/// Readiness signal contributed by one child object
#[derive(Clone, Debug, PartialEq)]
pub struct ChildReadiness {
    /// `Kind/name` of the child, used in aggregate messages
    pub source: String,
    /// The child's `Ready` condition; `None` if it has not reported yet
    pub ready: Option<Condition>,
}

impl ChildReadiness {
    /// Readiness of a CAPI machine
    pub fn from_machine(machine: &Machine) -> Self {
        use kube::ResourceExt;
        Self {
            source: format!("Machine/{}", machine.name_any()),
            ready: machine.ready_condition().cloned(),
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.as_ref().is_some_and(Condition::is_true)
    }

    /// Ordering key for "how not-ready" this child is: False beats Unknown,
    /// then higher severity wins.
    fn badness(&self) -> (u8, Option<ConditionSeverity>) {
        match &self.ready {
            Some(c) if c.status == ConditionStatus::False => (2, c.severity),
            Some(c) if c.status == ConditionStatus::True => (0, None),
            _ => (1, None),
        }
    }
}

/// Reduce child readiness into one condition of type `target`
///
/// Returns `None` for an empty child set, so callers leave any previously
/// computed aggregate untouched. Otherwise the result is `True` when every
/// child is ready, and `False` carrying the reason and severity of the worst
/// child (first one wins among equals) when any is not.
pub fn aggregate(target: &str, children: &[ChildReadiness]) -> Option<Condition> {
    if children.is_empty() {
        return None;
    }

    let not_ready: Vec<&ChildReadiness> = children.iter().filter(|c| !c.is_ready()).collect();
    let mut worst: Option<&ChildReadiness> = None;
    for child in &not_ready {
        if worst.map_or(true, |w| child.badness() > w.badness()) {
            worst = Some(child);
        }
    }

    let Some(worst) = worst else {
        return Some(Condition::true_(target));
    };

    let (reason, severity, detail) = match &worst.ready {
        Some(c) => (
            c.reason.clone(),
            c.severity,
            if c.message.is_empty() {
                c.reason.clone()
            } else {
                c.message.clone()
            },
        ),
        None => (String::new(), None, "Ready condition not reported".to_string()),
    };
    let reason = if reason.is_empty() {
        NOT_READY.to_string()
    } else {
        reason
    };
    let severity = match (worst.badness().0, severity) {
        (2, Some(s)) => s,
        (2, None) => ConditionSeverity::Warning,
        _ => ConditionSeverity::Info,
    };

    let mut message = format!(
        "{} of {} not ready; {}",
        not_ready.len(),
        children.len(),
        worst.source
    );
    if !detail.is_empty() {
        message.push_str(": ");
        message.push_str(&detail);
    }

    Some(Condition::false_(target, reason, severity, message))
}
