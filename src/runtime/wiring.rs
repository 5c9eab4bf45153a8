//! Wiring plans and timing wrappers.
//!
//! A plan is built from a component class's static annotation table the first
//! time one of its instances is wired, then reused by every later instance of
//! the same class. Re-registering a tag creates a new class and therefore a
//! new plan.

use std::collections::HashMap;
use std::rc::Rc;

use super::scheduler::TimerId;
use super::ClassId;
use crate::annotations::{AnnotationKind, AnnotationMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingKind {
    Debounce,
    Throttle,
}

impl TimingKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "debounce" => Some(TimingKind::Debounce),
            "throttle" => Some(TimingKind::Throttle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WiringEntry {
    /// Listen for `event_type` on elements matching `selector` under the
    /// mount root, or on the component root when there is no selector.
    Event {
        method_name: String,
        event_type: String,
        selector: Option<String>,
    },
    Timing {
        method_name: String,
        kind: TimingKind,
        delay_ms: u64,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WiringPlan {
    pub entries: Vec<WiringEntry>,
}

impl WiringPlan {
    pub fn from_annotations(annotations: &[AnnotationMetadata]) -> Self {
        let entries = annotations
            .iter()
            .filter_map(|annotation| match &annotation.kind {
                AnnotationKind::Event {
                    event_type,
                    selector,
                } => Some(WiringEntry::Event {
                    method_name: annotation.method_name.clone(),
                    event_type: event_type.clone(),
                    selector: selector.clone().filter(|s| !s.trim().is_empty()),
                }),
                AnnotationKind::Timing {
                    timing_type,
                    delay_ms,
                } => TimingKind::from_name(timing_type).map(|kind| WiringEntry::Timing {
                    method_name: annotation.method_name.clone(),
                    kind,
                    delay_ms: *delay_ms,
                }),
                AnnotationKind::Unknown { .. } => {
                    log::debug!(
                        "[sfc] @{} on {} has no runtime behavior",
                        annotation.name,
                        annotation.method_name
                    );
                    None
                }
            })
            .collect();
        WiringPlan { entries }
    }

    pub fn events(&self) -> impl Iterator<Item = &WiringEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e, WiringEntry::Event { .. }))
    }

    pub fn timings(&self) -> impl Iterator<Item = &WiringEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e, WiringEntry::Timing { .. }))
    }
}

/// Plans keyed by component class.
#[derive(Debug, Default)]
pub struct WiringPlanCache {
    plans: HashMap<ClassId, Rc<WiringPlan>>,
    discoveries: usize,
}

impl WiringPlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan_for(&mut self, class: ClassId, annotations: &[AnnotationMetadata]) -> Rc<WiringPlan> {
        if let Some(plan) = self.plans.get(&class) {
            return Rc::clone(plan);
        }
        self.discoveries += 1;
        let plan = Rc::new(WiringPlan::from_annotations(annotations));
        log::debug!(
            "[sfc] wiring plan for class {:?}: {} entries",
            class,
            plan.entries.len()
        );
        self.plans.insert(class, Rc::clone(&plan));
        plan
    }

    /// Number of times a plan was built rather than reused.
    pub fn discoveries(&self) -> usize {
        self.discoveries
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TIMING WRAPPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-instance state of a debounced or throttled method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingWrapper {
    pub kind: TimingKind,
    pub delay_ms: u64,
    pending: Option<TimerId>,
    last_run_ms: Option<u64>,
}

/// What a wrapped call should do now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingDecision {
    /// Run the method immediately.
    Run,
    /// Cancel `cancel` (if any) and schedule a run after `delay_ms`.
    Schedule { cancel: Option<TimerId>, delay_ms: u64 },
    /// Drop the call.
    Skip,
}

impl TimingWrapper {
    pub fn new(kind: TimingKind, delay_ms: u64) -> Self {
        TimingWrapper {
            kind,
            delay_ms,
            pending: None,
            last_run_ms: None,
        }
    }

    /// Debounce restarts its timer on every call. Throttle runs on the leading
    /// edge and drops calls until `delay_ms` has passed.
    pub fn decide(&mut self, now_ms: u64) -> TimingDecision {
        match self.kind {
            TimingKind::Debounce => TimingDecision::Schedule {
                cancel: self.pending.take(),
                delay_ms: self.delay_ms,
            },
            TimingKind::Throttle => match self.last_run_ms {
                Some(last) if now_ms < last + self.delay_ms => TimingDecision::Skip,
                _ => {
                    self.last_run_ms = Some(now_ms);
                    TimingDecision::Run
                }
            },
        }
    }

    pub fn scheduled(&mut self, timer: TimerId) {
        self.pending = Some(timer);
    }

    pub fn fired(&mut self, now_ms: u64) {
        self.pending = None;
        self.last_run_ms = Some(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> Vec<AnnotationMetadata> {
        vec![
            AnnotationMetadata::classify("save", "click", vec![json!(".btn")]),
            AnnotationMetadata::classify("save", "debounce", vec![json!(300)]),
            AnnotationMetadata::classify("onKey", "keydown", vec![]),
            AnnotationMetadata::classify("track", "analytics", vec![json!("x")]),
        ]
    }

    #[test]
    fn test_plan_from_annotations() {
        let plan = WiringPlan::from_annotations(&table());
        assert_eq!(plan.entries.len(), 3);
        assert_eq!(
            plan.entries[0],
            WiringEntry::Event {
                method_name: "save".to_string(),
                event_type: "click".to_string(),
                selector: Some(".btn".to_string()),
            }
        );
        assert_eq!(plan.events().count(), 2);
        assert_eq!(
            plan.timings().next(),
            Some(&WiringEntry::Timing {
                method_name: "save".to_string(),
                kind: TimingKind::Debounce,
                delay_ms: 300,
            })
        );
    }

    #[test]
    fn test_plan_cache_per_class() {
        let mut cache = WiringPlanCache::new();
        let first = cache.plan_for(ClassId(1), &table());
        let again = cache.plan_for(ClassId(1), &[]);
        assert!(Rc::ptr_eq(&first, &again));
        assert_eq!(cache.discoveries(), 1);
        cache.plan_for(ClassId(2), &table());
        assert_eq!(cache.discoveries(), 2);
    }

    #[test]
    fn test_throttle_decisions() {
        let mut wrapper = TimingWrapper::new(TimingKind::Throttle, 100);
        assert_eq!(wrapper.decide(0), TimingDecision::Run);
        assert_eq!(wrapper.decide(50), TimingDecision::Skip);
        assert_eq!(wrapper.decide(99), TimingDecision::Skip);
        assert_eq!(wrapper.decide(100), TimingDecision::Run);
    }

    #[test]
    fn test_debounce_cancels_pending() {
        let mut wrapper = TimingWrapper::new(TimingKind::Debounce, 300);
        assert_eq!(
            wrapper.decide(0),
            TimingDecision::Schedule {
                cancel: None,
                delay_ms: 300
            }
        );
        let mut scheduler: super::super::scheduler::Scheduler<()> = Default::default();
        let timer = scheduler.set_timeout(300, ());
        wrapper.scheduled(timer);
        assert_eq!(
            wrapper.decide(100),
            TimingDecision::Schedule {
                cancel: Some(timer),
                delay_ms: 300
            }
        );
    }
}
