//! Facility-side alert list.
//!
//! Alerts are kept newest first. Only the channel session and explicit
//! acknowledgment mutate it.

use std::collections::{HashMap, VecDeque};

use crate::models::{Acknowledgment, Alert, AlertId, Vitals};
use crate::triage::classify;

/// How many acknowledged alerts are kept before the oldest are dropped.
///
/// Unacknowledged alerts are never pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerRetention {
    pub max_acknowledged: usize,
}

impl Default for LedgerRetention {
    fn default() -> Self {
        Self {
            max_acknowledged: 50,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertLedger {
    alerts: VecDeque<Alert>,
    retention: LedgerRetention,
}

impl AlertLedger {
    pub fn new(retention: LedgerRetention) -> Self {
        Self {
            alerts: VecDeque::new(),
            retention,
        }
    }

    fn position(&self, alert_id: &AlertId) -> Option<usize> {
        self.alerts
            .iter()
            .position(|alert| &alert.alert_id == alert_id)
    }

    /// Insert a new alert at the front, or refresh an existing one in place.
    ///
    /// Returns true when the alert was new.
    pub fn upsert(&mut self, alert: Alert) -> bool {
        let inserted = match self.position(&alert.alert_id) {
            Some(index) => {
                self.alerts[index].absorb(alert);
                false
            }
            None => {
                self.alerts.push_front(alert);
                true
            }
        };
        self.prune();
        inserted
    }

    /// Mark an alert handled. Unknown ids and repeat calls change nothing.
    pub fn acknowledge(&mut self, alert_id: &AlertId, acknowledgment: Acknowledgment) -> bool {
        let Some(index) = self.position(alert_id) else {
            return false;
        };
        let changed = self.alerts[index].acknowledge(acknowledgment);
        if changed {
            self.prune();
        }
        changed
    }

    /// Merge a vitals refresh and re-derive severity.
    pub fn apply_vitals(&mut self, alert_id: &AlertId, vitals: &Vitals) -> bool {
        let Some(index) = self.position(alert_id) else {
            return false;
        };
        let alert = &mut self.alerts[index];
        alert.vitals.merge(vitals);
        alert.severity = classify(&alert.vitals, &alert.chief_complaint);
        true
    }

    /// Replace contents with a hub snapshot.
    ///
    /// Alerts absent from the snapshot are dropped; local acknowledgments of
    /// alerts still present are kept along with their author and time.
    pub fn reconcile(&mut self, snapshot: Vec<Alert>) {
        let mut acknowledged: HashMap<AlertId, Alert> = self
            .alerts
            .drain(..)
            .filter(|alert| alert.acknowledged)
            .map(|alert| (alert.alert_id.clone(), alert))
            .collect();

        let mut snapshot = snapshot;
        snapshot.sort_by_key(|alert| alert.created_at);
        for alert in snapshot {
            let alert = match acknowledged.remove(&alert.alert_id) {
                Some(mut local) => {
                    local.absorb(alert);
                    local
                }
                None => alert,
            };
            match self.position(&alert.alert_id) {
                Some(index) => self.alerts[index].absorb(alert),
                None => self.alerts.push_front(alert),
            }
        }
        self.prune();
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }

    pub fn get(&self, alert_id: &AlertId) -> Option<&Alert> {
        self.alerts.iter().find(|alert| &alert.alert_id == alert_id)
    }

    /// Alerts, newest first.
    pub fn list(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    pub fn count(&self) -> usize {
        self.alerts.len()
    }

    pub fn unacknowledged_count(&self) -> usize {
        self.alerts.iter().filter(|alert| !alert.acknowledged).count()
    }

    fn prune(&mut self) {
        let mut excess = self
            .alerts
            .iter()
            .filter(|alert| alert.acknowledged)
            .count()
            .saturating_sub(self.retention.max_acknowledged);
        if excess == 0 {
            return;
        }

        // Oldest entries sit at the back
        let mut index = self.alerts.len();
        while excess > 0 && index > 0 {
            index -= 1;
            if self.alerts[index].acknowledged {
                self.alerts.remove(index);
                excess -= 1;
            }
        }
    }
}
