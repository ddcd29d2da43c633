// src/scheduler.rs

//! Force-install deadlines
//!
//! Items may carry a `force_install_after_date`. Once the deadline passes the
//! install stops being optional: items that need no logout or restart are
//! flipped to unattended installation, and the others escalate the urgency
//! reported to whoever drives the install session.
//!
//! Deadlines are wall-clock times with no timezone; they are compared
//! against local time.

use crate::catalog::RestartAction;
use crate::resolver::OutcomeRecord;
use chrono::{Duration, NaiveDateTime};
use std::fmt;
use tracing::debug;

/// How soon forced installs must happen
///
/// Ordered so the most urgent value compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Urgency {
    /// A deadline falls within the warning window
    Soon,
    /// A deadline passed on an item that requires logout
    Logout,
    /// A deadline passed on an item that requires restart
    Restart,
    /// A deadline passed and the item installs unattended
    Now,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Soon => "soon",
            Self::Logout => "logout",
            Self::Restart => "restart",
            Self::Now => "now",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluates force-install deadlines over a pending install list
#[derive(Debug, Clone, Copy)]
pub struct ForceInstallScheduler {
    warning_window: Duration,
}

impl Default for ForceInstallScheduler {
    fn default() -> Self {
        Self::new(4)
    }
}

impl ForceInstallScheduler {
    /// Create a scheduler warning `warning_hours` ahead of each deadline
    pub fn new(warning_hours: i64) -> Self {
        Self {
            warning_window: Duration::hours(warning_hours),
        }
    }

    /// Classify deadlines as of `now`
    ///
    /// Returns the most urgent classification across all records and
    /// whether any record was switched to unattended installation.
    pub fn evaluate(&self, installs: &mut [OutcomeRecord], now: NaiveDateTime) -> (Option<Urgency>, bool) {
        let mut result: Option<Urgency> = None;
        let mut mutated = false;
        let warn_after = now + self.warning_window;

        for install in installs.iter_mut() {
            let Some(deadline) = install.force_install_after_date else {
                continue;
            };
            debug!("Forced install for {} at {}", install.name, deadline);

            let urgency = if now >= deadline {
                Some(match install.restart_action {
                    Some(RestartAction::RequireLogout) => Urgency::Logout,
                    Some(RestartAction::RequireRestart) => Urgency::Restart,
                    _ => {
                        if !install.has_restart_action() && !install.unattended_install {
                            debug!("Setting unattended install for {}", install.name);
                            install.unattended_install = true;
                            mutated = true;
                        }
                        Urgency::Now
                    }
                })
            } else if warn_after >= deadline {
                Some(Urgency::Soon)
            } else {
                None
            };

            result = result.max(urgency);
        }

        (result, mutated)
    }
}

/// Earliest force-install deadline among the records
pub fn earliest_deadline(installs: &[OutcomeRecord]) -> Option<NaiveDateTime> {
    installs
        .iter()
        .filter_map(|i| i.force_install_after_date)
        .min()
}

/// Human-readable distance to a deadline
pub fn describe_deadline(deadline: NaiveDateTime, now: NaiveDateTime) -> String {
    let total_secs = (deadline - now).num_seconds();
    if total_secs <= 0 {
        return "overdue".to_string();
    }

    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;

    if hours > 24 {
        format!("in {} day(s)", hours / 24)
    } else if hours > 0 {
        format!("in {}h {}m", hours, minutes)
    } else {
        format!("in {} minute(s)", minutes.max(1))
    }
}
