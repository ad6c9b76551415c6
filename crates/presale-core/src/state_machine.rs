use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The 5 states of a payment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Deposit address issued, no funds seen yet.
    Pending,
    /// Some funds arrived but the payment is not yet complete.
    Partial,
    /// Full funds confirmed and settled. Final state.
    Completed,
    /// The gateway timeout window elapsed before completion. Final state.
    Timeout,
    /// Cancelled by the buyer or the system before funds arrived. Final state.
    Cancelled,
}

impl PaymentStatus {
    /// Whether this is a terminal state. Terminal payments accept no further
    /// transitions and no side effects.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Timeout | Self::Cancelled)
    }

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Partial => "partial",
            Self::Completed => "completed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "partial" => Ok(Self::Partial),
            "completed" => Ok(Self::Completed),
            "timeout" => Ok(Self::Timeout),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(CoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// Outcome of applying a reported status to a stored status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to a new status.
    Advance(PaymentStatus),
    /// Same non-terminal status reported again; only the received amount
    /// may change.
    Refresh,
    /// An out-of-order report that would move the payment backwards.
    Stale,
}

/// Validates payment status transitions.
///
/// Valid transitions:
/// - Pending → Partial
/// - Pending → Completed
/// - Pending → Timeout
/// - Pending → Cancelled
/// - Partial → Completed
/// - Partial → Timeout
///
/// Pending → Pending and Partial → Partial are refreshes. Partial → Pending
/// is stale. Everything else, including any move out of a terminal state, is
/// rejected.
pub struct PaymentStateMachine;

impl PaymentStateMachine {
    /// Apply `reported` on top of `current`.
    pub fn transition(
        current: PaymentStatus,
        reported: PaymentStatus,
    ) -> Result<Transition, CoreError> {
        use PaymentStatus::*;

        let outcome = match (current, reported) {
            (Pending, Pending) | (Partial, Partial) => Transition::Refresh,
            (Partial, Pending) => Transition::Stale,

            (Pending, Partial) => Transition::Advance(Partial),
            (Pending, Completed) => Transition::Advance(Completed),
            (Pending, Timeout) => Transition::Advance(Timeout),
            (Pending, Cancelled) => Transition::Advance(Cancelled),

            (Partial, Completed) => Transition::Advance(Completed),
            (Partial, Timeout) => Transition::Advance(Timeout),

            _ => {
                return Err(CoreError::InvalidTransition {
                    from: current,
                    to: reported,
                })
            }
        };

        tracing::debug!(
            from = %current,
            to = %reported,
            outcome = ?outcome,
            "payment status transition"
        );

        Ok(outcome)
    }

    /// Check if moving to `reported` is accepted without performing it.
    pub fn can_transition(current: PaymentStatus, reported: PaymentStatus) -> bool {
        matches!(
            Self::transition(current, reported),
            Ok(Transition::Advance(_)) | Ok(Transition::Refresh)
        )
    }
}
