//! Invoice workflow state machine.
//!
//! Legal transitions:
//!
//! ```text
//! draft ----------> emitted ----> partially_paid ----> paid
//!   |                  |  ^___________|  ^______________|
//!   |                  |  |______________|______________|   (allocation
//!   |                  |                                     reversal moves
//!   +----> cancelled <-+---- partially_paid                  payment states
//!                                                            back down)
//! ```
//!
//! `paid` and `cancelled` are terminal. There is no path back to `draft`.
//! Payment-driven moves (`emitted`/`partially_paid`/`paid` between each
//! other) are automatic, fired by allocation and reversal recomputation;
//! emission and cancellation are explicit caller actions.

use rust_decimal::Decimal;
use service_core::error::AppError;

use crate::models::InvoiceStatus;
use crate::money;

/// Whether `from -> to` is a legal invoice status transition.
pub fn can_transition(from: InvoiceStatus, to: InvoiceStatus) -> bool {
    use InvoiceStatus::*;
    matches!(
        (from, to),
        (Draft, Emitted)
            | (Emitted, PartiallyPaid)
            | (Emitted, Paid)
            | (PartiallyPaid, Paid)
            | (PartiallyPaid, Emitted)
            | (Paid, PartiallyPaid)
            | (Paid, Emitted)
            | (Draft, Cancelled)
            | (Emitted, Cancelled)
            | (PartiallyPaid, Cancelled)
    )
}

/// Fail with `InvalidState` naming both states when the transition is
/// illegal; never a silent no-op.
pub fn ensure_transition(from: InvoiceStatus, to: InvoiceStatus) -> Result<(), AppError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(AppError::InvalidState(anyhow::anyhow!(
            "illegal invoice transition from '{}' to '{}'",
            from,
            to
        )))
    }
}

/// Status an invoice should hold for a given paid amount, used after every
/// allocation or reversal recomputation. Handles both the automatic advance
/// (`emitted -> partially_paid -> paid`) and the downgrade path on reversal;
/// it can never produce `draft` or `cancelled`.
pub fn status_for_payment_state(
    current: InvoiceStatus,
    amount_paid: Decimal,
    amount_ttc: Decimal,
) -> Result<InvoiceStatus, AppError> {
    match current {
        InvoiceStatus::Emitted | InvoiceStatus::PartiallyPaid | InvoiceStatus::Paid => {
            if amount_paid.is_zero() {
                Ok(InvoiceStatus::Emitted)
            } else if money::is_settled(amount_paid, amount_ttc) {
                Ok(InvoiceStatus::Paid)
            } else {
                Ok(InvoiceStatus::PartiallyPaid)
            }
        }
        InvoiceStatus::Draft | InvoiceStatus::Cancelled => {
            if amount_paid.is_zero() {
                Ok(current)
            } else {
                Err(AppError::InvariantViolation(anyhow::anyhow!(
                    "allocations recorded against an invoice in status '{}'",
                    current
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InvoiceStatus::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn draft_can_only_be_emitted_or_cancelled() {
        assert!(can_transition(Draft, Emitted));
        assert!(can_transition(Draft, Cancelled));
        assert!(!can_transition(Draft, PartiallyPaid));
        assert!(!can_transition(Draft, Paid));
    }

    #[test]
    fn paid_and_cancelled_have_no_explicit_exits() {
        assert!(!can_transition(Paid, Cancelled));
        assert!(!can_transition(Cancelled, Draft));
        assert!(!can_transition(Cancelled, Emitted));
        // Downgrades out of paid exist only via reversal recomputation.
        assert!(can_transition(Paid, PartiallyPaid));
        assert!(can_transition(Paid, Emitted));
    }

    #[test]
    fn no_status_ever_returns_to_draft() {
        for from in [Emitted, PartiallyPaid, Paid, Cancelled] {
            assert!(!can_transition(from, Draft));
        }
    }

    #[test]
    fn ensure_transition_names_both_states() {
        let err = ensure_transition(Paid, Cancelled).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("paid"));
        assert!(message.contains("cancelled"));
    }

    #[test]
    fn payment_state_advances_and_downgrades() {
        let ttc = dec("238.50");
        assert_eq!(
            status_for_payment_state(Emitted, dec("0"), ttc).unwrap(),
            Emitted
        );
        assert_eq!(
            status_for_payment_state(Emitted, dec("100.00"), ttc).unwrap(),
            PartiallyPaid
        );
        assert_eq!(
            status_for_payment_state(PartiallyPaid, dec("238.50"), ttc).unwrap(),
            Paid
        );
        // Reversal downgrades.
        assert_eq!(
            status_for_payment_state(Paid, dec("100.00"), ttc).unwrap(),
            PartiallyPaid
        );
        assert_eq!(
            status_for_payment_state(Paid, dec("0"), ttc).unwrap(),
            Emitted
        );
    }

    #[test]
    fn settlement_requires_exact_equality() {
        let ttc = dec("238.50");
        assert_eq!(
            status_for_payment_state(PartiallyPaid, dec("238.49"), ttc).unwrap(),
            PartiallyPaid
        );
    }

    #[test]
    fn paid_amount_on_draft_is_an_invariant_violation() {
        let err = status_for_payment_state(Draft, dec("1.00"), dec("10.00")).unwrap_err();
        assert!(matches!(err, AppError::InvariantViolation(_)));
    }
}
