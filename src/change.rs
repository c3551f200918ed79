//! Change calculation for manually selected inputs

use crate::error::BridgeError;
use crate::types::{Amount, TransactionDestination};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeOutcome {
    /// Value left over after destinations and fee. Zero when a send-max
    /// destination absorbs it.
    pub change_amount: Amount,
    pub requires_change_output: bool,
    /// Final amount of the send-max destination, if there is one
    pub max_destination_amount: Option<Amount>,
}

/// Work out change for `total_input` spread over `destinations`
///
/// `input_count` only guards against computing change for an empty input
/// set; the fee is estimated by the caller.
pub fn compute_change(
    input_count: usize,
    total_input: Amount,
    destinations: &[TransactionDestination],
    estimated_fee: Amount,
) -> Result<ChangeOutcome> {
    if input_count == 0 {
        return Err(BridgeError::NoInputsSelected);
    }
    let max_count = destinations.iter().filter(|d| d.send_max).count();
    if max_count > 1 {
        return Err(BridgeError::invalid_input(
            "only one destination can be marked send-max",
        ));
    }

    let fixed = Amount::checked_sum(destinations.iter().filter(|d| !d.send_max).map(|d| d.amount))
        .ok_or_else(|| BridgeError::invalid_input("destination amounts overflow"))?;
    let required = fixed
        .checked_add(estimated_fee)
        .ok_or_else(|| BridgeError::invalid_input("destination amounts plus fee overflow"))?;
    let remaining = total_input
        .checked_sub(required)
        .ok_or_else(|| BridgeError::invalid_input("destination amounts plus fee overflow"))?;

    if !remaining.is_positive() {
        return Err(BridgeError::InsufficientFunds {
            available: total_input,
            required,
        });
    }

    if max_count == 1 {
        return Ok(ChangeOutcome {
            change_amount: Amount::ZERO,
            requires_change_output: false,
            max_destination_amount: Some(remaining),
        });
    }

    Ok(ChangeOutcome {
        change_amount: remaining,
        requires_change_output: true,
        max_destination_amount: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest(amount: i64) -> TransactionDestination {
        TransactionDestination::new("TsDest", Amount(amount))
    }

    #[test]
    fn test_change_for_single_destination() {
        let outcome = compute_change(2, Amount(10_000_000), &[dest(3_000_000)], Amount(1_000)).unwrap();
        assert_eq!(outcome.change_amount, Amount(6_999_000));
        assert!(outcome.requires_change_output);
        assert_eq!(outcome.max_destination_amount, None);
    }

    #[test]
    fn test_send_max_absorbs_change() {
        let destinations = vec![TransactionDestination::send_max("TsMax"), dest(2_000_000)];
        let outcome = compute_change(1, Amount(10_000_000), &destinations, Amount(1_000)).unwrap();
        assert_eq!(outcome.max_destination_amount, Some(Amount(7_999_000)));
        assert!(!outcome.requires_change_output);
        assert_eq!(outcome.change_amount, Amount::ZERO);
    }

    #[test]
    fn test_exact_spend_is_insufficient() {
        // No room left for a change output
        let err = compute_change(1, Amount(10_000), &[dest(9_000)], Amount(1_000)).unwrap_err();
        match err {
            BridgeError::InsufficientFunds { available, required } => {
                assert_eq!(available, Amount(10_000));
                assert_eq!(required, Amount(10_000));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_send_max_with_nothing_left() {
        let destinations = vec![TransactionDestination::send_max("TsMax"), dest(9_500)];
        assert!(matches!(
            compute_change(1, Amount(10_000), &destinations, Amount(500)),
            Err(BridgeError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_rejects_two_send_max() {
        let destinations = vec![
            TransactionDestination::send_max("TsA"),
            TransactionDestination::send_max("TsB"),
        ];
        assert!(matches!(
            compute_change(1, Amount(10_000), &destinations, Amount(500)),
            Err(BridgeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_overflowing_destinations_are_rejected() {
        let err = compute_change(1, Amount(10_000), &[dest(i64::MAX), dest(i64::MAX)], Amount(1)).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidInput(_)), "unexpected error: {err}");

        // A single huge destination overflows once the fee is added
        let err = compute_change(1, Amount(10_000), &[dest(i64::MAX)], Amount(1)).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidInput(_)), "unexpected error: {err}");
    }

    #[test]
    fn test_no_inputs() {
        assert!(matches!(
            compute_change(0, Amount::ZERO, &[dest(1)], Amount(1)),
            Err(BridgeError::NoInputsSelected)
        ));
    }
}
