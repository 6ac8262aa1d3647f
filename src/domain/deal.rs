//! Deals: one DCA cycle and its state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::decimal::HUNDRED;
use super::error::DomainError;
use super::ids::{BotId, DealId};
use super::position::PositionTotals;

/// Deal state machine: `Pending -> Active -> {Completed, Failed}`.
///
/// `Pending` is exited only by a successful base-order fill. `Active` is
/// exited by a take-profit fill (Completed) or by reconciliation's
/// unrecoverable-cancellation path (Failed). Terminal states are
/// immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl DealStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    #[must_use]
    pub fn can_transition_to(&self, next: DealStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Failed)
                | (Self::Pending, Self::Failed)
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "ACTIVE" => Some(Self::Active),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One DCA cycle for a bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub bot_id: BotId,
    pub status: DealStatus,
    pub current_quantity: Decimal,
    pub average_price: Decimal,
    pub total_cost: Decimal,
    pub current_profit: Decimal,
    pub profit_percent: Option<Decimal>,
    pub actual_safety_orders: u32,
    /// User-facing channel for "recovered but verify exposure" warnings.
    pub warning_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Deal {
    /// Open a new deal in `Pending`; no orders exist yet.
    #[must_use]
    pub fn open(bot_id: BotId) -> Self {
        Self {
            id: DealId::generate(),
            bot_id,
            status: DealStatus::Pending,
            current_quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            current_profit: Decimal::ZERO,
            profit_percent: None,
            actual_safety_orders: 0,
            warning_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn transition(&mut self, next: DealStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Base order filled: `Pending -> Active` with the fill's totals.
    pub fn activate(&mut self, quantity: Decimal, price: Decimal, cost: Decimal) -> Result<(), DomainError> {
        self.transition(DealStatus::Active)?;
        self.current_quantity = quantity;
        self.average_price = price;
        self.total_cost = cost;
        Ok(())
    }

    /// Replace the aggregate position with freshly recomputed totals.
    ///
    /// Recomputing from the full filled-order set (instead of trusting a
    /// running total) is what makes redundant passes safe.
    pub fn apply_position(&mut self, totals: &PositionTotals) {
        self.current_quantity = totals.total_quantity;
        self.average_price = totals.average_price;
        self.total_cost = totals.total_cost;
    }

    /// Close the deal at a take-profit fill.
    pub fn complete(
        &mut self,
        proceeds: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition(DealStatus::Completed)?;
        let profit = proceeds - self.total_cost;
        self.current_profit = profit;
        if self.total_cost > Decimal::ZERO {
            self.profit_percent = Some(profit / self.total_cost * HUNDRED);
        }
        // The take-profit sold the whole position.
        self.current_quantity = Decimal::ZERO;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Unrecoverable state discovered by reconciliation.
    pub fn fail(&mut self) -> Result<(), DomainError> {
        self.transition(DealStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn attach_warning(&mut self, message: impl Into<String>) {
        self.warning_message = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn happy_path_transitions() {
        let mut deal = Deal::open(BotId::generate());
        assert_eq!(deal.status, DealStatus::Pending);

        deal.activate(dec!(0.2), dec!(100), dec!(20)).unwrap();
        assert_eq!(deal.status, DealStatus::Active);
        assert_eq!(deal.average_price, dec!(100));

        deal.complete(dec!(20.6), Utc::now()).unwrap();
        assert_eq!(deal.status, DealStatus::Completed);
        assert_eq!(deal.current_profit, dec!(0.6));
        assert_eq!(deal.profit_percent, Some(dec!(3)));
        assert_eq!(deal.current_quantity, Decimal::ZERO);
        assert!(deal.completed_at.is_some());
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut deal = Deal::open(BotId::generate());
        deal.activate(dec!(1), dec!(10), dec!(10)).unwrap();
        deal.complete(dec!(11), Utc::now()).unwrap();

        assert!(matches!(
            deal.fail(),
            Err(DomainError::InvalidTransition { from: "COMPLETED", .. })
        ));
        assert!(deal.activate(dec!(1), dec!(10), dec!(10)).is_err());
    }

    #[test]
    fn pending_cannot_complete_directly() {
        let mut deal = Deal::open(BotId::generate());
        assert!(deal.complete(dec!(1), Utc::now()).is_err());
    }

    #[test]
    fn pending_can_fail() {
        let mut deal = Deal::open(BotId::generate());
        deal.fail().unwrap();
        assert_eq!(deal.status, DealStatus::Failed);
    }

    #[test]
    fn completing_with_loss_yields_negative_profit() {
        let mut deal = Deal::open(BotId::generate());
        deal.activate(dec!(0.5), dec!(100), dec!(50)).unwrap();
        deal.complete(dec!(48.5), Utc::now()).unwrap();
        assert_eq!(deal.current_profit, dec!(-1.5));
        assert_eq!(deal.profit_percent, Some(dec!(-3)));
    }
}
