//! Deal lifecycle control: completion, failure, auto-restart.
//!
//! COMPLETED deals restart the cycle while the owning bot is RUNNING;
//! FAILED deals never restart on their own and wait for an operator.

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::domain::Bot;
use crate::error::Result;
use crate::port::{ExchangeGateway, Store};

use super::Engine;

impl<G: ExchangeGateway, S: Store> Engine<G, S> {
    /// Open the next cycle when the bot is still RUNNING.
    ///
    /// The bot's status is re-read from the store: a stop issued while
    /// the closing deal was in flight must win.
    pub(crate) async fn restart_if_running(&self, bot: &Bot) -> Result<()> {
        let Some(current) = self.store().bot(&bot.id).await? else {
            warn!(bot_id = %bot.id, "Bot vanished before restart");
            return Ok(());
        };
        if !current.is_running() {
            info!(bot = %current.name, "Bot stopped, not restarting cycle");
            return Ok(());
        }

        let deal = self.place_base_order(&current).await?;
        info!(bot = %current.name, deal_id = %deal.id, "New cycle started");
        Ok(())
    }

    /// Operator-facing warning for inventory left unsold after the
    /// take-profit already closed the deal.
    pub(crate) fn stranded_warning(bot: &Bot, quantity: Decimal) -> String {
        format!(
            "{} {} remained unsold after the take-profit filled; verify exposure manually",
            quantity, bot.pair.base_asset
        )
    }
}
