use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::{
    contracts::{ContractView, LifecycleState},
    types::{BlockHeight, Currency},
};

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationError {
    #[error("Spent {spent} exceeds allowance funds {funds}")]
    Overspent { spent: Currency, funds: Currency },
    #[error("Allowance identity broken: {accounted} accounted for, {funds} funds")]
    AllowanceMismatch { accounted: Currency, funds: Currency },
    #[error("Wallet spent {wallet_spent}, contracts account for {accounted}")]
    WalletMismatch {
        wallet_spent: Currency,
        accounted: Currency,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialMetrics {
    pub contract_fees: Currency,
    pub total_allocated: Currency,
    pub upload_spending: Currency,
    pub download_spending: Currency,
    pub storage_spending: Currency,
    pub withheld_funds: Currency,
    pub previous_spending: Currency,
    pub release_block: BlockHeight,
    pub unspent: Currency,
}

#[derive(Debug, Clone, Copy)]
pub struct LedgerContext {
    pub funds: Currency,
    pub period_start: BlockHeight,
    pub height: BlockHeight,
    pub window_size: BlockHeight,
    pub maturity_delay: BlockHeight,
}

enum Bucket {
    Previous,
    Current,
    Withheld,
}

fn classify(view: &ContractView, ctx: &LedgerContext) -> Bucket {
    let c = &view.contract;
    let maturity = c.maturity_height(ctx.window_size, ctx.maturity_delay);
    // same boundary as the Inactive -> Expired transition
    if view.state == LifecycleState::Expired || maturity < ctx.height {
        return Bucket::Previous;
    }
    if view.state == LifecycleState::Active && c.good_for_renew {
        return Bucket::Current;
    }
    if c.start_height >= ctx.period_start {
        Bucket::Current
    } else {
        Bucket::Withheld
    }
}

impl FinancialMetrics {
    pub fn compute(contracts: &[ContractView], ctx: &LedgerContext) -> Self {
        let mut m = FinancialMetrics::default();
        for view in contracts {
            let c = &view.contract;
            match classify(view, ctx) {
                Bucket::Previous => {
                    m.previous_spending += c.fees + c.spending();
                }
                Bucket::Current => {
                    m.contract_fees += c.fees;
                    m.total_allocated += c.total_cost;
                    m.upload_spending += c.upload_spending;
                    m.download_spending += c.download_spending;
                    m.storage_spending += c.storage_spending;
                }
                Bucket::Withheld => {
                    m.withheld_funds += c.renter_funds;
                    m.release_block = m
                        .release_block
                        .max(c.maturity_height(ctx.window_size, ctx.maturity_delay));
                    m.previous_spending += c.fees + c.spending();
                }
            }
        }
        m.unspent = ctx.funds.saturating_sub(m.spent());
        m
    }

    /// Fees plus the three spending categories of the current period.
    pub fn spent(&self) -> Currency {
        self.contract_fees + self.upload_spending + self.download_spending + self.storage_spending
    }

    /// Checks `fees + upload + download + storage + unspent == funds`.
    pub fn reconcile(&self, funds: Currency) -> Result<(), ReconciliationError> {
        let spent = self.spent();
        if spent > funds {
            return Err(ReconciliationError::Overspent { spent, funds });
        }
        let accounted = spent + self.unspent;
        if accounted != funds {
            return Err(ReconciliationError::AllowanceMismatch { accounted, funds });
        }
        Ok(())
    }

    /// Checks `initial - confirmed == allocated + withheld + previous`.
    pub fn reconcile_wallet(
        &self,
        initial_balance: Currency,
        confirmed_balance: Currency,
    ) -> Result<(), ReconciliationError> {
        let wallet_spent = initial_balance.saturating_sub(confirmed_balance);
        let accounted = self.total_allocated + self.withheld_funds + self.previous_spending;
        if wallet_spent != accounted {
            return Err(ReconciliationError::WalletMismatch {
                wallet_spent,
                accounted,
            });
        }
        Ok(())
    }
}
