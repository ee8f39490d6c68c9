use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error as ThisError;
use tracing::debug;

use crate::types::{BlockHeight, ContractId, Currency, HostKey};

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Insufficient balance: {needed} needed, {available} available")]
    InsufficientBalance {
        needed: Currency,
        available: Currency,
    },
}

#[derive(Debug, Clone)]
pub struct FundingRequest {
    pub host_key: HostKey,
    pub start_height: BlockHeight,
    pub end_height: BlockHeight,
    pub renter_funds: Currency,
    pub host_fee: Currency,
    pub renewed_from: Option<ContractId>,
}

/// A funded, signed contract transaction.
#[derive(Debug, Clone)]
pub struct SignedContract {
    pub id: ContractId,
    pub renter_funds: Currency,
    pub fees: Currency,
    pub total_cost: Currency,
}

pub trait Wallet: Send + Sync + Clone + 'static {
    /// Transaction fee the wallet expects to add on top of the host fee.
    fn estimate_fee(&self) -> Currency;

    fn fund_and_sign(
        &self,
        request: FundingRequest,
    ) -> impl Future<Output = Result<SignedContract, WalletError>> + Send;

    /// Returns unspent renter funds of a matured contract to the wallet.
    fn release(&self, amount: Currency) -> impl Future<Output = Result<(), WalletError>> + Send;

    fn confirmed_balance(&self) -> impl Future<Output = Currency> + Send;
}

struct LocalState {
    balance: Currency,
    tx_fee: Currency,
    nonce: u64,
}

/// Single-process wallet holding a plain balance. Used by the development
/// binary and the tests.
#[derive(Clone)]
pub struct LocalWallet {
    state: Arc<Mutex<LocalState>>,
}

impl LocalWallet {
    pub fn new(balance: Currency, tx_fee: Currency) -> Self {
        Self {
            state: Arc::new(Mutex::new(LocalState {
                balance,
                tx_fee,
                nonce: 0,
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Wallet for LocalWallet {
    fn estimate_fee(&self) -> Currency {
        self.state().tx_fee
    }

    async fn fund_and_sign(&self, request: FundingRequest) -> Result<SignedContract, WalletError> {
        let mut state = self.state();
        let fees = request.host_fee + state.tx_fee;
        let total_cost = request.renter_funds + fees;
        let balance = state
            .balance
            .checked_sub(total_cost)
            .ok_or(WalletError::InsufficientBalance {
                needed: total_cost,
                available: state.balance,
            })?;
        state.balance = balance;
        state.nonce += 1;
        let id = ContractId::derive(&request.host_key, request.start_height, state.nonce);
        debug!("Funded contract {} for {}", id, total_cost);
        Ok(SignedContract {
            id,
            renter_funds: request.renter_funds,
            fees,
            total_cost,
        })
    }

    async fn release(&self, amount: Currency) -> Result<(), WalletError> {
        let mut state = self.state();
        state.balance += amount;
        Ok(())
    }

    async fn confirmed_balance(&self) -> Currency {
        self.state().balance
    }
}
