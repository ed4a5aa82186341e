//! Chain client abstraction. Submission is wallet-side; the coordinator only
//! needs read access: transaction status for verification, allowance and
//! balance reads for the approval gate.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoordinatorError;
use crate::types::{ChainTxStatus, Network};

pub mod evm;
pub mod solana;

pub use evm::EvmChainClient;
pub use solana::SolanaChainClient;

#[async_trait]
pub trait ChainClient: Send + Sync {
    fn network(&self) -> Network;

    /// On-chain status of a submitted transaction. `Pending` covers both
    /// "seen but unconfirmed" and "not seen yet"; the poller's attempt bound
    /// decides when pending becomes a timeout.
    async fn transaction_status(&self, reference: &str) -> Result<ChainTxStatus, CoordinatorError>;

    /// ERC-20 allowance granted by `owner` to `spender`. EVM only; other
    /// networks return [`CoordinatorError::AllowanceUnsupported`].
    async fn token_allowance(
        &self,
        owner: &str,
        spender: &str,
        token: &str,
    ) -> Result<u64, CoordinatorError>;

    /// Token balance of `owner` for `token`, in base units.
    async fn token_balance(&self, owner: &str, token: &str) -> Result<u64, CoordinatorError>;
}

/// Routes a transaction reference to the client for its chain.
#[derive(Clone)]
pub struct ChainRouter {
    evm: Arc<dyn ChainClient>,
    solana: Arc<dyn ChainClient>,
}

impl ChainRouter {
    pub fn new(evm: Arc<dyn ChainClient>, solana: Arc<dyn ChainClient>) -> Self {
        Self { evm, solana }
    }

    pub fn client_for(&self, network: Network) -> &Arc<dyn ChainClient> {
        match network {
            Network::Evm => &self.evm,
            Network::Solana => &self.solana,
        }
    }
}
