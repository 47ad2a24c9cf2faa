//! Read-only network identity consumed by the bootstrap workers.

use ledgerboot_consensus::{ChainParams, Hash256, Network};
use ledgerboot_primitives::{genesis_header, BlockHeader};

#[derive(Clone, Debug)]
pub struct BootstrapParams {
    pub network: Network,
    pub message_start: [u8; 4],
    /// Published hash of the genesis block, reported in identity errors.
    pub genesis_hash: Hash256,
    /// Header the first stored block record must carry.
    pub genesis_header: BlockHeader,
    pub bootstrap_url: String,
    pub min_free_space: u64,
}

impl BootstrapParams {
    pub fn from_chain(params: &ChainParams) -> Self {
        Self {
            network: params.network,
            message_start: params.message_start,
            genesis_hash: params.hash_genesis_block,
            genesis_header: genesis_header(&params.genesis),
            bootstrap_url: params.bootstrap_url.to_string(),
            min_free_space: params.min_free_space,
        }
    }

    pub fn for_network(network: Network) -> Self {
        Self::from_chain(&ledgerboot_consensus::chain_params(network))
    }

    pub fn with_bootstrap_url(mut self, url: impl Into<String>) -> Self {
        self.bootstrap_url = url.into();
        self
    }
}
