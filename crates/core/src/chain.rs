use alloy::primitives::{Address, address};
use alloy_chains::Chain;

// Multicall3 is deployed at the same address on every chain in the scan set.
const MULTICALL3: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

/// Chains with a known Multicall3 deployment, i.e. chains whose token
/// balances can be fetched in a single batched call.
const MULTICALL_CHAINS: &[u64] = &[
    1,        // mainnet
    10,       // optimism
    56,       // bsc
    100,      // gnosis
    137,      // polygon
    8453,     // base
    42161,    // arbitrum
    43114,    // avalanche
    11155111, // sepolia
];

/// Whether token balances on this chain can be aggregated into one call.
pub fn supports_multicall(chain_id: u64) -> bool {
    MULTICALL_CHAINS.contains(&chain_id)
}

/// The batching contract for a chain, when one is available.
pub fn multicall_address(chain_id: u64) -> Option<Address> {
    supports_multicall(chain_id).then_some(MULTICALL3)
}

/// Human-readable chain name for logging, falling back to the raw id.
pub fn chain_label(chain_id: u64) -> String {
    Chain::from_id(chain_id)
        .named()
        .map(|named| named.to_string())
        .unwrap_or_else(|| format!("chain {chain_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multicall_support_is_a_fixed_table() {
        assert!(supports_multicall(1));
        assert!(supports_multicall(42161));
        assert!(!supports_multicall(0));
        assert!(!supports_multicall(7777));
    }

    #[test]
    fn multicall_address_only_for_supported_chains() {
        assert_eq!(multicall_address(1), Some(MULTICALL3));
        assert_eq!(multicall_address(7777), None);
    }

    #[test]
    fn labels_known_and_unknown_chains() {
        assert_eq!(chain_label(1), "mainnet");
        assert_eq!(chain_label(999999999), "chain 999999999");
    }
}
