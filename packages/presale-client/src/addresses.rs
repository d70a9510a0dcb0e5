//! Contract addresses per chain
//!
//! Each recognized chain id maps to a fixed set of contract addresses.
//! An unrecognized chain resolves to `None`, never to an error: the
//! dependent contract handles are simply left unset.

use alloy::primitives::{address, Address};
use eyre::{eyre, Result, WrapErr};
use std::collections::HashMap;
use std::str::FromStr;

/// Contracts valid on one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainAddresses {
    /// Sale token
    pub token: Address,
    /// Crowdsale contract
    pub presale: Address,
    /// Uniswap V2 LP stake farm
    pub liquidity_pool: Address,
}

/// Immutable lookup of [`ChainAddresses`] by chain id
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    chains: HashMap<u64, ChainAddresses>,
}

impl AddressBook {
    /// Empty book; every chain is unresolved
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in deployments for mainnet, rinkeby and the private dev chain
    pub fn with_defaults() -> Self {
        let mut book = Self::new();
        book.insert(
            1,
            ChainAddresses {
                token: Address::ZERO,
                presale: Address::ZERO,
                liquidity_pool: Address::ZERO,
            },
        );
        book.insert(
            4,
            ChainAddresses {
                token: address!("14a2706903Cb41444fe3C748a8C32372d608bEb5"),
                presale: address!("B9cF9d90d39Ee86f08bC70b01d23Afe2524F2112"),
                liquidity_pool: address!("C2c4e4B52a042Eb79438991BB1632cc8115b6006"),
            },
        );
        book.insert(
            1337,
            ChainAddresses {
                token: address!("6fF3b07366E30E1722409742756eC1aAD4a451Ba"),
                presale: address!("53544F8F08464681DFD212B2BBB27e262256D17A"),
                liquidity_pool: address!("fb85456E1f6aec7C4024beb26C3a9f3F6eFB2B0a"),
            },
        );
        book
    }

    pub fn insert(&mut self, chain_id: u64, addresses: ChainAddresses) {
        self.chains.insert(chain_id, addresses);
    }

    pub fn resolve(&self, chain_id: u64) -> Option<ChainAddresses> {
        self.chains.get(&chain_id).copied()
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.chains.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Apply overrides of the form `chain_id:token,presale,pool;chain_id:...`
    pub fn apply_overrides(&mut self, overrides: &str) -> Result<()> {
        for entry in overrides.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (chain, contracts) = entry
                .split_once(':')
                .ok_or_else(|| eyre!("Address override {:?} is missing 'chain_id:'", entry))?;

            let chain_id: u64 = chain
                .trim()
                .parse()
                .wrap_err_with(|| format!("Invalid chain id in address override {:?}", entry))?;

            let parts: Vec<&str> = contracts.split(',').map(str::trim).collect();
            if parts.len() != 3 {
                return Err(eyre!(
                    "Address override for chain {} needs token,presale,pool (got {} values)",
                    chain_id,
                    parts.len()
                ));
            }

            let parse = |s: &str| {
                Address::from_str(s).wrap_err_with(|| format!("Invalid address {:?}", s))
            };
            self.insert(
                chain_id,
                ChainAddresses {
                    token: parse(parts[0])?,
                    presale: parse(parts[1])?,
                    liquidity_pool: parse(parts[2])?,
                },
            );
        }
        Ok(())
    }
}
