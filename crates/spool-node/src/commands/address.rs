use crate::cli::params::CommonParams;
use clap::Parser;
use spool_keystore::KeyVault;
use spool_primitives::Role;

/// The `address` command, printing what an operator needs to fund the chain.
///
/// Generates the keys on first use so the address can be funded before the
/// service ever runs.
#[derive(Debug, Parser)]
pub struct Address {
    #[allow(missing_docs)]
    #[clap(flatten)]
    pub common_params: CommonParams,
}

impl Address {
    /// Prints the chain address and canonical amount.
    pub fn run(self) -> anyhow::Result<()> {
        let network = bitcoin::Network::from(self.common_params.network);
        let role = Role::from(self.common_params.role);
        let key_path = super::key_file_path(&self.common_params.base_path(), network);

        let (vault, created) = KeyVault::load_or_generate(&key_path, role)?;
        if created {
            tracing::info!(path = %key_path.display(), "generated fresh keys");
        }

        println!("chain address: {}", vault.chain_address(network));
        println!(
            "canonical amount: {} sats",
            self.common_params.canonical_amount
        );
        if let Some(address) = vault.wallet_address(network) {
            println!("wallet address: {address}");
        }

        Ok(())
    }
}
