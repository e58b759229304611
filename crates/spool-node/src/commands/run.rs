use crate::cli::params::{BitcoindParams, CommonParams, RpcParams, ScanParams};
use bitcoin::Amount;
use clap::Parser;
use spool_bitcoind::BitcoindClient;
use spool_indexer::{
    BlockScanner, ChainQuery, ChainStore, ScannerConfig, TipTracker, WalletTracker,
};
use spool_keystore::KeyVault;
use spool_presigner::Presigner;
use spool_primitives::{BlockSource, Role};
use spool_rpc::SpoolRpc;
use std::sync::Arc;
use std::time::Duration;

/// The `run` command used to run a spool service.
#[derive(Debug, Parser)]
pub struct Run {
    #[allow(missing_docs)]
    #[clap(flatten)]
    pub common_params: CommonParams,

    #[allow(missing_docs)]
    #[clap(flatten)]
    pub bitcoind_params: BitcoindParams,

    #[allow(missing_docs)]
    #[clap(flatten)]
    pub scan_params: ScanParams,

    #[allow(missing_docs)]
    #[clap(flatten)]
    pub rpc_params: RpcParams,
}

impl Run {
    /// Starts the service and runs until a fatal error.
    pub async fn run(self) -> anyhow::Result<()> {
        let network = bitcoin::Network::from(self.common_params.network);
        let role = Role::from(self.common_params.role);
        let base_path = self.common_params.base_path();

        let store = ChainStore::open(&base_path, network).await?;

        // Once the chain exists, a missing or corrupt key file must abort
        // rather than regenerate: a fresh key would start a second,
        // incompatible chain.
        let key_path = super::key_file_path(&base_path, network);
        let chain_started = store.tip().await?.is_some();
        let vault = if chain_started {
            KeyVault::load(&key_path, role)?
        } else {
            let (vault, created) = KeyVault::load_or_generate(&key_path, role)?;
            if created {
                tracing::info!(path = %key_path.display(), "generated fresh keys");
            }
            vault
        };
        let vault = Arc::new(vault);

        let params = vault.chain_params(
            network,
            Amount::from_sat(self.common_params.canonical_amount),
        );
        tracing::info!(
            address = %params.chain_address,
            amount = %params.canonical_amount,
            "chain address"
        );
        if let Some(address) = vault.wallet_address(network) {
            tracing::info!(%address, "wallet address");
        }

        let bitcoind = Arc::new(BitcoindClient::new(
            &self.bitcoind_params.bitcoind_host,
            self.bitcoind_params.port(network),
            &self.bitcoind_params.bitcoind_user,
            &self.bitcoind_params.bitcoind_password,
        ));

        // Verify reachability up front; an unreachable bitcoind is fatal.
        let block_count = bitcoind.get_block_count().await?;
        tracing::info!(block_count, "connected to bitcoind");

        // First run skips history: start scanning at the current tip.
        store.init_cursor(block_count).await?;

        let source: Arc<dyn BlockSource> = bitcoind;
        let presigner = Presigner::new(vault.clone(), params.clone(), source.clone());

        let mut module = jsonrpsee::RpcModule::new(());
        SpoolRpc::new(
            ChainQuery::new(store.clone()),
            presigner,
            params.clone(),
            role,
        )
        .merge_into(&mut module)?;

        let server = jsonrpsee::server::Server::builder()
            .build(self.rpc_params.rpc_listen)
            .await?;
        let addr = server.local_addr()?;
        let server_handle = server.start(module);
        tracing::info!(%addr, "JSON-RPC server started");

        let scanner = BlockScanner::new(
            store,
            source,
            TipTracker::new(params),
            vault.wallet_script().map(WalletTracker::new),
            ScannerConfig {
                poll_interval: Duration::from_secs(self.scan_params.poll_interval),
                confirmations: self.scan_params.confirmations,
            },
        );

        // The scanner owns the main task until process exit; any error it
        // returns terminates the whole service.
        let result = scanner.run().await;
        server_handle.stop()?;
        Ok(result?)
    }
}
