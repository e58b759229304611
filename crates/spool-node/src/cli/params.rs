use clap::Parser;
use spool_primitives::Role;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Bitcoin network type.
#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
pub enum Network {
    /// Mainnet.
    Mainnet,
    /// Testnet.
    Testnet,
    /// Signet.
    Signet,
    /// Regtest.
    #[default]
    Regtest,
}

impl From<Network> for bitcoin::Network {
    fn from(network: Network) -> Self {
        match network {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Signet => bitcoin::Network::Signet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

/// Service role.
#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
pub enum ServiceRole {
    /// Track the chain and serve presigned handoffs only.
    #[default]
    Anchor,
    /// Additionally track a funding wallet's UTXO set.
    Funded,
}

impl From<ServiceRole> for Role {
    fn from(role: ServiceRole) -> Self {
        match role {
            ServiceRole::Anchor => Role::Anchor,
            ServiceRole::Funded => Role::Funded,
        }
    }
}

#[derive(Debug, Clone, Parser)]
pub struct CommonParams {
    /// Specify the Bitcoin network.
    #[arg(long, value_name = "NETWORK", default_value = "regtest")]
    pub network: Network,

    /// Specify custom base path.
    #[arg(long, short = 'd', value_name = "PATH")]
    pub base_path: Option<PathBuf>,

    /// Specify the service role.
    #[arg(long, value_name = "ROLE", default_value = "anchor")]
    pub role: ServiceRole,

    /// The fixed value every chain-extending output must carry, in satoshis.
    ///
    /// All participants of one chain must agree on this.
    #[arg(long, value_name = "SATS", default_value_t = 738)]
    pub canonical_amount: u64,
}

impl CommonParams {
    /// The resolved base path, defaulting to `<config_dir>/spool`.
    pub fn base_path(&self) -> PathBuf {
        self.base_path.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("spool")
        })
    }
}

#[derive(Debug, Clone, Parser)]
pub struct BitcoindParams {
    /// bitcoind RPC host.
    #[arg(long, value_name = "HOST", default_value = "127.0.0.1")]
    pub bitcoind_host: String,

    /// bitcoind RPC port, defaulting per network.
    #[arg(long, value_name = "PORT")]
    pub bitcoind_port: Option<u16>,

    /// bitcoind RPC user.
    #[arg(long, value_name = "USER")]
    pub bitcoind_user: String,

    /// bitcoind RPC password.
    #[arg(long, value_name = "PASSWORD")]
    pub bitcoind_password: String,
}

impl BitcoindParams {
    /// The RPC port to use, falling back to the network's default.
    pub fn port(&self, network: bitcoin::Network) -> u16 {
        self.bitcoind_port
            .unwrap_or_else(|| spool_bitcoind::default_rpc_port(network))
    }
}

#[derive(Debug, Clone, Parser)]
pub struct ScanParams {
    /// Seconds to wait before retrying a height that is not mined yet.
    #[arg(long, value_name = "SECONDS", default_value_t = 10)]
    pub poll_interval: u64,

    /// Confirmations a block needs before it is processed.
    ///
    /// 0 processes blocks as soon as they appear.
    #[arg(long, value_name = "DEPTH", default_value_t = 0)]
    pub confirmations: u64,
}

#[derive(Debug, Clone, Parser)]
pub struct RpcParams {
    /// Bind address for the JSON-RPC server.
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:10738")]
    pub rpc_listen: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[clap(flatten)]
        common: CommonParams,
        #[clap(flatten)]
        bitcoind: BitcoindParams,
    }

    fn parse(args: &[&str]) -> TestCli {
        TestCli::parse_from(
            ["test", "--bitcoind-user", "u", "--bitcoind-password", "p"]
                .iter()
                .chain(args)
                .copied(),
        )
    }

    #[test]
    fn defaults_to_regtest_anchor() {
        let cli = parse(&[]);
        assert!(matches!(cli.common.network, Network::Regtest));
        assert!(matches!(Role::from(cli.common.role), Role::Anchor));
        assert_eq!(cli.common.canonical_amount, 738);
    }

    #[test]
    fn bitcoind_port_defaults_per_network() {
        let cli = parse(&[]);
        assert_eq!(cli.bitcoind.port(bitcoin::Network::Bitcoin), 8332);
        assert_eq!(cli.bitcoind.port(bitcoin::Network::Regtest), 18443);

        let cli = parse(&["--bitcoind-port", "9000"]);
        assert_eq!(cli.bitcoind.port(bitcoin::Network::Regtest), 9000);
    }

    #[test]
    fn network_maps_to_bitcoin_network() {
        let cli = parse(&["--network", "signet"]);
        assert_eq!(bitcoin::Network::from(cli.common.network), bitcoin::Network::Signet);
    }
}
