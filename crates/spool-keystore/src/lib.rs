//! Spool key vault.
//!
//! Holds the chain-controlling signing key (and, in the funded role, the
//! wallet key), persisted as hex in a `keys.json` with owner-only
//! permissions. The key file is created exactly once, before any network
//! interaction; afterwards it is only ever loaded. Loss of the chain key is
//! unrecoverable, so a missing or corrupt file on a chain that has already
//! started must abort startup rather than silently regenerate.

use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey, rand};
use bitcoin::{Address, Amount, Network, ScriptBuf};
use serde::{Deserialize, Serialize};
use spool_primitives::{ChainParams, Role};
use std::path::Path;

/// Key vault error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key file not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed key file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed key material: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid secret key: {0}")]
    Secp(#[from] bitcoin::secp256k1::Error),

    #[error("key file carries no wallet key but the funded role requires one")]
    MissingWalletKey,
}

pub type Result<T> = std::result::Result<T, Error>;

/// On-disk representation of the key material.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    chain_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wallet_key: Option<String>,
}

/// The process-exclusive signing keys.
pub struct KeyVault {
    secp: Secp256k1<All>,
    chain_key: SecretKey,
    chain_pubkey: CompressedPublicKey,
    wallet: Option<(SecretKey, CompressedPublicKey)>,
}

impl KeyVault {
    /// Loads the key file at `path`, or creates a fresh one if it does not
    /// exist yet.
    ///
    /// Returns the vault and whether the keys were freshly generated. The
    /// caller is responsible for refusing a fresh generation when the chain
    /// has already started.
    pub fn load_or_generate(path: &Path, role: Role) -> Result<(Self, bool)> {
        if path.exists() {
            Ok((Self::load(path, role)?, false))
        } else {
            Ok((Self::generate(path, role)?, true))
        }
    }

    /// Loads and parses an existing key file.
    pub fn load(path: &Path, role: Role) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Io(err),
        })?;
        let key_file: KeyFile = serde_json::from_slice(&bytes)?;

        let secp = Secp256k1::new();
        let chain_key = parse_key(&key_file.chain_key)?;
        let wallet_key = match (role, key_file.wallet_key) {
            (Role::Funded, Some(hex)) => Some(parse_key(&hex)?),
            (Role::Funded, None) => return Err(Error::MissingWalletKey),
            // An anchor deployment ignores any wallet key in the file.
            (Role::Anchor, _) => None,
        };

        Ok(Self::from_keys(secp, chain_key, wallet_key))
    }

    /// Generates fresh keys and persists them before returning.
    fn generate(path: &Path, role: Role) -> Result<Self> {
        let secp = Secp256k1::new();
        let chain_key = SecretKey::new(&mut rand::thread_rng());
        let wallet_key = role
            .is_funded()
            .then(|| SecretKey::new(&mut rand::thread_rng()));

        let key_file = KeyFile {
            chain_key: hex::encode(chain_key.secret_bytes()),
            wallet_key: wallet_key.map(|key| hex::encode(key.secret_bytes())),
        };

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
            restrict_dir_permissions(dir)?;
        }
        write_owner_only(path, serde_json::to_vec_pretty(&key_file)?.as_slice())?;

        tracing::info!(path = %path.display(), "created key file");

        Ok(Self::from_keys(secp, chain_key, wallet_key))
    }

    fn from_keys(secp: Secp256k1<All>, chain_key: SecretKey, wallet_key: Option<SecretKey>) -> Self {
        let chain_pubkey = CompressedPublicKey(chain_key.public_key(&secp));
        let wallet = wallet_key.map(|key| {
            let pubkey = CompressedPublicKey(key.public_key(&secp));
            (key, pubkey)
        });
        Self {
            secp,
            chain_key,
            chain_pubkey,
            wallet,
        }
    }

    /// The compressed chain public key, part of every handoff witness.
    pub fn chain_pubkey(&self) -> CompressedPublicKey {
        self.chain_pubkey
    }

    /// The chain's 22-byte P2WPKH locking script.
    pub fn chain_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&self.chain_pubkey.wpubkey_hash())
    }

    /// The chain address on the given network.
    pub fn chain_address(&self, network: Network) -> Address {
        Address::p2wpkh(&self.chain_pubkey, network)
    }

    /// Derives the full chain parameters from the vault's chain key.
    pub fn chain_params(&self, network: Network, canonical_amount: Amount) -> ChainParams {
        ChainParams::new(network, canonical_amount, &self.chain_pubkey)
    }

    /// The wallet's P2WPKH locking script, if this vault carries one.
    pub fn wallet_script(&self) -> Option<ScriptBuf> {
        self.wallet
            .as_ref()
            .map(|(_, pubkey)| ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash()))
    }

    /// The wallet address on the given network, if this vault carries one.
    pub fn wallet_address(&self, network: Network) -> Option<Address> {
        self.wallet
            .as_ref()
            .map(|(_, pubkey)| Address::p2wpkh(pubkey, network))
    }

    /// Signs a sighash digest with the chain key.
    ///
    /// The nonce is derived per RFC 6979, so signing the same digest twice
    /// yields the same signature.
    pub fn sign_with_chain_key(&self, msg: &Message) -> Signature {
        self.secp.sign_ecdsa(msg, &self.chain_key)
    }
}

fn parse_key(hex_key: &str) -> Result<SecretKey> {
    Ok(SecretKey::from_slice(&hex::decode(hex_key)?)?)
}

#[cfg(unix)]
fn write_owner_only(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

#[cfg(unix)]
fn restrict_dir_permissions(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");

        let (vault, created) = KeyVault::load_or_generate(&path, Role::Anchor).unwrap();
        assert!(created);

        let (reloaded, created) = KeyVault::load_or_generate(&path, Role::Anchor).unwrap();
        assert!(!created);
        assert_eq!(vault.chain_pubkey(), reloaded.chain_pubkey());
        assert_eq!(vault.chain_script(), reloaded.chain_script());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        KeyVault::load_or_generate(&path, Role::Anchor).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn funded_role_generates_wallet_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");

        let (vault, _) = KeyVault::load_or_generate(&path, Role::Funded).unwrap();
        assert!(vault.wallet_script().is_some());
        assert_ne!(
            vault.wallet_script().unwrap(),
            vault.chain_script(),
            "wallet and chain keys must be independent"
        );
    }

    #[test]
    fn anchor_key_file_rejected_for_funded_role() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        KeyVault::load_or_generate(&path, Role::Anchor).unwrap();

        assert!(matches!(
            KeyVault::load(&path, Role::Funded),
            Err(Error::MissingWalletKey)
        ));
    }

    #[test]
    fn corrupt_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        std::fs::write(&path, b"{\"chain_key\": \"not hex\"}").unwrap();

        assert!(KeyVault::load(&path, Role::Anchor).is_err());
    }

    #[test]
    fn missing_key_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");

        assert!(matches!(
            KeyVault::load(&path, Role::Anchor),
            Err(Error::NotFound(_))
        ));
    }
}
