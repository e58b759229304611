//! Presigned handoff construction.
//!
//! Given the current chain tip, builds and signs the next spend under
//! `SIGHASH_SINGLE | SIGHASH_ANYONECANPAY`. The chain key thereby authorizes
//! "advance the tip by exactly this output, to this address" while a third
//! party stays free to add funding inputs, change outputs or fee adjustments
//! around it without invalidating the signature.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Message;
use bitcoin::sighash::SighashCache;
use bitcoin::transaction::Version;
use bitcoin::{
    EcdsaSighashType, OutPoint, Psbt, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use spool_keystore::KeyVault;
use spool_primitives::{BlockSource, ChainParams, ChainRecord, SourceError};
use std::sync::Arc;

/// The protocol constant every handoff input carries as its sequence number.
const HANDOFF_SEQUENCE: Sequence = Sequence(1);

/// Presigner error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("undecodable tip transaction {0}")]
    MalformedTransaction(Txid),

    #[error("tip transaction {0} has no output paying the chain script")]
    ChainOutputMissing(Txid),

    #[error("sighash computation failed: {0}")]
    Sighash(#[from] bitcoin::sighash::P2wpkhError),

    #[error("psbt construction failed: {0}")]
    Psbt(#[from] bitcoin::psbt::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The next valid spend of the current tip, in both of its representations.
///
/// Computed on demand, never persisted.
pub struct PresignedHandoff {
    /// Finalized serialized transaction, broadcastable standalone.
    pub raw: Vec<u8>,
    /// The same spend as a BIP-174 container, open for third-party
    /// composition.
    pub psbt: Psbt,
}

impl PresignedHandoff {
    /// Hex encoding of the finalized transaction.
    pub fn raw_hex(&self) -> String {
        hex::encode(&self.raw)
    }

    /// Base64 encoding of the partial-transaction container.
    pub fn psbt_base64(&self) -> String {
        self.psbt.to_string()
    }
}

/// Builds and signs the next handoff transaction for a given tip.
///
/// Signing is a pure read+compute operation; the nonce is derived per
/// RFC 6979, so presigning the same tip twice yields identical bytes.
pub struct Presigner {
    vault: Arc<KeyVault>,
    params: ChainParams,
    source: Arc<dyn BlockSource>,
}

impl Presigner {
    /// Creates a new instance of [`Presigner`].
    pub fn new(vault: Arc<KeyVault>, params: ChainParams, source: Arc<dyn BlockSource>) -> Self {
        Self {
            vault,
            params,
            source,
        }
    }

    /// Builds, signs and finalizes the next spend of `tip`.
    pub async fn presign(&self, tip: &ChainRecord) -> Result<PresignedHandoff> {
        let vout = self.locate_chain_output(tip).await?;

        let unsigned = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: tip.txid,
                    vout,
                },
                script_sig: ScriptBuf::new(),
                sequence: HANDOFF_SEQUENCE,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: self.params.canonical_amount,
                script_pubkey: self.params.chain_script.clone(),
            }],
        };

        // SINGLE binds the signer to output 0 matching input 0 and
        // ANYONECANPAY to this one input; everything a composer appends
        // later stays outside the commitment.
        let sighash_type = EcdsaSighashType::SinglePlusAnyoneCanPay;
        let sighash = SighashCache::new(&unsigned).p2wpkh_signature_hash(
            0,
            &self.params.chain_script,
            self.params.canonical_amount,
            sighash_type,
        )?;

        let signature = bitcoin::ecdsa::Signature {
            signature: self
                .vault
                .sign_with_chain_key(&Message::from_digest(sighash.to_byte_array())),
            sighash_type,
        };
        let pubkey = self.vault.chain_pubkey();
        let witness = Witness::p2wpkh(&signature, &pubkey.0);

        let mut psbt = Psbt::from_unsigned_tx(unsigned.clone())?;
        let input = &mut psbt.inputs[0];
        input.witness_utxo = Some(TxOut {
            value: self.params.canonical_amount,
            script_pubkey: self.params.chain_script.clone(),
        });
        input.sighash_type = Some(sighash_type.into());
        input.partial_sigs.insert(pubkey.into(), signature);
        input.final_script_witness = Some(witness.clone());

        let mut finalized = unsigned;
        finalized.input[0].witness = witness;
        let raw = bitcoin::consensus::serialize(&finalized);

        tracing::debug!(tip = %tip.txid, vout, "presigned next handoff");

        Ok(PresignedHandoff { raw, psbt })
    }

    /// Index of the chain output within the tip transaction.
    ///
    /// Every handoff recreates the chain output at index 0, so only the
    /// genesis transaction, which the operator composed freely, can carry it
    /// elsewhere and needs the scan.
    async fn locate_chain_output(&self, tip: &ChainRecord) -> Result<u32> {
        if tip.index > 0 {
            return Ok(0);
        }

        let raw = self.source.raw_transaction(tip.txid).await?;
        let tx: Transaction = bitcoin::consensus::deserialize(&raw)
            .map_err(|_| Error::MalformedTransaction(tip.txid))?;

        tx.output
            .iter()
            .position(|output| output.script_pubkey == self.params.chain_script)
            .map(|vout| vout as u32)
            .ok_or(Error::ChainOutputMissing(tip.txid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::Secp256k1;
    use bitcoin::{Amount, BlockHash, Network};
    use spool_primitives::{DEFAULT_CANONICAL_AMOUNT, Role};
    use std::str::FromStr;

    /// Serves the transactions it was given, nothing else.
    struct FixedTxs(Vec<Transaction>);

    #[async_trait::async_trait]
    impl BlockSource for FixedTxs {
        async fn block_count(&self) -> std::result::Result<u64, SourceError> {
            Ok(0)
        }

        async fn block_hash_at(
            &self,
            _height: u64,
        ) -> std::result::Result<Option<BlockHash>, SourceError> {
            Ok(None)
        }

        async fn raw_block(&self, _hash: BlockHash) -> std::result::Result<Vec<u8>, SourceError> {
            Err(SourceError::BadResponse("no blocks here".into()))
        }

        async fn raw_transaction(&self, txid: Txid) -> std::result::Result<Vec<u8>, SourceError> {
            self.0
                .iter()
                .find(|tx| tx.compute_txid() == txid)
                .map(bitcoin::consensus::serialize)
                .ok_or_else(|| SourceError::BadResponse("unknown transaction".into()))
        }
    }

    fn vault() -> Arc<KeyVault> {
        let dir = tempfile::tempdir().unwrap();
        let (vault, _) = KeyVault::load_or_generate(&dir.path().join("keys.json"), Role::Anchor)
            .unwrap();
        Arc::new(vault)
    }

    fn presigner_with(vault: Arc<KeyVault>, txs: Vec<Transaction>) -> (ChainParams, Presigner) {
        let params = vault.chain_params(Network::Regtest, DEFAULT_CANONICAL_AMOUNT);
        let presigner = Presigner::new(vault, params.clone(), Arc::new(FixedTxs(txs)));
        (params, presigner)
    }

    fn genesis_tx(chain_script: ScriptBuf, chain_vout_position: usize) -> Transaction {
        let mut output = vec![
            TxOut {
                value: Amount::from_sat(20_000),
                script_pubkey: ScriptBuf::new_op_return([1u8; 4]),
            },
            TxOut {
                value: Amount::from_sat(30_000),
                script_pubkey: ScriptBuf::new_op_return([2u8; 4]),
            },
        ];
        output.insert(
            chain_vout_position,
            TxOut {
                value: DEFAULT_CANONICAL_AMOUNT,
                script_pubkey: chain_script,
            },
        );
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_byte_array([5; 32]),
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output,
        }
    }

    fn non_genesis_tip() -> ChainRecord {
        ChainRecord {
            index: 3,
            txid: Txid::from_byte_array([9; 32]),
        }
    }

    #[tokio::test]
    async fn handoff_spends_the_tip_and_recreates_the_chain_output() {
        let (params, presigner) = presigner_with(vault(), vec![]);
        let tip = non_genesis_tip();

        let handoff = presigner.presign(&tip).await.unwrap();
        let tx: Transaction = bitcoin::consensus::deserialize(&handoff.raw).unwrap();

        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.input[0].previous_output, OutPoint { txid: tip.txid, vout: 0 });
        assert_eq!(tx.input[0].sequence, Sequence(1));
        assert_eq!(tx.output.len(), 1);
        assert_eq!(tx.output[0].value, params.canonical_amount);
        assert_eq!(tx.output[0].script_pubkey, params.chain_script);
    }

    #[tokio::test]
    async fn genesis_tip_output_is_located_by_script() {
        let vault = vault();
        let genesis = genesis_tx(vault.chain_script(), 2);
        let (_, presigner) = presigner_with(vault, vec![genesis.clone()]);

        let tip = ChainRecord {
            index: 0,
            txid: genesis.compute_txid(),
        };
        let handoff = presigner.presign(&tip).await.unwrap();
        let tx: Transaction = bitcoin::consensus::deserialize(&handoff.raw).unwrap();

        assert_eq!(tx.input[0].previous_output.vout, 2);
    }

    #[tokio::test]
    async fn genesis_tip_without_chain_output_is_an_error() {
        let vault = vault();
        let other_script = ScriptBuf::new_op_return([7u8; 4]);
        let stray = genesis_tx(other_script, 0);
        let (_, presigner) = presigner_with(vault, vec![stray.clone()]);

        let tip = ChainRecord {
            index: 0,
            txid: stray.compute_txid(),
        };
        assert!(matches!(
            presigner.presign(&tip).await,
            Err(Error::ChainOutputMissing(_))
        ));
    }

    #[tokio::test]
    async fn witness_signature_verifies_under_the_narrow_commitment() {
        let vault = vault();
        let pubkey = vault.chain_pubkey();
        let (params, presigner) = presigner_with(vault, vec![]);

        let handoff = presigner.presign(&non_genesis_tip()).await.unwrap();
        let tx: Transaction = bitcoin::consensus::deserialize(&handoff.raw).unwrap();

        let witness = &tx.input[0].witness;
        assert_eq!(witness.len(), 2);
        let signature = bitcoin::ecdsa::Signature::from_slice(&witness[0]).unwrap();
        assert_eq!(signature.sighash_type, EcdsaSighashType::SinglePlusAnyoneCanPay);
        assert_eq!(&witness[1], &pubkey.to_bytes()[..]);

        let sighash = SighashCache::new(&tx)
            .p2wpkh_signature_hash(
                0,
                &params.chain_script,
                params.canonical_amount,
                signature.sighash_type,
            )
            .unwrap();

        let secp = Secp256k1::verification_only();
        secp.verify_ecdsa(
            &Message::from_digest(sighash.to_byte_array()),
            &signature.signature,
            &pubkey.0,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn commitment_survives_third_party_composition() {
        let vault = vault();
        let (params, presigner) = presigner_with(vault, vec![]);

        let handoff = presigner.presign(&non_genesis_tip()).await.unwrap();
        let tx: Transaction = bitcoin::consensus::deserialize(&handoff.raw).unwrap();

        let sighash_type = EcdsaSighashType::SinglePlusAnyoneCanPay;
        let original = SighashCache::new(&tx)
            .p2wpkh_signature_hash(
                0,
                &params.chain_script,
                params.canonical_amount,
                sighash_type,
            )
            .unwrap();

        // A composer appends a funding input and a change output.
        let mut composed = tx.clone();
        composed.input.push(TxIn {
            previous_output: OutPoint {
                txid: Txid::from_byte_array([0xcc; 32]),
                vout: 1,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        });
        composed.output.push(TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: ScriptBuf::new_op_return([3u8; 4]),
        });

        let recomputed = SighashCache::new(&composed)
            .p2wpkh_signature_hash(
                0,
                &params.chain_script,
                params.canonical_amount,
                sighash_type,
            )
            .unwrap();

        assert_eq!(original, recomputed);
    }

    #[tokio::test]
    async fn presigning_is_deterministic() {
        let (_, presigner) = presigner_with(vault(), vec![]);
        let tip = non_genesis_tip();

        let first = presigner.presign(&tip).await.unwrap();
        let second = presigner.presign(&tip).await.unwrap();

        assert_eq!(first.raw, second.raw);
        assert_eq!(first.psbt_base64(), second.psbt_base64());
    }

    #[tokio::test]
    async fn psbt_round_trips_and_carries_the_signing_metadata() {
        let vault = vault();
        let pubkey = vault.chain_pubkey();
        let (params, presigner) = presigner_with(vault, vec![]);

        let handoff = presigner.presign(&non_genesis_tip()).await.unwrap();
        let decoded = Psbt::from_str(&handoff.psbt_base64()).unwrap();

        let input = &decoded.inputs[0];
        let witness_utxo = input.witness_utxo.as_ref().unwrap();
        assert_eq!(witness_utxo.value, params.canonical_amount);
        assert_eq!(witness_utxo.script_pubkey, params.chain_script);
        assert_eq!(
            input.sighash_type,
            Some(EcdsaSighashType::SinglePlusAnyoneCanPay.into())
        );
        assert!(input.partial_sigs.contains_key(&bitcoin::PublicKey::from(pubkey)));
        assert!(input.final_script_witness.is_some());

        // Both representations describe the same spend.
        let raw_tx: Transaction = bitcoin::consensus::deserialize(&handoff.raw).unwrap();
        assert_eq!(
            decoded.unsigned_tx.compute_txid(),
            raw_tx.compute_txid()
        );
    }
}
