//! HashCredit relayer CLI.
//!
//! Usage examples:
//!   RUST_LOG=info hashcredit-relayer run
//!   hashcredit-relayer build-proof <txid> 0 800000 800006 0x1234... --hex
//!   hashcredit-relayer set-checkpoint 800000 --dry-run

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use alloy_primitives::Address;
use clap::{Args, Parser, Subcommand};
use tracing::error;
use zeroize::Zeroizing;

use hashcredit_chain::esplora::EsploraRest;
use hashcredit_chain::evm::{parse_chainwork, EvmBridge, EvmClient, EvmConfig};
use hashcredit_chain::node::{NodeRpc, NodeRpcConfig};
use hashcredit_spv::adapter::ChainAdapter;
use hashcredit_spv::address::decode_btc_address;
use hashcredit_spv::hash::Hash256;
use hashcredit_spv::proof::{ProofBuilder, ProofRequest, SpvProofJson, MAX_HEADER_CHAIN, MIN_CONFIRMATIONS};
use hashcredit_spv::verify::verify_proof;
use hashcredit_spv::wire::BlockHeader;

use hashcredit_relayer::config::{BitcoinBackend, Config};
use hashcredit_relayer::relayer::Relayer;
use hashcredit_relayer::store::SledPayoutStore;

#[derive(Parser)]
#[command(
    name = "hashcredit-relayer",
    version,
    about = "HashCredit Bitcoin SPV proof builder and relayer"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct BtcArgs {
    /// Bitcoin Core RPC URL
    #[arg(long = "rpc-url", short = 'r', env = "BITCOIN_RPC_URL", default_value = "http://localhost:18332")]
    rpc_url: String,
    /// Bitcoin RPC user
    #[arg(long = "rpc-user", short = 'u', env = "BITCOIN_RPC_USER", default_value = "")]
    rpc_user: String,
    /// Bitcoin RPC password
    #[arg(long = "rpc-password", short = 'p', env = "BITCOIN_RPC_PASSWORD", default_value = "")]
    rpc_password: String,
}

impl BtcArgs {
    fn client(&self) -> Result<NodeRpc, Box<dyn Error>> {
        Ok(NodeRpc::new(NodeRpcConfig {
            url: self.rpc_url.clone(),
            user: self.rpc_user.clone(),
            password: self.rpc_password.clone(),
            timeout_secs: 30,
        })?)
    }
}

#[derive(Args)]
struct EvmArgs {
    /// EVM RPC URL
    #[arg(long = "evm-rpc-url", env = "EVM_RPC_URL", default_value = "http://localhost:8545")]
    evm_rpc_url: String,
    /// EVM chain ID
    #[arg(long = "chain-id", env = "CHAIN_ID", default_value_t = 102_031)]
    chain_id: u64,
    /// Private key for signing transactions
    #[arg(long = "private-key", env = "PRIVATE_KEY")]
    private_key: Option<String>,
    /// CheckpointManager contract address
    #[arg(long = "checkpoint-manager", env = "CHECKPOINT_MANAGER")]
    checkpoint_manager: Option<Address>,
    /// BtcSpvVerifier contract address
    #[arg(long = "spv-verifier", short = 'v', env = "BTC_SPV_VERIFIER")]
    spv_verifier: Option<Address>,
    /// HashCreditManager contract address
    #[arg(long = "manager", short = 'm', env = "HASH_CREDIT_MANAGER")]
    credit_manager: Option<Address>,
}

impl EvmArgs {
    fn client(&self) -> Result<EvmClient, Box<dyn Error>> {
        let private_key = self
            .private_key
            .clone()
            .ok_or("--private-key or PRIVATE_KEY env var required")?;
        Ok(EvmClient::new(EvmConfig {
            rpc_url: self.evm_rpc_url.clone(),
            chain_id: self.chain_id,
            private_key: Zeroizing::new(private_key),
            checkpoint_manager: self.checkpoint_manager,
            spv_verifier: self.spv_verifier,
            credit_manager: self.credit_manager,
            ..EvmConfig::default()
        })?)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run the relayer loop (configured via environment variables).
    Run,
    /// Build an SPV proof for a Bitcoin transaction.
    BuildProof {
        /// Transaction ID (display format)
        txid: String,
        /// Output index (vout)
        output_index: u32,
        /// Checkpoint block height
        checkpoint_height: u32,
        /// Target block height
        target_height: u32,
        /// Borrower EVM address
        borrower: Address,
        /// Tip height (defaults to target + 5 for 6 confirmations)
        #[arg(long = "tip-height")]
        tip_height: Option<u32>,
        /// Output file for proof JSON
        #[arg(long = "output", short = 'o')]
        output: Option<PathBuf>,
        /// Output ABI-encoded hex for the contract
        #[arg(long)]
        hex: bool,
        #[command(flatten)]
        btc: BtcArgs,
    },
    /// Verify a proof JSON file locally, without submitting.
    VerifyLocal {
        /// Path to the proof JSON file
        proof_file: PathBuf,
    },
    /// Build an SPV proof and submit it to HashCreditManager.
    SubmitProof {
        txid: String,
        output_index: u32,
        borrower: Address,
        /// Checkpoint height
        #[arg(long = "checkpoint", short = 'c')]
        checkpoint_height: u32,
        /// Target block height
        #[arg(long = "target", short = 't')]
        target_height: u32,
        /// Only print the hex-encoded proof, do not submit
        #[arg(long = "hex-only")]
        hex_only: bool,
        /// Build the proof but do not send the transaction
        #[arg(long = "dry-run")]
        dry_run: bool,
        /// Save the proof JSON to a file
        #[arg(long = "output", short = 'o')]
        output: Option<PathBuf>,
        #[command(flatten)]
        btc: BtcArgs,
        #[command(flatten)]
        evm: EvmArgs,
    },
    /// Register a Bitcoin block checkpoint on CheckpointManager.
    SetCheckpoint {
        /// Bitcoin block height to checkpoint
        height: u32,
        /// Print the call data without sending a transaction
        #[arg(long = "dry-run")]
        dry_run: bool,
        #[command(flatten)]
        btc: BtcArgs,
        #[command(flatten)]
        evm: EvmArgs,
    },
    /// Register a borrower's pubkey hash on BtcSpvVerifier.
    SetBorrowerPubkeyHash {
        /// Borrower EVM address
        borrower: Address,
        /// Borrower's Bitcoin address (P2WPKH or P2PKH)
        btc_address: String,
        /// Print the call data without sending a transaction
        #[arg(long = "dry-run")]
        dry_run: bool,
        #[command(flatten)]
        evm: EvmArgs,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command).await {
        error!(error = %e, "command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Run => run_relayer().await,
        Command::BuildProof {
            txid,
            output_index,
            checkpoint_height,
            target_height,
            borrower,
            tip_height,
            output,
            hex,
            btc,
        } => {
            let chain = btc.client()?;
            let builder = ProofBuilder::new(&chain);
            println!("Building proof for transaction {txid}...");
            let result = builder
                .build_proof(&ProofRequest {
                    txid,
                    output_index,
                    checkpoint_height,
                    target_height,
                    borrower,
                    tip_height,
                })
                .await?;

            println!("Proof built successfully!");
            println!("  Amount:        {} sats", result.amount_sats);
            println!("  Script type:   {}", result.script_type);
            println!("  PubkeyHash:    0x{}", hex::encode(result.pubkey_hash));
            println!("  Header chain:  {} blocks", result.proof.headers.len());
            println!("  Merkle depth:  {}", result.proof.merkle_proof.len());

            if hex {
                println!("0x{}", hex::encode(result.proof.encode_for_contract()));
            } else {
                let proof_json = serde_json::to_string_pretty(&result.proof.to_json())?;
                match output {
                    Some(path) => {
                        std::fs::write(&path, proof_json)?;
                        println!("Proof saved to {}", path.display());
                    }
                    None => println!("{proof_json}"),
                }
            }
            Ok(())
        }
        Command::VerifyLocal { proof_file } => {
            let raw = std::fs::read_to_string(&proof_file)?;
            let json: SpvProofJson = serde_json::from_str(&raw)?;
            let proof = json.into_proof()?;

            verify_proof(&proof, MIN_CONFIRMATIONS, MAX_HEADER_CHAIN)?;

            for (i, header) in proof.headers.iter().enumerate() {
                let parsed = BlockHeader::parse(header)?;
                println!("  Header {i}: {}", parsed.block_hash());
            }
            let txid = Hash256::digest(&proof.raw_tx);
            println!("  TXID: {txid}");
            println!("Proof verified successfully!");
            Ok(())
        }
        Command::SubmitProof {
            txid,
            output_index,
            borrower,
            checkpoint_height,
            target_height,
            hex_only,
            dry_run,
            output,
            btc,
            evm,
        } => {
            let chain = btc.client()?;
            let builder = ProofBuilder::new(&chain);
            println!("Building SPV proof for transaction {txid}...");
            let result = builder
                .build_proof(&ProofRequest {
                    txid: txid.clone(),
                    output_index,
                    checkpoint_height,
                    target_height,
                    borrower,
                    tip_height: None,
                })
                .await?;
            verify_proof(&result.proof, MIN_CONFIRMATIONS, MAX_HEADER_CHAIN)?;

            let encoded = result.proof.encode_for_contract();
            println!("Proof built successfully!");
            println!("  Amount:       {} sats", result.amount_sats);
            println!("  Script type:  {}", result.script_type);
            println!("  Encoded size: {} bytes", encoded.len());

            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&result.proof.to_json())?)?;
                println!("Proof saved to {}", path.display());
            }
            if hex_only {
                println!("0x{}", hex::encode(encoded));
                return Ok(());
            }
            if dry_run {
                println!("[Dry run - not sending transaction]");
                return Ok(());
            }

            let client = evm.client()?;
            println!("Submitting proof from {}...", client.address());
            let outcome = client.submit_payout(encoded).await?;
            println!("Transaction successful!");
            println!("  TX Hash: {:#x}", outcome.tx_hash);
            println!("  Block:   {:?}", outcome.block_number);
            println!("  Gas:     {}", outcome.gas_used);
            Ok(())
        }
        Command::SetCheckpoint {
            height,
            dry_run,
            btc,
            evm,
        } => {
            let chain = btc.client()?;
            println!("Fetching block info for height {height}...");
            let block_hash = chain.get_block_hash(height).await?;
            let info = chain.get_block_header_info(&block_hash).await?;
            let header = chain.get_block_header_bytes(&block_hash).await?;
            let internal_hash = Hash256::digest(&header);
            let chain_work = parse_chainwork(&info.chainwork_hex)?;

            println!("Block Info:");
            println!("  Height:     {height}");
            println!("  Hash (RPC): {block_hash}");
            println!("  Hash (int): 0x{}", internal_hash.to_internal_hex());
            println!("  Timestamp:  {}", info.time);
            println!("  Bits:       {:#x}", info.bits);
            println!("  ChainWork:  {}", info.chainwork_hex);

            if dry_run {
                println!("[Dry run - not sending transaction]");
                return Ok(());
            }

            let client = evm.client()?;
            println!("Sending transaction from {}...", client.address());
            let outcome = client
                .set_checkpoint(height, internal_hash.into_bytes(), chain_work, info.time, info.bits)
                .await?;
            println!("Transaction successful!");
            println!("  TX Hash: {:#x}", outcome.tx_hash);
            println!("  Gas:     {}", outcome.gas_used);

            let new_height = client.get_latest_checkpoint_height().await?;
            println!("latestCheckpointHeight() = {new_height}");
            Ok(())
        }
        Command::SetBorrowerPubkeyHash {
            borrower,
            btc_address,
            dry_run,
            evm,
        } => {
            let (pubkey_hash, addr_type) = decode_btc_address(&btc_address)
                .ok_or("invalid or unsupported bitcoin address (need P2WPKH or P2PKH)")?;

            println!("Address Info:");
            println!("  Type:       {addr_type}");
            println!("  PubkeyHash: 0x{}", hex::encode(pubkey_hash));
            println!("  Borrower:   {borrower:#x}");

            if dry_run {
                println!("[Dry run - not sending transaction]");
                return Ok(());
            }

            let client = evm.client()?;
            println!("Sending transaction from {}...", client.address());
            let outcome = client.set_borrower_pubkey_hash(borrower, pubkey_hash).await?;
            println!("Transaction successful!");
            println!("  TX Hash: {:#x}", outcome.tx_hash);

            let registered = client.get_borrower_pubkey_hash(borrower).await?;
            println!("getBorrowerPubkeyHash() = 0x{}", hex::encode(registered));
            Ok(())
        }
    }
}

async fn run_relayer() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env()?;

    let chain: Arc<dyn ChainAdapter> = match config.backend {
        BitcoinBackend::Node => Arc::new(NodeRpc::new(config.node.clone())?),
        BitcoinBackend::Esplora => Arc::new(EsploraRest::new(config.esplora.clone())?),
    };
    let evm: Arc<dyn EvmBridge> = Arc::new(EvmClient::new(config.evm.clone())?);
    let store = Arc::new(SledPayoutStore::open(&config.db_path)?);

    let mut relayer = Relayer::new(chain, evm, store, config.watched, config.relayer)?;

    let stop = relayer.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    relayer.run().await;
    Ok(())
}
