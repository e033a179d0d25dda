use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pufvault_core::fsio::{read_file, write_file};
use pufvault_core::pipeline::open_envelope_file;
use pufvault_core::splitter::{merge_to_file, split_file};
use pufvault_core::{CrpKind, DerivationJob, Settings, ShardName};
use pufvault_crypto::{symmetric, write_receiver_keypair, ReceiverSecretKey, SymmetricKey};
use pufvault_state::{LedgerFunction, MemoryStore, ShardLedger};

#[derive(Parser)]
#[command(name = "pufvault")]
#[command(about = "PUF CRP shard vault: split, identify, seal and track CRP shards", long_about = None)]
struct Cli {
    /// Settings file (defaults to ./pufvault.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Auto,
    Challenge,
    Response,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a challenge or response file into record-sized shards
    Split {
        #[arg(long)]
        file: PathBuf,
        /// Declared bit length of one record
        #[arg(long)]
        size: u64,
        /// Number of PUF instances concatenated in each response record
        #[arg(short = 'n', long = "instances", default_value_t = 1)]
        instances: u64,
        #[arg(long, value_enum, default_value_t = KindArg::Auto)]
        kind: KindArg,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// AES-128-CBC encrypt a whole file into cipher-<name>
    Encrypt {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        key: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Split any file into fixed-size shards
    Shard {
        #[arg(long)]
        file: PathBuf,
        /// Shard size in KiB
        #[arg(long)]
        size: usize,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Derive ShardId/DataId and seal the CRP envelope for every shard index
    Derive {
        /// Origin address bound into every ShardId
        #[arg(long)]
        ip: String,
        /// Number of shard indices
        #[arg(short = 'n', long = "count")]
        count: u32,
        /// Shard template, e.g. 1-2Shards/8.txt
        #[arg(long)]
        shard: PathBuf,
        /// Challenge template
        #[arg(short = 'c', long = "challenge")]
        challenge: PathBuf,
        /// Response template
        #[arg(short = 'r', long = "response")]
        response: PathBuf,
        /// Symmetric key template
        #[arg(long)]
        key: PathBuf,
        /// Receiver public key template
        #[arg(long = "pub")]
        public: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        jobs: Option<usize>,
    },

    /// Reassemble contiguous shards dir/name-0.suffix, dir/name-1.suffix, ...
    Merge {
        /// Shard template, e.g. 2-1Retrieve/8.txt
        #[arg(long)]
        fold: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Decrypt a merged ciphertext into decrypt-<name>
    Decrypt {
        #[arg(long)]
        ciph: PathBuf,
        #[arg(long)]
        key: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Open a sealed cipherCRPs envelope with the receiver's secret key
    Open {
        #[arg(long)]
        envelope: PathBuf,
        #[arg(long)]
        secret: PathBuf,
        /// Shard key; when given the response is decrypted too
        #[arg(long)]
        key: Option<PathBuf>,
    },

    /// Generate receiver keypairs or symmetric shard keys
    Keygen {
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        name: String,
        /// Write name-0 .. name-(count-1) instead of a single key
        #[arg(long)]
        count: Option<u32>,
        /// 16-byte AES keys instead of secp256k1 keypairs
        #[arg(long)]
        symmetric: bool,
    },

    /// Invoke a ledger function against a JSON-persisted state file
    Ledger {
        #[arg(long)]
        state: Option<PathBuf>,
        /// addShard, transferShard, readShard, queryShardsBySender,
        /// queryShards, getShardsByRange, getHistoryForShard
        function: String,
        /// Passed through verbatim; values such as `-1` are arguments, not flags
        #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
        args: Vec<String>,
    },
}

impl Commands {
    fn example(&self) -> &'static str {
        match self {
            Commands::Split { .. } => "pufvault split --file CRPs/response_128.bin --size 128 -n 6",
            Commands::Encrypt { .. } => "pufvault encrypt --file File/8.txt --key File/key.txt",
            Commands::Shard { .. } => "pufvault shard --file 1-1Cipher/cipher-8.txt --size 1",
            Commands::Derive { .. } => {
                "pufvault derive --ip 192.168.90.12 -n 4 --shard 1-2Shards/8.txt -c Challenge/challenge_128.bin \
                 -r Response/response_128.bin --key File/cipherResponseKey.txt --pub File/node_eccpublic.pem"
            }
            Commands::Merge { .. } => "pufvault merge --fold 2-1Retrieve/8.txt",
            Commands::Decrypt { .. } => "pufvault decrypt --ciph 2-2MergeCipher/merge-8.txt --key File/key.txt",
            Commands::Open { .. } => {
                "pufvault open --envelope 1-2Shards/node_eccpublic-0-cipherCRPs.bin --secret File/node_eccpublic-0-secret.pem"
            }
            Commands::Keygen { .. } => "pufvault keygen --out File --name node_eccpublic --count 4",
            Commands::Ledger { .. } => {
                "pufvault ledger addShard peer01.Org1 <ShardId> <DataId> peer02.Org2 4 6 0"
            }
        }
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow!("failed to install logger: {}", e))
}

fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            let _ = init_tracing("info");
            error!("{}", e);
            std::process::exit(2);
        }
    };
    if let Err(e) = init_tracing(&settings.log_level) {
        eprintln!("{:#}", e);
    }

    if let Err(e) = run(&cli.command, &settings) {
        error!("{:#}", e);
        eprintln!("example: {}", cli.command.example());
        std::process::exit(1);
    }
}

fn run(command: &Commands, settings: &Settings) -> Result<()> {
    match command {
        Commands::Split {
            file,
            size,
            instances,
            kind,
            out,
        } => {
            let name = ShardName::parse(file)?;
            let kind = match kind {
                KindArg::Auto => CrpKind::infer(&name),
                KindArg::Challenge => CrpKind::Challenge,
                KindArg::Response => CrpKind::Response,
            };
            let chunk = settings.layout(*size, *instances).chunk_size(kind)?;
            let out = out.clone().unwrap_or_else(|| match kind {
                CrpKind::Challenge => settings.challenge_dir.clone(),
                CrpKind::Response => settings.response_dir.clone(),
            });
            let written = split_file(file, chunk, &out)
                .with_context(|| format!("splitting {}", file.display()))?;
            info!("{} shard(s) of {} bytes written to {}", written.len(), chunk, out.display());
        }

        Commands::Encrypt { file, key, out } => {
            let key = SymmetricKey::load(key)?;
            let plain = read_file(file)?;
            let cipher = symmetric::encrypt(&plain, &key)?;
            let dest = ShardName::parse(file)?
                .prefixed_path(out.as_deref().unwrap_or(settings.cipher_dir.as_path()), "cipher-");
            write_file(&dest, &cipher)?;
            info!("encrypted {} -> {}", file.display(), dest.display());
        }

        Commands::Shard { file, size, out } => {
            let chunk = size
                .checked_mul(1024)
                .ok_or_else(|| anyhow!("shard size {} KiB is too large", size))?;
            let out = out.as_deref().unwrap_or(settings.shard_dir.as_path());
            let written = split_file(file, chunk, out)?;
            info!("{} shard(s) written to {}", written.len(), out.display());
        }

        Commands::Derive {
            ip,
            count,
            shard,
            challenge,
            response,
            key,
            public,
            out,
            jobs,
        } => {
            let job = DerivationJob {
                origin: ip.clone(),
                count: *count,
                shards: ShardName::parse(shard)?,
                challenges: ShardName::parse(challenge)?,
                responses: ShardName::parse(response)?,
                keys: ShardName::parse(key)?,
                receivers: ShardName::parse(public)?,
                out_dir: out.clone(),
            };
            let report = job.run_with_jobs(jobs.unwrap_or(settings.jobs))?;

            let artifacts: Vec<_> = report.succeeded().collect();
            println!("{}", serde_json::to_string_pretty(&artifacts)?);
            for (index, e) in report.failed() {
                warn!("index {}: {}", index, e);
            }
            let failed = report.failed().count();
            if failed > 0 {
                bail!("{} of {} shard indices failed", failed, count);
            }
        }

        Commands::Merge { fold, out } => {
            let name = ShardName::parse(fold)?;
            let (dest, len) = merge_to_file(&name, out.as_deref().unwrap_or(settings.merge_dir.as_path()))?;
            info!("merged {} bytes into {}", len, dest.display());
        }

        Commands::Decrypt { ciph, key, out } => {
            let key = SymmetricKey::load(key)?;
            let cipher = read_file(ciph)?;
            let plain = symmetric::decrypt(&cipher, &key)
                .with_context(|| format!("decrypting {}", ciph.display()))?;
            let dest = ShardName::parse(ciph)?
                .prefixed_path(out.as_deref().unwrap_or(settings.decrypt_dir.as_path()), "decrypt-");
            write_file(&dest, &plain)?;
            info!("decrypted {} -> {}", ciph.display(), dest.display());
        }

        Commands::Open { envelope, secret, key } => {
            let secret = ReceiverSecretKey::load(secret)?;
            let key = key.as_deref().map(SymmetricKey::load).transpose()?;
            let (crp, response) = open_envelope_file(envelope, &secret, key.as_ref())?;
            let report = json!({
                "challenge": hex::encode(&crp.challenge),
                "cipher_response": hex::encode(&crp.cipher_response),
                "response": response.map(hex::encode),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Keygen {
            out,
            name,
            count,
            symmetric,
        } => {
            let stems: Vec<String> = match count {
                Some(n) => (0..*n).map(|i| format!("{}-{}", name, i)).collect(),
                None => vec![name.clone()],
            };
            for stem in &stems {
                if *symmetric {
                    let path = out.join(format!("{}.txt", stem));
                    SymmetricKey::generate().write(&path)?;
                    info!("wrote symmetric key {}", path.display());
                } else {
                    let (secret, public) = write_receiver_keypair(out, stem)?;
                    info!("wrote keypair {} / {}", public.display(), secret.display());
                }
            }
        }

        Commands::Ledger {
            state,
            function,
            args,
        } => {
            let path = state.as_deref().unwrap_or(settings.ledger_state.as_path());
            run_ledger(path, function, args)?;
        }
    }
    Ok(())
}

fn run_ledger(path: &Path, function: &str, args: &[String]) -> Result<()> {
    let ledger = ShardLedger::new(MemoryStore::open(path)?);
    let mutates = matches!(
        function.parse::<LedgerFunction>(),
        Ok(LedgerFunction::AddShard | LedgerFunction::TransferShard)
    );

    let payload = ledger.invoke(function, args)?;
    if mutates {
        ledger
            .store()
            .save(path)
            .with_context(|| format!("saving ledger state to {}", path.display()))?;
    }

    if !payload.is_empty() {
        match serde_json::from_slice::<serde_json::Value>(&payload) {
            Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            Err(_) => println!("{}", String::from_utf8_lossy(&payload)),
        }
    }
    Ok(())
}
