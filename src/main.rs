use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use zeroize::Zeroizing;

use qsc_core::{
    asymmetric::{self, KeyPair},
    channel::{ChannelMode, SymmetricChannel},
    config::QscConfig,
    rng::RngDomain,
    session::{self, SessionReport},
    signing::{self, RsaPssSigner, Signer as _, Verification},
    util,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "qsc",
    version = util::VERSION,
    about = "Simulated quantum key agreement feeding a classical secure channel"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one key-agreement session and print its report as JSON.
    Agree {
        #[arg(long)]
        bits: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        output_bits: Option<usize>,
        #[arg(long)]
        qber_threshold: Option<f64>,
        /// Fraction of qubits an intercept-resend eavesdropper measures.
        #[arg(long)]
        eavesdrop_rate: Option<f64>,
        /// Write the agreed key (base64) to this file.
        #[arg(long)]
        key_out: Option<PathBuf>,
        /// Permit --key-out for a seeded (reproducible) session.
        #[arg(long)]
        allow_simulated_key: bool,
    },

    /// Encrypt a message with a symmetric key file.
    Encrypt {
        #[arg(long)]
        key_file: PathBuf,
        #[arg(long)]
        text: Option<String>,
        #[arg(long = "in")]
        input: Option<PathBuf>,
        /// Use unauthenticated AES-CBC for legacy peers.
        #[arg(long)]
        legacy_cbc: bool,
    },

    /// Decrypt an `iv:ciphertext` wire string.
    Decrypt {
        #[arg(long)]
        key_file: PathBuf,
        #[arg(long)]
        wire: String,
        #[arg(long)]
        legacy_cbc: bool,
    },

    /// Generate an RSA key pair (PKCS#8 private, SPKI public).
    Keygen {
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long)]
        bits: Option<usize>,
    },

    /// RSA-OAEP encrypt a short message to a public key.
    RsaEncrypt {
        #[arg(long)]
        public_key: PathBuf,
        #[arg(long)]
        text: Option<String>,
        #[arg(long = "in")]
        input: Option<PathBuf>,
    },

    /// RSA-OAEP decrypt a base64 ciphertext.
    RsaDecrypt {
        #[arg(long)]
        private_key: PathBuf,
        #[arg(long)]
        ciphertext: String,
    },

    /// RSA-PSS sign a message; prints the base64 signature.
    Sign {
        #[arg(long)]
        private_key: PathBuf,
        #[arg(long)]
        text: Option<String>,
        #[arg(long = "in")]
        input: Option<PathBuf>,
    },

    /// Verify a base64 RSA-PSS signature. Exits 1 if it is invalid.
    Verify {
        #[arg(long)]
        public_key: PathBuf,
        #[arg(long)]
        signature: String,
        #[arg(long)]
        text: Option<String>,
        #[arg(long = "in")]
        input: Option<PathBuf>,
    },

    /// Run the whole pipeline end to end with the configured settings.
    Demo,

    /// Print version information.
    Version,
}

#[derive(Debug, Serialize)]
struct DemoSummary {
    session: SessionReport,
    channel_mode: ChannelMode,
    round_trip_ok: bool,
    rsa_key_id: String,
    signature: Verification,
    key_transport_ok: bool,
}

const DEMO_MESSAGE: &str = "This is a secret message for AES.";

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = QscConfig::load(cli.config.as_deref()).context("load config")?;
    cfg.apply_env().context("apply environment overrides")?;

    init_logging(&cfg.logging)?;

    match cli.cmd {
        Commands::Agree {
            bits,
            seed,
            output_bits,
            qber_threshold,
            eavesdrop_rate,
            key_out,
            allow_simulated_key,
        } => {
            let s = &mut cfg.session;
            s.bit_count = bits.unwrap_or(s.bit_count);
            s.seed = seed.or(s.seed);
            s.output_bits = output_bits.unwrap_or(s.output_bits);
            s.qber_threshold = qber_threshold.unwrap_or(s.qber_threshold);
            s.eavesdrop_rate = eavesdrop_rate.unwrap_or(s.eavesdrop_rate);
            cfg.validate().context("validate config")?;

            let outcome = session::run_session(&cfg.session).context("key agreement")?;
            if let Some(path) = key_out {
                if outcome.report.rng_domain == RngDomain::Simulation {
                    if !allow_simulated_key {
                        anyhow::bail!(
                            "refusing to write a key from a seeded session; \
                             pass --allow-simulated-key to export it anyway"
                        );
                    }
                    warn!(seed = ?outcome.report.seed, "exporting a reproducible simulation key");
                }
                write_secret_file(&path, &util::b64_encode(outcome.key.expose_secret()))?;
                info!(out = %path.display(), "agreed key written");
            }
            print_json(&outcome.report)?;
        }

        Commands::Encrypt {
            key_file,
            text,
            input,
            legacy_cbc,
        } => {
            let channel = load_channel(&key_file, legacy_cbc)?;
            let message = read_message(text, input)?;
            println!("{}", channel.encrypt(&message).context("encrypt")?);
        }

        Commands::Decrypt {
            key_file,
            wire,
            legacy_cbc,
        } => {
            let channel = load_channel(&key_file, legacy_cbc)?;
            let plaintext = Zeroizing::new(channel.decrypt(&wire).context("decrypt")?);
            write_stdout(&plaintext)?;
        }

        Commands::Keygen { out_dir, bits } => {
            let out_dir = out_dir.unwrap_or(cfg.keys.dir.clone());
            let bits = bits.unwrap_or(cfg.keys.rsa_bits);
            let pair = KeyPair::generate(bits).context("generate RSA key pair")?;
            pair.write_pem_files(&out_dir).context("write PEM files")?;
            info!(
                out_dir = %out_dir.display(),
                key_id = %pair.key_id(),
                "generated private_key.pem and public_key.pem"
            );
        }

        Commands::RsaEncrypt {
            public_key,
            text,
            input,
        } => {
            let public = load_public_key(&public_key)?;
            let message = read_message(text, input)?;
            println!(
                "{}",
                asymmetric::encrypt_b64(&message, &public).context("RSA encrypt")?
            );
        }

        Commands::RsaDecrypt {
            private_key,
            ciphertext,
        } => {
            let pair = load_key_pair(&private_key)?;
            let plaintext = Zeroizing::new(
                asymmetric::decrypt_b64(&ciphertext, pair.private_key()).context("RSA decrypt")?,
            );
            write_stdout(&plaintext)?;
        }

        Commands::Sign {
            private_key,
            text,
            input,
        } => {
            util::validate_path(&private_key, "private key")?;
            let private_key = util::canonicalize_if_exists(&private_key, "private key")?;
            let signer =
                RsaPssSigner::from_private_key_pem_file(&private_key).context("load signer")?;
            let message = read_message(text, input)?;
            let sig = signer.sign(&message).context("sign message")?;
            info!(key_id = %signer.descriptor().key_id, "message signed");
            println!("{}", util::b64_encode(&sig));
        }

        Commands::Verify {
            public_key,
            signature,
            text,
            input,
        } => {
            util::validate_path(&public_key, "public key")?;
            let pem = std::fs::read_to_string(&public_key)
                .with_context(|| format!("read {}", public_key.display()))?;
            let message = read_message(text, input)?;
            let verdict = signing::verify_b64_pem(&message, &signature, &pem)
                .context("verify signature")?;
            println!("Signature: {verdict}");
            if !verdict.is_valid() {
                std::process::exit(1);
            }
        }

        Commands::Demo => {
            cfg.validate().context("validate config")?;
            let summary = run_demo(&cfg)?;
            print_json(&summary)?;
        }

        Commands::Version => {
            println!("{}", util::version_string());
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Demo
// ---------------------------------------------------------------------------

fn run_demo(cfg: &QscConfig) -> Result<DemoSummary> {
    let outcome = session::run_session(&cfg.session).context("key agreement")?;
    let channel = SymmetricChannel::from_final_key(&outcome.key, cfg.channel.mode)
        .context("key symmetric channel")?;
    let wire = channel.encrypt(DEMO_MESSAGE.as_bytes()).context("encrypt")?;
    let round_trip_ok = channel.decrypt(&wire).context("decrypt")? == DEMO_MESSAGE.as_bytes();

    let pair = KeyPair::generate(cfg.keys.rsa_bits).context("generate RSA key pair")?;
    let signer = RsaPssSigner::from_key_pair(&pair).context("build signer")?;
    let sig = signer.sign(wire.as_bytes()).context("sign ciphertext")?;
    let signature = signing::verify(wire.as_bytes(), &sig, pair.public_key());

    let wrapped = asymmetric::wrap_channel_key(outcome.key.expose_secret(), pair.public_key())
        .context("wrap channel key")?;
    let unwrapped = asymmetric::unwrap_channel(&wrapped, pair.private_key(), cfg.channel.mode)
        .context("unwrap channel key")?;
    let key_transport_ok = unwrapped.decrypt(&wire).is_ok();
    if !key_transport_ok {
        warn!("transported key failed to decrypt the demo message");
    }

    Ok(DemoSummary {
        session: outcome.report,
        channel_mode: channel.mode(),
        round_trip_ok,
        rsa_key_id: pair.key_id().to_string(),
        signature,
        key_transport_ok,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_message(text: Option<String>, input: Option<PathBuf>) -> Result<Vec<u8>> {
    match (text, input) {
        (Some(t), None) => Ok(t.into_bytes()),
        (None, Some(path)) => {
            util::validate_path(&path, "input")?;
            std::fs::read(&path).with_context(|| format!("read {}", path.display()))
        }
        _ => anyhow::bail!("provide exactly one of --text or --in"),
    }
}

fn load_channel(key_file: &Path, legacy_cbc: bool) -> Result<SymmetricChannel> {
    util::validate_path(key_file, "key file")?;
    let encoded = Zeroizing::new(
        std::fs::read_to_string(key_file).context("read key file")?,
    );
    let key = Zeroizing::new(util::b64_decode(&encoded).context("decode key file")?);
    let mode = if legacy_cbc {
        warn!("legacy AES-CBC selected; ciphertexts are not authenticated");
        ChannelMode::LegacyCbc
    } else {
        ChannelMode::Authenticated
    };
    SymmetricChannel::with_mode(&key, mode).context("build channel")
}

fn load_public_key(path: &Path) -> Result<rsa::RsaPublicKey> {
    util::validate_path(path, "public key")?;
    let pem = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    asymmetric::public_key_from_pem(&pem).context("parse public key")
}

fn load_key_pair(path: &Path) -> Result<KeyPair> {
    util::validate_path(path, "private key")?;
    let path = util::canonicalize_if_exists(path, "private key")?;
    KeyPair::load_private_key_file(&path).context("load private key")
}

fn write_secret_file(path: &Path, contents: &str) -> Result<()> {
    util::validate_path(path, "key output")?;
    std::fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("chmod {}", path.display()))?;
    }
    Ok(())
}

fn write_stdout(bytes: &[u8]) -> Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(bytes).context("write stdout")?;
    out.write_all(b"\n").context("write stdout")?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize JSON")?;
    println!("{json}");
    Ok(())
}

fn init_logging(cfg: &qsc_core::config::LoggingConfig) -> Result<()> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));

    let registry = tracing_subscriber::registry().with(filter);

    if cfg.json_stdout {
        // JSON output to stdout for log pipelines.
        let json_layer = tracing_subscriber::fmt::layer().json();
        registry.with(json_layer).init();
    } else if !cfg.json_log_file.is_empty() {
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.json_log_file)
            .with_context(|| format!("open json log file {}", cfg.json_log_file))?;
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::sync::Mutex::new(log_file));
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(file_layer).with(console_layer).init();
    } else {
        // Default: human-readable output to stderr, keeping stdout for results.
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(console_layer).init();
    }
    Ok(())
}
