//! vidvault: streaming CBC file encryption CLI
//!
//! Commands:
//!   encrypt <files>...          - fingerprint and encrypt files to <name>.enc
//!   decrypt <file>              - decrypt an artifact, optionally checking a digest
//!   digest <files>...           - print content digests
//!   verify <file> <digest>      - compare a file against a digest
//!   clean <paths>...            - remove artifacts left by earlier runs
//!   config show                 - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info};

use vidvault_core::config::VidvaultConfig;
use vidvault_core::{CipherAlgorithm, DigestAlgorithm, VidvaultError};
use vidvault_crypto::files::{decrypted_name, encrypted_name};
use vidvault_crypto::{
    decrypt_and_verify, digest_file, encrypt_with_receipt, remove_artifact, verify_digest,
    ContentDigest, EncryptionReceipt, FilePolicy, Integrity,
};

/// Exit status when a digest comparison fails
const EXIT_MISMATCH: u8 = 2;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "vidvault",
    version,
    about = "Streaming AES/Blowfish CBC file encryption",
    long_about = "vidvault: encrypt and decrypt large files with a password, \
                  and verify the result against a content digest"
)]
struct Cli {
    /// Path to config.toml
    #[arg(
        long,
        short = 'c',
        env = "VIDVAULT_CONFIG",
        default_value = "~/.config/vidvault/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides config
    #[arg(long, env = "VIDVAULT_LOG")]
    log: Option<String>,

    /// Log format; overrides config
    #[arg(long, env = "VIDVAULT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt one or more files (processed in parallel)
    ///
    /// Each input is fingerprinted first; the receipt printed afterwards holds
    /// the digest needed to verify a later decryption.
    Encrypt {
        /// Files to encrypt
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Cipher: aes or blowfish (default from config)
        #[arg(long, short = 'a')]
        algorithm: Option<CipherAlgorithm>,
        /// Output directory (default from config)
        #[arg(long, short = 'o')]
        output_dir: Option<PathBuf>,
        /// Password (prompted if not given)
        #[arg(long, env = "VIDVAULT_PASSWORD", hide_env_values = true, value_parser = parse_secret)]
        password: Option<SecretString>,
        /// Skip the extension and size checks
        #[arg(long)]
        no_policy: bool,
        /// Print receipts as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decrypt an artifact produced by `encrypt`
    Decrypt {
        /// Encrypted artifact (IV || ciphertext)
        input: PathBuf,
        /// Cipher used at encryption time (default from config)
        #[arg(long, short = 'a')]
        algorithm: Option<CipherAlgorithm>,
        /// Output path (default: <output_dir>/decrypted_<name>)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Digest from the encryption receipt; mismatch exits with status 2
        #[arg(long)]
        expect_digest: Option<String>,
        /// Digest algorithm for --expect-digest (default from config)
        #[arg(long)]
        digest: Option<DigestAlgorithm>,
        /// Password (prompted if not given)
        #[arg(long, env = "VIDVAULT_PASSWORD", hide_env_values = true, value_parser = parse_secret)]
        password: Option<SecretString>,
    },

    /// Print the content digest of each file
    Digest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// sha256 or blake3 (default from config)
        #[arg(long)]
        digest: Option<DigestAlgorithm>,
    },

    /// Compare a file against an expected digest; mismatch exits with status 2
    Verify {
        file: PathBuf,
        expected: String,
        #[arg(long)]
        digest: Option<DigestAlgorithm>,
    },

    /// Remove artifacts (missing paths are not an error)
    Clean {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = VidvaultConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);
    debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "vidvault starting"
    );

    match cli.command {
        Commands::Encrypt {
            inputs,
            algorithm,
            output_dir,
            password,
            no_policy,
            json,
        } => {
            let password = read_password(password, true)?;
            cmd_encrypt(
                &config,
                &inputs,
                algorithm,
                output_dir.as_deref(),
                &password,
                no_policy,
                json,
            )
        }
        Commands::Decrypt {
            input,
            algorithm,
            output,
            expect_digest,
            digest,
            password,
        } => {
            let password = read_password(password, false)?;
            cmd_decrypt(
                &config,
                &input,
                algorithm,
                output.as_deref(),
                expect_digest.as_deref(),
                digest,
                &password,
            )
        }
        Commands::Digest { files, digest } => cmd_digest(&config, &files, digest),
        Commands::Verify {
            file,
            expected,
            digest,
        } => cmd_verify(&config, &file, &expected, digest),
        Commands::Clean { paths } => cmd_clean(&paths),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries receipts and digests; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}

fn parse_secret(s: &str) -> Result<SecretString, std::convert::Infallible> {
    Ok(SecretString::from(s))
}

/// Use the flag/env password if present, otherwise prompt on the terminal.
fn read_password(given: Option<SecretString>, confirm: bool) -> Result<SecretString> {
    if let Some(p) = given {
        return Ok(p);
    }
    let first = rpassword::prompt_password("Password: ").context("reading password")?;
    if confirm {
        let second =
            rpassword::prompt_password("Confirm password: ").context("reading password")?;
        if first != second {
            anyhow::bail!("passwords do not match");
        }
    }
    Ok(SecretString::from(first))
}

fn make_spinner(multi: &MultiProgress, prefix: &str) -> ProgressBar {
    let pb = multi.add(ProgressBar::new_spinner());
    if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Render an engine error with a hint when retrying can help.
fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<VidvaultError>() {
        Some(e) if e.is_retryable() => format!("{err:#} (try again with the correct password)"),
        _ => format!("{err:#}"),
    }
}

// ── `vidvault encrypt` ────────────────────────────────────────────────────────

fn cmd_encrypt(
    config: &VidvaultConfig,
    inputs: &[PathBuf],
    algorithm: Option<CipherAlgorithm>,
    output_dir: Option<&Path>,
    password: &SecretString,
    no_policy: bool,
    json: bool,
) -> Result<ExitCode> {
    let algorithm = algorithm.unwrap_or(config.cipher.algorithm);
    let output_dir = expand_tilde(output_dir.unwrap_or(config.files.output_dir.as_path()));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating output dir: {}", output_dir.display()))?;
    let policy = if no_policy {
        FilePolicy::unrestricted()
    } else {
        FilePolicy::from_config(&config.files)?
    };

    info!(files = inputs.len(), %algorithm, "encrypting");
    let multi = MultiProgress::new();

    // Each file gets its own cipher context; nothing is shared between workers
    let results: Vec<(PathBuf, Result<EncryptionReceipt>)> = inputs
        .par_iter()
        .map(|input| {
            let pb = make_spinner(&multi, "encrypt");
            pb.set_message(input.display().to_string());
            let result = encrypt_one(config, &policy, input, &output_dir, password, algorithm);
            match &result {
                Ok(r) => pb.finish_with_message(format!(
                    "{} → {}",
                    input.display(),
                    r.artifact.display()
                )),
                Err(_) => pb.finish_with_message(format!("{} failed", input.display())),
            }
            (input.clone(), result)
        })
        .collect();

    let mut failed = 0;
    let mut receipts = Vec::new();
    for (input, result) in results {
        match result {
            Ok(receipt) => receipts.push(receipt),
            Err(e) => {
                failed += 1;
                eprintln!("error: {}: {}", input.display(), describe(&e));
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&receipts)?);
    } else {
        for r in &receipts {
            println!("{}", r.artifact.display());
            println!("  original:  {} ({} bytes)", r.original_name, r.plaintext_bytes);
            println!("  algorithm: {}", r.algorithm);
            println!("  {}:    {}", r.digest.algorithm(), r.digest);
            println!("  size:      {} bytes", r.artifact_bytes);
        }
    }

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn encrypt_one(
    config: &VidvaultConfig,
    policy: &FilePolicy,
    input: &Path,
    output_dir: &Path,
    password: &SecretString,
    algorithm: CipherAlgorithm,
) -> Result<EncryptionReceipt> {
    policy.check(input)?;
    let output = output_dir.join(encrypted_name(input, &config.files.encrypted_suffix));
    let receipt = encrypt_with_receipt(
        input,
        &output,
        password,
        algorithm,
        config.integrity.algorithm,
        config.cipher.chunk_size()?,
    )?;
    Ok(receipt)
}

// ── `vidvault decrypt` ────────────────────────────────────────────────────────

fn cmd_decrypt(
    config: &VidvaultConfig,
    input: &Path,
    algorithm: Option<CipherAlgorithm>,
    output: Option<&Path>,
    expect_digest: Option<&str>,
    digest: Option<DigestAlgorithm>,
    password: &SecretString,
) -> Result<ExitCode> {
    let algorithm = algorithm.unwrap_or(config.cipher.algorithm);
    let digest_alg = digest.unwrap_or(config.integrity.algorithm);
    let expected = expect_digest
        .map(|hex| ContentDigest::from_hex(digest_alg, hex))
        .transpose()?;

    let output = match output {
        Some(p) => p.to_path_buf(),
        None => expand_tilde(&config.files.output_dir).join(decrypted_name(
            input,
            &config.files.decrypted_prefix,
            &config.files.encrypted_suffix,
        )),
    };

    let multi = MultiProgress::new();
    let pb = make_spinner(&multi, "decrypt");
    pb.set_message(input.display().to_string());

    let outcome = decrypt_and_verify(
        input,
        &output,
        password,
        algorithm,
        expected.as_ref(),
        digest_alg,
        config.cipher.chunk_size()?,
    );
    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            pb.finish_with_message(format!("{} failed", input.display()));
            let e = anyhow::Error::from(e);
            eprintln!("error: {}: {}", input.display(), describe(&e));
            return Ok(ExitCode::FAILURE);
        }
    };
    pb.finish_with_message(format!("{} → {}", input.display(), output.display()));

    println!("{}", output.display());
    println!("  size:   {} bytes", outcome.stats.bytes_out);
    println!("  {}: {}", outcome.digest.algorithm(), outcome.digest);

    match &outcome.integrity {
        Integrity::Unchecked => Ok(ExitCode::SUCCESS),
        Integrity::Verified => {
            println!("  integrity: OK");
            Ok(ExitCode::SUCCESS)
        }
        Integrity::Mismatch { .. } => {
            println!("  integrity: MISMATCH (wrong password or corrupted file; output kept)");
            Ok(ExitCode::from(EXIT_MISMATCH))
        }
    }
}

// ── `vidvault digest` / `vidvault verify` ─────────────────────────────────────

fn cmd_digest(
    config: &VidvaultConfig,
    files: &[PathBuf],
    digest: Option<DigestAlgorithm>,
) -> Result<ExitCode> {
    let alg = digest.unwrap_or(config.integrity.algorithm);
    let mut status = ExitCode::SUCCESS;
    for file in files {
        match digest_file(file, alg) {
            Ok(d) => println!("{d}  {}", file.display()),
            Err(e) => {
                eprintln!("error: {}: {e}", file.display());
                status = ExitCode::FAILURE;
            }
        }
    }
    Ok(status)
}

fn cmd_verify(
    config: &VidvaultConfig,
    file: &Path,
    expected: &str,
    digest: Option<DigestAlgorithm>,
) -> Result<ExitCode> {
    let alg = digest.unwrap_or(config.integrity.algorithm);
    let expected = ContentDigest::from_hex(alg, expected)?;
    let actual = digest_file(file, alg)
        .with_context(|| format!("hashing {}", file.display()))?;

    match verify_digest(&expected, &actual) {
        Ok(()) => {
            println!("{}: OK", file.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{}: MISMATCH", file.display());
            debug!("{e}");
            Ok(ExitCode::from(EXIT_MISMATCH))
        }
    }
}

// ── `vidvault clean` ──────────────────────────────────────────────────────────

fn cmd_clean(paths: &[PathBuf]) -> Result<ExitCode> {
    let mut status = ExitCode::SUCCESS;
    for path in paths {
        match remove_artifact(path) {
            Ok(true) => println!("removed {}", path.display()),
            Ok(false) => println!("absent  {}", path.display()),
            Err(e) => {
                eprintln!("error: {}: {e}", path.display());
                status = ExitCode::FAILURE;
            }
        }
    }
    Ok(status)
}

// ── `vidvault config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &VidvaultConfig, path: &Path) -> Result<ExitCode> {
    println!("# config: {}", path.display());
    println!("{}", toml::to_string_pretty(config).context("serializing config")?);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn cli_parses_encrypt() {
        let cli = Cli::try_parse_from([
            "vidvault",
            "encrypt",
            "a.mp4",
            "b.mkv",
            "-a",
            "blowfish",
            "--password",
            "pw",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Encrypt {
                inputs,
                algorithm,
                password,
                json,
                ..
            } => {
                assert_eq!(inputs.len(), 2);
                assert_eq!(algorithm, Some(CipherAlgorithm::Blowfish));
                assert_eq!(password.unwrap().expose_secret(), "pw");
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn flag_password_is_used_without_prompting() {
        let cli = Cli::try_parse_from(["vidvault", "decrypt", "a.mp4.enc", "--password", "s3cret"])
            .unwrap();
        let Commands::Decrypt { password, .. } = cli.command else {
            panic!("expected decrypt");
        };
        let debug = format!("{password:?}");
        assert!(!debug.contains("s3cret"), "password leaked in Debug: {debug}");
        let secret = read_password(password, false).unwrap();
        assert_eq!(secret.expose_secret(), "s3cret");
    }

    #[test]
    fn cli_rejects_unknown_algorithm() {
        let err = Cli::try_parse_from(["vidvault", "encrypt", "a.mp4", "-a", "des"]);
        assert!(err.is_err());
    }

    #[test]
    fn cli_parses_decrypt_with_digest() {
        let cli = Cli::try_parse_from([
            "vidvault",
            "decrypt",
            "a.mp4.enc",
            "--expect-digest",
            "abcd",
            "--digest",
            "blake3",
        ])
        .unwrap();
        match cli.command {
            Commands::Decrypt {
                expect_digest,
                digest,
                ..
            } => {
                assert_eq!(expect_digest.as_deref(), Some("abcd"));
                assert_eq!(digest, Some(DigestAlgorithm::Blake3));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn expand_tilde_uses_home() {
        let expanded = expand_tilde(Path::new("~/x/config.toml"));
        assert!(expanded.ends_with("x/config.toml"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_tilde(Path::new("/etc/a")), PathBuf::from("/etc/a"));
    }

    #[test]
    fn encrypt_one_writes_artifact_and_receipt() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = tmp.path().join("clip.mp4");
        std::fs::write(&input, b"frames").unwrap();
        let config = VidvaultConfig::default();

        let receipt = encrypt_one(
            &config,
            &FilePolicy::from_config(&config.files).unwrap(),
            &input,
            tmp.path(),
            &SecretString::from("pw"),
            CipherAlgorithm::Aes,
        )
        .unwrap();
        assert_eq!(receipt.artifact, tmp.path().join("clip.mp4.enc"));
        assert!(receipt.artifact.exists());
    }

    #[test]
    fn encrypt_one_applies_policy() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = tmp.path().join("notes.txt");
        std::fs::write(&input, b"not a video").unwrap();
        let config = VidvaultConfig::default();

        let err = encrypt_one(
            &config,
            &FilePolicy::from_config(&config.files).unwrap(),
            &input,
            tmp.path(),
            &SecretString::from("pw"),
            CipherAlgorithm::Aes,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VidvaultError>(),
            Some(VidvaultError::FileRejected(_))
        ));
        assert!(!tmp.path().join("notes.txt.enc").exists());
    }
}
