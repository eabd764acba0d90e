//! `appauth` command-line entry point.
//!
//! Inspects manifests, authenticates executables against them, derives
//! client ids and hashes files. Rejections exit with the errno magnitude.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, warn};

use appauth::client::{AppAuthenticator, AuthRequest, ClientIdentity, Process};
use appauth::config::AppAuthConfig;
use appauth::digest::DigestAlgorithm;
use appauth::error::AppAuthError;
use appauth::file_hash::FileHasher;
use appauth::manifest::{Manifest, MAX_MANIFEST_LEN};

/// Manifest-based application authentication.
#[derive(Parser)]
#[command(name = "appauth", version, about)]
struct Cli {
    /// Config file (default: $APPAUTH_CONFIG_PATH, /etc/appauth/appauth.toml,
    /// then the user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSON logs to this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Decode a manifest and print its contents.
    Inspect {
        /// Manifest file.
        manifest: PathBuf,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Authenticate an executable against its manifest.
    Verify {
        /// Executable to authenticate.
        #[arg(long)]
        exe: PathBuf,
        /// Capability mask to request.
        #[arg(long, default_value_t = 0)]
        caps: u16,
    },
    /// Derive the client id of a process.
    ClientId {
        /// Process id (default: this process).
        #[arg(long)]
        pid: Option<u32>,
        /// Capability mask to request.
        #[arg(long, default_value_t = 0)]
        caps: u16,
    },
    /// Hash a file, optionally checking it against an expected digest.
    Hash {
        /// File to hash.
        file: PathBuf,
        /// Digest algorithm.
        #[arg(long, default_value = "sha256")]
        algo: DigestAlgorithm,
        /// Expected digest in hex.
        #[arg(long)]
        expect: Option<String>,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = AppAuthConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let _logging_guard = match &cli.log_dir {
        Some(dir) => Some(appauth::logging::init_production(dir, &config.logging.level)?),
        None => {
            appauth::logging::init_cli(&config.logging.level)?;
            None
        }
    };
    debug!(enabled = config.auth.enabled, root = %config.auth.manifest_root.display(), "configuration loaded");

    match cli.command {
        Command::Inspect { manifest, json } => handle_inspect(&manifest, json),
        Command::Verify { exe, caps } => handle_verify(&config, &exe, caps),
        Command::ClientId { pid, caps } => handle_client_id(&config, pid, caps),
        Command::Hash { file, algo, expect } => handle_hash(&config, &file, algo, expect),
    }
}

/// Exit code carrying the errno magnitude of `err`.
fn exit_for(err: &AppAuthError) -> ExitCode {
    ExitCode::from(u8::try_from(err.errno().unsigned_abs()).unwrap_or(1))
}

#[derive(Serialize)]
struct InspectReport {
    version: u8,
    declared_len: usize,
    chunks: usize,
    name: Option<String>,
    app_name: Option<String>,
    public_key_len: Option<usize>,
    certificate_len: Option<usize>,
    signature_len: Option<usize>,
    files: Vec<FileReport>,
}

#[derive(Serialize)]
struct FileReport {
    filename: String,
    size: u32,
    algo: DigestAlgorithm,
    digest: String,
}

fn handle_inspect(path: &Path, json: bool) -> anyhow::Result<ExitCode> {
    let size = std::fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    let limit = u64::try_from(MAX_MANIFEST_LEN).unwrap_or(u64::MAX);
    if size > limit {
        let err = AppAuthError::FileTooBig {
            path: path.to_path_buf(),
            size,
            limit,
        };
        eprintln!("{err}");
        return Ok(exit_for(&err));
    }
    let buf = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;

    let manifest = Manifest::new(&buf);
    let chunks = match manifest.validate_layout() {
        Ok(n) => n,
        Err(e) => {
            let err = AppAuthError::from(e);
            eprintln!("{err}");
            return Ok(exit_for(&err));
        }
    };

    let files = match manifest.files().collect::<Result<Vec<_>, _>>() {
        Ok(entries) => entries
            .into_iter()
            .map(|e| FileReport {
                filename: e.filename.to_owned(),
                size: e.size,
                algo: e.digest_algo,
                digest: hex::encode(e.digest),
            })
            .collect(),
        Err(e) => {
            let err = AppAuthError::from(e);
            eprintln!("{err}");
            return Ok(exit_for(&err));
        }
    };

    let report = InspectReport {
        version: manifest.version(),
        declared_len: manifest.declared_len(),
        chunks,
        name: manifest.name().map(str::to_owned),
        app_name: manifest.app_data().map(|a| a.app_name.to_owned()),
        public_key_len: manifest.public_key().map(<[u8]>::len),
        certificate_len: manifest.certificate().map(<[u8]>::len),
        signature_len: manifest.signature().map(<[u8]>::len),
        files,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to encode report")?
        );
    } else {
        print_report(&report);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &InspectReport) {
    let or_none = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_owned());
    let len_or_none = |v: Option<usize>| v.map_or_else(|| "-".to_owned(), |n| format!("{n} bytes"));
    println!("version:      {}", report.version);
    println!("length:       {}", report.declared_len);
    println!("chunks:       {}", report.chunks);
    println!("name:         {}", or_none(&report.name));
    println!("app:          {}", or_none(&report.app_name));
    println!("public key:   {}", len_or_none(report.public_key_len));
    println!("certificate:  {}", len_or_none(report.certificate_len));
    println!("signature:    {}", len_or_none(report.signature_len));
    println!("files:        {}", report.files.len());
    for f in &report.files {
        println!("  {} ({} bytes) {}:{}", f.filename, f.size, f.algo, f.digest);
    }
}

fn handle_verify(config: &AppAuthConfig, exe: &Path, caps: u16) -> anyhow::Result<ExitCode> {
    let exe = match std::fs::canonicalize(exe) {
        Ok(p) => p,
        Err(e) => {
            let err = AppAuthError::from_io(exe, e);
            eprintln!("{err}");
            return Ok(exit_for(&err));
        }
    };
    let authenticator = AppAuthenticator::from_config(config)?;
    info!(exe = %exe.display(), manifest = %authenticator.manifest_path(&exe).display(), "verifying");

    match authenticator.authenticate(&exe, &AuthRequest::with_capabilities(caps)) {
        Ok(outcome) => {
            println!(
                "ok: {} ({} files verified)",
                outcome.app_name, outcome.files_verified
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(rejection) => {
            warn!(stage = %rejection.stage, error = %rejection.error, "verification failed");
            eprintln!("{rejection}");
            Ok(exit_for(&rejection.error))
        }
    }
}

fn handle_client_id(config: &AppAuthConfig, pid: Option<u32>, caps: u16) -> anyhow::Result<ExitCode> {
    let identity = ClientIdentity::from_config(config)?;
    let process = pid.map_or(Process::Current, Process::Pid);
    match identity.derive_client_id(process, &AuthRequest::with_capabilities(caps)) {
        Ok(id) => {
            println!("{id}");
            Ok(ExitCode::SUCCESS)
        }
        Err(rejection) => {
            eprintln!("{rejection}");
            Ok(exit_for(&rejection.error))
        }
    }
}

fn handle_hash(
    config: &AppAuthConfig,
    file: &Path,
    algo: DigestAlgorithm,
    expect: Option<String>,
) -> anyhow::Result<ExitCode> {
    let hasher = FileHasher::new(
        std::sync::Arc::new(appauth::digest::SoftwareHashProvider),
        config.auth.max_file_bytes,
    );
    let result = match expect {
        Some(hex_digest) => {
            let expected = hex::decode(hex_digest.trim()).context("--expect is not hex")?;
            hasher
                .compute_file_hash(file, &expected, algo)
                .map(|()| hex::encode(&expected))
        }
        None => hasher.hash_file(file, algo).map(|d| d.to_hex()),
    };
    match result {
        Ok(hex_digest) => {
            println!("{hex_digest}  {}", file.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(exit_for(&err))
        }
    }
}
