//! Simple CA - command line front end
//!
//! ```bash
//! simple-ca ca                                          # create root + intermediate
//! simple-ca server api.local api.local 127.0.0.1.nip.io # issue a server certificate
//! simple-ca status
//! ```
//!
//! The store directory is `--store`, else `$SIMPLE_CA_HOME`, else
//! `~/.simple_ca`.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use simple_ca::certfiles::write_leaf_files;
use simple_ca::distinguished_name::DistinguishedName;
use simple_ca::{AppConfig, CaError, Certificate, CertificateAuthority, ChainStatus, FileStore, Slot};

const DEFAULT_STORE_DIR: &str = ".simple_ca";

/// Private certificate authority for development TLS certificates
#[derive(Parser, Debug)]
#[command(name = "simple-ca", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Store directory holding keys, certificates and config.toml
    #[arg(long, env = "SIMPLE_CA_HOME", global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the root and intermediate CA (once per store)
    Ca {
        /// Finish an interrupted bootstrap by creating only the intermediate CA
        #[arg(long)]
        resume: bool,
    },

    /// Issue a TLS server certificate signed by the intermediate CA
    Server(ServerArgs),

    /// Show the state of the CA chain
    Status,
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Subject common name, e.g. `*.example.com`
    common_name: String,

    /// DNS subject alternative names, used exactly as given
    #[arg(required = true)]
    sans: Vec<String>,

    #[arg(long)]
    country: Option<String>,

    #[arg(long)]
    state: Option<String>,

    #[arg(long)]
    locality: Option<String>,

    #[arg(long = "org")]
    organization: Option<String>,

    #[arg(long = "org-unit")]
    organizational_unit: Option<String>,

    /// Directory to write <id>.key.pem, <id>.cert.pem and <id>.fullchain.pem
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

impl ServerArgs {
    fn subject(&self) -> DistinguishedName {
        DistinguishedName {
            country: self.country.clone().unwrap_or_default(),
            state: self.state.clone().unwrap_or_default(),
            locality: self.locality.clone().unwrap_or_default(),
            organization: self.organization.clone().unwrap_or_default(),
            organizational_unit: self.organizational_unit.clone().unwrap_or_default(),
            common_name: self.common_name.clone(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            if let Some(hint) = e.downcast_ref::<CaError>().and_then(CaError::guidance) {
                eprintln!("  {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("simple_ca={}", level)));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn store_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(dir) = &cli.store {
        return Ok(dir.clone());
    }
    let base = directories::BaseDirs::new().context("Cannot determine home directory; pass --store")?;
    Ok(base.home_dir().join(DEFAULT_STORE_DIR))
}

fn run(cli: Cli) -> Result<()> {
    let dir = store_dir(&cli)?;
    let config = AppConfig::load_or_init(&dir)
        .with_context(|| format!("Failed to load configuration from {}", dir.display()))?;
    let store = FileStore::open(&dir, config.store.lock_timeout())
        .with_context(|| format!("Failed to open store at {}", dir.display()))?;
    let ca = CertificateAuthority::new(store, config)?;

    match &cli.command {
        Commands::Ca { resume: false } => {
            let (root, intermediate) = ca.bootstrap()?;
            println!("✓ Root CA created: {}", root.subject()?);
            println!("✓ Intermediate CA created: {}", intermediate.subject()?);
            println!("  Trust anchor: {}", ca.store().cert_path(&Slot::Root).display());
        }
        Commands::Ca { resume: true } => {
            let intermediate = ca.complete_bootstrap()?;
            println!("✓ Intermediate CA created: {}", intermediate.subject()?);
            println!("  Trust anchor: {}", ca.store().cert_path(&Slot::Root).display());
        }
        Commands::Server(args) => {
            let issued = ca.issue_leaf_named(args.subject(), args.sans.as_slice())?;
            let files = write_leaf_files(&args.out, &issued)
                .with_context(|| format!("Failed to write certificate files to {}", args.out.display()))?;
            println!("✓ Certificate issued for {}", issued.certificate.subject()?);
            println!("  SANs:       {}", args.sans.join(", "));
            println!("  Serial:     {}", issued.certificate.serial()?);
            println!("  Key:        {}", files.key.display());
            println!("  Cert:       {}", files.certificate.display());
            println!("  Full chain: {}", files.fullchain.display());
        }
        Commands::Status => {
            let status = ca.chain_status()?;
            println!("Store:  {}", dir.display());
            println!("Status: {}", status);
            if status != ChainStatus::Empty {
                print_certificate("Root CA", &ca.root_certificate()?)?;
            }
            if status == ChainStatus::ChainReady {
                print_certificate("Intermediate CA", &ca.intermediate_certificate()?)?;
            }
            if status == ChainStatus::RootOnly {
                println!("\n⚠ Bootstrap was interrupted; run `simple-ca ca --resume`");
            }
        }
    }
    Ok(())
}

fn print_certificate(label: &str, certificate: &Certificate) -> Result<()> {
    println!("\n{}", label);
    println!("  Subject:    {}", certificate.subject()?);
    println!("  Serial:     {}", certificate.serial()?);
    println!("  Not before: {}", certificate.not_before());
    println!("  Not after:  {}", certificate.not_after());
    Ok(())
}
