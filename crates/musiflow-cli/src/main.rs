//! `MusiFlow` CLI: the admin page, verification page, claim-options page,
//! and signup form as subcommands over a local store.
//!
//! Each invocation is one page visit: it opens the store, performs one user
//! action, prints what the page would show, and exits.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod config;

use std::io::{BufRead, Write as _};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use musiflow_core::admin::{AdminView, Confirmation, Panel, PanelView};
use musiflow_core::code::format_code_input;
use musiflow_core::signup::SignupForm;
use musiflow_core::store::JsonStore;
use musiflow_core::workflow::{
    AllocationOutcome, ClaimOptionsEntry, ClaimWorkflow, SubmitCodeOutcome,
};
use musiflow_storage::{MemoryBackend, StorageBackend};

use crate::config::{CliConfig, StorageBackendType};

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

// ── CLI structure ────────────────────────────────────────────────────

/// `MusiFlow`: redemption codes and premium claims.
#[derive(Parser)]
#[command(
    name = "musiflow",
    version,
    about = "MusiFlow CLI: generate redemption codes, manage stock, and claim offers",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         MUSIFLOW_STORAGE       memory | redb (default: redb)\n  \
         MUSIFLOW_STORAGE_PATH  store location (default: ./musiflow.redb)\n  \
         MUSIFLOW_FAST          1 to skip simulated delays\n\n\
         {DIM}Examples:{RESET}\n  \
         musiflow admin generate --count 5\n  \
         musiflow admin add-stock --email premium@example.com --password hunter22\n  \
         musiflow claim verify AB12-CD34-EF56-GH78\n  \
         musiflow claim account"
    ),
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Admin page: codes, stock, and submitted credentials.
    Admin {
        #[command(subcommand)]
        action: AdminCommands,
    },
    /// Claim pages: verify a code, then claim an account.
    Claim {
        #[command(subcommand)]
        action: ClaimCommands,
    },
    /// Start a free trial.
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Generate new redemption codes.
    Generate {
        /// How many codes to generate.
        #[arg(long, default_value = "1")]
        count: usize,
    },
    /// List codes, newest first.
    Codes {
        #[arg(long, default_value = "1")]
        page: usize,
    },
    /// List stock accounts, newest first.
    Stock {
        #[arg(long, default_value = "1")]
        page: usize,
    },
    /// List submitted credentials, newest first.
    Credentials {
        #[arg(long, default_value = "1")]
        page: usize,
    },
    /// Add an account to stock.
    #[command(name = "add-stock")]
    AddStock {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Delete all codes, stock, and credentials.
    Clear {
        /// Skip the confirmation prompt.
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ClaimCommands {
    /// Verify a redemption code (input is normalized to XXXX-XXXX-XXXX-XXXX).
    Verify { code: String },
    /// Claim a premium account from stock.
    Account {
        /// Skip the confirmation prompt.
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Submit an existing account to upgrade.
    Existing {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
}

// ── Pretty output helpers ────────────────────────────────────────────

fn header(icon: &str, title: &str) {
    println!("{BOLD}{CYAN}{icon} {title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<12}{RESET} {value}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

fn warning(msg: &str) {
    println!("{YELLOW}{BOLD}⚠{RESET} {YELLOW}{msg}{RESET}");
}

fn page_footer(page: usize, total_pages: usize, total_items: usize) {
    println!();
    println!("  {DIM}page {page}/{total_pages} · {total_items} total{RESET}");
}

/// Ask a yes/no question on stdin. Anything but `y`/`yes` is a no,
/// including a closed stdin.
fn confirm(question: &str) -> Result<bool> {
    print!("{YELLOW}?{RESET} {question} [y/N] ");
    std::io::stdout().flush().context("failed to flush stdout")?;
    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    let answer = answer.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

// ── Main ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = CliConfig::from_env();
    init_logging(&config);

    match run(&config, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &CliConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_store(config: &CliConfig) -> Result<JsonStore> {
    let backend: Arc<dyn StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "redb-backend")]
        StorageBackendType::Redb { path } => {
            info!(path = %path, "using redb storage");
            Arc::new(musiflow_storage::RedbBackend::open(path).context("failed to open redb storage")?)
        }
        #[cfg(not(feature = "redb-backend"))]
        StorageBackendType::Redb { .. } => {
            bail!("redb backend requested but feature 'redb-backend' is not enabled");
        }
    };
    Ok(JsonStore::new(backend))
}

async fn run(config: &CliConfig, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Admin { action } => cmd_admin(config, action).await,
        Commands::Claim { action } => cmd_claim(config, action).await,
        Commands::Signup {
            name,
            email,
            password,
        } => cmd_signup(config, SignupForm { name, email, password }).await,
    }
}

// ── Admin page ───────────────────────────────────────────────────────

async fn cmd_admin(config: &CliConfig, action: AdminCommands) -> Result<()> {
    let mut admin = AdminView::new(open_store(config)?, config.page_size);

    match action {
        AdminCommands::Generate { count } => {
            let codes = admin
                .codes()
                .generate_batch(count)
                .await
                .context("failed to generate codes")?;
            header("🎟", "Generated Codes");
            for code in &codes {
                println!("  {}", code.code);
            }
        }
        AdminCommands::Codes { page } => {
            print_panel(&admin.show_page(Panel::Codes, page).await?);
        }
        AdminCommands::Stock { page } => {
            print_panel(&admin.show_page(Panel::Stock, page).await?);
        }
        AdminCommands::Credentials { page } => {
            print_panel(&admin.show_page(Panel::Credentials, page).await?);
        }
        AdminCommands::AddStock { email, password } => {
            admin
                .stock()
                .add_stock(&email, &password)
                .await
                .context("failed to add stock")?;
            let available = admin.stock().available_count().await?;
            success(&format!("Added {email} to stock ({available} available)"));
        }
        AdminCommands::Clear { yes } => {
            let confirmation = if yes || confirm("Are you sure you want to delete all codes?")? {
                Confirmation::Confirmed
            } else {
                Confirmation::Declined
            };
            if admin.clear_all(confirmation).await? {
                success("Cleared all codes, stock, and credentials");
            } else {
                warning("Nothing deleted");
            }
        }
    }
    Ok(())
}

fn print_panel(view: &PanelView) {
    match view {
        PanelView::Codes(page) => {
            header("🎟", "Codes");
            for code in &page.items {
                let color = if code.status == musiflow_core::code::CodeStatus::Claimed {
                    RED
                } else {
                    GREEN
                };
                println!("  {} {color}[{}]{RESET}", code.code, code.status);
            }
            page_footer(page.page, page.total_pages, page.total_items);
        }
        PanelView::Stock(page) => {
            header("📦", "Stock");
            for record in &page.items {
                let color = if record.status == musiflow_core::stock::StockStatus::Given {
                    RED
                } else {
                    GREEN
                };
                println!(
                    "  {BOLD}{}{RESET} : {} {color}[{}]{RESET}",
                    record.email, record.password, record.status
                );
            }
            page_footer(page.page, page.total_pages, page.total_items);
        }
        PanelView::Credentials(page) => {
            header("🔑", "Credentials");
            for cred in &page.items {
                println!("  {BOLD}{}{RESET}", cred.email);
                println!("    {DIM}Pass:{RESET} {}", cred.password);
                println!("    {DIM}{}{RESET}", cred.submitted_at);
            }
            page_footer(page.page, page.total_pages, page.total_items);
        }
    }
}

// ── Claim pages ──────────────────────────────────────────────────────

async fn cmd_claim(config: &CliConfig, action: ClaimCommands) -> Result<()> {
    let mut flow = ClaimWorkflow::new(open_store(config)?, config.delays);

    match action {
        ClaimCommands::Verify { code } => {
            let code = format_code_input(&code);
            let outcome = flow.submit_code(&code).await?;
            match outcome {
                SubmitCodeOutcome::Verified { .. } => {
                    success(outcome.message());
                    println!(
                        "  {DIM}Next: `musiflow claim account` or `musiflow claim existing`{RESET}"
                    );
                }
                SubmitCodeOutcome::AlreadyClaimed | SubmitCodeOutcome::NotFound => {
                    bail!("{}", outcome.message());
                }
            }
        }
        ClaimCommands::Account { yes } => {
            open_claim_options(&mut flow).await?;
            if !yes && !confirm("Are you sure you want to claim a new Premium account?")? {
                warning("Claim cancelled");
                return Ok(());
            }
            println!("{DIM}Processing...{RESET}");
            let outcome = flow.claim_available_account().await?;
            match &outcome {
                AllocationOutcome::Allocated(record) => {
                    header("🎧", "Your Premium Account");
                    kv_line("Email", &record.email);
                    kv_line("Password", &record.password);
                }
                AllocationOutcome::OutOfStock | AllocationOutcome::AlreadyClaimed { .. } => {
                    bail!("{}", outcome.message());
                }
            }
        }
        ClaimCommands::Existing { email, password } => {
            open_claim_options(&mut flow).await?;
            println!("{DIM}Processing...{RESET}");
            let receipt = flow.submit_existing_account(&email, &password).await?;
            success(receipt.message());
        }
    }
    Ok(())
}

async fn open_claim_options(flow: &mut ClaimWorkflow) -> Result<()> {
    match flow.open_claim_options().await? {
        ClaimOptionsEntry::Ready => Ok(()),
        ClaimOptionsEntry::Redirect(_) => {
            bail!("this offer has already been claimed; verify a new code first")
        }
    }
}

// ── Signup ───────────────────────────────────────────────────────────

async fn cmd_signup(config: &CliConfig, form: SignupForm) -> Result<()> {
    form.validate()?;
    println!("{DIM}Creating Account...{RESET}");
    let welcome = form.submit(&config.delays).await?;
    success(&welcome);
    Ok(())
}
