//! vlotto-buyer — automated lottery ticket purchases on a Verus node
//!
//! Entry point. Parses the command line, initialises structured logging,
//! discovers node credentials, reads the active draw, tops up the funding
//! address by conversion when short, and runs the purchase engine with
//! graceful shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use vlotto_buyer::config::AppConfig;
use vlotto_buyer::convert::Converter;
use vlotto_buyer::market;
use vlotto_buyer::purchase::TicketBuyer;
use vlotto_buyer::rpc::credentials::RpcCredentials;
use vlotto_buyer::rpc::verusd::VerusdClient;
use vlotto_buyer::rpc::NodeRpc;
use vlotto_buyer::types::{DrawState, FundingAddress, PurchaseReport, TicketId};
use vlotto_buyer::wallet;

const BANNER: &str = r#"
       _       _   _
__   _| | ___ | |_| |_ ___
\ \ / / |/ _ \| __| __/ _ \
 \ V /| | (_) | |_| || (_) |
  \_/ |_|\___/ \__|\__\___/

  Verus Lottery Ticket Buyer
  v0.1.0
"#;

#[derive(Parser)]
#[command(name = "vlotto-buyer")]
#[command(version, about = "Buys vLotto tickets from the Verus marketplace", long_about = None)]
struct Cli {
    /// Path to config file (built-in defaults apply when absent)
    #[arg(short, long)]
    config: Option<String>,

    /// Number of tickets to buy
    #[arg(short, long, default_value_t = 1)]
    quantity: u32,

    /// Funding address (defaults to the richest wallet address)
    #[arg(long, env = "VRSC_FUNDING_ADDRESS")]
    address: Option<String>,

    /// Compute and log every action without broadcasting anything
    #[arg(long)]
    dry_run: bool,

    /// Print draw state, funding addresses and owned tickets, then exit
    #[arg(long)]
    list: bool,

    /// Override the node RPC URL
    #[arg(long, env = "VRSC_RPC_URL")]
    url: Option<String>,

    /// Override the conversion slippage buffer (fraction, e.g. 0.01)
    #[arg(long)]
    buffer: Option<Decimal>,

    /// Override the offer refresh round budget
    #[arg(long)]
    max_rounds: Option<u32>,

    /// Override the confirmation threshold
    #[arg(long)]
    confirmations: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();

    // Load configuration from TOML, then apply CLI overrides
    let mut cfg = AppConfig::load(cli.config.as_deref())?;
    apply_overrides(&mut cfg, &cli);

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        quantity = cli.quantity,
        dry_run = cli.dry_run,
        currency = %cfg.lottery.currency_name,
        "vlotto-buyer starting up"
    );

    // -- Node connection --------------------------------------------------

    let credentials = RpcCredentials::discover(cli.url.as_deref().or(cfg.node.url.as_deref()))?;
    info!(url = %credentials.url, "Node credentials discovered");
    let client = VerusdClient::new(credentials).context("Failed to build the RPC client")?;
    let rpc: &dyn NodeRpc = &client;

    // -- Draw state -------------------------------------------------------

    let draw = market::read_draw_state(rpc, &cfg).await?;
    log_draw(&draw);

    // -- Funding addresses ------------------------------------------------

    let addresses = wallet::list_funding_addresses(rpc, &cfg).await?;
    for candidate in &addresses {
        // Affordability at par; the live quote decides the real cost.
        match candidate.tickets_affordable(cfg.buy.ticket_price) {
            Some(affordable) => {
                info!(address = %candidate, tickets_affordable = %affordable, "Funding candidate")
            }
            None => info!(address = %candidate, "Funding candidate"),
        }
    }

    if cli.list {
        let owned = wallet::owned_tickets(rpc, &cfg, cli.address.as_deref()).await?;
        info!(count = owned.len(), "Tickets held in this wallet");
        for ticket in &owned {
            info!(ticket = %ticket, "Owned");
        }
        return Ok(());
    }

    let address = select_address(&cli, &addresses)?;
    info!(address = %address, "Funding address selected");

    // -- Shutdown handler -------------------------------------------------

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Shutdown signal received; stopping after the current purchase");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    // -- Conversion -------------------------------------------------------

    let converter = Converter::new(rpc, &cfg, cli.dry_run);
    let funding = converter
        .ensure_ticket_balance(&address, cli.quantity)
        .await?;
    info!(funding = %funding, "Funding pass complete");

    // -- Purchases --------------------------------------------------------

    let owned: HashSet<TicketId> = wallet::owned_tickets(rpc, &cfg, None)
        .await?
        .into_iter()
        .collect();
    let mut buyer = TicketBuyer::new(
        rpc,
        &cfg,
        address.clone(),
        draw.draw_block,
        owned,
        cli.dry_run,
        Arc::clone(&cancel),
    );
    let report = buyer.run(cli.quantity).await;
    log_report(&report);

    // -- Post-run summary -------------------------------------------------

    match wallet::ticket_balance(rpc, &cfg, &address).await {
        Ok(balance) => info!(%balance, "Ticket balance after the run"),
        Err(e) => warn!(error = %e, "Could not refresh the final balance"),
    }
    match wallet::owned_tickets(rpc, &cfg, None).await {
        Ok(owned) => info!(count = owned.len(), "Tickets now held in this wallet"),
        Err(e) => warn!(error = %e, "Could not refresh owned tickets"),
    }

    std::process::exit(report.exit_code());
}

/// Apply CLI overrides onto the loaded configuration.
fn apply_overrides(cfg: &mut AppConfig, cli: &Cli) {
    if let Some(buffer) = cli.buffer {
        cfg.buy.conversion_buffer = buffer;
    }
    if let Some(max_rounds) = cli.max_rounds {
        cfg.buy.max_rounds = max_rounds;
    }
    if let Some(confirmations) = cli.confirmations {
        cfg.buy.min_confirmations = confirmations;
    }
}

/// Explicit address wins; otherwise the richest funding candidate.
fn select_address(cli: &Cli, addresses: &[FundingAddress]) -> Result<String> {
    if let Some(address) = &cli.address {
        return Ok(address.clone());
    }
    addresses
        .first()
        .map(|a| a.address.clone())
        .context("No funding address available: wallet holds no usable balance and --address was not given")
}

/// Log a human-readable view of the active draw.
fn log_draw(draw: &DrawState) {
    info!(
        draw_block = draw.draw_block,
        height = draw.current_block,
        blocks_left = draw.blocks_until_draw(),
        eta_minutes = draw.estimated_time_to_draw().num_minutes(),
        offered = draw.offered.len(),
        total = draw.total_tickets,
        matches_to_win = draw.required_matches,
        jackpot = %draw.jackpot,
        phase = %draw.phase,
        "Active draw"
    );
}

/// Log the run summary and each confirmed purchase.
fn log_report(report: &PurchaseReport) {
    let elapsed = report.finished_at - report.started_at;
    info!(
        requested = report.requested,
        purchased = report.purchased(),
        shortfall = report.shortfall(),
        elapsed_secs = elapsed.num_seconds(),
        summary = %report,
        "Purchase run finished"
    );
    for result in &report.results {
        info!(
            ticket = %result.ticket,
            txid = %result.txid,
            block = result.confirmed_at_block,
            "Purchased"
        );
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vlotto_buyer=info"));

    let json_logging = std::env::var("VLOTTO_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
