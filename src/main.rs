use anyhow::Context;
use api_client::HttpQuoteClient;
use clap::{Parser, Subcommand};
use comfy_table::Table;
use configuration::Config;
use core_types::AccountId;
use database::{connect, run_migrations, DbRepository, LedgerStore};
use engine::{AccountSession, QuoteCache};
use events::SessionEvent;
use executor::{TradeExecutor, TradeReceipt};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// The main entry point for the papertrade application.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = configuration::load_config().context("Failed to load configuration")?;
    let _log_guard = configuration::init_tracing(&config.logging)?;

    let pool = connect(
        config.store.database_url.as_deref(),
        config.store.max_connections,
        config.store.timeout(),
    )
    .await
    .context("Failed to connect to the database")?;
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let store: Arc<dyn LedgerStore> = Arc::new(DbRepository::new(pool));
    let executor = Arc::new(TradeExecutor::new(store, config.store.timeout()));
    let account = AccountId::new(cli.account)?;

    let session = build_session(&config, account.clone(), Arc::clone(&executor))?;
    match cli.command {
        Commands::Open { balance } => {
            let balance = balance.unwrap_or(config.accounts.opening_balance);
            let opened = executor.open_account(&account, balance).await?;
            println!("Opened account {} with {}", opened.id, money(opened.cash_balance));
        }
        Commands::Buy { symbol, quantity } => print_receipt(&session.buy(&symbol, quantity).await?),
        Commands::Sell { symbol, quantity } => print_receipt(&session.sell(&symbol, quantity).await?),
        Commands::Holdings => handle_holdings(&session).await?,
        Commands::Prices { symbols } => handle_prices(&session, symbols).await?,
        Commands::Summary => handle_summary(&session).await?,
        Commands::Activity => handle_activity(&session).await?,
        Commands::Watch { symbols } => handle_watch(&session, symbols).await?,
    }

    session.shutdown().await;
    Ok(())
}

fn build_session(config: &Config, account: AccountId, executor: Arc<TradeExecutor>) -> anyhow::Result<AccountSession> {
    let provider = Arc::new(HttpQuoteClient::new(&config.market_data)?);
    let cache = Arc::new(QuoteCache::from_config(provider, &config.market_data));
    Ok(AccountSession::new(
        account,
        executor,
        cache,
        config.market_data.poll_interval(),
    ))
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Paper trading against live market quotes.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The account to operate on.
    #[arg(short, long, env = "PAPERTRADE_ACCOUNT")]
    account: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a new account.
    Open {
        /// Starting cash. Defaults to `accounts.opening_balance`.
        #[arg(long)]
        balance: Option<Decimal>,
    },
    /// Buy shares at the latest quote.
    Buy { symbol: String, quantity: Decimal },
    /// Sell shares at the latest quote.
    Sell { symbol: String, quantity: Decimal },
    /// Show open positions valued at the latest quotes.
    Holdings,
    /// Fetch and show quotes for the given symbols.
    Prices {
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Show cash and realized profit and loss.
    Summary,
    /// Show cumulative bought and sold shares over time.
    Activity,
    /// Poll quotes for held and the given symbols until interrupted.
    Watch { symbols: Vec<String> },
}

// ==============================================================================
// Command Logic
// ==============================================================================

fn print_receipt(receipt: &TradeReceipt) {
    let trade = &receipt.trade;
    let mut table = Table::new();
    table.set_header(vec!["Side", "Symbol", "Quantity", "Price", "Notional", "Cash", "Position", "Avg Cost"]);
    table.add_row(vec![
        trade.side().to_string(),
        trade.symbol().to_string(),
        trade.quantity().to_string(),
        money(trade.price()),
        money(trade.notional()),
        money(receipt.account.cash_balance),
        receipt.holding.quantity.to_string(),
        money(receipt.holding.average_cost),
    ]);
    println!("{table}");
}

async fn handle_holdings(session: &AccountSession) -> anyhow::Result<()> {
    let symbols = session.watch_set().await?;
    if let Err(e) = session.refresh_quotes(&symbols).await {
        tracing::warn!(error = %e, "Showing holdings without fresh quotes.");
    }
    let valuation = session.valuation().await?;

    let mut table = Table::new();
    table.set_header(vec!["Symbol", "Quantity", "Avg Cost", "Price", "Change %", "Value", "Unrealized P/L"]);
    for position in &valuation.positions {
        table.add_row(vec![
            position.holding.symbol.clone(),
            position.holding.quantity.to_string(),
            money(position.holding.average_cost),
            optional(position.price.map(money)),
            optional(position.change_percent.map(|p| format!("{}%", p.round_dp(2)))),
            optional(position.market_value.map(money)),
            optional(position.unrealized_pnl.map(money)),
        ]);
    }
    println!("{table}");
    println!(
        "Cash {}  Positions {}  Equity {}",
        money(valuation.cash),
        money(valuation.market_value),
        money(valuation.equity)
    );
    if !valuation.unpriced.is_empty() {
        println!("No quote for: {}", valuation.unpriced.join(", "));
    }
    Ok(())
}

async fn handle_prices(session: &AccountSession, symbols: Vec<String>) -> anyhow::Result<()> {
    let requested: BTreeSet<String> = symbols
        .iter()
        .map(|s| core_types::normalize_symbol(s))
        .collect::<Result<_, _>>()?;
    let report = session.refresh_quotes(&requested).await?;
    print_prices(session, &requested).await?;
    if !report.missing.is_empty() {
        println!("No quote for: {}", report.missing.join(", "));
    }
    Ok(())
}

async fn print_prices(session: &AccountSession, symbols: &BTreeSet<String>) -> anyhow::Result<()> {
    let mut table = Table::new();
    table.set_header(vec!["Symbol", "Name", "Price", "Change", "Change %", "Prev Close", "Stale"]);
    for (symbol, cached) in session.get_display_prices(symbols).await? {
        match cached {
            Some(cached) => table.add_row(vec![
                symbol,
                cached.quote.name().unwrap_or_default().to_string(),
                money(cached.quote.price()),
                optional(cached.quote.change().map(money)),
                optional(cached.quote.change_percent().map(|p| format!("{}%", p.round_dp(2)))),
                optional(cached.quote.previous_close().map(money)),
                if cached.stale { "yes".to_string() } else { String::new() },
            ]),
            None => table.add_row(vec![symbol, String::new(), "-".to_string()]),
        };
    }
    println!("{table}");
    Ok(())
}

async fn handle_summary(session: &AccountSession) -> anyhow::Result<()> {
    let summary = session.account_summary().await?;
    let mut table = Table::new();
    table.set_header(vec!["Account", "Cash", "Realized Profit", "Realized Loss", "Net P/L"]);
    table.add_row(vec![
        summary.account.to_string(),
        money(summary.cash_balance),
        money(summary.realized_profit),
        money(summary.realized_loss),
        money(summary.net_realized),
    ]);
    println!("{table}");
    Ok(())
}

async fn handle_activity(session: &AccountSession) -> anyhow::Result<()> {
    let series = session.activity().await?;
    if series.is_empty() {
        println!("No trading activity yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Time", "Symbol", "Side", "Quantity", "Total Bought", "Total Sold"]);
    for point in series {
        table.add_row(vec![
            point.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            point.symbol,
            point.side.to_string(),
            point.quantity.to_string(),
            point.cumulative_bought.to_string(),
            point.cumulative_sold.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn handle_watch(session: &AccountSession, symbols: Vec<String>) -> anyhow::Result<()> {
    for symbol in &symbols {
        session.watch(symbol).await?;
    }
    let mut events = session.subscribe();
    session.start_polling().await?;
    println!("Polling {:?}. Press Ctrl-C to stop.", session.watch_set().await?);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::QuotesRefreshed { updated, .. }) => {
                    print_prices(session, &updated.into_iter().collect()).await?;
                }
                Ok(SessionEvent::QuoteFetchFailed { reason, .. }) => eprintln!("Refresh failed: {}", reason),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Event consumer lagged."),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

/// Amounts are only rounded for display.
fn money(value: Decimal) -> String {
    format!("{:.2}", value)
}

fn optional(value: Option<String>) -> String {
    value.unwrap_or_else(|| "-".to_string())
}
