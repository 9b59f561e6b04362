// =============================================================================
// trade — quick manual execution CLI against the broker account
// =============================================================================
//
// Talks to the broker directly; does not touch the engine or its strategy
// state. Defaults to the paper account; pass --live for real funds.
//
//   trade buy AAPL --dollars 200 --tp 15 --sl 5
//   trade positions
//   trade close-all
// =============================================================================

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use pressbot::broker::alpaca::AlpacaBroker;
use pressbot::broker::Broker;

#[derive(Parser)]
#[command(name = "trade", about = "Quick trade execution CLI")]
struct Cli {
    /// Use the live account (default: paper).
    #[arg(long, global = true)]
    live: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Buy a stock at the current quote.
    Buy {
        ticker: String,
        /// Dollar amount to invest.
        #[arg(long, short, default_value_t = 100.0)]
        dollars: f64,
        /// Number of shares (overrides --dollars).
        #[arg(long, short)]
        shares: Option<u32>,
        /// Take-profit percent (informational target).
        #[arg(long, default_value_t = 10.0)]
        tp: f64,
        /// Stop-loss percent (informational target).
        #[arg(long, default_value_t = 7.0)]
        sl: f64,
    },
    /// Sell shares at the current quote.
    Sell {
        ticker: String,
        /// Shares to sell (default: whole position).
        #[arg(long, short)]
        shares: Option<u32>,
    },
    /// Show account status.
    Status,
    /// List open positions.
    Positions,
    /// List open orders.
    Orders,
    /// Show the latest trade for a ticker.
    Quote { ticker: String },
    /// Close one position.
    Close { ticker: String },
    /// Close every open position.
    CloseAll,
    /// Cancel all open orders.
    CancelAll,
}

#[tokio::main]
async fn main() {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let broker = AlpacaBroker::from_env(!cli.live).context("broker credentials missing")?;
    let mode = if cli.live { "LIVE" } else { "PAPER" };
    println!("[{mode} TRADING]\n");

    match cli.command {
        Command::Buy { ticker, dollars, shares, tp, sl } => {
            let ticker = ticker.to_uppercase();
            let quote = broker.get_quote(&ticker).await?;
            if quote.last <= 0.0 {
                bail!("no quote available for {ticker}");
            }

            let qty = match shares {
                Some(s) => s,
                None => ((dollars / quote.last).floor() as u32).max(1),
            };

            let order = broker.buy(&ticker, qty, quote.last).await?;
            println!("Order submitted!");
            println!("  Order ID: {}", order.order_id);
            println!("  Status:   {}", order.status);
            println!("  {} shares @ ${:.2} (${:.2})", qty, quote.last, qty as f64 * quote.last);
            println!(
                "  Targets: TP ${:.2} (+{tp}%) | SL ${:.2} (-{sl}%)",
                quote.last * (1.0 + tp / 100.0),
                quote.last * (1.0 - sl / 100.0),
            );
        }

        Command::Sell { ticker, shares } => {
            let ticker = ticker.to_uppercase();
            let position = broker
                .get_position(&ticker)
                .await?
                .with_context(|| format!("no open position in {ticker}"))?;
            let qty = shares.unwrap_or(position.shares).min(position.shares);
            if qty == 0 {
                bail!("nothing to sell in {ticker}");
            }

            let quote = broker.get_quote(&ticker).await?;
            let order = broker.sell(&ticker, qty, quote.last).await?;
            println!("Sell submitted: {} shares of {ticker} @ ${:.2}", qty, quote.last);
            println!("  Order ID: {}", order.order_id);
            println!("  Status:   {}", order.status);
        }

        Command::Status => {
            let account = broker.get_account().await?;
            println!("Account Status:");
            println!("  Status:       {}", account.status);
            println!("  Equity:       ${:.2}", account.equity);
            println!("  Cash:         ${:.2}", account.cash);
            println!("  Buying Power: ${:.2}", account.buying_power);
        }

        Command::Positions => {
            let positions = broker.get_positions().await?;
            if positions.is_empty() {
                println!("No open positions");
            } else {
                println!("Open Positions ({}):", positions.len());
                for p in positions {
                    let sign = if p.unrealized_pl >= 0.0 { "+" } else { "" };
                    println!("  {}: {} shares @ ${:.2}", p.ticker, p.shares, p.avg_entry_price);
                    println!(
                        "    Value: ${:.2} | P/L: {sign}${:.2} ({sign}{:.1}%)",
                        p.market_value, p.unrealized_pl, p.unrealized_pl_pct
                    );
                }
            }
        }

        Command::Orders => {
            let orders = broker.get_open_orders().await?;
            if orders.is_empty() {
                println!("No open orders");
            } else {
                println!("Open Orders ({}):", orders.len());
                for o in orders {
                    let limit = o
                        .limit_price
                        .map(|p| format!(" @ ${p:.2}"))
                        .unwrap_or_default();
                    println!(
                        "  {} {} {} x{}{} ({})",
                        o.order_id, o.side, o.ticker, o.shares, limit, o.status
                    );
                }
            }
        }

        Command::Quote { ticker } => {
            let ticker = ticker.to_uppercase();
            let quote = broker.get_quote(&ticker).await?;
            println!("{}: ${:.4} (size {}) at {}", ticker, quote.last, quote.volume, quote.timestamp);
        }

        Command::Close { ticker } => {
            let ticker = ticker.to_uppercase();
            let position = broker
                .get_position(&ticker)
                .await?
                .with_context(|| format!("no open position in {ticker}"))?;
            let quote = broker.get_quote(&ticker).await?;
            let order = broker.sell(&ticker, position.shares, quote.last).await?;
            println!(
                "Closing {}: {} shares @ ${:.2} (order {})",
                ticker, position.shares, quote.last, order.order_id
            );
        }

        Command::CloseAll => {
            let positions = broker.get_positions().await?;
            if positions.is_empty() {
                println!("No open positions");
            }
            for p in positions {
                match broker.get_quote(&p.ticker).await {
                    Ok(quote) => match broker.sell(&p.ticker, p.shares, quote.last).await {
                        Ok(order) => println!(
                            "Closing {}: {} shares @ ${:.2} (order {})",
                            p.ticker, p.shares, quote.last, order.order_id
                        ),
                        Err(e) => eprintln!("  {}: sell failed: {e}", p.ticker),
                    },
                    Err(e) => eprintln!("  {}: quote failed: {e}", p.ticker),
                }
            }
        }

        Command::CancelAll => {
            let canceled = broker.cancel_all_orders().await?;
            println!("Canceled {canceled} orders");
        }
    }

    Ok(())
}
