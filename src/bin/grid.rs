//! Grid Take-Profit Accumulator binary entrypoint (spec §6). Loads venue
//! credentials from the environment, connects a `WireExchange`, and runs a
//! `GridController` until a stop-price guard trips or the process is
//! interrupted.

use clap::Parser;
use perpgrid_engine::config::{env_flag, env_or, Credentials};
use perpgrid_engine::exchange::types::{ExchangeConfig, Offset, Side};
use perpgrid_engine::exchange::venue::{VenueEndpoints, WireExchange};
use perpgrid_engine::exchange::ExchangeClient;
use perpgrid_engine::notify::{CompositeNotifier, LogNotifier, Notifier, WebhookNotifier};
use perpgrid_engine::ratelimit::RateLimiter;
use perpgrid_engine::strategy::grid::GridController;
use perpgrid_engine::tradelog::TradeLogWriter;
use std::sync::Arc;
use std::time::Duration;

/// Requests per second budgeted to a single grid bot's venue connection.
/// The spec's per-operation-class token buckets are simplified here to one
/// shared budget per venue (documented in the design notes).
const GRID_VENUE_RPS: usize = 5;

/// Grid take-profit accumulator: rests entry orders on a fixed grid and
/// closes each fill through a take-profit ladder.
#[derive(Parser, Debug)]
#[command(name = "perpgrid-grid")]
struct Args {
    /// Ticker to trade, e.g. BTC.
    #[arg(long)]
    ticker: String,

    /// Order size in base units.
    #[arg(long)]
    quantity: f64,

    /// Take-profit distance in ticks. Overrides --take-profit-pct when both are set.
    #[arg(long)]
    take_profit_ticks: Option<i64>,

    /// Take-profit distance as a fraction of entry price (e.g. 0.01 for 1%).
    #[arg(long, default_value_t = 0.005)]
    take_profit_pct: f64,

    /// Grid spacing in ticks. Overrides --grid-step-pct when both are set.
    #[arg(long)]
    grid_step_ticks: Option<i64>,

    #[arg(long, default_value_t = 0.002)]
    grid_step_pct: f64,

    #[arg(long, value_enum, default_value_t = CliSide::Buy)]
    direction: CliSide,

    #[arg(long, default_value_t = 3)]
    max_orders: usize,

    #[arg(long, default_value_t = 2000)]
    wait_time_ms: u64,

    /// Sentinel -1.0 disables the guard.
    #[arg(long, default_value_t = -1.0)]
    stop_price: f64,

    /// Sentinel -1.0 disables the guard.
    #[arg(long, default_value_t = -1.0)]
    pause_price: f64,

    /// Skip the take-profit ladder and close fills immediately with a
    /// reduce-only market order. Falls back to $PERPGRID_BOOST_MODE when
    /// the flag itself is absent.
    #[arg(long)]
    boost: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CliSide {
    Buy,
    Sell,
}

impl From<CliSide> for Side {
    fn from(s: CliSide) -> Side {
        match s {
            CliSide::Buy => Side::Buy,
            CliSide::Sell => Side::Sell,
        }
    }
}

fn take_profit_offset(args: &Args) -> Offset {
    match args.take_profit_ticks {
        Some(ticks) => Offset::Ticks(ticks),
        None => Offset::Percent(args.take_profit_pct),
    }
}

fn grid_step_offset(args: &Args) -> Offset {
    match args.grid_step_ticks {
        Some(ticks) => Offset::Ticks(ticks),
        None => Offset::Percent(args.grid_step_pct),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    perpgrid_engine::logging::init();
    let args = Args::parse();

    let credentials = Credentials::from_env("HL");
    let endpoints = VenueEndpoints {
        base_url: env_or("HL_BASE_URL", "https://api.hyperliquid.xyz"),
        info_path: "/info".to_string(),
        exchange_path: "/exchange".to_string(),
    };

    let limiter = Arc::new(RateLimiter::new(GRID_VENUE_RPS, Duration::from_secs(1)));
    let mut exchange = WireExchange::new("hyperliquid", endpoints, credentials.account_address, credentials.private_key, limiter);
    exchange.connect().await?;
    let (contract_id, tick_size) = exchange.fetch_contract_attributes(&args.ticker).await?;
    let book = exchange.book_handle();

    let config = ExchangeConfig {
        ticker: args.ticker.clone(),
        contract_id,
        tick_size,
        quantity: args.quantity,
        take_profit: take_profit_offset(&args),
        grid_step: grid_step_offset(&args),
        direction: args.direction.into(),
        max_orders: args.max_orders,
        wait_time: args.wait_time_ms,
        stop_price: args.stop_price,
        pause_price: args.pause_price,
        boost_mode: args.boost || env_flag("PERPGRID_BOOST_MODE", false),
    };

    let tradelog = TradeLogWriter::new(env_or("PERPGRID_LOG_DIR", "data"));
    let notifier: Arc<dyn Notifier> = match std::env::var("PERPGRID_WEBHOOK_URL") {
        Ok(url) => Arc::new(CompositeNotifier::new(vec![Box::new(LogNotifier), Box::new(WebhookNotifier::new(url))])),
        Err(_) => Arc::new(LogNotifier),
    };

    let mut controller = GridController::new(Box::new(exchange), config, tradelog, notifier);
    log::info!("[GRID] starting {} direction={:?}", args.ticker, args.direction);

    let result = controller
        .run(|| {
            let book = book.clone();
            async move {
                let book = book.lock().await;
                match (book.best_bid(), book.best_ask()) {
                    (Some(bid), Some(ask)) => Ok((bid, ask)),
                    _ => Err(perpgrid_engine::errors::EngineError::SequenceGap),
                }
            }
        })
        .await;

    if let Err(e) = result {
        log::error!("[GRID] stopped: {e}");
        return Err(e.into());
    }
    Ok(())
}
