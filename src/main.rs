use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tradeloop::config::{ConfigError, RunConfig};
use tradeloop::data::handler::csv::{self, CsvDataHandler};
use tradeloop::data::handler::DataHandler;
use tradeloop::data::{parse_closing_time, SharedHistory};
use tradeloop::engine::error::EngineError;
use tradeloop::engine::factory::{assemble_engine, Selection};
use tradeloop::event::EventQueue;
use tradeloop::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "tradeloop",
    version,
    about = "Event-driven backtesting & paper-trading engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a backtest with the selected strategy, sizer, slippage & risk components
    Run(RunArgs),
    /// Show where the outputs of the last run live
    Dashboard(DashboardArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Directory containing {TICKER}_{interval}.csv files
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = DataSource::Csv)]
    data_source: DataSource,

    /// Named `position_sizer` entry from the configuration
    #[arg(long, default_value = "atr")]
    position_calc: String,

    /// Named `slippage` entry from the configuration
    #[arg(long, default_value = "multi_factor")]
    slippage: String,

    /// Named `strategies` entry from the configuration
    #[arg(long, default_value = "buy_and_hold_simple")]
    strategy: String,

    /// Named `risk_manager` entry from the configuration
    #[arg(long, default_value = "simple")]
    risk_manager: String,

    /// Continue after recoverable failures (1) instead of aborting (0)
    #[arg(long, default_value_t = 0)]
    exception_contd: u8,

    #[arg(long, default_value = "config.yaml")]
    config_path: PathBuf,

    #[arg(long, default_value = "equity_curve.csv")]
    output_path: PathBuf,

    /// Day-first start date overriding the configuration
    #[arg(long)]
    start_date: Option<String>,

    /// Day-first end date overriding the configuration
    #[arg(long)]
    end_date: Option<String>,

    #[arg(long)]
    initial_capital: Option<f64>,

    /// Comma-separated tickers overriding the selected strategy's symbol list
    #[arg(long, value_delimiter = ',')]
    ticker_list: Option<Vec<String>>,

    #[arg(long)]
    benchmark: Option<String>,

    /// Close all open positions at the latest close once the data is exhausted
    #[arg(long)]
    liquidate: bool,
}

#[derive(Copy, Clone, ValueEnum)]
enum DataSource {
    /// Historical CSV files
    Csv,
    /// Vendor batch download
    Yf,
    /// Live websocket feed
    Live,
}

#[derive(Args)]
struct DashboardArgs {
    #[arg(long, default_value = "equity_curve.csv")]
    output_path: PathBuf,
}

fn main() -> ExitCode {
    logging::init_logging();

    match Cli::parse().command {
        Command::Run(args) => match run(args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(error = %err, "run failed");
                ExitCode::FAILURE
            }
        },
        Command::Dashboard(args) => dashboard(args),
    }
}

fn run(args: RunArgs) -> Result<(), EngineError> {
    let mut config = RunConfig::from_path(&args.config_path)?;
    apply_overrides(&mut config, &args);

    let selection = Selection {
        strategy: args.strategy.clone(),
        position_sizer: args.position_calc.clone(),
        slippage: args.slippage.clone(),
        risk_manager: args.risk_manager.clone(),
    };

    let events = EventQueue::new();
    let history = SharedHistory::new();
    let data = build_data_handler(&config, &selection, &args, events.clone(), history.clone())?;

    let mut engine = assemble_engine(
        &config,
        &selection,
        data,
        events,
        history,
        args.exception_contd != 0,
        args.liquidate,
    )?;

    let curve = engine.run()?;
    curve.write_csv_path(&args.output_path)?;
    info!(output = %args.output_path.display(), "backtest complete");
    Ok(())
}

fn apply_overrides(config: &mut RunConfig, args: &RunArgs) {
    let settings = &mut config.backtester_settings;
    if let Some(start_date) = &args.start_date {
        settings.start_date = start_date.clone();
    }
    if let Some(end_date) = &args.end_date {
        settings.end_date = end_date.clone();
    }
    if let Some(initial_capital) = args.initial_capital {
        settings.initial_capital = initial_capital;
    }
    if let Some(benchmark) = &args.benchmark {
        settings.benchmark = Some(benchmark.clone());
    }
    if let Some(tickers) = &args.ticker_list {
        if let Some(strategy) = config.strategies.get_mut(&args.strategy) {
            strategy.rounding_list = (0..tickers.len())
                .map(|idx| strategy.rounding_list.get(idx).copied().unwrap_or(0))
                .collect();
            strategy.symbol_list = tickers.clone();
        }
    }
}

fn build_data_handler(
    config: &RunConfig,
    selection: &Selection,
    args: &RunArgs,
    events: EventQueue,
    history: SharedHistory,
) -> Result<Box<dyn DataHandler + Send>, EngineError> {
    let settings = &config.backtester_settings;
    let strategy_spec =
        config
            .strategies
            .get(&selection.strategy)
            .ok_or_else(|| ConfigError::MissingEntry {
                section: "strategies",
                name: selection.strategy.clone(),
            })?;

    // The benchmark is ingested alongside the traded tickers, for comparison only
    let mut symbol_list = strategy_spec.symbol_list.clone();
    if let Some(benchmark) = &settings.benchmark {
        if !symbol_list.contains(benchmark) {
            symbol_list.push(benchmark.clone());
        }
    }

    match args.data_source {
        DataSource::Csv => {
            let handler = CsvDataHandler::new(
                csv::Config {
                    data_dir: args.data_dir.clone(),
                    symbol_list,
                    start_date: settings.start()?,
                    end_date: settings.end()?,
                    base_interval: settings.base_interval,
                    exchange_closing_time: parse_closing_time(&settings.exchange_closing_time)
                        .map_err(EngineError::Data)?,
                },
                events,
                history,
            )?;
            Ok(Box::new(handler))
        }
        DataSource::Yf => Err(ConfigError::Invalid(
            "the yf data source needs a vendor fetcher: wire one through \
             data::handler::batch::BatchFetcher in library usage"
                .to_owned(),
        )
        .into()),
        DataSource::Live => Err(ConfigError::Invalid(
            "the live data source needs a tick feed: wire one through \
             data::handler::live::TickSource in library usage"
                .to_owned(),
        )
        .into()),
    }
}

fn dashboard(args: DashboardArgs) -> ExitCode {
    if args.output_path.exists() {
        info!(
            output = %args.output_path.display(),
            "equity curve ready; point your dashboard or tear-sheet tooling at it"
        );
        ExitCode::SUCCESS
    } else {
        error!(
            output = %args.output_path.display(),
            "no equity curve found; run a backtest first"
        );
        ExitCode::FAILURE
    }
}
