//! ChainMetrics CLI: poll contract methods and export them as metrics.
//!
//! # Commands
//! ```
//! chainmetrics run      --config <file> --rpc-url <url> [--once] [--sqlite <path>]
//! chainmetrics validate --config <file>
//! chainmetrics selector --signature <sig>
//! chainmetrics decode   --returns <type> --data <hex> [--decimals N]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use chainmetrics_core::abi::{decode_output, selector};
use chainmetrics_core::{
    DecodedValue, ExporterConfig, MetricSink, OutputShape, Poller, ScaleFactor, ScaleResolver, SinkDispatcher,
    TokenList, TokenListEntry, TokenListError, TokenListLoader, Value,
};
use chainmetrics_rpc::{HttpClientConfig, HttpNodeClient, HttpTokenListLoader};
use chainmetrics_storage::SqliteSink;

mod sink;
mod telemetry;

use sink::StdoutSink;
use telemetry::{init_tracing, LogConfig};

#[derive(Parser)]
#[command(
    name = "chainmetrics",
    about = "Export EVM contract reads as time-series metrics",
    long_about = "
ChainMetrics CLI: call read-only contract methods on a schedule, scale the
results to exact decimals and write them to a metric sink.

ENVIRONMENT VARIABLES:
  CHAINMETRICS_RPC_URL       JSON-RPC endpoint for `run`
  CHAINMETRICS_SQLITE_PATH   SQLite file for `run` (default: print to stdout)
",
    version
)]
struct Cli {
    /// Global log level (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the configured contracts and export metrics
    Run {
        /// Exporter config (.json, .yaml or .yml)
        #[arg(short, long)]
        config: PathBuf,
        /// JSON-RPC endpoint URL
        #[arg(long, env = "CHAINMETRICS_RPC_URL")]
        rpc_url: String,
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
        /// Write metrics to this SQLite file instead of stdout
        #[arg(long, env = "CHAINMETRICS_SQLITE_PATH")]
        sqlite: Option<String>,
    },

    /// Validate a config and print the series it exports
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print the 4-byte selector of a function signature
    Selector {
        /// e.g. `balanceOf(address)`
        #[arg(long)]
        signature: String,
    },

    /// Decode raw return data offline
    Decode {
        /// Return type, e.g. `uint256` or `(uint112,uint112,uint32)`
        #[arg(long)]
        returns: String,
        /// Return data (0x-prefixed hex)
        #[arg(long)]
        data: String,
        /// Scale integers by 10^-decimals
        #[arg(long)]
        decimals: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log = |config_level: Option<&str>, config_json: bool| {
        let level = cli
            .log_level
            .as_deref()
            .or(config_level)
            .unwrap_or("info")
            .to_string();
        LogConfig::default()
            .with_level(level)
            .with_json(cli.json_logs || config_json)
    };

    match &cli.command {
        Commands::Run {
            config,
            rpc_url,
            once,
            sqlite,
        } => {
            let cfg = ExporterConfig::from_path(config)
                .with_context(|| format!("loading {}", config.display()))?;
            init_tracing(&log(cfg.log.level.as_deref(), cfg.log.json));
            cmd_run(cfg, rpc_url, *once, sqlite.as_deref()).await
        }
        Commands::Validate { config } => {
            init_tracing(&log(Some("warn"), false));
            cmd_validate(config)
        }
        Commands::Selector { signature } => {
            println!("0x{}", hex::encode(selector(signature)));
            Ok(())
        }
        Commands::Decode {
            returns,
            data,
            decimals,
        } => cmd_decode(returns, data, *decimals),
    }
}

async fn cmd_run(cfg: ExporterConfig, rpc_url: &str, once: bool, sqlite: Option<&str>) -> Result<()> {
    let plan = cfg.build().context("invalid configuration")?;
    for line in plan.summary() {
        info!(series = %line, "exporting");
    }

    let node = Arc::new(
        HttpNodeClient::new(
            rpc_url,
            HttpClientConfig {
                request_timeout: plan.processor.call_timeout,
                ..HttpClientConfig::default()
            },
        )
        .context("creating node client")?,
    );

    let (stop_tx, stop_rx) = watch::channel(false);

    let tokens = Arc::new(TokenList::new(plan.chain_id, plan.tokens.clone()));
    if let Some((url, every)) = &plan.token_list {
        let loader = Arc::new(SeededLoader {
            inner: HttpTokenListLoader::new(url.clone(), Duration::from_secs(30))?,
            seed: plan.tokens.clone(),
        });
        match tokens.refresh(loader.as_ref()).await {
            Ok(n) => info!(url = %url, tokens = n, "token list loaded"),
            Err(e) => warn!(url = %url, error = %e, "token list unavailable, using static tokens"),
        }
        if !once {
            tokens.clone().spawn_refresh(loader, *every, stop_rx.clone());
        }
    }

    let sink: Arc<dyn MetricSink> = match sqlite {
        Some(path) => Arc::new(
            SqliteSink::open(path)
                .await
                .with_context(|| format!("opening {path}"))?,
        ),
        None => Arc::new(StdoutSink),
    };

    let poller = Poller::from_plan(&plan, node, ScaleResolver::new(tokens), SinkDispatcher::new(sink));

    if once {
        let (report, write) = poller.run_once().await;
        let outcome = write.await.context("write task panicked")?;
        info!(
            metrics = report.metrics,
            failed_methods = report.failures.len(),
            skipped = report.skips.len(),
            written = outcome.written(),
            "single cycle complete"
        );
        if let Some(failure) = outcome.failure {
            bail!("{failure}");
        }
        return Ok(());
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = stop_tx.send(true);
        }
    });
    poller.run(stop_rx).await;
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let cfg = ExporterConfig::from_path(path).with_context(|| format!("loading {}", path.display()))?;
    let plan = cfg.build().context("invalid configuration")?;
    println!(
        "{}: network {} (chain {}), every {:?}",
        path.display(),
        plan.network,
        plan.chain_id,
        plan.interval
    );
    for line in plan.summary() {
        println!("  {line}");
    }
    Ok(())
}

fn cmd_decode(returns: &str, data: &str, decimals: Option<u32>) -> Result<()> {
    let shape = OutputShape::parse(returns)?;
    let bytes = hex::decode(data.trim_start_matches("0x")).context("--data is not valid hex")?;
    let decoded = decode_output(&shape, &bytes)?;

    let render = |v: &Value| match (v, decimals) {
        (Value::Int(i), Some(d)) => ScaleFactor::new(d).apply_bigint(&i.to_bigint()).to_string(),
        (Value::Int(i), None) => i.to_bigint().to_string(),
        (Value::Bool(b), _) => b.to_string(),
    };
    match decoded {
        DecodedValue::Scalar(v) => println!("{}", render(&v)),
        DecodedValue::Tuple(values) => {
            for (i, v) in values.iter().enumerate() {
                println!("[{i}] {}", render(v));
            }
        }
        DecodedValue::Array(values) => {
            println!("length {}", values.len());
            for (i, v) in values.iter().enumerate() {
                println!("[{i}] {}", render(v));
            }
        }
    }
    Ok(())
}

/// Fetched list with the config's static tokens layered on top.
struct SeededLoader {
    inner: HttpTokenListLoader,
    seed: Vec<TokenListEntry>,
}

#[async_trait]
impl TokenListLoader for SeededLoader {
    async fn load(&self) -> Result<Vec<TokenListEntry>, TokenListError> {
        let mut entries = self.inner.load().await?;
        entries.extend(self.seed.iter().cloned());
        Ok(entries)
    }
}
