use canvas_engine::{ApiError, CanvasClient, Config, Method, ParamValue, Params};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "canvas-engine")]
#[command(about = "Issue cached, paginated requests against a Canvas instance")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/canvas-engine/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Write logs to a daily-rotated file in this directory instead of stderr
  #[arg(long, global = true)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Send one logical request and print the (merged) JSON result
  Request {
    /// GET, POST, PUT or DELETE
    method: Method,
    /// API path, e.g. /api/v1/courses
    path: String,
    /// Parameter as key=value; repeat `key[]=value` to build a list
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
    #[arg(long)]
    per_page: Option<u32>,
    #[arg(long)]
    max_pages: Option<u32>,
    #[arg(long)]
    start_page: Option<u32>,
    /// Skip the cache lookup
    #[arg(long)]
    ignore_cache: bool,
    /// Do not store the result
    #[arg(long)]
    dont_cache: bool,
  },
  /// Inspect or clear the request cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
  /// Poll a progress URL until the job finishes
  Wait {
    url: String,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// List cached paths
  Paths,
  /// Remove cached paths (a trailing `*` matches by prefix)
  Uncache { paths: Vec<String> },
  /// Remove everything
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging(args.log_dir.as_deref())?;

  let config = Config::load(args.config.as_deref())?;
  let client = CanvasClient::from_config(&config)?;

  match args.command {
    Command::Request {
      method,
      path,
      params,
      per_page,
      max_pages,
      start_page,
      ignore_cache,
      dont_cache,
    } => {
      let mut request = client
        .request(method, path)
        .params(parse_params(&params)?)
        .ignore_cache(ignore_cache)
        .dont_cache(dont_cache);
      if let Some(n) = per_page {
        request = request.items_per_page(positive("--per-page", n)?);
      }
      if let Some(n) = max_pages {
        request = request.max_pages(Some(positive("--max-pages", n)?));
      }
      if let Some(n) = start_page {
        request = request.start_page(positive("--start-page", n)?);
      }

      let value = client.visit(request).await.map_err(report)?;
      println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Command::Cache { action } => match action {
      CacheAction::Paths => {
        for path in client.cached_paths().await.map_err(report)? {
          println!("{}", path);
        }
      }
      CacheAction::Uncache { paths } => client.uncache(&paths).await.map_err(report)?,
      CacheAction::Clear => client.flush_cache().await.map_err(report)?,
    },
    Command::Wait { url } => {
      let progress = client.wait_for_completion(&url).await.map_err(report)?;
      println!("{}", serde_json::to_string_pretty(&progress)?);
    }
  }

  Ok(())
}

/// Log to stderr, or to `<dir>/canvas-engine.log.<date>` when a directory is given.
fn init_logging(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("canvas_engine=info"));

  match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "canvas-engine.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(None)
    }
  }
}

fn parse_params(raw: &[String]) -> Result<Params> {
  let mut params = Params::new();
  for pair in raw {
    let (key, value) = pair
      .split_once('=')
      .ok_or_else(|| eyre!("Parameter \"{}\" must look like key=value", pair))?;
    match key.strip_suffix("[]") {
      Some(list_key) => {
        let mut items = match params.remove(list_key) {
          Some(ParamValue::List(items)) => items,
          _ => Vec::new(),
        };
        items.push(ParamValue::from(value));
        params.insert(list_key, ParamValue::List(items));
      }
      None => params.insert(key, value),
    }
  }
  Ok(params)
}

fn positive(flag: &str, value: u32) -> Result<NonZeroU32> {
  NonZeroU32::new(value).ok_or_else(|| eyre!("{} must be at least 1", flag))
}

fn report(err: ApiError) -> color_eyre::Report {
  eyre!("[{}] {}", err.code(), err)
}
