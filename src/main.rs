use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tableshot::discover::discover_tables;
use tableshot::{ExportConfig, ExportDate, Layout, Viewport};

/// Export every `<table id=...>` of a rendered page as a high-resolution PNG.
///
/// Reads `<base>/data/<DATE>/rendered.html` and writes
/// `<base>/public/<YYYY>/<MM>/<DD>/<id>.png`, printing each written path.
#[derive(Parser, Debug)]
#[command(name = "tableshot", version)]
struct Cli {
    /// Date of the rendered page, as YYYYMMDD
    #[arg(value_parser = parse_date)]
    date: ExportDate,

    /// Directory containing `data/` and `public/`
    #[arg(long, env = "TABLESHOT_BASE_DIR", default_value = ".")]
    base_dir: PathBuf,

    /// Lossless PNG optimizer to run on each image
    #[arg(long, default_value = tableshot::optimize::DEFAULT_OPTIMIZER)]
    optimizer: String,

    /// Skip PNG optimization
    #[arg(long)]
    no_optimize: bool,

    /// How long to wait for each table to become visible
    #[arg(long, default_value_t = 30_000)]
    wait_timeout_ms: u64,

    /// Print the ids of the tables that would be exported, without a browser
    #[arg(long)]
    list: bool,
}

fn parse_date(s: &str) -> Result<ExportDate, String> {
    ExportDate::parse(s).map_err(|_| "expected a date as YYYYMMDD".to_string())
}

impl Cli {
    fn config(&self) -> ExportConfig {
        ExportConfig {
            base_dir: self.base_dir.clone(),
            viewport: Viewport::default(),
            wait_timeout_ms: self.wait_timeout_ms,
            optimizer: (!self.no_optimize).then(|| self.optimizer.clone()),
            ..Default::default()
        }
    }
}

fn list_tables(config: &ExportConfig, date: &ExportDate) -> tableshot::Result<()> {
    let layout = Layout::new(&config.base_dir)?;
    let document = layout.require_document(date)?;
    let html = std::fs::read_to_string(&document)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for id in discover_tables(&html) {
        writeln!(out, "{}", id)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and succeed; usage errors fail with 1
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = cli.config();
    let result = if cli.list {
        list_tables(&config, &cli.date)
    } else {
        tableshot::run(&config, &cli.date, &mut io::stdout(), &mut io::stderr())
            .await
            .map(|_| ())
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
