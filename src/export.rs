//! The export pipeline: validate, prepare, launch, capture every table, close.

use crate::async_api::{Browser, Page};
use crate::discover::{discover_tables, duplicate_ids};
use crate::layout::{image_path, prepare_output_dir, Layout};
use crate::optimize::{ExternalOptimizer, NoopOptimizer, Optimizer};
use crate::{Engine, ExportConfig, ExportDate, Result};
use log::{debug, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What a finished run produced.
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    pub output_dir: PathBuf,
    /// Written images in document order; a duplicated id appears once per table
    pub images: Vec<PathBuf>,
    /// Number of images the optimizer failed on
    pub optimizer_failures: usize,
}

/// Capture every identified table of the loaded page into `out_dir`.
///
/// Tables are handled strictly one after another: wait, capture, write,
/// print, optimize. Each written path is printed to `out` as soon as the file
/// exists. Optimizer failures are reported on `diag` regardless of the log
/// filter, and counted; every other error aborts the export, leaving already
/// written images in place.
pub async fn export_tables<W: Write, D: Write>(
    page: &Page<'_>,
    out_dir: &Path,
    optimizer: &dyn Optimizer,
    wait_timeout: Duration,
    out: &mut W,
    diag: &mut D,
) -> Result<ExportReport> {
    let ids = page.table_ids().await?;
    info!("found {} identified tables", ids.len());

    let mut report = ExportReport {
        output_dir: out_dir.to_path_buf(),
        ..Default::default()
    };
    for (index, id) in ids.iter().enumerate() {
        page.wait_visible(id, wait_timeout).await?;
        let png = page.capture_table(index).await?;

        let path = image_path(out_dir, id);
        std::fs::write(&path, &png)?;
        writeln!(out, "{}", path.display())?;
        out.flush()?;
        debug!("wrote {} ({} bytes)", path.display(), png.len());

        if let Err(e) = optimizer.optimize(&path) {
            writeln!(diag, "{}", e)?;
            report.optimizer_failures += 1;
        }
        report.images.push(path);
    }
    Ok(report)
}

/// Optimizer selected by the configuration.
pub fn optimizer_for(config: &ExportConfig) -> Box<dyn Optimizer> {
    match &config.optimizer {
        Some(program) => Box::new(ExternalOptimizer::new(program.clone())),
        None => Box::new(NoopOptimizer),
    }
}

fn warn_on_duplicates(document: &Path) {
    let html = match std::fs::read_to_string(document) {
        Ok(html) => html,
        Err(e) => {
            debug!("skipping duplicate id check: {}", e);
            return;
        }
    };
    for id in duplicate_ids(&discover_tables(&html)) {
        warn!("table id {:?} is used more than once; the last table wins", id);
    }
}

/// Run a full export for `date` with headless Chrome.
#[cfg(feature = "cdp")]
pub async fn run<W: Write, D: Write>(
    config: &ExportConfig,
    date: &ExportDate,
    out: &mut W,
    diag: &mut D,
) -> Result<ExportReport> {
    let launch_config = config.clone();
    let optimizer = optimizer_for(config);
    run_with(
        move || crate::cdp::CdpEngine::new(&launch_config),
        config,
        date,
        optimizer.as_ref(),
        out,
        diag,
    )
    .await
}

/// Run a full export for `date` on the engine built by `factory`.
///
/// The input document must exist before anything is created. The browser is
/// closed whether or not the export succeeds. Image paths go to `out`,
/// optimizer failures to `diag`.
pub async fn run_with<E, F, W, D>(
    factory: F,
    config: &ExportConfig,
    date: &ExportDate,
    optimizer: &dyn Optimizer,
    out: &mut W,
    diag: &mut D,
) -> Result<ExportReport>
where
    E: Engine + 'static,
    F: FnOnce() -> Result<E> + Send + 'static,
    W: Write,
    D: Write,
{
    let layout = Layout::new(&config.base_dir)?;
    let document = layout.require_document(date)?;
    let output_dir = layout.output_dir(date);
    prepare_output_dir(&output_dir)?;
    warn_on_duplicates(&document);

    let browser = Browser::launch_with(factory).await?;
    let result = export_document(&browser, &document, &output_dir, optimizer, config, out, diag).await;
    let closed = browser.close().await;

    match (result, closed) {
        (Ok(report), Ok(())) => {
            info!(
                "exported {} tables to {}",
                report.images.len(),
                report.output_dir.display()
            );
            Ok(report)
        }
        (Ok(report), Err(e)) => {
            warn!("failed to close browser cleanly: {}", e);
            Ok(report)
        }
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                warn!("failed to close browser after error: {}", close_err);
            }
            Err(e)
        }
    }
}

async fn export_document<W: Write, D: Write>(
    browser: &Browser,
    document: &Path,
    output_dir: &Path,
    optimizer: &dyn Optimizer,
    config: &ExportConfig,
    out: &mut W,
    diag: &mut D,
) -> Result<ExportReport> {
    let page = browser.page()?;
    page.goto_file(document).await?;
    export_tables(&page, output_dir, optimizer, config.wait_timeout(), out, diag).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// In-memory engine: each table renders to `PNG:<id>:<index>`.
    struct FakeEngine {
        tables: Vec<String>,
        hidden: HashSet<String>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Engine for FakeEngine {
        fn load_file(&mut self, path: &Path) -> Result<()> {
            assert!(path.ends_with("rendered.html"));
            self.calls.lock().unwrap().push("load".into());
            Ok(())
        }

        fn table_ids(&mut self) -> Result<Vec<String>> {
            Ok(self.tables.clone())
        }

        fn wait_visible(&mut self, id: &str, timeout: Duration) -> Result<()> {
            if self.hidden.contains(id) {
                return Err(Error::Timeout(timeout.as_millis() as u64));
            }
            self.calls.lock().unwrap().push(format!("wait {}", id));
            Ok(())
        }

        fn capture_table(&mut self, index: usize) -> Result<Vec<u8>> {
            Ok(format!("PNG:{}:{}", self.tables[index], index).into_bytes())
        }

        fn close(self) -> Result<()> {
            self.calls.lock().unwrap().push("close".into());
            Ok(())
        }
    }

    /// Fails on files whose stem is listed, records every call.
    #[derive(Default)]
    struct ScriptedOptimizer {
        fail_on: Vec<&'static str>,
        seen: Mutex<Vec<PathBuf>>,
    }

    impl Optimizer for ScriptedOptimizer {
        fn name(&self) -> &str {
            "scripted"
        }

        fn optimize(&self, path: &Path) -> Result<()> {
            self.seen.lock().unwrap().push(path.to_path_buf());
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if self.fail_on.contains(&stem) {
                return Err(Error::Optimizer(format!("{} could not be optimized", stem)));
            }
            Ok(())
        }
    }

    struct Site {
        dir: tempfile::TempDir,
        config: ExportConfig,
        date: ExportDate,
    }

    fn site(html: &str) -> Site {
        let dir = tempfile::tempdir().unwrap();
        let doc_dir = dir.path().join("data").join("20240115");
        std::fs::create_dir_all(&doc_dir).unwrap();
        std::fs::write(doc_dir.join("rendered.html"), html).unwrap();
        let config = ExportConfig {
            base_dir: dir.path().to_path_buf(),
            wait_timeout_ms: 50,
            optimizer: None,
            ..Default::default()
        };
        Site {
            dir,
            config,
            date: ExportDate::parse("20240115").unwrap(),
        }
    }

    fn fake(
        tables: &[&str],
        hidden: &[&str],
    ) -> (Arc<Mutex<Vec<String>>>, impl FnOnce() -> Result<FakeEngine> + Send + 'static) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let engine = FakeEngine {
            tables: tables.iter().map(|s| s.to_string()).collect(),
            hidden: hidden.iter().map(|s| s.to_string()).collect(),
            calls: calls.clone(),
        };
        (calls, move || Ok(engine))
    }

    fn lines(out: &[u8]) -> Vec<String> {
        String::from_utf8(out.to_vec())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn exports_tables_in_document_order() {
        let site = site("");
        let (calls, factory) = fake(&["summary", "detail"], &[]);
        let optimizer = ScriptedOptimizer::default();
        let mut out = Vec::new();

        let report = run_with(factory, &site.config, &site.date, &optimizer, &mut out, &mut Vec::new())
            .await
            .unwrap();

        let out_dir = site.dir.path().join("public/2024/01/15");
        let expected = vec![out_dir.join("summary.png"), out_dir.join("detail.png")];
        assert_eq!(report.images, expected);
        assert_eq!(report.optimizer_failures, 0);
        assert_eq!(
            lines(&out),
            expected.iter().map(|p| p.display().to_string()).collect::<Vec<_>>()
        );
        assert_eq!(std::fs::read(&expected[0]).unwrap(), b"PNG:summary:0");
        assert_eq!(std::fs::read(&expected[1]).unwrap(), b"PNG:detail:1");
        assert_eq!(*optimizer.seen.lock().unwrap(), expected);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["load", "wait summary", "wait detail", "close"]
        );
    }

    #[tokio::test]
    async fn zero_tables_still_creates_the_output_dir() {
        let site = site("<html><body></body></html>");
        let (_calls, factory) = fake(&[], &[]);
        let mut out = Vec::new();

        let report = run_with(factory, &site.config, &site.date, &NoopOptimizer, &mut out, &mut Vec::new())
            .await
            .unwrap();

        assert!(report.images.is_empty());
        assert!(out.is_empty());
        let out_dir = site.dir.path().join("public/2024/01/15");
        assert!(out_dir.is_dir());
        assert_eq!(std::fs::read_dir(out_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_document_creates_nothing_and_never_launches() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig {
            base_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let date = ExportDate::parse("20240115").unwrap();
        let factory = || -> Result<FakeEngine> { panic!("browser must not be launched") };

        let err = run_with(factory, &config, &date, &NoopOptimizer, &mut Vec::new(), &mut Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MissingInput(_)));
        assert!(err.to_string().contains("data/20240115/rendered.html"));
        assert!(!dir.path().join("public").exists());
    }

    #[tokio::test]
    async fn duplicate_ids_keep_the_later_capture() {
        let site = site(r#"<table id="rank"></table><table id="rank"></table>"#);
        let (_calls, factory) = fake(&["rank", "rank"], &[]);
        let mut out = Vec::new();

        run_with(factory, &site.config, &site.date, &NoopOptimizer, &mut out, &mut Vec::new())
            .await
            .unwrap();

        let out_dir = site.dir.path().join("public/2024/01/15");
        assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 1);
        assert_eq!(std::fs::read(out_dir.join("rank.png")).unwrap(), b"PNG:rank:1");
        assert_eq!(lines(&out).len(), 2);
    }

    #[tokio::test]
    async fn optimizer_failure_does_not_stop_the_run() {
        let site = site("");
        let (_calls, factory) = fake(&["a", "b", "c"], &[]);
        let optimizer = ScriptedOptimizer {
            fail_on: vec!["b"],
            ..Default::default()
        };
        let mut out = Vec::new();
        let mut diag = Vec::new();

        let report = run_with(factory, &site.config, &site.date, &optimizer, &mut out, &mut diag)
            .await
            .unwrap();

        assert_eq!(report.images.len(), 3);
        assert_eq!(report.optimizer_failures, 1);
        assert_eq!(optimizer.seen.lock().unwrap().len(), 3);
        // reported directly, independent of the log filter
        assert_eq!(lines(&diag), vec!["optimizer failed: b could not be optimized"]);
        assert!(lines(&out).iter().all(|l| l.ends_with(".png")));
    }

    #[tokio::test]
    async fn invisible_table_is_fatal_but_browser_is_closed() {
        let site = site("");
        let (calls, factory) = fake(&["first", "ghost", "last"], &["ghost"]);
        let mut out = Vec::new();

        let err = run_with(factory, &site.config, &site.date, &NoopOptimizer, &mut out, &mut Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(50)));
        let out_dir = site.dir.path().join("public/2024/01/15");
        assert!(out_dir.join("first.png").exists());
        assert!(!out_dir.join("last.png").exists());
        assert_eq!(lines(&out).len(), 1);
        assert_eq!(calls.lock().unwrap().last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn rerun_overwrites_instead_of_duplicating() {
        let site = site("");
        let out_dir = site.dir.path().join("public/2024/01/15");
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::write(out_dir.join("summary.png"), b"stale").unwrap();

        for _ in 0..2 {
            let (_calls, factory) = fake(&["summary"], &[]);
            run_with(factory, &site.config, &site.date, &NoopOptimizer, &mut Vec::new(), &mut Vec::new())
                .await
                .unwrap();
        }

        assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 1);
        assert_eq!(std::fs::read(out_dir.join("summary.png")).unwrap(), b"PNG:summary:0");
    }

    #[test]
    fn optimizer_follows_config() {
        let mut config = ExportConfig::default();
        assert_eq!(optimizer_for(&config).name(), "optipng");
        config.optimizer = None;
        assert_eq!(optimizer_for(&config).name(), "none");
    }
}
