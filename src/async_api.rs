use crate::{Engine, Error, Result};
use log::warn;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;

enum Command {
    Goto(PathBuf, oneshot::Sender<Result<()>>),
    TableIds(oneshot::Sender<Result<Vec<String>>>),
    WaitVisible(String, Duration, oneshot::Sender<Result<()>>),
    Capture(usize, oneshot::Sender<Result<Vec<u8>>>),
    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly browser backed by a dedicated worker thread.
///
/// The worker thread owns a synchronous [`Engine`] and executes commands sent
/// from async tasks, so callers get suspension points without the engine
/// having to be `Send`. Commands are answered one at a time.
///
/// The engine is released exactly once: by [`Browser::close`], or, if the
/// browser is dropped without closing, when the worker sees its command
/// channel hang up and drops the engine.
pub struct Browser {
    cmd_tx: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

/// A handle to the browser's page. Borrows the browser so it cannot keep the
/// worker alive after the browser is gone.
pub struct Page<'a> {
    cmd_tx: &'a Sender<Command>,
}

impl Browser {
    /// Launch headless Chrome with the given configuration.
    #[cfg(feature = "cdp")]
    pub async fn launch(config: &crate::ExportConfig) -> Result<Self> {
        let config = config.clone();
        Self::launch_with(move || crate::cdp::CdpEngine::new(&config)).await
    }

    /// Spawn a worker thread that builds its engine with `factory` and then
    /// serves commands until closed.
    pub async fn launch_with<E, F>(factory: F) -> Result<Self>
    where
        E: Engine + 'static,
        F: FnOnce() -> Result<E> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        let worker = thread::spawn(move || {
            let mut engine = match factory() {
                Ok(e) => e,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };
            let _ = init_tx.send(Ok(()));

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::Goto(path, resp) => {
                        let _ = resp.send(engine.load_file(&path));
                    }
                    Command::TableIds(resp) => {
                        let _ = resp.send(engine.table_ids());
                    }
                    Command::WaitVisible(id, timeout, resp) => {
                        let _ = resp.send(engine.wait_visible(&id, timeout));
                    }
                    Command::Capture(index, resp) => {
                        let _ = resp.send(engine.capture_table(index));
                    }
                    Command::Close(resp) => {
                        let _ = resp.send(engine.close());
                        return;
                    }
                }
            }
            // Channel closed without an explicit close
            if let Err(e) = engine.close() {
                warn!("failed to close browser: {}", e);
            }
        });

        let init_res = init_rx
            .await
            .map_err(|e| Error::Other(format!("Worker init canceled: {}", e)))?;
        if let Err(err) = init_res {
            let _ = worker.join();
            return Err(err);
        }

        Ok(Self {
            cmd_tx: Some(cmd_tx),
            worker: Some(worker),
        })
    }

    /// Page handle backed by the same worker thread.
    pub fn page(&self) -> Result<Page<'_>> {
        self.cmd_tx
            .as_ref()
            .map(|cmd_tx| Page { cmd_tx })
            .ok_or_else(|| Error::Other("browser already closed".into()))
    }

    /// Close the browser and wait for the worker to exit.
    pub async fn close(mut self) -> Result<()> {
        let Some(cmd_tx) = self.cmd_tx.take() else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        let res = match cmd_tx.send(Command::Close(tx)) {
            Ok(()) => rx
                .await
                .map_err(|e| Error::Other(format!("Close canceled: {}", e)))
                .and_then(|r| r),
            Err(_) => Err(Error::Other("browser worker has already exited".into())),
        };
        drop(cmd_tx);
        if let Some(worker) = self.worker.take() {
            // Chrome shutdown can take a while; keep it off the runtime thread
            let _ = tokio::task::spawn_blocking(move || worker.join()).await;
        }
        res
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        // Hanging up the channel makes the worker close its engine. Drop
        // cannot await, so this joins on the current thread; `close` is the
        // non-blocking path.
        self.cmd_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Page<'_> {
    async fn request<T>(
        &self,
        what: &str,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .map_err(|_| Error::Other(format!("{}: browser worker has exited", what)))?;
        rx.await
            .map_err(|e| Error::Other(format!("{} canceled: {}", what, e)))?
    }

    /// Load a local file and wait for navigation to finish
    pub async fn goto_file(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        self.request("Goto", |tx| Command::Goto(path, tx)).await
    }

    /// Ids of every `table[id]` in document order
    pub async fn table_ids(&self) -> Result<Vec<String>> {
        self.request("TableIds", Command::TableIds).await
    }

    /// Wait until an element with `id` is rendered
    pub async fn wait_visible(&self, id: &str, timeout: Duration) -> Result<()> {
        let id = id.to_string();
        self.request("WaitVisible", |tx| Command::WaitVisible(id, timeout, tx))
            .await
    }

    /// Screenshot of the `index`-th identified table as PNG bytes
    pub async fn capture_table(&self, index: usize) -> Result<Vec<u8>> {
        self.request("Capture", |tx| Command::Capture(index, tx)).await
    }
}
