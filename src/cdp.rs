//! Chrome DevTools Protocol engine (uses the `headless_chrome` crate)

use crate::discover::TABLE_SELECTOR;
use crate::{Engine, Error, ExportConfig, Result};
use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, info};
use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// True when the element has a non-empty box and is not hidden by CSS.
const IS_RENDERED_FN: &str = r#"function() {
    const r = this.getBoundingClientRect();
    const s = window.getComputedStyle(this);
    return r.width > 0 && r.height > 0 && s.display !== 'none' && s.visibility !== 'hidden';
}"#;

fn table_ids_script() -> String {
    // serde_json quoting yields a valid JS string literal
    let selector = serde_json::Value::from(TABLE_SELECTOR);
    format!(
        "JSON.stringify(Array.from(document.querySelectorAll({}), t => t.id))",
        selector
    )
}

/// Screenshot clip in document coordinates. Box models are relative to the
/// visible window; `Page.captureScreenshot` clips are relative to the page.
pub(crate) fn document_clip(
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    scroll_x: f64,
    scroll_y: f64,
) -> Page::Viewport {
    Page::Viewport {
        x: left + scroll_x,
        y: top + scroll_y,
        width,
        height,
        scale: 1.,
    }
}

/// Headless Chrome with a single tab sized to the configured viewport.
pub struct CdpEngine {
    browser: Browser,
    tab: Arc<Tab>,
}

impl CdpEngine {
    pub fn new(config: &ExportConfig) -> Result<Self> {
        let viewport = config.viewport;
        let scale_arg = OsString::from(format!(
            "--force-device-scale-factor={}",
            viewport.device_scale_factor
        ));

        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((viewport.width, viewport.height)))
            .idle_browser_timeout(config.idle_browser_timeout())
            .args(vec![scale_arg.as_os_str()])
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;

        info!(
            "launched headless browser at {}x{} @{}x",
            viewport.width, viewport.height, viewport.device_scale_factor
        );
        Ok(Self { browser, tab })
    }
}

/// `None` when the timeout is too large to represent: wait forever.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Attribute selector for an element id; ids may contain characters that
/// would be invalid after `#`.
pub(crate) fn id_selector(id: &str) -> String {
    let escaped = id.replace('\\', "\\\\").replace('"', "\\\"");
    format!("[id=\"{}\"]", escaped)
}

impl Engine for CdpEngine {
    fn load_file(&mut self, path: &Path) -> Result<()> {
        let url = url::Url::from_file_path(path)
            .map_err(|_| Error::LoadError(format!("{} is not an absolute path", path.display())))?;
        debug!("navigating to {}", url);

        self.tab
            .navigate_to(url.as_str())
            .map_err(|e| Error::LoadError(format!("Navigation failed: {}", e)))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::LoadError(format!("Wait for navigation failed: {}", e)))?;
        Ok(())
    }

    fn table_ids(&mut self) -> Result<Vec<String>> {
        let eval = self
            .tab
            .evaluate(&table_ids_script(), false)
            .map_err(|e| Error::RenderError(format!("Table query failed: {}", e)))?;

        let raw = match eval.value {
            Some(serde_json::Value::String(s)) => s,
            other => {
                return Err(Error::RenderError(format!(
                    "Unexpected table query result: {:?}",
                    other
                )))
            }
        };
        serde_json::from_str(&raw)
            .map_err(|e| Error::RenderError(format!("Malformed table id list: {}", e)))
    }

    fn wait_visible(&mut self, id: &str, timeout: Duration) -> Result<()> {
        let selector = id_selector(id);
        let deadline = deadline_after(timeout);
        loop {
            if let Ok(element) = self.tab.find_element(&selector) {
                let rendered = element
                    .call_js_fn(IS_RENDERED_FN, vec![], false)
                    .ok()
                    .and_then(|obj| obj.value)
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if rendered {
                    return Ok(());
                }
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Error::Timeout(timeout.as_millis() as u64));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn capture_table(&mut self, index: usize) -> Result<Vec<u8>> {
        let tables = self
            .tab
            .find_elements(TABLE_SELECTOR)
            .map_err(|e| Error::RenderError(format!("Table query failed: {}", e)))?;
        let table = tables
            .get(index)
            .ok_or_else(|| Error::RenderError(format!("Table #{} disappeared from the document", index)))?;

        let border = table.get_box_model()?.border;
        let metrics = self
            .tab
            .call_method(Page::GetLayoutMetrics(None))
            .map_err(|e| Error::RenderError(format!("Layout metrics failed: {}", e)))?;
        let scroll = metrics.css_layout_viewport;
        let clip = document_clip(
            border.most_left(),
            border.most_top(),
            border.width(),
            border.height(),
            f64::from(scroll.page_x),
            f64::from(scroll.page_y),
        );

        // Tables taller than the window, or below it, need the full surface
        let data = self
            .tab
            .call_method(Page::CaptureScreenshot {
                format: Some(Page::CaptureScreenshotFormatOption::Png),
                quality: None,
                clip: Some(clip),
                from_surface: Some(true),
                capture_beyond_viewport: Some(true),
                optimize_for_speed: None,
            })
            .map_err(|e| Error::RenderError(format!("Screenshot failed: {}", e)))?
            .data;

        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::RenderError(format!("Malformed screenshot data: {}", e)))
    }

    fn close(self) -> Result<()> {
        // Dropping the browser terminates the Chrome child process
        drop(self.tab);
        drop(self.browser);
        Ok(())
    }
}
