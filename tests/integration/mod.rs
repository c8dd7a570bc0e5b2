// Integration tests for Crawly
// These tests verify that all components work together correctly

pub mod executor_tests;
pub mod scheduler_tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crawly::{
    config::{AppConfig, DatabaseConfig, ScraperConfig},
    element_finder::LookupStrategy,
    scraper::{BrowserDriver, BrowserSession, DriverError, ElementHandle, PageFetcher},
    SqliteStore, TaskExecutor,
};

/// Test configuration for integration tests
pub fn get_test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.scraper = ScraperConfig {
        user_agent: "Crawly-Test/1.0".to_string(),
        element_timeout: 1,
        navigation_timeout: 1,
        chrome_path: None,
        headless: true,
        default_pattern: crawly::normalizer::DEFAULT_PRICE_PATTERN.to_string(),
    };
    config.scheduler.resync_interval_secs = 0;
    config
}

/// Creates a file-backed store in a fresh temporary directory. Keep the
/// directory alive for as long as the store is used.
pub async fn create_test_store() -> anyhow::Result<(Arc<SqliteStore>, TempDir)> {
    let dir = tempfile::tempdir()?;
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("crawly-test.db").display()),
        max_connections: 4,
        acquire_timeout: 10,
    };
    let store = SqliteStore::connect(&config).await?;
    Ok((Arc::new(store), dir))
}

/// Element text per selector, split by lookup strategy.
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    xpath: HashMap<String, String>,
    css: HashMap<String, String>,
}

impl FakePage {
    pub fn with_xpath(mut self, selector: &str, text: &str) -> Self {
        self.xpath.insert(selector.to_string(), text.to_string());
        self
    }

    pub fn with_css(mut self, selector: &str, text: &str) -> Self {
        self.css.insert(selector.to_string(), text.to_string());
        self
    }

    fn lookup(&self, strategy: LookupStrategy, selector: &str) -> Option<&String> {
        match strategy {
            LookupStrategy::Xpath => self.xpath.get(selector),
            LookupStrategy::Css => self.css.get(selector),
        }
    }
}

/// In-process stand-in for a browser: serves fixed pages and counts sessions.
#[derive(Default)]
pub struct FakeDriver {
    pages: Arc<HashMap<String, FakePage>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl FakeDriver {
    pub fn new(pages: Vec<(&str, FakePage)>) -> Self {
        Self {
            pages: Arc::new(pages.into_iter().map(|(url, page)| (url.to_string(), page)).collect()),
            ..Default::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl BrowserDriver for FakeDriver {
    fn open_session(&self) -> Result<Box<dyn BrowserSession>, DriverError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            pages: Arc::clone(&self.pages),
            current: None,
            elements: Vec::new(),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeSession {
    pages: Arc<HashMap<String, FakePage>>,
    current: Option<FakePage>,
    elements: Vec<String>,
    closed: Arc<AtomicUsize>,
}

impl BrowserSession for FakeSession {
    fn set_user_agent(&mut self, _user_agent: &str) -> Result<(), DriverError> {
        Ok(())
    }

    fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        let page = self
            .pages
            .get(url)
            .ok_or_else(|| DriverError::Navigation(format!("{}: net::ERR_NAME_NOT_RESOLVED", url)))?;
        self.current = Some(page.clone());
        Ok(())
    }

    fn find_element(
        &mut self,
        strategy: LookupStrategy,
        selector: &str,
        _timeout: Duration,
    ) -> Result<ElementHandle, DriverError> {
        let text = self
            .current
            .as_ref()
            .and_then(|page| page.lookup(strategy, selector))
            .ok_or_else(|| DriverError::Lookup {
                strategy,
                selector: selector.to_string(),
                message: "no matching node".to_string(),
            })?;
        self.elements.push(text.clone());
        Ok(ElementHandle {
            node_id: (self.elements.len() - 1) as u32,
        })
    }

    fn text_content(&mut self, element: &ElementHandle) -> Result<String, DriverError> {
        self.elements
            .get(element.node_id as usize)
            .cloned()
            .ok_or_else(|| DriverError::Session("stale element".to_string()))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Wires a real executor to the fake driver.
pub fn create_test_executor(store: Arc<SqliteStore>, driver: Arc<FakeDriver>) -> Arc<TaskExecutor> {
    let config = get_test_config();
    let fetcher = Arc::new(PageFetcher::new(driver, &config.scraper));
    Arc::new(TaskExecutor::new(store, fetcher, config.scraper.default_pattern))
}

/// Helper to wait for async operations
pub async fn wait_for_condition<F, Fut>(mut condition: F, timeout_seconds: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_seconds);

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    false
}
