use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::ScraperConfig;
use crate::element_finder::{ElementFinder, LookupStrategy};
use crate::utils::error::AppError;
use crate::Result;

const TEXT_CONTENT_FN: &str = "function() { return this.textContent; }";

/// Failure reported by a browser driver call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("failed to open browser session: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("no element for {strategy} selector '{selector}': {message}")]
    Lookup {
        strategy: LookupStrategy,
        selector: String,
        message: String,
    },

    #[error("browser session error: {0}")]
    Session(String),
}

/// Reference to an element located inside a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHandle {
    pub node_id: u32,
}

/// One isolated browser session.
#[cfg_attr(test, mockall::automock)]
pub trait BrowserSession: Send {
    fn set_user_agent(&mut self, user_agent: &str) -> std::result::Result<(), DriverError>;

    fn navigate(&mut self, url: &str) -> std::result::Result<(), DriverError>;

    /// Waits at most `timeout` for an element matching `selector`.
    fn find_element(
        &mut self,
        strategy: LookupStrategy,
        selector: &str,
        timeout: Duration,
    ) -> std::result::Result<ElementHandle, DriverError>;

    /// Raw `textContent` of the element, including text hidden by styling.
    fn text_content(&mut self, element: &ElementHandle) -> std::result::Result<String, DriverError>;

    fn close(&mut self) -> std::result::Result<(), DriverError>;
}

/// Opens browser sessions.
#[cfg_attr(test, mockall::automock)]
pub trait BrowserDriver: Send + Sync {
    fn open_session(&self) -> std::result::Result<Box<dyn BrowserSession>, DriverError>;
}

/// Closes its session when dropped, whichever way the fetch ends.
pub struct ScopedSession {
    session: Box<dyn BrowserSession>,
}

impl ScopedSession {
    pub fn open(driver: &dyn BrowserDriver) -> std::result::Result<Self, DriverError> {
        Ok(Self {
            session: driver.open_session()?,
        })
    }
}

impl Deref for ScopedSession {
    type Target = dyn BrowserSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for ScopedSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if let Err(e) = self.session.close() {
            tracing::warn!("Failed to close browser session: {}", e);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FetchOutcome {
    Found {
        text: String,
        strategy: LookupStrategy,
    },
    NotFound,
}

/// Loads a page in a fresh session and reads the text of one element.
pub struct PageFetcher {
    driver: Arc<dyn BrowserDriver>,
    finder: ElementFinder,
    user_agent: String,
}

impl PageFetcher {
    pub fn new(driver: Arc<dyn BrowserDriver>, config: &ScraperConfig) -> Self {
        Self {
            driver,
            finder: ElementFinder::new(Duration::from_secs(config.element_timeout)),
            user_agent: config.user_agent.clone(),
        }
    }

    pub fn with_finder(mut self, finder: ElementFinder) -> Self {
        self.finder = finder;
        self
    }

    /// Blocking. `NotFound` is a regular outcome; session and navigation
    /// failures come back as `AppError::Fetch`.
    pub fn fetch(&self, url: &str, selector: &str) -> Result<FetchOutcome> {
        Url::parse(url).map_err(|e| AppError::Fetch(format!("invalid url '{}': {}", url, e)))?;

        let mut session = ScopedSession::open(self.driver.as_ref()).map_err(fetch_error)?;
        session.set_user_agent(&self.user_agent).map_err(fetch_error)?;
        session.navigate(url).map_err(fetch_error)?;

        let Some((element, strategy)) = self
            .finder
            .locate(&mut *session, selector)
            .map_err(fetch_error)?
        else {
            tracing::debug!("No element matched '{}' on {}", selector, url);
            return Ok(FetchOutcome::NotFound);
        };

        let text = session.text_content(&element).map_err(fetch_error)?;
        tracing::debug!("Found '{}' on {} via {}: {:?}", selector, url, strategy, text);
        Ok(FetchOutcome::Found { text, strategy })
    }
}

fn fetch_error(err: DriverError) -> AppError {
    AppError::Fetch(err.to_string())
}

/// Headless Chrome driver; every session launches its own browser process.
pub struct ChromeDriver {
    config: ScraperConfig,
}

impl ChromeDriver {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }
}

impl BrowserDriver for ChromeDriver {
    fn open_session(&self) -> std::result::Result<Box<dyn BrowserSession>, DriverError> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(self.config.headless)
            .sandbox(false) // Often needed in containerized environments
            .args(vec![
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-extensions"),
            ])
            .build()
            .map_err(|e| DriverError::Launch(format!("invalid launch options: {}", e)))?;

        if let Some(chrome_path) = &self.config.chrome_path {
            launch_options.path = Some(std::path::PathBuf::from(chrome_path));
        }

        let browser = Browser::new(launch_options).map_err(|e| DriverError::Launch(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| DriverError::Launch(format!("failed to create tab: {}", e)))?;
        tab.set_default_timeout(Duration::from_secs(self.config.navigation_timeout));

        Ok(Box::new(ChromeSession {
            browser: Some(browser),
            tab,
        }))
    }
}

struct ChromeSession {
    browser: Option<Browser>,
    tab: Arc<Tab>,
}

impl BrowserSession for ChromeSession {
    fn set_user_agent(&mut self, user_agent: &str) -> std::result::Result<(), DriverError> {
        self.tab
            .set_user_agent(user_agent, None, None)
            .map_err(|e| DriverError::Session(format!("failed to set user agent: {}", e)))
    }

    fn navigate(&mut self, url: &str) -> std::result::Result<(), DriverError> {
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map(|_| ())
            .map_err(|e| DriverError::Navigation(format!("{}: {}", url, e)))
    }

    fn find_element(
        &mut self,
        strategy: LookupStrategy,
        selector: &str,
        timeout: Duration,
    ) -> std::result::Result<ElementHandle, DriverError> {
        let found = match strategy {
            LookupStrategy::Xpath => self.tab.wait_for_xpath_with_custom_timeout(selector, timeout),
            LookupStrategy::Css => self.tab.wait_for_element_with_custom_timeout(selector, timeout),
        };

        found
            .map(|element| ElementHandle {
                node_id: element.node_id,
            })
            .map_err(|e| DriverError::Lookup {
                strategy,
                selector: selector.to_string(),
                message: e.to_string(),
            })
    }

    fn text_content(&mut self, element: &ElementHandle) -> std::result::Result<String, DriverError> {
        let element = Element::new(&self.tab, element.node_id)
            .map_err(|e| DriverError::Session(format!("element went stale: {}", e)))?;
        let object = element
            .call_js_fn(TEXT_CONTENT_FN, vec![], false)
            .map_err(|e| DriverError::Session(format!("failed to read textContent: {}", e)))?;

        Ok(match object.value {
            Some(serde_json::Value::String(text)) => text,
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        })
    }

    fn close(&mut self) -> std::result::Result<(), DriverError> {
        let closed = self
            .tab
            .close(true)
            .map(|_| ())
            .map_err(|e| DriverError::Session(format!("failed to close tab: {}", e)));
        // Dropping the browser terminates the Chrome process
        self.browser.take();
        closed
    }
}
