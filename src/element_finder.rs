use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::scraper::{BrowserSession, DriverError, ElementHandle};

/// How a selector string is interpreted when looking up an element.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LookupStrategy {
    Xpath,
    Css,
}

impl fmt::Display for LookupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupStrategy::Xpath => f.write_str("xpath"),
            LookupStrategy::Css => f.write_str("css"),
        }
    }
}

/// Ordered list of lookup strategies; the first one that finds the element wins.
#[derive(Debug, Clone)]
pub struct ElementFinder {
    strategies: Vec<LookupStrategy>,
    timeout: Duration,
}

impl ElementFinder {
    /// XPath first, then the same string as a CSS selector.
    pub fn new(timeout: Duration) -> Self {
        Self::with_strategies(vec![LookupStrategy::Xpath, LookupStrategy::Css], timeout)
    }

    pub fn with_strategies(strategies: Vec<LookupStrategy>, timeout: Duration) -> Self {
        Self { strategies, timeout }
    }

    pub fn strategies(&self) -> &[LookupStrategy] {
        &self.strategies
    }

    /// Tries every strategy in order. A lookup failure moves on to the next
    /// strategy; a broken session aborts the search.
    pub fn locate(
        &self,
        session: &mut dyn BrowserSession,
        selector: &str,
    ) -> Result<Option<(ElementHandle, LookupStrategy)>, DriverError> {
        for &strategy in &self.strategies {
            match session.find_element(strategy, selector, self.timeout) {
                Ok(element) => return Ok(Some((element, strategy))),
                Err(DriverError::Lookup { message, .. }) => {
                    tracing::debug!("Lookup of '{}' as {} failed: {}", selector, strategy, message);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}
