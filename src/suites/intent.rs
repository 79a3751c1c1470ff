//! What a suite's execute script appears to do to the tracked utilities.
//!
//! Classification is substring matching on the lower-cased script text.
//! It is coarse: a comment mentioning `enable` counts as an enable.

use super::descriptor::Suite;

/// Classification of one suite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Intent {
    /// Script mentions the tracked family, or runs the product with an
    /// enable/disable verb
    pub touches_tracked: bool,
    pub enables: bool,
    pub disables: bool,
}

impl Intent {
    /// Whether presence checks should demand symlinks.
    ///
    /// A script that touches the tracked set without a recognisable enable
    /// verb is checked with disable-style expectations.
    pub fn expect_symlink(&self) -> bool {
        self.enables && !self.disables
    }

    /// Touches the tracked set but matched neither verb
    pub fn is_ambiguous(&self) -> bool {
        self.touches_tracked && !self.enables && !self.disables
    }
}

/// Classifies suites against one product command and utility family
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    product: String,
    family: String,
}

impl IntentClassifier {
    pub fn new(product: &str, family: &str) -> Self {
        Self {
            product: product.to_lowercase(),
            family: family.to_lowercase(),
        }
    }

    pub fn classify(&self, suite: &Suite) -> Intent {
        self.classify_text(&suite.execute)
    }

    pub fn classify_text(&self, execute: &str) -> Intent {
        let text = execute.to_lowercase();
        let runs_product = !self.product.is_empty() && text.contains(&self.product);

        let touches_tracked = (!self.family.is_empty() && text.contains(&self.family))
            || (runs_product && (text.contains("enable") || text.contains("disable")));

        Intent {
            touches_tracked,
            enables: runs_product && text.contains(" enable"),
            disables: runs_product && text.contains(" disable"),
        }
    }
}
