//! Deployment identifier extraction from CLI output

use once_cell::sync::Lazy;
use regex::Regex;

/// Longest partial line kept between chunks
const MAX_PENDING: usize = 8 * 1024;

static DEPLOY_ID_REGEX: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"Deploy ID:\s*([a-zA-Z0-9]{15,18})\b").ok());

/// First deployment id in `text`, if any
pub fn extract_deploy_id(text: &str) -> Option<String> {
    DEPLOY_ID_REGEX
        .as_ref()?
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether `id` has the shape of a deployment id
pub fn is_deploy_id(id: &str) -> bool {
    (15..=18).contains(&id.len()) && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Incremental scanner over a process's stdout.
///
/// Only complete lines are matched, so an id split across two chunks is
/// still found. Reports at most one id over its lifetime.
#[derive(Debug, Default)]
pub struct DeployIdScanner {
    pending: String,
    found: Option<String>,
}

impl DeployIdScanner {
    /// Create a scanner
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the id the first time one is seen
    pub fn feed(&mut self, chunk: &str) -> Option<String> {
        if self.found.is_some() {
            return None;
        }

        self.pending.push_str(chunk);
        let Some(end) = self.pending.rfind('\n') else {
            if self.pending.len() > MAX_PENDING {
                self.pending.clear();
            }
            return None;
        };

        let complete: String = self.pending.drain(..=end).collect();
        self.record(extract_deploy_id(&complete))
    }

    /// Scan whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.found.is_some() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        self.record(extract_deploy_id(&rest))
    }

    /// The id found so far
    pub fn found(&self) -> Option<&str> {
        self.found.as_deref()
    }

    fn record(&mut self, id: Option<String>) -> Option<String> {
        if id.is_some() {
            self.pending.clear();
            self.found = id.clone();
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Deploy ID: 0Af5g00000ABCDE", Some("0Af5g00000ABCDE"))]
    #[case("Deploy ID: 0Af5g00000ABCDEFGH\n", Some("0Af5g00000ABCDEFGH"))]
    #[case("Status: Queued | Deploy ID:   0Af5g00000XYZ12", Some("0Af5g00000XYZ12"))]
    #[case("Deploy ID: 0Af5g00000ABC", None)]
    #[case("Deploy ID: 0Af5g00000ABCDEFGHIJK", None)]
    #[case("Job ID: 0Af5g00000ABCDEFGH", None)]
    fn test_extract(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(extract_deploy_id(text).as_deref(), expected);
    }

    #[test]
    fn test_is_deploy_id() {
        assert!(is_deploy_id("0Af5g00000ABCDEFGH"));
        assert!(!is_deploy_id("0Af5g00000"));
        assert!(!is_deploy_id("0Af5g00000ABC-EF"));
    }

    #[test]
    fn test_scanner_reports_once() {
        let mut scanner = DeployIdScanner::new();

        assert_eq!(scanner.feed("Deploying v58.0 metadata...\n"), None);
        assert_eq!(
            scanner.feed("Deploy ID: 0Af5g00000ABCDEFGH\n").as_deref(),
            Some("0Af5g00000ABCDEFGH")
        );
        assert_eq!(scanner.feed("Deploy ID: 0Af5g00000ZZZZZZZZ\n"), None);
        assert_eq!(scanner.found(), Some("0Af5g00000ABCDEFGH"));
    }

    #[test]
    fn test_scanner_joins_split_chunks() {
        let mut scanner = DeployIdScanner::new();

        assert_eq!(scanner.feed("Deploy ID: 0Af5g000"), None);
        assert_eq!(
            scanner.feed("00ABCDEFGH\nStatus: InProgress\n").as_deref(),
            Some("0Af5g00000ABCDEFGH")
        );
    }

    #[test]
    fn test_scanner_finish_checks_unterminated_tail() {
        let mut scanner = DeployIdScanner::new();

        assert_eq!(scanner.feed("Deploy ID: 0Af5g00000ABCDEFGH"), None);
        assert_eq!(scanner.finish().as_deref(), Some("0Af5g00000ABCDEFGH"));
        assert_eq!(scanner.finish(), None);
    }
}
