//! Safe-content classification.

use std::collections::HashSet;

use tracing::debug;

use crate::executor::Reply;
use crate::path::naming::url_host;

/// Evaluates URLs and content hashes.
pub trait SafetyClassifier: Send + Sync {
    /// Reply true if any URL of the redirect chain is known to be malicious.
    fn check_url(&self, url_chain: &[String], referrer: &str, reply: Reply<bool>);

    /// Reply true if the content hash is known to be malicious.
    fn check_hash(&self, hash: &str, reply: Reply<bool>);
}

/// Classifier that considers everything safe.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughClassifier;

impl SafetyClassifier for PassThroughClassifier {
    fn check_url(&self, _url_chain: &[String], _referrer: &str, reply: Reply<bool>) {
        reply.send(false);
    }

    fn check_hash(&self, _hash: &str, reply: Reply<bool>) {
        reply.send(false);
    }
}

/// Classifier backed by static block lists.
///
/// A blocked host also blocks its subdomains. Hashes are compared as
/// lower-case hex.
#[derive(Debug, Default, Clone)]
pub struct ListClassifier {
    blocked_hosts: Vec<String>,
    blocked_hashes: HashSet<String>,
}

impl ListClassifier {
    pub fn new<H, S>(blocked_hosts: H, blocked_hashes: S) -> Self
    where
        H: IntoIterator<Item = String>,
        S: IntoIterator<Item = String>,
    {
        Self {
            blocked_hosts: blocked_hosts
                .into_iter()
                .map(|h| h.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            blocked_hashes: blocked_hashes
                .into_iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    fn is_blocked_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.blocked_hosts.iter().any(|blocked| {
            host == *blocked
                || host
                    .strip_suffix(blocked.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

impl SafetyClassifier for ListClassifier {
    fn check_url(&self, url_chain: &[String], _referrer: &str, reply: Reply<bool>) {
        let hit = url_chain
            .iter()
            .find(|url| url_host(url).is_some_and(|host| self.is_blocked_host(host)));
        if let Some(url) = hit {
            debug!(url = %url, "URL matched block list");
        }
        reply.send(hit.is_some());
    }

    fn check_hash(&self, hash: &str, reply: Reply<bool>) {
        reply.send(self.blocked_hashes.contains(&hash.to_ascii_lowercase()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Mailbox, ManagerEvent};
    use crate::item::DownloadId;

    fn check(classifier: &dyn SafetyClassifier, chain: &[&str]) -> bool {
        let (mailbox, mut rx) = Mailbox::new();
        let chain: Vec<String> = chain.iter().map(|s| s.to_string()).collect();
        classifier.check_url(
            &chain,
            "",
            mailbox.reply(|is_dangerous| ManagerEvent::UrlChecked {
                id: DownloadId(1),
                is_dangerous,
            }),
        );
        match rx.try_recv().unwrap() {
            ManagerEvent::UrlChecked { is_dangerous, .. } => is_dangerous,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_pass_through_is_always_safe() {
        assert!(!check(&PassThroughClassifier, &["https://evil.test/x.exe"]));
    }

    #[test]
    fn test_blocked_host_and_subdomains() {
        let classifier = ListClassifier::new(vec!["Evil.test".to_string()], Vec::new());
        assert!(check(&classifier, &["https://evil.test/x.exe"]));
        assert!(check(&classifier, &["https://cdn.evil.test/x.exe"]));
        assert!(!check(&classifier, &["https://notevil.test/x.exe"]));
    }

    #[test]
    fn test_any_redirect_hop_counts() {
        let classifier = ListClassifier::new(vec!["evil.test".to_string()], Vec::new());
        assert!(check(&classifier, &["https://evil.test/r", "https://good.test/f.zip"]));
    }

    #[test]
    fn test_blocked_hash_case_insensitive() {
        let classifier = ListClassifier::new(Vec::new(), vec!["ABCDEF".to_string()]);
        let (mailbox, mut rx) = Mailbox::new();
        classifier.check_hash(
            "abcdef",
            mailbox.reply(|is_dangerous| ManagerEvent::HashChecked {
                id: DownloadId(1),
                is_dangerous,
            }),
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            ManagerEvent::HashChecked { is_dangerous: true, .. }
        ));
    }
}
