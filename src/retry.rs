//! Per-OID retry accounting.
//!
//! `Record` and `CanRetry` happen together as one atomic decision: a
//! failure increments the ledger's count for its OID and then compares
//! the *new* count against the cap, so the count always reflects total
//! attempts made (including the one that just failed). With the default
//! cap of one, the first failure raises the count to 1 (1 <= 1, retry
//! allowed) and a second failure raises it to 2 (2 <= 1 is false,
//! terminal). See DESIGN.md for why this reading was chosen over the
//! alternative (checking the count before incrementing).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::collaborators::ErrorClassifier;
use crate::error::QueueError;

pub struct RetryLedger {
    counts: Mutex<HashMap<String, u32>>,
    max_retries: u32,
    classifier: Arc<dyn ErrorClassifier>,
}

impl RetryLedger {
    pub fn new(max_retries: u32, classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            max_retries,
            classifier,
        }
    }

    /// Increment the counter for `oid` and return the new count.
    pub fn record(&self, oid: &str) -> u32 {
        let mut counts = self.counts.lock();
        let count = counts.entry(oid.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Record this attempt and decide whether it may be retried: the new
    /// count must be within the cap and the error must classify as
    /// retriable.
    pub fn can_retry(&self, oid: &str, err: &QueueError) -> bool {
        let count = self.record(oid);
        count <= self.max_retries && self.classifier.is_retriable(err)
    }

    pub fn count(&self, oid: &str) -> u32 {
        *self.counts.lock().get(oid).unwrap_or(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct AlwaysRetriable;
    impl ErrorClassifier for AlwaysRetriable {
        fn is_retriable(&self, _err: &QueueError) -> bool {
            true
        }
        fn is_not_implemented(&self, _err: &QueueError) -> bool {
            false
        }
    }

    struct NeverRetriable;
    impl ErrorClassifier for NeverRetriable {
        fn is_retriable(&self, _err: &QueueError) -> bool {
            false
        }
        fn is_not_implemented(&self, _err: &QueueError) -> bool {
            false
        }
    }

    fn err() -> QueueError {
        QueueError::Terminal {
            oid: "b".into(),
            message: "boom".into(),
        }
    }

    #[test]
    fn allows_one_retry_with_default_cap() {
        let ledger = RetryLedger::new(1, Arc::new(AlwaysRetriable));
        assert!(ledger.can_retry("b", &err()));
        assert_eq!(ledger.count("b"), 1);
    }

    #[test]
    fn denies_retry_once_cap_is_exceeded() {
        let ledger = RetryLedger::new(1, Arc::new(AlwaysRetriable));
        assert!(ledger.can_retry("b", &err()));
        assert!(!ledger.can_retry("b", &err()));
        assert_eq!(ledger.count("b"), 2);
    }

    #[test]
    fn non_retriable_error_is_never_retried() {
        let ledger = RetryLedger::new(5, Arc::new(NeverRetriable));
        assert!(!ledger.can_retry("b", &err()));
    }

    #[test]
    fn counters_are_independent_per_oid() {
        let ledger = RetryLedger::new(1, Arc::new(AlwaysRetriable));
        ledger.can_retry("a", &err());
        assert_eq!(ledger.count("a"), 1);
        assert_eq!(ledger.count("b"), 0);
    }

    proptest! {
        /// Every `can_retry` call increments the ledger's count for that OID
        /// by exactly one, regardless of the cap or the classifier's verdict,
        /// so after `n` calls the count is always exactly `n`.
        #[test]
        fn exactly_once_accounting(cap in 0u32..5, calls in 1usize..20, retriable in prop::bool::ANY) {
            let classifier: Arc<dyn ErrorClassifier> = if retriable {
                Arc::new(AlwaysRetriable)
            } else {
                Arc::new(NeverRetriable)
            };
            let ledger = RetryLedger::new(cap, classifier);
            for i in 0..calls {
                ledger.can_retry("oid", &err());
                prop_assert_eq!(ledger.count("oid"), (i + 1) as u32);
            }
        }

        /// Retries are allowed exactly while the running count is within the
        /// cap and the error classifies as retriable; once the count exceeds
        /// the cap, every later call is denied even though counting keeps
        /// advancing.
        #[test]
        fn retry_cap_is_respected(cap in 0u32..5, calls in 1usize..20) {
            let ledger = RetryLedger::new(cap, Arc::new(AlwaysRetriable));
            for i in 0..calls {
                let allowed = ledger.can_retry("oid", &err());
                prop_assert_eq!(allowed, (i + 1) as u32 <= cap);
            }
        }

        /// A non-retriable classification always denies, no matter how far
        /// under the cap the count sits.
        #[test]
        fn non_retriable_always_denied(cap in 0u32..10, calls in 1usize..10) {
            let ledger = RetryLedger::new(cap, Arc::new(NeverRetriable));
            for _ in 0..calls {
                prop_assert!(!ledger.can_retry("oid", &err()));
            }
        }
    }
}
