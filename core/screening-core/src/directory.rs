//! Directory classification: "is this originator known?"
//!
//! Classifiers never raise. Any failure to reach the directory comes back as
//! [`ClassificationResult::LookupFailed`] and the router applies its failure
//! policy. Lookups hold no mutable state and may run concurrently.

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::DirectoryError;
use crate::types::{CallIdentifier, ClassificationResult};

pub trait DirectoryClassifier: Send + Sync {
    fn classify(&self, id: &CallIdentifier) -> ClassificationResult;

    /// Contact name for display; never used for admission decisions.
    fn display_name(&self, _id: &CallIdentifier) -> Option<String> {
        None
    }
}

impl<T: DirectoryClassifier + ?Sized> DirectoryClassifier for Arc<T> {
    fn classify(&self, id: &CallIdentifier) -> ClassificationResult {
        (**self).classify(id)
    }

    fn display_name(&self, id: &CallIdentifier) -> Option<String> {
        (**self).display_name(id)
    }
}

/// How a caller's number is compared against directory entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberMatch {
    /// Raw string equality.
    #[default]
    Exact,
    /// Compare digits only, keeping a leading `+`.
    DigitsOnly,
}

impl NumberMatch {
    pub fn key(&self, number: &str) -> String {
        match self {
            NumberMatch::Exact => number.to_string(),
            NumberMatch::DigitsOnly => {
                let trimmed = number.trim();
                let mut key = String::with_capacity(trimmed.len());
                if trimmed.starts_with('+') {
                    key.push('+');
                }
                key.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
                key
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactEntry {
    #[serde(default)]
    pub name: Option<String>,
    pub number: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Contacts file
// ═══════════════════════════════════════════════════════════════════════════════

/// Contacts directory backed by a JSON file, re-read on every lookup.
#[derive(Debug, Clone)]
pub struct ContactsDirectory {
    path: PathBuf,
    number_match: NumberMatch,
}

impl ContactsDirectory {
    pub fn new(path: impl Into<PathBuf>, number_match: NumberMatch) -> Self {
        Self {
            path: path.into(),
            number_match,
        }
    }

    pub fn lookup(&self, id: &CallIdentifier) -> Result<Option<ContactEntry>, DirectoryError> {
        let wanted = self.number_match.key(id.as_str());
        let contacts = self.load()?;
        Ok(contacts
            .into_iter()
            .find(|entry| self.number_match.key(&entry.number) == wanted))
    }

    fn load(&self) -> Result<Vec<ContactEntry>, DirectoryError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => {
                return Err(match err.kind() {
                    ErrorKind::NotFound => DirectoryError::Unavailable(self.path.clone()),
                    ErrorKind::PermissionDenied => {
                        DirectoryError::PermissionDenied(self.path.clone())
                    }
                    _ => DirectoryError::Io {
                        path: self.path.clone(),
                        source: err,
                    },
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|err| DirectoryError::Malformed {
            path: self.path.clone(),
            details: err.to_string(),
        })
    }
}

impl DirectoryClassifier for ContactsDirectory {
    fn classify(&self, id: &CallIdentifier) -> ClassificationResult {
        match self.lookup(id) {
            Ok(Some(_)) => ClassificationResult::Known,
            Ok(None) => ClassificationResult::Unknown,
            Err(err) => {
                tracing::warn!(error = %err, call_id = %id, "Contacts lookup failed");
                ClassificationResult::LookupFailed
            }
        }
    }

    fn display_name(&self, id: &CallIdentifier) -> Option<String> {
        match self.lookup(id) {
            Ok(entry) => entry.and_then(|entry| entry.name),
            Err(err) => {
                tracing::debug!(error = %err, call_id = %id, "Contact name lookup failed");
                None
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory directory
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    known: HashSet<String>,
    unavailable: bool,
}

impl StaticDirectory {
    pub fn new<I, S>(known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: known.into_iter().map(Into::into).collect(),
            unavailable: false,
        }
    }

    /// A directory that fails every lookup.
    pub fn unavailable() -> Self {
        Self {
            known: HashSet::new(),
            unavailable: true,
        }
    }
}

impl DirectoryClassifier for StaticDirectory {
    fn classify(&self, id: &CallIdentifier) -> ClassificationResult {
        if self.unavailable {
            ClassificationResult::LookupFailed
        } else if self.known.contains(id.as_str()) {
            ClassificationResult::Known
        } else {
            ClassificationResult::Unknown
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Bounded lookups
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs the inner lookup on a worker thread and gives up after `timeout`.
///
/// A lookup that overruns keeps running on its worker until it finishes; its
/// answer is dropped. At most one worker exists at a time: while an overrun
/// worker is still running, new lookups fail immediately with
/// [`DirectoryError::Busy`].
pub struct TimedClassifier<C> {
    inner: Arc<C>,
    timeout: Duration,
    in_flight: Arc<AtomicBool>,
}

// Clears the in-flight flag when the worker finishes, even on panic.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<C> TimedClassifier<C>
where
    C: DirectoryClassifier + 'static,
{
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    fn run<T, F>(&self, id: &CallIdentifier, lookup: F) -> Result<T, DirectoryError>
    where
        T: Send + 'static,
        F: FnOnce(&C, &CallIdentifier) -> T + Send + 'static,
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DirectoryError::Busy);
        }

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let id = id.clone();
        let spawned = thread::Builder::new()
            .name("directory-lookup".to_string())
            .spawn(move || {
                let _guard = guard;
                let _ = tx.send(lookup(inner.as_ref(), &id));
            });
        if spawned.is_err() {
            self.in_flight.store(false, Ordering::Release);
            return Err(DirectoryError::WorkerLost);
        }

        rx.recv_timeout(self.timeout).map_err(|err| match err {
            mpsc::RecvTimeoutError::Timeout => {
                DirectoryError::Timeout(self.timeout.as_millis() as u64)
            }
            mpsc::RecvTimeoutError::Disconnected => DirectoryError::WorkerLost,
        })
    }
}

impl<C> DirectoryClassifier for TimedClassifier<C>
where
    C: DirectoryClassifier + 'static,
{
    fn classify(&self, id: &CallIdentifier) -> ClassificationResult {
        match self.run(id, |inner, id| inner.classify(id)) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, call_id = %id, "Directory lookup did not complete");
                ClassificationResult::LookupFailed
            }
        }
    }

    fn display_name(&self, id: &CallIdentifier) -> Option<String> {
        self.run(id, |inner, id| inner.display_name(id))
            .ok()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn id(value: &str) -> CallIdentifier {
        CallIdentifier::parse(Some(value)).expect("id")
    }

    fn write_contacts(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("contacts.json");
        std::fs::write(&path, body).expect("write contacts");
        path
    }

    struct SlowDirectory(Duration);

    impl DirectoryClassifier for SlowDirectory {
        fn classify(&self, _id: &CallIdentifier) -> ClassificationResult {
            thread::sleep(self.0);
            ClassificationResult::Known
        }
    }

    #[test]
    fn contacts_file_classifies_known_and_unknown() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = write_contacts(
            temp.path(),
            r#"[{"name": "Mom", "number": "+1555000111"}, {"number": "+1555000222"}]"#,
        );
        let directory = ContactsDirectory::new(path, NumberMatch::Exact);

        assert_eq!(
            directory.classify(&id("+1555000111")),
            ClassificationResult::Known
        );
        assert_eq!(
            directory.classify(&id("+1234567890")),
            ClassificationResult::Unknown
        );
        assert_eq!(
            directory.display_name(&id("+1555000111")),
            Some("Mom".to_string())
        );
        assert_eq!(directory.display_name(&id("+1555000222")), None);
    }

    #[test]
    fn exact_match_does_not_normalize() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = write_contacts(temp.path(), r#"[{"number": "+1 555 000 111"}]"#);
        let exact = ContactsDirectory::new(path.clone(), NumberMatch::Exact);
        let digits = ContactsDirectory::new(path, NumberMatch::DigitsOnly);

        assert_eq!(
            exact.classify(&id("+1555000111")),
            ClassificationResult::Unknown
        );
        assert_eq!(
            digits.classify(&id("+1555000111")),
            ClassificationResult::Known
        );
        assert_eq!(
            digits.classify(&id("1555000111")),
            ClassificationResult::Unknown
        );
    }

    #[test]
    fn missing_or_malformed_file_is_lookup_failed() {
        let temp = tempfile::tempdir().expect("temp dir");
        let missing = ContactsDirectory::new(temp.path().join("nope.json"), NumberMatch::Exact);
        assert_eq!(
            missing.classify(&id("+1999888777")),
            ClassificationResult::LookupFailed
        );
        assert!(matches!(
            missing.lookup(&id("+1999888777")),
            Err(DirectoryError::Unavailable(_))
        ));

        let path = write_contacts(temp.path(), "{not json");
        let malformed = ContactsDirectory::new(path, NumberMatch::Exact);
        assert_eq!(
            malformed.classify(&id("+1999888777")),
            ClassificationResult::LookupFailed
        );
    }

    #[test]
    fn empty_file_means_no_contacts() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = write_contacts(temp.path(), "  \n");
        let directory = ContactsDirectory::new(path, NumberMatch::Exact);
        assert_eq!(
            directory.classify(&id("+1")),
            ClassificationResult::Unknown
        );
    }

    #[test]
    fn digits_only_key_keeps_leading_plus() {
        assert_eq!(NumberMatch::DigitsOnly.key(" +1 (555) 000-111 "), "+1555000111");
        assert_eq!(NumberMatch::DigitsOnly.key("555.000.111"), "555000111");
        assert_eq!(NumberMatch::Exact.key(" +1 "), " +1 ");
    }

    #[test]
    fn timed_classifier_times_out_to_lookup_failed() {
        let classifier =
            TimedClassifier::new(SlowDirectory(Duration::from_millis(500)), Duration::from_millis(20));
        assert_eq!(
            classifier.classify(&id("+1999888777")),
            ClassificationResult::LookupFailed
        );
    }

    struct GatedDirectory {
        calls: AtomicUsize,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl DirectoryClassifier for GatedDirectory {
        fn classify(&self, _id: &CallIdentifier) -> ClassificationResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(gate) = self.gate.lock() {
                let _ = gate.recv();
            }
            ClassificationResult::Known
        }
    }

    #[test]
    fn stalled_directory_runs_one_worker_at_a_time() {
        let (release, gate) = mpsc::channel::<()>();
        let directory = GatedDirectory {
            calls: AtomicUsize::new(0),
            gate: Mutex::new(gate),
        };
        let classifier = TimedClassifier::new(directory, Duration::from_millis(5));

        for _ in 0..20 {
            assert_eq!(
                classifier.classify(&id("+1999888777")),
                ClassificationResult::LookupFailed
            );
        }
        assert_eq!(classifier.inner.calls.load(Ordering::SeqCst), 1);

        drop(release);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut result = ClassificationResult::LookupFailed;
        while std::time::Instant::now() < deadline {
            result = classifier.classify(&id("+1999888777"));
            if result == ClassificationResult::Known {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(result, ClassificationResult::Known);
    }

    #[test]
    fn timed_classifier_passes_through_fast_answers() {
        let classifier = TimedClassifier::new(
            StaticDirectory::new(["+1555000111"]),
            Duration::from_millis(500),
        );
        assert_eq!(
            classifier.classify(&id("+1555000111")),
            ClassificationResult::Known
        );
        assert_eq!(
            classifier.classify(&id("+1234567890")),
            ClassificationResult::Unknown
        );
    }
}
