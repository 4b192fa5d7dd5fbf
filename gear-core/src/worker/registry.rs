//! Named functions a worker can perform.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{GearError, Result};

use super::job::Job;

/// What a handler returns: the result payload, or an error that fails the
/// job and is reported to the worker's exception observer.
pub type HandlerResult = std::result::Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;

pub type Handler = Arc<dyn Fn(&mut Job) -> HandlerResult + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Registration {
    /// Seconds the server allows per job; 0 means no limit.
    pub timeout: u32,
    /// `None` for presence-only registrations.
    pub handler: Option<Handler>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("timeout", &self.timeout)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Function table plus a revision that changes on every edit, so each
/// connection can tell whether its announced abilities are current.
#[derive(Debug, Default)]
pub(crate) struct FunctionRegistry {
    entries: BTreeMap<String, Registration>,
    revision: u64,
}

impl FunctionRegistry {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Registration)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Register `name` with a handler; replaces any earlier registration.
    pub fn insert(&mut self, name: &str, timeout: u32, handler: Handler) -> Result<()> {
        validate(name)?;
        self.entries.insert(
            name.to_string(),
            Registration {
                timeout,
                handler: Some(handler),
            },
        );
        self.revision += 1;
        Ok(())
    }

    /// Announce `name` without a handler. An existing handler is kept and
    /// only its timeout changes.
    pub fn announce(&mut self, name: &str, timeout: u32) -> Result<()> {
        validate(name)?;
        self.entries
            .entry(name.to_string())
            .and_modify(|r| r.timeout = timeout)
            .or_insert(Registration {
                timeout,
                handler: None,
            });
        self.revision += 1;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.entries.remove(name).is_some();
        if removed {
            self.revision += 1;
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.revision += 1;
        }
    }
}

fn validate(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\0') {
        return Err(GearError::InvalidArgument(format!(
            "invalid function name {name:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_handler() -> Handler {
        Arc::new(|job: &mut Job| -> HandlerResult { Ok(job.workload().to_vec()) })
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = FunctionRegistry::default();
        registry.insert("reverse", 0, echo_handler()).unwrap();
        registry.insert("reverse", 30, echo_handler()).unwrap();
        assert_eq!(registry.iter().count(), 1);
        assert_eq!(registry.get("reverse").unwrap().timeout, 30);
    }

    #[test]
    fn announce_keeps_handler() {
        let mut registry = FunctionRegistry::default();
        registry.insert("reverse", 0, echo_handler()).unwrap();
        registry.announce("reverse", 5).unwrap();
        let entry = registry.get("reverse").unwrap();
        assert!(entry.handler.is_some());
        assert_eq!(entry.timeout, 5);

        registry.announce("presence", 0).unwrap();
        assert!(registry.get("presence").unwrap().handler.is_none());
    }

    #[test]
    fn revision_tracks_edits() {
        let mut registry = FunctionRegistry::default();
        let start = registry.revision();
        registry.announce("a", 0).unwrap();
        assert!(registry.revision() > start);

        let before = registry.revision();
        assert!(!registry.remove("missing"));
        assert_eq!(registry.revision(), before);
        assert!(registry.remove("a"));
        assert!(registry.revision() > before);
        assert!(registry.is_empty());

        let before = registry.revision();
        registry.clear();
        assert_eq!(registry.revision(), before);
    }

    #[test]
    fn rejects_bad_names() {
        let mut registry = FunctionRegistry::default();
        assert!(matches!(
            registry.announce("", 0),
            Err(GearError::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.announce("a\0b", 0),
            Err(GearError::InvalidArgument(_))
        ));
    }
}
