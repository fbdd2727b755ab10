//! Keyed factory for pipeline stages
//!
//! The global registry is process-scoped and append-only: it is filled with
//! the built-in stages on first access, never shrinks and is never torn down.
//! Independent registries can be created with [`ElementRegistry::new`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use once_cell::sync::Lazy;

use super::recorder;
use super::stage::{CreateParam, PipelineElement};
use crate::error::{MediaError, Result};

/// Builds one stage from its creation parameters.
pub type Constructor = Arc<dyn Fn(CreateParam) -> Result<Box<dyn PipelineElement>> + Send + Sync>;

pub struct ElementRegistry {
    entries: Mutex<HashMap<String, Constructor>>,
}

static GLOBAL: Lazy<ElementRegistry> = Lazy::new(|| {
    let registry = ElementRegistry::new();
    recorder::register_builtin(&registry);
    registry
});

impl ElementRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide registry holding the built-in stages.
    pub fn global() -> &'static ElementRegistry {
        &GLOBAL
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Constructor>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a constructor under `key`. The first registration of a key wins;
    /// later ones fail and leave the entry untouched.
    pub fn register_element<F>(&self, key: &str, constructor: F) -> Result<()>
    where
        F: Fn(CreateParam) -> Result<Box<dyn PipelineElement>> + Send + Sync + 'static,
    {
        if key.is_empty() {
            return Err(MediaError::invalid_parameter("empty element key"));
        }

        let mut entries = self.entries();
        if entries.contains_key(key) {
            warn!("element '{}' already registered", key);
            return Err(MediaError::invalid_parameter(format!(
                "element '{}' already registered",
                key
            )));
        }
        entries.insert(key.to_string(), Arc::new(constructor));
        debug!("registered element '{}'", key);
        Ok(())
    }

    /// Instantiate the stage registered under `key`.
    pub fn create_element(&self, key: &str, param: CreateParam) -> Result<Box<dyn PipelineElement>> {
        // constructors run outside the lock
        let constructor = self
            .entries()
            .get(key)
            .cloned()
            .ok_or_else(|| MediaError::unavailable(format!("no element registered as '{}'", key)))?;
        constructor(param)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for ElementRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::recorder::FrameSink;
    use crate::pipeline::stage::StageKind;

    fn sink_ctor(param: CreateParam) -> Result<Box<dyn PipelineElement>> {
        Ok(Box::new(FrameSink::new(param)))
    }

    #[test]
    fn test_register_and_create() {
        let registry = ElementRegistry::new();
        assert!(registry.is_empty());
        registry.register_element("sink", sink_ctor).unwrap();

        let element = registry
            .create_element("sink", CreateParam::new(3, "out"))
            .unwrap();
        assert_eq!(element.handle(), 3);
        assert_eq!(element.name(), "out");
        assert_eq!(element.kind(), StageKind::Sink);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let registry = ElementRegistry::new();
        registry.register_element("sink", sink_ctor).unwrap();
        assert_eq!(registry.len(), 1);

        let res = registry.register_element("sink", |_| {
            Err(MediaError::unavailable("second constructor"))
        });
        assert!(res.is_err());
        assert_eq!(registry.len(), 1);

        // the first constructor is still in place
        assert!(registry.create_element("sink", CreateParam::new(1, "s")).is_ok());
    }

    #[test]
    fn test_unknown_key() {
        let registry = ElementRegistry::new();
        assert!(matches!(
            registry.create_element("nope", CreateParam::new(1, "x")),
            Err(MediaError::ResourceUnavailable(_))
        ));
    }

    #[test]
    fn test_global_has_builtins() {
        let registry = ElementRegistry::global();
        for key in ["capture_source", "video_encoder", "audio_encoder", "muxer", "frame_sink"] {
            assert!(registry.contains(key), "missing {}", key);
        }
        let before = registry.len();
        assert!(registry.register_element("muxer", sink_ctor).is_err());
        assert_eq!(registry.len(), before);
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(ElementRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.register_element(&format!("k{}", i % 4), sink_ctor).is_ok()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 4);
        assert_eq!(registry.len(), 4);
    }
}
