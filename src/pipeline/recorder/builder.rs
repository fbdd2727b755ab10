use std::sync::Arc;

use log::debug;

use super::coordinator::{RecorderPipeline, Shared};
use crate::config::RecorderConfig;
use crate::error::{MediaError, Result};
use crate::pipeline::params::Param;
use crate::pipeline::registry::ElementRegistry;
use crate::pipeline::stage::{
    CreateParam, ElementMessage, Notifier, PipelineElement, StageKind,
};
use crate::pipeline::state::ElementState;

/// Assembles a [`RecorderPipeline`].
///
/// The builder is the only place allowed to touch stage internals: it hands
/// out handles, installs the notifier and queues static parameters. Once
/// `build` returns, stages are reachable only through the pipeline.
pub struct RecorderPipelineBuilder<'a> {
    registry: &'a ElementRegistry,
    stages: Vec<Box<dyn PipelineElement>>,
    queued: Vec<Vec<Param>>,
    config: RecorderConfig,
    next_handle: i32,
}

impl RecorderPipelineBuilder<'static> {
    /// Builder creating stages from the global registry.
    pub fn new() -> Self {
        Self::with_registry(ElementRegistry::global())
    }
}

impl Default for RecorderPipelineBuilder<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> RecorderPipelineBuilder<'a> {
    pub fn with_registry(registry: &'a ElementRegistry) -> Self {
        Self {
            registry,
            stages: Vec::new(),
            queued: Vec::new(),
            config: RecorderConfig::default(),
            next_handle: 1,
        }
    }

    pub fn config(mut self, config: RecorderConfig) -> Self {
        self.config = config;
        self
    }

    /// Create a stage from the registry. Returns its handle.
    pub fn add(&mut self, key: &str, name: &str) -> Result<i32> {
        let element = self
            .registry
            .create_element(key, CreateParam::new(self.next_handle, name))?;
        self.push(element)
    }

    /// Add a stage built outside the registry; the builder still assigns the handle.
    pub fn add_with<F>(&mut self, name: &str, constructor: F) -> Result<i32>
    where
        F: FnOnce(CreateParam) -> Result<Box<dyn PipelineElement>>,
    {
        let element = constructor(CreateParam::new(self.next_handle, name))?;
        self.push(element)
    }

    fn push(&mut self, element: Box<dyn PipelineElement>) -> Result<i32> {
        let handle = self.next_handle;
        if element.handle() != handle {
            return Err(MediaError::invalid_parameter(format!(
                "stage '{}' ignored its handle {} (has {})",
                element.name(),
                handle,
                element.handle()
            )));
        }
        if element.state() != ElementState::Created {
            return Err(MediaError::invalid_state("assemble", element.state()));
        }
        if self.stages.iter().any(|s| s.name() == element.name()) {
            return Err(MediaError::invalid_parameter(format!(
                "duplicate stage name '{}'",
                element.name()
            )));
        }

        debug!("assembled {} stage '{}' as {}", element.kind(), element.name(), handle);
        self.stages.push(element);
        self.queued.push(Vec::new());
        self.next_handle += 1;
        Ok(handle)
    }

    /// Queue a static parameter, applied during `RecorderPipeline::prepare`.
    pub fn configure(&mut self, handle: i32, param: Param) -> Result<()> {
        let index = self
            .stages
            .iter()
            .position(|s| s.handle() == handle)
            .ok_or_else(|| MediaError::invalid_parameter(format!("no stage with handle {}", handle)))?;
        if !self.stages[index].accepts(param.kind()) {
            return Err(MediaError::invalid_parameter(format!(
                "{} does not accept {:?}",
                self.stages[index].name(),
                param.kind()
            )));
        }
        self.queued[index].push(param);
        Ok(())
    }

    pub fn build(mut self) -> Result<RecorderPipeline> {
        let sources: Vec<usize> = self
            .stages
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind() == StageKind::Source)
            .map(|(i, _)| i)
            .collect();
        if sources.len() != 1 {
            return Err(MediaError::invalid_parameter(format!(
                "a recorder needs exactly one source stage, found {}",
                sources.len()
            )));
        }

        let (shared, events) = Shared::new();
        for stage in &mut self.stages {
            let shared = Arc::clone(&shared);
            let notifier: Notifier = Arc::new(move |handle: i32, message: ElementMessage| {
                shared.on_message(handle, message)
            });
            stage.core_mut().set_notifier(notifier);
        }

        Ok(RecorderPipeline::assemble(
            self.stages,
            self.queued,
            sources[0],
            self.config,
            shared,
            events,
        ))
    }
}
