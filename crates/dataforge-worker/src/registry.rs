//! Processor registry — maps task type tags to processor implementations.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::processor::Processor;

/// Registry resolving a task type tag to the processor that handles it.
///
/// Populated once at startup; lookups are by tag, so adding a task family
/// is registering one processor, no inheritance involved.
#[derive(Debug, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under every type tag it supports. A later
    /// registration for the same tag replaces the earlier one.
    pub fn register(&mut self, processor: Arc<dyn Processor>) {
        for task_type in processor.supported_types() {
            info!("Registered processor for task type '{task_type}'");
            self.processors
                .insert((*task_type).to_string(), Arc::clone(&processor));
        }
    }

    /// Look up the processor for a task type.
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(task_type).cloned()
    }

    /// Check if a processor is registered for a task type.
    pub fn supports(&self, task_type: &str) -> bool {
        self.processors.contains_key(task_type)
    }

    /// List the registered task types.
    pub fn registered_types(&self) -> Vec<String> {
        self.processors.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{ExecutionContext, ProcessorError};
    use async_trait::async_trait;
    use dataforge_entity::task::Task;
    use serde_json::Value;

    #[derive(Debug)]
    struct EchoProcessor;

    #[async_trait]
    impl crate::processor::Processor for EchoProcessor {
        fn supported_types(&self) -> &[&'static str] {
            &["echo", "echo_twice"]
        }

        fn validate_parameters(&self, _task_type: &str, _parameters: &Value) -> bool {
            true
        }

        async fn run(
            &self,
            _task: &Task,
            _ctx: &ExecutionContext,
        ) -> Result<Value, ProcessorError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_registers_all_supported_types() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(EchoProcessor));

        assert!(registry.supports("echo"));
        assert!(registry.supports("echo_twice"));
        assert!(!registry.supports("unknown"));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("unknown").is_none());
    }
}
