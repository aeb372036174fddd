use super::{EvaluationError, MergeRequirement, PayloadHandler, PayloadType, TwentyFourHourRule};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Requirement id {id} registered twice ({name})")]
    DuplicateId { id: Uuid, name: String },
    #[error("No requirement registered with id {0}")]
    UnknownRequirement(Uuid),
    #[error("Failed to initialize requirement '{name}': {source}")]
    Initialization {
        name: String,
        #[source]
        source: EvaluationError,
    },
}

/// Explicit registration list of merge requirements
#[derive(Default)]
pub struct ModuleRegistryBuilder {
    modules: Vec<Arc<dyn MergeRequirement>>,
}

impl ModuleRegistryBuilder {
    pub fn register<R>(self, requirement: R) -> Self
    where
        R: MergeRequirement + 'static,
    {
        self.register_shared(Arc::new(requirement))
    }

    pub fn register_shared(mut self, requirement: Arc<dyn MergeRequirement>) -> Self {
        self.modules.push(requirement);
        self
    }

    /// Every requirement shipped with the crate
    pub fn with_builtin(self) -> Self {
        self.register(TwentyFourHourRule::new())
    }

    pub fn build(self) -> Result<ModuleRegistry, RegistryError> {
        let mut seen = Vec::with_capacity(self.modules.len());
        for module in &self.modules {
            let id = module.id();
            if seen.contains(&id) {
                return Err(RegistryError::DuplicateId {
                    id,
                    name: module.name(),
                });
            }
            seen.push(id);
        }

        debug!(count = self.modules.len(), "Module registry built");
        Ok(ModuleRegistry {
            modules: self.modules,
        })
    }
}

/// The set of merge requirements known to this process, in registration order
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn MergeRequirement>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.modules.iter().map(|m| m.name()))
            .finish()
    }
}

impl ModuleRegistry {
    pub fn builder() -> ModuleRegistryBuilder {
        ModuleRegistryBuilder::default()
    }

    pub fn modules(&self) -> &[Arc<dyn MergeRequirement>] {
        &self.modules
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Arc<dyn MergeRequirement>> {
        self.modules.iter().filter(|m| m.enabled())
    }

    pub fn find(&self, id: Uuid) -> Option<&Arc<dyn MergeRequirement>> {
        self.modules.iter().find(|m| m.id() == id)
    }

    pub fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<(), RegistryError> {
        let module = self.find(id).ok_or(RegistryError::UnknownRequirement(id))?;
        module.set_enabled(enabled);
        info!(requirement = %module.name(), enabled, "Requirement toggled");
        Ok(())
    }

    /// Disable each listed requirement; unknown ids are an error
    pub fn disable_all(&self, ids: &[Uuid]) -> Result<(), RegistryError> {
        ids.iter().try_for_each(|id| self.set_enabled(*id, false))
    }

    /// Payload handlers of every enabled requirement for `payload_type`
    pub fn handlers_for(&self, payload_type: &PayloadType) -> Vec<Arc<dyn PayloadHandler>> {
        self.enabled()
            .flat_map(|m| m.payload_handlers(payload_type))
            .collect()
    }

    /// Run each requirement's startup hook once, in registration order
    pub async fn initialize_all(&self, cancel: &CancellationToken) -> Result<(), RegistryError> {
        for module in &self.modules {
            module
                .initialize(cancel)
                .await
                .map_err(|source| RegistryError::Initialization {
                    name: module.name(),
                    source,
                })?;
        }
        info!(count = self.modules.len(), "Merge requirements initialized");
        Ok(())
    }
}

/// Process-wide registry
static REGISTRY: std::sync::LazyLock<ModuleRegistry> = std::sync::LazyLock::new(|| ModuleRegistry {
    modules: ModuleRegistryBuilder::default().with_builtin().modules,
});

/// Get the process-wide registry; every call returns the same instances
pub fn registry() -> &'static ModuleRegistry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirements::{AutoMergeStatus, MockMergeRequirement};
    use async_trait::async_trait;

    struct NoopHandler {
        payload_type: PayloadType,
    }

    #[async_trait]
    impl PayloadHandler for NoopHandler {
        fn payload_type(&self) -> &PayloadType {
            &self.payload_type
        }

        async fn handle(
            &self,
            _payload: &serde_json::Value,
            _cancel: &CancellationToken,
        ) -> Result<(), EvaluationError> {
            Ok(())
        }
    }

    fn with_id(id: Uuid) -> MockMergeRequirement {
        let mut requirement = MockMergeRequirement::new();
        requirement.expect_id().return_const(id);
        requirement
            .expect_name()
            .returning(move || format!("requirement-{id}"));
        requirement
    }

    #[test]
    fn test_global_registry_is_a_singleton() {
        let first = registry();
        let second = registry();

        assert!(std::ptr::eq(first, second));
        assert_eq!(first.modules().len(), second.modules().len());
        for (a, b) in first.modules().iter().zip(second.modules()) {
            assert!(Arc::ptr_eq(a, b));
        }
        assert!(first.find(TwentyFourHourRule::ID).is_some());
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let id = Uuid::new_v4();
        let result = ModuleRegistry::builder()
            .register(with_id(id))
            .register(with_id(id))
            .build();

        assert!(matches!(result, Err(RegistryError::DuplicateId { id: dup, .. }) if dup == id));
    }

    #[test]
    fn test_registration_order_is_stable() {
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let registry = ids
            .iter()
            .fold(ModuleRegistry::builder(), |b, id| b.register(with_id(*id)))
            .build()
            .unwrap();

        let listed: Vec<Uuid> = registry.modules().iter().map(|m| m.id()).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_disable_builtin_requirement() {
        let registry = ModuleRegistry::builder().with_builtin().build().unwrap();
        assert_eq!(registry.enabled().count(), 1);

        registry.disable_all(&[TwentyFourHourRule::ID]).unwrap();
        assert_eq!(registry.enabled().count(), 0);

        let unknown = Uuid::new_v4();
        assert!(matches!(
            registry.set_enabled(unknown, true),
            Err(RegistryError::UnknownRequirement(id)) if id == unknown
        ));
    }

    #[test]
    fn test_handlers_for_collects_from_enabled_requirements() {
        let review = PayloadType::new("pull_request_review");
        let mut with_handler = with_id(Uuid::new_v4());
        with_handler.expect_enabled().return_const(true);
        with_handler
            .expect_payload_handlers()
            .returning(|payload_type| {
                if payload_type.as_str() == "pull_request_review" {
                    vec![Arc::new(NoopHandler {
                        payload_type: payload_type.clone(),
                    }) as Arc<dyn PayloadHandler>]
                } else {
                    Vec::new()
                }
            });

        let registry = ModuleRegistry::builder()
            .register(with_handler)
            .with_builtin()
            .build()
            .unwrap();

        let handlers = registry.handlers_for(&review);
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].payload_type(), &review);
        assert!(registry.handlers_for(&PayloadType::new("issue_comment")).is_empty());
    }

    #[tokio::test]
    async fn test_initialize_failure_names_requirement() {
        let mut failing = with_id(Uuid::new_v4());
        failing
            .expect_initialize()
            .returning(|_| Err(EvaluationError::Failed("missing token".to_string())));
        failing
            .expect_evaluate()
            .never()
            .returning(|_, _| Ok(AutoMergeStatus::ready(1, 1)));

        let registry = ModuleRegistry::builder().register(failing).build().unwrap();
        let err = registry
            .initialize_all(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("missing token"));
    }
}
