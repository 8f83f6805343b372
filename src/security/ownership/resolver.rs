// security/ownership/resolver.rs - Per-resource-type ownership resolution

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::policy::{OwnershipStrategy, ResourceType};
use crate::auth::Principal;
use crate::domain::{LookupError, ResourceLookup};

#[async_trait]
pub trait OwnershipResolver: Send + Sync {
    /// Whether `principal` owns the resource addressed by `resource_id`.
    /// A missing resource resolves to `false`.
    async fn is_owner(
        &self,
        strategy: OwnershipStrategy,
        resource_id: i64,
        principal: &Principal,
    ) -> Result<bool, LookupError>;
}

/// Resolves through domain storage
pub struct LookupResolver {
    resource: ResourceType,
    lookup: Arc<dyn ResourceLookup>,
}

impl LookupResolver {
    pub fn new(resource: ResourceType, lookup: Arc<dyn ResourceLookup>) -> Self {
        Self { resource, lookup }
    }
}

#[async_trait]
impl OwnershipResolver for LookupResolver {
    async fn is_owner(
        &self,
        strategy: OwnershipStrategy,
        resource_id: i64,
        principal: &Principal,
    ) -> Result<bool, LookupError> {
        let owner = match strategy {
            OwnershipStrategy::Direct => self.lookup.owner_of(self.resource, resource_id).await?,
            OwnershipStrategy::ThroughSchedule => {
                match self.lookup.parent_of(self.resource, resource_id).await? {
                    Some((parent, parent_id)) => self.lookup.owner_of(parent, parent_id).await?,
                    None => None,
                }
            }
            OwnershipStrategy::ThroughMember => Some(resource_id),
        };
        Ok(owner == Some(principal.member_id))
    }
}

/// For types whose identifier is the member key itself
#[derive(Debug, Default, Clone, Copy)]
pub struct MemberKeyResolver;

#[async_trait]
impl OwnershipResolver for MemberKeyResolver {
    async fn is_owner(
        &self,
        _strategy: OwnershipStrategy,
        resource_id: i64,
        principal: &Principal,
    ) -> Result<bool, LookupError> {
        Ok(resource_id == principal.member_id)
    }
}

/// Resource type -> resolver, filled at startup
#[derive(Default, Clone)]
pub struct ResolverRegistry {
    resolvers: HashMap<ResourceType, Arc<dyn OwnershipResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolvers for every built-in resource type
    pub fn with_defaults(lookup: Arc<dyn ResourceLookup>) -> Self {
        let mut registry = Self::new();
        for resource in [
            ResourceType::MEDICATION_SCHEDULE,
            ResourceType::MEDICATION_RECORD,
            ResourceType::MOOD_DIARY,
            ResourceType::SIDE_EFFECT_RECORD,
        ] {
            registry.register(resource, Arc::new(LookupResolver::new(resource, lookup.clone())));
        }
        for resource in [
            ResourceType::MEMBER,
            ResourceType::MEDICATION_SCHEDULE_BY_MEMBER,
            ResourceType::MOOD_DIARY_BY_MEMBER,
        ] {
            registry.register(resource, Arc::new(MemberKeyResolver));
        }
        registry
    }

    /// Register or replace the resolver for `resource`
    pub fn register(&mut self, resource: ResourceType, resolver: Arc<dyn OwnershipResolver>) -> &mut Self {
        self.resolvers.insert(resource, resolver);
        self
    }

    pub fn get(&self, resource: ResourceType) -> Option<Arc<dyn OwnershipResolver>> {
        self.resolvers.get(&resource).cloned()
    }

    pub fn contains(&self, resource: ResourceType) -> bool {
        self.resolvers.contains_key(&resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MemoryDomainStore;

    async fn registry() -> ResolverRegistry {
        let store = Arc::new(MemoryDomainStore::with_demo_data().await);
        ResolverRegistry::with_defaults(store)
    }

    #[tokio::test]
    async fn direct_compares_owner_column() {
        let registry = registry().await;
        let resolver = registry.get(ResourceType::MEDICATION_SCHEDULE).unwrap();
        let alice = Principal::new(1, "alice");
        let bob = Principal::new(2, "bob");

        assert!(resolver.is_owner(OwnershipStrategy::Direct, 10, &alice).await.unwrap());
        assert!(!resolver.is_owner(OwnershipStrategy::Direct, 10, &bob).await.unwrap());
        assert!(!resolver.is_owner(OwnershipStrategy::Direct, 404, &alice).await.unwrap());
    }

    #[tokio::test]
    async fn through_schedule_follows_parent() {
        let registry = registry().await;
        let resolver = registry.get(ResourceType::MEDICATION_RECORD).unwrap();
        let alice = Principal::new(1, "alice");

        assert!(resolver.is_owner(OwnershipStrategy::ThroughSchedule, 100, &alice).await.unwrap());
        assert!(!resolver.is_owner(OwnershipStrategy::ThroughSchedule, 200, &alice).await.unwrap());
        assert!(!resolver.is_owner(OwnershipStrategy::ThroughSchedule, 999, &alice).await.unwrap());
    }

    #[tokio::test]
    async fn member_keyed_types_compare_identifier() {
        let registry = registry().await;
        let alice = Principal::new(1, "alice");
        for resource in [ResourceType::MEMBER, ResourceType::MOOD_DIARY_BY_MEMBER] {
            let resolver = registry.get(resource).unwrap();
            assert!(resolver.is_owner(OwnershipStrategy::Direct, 1, &alice).await.unwrap());
            assert!(!resolver.is_owner(OwnershipStrategy::Direct, 2, &alice).await.unwrap());
        }

        let resolver = registry.get(ResourceType::MOOD_DIARY).unwrap();
        assert!(resolver.is_owner(OwnershipStrategy::ThroughMember, 1, &alice).await.unwrap());
    }

    #[tokio::test]
    async fn registry_is_extensible() {
        let mut registry = registry().await;
        let custom = ResourceType::new("custom");
        assert!(!registry.contains(custom));
        registry.register(custom, Arc::new(MemberKeyResolver));
        assert!(registry.contains(custom));
    }
}
