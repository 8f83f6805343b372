// security/ownership/mod.rs - Resource ownership checks
//
// Each protected route declares an `OwnershipPolicy`. Before the handler runs,
// the validator pulls the identifier out of the request, hands it to the
// resolver registered for the resource type and rejects the call unless the
// caller owns the resource. Resolution errors deny.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::auth::Principal;

pub mod extract;
pub mod policy;
pub mod resolver;

pub use extract::{coerce_id, resolve_path, snake_case, Extractable, FieldValue, InvocationArgs};
pub use policy::{OwnershipPolicy, OwnershipStrategy, ParameterSource, ResourceType};
pub use resolver::{LookupResolver, MemberKeyResolver, OwnershipResolver, ResolverRegistry};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OwnershipError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Resource identifier '{parameter}' not found in request")]
    MissingIdentifier { parameter: String },

    #[error("Access denied")]
    Forbidden,
}

#[derive(Clone)]
pub struct OwnershipValidator {
    registry: Arc<ResolverRegistry>,
}

impl OwnershipValidator {
    pub fn new(registry: ResolverRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    /// Allow or deny one invocation
    pub async fn check(
        &self,
        principal: Option<&Principal>,
        policy: &OwnershipPolicy,
        args: &InvocationArgs<'_>,
    ) -> Result<(), OwnershipError> {
        let Some(principal) = principal else {
            warn!(
                resource_type = %policy.resource_type,
                "Ownership check without an authenticated principal"
            );
            return Err(OwnershipError::Unauthenticated);
        };

        let Some(resource_id) = args.resource_id(policy) else {
            warn!(
                actor = %principal.login_id,
                resource_type = %policy.resource_type,
                parameter = %policy.parameter_name,
                source = ?policy.source,
                "Resource identifier missing from request"
            );
            return Err(OwnershipError::MissingIdentifier {
                parameter: policy.parameter_name.clone(),
            });
        };

        let Some(resolver) = self.registry.get(policy.resource_type) else {
            error!(
                actor = %principal.login_id,
                resource_type = %policy.resource_type,
                resource_id,
                "No ownership resolver registered for resource type"
            );
            return Err(OwnershipError::Forbidden);
        };

        match resolver.is_owner(policy.strategy, resource_id, principal).await {
            Ok(true) => {
                debug!(
                    actor = %principal.login_id,
                    resource_type = %policy.resource_type,
                    resource_id,
                    decision = "allow",
                    "Ownership check passed"
                );
                Ok(())
            }
            Ok(false) => {
                warn!(
                    actor = %principal.login_id,
                    resource_type = %policy.resource_type,
                    resource_id,
                    decision = "deny",
                    "Access denied"
                );
                Err(OwnershipError::Forbidden)
            }
            Err(e) => {
                error!(
                    actor = %principal.login_id,
                    resource_type = %policy.resource_type,
                    resource_id,
                    strategy = ?policy.strategy,
                    decision = "deny",
                    "Ownership resolution failed: {}", e
                );
                Err(OwnershipError::Forbidden)
            }
        }
    }

    /// Run `handler` only when the check allows
    pub async fn guard<F, T>(
        &self,
        principal: Option<&Principal>,
        policy: &OwnershipPolicy,
        args: &InvocationArgs<'_>,
        handler: F,
    ) -> Result<T, OwnershipError>
    where
        F: Future<Output = T>,
    {
        self.check(principal, policy, args).await?;
        Ok(handler.await)
    }
}
