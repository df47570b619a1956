use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use mesh_hub_crds::v1alpha1::mesh_service::MeshService;
use tracing::{error, info, instrument};

use crate::context::Context;
use crate::{Error, Result};

pub(crate) const DEFAULT_REQUEUE: Duration = Duration::from_secs(300);
pub(crate) const ERROR_REQUEUE: Duration = Duration::from_secs(30);

#[instrument(skip_all, fields(name = %mesh_service.name_any()))]
pub(crate) async fn reconcile(mesh_service: Arc<MeshService>, ctx: Arc<Context>) -> Result<Action> {
    let _measure = ctx.metrics.count_and_measure(mesh_service.as_ref());
    if mesh_service.namespace().is_none() {
        return Err(Error::MissingNamespace(mesh_service.name_any()));
    }

    if mesh_service.meta().deletion_timestamp.is_some() {
        ctx.resolver.on_delete(&mesh_service).await?;
        return Ok(Action::await_change());
    }

    info!("Reconciling MeshService {}", mesh_service.name_any());
    ctx.resolver.reconcile(&mesh_service).await?;
    Ok(Action::requeue(DEFAULT_REQUEUE))
}

pub(crate) fn error_policy(mesh_service: Arc<MeshService>, error: &Error, ctx: Arc<Context>) -> Action {
    ctx.metrics.count_failure(mesh_service.as_ref(), error);
    error!(?error, "reconcile error for MeshService {}", mesh_service.name_any());
    Action::requeue(ERROR_REQUEUE)
}
