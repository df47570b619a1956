use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::conditions;
use kube::runtime::wait::await_condition;
use kube::{Api, ResourceExt};
use tracing::info;

use crate::{Error, Result};

const CRD_ESTABLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Server-side applies the hub CRDs and waits for each to be established.
pub async fn apply_crds(client: kube::Client) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client);
    let ssaply = PatchParams::apply("mesh_hub").force();
    for crd in mesh_hub_crds::crds() {
        let name = crd.name_any();
        crds.patch(&name, &ssaply, &Patch::Apply(&crd)).await?;
        let established = await_condition(crds.clone(), &name, conditions::is_crd_established());
        match tokio::time::timeout(CRD_ESTABLISH_TIMEOUT, established).await {
            Ok(o) => o?,
            Err(_) => return Err(Error::Other(format!("timed out waiting for crd {name}"))),
        };
        info!("applied {} CRD", name);
    }
    Ok(())
}
