use crate::metrics::ControllerMetrics;
use crate::resolver::FederationResolver;

pub(crate) struct Context {
    pub resolver: FederationResolver,
    pub metrics: ControllerMetrics,
}
