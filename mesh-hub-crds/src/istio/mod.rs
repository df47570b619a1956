//! Istio `networking.istio.io/v1alpha3` objects written by the federation client.
//!
//! Only the fields the hub sets are modelled. Schema generation is disabled as
//! the CRDs are installed by Istio itself.

pub mod destination_rule;
pub mod envoy_filter;
pub mod gateway;
pub mod service_entry;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub number: u32,
    pub protocol: String,
    pub name: String,
}
