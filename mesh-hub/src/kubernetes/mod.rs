pub mod cluster;
pub mod crds;
