pub mod control;
pub mod ingress;
pub mod probe;
