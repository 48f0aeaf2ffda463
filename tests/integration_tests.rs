//! Integration tests wiring the actors together the way the binary does

#[path = "integration/helpers.rs"]
mod helpers;

#[path = "integration/pipeline.rs"]
mod pipeline;

#[path = "integration/failure_scenarios.rs"]
mod failure_scenarios;

#[path = "integration/api_endpoints.rs"]
mod api_endpoints;
