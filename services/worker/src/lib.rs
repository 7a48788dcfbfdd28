pub mod cli;
pub mod config;
pub mod model_store;
pub mod processor;
pub mod queue;
pub mod registry_pg;
pub mod state;
pub mod submit;
pub mod trace;
pub mod trainer;
pub mod types_jobs;
pub mod worker_loop;
