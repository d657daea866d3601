pub mod abstracts;
pub mod batch;
pub mod bibtex;
pub mod config;
pub mod domain;
pub mod error;
pub mod fallback;
pub mod http;
pub mod orchestrator;
pub mod output;
pub mod providers;
pub mod store;
pub mod validator;
