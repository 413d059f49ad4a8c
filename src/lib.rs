pub mod api;
pub mod backend;
pub mod bundle;
pub mod bundle_io;
pub mod config;
pub mod convert;
pub mod describe;
pub mod digest;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod job;
pub mod naming;
pub mod output;
pub mod pipe;
pub mod rdf;
pub mod registry;
pub mod rosrs;
