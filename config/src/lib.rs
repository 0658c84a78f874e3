//! Configuration of the Avalon client.
//!
//! Covers the client configuration file (`client.toml`), logger parameters,
//! the read-only network profile consumed at startup and the catalogue of
//! chaincode methods the command line knows how to call.
pub mod catalog;
pub mod client;
pub mod env;
pub mod logger;
pub mod profile;

pub use self::{
    catalog::{CatalogError, MethodCatalog, MethodSpec, ParamSpec, ParamType},
    client::{BasicAuth, Config, ParseError, UserConfig, WebLogin},
    profile::{NetworkProfile, ProfileError},
};
