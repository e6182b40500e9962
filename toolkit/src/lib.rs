//! Administration toolkit for the CMMS database behind a hosted PostgREST API.
//!
//! Everything goes through [`client::RestClient`], which only speaks the REST
//! surface: schema facts are probed, DDL is attempted through an RPC with a
//! manual-SQL fallback, and dumps page through plain selects.

pub mod audit;
pub mod client;
pub mod config;
pub mod ddl;
pub mod error;
pub mod export;
pub mod migrate;
pub mod probe;
pub mod smoke;

pub use client::{Filters, Query, RestClient, Row};
pub use config::{Config, ConfigError};
pub use error::{DbError, DbResult};
