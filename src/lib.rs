pub mod client;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod query;
pub mod tls;
pub mod transport;

pub use client::{Client, ClientBuilder, ClientError};
pub use config::{Config, ResolvedContext};
pub use query::{FieldPath, Query, QueryResult, Shape};
pub use transport::{Auth, AuthenticatedTransport, Transport};
