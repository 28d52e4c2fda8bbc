//! The federation layer of a service: what it declares, how it resolves references to its
//! entities, and how every service's declarations compose into one graph.

mod composed;
mod composition;
mod error;
mod protocol;
mod registry;
mod resolver;
mod schema;
mod selection;
mod service;
mod store;

pub use composed::*;
pub use composition::compose;
pub use error::*;
pub use protocol::*;
pub use registry::EntityRegistry;
pub use resolver::*;
pub use schema::*;
pub use selection::*;
pub use service::*;
pub use store::*;
