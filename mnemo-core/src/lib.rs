pub mod cards;
pub mod errors;
pub mod filters;
pub mod models;
pub mod repo;
pub mod scheduler;
pub mod session;
pub mod tags;

pub use cards::*;
pub use errors::*;
pub use filters::*;
pub use models::*;
pub use repo::*;
pub use scheduler::*;
pub use session::*;
pub use tags::{CardDeletion, Reconciliation};
