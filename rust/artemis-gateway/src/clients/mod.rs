//! Dependent-service HTTP client pool and its callback-client specialization
//! (§4.3).

pub mod callback;
pub mod pool;

pub use callback::CallbackClient;
pub use pool::{DependentClient, DependentClientPool};
