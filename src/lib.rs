pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{MinerError, Result};
pub use services::auth_service::AuthService;
pub use services::gql_service::GqlClient;
pub use services::mining_service::MiningService;
