pub mod auth_service;
pub mod gql_service;
pub mod mining_service;
pub mod progress_service;
pub mod selector_service;
pub mod watch_service;
