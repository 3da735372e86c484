pub mod app_config;
pub mod database;
pub mod deadline;
pub mod redis_repo;
pub mod ticket_repo;

pub use database::DbClient;
pub use redis_repo::RedisLeaseStore;
pub use ticket_repo::PgTicketStore;
