pub mod app_config;
pub mod database;
pub mod delivery_repo;
pub mod events;
pub mod trip_repo;
pub mod user_repo;

pub use app_config::Config;
pub use database::DbClient;
pub use delivery_repo::PostgresDeliveryRepository;
pub use events::EventBus;
pub use trip_repo::PostgresTripRepository;
pub use user_repo::PostgresUserDirectory;
