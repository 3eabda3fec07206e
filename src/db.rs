pub mod error;
pub mod memory_store;
pub mod models;
pub mod observation_repository;
pub mod station_repository;
pub mod store;

pub use error::DbError;
pub use memory_store::MemoryStore;
pub use models::*;
pub use observation_repository::ObservationRepository;
pub use station_repository::StationRepository;
pub use store::{CursorScope, PgWeatherStore, WeatherStore};
