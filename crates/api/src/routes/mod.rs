pub mod sagas;
pub mod system;
