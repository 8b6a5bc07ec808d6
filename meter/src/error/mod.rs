mod fetch_error;
mod meter_error;

pub use fetch_error::FetchError;
pub use meter_error::MeterError;
pub type Result<T> = std::result::Result<T, MeterError>;
