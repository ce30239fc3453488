pub mod error;
pub mod settings;
pub mod traits;
pub mod types;

pub use error::SignalError;
pub use settings::StrategySettings;
pub use traits::TradeLogStore;
pub use types::*;
