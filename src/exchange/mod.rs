pub mod factory;
pub mod paper;
mod traits;

pub use factory::{build_exchange, build_exchange_for};
pub use paper::{PaperConfig, PaperExchange, PaperOp};
pub use traits::{parse_exchange_kind, Exchange, ExchangeKind};
