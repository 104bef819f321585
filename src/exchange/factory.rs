use std::sync::Arc;

use crate::error::Result;

use super::traits::unsupported;
use super::{parse_exchange_kind, Exchange, ExchangeKind, PaperConfig, PaperExchange};

/// Create the runtime exchange from its configured name.
///
/// Unknown or unimplemented venues fail here, at construction time.
pub fn build_exchange(kind: &str, paper: &PaperConfig) -> Result<Arc<dyn Exchange>> {
    build_exchange_for(parse_exchange_kind(kind)?, paper)
}

pub fn build_exchange_for(kind: ExchangeKind, paper: &PaperConfig) -> Result<Arc<dyn Exchange>> {
    match kind {
        ExchangeKind::Paper => Ok(Arc::new(PaperExchange::new(paper.clone()))),
        ExchangeKind::Binance | ExchangeKind::Bybit | ExchangeKind::Okx => {
            Err(unsupported("live trading adapter", kind))
        }
    }
}
