//! Bid calculation from a live market quote.

use crate::marketplace::BidQuote;

/// Price to offer per GPU: the market minimum, capped at `ceiling`.
pub fn compute_bid(quote: &BidQuote, ceiling: f64) -> Result<f64, BidError> {
    validate_ceiling(ceiling)?;

    let price = quote
        .minimum_price
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| BidError::NoQuoteAvailable(quote.resource_class.clone()))?;

    if price > ceiling {
        tracing::warn!(
            "Market minimum for {} is {:.3}/h, above the {:.3}/h ceiling; bidding the ceiling",
            quote.resource_class,
            price,
            ceiling
        );
    }

    Ok(price.min(ceiling))
}

/// Reject ceilings that could never produce a bid.
pub fn validate_ceiling(ceiling: f64) -> Result<(), BidError> {
    if ceiling.is_finite() && ceiling > 0.0 {
        Ok(())
    } else {
        Err(BidError::InvalidBidCeiling(ceiling))
    }
}

/// Errors that can occur when computing a bid.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BidError {
    #[error("no market offer available for {0}")]
    NoQuoteAvailable(String),
    #[error("invalid bid ceiling {0}: must be a positive price")]
    InvalidBidCeiling(f64),
}
