//! Channel Kinds
//!
//! Real-time stream categories the provider supports and the endpoint scope
//! each one requires.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which endpoint a duplex connection is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointScope {
    /// Market-data endpoint (charts, DOM, quotes, histograms).
    MarketData,
    /// General endpoint (accounts, orders, sync).
    General,
}

impl EndpointScope {
    /// Scope name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MarketData => "market-data",
            Self::General => "general",
        }
    }
}

impl fmt::Display for EndpointScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a real-time subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelKind {
    /// Chart bars or ticks.
    Chart,
    /// Depth of market.
    DepthOfMarket,
    /// Top-of-book quotes.
    Quote,
    /// Volume histogram.
    Histogram,
    /// Full account synchronization (orders, fills, positions).
    AccountSync,
}

impl ChannelKind {
    /// All supported channel kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Chart,
            Self::DepthOfMarket,
            Self::Quote,
            Self::Histogram,
            Self::AccountSync,
        ]
    }

    /// Endpoint scope the channel must be opened on.
    #[must_use]
    pub const fn required_scope(&self) -> EndpointScope {
        match self {
            Self::AccountSync => EndpointScope::General,
            Self::Chart | Self::DepthOfMarket | Self::Quote | Self::Histogram => {
                EndpointScope::MarketData
            }
        }
    }

    /// Whether the channel addresses an instrument by symbol.
    ///
    /// Symbol channels resolve the instrument's numeric id before filtering.
    #[must_use]
    pub const fn addresses_symbol(&self) -> bool {
        matches!(self, Self::DepthOfMarket | Self::Quote | Self::Histogram)
    }

    /// Whether a server-side cancel exists for the channel.
    #[must_use]
    pub const fn is_cancellable(&self) -> bool {
        !matches!(self, Self::AccountSync)
    }

    /// Request method that opens the channel.
    #[must_use]
    pub const fn subscribe_method(&self) -> &'static str {
        match self {
            Self::Chart => "md/getChart",
            Self::DepthOfMarket => "md/subscribeDOM",
            Self::Quote => "md/subscribeQuote",
            Self::Histogram => "md/subscribeHistogram",
            Self::AccountSync => "user/syncrequest",
        }
    }

    /// Request method that closes the channel, if any.
    #[must_use]
    pub const fn cancel_method(&self) -> Option<&'static str> {
        match self {
            Self::Chart => Some("md/cancelChart"),
            Self::DepthOfMarket => Some("md/unsubscribeDOM"),
            Self::Quote => Some("md/unsubscribeQuote"),
            Self::Histogram => Some("md/unsubscribeHistogram"),
            Self::AccountSync => None,
        }
    }

    /// Collection key inside event payloads carrying this channel's items.
    ///
    /// Account sync items are not wrapped in a collection.
    #[must_use]
    pub const fn collection_key(&self) -> Option<&'static str> {
        match self {
            Self::Chart => Some("charts"),
            Self::DepthOfMarket => Some("doms"),
            Self::Quote => Some("quotes"),
            Self::Histogram => Some("histograms"),
            Self::AccountSync => None,
        }
    }

    /// Field inside a collection item holding the id to match.
    #[must_use]
    pub const fn item_id_field(&self) -> &'static str {
        match self {
            Self::Chart => "id",
            Self::DepthOfMarket | Self::Quote | Self::Histogram | Self::AccountSync => "contractId",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Chart => "chart",
            Self::DepthOfMarket => "depth-of-market",
            Self::Quote => "quote",
            Self::Histogram => "histogram",
            Self::AccountSync => "account-sync",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_account_sync_needs_general_scope() {
        for kind in ChannelKind::all() {
            let expected = if *kind == ChannelKind::AccountSync {
                EndpointScope::General
            } else {
                EndpointScope::MarketData
            };
            assert_eq!(kind.required_scope(), expected, "{kind}");
        }
    }

    #[test]
    fn cancel_method_present_iff_cancellable() {
        for kind in ChannelKind::all() {
            assert_eq!(kind.cancel_method().is_some(), kind.is_cancellable());
        }
    }
}
