use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Marketplace,
    Auction,
    PriceGuide,
    Grading,
    Dealer,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Marketplace => "marketplace",
            Self::Auction => "auction",
            Self::PriceGuide => "price_guide",
            Self::Grading => "grading",
            Self::Dealer => "dealer",
        }
    }
}

/// Where to look for comparables. Only steers the market prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSourceHint {
    pub name: String,
    pub kind: SourceKind,
    pub priority: u32,
}

pub(super) fn default_sources() -> IndexMap<String, Vec<MarketSourceHint>> {
    use SourceKind::{Auction, Grading, Marketplace, PriceGuide};

    let mut map = IndexMap::new();
    let mut insert = |category: &str, ranked: &[(&str, SourceKind)]| {
        map.insert(category.to_string(), ranked_hints(ranked));
    };

    insert(
        "pokemon_card",
        &[
            ("TCGPlayer", Marketplace),
            ("eBay", Marketplace),
            ("PSA", Grading),
            ("Cardmarket", Marketplace),
        ],
    );
    insert(
        "sports_card",
        &[
            ("PWCC", Marketplace),
            ("eBay", Marketplace),
            ("PSA", Grading),
            ("Beckett", Grading),
        ],
    );
    insert(
        "action_figure",
        &[
            ("eBay", Marketplace),
            ("Amazon", Marketplace),
            ("Mercari", Marketplace),
            ("Heritage Auctions", Auction),
        ],
    );
    insert(
        "video_game",
        &[
            ("PriceCharting", PriceGuide),
            ("eBay", Marketplace),
            ("GameValueNow", PriceGuide),
            ("Heritage Auctions", Auction),
        ],
    );
    insert(
        "comic_book",
        &[
            ("GoCollect", PriceGuide),
            ("eBay", Marketplace),
            ("Heritage Auctions", Auction),
            ("MyComicShop", Marketplace),
        ],
    );
    map.insert(super::FALLBACK_CATEGORY.to_string(), collectible_sources());
    map
}

pub(super) fn collectible_sources() -> Vec<MarketSourceHint> {
    ranked_hints(&[
        ("eBay", SourceKind::Marketplace),
        ("Heritage Auctions", SourceKind::Auction),
        ("Mercari", SourceKind::Marketplace),
        ("Etsy", SourceKind::Marketplace),
    ])
}

fn ranked_hints(ranked: &[(&str, SourceKind)]) -> Vec<MarketSourceHint> {
    ranked
        .iter()
        .zip(1u32..)
        .map(|((name, kind), priority)| MarketSourceHint {
            name: (*name).to_string(),
            kind: *kind,
            priority,
        })
        .collect()
}
