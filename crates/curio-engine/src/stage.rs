use std::fmt;

/// One sequential model call. Stages run in `Stage::ALL` order; each reads
/// only the outputs named by [`Stage::requires`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Classify,
    Identify,
    AssessCondition,
    MarketAnalysis,
    PriceRange,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Classify,
        Stage::Identify,
        Stage::AssessCondition,
        Stage::MarketAnalysis,
        Stage::PriceRange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Identify => "identify",
            Self::AssessCondition => "assess_condition",
            Self::MarketAnalysis => "market_analysis",
            Self::PriceRange => "price_range",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Classify => 0,
            Self::Identify => 1,
            Self::AssessCondition => 2,
            Self::MarketAnalysis => 3,
            Self::PriceRange => 4,
        }
    }

    pub fn requires(&self) -> &'static [Stage] {
        match self {
            Self::Classify => &[],
            Self::Identify | Self::AssessCondition => &[Stage::Classify],
            Self::MarketAnalysis => &[Stage::Classify, Stage::Identify, Stage::AssessCondition],
            Self::PriceRange => &[Stage::MarketAnalysis],
        }
    }

    /// Only the stages that look at the object itself carry the image.
    pub fn sends_image(&self) -> bool {
        matches!(
            self,
            Self::Classify | Self::Identify | Self::AssessCondition
        )
    }

    pub fn max_output_tokens(&self) -> u64 {
        match self {
            Self::Classify => 50,
            Self::Identify | Self::AssessCondition => 500,
            Self::MarketAnalysis => 800,
            Self::PriceRange => 50,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
