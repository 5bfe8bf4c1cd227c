//! Offline gateway that answers every stage with canned text.

use crate::gateway::{GatewayError, InferenceGateway, Prompt};
use crate::stage::Stage;

pub struct DryrunGateway;

impl InferenceGateway for DryrunGateway {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, prompt: &Prompt<'_>, _max_output_tokens: u64) -> Result<String, GatewayError> {
        let text = match prompt.stage {
            Stage::Classify => "collectible",
            Stage::Identify => DRYRUN_IDENTIFICATION,
            Stage::AssessCondition => DRYRUN_CONDITION,
            Stage::MarketAnalysis => DRYRUN_MARKET,
            Stage::PriceRange => "30,50",
        };
        Ok(text.to_string())
    }
}

const DRYRUN_IDENTIFICATION: &str = "# Object Details\n\
- **Name:** Dryrun Tin Robot\n\
- **Year/series:** 1960s wind-up series\n\
- **Manufacturer:** Unknown\n\
- **Materials:** Lithographed tin\n\
- **Unique identifiers:** Key slot on the back panel";

const DRYRUN_CONDITION: &str = "## Condition\n\
- Overall Condition: 30/40\n\
- Completeness: 24/30\n\
- Functionality: 12/15\n\
- Aesthetics: 12/15\n\n\
**Total: 78 points** - Grade: Excellent (B)";

const DRYRUN_MARKET: &str = "```json\n\
{\"sources\": [\n\
  {\"name\": \"eBay\", \"value\": \"$35.00\", \"condition\": \"Used, working\", \"type\": \"marketplace\", \"url\": \"https://www.ebay.com\", \"comparison\": \"Similar wear\"},\n\
  {\"name\": \"Heritage Auctions\", \"value\": 48, \"condition\": \"Excellent\", \"type\": \"auction\", \"url\": \"https://www.ha.com\", \"comparison\": \"Slightly better paint\"}\n\
]}\n\
```\n\n\
## Value Matrix\n\n\
| Grade | Value |\n\
| --- | --- |\n\
| A | $60 |\n\
| B | $40 |\n\
| C | $25 |\n\n\
## Market Information\n\
Demand for vintage tin toys is steady.";
