//! Five-stage analysis: classify, identify, assess condition, market
//! analysis, price range. Each stage's prompt is built from the outputs of
//! the stages it requires; the first failure aborts the run.

use std::time::{Duration, Instant};

use curio_contracts::extract::{
    extract_market_listings, parse_price_pair, ListingsOutcome, MarketExtraction, PricePairError,
};
use curio_contracts::image::{EncodedImage, InvalidImageError};
use curio_contracts::knowledge::{default_knowledge, KnowledgeBase, FALLBACK_CATEGORY};
use curio_contracts::report::{
    AnalysisReport, ConditionReport, MarketAnalysis, ObjectCategory, PriceRange, ValueEstimate,
};
use tracing::{debug, info, info_span, warn};

use crate::gateway::{GatewayError, GatewayErrorKind, InferenceGateway, Prompt};
use crate::prompts;
use crate::stage::Stage;

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub image: EncodedImage,
}

impl AnalysisRequest {
    pub fn new(image: EncodedImage) -> Self {
        Self { image }
    }
}

/// Why a single stage produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageFailure {
    #[error("{0}")]
    Gateway(GatewayError),
    #[error("model returned no content")]
    EmptyContent,
}

impl From<GatewayError> for StageFailure {
    fn from(err: GatewayError) -> Self {
        if err.kind == GatewayErrorKind::EmptyResponse {
            return Self::EmptyContent;
        }
        Self::Gateway(err)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    InvalidImage(#[from] InvalidImageError),
    #[error("classification failed: {0}")]
    Classification(StageFailure),
    #[error("identification failed: {0}")]
    Identification(StageFailure),
    #[error("condition assessment failed: {0}")]
    Condition(StageFailure),
    #[error("market analysis failed: {0}")]
    MarketAnalysis(StageFailure),
    #[error("price range extraction failed: {0}")]
    PriceExtraction(StageFailure),
    #[error("price range answer {raw:?} is unusable: {reason}")]
    InvalidPriceRange { raw: String, reason: PricePairError },
}

impl AnalysisError {
    pub fn at_stage(stage: Stage, failure: StageFailure) -> Self {
        match stage {
            Stage::Classify => Self::Classification(failure),
            Stage::Identify => Self::Identification(failure),
            Stage::AssessCondition => Self::Condition(failure),
            Stage::MarketAnalysis => Self::MarketAnalysis(failure),
            Stage::PriceRange => Self::PriceExtraction(failure),
        }
    }

    /// `None` when the request was rejected before any stage ran.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::InvalidImage(_) => None,
            Self::Classification(_) => Some(Stage::Classify),
            Self::Identification(_) => Some(Stage::Identify),
            Self::Condition(_) => Some(Stage::AssessCondition),
            Self::MarketAnalysis(_) => Some(Stage::MarketAnalysis),
            Self::PriceExtraction(_) | Self::InvalidPriceRange { .. } => Some(Stage::PriceRange),
        }
    }

    pub fn gateway_error(&self) -> Option<&GatewayError> {
        match self {
            Self::Classification(StageFailure::Gateway(err))
            | Self::Identification(StageFailure::Gateway(err))
            | Self::Condition(StageFailure::Gateway(err))
            | Self::MarketAnalysis(StageFailure::Gateway(err))
            | Self::PriceExtraction(StageFailure::Gateway(err)) => Some(err),
            _ => None,
        }
    }

    /// Whether re-running the whole analysis could succeed.
    pub fn is_transient(&self) -> bool {
        self.gateway_error().is_some_and(GatewayError::is_transient)
    }
}

/// Per-stage hook for tracing and event recording.
pub trait StageObserver {
    fn stage_started(&self, _stage: Stage) {}
    fn stage_completed(&self, _stage: Stage, _text: &str, _elapsed: Duration) {}
    fn listings_degraded(&self, _reason: &str) {}
}

pub struct NoopObserver;

impl StageObserver for NoopObserver {}

pub struct AnalysisPipeline<G> {
    gateway: G,
    knowledge: KnowledgeBase,
}

impl<G: InferenceGateway> AnalysisPipeline<G> {
    pub fn new(gateway: G) -> Self {
        Self::with_knowledge(gateway, default_knowledge().clone())
    }

    pub fn with_knowledge(gateway: G, knowledge: KnowledgeBase) -> Self {
        Self { gateway, knowledge }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisReport, AnalysisError> {
        self.analyze_observed(request, &NoopObserver)
    }

    /// Runs every stage once, in order. Nothing is cached between calls.
    pub fn analyze_observed(
        &self,
        request: &AnalysisRequest,
        observer: &dyn StageObserver,
    ) -> Result<AnalysisReport, AnalysisError> {
        if request.image.is_empty() {
            return Err(InvalidImageError::Empty.into());
        }
        let _span = info_span!(
            "analysis",
            gateway = self.gateway.name(),
            media_type = request.image.media_type(),
            image_bytes = request.image.len()
        )
        .entered();

        let mut state = PipelineState::default();
        for stage in Stage::ALL {
            debug_assert!(
                stage.requires().iter().all(|required| state.has(*required)),
                "{stage} scheduled before its inputs"
            );
            let _stage_span = info_span!("stage", stage = stage.as_str()).entered();
            observer.stage_started(stage);

            let prompt = Prompt {
                stage,
                text: state.prompt_for(stage, &self.knowledge),
                image: stage.sends_image().then_some(&request.image),
            };
            debug!(prompt_chars = prompt.text.len(), "prompt built");

            let started = Instant::now();
            let text = self
                .gateway
                .generate(&prompt, stage.max_output_tokens())
                .map_err(|err| AnalysisError::at_stage(stage, err.into()))?;
            let elapsed = started.elapsed();
            if text.trim().is_empty() {
                return Err(AnalysisError::at_stage(stage, StageFailure::EmptyContent));
            }
            debug!(chars = text.len(), elapsed_ms = elapsed.as_millis() as u64, "stage answered");
            observer.stage_completed(stage, &text, elapsed);

            state.absorb(stage, text, observer)?;
        }

        let report = state.into_report(&self.knowledge)?;
        info!(
            category = report.category.as_str(),
            value = report.value.category.as_str(),
            average = report.value.range.average,
            listings = report.market_analysis.listings.len(),
            "analysis complete"
        );
        Ok(report)
    }
}

#[derive(Debug, Default)]
struct PipelineState {
    category: Option<ObjectCategory>,
    identification: Option<String>,
    condition: Option<String>,
    market_text: Option<String>,
    market: Option<MarketExtraction>,
    price: Option<PriceRange>,
}

impl PipelineState {
    fn has(&self, stage: Stage) -> bool {
        match stage {
            Stage::Classify => self.category.is_some(),
            Stage::Identify => self.identification.is_some(),
            Stage::AssessCondition => self.condition.is_some(),
            Stage::MarketAnalysis => self.market.is_some(),
            Stage::PriceRange => self.price.is_some(),
        }
    }

    fn category_key(&self) -> &str {
        self.category
            .as_ref()
            .map(ObjectCategory::as_str)
            .unwrap_or(FALLBACK_CATEGORY)
    }

    fn prompt_for(&self, stage: Stage, knowledge: &KnowledgeBase) -> String {
        let category = self.category_key();
        match stage {
            Stage::Classify => prompts::classify_prompt(&knowledge.known_categories()),
            Stage::Identify => prompts::identify_prompt(knowledge.display_label_for(category)),
            Stage::AssessCondition => prompts::condition_prompt(
                knowledge.display_label_for(category),
                knowledge.condition_template_for(category),
            ),
            Stage::MarketAnalysis => prompts::market_prompt(
                knowledge.market_sources_for(category),
                self.identification.as_deref().unwrap_or_default(),
                self.condition.as_deref().unwrap_or_default(),
            ),
            Stage::PriceRange => {
                prompts::price_prompt(self.market_text.as_deref().unwrap_or_default())
            }
        }
    }

    fn absorb(
        &mut self,
        stage: Stage,
        text: String,
        observer: &dyn StageObserver,
    ) -> Result<(), AnalysisError> {
        match stage {
            Stage::Classify => {
                let category = ObjectCategory::from_model_answer(&text)
                    .ok_or(AnalysisError::Classification(StageFailure::EmptyContent))?;
                debug!(category = category.as_str(), "classified");
                self.category = Some(category);
            }
            Stage::Identify => self.identification = Some(text.trim().to_string()),
            Stage::AssessCondition => self.condition = Some(text.trim().to_string()),
            Stage::MarketAnalysis => {
                let extraction = extract_market_listings(&text);
                let degraded = match &extraction.outcome {
                    ListingsOutcome::Parsed(_) => None,
                    ListingsOutcome::Missing => Some("no listings block in market analysis".to_string()),
                    ListingsOutcome::Malformed(reason) => {
                        Some(format!("malformed listings block: {reason}"))
                    }
                };
                if let Some(reason) = degraded {
                    warn!(%reason, "continuing without listings");
                    observer.listings_degraded(&reason);
                }
                self.market_text = Some(text);
                self.market = Some(extraction);
            }
            Stage::PriceRange => {
                let raw = text.trim();
                let (min, max) = parse_price_pair(raw).map_err(|reason| {
                    AnalysisError::InvalidPriceRange {
                        raw: raw.to_string(),
                        reason,
                    }
                })?;
                let range = PriceRange::new(min, max);
                if !range.is_ordered() {
                    warn!(min, max, "price range answer is reversed");
                }
                self.price = Some(range);
            }
        }
        Ok(())
    }

    fn into_report(self, knowledge: &KnowledgeBase) -> Result<AnalysisReport, AnalysisError> {
        let missing = |stage: Stage| AnalysisError::at_stage(stage, StageFailure::EmptyContent);
        let category = self.category.ok_or_else(|| missing(Stage::Classify))?;
        let identification = self.identification.ok_or_else(|| missing(Stage::Identify))?;
        let assessment = self.condition.ok_or_else(|| missing(Stage::AssessCondition))?;
        let market = self.market.ok_or_else(|| missing(Stage::MarketAnalysis))?;
        let range = self.price.ok_or_else(|| missing(Stage::PriceRange))?;

        let key = category.as_str();
        Ok(AnalysisReport {
            display_label: knowledge.display_label_for(key).to_string(),
            identification,
            condition: ConditionReport {
                assessment,
                template: knowledge.condition_template_for(key).clone(),
            },
            market_analysis: MarketAnalysis {
                narrative: market.narrative.clone(),
                listings: market.into_listings(),
                source_hints: knowledge.market_sources_for(key).to_vec(),
            },
            value: ValueEstimate {
                category: knowledge.classify_value(range.average, key),
                range,
            },
            category,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use curio_contracts::knowledge::{
        condition_template_for, market_sources_for, KnowledgeTables, ValueCategory, ValueThresholds,
    };

    use super::*;
    use crate::scripted::ScriptedGateway;

    const IDENTIFICATION: &str = "# Object Details\n- **Name:** Charizard\n- **Set:** Base Set";
    const CONDITION: &str = "Surface 26/30, Corners 26/30, Edges 16/20, Centering 16/20.\n\
        Total: 84 points. Grade: Near Mint (8)";
    const MARKET: &str = "```json\n{\"sources\": [\n\
        {\"name\": \"TCGPlayer\", \"value\": \"$35.00\", \"condition\": \"Near Mint\", \"type\": \"marketplace\", \"url\": \"https://www.tcgplayer.com/1\", \"comparison\": \"Same\"},\n\
        {\"name\": \"eBay\", \"value\": \"$45.00\", \"condition\": \"Near Mint\", \"type\": \"marketplace\", \"url\": \"https://www.ebay.com/2\", \"comparison\": \"Better centering\"}\n\
        ]}\n```\n\n## Value Matrix\n| Grade | Value |\n| --- | --- |\n| Near Mint | $40 |";

    fn request() -> anyhow::Result<AnalysisRequest> {
        Ok(AnalysisRequest::new(EncodedImage::new(
            "image/jpeg",
            vec![0xff, 0xd8, 0xff, 0xe0],
        )?))
    }

    fn happy_path(category: &str, market: &str, price: &str) -> ScriptedGateway {
        ScriptedGateway::replying([category, IDENTIFICATION, CONDITION, market, price])
    }

    #[test]
    fn pokemon_card_end_to_end() -> anyhow::Result<()> {
        let pipeline = AnalysisPipeline::new(happy_path("pokemon_card", MARKET, "30,50"));
        let report = pipeline.analyze(&request()?)?;

        assert_eq!(report.category.as_str(), "pokemon_card");
        assert_eq!(report.display_label, "Pokemon Card");
        assert_eq!(report.identification, IDENTIFICATION);
        assert_eq!(report.condition.assessment, CONDITION);
        assert_eq!(&report.condition.template, condition_template_for("pokemon_card"));
        assert_eq!(report.market_analysis.listings.len(), 2);
        assert_eq!(report.market_analysis.source_hints, market_sources_for("pokemon_card"));
        assert!(!report.market_analysis.narrative.contains("```"));
        assert!(report.market_analysis.narrative.starts_with("## Value Matrix"));
        assert_eq!(report.value.range, PriceRange::new(30.0, 50.0));
        assert_eq!(report.value.range.average, 40.0);
        assert_eq!(report.value.category, ValueCategory::SomewhatValuable);
        assert_eq!(pipeline.gateway().remaining(), 0);
        Ok(())
    }

    #[test]
    fn stages_run_in_order_with_image_on_vision_stages() -> anyhow::Result<()> {
        let pipeline = AnalysisPipeline::new(happy_path("pokemon_card", MARKET, "30,50"));
        pipeline.analyze(&request()?)?;

        let recorded = pipeline.gateway().recorded();
        let stages: Vec<Stage> = recorded.iter().map(|prompt| prompt.stage).collect();
        assert_eq!(stages, Stage::ALL.to_vec());
        let images: Vec<bool> = recorded.iter().map(|prompt| prompt.had_image).collect();
        assert_eq!(images, vec![true, true, true, false, false]);
        let tokens: Vec<u64> = recorded.iter().map(|prompt| prompt.max_output_tokens).collect();
        assert_eq!(tokens, vec![50, 500, 500, 800, 50]);
        Ok(())
    }

    #[test]
    fn later_prompts_carry_earlier_answers() -> anyhow::Result<()> {
        let pipeline = AnalysisPipeline::new(happy_path("pokemon_card", MARKET, "30,50"));
        pipeline.analyze(&request()?)?;

        let recorded = pipeline.gateway().recorded();
        assert!(recorded[1].text.contains("Pokemon Card"));
        assert!(recorded[2].text.contains("## Surface (30 points)"));
        assert!(recorded[3].text.contains(IDENTIFICATION));
        assert!(recorded[3].text.contains(CONDITION));
        assert!(recorded[3].text.contains("1. TCGPlayer"));
        assert!(recorded[4].text.contains("\"sources\""));
        Ok(())
    }

    #[test]
    fn price_answer_sets_average() -> anyhow::Result<()> {
        let pipeline = AnalysisPipeline::new(happy_path("pokemon_card", MARKET, "25.50,100.75"));
        let report = pipeline.analyze(&request()?)?;
        assert_eq!(report.value.range.min, 25.50);
        assert_eq!(report.value.range.max, 100.75);
        assert_eq!(report.value.range.average, 63.125);
        assert_eq!(report.value.category, ValueCategory::Valuable);
        Ok(())
    }

    #[test]
    fn empty_answer_fails_the_stage_that_produced_it() -> anyhow::Result<()> {
        for failing in Stage::ALL {
            let mut answers = vec!["pokemon_card", IDENTIFICATION, CONDITION, MARKET, "30,50"];
            answers[failing.index()] = "  \n";
            let pipeline = AnalysisPipeline::new(ScriptedGateway::replying(answers));

            let err = match pipeline.analyze(&request()?) {
                Ok(_) => anyhow::bail!("{failing} should have failed"),
                Err(err) => err,
            };
            assert_eq!(err.stage(), Some(failing));
            assert_eq!(
                pipeline.gateway().recorded().len(),
                failing.index() + 1,
                "{failing} must stop the run"
            );
            match (failing, &err) {
                (Stage::Classify, AnalysisError::Classification(StageFailure::EmptyContent))
                | (Stage::Identify, AnalysisError::Identification(StageFailure::EmptyContent))
                | (Stage::AssessCondition, AnalysisError::Condition(StageFailure::EmptyContent))
                | (Stage::MarketAnalysis, AnalysisError::MarketAnalysis(StageFailure::EmptyContent))
                | (Stage::PriceRange, AnalysisError::PriceExtraction(StageFailure::EmptyContent)) => {}
                other => anyhow::bail!("unexpected error for {failing}: {other:?}"),
            }
        }
        Ok(())
    }

    #[test]
    fn gateway_errors_are_stage_tagged() -> anyhow::Result<()> {
        let pipeline = AnalysisPipeline::new(ScriptedGateway::new([
            Ok("pokemon_card".to_string()),
            Err(GatewayError::unavailable("timed out after 60s")),
        ]));
        let err = match pipeline.analyze(&request()?) {
            Ok(_) => anyhow::bail!("expected failure"),
            Err(err) => err,
        };
        assert_eq!(err.stage(), Some(Stage::Identify));
        assert!(err.is_transient());
        assert_eq!(
            err.to_string(),
            "identification failed: unavailable: timed out after 60s"
        );

        let pipeline = AnalysisPipeline::new(ScriptedGateway::new([Err(
            GatewayError::unauthorized("bad key"),
        )]));
        let err = match pipeline.analyze(&request()?) {
            Ok(_) => anyhow::bail!("expected failure"),
            Err(err) => err,
        };
        assert_eq!(err.stage(), Some(Stage::Classify));
        assert!(!err.is_transient());
        assert_eq!(
            err.gateway_error().map(|err| err.kind),
            Some(GatewayErrorKind::Unauthorized)
        );
        Ok(())
    }

    #[test]
    fn empty_response_from_gateway_counts_as_empty_content() -> anyhow::Result<()> {
        let pipeline = AnalysisPipeline::new(ScriptedGateway::new([Err(
            GatewayError::empty_response("no output text"),
        )]));
        let err = match pipeline.analyze(&request()?) {
            Ok(_) => anyhow::bail!("expected failure"),
            Err(err) => err,
        };
        assert!(matches!(
            err,
            AnalysisError::Classification(StageFailure::EmptyContent)
        ));
        Ok(())
    }

    #[test]
    fn custom_knowledge_drives_prompts_and_value() -> anyhow::Result<()> {
        let mut tables = KnowledgeTables::default();
        tables
            .labels
            .insert("pokemon_card".to_string(), "Trading Card".to_string());
        tables.values.insert(
            "pokemon_card".to_string(),
            ValueThresholds { somewhat_valuable: 100.0, valuable: 500.0 },
        );
        let pipeline = AnalysisPipeline::with_knowledge(
            happy_path("pokemon_card", MARKET, "30,50"),
            KnowledgeBase::new(Some(tables)),
        );
        assert_eq!(pipeline.knowledge().display_label_for("pokemon_card"), "Trading Card");

        let report = pipeline.analyze(&request()?)?;
        assert_eq!(report.display_label, "Trading Card");
        assert_eq!(report.value.category, ValueCategory::NotValuable);
        assert!(pipeline.gateway().recorded()[1].text.contains("this Trading Card"));
        Ok(())
    }

    #[test]
    fn unknown_category_uses_collectible_tables() -> anyhow::Result<()> {
        let pipeline = AnalysisPipeline::new(happy_path("unknown_widget", MARKET, "30,50"));
        let report = pipeline.analyze(&request()?)?;

        assert_eq!(report.category.as_str(), "unknown_widget");
        assert_eq!(report.display_label, "Collectible Item");
        assert_eq!(&report.condition.template, condition_template_for("collectible"));
        assert_eq!(report.market_analysis.source_hints, market_sources_for("collectible"));
        assert_eq!(report.value.category, ValueCategory::SomewhatValuable);
        assert!(pipeline.gateway().recorded()[2]
            .text
            .contains("## Overall Condition (40 points)"));
        Ok(())
    }

    struct RecordingObserver {
        calls: RefCell<Vec<String>>,
    }

    impl StageObserver for RecordingObserver {
        fn stage_started(&self, stage: Stage) {
            self.calls.borrow_mut().push(format!("start:{stage}"));
        }

        fn stage_completed(&self, stage: Stage, _text: &str, _elapsed: Duration) {
            self.calls.borrow_mut().push(format!("done:{stage}"));
        }

        fn listings_degraded(&self, reason: &str) {
            self.calls.borrow_mut().push(format!("degraded:{reason}"));
        }
    }

    #[test]
    fn missing_or_malformed_listings_degrade_without_failing() -> anyhow::Result<()> {
        let cases = [
            ("## Value Matrix\nNo listings today.", "degraded:no listings block"),
            ("```json\n{\"sources\": [oops]}\n```\nPrices are flat.", "degraded:malformed"),
        ];
        for (market, expected) in cases {
            let pipeline = AnalysisPipeline::new(happy_path("pokemon_card", market, "30,50"));
            let observer = RecordingObserver {
                calls: RefCell::new(Vec::new()),
            };
            let report = pipeline.analyze_observed(&request()?, &observer)?;

            assert!(report.market_analysis.listings.is_empty());
            assert!(!report.market_analysis.narrative.contains("```"));
            let calls = observer.calls.borrow();
            assert!(calls.iter().any(|call| call.starts_with(expected)), "{calls:?}");
            assert_eq!(calls.iter().filter(|call| call.starts_with("done:")).count(), 5);
        }
        Ok(())
    }

    #[test]
    fn unusable_price_answer_is_a_hard_error() -> anyhow::Result<()> {
        for answer in ["about thirty dollars", "30", "30,fifty", "30,50,70"] {
            let pipeline = AnalysisPipeline::new(happy_path("pokemon_card", MARKET, answer));
            match pipeline.analyze(&request()?) {
                Err(AnalysisError::InvalidPriceRange { raw, .. }) => assert_eq!(raw, answer),
                other => anyhow::bail!("{answer:?} gave {other:?}"),
            }
        }
        Ok(())
    }

    #[test]
    fn reversed_price_pair_is_kept() -> anyhow::Result<()> {
        let pipeline = AnalysisPipeline::new(happy_path("pokemon_card", MARKET, "50,30"));
        let report = pipeline.analyze(&request()?)?;
        assert!(!report.value.range.is_ordered());
        assert_eq!(report.value.range.average, 40.0);
        Ok(())
    }

    #[test]
    fn every_call_reruns_all_stages() -> anyhow::Result<()> {
        let mut answers = Vec::new();
        for _ in 0..2 {
            answers.extend(["pokemon_card", IDENTIFICATION, CONDITION, MARKET, "30,50"]);
        }
        let pipeline = AnalysisPipeline::new(ScriptedGateway::replying(answers));
        let first = pipeline.analyze(&request()?)?;
        let second = pipeline.analyze(&request()?)?;
        assert_eq!(first, second);
        assert_eq!(pipeline.gateway().recorded().len(), 10);
        Ok(())
    }
}
