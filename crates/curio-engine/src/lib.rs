pub mod dryrun;
pub mod gateway;
pub mod image;
pub mod openai;
pub mod pipeline;
pub mod prompts;
pub mod scripted;
pub mod session;
pub mod stage;

pub use gateway::{GatewayError, GatewayErrorKind, InferenceGateway, Prompt};
pub use openai::{ConfigurationError, GatewayConfig, OpenAiGateway};
pub use pipeline::{
    AnalysisError, AnalysisPipeline, AnalysisRequest, NoopObserver, StageFailure, StageObserver,
};
pub use session::{Completion, Session, SessionState, Ticket};
pub use stage::Stage;
