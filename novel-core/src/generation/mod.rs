//! Chapter generation: the streaming controller, its wire events and the
//! best-effort work that follows a persisted chapter.

mod controller;
mod events;
mod side_effects;

pub use controller::{
    ChapterRequest, GenerationOutcome, GenerationState, StreamOutcome,
    StreamingGenerationController, DEFAULT_EVENT_BUFFER,
};
pub use events::GenerationEvent;
pub use side_effects::{
    ExtractedCharacter, ExtractedFacts, ExtractedSetting, SideEffectPipeline, SideEffectReport,
    StepOutcome,
};
