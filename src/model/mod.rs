pub mod message;
pub mod params;
pub mod response;

pub use message::{ChatMessage, Conversation, Role};
pub use params::{GenerationParams, RawGenerationParams, SliderBounds};
pub use response::{GeneratedSequence, GenerationResponse, ResponseShapeError};
