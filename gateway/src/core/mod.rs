pub mod sonic;
pub mod tools;

// Re-export commonly used types for convenience
pub use sonic::{
    BedrockConnector, SessionStatus, SonicConfig, SonicError, SonicResult, SonicVoice,
    StreamManager, TransportConnector,
};

pub use tools::{Tool, ToolRegistry, ToolSet, ToolSettings, ToolSpec};
