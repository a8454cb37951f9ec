pub mod animation;
pub mod codec;
pub mod config;
pub mod error;
pub mod export;
pub mod prompts;
pub mod proxy;
pub mod watermark;

mod studio;

pub use config::StudioConfig;
pub use error::{RemoteCallError, StudioError, TranscodeError, ValidationError};
pub use export::DirectorySaver;
pub use proxy::{HttpProxyClient, ProxyTransport, TargetApi};
pub use studio::{
    FrameRenderer, OperationGuard, OperationSlot, PendingOperation, Studio, StudioStatus,
    BEFORE_AFTER_HEADING, ERROR_HEADING, HISTORY_ITEM_HEADING, SUGGESTIONS_HEADING,
};
pub use stylist_contracts::operation::{GenerationPhase, OperationKind};
