pub mod effects;
pub mod error;
pub mod events;
pub mod models;
pub mod scheduler;
pub mod service;
pub mod sounds;
pub mod store;
pub mod timer_machine;

pub use effects::{Announcer, EffectDispatcher, RunGuard, SoundEngine, Vibrator};
pub use error::{ServiceError, StoreError};
pub use events::TimerEvent;
pub use models::{MoveDirection, Stage, Template, TimerConfig, format_duration};
pub use service::TimerService;
pub use sounds::{SoundCatalog, SoundInfo};
pub use store::{JsonFileStore, MemoryStore, TemplateStore};
pub use timer_machine::{TimerAction, TimerState, transition};
