// src/qso/mod.rs  —  QSO protocol engine: context, station pools, pattern
// engine, and the six-state machine itself.
pub mod context;
pub mod pattern;
pub mod pool;
pub mod state;

pub use context::{ContextFlags, Effect, QsoContext, QsoRecord, State, Station};
pub use pattern::{DefaultPatternProvider, PatternEngine, PatternProvider, TemplateContext, YamlPatternProvider};
pub use pool::{CallPool, CsvParkPool, FileCallPool, ParkPool, StaticCallPool, StaticParkPool};
pub use state::{EngineConfig, QsoEngine};
