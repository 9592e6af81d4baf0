//! # Strata Runtime
//!
//! Execution core of the Strata continuous-query engine.
//!
//! A query is a chain of [`Processor`]s. Chunks of pooled event records
//! enter at a [`StreamJunction`], flow through windows, filters, pattern
//! state machines, joins and aggregations, and leave through a sink or
//! callback. Stateful processors register with the app's
//! [`SnapshotService`](snapshot::SnapshotService) so a running app can be
//! persisted and restored by revision.
//!
//! ## Modules
//!
//! - [`event`], [`chunk`], [`pool`]: Records, chunk transport and recycling pools
//! - [`processor`]: The processor contract, filters and chain cloning
//! - [`window`]: Tumbling time-batch and sliding length windows
//! - [`state`]: Pattern and sequence correlation
//! - [`join`]: Join correlation over findable processors
//! - [`aggregator`], [`selector`]: Incremental aggregators and group-by aggregation
//! - [`partition`]: Per-key clones of a query
//! - [`scheduler`]: Clocks and the timer scheduler
//! - [`snapshot`], [`persistence`]: State capture and revision stores
//! - [`receiver`], [`app`]: Stream input and the app runtime
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata_runtime::{AppRuntime, EngineConfig, MetaStreamEvent, CollectingSink};
//! use strata_core::{AttributeType, Value};
//!
//! let app = AppRuntime::new("trading", EngineConfig::default())?;
//! app.define_stream("Trades", MetaStreamEvent::on_after_window_only(&[("price", AttributeType::Double)]))?;
//! let sink = std::sync::Arc::new(CollectingSink::new());
//! app.subscribe("Trades", "all-trades", sink.clone())?;
//! app.input_handler("Trades")?.send(1_000, &[Value::Double(101.5)])?;
//! assert_eq!(sink.len(), 1);
//! ```

pub mod aggregator;
pub mod app;
pub mod chunk;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod executor;
pub mod findable;
pub mod join;
pub mod logging;
pub mod partition;
pub mod persistence;
pub mod pool;
pub mod processor;
pub mod receiver;
pub mod scheduler;
pub mod selector;
pub mod sink;
pub mod snapshot;
pub mod state;
pub mod table;
pub mod window;

pub use app::AppRuntime;
pub use chunk::EventChunk;
pub use config::{ConfigError, EngineConfig};
pub use context::{AppContext, QueryContext};
pub use error::{EngineError, EngineResult};
pub use event::{ComplexEvent, EventKind, Position, StateEvent, StreamEvent};
pub use executor::ExpressionExecutor;
pub use findable::FindableProcessor;
pub use join::{JoinBuilder, JoinRuntime, JoinSide, JoinTrigger, JoinType};
pub use logging::init_logging;
pub use partition::PartitionRuntime;
pub use persistence::{FileStore, MemoryStore, PersistenceManager, PersistenceStore, StoreError};
pub use pool::{Attribute, MetaStreamEvent, StateEventPool, StreamEventCloner, StreamEventPool};
pub use processor::{FilterProcessor, Processor, ProcessorRef};
pub use receiver::{InputHandler, StreamJunction};
pub use scheduler::{ManualClock, Scheduler, SystemClock, TimestampGenerator};
pub use selector::{AggregationProcessor, Projection};
pub use sink::{CallbackProcessor, ChannelSink, CollectingSink, LoggingSink, QueryCallback};
pub use state::{StatePlan, StateStreamRuntime, StateType};
pub use table::InMemoryTable;
pub use window::{LengthWindow, TimeBatchWindow};
