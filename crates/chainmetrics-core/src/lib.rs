//! # chainmetrics-core
//!
//! Turns read-only EVM contract calls into typed time-series metrics.
//!
//! # Overview
//!
//! - [`int`]: fixed-width EVM integers over `BigInt`
//! - [`abi`]: signatures, selectors, output shapes and the return decoder
//! - [`scale`]: exact decimal scaling and decimals resolution
//! - [`contract`]: contract and method descriptors
//! - [`processor`]: concurrent calls with retry, deadlines and block pinning
//! - [`exporter`]: method, contract and derived metric exporters
//! - [`datastore`]: the [`MetricSink`] boundary and spawned writes
//! - [`poll`]: the periodic cycle driver
//! - [`config`]: JSON / YAML configuration and validation
//!
//! The node client, token list source and datastore are traits; concrete
//! implementations live in `chainmetrics-rpc` and `chainmetrics-storage`.

pub mod abi;
pub mod clock;
pub mod config;
pub mod contract;
pub mod datastore;
pub mod error;
pub mod exporter;
pub mod int;
pub mod metric;
pub mod node;
pub mod policy;
pub mod poll;
pub mod processor;
pub mod scale;
pub mod tokenlist;

pub use abi::{DecodedValue, OutputShape, Value, ValueType};
pub use clock::{Clock, TokioClock};
pub use config::{ExportPlan, ExporterConfig};
pub use contract::{Contract, ContractMethod, MethodOptions};
pub use datastore::{MetricSink, SinkDispatcher, WriteOutcome};
pub use error::{
    ArithmeticError, ConfigError, ContractError, DecodeError, DuplicateMethodError, MethodFailure, NodeError,
    NodeErrorKind, TokenListError, TypeMismatchError, UnknownScaleError, WriteFailure,
};
pub use exporter::{ContractExporter, DerivedMetric, MethodExporter, SkipReport, UnknownScalePolicy};
pub use int::{EvmInt, IntType};
pub use metric::Metric;
pub use node::{BlockContext, BlockTag, NodeClient};
pub use poll::{CycleReport, Poller};
pub use processor::{BlockMode, CycleResults, DecodedResult, Processor, ProcessorConfig};
pub use scale::{ScaleFactor, ScaleResolver, ScaleSpec};
pub use tokenlist::{TokenList, TokenListEntry, TokenListLoader, TokenListResolver, TokenSnapshot};
