//! State system data model
//!
//! - **value**: `StateValue`, the payload of an interval
//! - **interval**: `StateInterval`, one value of one attribute over a time span
//! - **collection**: `IntervalCollection`, the transient result of a query
//! - **history**: `StateHistory`, interval storage with point and range queries
//! - **error**: Error types
//!
//! # Example
//!
//! ```rust
//! use tracestate::state::{StateHistory, StateInterval, StateValue};
//!
//! let mut history = StateHistory::new();
//! history.insert(StateInterval::new(0, 99, 0, "idle").unwrap()).unwrap();
//! history.insert(StateInterval::new(100, 199, 0, "busy").unwrap()).unwrap();
//!
//! let interval = history.query_single(150, 0).unwrap().unwrap();
//! assert_eq!(interval.value(), &StateValue::string("busy"));
//! ```

pub mod collection;
pub mod error;
pub mod history;
pub mod interval;
pub mod value;

pub use collection::IntervalCollection;
pub use error::{StateError, StateResult};
pub use history::StateHistory;
pub use interval::{Quark, StateInterval};
pub use value::{StateValue, StateValueType};
