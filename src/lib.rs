//! # parmap
//!
//! Backend-agnostic parallel map. A [`Session`] is started on one of six
//! backends (local, multicore, socket, MPI or one of two batch queue
//! generations) and then maps a unit function over zipped input vectors,
//! returning results in input order.
//!
//! ```no_run
//! use parmap::{unit_fn, Inputs, MapOptions, ParmapConfig, Session};
//! use serde_json::json;
//!
//! # async fn demo() -> parmap::error::Result<()> {
//! let session = Session::with_config(ParmapConfig::multicore(4)).await?;
//! let square = unit_fn(|args, _| {
//!     let x = args[0].as_i64().unwrap_or_default();
//!     Ok(json!(x * x))
//! });
//! let result = session
//!     .map(square, &Inputs::single([1, 2, 3]), &MapOptions::default())
//!     .await?;
//! assert_eq!(result.items(), Some(&[json!(1), json!(4), json!(9)][..]));
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - `dispatch` - Work wrapper, backend selection and result assembly
//! - `backend` - Execution backends and the queue job lifecycle
//! - `session` - Session state: active backend, exports, levels
//! - `config` - Mapping defaults from TOML files and environment
//! - `subprocess` - Child process execution for command units
//! - `cli` / `app` - The `parmap` binary
pub mod app;
pub mod backend;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod session;
pub mod subprocess;

pub use config::{Mode, ParmapConfig};
pub use dispatch::{
    unit_fn, Bindings, Collection, ErrorRecord, ImputeError, Inputs, JobResult, MapOptions,
    MapResult, Simplify, UnitFn,
};
pub use error::{ParmapError, UnitFailure};
pub use session::Session;
