//! A small Rust client for the ENA Portal search API.
//!
//! This crate fetches sequencing-run metadata for a taxon and library strategy:
//! build a query, POST it once with bounded retry, then stream the response to a file or
//! stdout without holding it in memory, optionally tallying a summary on the way.
//!
//! ## Quick start
//! - Optionally point the client at a mirror via `ENATRIEVE_URL` or a `.enatrieverc` file
//!   (supported in the current directory and in your home directory).
//! - Describe the query with [`QuerySpec`] and run a [`Retrieval`].
//!
//! ```no_run
//! use anyhow::Result;
//! use enatrieve::{Client, OutputFormat, OutputTarget, QuerySpec, Retrieval};
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_env()?;
//!     let query = QuerySpec::new("562", "RNA-Seq", false)?;
//!
//!     let mut retrieval = Retrieval::new(query, OutputTarget::parse("ecoli.tsv"));
//!     retrieval.format = OutputFormat::Tsv;
//!     retrieval.limit = 100;
//!     retrieval.summary = true;
//!
//!     let outcome = retrieval.run(&client)?;
//!     if let Some(summary) = outcome.summary {
//!         summary.write_report(&mut std::io::stderr())?;
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

mod client;
mod config;
mod error;
mod payload;
mod query;
mod retrieve;
mod stream;
mod summary;
mod transport;
mod util;

pub use client::{Client, ClientConfig, DEFAULT_URL, FetchResponse, RetryPolicy, Sleeper};
pub use error::{Error, ErrorKind, Result};
pub use payload::{OutputFormat, RESULT_TYPE, RequestPayload};
pub use query::{FIELDS, QuerySpec, TaxonomyOperator, build_query, fields_param};
pub use retrieve::{Retrieval, RetrievalOutcome};
pub use stream::{OutputSink, OutputTarget, StreamStats, StreamWriter, write_response};
pub use summary::{Category, LONG_READ_PLATFORMS, ResultRecord, SummaryAggregator, SummaryStats};
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};
pub use util::default_output_name;
