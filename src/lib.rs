// Library root
// ------------
// Client side of the classinet image inference service, plus the pieces the
// `classinet` command line program is built from.
//
// Module responsibilities:
// - `api`: client facade (`Client`, `Model`) over the `InferenceService`
//   contract the remote service satisfies.
// - `http`: blocking HTTP binding of that contract.
// - `workers`: thread pool behind async inference.
// - `batch`: completion barrier and statistics for a batch of inferences.
// - `config` / `obscure`: the local default-value store and its file
//   encoding.
// - `cli`: command line parsing; `ui`: the per-action flows.
// - `metadata`, `hints`, `error`: shared data types.
pub mod api;
pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod hints;
pub mod http;
pub mod metadata;
pub mod obscure;
pub mod ui;
pub mod workers;

pub use api::{Client, ClientState, Credentials, InferenceCallback, InferenceService, Model};
pub use error::{ClassinetError, Result};
pub use metadata::ModelMetadata;
