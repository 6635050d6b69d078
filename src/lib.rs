//! Live TV request gate and shared tuner stream broker
//!
//! Two pieces sit in front of a media server's live TV subsystem:
//!
//! - [`auth`]: decides whether a request may proceed, from a validated
//!   identity claim or, for low-sensitivity endpoints, from the caller's
//!   address matching an already authenticated session.
//! - [`registry`]: multiplexes one physical tuner connection to every
//!   consumer of the same live source and closes it when the last consumer
//!   detaches.
//!
//! [`LiveTvGate`] composes the two: a live stream request is authorized
//! first and reaches the registry only when accepted.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tokio_util::sync::CancellationToken;
//! use tuner_gate::auth::{Authorizer, ClaimValidator, SetupFlag};
//! use tuner_gate::registry::{LiveStreamRequest, TunerSource};
//! use tuner_gate::session::{RequestContext, SessionRegistry};
//! use tuner_gate::LiveTvGate;
//!
//! async fn serve(
//!     tuner: Arc<dyn TunerSource>,
//!     ctx: RequestContext,
//!     request: LiveStreamRequest,
//! ) -> tuner_gate::Result<()> {
//!     let validator = ClaimValidator::new(Arc::new(SetupFlag::new(true)));
//!     let authorizer = Authorizer::new(validator, Arc::new(SessionRegistry::new()));
//!     let gate = LiveTvGate::new(authorizer, tuner);
//!
//!     let consumer = gate
//!         .open_live_stream(&ctx, &request, CancellationToken::new())
//!         .await?;
//!     let mut reader = consumer.reader()?;
//!     while let Some(chunk) = reader.next_chunk().await {
//!         // write chunk to the client
//!         let _ = chunk;
//!     }
//!     gate.close_live_stream(consumer).await
//! }
//! ```

pub mod auth;
pub mod error;
pub mod gate;
pub mod registry;
pub mod session;
pub mod stats;

pub use error::{Error, Result};
pub use gate::LiveTvGate;
pub use registry::{LiveSourceRegistry, RegistryConfig};
