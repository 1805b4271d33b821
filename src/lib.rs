//! Request engine for paginated, rate-limited Canvas-style REST APIs.
//!
//! A logical request ([`RequestDescriptor`]) goes through the [`RequestCoordinator`], which
//! encodes its parameters, serves it from the cache or fetches every page of it, translates
//! upstream failures into [`ApiError`]s and invalidates cached paths after mutations.
//! Business logic lives in endpoint functions bound through [`Api`].
//!
//! ```no_run
//! # async fn demo() -> Result<(), canvas_engine::ApiError> {
//! use canvas_engine::{CanvasClient, Method};
//!
//! let client = CanvasClient::builder("canvas.example.edu")
//!   .access_token("token")
//!   .build()?;
//! let courses = client
//!   .visit(client.request(Method::Get, "/api/v1/courses").param("include", vec!["term"]))
//!   .await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod interpret;
pub mod pager;
pub mod params;
pub mod progress;
pub mod request;
pub mod transport;

pub use cache::{CacheKey, CacheStore, MemoryCache, SqliteCache};
pub use client::{CanvasClient, CanvasClientBuilder};
pub use config::Config;
pub use coordinator::RequestCoordinator;
pub use endpoint::{Api, CallOptions, CoreFuture, EndpointContext, EndpointDef, EndpointRegistry};
pub use error::{ApiError, BoxError, ErrorKind};
pub use params::{ParamValue, Params};
pub use progress::WaitOptions;
pub use request::{Method, RequestDefaults, RequestDescriptor, RequestOverrides};
