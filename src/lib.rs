//! # matrix-vault: Design Matrix and Model Artifact Storage
//!
//! Persists the tabular training/evaluation matrices and trained model
//! artifacts of a model-development pipeline on interchangeable backends
//! (local filesystem, S3, in-memory object store).
//!
//! ## Layers
//!
//! - [`storage`]: whole-object byte stores, one per location
//! - [`ProjectStorage`]: picks the backend from the project root and hands
//!   out stores beneath it
//! - [`matrix`]: a design matrix bound to its metadata sidecar, with CSV
//!   (gzip) and Parquet encodings and a scoped in-memory cache
//! - [`model`]: content-hash-keyed model artifacts with a scoped cache
//!
//! All operations are blocking. Instances are not synchronized; use one
//! per worker.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use matrix_vault::matrix::MatrixFormat;
//! use matrix_vault::ProjectStorage;
//!
//! let project = ProjectStorage::new("s3://my-bucket/project")?;
//!
//! let mut matrix_store = project.matrix_store(&["matrices"], "f3c1a9", MatrixFormat::Parquet)?;
//! {
//!     let mut cached = matrix_store.cache();
//!     println!("features: {:?}", cached.columns()?);
//!     println!("as of: {:?}", cached.as_of_dates()?);
//! }
//!
//! let mut models = project.model_storage_engine::<Vec<f64>>();
//! if models.exists("5d41402abc4b2a76")? {
//!     let coefficients = models.load("5d41402abc4b2a76")?;
//!     println!("{} coefficients", coefficients.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;
pub mod matrix;
pub mod model;
pub mod project;
pub mod storage;

pub use error::{Error, Result};
pub use matrix::{MatrixFormat, MatrixStore};
pub use model::ModelStorageEngine;
pub use project::{ProjectStorage, ProjectStorageBuilder};
