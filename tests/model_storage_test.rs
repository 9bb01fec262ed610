//! Integration tests for model artifact storage

use matrix_vault::storage::ByteStore;
use matrix_vault::{Error, ModelStorageEngine, ProjectStorage, Result};
use object_store::memory::InMemory;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LogisticModel {
    intercept: f64,
    coefficients: Vec<(String, f64)>,
}

fn model() -> LogisticModel {
    LogisticModel {
        intercept: -0.25,
        coefficients: vec![("k_feature".to_string(), 1.5), ("m_feature".to_string(), -0.75)],
    }
}

fn engine() -> (ProjectStorage, ModelStorageEngine<LogisticModel>) {
    let project = ProjectStorage::builder("memory://fake-models-bucket/project")
        .object_store(Arc::new(InMemory::new()))
        .build()
        .unwrap();
    let engine = project.model_storage_engine();
    (project, engine)
}

/// Remove the stored artifact behind the engine's back.
fn remove_from_backend(project: &ProjectStorage, key: &str) {
    project
        .get_store(&["trained_models", key])
        .unwrap()
        .delete()
        .unwrap();
}

#[test]
fn test_model_storage_nocaching() {
    let (_project, mut mse) = engine();
    mse.write(model(), "myhash").unwrap();

    assert!(mse.exists("myhash").unwrap());
    assert_eq!(*mse.load("myhash").unwrap(), model());
    assert_eq!(mse.cached_len(), 0);
}

#[test]
fn test_model_storage_caching() {
    let (project, mut mse) = engine();
    {
        let mut cached = mse.cache_models();
        cached.write(model(), "myhash").unwrap();
        remove_from_backend(&project, "myhash");

        // Served from the cache, so the backend is never consulted
        assert_eq!(*cached.load("myhash").unwrap(), model());
        // exists always asks the backend
        assert!(!cached.exists("myhash").unwrap());
    }

    assert!(!mse.is_cached("myhash"));
    assert!(mse.load("myhash").unwrap_err().is_not_found());
}

#[test]
fn test_load_in_scope_reads_once() {
    let (project, mut mse) = engine();
    mse.write(model(), "myhash").unwrap();

    let mut cached = mse.cache_models();
    let first = cached.load("myhash").unwrap();
    remove_from_backend(&project, "myhash");
    let second = cached.load("myhash").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_engines_share_backend() {
    let (project, mut writer) = engine();
    writer.write(model(), "shared").unwrap();

    let mut reader: ModelStorageEngine<LogisticModel> = project.model_storage_engine();
    assert_eq!(*reader.load("shared").unwrap(), model());

    let mut elsewhere: ModelStorageEngine<LogisticModel> =
        project.model_storage_engine_in("other_models");
    assert!(!elsewhere.exists("shared").unwrap());
    assert!(elsewhere.load("shared").unwrap_err().is_not_found());
}

#[test]
fn test_cache_cleared_after_panic() {
    let (_project, mut mse) = engine();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let mut cached = mse.cache_models();
        cached.write(model(), "myhash").unwrap();
        panic!("training step failed");
    }));

    assert!(outcome.is_err());
    assert!(!mse.is_caching());
    assert_eq!(mse.cached_len(), 0);
    assert!(mse.exists("myhash").unwrap());
}

#[test]
fn test_cache_cleared_after_error() {
    fn score_batch(mse: &mut ModelStorageEngine<LogisticModel>) -> Result<f64> {
        let mut cached = mse.cache_models();
        cached.write(model(), "present")?;
        let present = cached.load("present")?;
        let missing = cached.load("missing")?;
        Ok(present.intercept + missing.intercept)
    }

    let (_project, mut mse) = engine();
    let err = score_batch(&mut mse).unwrap_err();

    assert!(matches!(err, Error::NotFound { .. }));
    assert!(!mse.is_caching());
    assert!(!mse.is_cached("present"));
}

#[test]
fn test_overwrite_replaces_artifact() {
    let (_project, mut mse) = engine();
    mse.write(model(), "myhash").unwrap();

    let mut retrained = model();
    retrained.intercept = 0.5;
    mse.write(retrained.clone(), "myhash").unwrap();

    assert_eq!(*mse.load("myhash").unwrap(), retrained);
}

#[test]
fn test_filesystem_model_storage() {
    let dir = tempfile::tempdir().unwrap();
    let project = ProjectStorage::new(dir.path().to_str().unwrap()).unwrap();
    let mut mse: ModelStorageEngine<LogisticModel> = project.model_storage_engine();

    mse.write(model(), "abc123").unwrap();

    assert!(dir.path().join("trained_models").join("abc123").is_file());
    assert_eq!(*mse.load("abc123").unwrap(), model());

    mse.delete("abc123").unwrap();
    assert!(!mse.exists("abc123").unwrap());
    mse.delete("abc123").unwrap();
}
