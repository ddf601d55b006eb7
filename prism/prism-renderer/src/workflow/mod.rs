//! Content-addressed cache for expensive, deterministic preprocessing (shader compilation,
//! irradiance projection). A result is stored under the SHA-256 of the workflow name, the
//! canonical JSON of its input and its source bytes.

mod irradiance;
mod shader;

pub use irradiance::{cube_face_direction, IrradianceInput, IrradianceWorkflow, ShCoefficients};
pub use shader::{compile_wgsl, load_shader, ShaderInput, ShaderKind, ShaderWorkflow};

use crate::config::CacheConfig;
use crate::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// A deterministic computation whose output can be persisted.
pub trait Workflow {
    const NAME: &'static str;
    type Input: Serialize;
    type Output;

    /// Bytes the output depends on besides the input (shader text, pixel data).
    fn source(&self, input: &Self::Input) -> Result<Vec<u8>>;
    fn work(&mut self, input: &Self::Input) -> Result<Self::Output>;
    fn encode(output: &Self::Output) -> Vec<u8>;
    fn decode(key: &str, bytes: &[u8]) -> Result<Self::Output>;
}

#[derive(Debug, Clone)]
pub struct WorkflowCache {
    directory: PathBuf,
    config: Option<CacheConfig>,
}

impl WorkflowCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self { directory: config.directory.clone(), config: Some(config.clone()) }
    }

    /// Cache that never reads or writes; every `start` runs the work.
    pub fn disabled() -> Self {
        Self { directory: PathBuf::new(), config: None }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn enabled_for(&self, workflow: &str) -> bool {
        self.config.as_ref().is_some_and(|c| c.enabled_for(workflow))
    }

    /// Hex SHA-256 over the workflow name, canonical JSON input and source bytes.
    pub fn key<W: Workflow>(workflow: &W, input: &W::Input) -> Result<String> {
        // serde_json::Value keeps object keys sorted, which makes the encoding canonical.
        let canonical = serde_json::to_vec(&serde_json::to_value(input)?)?;
        let mut hasher = Sha256::new();
        hasher.update(W::NAME.as_bytes());
        hasher.update([0u8]);
        hasher.update(&canonical);
        hasher.update([0u8]);
        hasher.update(workflow.source(input)?);
        Ok(hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}.bin", key))
    }

    /// Return the cached output for `input`, or run the workflow and persist its output.
    pub fn start<W: Workflow>(&self, workflow: &mut W, input: &W::Input) -> Result<W::Output> {
        if !self.enabled_for(W::NAME) {
            return workflow.work(input);
        }
        let key = Self::key(workflow, input)?;
        let path = self.path_for(&key);
        if let Ok(bytes) = std::fs::read(&path) {
            match W::decode(&key, &bytes) {
                Ok(output) => {
                    log::debug!("workflow {}: cache hit {}", W::NAME, key);
                    return Ok(output);
                }
                Err(e) => log::warn!("workflow {}: discarding cache entry: {}", W::NAME, e),
            }
        } else {
            log::debug!("workflow {}: cache miss {}", W::NAME, key);
        }

        let output = workflow.work(input)?;
        if let Err(e) = self.persist(&path, &W::encode(&output)) {
            log::warn!("workflow {}: could not write {}: {}", W::NAME, path.display(), e);
        }
        Ok(output)
    }

    fn persist(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.directory)?;
        let partial = path.with_extension("partial");
        std::fs::write(&partial, bytes)?;
        std::fs::rename(&partial, path)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::RenderError;
    use serde::Serialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fresh directory under the system temp dir, unique per call.
    pub(crate) fn scratch_dir(tag: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "prism-{}-{}-{}",
            tag,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[derive(Serialize)]
    struct Square {
        value: u32,
        label: &'static str,
    }

    #[derive(Default)]
    struct Squaring {
        calls: usize,
    }

    impl Workflow for Squaring {
        const NAME: &'static str = "square";
        type Input = Square;
        type Output = u64;

        fn source(&self, _input: &Square) -> Result<Vec<u8>> {
            Ok(b"x * x".to_vec())
        }

        fn work(&mut self, input: &Square) -> Result<u64> {
            self.calls += 1;
            Ok(u64::from(input.value) * u64::from(input.value))
        }

        fn encode(output: &u64) -> Vec<u8> {
            output.to_le_bytes().to_vec()
        }

        fn decode(key: &str, bytes: &[u8]) -> Result<u64> {
            let bytes: [u8; 8] = bytes.try_into().map_err(|_| RenderError::CacheDecode {
                key: key.to_string(),
                message: format!("expected 8 bytes, found {}", bytes.len()),
            })?;
            Ok(u64::from_le_bytes(bytes))
        }
    }

    fn cache(dir: &Path) -> WorkflowCache {
        WorkflowCache::new(&CacheConfig { directory: dir.to_path_buf(), ..Default::default() })
    }

    #[test]
    fn second_start_is_served_from_disk() {
        let dir = scratch_dir("roundtrip");
        let cache = cache(&dir);
        let mut workflow = Squaring::default();
        let input = Square { value: 12, label: "a" };
        let first = cache.start(&mut workflow, &input).unwrap();
        let second = cache.start(&mut workflow, &input).unwrap();
        assert_eq!(first, 144);
        assert_eq!(first, second);
        assert_eq!(workflow.calls, 1);
        let key = WorkflowCache::key(&workflow, &input).unwrap();
        assert_eq!(key.len(), 64);
        assert!(cache.path_for(&key).exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn keys_depend_on_input() {
        let workflow = Squaring::default();
        let a = WorkflowCache::key(&workflow, &Square { value: 1, label: "a" }).unwrap();
        let b = WorkflowCache::key(&workflow, &Square { value: 1, label: "b" }).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, WorkflowCache::key(&workflow, &Square { value: 1, label: "a" }).unwrap());
    }

    #[test]
    fn corrupt_entries_are_recomputed_and_replaced() {
        let dir = scratch_dir("corrupt");
        let cache = cache(&dir);
        let mut workflow = Squaring::default();
        let input = Square { value: 3, label: "c" };
        let key = WorkflowCache::key(&workflow, &input).unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(cache.path_for(&key), b"bad").unwrap();

        assert_eq!(cache.start(&mut workflow, &input).unwrap(), 9);
        assert_eq!(workflow.calls, 1);
        assert_eq!(std::fs::read(cache.path_for(&key)).unwrap(), 9u64.to_le_bytes());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn disabled_cache_always_works() {
        let cache = WorkflowCache::disabled();
        let mut workflow = Squaring::default();
        let input = Square { value: 2, label: "d" };
        cache.start(&mut workflow, &input).unwrap();
        cache.start(&mut workflow, &input).unwrap();
        assert_eq!(workflow.calls, 2);
    }

    #[test]
    fn per_workflow_flag_bypasses_the_cache() {
        let dir = scratch_dir("flag");
        let cache = WorkflowCache::new(&CacheConfig { directory: dir.clone(), shaders: false, ..Default::default() });
        assert!(!cache.enabled_for("shader"));
        assert!(cache.enabled_for("square"));
    }
}
