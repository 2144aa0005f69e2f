//! Compiler option structs.
//!
//! Options are plain builder-style structs - configuration files, CLI
//! flags and environment lookups are the embedder's business.

use serde::{Deserialize, Serialize};

use crate::hashing::{HashDigest, HashFunction};
use crate::util::semaphore::DEFAULT_PARALLELISM;

/// Top-level options consulted by the compilation core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerOptions {
    /// Upper bound on concurrent factory calls and module builds.
    pub parallelism: usize,

    /// Fail the outermost future on the first error instead of
    /// accumulating it.
    pub bail: bool,

    /// Record per-module timing (factory, build, dependency walk).
    pub profile: bool,

    pub output: OutputOptions,
}

impl CompilerOptions {
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_bail(mut self, bail: bool) -> Self {
        self.bail = bail;
        self
    }

    pub fn with_profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_output(mut self, output: OutputOptions) -> Self {
        self.output = output;
        self
    }
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            bail: false,
            profile: false,
            output: OutputOptions::default(),
        }
    }
}

/// Output naming and hashing options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputOptions {
    /// Filename template for chunks with a runtime.
    pub filename: String,

    /// Filename template for on-demand chunks.
    pub chunk_filename: String,

    pub hash_function: HashFunction,
    pub hash_digest: HashDigest,

    /// Prefix length taken from full digests for rendered hashes.
    pub hash_digest_length: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_salt: Option<String>,
}

impl OutputOptions {
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_chunk_filename(mut self, chunk_filename: impl Into<String>) -> Self {
        self.chunk_filename = chunk_filename.into();
        self
    }

    pub fn with_hash_function(mut self, hash_function: HashFunction) -> Self {
        self.hash_function = hash_function;
        self
    }

    pub fn with_hash_digest_length(mut self, hash_digest_length: usize) -> Self {
        self.hash_digest_length = hash_digest_length;
        self
    }

    pub fn with_hash_salt(mut self, hash_salt: impl Into<String>) -> Self {
        self.hash_salt = Some(hash_salt.into());
        self
    }
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            filename: "[name].js".to_string(),
            chunk_filename: "[id].[chunkhash].js".to_string(),
            hash_function: HashFunction::default(),
            hash_digest: HashDigest::default(),
            hash_digest_length: 20,
            hash_salt: None,
        }
    }
}

/// Options handed to the resolver factory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveOptions {
    /// Extensions tried for extensionless requests, in order.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Directories searched for bare requests, in order.
    #[serde(default)]
    pub modules: Vec<String>,
}
