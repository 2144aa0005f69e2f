//! Content hashing for modules, chunks and the whole compilation.
//!
//! Hashes are deterministic: given the same module graph, templates and
//! options, `hash` and `full_hash` are byte-identical across runs. The
//! feeding order below is load-bearing - runtime chunks incorporate the
//! hashes of non-runtime chunks, so non-runtime chunks are hashed first.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::chunk::ChunkKey;
use crate::compilation::Compilation;
use crate::module_graph::ModuleId;
use crate::{Error, Result};

/// Cryptographic digest selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashFunction {
    #[default]
    Sha256,
    Blake3,
}

impl HashFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }
}

impl std::str::FromStr for HashFunction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(Error::UnsupportedHashFunction(other.to_string())),
        }
    }
}

impl fmt::Display for HashFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digest encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashDigest {
    #[default]
    Hex,
}

/// An in-progress digest with `update`/`digest` semantics.
///
/// Module and template implementations feed whatever identifies their
/// content; the engine owns creation and finalisation.
pub enum CompilationHasher {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl CompilationHasher {
    pub fn new(function: HashFunction) -> Self {
        match function {
            HashFunction::Sha256 => Self::Sha256(Sha256::new()),
            HashFunction::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        match self {
            Self::Sha256(hasher) => hasher.update(data.as_ref()),
            Self::Blake3(hasher) => {
                hasher.update(data.as_ref());
            }
        }
    }

    pub fn digest(self, encoding: HashDigest) -> String {
        let bytes = match self {
            Self::Sha256(hasher) => hasher.finalize().to_vec(),
            Self::Blake3(hasher) => hasher.finalize().as_bytes().to_vec(),
        };
        match encoding {
            HashDigest::Hex => hex_encode(&bytes),
        }
    }
}

impl fmt::Debug for CompilationHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256(_) => f.write_str("CompilationHasher::Sha256"),
            Self::Blake3(_) => f.write_str("CompilationHasher::Blake3"),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn truncated(digest: &str, length: usize) -> String {
    digest[..length.min(digest.len())].to_string()
}

impl Compilation {
    /// Compute module, chunk and compilation hashes.
    ///
    /// Order: compilation-level inputs (salt, templates, children,
    /// diagnostics), then every module in insertion order, then every
    /// chunk with non-runtime chunks first, folding each chunk hash into
    /// the compilation hash.
    pub fn create_hash(&mut self) -> Result<()> {
        let output = self.options.output.clone();
        let function = output.hash_function;
        let digest_length = output.hash_digest_length;

        let mut compilation_hasher = CompilationHasher::new(function);
        if let Some(salt) = &output.hash_salt {
            compilation_hasher.update(salt.as_bytes());
        }
        self.main_template.update_hash(&mut compilation_hasher);
        self.chunk_template.update_hash(&mut compilation_hasher);
        // BTreeMap iteration gives the sorted key order the contract asks for.
        for template in self.module_templates.values() {
            template.update_hash(&mut compilation_hasher);
        }
        for child in &self.children {
            if let Some(hash) = &child.hash {
                compilation_hasher.update(hash.as_bytes());
            }
        }
        for warning in &self.warnings {
            compilation_hasher.update(warning.message.as_bytes());
        }
        for error in &self.errors {
            compilation_hasher.update(error.message.as_bytes());
        }

        let module_ids: Vec<ModuleId> = self.module_graph.module_ids().collect();
        for id in module_ids {
            let mut hasher = CompilationHasher::new(function);
            self.module_graph.module(id).update_hash(&mut hasher);
            let digest = hasher.digest(output.hash_digest);
            let node = self.module_graph.node_mut(id);
            node.rendered_hash = Some(truncated(&digest, digest_length));
            node.hash = Some(digest);
        }

        // Runtime chunks fold other chunks' hashes in via their template,
        // so they must be hashed last. The sort is stable; ties keep
        // chunk order.
        let mut chunk_keys: Vec<ChunkKey> = self.chunk_graph.keys().collect();
        chunk_keys.sort_by_key(|key| self.chunk_graph.chunk(*key).has_runtime());
        let hooks = Arc::clone(&self.hooks);
        for key in chunk_keys {
            let mut hasher = CompilationHasher::new(function);
            if let Some(salt) = &output.hash_salt {
                hasher.update(salt.as_bytes());
            }
            {
                let chunk = self.chunk_graph.chunk(key);
                chunk.update_hash(&mut hasher, &self.module_graph);
                if chunk.has_runtime() {
                    self.main_template.update_hash_for_chunk(&mut hasher, chunk);
                } else {
                    self.chunk_template.update_hash_for_chunk(&mut hasher, chunk);
                }
            }
            hooks
                .chunk_hash
                .call_with(self.chunk_graph.chunk_mut(key), &mut hasher);
            let digest = hasher.digest(output.hash_digest);
            compilation_hasher.update(digest.as_bytes());
            let chunk = self.chunk_graph.chunk_mut(key);
            chunk.rendered_hash = Some(truncated(&digest, digest_length));
            chunk.hash = Some(digest);
        }

        let full_hash = compilation_hasher.digest(output.hash_digest);
        self.hash = Some(truncated(&full_hash, digest_length));
        self.full_hash = Some(full_hash);
        Ok(())
    }

    /// Fold an extra update into the compilation hash by re-digesting
    /// `full_hash || update`.
    pub fn modify_hash(&mut self, update: &str) {
        let output = &self.options.output;
        let mut hasher = CompilationHasher::new(output.hash_function);
        if let Some(full_hash) = &self.full_hash {
            hasher.update(full_hash.as_bytes());
        }
        hasher.update(update.as_bytes());
        let full_hash = hasher.digest(output.hash_digest);
        self.hash = Some(truncated(&full_hash, output.hash_digest_length));
        self.full_hash = Some(full_hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_function_parses() {
        assert_eq!("sha256".parse::<HashFunction>().unwrap(), HashFunction::Sha256);
        assert_eq!("SHA-256".parse::<HashFunction>().unwrap(), HashFunction::Sha256);
        assert_eq!("blake3".parse::<HashFunction>().unwrap(), HashFunction::Blake3);
        assert!("md5".parse::<HashFunction>().is_err());
    }

    #[test]
    fn test_digests_are_deterministic() {
        for function in [HashFunction::Sha256, HashFunction::Blake3] {
            let mut a = CompilationHasher::new(function);
            let mut b = CompilationHasher::new(function);
            a.update("content");
            b.update("content");
            assert_eq!(a.digest(HashDigest::Hex), b.digest(HashDigest::Hex));
        }
    }

    #[test]
    fn test_digests_differ_across_functions() {
        let mut sha = CompilationHasher::new(HashFunction::Sha256);
        let mut blake = CompilationHasher::new(HashFunction::Blake3);
        sha.update("content");
        blake.update("content");
        assert_ne!(sha.digest(HashDigest::Hex), blake.digest(HashDigest::Hex));
    }

    #[test]
    fn test_hex_encoding() {
        assert_eq!(hex_encode(&[0x00, 0xff, 0x10]), "00ff10");
    }

    #[test]
    fn test_truncation_clamps_to_digest_length() {
        assert_eq!(truncated("abcdef", 4), "abcd");
        assert_eq!(truncated("ab", 20), "ab");
    }
}
