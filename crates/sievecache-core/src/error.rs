use std::path::PathBuf;

use crate::types::Stage;

/// Unified error type covering all failure modes across the sievecache symbol cache.
///
/// Configuration-time errors (`DuplicateName`, `UnknownDependency`, `CrossStageEdge`)
/// are fatal to `finalize()` but never to the process: the host decides whether to
/// run with a degraded cache. Recoverable resolution findings (an unbound virtual
/// parent, a broken dependency cycle) are reported as diagnostics on the finalized
/// cache instead of failing it. Per-message conditions (deadline, cancellation,
/// denied conditions) are item outcomes, not errors, and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    // === Registration errors ===
    /// A symbol name was registered twice with incompatible definitions.
    #[error("Duplicate symbol name: {name}. Every symbol name must be unique; rename one definition.")]
    DuplicateName {
        /// The colliding symbol name.
        name: String,
    },

    /// A virtual symbol references a parent that was never registered.
    #[error("Virtual symbol {child} references unknown parent {parent}. Register the parent callback first.")]
    UnknownParent {
        /// Name of the virtual symbol.
        child: String,
        /// The missing parent name.
        parent: String,
    },

    /// A dependency references a symbol that was never registered.
    #[error("Dependency from {from} targets unknown symbol {to}. Register {to} or drop the dependency.")]
    UnknownDependency {
        /// The symbol declaring the dependency.
        from: String,
        /// The missing target name.
        to: String,
    },

    /// A registration-surface call referenced a symbol that does not exist.
    #[error("Unknown symbol: {name}. Register it before configuring it.")]
    UnknownSymbol {
        /// The missing symbol name.
        name: String,
    },

    /// A condition was attached to a virtual alias.
    #[error("Symbol {name} is a virtual alias and cannot carry conditions; attach them to its parent.")]
    VirtualCondition {
        /// The virtual symbol name.
        name: String,
    },

    // === Resolution errors ===
    /// A dependency edge crosses stage partitions.
    #[error(
        "Dependency from {from} ({from_stage}) to {to} ({to_stage}) crosses stages. \
         Dependencies must stay within one stage; split the symbol or move it."
    )]
    CrossStageEdge {
        /// The symbol declaring the dependency.
        from: String,
        /// Stage of the declaring symbol.
        from_stage: Stage,
        /// The dependency target.
        to: String,
        /// Stage of the target symbol.
        to_stage: Stage,
    },

    /// A dependency cycle was found and broken by disabling one participant.
    ///
    /// Reported as a diagnostic: the cache still finalizes with the named
    /// symbol disabled.
    #[error("Dependency cycle through {cycle:?}; disabled {disabled} to break it.")]
    DependencyCycle {
        /// Symbols on the cycle, in traversal order.
        cycle: Vec<String>,
        /// The symbol chosen for disabling (lowest priority, then highest id).
        disabled: String,
    },

    // === Snapshot errors ===
    /// The stats snapshot file is corrupted (bad magic, CRC mismatch, truncated).
    #[error("Stats snapshot corrupted at {path}: {detail}. Delete the file to start cold.")]
    SnapshotCorrupted {
        /// Path to the corrupted file.
        path: PathBuf,
        /// Nature of the corruption.
        detail: String,
    },

    /// The snapshot format version does not match what this build expects.
    #[error(
        "Stats snapshot version mismatch: expected v{expected}, found v{found}. \
         Delete the file to start cold."
    )]
    SnapshotVersionMismatch {
        /// The version this library expects.
        expected: u16,
        /// The version found in the file.
        found: u16,
    },

    /// An I/O error with path context.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Configuration errors ===
    /// A configuration value is out of range or inconsistent.
    #[error("Invalid configuration: {detail}")]
    InvalidConfig {
        /// What is wrong and what range is accepted.
        detail: String,
    },
}

/// Convenience alias used across all sievecache crates.
pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    /// Wrap an `io::Error` with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for findings the resolver downgrades to diagnostics instead of
    /// failing `finalize()`.
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            Self::DependencyCycle { .. } | Self::UnknownParent { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offenders() {
        let err = CacheError::DuplicateName {
            name: "R_DKIM_ALLOW".into(),
        };
        assert!(err.to_string().contains("R_DKIM_ALLOW"));

        let err = CacheError::CrossStageEdge {
            from: "A".into(),
            from_stage: Stage::Pre,
            to: "B".into(),
            to_stage: Stage::Filter,
        };
        let msg = err.to_string();
        assert!(msg.contains('A') && msg.contains('B'));
        assert!(msg.contains("pre") && msg.contains("filter"));
    }

    #[test]
    fn diagnostic_classification() {
        assert!(
            CacheError::DependencyCycle {
                cycle: vec!["A".into(), "B".into()],
                disabled: "B".into(),
            }
            .is_diagnostic()
        );
        assert!(
            CacheError::UnknownParent {
                child: "V".into(),
                parent: "P".into(),
            }
            .is_diagnostic()
        );
        assert!(
            !CacheError::DuplicateName { name: "X".into() }.is_diagnostic()
        );
    }

    #[test]
    fn io_wrapper_keeps_path() {
        let err = CacheError::io(
            "/tmp/stats.svcs",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/stats.svcs"));
    }
}
