pub mod compiler;
pub mod config;
pub mod dataflow;
pub mod error;
pub mod model;
pub mod naming;
pub mod resolution;
pub mod specs;
pub mod sql;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

/// Install a fmt subscriber filtered by `RUST_LOG`. Later calls are no-ops.
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // Another subscriber may already be installed by the host application.
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

pub use compiler::{CompiledQuery, QueryCompiler};
pub use config::SemaqueryConfig;
pub use error::{Result, SemaqueryError};
pub use model::{ManifestLookup, SemanticManifest, SemanticModelLookup};
pub use resolution::{QueryRequest, QuerySpec};
pub use sql::{CteSelection, DuckDbDialect, SqlGenerationOptions};
