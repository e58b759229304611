pub mod address;
pub mod run;

use spool_primitives::network_directory;
use std::path::{Path, PathBuf};

/// Location of the key file inside the per-network state directory.
pub(crate) fn key_file_path(base_path: &Path, network: bitcoin::Network) -> PathBuf {
    base_path.join(network_directory(network)).join("keys.json")
}
