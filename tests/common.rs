//! Test utilities & fixtures.
//! Builds throwaway data directories with definition files and a service over them.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use veramon::config::Config;
use veramon::quests::QuestService;

/// Path to the seed definitions shipped with the binary.
#[allow(dead_code)]
pub fn seeds_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("seeds")
}

/// Config whose storage and definition directories all live under `root`.
#[allow(dead_code)]
pub fn config_in(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = root.join("data").to_string_lossy().into_owned();
    config.quests.definitions_dir = root.join("quests").to_string_lossy().into_owned();
    config.events.definitions_dir = root.join("events").to_string_lossy().into_owned();
    config.logging.file = None;
    config
}

/// Write `body` to `<root>/<relative>`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, body: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create dirs");
    }
    std::fs::write(path, body).expect("write fixture");
}

/// Fresh temp dir plus a service over whatever definitions `setup` writes into it.
#[allow(dead_code)]
pub fn service_with<F: FnOnce(&Path)>(setup: F) -> (TempDir, QuestService) {
    let tmp = TempDir::new().expect("tempdir");
    setup(tmp.path());
    let service = QuestService::open(&config_in(tmp.path())).expect("open service");
    (tmp, service)
}
