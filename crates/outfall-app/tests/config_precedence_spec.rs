use std::{
    env,
    ffi::{OsStr, OsString},
    fs,
    path::Path,
    sync::{Mutex, OnceLock},
};

use tempfile::TempDir;
use outfall_app::config;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const TRACKED: [&str; 8] = [
    "HOME",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "OUTFALL_ETC_CONFIG_DIR",
    "OUTFALL_CONFIG_FILE",
    "OUTFALL__SERVICE__BASE_URL",
    "OUTFALL__HARVEST__REGIONS",
    "OUTFALL__HARVEST__FIRST_YEAR",
];

fn env_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("config env mutex poisoned")
}

fn snapshot_env(vars: &[&'static str]) -> Vec<(&'static str, Option<OsString>)> {
    vars.iter().map(|&name| (name, env::var_os(name))).collect()
}

fn restore_env(vars: Vec<(&'static str, Option<OsString>)>) {
    for (name, value) in vars {
        match value {
            Some(val) => set_var(name, val),
            None => remove_var(name),
        }
    }
}

fn write_base_url(path: &Path, url: &str) {
    debug_assert!(!url.is_empty());
    fs::write(path, format!("[service]\nbase_url = \"{url}\"\n")).expect("write config file");
}

fn set_var(name: &str, value: impl AsRef<OsStr>) {
    unsafe { env::set_var(name, value) }
}

fn remove_var(name: &str) {
    unsafe { env::remove_var(name) }
}

struct Layers {
    workspace: TempDir,
    etc_path: std::path::PathBuf,
    xdg_path: std::path::PathBuf,
    local_path: std::path::PathBuf,
    override_path: std::path::PathBuf,
}

fn prepare_layers() -> Layers {
    let workspace = TempDir::new().expect("temp workspace");
    let root = workspace.path();
    let etc_root = root.join("etc");
    let xdg_config_root = root.join("xdg_config");
    let xdg_data_root = root.join("xdg_data");
    let local_config_dir = root.join("config");

    fs::create_dir_all(etc_root.join("outfall")).expect("create etc dir");
    fs::create_dir_all(xdg_config_root.join("outfall")).expect("create xdg dir");
    fs::create_dir_all(&local_config_dir).expect("create local config dir");

    env::set_current_dir(root).expect("change to workspace");
    set_var("HOME", root);
    set_var("XDG_CONFIG_HOME", &xdg_config_root);
    set_var("XDG_DATA_HOME", &xdg_data_root);
    set_var("OUTFALL_ETC_CONFIG_DIR", &etc_root);

    Layers {
        etc_path: etc_root.join("outfall").join("settings.toml"),
        xdg_path: xdg_config_root.join("outfall").join("settings.toml"),
        local_path: local_config_dir.join("settings.toml"),
        override_path: root.join("override.toml"),
        workspace,
    }
}

#[test]
fn config_precedence_follows_documented_order() {
    let _guard = env_guard();
    let env_snapshot = snapshot_env(&TRACKED);
    let original_dir = env::current_dir().expect("capture current dir");
    for name in TRACKED {
        remove_var(name);
    }

    let layers = prepare_layers();
    set_var("OUTFALL_CONFIG_FILE", &layers.override_path);

    write_base_url(&layers.etc_path, "http://etc.example/echo/");
    write_base_url(&layers.xdg_path, "http://xdg.example/echo/");
    write_base_url(&layers.local_path, "http://local.example/echo/");
    write_base_url(&layers.override_path, "http://override.example/echo/");

    set_var("OUTFALL__SERVICE__BASE_URL", "http://env.example/echo/");
    let config_env = config::load().expect("load config with env override");
    assert_eq!(config_env.service.base_url, "http://env.example/echo/");

    remove_var("OUTFALL__SERVICE__BASE_URL");
    let config_override = config::load().expect("load config with override file");
    assert_eq!(config_override.service.base_url, "http://override.example/echo/");

    remove_var("OUTFALL_CONFIG_FILE");
    let config_local = config::load().expect("load config from local config");
    assert_eq!(config_local.service.base_url, "http://local.example/echo/");

    fs::remove_file(&layers.local_path).expect("remove local config");
    let config_xdg = config::load().expect("load config from xdg config");
    assert_eq!(config_xdg.service.base_url, "http://xdg.example/echo/");

    fs::remove_file(&layers.xdg_path).expect("remove xdg config");
    let config_etc = config::load().expect("load config from etc");
    assert_eq!(config_etc.service.base_url, "http://etc.example/echo/");
    assert_eq!(
        config_etc.storage.data_dir,
        layers.workspace.path().join("xdg_data").join("outfall")
    );

    env::set_current_dir(&original_dir).expect("restore current dir");
    restore_env(env_snapshot);
}

#[test]
fn environment_lists_and_numbers_are_parsed() {
    let _guard = env_guard();
    let env_snapshot = snapshot_env(&TRACKED);
    let original_dir = env::current_dir().expect("capture current dir");
    for name in TRACKED {
        remove_var(name);
    }

    let _layers = prepare_layers();
    set_var("OUTFALL__HARVEST__REGIONS", "oh,al");
    set_var("OUTFALL__HARVEST__FIRST_YEAR", "2005");

    let cfg = config::load().expect("load config from env");
    let regions: Vec<String> = cfg
        .regions()
        .expect("regions parse")
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(regions, vec!["OH", "AL"]);
    assert_eq!(cfg.years(), 2005..=2025);

    set_var("OUTFALL__HARVEST__FIRST_YEAR", "2030");
    assert!(config::load().is_err(), "inverted year range must be rejected");

    env::set_current_dir(&original_dir).expect("restore current dir");
    restore_env(env_snapshot);
}
