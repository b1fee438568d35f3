//! Behaviour-driven tests for packager configuration loading.

use camino::Utf8PathBuf;
use nix2pkg::{CONFIG_FILE_NAME, ConfigError, PackagerConfig};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

#[derive(Default)]
struct ConfigWorld {
    dir: Option<TempDir>,
    result: Option<Result<PackagerConfig, ConfigError>>,
}

#[fixture]
fn world() -> ConfigWorld {
    ConfigWorld {
        dir: Some(TempDir::new().expect("temp dir")),
        ..ConfigWorld::default()
    }
}

fn dir_path(world: &ConfigWorld) -> Utf8PathBuf {
    let dir = world.dir.as_ref().expect("temp dir set");
    Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("temp dir path not UTF-8")
}

fn write_config(world: &ConfigWorld, contents: &str) {
    std::fs::write(dir_path(world).join(CONFIG_FILE_NAME), contents).expect("write config");
}

fn loaded(world: &ConfigWorld) -> &PackagerConfig {
    match world.result.as_ref() {
        Some(Ok(config)) => config,
        Some(Err(error)) => panic!("expected configuration loading to succeed: {error}"),
        None => panic!("configuration should be loaded"),
    }
}

#[given("no configuration file is present")]
fn given_no_file(world: &mut ConfigWorld) {
    let _ = world;
}

#[given("a configuration file setting the store root to \"{root}\"")]
fn given_store_root(world: &mut ConfigWorld, root: String) {
    write_config(world, &format!("store_root = \"{root}\"\n"));
}

#[given("a configuration file enabling fail-fast")]
fn given_fail_fast(world: &mut ConfigWorld) {
    write_config(world, "fail_fast = true\n");
}

#[given("a configuration file with an unknown key")]
fn given_unknown_key(world: &mut ConfigWorld) {
    write_config(world, "relocate_prefix = \"/usr/local\"\n");
}

#[when("the packager configuration is loaded")]
fn when_loaded(world: &mut ConfigWorld) {
    let dir = dir_path(world);
    world.result = Some(PackagerConfig::discover(&dir));
}

#[then("the store root is \"{root}\"")]
fn then_store_root(world: &mut ConfigWorld, root: String) {
    assert_eq!(loaded(world).store_root, Utf8PathBuf::from(root));
}

#[then("component failures do not stop the run")]
fn then_continue_policy(world: &mut ConfigWorld) {
    assert!(!loaded(world).fail_fast);
}

#[then("component failures stop the run")]
fn then_fail_fast_policy(world: &mut ConfigWorld) {
    assert!(loaded(world).fail_fast);
}

#[then("a configuration error mentioning \"{snippet}\" is reported")]
fn then_error_mentions(world: &mut ConfigWorld, snippet: String) {
    match world.result.as_ref() {
        Some(Err(error)) => {
            let message = error.to_string();
            assert!(
                message.contains(snippet.as_str()),
                "expected error '{message}' to mention '{snippet}'"
            );
        }
        Some(Ok(config)) => {
            panic!("expected configuration loading to fail but succeeded with {config:?}")
        }
        None => panic!("configuration should be loaded"),
    }
}

#[scenario(
    path = "tests/features/config_loading.feature",
    name = "Defaults apply when no configuration file exists"
)]
fn scenario_defaults(world: ConfigWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/config_loading.feature",
    name = "A configuration file overrides the store root"
)]
fn scenario_store_root_override(world: ConfigWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/config_loading.feature",
    name = "Fail-fast can be enabled from the configuration file"
)]
fn scenario_fail_fast(world: ConfigWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/config_loading.feature",
    name = "Unknown keys are rejected"
)]
fn scenario_unknown_keys(world: ConfigWorld) {
    let _ = world;
}
