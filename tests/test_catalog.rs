//! Model discovery on real directories

use offload_worker::catalog::{ConfigSource, ModelCatalog, DEFAULT_CONTEXT_TOKENS};
use std::fs;
use tempfile::TempDir;

fn touch(dir: &TempDir, name: &str) {
    fs::write(dir.path().join(name), b"weights").unwrap();
}

#[test]
fn test_scan_finds_gguf_files_sorted() {
    let dir = TempDir::new().unwrap();
    touch(&dir, "zephyr.gguf");
    touch(&dir, "alpaca.gguf");
    touch(&dir, "notes.txt");
    fs::create_dir(dir.path().join("nested.gguf")).unwrap();

    let names: Vec<String> = ModelCatalog::new(dir.path())
        .scan()
        .iter()
        .map(|m| m.name.clone())
        .collect();

    assert_eq!(names, vec!["alpaca", "zephyr"]);
}

#[test]
fn test_scan_skips_names_with_colons() {
    let dir = TempDir::new().unwrap();
    touch(&dir, "a:b.gguf");
    touch(&dir, "plain.gguf");

    let names: Vec<String> = ModelCatalog::new(dir.path())
        .scan()
        .iter()
        .map(|m| m.name.clone())
        .collect();

    assert_eq!(names, vec!["plain"]);
}

#[test]
fn test_storage_dir_adds_models_but_bundled_wins() {
    let bundled = TempDir::new().unwrap();
    let storage = TempDir::new().unwrap();
    touch(&bundled, "shared.gguf");
    touch(&storage, "shared.gguf");
    touch(&storage, "downloaded.gguf");

    let models = ModelCatalog::new(bundled.path())
        .with_storage_dir(storage.path())
        .scan();

    assert_eq!(models.len(), 2);
    let shared = models.iter().find(|m| m.name == "shared").unwrap();
    assert!(shared.path.starts_with(bundled.path()));
}

#[test]
fn test_missing_directory_yields_no_models() {
    let models = ModelCatalog::new("/definitely/not/here").scan();
    assert!(models.is_empty());
}

#[test]
fn test_sidecar_config_takes_priority() {
    let dir = TempDir::new().unwrap();
    touch(&dir, "llama.gguf");
    fs::write(
        dir.path().join("llama.json"),
        r#"{"prompt": "<s>{system_prompt} {user_prompt}", "loader_config": {"n_ctx": 8192}}"#,
    )
    .unwrap();
    let defaults = dir.path().join("default_config.json");
    fs::write(&defaults, r#"{"default": {"loader_config": {"n_ctx": 1024}}}"#).unwrap();

    let models = ModelCatalog::new(dir.path())
        .with_default_config(&defaults)
        .scan();

    assert_eq!(models[0].config.loader_config.n_ctx, 8192);
    assert_eq!(models[0].config.context_chars(), 8192 * 4);
    assert!(matches!(models[0].config_source, ConfigSource::File(_)));
}

#[test]
fn test_default_document_by_name_then_generic() {
    let dir = TempDir::new().unwrap();
    touch(&dir, "named.gguf");
    touch(&dir, "other.gguf");
    let defaults = dir.path().join("default_config.json");
    fs::write(
        &defaults,
        r#"{
            "named": {"loader_config": {"n_ctx": 2048}},
            "default": {"loader_config": {"n_ctx": 1024, "n_gpu_layers": -1}}
        }"#,
    )
    .unwrap();

    let catalog = ModelCatalog::new(dir.path()).with_default_config(&defaults);
    let models = catalog.scan();

    let named = models.iter().find(|m| m.name == "named").unwrap();
    assert_eq!(named.config.loader_config.n_ctx, 2048);
    assert_eq!(
        named.config_source,
        ConfigSource::DefaultDocument("named".to_string())
    );

    let other = models.iter().find(|m| m.name == "other").unwrap();
    assert_eq!(other.config.loader_config.n_ctx, 1024);
    assert_eq!(other.config.loader_config.extra["n_gpu_layers"], -1);
}

#[test]
fn test_builtin_config_without_any_document() {
    let dir = TempDir::new().unwrap();
    touch(&dir, "plain.gguf");

    let models = ModelCatalog::new(dir.path()).scan();

    assert_eq!(models[0].config_source, ConfigSource::BuiltIn);
    assert_eq!(models[0].config.loader_config.n_ctx, DEFAULT_CONTEXT_TOKENS);
    assert!(models[0].config.prompt.is_none());
}

#[test]
fn test_malformed_sidecar_skips_only_that_model() {
    let dir = TempDir::new().unwrap();
    touch(&dir, "broken.gguf");
    touch(&dir, "fine.gguf");
    fs::write(dir.path().join("broken.json"), "{not json").unwrap();

    let models = ModelCatalog::new(dir.path()).scan();

    assert_eq!(models.len(), 1);
    assert_eq!(models[0].name, "fine");
}
