use std::path::Path;
use std::sync::Arc;

use tokio::fs;

use metaver_lib::{MetadataAdmin, MetadataScope};

use crate::config::MetaverConfig;

async fn connect(config: &MetaverConfig) -> Result<MetadataAdmin, String> {
    let coordinator = Arc::new(config.build_coordinator().await?);
    let tracker = Arc::new(config.build_tracker());
    let admin = MetadataAdmin::new(coordinator, tracker);
    Ok(match config.item_types() {
        Some(types) => admin.with_item_types(types),
        None => admin,
    })
}

/// Connect and bring the local view up to date so the write is not refused
/// as stale.
async fn connect_for_write(config: &MetaverConfig) -> Result<MetadataAdmin, String> {
    let admin = connect(config).await?;
    admin.refresh().await.map_err(|e| e.to_string())?;
    Ok(admin)
}

pub async fn run_versions(config: &MetaverConfig, scope: MetadataScope) -> Result<(), String> {
    let admin = connect(config).await?;
    let snapshot = admin.coordinator().read().await;
    let space = snapshot.space(scope);

    for version in space.known_versions() {
        let marker = if space.registry().is_current(version) { "*" } else { " " };
        let items = space.manifest(version).map(|m| m.len()).unwrap_or(0);
        println!("{} {:<8} {} items", marker, version, items);
    }
    Ok(())
}

pub async fn run_create_version(
    config: &MetaverConfig,
    scope: MetadataScope,
    version: &str,
    current: bool,
) -> Result<(), String> {
    let admin = connect_for_write(config).await?;
    admin
        .create_version(scope, version, current)
        .await
        .map_err(|e| e.to_string())?;
    println!("Created {} version {}", scope, version);
    Ok(())
}

pub async fn run_set_current(
    config: &MetaverConfig,
    scope: MetadataScope,
    versions: &[String],
) -> Result<(), String> {
    let admin = connect_for_write(config).await?;
    admin
        .set_current_versions(scope, versions)
        .await
        .map_err(|e| e.to_string())?;
    println!("Current {} versions: {}", scope, versions.join(", "));
    Ok(())
}

pub async fn run_upload(
    config: &MetaverConfig,
    scope: MetadataScope,
    version: &str,
    key: &str,
    file: &Path,
) -> Result<(), String> {
    let value = read_json(file).await?;
    let admin = connect_for_write(config).await?;
    let hash = admin
        .set_metadata_json(scope, key, &value, version)
        .await
        .map_err(|e| e.to_string())?;
    println!("Uploaded {} {} in version {} (hash: {})", scope, key, version, hash);
    Ok(())
}

async fn read_json(file: &Path) -> Result<serde_json::Value, String> {
    let content = fs::read_to_string(file)
        .await
        .map_err(|e| format!("failed to read {}: {}", file.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("{} is not valid JSON: {}", file.display(), e))
}

/// Upload every `<key>.json` file in `dir` as one batch.
pub async fn run_upload_dir(
    config: &MetaverConfig,
    scope: MetadataScope,
    version: &str,
    dir: &Path,
) -> Result<(), String> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| format!("failed to read {}: {}", dir.display(), e))?;
    let mut items = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| format!("failed to read {}: {}", dir.display(), e))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        items.push((key.to_string(), read_json(&path).await?));
    }
    if items.is_empty() {
        return Err(format!("no .json files found in {}", dir.display()));
    }
    items.sort_by(|a, b| a.0.cmp(&b.0));

    let admin = connect_for_write(config).await?;
    let stored = admin
        .set_metadata_json_many(scope, &items, version)
        .await
        .map_err(|e| e.to_string())?;
    for (key, hash) in &stored {
        println!("  {} (hash: {})", key, hash);
    }
    println!("Uploaded {} {} items in version {}", stored.len(), scope, version);
    Ok(())
}

/// Write every item of `version` to `<dir>/<key>.json`.
pub async fn run_export(
    config: &MetaverConfig,
    scope: MetadataScope,
    version: &str,
    dir: &Path,
) -> Result<(), String> {
    let admin = connect(config).await?;
    let items = admin
        .export_version(scope, version)
        .await
        .map_err(|e| e.to_string())?;

    fs::create_dir_all(dir)
        .await
        .map_err(|e| format!("failed to create {}: {}", dir.display(), e))?;
    for (key, json) in &items {
        let path = dir.join(format!("{}.json", key));
        fs::write(&path, json)
            .await
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
    }
    println!("Exported {} {} items of version {} to {}", items.len(), scope, version, dir.display());
    Ok(())
}

pub async fn run_get(
    config: &MetaverConfig,
    scope: MetadataScope,
    version: &str,
    key: &str,
    raw: bool,
) -> Result<(), String> {
    let admin = connect(config).await?;
    let json = if raw {
        admin.raw_content(scope, key, version).await
    } else {
        admin
            .coordinator()
            .read()
            .await
            .get_metadata_json(scope, key, version)
            .await
    }
    .map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

pub async fn run_check_hash(
    config: &MetaverConfig,
    scope: MetadataScope,
    version: &str,
    key: &str,
    hash: &str,
) -> Result<bool, String> {
    let admin = connect(config).await?;
    let current = admin
        .coordinator()
        .read()
        .await
        .is_hash_current(scope, key, hash, version)
        .map_err(|e| e.to_string())?;
    println!("{}", if current { "current" } else { "outdated" });
    Ok(current)
}

pub async fn run_mark_updated(config: &MetaverConfig, scope: MetadataScope) -> Result<(), String> {
    let tracker = config.build_tracker();
    let timestamp = tracker
        .mark_updated(scope)
        .await
        .map_err(|e| e.to_string())?;
    println!("Marked {} updated at {}", tracker.timestamp_key(scope), timestamp);
    Ok(())
}

pub async fn run_status(config: &MetaverConfig) -> Result<(), String> {
    let admin = connect(config).await?;
    let tracker = admin.tracker();
    let snapshot = admin.coordinator().read().await;

    println!("App:          {}", admin.coordinator().app_name());
    println!("Environment:  {:?}", admin.coordinator().environment());
    println!("Generation:   {}", snapshot.generation());
    match tracker.store().ping().await {
        Ok(()) => println!("Timestamps:   {} (ok)", tracker.store().describe()),
        Err(e) => println!("Timestamps:   {} ({})", tracker.store().describe(), e),
    }

    for scope in MetadataScope::ALL {
        let space = snapshot.space(scope);
        let shared = match tracker.shared_timestamp(scope).await {
            Ok(Some(ts)) => ts.to_string(),
            Ok(None) => "unset".to_string(),
            Err(e) => format!("error: {}", e),
        };
        println!();
        println!("[{}]", scope);
        println!("  known:        {}", space.known_versions().join(", "));
        println!("  current:      {}", space.current_versions().join(", "));
        println!("  last updated: {}", shared);
    }
    Ok(())
}
