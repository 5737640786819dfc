//! Storage commands.

use std::path::{Path, PathBuf};

use naptha_storage::StorageId;

use crate::context::AppContext;

pub async fn read(ctx: &AppContext, id: &str, output_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let id = StorageId::parse(id)?;
    let output_dir = output_dir.unwrap_or_else(|| ctx.config.data_paths.files.clone());
    let storage = ctx.storage(&ctx.config.node_url)?;
    let saved = storage.read_to_dir(&id, &output_dir).await?;
    println!("{}", saved.display());
    Ok(())
}

pub async fn write(ctx: &AppContext, path: &Path, content_addressed: bool) -> anyhow::Result<()> {
    let storage = ctx.storage(&ctx.config.node_url)?;
    for (file, id) in storage.write_path(path, content_addressed).await? {
        println!("{}\t{}", id, file.display());
    }
    Ok(())
}
