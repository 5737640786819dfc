//! Hub registry commands: modules, nodes, signup.

use anyhow::bail;
use naptha_core::{ModuleType, Params};
use naptha_hub::ModuleRecord;
use serde_json::Value;

use crate::cli::RegistryArgs;
use crate::context::AppContext;
use crate::output::table;

pub async fn modules(ctx: &AppContext, module_type: ModuleType, args: &RegistryArgs) -> anyhow::Result<()> {
    match (&args.name, &args.parameters, args.delete) {
        (Some(name), _, true) => {
            let hub = ctx.hub_signed_in().await?;
            hub.delete_module(module_type, name).await?;
            println!("Deleted {}:{}", module_type, name);
        }
        (Some(name), Some(parameters), false) => {
            let hub = ctx.hub_signed_in().await?;
            let params = Params::parse_cli(parameters)?;
            let author = hub.user_id().unwrap_or_default();
            let record = ModuleRecord::from_params(module_type, name, &params, &author)?;
            let created = hub.create_module(&record).await?;
            println!("Registered {}", created.id);
        }
        (Some(name), None, false) => {
            let hub = ctx.hub()?;
            let record = hub.get_module(module_type, name).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        (None, Some(_), _) => bail!("a module name is required to register a {}", module_type),
        (None, None, _) => {
            let hub = ctx.hub()?;
            let records = hub.list_modules(module_type).await?;
            println!("{}", module_table(&records));
        }
    }
    Ok(())
}

fn module_table(records: &[ModuleRecord]) -> String {
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.name.clone(),
                r.id.clone(),
                r.author.clone(),
                r.version.clone(),
                r.description.clone(),
                r.url.clone(),
            ]
        })
        .collect();
    table(&["Name", "ID", "Author", "Version", "Description", "URL"], &rows)
}

pub async fn nodes(ctx: &AppContext) -> anyhow::Result<()> {
    let hub = ctx.hub()?;
    let nodes = hub.list_nodes().await?;
    if nodes.is_empty() {
        println!("No nodes registered");
        return Ok(());
    }

    // Node records are free-form; columns are the union of their keys.
    let mut headers: Vec<String> = Vec::new();
    for node in &nodes {
        for key in node.keys() {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
        }
    }
    let rows: Vec<Vec<String>> = nodes
        .iter()
        .map(|node| {
            headers
                .iter()
                .map(|h| match node.get(h) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect()
        })
        .collect();
    let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
    println!("{}", table(&headers, &rows));
    Ok(())
}

pub async fn signup(ctx: &AppContext) -> anyhow::Result<()> {
    let hub = ctx.hub()?;
    let (user, pass) = ctx.hub_credentials()?;
    let session = hub
        .signup(user, pass, &ctx.identity.public_key_hex())
        .await?;
    println!("Signed up as {}", session.user_id);
    Ok(())
}
