//! Local run history.

use naptha_runtime::CachedRun;

use crate::context::AppContext;
use crate::output::table;

pub fn list(ctx: &AppContext, limit: usize) {
    let runs = ctx.run_cache.list();
    if runs.is_empty() {
        println!("No runs recorded");
        return;
    }
    let skip = runs.len().saturating_sub(limit);
    let rows: Vec<Vec<String>> = runs.iter().skip(skip).rev().map(row).collect();
    println!(
        "{}",
        table(&["Run", "Module", "Node", "Status", "Created", "Detail"], &rows)
    );
}

fn row(run: &CachedRun) -> Vec<String> {
    vec![
        run.run_id.to_string(),
        run.module.clone(),
        run.node.to_string(),
        run.status.to_string(),
        run.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        run.failure
            .as_ref()
            .map(|f| format!("{}: {}", f.kind, f.message))
            .unwrap_or_default(),
    ]
}
