//! Root command - print the resolved stage root

use super::{blocking, stage_context};
use crate::config::Config;
use crate::error::StagehandResult;

/// Execute the root command
pub async fn execute(config: &Config) -> StagehandResult<()> {
    let ctx = stage_context(config);
    let root = blocking(move || ctx.stage_root().map(|p| p.to_path_buf())).await?;
    println!("{}", root.display());
    Ok(())
}
