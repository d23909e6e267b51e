//! Checksum command - print archive digests

use super::{blocking, stage_context};
use crate::cli::args::{ChecksumArgs, OutputFormat};
use crate::config::Config;
use crate::error::{StagehandError, StagehandResult};
use crate::stage::checksum_url;
use crate::ui::{self, UiContext};
use futures_util::future::join_all;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ChecksumEntry {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Execute the checksum command
pub async fn execute(args: ChecksumArgs, config: &Config) -> StagehandResult<()> {
    let ctx = stage_context(config);
    let keep_stage = args.keep_stage;

    let tasks = args.urls.iter().map(|url| {
        let ctx = ctx.clone();
        let url = url.clone();
        async move {
            let result = blocking({
                let url = url.clone();
                move || checksum_url(&ctx, &url, keep_stage)
            })
            .await;
            (url, result)
        }
    });

    let mut entries = Vec::new();
    for (url, result) in join_all(tasks).await {
        match result {
            Ok(sha256) => entries.push(ChecksumEntry {
                url,
                sha256: Some(sha256),
                error: None,
            }),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => entries.push(ChecksumEntry {
                url,
                sha256: None,
                error: Some(e.to_string()),
            }),
        }
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text => print_text(&entries),
    }

    let failed = entries.iter().filter(|e| e.error.is_some()).count();
    if failed > 0 {
        return Err(StagehandError::User(format!(
            "Could not checksum {} of {} URLs",
            failed,
            entries.len()
        )));
    }
    Ok(())
}

fn print_text(entries: &[ChecksumEntry]) {
    let ctx = UiContext::non_interactive();
    for entry in entries {
        match (&entry.sha256, &entry.error) {
            (Some(sha256), _) => println!("{}  {}", sha256, entry.url),
            (None, Some(error)) => ui::step_error_detail(&ctx, &entry.url, error),
            (None, None) => {}
        }
    }
}
