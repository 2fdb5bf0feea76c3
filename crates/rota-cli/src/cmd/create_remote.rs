//! `rota create-remote-document`: one-time setup of the remote state document.

use std::io::Write;

use anyhow::Result;
use clap::Args;
use rota_core::error::ErrorCode;
use rota_core::remote::{client_from_config, create_document};
use rota_core::snapshot::Snapshot;
use serde::Serialize;

use super::Context;
use crate::output::{CliError, pretty_kv, render, render_error};

#[derive(Args, Debug)]
pub struct CreateRemoteArgs {
    /// Description shown on the created document.
    #[arg(long, default_value = "rota posting state")]
    pub description: String,
}

#[derive(Debug, Serialize)]
struct Created {
    document_id: String,
    url: Option<String>,
    file_name: String,
}

/// Execute `rota create-remote-document`: create a private document holding
/// a fresh state snapshot and print its id.
pub fn run_create_remote(args: &CreateRemoteArgs, ctx: &Context) -> Result<()> {
    let Some(client) = client_from_config(&ctx.config.remote) else {
        render_error(
            ctx.output,
            &CliError {
                message: "no token found in ROTA_TOKEN, GIST_TOKEN or GITHUB_TOKEN".to_string(),
                suggestion: Some("export a token with gist scope and retry".to_string()),
                error_code: Some(ErrorCode::RemoteNotConfigured.code().to_string()),
            },
        )?;
        anyhow::bail!("remote store token missing");
    };

    let snapshot = Snapshot::fresh(&ctx.config.categories);
    let file_name = &ctx.config.state.remote_file_name;
    let created = match create_document(&client, file_name, &args.description, &snapshot.to_document()) {
        Ok(created) => created,
        Err(err) => {
            render_error(ctx.output, &CliError::coded(err.code(), err.to_string()))?;
            anyhow::bail!("failed to create remote document");
        }
    };

    let payload = Created {
        document_id: created.id,
        url: created.url,
        file_name: file_name.clone(),
    };
    render(ctx.output, &payload, |p, w: &mut dyn Write| {
        pretty_kv(w, "document", &p.document_id)?;
        if let Some(url) = &p.url {
            pretty_kv(w, "url", url)?;
        }
        writeln!(w, "\nAdd to your environment:\n  export ROTA_DOCUMENT_ID={}", p.document_id)
    })
}
