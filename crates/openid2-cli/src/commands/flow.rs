use anyhow::{Context, Result};
use colored::Colorize;
use openid2_rp::{AuthRequest, Message, OpenIdConsumer, SessionState};
use url::Url;

use crate::cli::{CompleteArgs, FlowArgs, OutputFormat};
use crate::output::{print_fields, print_json, print_success};
use crate::state::{load_state, save_state};

pub async fn start(
    consumer: &OpenIdConsumer,
    service: &str,
    args: &FlowArgs,
    format: OutputFormat,
) -> Result<()> {
    let (state, request) = consumer
        .start_discovery_flow(service, &args.return_url)
        .await?;
    finish_start(&state, &request, args, format)
}

pub async fn start_direct(
    consumer: &OpenIdConsumer,
    identifier: &str,
    args: &FlowArgs,
    format: OutputFormat,
) -> Result<()> {
    let (state, request) = consumer
        .start_direct_flow(identifier, &args.return_url)
        .await?;
    finish_start(&state, &request, args, format)
}

fn finish_start(
    state: &SessionState,
    request: &AuthRequest,
    args: &FlowArgs,
    format: OutputFormat,
) -> Result<()> {
    save_state(&args.state_file, state)?;

    if args.form {
        println!("{}", request.auto_submit_form());
        return Ok(());
    }

    let redirect = request.redirect_url();
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "redirect_url": redirect.as_str(),
            "endpoint": request.endpoint.as_str(),
            "assoc_handle": state.assoc_handle,
            "expires_at": state.expires_at.to_string(),
            "state_file": args.state_file.display().to_string(),
        })),
        OutputFormat::Text => {
            println!("{}", redirect);
            print_success(&format!(
                "Session saved to {}; open the URL above, then run `openid2 complete --callback-url <url>`",
                args.state_file.display().to_string().cyan()
            ));
        }
    }
    Ok(())
}

pub fn complete(consumer: &OpenIdConsumer, args: &CompleteArgs, format: OutputFormat) -> Result<()> {
    let mut state = load_state(&args.state_file)?;
    let callback = Url::parse(&args.callback_url).context("Callback URL is not a valid URL")?;
    let message = Message::from_url_query(&callback);

    let result = consumer.complete_flow(&mut state, &message, callback.as_str());

    // The nonce is recorded even if printing fails later.
    save_state(&args.state_file, &state)?;

    let token = result.map_err(|e| {
        tracing::debug!("Completion failed ({}): {}", e.reason_code(), e);
        anyhow::anyhow!("{} ({})", e.user_message(), e)
    })?;

    match format {
        OutputFormat::Json => print_json(&token),
        OutputFormat::Text => {
            print_success(&format!("Authenticated as {}", token.display_name().green()));
            print_fields(
                &[
                    ("identifier", Some(token.identifier())),
                    ("provider", Some(token.provider().as_str())),
                    ("full name", token.full_name()),
                    ("nickname", token.nickname()),
                    ("email", token.email()),
                    ("gender", token.gender()),
                ],
                format,
            );
        }
    }
    Ok(())
}
