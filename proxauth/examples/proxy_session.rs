use std::path::PathBuf;

use clap::Parser;
use proxauth::{AuthService, InMemoryGate, ProxyConfig};
use proxauth_reqwest::{InterceptedRequest, Interception};
use proxauth_tokens::{sources::ConstTokenSource, AccessToken};

#[derive(Debug, Parser)]
struct Opts {
    /// Path to the JSON service configuration
    #[arg(short, long, env = "PROXAUTH_CONFIG", default_value = "proxauth.json")]
    config: PathBuf,

    /// The access token presented to the proxy
    #[arg(short, long, env = "PROXAUTH_TOKEN", hide_env_values = true)]
    token: AccessToken,

    /// The page to request through the interceptor
    #[arg(short, long, env = "PROXAUTH_URL")]
    url: String,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let config = ProxyConfig::from_json_str(&std::fs::read_to_string(&opts.config)?)?;
    let service = AuthService::new(
        config,
        ConstTokenSource::new(opts.token),
        InMemoryGate::default(),
    )?;

    let account = service.sign_in(&()).await?;
    tracing::info!(account = %account.username, "signed in");

    service.wait_for_proxy_access_ready().await?;

    let script = service.in_page_script();
    tracing::info!(
        injected = script.script_for(&opts.url).is_some(),
        script_len = script.source().len(),
        "in-page script"
    );

    let interceptor = service.interceptor()?;
    let req = InterceptedRequest::parse("GET", &opts.url)?.with_header("Accept", "text/html");

    match interceptor.intercept(&req).await {
        Interception::PassThrough => {
            tracing::warn!(url = %req.url(), "request was not rewritten");
        }
        Interception::Substitute(resp) => {
            let (status, reason) = (resp.status(), resp.reason().to_owned());
            let mime_type = resp.mime_type().map(str::to_owned);
            let body = resp.collect_body().await.map_err(|e| color_eyre::eyre::eyre!(e))?;
            tracing::info!(
                status,
                reason = %reason,
                mime_type = mime_type.as_deref().unwrap_or("<none>"),
                body_len = body.len(),
                "received substituted response"
            );
        }
    }

    if let Some(account) = service.sign_out().await? {
        tracing::info!(account = %account.username, "signed out");
    }

    service.shutdown();
    Ok(())
}
