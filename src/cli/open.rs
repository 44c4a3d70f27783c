use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;
use veilbrowser::{connect, ConnectOptions, ProxyConfig};

#[derive(Args, Clone, Debug)]
pub struct OpenArgs {
    /// Destination URL
    pub url: String,

    /// Run with a visible window instead of headless
    #[arg(long)]
    pub headful: bool,

    /// Proxy as host:port or host:port@user:pass
    #[arg(long, value_parser = super::parse_proxy)]
    pub proxy: Option<ProxyConfig>,

    /// Write a PNG screenshot here once the page is open
    #[arg(long, value_name = "FILE")]
    pub screenshot: Option<PathBuf>,

    /// Keep probing for interactive challenges while the page is open
    #[arg(long)]
    pub challenge_solving: bool,

    /// Keep the session open this many seconds before closing
    #[arg(long, default_value_t = 0)]
    pub hold_secs: u64,

    /// Extra browser flag, repeatable, passed through verbatim
    #[arg(long = "flag", value_name = "FLAG")]
    pub extra_flags: Vec<String>,
}

pub async fn cmd_open(args: OpenArgs, mut options: ConnectOptions) -> Result<()> {
    if args.headful {
        options.headless = Some(false);
    }
    if let Some(proxy) = args.proxy.clone() {
        options.proxy = Some(proxy);
    }
    if args.challenge_solving {
        options.challenge_solving = true;
    }
    options.args.extend(args.extra_flags.iter().cloned());

    let connected = connect(options).await?;
    let page = &connected.page;

    page.navigate(&args.url).await?;
    info!(url = %args.url, "page opened");

    let title = page.evaluate("document.title").await?;
    println!("title: {}", title.as_str().unwrap_or_default());

    if let Some(path) = &args.screenshot {
        let bytes = page.screenshot().await?;
        tokio::fs::write(path, &bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("screenshot: {} ({} bytes)", path.display(), bytes.len());
    }

    if args.hold_secs > 0 {
        info!(secs = args.hold_secs, "holding session open");
        tokio::time::sleep(Duration::from_secs(args.hold_secs)).await;
    }

    connected.session.close().await;
    Ok(())
}
