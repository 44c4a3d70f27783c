use anyhow::Result;
use clap::Args;
use veilbrowser::{compute_launch_flags, ConnectOptions, HeadlessMode, ProxyConfig};

#[derive(Args, Clone, Debug)]
pub struct FlagsArgs {
    /// Compute for a visible-window launch
    #[arg(long)]
    pub headful: bool,

    /// Proxy as host:port or host:port@user:pass
    #[arg(long, value_parser = super::parse_proxy)]
    pub proxy: Option<ProxyConfig>,

    /// Leave out the built-in hardening flag set
    #[arg(long)]
    pub ignore_defaults: bool,

    /// Extra browser flag, repeatable, passed through verbatim
    #[arg(long = "flag", value_name = "FLAG")]
    pub extra_flags: Vec<String>,
}

/// Prints the flag list a connect with these options would launch with,
/// one per line.
pub fn cmd_flags(args: FlagsArgs, mut options: ConnectOptions) -> Result<()> {
    if args.headful {
        options.headless = Some(false);
    }
    if let Some(proxy) = args.proxy {
        options.proxy = Some(proxy);
    }
    if args.ignore_defaults {
        options.ignore_default_flags = true;
    }
    options.args.extend(args.extra_flags);

    let mode = HeadlessMode::resolve(options.headless);
    for flag in compute_launch_flags(&options, mode) {
        println!("{flag}");
    }
    Ok(())
}
