use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use relayscan::{
    build_dialer,
    config::{ConfigSource, ReconConfig},
    logging::{init_logging, level_for_verbosity},
    output::{render_table, save_results, OutputFormat},
    utils::{expand_hosts, parse_port_range},
    BannerResult, DialProbe, NetworkKind, PortScanner, ProxyKind, ScanError, ScanOutcome,
    ScanReport, SharedDialer,
};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// Ulimit adjustment for Unix systems
#[cfg(unix)]
fn adjust_ulimit_size(ulimit: Option<u64>) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            log::info!("Raised file descriptor limit to {}", limit);
        } else {
            eprintln!("{}", "[!] ERROR: Failed to set ulimit value.".bright_red());
        }
    }

    match Resource::NOFILE.get() {
        Ok((soft, _)) => soft,
        Err(_) => {
            eprintln!("{}", "[!] WARNING: Could not get file descriptor limit".bright_yellow());
            65535
        }
    }
}

#[cfg(not(unix))]
fn adjust_ulimit_size(_ulimit: Option<u64>) -> u64 {
    65535
}

fn build_cli() -> Command {
    Command::new("relayscan")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Concurrent port scanner and banner grabber with HTTP and SOCKS5 proxy support")
        .arg(
            Arg::new("targets")
                .value_name("TARGET")
                .help("Hosts, IPs or CIDR blocks (comma-separated lists accepted)")
                .num_args(0..)
                .index(1),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file (default: ~/.relayscan.toml)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("ports")
                .short('p')
                .long("ports")
                .value_name("RANGE")
                .help("Port or inclusive range, e.g. 80 or 1-1024"),
        )
        .arg(
            Arg::new("concurrency")
                .short('c')
                .long("concurrency")
                .value_name("N")
                .help("Probes in flight at once")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("delay")
                .long("delay")
                .value_name("MS")
                .help("Delay between probe dispatches in milliseconds")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("MS")
                .help("Dial timeout in milliseconds")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("udp")
                .long("udp")
                .help("Probe with UDP connect (inconclusive results)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("proxy-type")
                .long("proxy-type")
                .value_name("KIND")
                .help("direct, http or socks5"),
        )
        .arg(
            Arg::new("proxy")
                .long("proxy")
                .value_name("HOST:PORT")
                .help("Proxy address"),
        )
        .arg(
            Arg::new("proxy-user")
                .long("proxy-user")
                .value_name("USER")
                .help("Proxy username"),
        )
        .arg(
            Arg::new("proxy-pass")
                .long("proxy-pass")
                .value_name("PASS")
                .help("Proxy password"),
        )
        .arg(
            Arg::new("banner-port")
                .short('b')
                .long("banner-port")
                .value_name("PORT")
                .help("Grab banners from this port on every host")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("buffer-size")
                .long("buffer-size")
                .value_name("BYTES")
                .help("Maximum banner size")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("banner-concurrency")
                .long("banner-concurrency")
                .value_name("N")
                .help("Hosts grabbed at once")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("output-file")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write results to this file")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output-format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .help("text, json or csv"),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("FILE")
                .help("Append log lines to this file")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("ulimit")
                .short('u')
                .long("ulimit")
                .value_name("LIMIT")
                .help("Raise the open file limit to this value")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("More log output (repeat for trace)")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disable colored output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("validate-config")
                .long("validate-config")
                .help("Validate the merged configuration and exit")
                .action(ArgAction::SetTrue),
        )
}

/// Command-line flags win over file values
fn apply_overrides(config: &mut ReconConfig, matches: &ArgMatches) -> Result<()> {
    if let Some(targets) = matches.get_many::<String>("targets") {
        config.targets = targets.cloned().collect();
    }
    if let Some(ports) = matches.get_one::<String>("ports") {
        let (start, end) = parse_port_range(ports)?;
        config.port_range = [start, end];
    }
    if let Some(&concurrency) = matches.get_one::<usize>("concurrency") {
        config.concurrency = concurrency;
    }
    if let Some(&delay) = matches.get_one::<u64>("delay") {
        config.scan_delay_ms = delay;
    }
    if let Some(&timeout) = matches.get_one::<u64>("timeout") {
        config.timeout_ms = timeout;
    }
    if matches.get_flag("udp") {
        config.network = NetworkKind::Udp;
    }
    if let Some(kind) = matches.get_one::<String>("proxy-type") {
        config.proxy.kind = kind.parse()?;
    }
    if let Some(addr) = matches.get_one::<String>("proxy") {
        config.proxy.address = addr.clone();
        if config.proxy.kind == ProxyKind::Direct && !matches.contains_id("proxy-type") {
            config.proxy.kind = ProxyKind::Http;
        }
    }
    if let Some(user) = matches.get_one::<String>("proxy-user") {
        config.proxy.username = user.clone();
    }
    if let Some(pass) = matches.get_one::<String>("proxy-pass") {
        config.proxy.password = pass.clone();
    }
    if let Some(&port) = matches.get_one::<u16>("banner-port") {
        config.banner.port = Some(port);
    }
    if let Some(&size) = matches.get_one::<usize>("buffer-size") {
        config.banner.buffer_size = size;
    }
    if let Some(&concurrency) = matches.get_one::<usize>("banner-concurrency") {
        config.banner.concurrency = concurrency;
    }
    if let Some(path) = matches.get_one::<PathBuf>("output-file") {
        config.output.file = Some(path.clone());
    }
    if let Some(format) = matches.get_one::<String>("output-format") {
        config.output.format = format.parse::<OutputFormat>()?;
    }
    if let Some(path) = matches.get_one::<PathBuf>("log-file") {
        config.logging.file = Some(path.clone());
    }
    config.logging.level = level_for_verbosity(&config.logging.level, matches.get_count("verbose"));
    Ok(())
}

fn progress_bar(total: u64) -> Result<ProgressBar> {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )?
        .progress_chars("#>-"),
    );
    Ok(bar)
}

/// Scan one host, streaming outcomes into the progress bar as they complete
async fn scan_host(
    host: &str,
    dialer: SharedDialer,
    config: &ReconConfig,
    bar: &ProgressBar,
    cancel: &CancellationToken,
) -> relayscan::Result<ScanReport> {
    let scanner = PortScanner::new(
        host,
        DialProbe::new(dialer, config.network),
        config.scan_policy(),
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<ScanOutcome>();
    let collector = {
        let bar = bar.clone();
        tokio::spawn(async move {
            let mut outcomes = Vec::new();
            while let Some(outcome) = rx.recv().await {
                bar.inc(1);
                if outcome.reachable {
                    bar.println(format!("{} {}", "[+] Open".bright_green(), outcome.target));
                }
                outcomes.push(outcome);
            }
            outcomes
        })
    };

    let result = scanner.scan_into(tx, cancel).await;
    let outcomes = collector
        .await
        .map_err(|e| ScanError::Output(format!("Progress collector failed: {}", e)))?;

    let mut report = result?;
    report.outcomes = outcomes;
    report.sort_outcomes();
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let (mut config, source) = match matches.get_one::<PathBuf>("config") {
        Some(path) => (
            ReconConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            ConfigSource::File(path.clone()),
        ),
        None => ReconConfig::load_default_config(),
    };
    apply_overrides(&mut config, &matches)?;
    config.validate().context("invalid configuration")?;

    if matches.get_flag("validate-config") {
        println!("{}", "[✓] Configuration is valid".bright_green());
        return Ok(());
    }

    init_logging(&config.logging)?;
    source.log();
    let fd_limit = adjust_ulimit_size(matches.get_one::<u64>("ulimit").copied());
    if (config.concurrency as u64) >= fd_limit {
        log::warn!(
            "Concurrency {} is at or above the open file limit {}; consider --ulimit",
            config.concurrency,
            fd_limit
        );
    }

    let hosts = expand_hosts(config.targets.as_slice())?;
    let dialer = build_dialer(config.proxy.kind, config.dialer_config())?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", "\n[!] Interrupted, stopping".bright_yellow());
                cancel.cancel();
            }
        });
    }

    let policy = config.scan_policy();
    let bar = progress_bar((policy.port_count() * hosts.len()) as u64)?;
    let mut reports = Vec::with_capacity(hosts.len());

    for host in &hosts {
        bar.set_message(host.clone());
        match scan_host(host, dialer.clone(), &config, &bar, &cancel).await {
            Ok(report) => {
                let stop = report.cancelled;
                reports.push(report);
                if stop {
                    break;
                }
            }
            Err(ScanError::Cancelled) => break,
            Err(e) => {
                bar.abandon();
                return Err(e.into());
            }
        }
    }
    bar.finish_and_clear();

    let mut banners: Vec<BannerResult> = Vec::new();
    if let Some(port) = config.banner.port {
        if !cancel.is_cancelled() {
            let grabber = config.banner_grabber(dialer.clone());
            banners = grabber
                .grab_banners(&hosts, port, config.banner.buffer_size, &cancel)
                .await;
        }
    }

    print!("{}", render_table(&reports, &banners, !matches.get_flag("no-color")));

    if let Some(path) = &config.output.file {
        save_results(path, config.output.format, &reports, &banners)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    if !reports.is_empty() && reports.iter().all(ScanReport::all_failed) {
        log::warn!("No reachable ports on any host");
    }
    if cancel.is_cancelled() {
        eprintln!("{}", "[!] Results are partial".bright_yellow());
    }

    Ok(())
}
