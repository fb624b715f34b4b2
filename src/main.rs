//! Command-line front-end for vmpack.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use vmpack::cli::Command;
use vmpack::{Cli, Error, ObjectKind, Package, PackageObject};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(&cli).await {
        if let Some(Error::AuthenticationRequired {
            host,
            realm,
            scheme,
        }) = err.downcast_ref::<Error>()
        {
            eprintln!(
                "{host} requires {scheme} authentication (realm \"{realm}\"); \
                 retry with --user, --password and --scheme"
            );
            std::process::exit(2);
        }
        return Err(err);
    }
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Inspect { url } => inspect(cli, url).await,
        Command::Extract { url, object, out } => extract(cli, url, *object, out).await,
        Command::Create {
            out,
            name,
            domain,
            disk,
            memory,
        } => {
            let domain_xml = tokio::fs::read(domain)
                .await
                .with_context(|| format!("reading {}", domain.display()))?;
            Package::create(out, name, &domain_xml, disk, memory.as_deref()).await?;
            println!("created {}", out.display());
            Ok(())
        }
    }
}

async fn open(cli: &Cli, url: &str) -> Result<Package> {
    Ok(Package::open_with_config(url, cli.credentials(), &cli.http_config()).await?)
}

fn print_object(kind: ObjectKind, object: &PackageObject) {
    println!(
        "{:<8} {:<20} offset {:>12}  size {:>12}",
        kind.to_string(),
        object.path,
        object.offset,
        object.size
    );
}

async fn inspect(cli: &Cli, url: &str) -> Result<()> {
    let mut package = open(cli, url).await?;

    println!("Name:          {}", package.name());
    println!("URL:           {}", package.url());
    println!("Length:        {}", package.file().length());
    if let Some(etag) = package.file().etag() {
        println!("ETag:          {etag}");
    }
    if let Some(modified) = package.file().last_modified() {
        println!("Last-Modified: {}", modified.to_rfc2822());
    }
    println!();
    for kind in [ObjectKind::Domain, ObjectKind::Disk, ObjectKind::Memory] {
        if let Some(object) = package.object(kind) {
            print_object(kind, object);
        }
    }

    report_transfer(&package);
    package.close();
    Ok(())
}

fn report_transfer(package: &Package) {
    let transferred = package.file().transferred_bytes();
    if transferred > 0 {
        eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
    }
}

/// Human-readable byte count.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{size} bytes")
    }
}

async fn extract(cli: &Cli, url: &str, kind: ObjectKind, out: &std::path::Path) -> Result<()> {
    let mut package = open(cli, url).await?;
    if package.object(kind).is_none() {
        anyhow::bail!("package has no {kind} object");
    }

    let mut file = tokio::fs::File::create(out)
        .await
        .with_context(|| format!("creating {}", out.display()))?;
    let copied = package.copy_object(kind, &mut file).await?;
    file.sync_all().await?;
    report_transfer(&package);
    package.close();

    eprintln!("wrote {copied} bytes to {}", out.display());
    Ok(())
}
