//! Main entry point for the stowzip CLI application.
//!
//! Packs local files, directories and HTTP URLs into one ZIP archive.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Parser;
use log::{debug, info};
use std::path::{Component, Path};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use stowzip::cli::format_size;
use stowzip::{
    Archive, Cli, ContentLoader, FileOptions, GenerateOptions, HttpLoader, LocalFileLoader,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let mut archive = Archive::new();
    for input in &cli.paths {
        if Cli::is_http_url(input) {
            add_url(&mut archive, input, &cli).await?;
        } else {
            add_path(&mut archive, Path::new(input), &cli).await?;
        }
    }
    if archive.is_empty() {
        bail!("nothing to do: every input was excluded");
    }

    let mut options = GenerateOptions::new().platform(cli.platform.into());
    if let Some(comment) = &cli.comment {
        options = options.comment(comment.clone());
    }

    let mut last_file = None;
    let zip = archive
        .generate_with_progress(options, |meta| {
            if meta.current_file.is_some() && meta.current_file != last_file {
                debug!(
                    "{:>5.1}%  {}",
                    meta.percent,
                    meta.current_file.as_deref().unwrap_or_default()
                );
                last_file = meta.current_file.clone();
            }
        })
        .await
        .context("failed to build the archive")?;
    let bytes = zip
        .as_bytes()
        .context("archive was not generated as bytes")?;

    if cli.is_stdout() {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(bytes).await?;
        stdout.flush().await?;
    } else {
        tokio::fs::write(&cli.output, bytes)
            .await
            .with_context(|| format!("failed to write {}", cli.output))?;
    }

    if !cli.is_quiet() {
        let stored: u64 = archive
            .entries()
            .map(|(_, entry)| entry.uncompressed_size())
            .sum();
        eprintln!(
            "{}: {} entries, {} stored, {} total",
            cli.output,
            archive.len(),
            format_size(stored),
            format_size(bytes.len() as u64)
        );
    }

    Ok(())
}

/// `-v` raises the default filter to debug; `RUST_LOG` still wins.
fn init_logging(cli: &Cli) {
    let default = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

/// Add a file, or a directory with everything below it, in sorted order.
async fn add_path(archive: &mut Archive, root: &Path, cli: &Cli) -> Result<()> {
    let mut pending = vec![root.to_path_buf()];

    while let Some(path) = pending.pop() {
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        // "." and other component-less roots are walked but not stored.
        let name = entry_name(&path, cli.junk_paths);
        if let Some(name) = &name
            && cli.is_excluded(name)
        {
            debug!("excluded {name}");
            continue;
        }

        if metadata.is_dir() {
            if let Some(name) = &name
                && !cli.junk_paths
            {
                archive.file_with_options(&format!("{name}/"), Vec::<u8>::new(), file_options(&metadata))?;
            }
            let mut children = Vec::new();
            let mut dir = tokio::fs::read_dir(&path).await?;
            while let Some(child) = dir.next_entry().await? {
                children.push(child.path());
            }
            children.sort();
            // Popped from the back, so push in reverse.
            pending.extend(children.into_iter().rev());
        } else if let Some(name) = name {
            let loader = LocalFileLoader::open(&path).await?;
            if !cli.is_quiet() {
                println!("  adding: {name}");
            }
            archive.file_with_loader(&name, Arc::new(loader), file_options(&metadata))?;
        }
    }

    Ok(())
}

/// Add the resource behind an HTTP(S) URL, named after its last path segment.
async fn add_url(archive: &mut Archive, url: &str, cli: &Cli) -> Result<()> {
    let name = url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .unwrap_or("download")
        .to_string();
    if cli.is_excluded(&name) {
        debug!("excluded {name}");
        return Ok(());
    }

    let loader = HttpLoader::new(url.to_string()).await?;
    info!(
        "{url}: {} bytes announced",
        loader
            .size_hint()
            .map_or_else(|| "unknown".to_string(), |size| size.to_string())
    );
    if !cli.is_quiet() {
        println!("  adding: {name} (from {url})");
    }
    archive.file_with_loader(&name, Arc::new(loader), FileOptions::new())?;
    Ok(())
}

/// Archive name of a local path: `/`-separated normal components only.
fn entry_name(path: &Path, junk_paths: bool) -> Option<String> {
    if junk_paths {
        return path.file_name().map(|s| s.to_string_lossy().to_string());
    }
    let parts: Vec<_> = path
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn file_options(metadata: &std::fs::Metadata) -> FileOptions {
    let mut options = FileOptions::new();
    if let Ok(modified) = metadata.modified() {
        options = options.date(DateTime::<Utc>::from(modified));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options = options.unix_permissions(metadata.permissions().mode());
    }
    options
}
