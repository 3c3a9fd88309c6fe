use clap::{Parser, ValueEnum};

use crate::zip::Platform;

#[derive(Parser, Debug)]
#[command(name = "stowzip")]
#[command(version)]
#[command(about = "Pack files and URLs into a ZIP archive (stored, no compression)", long_about = None)]
#[command(after_help = "Examples:\n  \
  stowzip -o docs.zip docs -x '*.tmp'      pack a directory, skipping temp files\n  \
  stowzip -o - report.csv > report.zip     write the archive to stdout\n  \
  stowzip -o data.zip https://example.com/data.json   pack a remote file")]
pub struct Cli {
    /// Files, directories or HTTP URLs to pack
    #[arg(value_name = "PATHS", required = true)]
    pub paths: Vec<String>,

    /// Output archive ("-" for stdout)
    #[arg(short = 'o', value_name = "FILE")]
    pub output: String,

    /// Archive comment
    #[arg(short = 'c', value_name = "COMMENT")]
    pub comment: Option<String>,

    /// Host system recorded for file attributes
    #[arg(long, value_enum, default_value_t = PlatformArg::Unix)]
    pub platform: PlatformArg,

    /// Junk paths (store file names only)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "PATTERN", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Quiet mode
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Verbose logging
    #[arg(short = 'v')]
    pub verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformArg {
    Unix,
    Dos,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Unix => Platform::Unix,
            PlatformArg::Dos => Platform::Dos,
        }
    }
}

impl Cli {
    pub fn is_http_url(path: &str) -> bool {
        path.starts_with("http://") || path.starts_with("https://")
    }

    pub fn is_stdout(&self) -> bool {
        self.output == "-"
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.is_stdout()
    }

    /// Whether an entry name matches one of the `-x` patterns.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude
            .iter()
            .any(|x| name.contains(x.as_str()) || glob_match(x, name))
    }
}

/// Glob matching supporting `*` (any run) and `?` (one char).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if p == t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern, &text)
}

/// Human-readable byte size.
pub fn format_size(size: u64) -> String {
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
        format!("{} bytes", size)
    }
}
