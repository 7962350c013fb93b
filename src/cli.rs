//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use tape_fetcher_core::RunConfig;
use tape_fetcher_core::config::{
    DEFAULT_DOWNLOAD_WORKERS, DEFAULT_MIN_SIZE_KB, DEFAULT_PAGE_WORKERS, DEFAULT_PROBE_WORKERS,
    MAX_DOWNLOAD_WORKERS, MAX_PAGE_WORKERS, MAX_PROBE_WORKERS, parse_gallery_list,
};
use tape_fetcher_core::download::DownloadOptions;

/// Scrape, deduplicate and download imgsrc.ru albums.
///
/// Every downloaded source is recorded in a history database so it is never
/// fetched twice.
#[derive(Parser, Debug)]
#[command(name = "tape-fetcher")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// History database file (default: <dest>/.tape-fetcher/history.db)
    #[arg(long, global = true, value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// Redis URL for a fingerprint cache shared between processes
    #[arg(long, global = true, value_name = "URL")]
    pub cache_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find and verify candidates without downloading
    Search(SearchArgs),

    /// Search and download each gallery into <dest>/<owner>/<title>
    Fetch(FetchArgs),

    /// Download a candidate list saved by `search --json`
    Download(DownloadArgs),

    /// List the download history
    History(HistoryArgs),

    /// Mark history rows whose files are gone as deleted
    Reconcile(DestArgs),

    /// Delete the whole download history
    ClearHistory(ClearHistoryArgs),
}

/// Options shared by `search` and `fetch`.
#[derive(ClapArgs, Debug, Clone)]
pub struct ScanArgs {
    /// Gallery URLs (comma-separated lists are accepted)
    #[arg(required = true, value_name = "URL")]
    pub galleries: Vec<String>,

    /// Minimum image size in KB
    #[arg(long, default_value_t = DEFAULT_MIN_SIZE_KB)]
    pub min_size_kb: u64,

    /// Album pages scanned concurrently
    #[arg(long, default_value_t = DEFAULT_PAGE_WORKERS, value_parser = parse_page_workers)]
    pub page_workers: usize,

    /// Probes in flight per page
    #[arg(long, default_value_t = DEFAULT_PROBE_WORKERS, value_parser = parse_probe_workers)]
    pub probe_workers: usize,

    /// Treat each URL as the album (tape) URL itself
    #[arg(long)]
    pub direct_tape: bool,

    /// Re-fetch a page while it shows fewer full-size images than this
    #[arg(long, value_name = "N")]
    pub expected_per_page: Option<usize>,
}

impl ScanArgs {
    /// Gallery URLs with comma-separated lists expanded.
    pub fn gallery_urls(&self) -> Vec<String> {
        self.galleries
            .iter()
            .flat_map(|raw| parse_gallery_list(raw))
            .collect()
    }

    /// Builds a search-only run config.
    pub fn to_config(&self, database: Option<PathBuf>, cache_url: Option<String>) -> RunConfig {
        RunConfig {
            galleries: self.gallery_urls(),
            min_size_kb: self.min_size_kb,
            page_workers: self.page_workers,
            probe_workers: self.probe_workers,
            direct_tape: self.direct_tape,
            expected_per_page: self.expected_per_page,
            cache_url,
            database_path: database,
            ..RunConfig::default()
        }
    }
}

/// Arguments for `search`.
#[derive(ClapArgs, Debug)]
pub struct SearchArgs {
    #[command(flatten)]
    pub scan: ScanArgs,

    /// Print the candidate list as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Destination folder, used only to locate the history database
    #[arg(long, value_name = "DIR")]
    pub dest: Option<PathBuf>,
}

/// Options shared by `fetch` and `download`.
#[derive(ClapArgs, Debug, Clone)]
pub struct WriteArgs {
    /// Destination root folder
    #[arg(short, long, value_name = "DIR")]
    pub dest: PathBuf,

    /// Download even if the history says the source was fetched before
    #[arg(long)]
    pub overwrite: bool,

    /// Concurrent downloads
    #[arg(short = 'c', long, default_value_t = DEFAULT_DOWNLOAD_WORKERS, value_parser = parse_download_workers)]
    pub download_workers: usize,
}

/// Arguments for `fetch`.
#[derive(ClapArgs, Debug)]
pub struct FetchArgs {
    #[command(flatten)]
    pub scan: ScanArgs,

    #[command(flatten)]
    pub write: WriteArgs,
}

impl FetchArgs {
    /// Builds a combined search-and-download run config.
    pub fn to_config(&self, database: Option<PathBuf>, cache_url: Option<String>) -> RunConfig {
        RunConfig {
            dest_root: Some(self.write.dest.clone()),
            download_workers: self.write.download_workers,
            overwrite: self.write.overwrite,
            owner_folders: true,
            title_folders: true,
            download: true,
            ..self.scan.to_config(database, cache_url)
        }
    }
}

/// Arguments for `download`.
#[derive(ClapArgs, Debug)]
pub struct DownloadArgs {
    /// JSON file written by `search --json` ("-" for stdin)
    #[arg(value_name = "FILE")]
    pub candidates: PathBuf,

    #[command(flatten)]
    pub write: WriteArgs,

    /// Place files under an owner subfolder
    #[arg(long)]
    pub owner_folders: bool,

    /// Place files under an album-title subfolder
    #[arg(long)]
    pub title_folders: bool,
}

impl DownloadArgs {
    /// Download options for the engine.
    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            overwrite: self.write.overwrite,
            concurrency: self.write.download_workers,
            owner_folders: self.owner_folders,
            title_folders: self.title_folders,
            ..DownloadOptions::new(self.write.dest.clone())
        }
    }
}

/// Locates the history database for maintenance subcommands.
#[derive(ClapArgs, Debug)]
pub struct DestArgs {
    /// Destination root whose history database to use
    #[arg(long, value_name = "DIR")]
    pub dest: Option<PathBuf>,
}

/// Arguments for `history`.
#[derive(ClapArgs, Debug)]
pub struct HistoryArgs {
    #[command(flatten)]
    pub location: DestArgs,

    /// List distinct "owner - folder" galleries instead of files
    #[arg(long)]
    pub galleries: bool,

    /// Print entries as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `clear-history`.
#[derive(ClapArgs, Debug)]
pub struct ClearHistoryArgs {
    #[command(flatten)]
    pub location: DestArgs,

    /// Confirm deletion
    #[arg(long)]
    pub yes: bool,
}

fn parse_width(raw: &str, max: usize) -> Result<usize, String> {
    let value: usize = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not a number"))?;
    if (1..=max).contains(&value) {
        Ok(value)
    } else {
        Err(format!("must be between 1 and {max}"))
    }
}

fn parse_page_workers(raw: &str) -> Result<usize, String> {
    parse_width(raw, MAX_PAGE_WORKERS)
}

fn parse_probe_workers(raw: &str) -> Result<usize, String> {
    parse_width(raw, MAX_PROBE_WORKERS)
}

fn parse_download_workers(raw: &str) -> Result<usize, String> {
    parse_width(raw, MAX_DOWNLOAD_WORKERS)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const GALLERY: &str = "https://imgsrc.ru/jdoe/12345.html";

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["tape-fetcher", "-vv", "search", GALLERY]).unwrap();
        assert_eq!(args.verbose, 2);
        assert!(!args.quiet);
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "tape-fetcher",
            "search",
            GALLERY,
            "-q",
            "--database",
            "/tmp/h.db",
        ])
        .unwrap();
        assert!(args.quiet);
        assert_eq!(args.database, Some(PathBuf::from("/tmp/h.db")));
    }

    #[test]
    fn test_cli_subcommand_required() {
        let result = Args::try_parse_from(["tape-fetcher"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_search_defaults() {
        let args = Args::try_parse_from(["tape-fetcher", "search", GALLERY]).unwrap();
        let Command::Search(search) = args.command else {
            panic!("expected search");
        };
        assert!(!search.json);
        assert_eq!(search.scan.page_workers, DEFAULT_PAGE_WORKERS);
        assert_eq!(search.scan.probe_workers, DEFAULT_PROBE_WORKERS);
        assert_eq!(search.scan.min_size_kb, 10);
    }

    #[test]
    fn test_cli_search_requires_gallery() {
        let result = Args::try_parse_from(["tape-fetcher", "search"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn test_cli_page_workers_over_max_rejected() {
        let result =
            Args::try_parse_from(["tape-fetcher", "search", GALLERY, "--page-workers", "11"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
    }

    #[test]
    fn test_cli_download_workers_zero_rejected() {
        let result =
            Args::try_parse_from(["tape-fetcher", "fetch", GALLERY, "--dest", "/tmp", "-c", "0"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
    }

    #[test]
    fn test_cli_fetch_requires_dest() {
        let result = Args::try_parse_from(["tape-fetcher", "fetch", GALLERY]);
        assert!(result.is_err());
    }

    #[test]
    fn test_scan_args_expand_comma_lists() {
        let args = Args::try_parse_from([
            "tape-fetcher",
            "search",
            "https://imgsrc.ru/a/1.html, https://imgsrc.ru/b/2.html",
            "https://imgsrc.ru/c/3.html",
        ])
        .unwrap();
        let Command::Search(search) = args.command else {
            panic!("expected search");
        };
        assert_eq!(search.scan.gallery_urls().len(), 3);
    }

    #[test]
    fn test_fetch_config_forces_combined_layout() {
        let args = Args::try_parse_from([
            "tape-fetcher",
            "fetch",
            GALLERY,
            "--dest",
            "/data",
            "--overwrite",
        ])
        .unwrap();
        let Command::Fetch(fetch) = args.command else {
            panic!("expected fetch");
        };
        let config = fetch.to_config(None, None);
        assert!(config.download);
        assert!(config.overwrite);
        assert!(config.owner_folders);
        assert!(config.title_folders);
        assert_eq!(config.dest_root, Some(PathBuf::from("/data")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_download_args_build_options() {
        let args = Args::try_parse_from([
            "tape-fetcher",
            "download",
            "candidates.json",
            "--dest",
            "/data",
            "--owner-folders",
        ])
        .unwrap();
        let Command::Download(download) = args.command else {
            panic!("expected download");
        };
        let options = download.download_options();
        assert!(options.owner_folders);
        assert!(!options.title_folders);
        assert_eq!(options.dest_root, PathBuf::from("/data"));
    }

    #[test]
    fn test_clear_history_parses_yes() {
        let args = Args::try_parse_from(["tape-fetcher", "clear-history", "--yes"]).unwrap();
        let Command::ClearHistory(clear) = args.command else {
            panic!("expected clear-history");
        };
        assert!(clear.yes);
    }
}
