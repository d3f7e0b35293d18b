//! strata CLI — single-file revision stores from the command line.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use strata_core::commit::{CommitOutcome, CommitRequest};
use strata_core::engine::Filter;
use strata_core::store::StoreReport;
use strata_core::{Store, StrataError, StrataResult};

#[derive(Parser)]
#[command(name = "strata", about = "strata — single-file revision stores", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a new revision into each file's store.
    Commit {
        /// Working files (or their ,v stores).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Log message for the new revision.
        #[arg(long, short)]
        message: String,

        /// Revision number to assign instead of the computed one.
        #[arg(long, short)]
        rev: Option<String>,

        /// Author to record (defaults to the ambient identity).
        #[arg(long)]
        user: Option<String>,

        /// State label for the new revision.
        #[arg(long)]
        state: Option<String>,

        /// Timestamp to record, `YYYY.MM.DD.HH.MM.SS`.
        #[arg(long)]
        date: Option<String>,
    },

    /// Reconstruct a revision into each working file.
    Checkout {
        /// Working files (or their ,v stores).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Revision number or symbolic name.
        #[arg(long, short)]
        rev: Option<String>,

        /// Newest revision not later than this date.
        #[arg(long, short)]
        date: Option<String>,

        /// Only revisions by this author.
        #[arg(long, short = 'w')]
        author: Option<String>,

        /// Only revisions with this state label.
        #[arg(long, short)]
        state: Option<String>,

        /// Print to stdout instead of writing the working file.
        #[arg(long, short)]
        print: bool,
    },

    /// Show each store's revision history.
    Log {
        /// Working files (or their ,v stores).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output format: "human" (default) or "json".
        #[arg(long, default_value = "human")]
        format: String,
    },

    /// Show the edit script between two revisions of one file.
    Diff {
        /// Working file (or its ,v store).
        file: PathBuf,

        /// Older revision (default: the selected default).
        #[arg(long)]
        from: Option<String>,

        /// Newer revision (default: the selected default).
        #[arg(long)]
        to: Option<String>,
    },

    /// Reserve a revision for editing.
    Lock {
        /// Working files (or their ,v stores).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Revision number or symbolic name (default: the head).
        #[arg(long, short)]
        rev: Option<String>,

        /// Lock holder (defaults to the ambient identity).
        #[arg(long)]
        user: Option<String>,
    },

    /// Release a held revision.
    Unlock {
        /// Working files (or their ,v stores).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Revision number or symbolic name (default: the head).
        #[arg(long, short)]
        rev: Option<String>,

        /// Lock holder (defaults to the ambient identity).
        #[arg(long)]
        user: Option<String>,
    },

    /// Bind a symbolic name to a revision.
    Tag {
        /// Name to bind.
        name: String,

        /// Working files (or their ,v stores).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Revision the name points at (default: the head).
        #[arg(long, short)]
        rev: Option<String>,
    },
}

/// Working file and its `,v` store, derived from whichever was given.
struct FilePair {
    work: PathBuf,
    store: PathBuf,
}

fn pair_for(arg: &Path) -> FilePair {
    let name = arg.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if let Some(base) = name.strip_suffix(",v") {
        FilePair {
            work: arg.with_file_name(base),
            store: arg.to_path_buf(),
        }
    } else {
        let mut store_name = name.to_string();
        store_name.push_str(",v");
        FilePair {
            work: arg.to_path_buf(),
            store: arg.with_file_name(store_name),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let ok = match cli.command {
        Commands::Commit {
            files,
            message,
            rev,
            user,
            state,
            date,
        } => for_each_file(&files, |pair| {
            cmd_commit(pair, &message, rev.as_deref(), user.as_deref(), state.as_deref(), date.as_deref())
        }),
        Commands::Checkout {
            files,
            rev,
            date,
            author,
            state,
            print,
        } => {
            let filter = Filter {
                date,
                author,
                state,
            };
            for_each_file(&files, |pair| cmd_checkout(pair, rev.as_deref(), &filter, print))
        }
        Commands::Log { files, format } => {
            for_each_file(&files, |pair| cmd_log(pair, &format))
        }
        Commands::Diff { file, from, to } => {
            for_each_file(&[file], |pair| cmd_diff(pair, from.as_deref(), to.as_deref()))
        }
        Commands::Lock { files, rev, user } => for_each_file(&files, |pair| {
            cmd_lock(pair, rev.as_deref(), user.as_deref(), true)
        }),
        Commands::Unlock { files, rev, user } => for_each_file(&files, |pair| {
            cmd_lock(pair, rev.as_deref(), user.as_deref(), false)
        }),
        Commands::Tag { name, files, rev } => {
            for_each_file(&files, |pair| cmd_tag(pair, &name, rev.as_deref()))
        }
    };

    if !ok {
        process::exit(1);
    }
}

/// Run `op` against every named file. A fatal error aborts that one file,
/// any error marks the batch failed, and the batch always runs to the end.
fn for_each_file<F>(files: &[PathBuf], mut op: F) -> bool
where
    F: FnMut(&FilePair) -> StrataResult<()>,
{
    let mut ok = true;
    for arg in files {
        let pair = pair_for(arg);
        if let Err(e) = op(&pair) {
            let label = if e.is_fatal() { "fatal" } else { "error" };
            eprintln!("{label}: {}: {e}", pair.store.display());
            ok = false;
        }
    }
    ok
}

fn cmd_commit(
    pair: &FilePair,
    message: &str,
    rev: Option<&str>,
    user: Option<&str>,
    state: Option<&str>,
    date: Option<&str>,
) -> StrataResult<()> {
    let text = fs::read_to_string(&pair.work)?;
    let mut store = Store::open_or_init(&pair.store)?;
    let rev = match rev {
        Some(r) => store.resolve_rev(Some(r))?,
        None => None,
    };
    let req = CommitRequest {
        text,
        log: message.to_string(),
        author: user.map(str::to_string),
        date: date.map(str::to_string),
        state: state.map(str::to_string),
        rev,
    };
    match store.commit(req, user)? {
        CommitOutcome::Committed(rev) => {
            println!("{} <- {}: revision {rev}", pair.store.display(), pair.work.display());
        }
        CommitOutcome::Unchanged(rev) => {
            println!("{}: unchanged since revision {rev}", pair.store.display());
        }
    }
    Ok(())
}

fn cmd_checkout(
    pair: &FilePair,
    rev: Option<&str>,
    filter: &Filter,
    print: bool,
) -> StrataResult<()> {
    let store = Store::open(&pair.store)?;
    let out = store.checkout(rev, filter)?;
    if print {
        print!("{}", out.text);
    } else {
        fs::write(&pair.work, &out.text)?;
        println!("{} -> {}: revision {}", pair.store.display(), pair.work.display(), out.rev);
    }
    Ok(())
}

fn cmd_log(pair: &FilePair, format: &str) -> StrataResult<()> {
    let store = Store::open(&pair.store)?;
    let report = store.report();
    match format {
        "json" => {
            let rendered = serde_json::to_string_pretty(&report)
                .map_err(|e| StrataError::Semantic(e.to_string()))?;
            println!("{rendered}");
        }
        _ => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &StoreReport) {
    println!("store: {}", report.file);
    match &report.head {
        Some(head) => println!("  head:    {head}"),
        None => println!("  head:    (empty)"),
    }
    if let Some(ref branch) = report.default_branch {
        println!("  branch:  {branch}");
    }
    println!(
        "  locking: {}",
        if report.strict { "strict" } else { "non-strict" }
    );
    for lock in &report.locks {
        println!("  lock:    {} by {}", lock.rev, lock.user);
    }
    for symbol in &report.symbols {
        println!("  symbol:  {}: {}", symbol.name, symbol.rev);
    }
    if !report.desc.is_empty() {
        println!("  desc:    {}", report.desc.trim_end());
    }
    println!("  total:   {} revision(s)", report.total);

    for entry in &report.entries {
        println!();
        println!("revision {}", entry.rev);
        println!("  date:   {}", human_date(&entry.date));
        println!("  author: {}", entry.author);
        println!("  state:  {}", entry.state);
        if !entry.branches.is_empty() {
            let names: Vec<String> = entry.branches.iter().map(|b| b.to_string()).collect();
            println!("  branches: {}", names.join(", "));
        }
        let log = entry.log.trim_end();
        if log.is_empty() {
            println!("  log:    (none)");
        } else {
            for line in log.lines() {
                println!("  | {line}");
            }
        }
    }
}

/// Render a stored dotted date for human output; malformed dates are shown
/// as stored.
fn human_date(raw: &str) -> String {
    strata_core::ident::parse_store_date(raw)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn cmd_diff(pair: &FilePair, from: Option<&str>, to: Option<&str>) -> StrataResult<()> {
    let store = Store::open(&pair.store)?;
    match store.diff(from, to, &Filter::default())? {
        Some(script) => print!("{script}"),
        None => println!("no difference"),
    }
    Ok(())
}

fn cmd_lock(
    pair: &FilePair,
    rev: Option<&str>,
    user: Option<&str>,
    take: bool,
) -> StrataResult<()> {
    let mut store = Store::open(&pair.store)?;
    let user = user
        .map(str::to_string)
        .unwrap_or_else(strata_core::ident::current_user);
    if take {
        let rev = store.lock(rev, &user)?;
        println!("{}: revision {rev} locked by {user}", pair.store.display());
    } else {
        let rev = store.unlock(rev, &user)?;
        println!("{}: revision {rev} unlocked", pair.store.display());
    }
    Ok(())
}

fn cmd_tag(pair: &FilePair, name: &str, rev: Option<&str>) -> StrataResult<()> {
    let mut store = Store::open(&pair.store)?;
    let rev = match rev {
        Some(r) => r.to_string(),
        None => match store.head_rev() {
            Some(head) => head.to_string(),
            None => {
                return Err(StrataError::Semantic(
                    "cannot tag an empty store".to_string(),
                ))
            }
        },
    };
    let bound = store.set_symbol(name, &rev)?;
    println!("{}: {name} -> {bound}", pair.store.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_from_working_name() {
        let pair = pair_for(Path::new("src/notes.txt"));
        assert_eq!(pair.work, Path::new("src/notes.txt"));
        assert_eq!(pair.store, Path::new("src/notes.txt,v"));
    }

    #[test]
    fn test_pair_from_store_name() {
        let pair = pair_for(Path::new("src/notes.txt,v"));
        assert_eq!(pair.work, Path::new("src/notes.txt"));
        assert_eq!(pair.store, Path::new("src/notes.txt,v"));
    }

    #[test]
    fn test_human_date_rendering() {
        assert_eq!(human_date("2026.03.01.10.00.00"), "2026-03-01 10:00:00");
        assert_eq!(human_date("97.03.05.08.09.10"), "1997-03-05 08:09:10");
        assert_eq!(human_date("not-a-date"), "not-a-date");
    }
}
