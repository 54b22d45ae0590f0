use clap::{Parser, Subcommand};
use std::path::PathBuf;

use demand_pager::{console, StoreId};
use pager_sim::{dump_store, heap, new_pager, replacement, shared, Report};

#[derive(Parser)]
#[command(name = "pager-sim")]
#[command(about = "Run demand-paging workloads on a simulated machine", long_about = None)]
struct Cli {
    /// Managed frames, boot frames included
    #[arg(short, long, default_value_t = 16)]
    frames: usize,

    /// Log every replacement decision
    #[arg(long)]
    trace: bool,

    /// Echo the kernel log
    #[arg(short, long)]
    verbose: bool,

    /// Write this store's pages to a file after the run
    #[arg(long, value_name = "PATH")]
    dump: Option<PathBuf>,

    /// Store to dump
    #[arg(long, default_value_t = 0)]
    dump_store: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write and verify more heap pages than there are frames
    Replacement {
        /// Heap pages to touch
        #[arg(short, long, default_value_t = 64)]
        pages: u32,
    },
    /// Publish a message from one process to another through a shared store
    Shared {
        /// Shared store id
        #[arg(short, long, default_value_t = 7)]
        store: usize,

        /// Message to publish
        #[arg(short, long, default_value = "hello from the writer")]
        message: String,
    },
    /// Allocate and free blocks in a virtual heap
    Heap {
        /// Heap pages
        #[arg(long, default_value_t = 256)]
        pages: usize,

        /// Request sizes in bytes
        #[arg(default_values_t = [4096u32, 4096, 100, 8000])]
        sizes: Vec<u32>,
    },
}

fn echo(line: &str) {
    println!("{}", line);
}

fn print_report(report: &Report) {
    for line in &report.lines {
        println!("{}", line);
    }
    let s = &report.stats;
    println!(
        "faults {} page-ins {} evictions {} write-backs {} second-chances {} syncs {} invalidations {} degraded {} kills {}",
        s.faults,
        s.page_ins,
        s.evictions,
        s.write_backs,
        s.second_chances,
        s.syncs,
        s.invalidations,
        s.degraded,
        s.kills
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.verbose || cli.trace {
        console::set_sink(Some(echo));
    }

    let mut pager = new_pager(cli.frames, cli.trace)?;
    let report = match &cli.command {
        Command::Replacement { pages } => replacement(&mut pager, *pages)?,
        Command::Shared { store, message } => shared(&mut pager, StoreId(*store), message)?,
        Command::Heap { pages, sizes } => heap(&mut pager, *pages, sizes)?,
    };
    print_report(&report);

    if let Some(path) = &cli.dump {
        dump_store(&mut pager, StoreId(cli.dump_store), path)?;
        if cli.verbose {
            println!("dumped store {} to {}", cli.dump_store, path.display());
        }
    }
    Ok(())
}
