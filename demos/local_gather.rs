//! Gather example on a group of threads within this process.
use clap::Parser;
use log::{info, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::error::Error;
use std::thread;
use vector_gather::{gather_all, local_groups, CommGroup};

#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// Number of participating threads.
    #[clap(short, long, default_value_t = 4)]
    ranks: usize,
    /// Rank `r` contributes `r * elements_per_rank` elements.
    #[clap(short, long, default_value_t = 2)]
    elements_per_rank: usize,
    #[clap(short, long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    TermLogger::init(
        args.log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let elements_per_rank = args.elements_per_rank;
    let threads: Vec<_> = local_groups(args.ranks)
        .into_iter()
        .map(|group| {
            thread::spawn(move || {
                let rank = group.rank() as u64;
                let local: Vec<u64> = (0..rank * elements_per_rank as u64)
                    .map(|i| rank * 1000 + i)
                    .collect();
                let mut result = vec![];
                gather_all(&mut result, &local, &group).map(|_| result)
            })
        })
        .collect();

    let mut results = vec![];
    for thread in threads {
        let result = thread
            .join()
            .map_err(|_| "participant thread panicked")??;
        results.push(result);
    }
    if let Some(first) = results.first() {
        if results.iter().any(|result| result != first) {
            return Err("participants disagree on the gathered vector".into());
        }
        info!("{} ranks gathered {} elements", results.len(), first.len());
        info!("{:?}", first);
    }
    Ok(())
}
